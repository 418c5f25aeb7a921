//! Conversation Messages
//!
//! Stored messages are sequences of typed [`Part`]s. Providers never see them
//! directly: [`build_history`] projects them into plain role/content entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identifier::{self, IdKind};

/// Role of a stored message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User input, including tool results fed back to the model
    User,
    /// Assistant (LLM) response
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// Why a step or a run stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without requesting tools
    EndTurn,
    /// The model requested tools; the loop goes on
    ToolCalls,
    /// A `question` tool ran; waiting for the human
    Question,
    /// The step budget was used up
    MaxSteps,
    /// The model hit its output token limit
    MaxTokens,
    /// The same tool call kept repeating
    DoomLoop,
    /// Provider or store failure
    Error,
}

impl StopReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolCalls => "tool_calls",
            Self::Question => "question",
            Self::MaxSteps => "max_steps",
            Self::MaxTokens => "max_tokens",
            Self::DoomLoop => "doom_loop",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a tool execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Completed,
    Error,
}

/// One typed fragment of message content. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        /// JSON-encoded arguments, as produced by the model
        arguments: String,
    },
    ToolResult {
        tool_call_id: String,
        output: String,
        status: ToolStatus,
    },
    StepStart {
        step_number: u32,
        max_steps: u32,
    },
    StepFinish {
        step_number: u32,
        stop_reason: StopReason,
        cost: f64,
        input_tokens: u64,
        output_tokens: u64,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A persisted message
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub parts: Vec<Part>,

    /// For assistant messages: the user message that triggered the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// `None` while a step is in flight or when it was aborted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<StopReason>,

    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// A message about to be persisted.
///
/// The id is allocated up front so it can be announced before the message is
/// written.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub id: String,
    pub role: Role,
    pub parts: Vec<Part>,
    pub parent_id: Option<String>,
    pub finish: Option<StopReason>,
}

impl NewMessage {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: identifier::ascending(IdKind::Message),
            role,
            parts,
            parent_id: None,
            finish: None,
        }
    }

    /// Create a user message with a single text part
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(content)])
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub const fn with_finish(mut self, finish: StopReason) -> Self {
        self.finish = Some(finish);
        self
    }

    /// Stamp the message for a session
    pub fn into_message(self, session_id: &str) -> Message {
        Message {
            id: self.id,
            session_id: session_id.to_string(),
            role: self.role,
            parts: self.parts,
            parent_id: self.parent_id,
            finish: self.finish,
            created_at: Utc::now(),
        }
    }
}

/// Role of a provider-facing history entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Role/content pair handed to a provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: ChatRole,
    pub content: String,
}

impl HistoryEntry {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Lossy projection of stored messages into provider history.
///
/// Text and tool results survive; reasoning, tool calls and step markers are
/// dropped. Tool results are presented as user input.
pub fn build_history(messages: &[Message]) -> Vec<HistoryEntry> {
    let mut history = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::User => {
                let mut blocks: Vec<String> = Vec::new();
                let text = msg.text();
                if !text.is_empty() {
                    blocks.push(text);
                }
                for part in &msg.parts {
                    if let Part::ToolResult { output, .. } = part {
                        blocks.push(format!("Tool result:\n{output}"));
                    }
                }
                if !blocks.is_empty() {
                    history.push(HistoryEntry::user(blocks.join("\n\n")));
                }
            }
            Role::Assistant => {
                let text = msg.text();
                if !text.is_empty() {
                    history.push(HistoryEntry::assistant(text));
                }
            }
        }
    }

    history
}
