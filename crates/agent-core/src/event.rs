//! Events streamed to the caller of a run.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::message::StopReason;
use crate::provider::{TokenUsage, ToolCallRequest};

/// One observable state transition of a run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    MessageStart {
        message_id: String,
        parent_id: Option<String>,
    },
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        tool_call: ToolCallRequest,
    },
    ToolResult {
        text: String,
        tool_call_id: String,
        is_error: bool,
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
    Done {
        usage: TokenUsage,
        stop_reason: StopReason,
    },
    Error {
        error: String,
    },
}

impl Event {
    pub fn error(error: impl std::fmt::Display) -> Self {
        Self::Error {
            error: error.to_string(),
        }
    }

    /// Wire discriminator
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::Text { .. } => "text",
            Self::Reasoning { .. } => "reasoning",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::StepStart { .. } => "step_start",
            Self::StepFinish { .. } => "step_finish",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Lazy, single-pass event sequence. Dropping it aborts the run.
pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;
