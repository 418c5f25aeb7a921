//! Session compaction.
//!
//! Condenses a long transcript into a summary stored on the session. Runs on
//! request from the host, never from inside the agentic loop.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::{Message, Role};
use crate::provider::ModelInfo;
use crate::session::{SessionStore, SessionUpdate};
use crate::token;

/// Message count at which a session should be compacted
pub const COMPACTION_THRESHOLD: usize = 50;

const LINE_PREVIEW_CHARS: usize = 200;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompactionResult {
    pub session_id: String,
    pub summary: String,
    pub message_count: usize,
    pub tokens_saved: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompactionStatus {
    pub message_count: usize,
    pub compaction_threshold: usize,
    pub should_compact: bool,
    /// Transcript no longer fits the model's usable context
    pub context_overflow: bool,
    pub compaction_count: u32,
    pub remaining_until_compaction: usize,
}

pub struct Compactor {
    store: Arc<dyn SessionStore>,
}

impl Compactor {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Due once the message threshold is reached or, when the model is known,
    /// once the transcript overflows its context
    pub async fn should_compact(
        &self,
        session_id: &str,
        model: Option<&ModelInfo>,
    ) -> Result<bool, StoreError> {
        let (_, messages) = self.store.load(session_id).await?;
        Ok(due(&messages, model))
    }

    /// Summarize the session and record the summary on it
    pub async fn compact(&self, session_id: &str) -> Result<CompactionResult, StoreError> {
        let (info, messages) = self.store.load(session_id).await?;
        if info.is_none() {
            return Err(StoreError::NotFound(format!("session {session_id}")));
        }

        let estimated = token::count_messages(&messages).total();
        let summary = summarize(&messages);
        let tokens_saved = estimated.saturating_sub(token::estimate(&summary));

        self.store
            .update_session(
                session_id,
                SessionUpdate {
                    compaction_summary: Some(summary.clone()),
                    compaction_increment: 1,
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(session_id, messages = messages.len(), tokens_saved, "Session compacted");

        Ok(CompactionResult {
            session_id: session_id.to_string(),
            summary,
            message_count: messages.len(),
            tokens_saved,
        })
    }

    pub async fn status(
        &self,
        session_id: &str,
        model: Option<&ModelInfo>,
    ) -> Result<CompactionStatus, StoreError> {
        let (info, messages) = self.store.load(session_id).await?;
        let info = info.ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        let count = messages.len();
        Ok(CompactionStatus {
            message_count: count,
            compaction_threshold: COMPACTION_THRESHOLD,
            should_compact: due(&messages, model),
            context_overflow: model.is_some_and(|m| token::is_overflow(&messages, m)),
            compaction_count: info.compaction_count,
            remaining_until_compaction: COMPACTION_THRESHOLD.saturating_sub(count),
        })
    }
}

fn due(messages: &[Message], model: Option<&ModelInfo>) -> bool {
    messages.len() >= COMPACTION_THRESHOLD
        || model.is_some_and(|m| token::is_overflow(messages, m))
}

fn conversation_lines(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| {
            let text = m.text();
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            (!text.is_empty()).then(|| format!("{role}: {}", text.replace('\n', " ")))
        })
        .collect()
}

fn clip(line: &str) -> String {
    match line.char_indices().nth(LINE_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}

fn summarize(messages: &[Message]) -> String {
    let lines = conversation_lines(messages);
    let mut out = vec![
        format!("[Conversation Summary - {} messages]", messages.len()),
        String::new(),
        "Key points:".to_string(),
    ];

    if let Some(first) = lines.first() {
        out.push(format!("- {}", clip(first)));
    }
    if lines.len() > 1 {
        if let Some(last) = lines.last() {
            out.push(format!("- {}", clip(last)));
        }
    }

    out.push(String::new());
    out.push(format!("Total messages: {}", messages.len()));
    out.join("\n")
}
