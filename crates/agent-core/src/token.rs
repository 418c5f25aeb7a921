//! Token estimation and context overflow checks.

use serde::{Deserialize, Serialize};

use crate::message::{Message, Part, Role};
use crate::provider::ModelInfo;

const CHARS_PER_TOKEN: f64 = 4.0;

/// Output tokens reserved below the context limit
pub const OUTPUT_TOKEN_MAX: u64 = 16_384;

/// Rough token count (~4 characters per token)
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn estimate(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() as f64 / CHARS_PER_TOKEN).round() as u64
}

/// Estimated token split of a transcript
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub input: u64,
    pub output: u64,
}

impl TokenInfo {
    pub const fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// Estimate tokens for a stored transcript
pub fn count_messages(messages: &[Message]) -> TokenInfo {
    let mut info = TokenInfo::default();

    for msg in messages {
        for part in &msg.parts {
            match (msg.role, part) {
                (Role::User, Part::Text { text }) => info.input += estimate(text),
                (Role::User, Part::ToolResult { output, .. }) => info.input += estimate(output),
                (Role::Assistant, Part::Text { text } | Part::Reasoning { text }) => {
                    info.output += estimate(text);
                }
                (Role::Assistant, Part::ToolCall {
                    name, arguments, ..
                }) => {
                    info.output += estimate(name) + estimate(arguments);
                }
                _ => {}
            }
        }
    }

    info
}

/// Whether the transcript no longer fits the model's usable context
pub fn is_overflow(messages: &[Message], model: &ModelInfo) -> bool {
    if model.context_limit == 0 {
        return false;
    }
    let usable = model
        .context_limit
        .saturating_sub(model.output_limit.min(OUTPUT_TOKEN_MAX));
    count_messages(messages).total() > usable
}
