//! `question` tool: the agent's pause point for human input.
//!
//! The tool only renders and records the questions. The orchestrator stops the
//! run after a step that called it; the human answers with the next user turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ToolError;
use crate::identifier::{self, IdKind};
use crate::tool::{ParameterSchema, Tool, ToolContext, ToolOutput, ToolSchema};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionInfo {
    pub question: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default = "default_custom")]
    pub custom: bool,
}

const fn default_custom() -> bool { true }

impl QuestionInfo {
    fn render(&self, index: usize) -> String {
        let mut out = if self.header.is_empty() {
            format!("{}. {}", index + 1, self.question)
        } else {
            format!("{}. [{}] {}", index + 1, self.header, self.question)
        };
        for option in &self.options {
            if option.description.is_empty() {
                out.push_str(&format!("\n   - {}", option.label));
            } else {
                out.push_str(&format!("\n   - {}: {}", option.label, option.description));
            }
        }
        if self.multiple {
            out.push_str("\n   (multiple choices allowed)");
        }
        out
    }
}

const DESCRIPTION: &str = "Ask the user one or more questions when you need a decision, \
a preference or a clarification before going on. Provide at least two options per question; \
put a recommended option first. The run pauses until the user replies.";

pub struct QuestionTool;

#[async_trait]
impl Tool for QuestionTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "question".into(),
            description: DESCRIPTION.into(),
            parameters: vec![
                ParameterSchema::new("questions", "array", "Questions to ask")
                    .required()
                    .with_items(json!({
                        "type": "object",
                        "properties": {
                            "question": { "type": "string", "description": "Complete question" },
                            "header": { "type": "string", "description": "Very short label" },
                            "options": {
                                "type": "array",
                                "minItems": 2,
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "label": { "type": "string" },
                                        "description": { "type": "string" }
                                    },
                                    "required": ["label"]
                                }
                            },
                            "multiple": { "type": "boolean" },
                            "custom": { "type": "boolean" }
                        },
                        "required": ["question"]
                    })),
            ],
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let questions: Vec<QuestionInfo> = serde_json::from_value(args["questions"].clone())
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if questions.is_empty() {
            return Err(ToolError::InvalidArguments(
                "at least one question is required".into(),
            ));
        }

        let request_id = if ctx.tool_call_id.is_empty() {
            identifier::ascending(IdKind::Question)
        } else {
            ctx.tool_call_id.clone()
        };

        let output = questions
            .iter()
            .enumerate()
            .map(|(i, q)| q.render(i))
            .collect::<Vec<_>>()
            .join("\n\n");

        tracing::debug!(session_id = %ctx.session_id, request_id = %request_id, count = questions.len(), "Questions asked");

        Ok(ToolOutput::new(
            format!("Asked {} question(s)", questions.len()),
            format!("Waiting for the user to answer:\n\n{output}"),
        )
        .with_metadata(json!({ "request_id": request_id, "questions": questions })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_renders_and_records_questions() {
        let args = json!({ "questions": [{
            "question": "Which database?",
            "header": "Storage",
            "options": [
                { "label": "Postgres (Recommended)", "description": "Managed" },
                { "label": "SQLite" }
            ]
        }]});
        let ctx = ToolContext {
            tool_call_id: "call_9".into(),
            ..Default::default()
        };
        let out = QuestionTool.execute(args, &ctx).await.unwrap();

        assert!(out.output.contains("1. [Storage] Which database?"));
        assert!(out.output.contains("- Postgres (Recommended): Managed"));
        assert!(out.output.contains("- SQLite"));
        assert_eq!(out.metadata["request_id"], "call_9");
        assert_eq!(out.metadata["questions"][0]["custom"], true);
    }

    #[tokio::test]
    async fn test_requires_a_question() {
        let err = QuestionTool
            .execute(json!({ "questions": [] }), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
