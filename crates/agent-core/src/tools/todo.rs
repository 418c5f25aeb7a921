//! Session task list tools (`todo_read`, `todo_write`).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{StoreError, ToolError};
use crate::session::SessionStore;
use crate::tool::{ParameterSchema, Tool, ToolContext, ToolOutput, ToolSchema};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    const fn marker(self) -> &'static str {
        match self {
            Self::Pending => "[ ]",
            Self::InProgress => "[~]",
            Self::Completed => "[x]",
            Self::Cancelled => "[-]",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoPriority {
    High,
    #[default]
    Medium,
    Low,
}

impl TodoPriority {
    const fn marker(self) -> &'static str {
        match self {
            Self::High => "!!!",
            Self::Medium => "!!",
            Self::Low => "!",
        }
    }
}

/// One task on a session's list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: TodoPriority,
}

impl TodoItem {
    fn render(&self) -> String {
        format!(
            "{} {} {} (id: {})",
            self.status.marker(),
            self.priority.marker(),
            self.content,
            self.id
        )
    }
}

fn render_list(items: &[TodoItem]) -> String {
    if items.is_empty() {
        return "No todos.".into();
    }
    items
        .iter()
        .map(TodoItem::render)
        .collect::<Vec<_>>()
        .join("\n")
}

fn store_failure(e: StoreError) -> ToolError {
    ToolError::Execution(format!("todo list unavailable: {e}"))
}

/// Read the session's task list
pub struct TodoReadTool {
    store: Arc<dyn SessionStore>,
}

impl TodoReadTool {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TodoReadTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "todo_read".into(),
            description: "Read the current todo list for this session. Returns a JSON array \
                          of tasks with id, content, status and priority."
                .into(),
            parameters: vec![],
        }
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let items = self
            .store
            .load_todos(&ctx.session_id)
            .await
            .map_err(store_failure)?;
        let output = serde_json::to_string(&items)
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(ToolOutput::new("Todo List", output).with_metadata(json!({ "count": items.len() })))
    }
}

/// Replace the session's task list
pub struct TodoWriteTool {
    store: Arc<dyn SessionStore>,
}

impl TodoWriteTool {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "todo_write".into(),
            description: "Replace the todo list for this session. Use it to plan and track \
                          progress on multi-step tasks."
                .into(),
            parameters: vec![
                ParameterSchema::new("todos", "array", "The complete, updated task list")
                    .required()
                    .with_items(json!({
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "cancelled"]
                            },
                            "priority": { "type": "string", "enum": ["high", "medium", "low"] }
                        },
                        "required": ["id", "content", "status", "priority"]
                    })),
            ],
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let items: Vec<TodoItem> = serde_json::from_value(args["todos"].clone())
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let open = items
            .iter()
            .filter(|t| !matches!(t.status, TodoStatus::Completed | TodoStatus::Cancelled))
            .count();
        let output = render_list(&items);
        let count = items.len();

        self.store
            .save_todos(&ctx.session_id, items)
            .await
            .map_err(store_failure)?;
        tracing::debug!(session_id = %ctx.session_id, count, "Todo list updated");

        Ok(ToolOutput::new("Todo List Updated", output)
            .with_metadata(json!({ "count": count, "open": open })))
    }
}
