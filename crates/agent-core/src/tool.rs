//! Tool System
//!
//! Extensible tool framework for agent capabilities.
//! Tools are registered by the host and invoked by the agentic loop; the
//! registry is passed in explicitly, there is no process-wide registry.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::error::ToolError;
use crate::provider::ToolCallRequest;

/// Longest tool output handed back to the model
pub const MAX_OUTPUT_CHARS: usize = 50_000;

const TRUNCATION_MARKER: &str = "\n\n[Output truncated...]";

/// Where a tool call happens
#[derive(Clone, Debug, Default)]
pub struct ToolContext {
    pub session_id: String,
    pub message_id: String,
    pub tool_call_id: String,
    pub agent_id: String,
}

/// What a tool returns on success
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Short label for UIs
    pub title: String,

    /// Text handed back to the model
    pub output: String,

    /// Structured data (if applicable)
    #[serde(default)]
    pub metadata: Value,
}

impl ToolOutput {
    pub fn new(title: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            output: output.into(),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result from tool execution, as seen by the loop
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// Output text, or a human-readable error
    pub text: String,

    #[serde(default)]
    pub metadata: Value,

    pub is_error: bool,
}

impl ToolResult {
    pub fn success(output: ToolOutput) -> Self {
        let ToolOutput {
            title,
            output,
            metadata,
        } = output;
        let metadata = match metadata {
            Value::Object(mut map) => {
                map.entry("title").or_insert(Value::String(title));
                Value::Object(map)
            }
            Value::Null => json!({ "title": title }),
            other => json!({ "title": title, "data": other }),
        };
        Self {
            text: truncate_output(&output),
            metadata,
            is_error: false,
        }
    }

    pub fn failure(error: impl std::fmt::Display) -> Self {
        Self {
            text: format!("Error: {error}"),
            metadata: Value::Null,
            is_error: true,
        }
    }
}

/// Cut output longer than [`MAX_OUTPUT_CHARS`] and mark it
pub fn truncate_output(output: &str) -> String {
    match output.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &output[..cut]),
        None => output.to_string(),
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,

    /// Item schema for arrays
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
}

impl ParameterSchema {
    pub fn new(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: false,
            enum_values: None,
            items: None,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| json!(v)).collect());
        self
    }

    pub fn with_items(mut self, items: Value) -> Self {
        self.items = Some(items);
        self
    }
}

/// Tool definition schema (for LLM function calling)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,
}

impl ToolSchema {
    /// JSON Schema object describing the parameters
    pub fn parameters_json(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(param.param_type));
            prop.insert("description".into(), json!(param.description));
            if let Some(values) = &param.enum_values {
                prop.insert("enum".into(), Value::Array(values.clone()));
            }
            if let Some(items) = &param.items {
                prop.insert("items".into(), items.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
        }

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema for LLM function calling
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with parsed arguments
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;

    /// Validate arguments before execution (optional)
    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        let schema = self.schema();

        for param in schema.parameters.iter().filter(|p| p.required) {
            if args.get(&param.name).is_none_or(Value::is_null) {
                return Err(ToolError::InvalidArguments(format!(
                    "Missing required parameter: {}",
                    param.name
                )));
            }
        }

        Ok(())
    }
}

/// Registry for available tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        self.tools.insert(schema.name, tool);
    }

    /// Case-sensitive exact lookup
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Run a tool on JSON-encoded arguments.
    ///
    /// Never fails: bad JSON, validation and handler errors come back as an
    /// error result the model can read. A panicking handler is reported the
    /// same way.
    pub async fn execute(
        &self,
        tool: &Arc<dyn Tool>,
        arguments_json: &str,
        ctx: &ToolContext,
    ) -> ToolResult {
        let args = match parse_arguments(arguments_json) {
            Ok(args) => args,
            Err(e) => return ToolResult::failure(e),
        };

        if let Err(e) = tool.validate(&args) {
            return ToolResult::failure(e);
        }

        match AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind().await {
            Ok(Ok(output)) => ToolResult::success(output),
            Ok(Err(e)) => {
                tracing::warn!(tool = %tool.schema().name, error = %e, "Tool execution failed");
                ToolResult::failure(e)
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(tool = %tool.schema().name, %reason, "Tool panicked");
                ToolResult::failure(ToolError::Execution(format!("tool panicked: {reason}")))
            }
        }
    }

    /// Look up and run a model-requested call
    pub async fn execute_call(&self, call: &ToolCallRequest, ctx: &ToolContext) -> ToolResult {
        match self.lookup(&call.name) {
            Ok(tool) => self.execute(&tool, &call.arguments, ctx).await,
            Err(e) => ToolResult::failure(e),
        }
    }

    /// All tool schemas, sorted by name
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

fn parse_arguments(arguments_json: &str) -> Result<Value, ToolError> {
    if arguments_json.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    match serde_json::from_str::<Value>(arguments_json) {
        Ok(Value::Null) => Ok(Value::Object(Map::new())),
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(ToolError::InvalidArguments(e.to_string())),
    }
}
