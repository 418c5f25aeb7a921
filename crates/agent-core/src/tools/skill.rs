//! `skill` tool: step-by-step guidance the model loads when a task matches.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ToolError;
use crate::tool::{ParameterSchema, Tool, ToolContext, ToolOutput, ToolSchema};

/// Named instructions, loaded on demand
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// Markdown body handed to the model
    pub content: String,
}

impl Skill {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            content: content.into(),
        }
    }

    fn render(&self) -> String {
        format!(
            "## Skill: {}\n\n**Description**: {}\n\n{}",
            self.name, self.description, self.content
        )
    }
}

const WEB_RESEARCH: &str = "\
# Web Research

1. Split the question into a few focused search queries; rephrase when results are thin.
2. Run `websearch` for each query and pick the most authoritative hits (official docs, \
primary sources, recent publications).
3. Read the promising pages with `webfetch` instead of trusting snippets.
4. Cross-check claims that only one source makes and note publication dates.
5. Answer with a short synthesis and cite every URL you relied on.
";

const CODE_EXPLANATION: &str = "\
# Code Explanation

1. Gauge the reader's level from the question and answer at that level.
2. Start with what the code does as a whole, then walk through it section by section.
3. Explain why each part exists, not only what it does.
4. Use a small example input and trace it through the code.
5. Point out pitfalls and edge cases, and offer to go deeper on any part \
(the `question` tool can ask which one).
";

const API_INTEGRATION: &str = "\
# API Integration

- Credentials come from the environment or a secret store, never from source code.
- Every request gets a timeout; reuse one HTTP client for connection pooling.
- Retry only transient failures (timeouts, 429, 5xx) with exponential backoff and a cap; \
honour `Retry-After` when present.
- Validate response shapes before use and follow pagination to the end.
- Log failures with the endpoint and status, without secrets.
- Test against recorded or mocked responses, including the error paths.
";

const DEBUGGING: &str = "\
# Debugging

1. Reproduce: get the exact input, environment and steps, and confirm the failure.
2. Collect evidence: error messages, stack traces, logs and recent changes.
3. List hypotheses and rank them by likelihood; recent changes come first.
4. Test one hypothesis at a time with the smallest possible change.
5. Fix the root cause, add a regression test and re-run the original reproduction.
6. Check neighbouring behaviour for side effects.
";

const TASK_PLANNING: &str = "\
# Task Planning

1. Restate the goal and what done looks like, including constraints.
2. Break the work into small, concrete items and note which depend on others.
3. Order the items by dependency and put the riskiest ones early.
4. Record the plan with `todo_write` and keep statuses current as you go.
5. Include a verification item for every deliverable, and re-plan when something blocks.
";

fn default_skills() -> Vec<Skill> {
    vec![
        Skill::new(
            "web-research",
            "Gathering and citing information from several web sources",
            WEB_RESEARCH,
        ),
        Skill::new(
            "code-explanation",
            "Explaining code clearly to readers of any experience level",
            CODE_EXPLANATION,
        ),
        Skill::new(
            "api-integration",
            "Calling external APIs robustly and securely",
            API_INTEGRATION,
        ),
        Skill::new("debugging", "Finding and fixing bugs systematically", DEBUGGING),
        Skill::new(
            "task-planning",
            "Breaking a complex task into tracked, ordered steps",
            TASK_PLANNING,
        ),
    ]
}

/// Serves the built-in skills plus any the host adds
#[derive(Clone, Debug)]
pub struct SkillTool {
    skills: Vec<Skill>,
}

impl Default for SkillTool {
    fn default() -> Self {
        Self {
            skills: default_skills(),
        }
    }
}

impl SkillTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a skill, replacing one with the same name
    #[must_use]
    pub fn with_skill(mut self, skill: Skill) -> Self {
        self.skills.retain(|s| s.name != skill.name);
        self.skills.push(skill);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.name == name)
    }

    fn names(&self) -> Vec<&str> {
        self.skills.iter().map(|s| s.name.as_str()).collect()
    }
}

#[async_trait]
impl Tool for SkillTool {
    fn schema(&self) -> ToolSchema {
        let listing: String = self
            .skills
            .iter()
            .map(|s| format!("\n- {}: {}", s.name, s.description))
            .collect();
        ToolSchema {
            name: "skill".into(),
            description: format!(
                "Load detailed instructions for a kind of task. Use it when the task matches \
                 one of the available skills.\n\nAvailable skills:{listing}"
            ),
            parameters: vec![
                ParameterSchema::new("name", "string", "Name of the skill to load")
                    .required()
                    .with_enum(&self.names()),
            ],
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let name = args["name"].as_str().unwrap_or_default();
        let skill = self.get(name).ok_or_else(|| {
            ToolError::Execution(format!(
                "Skill '{name}' not found. Available skills: {}",
                self.names().join(", ")
            ))
        })?;
        Ok(ToolOutput::new(format!("Loaded skill: {}", skill.name), skill.render())
            .with_metadata(json!({ "name": skill.name })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_lists_skills() {
        let schema = SkillTool::new().schema();
        assert!(schema.description.contains("- debugging: "));
        let params = schema.parameters_json();
        assert_eq!(params["properties"]["name"]["enum"].as_array().unwrap().len(), 5);
        assert_eq!(params["required"], json!(["name"]));
    }

    #[tokio::test]
    async fn test_load_skill() {
        let tool = SkillTool::new();
        let output = tool
            .execute(json!({ "name": "task-planning" }), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(output.title, "Loaded skill: task-planning");
        assert!(output.output.starts_with("## Skill: task-planning\n\n**Description**: "));
        assert!(output.output.contains("todo_write"));
        assert_eq!(output.metadata["name"], "task-planning");
    }

    #[tokio::test]
    async fn test_unknown_skill_lists_the_available_ones() {
        let err = SkillTool::new()
            .execute(json!({ "name": "juggling" }), &ToolContext::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Skill 'juggling' not found. Available skills: web-research, code-explanation, \
             api-integration, debugging, task-planning"
        );
    }

    #[tokio::test]
    async fn test_host_skill_replaces_builtin() {
        let tool = SkillTool::new().with_skill(Skill::new("debugging", "Ours", "Bisect first."));
        assert_eq!(tool.names().len(), 5);
        let output = tool
            .execute(json!({ "name": "debugging" }), &ToolContext::default())
            .await
            .unwrap();
        assert!(output.output.ends_with("Bisect first."));
    }
}
