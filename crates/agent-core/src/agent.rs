//! Agent Profiles
//!
//! A profile bundles the loop settings, prompt and tool permissions an agent
//! runs with. The catalog is owned by the host and handed to the orchestrator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

const BASE_PROMPT: &str = "You are an autonomous assistant. Keep working until the user's \
request is fully resolved before ending your turn. Plan multi-step work with the todo tools \
and keep the list current as you go. When you need a decision from the user, ask with the \
question tool instead of guessing. Be concise and accurate.";

/// Where a profile may be selected
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Primary,
    Subagent,
    All,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Allow,
    Deny,
    Ask,
}

/// Tool permission rule. `*` matches every tool, a trailing `*` matches a prefix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub tool_name: String,
    pub action: PermissionAction,
}

impl Permission {
    pub fn new(tool_name: impl Into<String>, action: PermissionAction) -> Self {
        Self {
            tool_name: tool_name.into(),
            action,
        }
    }

    fn matches(&self, tool: &str) -> bool {
        match self.tool_name.strip_suffix('*') {
            Some(prefix) => tool.starts_with(prefix),
            None => self.tool_name == tool,
        }
    }
}

/// Agent configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub mode: AgentMode,
    #[serde(default)]
    pub hidden: bool,

    /// Preferred model, overriding the server default
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub prompt: Option<String>,

    #[serde(default)]
    pub permissions: Vec<Permission>,

    pub auto_continue: bool,
    pub max_steps: u32,
    pub pause_on_question: bool,
}

impl AgentProfile {
    /// New primary profile allowing every tool
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            mode: AgentMode::Primary,
            hidden: false,
            model: None,
            temperature: None,
            max_tokens: None,
            prompt: None,
            permissions: vec![Permission::new("*", PermissionAction::Allow)],
            auto_continue: true,
            max_steps: 50,
            pause_on_question: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub const fn with_mode(mut self, mode: AgentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_permission(mut self, tool_name: impl Into<String>, action: PermissionAction) -> Self {
        self.permissions.push(Permission::new(tool_name, action));
        self
    }

    pub const fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Last matching rule wins; no match means allow
    pub fn permission_for(&self, tool: &str) -> PermissionAction {
        self.permissions
            .iter()
            .rev()
            .find(|p| p.matches(tool))
            .map_or(PermissionAction::Allow, |p| p.action)
    }

    /// `ask` has no interactive approval in the hosted service and runs as allowed
    pub fn allows(&self, tool: &str) -> bool {
        self.permission_for(tool) != PermissionAction::Deny
    }

    /// Profile part of the system prompt
    pub fn system_prompt(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if self.auto_continue {
            if let Some(prompt) = &self.prompt {
                parts.push(prompt.clone());
            }
        }
        if let Some(description) = &self.description {
            parts.push(format!("You are the '{}' agent: {description}", self.name));
        }
        parts.join("\n\n")
    }
}

/// Built-in and host-registered profiles
#[derive(Clone, Debug)]
pub struct AgentCatalog {
    builtin: HashMap<String, AgentProfile>,
    custom: HashMap<String, AgentProfile>,
}

impl Default for AgentCatalog {
    fn default() -> Self {
        let builtin = [build(), general(), explore(), compaction()]
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        Self {
            builtin,
            custom: HashMap::new(),
        }
    }
}

impl AgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host-registered profiles shadow built-in ones
    pub fn get(&self, id: &str) -> Option<&AgentProfile> {
        self.custom.get(id).or_else(|| self.builtin.get(id))
    }

    /// Profiles, `build` first then by name
    pub fn list(&self, mode: Option<AgentMode>, include_hidden: bool) -> Vec<&AgentProfile> {
        let mut merged: HashMap<&str, &AgentProfile> = self
            .builtin
            .iter()
            .map(|(id, p)| (id.as_str(), p))
            .collect();
        merged.extend(self.custom.iter().map(|(id, p)| (id.as_str(), p)));

        let mut agents: Vec<&AgentProfile> = merged
            .into_values()
            .filter(|p| include_hidden || !p.hidden)
            .filter(|p| mode.is_none_or(|m| p.mode == m))
            .collect();
        agents.sort_by(|a, b| (a.name != "build", &a.name).cmp(&(b.name != "build", &b.name)));
        agents
    }

    /// Shipped with the catalog rather than registered by the host
    pub fn is_builtin(&self, id: &str) -> bool {
        self.builtin.contains_key(id)
    }

    pub fn register(&mut self, profile: AgentProfile) {
        self.custom.insert(profile.id.clone(), profile);
    }

    /// Only host-registered profiles can be removed
    pub fn unregister(&mut self, id: &str) -> bool {
        self.custom.remove(id).is_some()
    }

    pub fn default_profile(&self) -> &AgentProfile {
        self.get("build").unwrap_or_else(|| &self.builtin["build"])
    }

    /// Profile by id, falling back to the default
    pub fn resolve(&self, id: Option<&str>) -> &AgentProfile {
        id.and_then(|id| self.get(id))
            .unwrap_or_else(|| self.default_profile())
    }
}

fn build() -> AgentProfile {
    let mut profile = AgentProfile::new("build")
        .with_description(
            "Default agent with full capabilities. Continues working until the task is complete.",
        )
        .with_permission("question", PermissionAction::Allow);
    profile.prompt = Some(BASE_PROMPT.into());
    profile
}

fn general() -> AgentProfile {
    AgentProfile::new("general")
        .with_description(
            "General-purpose agent for researching complex questions and executing multi-step tasks.",
        )
        .with_mode(AgentMode::Subagent)
        .with_max_steps(30)
        .with_permission("todo_*", PermissionAction::Deny)
}

fn explore() -> AgentProfile {
    let mut profile = AgentProfile::new("explore")
        .with_description(
            "Fast agent specialized for exploring and searching for information.",
        )
        .with_mode(AgentMode::Subagent)
        .with_permission("*", PermissionAction::Deny)
        .with_permission("websearch", PermissionAction::Allow)
        .with_permission("webfetch", PermissionAction::Allow);
    profile.auto_continue = false;
    profile
}

fn compaction() -> AgentProfile {
    let mut profile = AgentProfile::new("compaction")
        .with_description("Summarizes conversation context for compaction")
        .with_max_steps(1)
        .with_permission("*", PermissionAction::Deny);
    profile.name = "Compaction".into();
    profile.hidden = true;
    profile.auto_continue = false;
    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_matching_rule_wins() {
        let catalog = AgentCatalog::new();

        let general = catalog.get("general").unwrap();
        assert_eq!(general.permission_for("todo_write"), PermissionAction::Deny);
        assert_eq!(general.permission_for("question"), PermissionAction::Allow);

        let explore = catalog.get("explore").unwrap();
        assert!(!explore.allows("todo_read"));
        assert!(explore.allows("webfetch"));

        let ask = AgentProfile::new("x").with_permission("question", PermissionAction::Ask);
        assert!(ask.allows("question"));
    }

    #[test]
    fn test_list_orders_build_first_and_hides() {
        let mut catalog = AgentCatalog::new();
        catalog.register(AgentProfile::new("analyst"));

        let names: Vec<&str> = catalog.list(None, false).iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["build", "analyst", "explore", "general"]);

        let subagents = catalog.list(Some(AgentMode::Subagent), false);
        assert_eq!(subagents.len(), 2);

        assert!(catalog.list(None, true).iter().any(|p| p.id == "compaction"));
    }

    #[test]
    fn test_custom_profiles_shadow_and_unregister() {
        let mut catalog = AgentCatalog::new();
        catalog.register(AgentProfile::new("build").with_max_steps(5));
        assert_eq!(catalog.default_profile().max_steps, 5);

        assert!(catalog.unregister("build"));
        assert_eq!(catalog.default_profile().max_steps, 50);
        assert!(!catalog.unregister("build"));
        assert_eq!(catalog.resolve(Some("missing")).id, "build");
        assert!(catalog.is_builtin("compaction"));
        assert!(!catalog.is_builtin("analyst"));
    }

    #[test]
    fn test_system_prompt() {
        let catalog = AgentCatalog::new();
        let build = catalog.get("build").unwrap().system_prompt();
        assert!(build.starts_with(BASE_PROMPT));
        assert!(build.ends_with("You are the 'build' agent: Default agent with full capabilities. Continues working until the task is complete."));

        let explore = catalog.get("explore").unwrap().system_prompt();
        assert!(explore.starts_with("You are the 'explore' agent"));
    }
}
