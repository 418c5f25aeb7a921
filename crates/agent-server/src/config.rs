//! Server configuration from the environment

use std::path::PathBuf;

use agent_core::LoopConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:7860";

/// Settings read once at startup, after `.env` has been loaded
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// JSON session directory; sessions stay in memory when unset
    pub storage_path: Option<PathBuf>,

    pub default_provider: String,
    pub default_model: String,

    /// Overrides the loop's step budget
    pub max_steps: Option<u32>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let default_provider = env("DEFAULT_PROVIDER").unwrap_or_else(|| "ollama".into());
        let default_model =
            env("DEFAULT_MODEL").unwrap_or_else(|| fallback_model(&default_provider).into());

        Self {
            bind_addr: env("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            storage_path: env("STORAGE_PATH").map(PathBuf::from),
            default_provider,
            default_model,
            max_steps: env("AGENT_MAX_STEPS").and_then(|s| s.parse().ok()),
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        let mut config = LoopConfig::default();
        if let Some(max_steps) = self.max_steps {
            config.max_steps = max_steps.max(1);
        }
        config
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn fallback_model(provider_id: &str) -> &'static str {
    match provider_id {
        "anthropic" => "claude-sonnet-4-20250514",
        "openai" => "gpt-4o-mini",
        _ => "llama3.2",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_model_per_provider() {
        assert_eq!(fallback_model("anthropic"), "claude-sonnet-4-20250514");
        assert_eq!(fallback_model("openai"), "gpt-4o-mini");
        assert_eq!(fallback_model("ollama"), "llama3.2");
    }

    #[test]
    fn test_loop_config_override() {
        let config = ServerConfig {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            storage_path: None,
            default_provider: "ollama".into(),
            default_model: "llama3.2".into(),
            max_steps: Some(0),
        };
        assert_eq!(config.loop_config().max_steps, 1);
        assert!(config.loop_config().auto_continue);
    }
}
