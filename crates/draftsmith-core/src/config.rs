use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DraftsmithError, Result};
use crate::prompts::PromptSet;

/// Top-level Draftsmith configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub prompts: PromptSet,
}

/// Which orchestration graph drives a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Classify once, then dispatch to a single handler.
    #[default]
    Routing,
    /// Let the model call handler tools in a bounded loop.
    Agent,
}

impl std::str::FromStr for Variant {
    type Err = DraftsmithError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "routing" | "router" => Ok(Self::Routing),
            "agent" | "tools" => Ok(Self::Agent),
            other => Err(DraftsmithError::Config(format!("unknown variant: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default)]
    pub variant: Variant,
    /// Upper bound on agent/tool cycles per turn (agent variant).
    #[serde(default = "default_max_tool_cycles")]
    pub max_tool_cycles: usize,
    #[serde(default = "default_router_timeout")]
    pub router_timeout_secs: u64,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// Text turns of history passed to reply and general generation.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl AssistantConfig {
    /// Cycle cap actually used by the agent loop; never zero.
    pub fn tool_cycle_cap(&self) -> usize {
        self.max_tool_cycles.max(1)
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            max_tool_cycles: default_max_tool_cycles(),
            router_timeout_secs: default_router_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            history_window: default_history_window(),
        }
    }
}

fn default_max_tool_cycles() -> usize { 8 }
fn default_router_timeout() -> u64 { 30 }
fn default_tool_timeout() -> u64 { 60 }
fn default_history_window() -> usize { 12 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            extra_headers: HashMap::new(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_model_id() -> String { "gpt-4o-mini".to_string() }
fn default_max_tokens() -> u32 { 1024 }
fn default_temperature() -> f32 { 0.0 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 2 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 15000 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                DraftsmithError::ConfigNotFound(path.display().to_string())
            }
            _ => DraftsmithError::Io(e),
        })?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(
            path = %path.display(),
            provider = %config.model.provider,
            variant = ?config.assistant.variant,
            "Config loaded"
        );
        Ok(config)
    }

    /// Parse config text, expanding `${ENV_VAR}` references first.
    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| DraftsmithError::Config(e.to_string()))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            assistant: AssistantConfig::default(),
            prompts: PromptSet::default(),
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_DRAFTSMITH_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_DRAFTSMITH_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_DRAFTSMITH_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_DRAFTSMITH_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_DRAFTSMITH_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config = AppConfig::from_toml("[model]\nmodel_id = \"gpt-4o-mini\"\n").unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.model.temperature, 0.0);
        assert!(config.model.retry.is_none());
        assert_eq!(config.assistant.variant, Variant::Routing);
        assert_eq!(config.assistant.max_tool_cycles, 8);
        assert_eq!(config.assistant.history_window, 12);
        assert_eq!(config.prompts, PromptSet::default());
    }

    #[test]
    fn test_agent_variant_and_cap() {
        let config = AppConfig::from_toml(
            r#"
[model]
model_id = "gpt-4o-mini"

[assistant]
variant = "agent"
max_tool_cycles = 0
"#,
        )
        .unwrap();
        assert_eq!(config.assistant.variant, Variant::Agent);
        assert_eq!(config.assistant.tool_cycle_cap(), 1);
    }

    #[test]
    fn test_load_missing_vs_unreadable() {
        let missing = AppConfig::load(Path::new("/nonexistent/draftsmith.toml"));
        assert!(matches!(missing, Err(DraftsmithError::ConfigNotFound(_))));

        // A directory exists but cannot be read as a file
        let dir = std::env::temp_dir();
        assert!(matches!(AppConfig::load(&dir), Err(DraftsmithError::Io(_))));
    }

    #[test]
    fn test_variant_from_str() {
        assert_eq!("agent".parse::<Variant>().unwrap(), Variant::Agent);
        assert_eq!(" Routing ".parse::<Variant>().unwrap(), Variant::Routing);
        assert!("graph".parse::<Variant>().is_err());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = AppConfig::from_toml("[model\n").unwrap_err();
        assert!(matches!(err, DraftsmithError::Config(_)));
    }
}
