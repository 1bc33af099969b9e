//! YAML settings for the agent, with serde-supplied defaults.
//!
//! Every field has a default so a missing `autodev.yaml` is a valid (if
//! generic) configuration. The API key is the one thing that must come from
//! somewhere: the file itself or the configured environment variable, checked
//! at construction time.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::errors::AgentError;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub agent: AgentSettings,
    pub sessions: SessionSettings,
    pub browser: BrowserSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub api_base: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_base: None,
            temperature: 0.1,
            max_tokens: 4000,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_iterations: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self { max_iterations: 50 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub dir: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            dir: ".autodev_sessions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub binary: String,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            binary: "chromium".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file. A missing file yields the defaults;
    /// an unreadable or malformed file is a configuration error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| AgentError::ConfigError(format!("Cannot read {}: {}", path.display(), e)))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| AgentError::ConfigError(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Resolve the API key from the file or the configured environment
    /// variable. Missing keys fail here, before the loop ever starts.
    pub fn resolve_api_key(&self) -> Result<String, AgentError> {
        if let Some(key) = &self.llm.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.llm.api_key_env).map_err(|_| {
            AgentError::ConfigError(format!(
                "No API key found. Set llm.api_key in the config file or export {}",
                self.llm.api_key_env
            ))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let settings = Settings::load("/no/such/autodev.yaml").unwrap();
        assert_eq!(settings.agent.max_iterations, 50);
        assert_eq!(settings.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(settings.sessions.dir, ".autodev_sessions");
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autodev.yaml");
        std::fs::write(
            &path,
            "llm:\n  model: gpt-4.1\n  temperature: 0.3\nagent:\n  max_iterations: 10\n",
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.llm.model, "gpt-4.1");
        assert_eq!(settings.llm.temperature, 0.3);
        assert_eq!(settings.llm.max_tokens, 4000);
        assert_eq!(settings.agent.max_iterations, 10);
        assert_eq!(settings.browser.binary, "chromium");
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autodev.yaml");
        std::fs::write(&path, "llm: [not a map").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(AgentError::ConfigError(_))
        ));
    }

    #[test]
    fn test_resolve_api_key_prefers_file_value() {
        let settings = Settings {
            llm: LlmSettings {
                api_key: Some("sk-from-file".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(settings.resolve_api_key().unwrap(), "sk-from-file");
    }

    #[test]
    fn test_resolve_api_key_missing_is_error() {
        let settings = Settings {
            llm: LlmSettings {
                api_key_env: "AUTODEV_TEST_KEY_THAT_IS_UNSET".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            settings.resolve_api_key(),
            Err(AgentError::ConfigError(_))
        ));
    }
}
