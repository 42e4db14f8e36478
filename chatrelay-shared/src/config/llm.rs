//! # LLM Configuration
//!
//! This module provides configuration structures for chat providers and for the
//! token accounting applied while relaying their streams.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, env};

/// Configuration for the chat providers available to workspaces
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LLMConfiguration {
    /// Provider used by workspaces that do not name one
    pub default_provider: String,

    /// Provider-specific configurations keyed by provider name
    pub providers: HashMap<String, ProviderConfig>,
}

/// Configuration for one OpenAI-compatible provider endpoint
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Base URL up to and including the API version segment (e.g. `https://api.openai.com/v1`)
    pub base_url: String,

    /// Name of the environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Model used when a workspace does not override it
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

const fn default_timeout_seconds() -> u64 {
    120
}

/// How the reported `completion_tokens` is derived when the upstream reports usage
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionTokenPolicy {
    /// Upstream figure replaces the local count once seen
    #[default]
    PreferUpstream,
    /// Larger of the local count and the upstream figure
    Max,
}

impl Default for LLMConfiguration {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "openai".to_string(),
            ProviderConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key_env: Some("OPENAI_API_KEY".to_string()),
                model: "gpt-4o-mini".to_string(),
                timeout_seconds: default_timeout_seconds(),
            },
        );
        providers.insert(
            "ollama".to_string(),
            ProviderConfig {
                base_url: "http://127.0.0.1:11434/v1".to_string(),
                api_key_env: None,
                model: "llama3.1".to_string(),
                timeout_seconds: default_timeout_seconds(),
            },
        );

        Self {
            default_provider: "openai".to_string(),
            providers,
        }
    }
}

impl LLMConfiguration {
    /// Apply environment variable overrides to existing configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(default_provider) = env::var("CHATRELAY_DEFAULT_PROVIDER") {
            self.default_provider = default_provider;
        }

        if let Ok(base_url) = env::var("CHATRELAY_PROVIDER_BASE_URL")
            && let Some(provider) = self.providers.get_mut(&self.default_provider)
        {
            provider.base_url = base_url;
        }

        if let Ok(model) = env::var("CHATRELAY_PROVIDER_MODEL")
            && let Some(provider) = self.providers.get_mut(&self.default_provider)
        {
            provider.model = model;
        }
    }

    /// Get configuration for a specific provider
    #[must_use]
    pub fn get_provider_config(&self, provider_name: &str) -> Option<&ProviderConfig> {
        self.providers.get(provider_name)
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns every problem found, one message per entry.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.providers.contains_key(&self.default_provider) {
            errors.push(format!(
                "Default provider '{}' not found in providers configuration",
                self.default_provider
            ));
        }

        for (name, provider) in &self.providers {
            if provider.base_url.trim().is_empty() {
                errors.push(format!("Provider '{name}' has an empty base_url"));
            }
            if provider.model.trim().is_empty() {
                errors.push(format!("Provider '{name}' has an empty model"));
            }
            if provider.timeout_seconds == 0 {
                errors.push(format!("Provider '{name}' timeout_seconds must be positive"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
