use std::{collections::HashMap, fmt, sync::Arc};

use shared::{
    config::llm::LLMConfiguration,
    llms::{ChatProvider, LLMError, LLMResult, OpenAiCompatibleProvider},
    models::Workspace,
};
use tracing::info;

/// Named chat providers plus the fallback used by workspaces that name none.
#[derive(Clone)]
pub struct ProviderRegistry {
    default_provider: String,
    providers: HashMap<String, Arc<dyn ChatProvider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ProviderRegistry")
            .field("default_provider", &self.default_provider)
            .field("providers", &names)
            .finish()
    }
}

impl ProviderRegistry {
    #[must_use]
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            default_provider: default_provider.into(),
            providers: HashMap::new(),
        }
    }

    /// Build an OpenAI-compatible adapter for every configured provider.
    ///
    /// # Errors
    /// Returns the first adapter construction failure.
    pub fn from_config(config: &LLMConfiguration) -> LLMResult<Self> {
        let mut registry = Self::new(config.default_provider.clone());
        for (name, provider_config) in &config.providers {
            let provider = OpenAiCompatibleProvider::from_config(name.clone(), provider_config)?;
            info!(provider = %name, model = %provider_config.model, "registered chat provider");
            registry.providers.insert(name.clone(), Arc::new(provider));
        }
        Ok(registry)
    }

    #[must_use]
    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn ChatProvider>) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    fn provider_name<'a>(&'a self, workspace: &'a Workspace) -> &'a str {
        workspace
            .chat_provider
            .as_deref()
            .unwrap_or(&self.default_provider)
    }

    /// Adapter serving the given workspace.
    ///
    /// # Errors
    /// Returns [`LLMError::UnknownProvider`] when no adapter is registered under the name.
    pub fn resolve(&self, workspace: &Workspace) -> LLMResult<Arc<dyn ChatProvider>> {
        let name = self.provider_name(workspace);
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| LLMError::UnknownProvider {
                name: name.to_string(),
            })
    }

    /// Provider name and model a workspace chats with, for listings and telemetry.
    #[must_use]
    pub fn describe(&self, workspace: &Workspace) -> (String, String) {
        let name = self.provider_name(workspace).to_string();
        let model = workspace.chat_model.clone().unwrap_or_else(|| {
            self.providers
                .get(&name)
                .map(|provider| provider.model().to_string())
                .unwrap_or_default()
        });
        (name, model)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
