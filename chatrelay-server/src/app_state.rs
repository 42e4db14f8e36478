use std::{fmt, sync::Arc};

use anyhow::Result;
use shared::config::server::Config;

use crate::services::{
    ChatStore, CompletionService, CompletionSettings, EventLog, InMemoryChatStore,
    InMemoryUserDirectory, MetricsUsageMonitor, ProviderRegistry, StreamRelay, UsageMonitor,
    UserDirectory, event_log,
};

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ChatStore>,
    pub users: Arc<dyn UserDirectory>,
    pub event_log: Arc<dyn EventLog>,
    pub completions: Arc<CompletionService>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("profile", &self.config.profile)
            .field("completions", &self.completions)
            .finish_non_exhaustive()
    }
}

impl AppState {
    #[must_use]
    pub fn builder(config: Config) -> AppStateBuilder {
        AppStateBuilder {
            config,
            store: None,
            users: None,
            providers: None,
            event_log: None,
            usage_monitor: None,
        }
    }
}

/// Wires collaborators together, defaulting to the in-memory and configured ones.
pub struct AppStateBuilder {
    config: Config,
    store: Option<Arc<dyn ChatStore>>,
    users: Option<Arc<dyn UserDirectory>>,
    providers: Option<ProviderRegistry>,
    event_log: Option<Arc<dyn EventLog>>,
    usage_monitor: Option<Arc<dyn UsageMonitor>>,
}

impl fmt::Debug for AppStateBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppStateBuilder")
            .field("profile", &self.config.profile)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

impl AppStateBuilder {
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ChatStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_users(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = Some(users);
        self
    }

    #[must_use]
    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = Some(providers);
        self
    }

    #[must_use]
    pub fn with_event_log(mut self, event_log: Arc<dyn EventLog>) -> Self {
        self.event_log = Some(event_log);
        self
    }

    #[must_use]
    pub fn with_usage_monitor(mut self, monitor: Arc<dyn UsageMonitor>) -> Self {
        self.usage_monitor = Some(monitor);
        self
    }

    /// # Errors
    /// Fails when a provider adapter cannot be built or the event log file cannot be opened.
    pub async fn build(self) -> Result<AppState> {
        let config = self.config;

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryChatStore::from_seeds(&config.workspaces)),
        };
        let users = match self.users {
            Some(users) => users,
            None => Arc::new(InMemoryUserDirectory::from_seeds(
                &config.users,
                Arc::clone(&store),
            )),
        };
        let providers = match self.providers {
            Some(providers) => providers,
            None => ProviderRegistry::from_config(&config.llm)?,
        };
        let event_log = match self.event_log {
            Some(event_log) => event_log,
            None => event_log::from_config(config.logging.event_log_path.as_deref()).await?,
        };
        let monitor = self
            .usage_monitor
            .unwrap_or_else(|| Arc::new(MetricsUsageMonitor));

        let relay = StreamRelay::new(
            Arc::clone(&event_log),
            monitor,
            config.chat.completion_token_policy,
        );
        let completions = CompletionService::new(
            Arc::clone(&store),
            Arc::clone(&users),
            providers,
            Arc::clone(&event_log),
            relay,
            CompletionSettings::from_config(&config),
        );

        Ok(AppState {
            config: Arc::new(config),
            store,
            users,
            event_log,
            completions: Arc::new(completions),
        })
    }
}
