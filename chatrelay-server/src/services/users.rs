//! Caller resolution and daily chat quotas.

use std::{collections::HashMap, fmt, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use shared::{config::seed::UserSeed, models::User};
use uuid::Uuid;

use super::chat_store::ChatStore;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Map a bearer token to a known user.
    async fn resolve_token(&self, token: &str) -> Result<Option<User>>;

    /// Whether the user may send another chat within the rolling 24 hour window.
    async fn can_send_chat(&self, user: &User) -> Result<bool>;
}

/// Users declared in configuration, with quotas counted against the chat store.
pub struct InMemoryUserDirectory {
    by_token: HashMap<String, User>,
    store: Arc<dyn ChatStore>,
}

impl fmt::Debug for InMemoryUserDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryUserDirectory")
            .field("users", &self.by_token.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryUserDirectory {
    #[must_use]
    pub fn from_seeds(seeds: &[UserSeed], store: Arc<dyn ChatStore>) -> Self {
        let by_token = seeds
            .iter()
            .map(|seed| {
                let user = User {
                    id: Uuid::new_v4(),
                    username: seed.username.clone(),
                    daily_message_limit: seed.daily_message_limit,
                };
                (seed.token.clone(), user)
            })
            .collect();
        Self { by_token, store }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn resolve_token(&self, token: &str) -> Result<Option<User>> {
        Ok(self.by_token.get(token).cloned())
    }

    async fn can_send_chat(&self, user: &User) -> Result<bool> {
        let Some(limit) = user.daily_message_limit else {
            return Ok(true);
        };
        let since = Utc::now() - Duration::hours(24);
        let sent = self.store.count_user_chats_since(user.id, since).await?;
        Ok(sent < u64::from(limit))
    }
}
