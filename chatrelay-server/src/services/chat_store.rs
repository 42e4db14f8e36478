use std::fmt;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::{
    config::seed::WorkspaceSeed,
    models::{ChatRecord, DEFAULT_THREAD_NAME, Thread, Workspace},
};
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

/// An exchange to persist once a reply has been produced.
#[derive(Debug, Clone)]
pub struct NewChat {
    pub workspace_id: i64,
    pub thread_id: Option<i64>,
    pub user_id: Option<Uuid>,
    pub prompt: String,
    /// Serialized into [`ChatRecord::response`]
    pub response: Value,
}

/// Persistence of workspaces, threads and chat exchanges.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn workspace_by_slug(&self, slug: &str) -> Result<Option<Workspace>>;

    async fn list_workspaces(&self) -> Result<Vec<Workspace>>;

    async fn thread_by_slug(&self, workspace_id: i64, slug: &str) -> Result<Option<Thread>>;

    /// The most recent `limit` exchanges of a workspace (or one of its threads),
    /// returned oldest first. `thread_id = None` selects chats outside any thread.
    async fn recent_chats(
        &self,
        workspace_id: i64,
        thread_id: Option<i64>,
        user_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ChatRecord>>;

    async fn save_chat(&self, chat: NewChat) -> Result<ChatRecord>;

    async fn rename_thread(&self, thread_id: i64, name: &str) -> Result<Thread>;

    async fn count_user_chats_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<u64>;
}

#[derive(Default)]
struct StoreInner {
    workspaces: Vec<Workspace>,
    threads: Vec<Thread>,
    chats: Vec<ChatRecord>,
    next_chat_id: i64,
}

/// Process-local [`ChatStore`] seeded from configuration.
#[derive(Default)]
pub struct InMemoryChatStore {
    inner: RwLock<StoreInner>,
}

impl fmt::Debug for InMemoryChatStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryChatStore").finish_non_exhaustive()
    }
}

impl InMemoryChatStore {
    #[must_use]
    pub fn from_seeds(seeds: &[WorkspaceSeed]) -> Self {
        let mut inner = StoreInner {
            next_chat_id: 1,
            ..StoreInner::default()
        };
        let mut next_thread_id = 1;

        for (index, seed) in seeds.iter().enumerate() {
            let workspace_id = i64::try_from(index).unwrap_or(i64::MAX - 1) + 1;
            inner.workspaces.push(Workspace {
                id: workspace_id,
                slug: seed.slug.clone(),
                name: seed.name.clone(),
                chat_provider: seed.chat_provider.clone(),
                chat_model: seed.chat_model.clone(),
                system_prompt: seed.system_prompt.clone(),
                temperature: seed.temperature,
                history_limit: seed.history_limit,
            });
            for thread in &seed.threads {
                inner.threads.push(Thread {
                    id: next_thread_id,
                    workspace_id,
                    slug: thread.slug.clone(),
                    name: thread
                        .name
                        .clone()
                        .unwrap_or_else(|| DEFAULT_THREAD_NAME.to_string()),
                });
                next_thread_id += 1;
            }
        }

        Self {
            inner: RwLock::new(inner),
        }
    }

    pub async fn chat_count(&self) -> usize {
        self.inner.read().await.chats.len()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn workspace_by_slug(&self, slug: &str) -> Result<Option<Workspace>> {
        let inner = self.inner.read().await;
        Ok(inner.workspaces.iter().find(|w| w.slug == slug).cloned())
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        Ok(self.inner.read().await.workspaces.clone())
    }

    async fn thread_by_slug(&self, workspace_id: i64, slug: &str) -> Result<Option<Thread>> {
        let inner = self.inner.read().await;
        Ok(inner
            .threads
            .iter()
            .find(|t| t.workspace_id == workspace_id && t.slug == slug)
            .cloned())
    }

    async fn recent_chats(
        &self,
        workspace_id: i64,
        thread_id: Option<i64>,
        user_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ChatRecord>> {
        let inner = self.inner.read().await;
        let matching: Vec<&ChatRecord> = inner
            .chats
            .iter()
            .filter(|chat| chat.workspace_id == workspace_id && chat.thread_id == thread_id)
            .filter(|chat| user_id.is_none() || chat.user_id == user_id)
            .collect();

        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }

    #[instrument(name = "store.save_chat", skip(self, chat), fields(workspace_id = chat.workspace_id))]
    async fn save_chat(&self, chat: NewChat) -> Result<ChatRecord> {
        let response = serde_json::to_string(&chat.response)?;
        let mut inner = self.inner.write().await;
        let record = ChatRecord {
            id: inner.next_chat_id,
            workspace_id: chat.workspace_id,
            thread_id: chat.thread_id,
            user_id: chat.user_id,
            prompt: Value::String(chat.prompt),
            response,
            created_at: Utc::now(),
            feedback_score: None,
        };
        inner.next_chat_id += 1;
        inner.chats.push(record.clone());
        Ok(record)
    }

    async fn rename_thread(&self, thread_id: i64, name: &str) -> Result<Thread> {
        let mut inner = self.inner.write().await;
        let thread = inner
            .threads
            .iter_mut()
            .find(|t| t.id == thread_id)
            .ok_or_else(|| anyhow!("thread {thread_id} does not exist"))?;
        thread.name = name.to_string();
        Ok(thread.clone())
    }

    async fn count_user_chats_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<u64> {
        let inner = self.inner.read().await;
        let count = inner
            .chats
            .iter()
            .filter(|chat| chat.user_id == Some(user_id) && chat.created_at >= since)
            .count();
        Ok(u64::try_from(count)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn store() -> InMemoryChatStore {
        InMemoryChatStore::from_seeds(&[
            WorkspaceSeed::new("docs", "Docs").with_thread("intro"),
            WorkspaceSeed::new("ops", "Ops"),
        ])
    }

    fn chat(workspace_id: i64, thread_id: Option<i64>, prompt: &str) -> NewChat {
        NewChat {
            workspace_id,
            thread_id,
            user_id: None,
            prompt: prompt.into(),
            response: json!({ "text": format!("re: {prompt}") }),
        }
    }

    #[tokio::test]
    async fn seeds_workspaces_and_default_named_threads() {
        let store = store();
        let docs = store.workspace_by_slug("docs").await.unwrap().unwrap();
        assert_eq!(docs.id, 1);
        assert_eq!(store.list_workspaces().await.unwrap().len(), 2);

        let thread = store.thread_by_slug(docs.id, "intro").await.unwrap().unwrap();
        assert!(thread.has_default_name());
        assert!(store.thread_by_slug(2, "intro").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_chats_returns_last_n_oldest_first_per_scope() {
        let store = store();
        for i in 0..5 {
            store.save_chat(chat(1, None, &format!("m{i}"))).await.unwrap();
        }
        store.save_chat(chat(1, Some(1), "in thread")).await.unwrap();

        let recent = store.recent_chats(1, None, None, 3).await.unwrap();
        let prompts: Vec<&str> = recent.iter().filter_map(|c| c.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["m2", "m3", "m4"]);

        let threaded = store.recent_chats(1, Some(1), None, 20).await.unwrap();
        assert_eq!(threaded.len(), 1);
        assert_eq!(threaded[0].response, r#"{"text":"re: in thread"}"#);
    }

    #[tokio::test]
    async fn rename_thread_updates_name() {
        let store = store();
        let renamed = store.rename_thread(1, "Hello").await.unwrap();
        assert_eq!(renamed.name, "Hello");
        assert!(store.rename_thread(99, "x").await.is_err());
    }

    #[tokio::test]
    async fn counts_user_chats_inside_window() {
        let store = store();
        let user = Uuid::new_v4();
        let mut mine = chat(1, None, "a");
        mine.user_id = Some(user);
        store.save_chat(mine.clone()).await.unwrap();
        store.save_chat(mine).await.unwrap();
        store.save_chat(chat(1, None, "someone else")).await.unwrap();

        let since = Utc::now() - Duration::hours(24);
        assert_eq!(store.count_user_chats_since(user, since).await.unwrap(), 2);
        let future = Utc::now() + Duration::hours(1);
        assert_eq!(store.count_user_chats_since(user, future).await.unwrap(), 0);
    }
}
