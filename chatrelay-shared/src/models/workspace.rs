use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name given to freshly created threads; only threads still carrying it are auto-renamed.
pub const DEFAULT_THREAD_NAME: &str = "Thread";

/// A chat target bound to one provider/model pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub id: i64,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub chat_provider: Option<String>,
    #[serde(default)]
    pub chat_model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub history_limit: Option<usize>,
}

impl Workspace {
    /// System prompt sent ahead of the history when the workspace defines none.
    #[must_use]
    pub fn effective_system_prompt(&self) -> String {
        self.system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty())
            .map_or_else(
                || format!("Welcome to {}. Chat with confidence!", self.name),
                ToString::to_string,
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thread {
    pub id: i64,
    pub workspace_id: i64,
    pub slug: String,
    pub name: String,
}

impl Thread {
    #[must_use]
    pub fn has_default_name(&self) -> bool {
        self.name == DEFAULT_THREAD_NAME
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub daily_message_limit: Option<u32>,
}
