//! Workspaces, threads and users loaded into the in-memory stores at startup.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkspaceSeed {
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
    #[serde(default)]
    pub threads: Vec<ThreadSeed>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ThreadSeed {
    pub slug: String,
    /// Defaults to the placeholder name, which makes the thread eligible for auto-naming
    #[serde(default)]
    pub name: Option<String>,
}

/// A user able to authenticate with a static bearer token.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserSeed {
    pub username: String,
    pub token: String,
    #[serde(default)]
    pub daily_message_limit: Option<u32>,
}

impl WorkspaceSeed {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            chat_provider: None,
            chat_model: None,
            system_prompt: None,
            temperature: None,
            history_limit: None,
            threads: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_thread(mut self, slug: impl Into<String>) -> Self {
        self.threads.push(ThreadSeed {
            slug: slug.into(),
            name: None,
        });
        self
    }
}
