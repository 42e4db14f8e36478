use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Source document cited by an assistant reply. Providers and retrievers attach
/// arbitrary metadata, so citations are carried through untouched.
pub type Citation = Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    User,
    Assistant,
    System,
}

impl PromptRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl TryFrom<&str> for PromptRole {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            _ => Err("invalid prompt role"),
        }
    }
}

/// File attached by the user alongside a prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub content_string: String,
}

/// One persisted prompt/response turn.
///
/// `prompt` stays a raw JSON value and `response` a serialized JSON document;
/// both are validated lazily by the history formatter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRecord {
    pub id: i64,
    pub workspace_id: i64,
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub prompt: Value,
    pub response: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub feedback_score: Option<f64>,
}

/// Human-facing rendering of one side of a [`ChatRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMessage {
    pub role: PromptRole,
    pub content: String,
    pub sent_at: i64,
    /// Always present on user messages, empty included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    pub chat_id: i64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Citation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_score: Option<Option<f64>>,
}

/// Minimal message handed to a provider prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(PromptRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(PromptRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(PromptRole::System, content)
    }
}

/// Body of the workspace and thread `stream-chat` endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistoryResponse {
    pub history: Vec<DisplayMessage>,
}
