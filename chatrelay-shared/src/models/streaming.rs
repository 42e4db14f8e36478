use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chat::Citation;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StreamEventType {
    TextResponseChunk,
    Abort,
    Action,
}

/// Thread identity carried by `rename_thread` action events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadRef {
    pub slug: String,
    pub name: String,
}

/// One wire unit of the streaming chat protocol.
///
/// `close = true` marks the terminal event of the stream identified by `id`.
/// `error` serializes as `false` when absent and as the message otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    pub text_response: Option<String>,
    #[serde(default)]
    pub sources: Vec<Citation>,
    pub close: bool,
    #[serde(with = "error_flag", default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadRef>,
}

impl StreamEvent {
    pub const RENAME_THREAD: &'static str = "rename_thread";

    #[must_use]
    pub fn text_chunk(id: Uuid, token: impl Into<String>) -> Self {
        Self {
            id,
            event_type: StreamEventType::TextResponseChunk,
            text_response: Some(token.into()),
            sources: Vec::new(),
            close: false,
            error: None,
            action: None,
            thread: None,
        }
    }

    /// Terminal event of a stream that finished normally.
    #[must_use]
    pub fn finished(id: Uuid, sources: Vec<Citation>) -> Self {
        Self {
            id,
            event_type: StreamEventType::TextResponseChunk,
            text_response: Some(String::new()),
            sources,
            close: true,
            error: None,
            action: None,
            thread: None,
        }
    }

    #[must_use]
    pub fn abort(id: Uuid, message: impl Into<String>) -> Self {
        Self {
            id,
            event_type: StreamEventType::Abort,
            text_response: None,
            sources: Vec::new(),
            close: true,
            error: Some(message.into()),
            action: None,
            thread: None,
        }
    }

    #[must_use]
    pub fn rename_thread(id: Uuid, thread: ThreadRef) -> Self {
        Self {
            id,
            event_type: StreamEventType::Action,
            text_response: None,
            sources: Vec::new(),
            close: false,
            error: None,
            action: Some(Self::RENAME_THREAD.to_string()),
            thread: Some(thread),
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.close
    }
}

/// Token usage gathered over the lifetime of one stream.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: u64,
}

impl UsageSnapshot {
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.unwrap_or_default() + self.completion_tokens
    }
}

mod error_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Message(String),
        Bool(bool),
    }

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(message) => serializer.serialize_str(message),
            None => serializer.serialize_bool(false),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Flag>::deserialize(deserializer)? {
            Some(Flag::Message(message)) => Ok(Some(message)),
            Some(Flag::Bool(_)) | None => Ok(None),
        }
    }
}
