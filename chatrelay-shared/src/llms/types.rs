//! # LLM Type Definitions
//!
//! Canonical shapes exchanged with provider adapters. Streaming chunks keep the
//! chat-completion delta layout; optional fields stay optional so that providers
//! omitting usage or finish reasons are represented faithfully.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::llms::errors::{LLMError, LLMResult};
use crate::models::chat::PromptMessage;

/// Arguments for one provider call, shared by the sync and streaming paths
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    /// Provider model override; adapters fall back to their configured model
    pub model: Option<String>,

    /// System prompt placed ahead of the history
    pub system_prompt: Option<String>,

    /// Prior turns, oldest first
    pub history: Vec<PromptMessage>,

    /// The new user message
    pub prompt: String,

    /// Sampling temperature override
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// Create a request for a bare prompt
    pub fn new<T: Into<String>>(prompt: T) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Set the system prompt
    #[must_use]
    pub fn with_system_prompt<T: Into<String>>(mut self, system_prompt: T) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Set the prior conversation turns
    #[must_use]
    pub fn with_history(mut self, history: Vec<PromptMessage>) -> Self {
        self.history = history;
        self
    }

    /// Set the temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the provider model
    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Flatten into the ordered message list sent to chat-style providers
    #[must_use]
    pub fn messages(&self) -> Vec<PromptMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if let Some(system) = self.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            messages.push(PromptMessage::system(system));
        }
        messages.extend(self.history.iter().cloned());
        messages.push(PromptMessage::user(self.prompt.clone()));
        messages
    }
}

/// Token counters reported by a provider, any of which may be missing
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsagePayload {
    #[serde(default, deserialize_with = "lenient_count")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub completion_tokens: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_tokens: Option<u64>,
}

impl UsagePayload {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none()
            && self.completion_tokens.is_none()
            && self.total_tokens.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One item produced by a provider token stream
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<UsagePayload>,
}

impl ProviderChunk {
    /// Chunk carrying a single content delta
    pub fn content<T: Into<String>>(token: T) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    role: None,
                    content: Some(token.into()),
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// Chunk carrying only a finish reason
    pub fn finish<T: Into<String>>(reason: T) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: ChunkDelta::default(),
                finish_reason: Some(reason.into()),
            }],
            usage: None,
        }
    }

    /// Usage-only chunk, as emitted by providers that report counts at the end
    #[must_use]
    pub fn usage(prompt_tokens: Option<u64>, completion_tokens: Option<u64>) -> Self {
        Self {
            choices: Vec::new(),
            usage: Some(UsagePayload {
                prompt_tokens,
                completion_tokens,
                total_tokens: None,
            }),
        }
    }

    /// Attach a usage payload to an existing chunk
    #[must_use]
    pub fn with_usage(mut self, usage: UsagePayload) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Non-empty content delta of the first choice
    #[must_use]
    pub fn content_delta(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
            .filter(|token| !token.is_empty())
    }

    /// Terminal reason of the first choice; empty strings are not terminal
    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.finish_reason.as_deref())
            .filter(|reason| !reason.is_empty())
    }

    /// Usage payload when it carries at least one counter
    #[must_use]
    pub fn usage_payload(&self) -> Option<&UsagePayload> {
        self.usage.as_ref().filter(|usage| !usage.is_empty())
    }
}

/// Canonical non-streaming completion, produced once at the adapter boundary
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: Option<UsagePayload>,
}

impl Completion {
    /// Normalize a provider response body.
    ///
    /// Accepts a chat-completion envelope (`choices[0].message.content`) or a
    /// body exposing the text directly under `text`.
    ///
    /// # Errors
    /// Returns [`LLMError::InvalidResponse`] when neither shape is present.
    pub fn from_provider_value(value: &Value) -> LLMResult<Self> {
        let choice = value.get("choices").and_then(|choices| choices.get(0));

        let text = choice
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .or_else(|| value.get("text").and_then(Value::as_str))
            .ok_or_else(|| {
                LLMError::invalid_response("expected choices[0].message.content or text")
            })?;

        let finish_reason = choice
            .and_then(|choice| choice.get("finish_reason"))
            .and_then(Value::as_str)
            .filter(|reason| !reason.is_empty())
            .map(ToString::to_string);

        let usage = value
            .get("usage")
            .and_then(|usage| serde_json::from_value::<UsagePayload>(usage.clone()).ok())
            .filter(|usage| !usage.is_empty());

        Ok(Self {
            text: text.to_string(),
            finish_reason,
            usage,
        })
    }
}

/// Accept token counts encoded either as numbers or as numeric strings.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
        _ => None,
    })
}
