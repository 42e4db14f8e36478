//! Conversion of stored chat records into display and prompt histories.
//!
//! Records are validated lazily: a record whose prompt is not a string, whose
//! response is not JSON, or whose response lacks a string `text` is skipped.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::models::chat::{Attachment, ChatRecord, Citation, DisplayMessage, PromptMessage, PromptRole};

const DEFAULT_RESPONSE_TYPE: &str = "chart";

/// Parsed form of the JSON document stored in [`ChatRecord::response`].
#[derive(Debug, Deserialize)]
struct StoredResponse {
    text: String,
    #[serde(default, rename = "type")]
    response_type: Option<Value>,
    #[serde(default)]
    sources: Option<Value>,
    #[serde(default)]
    attachments: Option<Value>,
    #[serde(default)]
    metrics: Option<Value>,
}

impl StoredResponse {
    fn attachments(&self) -> Vec<Attachment> {
        self.attachments
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    /// Sources that are not a list fall back to none.
    fn sources(&self) -> Vec<Citation> {
        match &self.sources {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    fn response_type(&self) -> String {
        self.response_type
            .as_ref()
            .and_then(Value::as_str)
            .filter(|kind| !kind.is_empty())
            .unwrap_or(DEFAULT_RESPONSE_TYPE)
            .to_string()
    }

    fn metrics(&self) -> Value {
        match &self.metrics {
            Some(value) if !value.is_null() => value.clone(),
            _ => Value::Object(Map::new()),
        }
    }
}

fn parse_record(record: &ChatRecord) -> Option<(&str, StoredResponse)> {
    let prompt = record.prompt.as_str()?;
    let response = serde_json::from_str::<StoredResponse>(&record.response).ok()?;
    Some((prompt, response))
}

/// Expand records into alternating user/assistant messages for display.
#[must_use]
pub fn to_display_history(records: &[ChatRecord]) -> Vec<DisplayMessage> {
    let mut history = Vec::with_capacity(records.len() * 2);

    for record in records {
        let Some((prompt, response)) = parse_record(record) else {
            continue;
        };
        let sent_at = record.created_at.timestamp();

        history.push(DisplayMessage {
            role: PromptRole::User,
            content: prompt.to_string(),
            sent_at,
            attachments: Some(response.attachments()),
            chat_id: record.id,
            message_type: None,
            sources: None,
            metrics: None,
            feedback_score: None,
        });
        history.push(DisplayMessage {
            role: PromptRole::Assistant,
            content: response.text.clone(),
            sent_at,
            attachments: None,
            chat_id: record.id,
            message_type: Some(response.response_type()),
            sources: Some(response.sources()),
            metrics: Some(response.metrics()),
            feedback_score: Some(record.feedback_score),
        });
    }

    debug!(
        records = records.len(),
        messages = history.len(),
        "converted chat history for display"
    );
    history
}

/// Expand records into the role/content pairs sent to a provider.
#[must_use]
pub fn to_prompt_history(records: &[ChatRecord]) -> Vec<PromptMessage> {
    let history: Vec<PromptMessage> = records
        .iter()
        .filter_map(parse_record)
        .flat_map(|(prompt, response)| {
            [
                PromptMessage::user(prompt),
                PromptMessage::assistant(response.text),
            ]
        })
        .collect();

    debug!(
        records = records.len(),
        messages = history.len(),
        "converted chat history for prompt"
    );
    history
}
