//! Adapter for providers speaking the OpenAI chat-completions HTTP dialect.
//!
//! Covers OpenAI itself as well as the many local and hosted servers that mirror
//! its `/chat/completions` endpoint (Ollama, LM Studio, vLLM, LocalAI, ...).

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::llm::ProviderConfig;
use crate::llms::{
    errors::{LLMError, LLMResult},
    traits::{ChatProvider, ProviderChunkStream},
    types::{ChatRequest, Completion, ProviderChunk},
};

const DONE_SENTINEL: &str = "[DONE]";

/// HTTP chat provider for OpenAI-compatible endpoints
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatibleProvider {
    /// Build an adapter from its configuration entry.
    ///
    /// The API key, when configured, is read from the environment variable named
    /// by `api_key_env`.
    ///
    /// # Errors
    /// Returns [`LLMError::InvalidConfiguration`] when the base URL or model is
    /// empty, or when the HTTP client cannot be built.
    pub fn from_config(name: impl Into<String>, config: &ProviderConfig) -> LLMResult<Self> {
        let name = name.into();
        if config.base_url.trim().is_empty() {
            return Err(LLMError::invalid_config(
                format!("llm.providers.{name}.base_url"),
                "must not be empty",
            ));
        }
        if config.model.trim().is_empty() {
            return Err(LLMError::invalid_config(
                format!("llm.providers.{name}.model"),
                "must not be empty",
            ));
        }

        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|err| LLMError::invalid_config("http_client", err.to_string()))?;

        Ok(Self {
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            name,
            client,
            api_key,
            model: config.model.clone(),
        })
    }

    fn body(&self, request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages()
            .into_iter()
            .map(|message| json!({ "role": message.role.as_str(), "content": message.content }))
            .collect();

        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "stream": stream,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    async fn send(&self, body: &Value) -> LLMResult<reqwest::Response> {
        let mut builder = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LLMError::Provider {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, request: ChatRequest) -> LLMResult<ProviderChunkStream> {
        let body = self.body(&request, true);
        debug!(provider = %self.name, endpoint = %self.endpoint, "opening provider stream");
        let response = self.send(&body).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = SseLineBuffer::default();
            'read: while let Some(next) = bytes.next().await {
                let chunk: Bytes = match next {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(LLMError::stream(err.to_string()));
                        break 'read;
                    }
                };
                for data in buffer.push(&chunk) {
                    match parse_data_line(&data) {
                        SseData::Done => break 'read,
                        SseData::Chunk(chunk) => yield Ok(chunk),
                        SseData::Malformed(err) => {
                            warn!(error = %err, "skipping malformed provider chunk");
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn chat_sync(&self, request: ChatRequest) -> LLMResult<Completion> {
        let body = self.body(&request, false);
        let response = self.send(&body).await?;
        let value: Value = response.json().await?;
        Completion::from_provider_value(&value)
    }
}

/// Splits a byte stream into the payloads of `data:` lines.
///
/// Bytes are held until a full line arrives, so a character split across
/// network chunks is decoded whole.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = match String::from_utf8(raw) {
                Ok(line) => line,
                Err(err) => {
                    warn!(error = %err, "skipping non UTF-8 provider line");
                    continue;
                }
            };
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}

#[derive(Debug)]
enum SseData {
    Chunk(ProviderChunk),
    Done,
    Malformed(serde_json::Error),
}

fn parse_data_line(data: &str) -> SseData {
    if data == DONE_SENTINEL {
        return SseData::Done;
    }
    match serde_json::from_str::<ProviderChunk>(data) {
        Ok(chunk) => SseData::Chunk(chunk),
        Err(err) => SseData::Malformed(err),
    }
}
