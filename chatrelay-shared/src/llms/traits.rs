//! # LLM Traits
//!
//! The provider contract consumed by the chat relay. Adapters expose a token
//! stream and a normalized one-shot completion; nothing else about the backing
//! SDK leaks past this boundary.

use crate::llms::{
    errors::LLMResult,
    types::{ChatRequest, Completion, ProviderChunk},
};
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

/// Type alias for a provider token stream
pub type ProviderChunkStream = Pin<Box<dyn Stream<Item = LLMResult<ProviderChunk>> + Send + 'static>>;

/// Main trait for chat providers
///
/// Implementations must yield chunks in upstream order and stop producing work
/// once the returned stream is dropped.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider identifier as used in workspace configuration (e.g. `openai`)
    fn name(&self) -> &str;

    /// Model used when the request does not name one
    fn model(&self) -> &str;

    /// Open a token stream for the request
    ///
    /// # Errors
    /// Returns an error if the stream cannot be opened. Failures after the
    /// stream is open are reported as stream items.
    async fn stream_chat(&self, request: ChatRequest) -> LLMResult<ProviderChunkStream>;

    /// Run the request to completion and normalize the response
    ///
    /// # Errors
    /// Returns an error if the provider call fails or the body cannot be
    /// normalized into a [`Completion`].
    async fn chat_sync(&self, request: ChatRequest) -> LLMResult<Completion>;
}
