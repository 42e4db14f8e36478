//! # LLM Integration Module
//!
//! A uniform interface over chat-completion backends. Providers expose a
//! pull-based stream of [`ProviderChunk`]s and a normalized [`Completion`];
//! the relay on the server side consumes nothing else.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use shared::config::llm::ProviderConfig;
//! use shared::llms::{ChatProvider, ChatRequest, OpenAiCompatibleProvider};
//!
//! let provider = OpenAiCompatibleProvider::from_config("openai", &provider_config)?;
//! let mut stream = provider.stream_chat(ChatRequest::new("Hello, world!")).await?;
//! while let Some(chunk) = stream.next().await {
//!     print!("{}", chunk?.content_delta().unwrap_or_default());
//! }
//! ```

pub mod context;
pub mod errors;
pub mod openai_compat;
pub mod traits;
pub mod types;

// Re-export the main public APIs
pub use context::{to_display_history, to_prompt_history};
pub use errors::{LLMError, LLMResult};
pub use openai_compat::OpenAiCompatibleProvider;
pub use traits::{ChatProvider, ProviderChunkStream};
pub use types::{ChatRequest, ChunkChoice, ChunkDelta, Completion, ProviderChunk, UsagePayload};
