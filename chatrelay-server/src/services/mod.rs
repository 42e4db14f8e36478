/// Chat relay services and their collaborator seams
pub mod chat_store;
pub mod chunk_writer;
pub mod completion;
pub mod event_log;
pub mod providers;
pub mod stream_relay;
pub mod usage;
pub mod users;

pub use chat_store::{ChatStore, InMemoryChatStore, NewChat};
pub use chunk_writer::{ChannelTransport, FrameStream, RelayTransport};
pub use completion::{CompletionError, CompletionService, CompletionSettings, OpenAiReply};
pub use event_log::EventLog;
pub use providers::ProviderRegistry;
pub use stream_relay::{RelayOutcome, RelayState, StreamRelay};
pub use usage::{MetricsUsageMonitor, UsageMonitor};
pub use users::{InMemoryUserDirectory, UserDirectory};
