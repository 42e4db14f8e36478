pub mod chat;
pub mod openai;
pub mod streaming;
pub mod workspace;

pub use chat::{
    Attachment, ChatHistoryResponse, ChatRecord, Citation, DisplayMessage, PromptMessage,
    PromptRole, StreamChatRequest,
};
pub use openai::{
    ChatCompletionChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
    ModelsResponse, UsageBreakdown, WorkspaceModel, WorkspaceModelProvider,
};
pub use streaming::{StreamEvent, StreamEventType, ThreadRef, UsageSnapshot};
pub use workspace::{DEFAULT_THREAD_NAME, Thread, User, Workspace};
