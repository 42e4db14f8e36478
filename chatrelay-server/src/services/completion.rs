//! Binds inbound chat requests to providers, the relay, and the surrounding
//! collaborators.
//!
//! Validation happens before any stream is opened. Once the client holds an
//! event stream, every failure ends in a wire event instead of an HTTP error,
//! and side effects (persistence, thread naming, telemetry) run only after the
//! relay has reached a terminal state.

use std::{fmt, sync::Arc};

use chrono::Utc;
use metrics::counter;
use serde_json::{Value, json};
use shared::{
    config::server::Config,
    llms::{ChatProvider, ChatRequest, LLMError, to_display_history, to_prompt_history},
    models::{
        Attachment, ChatCompletionChoice, ChatCompletionRequest, ChatCompletionResponse,
        ChatMessage, DisplayMessage, ModelsResponse, PromptMessage, PromptRole, StreamChatRequest,
        StreamEvent, Thread, ThreadRef, UsageBreakdown, User, Workspace, WorkspaceModel,
        WorkspaceModelProvider,
    },
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    chat_store::{ChatStore, NewChat},
    chunk_writer::{ChannelTransport, FrameStream, RelayTransport, write_event},
    event_log::{EventLog, record_event},
    providers::ProviderRegistry,
    stream_relay::{RelayOutcome, StreamRelay},
    users::UserDirectory,
};

/// Characters of the first message kept when auto-naming a thread.
const THREAD_NAME_LENGTH: usize = 22;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Message is empty.")]
    EmptyMessage,

    #[error("Workspace {0} does not exist.")]
    WorkspaceNotFound(String),

    #[error("Thread {0} does not exist.")]
    ThreadNotFound(String),

    #[error("A valid caller is required.")]
    Unauthorized,

    #[error(
        "You have met your maximum 24 hour chat quota of {limit} chats. Try again later."
    )]
    QuotaExceeded { limit: u32 },

    #[error(transparent)]
    Provider(#[from] LLMError),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl CompletionError {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::EmptyMessage => "empty_message",
            Self::WorkspaceNotFound(_) => "workspace_not_found",
            Self::ThreadNotFound(_) => "thread_not_found",
            Self::Unauthorized => "unauthorized",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Provider(_) => "provider",
            Self::Collaborator(_) => "collaborator",
        }
    }
}

/// Tunables taken from [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct CompletionSettings {
    pub history_limit: usize,
    pub multi_user_mode: bool,
    pub stream_buffer: usize,
}

impl CompletionSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            history_limit: config.chat.history_limit,
            multi_user_mode: config.features.multi_user_mode,
            stream_buffer: config.chat.stream_buffer,
        }
    }
}

/// Workspace, and optionally thread, a request is addressed to.
#[derive(Debug, Clone)]
pub struct ChatTarget {
    pub workspace: Workspace,
    pub thread: Option<Thread>,
}

/// Reply of the OpenAI-compatible endpoint.
#[derive(Debug)]
pub enum OpenAiReply {
    Completion(ChatCompletionResponse),
    Stream(FrameStream),
}

/// Everything a streamed workspace chat needs once headers are out.
struct WorkspaceChat {
    stream_id: Uuid,
    target: ChatTarget,
    user: Option<User>,
    message: String,
    attachments: Vec<Attachment>,
}

/// OpenAI-style messages split into the parts handed to a provider.
#[derive(Debug, Clone, PartialEq)]
struct SplitMessages {
    prompt: String,
    system_prompt: Option<String>,
    history: Vec<PromptMessage>,
}

pub struct CompletionService {
    store: Arc<dyn ChatStore>,
    users: Arc<dyn UserDirectory>,
    providers: ProviderRegistry,
    event_log: Arc<dyn EventLog>,
    relay: StreamRelay,
    settings: CompletionSettings,
}

impl fmt::Debug for CompletionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionService")
            .field("providers", &self.providers)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CompletionService {
    #[must_use]
    pub fn new(
        store: Arc<dyn ChatStore>,
        users: Arc<dyn UserDirectory>,
        providers: ProviderRegistry,
        event_log: Arc<dyn EventLog>,
        relay: StreamRelay,
        settings: CompletionSettings,
    ) -> Self {
        Self {
            store,
            users,
            providers,
            event_log,
            relay,
            settings,
        }
    }

    #[must_use]
    pub const fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Look up the workspace and, when given, the thread a request targets.
    ///
    /// # Errors
    /// [`CompletionError::WorkspaceNotFound`] or [`CompletionError::ThreadNotFound`].
    pub async fn resolve_target(
        &self,
        workspace_slug: &str,
        thread_slug: Option<&str>,
    ) -> Result<ChatTarget, CompletionError> {
        let workspace = self
            .store
            .workspace_by_slug(workspace_slug)
            .await?
            .ok_or_else(|| CompletionError::WorkspaceNotFound(workspace_slug.to_string()))?;

        let thread = match thread_slug {
            Some(slug) => Some(
                self.store
                    .thread_by_slug(workspace.id, slug)
                    .await?
                    .ok_or_else(|| CompletionError::ThreadNotFound(slug.to_string()))?,
            ),
            None => None,
        };

        Ok(ChatTarget { workspace, thread })
    }

    /// Chats are scoped per caller only in multi-user mode.
    fn history_owner(&self, user: Option<&User>) -> Option<Uuid> {
        if self.settings.multi_user_mode {
            user.map(|user| user.id)
        } else {
            None
        }
    }

    /// Full display history of a workspace or thread.
    ///
    /// # Errors
    /// Target resolution or store failures.
    pub async fn chat_history(
        &self,
        workspace_slug: &str,
        thread_slug: Option<&str>,
        user: Option<&User>,
    ) -> Result<Vec<DisplayMessage>, CompletionError> {
        let target = self.resolve_target(workspace_slug, thread_slug).await?;
        let records = self
            .store
            .recent_chats(
                target.workspace.id,
                target.thread.as_ref().map(|thread| thread.id),
                self.history_owner(user),
                usize::MAX,
            )
            .await?;
        Ok(to_display_history(&records))
    }

    /// Validate a workspace chat and start relaying it.
    ///
    /// The returned stream is the response body; the relay runs on its own task
    /// and ends the body when it drops the transport.
    ///
    /// # Errors
    /// [`CompletionError::EmptyMessage`] and target resolution failures. Nothing
    /// is streamed in those cases.
    #[instrument(skip(self, user, request), fields(workspace = %workspace_slug))]
    pub async fn stream_workspace_chat(
        self: &Arc<Self>,
        workspace_slug: &str,
        thread_slug: Option<&str>,
        user: Option<User>,
        request: StreamChatRequest,
    ) -> Result<FrameStream, CompletionError> {
        let message = request
            .message
            .filter(|message| !message.is_empty())
            .ok_or(CompletionError::EmptyMessage)?;
        if self.settings.multi_user_mode && user.is_none() {
            return Err(CompletionError::Unauthorized);
        }
        let target = self.resolve_target(workspace_slug, thread_slug).await?;

        let (transport, body) = ChannelTransport::channel(self.settings.stream_buffer);
        let chat = WorkspaceChat {
            stream_id: Uuid::new_v4(),
            target,
            user,
            message,
            attachments: request.attachments,
        };

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.run_workspace_chat(transport, chat).await;
        });

        Ok(body)
    }

    async fn run_workspace_chat(&self, transport: ChannelTransport, chat: WorkspaceChat) {
        match self.relay_workspace_chat(&transport, &chat).await {
            Ok(Some(outcome)) => self.after_workspace_chat(&transport, &chat, &outcome).await,
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "workspace chat failed before relaying");
                let _ = write_event(&transport, &StreamEvent::abort(chat.stream_id, err.to_string()))
                    .await;
                record_event(
                    self.event_log.as_ref(),
                    "error",
                    json!({
                        "errorMessage": err.to_string(),
                        "input": { "message": chat.message, "attachments": chat.attachments },
                    }),
                    None,
                )
                .await;
            }
        }
    }

    /// Everything up to and including the relay. `Ok(None)` means the request
    /// was answered with an abort event and nothing was relayed.
    async fn relay_workspace_chat(
        &self,
        transport: &ChannelTransport,
        chat: &WorkspaceChat,
    ) -> Result<Option<RelayOutcome>, CompletionError> {
        if self.settings.multi_user_mode
            && let Some(user) = chat.user.as_ref()
            && !self.users.can_send_chat(user).await?
        {
            let quota = CompletionError::QuotaExceeded {
                limit: user.daily_message_limit.unwrap_or_default(),
            };
            info!(user = %user.username, "chat quota exhausted");
            counter!("chatrelay_quota_rejections_total").increment(1);
            let _ = write_event(transport, &StreamEvent::abort(chat.stream_id, quota.to_string()))
                .await;
            return Ok(None);
        }

        let workspace = &chat.target.workspace;
        let limit = workspace
            .history_limit
            .unwrap_or(self.settings.history_limit);
        let records = self
            .store
            .recent_chats(
                workspace.id,
                chat.target.thread.as_ref().map(|thread| thread.id),
                self.history_owner(chat.user.as_ref()),
                limit,
            )
            .await?;

        let request = ChatRequest::new(chat.message.clone())
            .with_system_prompt(workspace.effective_system_prompt())
            .with_history(to_prompt_history(&records))
            .with_temperature(workspace.temperature)
            .with_model(workspace.chat_model.clone());

        let provider = self.providers.resolve(workspace)?;
        debug!(provider = provider.name(), history = request.history.len(), "opening provider stream");
        let chunks = provider.stream_chat(request).await?;

        Ok(Some(
            self.relay
                .relay(chat.stream_id, chunks, transport, Vec::new())
                .await,
        ))
    }

    /// Side effects once the relay is terminal. Failures here are only logged:
    /// the client already received its terminal event.
    async fn after_workspace_chat(
        &self,
        transport: &ChannelTransport,
        chat: &WorkspaceChat,
        outcome: &RelayOutcome,
    ) {
        let workspace = &chat.target.workspace;

        if !outcome.text.is_empty() {
            let saved = self
                .store
                .save_chat(NewChat {
                    workspace_id: workspace.id,
                    thread_id: chat.target.thread.as_ref().map(|thread| thread.id),
                    user_id: chat.user.as_ref().map(|user| user.id),
                    prompt: chat.message.clone(),
                    response: json!({
                        "text": outcome.text,
                        "sources": [],
                        "type": "chat",
                        "attachments": chat.attachments,
                        "metrics": outcome.metrics,
                    }),
                })
                .await;
            if let Err(err) = saved {
                self.report_side_effect_failure("save_chat", &err).await;
            }
        }

        let mut thread_name = chat.target.thread.as_ref().map(|thread| thread.name.clone());
        if let Some(thread) = chat.target.thread.as_ref().filter(|t| t.has_default_name()) {
            match self
                .store
                .rename_thread(thread.id, &thread_name_from(&chat.message))
                .await
            {
                Ok(renamed) => {
                    thread_name = Some(renamed.name.clone());
                    if !transport.is_closed() {
                        let _ = write_event(
                            transport,
                            &StreamEvent::rename_thread(
                                chat.stream_id,
                                ThreadRef {
                                    slug: renamed.slug,
                                    name: renamed.name,
                                },
                            ),
                        )
                        .await;
                    }
                }
                Err(err) => self.report_side_effect_failure("rename_thread", &err).await,
            }
        }

        let (provider, _) = self.providers.describe(workspace);
        let mut details = json!({
            "workspaceName": workspace.name,
            "chatModel": workspace.chat_model.as_deref().unwrap_or("System Default"),
            "input": { "message": chat.message, "attachments": chat.attachments },
            "output": "Chat sent successfully.",
            "systemPrompt": workspace.effective_system_prompt(),
            "multiUserMode": self.settings.multi_user_mode,
            "LLMSelection": provider,
            "multiModal": !chat.attachments.is_empty(),
        });
        if let Some(name) = thread_name {
            details["thread"] = Value::String(name);
        }
        record_event(
            self.event_log.as_ref(),
            "sent_chat",
            details,
            chat.user.as_ref().map(|user| user.id),
        )
        .await;
    }

    async fn report_side_effect_failure(&self, operation: &str, err: &anyhow::Error) {
        warn!(operation, error = %err, "post-stream side effect failed");
        record_event(
            self.event_log.as_ref(),
            "error",
            json!({ "errorMessage": err.to_string(), "operation": operation }),
            None,
        )
        .await;
    }

    /// One entry per workspace with the provider and model it chats with.
    ///
    /// # Errors
    /// Store failures.
    pub async fn list_models(&self) -> Result<ModelsResponse, CompletionError> {
        let workspaces = match self.store.list_workspaces().await {
            Ok(workspaces) => workspaces,
            Err(err) => {
                record_event(
                    self.event_log.as_ref(),
                    "api_get_models_error",
                    json!({ "request": {}, "error": err.to_string() }),
                    None,
                )
                .await;
                return Err(err.into());
            }
        };

        let data: Vec<WorkspaceModel> = workspaces
            .iter()
            .map(|workspace| {
                let (provider, model) = self.providers.describe(workspace);
                WorkspaceModel {
                    name: workspace.name.clone(),
                    model: workspace.slug.clone(),
                    llm: WorkspaceModelProvider { provider, model },
                }
            })
            .collect();

        record_event(
            self.event_log.as_ref(),
            "api_get_models",
            json!({ "request": {}, "response": { "data": data } }),
            None,
        )
        .await;
        Ok(ModelsResponse { data })
    }

    /// OpenAI-compatible chat completion addressed to a workspace by slug.
    ///
    /// # Errors
    /// [`CompletionError::WorkspaceNotFound`], [`CompletionError::EmptyMessage`],
    /// and provider failures in non-streaming mode.
    #[instrument(skip_all, fields(workspace = %request.model, stream = request.stream.unwrap_or(false)))]
    pub async fn openai_completion(
        self: &Arc<Self>,
        request: ChatCompletionRequest,
        user: Option<User>,
    ) -> Result<OpenAiReply, CompletionError> {
        let actor = user.as_ref().map(|user| user.id);
        let log = self.event_log.as_ref();
        let stream = request.stream.unwrap_or(false);

        record_event(
            log,
            "frontend_request",
            json!({
                "timestamp": Utc::now().to_rfc3339(),
                "endpoint": "/v1/openai/chat/completions",
                "requestBody": request,
            }),
            actor,
        )
        .await;

        let Some(workspace) = self.store.workspace_by_slug(&request.model).await? else {
            record_event(
                log,
                "workspace_error",
                json!({ "error": "Invalid workspace", "requestedModel": request.model }),
                actor,
            )
            .await;
            return Err(CompletionError::WorkspaceNotFound(request.model));
        };

        let (provider_name, model) = self.providers.describe(&workspace);
        record_event(
            log,
            "llm_config",
            json!({ "provider": provider_name, "model": model, "workspace": workspace.name }),
            actor,
        )
        .await;

        let split = split_messages(request.messages.clone())?;
        record_event(
            log,
            "llm_request",
            json!({
                "timestamp": Utc::now().to_rfc3339(),
                "provider": provider_name,
                "model": model,
                "request": {
                    "systemPrompt": split.system_prompt,
                    "history": split.history,
                    "userMessage": split.prompt,
                    "temperature": request.temperature,
                },
            }),
            actor,
        )
        .await;

        let chat_request = ChatRequest::new(split.prompt.clone())
            .with_system_prompt(
                split
                    .system_prompt
                    .clone()
                    .unwrap_or_else(|| workspace.effective_system_prompt()),
            )
            .with_history(split.history.clone())
            .with_temperature(request.temperature.or(workspace.temperature))
            .with_model(workspace.chat_model.clone());

        let provider = match self.providers.resolve(&workspace) {
            Ok(provider) => provider,
            Err(err) => {
                self.log_openai_error(&err, &request, actor).await;
                return Err(err.into());
            }
        };

        if stream {
            let (transport, body) = ChannelTransport::channel(self.settings.stream_buffer);
            let service = Arc::clone(self);
            tokio::spawn(async move {
                service
                    .run_openai_stream(transport, workspace, request, split, chat_request, provider, user)
                    .await;
            });
            return Ok(OpenAiReply::Stream(body));
        }

        let completion = match provider.chat_sync(chat_request).await {
            Ok(completion) => completion,
            Err(err) => {
                self.log_openai_error(&err, &request, actor).await;
                return Err(err.into());
            }
        };

        record_event(
            log,
            "llm_response",
            json!({
                "timestamp": Utc::now().to_rfc3339(),
                "provider": provider_name,
                "model": model,
                "response": completion,
                "tokensUsed": completion.usage.as_ref().map_or(Value::from("N/A"), |usage| json!(usage)),
            }),
            actor,
        )
        .await;
        record_event(
            log,
            "frontend_response",
            json!({
                "timestamp": Utc::now().to_rfc3339(),
                "type": "sync",
                "response": {
                    "workspaceName": workspace.name,
                    "chatModel": workspace.chat_model,
                    "input": { "message": split.prompt, "attachments": [] },
                    "output": completion.text,
                    "systemPrompt": split.system_prompt,
                    "history": split.history,
                },
            }),
            actor,
        )
        .await;

        if !completion.text.is_empty() {
            let saved = self
                .store
                .save_chat(NewChat {
                    workspace_id: workspace.id,
                    thread_id: None,
                    user_id: actor,
                    prompt: split.prompt.clone(),
                    response: json!({
                        "text": completion.text,
                        "sources": [],
                        "type": "chat",
                        "attachments": [],
                        "metrics": {},
                    }),
                })
                .await;
            if let Err(err) = saved {
                self.report_side_effect_failure("save_chat", &err).await;
            }
        }

        let usage = completion.usage.as_ref().map(|usage| {
            let prompt_tokens = usage.prompt_tokens.unwrap_or_default();
            let completion_tokens = usage.completion_tokens.unwrap_or_default();
            UsageBreakdown {
                prompt_tokens,
                completion_tokens,
                total_tokens: usage
                    .total_tokens
                    .unwrap_or(prompt_tokens + completion_tokens),
            }
        });

        Ok(OpenAiReply::Completion(ChatCompletionResponse {
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            object: "chat.completion".to_string(),
            created: Utc::now().timestamp(),
            model: workspace.slug,
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatMessage {
                    role: PromptRole::Assistant.as_str().to_string(),
                    content: completion.text,
                },
                finish_reason: completion.finish_reason.or_else(|| Some("stop".to_string())),
            }],
            usage,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_openai_stream(
        &self,
        transport: ChannelTransport,
        workspace: Workspace,
        request: ChatCompletionRequest,
        split: SplitMessages,
        chat_request: ChatRequest,
        provider: Arc<dyn ChatProvider>,
        user: Option<User>,
    ) {
        let actor = user.as_ref().map(|user| user.id);
        let log = self.event_log.as_ref();
        let stream_id = Uuid::new_v4();
        let started_at = Utc::now();
        let (provider_name, model) = self.providers.describe(&workspace);

        record_event(
            log,
            "stream_start",
            json!({
                "timestamp": started_at.to_rfc3339(),
                "provider": provider_name,
                "model": model,
            }),
            actor,
        )
        .await;

        let chunks = match provider.stream_chat(chat_request).await {
            Ok(chunks) => chunks,
            Err(err) => {
                let _ = write_event(&transport, &StreamEvent::abort(stream_id, err.to_string())).await;
                self.log_openai_error(&err, &request, actor).await;
                return;
            }
        };

        let outcome = self.relay.relay(stream_id, chunks, &transport, Vec::new()).await;

        record_event(
            log,
            "stream_complete",
            json!({
                "timestamp": Utc::now().to_rfc3339(),
                "streamStartTime": started_at.to_rfc3339(),
                "provider": provider_name,
                "model": model,
                "finalResponse": outcome.text,
                "history": split.history,
            }),
            actor,
        )
        .await;

        if !outcome.text.is_empty() {
            let saved = self
                .store
                .save_chat(NewChat {
                    workspace_id: workspace.id,
                    thread_id: None,
                    user_id: actor,
                    prompt: split.prompt,
                    response: json!({
                        "text": outcome.text,
                        "sources": [],
                        "type": "chat",
                        "attachments": [],
                        "metrics": outcome.metrics,
                    }),
                })
                .await;
            if let Err(err) = saved {
                self.report_side_effect_failure("save_chat", &err).await;
            }
        }
    }

    async fn log_openai_error(
        &self,
        err: &LLMError,
        request: &ChatCompletionRequest,
        actor: Option<Uuid>,
    ) {
        warn!(error = %err, kind = err.kind(), "completion request failed");
        record_event(
            self.event_log.as_ref(),
            "error",
            json!({
                "timestamp": Utc::now().to_rfc3339(),
                "error": { "message": err.to_string(), "kind": err.kind(), "request": request },
            }),
            actor,
        )
        .await;
    }
}

/// Last message is the prompt, the first system message the system prompt, and
/// every other non-system message the history.
fn split_messages(mut messages: Vec<ChatMessage>) -> Result<SplitMessages, CompletionError> {
    let prompt = messages
        .pop()
        .map(|message| message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(CompletionError::EmptyMessage)?;

    let system_prompt = messages
        .iter()
        .find(|message| message.role == "system")
        .map(|message| message.content.clone());

    let history = messages
        .into_iter()
        .filter(|message| message.role != "system")
        .map(|message| {
            let role = if message.role == "assistant" {
                PromptRole::Assistant
            } else {
                PromptRole::User
            };
            PromptMessage::new(role, message.content)
        })
        .collect();

    Ok(SplitMessages {
        prompt,
        system_prompt,
        history,
    })
}

/// First characters of a message, marked with an ellipsis when cut.
fn thread_name_from(message: &str) -> String {
    let mut chars = message.chars();
    let head: String = chars.by_ref().take(THREAD_NAME_LENGTH).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
