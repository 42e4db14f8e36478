//! Workspace and thread chat endpoints.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use shared::models::{ChatHistoryResponse, StreamChatRequest, StreamEvent};
use tracing::instrument;
use uuid::Uuid;

use super::event_stream_response;
use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
    services::{CompletionError, FrameStream},
};

fn stream_or_reject(result: Result<FrameStream, CompletionError>) -> Response {
    match result {
        Ok(frames) => event_stream_response(frames),
        // Clients parse this body with the same decoder as stream events.
        Err(err @ CompletionError::EmptyMessage) => (
            StatusCode::BAD_REQUEST,
            Json(StreamEvent::abort(Uuid::new_v4(), err.to_string())),
        )
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[instrument(skip(state, context, request), fields(request_id = %context.request_id))]
pub async fn stream_chat(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(workspace_slug): Path<String>,
    Json(request): Json<StreamChatRequest>,
) -> Response {
    let result = state
        .completions
        .stream_workspace_chat(&workspace_slug, None, context.user, request)
        .await;
    stream_or_reject(result)
}

#[instrument(skip(state, context, request), fields(request_id = %context.request_id))]
pub async fn stream_chat_thread(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path((workspace_slug, thread_slug)): Path<(String, String)>,
    Json(request): Json<StreamChatRequest>,
) -> Response {
    let result = state
        .completions
        .stream_workspace_chat(&workspace_slug, Some(&thread_slug), context.user, request)
        .await;
    stream_or_reject(result)
}

pub async fn chat_history(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(workspace_slug): Path<String>,
) -> AppResult<Json<ChatHistoryResponse>> {
    let history = state
        .completions
        .chat_history(&workspace_slug, None, context.user.as_ref())
        .await?;
    Ok(Json(ChatHistoryResponse { history }))
}

pub async fn thread_chat_history(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path((workspace_slug, thread_slug)): Path<(String, String)>,
) -> AppResult<Json<ChatHistoryResponse>> {
    let history = state
        .completions
        .chat_history(&workspace_slug, Some(&thread_slug), context.user.as_ref())
        .await?;
    Ok(Json(ChatHistoryResponse { history }))
}
