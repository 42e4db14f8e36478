//! OpenAI-compatible endpoints addressing workspaces by slug.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use shared::models::ChatCompletionRequest;
use tracing::{instrument, warn};

use super::event_stream_response;
use crate::{
    app_state::AppState,
    http::error::ApiError,
    middleware::request_context::RequestContext,
    services::{CompletionError, OpenAiReply},
};

pub async fn list_models(State(state): State<Arc<AppState>>) -> Response {
    match state.completions.list_models().await {
        Ok(models) => Json(models).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to list models");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Failures answer with a bare status, the way OpenAI clients expect them.
#[instrument(skip_all, fields(request_id = %context.request_id, workspace = %request.model))]
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    match state.completions.openai_completion(request, context.user).await {
        Ok(OpenAiReply::Completion(completion)) => Json(completion).into_response(),
        Ok(OpenAiReply::Stream(frames)) => event_stream_response(frames),
        Err(CompletionError::WorkspaceNotFound(_) | CompletionError::Unauthorized) => {
            StatusCode::UNAUTHORIZED.into_response()
        }
        Err(err @ CompletionError::EmptyMessage) => ApiError::from(err).into_response(),
        Err(err) => {
            warn!(error = %err, kind = err.kind(), "chat completion failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
