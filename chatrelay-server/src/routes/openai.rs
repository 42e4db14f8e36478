//! Routes for OpenAI-compatible endpoints.

use crate::{
    app_state::AppState,
    handlers::openai::{chat_completions, list_models},
};
use axum::{Router, routing::get, routing::post};
use std::sync::Arc;

/// Configures the OpenAI-compatible API routes.
///
/// # Returns
/// A [`Router`](axum::Router) with the models and chat completion routes.
pub fn create_openai_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/openai/models", get(list_models))
        .route("/v1/openai/chat/completions", post(chat_completions))
}
