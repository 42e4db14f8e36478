//! Routes for workspace and thread chats.

use crate::{
    app_state::AppState,
    handlers::chat::{chat_history, stream_chat, stream_chat_thread, thread_chat_history},
};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

/// Configures the workspace chat routes.
///
/// # Returns
/// A [`Router`](axum::Router) with the streaming chat and history routes.
pub fn create_chat_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/workspace/{slug}/stream-chat", post(stream_chat))
        .route(
            "/workspace/{slug}/thread/{thread_slug}/stream-chat",
            post(stream_chat_thread),
        )
        .route("/workspace/{slug}/chats", get(chat_history))
        .route(
            "/workspace/{slug}/thread/{thread_slug}/chats",
            get(thread_chat_history),
        )
}
