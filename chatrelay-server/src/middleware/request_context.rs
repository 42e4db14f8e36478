use std::{str::FromStr, sync::Arc};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, header},
    middleware::Next,
    response::Response,
};
use shared::{config::server::Config, models::User};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
};

#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub user: Option<User>,
}

#[derive(Clone, Debug)]
pub struct RequestIdState {
    header: HeaderName,
}

impl RequestIdState {
    pub fn from_config(config: &Config) -> Self {
        let header = HeaderName::from_str(&config.server.request_id_header)
            .unwrap_or_else(|_| HeaderName::from_static("x-request-id"));
        Self { header }
    }
}

pub async fn assign_request_id(
    State(state): State<RequestIdState>,
    mut request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let header_name = state.header.clone();
    let current = extract_request_id(request.headers(), &header_name);

    let request_id = current.unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
        user: None,
    });

    request.headers_mut().insert(
        header_name.clone(),
        HeaderValue::from_str(&request_id)
            .map_err(|_| ApiError::internal_server_error("failed to encode request id"))?,
    );

    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header_name,
        HeaderValue::from_str(&request_id)
            .map_err(|_| ApiError::internal_server_error("failed to encode request id"))?,
    );

    Ok(response)
}

/// Attach the caller behind `Authorization: Bearer <token>` to the request context.
///
/// In multi-user mode an unresolved caller is rejected with `401`.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn resolve_caller(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let user = match bearer_token(request.headers()) {
        Some(token) => state.users.resolve_token(token).await?,
        None => None,
    };

    if state.config.features.multi_user_mode && user.is_none() {
        return Err(ApiError::unauthorized("a valid bearer token is required"));
    }
    debug!(user = ?user.as_ref().map(|user| &user.username), "caller resolved");

    if let Some(context) = request.extensions_mut().get_mut::<RequestContext>() {
        context.user = user;
    } else {
        request.extensions_mut().insert(RequestContext {
            request_id: String::new(),
            user,
        });
    }

    Ok(next.run(request).await)
}

fn extract_request_id(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
