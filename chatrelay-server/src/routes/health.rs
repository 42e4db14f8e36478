use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

async fn healthz() -> impl IntoResponse {
    metrics::counter!("health_checks_total", "endpoint" => "healthz", "status" => "ok")
        .increment(1);
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Ready once at least one chat provider is registered.
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.completions.providers().is_empty() {
        metrics::counter!(
            "health_checks_total",
            "endpoint" => "readyz",
            "status" => "error"
        )
        .increment(1);
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "no_providers",
            }),
        )
    } else {
        metrics::counter!(
            "health_checks_total",
            "endpoint" => "readyz",
            "status" => "ok"
        )
        .increment(1);
        (StatusCode::OK, Json(HealthResponse { status: "ready" }))
    }
}

pub fn create_health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
