use axum::{http::StatusCode, response::IntoResponse};
use shared::llms::LLMError;
use thiserror::Error;

use super::problem::ProblemDetails;
use crate::services::CompletionError;

pub type AppResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_failed", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "upstream_failed", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let details = self.details;

        let mut problem = ProblemDetails::new(self.status, self.code, self.message);
        if let Some(details) = details {
            problem = problem.with_details(details);
        }

        problem.into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal_server_error(value.to_string())
    }
}

impl From<http::Error> for ApiError {
    fn from(err: http::Error) -> Self {
        Self::internal_server_error(err.to_string())
    }
}

impl From<LLMError> for ApiError {
    fn from(err: LLMError) -> Self {
        let kind = err.kind();
        match err {
            LLMError::UnknownProvider { .. } | LLMError::InvalidConfiguration { .. } => {
                Self::internal_server_error(err.to_string())
            }
            _ => Self::bad_gateway(err.to_string()),
        }
        .with_details(serde_json::json!({ "kind": kind }))
    }
}

impl From<CompletionError> for ApiError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::EmptyMessage => Self::bad_request(err.to_string()),
            CompletionError::WorkspaceNotFound(_) | CompletionError::Unauthorized => {
                Self::unauthorized(err.to_string())
            }
            CompletionError::ThreadNotFound(_) => Self::not_found(err.to_string()),
            // Streaming handlers report quota in-band; this covers non-streaming callers.
            CompletionError::QuotaExceeded { .. } => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, err.kind(), err.to_string())
            }
            CompletionError::Provider(llm) => Self::from(llm),
            CompletionError::Collaborator(inner) => Self::from(inner),
        }
    }
}
