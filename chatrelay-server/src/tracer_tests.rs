//! # Tracer Tests
//!
//! Tests for the HTTP tracing hooks used by the server.

#[cfg(test)]
mod tests {
    use super::super::tracer::*;
    use crate::middleware::request_context::RequestContext;
    use axum::body::Body;
    use axum::http::{Method, Request, Response, StatusCode, Version};
    use std::time::Duration;
    use tower_http::{
        classify::ServerErrorsFailureClass,
        trace::{MakeSpan, OnResponse},
    };
    use tracing::{Level, span};
    use tracing_subscriber::util::SubscriberInitExt;

    #[test]
    fn test_create_trace_layer() {
        let trace_layer = create_trace_layer();
        assert!(std::mem::size_of_val(&trace_layer) > 0);
    }

    #[test]
    fn test_on_request_handler_with_stream_chat_request() {
        let _guard = tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .set_default();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/workspace/docs/stream-chat")
            .version(Version::HTTP_11)
            .body(Body::empty())
            .unwrap();

        let span = span!(Level::INFO, "test_span");
        on_request_handler(&request, &span);
    }

    #[test]
    fn test_failure_with_different_status_codes() {
        let _guard = tracing_subscriber::fmt()
            .with_max_level(Level::ERROR)
            .set_default();

        for status_code in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            let error = ServerErrorsFailureClass::StatusCode(status_code);
            let span = span!(Level::ERROR, "test_status_span", status = %status_code);
            on_failure_handler(error, Duration::from_millis(100), &span);
        }
    }

    #[test]
    fn make_span_uses_request_context_id() {
        let _guard = tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .set_default();

        let mut request = Request::builder()
            .uri("/api/v1/openai/models")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(RequestContext {
            request_id: "req-7".into(),
            user: None,
        });

        let span = HttpMakeSpan.make_span(&request);
        assert_eq!(
            span.metadata().map(tracing::Metadata::name),
            Some("http_request")
        );
    }

    #[test]
    fn http_metrics_recorded_for_response() {
        let handle = crate::server::metrics_handle();
        let _subscriber_guard = tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .finish()
            .set_default();

        let request = Request::builder()
            .method(Method::GET)
            .uri("/metrics-test")
            .body(Body::empty())
            .unwrap();

        let span = HttpMakeSpan.make_span(&request);
        let response = Response::builder()
            .status(StatusCode::IM_A_TEAPOT)
            .body(Body::empty())
            .unwrap();

        HttpOnResponse.on_response(&response, Duration::from_millis(10), &span);

        let metrics = handle.render();
        assert!(
            metrics.contains("http_requests_total{status=\"418\"}"),
            "expected counter line for request metrics"
        );
        assert!(
            metrics.contains("http_request_duration_seconds"),
            "expected histogram samples for request duration"
        );
    }
}
