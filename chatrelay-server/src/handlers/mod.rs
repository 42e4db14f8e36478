pub mod chat;
pub mod openai;

use axum::{
    body::Body,
    http::{HeaderValue, header},
    response::Response,
};

use crate::services::FrameStream;

/// Wrap relay frames in a response carrying the event-stream headers.
pub(crate) fn event_stream_response(frames: FrameStream) -> Response {
    let mut response = Response::new(Body::from_stream(frames));
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}
