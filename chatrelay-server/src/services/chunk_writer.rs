//! Framing of [`StreamEvent`]s onto the client connection.
//!
//! Every event becomes exactly one `data: <JSON>\n\n` frame. Writes are awaited
//! one at a time, so the order of calls is the order on the wire.

use std::convert::Infallible;

use async_trait::async_trait;
use bytes::Bytes;
use shared::models::StreamEvent;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Error)]
pub enum ChunkWriteError {
    #[error("client transport closed")]
    Closed,

    #[error("failed to encode stream event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outbound side of one streaming HTTP response.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Hand a frame to the connection, waiting until it has been accepted.
    async fn send_frame(&self, frame: Bytes) -> Result<(), ChunkWriteError>;

    /// Resolves once the client has gone away.
    async fn closed(&self);

    fn is_closed(&self) -> bool;
}

/// Encode an event as a single server-sent-events frame.
pub fn encode_frame(event: &StreamEvent) -> Result<Bytes, ChunkWriteError> {
    let json = serde_json::to_string(event)?;
    Ok(Bytes::from(format!("data: {json}\n\n")))
}

/// Write one event to the transport.
pub async fn write_event<T>(transport: &T, event: &StreamEvent) -> Result<(), ChunkWriteError>
where
    T: RelayTransport + ?Sized,
{
    let frame = encode_frame(event)?;
    transport.send_frame(frame).await
}

pub type FrameStream = ReceiverStream<Result<Bytes, Infallible>>;

/// Transport backed by a bounded channel whose receiving half is the response body.
///
/// When the HTTP layer drops the body (client disconnect) the channel closes and
/// [`RelayTransport::closed`] resolves. Dropping every `ChannelTransport` ends the body.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::Sender<Result<Bytes, Infallible>>,
}

impl ChannelTransport {
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, FrameStream) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, ReceiverStream::new(receiver))
    }
}

#[async_trait]
impl RelayTransport for ChannelTransport {
    async fn send_frame(&self, frame: Bytes) -> Result<(), ChunkWriteError> {
        self.sender
            .send(Ok(frame))
            .await
            .map_err(|_| ChunkWriteError::Closed)
    }

    async fn closed(&self) {
        self.sender.closed().await;
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
