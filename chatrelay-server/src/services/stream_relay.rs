//! Drains a provider token stream onto the client connection.
//!
//! A relay moves through `Started -> Streaming -> {Completed | Aborted | Errored}`.
//! Terminal states are claimed with a compare-and-swap, so exactly one terminal
//! outcome is recorded and at most one `close = true` event is written. Client
//! disconnects are observed inside the same `select!` that pulls the upstream,
//! and the upstream stream is dropped as soon as the relay returns.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use futures::StreamExt;
use metrics::counter;
use serde_json::json;
use shared::{
    config::llm::CompletionTokenPolicy,
    llms::ProviderChunkStream,
    models::{Citation, StreamEvent, UsageSnapshot},
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    chunk_writer::{RelayTransport, write_event},
    event_log::{EventLog, record_event},
    usage::{ResponseMetrics, UsageAccumulator, UsageMonitor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelayState {
    Started = 0,
    Streaming = 1,
    Completed = 2,
    Aborted = 3,
    Errored = 4,
}

impl RelayState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Started,
            1 => Self::Streaming,
            2 => Self::Completed,
            3 => Self::Aborted,
            _ => Self::Errored,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Errored)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Errored => "errored",
        }
    }
}

/// Atomic holder for a [`RelayState`].
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    const fn new() -> Self {
        Self(AtomicU8::new(RelayState::Started as u8))
    }

    fn get(&self) -> RelayState {
        RelayState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn begin_streaming(&self) {
        let _ = self.0.compare_exchange(
            RelayState::Started as u8,
            RelayState::Streaming as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Claim a terminal state. Returns `false` when another terminal state won.
    fn finish(&self, terminal: RelayState) -> bool {
        debug_assert!(terminal.is_terminal());
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if RelayState::from_u8(current).is_terminal() {
                return false;
            }
            match self.0.compare_exchange(
                current,
                terminal as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// What a relay resolved with.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayOutcome {
    /// Concatenation of every content delta written before the relay stopped
    pub text: String,
    pub usage: UsageSnapshot,
    pub metrics: ResponseMetrics,
    pub state: RelayState,
}

#[derive(Clone)]
pub struct StreamRelay {
    event_log: Arc<dyn EventLog>,
    monitor: Arc<dyn UsageMonitor>,
    policy: CompletionTokenPolicy,
}

impl fmt::Debug for StreamRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRelay")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl StreamRelay {
    #[must_use]
    pub fn new(
        event_log: Arc<dyn EventLog>,
        monitor: Arc<dyn UsageMonitor>,
        policy: CompletionTokenPolicy,
    ) -> Self {
        Self {
            event_log,
            monitor,
            policy,
        }
    }

    /// Relay `chunks` to `transport` until the upstream finishes, fails, or the
    /// client goes away. Never returns an error.
    #[instrument(name = "relay", skip_all, fields(stream_id = %stream_id))]
    pub async fn relay<T>(
        &self,
        stream_id: Uuid,
        mut chunks: ProviderChunkStream,
        transport: &T,
        sources: Vec<Citation>,
    ) -> RelayOutcome
    where
        T: RelayTransport + ?Sized,
    {
        let state = StateCell::new();
        let mut usage = UsageAccumulator::new(self.policy);
        let mut text = String::new();

        record_event(
            self.event_log.as_ref(),
            "StreamStart",
            json!({ "uuid": stream_id }),
            None,
        )
        .await;
        counter!("chatrelay_streams_started_total").increment(1);
        state.begin_streaming();

        loop {
            let next = tokio::select! {
                biased;
                () = transport.closed() => {
                    state.finish(RelayState::Aborted);
                    debug!("client disconnected");
                    break;
                }
                next = chunks.next() => next,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) => {
                    warn!(error = %err, kind = err.kind(), "upstream stream failed");
                    if state.finish(RelayState::Errored) {
                        let _ = write_event(transport, &StreamEvent::abort(stream_id, err.to_string()))
                            .await;
                    }
                    break;
                }
                None => {
                    debug!("upstream ended without a finish reason");
                    if state.finish(RelayState::Completed) {
                        let _ = write_event(transport, &StreamEvent::finished(stream_id, sources))
                            .await;
                    }
                    break;
                }
            };

            if let Some(payload) = chunk.usage_payload() {
                usage.observe(payload);
            }

            if let Some(token) = chunk.content_delta() {
                text.push_str(token);
                usage.record_token();
                if write_event(transport, &StreamEvent::text_chunk(stream_id, token))
                    .await
                    .is_err()
                {
                    state.finish(RelayState::Aborted);
                    debug!("write failed, treating as disconnect");
                    break;
                }
            }

            if let Some(reason) = chunk.finish_reason() {
                debug!(finish_reason = reason, "upstream finished");
                if state.finish(RelayState::Completed) {
                    let _ = write_event(transport, &StreamEvent::finished(stream_id, sources)).await;
                }
                break;
            }
        }

        // Release the upstream before any further awaits.
        drop(chunks);

        let final_state = state.get();
        let (usage, metrics) = usage.finalize(self.monitor.as_ref());
        counter!("chatrelay_streams_total", "outcome" => final_state.as_str()).increment(1);

        if final_state == RelayState::Aborted {
            record_event(
                self.event_log.as_ref(),
                "StreamAborted",
                json!({ "uuid": stream_id, "fullText": text }),
                None,
            )
            .await;
        }
        record_event(
            self.event_log.as_ref(),
            "StreamEnd",
            json!({ "uuid": stream_id, "fullText": text, "usage": usage }),
            None,
        )
        .await;

        RelayOutcome {
            text,
            usage,
            metrics,
            state: final_state,
        }
    }
}
