use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use shared::{config::llm::CompletionTokenPolicy, llms::UsagePayload, models::UsageSnapshot};

/// Derived figures stored alongside a persisted reply.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(rename = "outputTps")]
    pub output_tps: f64,
    /// Seconds
    pub duration: f64,
}

impl ResponseMetrics {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_usage(usage: &UsageSnapshot, elapsed: Duration) -> Self {
        let duration = elapsed.as_secs_f64();
        let output_tps = if duration > 0.0 {
            usage.completion_tokens as f64 / duration
        } else {
            0.0
        };
        Self {
            prompt_tokens: usage.prompt_tokens.unwrap_or_default(),
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens(),
            output_tps,
            duration,
        }
    }
}

/// Receives the final usage of every stream.
pub trait UsageMonitor: Send + Sync {
    fn end_measurement(&self, usage: &UsageSnapshot, elapsed: Duration) -> ResponseMetrics;
}

/// Publishes token usage through the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsUsageMonitor;

impl UsageMonitor for MetricsUsageMonitor {
    #[allow(clippy::cast_precision_loss)]
    fn end_measurement(&self, usage: &UsageSnapshot, elapsed: Duration) -> ResponseMetrics {
        let metrics = ResponseMetrics::from_usage(usage, elapsed);
        counter!("chatrelay_completion_tokens_total").increment(metrics.completion_tokens);
        counter!("chatrelay_prompt_tokens_total").increment(metrics.prompt_tokens);
        histogram!("chatrelay_stream_duration_seconds").record(metrics.duration);
        histogram!("chatrelay_output_tokens_per_second").record(metrics.output_tps);
        metrics
    }
}

/// Token accounting for a single stream.
///
/// Local counting fills in for providers that never report usage. Once the
/// upstream reports `completion_tokens`, the policy decides how the two combine.
#[derive(Debug)]
pub struct UsageAccumulator {
    policy: CompletionTokenPolicy,
    prompt_tokens: Option<u64>,
    upstream_completion: Option<u64>,
    local_completion: u64,
    started_at: Instant,
}

impl UsageAccumulator {
    #[must_use]
    pub fn new(policy: CompletionTokenPolicy) -> Self {
        Self {
            policy,
            prompt_tokens: None,
            upstream_completion: None,
            local_completion: 0,
            started_at: Instant::now(),
        }
    }

    pub fn observe(&mut self, payload: &UsagePayload) {
        if let Some(prompt) = payload.prompt_tokens {
            self.prompt_tokens = Some(prompt);
        }
        if let Some(completion) = payload.completion_tokens {
            self.upstream_completion = Some(completion);
        }
    }

    pub fn record_token(&mut self) {
        self.local_completion = self.local_completion.saturating_add(1);
    }

    #[must_use]
    pub const fn upstream_reported(&self) -> bool {
        self.upstream_completion.is_some()
    }

    #[must_use]
    pub fn snapshot(&self) -> UsageSnapshot {
        let completion_tokens = match (self.policy, self.upstream_completion) {
            (_, None) => self.local_completion,
            (CompletionTokenPolicy::PreferUpstream, Some(upstream)) => upstream,
            (CompletionTokenPolicy::Max, Some(upstream)) => upstream.max(self.local_completion),
        };
        UsageSnapshot {
            prompt_tokens: self.prompt_tokens,
            completion_tokens,
        }
    }

    /// Close the measurement and hand the result to the monitor.
    pub fn finalize(self, monitor: &dyn UsageMonitor) -> (UsageSnapshot, ResponseMetrics) {
        let usage = self.snapshot();
        let metrics = monitor.end_measurement(&usage, self.started_at.elapsed());
        (usage, metrics)
    }
}
