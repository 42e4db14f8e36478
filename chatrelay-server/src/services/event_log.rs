//! Telemetry event sinks.
//!
//! Event logging never affects the request outcome: [`record_event`] swallows
//! sink failures after reporting them on the diagnostic channel.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{info, warn};
use uuid::Uuid;

#[async_trait]
pub trait EventLog: Send + Sync {
    async fn log_event(&self, name: &str, details: Value, actor_id: Option<Uuid>) -> Result<()>;
}

/// Log an event, reporting but otherwise ignoring sink failures.
pub async fn record_event(log: &dyn EventLog, name: &str, details: Value, actor_id: Option<Uuid>) {
    if let Err(err) = log.log_event(name, details, actor_id).await {
        metrics::counter!("chatrelay_event_log_failures_total").increment(1);
        warn!(event = name, error = %err, "failed to record event");
    }
}

/// Mirrors events onto the `tracing` pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

#[async_trait]
impl EventLog for TracingEventLog {
    async fn log_event(&self, name: &str, details: Value, actor_id: Option<Uuid>) -> Result<()> {
        info!(
            target: "chatrelay::events",
            event = name,
            actor_id = ?actor_id,
            details = %details,
            "event"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    timestamp: String,
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    actor_id: Option<Uuid>,
    details: Value,
}

/// Appends one JSON document per line to a file.
#[derive(Debug, Clone)]
pub struct FileEventLog {
    file: Arc<Mutex<File>>,
    path: PathBuf,
}

impl FileEventLog {
    /// Open (or create) the log file in append mode.
    ///
    /// # Errors
    /// Returns an error if the parent directory or the file cannot be created.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating event log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening event log file {}", path.display()))?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventLog for FileEventLog {
    async fn log_event(&self, name: &str, details: Value, actor_id: Option<Uuid>) -> Result<()> {
        let record = EventRecord {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event: name,
            actor_id,
            details,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        // One write per record keeps lines whole under concurrent writers.
        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .with_context(|| format!("writing event log {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }
}

/// Fans each event out to several sinks.
#[derive(Clone, Default)]
pub struct CompositeEventLog {
    sinks: Vec<Arc<dyn EventLog>>,
}

impl std::fmt::Debug for CompositeEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeEventLog")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl CompositeEventLog {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn EventLog>>) -> Self {
        Self { sinks }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventLog>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl EventLog for CompositeEventLog {
    /// Every sink is attempted; the first failure is returned afterwards.
    async fn log_event(&self, name: &str, details: Value, actor_id: Option<Uuid>) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(err) = sink.log_event(name, details.clone(), actor_id).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Build the configured sink: tracing always, plus a JSON-lines file when a path is set.
///
/// # Errors
/// Returns an error if the event log file cannot be opened.
pub async fn from_config(event_log_path: Option<&Path>) -> Result<Arc<dyn EventLog>> {
    let mut composite = CompositeEventLog::default().with_sink(Arc::new(TracingEventLog));
    if let Some(path) = event_log_path {
        composite = composite.with_sink(Arc::new(FileEventLog::open(path).await?));
    }
    Ok(Arc::new(composite))
}
