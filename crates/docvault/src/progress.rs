//! Pipeline progress reporting.
//!
//! Every processing-step row the pipeline commits is also pushed to a
//! [`ProgressReporter`]. CLI reporters write to **stderr** so stdout remains
//! parseable for scripts; [`ChannelProgress`] fans events out to per-owner
//! `tokio::sync::broadcast` channels for in-process subscribers, and
//! [`relay`] drains one owner's channel into another reporter. `dv upload`
//! and `dv retry` report through the hub this way.

use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use docvault_core::models::{ProcessingStep, StepName, StepStatus};

const CHANNEL_CAPACITY: usize = 256;

/// One progress update, mirroring a committed [`ProcessingStep`].
#[derive(Clone, Debug, Serialize)]
pub struct ProgressEvent {
    /// Routing key for per-user channels; not part of the wire shape.
    #[serde(skip)]
    pub owner_id: String,
    pub document_id: String,
    pub step: StepName,
    pub status: StepStatus,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: i64,
}

impl ProgressEvent {
    pub fn from_step(owner_id: &str, step: &ProcessingStep) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            document_id: step.document_id.clone(),
            step: step.step,
            status: step.status,
            progress: step.progress,
            message: step.message.clone(),
            error_message: step.error_message.clone(),
            timestamp: step.timestamp,
        }
    }
}

/// Receives progress events. Called from pipeline tasks.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Human-friendly progress on stderr: `3f2a…  extract        running   30%  extracting pdf`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &ProgressEvent) {
        let short_id: String = event.document_id.chars().take(8).collect();
        let mut line = format!(
            "{}  {:<14} {:<9} {:>3}%  {}",
            short_id,
            event.step.as_str(),
            event.status.as_str(),
            event.progress,
            event.message
        );
        if let Some(err) = &event.error_message {
            line.push_str(&format!(" ({})", err));
        }
        line.push('\n');
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &ProgressEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Per-owner broadcast hub.
///
/// Events for owners with no subscriber are dropped. Slow subscribers see
/// `RecvError::Lagged` rather than blocking the pipeline.
#[derive(Default)]
pub struct ChannelProgress {
    channels: Mutex<HashMap<String, broadcast::Sender<ProgressEvent>>>,
}

impl ChannelProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every future event for documents owned by `owner_id`.
    pub fn subscribe(&self, owner_id: &str) -> broadcast::Receiver<ProgressEvent> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(owner_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl ProgressReporter for ChannelProgress {
    fn report(&self, event: &ProgressEvent) {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(tx) = channels.get(&event.owner_id) {
            if tx.send(event.clone()).is_err() {
                // Every receiver is gone.
                channels.remove(&event.owner_id);
            }
        }
    }
}

/// Forward `owner_id`'s events from `hub` to `sink`.
///
/// The task ends once every handle to the hub has been dropped.
pub fn relay(
    hub: &ChannelProgress,
    owner_id: &str,
    sink: Box<dyn ProgressReporter>,
) -> JoinHandle<()> {
    let mut rx = hub.subscribe(owner_id);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => sink.report(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress relay fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
