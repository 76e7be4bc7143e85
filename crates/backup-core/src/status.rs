//! Status events and the sinks that receive them.
//!
//! The orchestrator is the only producer. Sinks never push back: delivery
//! errors are reported to the caller, which drops the event and moves on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::StatusSinkError;
use crate::io;
use crate::orchestrator::RunState;

// ---------------------------------------------------------------------------
// FailureReason
// ---------------------------------------------------------------------------

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    /// The backup command could not be started.
    LaunchError { message: String },
    /// The backup command exited with a nonzero code.
    ExitCode { code: i32 },
    /// The backup command was killed by a signal.
    Signal,
    /// The process could no longer be observed.
    Lost { message: String },
    /// The run exceeded the configured maximum duration.
    TimedOut { after_secs: u64 },
    /// The agent shut down while the run was in flight.
    Cancelled,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::LaunchError { .. } => "launch_error",
            FailureReason::ExitCode { .. } => "exit_code",
            FailureReason::Signal => "signal",
            FailureReason::Lost { .. } => "lost",
            FailureReason::TimedOut { .. } => "timed_out",
            FailureReason::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::LaunchError { message } => write!(f, "could not start: {message}"),
            FailureReason::ExitCode { code } => write!(f, "exited with code {code}"),
            FailureReason::Signal => f.write_str("terminated by signal"),
            FailureReason::Lost { message } => write!(f, "process lost: {message}"),
            FailureReason::TimedOut { after_secs } => {
                write!(f, "timed out after {}", humanize_duration(Duration::from_secs(*after_secs)))
            }
            FailureReason::Cancelled => f.write_str("cancelled on shutdown"),
        }
    }
}

// ---------------------------------------------------------------------------
// StatusEvent
// ---------------------------------------------------------------------------

/// One reported state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub state: RunState,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// Wall-clock length of the run, set on terminal run results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

impl StatusEvent {
    pub fn new(state: RunState, timestamp: DateTime<Utc>) -> Self {
        Self {
            state,
            timestamp,
            reason: None,
            run_id: None,
            duration_secs: None,
        }
    }

    pub fn with_reason(mut self, reason: FailureReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_secs = Some(duration.as_secs());
        self
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let took = self
            .duration_secs
            .map(|s| format!(", took {}", humanize_duration(Duration::from_secs(s))))
            .unwrap_or_default();
        match (&self.state, &self.reason) {
            (RunState::Failed, Some(reason)) => format!("backup failed: {reason}{took}"),
            (RunState::Succeeded, _) => format!("backup succeeded{took}"),
            (RunState::Running, _) => "backing up your files".to_string(),
            (RunState::SkippedPreconditionNotMet, _) => "preconditions not met".to_string(),
            (state, _) => state.as_str().to_string(),
        }
    }
}

/// Render a duration the way a person would say it: `1 hour 5 minutes`.
pub fn humanize_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let parts = [
        (secs / 86_400, "day"),
        (secs % 86_400 / 3600, "hour"),
        (secs % 3600 / 60, "minute"),
    ];
    let words: Vec<String> = parts
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{n} {unit}{}", if *n > 1 { "s" } else { "" }))
        .collect();
    if words.is_empty() {
        "less than a minute".to_string()
    } else {
        words.join(" ")
    }
}

// ---------------------------------------------------------------------------
// StatusSink
// ---------------------------------------------------------------------------

/// Receives status events. Implementations must return promptly.
pub trait StatusSink {
    fn emit(&self, event: &StatusEvent) -> Result<(), StatusSinkError>;

    /// The latest event is unchanged but still current as of
    /// `event.timestamp`. Only sinks that keep the latest event care.
    fn refresh(&self, event: &StatusEvent) -> Result<(), StatusSinkError> {
        let _ = event;
        Ok(())
    }
}

/// Writes every event as a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn emit(&self, event: &StatusEvent) -> Result<(), StatusSinkError> {
        let run = event.run_id.map(|id| id.to_string()).unwrap_or_default();
        match event.state {
            RunState::Failed => warn!(run = %run, reason = event.reason.as_ref().map(|r| r.code()), "{}", event.summary()),
            _ => info!(run = %run, state = event.state.as_str(), "{}", event.summary()),
        }
        Ok(())
    }
}

/// Forwards events into a bounded channel without waiting.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<StatusEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving end for a presentation subscriber.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StatusEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelSink {
    fn emit(&self, event: &StatusEvent) -> Result<(), StatusSinkError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => StatusSinkError::Full,
            mpsc::error::TrySendError::Closed(_) => StatusSinkError::Closed,
        })
    }
}

/// Keeps `status.json` in the state directory pointing at the latest event.
#[derive(Debug, Clone)]
pub struct StatusFileSink {
    path: PathBuf,
}

impl StatusFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last event written by any agent using this file.
    pub fn read(path: &Path) -> crate::Result<Option<StatusEvent>> {
        io::read_json(path)
    }
}

impl StatusSink for StatusFileSink {
    fn emit(&self, event: &StatusEvent) -> Result<(), StatusSinkError> {
        io::write_json(&self.path, event).map_err(|e| StatusSinkError::Write(e.to_string()))
    }

    fn refresh(&self, event: &StatusEvent) -> Result<(), StatusSinkError> {
        self.emit(event)
    }
}
