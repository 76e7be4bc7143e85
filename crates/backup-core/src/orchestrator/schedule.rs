//! When the next backup is due.
//!
//! Without a configured period every idle tick is due. With a period, the
//! next due time moves forward only after a successful run and is persisted
//! so a restarted agent does not back up again straight away. The user can
//! push the next backup back with `postpone`, from any process sharing the
//! state directory; the agent rereads the file before deciding.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::io;

/// On-disk form of the schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_due_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    /// Set by the user; not bounded by the period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postponed_until: Option<DateTime<Utc>>,
}

impl ScheduleState {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(io::read_json(path)?.unwrap_or_default())
    }

    /// The later of the period gate and any postponement.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        match (self.next_due_at, self.postponed_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Drop a period gate that cannot have come from a run under `period`.
    fn sanitize(&mut self, period: Option<Duration>, now: DateTime<Utc>) -> bool {
        match (self.next_due_at, period) {
            (Some(next), Some(period)) if next > after(now, period) => {
                self.next_due_at = None;
                true
            }
            (Some(_), None) => {
                self.next_due_at = None;
                false
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Schedule {
    period: Option<Duration>,
    state: ScheduleState,
    path: Option<PathBuf>,
    forced: bool,
}

impl Schedule {
    /// In-memory schedule, used when nothing should be persisted.
    pub fn new(period: Option<Duration>) -> Self {
        Self {
            period,
            state: ScheduleState::default(),
            path: None,
            forced: false,
        }
    }

    /// Schedule backed by `path`. An unreadable or implausible file is
    /// discarded and the next tick is due.
    pub fn open(period: Option<Duration>, path: impl Into<PathBuf>, now: DateTime<Utc>) -> Self {
        let path = path.into();
        let mut state = match ScheduleState::load(&path) {
            Ok(state) => state,
            Err(e) => {
                warn!("ignoring unreadable schedule {}: {e}", path.display());
                ScheduleState::default()
            }
        };

        if let Some(next) = state.next_due_at {
            if state.sanitize(period, now) {
                info!("discarding next_due_at {next}: further away than one period");
            }
        }
        if let Some(due) = state.due_at() {
            info!("next backup due at {due}");
        }

        Self {
            period,
            state,
            path: Some(path),
            forced: false,
        }
    }

    /// Pick up changes another process made to the persisted schedule.
    pub fn reload(&mut self, now: DateTime<Utc>) {
        let Some(path) = &self.path else {
            return;
        };
        match ScheduleState::load(path) {
            Ok(mut state) => {
                state.sanitize(self.period, now);
                if state != self.state {
                    debug!("schedule changed on disk: {state:?}");
                    self.state = state;
                }
            }
            Err(e) => debug!("keeping in-memory schedule, {}: {e}", path.display()),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.forced || self.state.due_at().map_or(true, |due| now >= due)
    }

    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        self.state.due_at()
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    /// Make the next tick due regardless of the period or a postponement.
    pub fn force_due(&mut self) {
        self.forced = true;
    }

    /// A forced attempt has been made; the gate applies again.
    pub fn clear_forced(&mut self) {
        self.forced = false;
    }

    /// Push the next backup back by `by`, counted from whichever is later:
    /// now or the current due time.
    pub fn postpone(&mut self, by: Duration, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let base = self.state.due_at().map_or(now, |due| due.max(now));
        let until = after(base, by);
        self.state.postponed_until = Some(until);
        if let Some(path) = &self.path {
            io::write_json(path, &self.state)?;
        }
        info!("next backup postponed until {until}");
        Ok(until)
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.forced = false;
        self.state.last_success_at = Some(now);
        self.state.next_due_at = self.period.map(|p| after(now, p));
        self.state.postponed_until = None;
        if let Some(next) = self.state.next_due_at {
            info!("next backup due at {next}");
        }
        self.persist();
    }

    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = io::write_json(path, &self.state) {
            warn!("failed to save schedule to {}: {e}", path.display());
        }
    }
}

fn after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
