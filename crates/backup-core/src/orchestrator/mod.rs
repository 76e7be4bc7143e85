//! Tick-rate backup orchestrator.
//!
//! Each tick either supervises the run in flight or, when nothing is running
//! and a backup is due, consults the precondition and starts a new run. The
//! orchestrator is the only writer of [`RunState`]; everything else observes
//! it through [`StatusEvent`]s.

pub mod schedule;
pub mod state;


pub use schedule::{Schedule, ScheduleState};
pub use state::RunState;

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Configuration;
use crate::paths;
use crate::precondition::{self, PreconditionChecker};
use crate::runner::{BackupRunner, ProcessRunner, RunPoll};
use crate::status::{
    humanize_duration, FailureReason, LogSink, StatusEvent, StatusFileSink, StatusSink,
};

/// The run currently owned by the orchestrator.
struct ActiveRun<H> {
    id: Uuid,
    handle: H,
    started_at: DateTime<Utc>,
}

pub struct Orchestrator<R: BackupRunner> {
    config: Configuration,
    runner: R,
    checker: Box<dyn PreconditionChecker + Send>,
    sinks: Vec<Box<dyn StatusSink + Send>>,
    schedule: Schedule,
    state: RunState,
    active: Option<ActiveRun<R::Handle>>,
    last_event: Option<StatusEvent>,
}

impl Orchestrator<ProcessRunner> {
    /// Orchestrator wired the way the service runs it: process runner,
    /// resolved precondition, persisted schedule, log and status-file sinks.
    pub fn from_config(config: Configuration) -> Self {
        let checker = precondition::resolve(&config);
        let schedule = Schedule::open(
            config.backup_period,
            paths::schedule_path(&config.state_dir),
            Utc::now(),
        );
        let status_file = StatusFileSink::new(paths::status_path(&config.state_dir));
        Orchestrator::new(config, ProcessRunner::new(), checker)
            .with_schedule(schedule)
            .with_sink(LogSink)
            .with_sink(status_file)
    }
}

impl<R: BackupRunner> Orchestrator<R> {
    pub fn new(
        config: Configuration,
        runner: R,
        checker: Box<dyn PreconditionChecker + Send>,
    ) -> Self {
        let schedule = Schedule::new(config.backup_period);
        Self {
            config,
            runner,
            checker,
            sinks: Vec::new(),
            schedule,
            state: RunState::Idle,
            active: None,
            last_event: None,
        }
    }

    pub fn with_sink(mut self, sink: impl StatusSink + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// The most recent reported event, kept until the next one replaces it.
    pub fn status(&self) -> Option<&StatusEvent> {
        self.last_event.as_ref()
    }

    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        self.schedule.next_due_at()
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Ignore the backup period and any postponement for the next start.
    pub fn force_due(&mut self) {
        self.schedule.force_due();
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    pub fn tick(&mut self) -> RunState {
        self.tick_at(Utc::now())
    }

    /// One scheduling decision at time `now`.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> RunState {
        if self.active.is_some() {
            self.supervise(now);
        } else {
            self.attempt(now);
        }
        self.state
    }

    fn supervise(&mut self, now: DateTime<Utc>) {
        let outcome = {
            let Some(run) = self.active.as_mut() else {
                return;
            };
            let elapsed = elapsed(run.started_at, now);
            match self.runner.poll(&mut run.handle) {
                RunPoll::Running => match self.config.max_duration {
                    Some(max) if elapsed >= max => {
                        warn!(
                            "backup exceeded {}, cancelling",
                            humanize_duration(max)
                        );
                        self.runner.cancel(&mut run.handle);
                        Some(Err(FailureReason::TimedOut {
                            after_secs: max.as_secs(),
                        }))
                    }
                    _ => {
                        debug!("backup still running ({})", humanize_duration(elapsed));
                        None
                    }
                },
                RunPoll::Exited { code: Some(0) } => Some(Ok(())),
                RunPoll::Exited { code: Some(code) } => {
                    Some(Err(FailureReason::ExitCode { code }))
                }
                RunPoll::Exited { code: None } => Some(Err(FailureReason::Signal)),
                RunPoll::Lost { message } => Some(Err(FailureReason::Lost { message })),
            }
        };

        if let Some(outcome) = outcome {
            self.finish(now, outcome);
        }
    }

    fn attempt(&mut self, now: DateTime<Utc>) {
        debug_assert!(self.state.is_idle_like(), "attempt while {}", self.state);

        self.schedule.reload(now);
        if !self.schedule.is_due(now) {
            debug!(
                "backup not due until {}",
                self.schedule
                    .next_due_at()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default()
            );
            return;
        }

        let previous = self.state;
        self.set_state(RunState::CheckingPrecondition);

        if !self.checker.can_backup() {
            if previous == RunState::SkippedPreconditionNotMet {
                debug!("preconditions still not met");
                self.set_state(RunState::SkippedPreconditionNotMet);
                self.refresh_status(now);
            } else {
                self.transition(StatusEvent::new(RunState::SkippedPreconditionNotMet, now));
            }
            return;
        }

        self.schedule.clear_forced();
        let run_id = Uuid::new_v4();
        match self.runner.start(&self.config) {
            Ok(handle) => {
                info!(run = %run_id, "starting {} backup", self.config.method);
                self.active = Some(ActiveRun {
                    id: run_id,
                    handle,
                    started_at: now,
                });
                self.transition(StatusEvent::new(RunState::Running, now).with_run(run_id));
            }
            Err(e) => {
                warn!(run = %run_id, "failed to start backup: {e}");
                self.transition(
                    StatusEvent::new(RunState::Failed, now)
                        .with_run(run_id)
                        .with_reason(FailureReason::LaunchError {
                            message: e.to_string(),
                        }),
                );
            }
        }
    }

    /// Record the end of the active run and release its handle.
    fn finish(&mut self, now: DateTime<Utc>, outcome: Result<(), FailureReason>) {
        let Some(run) = self.active.take() else {
            return;
        };
        let duration = elapsed(run.started_at, now);
        let event = match outcome {
            Ok(()) => {
                self.schedule.record_success(now);
                StatusEvent::new(RunState::Succeeded, now)
            }
            Err(reason) => StatusEvent::new(RunState::Failed, now).with_reason(reason),
        };
        self.transition(event.with_run(run.id).with_duration(duration));
    }

    // -----------------------------------------------------------------------
    // State changes
    // -----------------------------------------------------------------------

    fn set_state(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Change state and report it to every sink.
    fn transition(&mut self, event: StatusEvent) {
        self.set_state(event.state);
        for sink in &self.sinks {
            if let Err(e) = sink.emit(&event) {
                debug!("dropped {} status event: {e}", event.state);
            }
        }
        self.last_event = Some(event);
    }

    /// The last event still holds at `now`; let sinks that keep only the
    /// latest event record that without a new transition.
    fn refresh_status(&mut self, now: DateTime<Utc>) {
        let Some(event) = self.last_event.as_mut() else {
            return;
        };
        event.timestamp = now;
        for sink in &self.sinks {
            if let Err(e) = sink.refresh(event) {
                debug!("dropped {} status refresh: {e}", event.state);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    /// Tick every `poll_interval` until `shutdown` resolves, then cancel any
    /// run still in flight.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            "backup agent started: {} {} -> {}, checking every {}",
            self.config.method,
            self.config.source.display(),
            self.config.target.display(),
            humanize_duration(self.config.poll_interval)
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        self.shutdown();
    }

    /// Run a single backup cycle now, ignoring the backup period, and wait
    /// for it to settle. Returns the event that ended the cycle.
    pub async fn run_once(&mut self, poll_every: Duration) -> Option<StatusEvent> {
        self.force_due();
        self.tick();
        while self.is_running() {
            tokio::time::sleep(poll_every).await;
            self.tick();
        }
        self.last_event.clone()
    }

    /// Abandon the run in flight, if any. The backup tool is asked to stop
    /// but whatever it leaves behind is not cleaned up.
    pub fn shutdown(&mut self) {
        let Some(run) = self.active.as_mut() else {
            return;
        };
        info!(run = %run.id, "cancelling backup in progress");
        self.runner.cancel(&mut run.handle);
        self.finish(Utc::now(), Err(FailureReason::Cancelled));
    }
}

fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or_default()
}
