//! Run state and the edges the orchestrator may take between states.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the backup agent.
///
/// Transitions:
/// ```text
/// Idle | Succeeded | Failed | Skipped  → CheckingPrecondition
/// CheckingPrecondition                 → Running | Skipped | Failed (launch)
/// Running                              → Running | Succeeded | Failed
/// Succeeded | Failed | Skipped         → Idle
/// ```
///
/// `Succeeded`, `Failed` and `SkippedPreconditionNotMet` behave like `Idle`
/// when the next tick arrives, but stay visible until replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    CheckingPrecondition,
    Running,
    Succeeded,
    Failed,
    SkippedPreconditionNotMet,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::CheckingPrecondition => "checking_precondition",
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::SkippedPreconditionNotMet => "skipped_precondition_not_met",
        }
    }

    /// True for states a tick treats as "nothing in flight".
    pub fn is_idle_like(&self) -> bool {
        matches!(
            self,
            RunState::Idle
                | RunState::Succeeded
                | RunState::Failed
                | RunState::SkippedPreconditionNotMet
        )
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Idle | Succeeded | Failed | SkippedPreconditionNotMet, CheckingPrecondition) => true,
            (CheckingPrecondition, Running | SkippedPreconditionNotMet | Failed) => true,
            (Running, Running | Succeeded | Failed) => true,
            (Succeeded | Failed | SkippedPreconditionNotMet, Idle) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
