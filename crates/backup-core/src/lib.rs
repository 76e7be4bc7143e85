pub mod config;
pub mod error;
pub mod io;
pub mod orchestrator;
pub mod paths;
pub mod precondition;
pub mod runner;
pub mod status;

pub use config::{BackupMethod, Configuration};
pub use error::{BackupError, LaunchError, Result};
pub use orchestrator::{Orchestrator, RunState};
pub use precondition::PreconditionChecker;
pub use runner::{BackupRunner, ProcessRunner, RunPoll};
pub use status::{FailureReason, StatusEvent, StatusSink};
