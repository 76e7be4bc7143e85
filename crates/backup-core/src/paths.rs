use crate::error::{BackupError, Result};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CONFIG_DIR: &str = ".config/backup-agent";
pub const STATE_DIR: &str = ".local/state/backup-agent";

pub const CONFIG_FILE: &str = "config.yaml";
pub const SCHEDULE_FILE: &str = "schedule.json";
pub const STATUS_FILE: &str = "status.json";

/// Executable picked up as the precondition check when none is configured.
pub const PRECONDITION_FILE: &str = "precondition";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn home_dir() -> Result<PathBuf> {
    home::home_dir().ok_or(BackupError::HomeNotFound)
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE))
}

pub fn default_state_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(STATE_DIR))
}

pub fn schedule_path(state_dir: &Path) -> PathBuf {
    state_dir.join(SCHEDULE_FILE)
}

pub fn status_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATUS_FILE)
}

pub fn discovered_precondition(config_dir: &Path) -> PathBuf {
    config_dir.join(PRECONDITION_FILE)
}
