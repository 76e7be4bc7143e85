pub mod check;
pub mod init;
pub mod postpone;
pub mod run;
pub mod status;

use anyhow::Context;
use backup_core::{paths, Configuration};
use std::path::{Path, PathBuf};

/// `--config` / `BACKUP_AGENT_CONFIG`, falling back to the per-user default.
pub fn config_path(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => paths::default_config_path().context("cannot locate the default config file"),
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<Configuration> {
    Configuration::load(path).with_context(|| format!("failed to load {}", path.display()))
}
