use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("config file not found: {0} (run 'backup-agent init')")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;

/// The backup command could not be started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("backup binary not found: {0}")]
    BinaryNotFound(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },
}

/// A configured precondition could not be instantiated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionLoadError {
    #[error("precondition command not found: {0}")]
    CommandNotFound(String),

    #[error("invalid precondition: {0}")]
    Invalid(String),
}

/// A status event could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusSinkError {
    #[error("status sink is full")]
    Full,

    #[error("status sink is closed")]
    Closed,

    #[error("status sink write failed: {0}")]
    Write(String),
}
