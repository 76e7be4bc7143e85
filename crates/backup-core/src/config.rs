use crate::error::{BackupError, Result};
use crate::paths;
use crate::precondition::PreconditionSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// BackupMethod
// ---------------------------------------------------------------------------

/// Which external tool performs the copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupMethod {
    Rsync,
    Rclone,
    /// Any program invoked as `program [options] <from> <to>`.
    Command,
}

impl BackupMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupMethod::Rsync => "rsync",
            BackupMethod::Rclone => "rclone",
            BackupMethod::Command => "command",
        }
    }

    /// Binary used when the section does not name a `program`.
    pub fn default_program(&self) -> Option<&'static str> {
        match self {
            BackupMethod::Rsync => Some("rsync"),
            BackupMethod::Rclone => Some("rclone"),
            BackupMethod::Command => None,
        }
    }

    /// Arguments placed between the program and the options.
    pub fn prefix_args(&self) -> &'static [&'static str] {
        match self {
            BackupMethod::Rclone => &["sync"],
            BackupMethod::Rsync | BackupMethod::Command => &[],
        }
    }

    /// Options the method always passes unless the user overrides them.
    pub fn default_options(&self) -> &'static [&'static str] {
        match self {
            // no progress output: stdout goes to the journal unread
            BackupMethod::Rsync => &["--archive"],
            BackupMethod::Rclone => &["--stats=1m", "--stats-one-line"],
            BackupMethod::Command => &[],
        }
    }
}

impl std::fmt::Display for BackupMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

/// One backup method section: `rsync:`, `rclone:` or `command:`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodSection {
    pub from: String,
    pub to: String,
    /// Free-form, whitespace separated options appended to the method defaults.
    #[serde(default)]
    pub options: String,
    #[serde(default)]
    pub program: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleSection {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Minimum spacing between successful backups.
    #[serde(default)]
    pub period_hours: Option<f64>,
    #[serde(default)]
    pub max_duration_hours: Option<f64>,
}

fn default_poll_interval_secs() -> u64 {
    300
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            period_hours: None,
            max_duration_hours: None,
        }
    }
}

/// The configuration file as written by the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsync: Option<MethodSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rclone: Option<MethodSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<MethodSection>,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<PreconditionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl ConfigFile {
    pub fn parse(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    fn method_section(&self) -> Result<(BackupMethod, &MethodSection)> {
        let sections: Vec<(BackupMethod, &MethodSection)> = [
            (BackupMethod::Rsync, self.rsync.as_ref()),
            (BackupMethod::Rclone, self.rclone.as_ref()),
            (BackupMethod::Command, self.command.as_ref()),
        ]
        .into_iter()
        .filter_map(|(method, section)| section.map(|s| (method, s)))
        .collect();

        match sections.as_slice() {
            [one] => Ok(*one),
            [] => Err(BackupError::InvalidConfig(
                "no backup method section (expected one of: rsync, rclone, command)".into(),
            )),
            many => Err(BackupError::InvalidConfig(format!(
                "more than one backup method section: {}",
                many.iter()
                    .map(|(m, _)| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

pub const DEFAULT_CONFIG: &str = r#"# backup-agent configuration
#
# Exactly one method section: rsync, rclone or command.
rsync:
  from: /home/me/
  to: /mnt/backup/me
  # Appended to the method defaults; yours win on conflict.
  options: "--delete --exclude=.cache"

schedule:
  # How often the agent wakes up to check whether a backup is due.
  poll_interval_secs: 300
  # Minimum spacing between successful backups.
  period_hours: 6

# Every listed check must pass before a backup starts.
# preconditions:
#   - type: mounted
#     path: /mnt/backup
#   - type: ac_power
#   - type: command
#     command: /home/me/.config/backup-agent/on-home-wifi
#     timeout_secs: 10
"#;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Validated, immutable configuration consumed by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub method: BackupMethod,
    pub program: String,
    pub source: PathBuf,
    pub target: PathBuf,
    pub extra_options: Vec<String>,
    pub poll_interval: Duration,
    pub backup_period: Option<Duration>,
    pub max_duration: Option<Duration>,
    pub preconditions: Vec<PreconditionSpec>,
    pub state_dir: PathBuf,
    /// Directory the configuration was loaded from.
    pub config_dir: PathBuf,
}

impl Configuration {
    /// Configuration with default schedule settings and no preconditions.
    pub fn new(
        method: BackupMethod,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        let state_dir = state_dir.into();
        Self {
            method,
            program: method.default_program().unwrap_or_default().to_string(),
            source: source.into(),
            target: target.into(),
            extra_options: Vec::new(),
            poll_interval: Duration::from_secs(default_poll_interval_secs()),
            backup_period: None,
            max_duration: None,
            preconditions: Vec::new(),
            config_dir: state_dir.clone(),
            state_dir,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_backup_period(mut self, period: Option<Duration>) -> Self {
        self.backup_period = period;
        self
    }

    pub fn with_max_duration(mut self, max: Option<Duration>) -> Self {
        self.max_duration = max;
        self
    }

    pub fn with_preconditions(mut self, specs: Vec<PreconditionSpec>) -> Self {
        self.preconditions = specs;
        self
    }

    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }

    /// Load and validate the configuration at `path`.
    ///
    /// Any problem here is fatal: the agent must not start with a config it
    /// cannot interpret.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BackupError::ConfigNotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        let file = ConfigFile::parse(&data)?;
        let config_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_file(file, config_dir)
    }

    pub fn from_file(file: ConfigFile, config_dir: PathBuf) -> Result<Self> {
        let (method, section) = file.method_section()?;
        let section = section.clone();

        if section.from.trim().is_empty() {
            return Err(BackupError::InvalidConfig(format!(
                "section '{method}' needs a non-empty 'from' path"
            )));
        }
        if section.to.trim().is_empty() {
            return Err(BackupError::InvalidConfig(format!(
                "section '{method}' needs a non-empty 'to' path"
            )));
        }

        let program = match (&section.program, method.default_program()) {
            (Some(p), _) if !p.trim().is_empty() => p.trim().to_string(),
            (_, Some(default)) => default.to_string(),
            (_, None) => {
                return Err(BackupError::InvalidConfig(format!(
                    "section '{method}' needs a 'program'"
                )))
            }
        };

        if file.schedule.poll_interval_secs == 0 {
            return Err(BackupError::InvalidConfig(
                "schedule.poll_interval_secs must be greater than zero".into(),
            ));
        }

        let backup_period = hours_to_duration("schedule.period_hours", file.schedule.period_hours)?;
        let max_duration = hours_to_duration(
            "schedule.max_duration_hours",
            file.schedule.max_duration_hours,
        )?;

        let state_dir = match file.state_dir {
            Some(dir) => dir,
            None => paths::default_state_dir()?,
        };

        Ok(Self {
            method,
            program,
            source: PathBuf::from(&section.from),
            target: PathBuf::from(&section.to),
            extra_options: section.options.split_whitespace().map(str::to_string).collect(),
            poll_interval: Duration::from_secs(file.schedule.poll_interval_secs),
            backup_period,
            max_duration,
            preconditions: file.preconditions,
            state_dir,
            config_dir,
        })
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Non-fatal observations about the configuration.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.method != BackupMethod::Rclone && !self.source.exists() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!("source path '{}' does not exist", self.source.display()),
            });
        }

        if self.poll_interval < Duration::from_secs(10) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "poll interval of {}s is very short; the check runs on every tick",
                    self.poll_interval.as_secs()
                ),
            });
        }

        if let (Some(period), Some(max)) = (self.backup_period, self.max_duration) {
            if max > period {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: "max_duration_hours is longer than period_hours".into(),
                });
            }
        }

        if which::which(&self.program).is_err() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("backup program '{}' not found on PATH", self.program),
            });
        }

        warnings
    }
}

fn hours_to_duration(field: &str, hours: Option<f64>) -> Result<Option<Duration>> {
    match hours {
        None => Ok(None),
        Some(h) if !h.is_finite() || h < 0.0 => Err(BackupError::InvalidConfig(format!(
            "{field} must be a non-negative number, got {h}"
        ))),
        Some(h) if h == 0.0 => Ok(None),
        Some(h) => Duration::try_from_secs_f64(h * 3600.0)
            .map(Some)
            .map_err(|_| BackupError::InvalidConfig(format!("{field} is too large: {h}"))),
    }
}
