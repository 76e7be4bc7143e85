//! Pluggable gate consulted before every backup attempt.
//!
//! Checkers fail open: anything that cannot be evaluated (a missing script,
//! a crash, a timeout) permits the backup and logs a warning. A host without
//! any configured check behaves exactly like [`AlwaysPermit`].

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::error::PreconditionLoadError;
use crate::paths;

/// Answers "may a backup start right now?".
pub trait PreconditionChecker {
    fn can_backup(&self) -> bool;

    /// Short label for logs.
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// PreconditionSpec
// ---------------------------------------------------------------------------

/// A precondition as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PreconditionSpec {
    /// Run an executable; exit status 0 permits the backup.
    Command {
        command: String,
        #[serde(default = "default_command_timeout")]
        timeout_secs: u64,
    },
    /// Permit only while `path` is a mount point.
    Mounted { path: PathBuf },
    /// Permit only while running on mains power.
    AcPower,
}

fn default_command_timeout() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// AlwaysPermit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPermit;

impl PreconditionChecker for AlwaysPermit {
    fn can_backup(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "always".into()
    }
}

// ---------------------------------------------------------------------------
// CommandCheck
// ---------------------------------------------------------------------------

/// Runs a user executable and maps its exit status to a verdict.
#[derive(Debug, Clone)]
pub struct CommandCheck {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

const COMMAND_POLL: Duration = Duration::from_millis(20);

impl CommandCheck {
    pub fn load(command: &str, timeout: Duration) -> Result<Self, PreconditionLoadError> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| PreconditionLoadError::Invalid("empty precondition command".into()))?;
        let program = which::which(program)
            .map_err(|_| PreconditionLoadError::CommandNotFound(program.to_string()))?;
        Ok(Self {
            program,
            args: parts.map(str::to_string).collect(),
            timeout,
        })
    }

    /// Check that runs `program` exactly as given, with no arguments.
    pub fn from_path(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    fn run(&self) -> std::io::Result<Option<bool>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status.success()));
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }
            std::thread::sleep(COMMAND_POLL);
        }
    }
}

impl PreconditionChecker for CommandCheck {
    fn can_backup(&self) -> bool {
        match self.run() {
            Ok(Some(verdict)) => verdict,
            Ok(None) => {
                warn!(
                    "precondition {} timed out after {:?}; permitting backup",
                    self.program.display(),
                    self.timeout
                );
                true
            }
            Err(e) => {
                warn!(
                    "precondition {} failed to run: {e}; permitting backup",
                    self.program.display()
                );
                true
            }
        }
    }

    fn describe(&self) -> String {
        format!("command {}", self.program.display())
    }
}

// ---------------------------------------------------------------------------
// Mounted
// ---------------------------------------------------------------------------

/// Permits while `path` sits on a different device than its parent.
#[derive(Debug, Clone)]
pub struct Mounted {
    path: PathBuf,
}

impl Mounted {
    pub fn load(path: &Path) -> Result<Self, PreconditionLoadError> {
        if !path.is_absolute() {
            return Err(PreconditionLoadError::Invalid(format!(
                "mount point must be an absolute path: {}",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

#[cfg(unix)]
fn is_mount_point(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let Some(parent) = path.parent() else {
        // `/` is always mounted
        return true;
    };
    match std::fs::metadata(parent) {
        Ok(parent_meta) => meta.dev() != parent_meta.dev() || meta.ino() == parent_meta.ino(),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_mount_point(path: &Path) -> bool {
    path.exists()
}

impl PreconditionChecker for Mounted {
    fn can_backup(&self) -> bool {
        is_mount_point(&self.path)
    }

    fn describe(&self) -> String {
        format!("mounted {}", self.path.display())
    }
}

// ---------------------------------------------------------------------------
// AcPower
// ---------------------------------------------------------------------------

pub const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

/// Denies only when a mains supply reports that it is offline.
#[derive(Debug, Clone)]
pub struct AcPower {
    supply_dir: PathBuf,
}

impl AcPower {
    pub fn new() -> Self {
        Self::with_supply_dir(POWER_SUPPLY_DIR)
    }

    pub fn with_supply_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            supply_dir: dir.into(),
        }
    }
}

impl Default for AcPower {
    fn default() -> Self {
        Self::new()
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

impl PreconditionChecker for AcPower {
    fn can_backup(&self) -> bool {
        let Ok(entries) = std::fs::read_dir(&self.supply_dir) else {
            return true;
        };

        let mut mains_seen = false;
        for entry in entries.flatten() {
            let dir = entry.path();
            if read_trimmed(&dir.join("type")).as_deref() != Some("Mains") {
                continue;
            }
            mains_seen = true;
            if read_trimmed(&dir.join("online")).as_deref() == Some("1") {
                return true;
            }
        }
        // desktops have no mains entry at all
        !mains_seen
    }

    fn describe(&self) -> String {
        "ac power".into()
    }
}

// ---------------------------------------------------------------------------
// AllOf
// ---------------------------------------------------------------------------

/// Conjunction of several checkers, evaluated in order.
pub struct AllOf {
    checkers: Vec<Box<dyn PreconditionChecker + Send>>,
}

impl AllOf {
    pub fn new(checkers: Vec<Box<dyn PreconditionChecker + Send>>) -> Self {
        Self { checkers }
    }
}

impl PreconditionChecker for AllOf {
    fn can_backup(&self) -> bool {
        self.checkers.iter().all(|c| {
            let ok = c.can_backup();
            if !ok {
                debug!("precondition '{}' not met", c.describe());
            }
            ok
        })
    }

    fn describe(&self) -> String {
        self.checkers
            .iter()
            .map(|c| c.describe())
            .collect::<Vec<_>>()
            .join(" and ")
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

fn load(spec: &PreconditionSpec) -> Result<Box<dyn PreconditionChecker + Send>, PreconditionLoadError> {
    match spec {
        PreconditionSpec::Command {
            command,
            timeout_secs,
        } => Ok(Box::new(CommandCheck::load(
            command,
            Duration::from_secs(*timeout_secs),
        )?)),
        PreconditionSpec::Mounted { path } => Ok(Box::new(Mounted::load(path)?)),
        PreconditionSpec::AcPower => Ok(Box::new(AcPower::new())),
    }
}

/// Build the checker for `config`.
///
/// Specs that fail to load are dropped with a warning. Without any configured
/// spec, an executable named `precondition` next to the config file is used
/// when present; otherwise every backup is permitted.
pub fn resolve(config: &Configuration) -> Box<dyn PreconditionChecker + Send> {
    let mut checkers: Vec<Box<dyn PreconditionChecker + Send>> = Vec::new();

    if config.preconditions.is_empty() {
        let discovered = paths::discovered_precondition(&config.config_dir);
        if discovered.is_file() {
            checkers.push(Box::new(CommandCheck::from_path(
                discovered,
                Duration::from_secs(default_command_timeout()),
            )));
        } else {
            debug!("no precondition configured at {}", discovered.display());
        }
    }

    for spec in &config.preconditions {
        match load(spec) {
            Ok(checker) => checkers.push(checker),
            Err(e) => warn!("ignoring precondition: {e}"),
        }
    }

    let checker: Box<dyn PreconditionChecker + Send> = match checkers.len() {
        0 => Box::new(AlwaysPermit),
        1 => checkers.remove(0),
        _ => Box::new(AllOf::new(checkers)),
    };
    info!("precondition: {}", checker.describe());
    checker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupMethod;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> Configuration {
        Configuration::new(BackupMethod::Rsync, "/src", "/dst", dir.join("state"))
            .with_config_dir(dir)
    }

    struct Fixed(bool);

    impl PreconditionChecker for Fixed {
        fn can_backup(&self) -> bool {
            self.0
        }

        fn describe(&self) -> String {
            format!("fixed {}", self.0)
        }
    }

    #[test]
    fn spec_yaml_is_tagged() {
        let yaml = "- type: mounted\n  path: /mnt/usb\n- type: ac_power\n- type: command\n  command: /bin/check --quiet\n";
        let specs: Vec<PreconditionSpec> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            specs,
            vec![
                PreconditionSpec::Mounted {
                    path: PathBuf::from("/mnt/usb")
                },
                PreconditionSpec::AcPower,
                PreconditionSpec::Command {
                    command: "/bin/check --quiet".into(),
                    timeout_secs: 10
                },
            ]
        );
    }

    #[test]
    fn nothing_configured_always_permits() {
        let dir = TempDir::new().unwrap();
        let checker = resolve(&config_in(dir.path()));
        assert_eq!(checker.describe(), "always");
        assert!(checker.can_backup());
        assert!(checker.can_backup());
    }

    #[test]
    fn missing_command_fails_open() {
        let dir = TempDir::new().unwrap();
        let cfg = config_in(dir.path()).with_preconditions(vec![PreconditionSpec::Command {
            command: "/no/such/precondition-script".into(),
            timeout_secs: 1,
        }]);
        let checker = resolve(&cfg);
        assert_eq!(checker.describe(), "always");
        assert!(checker.can_backup());
    }

    #[test]
    fn load_errors_are_typed() {
        assert!(matches!(
            CommandCheck::load("   ", Duration::from_secs(1)),
            Err(PreconditionLoadError::Invalid(_))
        ));
        assert!(matches!(
            CommandCheck::load("__no_such_check__", Duration::from_secs(1)),
            Err(PreconditionLoadError::CommandNotFound(p)) if p == "__no_such_check__"
        ));
        assert!(matches!(
            Mounted::load(Path::new("relative/mnt")),
            Err(PreconditionLoadError::Invalid(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn command_exit_status_is_the_verdict() {
        let yes = CommandCheck::load("true", Duration::from_secs(5)).unwrap();
        let no = CommandCheck::load("false", Duration::from_secs(5)).unwrap();
        assert!(yes.can_backup());
        assert!(!no.can_backup());
    }

    #[cfg(unix)]
    #[test]
    fn command_timeout_fails_open() {
        let slow = CommandCheck::load("sleep 5", Duration::from_millis(100)).unwrap();
        let started = Instant::now();
        assert!(slow.can_backup());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn discovers_precondition_next_to_config() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("precondition");
        std::fs::write(&script, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let checker = resolve(&config_in(dir.path()));
        assert!(checker.describe().starts_with("command "));
        assert!(!checker.can_backup());
    }

    #[cfg(unix)]
    #[test]
    fn discovered_precondition_path_may_contain_spaces() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join("john doe");
        std::fs::create_dir(&config_dir).unwrap();
        let script = config_dir.join("precondition");
        std::fs::write(&script, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let checker = resolve(&config_in(&config_dir));
        assert_eq!(checker.describe(), format!("command {}", script.display()));
        assert!(!checker.can_backup());
    }

    #[cfg(unix)]
    #[test]
    fn root_is_a_mount_point_and_plain_dirs_are_not() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("not-a-mount");
        std::fs::create_dir(&plain).unwrap();
        assert!(Mounted::load(Path::new("/")).unwrap().can_backup());
        assert!(!Mounted::load(&plain).unwrap().can_backup());
        assert!(!Mounted::load(&dir.path().join("missing")).unwrap().can_backup());
    }

    fn supply(root: &Path, name: &str, kind: &str, online: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("type"), format!("{kind}\n")).unwrap();
        std::fs::write(dir.join("online"), format!("{online}\n")).unwrap();
    }

    #[test]
    fn ac_power_reads_mains_online() {
        let dir = TempDir::new().unwrap();
        supply(dir.path(), "BAT0", "Battery", "0");
        supply(dir.path(), "AC", "Mains", "0");
        let checker = AcPower::with_supply_dir(dir.path());
        assert!(!checker.can_backup());

        supply(dir.path(), "AC", "Mains", "1");
        assert!(checker.can_backup());
    }

    #[test]
    fn ac_power_without_mains_supply_permits() {
        let dir = TempDir::new().unwrap();
        supply(dir.path(), "BAT0", "Battery", "0");
        assert!(AcPower::with_supply_dir(dir.path()).can_backup());
        assert!(AcPower::with_supply_dir(dir.path().join("missing")).can_backup());
    }

    #[test]
    fn all_of_requires_every_checker() {
        let both = AllOf::new(vec![Box::new(Fixed(true)), Box::new(Fixed(true))]);
        let one = AllOf::new(vec![Box::new(Fixed(true)), Box::new(Fixed(false))]);
        assert!(both.can_backup());
        assert!(!one.can_backup());
        assert_eq!(one.describe(), "fixed true and fixed false");
    }
}
