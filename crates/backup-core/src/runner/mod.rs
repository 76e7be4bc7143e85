//! The capability that performs a backup.
//!
//! A runner starts the external tool and reports on it; it never decides
//! *when* to run. The orchestrator drives it through [`BackupRunner`] only
//! and is unaware of which tool sits behind it.

pub mod process;

pub use process::{ProcessHandle, ProcessRunner};

use crate::config::Configuration;
use crate::error::LaunchError;

/// Observed state of an in-flight run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPoll {
    Running,
    /// The process ended. `code` is `None` when it was killed by a signal.
    Exited { code: Option<i32> },
    /// The process could not be observed any more.
    Lost { message: String },
}

impl RunPoll {
    pub fn is_running(&self) -> bool {
        matches!(self, RunPoll::Running)
    }
}

pub trait BackupRunner {
    type Handle;

    /// Launch one backup. Must not wait for it to finish.
    fn start(&self, config: &Configuration) -> Result<Self::Handle, LaunchError>;

    /// Non-blocking status query. Once a terminal result has been returned,
    /// later calls return the same result.
    fn poll(&self, handle: &mut Self::Handle) -> RunPoll;

    /// Best-effort termination.
    fn cancel(&self, handle: &mut Self::Handle) {
        let _ = handle;
    }
}

// ---------------------------------------------------------------------------
// Option merging
// ---------------------------------------------------------------------------

/// Name used to detect conflicts between two options.
///
/// `--delete`, `--no-delete` and `--delete=x` share the name `delete`;
/// short flags keep their dash (`-v`).
fn option_name(option: &str) -> Option<&str> {
    let long = option.strip_prefix("--")?;
    let long = long.split('=').next().unwrap_or(long);
    Some(long.strip_prefix("no-").unwrap_or(long))
}

fn conflict_key(option: &str) -> Option<String> {
    if let Some(name) = option_name(option) {
        return Some(name.to_string());
    }
    option
        .starts_with('-')
        .then(|| option.split('=').next().unwrap_or(option).to_string())
}

/// Group tokens so that a value following an option travels with it.
fn group_options(tokens: &[String]) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = Vec::new();
    for token in tokens {
        match groups.last_mut() {
            Some(group) if !token.starts_with('-') => group.push(token.clone()),
            _ => groups.push(vec![token.clone()]),
        }
    }
    groups
}

/// Merge a method's default options with the user's.
///
/// Defaults the user did not mention come first, in their own order,
/// followed by every user option in the order given.
pub fn merge_options(defaults: &[&str], user: &[String]) -> Vec<String> {
    let user_groups = group_options(user);
    let user_keys: Vec<String> = user_groups
        .iter()
        .filter_map(|g| g.first().and_then(|o| conflict_key(o)))
        .collect();

    let mut merged: Vec<String> = defaults
        .iter()
        .filter(|d| match conflict_key(d) {
            Some(key) => !user_keys.contains(&key),
            None => true,
        })
        .map(|d| d.to_string())
        .collect();
    merged.extend(user_groups.into_iter().flatten());
    merged
}

/// Full argument vector (without the program) for `config`.
pub fn build_args(config: &Configuration) -> Result<Vec<String>, LaunchError> {
    let source = config.source.to_str().ok_or_else(|| {
        LaunchError::InvalidArguments("source path contains non-UTF8 characters".into())
    })?;
    let target = config.target.to_str().ok_or_else(|| {
        LaunchError::InvalidArguments("target path contains non-UTF8 characters".into())
    })?;
    if source.is_empty() || target.is_empty() {
        return Err(LaunchError::InvalidArguments(
            "source and target must not be empty".into(),
        ));
    }

    let mut args: Vec<String> = config
        .method
        .prefix_args()
        .iter()
        .map(|a| a.to_string())
        .collect();
    args.extend(merge_options(
        config.method.default_options(),
        &config.extra_options,
    ));
    args.push(source.to_string());
    args.push(target.to_string());
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupMethod;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_fill_gaps() {
        let merged = merge_options(&["--archive", "--info=progress2"], &strings(&["--delete"]));
        assert_eq!(merged, strings(&["--archive", "--info=progress2", "--delete"]));
    }

    #[test]
    fn user_value_overrides_default() {
        let merged = merge_options(
            &["--archive", "--info=progress2"],
            &strings(&["--info=stats2", "-v"]),
        );
        assert_eq!(merged, strings(&["--archive", "--info=stats2", "-v"]));
    }

    #[test]
    fn negated_option_removes_default() {
        let merged = merge_options(&["--archive", "--info=progress2"], &strings(&["--no-archive"]));
        assert_eq!(merged, strings(&["--info=progress2", "--no-archive"]));
    }

    #[test]
    fn option_values_stay_with_their_option() {
        let merged = merge_options(
            &["--stats=1m"],
            &strings(&["--exclude", ".cache", "--stats", "30s", "--exclude", "tmp"]),
        );
        assert_eq!(
            merged,
            strings(&["--exclude", ".cache", "--stats", "30s", "--exclude", "tmp"])
        );
    }

    #[test]
    fn empty_user_options_keep_defaults() {
        assert_eq!(merge_options(&["-a"], &[]), strings(&["-a"]));
        assert!(merge_options(&[], &[]).is_empty());
    }

    #[test]
    fn rsync_args_end_with_source_and_target() {
        let cfg = Configuration::new(BackupMethod::Rsync, "/home/a/", "/mnt/b", "/tmp/s")
            .with_options(["--delete"]);
        assert_eq!(
            build_args(&cfg).unwrap(),
            strings(&["--archive", "--delete", "/home/a/", "/mnt/b"])
        );
    }

    #[test]
    fn rclone_args_start_with_subcommand() {
        let cfg = Configuration::new(BackupMethod::Rclone, "/home/a", "remote:a", "/tmp/s");
        assert_eq!(
            build_args(&cfg).unwrap(),
            strings(&["sync", "--stats=1m", "--stats-one-line", "/home/a", "remote:a"])
        );
    }

    #[test]
    fn empty_target_is_invalid() {
        let cfg = Configuration::new(BackupMethod::Rsync, "/a", "", "/tmp/s");
        assert!(matches!(
            build_args(&cfg),
            Err(LaunchError::InvalidArguments(_))
        ));
    }
}
