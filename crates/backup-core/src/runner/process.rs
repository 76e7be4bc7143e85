use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{build_args, BackupRunner, RunPoll};
use crate::config::Configuration;
use crate::error::LaunchError;

/// Time a cancelled process gets to exit after SIGTERM before it is killed.
const TERM_GRACE: Duration = Duration::from_secs(5);
const TERM_POLL: Duration = Duration::from_millis(50);

// ─── ProcessHandle ────────────────────────────────────────────────────────

/// A spawned backup process.
///
/// The first terminal result seen by `poll` is cached so the child is never
/// waited on twice.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    program: String,
    finished: Option<RunPoll>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    fn finish(&mut self, result: RunPoll) -> RunPoll {
        self.finished = Some(result.clone());
        result
    }
}

// ─── ProcessRunner ────────────────────────────────────────────────────────

/// Runs the configured method's program as a child process.
///
/// Stdout and stderr are inherited so the tool's own output ends up wherever
/// the agent's output goes (usually the service journal).
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Program and arguments that `start` would execute.
    pub fn command_line(config: &Configuration) -> Result<Vec<String>, LaunchError> {
        let mut argv = vec![config.program.clone()];
        argv.extend(build_args(config)?);
        Ok(argv)
    }
}

impl BackupRunner for ProcessRunner {
    type Handle = ProcessHandle;

    fn start(&self, config: &Configuration) -> Result<ProcessHandle, LaunchError> {
        let program = which::which(&config.program)
            .map_err(|_| LaunchError::BinaryNotFound(config.program.clone()))?;
        let args = build_args(config)?;

        debug!("launching {} {}", program.display(), args.join(" "));
        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| LaunchError::Spawn {
                program: config.program.clone(),
                message: e.to_string(),
            })?;

        info!("started {} (pid {})", config.program, child.id());
        Ok(ProcessHandle {
            child,
            program: config.program.clone(),
            finished: None,
        })
    }

    fn poll(&self, handle: &mut ProcessHandle) -> RunPoll {
        if let Some(done) = &handle.finished {
            return done.clone();
        }
        match handle.child.try_wait() {
            Ok(None) => RunPoll::Running,
            Ok(Some(status)) => handle.finish(RunPoll::Exited {
                code: status.code(),
            }),
            Err(e) => handle.finish(RunPoll::Lost {
                message: e.to_string(),
            }),
        }
    }

    fn cancel(&self, handle: &mut ProcessHandle) {
        if handle.finished.is_some() {
            return;
        }
        let pid = handle.pid();
        info!("cancelling {} (pid {pid})", handle.program);

        if send_term(pid) {
            let deadline = Instant::now() + TERM_GRACE;
            while Instant::now() < deadline {
                if !self.poll(handle).is_running() {
                    return;
                }
                std::thread::sleep(TERM_POLL);
            }
            warn!("{} ignored SIGTERM, killing it", handle.program);
        }

        if let Err(e) = handle.child.kill() {
            warn!("failed to kill pid {pid}: {e}");
        }
        let result = match handle.child.wait() {
            Ok(status) => RunPoll::Exited {
                code: status.code(),
            },
            Err(e) => RunPoll::Lost {
                message: e.to_string(),
            },
        };
        handle.finish(result);
    }
}

/// Send SIGTERM (`kill -TERM {pid}`). Returns false when it could not be sent.
fn send_term(pid: u32) -> bool {
    #[cfg(unix)]
    {
        Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}
