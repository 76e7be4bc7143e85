use anyhow::Context;
use backup_core::{
    config::WarnLevel,
    status::ChannelSink,
    Orchestrator, RunState, StatusEvent,
};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// How often `--once` polls the backup it started.
const ONCE_POLL: Duration = Duration::from_secs(1);

/// Events buffered for `--events` before new ones are dropped.
const EVENT_BUFFER: usize = 64;

pub fn run(config_path: &Path, once: bool, events: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    for w in config.validate() {
        match w.level {
            WarnLevel::Warning => warn!("{}", w.message),
            WarnLevel::Error => warn!("config error: {}", w.message),
        }
    }

    let rt = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    rt.block_on(async move {
        let mut orchestrator = Orchestrator::from_config(config);

        let printer = if events {
            let (sink, rx) = ChannelSink::channel(EVENT_BUFFER);
            orchestrator = orchestrator.with_sink(sink);
            Some(tokio::spawn(print_events(rx)))
        } else {
            None
        };

        let result = if once {
            run_once(&mut orchestrator, events).await
        } else {
            orchestrator.run(shutdown_signal()).await;
            Ok(())
        };

        // Closes the event channel so the printer drains and exits.
        drop(orchestrator);
        if let Some(printer) = printer {
            let _ = printer.await;
        }
        result
    })
}

async fn run_once(
    orchestrator: &mut Orchestrator<backup_core::ProcessRunner>,
    quiet: bool,
) -> anyhow::Result<()> {
    let interrupted = tokio::select! {
        _ = orchestrator.run_once(ONCE_POLL) => false,
        _ = shutdown_signal() => true,
    };
    if interrupted {
        info!("interrupted");
        orchestrator.shutdown();
    }

    let Some(event) = orchestrator.status().cloned() else {
        return Ok(());
    };
    if event.state == RunState::Failed {
        anyhow::bail!("{}", event.summary());
    }
    if !quiet {
        println!("{}", event.summary());
    }
    Ok(())
}

/// Presentation subscriber for `--events`: one JSON object per line.
async fn print_events(mut rx: mpsc::Receiver<StatusEvent>) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("failed to encode status event: {e}"),
        }
    }
}

/// Resolves on ctrl-c or, on unix, SIGTERM from the service manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
