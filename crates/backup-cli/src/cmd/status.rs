use crate::output::{print_fields, print_json};
use anyhow::Context;
use backup_core::{
    orchestrator::ScheduleState,
    paths,
    status::{humanize_duration, StatusFileSink},
    StatusEvent,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct StatusOutput {
    last: Option<StatusEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_due_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_success_at: Option<DateTime<Utc>>,
}

pub fn run(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let status_path = paths::status_path(&config.state_dir);
    let last = StatusFileSink::read(&status_path)
        .with_context(|| format!("failed to read {}", status_path.display()))?;
    let schedule = ScheduleState::load(&paths::schedule_path(&config.state_dir))
        .context("failed to read schedule")?;

    let output = StatusOutput {
        last,
        next_due_at: schedule.due_at(),
        last_success_at: schedule.last_success_at,
    };

    if json {
        return print_json(&output);
    }

    let Some(last) = &output.last else {
        println!("No backup has run yet.");
        return Ok(());
    };

    let now = Utc::now();
    let mut rows = vec![
        ("state", last.state.to_string()),
        ("summary", last.summary()),
        ("updated", ago(last.timestamp, now)),
    ];
    if let Some(run_id) = last.run_id {
        rows.push(("run", run_id.to_string()));
    }
    if let Some(at) = output.last_success_at {
        rows.push(("last success", ago(at, now)));
    }
    if let Some(at) = output.next_due_at {
        rows.push(("next due", at.to_rfc3339()));
    }
    print_fields(&rows);
    Ok(())
}

fn ago(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = (now - at).to_std().unwrap_or_default();
    format!("{} ({} ago)", at.to_rfc3339(), humanize_duration(elapsed))
}
