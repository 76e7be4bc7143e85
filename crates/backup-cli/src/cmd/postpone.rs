use anyhow::Context;
use backup_core::{orchestrator::Schedule, paths};
use chrono::Utc;
use std::path::Path;
use std::time::Duration;

/// Write the postponement to the state directory; a running agent picks it
/// up on its next idle tick.
pub fn run(config_path: &Path, hours: f64) -> anyhow::Result<()> {
    if !hours.is_finite() || hours <= 0.0 {
        anyhow::bail!("hours must be a positive number, got {hours}");
    }
    let by = Duration::try_from_secs_f64(hours * 3600.0)
        .with_context(|| format!("{hours} hours is too long"))?;

    let config = super::load_config(config_path)?;
    let now = Utc::now();
    let mut schedule = Schedule::open(
        config.backup_period,
        paths::schedule_path(&config.state_dir),
        now,
    );
    let until = schedule.postpone(by, now).context("failed to save schedule")?;

    println!("Next backup postponed until {}", until.to_rfc3339());
    Ok(())
}
