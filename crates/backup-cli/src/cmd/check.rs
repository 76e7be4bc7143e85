use crate::output::{print_fields, print_json};
use backup_core::{
    config::{ConfigWarning, WarnLevel},
    precondition,
    status::humanize_duration,
    ProcessRunner,
};
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct CheckOutput<'a> {
    method: &'a str,
    command_line: Vec<String>,
    precondition: String,
    can_backup: bool,
    warnings: Vec<ConfigWarning>,
}

pub fn run(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let warnings = config.validate();
    let command_line = ProcessRunner::command_line(&config)?;
    let checker = precondition::resolve(&config);
    let can_backup = checker.can_backup();

    let output = CheckOutput {
        method: config.method.as_str(),
        command_line,
        precondition: checker.describe(),
        can_backup,
        warnings,
    };

    if json {
        print_json(&output)?;
    } else {
        let mut rows = vec![
            ("method", output.method.to_string()),
            ("command", output.command_line.join(" ")),
            ("poll every", humanize_duration(config.poll_interval)),
        ];
        if let Some(period) = config.backup_period {
            rows.push(("period", humanize_duration(period)));
        }
        if let Some(max) = config.max_duration {
            rows.push(("max duration", humanize_duration(max)));
        }
        rows.push(("state dir", config.state_dir.display().to_string()));
        rows.push(("precondition", output.precondition.clone()));
        rows.push((
            "can backup",
            if can_backup { "yes" } else { "no" }.to_string(),
        ));
        print_fields(&rows);

        for w in &output.warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if output.warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
