use anyhow::Context;
use backup_core::{config::DEFAULT_CONFIG, io};
use std::path::Path;

pub fn run(config_path: &Path, force: bool) -> anyhow::Result<()> {
    if force {
        io::atomic_write(config_path, DEFAULT_CONFIG.as_bytes())
            .with_context(|| format!("failed to write {}", config_path.display()))?;
    } else {
        let written = io::write_if_missing(config_path, DEFAULT_CONFIG.as_bytes())
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        if !written {
            anyhow::bail!(
                "{} already exists (use --force to overwrite)",
                config_path.display()
            );
        }
    }

    println!("  created: {}", config_path.display());
    println!();
    println!("Edit the method section, then check it with:");
    println!("  backup-agent check");
    Ok(())
}
