//! `avsctl backup` subcommands.

use crate::backup::{self, BackupOrchestrator};
use crate::config::Config;
use crate::docker::cli::DockerCli;
use crate::instance::InstanceStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Create a point-in-time backup of one instance and print its id.
pub async fn create(
    config: &Config,
    instance_id: &str,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let store = InstanceStore::new(&config.general.data_dir);
    let instance = store.load(instance_id)?;

    let backend = Arc::new(DockerCli::new(&config.docker.binary));
    let orchestrator = BackupOrchestrator::with_cancel(
        backend,
        config.snapshotter_image(),
        &config.backups_dir(),
        cancel,
    );
    let backup_id = orchestrator.backup_instance(&instance).await?;
    println!("{}", backup_id);
    Ok(())
}

/// List backup archives on disk, newest first.
pub fn list(config: &Config) -> anyhow::Result<()> {
    let entries = backup::list_backups(&config.backups_dir())?;
    if entries.is_empty() {
        println!("no backups found");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {:>10}  {}",
            entry.modified.format("%Y-%m-%d %H:%M:%S"),
            format_size(entry.size),
            entry.file_name
        );
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
