//! Snapshotter: appends service volume data to a backup archive.
//!
//! Runs inside a container that shares an instance service's volumes via
//! `--volumes-from`, with the job config and the backup archive bind
//! mounted by the orchestrator. Walks each volume mount target and
//! appends its tree to the archive under the job's entry prefix, then
//! exits; a non-zero exit tells the orchestrator the snapshot failed.

use anyhow::Context;
use avsctl::archive::{self, TarAppender};
use avsctl::backup::job::{SnapshotJobConfig, CONFIG_MOUNT_PATH};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "snapshotter",
    version,
    about = "Append volume snapshots to a backup archive"
)]
struct Args {
    /// Path of the job config mounted into the container.
    #[arg(short, long, default_value = CONFIG_MOUNT_PATH)]
    config: PathBuf,

    /// Log level filter.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    avsctl::utils::logger::init(&args.log_level)?;

    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("failed to read job config {}", args.config.display()))?;
    let job: SnapshotJobConfig = serde_json::from_str(&raw).context("failed to parse job config")?;

    run_job(&job)
}

/// Append every volume in the job to the archive, one tree per volume,
/// all under the job prefix.
fn run_job(job: &SnapshotJobConfig) -> anyhow::Result<()> {
    tracing::info!(
        prefix = %job.prefix,
        volumes = job.volumes.len(),
        archive = %job.output_path,
        "starting volume snapshot"
    );

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&job.output_path)
        .with_context(|| format!("failed to open archive {}", job.output_path))?;
    archive::prepare_for_append(&mut file)?;

    let mut appender = TarAppender::new(file);
    for volume in &job.volumes {
        let prefix = entry_prefix(&job.prefix, volume);
        tracing::info!(volume = %volume, prefix = %prefix, "appending volume");
        appender
            .add_directory_tree(Path::new(volume), &prefix)
            .with_context(|| format!("failed to append volume {}", volume))?;
    }
    appender.finish()?;

    tracing::info!("volume snapshot complete");
    Ok(())
}

/// Archive entry prefix for one volume: the job prefix plus the mount
/// target with its leading slash dropped.
fn entry_prefix(job_prefix: &str, target: &str) -> String {
    format!("{}/{}", job_prefix, target.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_entry_prefix_drops_leading_slash() {
        assert_eq!(
            entry_prefix("volumes/node", "/var/lib/node"),
            "volumes/node/var/lib/node"
        );
        assert_eq!(entry_prefix("volumes/node", "state"), "volumes/node/state");
    }

    #[test]
    fn test_run_job_appends_volume_trees() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let volume = dir.path().join("vol");
        fs::create_dir_all(volume.join("db"))?;
        fs::write(volume.join("db").join("state.db"), b"rows")?;
        fs::write(volume.join("peer.id"), b"id")?;

        let archive_path = dir.path().join("backup.tar");
        archive::create_empty(&archive_path).unwrap();

        let job = SnapshotJobConfig {
            prefix: "volumes/node".to_string(),
            output_path: archive_path.display().to_string(),
            volumes: vec![volume.display().to_string()],
        };
        run_job(&job).unwrap();

        let mut archive = tar::Archive::new(fs::File::open(&archive_path)?);
        let names: Vec<String> = archive
            .entries()?
            .map(|e| {
                let path = e.unwrap().path().unwrap().into_owned();
                path.to_string_lossy().trim_end_matches('/').to_string()
            })
            .collect();
        assert!(names.iter().all(|n| n.starts_with("volumes/node/")));
        assert!(names.iter().any(|n| n.ends_with("db/state.db")));
        assert!(names.iter().any(|n| n.ends_with("peer.id")));
        Ok(())
    }

    #[test]
    fn test_run_job_rejects_corrupt_archive() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let volume = dir.path().join("vol");
        fs::create_dir_all(&volume)?;

        let archive_path = dir.path().join("backup.tar");
        fs::write(&archive_path, vec![0x42u8; 2048])?;

        let job = SnapshotJobConfig {
            prefix: "volumes/node".to_string(),
            output_path: archive_path.display().to_string(),
            volumes: vec![volume.display().to_string()],
        };
        assert!(run_job(&job).is_err());
        Ok(())
    }
}
