//! Point-in-time backup orchestration.
//!
//! A backup captures one AVS instance into a single tar archive: the named
//! volumes of every compose service first, the instance data directory
//! last. Volume capture runs inside a snapshotter container that shares
//! the service's volumes; the data directory is appended locally.

use crate::archive::{self, TarAppender};
use crate::docker::runner::{ContainerRunner, RunError};
use crate::docker::{BackendError, ContainerBackend, Mount, RunOptions};
use crate::instance::compose::ComposeService;
use crate::instance::Instance;
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod id;
pub mod job;

pub use id::BackupId;
use job::SnapshotJobConfig;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("snapshotter image {tag} unavailable: {source}")]
    Image {
        tag: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Archive(#[from] archive::ArchiveError),

    #[error("snapshot of service {service} failed: {source}")]
    SnapshotJob {
        service: String,
        #[source]
        source: RunError,
    },

    #[error("failed to serialize snapshot job config: {0}")]
    SerializeJob(#[from] serde_json::Error),

    #[error("backup cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;

/// The container image that captures volume data, pinned at construction
/// so every service snapshot of one backup uses the same build.
#[derive(Debug, Clone)]
pub struct SnapshotterImage {
    pub tag: String,
    /// Build context for `docker build` when the tag is missing locally,
    /// typically a pinned remote git reference.
    pub build_context: String,
}

pub struct BackupOrchestrator {
    backend: Arc<dyn ContainerBackend>,
    runner: ContainerRunner,
    image: SnapshotterImage,
    backups_dir: PathBuf,
    cancel: CancellationToken,
}

impl BackupOrchestrator {
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        image: SnapshotterImage,
        backups_dir: &Path,
    ) -> Self {
        Self::with_cancel(backend, image, backups_dir, CancellationToken::new())
    }

    /// An orchestrator honoring `cancel` between services and inside each
    /// snapshotter run.
    pub fn with_cancel(
        backend: Arc<dyn ContainerBackend>,
        image: SnapshotterImage,
        backups_dir: &Path,
        cancel: CancellationToken,
    ) -> Self {
        let runner = ContainerRunner::with_cancel(backend.clone(), cancel.clone());
        Self {
            backend,
            runner,
            image,
            backups_dir: backups_dir.to_path_buf(),
            cancel,
        }
    }

    /// Capture `instance` into a freshly created archive and return the
    /// backup's identifier.
    ///
    /// Services are processed strictly one at a time; concurrent snapshot
    /// containers appending to one archive would corrupt it. On failure
    /// the partial archive is left on disk for inspection.
    pub async fn backup_instance(&self, instance: &Instance) -> Result<BackupId> {
        self.ensure_snapshotter_image().await?;

        let backup_id = BackupId::new(instance.id());
        std::fs::create_dir_all(&self.backups_dir)?;
        let archive_path = self.backups_dir.join(backup_id.archive_name());
        archive::create_empty(&archive_path)?;
        // Bind mounts need absolute paths.
        let archive_path = archive_path.canonicalize()?;

        tracing::info!(
            backup_id = %backup_id,
            archive = %archive_path.display(),
            "starting backup"
        );

        for service in &instance.compose_project().services {
            if self.cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }
            if service.volume_targets.is_empty() {
                tracing::debug!(service = %service.name, "service has no volumes, skipping");
                continue;
            }
            self.snapshot_service_volumes(&archive_path, service).await?;
        }

        if self.cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        self.append_data_dir(&archive_path, &instance.data_path())?;

        tracing::info!(backup_id = %backup_id, "backup complete");
        Ok(backup_id)
    }

    /// Make sure the pinned snapshotter image exists locally, building it
    /// from the pinned context if not.
    async fn ensure_snapshotter_image(&self) -> Result<()> {
        let image_error = |source| BackupError::Image {
            tag: self.image.tag.clone(),
            source,
        };
        if self
            .backend
            .image_exists(&self.image.tag)
            .await
            .map_err(image_error)?
        {
            return Ok(());
        }
        tracing::info!(
            tag = %self.image.tag,
            context = %self.image.build_context,
            "snapshotter image missing, building"
        );
        self.backend
            .build_image(&self.image.build_context, &self.image.tag)
            .await
            .map_err(image_error)
    }

    /// Run one snapshotter container capturing `service`'s volumes.
    async fn snapshot_service_volumes(
        &self,
        archive_path: &Path,
        service: &ComposeService,
    ) -> Result<()> {
        // Validate the archive is appendable before launching a container.
        let mut archive_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(archive_path)?;
        archive::prepare_for_append(&mut archive_file)?;
        drop(archive_file);

        let config = SnapshotJobConfig {
            prefix: format!("volumes/{}", service.name),
            output_path: job::ARCHIVE_MOUNT_PATH.to_string(),
            volumes: service.volume_targets.clone(),
        };
        // Lives until the container run completes.
        let config_file = NamedTempFile::new()?;
        serde_json::to_writer(config_file.as_file(), &config)?;

        tracing::info!(
            service = %service.name,
            volumes = service.volume_targets.len(),
            "snapshotting service volumes"
        );

        let options = RunOptions {
            image: self.image.tag.clone(),
            mounts: vec![
                Mount::bind_ro(
                    config_file.path().display().to_string(),
                    job::CONFIG_MOUNT_PATH,
                ),
                Mount::bind(archive_path.display().to_string(), job::ARCHIVE_MOUNT_PATH),
            ],
            volumes_from: vec![service.container_name.clone()],
            ..Default::default()
        };

        let result = self
            .runner
            .run(options)
            .await
            .map_err(|source| BackupError::SnapshotJob {
                service: service.name.clone(),
                source,
            })?;

        tracing::debug!(
            service = %service.name,
            logs = %result.logs,
            "snapshotter finished"
        );
        Ok(())
    }

    /// Append the instance data directory under the `data` prefix. Runs
    /// locally, after all volume snapshots.
    fn append_data_dir(&self, archive_path: &Path, data_dir: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(archive_path)?;
        archive::prepare_for_append(&mut file)?;
        let mut appender = TarAppender::new(file);
        appender.add_directory_tree(data_dir, "data")?;
        appender.finish()?;
        Ok(())
    }
}

/// A backup archive on disk.
#[derive(Debug)]
pub struct BackupEntry {
    pub file_name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Backup archives under `dir`, newest first. A missing directory is an
/// empty list, not an error.
pub fn list_backups(dir: &Path) -> Result<Vec<BackupEntry>> {
    let mut entries = Vec::new();
    if !dir.is_dir() {
        return Ok(entries);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("tar") {
            continue;
        }
        let metadata = entry.metadata()?;
        entries.push(BackupEntry {
            file_name: entry.file_name().to_string_lossy().to_string(),
            size: metadata.len(),
            modified: metadata.modified()?.into(),
        });
    }
    entries.sort_by(|a, b| b.modified.cmp(&a.modified).then(a.file_name.cmp(&b.file_name)));
    Ok(entries)
}
