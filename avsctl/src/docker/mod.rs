//! Container execution: backend abstraction and the single-shot runner.
//!
//! The [`ContainerBackend`] trait covers the handful of daemon operations the
//! tool needs (create, start, wait, logs, remove, network attach, image
//! provisioning). [`cli::DockerCli`] implements it by driving the `docker`
//! binary; [`fake::FakeBackend`] is a scripted double for tests.

pub mod cli;
pub mod runner;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{0}")]
    Command(String),

    #[error("failed to execute docker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// How a mount is provided to the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Bind,
    Volume,
}

/// A single mount declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub kind: MountKind,
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    /// Bind-mount a host path into the container.
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Bind,
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// Read-only bind-mount of a host path.
    pub fn bind_ro(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            read_only: true,
            ..Self::bind(source, target)
        }
    }

    /// Mount a named volume into the container.
    pub fn volume(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Volume,
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }
}

/// Options for one container run. Constructed fresh per invocation and owned
/// by the run call that consumes it.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub image: String,
    /// Network to join. The host network is applied at creation time; any
    /// other value is attached between creation and start.
    pub network: Option<String>,
    pub args: Vec<String>,
    pub mounts: Vec<Mount>,
    /// Containers whose volumes are reused by reference.
    pub volumes_from: Vec<String>,
    /// Daemon-side removal on exit. The runner always removes explicitly so
    /// logs can be read first; this exists for fire-and-forget callers.
    pub auto_remove: bool,
}

/// Result of a completed container run.
#[derive(Debug)]
pub struct RunResult {
    pub exit_code: i64,
    /// Combined stdout and stderr, collected after exit.
    pub logs: String,
}

/// Both halves of a container wait subscription.
///
/// Exactly one side reports: `status` yields the terminal exit code,
/// `failure` yields an infrastructure error from the wait itself. The other
/// sender is dropped once the outcome is known.
pub struct WaitChannels {
    pub status: oneshot::Receiver<i64>,
    pub failure: oneshot::Receiver<BackendError>,
}

/// Container lifecycle operations the tool depends on.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Create a container, returning its identifier.
    async fn create_container(&self, options: &RunOptions) -> Result<String, BackendError>;

    /// Attach a created container to a network.
    async fn connect_network(&self, container: &str, network: &str) -> Result<(), BackendError>;

    async fn start_container(&self, container: &str) -> Result<(), BackendError>;

    /// Subscribe to the container's next terminal state. The subscription is
    /// live immediately, so it can be taken out before start.
    async fn wait_container(&self, container: &str) -> WaitChannels;

    /// Collect the container's combined output. Returns once the stream is
    /// exhausted; never follows a live container.
    async fn container_logs(&self, container: &str) -> Result<String, BackendError>;

    /// Force-remove a container.
    async fn remove_container(&self, container: &str) -> Result<(), BackendError>;

    async fn image_exists(&self, image: &str) -> Result<bool, BackendError>;

    /// Build `tag` from a build context (local path or pinned remote
    /// reference).
    async fn build_image(&self, context: &str, tag: &str) -> Result<(), BackendError>;
}
