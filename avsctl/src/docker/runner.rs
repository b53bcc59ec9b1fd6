//! Single-shot container execution with guaranteed cleanup.
//!
//! One [`ContainerRunner::run`] call drives a container through
//! create, optional network attach, start, wait, log collection, and
//! removal. Every failure after creation triggers removal of the container
//! before the error surfaces, so no invocation can leak a container.

use super::{BackendError, ContainerBackend, RunOptions, RunResult, WaitChannels};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to create container from {image}: {source}")]
    Create {
        image: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to connect container {container} to network {network}: {source}")]
    ConnectNetwork {
        container: String,
        network: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to start container {container}: {source}")]
    Start {
        container: String,
        #[source]
        source: BackendError,
    },

    #[error("waiting for container {container} failed: {source}")]
    Wait {
        container: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to collect logs from container {container}: {source}")]
    CollectLogs {
        container: String,
        #[source]
        source: BackendError,
    },

    #[error("container {container} exited with code {code}; logs:\n{logs}")]
    ExitedNonZero {
        container: String,
        code: i64,
        logs: String,
    },

    #[error("failed to remove container {container}: {source}")]
    Remove {
        container: String,
        #[source]
        source: BackendError,
    },

    /// Cleanup removal failed while handling another error. The primary
    /// error comes first; the orphaned container is a resource leak the
    /// operator must know about.
    #[error("{primary}; additionally, removing container {container} failed: {remove_error}")]
    RemoveAfterFailure {
        container: String,
        primary: Box<RunError>,
        remove_error: BackendError,
    },

    #[error("run cancelled while container {container} was active")]
    Cancelled { container: String },
}

/// Runs one container to completion against a [`ContainerBackend`].
pub struct ContainerRunner {
    backend: Arc<dyn ContainerBackend>,
    cancel: CancellationToken,
}

impl ContainerRunner {
    pub fn new(backend: Arc<dyn ContainerBackend>) -> Self {
        Self::with_cancel(backend, CancellationToken::new())
    }

    /// A runner whose in-flight wait honors `cancel`: a cancelled run still
    /// removes its container before surfacing the cancellation.
    pub fn with_cancel(backend: Arc<dyn ContainerBackend>, cancel: CancellationToken) -> Self {
        Self { backend, cancel }
    }

    /// Run a container to its terminal state, collect its combined output,
    /// and remove it.
    ///
    /// A non-zero exit code is an error carrying the code and the collected
    /// logs. Creation failure returns immediately; any later failure removes
    /// the container first, and a removal failure during that cleanup is
    /// reported alongside the primary error.
    pub async fn run(&self, options: RunOptions) -> Result<RunResult, RunError> {
        let container = self
            .backend
            .create_container(&options)
            .await
            .map_err(|source| RunError::Create {
                image: options.image.clone(),
                source,
            })?;

        tracing::debug!(container = %container, image = %options.image, "container created");

        match self.drive_to_exit(&container, &options).await {
            Ok(result) => {
                self.backend
                    .remove_container(&container)
                    .await
                    .map_err(|source| RunError::Remove {
                        container: container.clone(),
                        source,
                    })?;
                tracing::debug!(container = %container, "container removed");
                Ok(result)
            }
            Err(primary) => Err(self.remove_after_failure(&container, primary).await),
        }
    }

    /// Everything between creation and removal. Errors returned from here
    /// have a live container behind them that the caller must remove.
    async fn drive_to_exit(
        &self,
        container: &str,
        options: &RunOptions,
    ) -> Result<RunResult, RunError> {
        if let Some(network) = options.network.as_deref() {
            if network != "host" {
                self.backend
                    .connect_network(container, network)
                    .await
                    .map_err(|source| RunError::ConnectNetwork {
                        container: container.to_string(),
                        network: network.to_string(),
                        source,
                    })?;
            }
        }

        // Subscribe before start: the container may exit before the start
        // acknowledgment is observed.
        let WaitChannels {
            mut status,
            mut failure,
        } = self.backend.wait_container(container).await;

        self.backend
            .start_container(container)
            .await
            .map_err(|source| RunError::Start {
                container: container.to_string(),
                source,
            })?;

        tracing::debug!(container = %container, "container started, waiting for exit");

        // Race the two wait channels; the first to yield a value is
        // authoritative. A channel closing without a value is not an
        // outcome; it means the backend reported on the other side.
        let exit_code = tokio::select! {
            result = &mut status => match result {
                Ok(code) => code,
                Err(_) => return Err(self.failure_outcome(container, failure).await),
            },
            result = &mut failure => match result {
                Ok(source) => {
                    return Err(RunError::Wait {
                        container: container.to_string(),
                        source,
                    })
                }
                Err(_) => self.status_outcome(container, status).await?,
            },
            _ = self.cancel.cancelled() => {
                return Err(RunError::Cancelled {
                    container: container.to_string(),
                })
            }
        };

        let logs = self
            .backend
            .container_logs(container)
            .await
            .map_err(|source| RunError::CollectLogs {
                container: container.to_string(),
                source,
            })?;

        if exit_code != 0 {
            return Err(RunError::ExitedNonZero {
                container: container.to_string(),
                code: exit_code,
                logs,
            });
        }

        Ok(RunResult { exit_code, logs })
    }

    /// The status channel closed without a value; the outcome is on the
    /// failure channel.
    async fn failure_outcome(
        &self,
        container: &str,
        failure: oneshot::Receiver<BackendError>,
    ) -> RunError {
        let source = failure.await.unwrap_or_else(|_| {
            BackendError::Command("wait subscription closed without reporting an outcome".to_string())
        });
        RunError::Wait {
            container: container.to_string(),
            source,
        }
    }

    /// The failure channel closed without a value; the outcome is on the
    /// status channel.
    async fn status_outcome(
        &self,
        container: &str,
        status: oneshot::Receiver<i64>,
    ) -> Result<i64, RunError> {
        status.await.map_err(|_| RunError::Wait {
            container: container.to_string(),
            source: BackendError::Command(
                "wait subscription closed without reporting an outcome".to_string(),
            ),
        })
    }

    /// Best-effort removal while handling `primary`. A removal failure is
    /// wrapped around the primary error, reported after it.
    async fn remove_after_failure(&self, container: &str, primary: RunError) -> RunError {
        match self.backend.remove_container(container).await {
            Ok(()) => {
                tracing::debug!(container = %container, "container removed after failure");
                primary
            }
            Err(remove_error) => {
                tracing::warn!(
                    container = %container,
                    error = %remove_error,
                    "cleanup removal failed, container may be orphaned"
                );
                RunError::RemoveAfterFailure {
                    container: container.to_string(),
                    primary: Box::new(primary),
                    remove_error,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::fake::{FailPoint, FakeBackend};

    fn options(image: &str) -> RunOptions {
        RunOptions {
            image: image.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_successful_run_collects_logs_and_removes() {
        let fake = Arc::new(FakeBackend::with_exit(0, "all good"));
        let runner = ContainerRunner::new(fake.clone());

        let result = runner.run(options("snapshotter:test")).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.logs, "all good");

        assert_eq!(fake.call_count("create"), 1);
        assert_eq!(fake.call_count("start"), 1);
        assert_eq!(fake.call_count("logs"), 1);
        assert_eq!(fake.call_count("remove"), 1);
        assert_eq!(fake.call_count("connect_network"), 0);
    }

    #[tokio::test]
    async fn test_create_failure_removes_nothing() {
        let fake = Arc::new(FakeBackend::new().fail_at(FailPoint::Create));
        let runner = ContainerRunner::new(fake.clone());

        let err = runner.run(options("snapshotter:test")).await.unwrap_err();
        assert!(matches!(err, RunError::Create { .. }));
        assert_eq!(fake.call_count("remove"), 0);
    }

    #[tokio::test]
    async fn test_network_attach_failure_removes_once() {
        let fake = Arc::new(FakeBackend::new().fail_at(FailPoint::ConnectNetwork));
        let runner = ContainerRunner::new(fake.clone());

        let mut opts = options("task:test");
        opts.network = Some("avs-net".to_string());

        let err = runner.run(opts).await.unwrap_err();
        assert!(matches!(err, RunError::ConnectNetwork { .. }));
        assert_eq!(fake.call_count("remove"), 1);
        assert_eq!(fake.call_count("start"), 0);
    }

    #[tokio::test]
    async fn test_start_failure_removes_once() {
        let fake = Arc::new(FakeBackend::new().fail_at(FailPoint::Start));
        let runner = ContainerRunner::new(fake.clone());

        let err = runner.run(options("snapshotter:test")).await.unwrap_err();
        assert!(matches!(err, RunError::Start { .. }));
        assert_eq!(fake.call_count("remove"), 1);
    }

    #[tokio::test]
    async fn test_wait_failure_removes_once() {
        let fake = Arc::new(FakeBackend::new().fail_at(FailPoint::Wait));
        let runner = ContainerRunner::new(fake.clone());

        let err = runner.run(options("snapshotter:test")).await.unwrap_err();
        assert!(matches!(err, RunError::Wait { .. }));
        assert_eq!(fake.call_count("remove"), 1);
        assert_eq!(fake.call_count("logs"), 0);
    }

    #[tokio::test]
    async fn test_log_collection_failure_removes_once() {
        let fake = Arc::new(FakeBackend::new().fail_at(FailPoint::Logs));
        let runner = ContainerRunner::new(fake.clone());

        let err = runner.run(options("snapshotter:test")).await.unwrap_err();
        assert!(matches!(err, RunError::CollectLogs { .. }));
        assert_eq!(fake.call_count("remove"), 1);
    }

    #[tokio::test]
    async fn test_nonzero_exit_embeds_code_and_logs() {
        let fake = Arc::new(FakeBackend::with_exit(1, "boom"));
        let runner = ContainerRunner::new(fake.clone());

        let err = runner.run(options("snapshotter:test")).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains('1'), "missing exit code: {}", message);
        assert!(message.contains("boom"), "missing logs: {}", message);

        // Logs must be read before the container is removed.
        let calls = fake.calls();
        let logs_pos = calls.iter().position(|c| c.starts_with("logs")).unwrap();
        let remove_pos = calls.iter().position(|c| c.starts_with("remove")).unwrap();
        assert!(logs_pos < remove_pos);
        assert_eq!(fake.call_count("remove"), 1);
    }

    #[tokio::test]
    async fn test_host_network_skips_connect() {
        let fake = Arc::new(FakeBackend::new());
        let runner = ContainerRunner::new(fake.clone());

        let mut opts = options("task:test");
        opts.network = Some("host".to_string());

        runner.run(opts).await.unwrap();
        assert_eq!(fake.call_count("connect_network"), 0);
    }

    #[tokio::test]
    async fn test_named_network_connects_before_start() {
        let fake = Arc::new(FakeBackend::new());
        let runner = ContainerRunner::new(fake.clone());

        let mut opts = options("task:test");
        opts.network = Some("avs-net".to_string());

        runner.run(opts).await.unwrap();

        let calls = fake.calls();
        let connect_pos = calls
            .iter()
            .position(|c| c.starts_with("connect_network avs-net"))
            .unwrap();
        let start_pos = calls.iter().position(|c| c.starts_with("start")).unwrap();
        assert!(connect_pos < start_pos);
    }

    #[tokio::test]
    async fn test_cancelled_run_still_removes() {
        let fake = Arc::new(FakeBackend::new().wait_forever());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = ContainerRunner::with_cancel(fake.clone(), cancel);

        let err = runner.run(options("snapshotter:test")).await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled { .. }));
        assert_eq!(fake.call_count("remove"), 1);
    }

    #[tokio::test]
    async fn test_remove_failure_on_success_path_is_an_error() {
        let fake = Arc::new(FakeBackend::new().fail_at(FailPoint::Remove));
        let runner = ContainerRunner::new(fake.clone());

        let err = runner.run(options("snapshotter:test")).await.unwrap_err();
        assert!(matches!(err, RunError::Remove { .. }));
    }

    #[tokio::test]
    async fn test_remove_failure_during_cleanup_reports_both() {
        let fake = Arc::new(FakeBackend::with_exit(3, "crashed").fail_at(FailPoint::Remove));
        let runner = ContainerRunner::new(fake.clone());

        let err = runner.run(options("snapshotter:test")).await.unwrap_err();
        let RunError::RemoveAfterFailure { primary, .. } = &err else {
            panic!("expected RemoveAfterFailure, got {:?}", err);
        };
        assert!(matches!(**primary, RunError::ExitedNonZero { code: 3, .. }));

        // Primary error first, removal failure after it.
        let message = err.to_string();
        let primary_pos = message.find("exited with code 3").unwrap();
        let remove_pos = message.find("scripted remove failure").unwrap();
        assert!(primary_pos < remove_pos);
    }
}
