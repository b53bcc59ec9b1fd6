//! Container backend driving the `docker` CLI.

use super::{BackendError, ContainerBackend, MountKind, RunOptions, WaitChannels};
use async_trait::async_trait;
use tokio::sync::oneshot;

/// Backend that shells out to the `docker` binary.
///
/// Every operation is a single CLI invocation; `docker wait` blocks until the
/// container exits, which gives the wait subscription its own task.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run a docker CLI command and return stdout on success.
    async fn run_docker(&self, args: &[&str]) -> Result<String, BackendError> {
        let output = tokio::process::Command::new(&self.binary)
            .args(args)
            .output()
            .await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(BackendError::Command(format!(
                "docker {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl ContainerBackend for DockerCli {
    async fn create_container(&self, options: &RunOptions) -> Result<String, BackendError> {
        let mut args: Vec<String> = vec!["create".to_string()];

        if options.auto_remove {
            args.push("--rm".to_string());
        }

        // The host network cannot be attached after creation, so it is set
        // here; other networks go through connect_network before start.
        if options.network.as_deref() == Some("host") {
            args.push("--network".to_string());
            args.push("host".to_string());
        }

        for mount in &options.mounts {
            let kind = match mount.kind {
                MountKind::Bind => "bind",
                MountKind::Volume => "volume",
            };
            let mut spec = format!(
                "type={},source={},target={}",
                kind, mount.source, mount.target
            );
            if mount.read_only {
                spec.push_str(",readonly");
            }
            args.push("--mount".to_string());
            args.push(spec);
        }

        for container in &options.volumes_from {
            args.push("--volumes-from".to_string());
            args.push(container.clone());
        }

        args.push(options.image.clone());
        args.extend(options.args.iter().cloned());

        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_docker(&refs).await
    }

    async fn connect_network(&self, container: &str, network: &str) -> Result<(), BackendError> {
        self.run_docker(&["network", "connect", network, container])
            .await?;
        Ok(())
    }

    async fn start_container(&self, container: &str) -> Result<(), BackendError> {
        self.run_docker(&["start", container]).await?;
        Ok(())
    }

    async fn wait_container(&self, container: &str) -> WaitChannels {
        let (status_tx, status_rx) = oneshot::channel();
        let (failure_tx, failure_rx) = oneshot::channel();

        // `docker wait` blocks until the container reaches a terminal state
        // and prints the exit code.
        let backend = self.clone();
        let container = container.to_string();
        tokio::spawn(async move {
            match backend.run_docker(&["wait", &container]).await {
                Ok(output) => match output.parse::<i64>() {
                    Ok(code) => {
                        let _ = status_tx.send(code);
                    }
                    Err(_) => {
                        let _ = failure_tx.send(BackendError::Command(format!(
                            "docker wait returned unparseable status {:?} for {}",
                            output, container
                        )));
                    }
                },
                Err(e) => {
                    let _ = failure_tx.send(e);
                }
            }
        });

        WaitChannels {
            status: status_rx,
            failure: failure_rx,
        }
    }

    async fn container_logs(&self, container: &str) -> Result<String, BackendError> {
        // `docker logs` demultiplexes the container's stdout onto our stdout
        // and its stderr onto our stderr; combine them.
        let output = tokio::process::Command::new(&self.binary)
            .args(["logs", container])
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Command(format!(
                "docker logs failed for {}: {}",
                container,
                stderr.trim()
            )));
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(combined)
    }

    async fn remove_container(&self, container: &str) -> Result<(), BackendError> {
        self.run_docker(&["rm", "-f", container]).await?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, BackendError> {
        match self.run_docker(&["image", "inspect", image]).await {
            Ok(_) => Ok(true),
            Err(BackendError::Command(message)) if message.contains("No such image") => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn build_image(&self, context: &str, tag: &str) -> Result<(), BackendError> {
        self.run_docker(&["build", "-t", tag, context]).await?;
        Ok(())
    }
}
