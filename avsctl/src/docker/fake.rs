//! Scripted in-memory container backend for tests.

use super::{BackendError, ContainerBackend, RunOptions, WaitChannels};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Backend operation a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Create,
    ConnectNetwork,
    Start,
    Wait,
    Logs,
    Remove,
    Build,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    containers: HashMap<String, RunOptions>,
    captured_configs: Vec<String>,
    parked: Vec<(oneshot::Sender<i64>, oneshot::Sender<BackendError>)>,
    built: Vec<(String, String)>,
    next_id: u32,
}

/// In-memory [`ContainerBackend`] that records every call and fails on
/// demand at a chosen operation.
///
/// With [`FakeBackend::simulate_snapshotter`], starting a container also
/// performs the snapshotter contract against the bound archive file, so
/// orchestrator tests can inspect real archive contents.
pub struct FakeBackend {
    state: Mutex<FakeState>,
    fail_at: Option<FailPoint>,
    exit_code: i64,
    logs: String,
    wait_forever: bool,
    images: Vec<String>,
    snapshot_targets: Option<(String, String)>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// A backend whose containers exit 0 with no output.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            fail_at: None,
            exit_code: 0,
            logs: String::new(),
            wait_forever: false,
            images: Vec::new(),
            snapshot_targets: None,
        }
    }

    /// A backend whose containers exit with `exit_code` and produce `logs`.
    pub fn with_exit(exit_code: i64, logs: impl Into<String>) -> Self {
        Self {
            exit_code,
            logs: logs.into(),
            ..Self::new()
        }
    }

    /// Fail the given operation with a scripted error.
    pub fn fail_at(mut self, point: FailPoint) -> Self {
        self.fail_at = Some(point);
        self
    }

    /// Never resolve wait subscriptions; used to exercise cancellation.
    pub fn wait_forever(mut self) -> Self {
        self.wait_forever = true;
        self
    }

    /// Mark an image as already present.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.images.push(image.into());
        self
    }

    /// On start, read the job config bound at `config_target` and append one
    /// entry per configured volume to the archive bound at `archive_target`.
    pub fn simulate_snapshotter(
        mut self,
        config_target: impl Into<String>,
        archive_target: impl Into<String>,
    ) -> Self {
        self.snapshot_targets = Some((config_target.into(), archive_target.into()));
        self
    }

    /// Every recorded call, in invocation order, as `"<op> <args>"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// How many times `op` was invoked.
    pub fn call_count(&self, op: &str) -> usize {
        let prefix = format!("{} ", op);
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == op || c.starts_with(&prefix))
            .count()
    }

    /// Raw contents of each job config seen at container creation.
    pub fn captured_configs(&self) -> Vec<String> {
        self.state.lock().unwrap().captured_configs.clone()
    }

    /// `(context, tag)` pairs passed to build_image.
    pub fn built_images(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().built.clone()
    }

    /// The options a container was created with.
    pub fn container_options(&self, container: &str) -> Option<RunOptions> {
        self.state.lock().unwrap().containers.get(container).cloned()
    }

    fn fails(&self, point: FailPoint) -> bool {
        self.fail_at == Some(point)
    }

    fn scripted_error(op: &str) -> BackendError {
        BackendError::Command(format!("scripted {} failure", op))
    }

    fn write_snapshot_entries(&self, options: &RunOptions, config_target: &str, archive_target: &str) {
        let config_source = options
            .mounts
            .iter()
            .find(|m| m.target == config_target)
            .map(|m| m.source.clone());
        let archive_source = options
            .mounts
            .iter()
            .find(|m| m.target == archive_target)
            .map(|m| m.source.clone());
        let (Some(config_source), Some(archive_source)) = (config_source, archive_source) else {
            return;
        };

        let content = std::fs::read_to_string(config_source).unwrap();
        let config: serde_json::Value = serde_json::from_str(&content).unwrap();
        let prefix = config["prefix"].as_str().unwrap();
        let volumes = config["volumes"].as_array().unwrap();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(archive_source)
            .unwrap();
        crate::archive::prepare_for_append(&mut file).unwrap();

        let mut builder = tar::Builder::new(file);
        for volume in volumes {
            let target = volume.as_str().unwrap();
            let name = format!("{}/{}", prefix, target.trim_start_matches('/'));
            let mut header = tar::Header::new_gnu();
            header.set_size(0);
            header.set_mode(0o644);
            builder.append_data(&mut header, &name, std::io::empty()).unwrap();
        }
        builder.finish().unwrap();
    }
}

#[async_trait]
impl ContainerBackend for FakeBackend {
    async fn create_container(&self, options: &RunOptions) -> Result<String, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create {}", options.image));
        if self.fails(FailPoint::Create) {
            return Err(Self::scripted_error("create"));
        }

        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);

        if let Some((config_target, _)) = &self.snapshot_targets {
            for mount in &options.mounts {
                if &mount.target == config_target {
                    if let Ok(content) = std::fs::read_to_string(&mount.source) {
                        state.captured_configs.push(content);
                    }
                }
            }
        }

        state.containers.insert(id.clone(), options.clone());
        Ok(id)
    }

    async fn connect_network(&self, container: &str, network: &str) -> Result<(), BackendError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("connect_network {} {}", network, container));
        if self.fails(FailPoint::ConnectNetwork) {
            return Err(Self::scripted_error("network connect"));
        }
        Ok(())
    }

    async fn start_container(&self, container: &str) -> Result<(), BackendError> {
        let options = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("start {}", container));
            state.containers.get(container).cloned()
        };
        if self.fails(FailPoint::Start) {
            return Err(Self::scripted_error("start"));
        }

        if let Some((config_target, archive_target)) = self.snapshot_targets.clone() {
            if let Some(options) = options {
                self.write_snapshot_entries(&options, &config_target, &archive_target);
            }
        }
        Ok(())
    }

    async fn wait_container(&self, container: &str) -> WaitChannels {
        let (status_tx, status_rx) = oneshot::channel();
        let (failure_tx, failure_rx) = oneshot::channel();

        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("wait {}", container));

        if self.fails(FailPoint::Wait) {
            let _ = failure_tx.send(Self::scripted_error("wait"));
        } else if self.wait_forever {
            // Keep the senders alive so neither channel ever resolves.
            state.parked.push((status_tx, failure_tx));
        } else {
            let _ = status_tx.send(self.exit_code);
        }

        WaitChannels {
            status: status_rx,
            failure: failure_rx,
        }
    }

    async fn container_logs(&self, container: &str) -> Result<String, BackendError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("logs {}", container));
        if self.fails(FailPoint::Logs) {
            return Err(Self::scripted_error("logs"));
        }
        Ok(self.logs.clone())
    }

    async fn remove_container(&self, container: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("remove {}", container));
        if self.fails(FailPoint::Remove) {
            return Err(Self::scripted_error("remove"));
        }
        // Options stay behind as a creation record for assertions.
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, BackendError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("image_exists {}", image));
        Ok(self.images.iter().any(|i| i == image))
    }

    async fn build_image(&self, context: &str, tag: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("build {}", tag));
        if self.fails(FailPoint::Build) {
            return Err(Self::scripted_error("build"));
        }
        state.built.push((context.to_string(), tag.to_string()));
        Ok(())
    }
}
