//! `avsctl run`: one-off task containers against an instance.

use crate::config::Config;
use crate::docker::cli::DockerCli;
use crate::docker::runner::ContainerRunner;
use crate::docker::RunOptions;
use crate::instance::InstanceStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run a one-off container on the instance's network, print its combined
/// output, and fail if it exits non-zero. The container is removed
/// whatever the outcome.
pub async fn run(
    config: &Config,
    instance_id: &str,
    image: &str,
    args: Vec<String>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let instance = InstanceStore::new(&config.general.data_dir).load(instance_id)?;

    let backend = Arc::new(DockerCli::new(&config.docker.binary));
    let runner = ContainerRunner::with_cancel(backend, cancel);
    let options = RunOptions {
        image: image.to_string(),
        network: instance.compose_project().network.clone(),
        args,
        ..Default::default()
    };

    let result = runner.run(options).await?;
    if !result.logs.is_empty() {
        print!("{}", result.logs);
    }
    Ok(())
}
