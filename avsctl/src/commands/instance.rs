//! `avsctl instance` subcommands.

use crate::config::Config;
use crate::instance::{Instance, InstanceStore};
use anyhow::bail;
use std::path::Path;
use tokio::process::Command;

/// List deployed instances.
pub fn list(config: &Config) -> anyhow::Result<()> {
    let store = InstanceStore::new(&config.general.data_dir);
    let instances = store.list()?;
    if instances.is_empty() {
        println!("no instances deployed");
        return Ok(());
    }
    for instance in instances {
        println!("{}  {}", instance.id(), instance.version());
    }
    Ok(())
}

/// Start an instance's services in the background.
pub async fn up(config: &Config, instance_id: &str) -> anyhow::Result<()> {
    let instance = InstanceStore::new(&config.general.data_dir).load(instance_id)?;
    compose(config, &instance, &["up", "-d"]).await
}

/// Stop an instance's services without removing them.
pub async fn stop(config: &Config, instance_id: &str) -> anyhow::Result<()> {
    let instance = InstanceStore::new(&config.general.data_dir).load(instance_id)?;
    compose(config, &instance, &["stop"]).await
}

/// Run `docker compose` against the instance's compose file, inheriting
/// stdio so compose progress reaches the operator directly.
async fn compose(config: &Config, instance: &Instance, args: &[&str]) -> anyhow::Result<()> {
    let compose_file = instance.compose_file();
    if !compose_file.is_file() {
        bail!("instance {} has no compose file", instance.id());
    }

    tracing::debug!(instance = %instance.id(), command = ?args, "running docker compose");
    let full_args = compose_args(&compose_file, instance.id(), args);
    let status = Command::new(&config.docker.binary)
        .args(&full_args)
        .status()
        .await?;
    if !status.success() {
        bail!(
            "docker compose {} failed for instance {}",
            args.join(" "),
            instance.id()
        );
    }
    Ok(())
}

/// `compose -f <file> -p <project> <args...>`, with the instance id as
/// the project name so compose resources stay namespaced per instance.
fn compose_args(compose_file: &Path, project: &str, args: &[&str]) -> Vec<String> {
    let mut full = vec![
        "compose".to_string(),
        "-f".to_string(),
        compose_file.display().to_string(),
        "-p".to_string(),
        project.to_string(),
    ];
    full.extend(args.iter().map(|a| a.to_string()));
    full
}
