//! On-disk registry of deployed AVS instances.
//!
//! Each instance lives under `<data_dir>/instances/<id>/`: an
//! `instance.json` manifest describing it, the `docker-compose.yml` it was
//! launched with, and a `data/` directory holding node state that backups
//! capture.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod compose;

use compose::ComposeProject;

pub const MANIFEST_FILE: &str = "instance.json";
pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const DATA_DIR: &str = "data";

#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("instance {0} not found")]
    NotFound(String),

    #[error("invalid manifest for instance {id}: {source}")]
    InvalidManifest {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, InstanceError>;

/// Persisted description of one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceManifest {
    pub id: String,
    /// Node software version the instance was deployed with.
    pub version: String,
    pub compose: ComposeProject,
}

/// An instance loaded from the store, rooted at its directory.
#[derive(Debug, Clone)]
pub struct Instance {
    root: PathBuf,
    manifest: InstanceManifest,
}

impl Instance {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    pub fn compose_project(&self) -> &ComposeProject {
        &self.manifest.compose
    }

    /// Directory holding node state, captured under `data` in backups.
    pub fn data_path(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn compose_file(&self) -> PathBuf {
        self.root.join(COMPOSE_FILE)
    }
}

/// Reads instances from `<data_dir>/instances`.
pub struct InstanceStore {
    instances_dir: PathBuf,
}

impl InstanceStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            instances_dir: data_dir.join("instances"),
        }
    }

    pub fn load(&self, id: &str) -> Result<Instance> {
        let root = self.instances_dir.join(id);
        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(InstanceError::NotFound(id.to_string()));
        }
        let raw = fs::read_to_string(&manifest_path)?;
        let manifest: InstanceManifest =
            serde_json::from_str(&raw).map_err(|source| InstanceError::InvalidManifest {
                id: id.to_string(),
                source,
            })?;
        Ok(Instance { root, manifest })
    }

    /// All instances with a readable manifest, ordered by id.
    ///
    /// Directories without a manifest are skipped silently; unreadable
    /// manifests are skipped with a warning so one corrupt instance does
    /// not hide the rest.
    pub fn list(&self) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        if !self.instances_dir.is_dir() {
            return Ok(instances);
        }
        for entry in fs::read_dir(&self.instances_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            match self.load(&id) {
                Ok(instance) => instances.push(instance),
                Err(InstanceError::NotFound(_)) => {
                    tracing::debug!(id = %id, "directory has no manifest, skipping");
                }
                Err(InstanceError::InvalidManifest { source, .. }) => {
                    tracing::warn!(id = %id, error = %source, "unreadable manifest, skipping");
                }
                Err(err) => return Err(err),
            }
        }
        instances.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_instance(data_dir: &Path, id: &str, version: &str) -> std::io::Result<()> {
        let root = data_dir.join("instances").join(id);
        fs::create_dir_all(root.join(DATA_DIR))?;
        let manifest = serde_json::json!({
            "id": id,
            "version": version,
            "compose": {
                "services": [{
                    "name": "node",
                    "container_name": format!("{}-node", id),
                    "volume_targets": ["/var/lib/node"]
                }],
                "network": format!("{}-net", id)
            }
        });
        fs::write(root.join(MANIFEST_FILE), manifest.to_string())?;
        fs::write(root.join(COMPOSE_FILE), "services: {}\n")?;
        Ok(())
    }

    #[test]
    fn test_load_reads_manifest_and_paths() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        write_instance(dir.path(), "avs-main", "1.4.2")?;

        let store = InstanceStore::new(dir.path());
        let instance = store.load("avs-main").unwrap();

        assert_eq!(instance.id(), "avs-main");
        assert_eq!(instance.version(), "1.4.2");
        assert_eq!(
            instance.compose_project().network.as_deref(),
            Some("avs-main-net")
        );
        let service = instance.compose_project().service("node").unwrap();
        assert_eq!(service.container_name, "avs-main-node");
        assert_eq!(service.volume_targets, vec!["/var/lib/node"]);

        assert!(instance.data_path().ends_with("avs-main/data"));
        assert!(instance.compose_file().ends_with("avs-main/docker-compose.yml"));
        Ok(())
    }

    #[test]
    fn test_load_missing_instance() {
        let dir = TempDir::new().unwrap();
        let store = InstanceStore::new(dir.path());
        let err = store.load("ghost").unwrap_err();
        assert!(matches!(err, InstanceError::NotFound(id) if id == "ghost"));
    }

    #[test]
    fn test_load_invalid_manifest() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let root = dir.path().join("instances").join("broken");
        fs::create_dir_all(&root)?;
        fs::write(root.join(MANIFEST_FILE), "{ not json")?;

        let store = InstanceStore::new(dir.path());
        let err = store.load("broken").unwrap_err();
        assert!(matches!(err, InstanceError::InvalidManifest { .. }));
        Ok(())
    }

    #[test]
    fn test_list_sorts_and_skips_incomplete() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        write_instance(dir.path(), "beta", "2.0.0")?;
        write_instance(dir.path(), "alpha", "1.0.0")?;
        fs::create_dir_all(dir.path().join("instances").join("half-deployed"))?;

        let store = InstanceStore::new(dir.path());
        let instances = store.list().unwrap();
        let ids: Vec<&str> = instances.iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
        Ok(())
    }

    #[test]
    fn test_list_without_store_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = InstanceStore::new(&dir.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }
}
