//! Tool configuration.
//!
//! Loaded from a TOML file; every section and field has a default so a
//! missing or partial file still yields a working setup. A couple of
//! environment variables override the settings operators change most.

use crate::backup::SnapshotterImage;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Image tag the backup orchestrator launches for volume snapshots.
const DEFAULT_SNAPSHOTTER_IMAGE: &str = "ghcr.io/avs-ops/avsctl-snapshotter:1.0.0";
/// Pinned build context used to rebuild the snapshotter image locally.
const DEFAULT_SNAPSHOTTER_CONTEXT: &str = "https://github.com/avs-ops/avsctl.git#v1.0.0";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Root of all tool state: instance directories and backup archives.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker binary to invoke.
    #[serde(default = "default_docker_binary")]
    pub binary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_snapshotter_image")]
    pub snapshotter_image: String,
    #[serde(default = "default_snapshotter_context")]
    pub snapshotter_build_context: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/avsctl")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_snapshotter_image() -> String {
    DEFAULT_SNAPSHOTTER_IMAGE.to_string()
}

fn default_snapshotter_context() -> String {
    DEFAULT_SNAPSHOTTER_CONTEXT.to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            snapshotter_image: default_snapshotter_image(),
            snapshotter_build_context: default_snapshotter_context(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Environment overrides, applied after file loading.
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("AVSCTL_DATA_DIR") {
            self.general.data_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("AVSCTL_LOG_LEVEL") {
            self.general.log_level = level;
        }
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.general.data_dir.join("backups")
    }

    pub fn snapshotter_image(&self) -> SnapshotterImage {
        SnapshotterImage {
            tag: self.backup.snapshotter_image.clone(),
            build_context: self.backup.snapshotter_build_context.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.general.data_dir, PathBuf::from("/var/lib/avsctl"));
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.docker.binary, "docker");
        assert_eq!(config.backups_dir(), PathBuf::from("/var/lib/avsctl/backups"));
        assert_eq!(config.snapshotter_image().tag, DEFAULT_SNAPSHOTTER_IMAGE);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [general]
            data_dir = "/srv/avs"

            [backup]
            snapshotter_image = "avsctl-snapshotter:dev"
            "#,
        )
        .unwrap();
        assert_eq!(config.general.data_dir, PathBuf::from("/srv/avs"));
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.docker.binary, "docker");
        assert_eq!(config.backup.snapshotter_image, "avsctl-snapshotter:dev");
        assert_eq!(
            config.backup.snapshotter_build_context,
            DEFAULT_SNAPSHOTTER_CONTEXT
        );
    }

    #[test]
    fn test_from_file_missing() {
        assert!(Config::from_file(Path::new("/nonexistent/avsctl.toml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        std::env::set_var("AVSCTL_DATA_DIR", "/mnt/avs");
        config.apply_env();
        std::env::remove_var("AVSCTL_DATA_DIR");
        assert_eq!(config.general.data_dir, PathBuf::from("/mnt/avs"));
    }
}
