//! Wire contract between the orchestrator and the snapshotter container.

use serde::{Deserialize, Serialize};

/// Where the orchestrator bind-mounts the job config inside the
/// snapshotter container.
pub const CONFIG_MOUNT_PATH: &str = "/snapshot/config.json";

/// Where the orchestrator bind-mounts the backup archive inside the
/// snapshotter container.
pub const ARCHIVE_MOUNT_PATH: &str = "/snapshot/backup.tar";

/// Instructions for one snapshotter run, serialized to JSON and mounted
/// read-only into the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotJobConfig {
    /// Archive entry prefix for everything this job appends.
    pub prefix: String,
    /// Path of the archive as seen inside the container.
    #[serde(rename = "out")]
    pub output_path: String,
    /// Volume mount targets to capture, as seen inside the container.
    pub volumes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let config = SnapshotJobConfig {
            prefix: "volumes/node".to_string(),
            output_path: ARCHIVE_MOUNT_PATH.to_string(),
            volumes: vec!["/var/lib/node".to_string()],
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["prefix"], "volumes/node");
        assert_eq!(value["out"], "/snapshot/backup.tar");
        assert_eq!(value["volumes"][0], "/var/lib/node");
    }
}
