//! Model of the compose project an instance runs.
//!
//! Only the parts the tool acts on are modeled: service names for archive
//! prefixes, container names for volume sharing, volume mount targets for
//! snapshotting, and the project network for one-off task containers.

use serde::{Deserialize, Serialize};

/// One service of an instance's compose project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeService {
    pub name: String,
    /// Name the service's container runs under, used for `--volumes-from`.
    pub container_name: String,
    /// Mount targets of the named volumes this service owns, as absolute
    /// paths inside the container.
    #[serde(default)]
    pub volume_targets: Vec<String>,
}

/// The subset of a compose project the tool operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeProject {
    pub services: Vec<ComposeService>,
    /// Network the project's containers join; `None` means the engine
    /// default.
    #[serde(default)]
    pub network: Option<String>,
}

impl ComposeProject {
    pub fn service(&self, name: &str) -> Option<&ComposeService> {
        self.services.iter().find(|s| s.name == name)
    }
}
