//! avsctl library
//!
//! Lifecycle management and point-in-time backups for dockerized AVS
//! instances.

pub mod archive;
pub mod backup;
pub mod commands;
pub mod config;
pub mod docker;
pub mod instance;
pub mod utils;

// Re-export commonly used types
pub use backup::id::BackupId;
pub use backup::BackupOrchestrator;
pub use config::Config;
pub use docker::runner::ContainerRunner;
pub use instance::InstanceStore;
