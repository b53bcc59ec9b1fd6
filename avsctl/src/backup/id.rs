//! Backup identity and archive naming.

use chrono::{DateTime, Utc};
use std::fmt;

/// Identifier of one point-in-time backup: the instance it captures plus
/// the moment capture started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupId {
    instance_id: String,
    timestamp: DateTime<Utc>,
}

impl BackupId {
    pub fn new(instance_id: &str) -> Self {
        Self::at(instance_id, Utc::now())
    }

    pub fn at(instance_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            timestamp,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// File name of the archive holding this backup.
    pub fn archive_name(&self) -> String {
        format!("{}.tar", self)
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}",
            self.instance_id,
            self.timestamp.format("%Y-%m-%d_%H-%M-%S")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_display_embeds_instance_and_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 5).unwrap();
        let id = BackupId::at("avs-main", ts);
        assert_eq!(id.to_string(), "avs-main_2024-05-17_09-30-05");
        assert_eq!(id.archive_name(), "avs-main_2024-05-17_09-30-05.tar");
    }
}
