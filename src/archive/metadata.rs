//! Backup metadata attached to the uploaded object.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::archive::ArchiveArtifact;

/// Every run is a full snapshot.
pub const BACKUP_TYPE: &str = "full";

/// Metadata describing one backup run, attached to the remote object as
/// string key-value pairs. Derived from the built archive, so the counts
/// reflect what was actually written, not the pre-skip scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupMetadata {
    /// ISO-8601 UTC timestamp of the run
    pub backup_date: String,

    /// Vault identifier (directory name, not the raw filesystem path)
    pub vault_name: String,

    /// Files included in the archive
    pub file_count: usize,

    /// Total uncompressed bytes of the included files
    pub total_size_bytes: u64,
}

impl BackupMetadata {
    pub fn new(vault_name: &str, artifact: &ArchiveArtifact, timestamp: DateTime<Utc>) -> Self {
        Self {
            backup_date: timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            vault_name: vault_name.to_string(),
            file_count: artifact.entry_count,
            total_size_bytes: artifact.total_uncompressed_bytes,
        }
    }

    /// Render to the object-metadata map the storage provider expects.
    pub fn to_object_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            ("backup_date".to_string(), self.backup_date.clone()),
            ("vault_path".to_string(), self.vault_name.clone()),
            ("file_count".to_string(), self.file_count.to_string()),
            ("total_size".to_string(), self.total_size_bytes.to_string()),
            ("backup_type".to_string(), BACKUP_TYPE.to_string()),
        ])
    }
}
