//! Vault data model and content validation.
//!
//! A scan produces a `FileManifest`: the ordered, immutable list of files
//! selected for one backup run. Everything downstream (archive, metadata)
//! consumes it read-only.

pub mod scanner;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::warn;

use crate::utils::errors::{BackupError, Result};

/// A single file selected for backup. Immutable once produced by the scanner.
#[derive(Debug, Clone)]
pub struct VaultEntry {
    /// Absolute path on disk
    pub path: PathBuf,

    /// Path relative to the vault root (also the archive entry name)
    pub relative_path: PathBuf,

    /// File size in bytes at scan time
    pub size: u64,

    /// Last modified time at scan time
    pub modified: SystemTime,
}

/// Ordered list of files selected for a backup run.
///
/// Entries are sorted by relative path, so two scans of an unchanged tree
/// produce identical manifests and feed identical archives.
#[derive(Debug, Clone)]
pub struct FileManifest {
    root: PathBuf,
    entries: Vec<VaultEntry>,
}

impl FileManifest {
    pub(crate) fn new(root: PathBuf, mut entries: Vec<VaultEntry>) -> Self {
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Self { root, entries }
    }

    /// Vault root this manifest was scanned from
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Vault identifier: the root directory name, never the full path
    pub fn vault_name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.to_string_lossy().into_owned())
    }

    pub fn entries(&self) -> &[VaultEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total uncompressed size of all selected files
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Check that the manifest describes a vault worth backing up.
///
/// An empty manifest fails the run. A vault without any Markdown file is
/// unusual for Obsidian but still backed up, with a warning.
pub fn validate(manifest: &FileManifest) -> Result<()> {
    if manifest.is_empty() {
        return Err(BackupError::VaultEmpty(manifest.root().to_path_buf()));
    }

    let has_markdown = manifest
        .entries()
        .iter()
        .any(|e| e.relative_path.extension().is_some_and(|ext| ext == "md"));

    if !has_markdown {
        warn!(vault = %manifest.root().display(), "no markdown files found in vault");
    }

    Ok(())
}
