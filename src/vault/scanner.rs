//! Vault traversal and file selection.
//!
//! Walks the vault tree, applies the exclusion policy and returns a
//! deterministic `FileManifest`. The manifest is a best-effort consistent
//! snapshot: files that vanish between listing and stat are skipped with a
//! warning, not treated as fatal.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::utils::errors::{BackupError, Result};
use crate::vault::{FileManifest, VaultEntry};

/// File selection policy for a scan.
///
/// Exclusion rules are applied per path and independently of each other;
/// any single match excludes the file.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Reserved settings directory; any path component equal to this name
    /// excludes the file (the directory and everything under it)
    pub settings_dir: String,

    /// Platform metadata files excluded by exact name
    pub excluded_files: Vec<String>,

    /// File name suffixes treated as temporary files
    pub temp_suffixes: Vec<String>,

    /// Keep dotfiles instead of excluding them
    pub include_hidden: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            settings_dir: ".obsidian".to_string(),
            excluded_files: vec![".DS_Store".to_string(), "Thumbs.db".to_string()],
            temp_suffixes: vec![
                ".tmp".to_string(),
                ".temp".to_string(),
                ".bak".to_string(),
                ".swp".to_string(),
            ],
            include_hidden: false,
        }
    }
}

/// Scan the vault and return the ordered manifest of files to back up.
///
/// Fails with `VaultNotFound` if `root` is missing or not a directory, and
/// with `VaultUnreadable` if the root itself cannot be traversed. Symbolic
/// links are never followed.
pub fn scan(root: &Path, options: &ScanOptions) -> Result<FileManifest> {
    let root_meta = fs::symlink_metadata(root)
        .map_err(|_| BackupError::VaultNotFound(root.to_path_buf()))?;
    if !root_meta.is_dir() {
        return Err(BackupError::VaultNotFound(root.to_path_buf()));
    }

    // Probe traversability up front so an unreadable root is a clean error
    // rather than a half-walked tree.
    fs::read_dir(root).map_err(|source| BackupError::VaultUnreadable {
        path: root.to_path_buf(),
        source,
    })?;

    let mut entries = Vec::new();

    for item in WalkDir::new(root).follow_links(false) {
        let entry = match item {
            Ok(entry) => entry,
            Err(e) => {
                // Subtree vanished or became unreadable mid-walk; the
                // snapshot is best-effort, so log and move on.
                warn!("skipping unreadable path during scan: {e}");
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_dir() || file_type.is_symlink() {
            continue;
        }

        let relative_path = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();

        if is_excluded(&relative_path, options) {
            debug!(path = %relative_path.display(), "excluded from backup");
            continue;
        }

        // Race with concurrent editing: the file was listed but is gone by
        // the time we stat it.
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(
                    path = %relative_path.display(),
                    "file disappeared during scan, skipping: {e}"
                );
                continue;
            }
        };

        let modified = metadata
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);

        entries.push(VaultEntry {
            path: entry.path().to_path_buf(),
            relative_path,
            size: metadata.len(),
            modified,
        });
    }

    let manifest = FileManifest::new(root.to_path_buf(), entries);
    debug!(
        files = manifest.len(),
        bytes = manifest.total_size(),
        "vault scan complete"
    );
    Ok(manifest)
}

/// Apply the exclusion policy to a vault-relative path.
fn is_excluded(relative: &Path, options: &ScanOptions) -> bool {
    // Reserved settings directory anywhere in the path
    if relative
        .components()
        .any(|c| c.as_os_str() == options.settings_dir.as_str())
    {
        return true;
    }

    let file_name = match relative.file_name() {
        Some(name) => name.to_string_lossy(),
        None => return true,
    };

    if options.excluded_files.iter().any(|f| f == file_name.as_ref()) {
        return true;
    }

    if options
        .temp_suffixes
        .iter()
        .any(|suffix| file_name.ends_with(suffix.as_str()))
    {
        return true;
    }

    if !options.include_hidden && file_name.starts_with('.') {
        return true;
    }

    false
}
