//! Archive construction.
//!
//! Builds one compressed zip container per run at a private temporary
//! location. The archive file lives inside a `NamedTempFile`, so the scratch
//! disk space is released on every exit path, including errors and
//! interruption, as soon as the `ArchiveArtifact` is dropped.

pub mod metadata;

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::utils::errors::{BackupError, Result};
use crate::vault::FileManifest;

/// Fixed Deflate level: moderate, so encoding cost does not dominate backup
/// latency against a cold-storage target.
const COMPRESSION_LEVEL: i64 = 6;

/// Read/compress granularity; archive size is never bounded by memory.
const COPY_BUF_SIZE: usize = 64 * 1024;

/// The built archive plus the counts echoed into `BackupMetadata`.
///
/// Owns the temporary file exclusively; dropping the artifact deletes it.
#[derive(Debug)]
pub struct ArchiveArtifact {
    file: NamedTempFile,

    /// Compressed size of the archive on disk
    pub size_bytes: u64,

    /// Files actually written into the archive
    pub entry_count: usize,

    /// Total uncompressed bytes of the written files
    pub total_uncompressed_bytes: u64,

    /// Files from the manifest that could not be read and were left out
    pub skipped_count: usize,
}

impl ArchiveArtifact {
    /// Location of the archive on local disk, valid until the artifact drops
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Build a zip archive containing every manifest entry under its relative
/// path.
///
/// A read failure on an individual file is non-fatal: the entry is dropped
/// from the archive with a warning and the run continues as a partial
/// backup. Any failure writing the archive itself is `ArchiveWrite`.
pub fn build(manifest: &FileManifest) -> Result<ArchiveArtifact> {
    let tmp = tempfile::Builder::new()
        .prefix("obsidian-backup-")
        .suffix(".zip")
        .tempfile()
        .map_err(|e| BackupError::ArchiveWrite(format!("cannot create temporary file: {e}")))?;

    let writer = tmp
        .as_file()
        .try_clone()
        .map_err(|e| BackupError::ArchiveWrite(e.to_string()))?;
    let mut zip = ZipWriter::new(writer);

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL))
        .large_file(true);

    let mut entry_count = 0usize;
    let mut total_uncompressed = 0u64;
    let mut skipped = 0usize;
    let mut buf = vec![0u8; COPY_BUF_SIZE];

    for entry in manifest.entries() {
        // Open before starting the zip entry so a vanished file never
        // leaves a half-written header behind.
        let mut reader = match File::open(&entry.path) {
            Ok(file) => BufReader::new(file),
            Err(e) => {
                warn!(
                    path = %entry.relative_path.display(),
                    "cannot open file, leaving it out of the archive: {e}"
                );
                skipped += 1;
                continue;
            }
        };

        zip.start_file(zip_entry_name(&entry.relative_path), options.clone())
            .map_err(|e| BackupError::ArchiveWrite(e.to_string()))?;

        let mut written = 0u64;
        let mut read_failed = false;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(
                        path = %entry.relative_path.display(),
                        "read failed mid-file, dropping entry from archive: {e}"
                    );
                    read_failed = true;
                    break;
                }
            };
            // Write-side faults (disk full, permission loss) are fatal.
            zip.write_all(&buf[..n])
                .map_err(|e| BackupError::ArchiveWrite(e.to_string()))?;
            written += n as u64;
        }

        if read_failed {
            zip.abort_file()
                .map_err(|e| BackupError::ArchiveWrite(e.to_string()))?;
            skipped += 1;
        } else {
            entry_count += 1;
            total_uncompressed += written;
        }
    }

    zip.finish()
        .map_err(|e| BackupError::ArchiveWrite(e.to_string()))?;

    let size_bytes = tmp
        .as_file()
        .metadata()
        .map_err(|e| BackupError::ArchiveWrite(e.to_string()))?
        .len();

    if skipped > 0 {
        warn!(
            skipped,
            archived = entry_count,
            "archive is a partial backup; some files could not be read"
        );
    }
    debug!(
        entries = entry_count,
        bytes = size_bytes,
        "archive written to {}",
        tmp.path().display()
    );

    Ok(ArchiveArtifact {
        file: tmp,
        size_bytes,
        entry_count,
        total_uncompressed_bytes: total_uncompressed,
        skipped_count: skipped,
    })
}

/// Zip entry names always use forward slashes, regardless of platform.
fn zip_entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
