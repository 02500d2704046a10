//! Backup run orchestration.
//!
//! Sequences the pipeline: credential check, vault scan, archive build,
//! bucket lifecycle, upload. Contains no policy of its own; every run ends
//! with exactly one success or one terminal failure, and the temporary
//! archive is released on every exit path when the artifact drops.

use chrono::Utc;
use tracing::{info, warn};

use crate::archive::{self, metadata::BackupMetadata};
use crate::config::Config;
use crate::storage::{S3ObjectStore, StorageUploader, UploadOutcome};
use crate::utils::errors::{BackupError, Result};
use crate::vault::{self, scanner, scanner::ScanOptions};

/// Execute one full backup run.
pub async fn run(config: &Config) -> Result<UploadOutcome> {
    info!(
        vault = %config.vault_path.display(),
        bucket = %config.bucket_name,
        region = %config.region,
        "starting backup run"
    );

    // Identity problems must surface before any scan or archive work.
    let store = S3ObjectStore::connect(&config.region).await?;
    let mut uploader = StorageUploader::new(
        store,
        config.bucket_name.clone(),
        config.backup_prefix.clone(),
    );
    uploader.verify_credentials().await?;

    let scan_options = ScanOptions {
        include_hidden: config.include_hidden,
        ..ScanOptions::default()
    };
    let manifest = scanner::scan(&config.vault_path, &scan_options)?;
    vault::validate(&manifest)?;
    info!(
        files = manifest.len(),
        bytes = manifest.total_size(),
        "vault scan complete"
    );

    let artifact = archive::build(&manifest)?;
    let metadata = BackupMetadata::new(&manifest.vault_name(), &artifact, Utc::now());

    uploader.ensure_bucket().await?;
    let mut outcome = uploader.upload(&artifact, &metadata).await?;

    if !outcome.success {
        return Err(outcome.terminal_error.take().unwrap_or_else(|| {
            BackupError::Config("upload failed without a recorded cause".to_string())
        }));
    }

    if artifact.skipped_count > 0 {
        warn!(
            skipped = artifact.skipped_count,
            "backup uploaded as a partial snapshot; some files could not be read"
        );
    }
    info!(
        key = %outcome.object_key,
        files = metadata.file_count,
        bytes = metadata.total_size_bytes,
        attempts = outcome.attempt_count,
        "backup completed"
    );

    Ok(outcome)
}
