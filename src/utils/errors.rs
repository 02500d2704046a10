//! Custom error types for the backup pipeline.
//!
//! Every failure mode is a tagged variant propagated as a value; per-file
//! read failures during scan/archive are recovered locally and never appear
//! here. Transient storage failures only surface as `RetriesExhausted` once
//! the retry budget is spent.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Vault path does not exist or is not a directory: {}", .0.display())]
    VaultNotFound(PathBuf),

    #[error("Vault is not readable: {}: {source}", .path.display())]
    VaultUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Vault contains no files to back up: {}", .0.display())]
    VaultEmpty(PathBuf),

    #[error("Archive write failed: {0}")]
    ArchiveWrite(String),

    #[error("Storage client initialization failed: {0}")]
    ClientInit(String),

    #[error("Credentials rejected by storage provider: {0}")]
    Credentials(String),

    #[error("Bucket access denied: {0}")]
    BucketAccess(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: StorageError,
    },
}

pub type Result<T> = std::result::Result<T, BackupError>;
