//! Configuration management for the backup tool.
//!
//! Settings come from environment variables (a local `.env` is honored via
//! dotenvy in `main`), are frozen into an immutable `Config` at process
//! start, and are passed by reference into each component. Components never
//! read ambient state themselves.

use std::env;
use std::path::PathBuf;

use crate::utils::errors::{BackupError, Result};

/// Immutable run configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the Obsidian vault to back up
    pub vault_path: PathBuf,

    /// Destination S3 bucket
    pub bucket_name: String,

    /// AWS region the bucket lives in (or is created in)
    pub region: String,

    /// Prefix for generated object keys
    pub backup_prefix: String,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Include dotfiles in the backup
    pub include_hidden: bool,
}

// Default values
fn default_region() -> String {
    "ap-northeast-1".to_string()
}

fn default_backup_prefix() -> String {
    "obsidian-backup".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Explicit settings (CLI flags) that take precedence over the environment.
/// A present override also satisfies the requirement for its variable.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub vault_path: Option<PathBuf>,
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub backup_prefix: Option<String>,
    pub log_level: Option<String>,
    pub include_hidden: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `OBSIDIAN_VAULT_PATH` and `AWS_S3_BUCKET_NAME` are required;
    /// `AWS_REGION`, `BACKUP_PREFIX`, `LOG_LEVEL` and
    /// `BACKUP_INCLUDE_HIDDEN` fall back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::resolve(Overrides::default())
    }

    /// Load configuration from environment variables, with `overrides`
    /// taking precedence field by field.
    pub fn resolve(overrides: Overrides) -> Result<Self> {
        let vault_path = overrides
            .vault_path
            .or_else(|| env::var("OBSIDIAN_VAULT_PATH").ok().map(|v| PathBuf::from(v.trim())))
            .ok_or_else(|| {
                BackupError::Config(
                    "OBSIDIAN_VAULT_PATH environment variable is required".to_string(),
                )
            })?;

        let bucket_name = overrides
            .bucket_name
            .or_else(|| env::var("AWS_S3_BUCKET_NAME").ok().map(|v| v.trim().to_string()))
            .ok_or_else(|| {
                BackupError::Config(
                    "AWS_S3_BUCKET_NAME environment variable is required".to_string(),
                )
            })?;

        let include_hidden = overrides.include_hidden
            || env::var("BACKUP_INCLUDE_HIDDEN")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false);

        Ok(Config {
            vault_path,
            bucket_name,
            region: overrides
                .region
                .or_else(|| env::var("AWS_REGION").ok().map(|v| v.trim().to_string()))
                .unwrap_or_else(default_region),
            backup_prefix: overrides
                .backup_prefix
                .or_else(|| env::var("BACKUP_PREFIX").ok().map(|v| v.trim().to_string()))
                .unwrap_or_else(default_backup_prefix),
            log_level: overrides
                .log_level
                .or_else(|| env::var("LOG_LEVEL").ok().map(|v| v.trim().to_lowercase()))
                .unwrap_or_else(default_log_level),
            include_hidden,
        })
    }

    /// Validate settings that can be checked without touching the network.
    pub fn validate(&self) -> Result<()> {
        if self.vault_path.as_os_str().is_empty() {
            return Err(BackupError::Config("vault path is empty".to_string()));
        }

        if self.bucket_name.is_empty() {
            return Err(BackupError::Config("S3 bucket name is empty".to_string()));
        }

        if !valid_bucket_name(&self.bucket_name) {
            return Err(BackupError::Config(format!(
                "invalid S3 bucket name format: {}",
                self.bucket_name
            )));
        }

        if self.region.is_empty() {
            return Err(BackupError::Config("AWS region is empty".to_string()));
        }

        if self.backup_prefix.is_empty() {
            return Err(BackupError::Config("backup prefix is empty".to_string()));
        }

        Ok(())
    }
}

/// Basic syntactic check for S3 bucket names: lowercase alphanumeric
/// plus `-` and `.`, starting and ending with an alphanumeric character.
fn valid_bucket_name(name: &str) -> bool {
    if name.len() < 3 || name.len() > 63 {
        return false;
    }

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');

    let valid_edges = name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric());

    valid_chars && valid_edges
}
