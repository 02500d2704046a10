//! Obsidian S3 Backup Library
//!
//! Full-snapshot backup of an Obsidian vault to encrypted S3 cold storage:
//! vault traversal and filtering, deterministic zip archive construction,
//! and an upload protocol with bounded retry against the object store.

pub mod archive;
pub mod config;
pub mod executor;
pub mod storage;
pub mod utils;
pub mod vault;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
