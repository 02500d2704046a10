//! Upload protocol against the remote object store.
//!
//! `StorageUploader` is a strict state machine per run:
//! `Uninitialized -> CredentialsVerified -> BucketReady -> Uploaded | Failed`.
//! It talks to the provider through the `ObjectStore` port, so the whole
//! protocol (ordering, retry accounting, outcome production) is testable
//! against a scripted fake. The S3 implementation lives in `s3`.

pub mod retry;
pub mod s3;

use std::cell::Cell;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::archive::metadata::BackupMetadata;
use crate::archive::ArchiveArtifact;
use crate::storage::retry::{RetryError, RetryPolicy};
use crate::utils::errors::{BackupError, Result};

pub use s3::S3ObjectStore;

/// Whether a storage failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network timeout, throttling, 5xx-class provider error
    Transient,

    /// Authorization denial, malformed request, missing required resource
    Permanent,
}

/// A classified failure from the object store.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StorageError {
    pub class: FailureClass,
    pub message: String,
}

impl StorageError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class == FailureClass::Transient
    }
}

/// Port to the object store. One method per provider call the pipeline
/// needs; implementations classify their own failures.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lightweight read-only call used as the credential probe
    async fn list_buckets(&self) -> std::result::Result<Vec<String>, StorageError>;

    async fn bucket_exists(&self, bucket: &str) -> std::result::Result<bool, StorageError>;

    /// Create the bucket with default encryption at rest enabled
    async fn create_bucket(&self, bucket: &str) -> std::result::Result<(), StorageError>;

    /// Upload the archive under `key` with the metadata attached, requesting
    /// server-side encryption and the cold storage class
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        archive: &Path,
        metadata: &BackupMetadata,
    ) -> std::result::Result<(), StorageError>;
}

/// Uploader progress through one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploaderState {
    Uninitialized,
    CredentialsVerified,
    BucketReady,
    Uploaded,
    Failed,
}

/// Final, authoritative record of the upload. Produced once per run.
#[derive(Debug)]
pub struct UploadOutcome {
    /// Object key the archive was (or would have been) stored under
    pub object_key: String,

    pub success: bool,

    /// Calls made to the provider for the upload itself
    pub attempt_count: u32,

    /// Set when the upload failed for good
    pub terminal_error: Option<BackupError>,
}

/// Generate the object key for a run: `{prefix}-{UTC timestamp}.zip`.
pub fn backup_key(prefix: &str, timestamp: DateTime<Utc>) -> String {
    format!("{}-{}.zip", prefix, timestamp.format("%Y-%m-%d-%H-%M-%S"))
}

/// Drives the upload protocol against an `ObjectStore`.
pub struct StorageUploader<S> {
    store: S,
    bucket: String,
    prefix: String,
    retry: RetryPolicy,
    state: UploaderState,
}

impl<S: ObjectStore> StorageUploader<S> {
    pub fn new(store: S, bucket: String, prefix: String) -> Self {
        Self {
            store,
            bucket,
            prefix,
            retry: RetryPolicy::default(),
            state: UploaderState::Uninitialized,
        }
    }

    pub fn state(&self) -> UploaderState {
        self.state
    }

    /// Probe the identity with a read-only call. Runs before any archive
    /// work so a bad credential never wastes a scan or disk space.
    pub async fn verify_credentials(&mut self) -> Result<()> {
        self.expect_state(&[UploaderState::Uninitialized], "verify credentials")?;

        let store = &self.store;
        let result = self
            .retry
            .run("verify credentials", || store.list_buckets())
            .await;

        match result {
            Ok((buckets, attempts)) => {
                debug!(
                    accessible_buckets = buckets.len(),
                    attempts, "credentials verified"
                );
                self.state = UploaderState::CredentialsVerified;
                Ok(())
            }
            Err(e) => {
                self.state = UploaderState::Failed;
                Err(terminal_error(e, BackupError::Credentials))
            }
        }
    }

    /// Make sure the destination bucket exists, creating it with default
    /// encryption when absent.
    pub async fn ensure_bucket(&mut self) -> Result<()> {
        self.expect_state(
            &[
                UploaderState::Uninitialized,
                UploaderState::CredentialsVerified,
            ],
            "ensure bucket",
        )?;

        let store = &self.store;
        let bucket = self.bucket.as_str();
        // Once creation has started, retries must go back to CreateBucket:
        // re-probing existence would see a half-configured bucket (created
        // but without its default encryption applied yet) and skip the rest
        // of the setup.
        let creating = Cell::new(false);
        let result = self
            .retry
            .run("ensure bucket", || {
                let creating = &creating;
                async move {
                    if !creating.get() {
                        if store.bucket_exists(bucket).await? {
                            return Ok(false);
                        }
                        creating.set(true);
                    }
                    store.create_bucket(bucket).await?;
                    Ok(true)
                }
            })
            .await;

        match result {
            Ok((created, attempts)) => {
                if created {
                    info!(bucket = %self.bucket, attempts, "bucket created");
                } else {
                    debug!(bucket = %self.bucket, attempts, "bucket exists");
                }
                self.state = UploaderState::BucketReady;
                Ok(())
            }
            Err(e) => {
                self.state = UploaderState::Failed;
                Err(terminal_error(e, BackupError::BucketAccess))
            }
        }
    }

    /// Transfer the archive. Always yields an `UploadOutcome`; a failed
    /// outcome carries the terminal error for the caller to surface.
    pub async fn upload(
        &mut self,
        artifact: &ArchiveArtifact,
        metadata: &BackupMetadata,
    ) -> Result<UploadOutcome> {
        self.expect_state(&[UploaderState::BucketReady], "upload")?;

        let key = backup_key(&self.prefix, Utc::now());
        info!(
            key = %key,
            bytes = artifact.size_bytes,
            files = artifact.entry_count,
            "uploading archive"
        );

        let store = &self.store;
        let bucket = self.bucket.as_str();
        let key_ref = key.as_str();
        let path = artifact.path();
        let result = self
            .retry
            .run("upload archive", || {
                store.put_object(bucket, key_ref, path, metadata)
            })
            .await;

        match result {
            Ok(((), attempts)) => {
                self.state = UploaderState::Uploaded;
                info!(key = %key, attempts, "upload complete");
                Ok(UploadOutcome {
                    object_key: key,
                    success: true,
                    attempt_count: attempts,
                    terminal_error: None,
                })
            }
            Err(e) => {
                self.state = UploaderState::Failed;
                let attempts = e.attempts;
                // A permanent PutObject failure is an authorization problem
                // with the identity, not a bucket-lifecycle one.
                Ok(UploadOutcome {
                    object_key: key,
                    success: false,
                    attempt_count: attempts,
                    terminal_error: Some(terminal_error(e, BackupError::Credentials)),
                })
            }
        }
    }

    fn expect_state(&self, allowed: &[UploaderState], operation: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(BackupError::Config(format!(
                "storage uploader cannot {operation} in state {:?}",
                self.state
            )))
        }
    }
}

/// Map a spent retry into the error taxonomy: permanent causes keep their
/// category, exhausted transient causes become `RetriesExhausted`.
fn terminal_error(err: RetryError, permanent: fn(String) -> BackupError) -> BackupError {
    match err.source.class {
        FailureClass::Permanent => permanent(format!(
            "{} (attempt {}): {}",
            err.operation, err.attempts, err.source
        )),
        FailureClass::Transient => BackupError::RetriesExhausted {
            operation: err.operation,
            attempts: err.attempts,
            source: err.source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::build;
    use crate::vault::scanner::{scan, ScanOptions};
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_backup_key_format() {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 3).unwrap();
        assert_eq!(
            backup_key("obsidian-backup", timestamp),
            "obsidian-backup-2024-01-15-12-00-03.zip"
        );
    }

    #[test]
    fn test_backup_key_pads_components() {
        let timestamp = Utc.with_ymd_and_hms(2024, 6, 5, 1, 2, 3).unwrap();
        assert_eq!(
            backup_key("nightly", timestamp),
            "nightly-2024-06-05-01-02-03.zip"
        );
    }

    /// Scripted object store: each call pops the next scripted result for
    /// that operation; an empty script means "succeed".
    #[derive(Default)]
    struct FakeStore {
        list_script: Mutex<VecDeque<std::result::Result<Vec<String>, StorageError>>>,
        exists_script: Mutex<VecDeque<std::result::Result<bool, StorageError>>>,
        create_script: Mutex<VecDeque<std::result::Result<(), StorageError>>>,
        put_script: Mutex<VecDeque<std::result::Result<(), StorageError>>>,
        list_calls: AtomicU32,
        exists_calls: AtomicU32,
        created_buckets: Mutex<Vec<String>>,
        put_keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn list_buckets(&self) -> std::result::Result<Vec<String>, StorageError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.list_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec!["existing".to_string()]))
        }

        async fn bucket_exists(&self, _bucket: &str) -> std::result::Result<bool, StorageError> {
            self.exists_calls.fetch_add(1, Ordering::SeqCst);
            self.exists_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(true))
        }

        async fn create_bucket(&self, bucket: &str) -> std::result::Result<(), StorageError> {
            self.created_buckets.lock().unwrap().push(bucket.to_string());
            self.create_script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn put_object(
            &self,
            _bucket: &str,
            key: &str,
            _archive: &Path,
            _metadata: &BackupMetadata,
        ) -> std::result::Result<(), StorageError> {
            self.put_keys.lock().unwrap().push(key.to_string());
            self.put_script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    fn test_artifact() -> (TempDir, ArchiveArtifact, BackupMetadata) {
        let vault = TempDir::new().unwrap();
        std::fs::write(vault.path().join("note.md"), b"content").unwrap();
        let manifest = scan(vault.path(), &ScanOptions::default()).unwrap();
        let artifact = build(&manifest).unwrap();
        let metadata = BackupMetadata::new("vault", &artifact, Utc::now());
        (vault, artifact, metadata)
    }

    fn uploader(store: FakeStore) -> StorageUploader<FakeStore> {
        StorageUploader::new(store, "backup-bucket".to_string(), "obsidian-backup".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_protocol_happy_path() {
        let (_vault, artifact, metadata) = test_artifact();
        let mut uploader = uploader(FakeStore::default());
        assert_eq!(uploader.state(), UploaderState::Uninitialized);

        uploader.verify_credentials().await.unwrap();
        assert_eq!(uploader.state(), UploaderState::CredentialsVerified);

        uploader.ensure_bucket().await.unwrap();
        assert_eq!(uploader.state(), UploaderState::BucketReady);

        let outcome = uploader.upload(&artifact, &metadata).await.unwrap();
        assert_eq!(uploader.state(), UploaderState::Uploaded);
        assert!(outcome.success);
        assert_eq!(outcome.attempt_count, 1);
        assert!(outcome.object_key.starts_with("obsidian-backup-"));
        assert!(outcome.object_key.ends_with(".zip"));
        assert!(outcome.terminal_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_bucket_is_created() {
        let store = FakeStore::default();
        store.exists_script.lock().unwrap().push_back(Ok(false));

        let mut uploader = uploader(store);
        uploader.ensure_bucket().await.unwrap();

        assert_eq!(uploader.state(), UploaderState::BucketReady);
        assert_eq!(
            *uploader.store.created_buckets.lock().unwrap(),
            vec!["backup-bucket".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_retries_go_to_create_not_existence_check() {
        let store = FakeStore::default();
        {
            // The bucket is absent; the first CreateBucket (including its
            // encryption setup) fails transiently after the bucket came
            // into being, so a second existence check would report true.
            store.exists_script.lock().unwrap().push_back(Ok(false));
            store.exists_script.lock().unwrap().push_back(Ok(true));
            store
                .create_script
                .lock()
                .unwrap()
                .push_back(Err(StorageError::transient("PutBucketEncryption: 503")));
        }

        let mut uploader = uploader(store);
        uploader.ensure_bucket().await.unwrap();

        assert_eq!(uploader.state(), UploaderState::BucketReady);
        // The retry must repeat CreateBucket, not re-check existence and
        // skip the encryption setup.
        assert_eq!(uploader.store.exists_calls.load(Ordering::SeqCst), 1);
        assert_eq!(uploader.store.created_buckets.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_credential_failure_no_retry() {
        let store = FakeStore::default();
        store
            .list_script
            .lock()
            .unwrap()
            .push_back(Err(StorageError::permanent("invalid access key")));

        let mut uploader = uploader(store);
        let err = uploader.verify_credentials().await.unwrap_err();

        assert!(matches!(err, BackupError::Credentials(_)));
        assert_eq!(uploader.state(), UploaderState::Failed);
        assert_eq!(uploader.store.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_credential_failure_retried() {
        let store = FakeStore::default();
        {
            let mut script = store.list_script.lock().unwrap();
            script.push_back(Err(StorageError::transient("timeout")));
            script.push_back(Ok(vec![]));
        }

        let mut uploader = uploader(store);
        uploader.verify_credentials().await.unwrap();

        assert_eq!(uploader.state(), UploaderState::CredentialsVerified);
        assert_eq!(uploader.store.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_upload_succeeds_on_third_attempt() {
        let store = FakeStore::default();
        {
            let mut script = store.put_script.lock().unwrap();
            script.push_back(Err(StorageError::transient("SlowDown")));
            script.push_back(Err(StorageError::transient("SlowDown")));
            script.push_back(Ok(()));
        }

        let (_vault, artifact, metadata) = test_artifact();
        let mut uploader = uploader(store);
        uploader.verify_credentials().await.unwrap();
        uploader.ensure_bucket().await.unwrap();

        let start = tokio::time::Instant::now();
        let outcome = uploader.upload(&artifact, &metadata).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.attempt_count, 3);
        // 1s + 2s of backoff enforced before the successful call
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(uploader.state(), UploaderState::Uploaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_retries_exhausted() {
        let store = FakeStore::default();
        {
            let mut script = store.put_script.lock().unwrap();
            for _ in 0..4 {
                script.push_back(Err(StorageError::transient("timeout")));
            }
        }

        let (_vault, artifact, metadata) = test_artifact();
        let mut uploader = uploader(store);
        uploader.verify_credentials().await.unwrap();
        uploader.ensure_bucket().await.unwrap();

        let outcome = uploader.upload(&artifact, &metadata).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.attempt_count, 4);
        assert!(matches!(
            outcome.terminal_error,
            Some(BackupError::RetriesExhausted { attempts: 4, .. })
        ));
        assert_eq!(uploader.state(), UploaderState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_upload_failure_is_authorization_error() {
        let store = FakeStore::default();
        store
            .put_script
            .lock()
            .unwrap()
            .push_back(Err(StorageError::permanent("AccessDenied")));

        let (_vault, artifact, metadata) = test_artifact();
        let mut uploader = uploader(store);
        uploader.verify_credentials().await.unwrap();
        uploader.ensure_bucket().await.unwrap();

        let outcome = uploader.upload(&artifact, &metadata).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.attempt_count, 1);
        assert!(matches!(
            outcome.terminal_error,
            Some(BackupError::Credentials(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_requires_bucket_ready() {
        let (_vault, artifact, metadata) = test_artifact();
        let mut uploader = uploader(FakeStore::default());

        let err = uploader.upload(&artifact, &metadata).await.unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_denied_is_permanent() {
        let store = FakeStore::default();
        store
            .exists_script
            .lock()
            .unwrap()
            .push_back(Err(StorageError::permanent("access denied by policy")));

        let mut uploader = uploader(store);
        uploader.verify_credentials().await.unwrap();
        let err = uploader.ensure_bucket().await.unwrap_err();

        assert!(matches!(err, BackupError::BucketAccess(_)));
        assert_eq!(uploader.state(), UploaderState::Failed);
    }
}
