//! S3 implementation of the object store port.
//!
//! Failure classification happens here, at the provider boundary: timeouts,
//! dispatch failures, 5xx responses and throttling codes are transient;
//! everything else (authorization denials, malformed requests) is permanent
//! and never consumes retry budget.

use std::path::Path;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, ServerSideEncryption,
    ServerSideEncryptionByDefault, ServerSideEncryptionConfiguration, ServerSideEncryptionRule,
    StorageClass,
};
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::archive::metadata::BackupMetadata;
use crate::storage::{FailureClass, ObjectStore, StorageError};
use crate::utils::errors::{BackupError, Result};

/// Regions other than this one need an explicit location constraint on
/// bucket creation.
const DEFAULT_S3_REGION: &str = "us-east-1";

/// Provider error codes that indicate throttling or a timeout the provider
/// expects callers to retry.
const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "SlowDown",
    "RequestTimeout",
    "RequestTimeoutException",
    "TooManyRequests",
];

pub struct S3ObjectStore {
    client: Client,
    region: String,
}

impl S3ObjectStore {
    /// Build a client bound to the configured region. Credentials are
    /// resolved by the provider chain (environment, profile, IAM role).
    pub async fn connect(region: &str) -> Result<Self> {
        if region.trim().is_empty() {
            return Err(BackupError::ClientInit("region is empty".to_string()));
        }

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        let client = Client::new(&shared);

        debug!(region, "S3 client initialized");
        Ok(Self {
            client,
            region: region.to_string(),
        })
    }

    async fn enable_default_encryption(
        &self,
        bucket: &str,
    ) -> std::result::Result<(), StorageError> {
        let by_default = ServerSideEncryptionByDefault::builder()
            .sse_algorithm(ServerSideEncryption::Aes256)
            .build()
            .map_err(|e| StorageError::permanent(format!("encryption config: {e}")))?;

        let config = ServerSideEncryptionConfiguration::builder()
            .rules(
                ServerSideEncryptionRule::builder()
                    .apply_server_side_encryption_by_default(by_default)
                    .bucket_key_enabled(true)
                    .build(),
            )
            .build()
            .map_err(|e| StorageError::permanent(format!("encryption config: {e}")))?;

        self.client
            .put_bucket_encryption()
            .bucket(bucket)
            .server_side_encryption_configuration(config)
            .send()
            .await
            .map_err(|e| map_sdk_err("PutBucketEncryption", e))?;

        info!(bucket, "default encryption at rest enabled (SSE-S3)");
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_buckets(&self) -> std::result::Result<Vec<String>, StorageError> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| map_sdk_err("ListBuckets", e))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_string))
            .collect())
    }

    async fn bucket_exists(&self, bucket: &str) -> std::result::Result<bool, StorageError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_not_found() => Ok(false),
            Err(e) => Err(map_sdk_err("HeadBucket", e)),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> std::result::Result<(), StorageError> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if self.region != DEFAULT_S3_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!(bucket, region = %self.region, "bucket created");
            }
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_bucket_already_owned_by_you() => {
                // The bucket may come from a run that was interrupted
                // before its encryption step; re-applying is harmless.
                info!(bucket, "bucket already owned by us, re-applying default encryption");
            }
            Err(e) => return Err(map_sdk_err("CreateBucket", e)),
        }

        self.enable_default_encryption(bucket).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        archive: &Path,
        metadata: &BackupMetadata,
    ) -> std::result::Result<(), StorageError> {
        let body = ByteStream::from_path(archive).await.map_err(|e| {
            StorageError::permanent(format!("cannot read archive {}: {e}", archive.display()))
        })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .storage_class(StorageClass::DeepArchive)
            .server_side_encryption(ServerSideEncryption::Aes256)
            .set_metadata(Some(metadata.to_object_metadata()))
            .send()
            .await
            .map_err(|e| map_sdk_err("PutObject", e))?;

        Ok(())
    }
}

fn classify<E>(err: &SdkError<E>) -> FailureClass
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            FailureClass::Transient
        }
        SdkError::ServiceError(ctx) => {
            let server_error = ctx.raw().status().as_u16() >= 500;
            let throttled = matches!(
                err.code(),
                Some(code) if TRANSIENT_CODES.contains(&code)
            );
            if server_error || throttled {
                FailureClass::Transient
            } else {
                FailureClass::Permanent
            }
        }
        _ => FailureClass::Permanent,
    }
}

fn map_sdk_err<E>(operation: &str, err: SdkError<E>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    StorageError {
        class: classify(&err),
        message: format!("{operation}: {}", DisplayErrorContext(&err)),
    }
}
