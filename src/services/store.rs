//! The store capability shared by every backend.
//!
//! `DiskStore`, `MemoryStore` and `RemoteStore` implement [`Store`]
//! independently, and `LazyStore` implements it again on top of two of them,
//! so the HTTP layer never needs to know which backend it is talking to.

use crate::models::{
    bucket::BucketInfo,
    listing::{ListObjectsParams, ListObjectsResult, MAX_KEYS_LIMIT},
    object::{
        CopyObjectResult, Metadata, MultiDeleteResult, Object, ObjectBody, ObjectDeleteResult,
        ObjectInfo, PutConditions, PutObjectResult,
    },
    range::RangeRequest,
};
use async_trait::async_trait;
use std::io;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Uniform error taxonomy returned by every store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("key `{0}` not found")]
    KeyNotFound(String),
    /// A HEAD-style existence check failed without saying whether the bucket
    /// or the key is missing.
    #[error("bucket or key not found")]
    AmbiguousNotFound,
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("requested range not satisfiable")]
    InvalidRange,
    #[error("precondition failed")]
    PreconditionFailed,
    #[error("body for `{key}` delivered {actual} bytes, expected {expected}")]
    IncompleteBody {
        key: String,
        expected: u64,
        actual: u64,
    },
    /// An origin error code with no dedicated variant, passed through as-is.
    #[error("{code}: {message}")]
    Remote { code: String, message: String },
    #[error("{context}: {source}")]
    OperationFailed {
        context: String,
        #[source]
        source: BoxError,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn operation_failed(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::OperationFailed {
            context: context.into(),
            source: source.into(),
        }
    }

    /// True for the absence kinds, the only errors that justify asking the origin.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::BucketNotFound(_) | Self::KeyNotFound(_) | Self::AmbiguousNotFound
        )
    }

    /// S3 error code for this error.
    pub fn code(&self) -> &str {
        match self {
            Self::BucketNotFound(_) => "NoSuchBucket",
            Self::KeyNotFound(_) => "NoSuchKey",
            Self::AmbiguousNotFound => "NotFound",
            Self::BucketAlreadyExists(_) => "BucketAlreadyExists",
            Self::BucketNotEmpty(_) => "BucketNotEmpty",
            Self::InvalidBucketName { .. } => "InvalidBucketName",
            Self::InvalidObjectKey(_) => "InvalidArgument",
            Self::InvalidRange => "InvalidRange",
            Self::PreconditionFailed => "PreconditionFailed",
            Self::IncompleteBody { .. } => "IncompleteBody",
            Self::Remote { code, .. } => code,
            Self::OperationFailed { .. } | Self::Sqlx(_) | Self::Io(_) => "InternalError",
        }
    }
}

/// Check that a put delivered exactly the number of bytes it announced.
pub(crate) fn ensure_body_size(key: &str, expected: u64, actual: u64) -> StoreResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(StoreError::IncompleteBody {
            key: key.to_string(),
            expected,
            actual,
        })
    }
}

pub(crate) fn ensure_conditions(
    conditions: Option<&PutConditions>,
    current_etag: Option<&str>,
) -> StoreResult<()> {
    match conditions {
        Some(c) if !c.is_satisfied_by(current_etag) => Err(StoreError::PreconditionFailed),
        _ => Ok(()),
    }
}

/// Bucket and object operations every backend provides.
///
/// `put_object` must consume `body` as a stream; no implementation may
/// require the caller to have buffered it. `copy_object` replaces the
/// destination's metadata with `metadata` unless it is empty, in which case
/// the source metadata is kept.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>>;

    async fn list_bucket(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> StoreResult<ListObjectsResult>;

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool>;

    async fn create_bucket(&self, bucket: &str) -> StoreResult<()>;

    /// Delete an empty bucket; fails with `BucketNotEmpty` otherwise.
    async fn delete_bucket(&self, bucket: &str) -> StoreResult<()>;

    /// Delete every object in the bucket, then the bucket itself.
    async fn force_delete_bucket(&self, bucket: &str) -> StoreResult<()> {
        let params = ListObjectsParams {
            max_keys: MAX_KEYS_LIMIT,
            ..Default::default()
        };
        loop {
            let page = self.list_bucket(bucket, &params).await?;
            if page.objects.is_empty() {
                break;
            }
            let keys: Vec<String> = page.objects.into_iter().map(|o| o.key).collect();
            let result = self.delete_multi(bucket, &keys).await?;
            if let Some(failed) = result.errors.first() {
                return Err(StoreError::Remote {
                    code: failed.code.clone(),
                    message: format!("failed to delete `{}`: {}", failed.key, failed.message),
                });
            }
            if !page.is_truncated {
                break;
            }
        }
        self.delete_bucket(bucket).await
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<RangeRequest>,
    ) -> StoreResult<Object>;

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectInfo>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        metadata: Metadata,
        body: ObjectBody,
        size: u64,
        conditions: Option<PutConditions>,
    ) -> StoreResult<PutObjectResult>;

    /// Remove an object. Deleting a key that does not exist succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectDeleteResult>;

    async fn delete_multi(&self, bucket: &str, keys: &[String]) -> StoreResult<MultiDeleteResult>;

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        metadata: Metadata,
    ) -> StoreResult<CopyObjectResult>;
}
