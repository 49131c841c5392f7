//! Represents a logical bucket: a top-level container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A bucket as reported by `ListBuckets`.
///
/// Buckets are flat namespaces; the only identity they carry is their name,
/// which is unique within a single store.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct BucketInfo {
    /// Bucket name (unique within the owning store).
    pub name: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}

impl BucketInfo {
    pub fn new(name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            created_at,
        }
    }
}
