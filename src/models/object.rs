//! Represents an object (blob) stored in a bucket, plus the result types
//! returned by object-level store operations.

use crate::models::range::ObjectRange;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, io};

/// Metadata key reserved for the object's MIME type.
pub const CONTENT_TYPE: &str = "Content-Type";

/// MIME type reported when an object carries none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// String-to-string object metadata, including the reserved `Content-Type` entry.
pub type Metadata = HashMap<String, String>;

/// A lazily consumed object payload.
pub type ObjectBody = BoxStream<'static, io::Result<Bytes>>;

/// Everything a store knows about an object except its bytes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Size of the whole object in bytes.
    pub size: u64,

    /// Hex MD5 of the content, without surrounding quotes.
    pub etag: Option<String>,

    /// Timestamp when object was last modified.
    pub last_modified: DateTime<Utc>,

    /// User and system metadata (`Content-Type` plus `x-amz-meta-*` entries).
    pub metadata: Metadata,
}

impl ObjectInfo {
    pub fn content_type(&self) -> Option<&str> {
        self.metadata.get(CONTENT_TYPE).map(String::as_str)
    }
}

/// An object opened for reading.
///
/// `range` is set when only part of the object is carried by `body`; `info.size`
/// describes the whole object unless `size_known` is false, in which case it
/// is only a lower bound.
pub struct Object {
    pub info: ObjectInfo,
    pub range: Option<ObjectRange>,
    pub body: ObjectBody,
    pub size_known: bool,
}

impl Object {
    pub fn new(info: ObjectInfo, range: Option<ObjectRange>, body: ObjectBody) -> Self {
        Self {
            info,
            range,
            body,
            size_known: true,
        }
    }

    /// Mark the total size as unreported (`Content-Range: bytes a-b/*`).
    pub fn with_unknown_size(mut self) -> Self {
        self.size_known = false;
        self
    }

    /// Number of bytes `body` will yield.
    pub fn content_length(&self) -> u64 {
        self.range.map(|r| r.length).unwrap_or(self.info.size)
    }

    /// True when `body` carries every byte of the object.
    pub fn is_complete(&self) -> bool {
        match self.range {
            None => true,
            Some(r) => self.size_known && r.covers(self.info.size),
        }
    }

    /// `Content-Range` value for a ranged payload.
    pub fn content_range(&self) -> Option<String> {
        let range = self.range?;
        Some(if self.size_known {
            range.content_range(self.info.size)
        } else {
            format!("bytes {}-{}/*", range.start, range.end())
        })
    }

    /// Drain the payload into memory. Intended for small objects and tests.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        let capacity = usize::try_from(self.content_length()).unwrap_or(0);
        let buf = self
            .body
            .try_fold(BytesMut::with_capacity(capacity), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(buf.freeze())
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("info", &self.info)
            .field("range", &self.range)
            .field("size_known", &self.size_known)
            .finish_non_exhaustive()
    }
}

/// Optional ETag preconditions evaluated before a put replaces an object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PutConditions {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
}

impl PutConditions {
    /// Evaluate against the ETag of the object currently stored (if any).
    pub fn is_satisfied_by(&self, current_etag: Option<&str>) -> bool {
        if let Some(expected) = self.if_match.as_deref() {
            match current_etag {
                Some(etag) if expected == "*" || normalize_etag(expected) == etag => {}
                _ => return false,
            }
        }
        if let Some(unexpected) = self.if_none_match.as_deref() {
            if let Some(etag) = current_etag {
                if unexpected == "*" || normalize_etag(unexpected) == etag {
                    return false;
                }
            }
        }
        true
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutObjectResult {
    pub etag: String,
    pub version_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectDeleteResult {
    pub is_delete_marker: bool,
    pub version_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyObjectResult {
    pub etag: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// A key that could not be removed by a multi-object delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteError {
    pub key: String,
    pub code: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MultiDeleteResult {
    pub deleted: Vec<String>,
    pub errors: Vec<DeleteError>,
}

/// Strip the quotes S3 wraps around ETag values.
pub fn normalize_etag(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

pub fn empty_body() -> ObjectBody {
    futures::stream::empty().boxed()
}

pub fn body_from_bytes(data: impl Into<Bytes>) -> ObjectBody {
    let data = data.into();
    futures::stream::iter([Ok(data)]).boxed()
}
