//! In-memory store. Nothing survives a restart; useful as a throwaway cache
//! and as the reference backend in tests.

use crate::{
    models::{
        bucket::BucketInfo,
        listing::{ListObjectsParams, ListObjectsResult, ListingBuilder},
        object::{
            CopyObjectResult, DeleteError, Metadata, MultiDeleteResult, Object, ObjectBody,
            ObjectDeleteResult, ObjectInfo, PutConditions, PutObjectResult, body_from_bytes,
        },
        range::RangeRequest,
    },
    services::store::{Store, StoreError, StoreResult, ensure_body_size, ensure_conditions},
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Default)]
pub struct MemoryStore {
    buckets: RwLock<BTreeMap<String, MemoryBucket>>,
}

struct MemoryBucket {
    created_at: DateTime<Utc>,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Clone)]
struct StoredObject {
    info: ObjectInfo,
    data: Bytes,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_bucket(&self, bucket: &str) -> StoreResult<()> {
        if self.buckets.read().contains_key(bucket) {
            Ok(())
        } else {
            Err(StoreError::BucketNotFound(bucket.to_string()))
        }
    }

    fn stored(&self, bucket: &str, key: &str) -> StoreResult<StoredObject> {
        let buckets = self.buckets.read();
        let b = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        b.objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>> {
        Ok(self
            .buckets
            .read()
            .iter()
            .map(|(name, b)| BucketInfo::new(name.clone(), b.created_at))
            .collect())
    }

    async fn list_bucket(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> StoreResult<ListObjectsResult> {
        let buckets = self.buckets.read();
        let b = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;

        let mut builder = ListingBuilder::new(params);
        let start = params.marker.clone().unwrap_or_default();
        for stored in b.objects.range(start..).map(|(_, o)| o) {
            if !builder.push(stored.info.clone()) {
                break;
            }
        }
        Ok(builder.finish())
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        Ok(self.buckets.read().contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> StoreResult<()> {
        let mut buckets = self.buckets.write();
        if buckets.contains_key(bucket) {
            return Err(StoreError::BucketAlreadyExists(bucket.to_string()));
        }
        buckets.insert(
            bucket.to_string(),
            MemoryBucket {
                created_at: Utc::now(),
                objects: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StoreResult<()> {
        let mut buckets = self.buckets.write();
        match buckets.get(bucket) {
            None => Err(StoreError::BucketNotFound(bucket.to_string())),
            Some(b) if !b.objects.is_empty() => {
                Err(StoreError::BucketNotEmpty(bucket.to_string()))
            }
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn force_delete_bucket(&self, bucket: &str) -> StoreResult<()> {
        match self.buckets.write().remove(bucket) {
            Some(b) => {
                debug!(bucket, objects = b.objects.len(), "force-deleted bucket");
                Ok(())
            }
            None => Err(StoreError::BucketNotFound(bucket.to_string())),
        }
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<RangeRequest>,
    ) -> StoreResult<Object> {
        let stored = self.stored(bucket, key)?;
        let resolved = match range {
            Some(r) => Some(r.resolve(stored.info.size).ok_or(StoreError::InvalidRange)?),
            None => None,
        };
        let data = match resolved {
            Some(r) => stored.data.slice(r.start as usize..(r.start + r.length) as usize),
            None => stored.data,
        };
        Ok(Object::new(stored.info, resolved, body_from_bytes(data)))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectInfo> {
        Ok(self.stored(bucket, key)?.info)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        metadata: Metadata,
        mut body: ObjectBody,
        size: u64,
        conditions: Option<PutConditions>,
    ) -> StoreResult<PutObjectResult> {
        if key.is_empty() {
            return Err(StoreError::InvalidObjectKey(key.to_string()));
        }
        self.require_bucket(bucket)?;

        let mut buf = BytesMut::with_capacity(usize::try_from(size).unwrap_or(0));
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        ensure_body_size(key, size, buf.len() as u64)?;

        let data = buf.freeze();
        let etag = format!("{:x}", md5::compute(&data));

        let mut buckets = self.buckets.write();
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        let current = b.objects.get(key).and_then(|o| o.info.etag.as_deref());
        ensure_conditions(conditions.as_ref(), current)?;

        b.objects.insert(
            key.to_string(),
            StoredObject {
                info: ObjectInfo {
                    key: key.to_string(),
                    size,
                    etag: Some(etag.clone()),
                    last_modified: Utc::now(),
                    metadata,
                },
                data,
            },
        );
        Ok(PutObjectResult {
            etag,
            version_id: None,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectDeleteResult> {
        let mut buckets = self.buckets.write();
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        b.objects.remove(key);
        Ok(ObjectDeleteResult::default())
    }

    async fn delete_multi(&self, bucket: &str, keys: &[String]) -> StoreResult<MultiDeleteResult> {
        let mut buckets = self.buckets.write();
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;

        let mut result = MultiDeleteResult::default();
        for key in keys {
            if key.is_empty() {
                result.errors.push(DeleteError {
                    key: key.clone(),
                    code: "InvalidArgument".into(),
                    message: "empty key".into(),
                });
                continue;
            }
            b.objects.remove(key);
            result.deleted.push(key.clone());
        }
        Ok(result)
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        metadata: Metadata,
    ) -> StoreResult<CopyObjectResult> {
        let source = self.stored(src_bucket, src_key)?;

        let mut buckets = self.buckets.write();
        let dst = buckets
            .get_mut(dst_bucket)
            .ok_or_else(|| StoreError::BucketNotFound(dst_bucket.to_string()))?;

        let mut info = source.info;
        info.key = dst_key.to_string();
        info.last_modified = Utc::now();
        if !metadata.is_empty() {
            info.metadata = metadata;
        }
        let result = CopyObjectResult {
            etag: info.etag.clone(),
            last_modified: info.last_modified,
        };
        dst.objects.insert(
            dst_key.to_string(),
            StoredObject {
                info,
                data: source.data,
            },
        );
        Ok(result)
    }
}
