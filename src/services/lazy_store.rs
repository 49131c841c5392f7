//! LazyStore: cache-aside composition of two stores.
//!
//! Reads are served from the cache store when possible. A miss is fetched
//! from the origin (under the mapped bucket name), streamed into the cache,
//! and re-served from the cache. Everything else goes straight to the cache.

use crate::{
    models::{
        bucket::BucketInfo,
        listing::{ListObjectsParams, ListObjectsResult},
        object::{
            CopyObjectResult, Metadata, MultiDeleteResult, Object, ObjectBody,
            ObjectDeleteResult, ObjectInfo, PutConditions, PutObjectResult,
        },
        range::RangeRequest,
    },
    services::{
        namespace::NamespaceMap,
        store::{Store, StoreError, StoreResult},
    },
};
use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde::Serialize;
use std::{
    collections::HashMap,
    future::Future,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

pub const DEFAULT_ORIGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Hit/miss counters, updated lock-free.
#[derive(Debug, Default)]
pub struct CacheStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    origin_fills: AtomicU64,
    origin_errors: AtomicU64,
}

#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub origin_fills: u64,
    pub origin_errors: u64,
}

impl CacheStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            origin_fills: self.origin_fills.load(Ordering::Relaxed),
            origin_errors: self.origin_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct LazyStore {
    cache: Arc<dyn Store>,
    origin: Arc<dyn Store>,
    namespace: NamespaceMap,
    origin_timeout: Duration,
    stats: Arc<CacheStats>,
}

impl LazyStore {
    pub fn new(cache: Arc<dyn Store>, origin: Arc<dyn Store>) -> Self {
        Self {
            cache,
            origin,
            namespace: NamespaceMap::default(),
            origin_timeout: DEFAULT_ORIGIN_TIMEOUT,
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Upper bound on each origin call (time to response headers).
    pub fn with_origin_timeout(mut self, origin_timeout: Duration) -> Self {
        self.origin_timeout = origin_timeout;
        self
    }

    /// Replace the local → origin bucket mapping. Safe while requests are in
    /// flight; each lookup sees either the old or the new mapping.
    pub fn set_namespace_mapping(&self, mapping: HashMap<String, String>) {
        info!(entries = mapping.len(), "namespace mapping replaced");
        self.namespace.replace(mapping);
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Run an origin call under `deadline`. Any failure, deadline included,
    /// is logged and reported as `KeyNotFound(key)`.
    async fn from_origin<T>(
        &self,
        deadline: Instant,
        bucket: &str,
        origin_bucket: &str,
        key: &str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match timeout_at(deadline, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(self.origin_failed(bucket, origin_bucket, key, err.to_string())),
            Err(_) => Err(self.origin_failed(
                bucket,
                origin_bucket,
                key,
                format!("timed out after {:?}", self.origin_timeout),
            )),
        }
    }

    fn origin_failed(
        &self,
        bucket: &str,
        origin_bucket: &str,
        key: &str,
        failure: String,
    ) -> StoreError {
        CacheStats::bump(&self.stats.origin_errors);
        warn!(bucket, key, origin_bucket, error = %failure, "origin lookup failed");
        StoreError::KeyNotFound(key.to_string())
    }
}

/// Yields `body` until it ends, fails, or `deadline` passes. Expiry surfaces
/// as a `TimedOut` error; either failure sets `failed` and ends the stream.
fn bounded_body(body: ObjectBody, deadline: Instant, failed: Arc<AtomicBool>) -> ObjectBody {
    stream::unfold(Some(body), move |state| {
        let failed = Arc::clone(&failed);
        async move {
            let mut body = state?;
            let item = match timeout_at(deadline, body.next()).await {
                Ok(None) => return None,
                Ok(Some(Ok(chunk))) => return Some((Ok(chunk), Some(body))),
                Ok(Some(Err(err))) => err,
                Err(_) => io::Error::new(io::ErrorKind::TimedOut, "origin body deadline exceeded"),
            };
            failed.store(true, Ordering::Relaxed);
            Some((Err(item), None))
        }
    })
    .boxed()
}

#[async_trait]
impl Store for LazyStore {
    async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>> {
        self.cache.list_buckets().await
    }

    async fn list_bucket(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> StoreResult<ListObjectsResult> {
        self.cache.list_bucket(bucket, params).await
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        self.cache.bucket_exists(bucket).await
    }

    async fn create_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.cache.create_bucket(bucket).await
    }

    async fn delete_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.cache.delete_bucket(bucket).await
    }

    async fn force_delete_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.cache.force_delete_bucket(bucket).await
    }

    /// Read-through get.
    ///
    /// A partial origin payload (ranged request answered with less than the
    /// whole object) is returned as-is and not cached.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<RangeRequest>,
    ) -> StoreResult<Object> {
        match self.cache.get_object(bucket, key, range).await {
            Ok(object) => {
                CacheStats::bump(&self.stats.cache_hits);
                debug!(bucket, key, "cache hit");
                return Ok(object);
            }
            Err(err) if !err.is_not_found() => return Err(err),
            Err(_) => {}
        }

        CacheStats::bump(&self.stats.cache_misses);
        let origin_bucket = self.namespace.origin_bucket(bucket);
        info!(bucket, key, origin_bucket = %origin_bucket, "cache miss, fetching from origin");

        // One deadline covers the response and the whole origin body.
        let deadline = Instant::now() + self.origin_timeout;
        let mut object = self
            .from_origin(
                deadline,
                bucket,
                &origin_bucket,
                key,
                self.origin.get_object(&origin_bucket, key, range),
            )
            .await?;
        let body_failed = Arc::new(AtomicBool::new(false));
        object.body = bounded_body(object.body, deadline, Arc::clone(&body_failed));

        if !object.is_complete() {
            debug!(bucket, key, "serving partial origin payload without caching");
            return Ok(object);
        }

        let Object { info, body, .. } = object;
        let size = info.size;
        if let Err(err) = self
            .cache
            .put_object(bucket, key, info.metadata, body, size, None)
            .await
        {
            if body_failed.load(Ordering::Relaxed) {
                return Err(self.origin_failed(bucket, &origin_bucket, key, err.to_string()));
            }
            warn!(bucket, key, error = %err, "failed to populate cache");
            return Err(StoreError::operation_failed(format!("caching {bucket}/{key}"), err));
        }
        CacheStats::bump(&self.stats.origin_fills);
        info!(bucket, key, bytes = size, "cached object from origin");

        self.cache.get_object(bucket, key, range).await
    }

    /// Metadata lookup; origin answers are returned without touching the cache.
    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectInfo> {
        match self.cache.head_object(bucket, key).await {
            Ok(info) => {
                CacheStats::bump(&self.stats.cache_hits);
                return Ok(info);
            }
            Err(err) if !err.is_not_found() => return Err(err),
            Err(_) => {}
        }

        CacheStats::bump(&self.stats.cache_misses);
        let origin_bucket = self.namespace.origin_bucket(bucket);
        debug!(bucket, key, origin_bucket = %origin_bucket, "head miss, asking origin");
        self.from_origin(
            Instant::now() + self.origin_timeout,
            bucket,
            &origin_bucket,
            key,
            self.origin.head_object(&origin_bucket, key),
        )
        .await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        metadata: Metadata,
        body: ObjectBody,
        size: u64,
        conditions: Option<PutConditions>,
    ) -> StoreResult<PutObjectResult> {
        self.cache
            .put_object(bucket, key, metadata, body, size, conditions)
            .await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectDeleteResult> {
        self.cache.delete_object(bucket, key).await
    }

    async fn delete_multi(&self, bucket: &str, keys: &[String]) -> StoreResult<MultiDeleteResult> {
        self.cache.delete_multi(bucket, keys).await
    }

    /// Materialize the source through [`LazyStore::get_object`] so an
    /// origin-only source is cached first, then copy inside the cache.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        metadata: Metadata,
    ) -> StoreResult<CopyObjectResult> {
        drop(self.get_object(src_bucket, src_key, None).await?);
        self.cache
            .copy_object(src_bucket, src_key, dst_bucket, dst_key, metadata)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::object::{CONTENT_TYPE, body_from_bytes},
        services::memory_store::MemoryStore,
    };
    use bytes::Bytes;
    use std::{io, sync::atomic::AtomicUsize};

    /// Delegates to a `MemoryStore`, counting calls. Can be told to stall,
    /// to fail every call, or to hang once a get body has sent its data.
    #[derive(Default)]
    struct SpyStore {
        inner: MemoryStore,
        calls: AtomicUsize,
        delay: Option<Duration>,
        fail: bool,
        stall_body: bool,
    }

    impl SpyStore {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn record(&self) -> StoreResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(StoreError::Io(io::Error::other("disk unavailable")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Store for SpyStore {
        async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>> {
            self.record().await?;
            self.inner.list_buckets().await
        }
        async fn list_bucket(
            &self,
            bucket: &str,
            params: &ListObjectsParams,
        ) -> StoreResult<ListObjectsResult> {
            self.record().await?;
            self.inner.list_bucket(bucket, params).await
        }
        async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
            self.record().await?;
            self.inner.bucket_exists(bucket).await
        }
        async fn create_bucket(&self, bucket: &str) -> StoreResult<()> {
            self.record().await?;
            self.inner.create_bucket(bucket).await
        }
        async fn delete_bucket(&self, bucket: &str) -> StoreResult<()> {
            self.record().await?;
            self.inner.delete_bucket(bucket).await
        }
        async fn get_object(
            &self,
            bucket: &str,
            key: &str,
            range: Option<RangeRequest>,
        ) -> StoreResult<Object> {
            self.record().await?;
            let mut object = self.inner.get_object(bucket, key, range).await?;
            if self.stall_body {
                object.body = object.body.chain(stream::pending()).boxed();
            }
            Ok(object)
        }
        async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectInfo> {
            self.record().await?;
            self.inner.head_object(bucket, key).await
        }
        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            metadata: Metadata,
            body: ObjectBody,
            size: u64,
            conditions: Option<PutConditions>,
        ) -> StoreResult<PutObjectResult> {
            self.record().await?;
            self.inner
                .put_object(bucket, key, metadata, body, size, conditions)
                .await
        }
        async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectDeleteResult> {
            self.record().await?;
            self.inner.delete_object(bucket, key).await
        }
        async fn delete_multi(
            &self,
            bucket: &str,
            keys: &[String],
        ) -> StoreResult<MultiDeleteResult> {
            self.record().await?;
            self.inner.delete_multi(bucket, keys).await
        }
        async fn copy_object(
            &self,
            src_bucket: &str,
            src_key: &str,
            dst_bucket: &str,
            dst_key: &str,
            metadata: Metadata,
        ) -> StoreResult<CopyObjectResult> {
            self.record().await?;
            self.inner
                .copy_object(src_bucket, src_key, dst_bucket, dst_key, metadata)
                .await
        }
    }

    async fn seed(store: &dyn Store, bucket: &str, key: &str, data: &'static [u8], content_type: &str) {
        if !store.bucket_exists(bucket).await.unwrap() {
            store.create_bucket(bucket).await.unwrap();
        }
        let metadata = Metadata::from([(CONTENT_TYPE.to_string(), content_type.to_string())]);
        store
            .put_object(bucket, key, metadata, body_from_bytes(data), data.len() as u64, None)
            .await
            .unwrap();
    }

    struct Fixture {
        cache: Arc<MemoryStore>,
        origin: Arc<SpyStore>,
        lazy: LazyStore,
    }

    async fn fixture(origin: SpyStore) -> Fixture {
        let cache = Arc::new(MemoryStore::new());
        cache.create_bucket("dev-bucket").await.unwrap();
        let origin = Arc::new(origin);
        let lazy = LazyStore::new(cache.clone(), origin.clone());
        Fixture {
            cache,
            origin,
            lazy,
        }
    }

    #[tokio::test]
    async fn cache_hit_never_touches_origin() {
        let f = fixture(SpyStore::default()).await;
        seed(f.cache.as_ref(), "dev-bucket", "k", b"cached", "text/plain").await;

        let object = f.lazy.get_object("dev-bucket", "k", None).await.unwrap();
        assert_eq!(object.into_bytes().await.unwrap(), Bytes::from_static(b"cached"));
        f.lazy.head_object("dev-bucket", "k").await.unwrap();

        assert_eq!(f.origin.calls(), 0);
        assert_eq!(f.lazy.stats().snapshot().cache_hits, 2);
    }

    #[tokio::test]
    async fn miss_fills_cache_from_mapped_origin_bucket() {
        let f = fixture(SpyStore::default()).await;
        seed(&f.origin.inner, "prod-bucket", "report.csv", b"a,b,c", "text/csv").await;
        f.lazy.set_namespace_mapping(HashMap::from([(
            "dev-bucket".to_string(),
            "prod-bucket".to_string(),
        )]));

        let object = f.lazy.get_object("dev-bucket", "report.csv", None).await.unwrap();
        assert_eq!(object.info.content_type(), Some("text/csv"));
        assert_eq!(object.into_bytes().await.unwrap(), Bytes::from_static(b"a,b,c"));

        let cached = f.cache.get_object("dev-bucket", "report.csv", None).await.unwrap();
        assert_eq!(cached.info.content_type(), Some("text/csv"));
        assert_eq!(cached.into_bytes().await.unwrap(), Bytes::from_static(b"a,b,c"));
        assert!(matches!(
            f.cache.head_object("prod-bucket", "report.csv").await,
            Err(StoreError::BucketNotFound(_))
        ));

        // Second read is a hit.
        f.lazy.get_object("dev-bucket", "report.csv", None).await.unwrap();
        assert_eq!(f.origin.calls(), 1);
        let stats = f.lazy.stats().snapshot();
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.origin_fills, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn ranges_on_cached_objects() {
        let f = fixture(SpyStore::default()).await;
        seed(f.cache.as_ref(), "dev-bucket", "alpha", b"0123456789abcdefghij", "text/plain").await;

        let span = f
            .lazy
            .get_object("dev-bucket", "alpha", Some(RangeRequest::Span { start: 5, end: Some(9) }))
            .await
            .unwrap();
        assert_eq!(span.into_bytes().await.unwrap(), Bytes::from_static(b"56789"));

        let suffix = f
            .lazy
            .get_object("dev-bucket", "alpha", Some(RangeRequest::Suffix(5)))
            .await
            .unwrap();
        assert_eq!(suffix.into_bytes().await.unwrap(), Bytes::from_static(b"fghij"));
    }

    #[tokio::test]
    async fn partial_origin_payload_is_not_cached() {
        let f = fixture(SpyStore::default()).await;
        seed(&f.origin.inner, "dev-bucket", "alpha", b"0123456789abcdefghij", "text/plain").await;

        let object = f
            .lazy
            .get_object("dev-bucket", "alpha", Some(RangeRequest::Span { start: 5, end: Some(9) }))
            .await
            .unwrap();
        assert_eq!(object.into_bytes().await.unwrap(), Bytes::from_static(b"56789"));
        assert!(matches!(
            f.cache.head_object("dev-bucket", "alpha").await,
            Err(StoreError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn head_does_not_populate() {
        let f = fixture(SpyStore::default()).await;
        seed(&f.origin.inner, "dev-bucket", "k", b"hello", "text/plain").await;

        let info = f.lazy.head_object("dev-bucket", "k").await.unwrap();
        assert_eq!(info.size, 5);
        assert!(matches!(
            f.cache.head_object("dev-bucket", "k").await,
            Err(StoreError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn copy_from_origin_only_source_caches_both() {
        let f = fixture(SpyStore::default()).await;
        seed(&f.origin.inner, "dev-bucket", "src", b"payload", "text/plain").await;

        f.lazy
            .copy_object("dev-bucket", "src", "dev-bucket", "dst", Metadata::new())
            .await
            .unwrap();

        let src = f.cache.get_object("dev-bucket", "src", None).await.unwrap();
        assert_eq!(src.into_bytes().await.unwrap(), Bytes::from_static(b"payload"));
        let dst = f.cache.get_object("dev-bucket", "dst", None).await.unwrap();
        assert_eq!(dst.info.content_type(), Some("text/plain"));
        assert_eq!(dst.into_bytes().await.unwrap(), Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn absent_everywhere_is_key_not_found() {
        let f = fixture(SpyStore::default()).await;
        assert!(matches!(
            f.lazy.get_object("dev-bucket", "ghost", None).await,
            Err(StoreError::KeyNotFound(k)) if k == "ghost"
        ));
        assert!(matches!(
            f.lazy.head_object("dev-bucket", "ghost").await,
            Err(StoreError::KeyNotFound(_))
        ));
        assert_eq!(f.lazy.stats().snapshot().origin_errors, 2);
    }

    #[tokio::test]
    async fn cache_errors_other_than_absence_are_not_masked() {
        let cache = Arc::new(SpyStore {
            fail: true,
            ..Default::default()
        });
        let origin = Arc::new(SpyStore::default());
        let lazy = LazyStore::new(cache, origin.clone());

        assert!(matches!(
            lazy.get_object("dev-bucket", "k", None).await,
            Err(StoreError::Io(_))
        ));
        assert_eq!(origin.calls(), 0);
    }

    #[tokio::test]
    async fn failed_cache_write_is_operation_failed() {
        let cache = Arc::new(MemoryStore::new());
        let origin = Arc::new(SpyStore::default());
        seed(&origin.inner, "unprovisioned", "k", b"data", "text/plain").await;
        let lazy = LazyStore::new(cache, origin);

        assert!(matches!(
            lazy.get_object("unprovisioned", "k", None).await,
            Err(StoreError::OperationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn origin_timeout_is_key_not_found() {
        let f = fixture(SpyStore {
            delay: Some(Duration::from_millis(500)),
            ..Default::default()
        })
        .await;
        seed(&f.origin.inner, "dev-bucket", "slow", b"eventually", "text/plain").await;
        let lazy = LazyStore::new(f.cache.clone(), f.origin.clone())
            .with_origin_timeout(Duration::from_millis(20));

        assert!(matches!(
            lazy.get_object("dev-bucket", "slow", None).await,
            Err(StoreError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn stalled_origin_body_is_bounded_by_deadline() {
        let f = fixture(SpyStore {
            stall_body: true,
            ..Default::default()
        })
        .await;
        seed(&f.origin.inner, "dev-bucket", "stuck", b"hello", "text/plain").await;
        let lazy = LazyStore::new(f.cache.clone(), f.origin.clone())
            .with_origin_timeout(Duration::from_millis(50));

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            lazy.get_object("dev-bucket", "stuck", None),
        )
        .await
        .expect("origin deadline must end the request");
        assert!(matches!(result, Err(StoreError::KeyNotFound(k)) if k == "stuck"));
        assert_eq!(lazy.stats().snapshot().origin_errors, 1);
        assert!(matches!(
            f.cache.head_object("dev-bucket", "stuck").await,
            Err(StoreError::KeyNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn mapping_swaps_while_lookups_are_in_flight() {
        let origin = SpyStore::default();
        seed(&origin.inner, "prod-v1", "k", b"one", "text/plain").await;
        seed(&origin.inner, "prod-v2", "k", b"two", "text/plain").await;
        let f = fixture(origin).await;
        let v1 = HashMap::from([("dev-bucket".to_string(), "prod-v1".to_string())]);
        let v2 = HashMap::from([("dev-bucket".to_string(), "prod-v2".to_string())]);
        f.lazy.set_namespace_mapping(v1.clone());
        let lazy = Arc::new(f.lazy);

        let swapper = {
            let lazy = Arc::clone(&lazy);
            tokio::spawn(async move {
                for i in 0..200 {
                    let next = if i % 2 == 0 { v2.clone() } else { v1.clone() };
                    lazy.set_namespace_mapping(next);
                    tokio::task::yield_now().await;
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let lazy = Arc::clone(&lazy);
                tokio::spawn(async move {
                    for _ in 0..50 {
                        // HEAD never populates, so every call resolves the mapping.
                        let info = lazy.head_object("dev-bucket", "k").await;
                        assert!(
                            matches!(&info, Ok(i) if i.size == 3),
                            "lookup saw neither mapping: {info:?}"
                        );
                    }
                })
            })
            .collect();

        swapper.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(lazy.stats().snapshot().origin_errors, 0);
    }

    #[tokio::test]
    async fn writes_pass_through_to_cache_only() {
        let f = fixture(SpyStore::default()).await;
        f.lazy
            .put_object("dev-bucket", "k", Metadata::new(), body_from_bytes("v"), 1, None)
            .await
            .unwrap();
        f.lazy.delete_object("dev-bucket", "missing").await.unwrap();
        f.lazy.list_bucket("dev-bucket", &ListObjectsParams::default()).await.unwrap();
        assert!(f.lazy.bucket_exists("dev-bucket").await.unwrap());
        assert_eq!(f.origin.calls(), 0);
    }
}
