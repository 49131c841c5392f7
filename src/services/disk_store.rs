//! src/services/disk_store.rs
//!
//! DiskStore: durable cache backend. Metadata lives in SQLite, payloads on
//! local disk sharded beneath `base_path/{bucket}/{shard}/{shard}/{digest}`.
//! The file name is the MD5 of `bucket/key`, so any key S3 accepts (including
//! ones with `..` or a trailing `/`) maps to a safe path.

use crate::{
    models::{
        bucket::BucketInfo,
        listing::{ListObjectsParams, ListObjectsResult, ListingBuilder},
        object::{
            CopyObjectResult, DeleteError, Metadata, MultiDeleteResult, Object, ObjectBody,
            ObjectDeleteResult, ObjectInfo, PutConditions, PutObjectResult,
        },
        range::RangeRequest,
    },
    services::store::{Store, StoreError, StoreResult, ensure_body_size, ensure_conditions},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use md5::Context;
use sqlx::{
    FromRow, QueryBuilder, SqlitePool,
    sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");
const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(Clone)]
pub struct DiskStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

#[derive(FromRow)]
struct BucketRow {
    id: i64,
    name: String,
}

#[derive(FromRow)]
struct ObjectRow {
    key: String,
    size_bytes: i64,
    etag: String,
    metadata: String,
    last_modified: DateTime<Utc>,
}

impl ObjectRow {
    fn into_info(self) -> ObjectInfo {
        let metadata = serde_json::from_str(&self.metadata).unwrap_or_else(|err| {
            warn!(key = %self.key, error = %err, "discarding unreadable object metadata");
            Metadata::new()
        });
        ObjectInfo {
            key: self.key,
            size: u64::try_from(self.size_bytes).unwrap_or(0),
            etag: Some(self.etag),
            last_modified: self.last_modified,
            metadata,
        }
    }
}

impl DiskStore {
    /// Wrap an existing pool. Call [`DiskStore::migrate`] before first use.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Open (or create) a store rooted at `data_dir`: `meta.db` holds the
    /// SQLite metadata, `objects/` the payloads.
    pub async fn open(data_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let data_dir = data_dir.as_ref();
        let objects_dir = data_dir.join("objects");
        fs::create_dir_all(&objects_dir).await?;

        let options = SqliteConnectOptions::new()
            .filename(data_dir.join("meta.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::new(Arc::new(pool), objects_dir);
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Payload location for `bucket/key`. Parent directories may not exist yet.
    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        let mut path = self.bucket_root(bucket_name);
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(format!("{:x}", digest));
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<BucketRow> {
        sqlx::query_as::<_, BucketRow>("SELECT id, name FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))
    }

    async fn fetch_object(&self, bucket: &BucketRow, key: &str) -> StoreResult<Option<ObjectRow>> {
        Ok(sqlx::query_as::<_, ObjectRow>(
            "SELECT key, size_bytes, etag, metadata, last_modified
             FROM objects WHERE bucket_id = ? AND key = ?",
        )
        .bind(bucket.id)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?)
    }

    async fn require_object(&self, bucket: &BucketRow, key: &str) -> StoreResult<ObjectRow> {
        self.fetch_object(bucket, key)
            .await?
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    async fn upsert_object(
        &self,
        bucket: &BucketRow,
        key: &str,
        size: u64,
        etag: &str,
        metadata: &Metadata,
        last_modified: DateTime<Utc>,
    ) -> StoreResult<()> {
        let metadata = serde_json::to_string(metadata)
            .map_err(|err| StoreError::operation_failed("encoding object metadata", err))?;
        sqlx::query(
            r#"
            INSERT INTO objects (bucket_id, key, size_bytes, etag, metadata, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                metadata = excluded.metadata,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(bucket.id)
        .bind(key)
        .bind(i64::try_from(size).unwrap_or(i64::MAX))
        .bind(etag)
        .bind(metadata)
        .bind(last_modified)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Stream `body` into a temp file next to `final_path`, returning the temp
    /// path, byte count and MD5 hex. The temp file is removed on failure.
    async fn write_temp(
        &self,
        final_path: &Path,
        mut body: ObjectBody,
    ) -> StoreResult<(PathBuf, u64, String)> {
        let parent = final_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size: u64 = 0;
        let mut digest = Context::new();
        let written: io::Result<()> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                size += chunk.len() as u64;
                digest.consume(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        Ok((tmp_path, size, format!("{:x}", digest.compute())))
    }

    /// Move a completed temp file over the final payload path.
    async fn commit_temp(&self, tmp_path: &Path, final_path: &Path) -> StoreResult<()> {
        if let Err(err) = fs::rename(tmp_path, final_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(final_path).await?;
                fs::rename(tmp_path, final_path).await?;
            } else {
                let _ = fs::remove_file(tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        Ok(())
    }

    async fn remove_payload(&self, bucket_name: &str, key: &str) -> StoreResult<()> {
        let file_path = self.object_path(bucket_name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket_name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    async fn delete_one(&self, bucket: &BucketRow, key: &str) -> StoreResult<()> {
        ensure_key_valid(key)?;
        let result = sqlx::query("DELETE FROM objects WHERE bucket_id = ? AND key = ?")
            .bind(bucket.id)
            .bind(key)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() > 0 {
            self.remove_payload(&bucket.name, key).await?;
        }
        Ok(())
    }

    /// Recursively remove empty directories up to bucket root.
    ///
    /// Stops when the directory is not empty, is missing, is the root, or an
    /// unexpected I/O error occurs.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Store for DiskStore {
    async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>> {
        Ok(sqlx::query_as::<_, BucketInfo>(
            "SELECT name, created_at FROM buckets ORDER BY name ASC",
        )
        .fetch_all(&*self.db)
        .await?)
    }

    /// Keys are scanned in ascending byte order starting at the prefix (or
    /// marker) and handed to [`ListingBuilder`] until the page is full.
    async fn list_bucket(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> StoreResult<ListObjectsResult> {
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT key, size_bytes, etag, metadata, last_modified FROM objects WHERE bucket_id = ",
        );
        query.push_bind(bucket_rec.id);
        if let Some(prefix) = &params.prefix {
            query.push(" AND key >= ");
            query.push_bind(prefix.clone());
        }
        if let Some(marker) = &params.marker {
            query.push(" AND key > ");
            query.push_bind(marker.clone());
        }
        query.push(" ORDER BY key ASC");

        let mut listing = ListingBuilder::new(params);
        let mut rows = query.build_query_as::<ObjectRow>().fetch(&*self.db);
        while let Some(row) = rows.try_next().await? {
            if let Some(prefix) = params.prefix.as_deref() {
                if !row.key.starts_with(prefix) {
                    break;
                }
            }
            if !listing.push(row.into_info()) {
                break;
            }
        }
        Ok(listing.finish())
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        match self.fetch_bucket(bucket).await {
            Ok(_) => Ok(true),
            Err(StoreError::BucketNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> StoreResult<()> {
        validate_bucket_name(bucket)?;

        match sqlx::query("INSERT INTO buckets (name, created_at) VALUES (?, ?)")
            .bind(bucket)
            .bind(Utc::now())
            .execute(&*self.db)
            .await
        {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::BucketAlreadyExists(bucket.to_string()));
            }
            Err(err) => return Err(StoreError::Sqlx(err)),
        }

        fs::create_dir_all(self.bucket_root(bucket)).await?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StoreResult<()> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM objects WHERE bucket_id = ?")
            .bind(bucket_rec.id)
            .fetch_one(&*self.db)
            .await?;
        if remaining > 0 {
            return Err(StoreError::BucketNotEmpty(bucket.to_string()));
        }

        sqlx::query("DELETE FROM buckets WHERE id = ?")
            .bind(bucket_rec.id)
            .execute(&*self.db)
            .await?;

        let bucket_path = self.bucket_root(bucket);
        if let Err(err) = fs::remove_dir_all(&bucket_path).await {
            if err.kind() != ErrorKind::NotFound {
                debug!(
                    "failed to remove bucket directory {} after delete: {}",
                    bucket_path.display(),
                    err
                );
            }
        }
        Ok(())
    }

    async fn force_delete_bucket(&self, bucket: &str) -> StoreResult<()> {
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let mut tx = self.db.begin().await?;
        let removed = sqlx::query("DELETE FROM objects WHERE bucket_id = ?")
            .bind(bucket_rec.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM buckets WHERE id = ?")
            .bind(bucket_rec.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        match fs::remove_dir_all(self.bucket_root(bucket)).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::Io(err)),
        }
        debug!(bucket, objects = removed, "force-deleted bucket");
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<RangeRequest>,
    ) -> StoreResult<Object> {
        ensure_key_valid(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let info = self.require_object(&bucket_rec, key).await?.into_info();
        let resolved = match range {
            Some(r) => Some(r.resolve(info.size).ok_or(StoreError::InvalidRange)?),
            None => None,
        };

        let file_path = self.object_path(&bucket_rec.name, key);
        let mut file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::KeyNotFound(key.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;

        let body = match resolved {
            Some(r) => {
                file.seek(SeekFrom::Start(r.start)).await?;
                ReaderStream::new(file.take(r.length)).boxed()
            }
            None => ReaderStream::new(file).boxed(),
        };
        Ok(Object::new(info, resolved, body))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectInfo> {
        ensure_key_valid(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        Ok(self.require_object(&bucket_rec, key).await?.into_info())
    }

    /// Stream-upload an object to disk and update metadata.
    ///
    /// Bytes go to a temp file (MD5 and size computed on the way), which is
    /// fsynced and renamed into place only once the announced size checks out.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        metadata: Metadata,
        body: ObjectBody,
        size: u64,
        conditions: Option<PutConditions>,
    ) -> StoreResult<PutObjectResult> {
        ensure_key_valid(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        if conditions.is_some() {
            let current = self.fetch_object(&bucket_rec, key).await?;
            ensure_conditions(conditions.as_ref(), current.as_ref().map(|o| o.etag.as_str()))?;
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        let (tmp_path, written, etag) = self.write_temp(&file_path, body).await?;
        if let Err(err) = ensure_body_size(key, size, written) {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        self.commit_temp(&tmp_path, &file_path).await?;

        if let Err(err) = self
            .upsert_object(&bucket_rec, key, written, &etag, &metadata, Utc::now())
            .await
        {
            let _ = fs::remove_file(&file_path).await;
            return Err(err);
        }

        Ok(PutObjectResult {
            etag,
            version_id: None,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectDeleteResult> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.delete_one(&bucket_rec, key).await?;
        Ok(ObjectDeleteResult::default())
    }

    async fn delete_multi(&self, bucket: &str, keys: &[String]) -> StoreResult<MultiDeleteResult> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let mut result = MultiDeleteResult::default();
        for key in keys {
            match self.delete_one(&bucket_rec, key).await {
                Ok(()) => result.deleted.push(key.clone()),
                Err(err) => result.errors.push(DeleteError {
                    key: key.clone(),
                    code: err.code().to_string(),
                    message: err.to_string(),
                }),
            }
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
        ensure_key_valid(src_key)?;
        ensure_key_valid(dst_key)?;
        let src_rec = self.fetch_bucket(src_bucket).await?;
        let source = self.require_object(&src_rec, src_key).await?.into_info();
        let dst_rec = self.fetch_bucket(dst_bucket).await?;

        let metadata = if metadata.is_empty() {
            source.metadata
        } else {
            metadata
        };
        let etag = source.etag.unwrap_or_default();
        let last_modified = Utc::now();

        let same_object = src_rec.id == dst_rec.id && src_key == dst_key;
        if !same_object {
            let src_path = self.object_path(&src_rec.name, src_key);
            let dst_path = self.object_path(&dst_rec.name, dst_key);
            let file = File::open(&src_path).await.map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StoreError::KeyNotFound(src_key.to_string())
                } else {
                    StoreError::Io(err)
                }
            })?;
            let (tmp_path, written, _) = self
                .write_temp(&dst_path, ReaderStream::new(file).boxed())
                .await?;
            if let Err(err) = ensure_body_size(src_key, source.size, written) {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
            self.commit_temp(&tmp_path, &dst_path).await?;
        }

        self.upsert_object(&dst_rec, dst_key, source.size, &etag, &metadata, last_modified)
            .await?;

        Ok(CopyObjectResult {
            etag: Some(etag),
            last_modified,
        })
    }
}

fn ensure_key_valid(key: &str) -> StoreResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StoreError::InvalidObjectKey(key.to_string()));
    }
    Ok(())
}

/// Validate bucket name format.
///
/// Enforces S3-like naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
fn validate_bucket_name(name: &str) -> StoreResult<()> {
    let invalid = |reason: &str| StoreError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&name.len()) {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }
    if is_ipv4_like(name) {
        return Err(invalid("must not be formatted like an IP address"));
    }
    Ok(())
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::{CONTENT_TYPE, body_from_bytes};
    use bytes::Bytes;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, DiskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    async fn put(store: &DiskStore, bucket: &str, key: &str, data: &'static [u8]) {
        let meta = Metadata::from([
            (CONTENT_TYPE.to_string(), "text/plain".to_string()),
            ("x-amz-meta-owner".to_string(), "team-a".to_string()),
        ]);
        store
            .put_object(bucket, key, meta, body_from_bytes(data), data.len() as u64, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn put_get_round_trip_keeps_metadata() {
        let (_dir, store) = open_store().await;
        store.create_bucket("cache-bucket").await.unwrap();
        put(&store, "cache-bucket", "docs/readme.txt", b"hello world").await;

        let object = store
            .get_object("cache-bucket", "docs/readme.txt", None)
            .await
            .unwrap();
        assert_eq!(object.info.size, 11);
        assert_eq!(object.info.content_type(), Some("text/plain"));
        assert_eq!(
            object.info.metadata.get("x-amz-meta-owner").map(String::as_str),
            Some("team-a")
        );
        assert_eq!(
            object.info.etag.as_deref(),
            Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
        );
        assert_eq!(object.into_bytes().await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn reopen_sees_existing_objects() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DiskStore::open(dir.path()).await.unwrap();
            store.create_bucket("persisted").await.unwrap();
            put(&store, "persisted", "k", b"durable").await;
            store.db.close().await;
        }
        let store = DiskStore::open(dir.path()).await.unwrap();
        let object = store.get_object("persisted", "k", None).await.unwrap();
        assert_eq!(object.into_bytes().await.unwrap(), Bytes::from_static(b"durable"));
    }

    #[tokio::test]
    async fn ranged_reads_seek_into_the_file() {
        let (_dir, store) = open_store().await;
        store.create_bucket("ranges").await.unwrap();
        put(&store, "ranges", "alpha", b"0123456789abcdefghij").await;

        let span = store
            .get_object("ranges", "alpha", Some(RangeRequest::Span { start: 5, end: Some(9) }))
            .await
            .unwrap();
        assert_eq!(span.content_length(), 5);
        assert_eq!(span.into_bytes().await.unwrap(), Bytes::from_static(b"56789"));

        let suffix = store
            .get_object("ranges", "alpha", Some(RangeRequest::Suffix(5)))
            .await
            .unwrap();
        assert_eq!(suffix.into_bytes().await.unwrap(), Bytes::from_static(b"fghij"));
    }

    #[tokio::test]
    async fn odd_keys_are_stored_safely() {
        let (_dir, store) = open_store().await;
        store.create_bucket("odd-keys").await.unwrap();
        put(&store, "odd-keys", "folder/", b"").await;
        put(&store, "odd-keys", "../escape", b"x").await;

        assert_eq!(store.head_object("odd-keys", "folder/").await.unwrap().size, 0);
        assert_eq!(store.head_object("odd-keys", "../escape").await.unwrap().size, 1);
    }

    #[tokio::test]
    async fn missing_bucket_and_key_are_distinguished() {
        let (_dir, store) = open_store().await;
        assert!(matches!(
            store.get_object("no-such-bucket", "k", None).await,
            Err(StoreError::BucketNotFound(_))
        ));
        store.create_bucket("present").await.unwrap();
        assert!(matches!(
            store.get_object("present", "k", None).await,
            Err(StoreError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn truncated_upload_leaves_nothing_behind() {
        let (_dir, store) = open_store().await;
        store.create_bucket("uploads").await.unwrap();
        let err = store
            .put_object("uploads", "k", Metadata::new(), body_from_bytes("abc"), 100, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IncompleteBody { .. }));
        assert!(matches!(
            store.head_object("uploads", "k").await,
            Err(StoreError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_bucket_can_then_be_removed() {
        let (_dir, store) = open_store().await;
        store.create_bucket("deletes").await.unwrap();
        put(&store, "deletes", "k", b"v").await;

        assert!(matches!(
            store.delete_bucket("deletes").await,
            Err(StoreError::BucketNotEmpty(_))
        ));
        store.delete_object("deletes", "k").await.unwrap();
        store.delete_object("deletes", "k").await.unwrap();
        store.delete_bucket("deletes").await.unwrap();
        assert!(!store.bucket_exists("deletes").await.unwrap());
    }

    #[tokio::test]
    async fn force_delete_removes_contents() {
        let (_dir, store) = open_store().await;
        store.create_bucket("doomed").await.unwrap();
        put(&store, "doomed", "a", b"1").await;
        put(&store, "doomed", "b/c", b"2").await;

        store.force_delete_bucket("doomed").await.unwrap();
        assert!(!store.bucket_exists("doomed").await.unwrap());
        assert!(!store.bucket_root("doomed").exists());
    }

    #[tokio::test]
    async fn bucket_names_are_validated() {
        let (_dir, store) = open_store().await;
        for bad in ["ab", "Upper", "-dash", "a..b", "192.168.0.1"] {
            assert!(
                matches!(
                    store.create_bucket(bad).await,
                    Err(StoreError::InvalidBucketName { .. })
                ),
                "{bad} should be rejected"
            );
        }
        store.create_bucket("fine.name-1").await.unwrap();
        assert!(matches!(
            store.create_bucket("fine.name-1").await,
            Err(StoreError::BucketAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn copy_between_buckets() {
        let (_dir, store) = open_store().await;
        store.create_bucket("source").await.unwrap();
        store.create_bucket("target").await.unwrap();
        put(&store, "source", "src.txt", b"copy me").await;

        let result = store
            .copy_object("source", "src.txt", "target", "dst.txt", Metadata::new())
            .await
            .unwrap();
        assert!(result.etag.is_some());

        let copied = store.get_object("target", "dst.txt", None).await.unwrap();
        assert_eq!(copied.info.content_type(), Some("text/plain"));
        assert_eq!(copied.into_bytes().await.unwrap(), Bytes::from_static(b"copy me"));
    }

    #[tokio::test]
    async fn listing_with_prefix_and_pages() {
        let (_dir, store) = open_store().await;
        store.create_bucket("listing").await.unwrap();
        for key in ["a.txt", "logs/1", "logs/2", "logs/3", "z.txt"] {
            put(&store, "listing", key, b"x").await;
        }

        let params = ListObjectsParams {
            prefix: Some("logs/".into()),
            max_keys: 2,
            ..Default::default()
        };
        let first = store.list_bucket("listing", &params).await.unwrap();
        let keys: Vec<_> = first.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["logs/1", "logs/2"]);
        assert!(first.is_truncated);

        let second = store
            .list_bucket(
                "listing",
                &ListObjectsParams {
                    marker: first.next_marker.clone(),
                    ..params.clone()
                },
            )
            .await
            .unwrap();
        let keys: Vec<_> = second.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["logs/3"]);
        assert!(!second.is_truncated);

        let grouped = store
            .list_bucket(
                "listing",
                &ListObjectsParams {
                    delimiter: Some("/".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(grouped.common_prefixes, vec!["logs/"]);
        assert_eq!(grouped.objects.len(), 2);
    }
}
