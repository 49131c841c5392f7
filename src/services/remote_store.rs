//! RemoteStore: a [`Store`] backed by a path-style S3-compatible endpoint.
//!
//! Used for the origin and for the `localstack` cache backend. Bodies are
//! streamed in both directions; failures go through
//! `error_translation::translate`.

use crate::{
    models::{
        bucket::BucketInfo,
        listing::{ListObjectsParams, ListObjectsResult, MAX_KEYS_LIMIT},
        object::{
            CONTENT_TYPE, CopyObjectResult, DeleteError, Metadata, MultiDeleteResult, Object,
            ObjectBody, ObjectDeleteResult, ObjectInfo, PutConditions, PutObjectResult,
            normalize_etag,
        },
        range::{ObjectRange, RangeRequest},
    },
    services::{
        error_translation::{OriginError, bucket_exists_from, create_bucket_body, translate},
        s3_xml::{element_text, elements, xml_escape},
        sigv4::{Credentials, Signer},
        store::{Store, StoreError, StoreResult},
    },
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use reqwest::{
    Client, Method, Response, StatusCode, Url,
    header::{self, HeaderMap, HeaderName, HeaderValue},
};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tracing::debug;

const META_PREFIX: &str = "x-amz-meta-";

pub struct RemoteStore {
    client: Client,
    endpoint: String,
    region: String,
    signer: Option<Signer>,
}

impl RemoteStore {
    /// Client for `endpoint` (e.g. `http://localhost:4566`). Requests are
    /// anonymous until [`RemoteStore::with_credentials`] is applied.
    pub fn new(
        endpoint: impl Into<String>,
        region: impl Into<String>,
        connect_timeout: Duration,
    ) -> StoreResult<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| StoreError::operation_failed("building HTTP client", err))?;
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Url::parse(&endpoint).map_err(|err| {
            StoreError::operation_failed(format!("invalid endpoint `{endpoint}`"), err)
        })?;
        Ok(Self {
            client,
            endpoint,
            region: region.into(),
            signer: None,
        })
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.signer = credentials.map(|c| Signer::new(c, self.region.clone()));
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, bucket: Option<&str>, key: Option<&str>, query: &[(&str, String)]) -> StoreResult<Url> {
        let mut raw = self.endpoint.clone();
        raw.push('/');
        if let Some(bucket) = bucket {
            raw.push_str(&urlencoding::encode(bucket));
        }
        if let Some(key) = key {
            raw.push('/');
            raw.push_str(&encode_key(key));
        }
        if !query.is_empty() {
            raw.push('?');
            let pairs: Vec<String> = query
                .iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        urlencoding::encode(k).into_owned()
                    } else {
                        format!("{}={}", urlencoding::encode(k), urlencoding::encode(v))
                    }
                })
                .collect();
            raw.push_str(&pairs.join("&"));
        }
        Url::parse(&raw)
            .map_err(|err| StoreError::operation_failed(format!("building URL `{raw}`"), err))
    }

    /// Sign and execute one request. Non-2xx responses become an
    /// [`OriginError::Response`] carrying the decoded S3 error code.
    async fn send(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<reqwest::Body>,
    ) -> Result<Response, OriginError> {
        debug!(%method, %url, "origin request");
        let mut builder = self.client.request(method.clone(), url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let mut request = builder.build().map_err(OriginError::transport)?;
        if let Some(signer) = &self.signer {
            let url = request.url().clone();
            signer
                .sign(&method, &url, request.headers_mut(), Utc::now())
                .map_err(OriginError::transport)?;
        }

        let response = self
            .client
            .execute(request)
            .await
            .map_err(OriginError::transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(OriginError::from_response(status, &body))
    }

    /// Read a successful response body, treating transport failures as errors.
    async fn read_text(response: Response) -> Result<String, OriginError> {
        response.text().await.map_err(OriginError::transport)
    }
}

#[async_trait]
impl Store for RemoteStore {
    async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>> {
        let url = self.url(None, None, &[])?;
        let xml = async {
            let response = self.send(Method::GET, url, HeaderMap::new(), None).await?;
            Self::read_text(response).await
        }
        .await
        .map_err(|err| translate(err, "", None))?;

        Ok(elements(&xml, "Bucket")
            .into_iter()
            .filter_map(|block| {
                let name = element_text(block, "Name")?;
                let created_at = element_text(block, "CreationDate")
                    .and_then(|raw| parse_timestamp(&raw))
                    .unwrap_or_else(Utc::now);
                Some(BucketInfo::new(name, created_at))
            })
            .collect())
    }

    /// Uses ListObjects v1 so `marker` keeps its exclusive-lower-bound meaning.
    async fn list_bucket(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> StoreResult<ListObjectsResult> {
        let mut query = vec![(
            "max-keys",
            params.max_keys.clamp(1, MAX_KEYS_LIMIT).to_string(),
        )];
        if let Some(prefix) = &params.prefix {
            query.push(("prefix", prefix.clone()));
        }
        if let Some(delimiter) = &params.delimiter {
            query.push(("delimiter", delimiter.clone()));
        }
        if let Some(marker) = &params.marker {
            query.push(("marker", marker.clone()));
        }
        let url = self.url(Some(bucket), None, &query)?;

        let xml = async {
            let response = self.send(Method::GET, url, HeaderMap::new(), None).await?;
            Self::read_text(response).await
        }
        .await
        .map_err(|err| translate(err, bucket, None))?;

        Ok(parse_list_objects(&xml))
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        let url = self.url(Some(bucket), None, &[])?;
        let outcome = self
            .send(Method::HEAD, url, HeaderMap::new(), None)
            .await
            .map(|_| ())
            .map_err(|err| translate(err, bucket, None));
        bucket_exists_from(outcome)
    }

    async fn create_bucket(&self, bucket: &str) -> StoreResult<()> {
        let url = self.url(Some(bucket), None, &[])?;
        let mut headers = HeaderMap::new();
        let body = create_bucket_body(&self.region).map(|xml| {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/xml"));
            reqwest::Body::from(xml)
        });
        self.send(Method::PUT, url, headers, body)
            .await
            .map_err(|err| translate(err, bucket, None))?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StoreResult<()> {
        let url = self.url(Some(bucket), None, &[])?;
        self.send(Method::DELETE, url, HeaderMap::new(), None)
            .await
            .map_err(|err| translate(err, bucket, None))?;
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<RangeRequest>,
    ) -> StoreResult<Object> {
        let url = self.url(Some(bucket), Some(key), &[])?;
        let mut headers = HeaderMap::new();
        if let Some(range) = range {
            headers.insert(header::RANGE, header_value(&range.to_string())?);
        }
        let response = self
            .send(Method::GET, url, headers, None)
            .await
            .map_err(|err| translate(err, bucket, Some(key)))?;

        let content_length = response.content_length().unwrap_or(0);
        let served = if response.status() == StatusCode::PARTIAL_CONTENT {
            response
                .headers()
                .get(header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(ObjectRange::from_content_range)
        } else {
            None
        };
        let (range, size, size_known) = match served {
            Some((range, Some(total))) => (Some(range), total, true),
            // Total reported as `*`: all we know is where the range ends.
            Some((range, None)) => (Some(range), range.end() + 1, false),
            None => (None, content_length, true),
        };

        let info = object_info_from_headers(key, response.headers(), size);
        let body = response.bytes_stream().map_err(io::Error::other).boxed();
        let object = Object::new(info, range, body);
        Ok(if size_known {
            object
        } else {
            object.with_unknown_size()
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectInfo> {
        let url = self.url(Some(bucket), Some(key), &[])?;
        let response = self
            .send(Method::HEAD, url, HeaderMap::new(), None)
            .await
            .map_err(|err| translate(err, bucket, Some(key)))?;
        let size = header_str(response.headers(), header::CONTENT_LENGTH)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(object_info_from_headers(key, response.headers(), size))
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
        let url = self.url(Some(bucket), Some(key), &[])?;
        let mut headers = metadata_headers(&metadata)?;
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
        if let Some(conditions) = &conditions {
            if let Some(etag) = &conditions.if_match {
                headers.insert(header::IF_MATCH, header_value(etag)?);
            }
            if let Some(etag) = &conditions.if_none_match {
                headers.insert(header::IF_NONE_MATCH, header_value(etag)?);
            }
        }

        let written = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&written);
        let counted = body.inspect_ok(move |chunk| {
            counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        });

        let outcome = self
            .send(Method::PUT, url, headers, Some(reqwest::Body::wrap_stream(counted)))
            .await;
        let actual = written.load(Ordering::Relaxed);
        if actual != size {
            return Err(StoreError::IncompleteBody {
                key: key.to_string(),
                expected: size,
                actual,
            });
        }
        let response = outcome.map_err(|err| translate(err, bucket, Some(key)))?;

        Ok(PutObjectResult {
            etag: header_str(response.headers(), header::ETAG)
                .map(normalize_etag)
                .unwrap_or_default(),
            version_id: header_str(response.headers(), "x-amz-version-id").map(str::to_string),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectDeleteResult> {
        let url = self.url(Some(bucket), Some(key), &[])?;
        let response = self
            .send(Method::DELETE, url, HeaderMap::new(), None)
            .await
            .map_err(|err| translate(err, bucket, Some(key)))?;
        Ok(ObjectDeleteResult {
            is_delete_marker: header_str(response.headers(), "x-amz-delete-marker")
                == Some("true"),
            version_id: header_str(response.headers(), "x-amz-version-id").map(str::to_string),
        })
    }

    async fn delete_multi(&self, bucket: &str, keys: &[String]) -> StoreResult<MultiDeleteResult> {
        if keys.is_empty() {
            return Ok(MultiDeleteResult::default());
        }
        let url = self.url(Some(bucket), None, &[("delete", String::new())])?;

        let mut payload = String::from("<Delete><Quiet>false</Quiet>");
        for key in keys {
            payload.push_str(&format!("<Object><Key>{}</Key></Object>", xml_escape(key)));
        }
        payload.push_str("</Delete>");

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        let digest = md5::compute(payload.as_bytes());
        headers.insert(
            HeaderName::from_static("content-md5"),
            header_value(&general_purpose::STANDARD.encode(digest.0))?,
        );

        let xml = async {
            let response = self
                .send(Method::POST, url, headers, Some(reqwest::Body::from(payload)))
                .await?;
            Self::read_text(response).await
        }
        .await
        .map_err(|err| translate(err, bucket, None))?;

        Ok(parse_delete_result(&xml))
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        metadata: Metadata,
    ) -> StoreResult<CopyObjectResult> {
        let url = self.url(Some(dst_bucket), Some(dst_key), &[])?;
        let mut headers = metadata_headers(&metadata)?;
        headers.insert(
            HeaderName::from_static("x-amz-copy-source"),
            header_value(&format!(
                "/{}/{}",
                urlencoding::encode(src_bucket),
                encode_key(src_key)
            ))?,
        );
        if !metadata.is_empty() {
            headers.insert(
                HeaderName::from_static("x-amz-metadata-directive"),
                HeaderValue::from_static("REPLACE"),
            );
        }

        let xml = async {
            let response = self.send(Method::PUT, url, headers, None).await?;
            let status = response.status();
            let xml = Self::read_text(response).await?;
            // S3 can report a copy failure inside a 200 response.
            if !elements(&xml, "Error").is_empty() {
                return Err(OriginError::from_response(status, &xml));
            }
            Ok(xml)
        }
        .await
        .map_err(|err| translate(err, dst_bucket, Some(dst_key)))?;

        Ok(CopyObjectResult {
            etag: element_text(&xml, "ETag").map(|e| normalize_etag(&e)),
            last_modified: element_text(&xml, "LastModified")
                .and_then(|raw| parse_timestamp(&raw))
                .unwrap_or_else(Utc::now),
        })
    }
}

/// Percent-encode each `/`-separated segment of a key, keeping the slashes.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn header_value(value: &str) -> StoreResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|err| StoreError::operation_failed(format!("invalid header value `{value}`"), err))
}

fn header_str(headers: &HeaderMap, name: impl header::AsHeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `Content-Type` and `x-amz-meta-*` request headers for `metadata`.
fn metadata_headers(metadata: &Metadata) -> StoreResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in metadata {
        if name.eq_ignore_ascii_case(CONTENT_TYPE) {
            headers.insert(header::CONTENT_TYPE, header_value(value)?);
        } else if name.to_ascii_lowercase().starts_with(META_PREFIX) {
            let header_name = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
                .map_err(|err| {
                    StoreError::operation_failed(format!("invalid metadata key `{name}`"), err)
                })?;
            headers.insert(header_name, header_value(value)?);
        }
    }
    Ok(headers)
}

fn object_info_from_headers(key: &str, headers: &HeaderMap, size: u64) -> ObjectInfo {
    let mut metadata = Metadata::new();
    if let Some(content_type) = header_str(headers, header::CONTENT_TYPE) {
        metadata.insert(CONTENT_TYPE.to_string(), content_type.to_string());
    }
    for (name, value) in headers {
        if name.as_str().starts_with(META_PREFIX) {
            if let Ok(value) = value.to_str() {
                metadata.insert(name.as_str().to_string(), value.to_string());
            }
        }
    }

    ObjectInfo {
        key: key.to_string(),
        size,
        etag: header_str(headers, header::ETAG).map(normalize_etag),
        last_modified: header_str(headers, header::LAST_MODIFIED)
            .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
        metadata,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_list_objects(xml: &str) -> ListObjectsResult {
    let objects: Vec<ObjectInfo> = elements(xml, "Contents")
        .into_iter()
        .filter_map(|block| {
            Some(ObjectInfo {
                key: element_text(block, "Key")?,
                size: element_text(block, "Size")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
                etag: element_text(block, "ETag").map(|e| normalize_etag(&e)),
                last_modified: element_text(block, "LastModified")
                    .and_then(|raw| parse_timestamp(&raw))
                    .unwrap_or_else(Utc::now),
                metadata: Metadata::new(),
            })
        })
        .collect();
    let common_prefixes: Vec<String> = elements(xml, "CommonPrefixes")
        .into_iter()
        .filter_map(|block| element_text(block, "Prefix"))
        .collect();
    let is_truncated = element_text(xml, "IsTruncated").as_deref() == Some("true");

    // NextMarker is only sent when a delimiter was used.
    let next_marker = if is_truncated {
        element_text(xml, "NextMarker")
            .filter(|m| !m.is_empty())
            .or_else(|| {
                let last_key = objects.last().map(|o| o.key.clone());
                let last_prefix = common_prefixes.last().cloned();
                last_key.max(last_prefix)
            })
    } else {
        None
    };

    ListObjectsResult {
        objects,
        common_prefixes,
        is_truncated,
        next_marker,
    }
}

fn parse_delete_result(xml: &str) -> MultiDeleteResult {
    MultiDeleteResult {
        deleted: elements(xml, "Deleted")
            .into_iter()
            .filter_map(|block| element_text(block, "Key"))
            .collect(),
        errors: elements(xml, "Error")
            .into_iter()
            .filter_map(|block| {
                Some(DeleteError {
                    key: element_text(block, "Key")?,
                    code: element_text(block, "Code").unwrap_or_default(),
                    message: element_text(block, "Message").unwrap_or_default(),
                })
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::object::body_from_bytes,
        services::{lazy_store::LazyStore, memory_store::MemoryStore},
    };
    use bytes::Bytes;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, header, header_exists, method, path, query_param},
    };

    async fn store(server: &MockServer, region: &str) -> RemoteStore {
        RemoteStore::new(server.uri(), region, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn get_object_reads_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prod-bucket/docs/readme.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain")
                    .insert_header("etag", "\"5eb63bbbe01eeed093cb22bb8f5acdc3\"")
                    .insert_header("x-amz-meta-owner", "team-a")
                    .insert_header("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT")
                    .set_body_bytes(b"hello world".to_vec()),
            )
            .mount(&server)
            .await;

        let remote = store(&server, "us-east-1").await;
        let object = remote
            .get_object("prod-bucket", "docs/readme.txt", None)
            .await
            .unwrap();
        assert_eq!(object.info.size, 11);
        assert!(object.range.is_none());
        assert_eq!(object.info.content_type(), Some("text/plain"));
        assert_eq!(
            object.info.etag.as_deref(),
            Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
        );
        assert_eq!(
            object.info.metadata.get("x-amz-meta-owner").map(String::as_str),
            Some("team-a")
        );
        assert_eq!(
            object.info.last_modified.to_rfc3339(),
            "2015-10-21T07:28:00+00:00"
        );
        assert_eq!(object.into_bytes().await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn ranged_get_reports_partial_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b/alpha"))
            .and(header("range", "bytes=5-9"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-range", "bytes 5-9/20")
                    .set_body_bytes(b"56789".to_vec()),
            )
            .mount(&server)
            .await;

        let remote = store(&server, "us-east-1").await;
        let object = remote
            .get_object("b", "alpha", Some(RangeRequest::Span { start: 5, end: Some(9) }))
            .await
            .unwrap();
        assert_eq!(object.range, Some(ObjectRange { start: 5, length: 5 }));
        assert_eq!(object.info.size, 20);
        assert!(!object.is_complete());
        assert_eq!(object.into_bytes().await.unwrap(), Bytes::from_static(b"56789"));
    }

    #[tokio::test]
    async fn ranged_get_with_unknown_total_is_never_complete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b/k"))
            .and(header("range", "bytes=0-4"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-range", "bytes 0-4/*")
                    .set_body_bytes(b"01234".to_vec()),
            )
            .mount(&server)
            .await;

        let remote = store(&server, "us-east-1").await;
        let object = remote
            .get_object("b", "k", Some(RangeRequest::Span { start: 0, end: Some(4) }))
            .await
            .unwrap();
        assert_eq!(object.range, Some(ObjectRange { start: 0, length: 5 }));
        assert!(!object.size_known);
        assert!(!object.is_complete());
        assert_eq!(object.content_range().as_deref(), Some("bytes 0-4/*"));
    }

    #[tokio::test]
    async fn lazy_store_does_not_cache_range_of_unknown_total() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b/k"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-range", "bytes 0-4/*")
                    .set_body_bytes(b"01234".to_vec()),
            )
            .mount(&server)
            .await;

        let cache = Arc::new(MemoryStore::new());
        cache.create_bucket("b").await.unwrap();
        let lazy = LazyStore::new(cache.clone(), Arc::new(store(&server, "us-east-1").await));

        let object = lazy
            .get_object("b", "k", Some(RangeRequest::Span { start: 0, end: Some(4) }))
            .await
            .unwrap();
        assert_eq!(object.into_bytes().await.unwrap(), Bytes::from_static(b"01234"));
        assert!(matches!(
            cache.head_object("b", "k").await,
            Err(StoreError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_key_and_bodiless_head() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string(
                "<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/b/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let remote = store(&server, "us-east-1").await;
        assert!(matches!(
            remote.get_object("b", "missing", None).await,
            Err(StoreError::KeyNotFound(k)) if k == "missing"
        ));
        assert!(matches!(
            remote.head_object("b", "missing").await,
            Err(StoreError::AmbiguousNotFound)
        ));
    }

    #[tokio::test]
    async fn create_bucket_omits_constraint_in_us_east_1() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/new-bucket"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        store(&server, "us-east-1")
            .await
            .create_bucket("new-bucket")
            .await
            .unwrap();
        store(&server, "eu-west-1")
            .await
            .create_bucket("new-bucket")
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].body.is_empty());
        let body = String::from_utf8(requests[1].body.clone()).unwrap();
        assert!(body.contains("<LocationConstraint>eu-west-1</LocationConstraint>"));
    }

    #[tokio::test]
    async fn bucket_exists_maps_404_to_false() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/present"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/absent"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/forbidden"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let remote = store(&server, "us-east-1").await;
        assert!(remote.bucket_exists("present").await.unwrap());
        assert!(!remote.bucket_exists("absent").await.unwrap());
        assert!(matches!(
            remote.bucket_exists("forbidden").await,
            Err(StoreError::Remote { code, .. }) if code == "Forbidden"
        ));
    }

    #[tokio::test]
    async fn put_object_streams_body_with_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/b/k.txt"))
            .and(header("content-type", "text/plain"))
            .and(header("x-amz-meta-owner", "team-a"))
            .and(header("if-none-match", "*"))
            .respond_with(ResponseTemplate::new(200).insert_header("etag", "\"abc123\""))
            .mount(&server)
            .await;

        let remote = store(&server, "us-east-1").await;
        let metadata = Metadata::from([
            (CONTENT_TYPE.to_string(), "text/plain".to_string()),
            ("x-amz-meta-owner".to_string(), "team-a".to_string()),
        ]);
        let conditions = PutConditions {
            if_none_match: Some("*".into()),
            ..Default::default()
        };
        let result = remote
            .put_object("b", "k.txt", metadata, body_from_bytes("hello"), 5, Some(conditions))
            .await
            .unwrap();
        assert_eq!(result.etag, "abc123");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].body, b"hello".to_vec());
    }

    #[tokio::test]
    async fn list_bucket_parses_contents_and_prefixes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .and(query_param("prefix", "photos/"))
            .and(query_param("delimiter", "/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(concat!(
                "<ListBucketResult><Name>b</Name><Prefix>photos/</Prefix>",
                "<IsTruncated>true</IsTruncated>",
                "<Contents><Key>photos/a&amp;b.jpg</Key><Size>42</Size>",
                "<ETag>&quot;abc&quot;</ETag><LastModified>2024-01-01T00:00:00.000Z</LastModified></Contents>",
                "<CommonPrefixes><Prefix>photos/2024/</Prefix></CommonPrefixes>",
                "</ListBucketResult>"
            )))
            .mount(&server)
            .await;

        let remote = store(&server, "us-east-1").await;
        let params = ListObjectsParams {
            prefix: Some("photos/".into()),
            delimiter: Some("/".into()),
            ..Default::default()
        };
        let result = remote.list_bucket("b", &params).await.unwrap();
        assert_eq!(result.objects.len(), 1);
        assert_eq!(result.objects[0].key, "photos/a&b.jpg");
        assert_eq!(result.objects[0].size, 42);
        assert_eq!(result.objects[0].etag.as_deref(), Some("abc"));
        assert_eq!(result.common_prefixes, vec!["photos/2024/"]);
        assert!(result.is_truncated);
        assert_eq!(result.next_marker.as_deref(), Some("photos/a&b.jpg"));
    }

    #[tokio::test]
    async fn delete_multi_reports_per_key_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/b"))
            .and(query_param("delete", ""))
            .and(header_exists("content-md5"))
            .and(body_string_contains("<Key>gone</Key>"))
            .respond_with(ResponseTemplate::new(200).set_body_string(concat!(
                "<DeleteResult><Deleted><Key>gone</Key></Deleted>",
                "<Error><Key>locked</Key><Code>AccessDenied</Code><Message>Access Denied</Message></Error>",
                "</DeleteResult>"
            )))
            .mount(&server)
            .await;

        let remote = store(&server, "us-east-1").await;
        let result = remote
            .delete_multi("b", &["gone".to_string(), "locked".to_string()])
            .await
            .unwrap();
        assert_eq!(result.deleted, vec!["gone"]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].key, "locked");
        assert_eq!(result.errors[0].code, "AccessDenied");
    }

    #[tokio::test]
    async fn copy_error_inside_200_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/b/dst"))
            .and(header("x-amz-copy-source", "/b/src"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<Error><Code>InternalError</Code><Message>We encountered an internal error.</Message></Error>",
            ))
            .mount(&server)
            .await;

        let remote = store(&server, "us-east-1").await;
        let err = remote
            .copy_object("b", "src", "b", "dst", Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Remote { code, .. } if code == "InternalError"));
    }

    #[tokio::test]
    async fn signed_requests_carry_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/b/k"))
            .and(header_exists("authorization"))
            .and(header("x-amz-content-sha256", "UNSIGNED-PAYLOAD"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let remote = store(&server, "us-east-1").await.with_credentials(Some(Credentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "secret".into(),
            session_token: None,
        }));
        remote.delete_object("b", "k").await.unwrap();
    }

    #[test]
    fn keys_keep_their_slashes() {
        assert_eq!(encode_key("a b/c+d/é"), "a%20b/c%2Bd/%C3%A9");
        assert_eq!(encode_key("folder/"), "folder/");
    }
}
