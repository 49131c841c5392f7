//! HTTP handlers for object operations on `/{bucket}/{*key}`.
//! Bodies are streamed in both directions; nothing is buffered here.

use crate::{
    errors::AppError,
    models::{
        object::{CONTENT_TYPE, DEFAULT_CONTENT_TYPE, Metadata, ObjectInfo, PutConditions},
        range::RangeRequest,
    },
    services::s3_xml::xml_escape,
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{self, AsHeaderName},
    },
    response::Response,
};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use std::io;

const META_PREFIX: &str = "x-amz-meta-";

/// PUT `/{bucket}/{*key}`: upload, or server-side copy when
/// `x-amz-copy-source` is present.
pub async fn put_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    if let Some(source) = header_str(&headers, "x-amz-copy-source") {
        return copy_object(&state, &bucket, &key, source, &headers).await;
    }

    let size = header_str(&headers, header::CONTENT_LENGTH)
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| {
            AppError::new(
                StatusCode::LENGTH_REQUIRED,
                "MissingContentLength",
                "You must provide the Content-Length HTTP header.",
            )
        })?;

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other))
        .boxed();

    let result = state
        .store
        .put_object(
            &bucket,
            &key,
            metadata_from_headers(&headers),
            stream,
            size,
            conditions_from_headers(&headers),
        )
        .await?;

    let mut response = Response::new(Body::empty());
    insert_header(response.headers_mut(), header::ETAG, &format!("\"{}\"", result.etag));
    if let Some(version) = result.version_id.as_deref() {
        insert_header(
            response.headers_mut(),
            HeaderName::from_static("x-amz-version-id"),
            version,
        );
    }
    Ok(response)
}

async fn copy_object(
    state: &AppState,
    bucket: &str,
    key: &str,
    source: &str,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let (src_bucket, src_key) = parse_copy_source(source).ok_or_else(|| {
        AppError::new(
            StatusCode::BAD_REQUEST,
            "InvalidArgument",
            "Copy Source must mention the source bucket and key: sourcebucket/sourcekey",
        )
    })?;

    let replace = header_str(headers, "x-amz-metadata-directive")
        .is_some_and(|d| d.eq_ignore_ascii_case("REPLACE"));
    let metadata = if replace {
        metadata_from_headers(headers)
    } else {
        Metadata::new()
    };

    let result = state
        .store
        .copy_object(&src_bucket, &src_key, bucket, key, metadata)
        .await?;

    let xml = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<CopyObjectResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
            "<LastModified>{}</LastModified><ETag>{}</ETag>",
            "</CopyObjectResult>"
        ),
        result
            .last_modified
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        xml_escape(&format!("\"{}\"", result.etag.unwrap_or_default())),
    );
    Ok(xml_response(StatusCode::OK, xml))
}

/// GET `/{bucket}/{*key}`: stream the object, honouring a single `Range`.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let range = header_str(&headers, header::RANGE).and_then(RangeRequest::from_header);
    let object = state.store.get_object(&bucket, &key, range).await?;

    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &object.info, object.content_length());
    if let Some(content_range) = object.content_range() {
        *response.status_mut() = StatusCode::PARTIAL_CONTENT;
        insert_header(response.headers_mut(), header::CONTENT_RANGE, &content_range);
    }
    *response.body_mut() = Body::from_stream(object.body);
    Ok(response)
}

/// HEAD `/{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let info = state.store.head_object(&bucket, &key).await?;
    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &info, info.size);
    Ok(response)
}

/// DELETE `/{bucket}/{*key}`: succeeds whether or not the key exists.
pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let result = state.store.delete_object(&bucket, &key).await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    if result.is_delete_marker {
        response.headers_mut().insert(
            HeaderName::from_static("x-amz-delete-marker"),
            HeaderValue::from_static("true"),
        );
    }
    if let Some(version) = result.version_id.as_deref() {
        insert_header(
            response.headers_mut(),
            HeaderName::from_static("x-amz-version-id"),
            version,
        );
    }
    Ok(response)
}

pub(crate) fn header_str(headers: &HeaderMap, name: impl AsHeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub(crate) fn xml_response(status: StatusCode, xml: String) -> Response {
    let mut response = Response::new(Body::from(xml));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    response
}

/// IMF-fixdate, as used by `Last-Modified`.
pub(crate) fn http_date(at: &DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// `Content-Type` plus every `x-amz-meta-*` header.
fn metadata_from_headers(headers: &HeaderMap) -> Metadata {
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
    metadata
}

fn conditions_from_headers(headers: &HeaderMap) -> Option<PutConditions> {
    let conditions = PutConditions {
        if_match: header_str(headers, header::IF_MATCH).map(str::to_string),
        if_none_match: header_str(headers, header::IF_NONE_MATCH).map(str::to_string),
    };
    (conditions != PutConditions::default()).then_some(conditions)
}

/// Split `x-amz-copy-source` (`/bucket/key` or `bucket/key`, URL-encoded,
/// optionally with `?versionId=`) into bucket and key.
fn parse_copy_source(raw: &str) -> Option<(String, String)> {
    let raw = raw.split_once('?').map_or(raw, |(path, _)| path);
    let decoded = urlencoding::decode(raw).ok()?;
    let (bucket, key) = decoded.trim_start_matches('/').split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket.to_string(), key.to_string()))
}

fn set_object_headers(headers: &mut HeaderMap, info: &ObjectInfo, length: u64) {
    let content_type = info.content_type().unwrap_or(DEFAULT_CONTENT_TYPE);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if let Some(etag) = info.etag.as_ref() {
        insert_header(headers, header::ETAG, &format!("\"{}\"", etag));
    }
    insert_header(headers, header::LAST_MODIFIED, &http_date(&info.last_modified));

    for (name, value) in &info.metadata {
        if name.starts_with(META_PREFIX) {
            if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
                insert_header(headers, name, value);
            }
        }
    }
}
