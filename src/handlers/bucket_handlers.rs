//! HTTP handlers for service- and bucket-level operations.

use crate::{
    errors::AppError,
    handlers::object_handlers::xml_response,
    models::listing::{ListObjectsParams, ListObjectsResult, MAX_KEYS_LIMIT},
    services::s3_xml::{element_text, elements, xml_escape},
    state::AppState,
};
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose};
use chrono::SecondsFormat;
use serde::Deserialize;
use std::collections::HashMap;

const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Query params accepted by ListObjects (v1) and ListObjectsV2.
#[derive(Debug, Default, Deserialize)]
pub struct ListObjectsQuery {
    #[serde(rename = "list-type")]
    pub list_type: Option<u8>,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
    #[serde(rename = "start-after")]
    pub start_after: Option<String>,
    pub marker: Option<String>,
}

/// GET `/`: list buckets.
pub async fn list_buckets(State(state): State<AppState>) -> Result<Response, AppError> {
    let buckets = state.store.list_buckets().await?;

    let mut xml = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<ListAllMyBucketsResult xmlns="{}">"#,
            "<Owner><ID>s3lazy</ID><DisplayName>s3lazy</DisplayName></Owner><Buckets>"
        ),
        S3_XMLNS
    );
    for bucket in &buckets {
        xml.push_str(&format!(
            "<Bucket><Name>{}</Name><CreationDate>{}</CreationDate></Bucket>",
            xml_escape(&bucket.name),
            bucket.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
    }
    xml.push_str("</Buckets></ListAllMyBucketsResult>");
    Ok(xml_response(StatusCode::OK, xml))
}

/// GET `/{bucket}`: list objects; `list-type=2` selects the v2 dialect.
pub async fn list_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<ListObjectsQuery>,
) -> Result<Response, AppError> {
    let v2 = match q.list_type {
        None | Some(1) => false,
        Some(2) => true,
        Some(other) => {
            return Err(AppError::new(
                StatusCode::BAD_REQUEST,
                "InvalidArgument",
                format!("Unsupported list-type {other}"),
            ));
        }
    };

    let marker = if v2 {
        match q.continuation_token.as_deref() {
            Some(token) => Some(decode_continuation_token(token)?),
            None => q.start_after.clone(),
        }
    } else {
        q.marker.clone()
    };

    let params = ListObjectsParams {
        prefix: q.prefix.clone().filter(|p| !p.is_empty()),
        delimiter: q.delimiter.clone().filter(|d| !d.is_empty()),
        marker: marker.filter(|m| !m.is_empty()),
        max_keys: q.max_keys.unwrap_or(MAX_KEYS_LIMIT).min(MAX_KEYS_LIMIT),
    };

    let result = state.store.list_bucket(&bucket, &params).await?;
    let xml = build_list_objects_xml(&bucket, &params, &q, v2, &result);
    Ok(xml_response(StatusCode::OK, xml))
}

/// PUT `/{bucket}`: create bucket. Any location constraint in the body is
/// ignored; the cache store decides placement.
pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Response, AppError> {
    state.store.create_bucket(&bucket).await?;

    let mut response = Response::new(Body::empty());
    if let Ok(location) = HeaderValue::from_str(&format!("/{bucket}")) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

/// DELETE `/{bucket}`: delete an empty bucket.
pub async fn delete_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, AppError> {
    state.store.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// HEAD `/{bucket}`: 200 when the bucket exists, 404 otherwise.
pub async fn head_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.store.bucket_exists(&bucket).await? {
        Ok(StatusCode::OK)
    } else {
        Err(AppError::new(
            StatusCode::NOT_FOUND,
            "NoSuchBucket",
            "The specified bucket does not exist",
        )
        .with_resource(bucket))
    }
}

/// POST `/{bucket}?delete`: multi-object delete.
pub async fn delete_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response, AppError> {
    if !q.contains_key("delete") {
        return Err(AppError::bad_request("POST on a bucket requires ?delete"));
    }
    let malformed = || {
        AppError::new(
            StatusCode::BAD_REQUEST,
            "MalformedXML",
            "The XML you provided was not well-formed or did not validate against our published schema",
        )
    };

    let request = std::str::from_utf8(&body).map_err(|_| malformed())?;
    let quiet = element_text(request, "Quiet").is_some_and(|v| v.trim() == "true");
    let keys: Vec<String> = elements(request, "Object")
        .into_iter()
        .filter_map(|object| element_text(object, "Key"))
        .collect();
    if keys.is_empty() || keys.len() > MAX_KEYS_LIMIT {
        return Err(malformed());
    }

    let result = state.store.delete_multi(&bucket, &keys).await?;

    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><DeleteResult xmlns="{}">"#,
        S3_XMLNS
    );
    if !quiet {
        for key in &result.deleted {
            xml.push_str(&format!("<Deleted><Key>{}</Key></Deleted>", xml_escape(key)));
        }
    }
    for err in &result.errors {
        xml.push_str(&format!(
            "<Error><Key>{}</Key><Code>{}</Code><Message>{}</Message></Error>",
            xml_escape(&err.key),
            xml_escape(&err.code),
            xml_escape(&err.message)
        ));
    }
    xml.push_str("</DeleteResult>");
    Ok(xml_response(StatusCode::OK, xml))
}

fn build_list_objects_xml(
    bucket: &str,
    params: &ListObjectsParams,
    query: &ListObjectsQuery,
    v2: bool,
    result: &ListObjectsResult,
) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><ListBucketResult xmlns="{}">"#,
        S3_XMLNS
    );
    xml.push_str(&format!("<Name>{}</Name>", xml_escape(bucket)));
    xml.push_str(&format!(
        "<Prefix>{}</Prefix>",
        xml_escape(params.prefix.as_deref().unwrap_or(""))
    ));
    xml.push_str(&format!("<MaxKeys>{}</MaxKeys>", params.max_keys));
    if let Some(delim) = &params.delimiter {
        xml.push_str(&format!("<Delimiter>{}</Delimiter>", xml_escape(delim)));
    }
    xml.push_str(&format!("<IsTruncated>{}</IsTruncated>", result.is_truncated));

    if v2 {
        xml.push_str(&format!("<KeyCount>{}</KeyCount>", result.key_count()));
        if let Some(token) = &query.continuation_token {
            xml.push_str(&format!(
                "<ContinuationToken>{}</ContinuationToken>",
                xml_escape(token)
            ));
        }
        if let Some(start_after) = &query.start_after {
            xml.push_str(&format!("<StartAfter>{}</StartAfter>", xml_escape(start_after)));
        }
        if let Some(next) = result.next_marker.as_deref().filter(|_| result.is_truncated) {
            xml.push_str(&format!(
                "<NextContinuationToken>{}</NextContinuationToken>",
                xml_escape(&encode_continuation_token(next))
            ));
        }
    } else {
        xml.push_str(&format!(
            "<Marker>{}</Marker>",
            xml_escape(query.marker.as_deref().unwrap_or(""))
        ));
        if let Some(next) = result.next_marker.as_deref().filter(|_| result.is_truncated) {
            xml.push_str(&format!("<NextMarker>{}</NextMarker>", xml_escape(next)));
        }
    }

    for obj in &result.objects {
        xml.push_str("<Contents>");
        xml.push_str(&format!("<Key>{}</Key>", xml_escape(&obj.key)));
        xml.push_str(&format!(
            "<LastModified>{}</LastModified>",
            obj.last_modified.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
        if let Some(etag) = &obj.etag {
            xml.push_str(&format!("<ETag>{}</ETag>", xml_escape(&format!("\"{}\"", etag))));
        }
        xml.push_str(&format!("<Size>{}</Size>", obj.size));
        xml.push_str("<StorageClass>STANDARD</StorageClass>");
        xml.push_str("</Contents>");
    }
    for prefix in &result.common_prefixes {
        xml.push_str(&format!(
            "<CommonPrefixes><Prefix>{}</Prefix></CommonPrefixes>",
            xml_escape(prefix)
        ));
    }
    xml.push_str("</ListBucketResult>");
    xml
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(token.as_bytes())
}

fn decode_continuation_token(token: &str) -> Result<String, AppError> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| {
            AppError::new(
                StatusCode::BAD_REQUEST,
                "InvalidArgument",
                "The continuation token provided is incorrect",
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::ObjectInfo;
    use chrono::Utc;

    #[test]
    fn continuation_tokens_round_trip() {
        let token = encode_continuation_token("photos/2024/a b.jpg");
        assert!(!token.contains('/'));
        assert_eq!(decode_continuation_token(&token).unwrap(), "photos/2024/a b.jpg");
        assert!(decode_continuation_token("%%%").is_err());
    }

    #[test]
    fn v2_listing_document() {
        let params = ListObjectsParams {
            prefix: Some("a&b/".into()),
            delimiter: Some("/".into()),
            max_keys: 1,
            ..Default::default()
        };
        let result = ListObjectsResult {
            objects: vec![ObjectInfo {
                key: "a&b/1.txt".into(),
                size: 3,
                etag: Some("abc".into()),
                last_modified: Utc::now(),
                metadata: Default::default(),
            }],
            common_prefixes: vec![],
            is_truncated: true,
            next_marker: Some("a&b/1.txt".into()),
        };
        let xml = build_list_objects_xml("bucket", &params, &ListObjectsQuery::default(), true, &result);

        assert!(xml.contains("<Prefix>a&amp;b/</Prefix>"));
        assert!(xml.contains("<KeyCount>1</KeyCount>"));
        assert!(xml.contains("<IsTruncated>true</IsTruncated>"));
        assert!(xml.contains("<ETag>&quot;abc&quot;</ETag>"));
        let token = element_text(&xml, "NextContinuationToken").unwrap();
        assert_eq!(decode_continuation_token(&token).unwrap(), "a&b/1.txt");
    }

    #[test]
    fn v1_listing_uses_markers() {
        let params = ListObjectsParams::default();
        let query = ListObjectsQuery {
            marker: Some("m".into()),
            ..Default::default()
        };
        let result = ListObjectsResult {
            is_truncated: true,
            next_marker: Some("n".into()),
            ..Default::default()
        };
        let xml = build_list_objects_xml("bucket", &params, &query, false, &result);
        assert!(xml.contains("<Marker>m</Marker>"));
        assert!(xml.contains("<NextMarker>n</NextMarker>"));
        assert!(!xml.contains("KeyCount"));
    }
}
