//! Translation of S3 origin failures into [`StoreError`].
//!
//! Every piece of S3 error-code knowledge lives here: the code → variant
//! table, the status fallback for bodiless responses, the bucket-existence
//! mapping and the CreateBucket region quirk.

use crate::services::{
    s3_xml::{element_text, xml_escape},
    store::{BoxError, StoreError, StoreResult},
};
use reqwest::StatusCode;
use tracing::warn;

/// A failed request against an S3-compatible endpoint.
#[derive(Debug)]
pub enum OriginError {
    /// The endpoint answered with an error status.
    Response {
        status: StatusCode,
        code: String,
        message: String,
    },
    /// No usable response: connect/TLS failure, broken body, deadline, ...
    Transport(BoxError),
}

impl OriginError {
    /// Build from an error response. `body` may be empty (HEAD) or an S3
    /// `<Error>` document; the code falls back to one derived from `status`.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let code = element_text(body, "Code")
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| code_for_status(status));
        let message = element_text(body, "Message")
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
        OriginError::Response {
            status,
            code,
            message,
        }
    }

    pub fn transport(err: impl Into<BoxError>) -> Self {
        OriginError::Transport(err.into())
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            OriginError::Response { code, .. } => Some(code),
            OriginError::Transport(_) => None,
        }
    }
}

/// S3 code for a response that carried no error document.
pub fn code_for_status(status: StatusCode) -> String {
    match status {
        StatusCode::NOT_FOUND => "NotFound".to_string(),
        StatusCode::FORBIDDEN => "Forbidden".to_string(),
        StatusCode::PRECONDITION_FAILED => "PreconditionFailed".to_string(),
        StatusCode::RANGE_NOT_SATISFIABLE => "InvalidRange".to_string(),
        other => match other.canonical_reason() {
            Some(reason) => reason.split_whitespace().collect(),
            None => other.as_u16().to_string(),
        },
    }
}

/// Map an origin failure for `bucket`/`key` onto the uniform taxonomy.
pub fn translate(err: OriginError, bucket: &str, key: Option<&str>) -> StoreError {
    let key_name = || key.unwrap_or_default().to_string();
    match err {
        OriginError::Transport(source) => {
            warn!(bucket, key = key.unwrap_or_default(), error = %source, "origin request failed");
            let context = match key {
                Some(key) => format!("request for {bucket}/{key}"),
                None => format!("request for bucket {bucket}"),
            };
            StoreError::OperationFailed { context, source }
        }
        OriginError::Response { code, message, .. } => match code.as_str() {
            "NoSuchBucket" => StoreError::BucketNotFound(bucket.to_string()),
            "NoSuchKey" => StoreError::KeyNotFound(key_name()),
            "NotFound" => StoreError::AmbiguousNotFound,
            "BucketAlreadyExists" | "BucketAlreadyOwnedByYou" => {
                StoreError::BucketAlreadyExists(bucket.to_string())
            }
            "BucketNotEmpty" => StoreError::BucketNotEmpty(bucket.to_string()),
            "InvalidRange" => StoreError::InvalidRange,
            "PreconditionFailed" => StoreError::PreconditionFailed,
            _ => StoreError::Remote { code, message },
        },
    }
}

/// BucketExists semantics: the absence codes mean `false`, anything else is
/// an error.
pub fn bucket_exists_from(outcome: StoreResult<()>) -> StoreResult<bool> {
    match outcome {
        Ok(()) => Ok(true),
        Err(StoreError::BucketNotFound(_) | StoreError::AmbiguousNotFound) => Ok(false),
        Err(err) => Err(err),
    }
}

/// The `LocationConstraint` to send on CreateBucket. S3 rejects an explicit
/// `us-east-1` constraint, and an empty region means "endpoint default".
pub fn location_constraint(region: &str) -> Option<&str> {
    match region.trim() {
        "" | "us-east-1" => None,
        region => Some(region),
    }
}

/// CreateBucket request body for `region`, if one is needed.
pub fn create_bucket_body(region: &str) -> Option<String> {
    location_constraint(region).map(|region| {
        format!(
            concat!(
                r#"<CreateBucketConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
                r#"<LocationConstraint>{}</LocationConstraint>"#,
                r#"</CreateBucketConfiguration>"#
            ),
            xml_escape(region)
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn response(code: &str) -> OriginError {
        OriginError::Response {
            status: StatusCode::BAD_REQUEST,
            code: code.into(),
            message: "msg".into(),
        }
    }

    #[test]
    fn absence_codes() {
        assert!(matches!(
            translate(response("NoSuchBucket"), "b", Some("k")),
            StoreError::BucketNotFound(b) if b == "b"
        ));
        assert!(matches!(
            translate(response("NoSuchKey"), "b", Some("k")),
            StoreError::KeyNotFound(k) if k == "k"
        ));
        assert!(matches!(
            translate(response("NotFound"), "b", Some("k")),
            StoreError::AmbiguousNotFound
        ));
    }

    #[test]
    fn known_and_unknown_codes() {
        assert!(matches!(
            translate(response("BucketAlreadyOwnedByYou"), "b", None),
            StoreError::BucketAlreadyExists(_)
        ));
        assert!(matches!(
            translate(response("PreconditionFailed"), "b", Some("k")),
            StoreError::PreconditionFailed
        ));
        match translate(response("AccessDenied"), "b", Some("k")) {
            StoreError::Remote { code, message } => {
                assert_eq!(code, "AccessDenied");
                assert_eq!(message, "msg");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn transport_errors_become_operation_failed() {
        let err = translate(
            OriginError::transport(io::Error::other("connection reset")),
            "b",
            Some("k"),
        );
        assert!(matches!(err, StoreError::OperationFailed { .. }));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn bodiless_responses_use_status() {
        let head_404 = OriginError::from_response(StatusCode::NOT_FOUND, "");
        assert_eq!(head_404.code(), Some("NotFound"));
        assert_eq!(
            code_for_status(StatusCode::INTERNAL_SERVER_ERROR),
            "InternalServerError"
        );
        assert_eq!(code_for_status(StatusCode::FORBIDDEN), "Forbidden");
        assert_eq!(
            code_for_status(StatusCode::RANGE_NOT_SATISFIABLE),
            "InvalidRange"
        );
    }

    #[test]
    fn error_document_code_wins() {
        let body = "<?xml version=\"1.0\"?><Error><Code>NoSuchKey</Code>\
                    <Message>The specified key does not exist.</Message></Error>";
        let err = OriginError::from_response(StatusCode::NOT_FOUND, body);
        assert_eq!(err.code(), Some("NoSuchKey"));
    }

    #[test]
    fn bucket_exists_mapping() {
        assert!(bucket_exists_from(Ok(())).unwrap());
        assert!(!bucket_exists_from(Err(StoreError::AmbiguousNotFound)).unwrap());
        assert!(!bucket_exists_from(Err(StoreError::BucketNotFound("b".into()))).unwrap());
        assert!(bucket_exists_from(Err(StoreError::Remote {
            code: "Forbidden".into(),
            message: String::new()
        }))
        .is_err());
    }

    #[test]
    fn region_quirk() {
        assert_eq!(location_constraint("us-east-1"), None);
        assert_eq!(location_constraint(""), None);
        assert_eq!(location_constraint("eu-west-1"), Some("eu-west-1"));
        assert!(create_bucket_body("us-east-1").is_none());
        let body = create_bucket_body("ap-south-1").unwrap();
        assert!(body.contains("<LocationConstraint>ap-south-1</LocationConstraint>"));
    }
}
