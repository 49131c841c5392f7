use crate::services::{s3_xml::xml_escape, store::StoreError};
use axum::{
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::fmt;

/// An S3-style error: HTTP status plus the `<Error>` document fields.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub resource: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: msg.into(),
            resource: None,
        }
    }

    /// Shortcut for 400 InvalidRequest
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "InvalidRequest", msg)
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

/// HTTP status S3 uses for an error code passed through from an origin.
fn status_for_code(code: &str) -> StatusCode {
    match code {
        "AccessDenied" | "Forbidden" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" => {
            StatusCode::FORBIDDEN
        }
        "NoSuchBucket" | "NoSuchKey" | "NotFound" | "NoSuchUpload" => StatusCode::NOT_FOUND,
        "InvalidArgument" | "InvalidRequest" | "MalformedXML" | "InvalidBucketName" => {
            StatusCode::BAD_REQUEST
        }
        "BucketAlreadyExists" | "BucketAlreadyOwnedByYou" | "BucketNotEmpty" => {
            StatusCode::CONFLICT
        }
        "PreconditionFailed" => StatusCode::PRECONDITION_FAILED,
        "InvalidRange" => StatusCode::RANGE_NOT_SATISFIABLE,
        "SlowDown" | "ServiceUnavailable" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let code = err.code().to_string();
        let resource = match &err {
            StoreError::BucketNotFound(name)
            | StoreError::BucketAlreadyExists(name)
            | StoreError::BucketNotEmpty(name)
            | StoreError::InvalidBucketName { name, .. } => Some(name.clone()),
            StoreError::KeyNotFound(key)
            | StoreError::InvalidObjectKey(key)
            | StoreError::IncompleteBody { key, .. } => Some(key.clone()),
            _ => None,
        };
        let status = match &err {
            StoreError::IncompleteBody { .. } => StatusCode::BAD_REQUEST,
            StoreError::OperationFailed { .. } | StoreError::Sqlx(_) | StoreError::Io(_) => {
                tracing::error!(error = %err, "store operation failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => status_for_code(&code),
        };
        let message = match &err {
            StoreError::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            status,
            code,
            message,
            resource,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let xml = format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                "<Error><Code>{}</Code><Message>{}</Message><Resource>{}</Resource></Error>"
            ),
            xml_escape(&self.code),
            xml_escape(&self.message),
            xml_escape(self.resource.as_deref().unwrap_or("")),
        );
        (
            self.status,
            [(header::CONTENT_TYPE, "application/xml")],
            Body::from(xml),
        )
            .into_response()
    }
}
