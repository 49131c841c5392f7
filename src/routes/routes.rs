//! Defines routes for the path-style S3 surface.
//!
//! ## Structure
//! - **Service endpoints**
//!   - `GET    /`       : list buckets
//!   - `GET    /health` : liveness
//!   - `GET    /readyz` : readiness + cache stats
//!
//! - **Bucket-level endpoints**
//!   - `GET    /{bucket}`        : list objects (v1, or v2 with `list-type=2`)
//!   - `PUT    /{bucket}`        : create bucket
//!   - `DELETE /{bucket}`        : delete bucket
//!   - `HEAD   /{bucket}`        : bucket exists
//!   - `POST   /{bucket}?delete` : multi-object delete
//!
//! - **Object-level endpoints**
//!   - `PUT    /{bucket}/{*key}`: upload object, or copy with `x-amz-copy-source`
//!   - `GET    /{bucket}/{*key}`: download object (honours `Range`)
//!   - `HEAD   /{bucket}/{*key}`: retrieve metadata only
//!   - `DELETE /{bucket}/{*key}`: delete object
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.
//! Static routes win over `/{bucket}`, so `health` and `readyz` cannot be
//! addressed as bucket names.

use crate::{
    handlers::{
        bucket_handlers::{
            create_bucket, delete_bucket, delete_objects, head_bucket, list_buckets, list_objects,
        },
        health_handlers::{health, readyz},
        object_handlers::{delete_object, get_object, head_object, put_object},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build the router. The returned router still needs its `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_buckets))
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        // Object-level routes
        .route(
            "/{bucket}/{*key}",
            put(put_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object),
        )
        // Bucket-level routes
        .route(
            "/{bucket}",
            get(list_objects)
                .put(create_bucket)
                .delete(delete_bucket)
                .head(head_bucket)
                .post(delete_objects),
        )
}
