//! s3lazy: a lazy-loading, cache-aside S3 proxy.
//!
//! Reads are served from a local cache store and filled from a remote
//! origin on a miss; writes only ever touch the cache.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;
use state::AppState;

/// The full HTTP application for `state`.
pub fn build_app(state: AppState) -> Router {
    routes::routes::routes().with_state(state)
}
