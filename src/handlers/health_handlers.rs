//! Health & readiness handlers.
//!
//! - GET /health  -> liveness, plain `OK`
//! - GET /readyz  -> readiness: probes the serving store, reports cache stats

use crate::{services::lazy_store::StatsSnapshot, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /health`
///
/// Cheap liveness probe; never touches a store.
pub async fn health() -> &'static str {
    "OK"
}

/// `GET /readyz`
///
/// Lists buckets on the serving store. HTTP 200 when that succeeds, 503
/// otherwise. Orchestrator counters are included when available.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store_check = match state.store.list_buckets().await {
        Ok(_) => CheckStatus {
            ok: true,
            error: None,
        },
        Err(err) => {
            tracing::warn!(error = %err, "readiness probe failed");
            CheckStatus {
                ok: false,
                error: Some(err.to_string()),
            }
        }
    };
    let overall_ok = store_check.ok;

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" },
        checks: HashMap::from([("store", store_check)]),
        stats: state.stats.as_ref().map(|s| s.snapshot()),
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: HashMap<&'static str, CheckStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<StatsSnapshot>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
