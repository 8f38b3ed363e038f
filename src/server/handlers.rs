// Request handlers for the entropy service endpoints

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::metrics;
use crate::rng::drbg::Drbg;

/// Body size served when the `bytes` parameter is absent or unusable.
pub const DEFAULT_RESPONSE_BYTES: usize = 4096;

/// Largest body a single request may ask for.
pub const MAX_RESPONSE_BYTES: usize = 1 << 20;

#[derive(Debug, Deserialize)]
pub struct RandomParams {
    // Kept as a raw string: a malformed value coerces to the default
    // instead of rejecting the request.
    bytes: Option<String>,
}

/// Health snapshot served as JSON at `/health`.
#[derive(Debug, Serialize)]
pub struct HealthInfo {
    pub status: &'static str,
    pub rng_version: String,
    pub rng_source: String,
    pub rng_drbg: String,
    pub reseed_age_ms: u64,
    pub reseed_interval_ms: u64,
    pub reseed_size_bits: usize,
    pub entropy_buffered_kb: usize,
    pub entropy_buffered_pct: usize,
}

impl HealthInfo {
    fn collect(master: &Drbg) -> Self {
        let snap = master.metadata();
        Self {
            status: "ok",
            rng_version: snap.version,
            rng_source: snap.source,
            rng_drbg: snap.algo,
            reseed_age_ms: snap.reseed_age_ms,
            reseed_interval_ms: snap.reseed_interval_ms,
            reseed_size_bits: snap.reseed_size_bits,
            entropy_buffered_kb: snap.buffered_bytes / 1024,
            entropy_buffered_pct: snap.fill_pct,
        }
    }
}

fn requested_len(raw: Option<&str>) -> usize {
    match raw.and_then(|value| value.parse::<i64>().ok()) {
        Some(v) if v > 0 && v <= MAX_RESPONSE_BYTES as i64 => v as usize,
        _ => DEFAULT_RESPONSE_BYTES,
    }
}

/// `GET /v1/random`: per-connection DRBG output as an octet stream.
///
/// Headers are emitted before the body is generated. Without a
/// per-connection DRBG (derivation failed at accept time) the handler
/// refuses service rather than fall back to the master.
pub async fn random_bytes(
    State(state): State<AppState>,
    Query(params): Query<RandomParams>,
    conn_drbg: Option<Extension<Arc<Drbg>>>,
) -> Response {
    let Some(Extension(drbg)) = conn_drbg else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "per-connection DRBG unavailable\n",
        )
            .into_response();
    };

    let mut headers = HeaderMap::new();
    state.master.write_headers(&mut headers);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );

    let mut body = vec![0u8; requested_len(params.bytes.as_deref())];
    drbg.read(&mut body);
    metrics::inc_http_requests();

    (headers, body).into_response()
}

/// `GET /health`: JSON health snapshot with the observability headers.
pub async fn health(State(state): State<AppState>) -> Response {
    let mut headers = HeaderMap::new();
    state.master.write_headers(&mut headers);

    (headers, Json(HealthInfo::collect(&state.master))).into_response()
}

/// `GET /metrics`: plaintext counter/gauge exposition.
pub async fn metrics_exposition(State(state): State<AppState>) -> Response {
    let body = metrics::render(&state.master, &state.reservoir);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}
