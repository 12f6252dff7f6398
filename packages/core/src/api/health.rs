use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::AppState;

/// `GET /healthz`: `ok` while the scheduler runs or polling is switched off.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let (status, body) = if state.health.snapshot().await.is_healthy() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    Response::builder()
        .status(status)
        .header(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))
        .body(Body::from(body))
        .expect("health response should be valid")
}

/// `GET /api/sources/health`: per-source scheduler state plus the cached
/// reachability of every source URL.
pub async fn sources_health(State(state): State<AppState>) -> impl IntoResponse {
    let urls = match &state.reachability {
        Some(checker) => checker.statuses().await,
        None => Vec::new(),
    };
    Json(json!({
        "sources": state.health.sources().await,
        "urls": urls,
    }))
}

/// `POST /api/sources/recheck`: check every source URL now.
pub async fn recheck_sources(State(state): State<AppState>) -> impl IntoResponse {
    let urls = match &state.reachability {
        Some(checker) => checker.check_all().await,
        None => Vec::new(),
    };
    let reachable = urls.iter().filter(|status| status.ok).count();
    tracing::info!(checked = urls.len(), reachable, "source urls rechecked");
    Json(json!({ "urls": urls }))
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    state
        .metrics
        .live_subscribers
        .set(state.broadcaster.subscriber_count() as f64);

    match state.metrics.render() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(Body::from(body))
            .expect("metrics response should be valid"),
        Err(err) => {
            tracing::error!(error = %err, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics error").into_response()
        }
    }
}
