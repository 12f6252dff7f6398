//! HTTP serving layer.
//!
//! Handlers hold no business logic: each one delegates to the repository,
//! the broadcaster, the health board or the metrics registry in [`AppState`].

pub mod codes;
pub mod events;
pub mod health;
pub mod snapshot;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::broadcast::EventBroadcaster;
use crate::health::SourceHealthBoard;
use crate::metrics::AppMetrics;
use crate::repository::CandidateRepository;
use crate::snapshot::SnapshotBuilder;
use crate::sources::ReachabilityChecker;

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn CandidateRepository>,
    pub broadcaster: EventBroadcaster,
    pub health: SourceHealthBoard,
    pub snapshots: SnapshotBuilder,
    pub metrics: Arc<AppMetrics>,
    /// Absent when polling is off.
    pub reachability: Option<ReachabilityChecker>,
}

impl AppState {
    pub fn new(
        repository: Arc<dyn CandidateRepository>,
        broadcaster: EventBroadcaster,
        health: SourceHealthBoard,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        let snapshots = SnapshotBuilder::new(repository.clone(), health.clone());
        Self {
            repository,
            broadcaster,
            health,
            snapshots,
            metrics,
            reachability: None,
        }
    }

    pub fn with_snapshots(mut self, snapshots: SnapshotBuilder) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn with_reachability(mut self, checker: ReachabilityChecker) -> Self {
        self.reachability = Some(checker);
        self
    }
}

/// Assemble the complete router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/metrics", get(health::metrics))
        .route("/api/sources/health", get(health::sources_health))
        .route("/api/sources/recheck", post(health::recheck_sources))
        .route("/api/snapshot", get(snapshot::snapshot))
        .route("/api/codes", get(codes::list_codes))
        .route("/api/codes/:code", delete(codes::delete_code))
        .route("/api/codes/:code/tried", post(codes::mark_tried))
        .route("/api/codes/:code/hide", post(codes::toggle_hidden))
        .route("/events", get(events::events))
        .route_layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_http_metrics,
        ))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Count and time every routed request, labelled by the route template so
/// path parameters do not explode label cardinality.
async fn track_http_metrics(
    State(metrics): State<Arc<AppMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let started = Instant::now();
    let response = next.run(request).await;

    metrics
        .http_request_duration
        .observe(started.elapsed().as_secs_f64());
    metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();

    response
}
