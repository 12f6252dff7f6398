use axum::{extract::State, Json};
use chrono::Utc;

use crate::error::AppError;
use crate::snapshot::Snapshot;

use super::AppState;

/// `GET /api/snapshot`: newest candidates, totals and source health.
pub async fn snapshot(State(state): State<AppState>) -> Result<Json<Snapshot>, AppError> {
    let snapshot = state.snapshots.build(Utc::now()).await?;
    Ok(Json(snapshot))
}
