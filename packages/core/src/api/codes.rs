//! Candidate listing and per-code mutations.
//!
//! Routes:
//! - `GET    /api/codes`              paged, filtered list
//! - `POST   /api/codes/:code/tried`  set the tried flag
//! - `POST   /api/codes/:code/hide`   toggle the hidden flag
//! - `DELETE /api/codes/:code`        remove a candidate

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::repository::{Candidate, CandidateQuery};

use super::AppState;

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const MAX_PAGE_SIZE: usize = 500;

// ---- Request / response shapes ----

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub q: Option<String>,
    pub source: Option<String>,
    pub include_hidden: Option<String>,
    pub include_tried: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CodeListResponse {
    pub items: Vec<Candidate>,
    pub total: u64,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Deserialize)]
struct TriedRequest {
    #[serde(default = "default_tried")]
    tried: bool,
}

fn default_tried() -> bool {
    true
}

// ---- Helpers ----

/// Lenient query-string boolean: `1`, `true`, `yes`, `on` are true.
fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value {
        None => default,
        Some(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
    }
}

impl ListParams {
    fn query(&self) -> CandidateQuery {
        CandidateQuery {
            text: self.q.clone().filter(|q| !q.trim().is_empty()),
            source: self.source.clone().filter(|s| !s.trim().is_empty()),
            include_hidden: parse_bool(self.include_hidden.as_deref(), false),
            include_tried: parse_bool(self.include_tried.as_deref(), false),
        }
    }

    fn page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    fn page_size(&self) -> usize {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }
}

// ---- Handlers ----

/// `GET /api/codes`: newest first; `include_tried` defaults to false here.
pub async fn list_codes(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<CodeListResponse>, AppError> {
    let query = params.query();
    let page = params.page();
    let page_size = params.page_size();
    let offset = (page - 1).saturating_mul(page_size);

    let items = state.repository.list(&query, offset, page_size).await?;
    let total = state.repository.count(&query).await?;

    Ok(Json(CodeListResponse {
        items,
        total,
        page,
        page_size,
    }))
}

/// `POST /api/codes/:code/tried`: body `{"tried": bool}` is optional.
pub async fn mark_tried(
    State(state): State<AppState>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let tried = if body.iter().all(u8::is_ascii_whitespace) {
        true
    } else {
        serde_json::from_slice::<TriedRequest>(&body)
            .map_err(|e| AppError::Parse(format!("invalid tried body: {}", e)))?
            .tried
    };

    if !state.repository.mark_tried(&code, tried).await? {
        return Err(AppError::NotFound(code));
    }
    Ok(Json(json!({ "ok": true, "tried": tried })))
}

/// `POST /api/codes/:code/hide`: flip visibility, returning the new value.
pub async fn toggle_hidden(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Value>, AppError> {
    match state.repository.toggle_hidden(&code).await? {
        Some(hidden) => Ok(Json(json!({ "ok": true, "hidden": hidden }))),
        None => Err(AppError::NotFound(code)),
    }
}

/// `DELETE /api/codes/:code`
pub async fn delete_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !state.repository.delete(&code).await? {
        return Err(AppError::NotFound(code));
    }
    tracing::info!(code = %code, "candidate deleted");
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_params_are_lenient() {
        assert!(parse_bool(Some("1"), false));
        assert!(parse_bool(Some("TRUE"), false));
        assert!(parse_bool(Some("on"), false));
        assert!(!parse_bool(Some("nope"), true));
        assert!(parse_bool(None, true));
    }

    #[test]
    fn paging_is_clamped() {
        let params = ListParams {
            page: Some(0),
            page_size: Some(10_000),
            ..ListParams::default()
        };
        assert_eq!(params.page(), 1);
        assert_eq!(params.page_size(), MAX_PAGE_SIZE);

        let params = ListParams {
            page_size: Some(0),
            ..ListParams::default()
        };
        assert_eq!(params.page_size(), 1);
        assert_eq!(ListParams::default().page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn list_hides_tried_by_default() {
        let query = ListParams::default().query();
        assert!(!query.include_hidden);
        assert!(!query.include_tried);
        assert!(query.text.is_none());

        let query = ListParams {
            q: Some("  ".into()),
            source: Some("bluesky".into()),
            include_tried: Some("1".into()),
            ..ListParams::default()
        }
        .query();
        assert!(query.text.is_none());
        assert_eq!(query.source.as_deref(), Some("bluesky"));
        assert!(query.include_tried);
    }
}
