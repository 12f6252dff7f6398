//! Bootstrap payload for polling clients: newest candidates, aggregate
//! counts and per-source health in one response.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::health::{SourceHealth, SourceHealthBoard};
use crate::repository::{Candidate, CandidateQuery, CandidateRepository, StorageError};

pub const DEFAULT_SNAPSHOT_LIMIT: usize = 200;
pub const DEFAULT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    /// Neither hidden nor tried.
    pub visible: u64,
    pub all: u64,
    /// Discovered inside the trailing window.
    pub recent: u64,
    pub window_hours: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub last_poll: Option<DateTime<Utc>>,
    pub items: Vec<Candidate>,
    pub totals: Totals,
    pub sources: Vec<SourceHealth>,
}

#[derive(Clone)]
pub struct SnapshotBuilder {
    repository: Arc<dyn CandidateRepository>,
    health: SourceHealthBoard,
    limit: usize,
    window_hours: i64,
    window_query: CandidateQuery,
}

impl SnapshotBuilder {
    pub fn new(repository: Arc<dyn CandidateRepository>, health: SourceHealthBoard) -> Self {
        Self {
            repository,
            health,
            limit: DEFAULT_SNAPSHOT_LIMIT,
            window_hours: DEFAULT_WINDOW_HOURS,
            window_query: CandidateQuery::default(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Trailing window and the filter its count applies.
    pub fn with_window(mut self, hours: i64, query: CandidateQuery) -> Self {
        self.window_hours = hours;
        self.window_query = query;
        self
    }

    pub async fn build(&self, now: DateTime<Utc>) -> Result<Snapshot, StorageError> {
        let items = self.repository.latest(self.limit).await?;
        let visible = self.repository.count(&CandidateQuery::actionable()).await?;
        let all = self.repository.count(&CandidateQuery::everything()).await?;
        let since = Duration::try_hours(self.window_hours)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recent = self.repository.count_since(since, &self.window_query).await?;
        let board = self.health.snapshot().await;

        Ok(Snapshot {
            generated_at: now,
            last_poll: board.last_poll,
            items,
            totals: Totals {
                visible,
                all,
                recent,
                window_hours: self.window_hours,
            },
            sources: board.sources,
        })
    }
}
