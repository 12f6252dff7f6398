//! Read-only view of the scheduler for the serving layer.
//!
//! The scheduler publishes a fresh [`SourceHealth`] list after every tick;
//! handlers only ever read it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

/// Health of one configured source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceHealth {
    pub name: String,
    pub enabled: bool,
    /// Enabled and not cooling down.
    pub active: bool,
    /// Cooling down after repeated failures.
    pub paused: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub backoff_seconds: u64,
    pub interval_seconds: u64,
    pub next_run: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardSnapshot {
    pub polling_enabled: bool,
    pub running: bool,
    pub last_poll: Option<DateTime<Utc>>,
    pub sources: Vec<SourceHealth>,
}

impl BoardSnapshot {
    /// Healthy while the scheduler runs, or when polling is switched off.
    pub fn is_healthy(&self) -> bool {
        self.running || !self.polling_enabled
    }
}

#[derive(Debug, Clone)]
pub struct SourceHealthBoard {
    inner: Arc<RwLock<BoardSnapshot>>,
}

impl SourceHealthBoard {
    pub fn new(polling_enabled: bool) -> Self {
        Self {
            inner: Arc::new(RwLock::new(BoardSnapshot {
                polling_enabled,
                running: false,
                last_poll: None,
                sources: Vec::new(),
            })),
        }
    }

    pub async fn publish(&self, sources: Vec<SourceHealth>, last_poll: DateTime<Utc>) {
        let mut board = self.inner.write().await;
        board.sources = sources;
        board.last_poll = Some(last_poll);
    }

    pub async fn set_running(&self, running: bool) {
        self.inner.write().await.running = running;
    }

    pub async fn snapshot(&self) -> BoardSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn sources(&self) -> Vec<SourceHealth> {
        self.inner.read().await.sources.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn board_starts_unhealthy_until_scheduler_runs() {
        let board = SourceHealthBoard::new(true);
        assert!(!board.snapshot().await.is_healthy());

        board.set_running(true).await;
        assert!(board.snapshot().await.is_healthy());

        board.set_running(false).await;
        assert!(!board.snapshot().await.is_healthy());
    }

    #[tokio::test]
    async fn disabled_polling_is_healthy() {
        let board = SourceHealthBoard::new(false);
        assert!(board.snapshot().await.is_healthy());
    }

    #[tokio::test]
    async fn publish_replaces_sources() {
        let board = SourceHealthBoard::new(true);
        let now = Utc::now();
        let health = SourceHealth {
            name: "bluesky".into(),
            enabled: true,
            active: false,
            paused: false,
            last_success: Some(now),
            last_error: None,
            last_error_message: None,
            consecutive_failures: 0,
            failure_threshold: 4,
            backoff_seconds: 0,
            interval_seconds: 60,
            next_run: Some(now),
            cooldown_until: None,
        };

        board.publish(vec![health.clone()], now).await;
        let snapshot = board.snapshot().await;
        assert_eq!(snapshot.sources, vec![health]);
        assert_eq!(snapshot.last_poll, Some(now));
    }
}
