//! Volatile candidate storage.
//!
//! Everything lives in a `HashMap` keyed by normalized code behind a single
//! `RwLock`, so each check-and-insert is atomic. Listings sort on demand;
//! the map stays small enough that this is never the bottleneck.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{normalize_code, Candidate, CandidateQuery, CandidateRepository, StorageError};

#[derive(Debug)]
struct Entry {
    /// Insertion order, used to break `discovered_at` ties.
    seq: u64,
    candidate: Candidate,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    entries: HashMap<String, Entry>,
}

impl Inner {
    /// Entries matching `query`, newest first.
    fn sorted(&self, query: &CandidateQuery) -> Vec<&Entry> {
        let mut matching: Vec<&Entry> = self
            .entries
            .values()
            .filter(|entry| query.matches(&entry.candidate))
            .collect();
        matching.sort_by(|a, b| {
            b.candidate
                .discovered_at
                .cmp(&a.candidate.discovered_at)
                .then(b.seq.cmp(&a.seq))
        });
        matching
    }
}

/// In-process repository; contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    inner: RwLock<Inner>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CandidateRepository for InMemoryRepository {
    async fn add_if_absent(&self, candidate: &Candidate) -> Result<bool, StorageError> {
        let key = normalize_code(&candidate.code);
        let mut inner = self.inner.write().await;
        if inner.entries.contains_key(&key) {
            return Ok(false);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;

        let mut stored = candidate.clone();
        stored.code = key.clone();
        inner.entries.insert(key, Entry { seq, candidate: stored });
        Ok(true)
    }

    async fn list(
        &self,
        query: &CandidateQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Candidate>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .sorted(query)
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|entry| entry.candidate.clone())
            .collect())
    }

    async fn count(&self, query: &CandidateQuery) -> Result<u64, StorageError> {
        let inner = self.inner.read().await;
        let total = inner
            .entries
            .values()
            .filter(|entry| query.matches(&entry.candidate))
            .count();
        Ok(total as u64)
    }

    async fn count_since(
        &self,
        since: DateTime<Utc>,
        query: &CandidateQuery,
    ) -> Result<u64, StorageError> {
        let inner = self.inner.read().await;
        let total = inner
            .entries
            .values()
            .filter(|entry| entry.candidate.discovered_at >= since)
            .filter(|entry| query.matches(&entry.candidate))
            .count();
        Ok(total as u64)
    }

    async fn mark_tried(&self, code: &str, tried: bool) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        match inner.entries.get_mut(&normalize_code(code)) {
            Some(entry) => {
                entry.candidate.tried = tried;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn toggle_hidden(&self, code: &str) -> Result<Option<bool>, StorageError> {
        let mut inner = self.inner.write().await;
        Ok(inner.entries.get_mut(&normalize_code(code)).map(|entry| {
            entry.candidate.hidden = !entry.candidate.hidden;
            entry.candidate.hidden
        }))
    }

    async fn delete(&self, code: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        Ok(inner.entries.remove(&normalize_code(code)).is_some())
    }

    async fn latest(&self, limit: usize) -> Result<Vec<Candidate>, StorageError> {
        self.list(&CandidateQuery::everything(), 0, limit).await
    }

    async fn exists(&self, code: &str) -> Result<bool, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.entries.contains_key(&normalize_code(code)))
    }
}
