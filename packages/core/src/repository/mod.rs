//! Candidate persistence.
//!
//! [`CandidateRepository`] is the storage contract shared by the volatile
//! [`InMemoryRepository`] and the durable [`SqliteCandidateRepository`].
//! Both backends must behave identically:
//!
//! - codes are normalized to upper case and unique; a second insert of the
//!   same code is a no-op that returns `false`
//! - listings are newest-discovered first, ties broken by insertion order
//! - every mutation is atomic for a single record
//!
//! The scheduler only ever calls [`CandidateRepository::add_if_absent`];
//! flag mutations and deletes come from the serving layer.

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteCandidateRepository;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure inside a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// A stored, deduplicated discovery of one code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub code: String,
    /// Identifier of the producing source item, e.g. `reddit_subs:OpenAI`.
    pub source: String,
    pub source_title: String,
    pub url: String,
    /// Excerpt of the text surrounding the code.
    pub snippet: String,
    /// Advisory score in `[0.05, 1.0]`; `None` when scoring is disabled.
    pub confidence: Option<f64>,
    pub discovered_at: DateTime<Utc>,
    pub tried: bool,
    pub hidden: bool,
}

impl Candidate {
    /// A fresh, untried and visible candidate.
    ///
    /// `discovered_at` is truncated to microseconds, the precision the
    /// durable backend stores.
    pub fn new(code: &str, source: impl Into<String>, discovered_at: DateTime<Utc>) -> Self {
        Self {
            code: normalize_code(code),
            source: source.into(),
            source_title: String::new(),
            url: String::new(),
            snippet: String::new(),
            confidence: None,
            discovered_at: discovered_at.trunc_subsecs(6),
            tried: false,
            hidden: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.source_title = title.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Canonical form of a code used as the storage key.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Filters shared by `list`, `count` and `count_since`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQuery {
    /// Case-insensitive substring over code, source title and snippet.
    pub text: Option<String>,
    /// Exact source name.
    pub source: Option<String>,
    pub include_hidden: bool,
    pub include_tried: bool,
}

impl Default for CandidateQuery {
    fn default() -> Self {
        Self {
            text: None,
            source: None,
            include_hidden: false,
            include_tried: true,
        }
    }
}

impl CandidateQuery {
    /// Every stored candidate, hidden and tried included.
    pub fn everything() -> Self {
        Self {
            include_hidden: true,
            include_tried: true,
            ..Self::default()
        }
    }

    /// Candidates that still need attention: neither hidden nor tried.
    pub fn actionable() -> Self {
        Self {
            include_hidden: false,
            include_tried: false,
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Upper-cased search text, `None` when blank.
    pub(crate) fn needle(&self) -> Option<String> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_ascii_uppercase)
    }

    pub(crate) fn source_filter(&self) -> Option<&str> {
        self.source.as_deref().filter(|source| !source.is_empty())
    }

    pub(crate) fn matches(&self, candidate: &Candidate) -> bool {
        if !self.include_hidden && candidate.hidden {
            return false;
        }
        if !self.include_tried && candidate.tried {
            return false;
        }
        if let Some(source) = self.source_filter() {
            if candidate.source != source {
                return false;
            }
        }
        if let Some(needle) = self.needle() {
            let haystack = format!(
                "{} {} {}",
                candidate.code, candidate.source_title, candidate.snippet
            )
            .to_ascii_uppercase();
            if !haystack.contains(&needle) {
                return false;
            }
        }
        true
    }
}

/// Storage contract for candidates.
#[async_trait]
pub trait CandidateRepository: Send + Sync {
    /// Insert `candidate` unless its code is already stored.
    /// Returns `true` only for a first sighting.
    async fn add_if_absent(&self, candidate: &Candidate) -> Result<bool, StorageError>;

    /// Page through candidates matching `query`, newest first.
    async fn list(
        &self,
        query: &CandidateQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Candidate>, StorageError>;

    async fn count(&self, query: &CandidateQuery) -> Result<u64, StorageError>;

    /// Count candidates matching `query` discovered at or after `since`.
    async fn count_since(
        &self,
        since: DateTime<Utc>,
        query: &CandidateQuery,
    ) -> Result<u64, StorageError>;

    /// Set the tried flag. Returns `false` when the code is unknown.
    async fn mark_tried(&self, code: &str, tried: bool) -> Result<bool, StorageError>;

    /// Flip the hidden flag, returning the new value, or `None` when the code
    /// is unknown.
    async fn toggle_hidden(&self, code: &str) -> Result<Option<bool>, StorageError>;

    async fn delete(&self, code: &str) -> Result<bool, StorageError>;

    /// Newest candidates regardless of flags.
    async fn latest(&self, limit: usize) -> Result<Vec<Candidate>, StorageError>;

    async fn exists(&self, code: &str) -> Result<bool, StorageError>;

    /// Insert many candidates, returning how many were new.
    async fn bulk_add(&self, candidates: &[Candidate]) -> Result<usize, StorageError> {
        let mut inserted = 0;
        for candidate in candidates {
            if self.add_if_absent(candidate).await? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod contract_tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};

    use crate::db::create_pool;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn sample(code: &str, seconds: i64) -> Candidate {
        Candidate::new(code, "test", at(seconds))
            .with_title("Example")
            .with_url("https://example.com")
            .with_snippet("Example snippet")
    }

    async fn backends() -> Vec<(&'static str, Arc<dyn CandidateRepository>)> {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        vec![
            ("memory", Arc::new(InMemoryRepository::new())),
            ("sqlite", Arc::new(SqliteCandidateRepository::new(pool))),
        ]
    }

    #[tokio::test]
    async fn add_if_absent_is_idempotent_and_keeps_first_record() {
        for (name, repo) in backends().await {
            assert!(repo.add_if_absent(&sample("ABC12", 0)).await.unwrap(), "{name}");

            let second = sample("abc12", 60).with_title("Different").with_snippet("Other");
            assert!(!repo.add_if_absent(&second).await.unwrap(), "{name}");

            let stored = repo.latest(10).await.unwrap();
            assert_eq!(stored.len(), 1, "{name}");
            assert_eq!(stored[0], sample("ABC12", 0), "{name}");
        }
    }

    #[tokio::test]
    async fn toggle_mark_and_delete_cycle() {
        for (name, repo) in backends().await {
            repo.add_if_absent(&sample("ABC12", 0)).await.unwrap();
            assert!(repo.exists("abc12").await.unwrap(), "{name}");

            assert!(repo.mark_tried("ABC12", true).await.unwrap(), "{name}");
            let entries = repo.list(&CandidateQuery::default(), 0, 100).await.unwrap();
            assert!(entries[0].tried, "{name}");

            assert_eq!(repo.toggle_hidden("ABC12").await.unwrap(), Some(true), "{name}");
            assert_eq!(repo.toggle_hidden("ABC12").await.unwrap(), Some(false), "{name}");

            assert!(repo.count_since(at(-3600), &CandidateQuery::everything()).await.unwrap() >= 1);

            assert!(repo.delete("ABC12").await.unwrap(), "{name}");
            assert!(!repo.delete("ABC12").await.unwrap(), "{name}");
            assert_eq!(repo.count(&CandidateQuery::everything()).await.unwrap(), 0, "{name}");
        }
    }

    #[tokio::test]
    async fn offsets_past_the_end_are_empty_on_every_backend() {
        for (name, repo) in backends().await {
            repo.add_if_absent(&sample("ABC12", 0)).await.unwrap();
            let all = CandidateQuery::everything();

            assert!(repo.list(&all, usize::MAX, 10).await.unwrap().is_empty(), "{name}");
            assert!(repo.list(&all, 1, 10).await.unwrap().is_empty(), "{name}");
            assert_eq!(repo.list(&all, 0, usize::MAX).await.unwrap().len(), 1, "{name}");
        }
    }

    #[tokio::test]
    async fn unknown_codes_report_not_found() {
        for (name, repo) in backends().await {
            assert!(!repo.mark_tried("NOPE1", true).await.unwrap(), "{name}");
            assert_eq!(repo.toggle_hidden("NOPE1").await.unwrap(), None, "{name}");
            assert!(!repo.delete("NOPE1").await.unwrap(), "{name}");
            assert!(!repo.exists("NOPE1").await.unwrap(), "{name}");
        }
    }

    #[tokio::test]
    async fn list_is_newest_first_with_stable_ties() {
        for (name, repo) in backends().await {
            repo.add_if_absent(&sample("OLD11", 0)).await.unwrap();
            repo.add_if_absent(&sample("TIE1A", 100)).await.unwrap();
            repo.add_if_absent(&sample("TIE2B", 100)).await.unwrap();
            repo.add_if_absent(&sample("NEW33", 200)).await.unwrap();

            let codes: Vec<String> = repo
                .list(&CandidateQuery::default(), 0, 10)
                .await
                .unwrap()
                .into_iter()
                .map(|c| c.code)
                .collect();
            assert_eq!(codes, vec!["NEW33", "TIE2B", "TIE1A", "OLD11"], "{name}");

            let page: Vec<String> = repo
                .list(&CandidateQuery::default(), 1, 2)
                .await
                .unwrap()
                .into_iter()
                .map(|c| c.code)
                .collect();
            assert_eq!(page, vec!["TIE2B", "TIE1A"], "{name}");
        }
    }

    #[tokio::test]
    async fn filters_apply_to_list_and_count() {
        for (name, repo) in backends().await {
            repo.add_if_absent(&sample("AAA11", 0).with_title("Sora invite thread"))
                .await
                .unwrap();
            let mut other = sample("BBB22", 10).with_snippet("beta 50% off");
            other.source = "reddit_subs:OpenAI".into();
            repo.add_if_absent(&other).await.unwrap();
            repo.add_if_absent(&sample("CCC33", 20)).await.unwrap();

            repo.toggle_hidden("CCC33").await.unwrap();
            repo.mark_tried("AAA11", true).await.unwrap();

            let text = CandidateQuery::everything().with_text("sora INVITE");
            assert_eq!(repo.count(&text).await.unwrap(), 1, "{name}");

            let percent = CandidateQuery::everything().with_text("50%");
            assert_eq!(repo.count(&percent).await.unwrap(), 1, "{name}");
            let underscore = CandidateQuery::everything().with_text("_");
            assert_eq!(repo.count(&underscore).await.unwrap(), 0, "{name}");

            let source = CandidateQuery::everything().with_source("reddit_subs:OpenAI");
            let listed = repo.list(&source, 0, 10).await.unwrap();
            assert_eq!(listed.len(), 1, "{name}");
            assert_eq!(listed[0].code, "BBB22", "{name}");

            assert_eq!(repo.count(&CandidateQuery::default()).await.unwrap(), 2, "{name}");
            assert_eq!(repo.count(&CandidateQuery::actionable()).await.unwrap(), 1, "{name}");
            assert_eq!(repo.count(&CandidateQuery::everything()).await.unwrap(), 3, "{name}");
        }
    }

    #[tokio::test]
    async fn count_since_honours_window_and_filters() {
        for (name, repo) in backends().await {
            repo.add_if_absent(&sample("OLD11", 0)).await.unwrap();
            repo.add_if_absent(&sample("NEW22", 7200)).await.unwrap();
            repo.add_if_absent(&sample("NEW33", 7300)).await.unwrap();
            repo.toggle_hidden("NEW33").await.unwrap();

            let all = CandidateQuery::everything();
            let visible = CandidateQuery::default();
            assert_eq!(repo.count_since(at(3600), &all).await.unwrap(), 2, "{name}");
            assert_eq!(repo.count_since(at(3600), &visible).await.unwrap(), 1, "{name}");
            assert_eq!(repo.count_since(at(7200), &all).await.unwrap(), 2, "{name}");
        }
    }

    #[tokio::test]
    async fn latest_ignores_flags_and_respects_limit() {
        for (name, repo) in backends().await {
            for i in 0..5 {
                repo.add_if_absent(&sample(&format!("CODE{}X", i), i)).await.unwrap();
            }
            repo.toggle_hidden("CODE4X").await.unwrap();

            let latest = repo.latest(3).await.unwrap();
            assert_eq!(latest.len(), 3, "{name}");
            assert_eq!(latest[0].code, "CODE4X", "{name}");
            assert!(latest[0].hidden, "{name}");
        }
    }

    #[tokio::test]
    async fn bulk_add_counts_only_new_codes() {
        for (name, repo) in backends().await {
            repo.add_if_absent(&sample("DUP11", 0)).await.unwrap();
            let batch = vec![sample("DUP11", 1), sample("NEW22", 2), sample("NEW33", 3)];
            assert_eq!(repo.bulk_add(&batch).await.unwrap(), 2, "{name}");
        }
    }

    #[tokio::test]
    async fn concurrent_inserts_of_one_code_yield_single_winner() {
        for (name, repo) in backends().await {
            let mut handles = Vec::new();
            for i in 0..16 {
                let repo = repo.clone();
                handles.push(tokio::spawn(async move {
                    repo.add_if_absent(&sample("RACE1", i)).await.unwrap()
                }));
            }

            let mut winners = 0;
            for handle in handles {
                if handle.await.unwrap() {
                    winners += 1;
                }
            }
            assert_eq!(winners, 1, "{name}");
            assert_eq!(repo.count(&CandidateQuery::everything()).await.unwrap(), 1, "{name}");
        }
    }

    #[test]
    fn candidate_new_normalizes_code() {
        let candidate = Candidate::new("  ab3k9z ", "test", at(0));
        assert_eq!(candidate.code, "AB3K9Z");
        assert!(!candidate.tried);
        assert!(!candidate.hidden);
    }
}
