//! Reachability of the URLs the configured adapters read from.
//!
//! Each URL gets a HEAD request. When HEAD is refused (403/405) or fails at
//! the transport level, a one-byte ranged GET decides instead. Results are
//! cached until the next [`ReachabilityChecker::check_all`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;

use super::{ConfiguredSource, HttpFetcher};

/// Last check of one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlStatus {
    pub url: String,
    pub ok: bool,
    pub status_code: Option<u16>,
    pub last_checked: DateTime<Utc>,
    pub error: Option<String>,
}

fn is_reachable(status: u16) -> bool {
    (200..400).contains(&status)
}

#[derive(Clone)]
pub struct ReachabilityChecker {
    http: HttpFetcher,
    urls: Arc<Vec<String>>,
    statuses: Arc<RwLock<BTreeMap<String, UrlStatus>>>,
}

impl ReachabilityChecker {
    /// Checker over `urls`, sorted and deduplicated. Blank entries are dropped.
    pub fn new(http: HttpFetcher, urls: impl IntoIterator<Item = String>) -> Self {
        let urls: BTreeSet<String> = urls
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();

        Self {
            http,
            urls: Arc::new(urls.into_iter().collect()),
            statuses: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Checker over the targets of every enabled source.
    pub fn for_sources(http: HttpFetcher, sources: &[ConfiguredSource]) -> Self {
        let urls = sources
            .iter()
            .filter(|source| source.enabled)
            .flat_map(|source| source.adapter.targets());
        Self::new(http, urls)
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Check every URL concurrently and replace the cached results.
    pub async fn check_all(&self) -> Vec<UrlStatus> {
        let results = join_all(self.urls.iter().map(|url| self.check(url))).await;

        let mut statuses = self.statuses.write().await;
        for status in &results {
            statuses.insert(status.url.clone(), status.clone());
        }
        results
    }

    /// Cached results, ordered by URL. Never-checked URLs are absent.
    pub async fn statuses(&self) -> Vec<UrlStatus> {
        self.statuses.read().await.values().cloned().collect()
    }

    async fn check(&self, url: &str) -> UrlStatus {
        let mut status = UrlStatus {
            url: url.to_string(),
            ok: false,
            status_code: None,
            last_checked: Utc::now(),
            error: None,
        };

        let fallback = match self.http.head_status(url).await {
            Ok(code) if is_reachable(code) => {
                status.ok = true;
                status.status_code = Some(code);
                false
            }
            Ok(403 | 405) => true,
            Ok(code) => {
                status.status_code = Some(code);
                status.error = Some(format!("HEAD status {}", code));
                false
            }
            Err(_) => true,
        };

        if fallback {
            match self.http.first_byte_status(url).await {
                Ok(code) => {
                    status.ok = is_reachable(code);
                    status.status_code = Some(code);
                    if !status.ok {
                        status.error = Some(format!("GET status {}", code));
                    }
                }
                Err(err) => status.error = Some(err.to_string()),
            }
        }

        tracing::info!(
            url = %status.url,
            ok = status.ok,
            status_code = ?status.status_code,
            "source url checked"
        );
        status
    }
}
