//! Source adapters.
//!
//! A [`SourceAdapter`] turns one external source into a list of
//! [`ContentItem`]s. Adapters only do I/O and shape normalization; the
//! scheduler owns retries, backoff and extraction.
//!
//! Adapters are built by name through an [`AdapterRegistry`], which maps each
//! registry name to a constructor taking that source's [`SourceSettings`].

pub mod bluesky;
pub mod discourse;
pub mod hacker_news;
pub mod html;
pub mod http;
pub mod mastodon;
pub mod reachability;
pub mod reddit;
pub mod rss;
pub mod twitter;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

pub use http::HttpFetcher;
pub use reachability::{ReachabilityChecker, UrlStatus};

/// One piece of fetched content, not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub title: String,
    pub body: String,
    pub url: String,
    /// Becomes `Candidate::source`, e.g. `reddit_subs:OpenAI`.
    pub source_id: String,
    pub published_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(source_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: String::new(),
            body: String::new(),
            url: url.into(),
            source_id: source_id.into(),
            published_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn published(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = at;
        self
    }

    /// Title and body joined by a newline, the text the extractor scans.
    pub fn text(&self) -> String {
        format!("{}\n{}", self.title, self.body)
    }
}

/// Why a fetch produced no content.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("rate limited by {url}")]
    RateLimited {
        url: String,
        /// Seconds from a `Retry-After` header, when one was sent.
        retry_after: Option<u64>,
    },

    #[error("malformed content: {0}")]
    Parse(String),
}

impl FetchError {
    /// HTTP status behind the error, when there was a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::RateLimited { .. } => Some(429),
            FetchError::Transport(_) | FetchError::Parse(_) => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, FetchError::Parse(_))
    }
}

/// Capability shared by every source type.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry name, also used as the default `source_id`.
    fn name(&self) -> &str;

    /// Fetch the current content. An empty result is not an error.
    async fn fetch(&self) -> Result<Vec<ContentItem>, FetchError>;

    /// URLs this adapter reads from, for reachability checks.
    fn targets(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Raw per-source parameters from `sources.json`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceSettings {
    params: Map<String, Value>,
}

impl SourceSettings {
    pub fn new(params: Map<String, Value>) -> Self {
        Self { params }
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self::new(map.clone()),
            _ => Self::default(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn enabled(&self) -> bool {
        self.bool("enabled").unwrap_or(true)
    }

    /// Per-source override of the global poll interval.
    pub fn interval(&self) -> Option<Duration> {
        self.u64("interval_seconds")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Non-blank string parameter.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.str(key).unwrap_or(default)
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        match self.params.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.params.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// String list parameter; a single string is accepted as one element.
    pub fn list(&self, key: &str) -> Vec<String> {
        match self.params.get(key) {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::String(value)) if !value.trim().is_empty() => {
                vec![value.trim().to_string()]
            }
            _ => Vec::new(),
        }
    }
}

/// Builds one adapter from its settings.
pub type AdapterFactory = fn(&SourceSettings, HttpFetcher) -> Arc<dyn SourceAdapter>;

/// An adapter plus the scheduling knobs from its settings.
#[derive(Clone)]
pub struct ConfiguredSource {
    pub name: String,
    pub adapter: Arc<dyn SourceAdapter>,
    pub enabled: bool,
    pub interval: Option<Duration>,
}

impl std::fmt::Debug for ConfiguredSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredSource")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("interval", &self.interval)
            .finish()
    }
}

/// Name-keyed adapter constructors, in registration order.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: Vec<(String, AdapterFactory)>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in adapter.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(reddit::SEARCH_NAME, reddit::RedditSearch::factory);
        registry.register(reddit::SUBS_NAME, reddit::RedditSubs::factory);
        registry.register(twitter::NAME, twitter::TwitterSearch::factory);
        registry.register(rss::NAME, rss::GenericRss::factory);
        registry.register(html::NAME, html::GenericHtml::factory);
        registry.register(hacker_news::NAME, hacker_news::HackerNews::factory);
        registry.register(bluesky::NAME, bluesky::Bluesky::factory);
        registry.register(mastodon::NAME, mastodon::Mastodon::factory);
        registry.register(discourse::NAME, discourse::Discourse::factory);
        registry
    }

    /// Add or replace a constructor.
    pub fn register(&mut self, name: &str, factory: AdapterFactory) {
        match self.factories.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) => slot.1 = factory,
            None => self.factories.push((name.to_string(), factory)),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.iter().any(|(existing, _)| existing == name)
    }

    /// Instantiate `names` in order. Unknown names are logged and skipped;
    /// names listed in `disabled` are built but marked disabled.
    pub fn build(
        &self,
        names: &[String],
        settings: &HashMap<String, SourceSettings>,
        disabled: &[String],
        http: &HttpFetcher,
    ) -> Vec<ConfiguredSource> {
        let empty = SourceSettings::default();
        let mut sources = Vec::with_capacity(names.len());

        for name in names {
            let Some((_, factory)) = self.factories.iter().find(|(existing, _)| existing == name)
            else {
                tracing::warn!(source = %name, "unknown adapter, skipping");
                continue;
            };
            if sources.iter().any(|s: &ConfiguredSource| &s.name == name) {
                continue;
            }

            let source_settings = settings.get(name).unwrap_or(&empty);
            let switched_off = disabled.iter().any(|d| d.eq_ignore_ascii_case(name));

            sources.push(ConfiguredSource {
                name: name.clone(),
                adapter: factory(source_settings, http.clone()),
                enabled: source_settings.enabled() && !switched_off,
                interval: source_settings.interval(),
            });
        }

        sources
    }
}

/// Merge per-target results of a multi-target adapter.
///
/// Failing targets are logged and skipped. Only when every target failed is
/// an error returned: the first rate-limit error if any, else the last one.
pub(crate) fn merge_targets(
    source: &str,
    results: Vec<(String, Result<Vec<ContentItem>, FetchError>)>,
) -> Result<Vec<ContentItem>, FetchError> {
    let mut items = Vec::new();
    let mut any_ok = false;
    let mut rate_limited = None;
    let mut last_error = None;

    for (target, result) in results {
        match result {
            Ok(mut batch) => {
                any_ok = true;
                items.append(&mut batch);
            }
            Err(err) => {
                tracing::warn!(source, url = %target, error = %err, "target fetch failed");
                if err.is_rate_limited() && rate_limited.is_none() {
                    rate_limited = Some(err);
                } else {
                    last_error = Some(err);
                }
            }
        }
    }

    if any_ok {
        return Ok(items);
    }
    match rate_limited.or(last_error) {
        Some(err) => Err(err),
        None => Ok(items),
    }
}
