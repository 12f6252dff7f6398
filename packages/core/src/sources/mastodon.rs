//! `mastodon`: status search via `/api/v2/search`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::html::visible_text;
use super::{ContentItem, FetchError, HttpFetcher, SourceAdapter, SourceSettings};

pub const NAME: &str = "mastodon";

const DEFAULT_ENDPOINT: &str = "https://mastodon.social/api/v2/search";
const DEFAULT_LIMIT: u64 = 20;
const MAX_LIMIT: u64 = 40;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    statuses: Vec<Status>,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    content: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    account: Account,
    created_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Account {
    #[serde(default)]
    acct: String,
}

impl Status {
    fn into_item(self) -> ContentItem {
        let acct = if self.account.acct.is_empty() {
            "unknown".to_string()
        } else {
            self.account.acct
        };
        let published_at = self
            .created_at
            .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        ContentItem::new(NAME, self.url.unwrap_or_default())
            .with_title(format!("Mastodon post by @{}", acct))
            .with_body(visible_text(&self.content))
            .published(published_at)
    }
}

pub struct Mastodon {
    http: HttpFetcher,
    endpoint: String,
    query: Option<String>,
    limit: u64,
}

impl Mastodon {
    pub fn factory(settings: &SourceSettings, http: HttpFetcher) -> Arc<dyn SourceAdapter> {
        Arc::new(Self {
            http,
            endpoint: settings.str_or("endpoint", DEFAULT_ENDPOINT).to_string(),
            query: settings.str("query").map(str::to_string),
            limit: settings.u64("limit").unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
        })
    }
}

#[async_trait]
impl SourceAdapter for Mastodon {
    fn name(&self) -> &str {
        NAME
    }

    fn targets(&self) -> Vec<String> {
        vec![self.endpoint.clone()]
    }

    async fn fetch(&self) -> Result<Vec<ContentItem>, FetchError> {
        let Some(query) = &self.query else {
            return Ok(Vec::new());
        };

        let params = [
            ("q", query.clone()),
            ("type", "statuses".to_string()),
            ("limit", self.limit.to_string()),
        ];
        let response: SearchResponse = self.http.get_json(&self.endpoint, &params).await?;
        Ok(response.statuses.into_iter().map(Status::into_item).collect())
    }
}
