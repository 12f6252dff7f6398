//! `bluesky`: public `app.bsky.feed.searchPosts`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{ContentItem, FetchError, HttpFetcher, SourceAdapter, SourceSettings};

pub const NAME: &str = "bluesky";

const DEFAULT_ENDPOINT: &str = "https://public.api.bsky.app/xrpc/app.bsky.feed.searchPosts";
const DEFAULT_LIMIT: u64 = 25;
const MAX_LIMIT: u64 = 100;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    posts: Vec<Post>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Post {
    #[serde(default)]
    uri: String,
    #[serde(default)]
    author: Author,
    #[serde(default)]
    record: Record,
    indexed_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Author {
    #[serde(default)]
    handle: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Record {
    #[serde(default)]
    text: String,
    created_at: Option<String>,
}

impl Post {
    fn into_item(self) -> ContentItem {
        let handle = if self.author.handle.is_empty() {
            "unknown".to_string()
        } else {
            self.author.handle
        };
        // at://did/app.bsky.feed.post/<rkey> -> bsky.app/profile/<handle>/post/<rkey>
        let url = match self.uri.rsplit('/').next().filter(|rkey| !rkey.is_empty()) {
            Some(rkey) => format!("https://bsky.app/profile/{}/post/{}", handle, rkey),
            None => String::new(),
        };
        let published_at = self
            .record
            .created_at
            .or(self.indexed_at)
            .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        ContentItem::new(NAME, url)
            .with_title(format!("Bluesky post by @{}", handle))
            .with_body(self.record.text)
            .published(published_at)
    }
}

pub struct Bluesky {
    http: HttpFetcher,
    endpoint: String,
    query: Option<String>,
    limit: u64,
}

impl Bluesky {
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
impl SourceAdapter for Bluesky {
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
            ("limit", self.limit.to_string()),
            ("sort", "latest".to_string()),
        ];
        let response: SearchResponse = self.http.get_json(&self.endpoint, &params).await?;
        Ok(response.posts.into_iter().map(Post::into_item).collect())
    }
}
