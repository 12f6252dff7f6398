//! Reddit listings: `reddit_search` (site-wide `search.json`) and
//! `reddit_subs` (`/r/<sub>/new.json` for each configured subreddit).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use super::{merge_targets, ContentItem, FetchError, HttpFetcher, SourceAdapter, SourceSettings};

pub const SEARCH_NAME: &str = "reddit_search";
pub const SUBS_NAME: &str = "reddit_subs";

const REDDIT_BASE: &str = "https://www.reddit.com";
const DEFAULT_SEARCH_LIMIT: u64 = 50;
const DEFAULT_SUBS_LIMIT: u64 = 25;

#[derive(Debug, Default, Deserialize)]
struct Listing {
    #[serde(default)]
    data: ListingData,
}

#[derive(Debug, Default, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    #[serde(default)]
    data: Post,
}

#[derive(Debug, Default, Deserialize)]
struct Post {
    title: Option<String>,
    selftext: Option<String>,
    permalink: Option<String>,
    url: Option<String>,
    created_utc: Option<f64>,
}

impl Post {
    fn into_item(self, source_id: &str, fallback_url: &str) -> ContentItem {
        let url = match self.permalink.filter(|p| !p.is_empty()) {
            Some(permalink) => format!("{}{}", REDDIT_BASE, permalink),
            None => self
                .url
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| fallback_url.to_string()),
        };

        ContentItem::new(source_id, url)
            .with_title(self.title.unwrap_or_default())
            .with_body(self.selftext.unwrap_or_default())
            .published(created_at(self.created_utc))
    }
}

fn created_at(created_utc: Option<f64>) -> DateTime<Utc> {
    created_utc
        .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single())
        .unwrap_or_else(Utc::now)
}

fn listing_items(listing: Listing, source_id: &str, fallback_url: &str) -> Vec<ContentItem> {
    listing
        .data
        .children
        .into_iter()
        .map(|child| child.data.into_item(source_id, fallback_url))
        .collect()
}

/// Site-wide search, newest first.
pub struct RedditSearch {
    http: HttpFetcher,
    endpoint: String,
    query: Option<String>,
    limit: u64,
    sort: String,
    time_filter: String,
}

impl RedditSearch {
    pub fn factory(settings: &SourceSettings, http: HttpFetcher) -> Arc<dyn SourceAdapter> {
        Arc::new(Self {
            http,
            endpoint: settings
                .str_or("endpoint", "https://www.reddit.com/search.json")
                .to_string(),
            query: settings.str("query").map(str::to_string),
            limit: settings.u64("limit").unwrap_or(DEFAULT_SEARCH_LIMIT),
            sort: settings.str_or("sort", "new").to_string(),
            time_filter: settings.str_or("time_filter", "day").to_string(),
        })
    }
}

#[async_trait]
impl SourceAdapter for RedditSearch {
    fn name(&self) -> &str {
        SEARCH_NAME
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
            ("sort", self.sort.clone()),
            ("limit", self.limit.to_string()),
            ("t", self.time_filter.clone()),
            ("restrict_sr", "false".to_string()),
        ];
        let listing: Listing = self.http.get_json(&self.endpoint, &params).await?;
        Ok(listing_items(listing, SEARCH_NAME, &self.endpoint))
    }
}

/// Newest posts of each configured subreddit.
pub struct RedditSubs {
    http: HttpFetcher,
    base_url: String,
    subs: Vec<String>,
    limit: u64,
}

impl RedditSubs {
    pub fn factory(settings: &SourceSettings, http: HttpFetcher) -> Arc<dyn SourceAdapter> {
        Arc::new(Self {
            http,
            base_url: settings
                .str_or("base_url", REDDIT_BASE)
                .trim_end_matches('/')
                .to_string(),
            subs: settings.list("subs"),
            limit: settings.u64("limit").unwrap_or(DEFAULT_SUBS_LIMIT),
        })
    }

    fn sub_url(&self, sub: &str) -> String {
        format!("{}/r/{}/new.json", self.base_url, sub)
    }

    async fn fetch_sub(&self, sub: &str) -> Result<Vec<ContentItem>, FetchError> {
        let url = self.sub_url(sub);
        let listing: Listing = self
            .http
            .get_json(&url, &[("limit", self.limit.to_string())])
            .await?;
        Ok(listing_items(listing, &format!("{}:{}", SUBS_NAME, sub), &url))
    }
}

#[async_trait]
impl SourceAdapter for RedditSubs {
    fn name(&self) -> &str {
        SUBS_NAME
    }

    fn targets(&self) -> Vec<String> {
        self.subs.iter().map(|sub| self.sub_url(sub)).collect()
    }

    async fn fetch(&self) -> Result<Vec<ContentItem>, FetchError> {
        let mut results = Vec::with_capacity(self.subs.len());
        for sub in &self.subs {
            results.push((sub.clone(), self.fetch_sub(sub).await));
        }
        merge_targets(SUBS_NAME, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http() -> HttpFetcher {
        HttpFetcher::new("test", Duration::from_secs(5)).unwrap()
    }

    fn listing() -> serde_json::Value {
        json!({
            "data": {
                "children": [
                    {"data": {
                        "title": "Sora invite codes",
                        "selftext": "Try AB3K9Z",
                        "permalink": "/r/OpenAI/comments/1/sora/",
                        "created_utc": 1_700_000_000.0
                    }},
                    {"data": {
                        "title": "Link post",
                        "selftext": null,
                        "url": "https://example.com/post"
                    }}
                ]
            }
        })
    }

    #[tokio::test]
    async fn search_maps_posts_to_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search.json"))
            .and(query_param("q", "sora invite"))
            .and(query_param("sort", "new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
            .mount(&server)
            .await;

        let settings = SourceSettings::default()
            .with("endpoint", format!("{}/search.json", server.uri()))
            .with("query", "sora invite");
        let adapter = RedditSearch::factory(&settings, http());

        let items = adapter.fetch().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_id, "reddit_search");
        assert_eq!(items[0].url, "https://www.reddit.com/r/OpenAI/comments/1/sora/");
        assert_eq!(items[0].body, "Try AB3K9Z");
        assert_eq!(items[0].published_at.timestamp(), 1_700_000_000);
        assert_eq!(items[1].url, "https://example.com/post");
        assert_eq!(items[1].body, "");
    }

    #[tokio::test]
    async fn search_without_query_is_empty() {
        let adapter = RedditSearch::factory(&SourceSettings::default(), http());
        assert!(adapter.fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subs_tag_items_with_subreddit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/OpenAI/new.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/r/SoraAI/new.json"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let settings = SourceSettings::default()
            .with("base_url", server.uri())
            .with("subs", json!(["OpenAI", "SoraAI"]));
        let adapter = RedditSubs::factory(&settings, http());

        let items = adapter.fetch().await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.source_id == "reddit_subs:OpenAI"));
    }

    #[test]
    fn targets_list_each_subreddit_feed() {
        let settings = SourceSettings::default()
            .with("base_url", "https://reddit.example/")
            .with("subs", json!(["OpenAI", "SoraAI"]));
        let adapter = RedditSubs::factory(&settings, http());
        assert_eq!(
            adapter.targets(),
            vec![
                "https://reddit.example/r/OpenAI/new.json".to_string(),
                "https://reddit.example/r/SoraAI/new.json".to_string(),
            ]
        );

        let search = RedditSearch::factory(&SourceSettings::default(), http());
        assert_eq!(search.targets().len(), 1);
    }

    #[tokio::test]
    async fn subs_report_rate_limit_when_every_sub_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let settings = SourceSettings::default()
            .with("base_url", server.uri())
            .with("subs", json!(["OpenAI", "SoraAI"]));
        let adapter = RedditSubs::factory(&settings, http());

        let err = adapter.fetch().await.unwrap_err();
        assert!(err.is_rate_limited());
    }
}
