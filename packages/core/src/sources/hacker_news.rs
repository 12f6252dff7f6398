//! `hacker_news`: Algolia `search_by_date` over stories and comments.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;

use super::html::visible_text;
use super::{ContentItem, FetchError, HttpFetcher, SourceAdapter, SourceSettings};

pub const NAME: &str = "hacker_news";

const DEFAULT_ENDPOINT: &str = "https://hn.algolia.com/api/v1/search_by_date";
const DEFAULT_LIMIT: u64 = 50;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    title: Option<String>,
    story_title: Option<String>,
    story_text: Option<String>,
    comment_text: Option<String>,
    url: Option<String>,
    story_url: Option<String>,
    #[serde(rename = "objectID")]
    object_id: Option<String>,
    created_at_i: Option<i64>,
}

fn first_non_empty(values: [Option<String>; 2]) -> Option<String> {
    values.into_iter().flatten().find(|v| !v.trim().is_empty())
}

impl Hit {
    fn into_item(self) -> ContentItem {
        let discussion = self
            .object_id
            .as_deref()
            .map(|id| format!("https://news.ycombinator.com/item?id={}", id));
        let url = first_non_empty([self.url, self.story_url])
            .or(discussion)
            .unwrap_or_default();
        let title = first_non_empty([self.title, self.story_title]).unwrap_or_default();
        let body = first_non_empty([self.story_text, self.comment_text]).unwrap_or_default();
        let published_at = self
            .created_at_i
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);

        ContentItem::new(NAME, url)
            .with_title(title)
            .with_body(visible_text(&body))
            .published(published_at)
    }
}

pub struct HackerNews {
    http: HttpFetcher,
    endpoint: String,
    query: Option<String>,
    limit: u64,
}

impl HackerNews {
    pub fn factory(settings: &SourceSettings, http: HttpFetcher) -> Arc<dyn SourceAdapter> {
        Arc::new(Self {
            http,
            endpoint: settings.str_or("endpoint", DEFAULT_ENDPOINT).to_string(),
            query: settings.str("query").map(str::to_string),
            limit: settings.u64("limit").unwrap_or(DEFAULT_LIMIT).min(DEFAULT_LIMIT),
        })
    }
}

#[async_trait]
impl SourceAdapter for HackerNews {
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
            ("query", query.clone()),
            ("tags", "(story,comment)".to_string()),
            ("hitsPerPage", self.limit.to_string()),
        ];
        let response: SearchResponse = self.http.get_json(&self.endpoint, &params).await?;
        Ok(response.hits.into_iter().map(Hit::into_item).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn maps_stories_and_comments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("query", "sora invite"))
            .and(query_param("hitsPerPage", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": [
                    {"title": "Show HN: Sora", "url": "https://example.com", "story_text": null,
                     "objectID": "1", "created_at_i": 1_700_000_000},
                    {"title": null, "story_title": "Sora thread",
                     "comment_text": "<p>code &quot;AB3K9Z&quot;</p>", "objectID": "2"}
                ]
            })))
            .mount(&server)
            .await;

        let settings = SourceSettings::default()
            .with("endpoint", server.uri())
            .with("query", "sora invite")
            .with("limit", 500);
        let http = HttpFetcher::new("test", Duration::from_secs(5)).unwrap();
        let items = HackerNews::factory(&settings, http).fetch().await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://example.com");
        assert_eq!(items[0].published_at.timestamp(), 1_700_000_000);
        assert_eq!(items[1].title, "Sora thread");
        assert_eq!(items[1].body, "code \"AB3K9Z\"");
        assert_eq!(items[1].url, "https://news.ycombinator.com/item?id=2");
    }

    #[tokio::test]
    async fn missing_query_skips_request() {
        let http = HttpFetcher::new("test", Duration::from_secs(5)).unwrap();
        let items = HackerNews::factory(&SourceSettings::default(), http)
            .fetch()
            .await
            .unwrap();
        assert!(items.is_empty());
    }
}
