//! `discourse`: a forum's `latest.json` topic list.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::html::visible_text;
use super::{ContentItem, FetchError, HttpFetcher, SourceAdapter, SourceSettings};

pub const NAME: &str = "discourse";

const DEFAULT_ENDPOINT: &str = "https://community.openai.com/latest.json";
const DEFAULT_LIMIT: u64 = 50;

#[derive(Debug, Deserialize)]
struct Latest {
    #[serde(default)]
    topic_list: TopicList,
}

#[derive(Debug, Default, Deserialize)]
struct TopicList {
    #[serde(default)]
    topics: Vec<Topic>,
}

#[derive(Debug, Deserialize)]
struct Topic {
    id: Option<u64>,
    #[serde(default)]
    title: String,
    slug: Option<String>,
    excerpt: Option<String>,
    created_at: Option<String>,
}

pub struct Discourse {
    http: HttpFetcher,
    endpoint: String,
    base_url: String,
    limit: usize,
}

impl Discourse {
    pub fn factory(settings: &SourceSettings, http: HttpFetcher) -> Arc<dyn SourceAdapter> {
        let endpoint = settings.str_or("endpoint", DEFAULT_ENDPOINT).to_string();
        let base_url = match settings.str("base_url") {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => endpoint
                .trim_end_matches("/latest.json")
                .trim_end_matches('/')
                .to_string(),
        };

        Arc::new(Self {
            http,
            endpoint,
            base_url,
            limit: settings.u64("limit").unwrap_or(DEFAULT_LIMIT) as usize,
        })
    }

    fn topic_item(&self, topic: Topic) -> ContentItem {
        let url = match (topic.slug.as_deref(), topic.id) {
            (Some(slug), Some(id)) if !slug.is_empty() => {
                format!("{}/t/{}/{}", self.base_url, slug, id)
            }
            _ => String::new(),
        };
        let published_at = topic
            .created_at
            .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        ContentItem::new(NAME, url)
            .with_title(topic.title)
            .with_body(visible_text(&topic.excerpt.unwrap_or_default()))
            .published(published_at)
    }
}

#[async_trait]
impl SourceAdapter for Discourse {
    fn name(&self) -> &str {
        NAME
    }

    fn targets(&self) -> Vec<String> {
        vec![self.endpoint.clone()]
    }

    async fn fetch(&self) -> Result<Vec<ContentItem>, FetchError> {
        let latest: Latest = self.http.get_json(&self.endpoint, &[]).await?;
        Ok(latest
            .topic_list
            .topics
            .into_iter()
            .take(self.limit)
            .map(|topic| self.topic_item(topic))
            .collect())
    }
}
