//! `generic_rss`: any RSS or Atom feed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use feed_rs::model::Entry;

use super::html::visible_text;
use super::{merge_targets, ContentItem, FetchError, HttpFetcher, SourceAdapter, SourceSettings};

pub const NAME: &str = "generic_rss";

pub struct GenericRss {
    http: HttpFetcher,
    feeds: Vec<String>,
}

impl GenericRss {
    pub fn new(http: HttpFetcher, feeds: Vec<String>) -> Self {
        Self { http, feeds }
    }

    pub fn factory(settings: &SourceSettings, http: HttpFetcher) -> Arc<dyn SourceAdapter> {
        Arc::new(Self::new(http, settings.list("feeds")))
    }

    async fn fetch_feed(&self, feed_url: &str) -> Result<Vec<ContentItem>, FetchError> {
        let bytes = self.http.get_feed(feed_url).await?;
        parse_feed(&bytes, feed_url)
    }
}

/// Parse an RSS/Atom document into items.
pub(crate) fn parse_feed(bytes: &[u8], feed_url: &str) -> Result<Vec<ContentItem>, FetchError> {
    let feed = feed_rs::parser::parse(bytes)
        .map_err(|err| FetchError::Parse(format!("{}: {}", feed_url, err)))?;

    Ok(feed
        .entries
        .into_iter()
        .map(|entry| entry_to_item(entry, feed_url))
        .collect())
}

fn entry_to_item(entry: Entry, feed_url: &str) -> ContentItem {
    let url = entry
        .links
        .first()
        .map(|link| link.href.clone())
        .unwrap_or_else(|| feed_url.to_string());
    let title = entry
        .title
        .map(|t| visible_text(&t.content))
        .unwrap_or_default();

    let summary = entry.summary.map(|t| t.content).unwrap_or_default();
    let content = entry.content.and_then(|c| c.body).unwrap_or_default();
    let body = match (summary.trim().is_empty(), content.trim().is_empty()) {
        (false, false) if summary != content => format!("{} {}", summary, content),
        (false, _) => summary,
        (true, _) => content,
    };

    let published_at = entry
        .published
        .or(entry.updated)
        .unwrap_or_else(Utc::now);

    ContentItem::new(NAME, url)
        .with_title(title)
        .with_body(visible_text(&body))
        .published(published_at)
}

#[async_trait]
impl SourceAdapter for GenericRss {
    fn name(&self) -> &str {
        NAME
    }

    fn targets(&self) -> Vec<String> {
        self.feeds.clone()
    }

    async fn fetch(&self) -> Result<Vec<ContentItem>, FetchError> {
        let mut results = Vec::with_capacity(self.feeds.len());
        for feed in &self.feeds {
            results.push((feed.clone(), self.fetch_feed(feed).await));
        }
        merge_targets(NAME, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Codes</title>
<item>
  <title>Sora invite drop</title>
  <link>https://example.com/post/1</link>
  <description>&lt;p&gt;Fresh code: AB3K9Z&lt;/p&gt;</description>
  <pubDate>Tue, 14 Nov 2023 22:13:20 GMT</pubDate>
</item>
<item>
  <title>No link here</title>
  <description>nothing</description>
</item>
</channel></rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom codes</title>
  <id>urn:feed</id>
  <updated>2023-11-14T22:13:20Z</updated>
  <entry>
    <title>Beta access</title>
    <id>urn:entry:1</id>
    <link href="https://example.com/atom/1"/>
    <updated>2023-11-14T22:13:20Z</updated>
    <summary>Use QW7ER2 today</summary>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items() {
        let items = parse_feed(RSS.as_bytes(), "https://example.com/feed").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Sora invite drop");
        assert_eq!(items[0].url, "https://example.com/post/1");
        assert_eq!(items[0].body, "Fresh code: AB3K9Z");
        assert_eq!(items[0].published_at.timestamp(), 1_700_000_000);
        assert_eq!(items[1].url, "https://example.com/feed");
    }

    #[test]
    fn parses_atom_entries() {
        let items = parse_feed(ATOM.as_bytes(), "https://example.com/atom").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://example.com/atom/1");
        assert_eq!(items[0].body, "Use QW7ER2 today");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_feed(b"definitely not xml", "https://example.com/feed").unwrap_err();
        assert!(err.is_parse());
    }

    #[tokio::test]
    async fn fetch_reads_every_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/atom"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ATOM))
            .mount(&server)
            .await;

        let http = HttpFetcher::new("test", Duration::from_secs(5)).unwrap();
        let adapter = GenericRss::new(
            http,
            vec![format!("{}/rss", server.uri()), format!("{}/atom", server.uri())],
        );

        let items = adapter.fetch().await.unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|item| item.source_id == "generic_rss"));
    }

    #[tokio::test]
    async fn single_broken_feed_is_a_parse_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<<<"))
            .mount(&server)
            .await;

        let http = HttpFetcher::new("test", Duration::from_secs(5)).unwrap();
        let adapter = GenericRss::new(http, vec![server.uri()]);

        assert!(adapter.fetch().await.unwrap_err().is_parse());
    }
}
