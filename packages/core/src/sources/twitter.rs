//! `twitter_search`: live X search pages.
//!
//! X serves search results only to logged-in browsers, so each `live_urls`
//! entry is fetched through a reader proxy (`proxy_prefix`) that returns the
//! rendered page. The whole page becomes one item, truncated to `max_chars`.

use std::sync::Arc;

use async_trait::async_trait;

use super::html::{collapse_whitespace, page_title, visible_text};
use super::{merge_targets, ContentItem, FetchError, HttpFetcher, SourceAdapter, SourceSettings};

pub const NAME: &str = "twitter_search";

const DEFAULT_PROXY_PREFIX: &str = "https://r.jina.ai/";
const DEFAULT_MAX_CHARS: u64 = 15_000;

pub struct TwitterSearch {
    http: HttpFetcher,
    live_urls: Vec<String>,
    proxy_prefix: String,
    max_chars: usize,
}

impl TwitterSearch {
    pub fn factory(settings: &SourceSettings, http: HttpFetcher) -> Arc<dyn SourceAdapter> {
        Arc::new(Self {
            http,
            live_urls: settings.list("live_urls"),
            // An explicit empty prefix disables the proxy.
            proxy_prefix: if settings.contains("proxy_prefix") {
                settings.str("proxy_prefix").unwrap_or_default().to_string()
            } else {
                DEFAULT_PROXY_PREFIX.to_string()
            },
            max_chars: settings.u64("max_chars").unwrap_or(DEFAULT_MAX_CHARS) as usize,
        })
    }

    async fn fetch_search(&self, search_url: &str) -> Result<Vec<ContentItem>, FetchError> {
        let fetch_url = format!("{}{}", self.proxy_prefix, search_url);
        let page = self.http.get_html(&fetch_url).await?;

        let (title, text) = if page.contains('<') {
            (page_title(&page), visible_text(&page))
        } else {
            (None, collapse_whitespace(&page))
        };
        let body: String = text.chars().take(self.max_chars).collect();
        let title = title.unwrap_or_else(|| format!("Live search: {}", search_url));

        Ok(vec![ContentItem::new(NAME, search_url)
            .with_title(title)
            .with_body(body)])
    }
}

#[async_trait]
impl SourceAdapter for TwitterSearch {
    fn name(&self) -> &str {
        NAME
    }

    fn targets(&self) -> Vec<String> {
        self.live_urls.clone()
    }

    async fn fetch(&self) -> Result<Vec<ContentItem>, FetchError> {
        let mut results = Vec::with_capacity(self.live_urls.len());
        for url in &self.live_urls {
            results.push((url.clone(), self.fetch_search(url).await));
        }
        merge_targets(NAME, results)
    }
}
