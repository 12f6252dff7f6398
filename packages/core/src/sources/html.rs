//! `generic_html`: visible text of arbitrary pages.
//!
//! Also home of the markup helpers the JSON adapters use for HTML fragments
//! (Mastodon statuses, Discourse excerpts, HN comments).

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{merge_targets, ContentItem, FetchError, HttpFetcher, SourceAdapter, SourceSettings};

pub const NAME: &str = "generic_html";

static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").expect("script regex is valid"));
static STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style\b.*?</style\s*>").expect("style regex is valid"));
static NOSCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<noscript\b.*?</noscript\s*>").expect("noscript regex is valid")
});
static COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex is valid"));
static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title\s*>").expect("title regex is valid"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("tag regex is valid"));
static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Collapse whitespace runs to single spaces and trim.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text, " ").trim().to_string()
}

/// Text a browser would render: scripts, styles and comments dropped, tags
/// replaced by spaces, entities decoded.
pub(crate) fn visible_text(html: &str) -> String {
    let text = COMMENT_RE.replace_all(html, " ");
    let text = SCRIPT_RE.replace_all(&text, " ");
    let text = STYLE_RE.replace_all(&text, " ");
    let text = NOSCRIPT_RE.replace_all(&text, " ");
    let text = TITLE_RE.replace_all(&text, " ");
    let text = TAG_RE.replace_all(&text, " ");
    collapse_whitespace(&html_escape::decode_html_entities(&text))
}

/// Contents of the `<title>` element, if any.
pub(crate) fn page_title(html: &str) -> Option<String> {
    let raw = TITLE_RE.captures(html)?.get(1)?.as_str();
    let title = collapse_whitespace(&html_escape::decode_html_entities(raw));
    (!title.is_empty()).then_some(title)
}

pub struct GenericHtml {
    http: HttpFetcher,
    urls: Vec<String>,
}

impl GenericHtml {
    pub fn new(http: HttpFetcher, urls: Vec<String>) -> Self {
        Self { http, urls }
    }

    pub fn factory(settings: &SourceSettings, http: HttpFetcher) -> Arc<dyn SourceAdapter> {
        Arc::new(Self::new(http, settings.list("urls")))
    }

    async fn fetch_page(&self, url: &str) -> Result<Vec<ContentItem>, FetchError> {
        let html = self.http.get_html(url).await?;
        let title = page_title(&html).unwrap_or_else(|| url.to_string());

        // Pages are keyed by URL so each one shows up as its own source.
        Ok(vec![ContentItem::new(url, url)
            .with_title(title)
            .with_body(visible_text(&html))])
    }
}

#[async_trait]
impl SourceAdapter for GenericHtml {
    fn name(&self) -> &str {
        NAME
    }

    fn targets(&self) -> Vec<String> {
        self.urls.clone()
    }

    async fn fetch(&self) -> Result<Vec<ContentItem>, FetchError> {
        let mut results = Vec::with_capacity(self.urls.len());
        for url in &self.urls {
            results.push((url.clone(), self.fetch_page(url).await));
        }
        merge_targets(NAME, results)
    }
}
