use std::time::Duration;

use reqwest::header::{ACCEPT, RANGE, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::AppError;

use super::FetchError;

const ACCEPT_JSON: &str = "application/json, text/javascript, */*; q=0.01";
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_FEED: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8";

/// Shared HTTP client for every adapter.
///
/// Classifies failures into [`FetchError`] so the scheduler can tell a rate
/// limit from an outage from malformed content.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, AppError> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Config(format!("failed to build HTTP client: {}", err)))?;
        Ok(Self { http })
    }

    /// GET `url` and decode the body as JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let body = self.get_text_with(url, query, ACCEPT_JSON).await?;
        serde_json::from_str(&body)
            .map_err(|err| FetchError::Parse(format!("{}: {}", url, err)))
    }

    /// GET an HTML page.
    pub async fn get_html(&self, url: &str) -> Result<String, FetchError> {
        self.get_text_with(url, &[], ACCEPT_HTML).await
    }

    /// GET a feed document as raw bytes.
    pub async fn get_feed(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.send(url, &[], ACCEPT_FEED).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// HEAD `url` after redirects and return the final status. Only
    /// transport failures are errors.
    pub async fn head_status(&self, url: &str) -> Result<u16, FetchError> {
        let response = self
            .http
            .head(url)
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(response.status().as_u16())
    }

    /// GET only the first byte of `url` and return the status.
    pub async fn first_byte_status(&self, url: &str) -> Result<u16, FetchError> {
        let response = self
            .http
            .get(url)
            .header(RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(response.status().as_u16())
    }

    async fn get_text_with(
        &self,
        url: &str,
        query: &[(&str, String)],
        accept: &str,
    ) -> Result<String, FetchError> {
        let response = self.send(url, query, accept).await?;
        response
            .text()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))
    }

    async fn send(
        &self,
        url: &str,
        query: &[(&str, String)],
        accept: &str,
    ) -> Result<Response, FetchError> {
        let response = self
            .http
            .get(url)
            .header(ACCEPT, accept)
            .query(query)
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok());
            return Err(FetchError::RateLimited {
                url: url.to_string(),
                retry_after,
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Echo {
        value: String,
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new("invite-hunter-test", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn decodes_json_and_sends_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/echo"))
            .and(query_param("q", "sora"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": "ok"})),
            )
            .mount(&server)
            .await;

        let echo: Echo = fetcher()
            .get_json(&format!("{}/echo", server.uri()), &[("q", "sora".to_string())])
            .await
            .unwrap();
        assert_eq!(echo.value, "ok");
    }

    #[tokio::test]
    async fn maps_429_to_rate_limited_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let err = fetcher().get_html(&server.uri()).await.unwrap_err();
        match err {
            FetchError::RateLimited { retry_after, .. } => assert_eq!(retry_after, Some(30)),
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn maps_server_error_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetcher().get_html(&server.uri()).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn invalid_json_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let err = fetcher()
            .get_json::<Echo>(&server.uri(), &[])
            .await
            .unwrap_err();
        assert!(err.is_parse());
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let err = fetcher().get_html("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }
}
