//! Discord webhook delivery.
//!
//! Posts one embed per new code. Failed attempts are retried with
//! exponential backoff plus random jitter; after the last attempt the
//! failure is logged and dropped.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::Serialize;

use crate::error::AppError;
use crate::repository::Candidate;

use super::Notifier;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_ATTEMPTS: u8 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
const SNIPPET_LIMIT: usize = 300;

#[derive(Clone, Debug)]
pub struct DiscordNotifier {
    webhook_url: String,
    http: Client,
    timeout: Duration,
    max_attempts: u8,
    base_delay: Duration,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            http: Client::new(),
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_attempts(mut self, attempts: u8) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Deliver the embed for `candidate`, retrying on failure.
    pub async fn send(&self, candidate: &Candidate) -> Result<(), AppError> {
        let payload = WebhookPayload::for_candidate(candidate);

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let result = self
                .http
                .post(&self.webhook_url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            let error = match result {
                Ok(response) => match response.error_for_status() {
                    Ok(_) => return Ok(()),
                    Err(err) => format!("webhook HTTP error: {}", err),
                },
                Err(err) => format!("webhook request failed: {}", err),
            };

            if attempt >= self.max_attempts {
                return Err(AppError::Network(error));
            }

            let delay = self.retry_delay(attempt);
            tracing::debug!(
                code = %candidate.code,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying webhook"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// `base << (attempt - 1)` plus up to half of `base` of jitter.
    fn retry_delay(&self, attempt: u8) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let exponential = base.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
        let jitter = if base >= 2 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(exponential + jitter)
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, candidate: &Candidate) {
        if let Err(err) = self.send(candidate).await {
            tracing::warn!(code = %candidate.code, error = %err, "notification not delivered");
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: &'static str,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    description: String,
    fields: Vec<EmbedField>,
}

#[derive(Debug, Serialize)]
struct WebhookPayload {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl WebhookPayload {
    fn for_candidate(candidate: &Candidate) -> Self {
        let link = (!candidate.url.is_empty()).then(|| candidate.url.clone());
        let mut fields = vec![
            EmbedField {
                name: "Source",
                value: candidate.source.clone(),
                inline: true,
            },
            EmbedField {
                name: "Discovered",
                value: candidate.discovered_at.to_rfc3339(),
                inline: true,
            },
        ];
        if let Some(url) = &link {
            fields.push(EmbedField {
                name: "Link",
                value: url.clone(),
                inline: false,
            });
        }

        Self {
            content: None,
            embeds: vec![Embed {
                title: format!("New invite code: {}", candidate.code),
                url: link,
                description: candidate.snippet.chars().take(SNIPPET_LIMIT).collect(),
                fields,
            }],
        }
    }
}
