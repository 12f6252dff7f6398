//! Source polling scheduler.
//!
//! Drives the main polling loop: once per tick every due source is fetched,
//! its items are run through the extractor, and each first-seen code is
//! stored, broadcast and handed to the notifier.
//!
//! Sources are visited one at a time in configured order. A failing source
//! only moves its own [`SourceState`] (backoff, cooldown); errors are logged
//! and never leave the loop.
//!
//! Outcomes are stamped when the fetch finishes, in whole seconds after the
//! tick's start, so a slow fetch does not eat into the next interval.

pub mod state;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::alerts::Notifier;
use crate::broadcast::EventBroadcaster;
use crate::extractor::CodeExtractor;
use crate::health::SourceHealthBoard;
use crate::metrics::AppMetrics;
use crate::repository::{Candidate, CandidateRepository};
use crate::sources::{ConfiguredSource, ContentItem, SourceAdapter};

pub use state::{BackoffPolicy, FailureOutcome, SourceState};

/// Loop cadence and failure handling.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Poll interval for sources without their own `interval_seconds`.
    pub poll_interval: Duration,
    /// How often due sources are looked for.
    pub tick: Duration,
    pub policy: BackoffPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: state::DEFAULT_POLL_INTERVAL,
            tick: Duration::from_secs(1),
            policy: BackoffPolicy::default(),
        }
    }
}

/// Outcome of one pass over the sources.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub polled: usize,
    pub failed: usize,
    pub new_codes: usize,
    /// Shutdown arrived before every due source was visited.
    pub interrupted: bool,
}

struct Entry {
    adapter: Arc<dyn SourceAdapter>,
    state: SourceState,
}

pub struct SourceScheduler {
    entries: Vec<Entry>,
    extractor: Arc<CodeExtractor>,
    repository: Arc<dyn CandidateRepository>,
    broadcaster: EventBroadcaster,
    notifier: Option<Arc<dyn Notifier>>,
    health: SourceHealthBoard,
    metrics: Arc<AppMetrics>,
    config: SchedulerConfig,
}

impl SourceScheduler {
    pub fn new(
        sources: Vec<ConfiguredSource>,
        extractor: Arc<CodeExtractor>,
        repository: Arc<dyn CandidateRepository>,
        broadcaster: EventBroadcaster,
        health: SourceHealthBoard,
        metrics: Arc<AppMetrics>,
        config: SchedulerConfig,
    ) -> Self {
        let now = Utc::now();
        let entries = sources
            .into_iter()
            .map(|source| {
                let interval = source.interval.unwrap_or(config.poll_interval);
                Entry {
                    state: SourceState::new(source.name, source.enabled, interval, now),
                    adapter: source.adapter,
                }
            })
            .collect();

        Self {
            entries,
            extractor,
            repository,
            broadcaster,
            notifier: None,
            health,
            metrics,
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn states(&self) -> Vec<&SourceState> {
        self.entries.iter().map(|entry| &entry.state).collect()
    }

    /// Run until `shutdown` turns `true` (or its sender is dropped).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let enabled = self.entries.iter().filter(|e| e.state.enabled).count();
        tracing::info!(
            sources = self.entries.len(),
            enabled,
            "Source polling started (default interval: {}s)",
            self.config.poll_interval.as_secs()
        );
        self.health.set_running(true).await;
        self.publish_health(Utc::now()).await;

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_signalled(&mut shutdown) => break,
            }

            let summary = self.tick(Utc::now(), &mut shutdown).await;
            if summary.polled > 0 {
                tracing::debug!(
                    polled = summary.polled,
                    failed = summary.failed,
                    new_codes = summary.new_codes,
                    "tick complete"
                );
            }
            if summary.interrupted {
                break;
            }
        }

        self.health.set_running(false).await;
        tracing::info!("Source polling stopped cleanly");
    }

    /// Visit every source once at wall-clock time `now`.
    pub async fn tick(
        &mut self,
        now: DateTime<Utc>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> TickSummary {
        let mut summary = TickSummary::default();

        for idx in 0..self.entries.len() {
            if *shutdown.borrow() {
                summary.interrupted = true;
                break;
            }

            let entry = &mut self.entries[idx];
            if entry.state.release_cooldown(now) {
                tracing::info!(source = %entry.state.name, "cooldown elapsed, source resumed");
            }
            if !entry.state.is_due(now) {
                continue;
            }

            let name = entry.state.name.clone();
            let adapter = entry.adapter.clone();
            self.metrics.polls_total.with_label_values(&[&name]).inc();
            summary.polled += 1;

            let started = Instant::now();
            let result = tokio::select! {
                result = adapter.fetch() => Some(result),
                _ = shutdown_signalled(shutdown) => None,
            };

            let Some(result) = result else {
                // The abandoned fetch leaves the source exactly as it was.
                tracing::info!(source = %name, "Shutdown signal received mid-fetch, abandoning");
                summary.interrupted = true;
                break;
            };

            let finished = state::after(now, Duration::from_secs(started.elapsed().as_secs()));
            match result {
                Ok(items) => {
                    self.entries[idx].state.record_success(finished);
                    let item_count = items.len();
                    let new_codes = self.process_items(items).await;
                    summary.new_codes += new_codes;
                    tracing::info!(
                        source = %name,
                        items = item_count,
                        new_codes,
                        "poll succeeded"
                    );
                }
                Err(err) => {
                    summary.failed += 1;
                    self.metrics.poll_errors_total.with_label_values(&[&name]).inc();
                    if err.is_rate_limited() {
                        self.metrics.rate_limited_total.with_label_values(&[&name]).inc();
                    }

                    let state = &mut self.entries[idx].state;
                    match state.record_failure(finished, &err, &self.config.policy) {
                        FailureOutcome::Backoff(delay) => tracing::warn!(
                            source = %name,
                            status = ?err.status(),
                            failures = state.consecutive_failures,
                            retry_in_secs = delay.as_secs(),
                            error = %err,
                            "poll failed"
                        ),
                        FailureOutcome::Cooldown(until) => tracing::error!(
                            source = %name,
                            status = ?err.status(),
                            failures = state.consecutive_failures,
                            cooldown_until = %until,
                            error = %err,
                            "failure threshold reached, source cooling down"
                        ),
                        FailureOutcome::ParseTolerated => tracing::warn!(
                            source = %name,
                            parse_failures = state.consecutive_parse_failures,
                            error = %err,
                            "malformed content skipped"
                        ),
                    }
                }
            }
        }

        self.publish_health(now).await;
        summary
    }

    /// Extract, store and fan out codes from `items`. Returns how many codes
    /// were new.
    async fn process_items(&self, items: Vec<ContentItem>) -> usize {
        let mut new_codes = 0;

        for item in items {
            let text = item.text();
            for code in self.extractor.extract(&text) {
                let candidate = Candidate::new(&code, item.source_id.clone(), Utc::now())
                    .with_title(item.title.clone())
                    .with_url(item.url.clone())
                    .with_snippet(self.extractor.build_snippet(&text, &code))
                    .with_confidence(self.extractor.confidence(&text));

                match self.repository.add_if_absent(&candidate).await {
                    Ok(true) => {
                        new_codes += 1;
                        self.metrics.candidates_discovered_total.inc();
                        tracing::info!(
                            code = %candidate.code,
                            source = %candidate.source,
                            confidence = ?candidate.confidence,
                            "new code discovered"
                        );
                        self.broadcaster.publish(&candidate);
                        self.dispatch_notification(candidate);
                    }
                    Ok(false) => {
                        self.metrics.duplicates_total.inc();
                    }
                    Err(err) => {
                        self.metrics.storage_errors_total.inc();
                        tracing::error!(
                            code = %candidate.code,
                            error = %err,
                            "failed to store candidate"
                        );
                    }
                }
            }
        }

        new_codes
    }

    /// Notify on a separate task so a slow webhook never stalls the tick.
    fn dispatch_notification(&self, candidate: Candidate) {
        if let Some(notifier) = &self.notifier {
            let notifier = notifier.clone();
            tokio::spawn(async move {
                notifier.notify(&candidate).await;
            });
        }
    }

    async fn publish_health(&self, now: DateTime<Utc>) {
        let policy = &self.config.policy;
        let sources: Vec<_> = self
            .entries
            .iter()
            .map(|entry| entry.state.health(now, policy))
            .collect();
        let cooling = sources.iter().filter(|s| s.paused).count();

        self.metrics.sources_cooling_down.set(cooling as f64);
        self.health.publish(sources, now).await;
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
