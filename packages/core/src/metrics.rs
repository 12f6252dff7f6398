//! Prometheus metrics registry for the invite hunter.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it
//! to the scheduler and HTTP middleware.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Source fetch attempts, labelled by source.
    pub polls_total: CounterVec,
    /// Failed source fetches, labelled by source.
    pub poll_errors_total: CounterVec,
    /// Fetches answered with HTTP 429, labelled by source.
    pub rate_limited_total: CounterVec,
    /// Codes stored for the first time.
    pub candidates_discovered_total: Counter,
    /// Extracted codes that were already stored.
    pub duplicates_total: Counter,
    /// Repository failures while storing candidates.
    pub storage_errors_total: Counter,
    /// Sources currently in cooldown.
    pub sources_cooling_down: Gauge,
    /// Open event stream subscriptions.
    pub live_subscribers: Gauge,
    /// HTTP request count, labelled by method, path, and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency histogram in seconds.
    pub http_request_duration: Histogram,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let polls_total = CounterVec::new(
            Opts::new("invite_hunter_polls_total", "Source fetch attempts"),
            &["source"],
        )?;

        let poll_errors_total = CounterVec::new(
            Opts::new("invite_hunter_poll_errors_total", "Failed source fetches"),
            &["source"],
        )?;

        let rate_limited_total = CounterVec::new(
            Opts::new(
                "invite_hunter_rate_limited_total",
                "Source fetches rejected with HTTP 429",
            ),
            &["source"],
        )?;

        let candidates_discovered_total = Counter::with_opts(Opts::new(
            "invite_hunter_candidates_discovered_total",
            "Codes stored for the first time",
        ))?;

        let duplicates_total = Counter::with_opts(Opts::new(
            "invite_hunter_duplicates_total",
            "Extracted codes that were already known",
        ))?;

        let storage_errors_total = Counter::with_opts(Opts::new(
            "invite_hunter_storage_errors_total",
            "Repository failures while storing candidates",
        ))?;

        let sources_cooling_down = Gauge::with_opts(Opts::new(
            "invite_hunter_sources_cooling_down",
            "Sources paused after repeated failures",
        ))?;

        let live_subscribers = Gauge::with_opts(Opts::new(
            "invite_hunter_live_subscribers",
            "Open event stream subscriptions",
        ))?;

        let http_requests_total = CounterVec::new(
            Opts::new(
                "invite_hunter_http_requests_total",
                "HTTP requests by method, path, and status",
            ),
            &["method", "path", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "invite_hunter_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(polls_total.clone()))?;
        registry.register(Box::new(poll_errors_total.clone()))?;
        registry.register(Box::new(rate_limited_total.clone()))?;
        registry.register(Box::new(candidates_discovered_total.clone()))?;
        registry.register(Box::new(duplicates_total.clone()))?;
        registry.register(Box::new(storage_errors_total.clone()))?;
        registry.register(Box::new(sources_cooling_down.clone()))?;
        registry.register(Box::new(live_subscribers.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            polls_total,
            poll_errors_total,
            rate_limited_total,
            candidates_discovered_total,
            duplicates_total,
            storage_errors_total,
            sources_cooling_down,
            live_subscribers,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}
