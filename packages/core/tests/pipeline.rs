//! End-to-end pipeline tests: wiremocked sources are polled by the real
//! scheduler, codes land in SQLite, reach live subscribers and trigger the
//! Discord webhook.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde_json::json;
use tokio::sync::watch;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use invite_hunter::{
    alerts::DiscordNotifier,
    broadcast::EventBroadcaster,
    db,
    extractor::{CodeExtractor, ExtractionProfile},
    health::SourceHealthBoard,
    metrics::AppMetrics,
    repository::{CandidateQuery, CandidateRepository, SqliteCandidateRepository},
    scheduler::{SchedulerConfig, SourceScheduler},
    sources::{AdapterRegistry, HttpFetcher, SourceSettings},
};

fn hn_hits() -> serde_json::Value {
    json!({
        "hits": [
            {
                "title": "Sora 2 invite codes thread",
                "story_text": "Here is my sora invite code: AB3K9Z enjoy",
                "objectID": "1001",
                "created_at_i": 1_700_000_000
            },
            {
                "comment_text": "another one <b>QX7P2M</b>, and AB3K9Z again",
                "story_title": "Sora 2 invite codes thread",
                "objectID": "1002",
                "created_at_i": 1_700_000_100
            }
        ]
    })
}

struct Pipeline {
    scheduler: SourceScheduler,
    repository: Arc<dyn CandidateRepository>,
    broadcaster: EventBroadcaster,
    health: SourceHealthBoard,
    metrics: Arc<AppMetrics>,
}

async fn build_pipeline(
    server: &MockServer,
    names: &[&str],
    notifier: Option<DiscordNotifier>,
) -> Pipeline {
    let pool = db::create_pool("sqlite::memory:").await.unwrap();
    let repository: Arc<dyn CandidateRepository> = Arc::new(SqliteCandidateRepository::new(pool));

    let mut settings = HashMap::new();
    settings.insert(
        "hacker_news".to_string(),
        SourceSettings::default()
            .with("endpoint", format!("{}/hn/search", server.uri()))
            .with("query", "sora invite"),
    );
    settings.insert(
        "reddit_subs".to_string(),
        SourceSettings::default()
            .with("base_url", server.uri())
            .with("subs", json!(["OpenAI"])),
    );

    let http = HttpFetcher::new("invite-hunter-test/0.1", StdDuration::from_secs(5)).unwrap();
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let sources = AdapterRegistry::with_builtin().build(&names, &settings, &[], &http);

    let extractor = Arc::new(CodeExtractor::new(ExtractionProfile::default()).unwrap());
    let broadcaster = EventBroadcaster::default();
    let health = SourceHealthBoard::new(true);
    let metrics = Arc::new(AppMetrics::new().unwrap());

    let mut scheduler = SourceScheduler::new(
        sources,
        extractor,
        repository.clone(),
        broadcaster.clone(),
        health.clone(),
        metrics.clone(),
        SchedulerConfig::default(),
    );
    if let Some(notifier) = notifier {
        scheduler = scheduler.with_notifier(Arc::new(notifier));
    }

    Pipeline {
        scheduler,
        repository,
        broadcaster,
        health,
        metrics,
    }
}

async fn wait_for_requests(server: &MockServer, route: &str, expected: usize) -> usize {
    for _ in 0..100 {
        let seen = server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == route)
            .count();
        if seen >= expected {
            return seen;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    0
}

#[tokio::test]
async fn new_codes_flow_to_store_subscribers_and_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hn/search"))
        .and(query_param("query", "sora invite"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hn_hits()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let notifier = DiscordNotifier::new(format!("{}/hook", server.uri()));
    let mut pipeline = build_pipeline(&server, &["hacker_news"], Some(notifier)).await;
    let mut subscription = pipeline.broadcaster.subscribe();
    let (_tx, mut rx) = watch::channel(false);

    let summary = pipeline.scheduler.tick(Utc::now(), &mut rx).await;
    assert_eq!(summary.polled, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.new_codes, 2);

    let first = subscription.recv().await.unwrap();
    let second = subscription.recv().await.unwrap();
    assert_eq!(first.code, "AB3K9Z");
    assert_eq!(first.source, "hacker_news");
    assert_eq!(first.url, "https://news.ycombinator.com/item?id=1001");
    assert!(first.snippet.contains("AB3K9Z"));
    assert!(first.confidence.is_some());
    assert_eq!(second.code, "QX7P2M");
    assert!(subscription.try_recv().is_none());

    assert_eq!(pipeline.repository.count(&CandidateQuery::everything()).await.unwrap(), 2);
    assert_eq!(wait_for_requests(&server, "/hook", 2).await, 2);

    // Same content on the next poll: nothing new, only duplicates.
    let later = Utc::now() + Duration::seconds(61);
    let summary = pipeline.scheduler.tick(later, &mut rx).await;
    assert_eq!(summary.polled, 1);
    assert_eq!(summary.new_codes, 0);
    assert!(subscription.try_recv().is_none());
    assert!(pipeline.metrics.duplicates_total.get() >= 3.0);
}

#[tokio::test]
async fn failing_source_does_not_block_healthy_one() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/OpenAI/new.json"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hn/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hn_hits()))
        .mount(&server)
        .await;

    let mut pipeline = build_pipeline(&server, &["reddit_subs", "hacker_news"], None).await;
    let (_tx, mut rx) = watch::channel(false);

    let now = Utc::now();
    let summary = pipeline.scheduler.tick(now, &mut rx).await;
    assert_eq!(summary.polled, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.new_codes, 2);

    let board = pipeline.health.snapshot().await;
    assert_eq!(board.last_poll, Some(now));
    let reddit = &board.sources[0];
    assert_eq!(reddit.name, "reddit_subs");
    assert_eq!(reddit.consecutive_failures, 1);
    assert!(reddit.last_error_message.is_some());
    assert!(reddit.next_run.unwrap() > now);
    let hn = &board.sources[1];
    assert_eq!(hn.consecutive_failures, 0);
    assert_eq!(hn.last_success, Some(now));

    assert_eq!(
        pipeline
            .metrics
            .rate_limited_total
            .with_label_values(&["reddit_subs"])
            .get(),
        1.0
    );

    // One second later nothing is due: the healthy source waits out its
    // interval and the rate-limited one is backing off.
    let summary = pipeline
        .scheduler
        .tick(now + Duration::seconds(1), &mut rx)
        .await;
    assert_eq!(summary.polled, 0);
}

#[tokio::test]
async fn run_loop_polls_until_shutdown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hn/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hn_hits()))
        .mount(&server)
        .await;

    let pipeline = build_pipeline(&server, &["hacker_news"], None).await;
    let repository = pipeline.repository.clone();
    let health = pipeline.health.clone();
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(pipeline.scheduler.run(rx));

    let mut stored = 0;
    for _ in 0..150 {
        stored = repository.count(&CandidateQuery::everything()).await.unwrap();
        if stored == 2 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    assert_eq!(stored, 2);
    assert!(health.snapshot().await.running);

    tx.send(true).unwrap();
    tokio::time::timeout(StdDuration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert!(!health.snapshot().await.running);
}
