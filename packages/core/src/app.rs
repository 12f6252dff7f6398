//! Process wiring: builds every component from [`Config`], spawns the
//! scheduler and serves the router until a shutdown signal arrives.

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::alerts::{DiscordNotifier, Notifier};
use crate::api::{self, AppState};
use crate::broadcast::EventBroadcaster;
use crate::config::{Config, StoreKind};
use crate::db;
use crate::error::AppError;
use crate::extractor::CodeExtractor;
use crate::health::SourceHealthBoard;
use crate::metrics::AppMetrics;
use crate::repository::{CandidateRepository, InMemoryRepository, SqliteCandidateRepository};
use crate::scheduler::SourceScheduler;
use crate::snapshot::SnapshotBuilder;
use crate::sources::{AdapterRegistry, HttpFetcher, ReachabilityChecker};

/// Every long-lived component, built but not yet running.
pub struct App {
    pub state: AppState,
    pub scheduler: Option<SourceScheduler>,
}

impl App {
    /// Build the application from `config` with the built-in adapters.
    pub async fn build(config: &Config) -> Result<Self, AppError> {
        Self::build_with_registry(config, &AdapterRegistry::with_builtin()).await
    }

    pub async fn build_with_registry(
        config: &Config,
        registry: &AdapterRegistry,
    ) -> Result<Self, AppError> {
        let repository = open_repository(config).await?;
        let metrics = Arc::new(
            AppMetrics::new().map_err(|e| AppError::Config(format!("metrics registry: {}", e)))?,
        );
        let broadcaster = EventBroadcaster::new(config.subscriber_queue);
        let health = SourceHealthBoard::new(config.polling_enabled);

        let snapshots = SnapshotBuilder::new(repository.clone(), health.clone())
            .with_limit(config.snapshot_limit)
            .with_window(config.window_hours, config.window_query());
        let mut state = AppState::new(
            repository.clone(),
            broadcaster.clone(),
            health.clone(),
            metrics.clone(),
        )
        .with_snapshots(snapshots);

        if !config.polling_enabled {
            tracing::info!("Source polling disabled");
            return Ok(Self {
                state,
                scheduler: None,
            });
        }

        let denylist = config.load_denylist().map_err(AppError::Config)?;
        let settings = config.load_sources().map_err(AppError::Config)?;
        let extractor = Arc::new(CodeExtractor::new(config.extraction_profile(denylist))?);

        let http = HttpFetcher::new(&config.user_agent, config.request_timeout())?;
        let names = config.adapter_names(registry);
        let sources = registry.build(&names, &settings, &config.disabled_sources, &http);
        tracing::info!(
            adapters = %sources.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(","),
            "Sources configured"
        );
        state = state.with_reachability(ReachabilityChecker::for_sources(http, &sources));

        let mut scheduler = SourceScheduler::new(
            sources,
            extractor,
            repository,
            broadcaster,
            health,
            metrics,
            config.scheduler_config(),
        );

        if let Some(url) = &config.discord_webhook_url {
            let notifier: Arc<dyn Notifier> = Arc::new(DiscordNotifier::new(url.clone()));
            scheduler = scheduler.with_notifier(notifier);
            tracing::info!("Discord notifications enabled");
        }

        Ok(Self {
            state,
            scheduler: Some(scheduler),
        })
    }

    pub fn router(&self) -> Router {
        api::router(self.state.clone())
    }

    /// Serve on `config.socket_addr()` until ctrl-c or SIGTERM.
    pub async fn serve(self, config: &Config) -> Result<(), AppError> {
        let addr = config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AppError::Network(format!("failed to bind {}: {}", addr, e)))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let router = self.router();
        let broadcaster = self.state.broadcaster.clone();
        if let Some(checker) = self.state.reachability.clone() {
            tokio::spawn(async move {
                let statuses = checker.check_all().await;
                let reachable = statuses.iter().filter(|status| status.ok).count();
                tracing::info!(checked = statuses.len(), reachable, "Source URLs checked");
            });
        }
        let poller = self.spawn_scheduler(shutdown_rx);

        tracing::info!("Server running on {}", addr);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let _ = shutdown_tx.send(true);
                let closed = broadcaster.close_all();
                tracing::info!(subscribers = closed, "Closed event streams");
            })
            .await
            .map_err(|e| AppError::Network(format!("server error: {}", e)))?;

        if let Some(handle) = poller {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "scheduler task failed");
            }
        }

        tracing::info!("Server shut down");
        Ok(())
    }

    fn spawn_scheduler(self, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        self.scheduler
            .map(|scheduler| tokio::spawn(scheduler.run(shutdown)))
    }
}

/// Volatile or SQLite-backed repository, per `STORE`.
pub async fn open_repository(config: &Config) -> Result<Arc<dyn CandidateRepository>, AppError> {
    match config.store {
        StoreKind::Memory => {
            tracing::info!("Using in-memory candidate store");
            Ok(Arc::new(InMemoryRepository::new()))
        }
        StoreKind::Sqlite => {
            let pool = db::open_file(&config.sqlite_path).await?;
            tracing::info!(path = %config.sqlite_path.display(), "Using SQLite candidate store");
            Ok(Arc::new(SqliteCandidateRepository::new(pool)))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
