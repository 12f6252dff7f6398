use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Output layout of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Initialize structured logging for the application.
///
/// This must be called once at startup (in main.rs). `RUST_LOG` controls the
/// filter, defaulting to `info`.
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Compact => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init(),
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init(),
    }

    info!(?format, "Logging initialized");
}
