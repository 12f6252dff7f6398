use clap::Parser;
use dotenvy::dotenv;

use invite_hunter::app::App;
use invite_hunter::cli::Cli;
use invite_hunter::config::Config;
use invite_hunter::error::AppError;
use invite_hunter::logging::init_logging;

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env().and_then(|config| config.with_cli(&cli));
    init_logging(
        config
            .as_ref()
            .map(|config| config.log_format)
            .unwrap_or_default(),
    );

    let config = config.map_err(AppError::Config).unwrap_or_else(|err| {
        tracing::error!("{}", err);
        std::process::exit(1);
    });

    tracing::info!(
        addr = %config.socket_addr(),
        store = ?config.store,
        polling = config.polling_enabled,
        "Service starting"
    );

    let result = match App::build(&config).await {
        Ok(app) => app.serve(&config).await,
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}
