use std::path::PathBuf;

use clap::Parser;

/// Invite Hunter CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "invite-hunter",
    version,
    about = "Polls public sources for invite codes and streams new finds"
)]
pub struct Cli {
    /// Address to bind the HTTP server to
    #[arg(long)]
    pub bind: Option<String>,

    /// HTTP port
    #[arg(long)]
    pub port: Option<u16>,

    /// Candidate store backend (memory or sqlite)
    #[arg(long)]
    pub store: Option<String>,

    /// SQLite database file, used with --store sqlite
    #[arg(long)]
    pub sqlite_path: Option<PathBuf>,

    /// Directory holding sources.json and denylist.json
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// Default source polling interval in seconds
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Serve the API without polling any source
    #[arg(long)]
    pub no_poll: bool,
}
