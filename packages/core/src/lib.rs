// Library root: exposes internal modules for integration tests in `tests/`.
// Production entry point remains `src/main.rs`.

pub mod alerts;
pub mod api;
pub mod app;
pub mod broadcast;
pub mod db;
pub mod error;
pub mod extractor;
pub mod health;
pub mod metrics;
pub mod repository;
pub mod scheduler;
pub mod snapshot;
pub mod sources;

// Startup concerns used by the binary; public so tests can build a `Config`.
pub mod cli;
pub mod config;
pub mod logging;
