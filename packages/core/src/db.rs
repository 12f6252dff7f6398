//! SQLite pool construction.
//!
//! Both helpers run the embedded migrations before handing the pool out, so
//! callers always see the `candidates` table with its unique `code` column.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::repository::StorageError;

/// Open a pool from a connection URL such as `sqlite::memory:` or
/// `sqlite://data/codes.db`.
pub async fn create_pool(url: &str) -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let in_memory = url.contains(":memory:") || url.contains("mode=memory");
    connect(options, in_memory).await
}

/// Open (creating if needed) a database file, including missing parent
/// directories.
pub async fn open_file(path: &Path) -> Result<SqlitePool, StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    connect(options, false).await
}

async fn connect(
    options: SqliteConnectOptions,
    in_memory: bool,
) -> Result<SqlitePool, StorageError> {
    // Each connection to `:memory:` is its own database, so the pool must
    // hold exactly one connection for its whole lifetime.
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = pool_options.connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pool_has_candidates_table() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM candidates")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn open_file_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("codes.db");

        let pool = open_file(&path).await.unwrap();
        pool.close().await;

        assert!(path.exists());
    }
}
