//! Durable candidate storage on SQLite.
//!
//! The `UNIQUE` constraint on `candidates.code` is the dedup guarantee:
//! inserts use `ON CONFLICT(code) DO NOTHING` and a first sighting is
//! recognised by `rows_affected() == 1`. Timestamps are stored as RFC 3339
//! strings with microsecond precision and a `Z` suffix, so string order in
//! `ORDER BY discovered_at` is chronological.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::SqlitePool;

use super::{normalize_code, Candidate, CandidateQuery, CandidateRepository, StorageError};

const SELECT_COLUMNS: &str = "SELECT code, source, source_title, url, snippet, confidence,
        discovered_at, tried, hidden
 FROM candidates";

/// Repository backed by a `candidates` table.
#[derive(Debug, Clone)]
pub struct SqliteCandidateRepository {
    pool: SqlitePool,
}

impl SqliteCandidateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch(
        &self,
        query: &CandidateQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Candidate>, StorageError> {
        let (clause, binds) = where_clause(query, None);
        let sql = format!(
            "{SELECT_COLUMNS} {clause} ORDER BY discovered_at DESC, id DESC LIMIT ? OFFSET ?"
        );

        let mut q = sqlx::query(&sql);
        for value in &binds {
            q = q.bind(value);
        }
        let rows = q
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_candidate).collect()
    }

    async fn count_where(
        &self,
        query: &CandidateQuery,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, StorageError> {
        let (clause, binds) = where_clause(query, since);
        let sql = format!("SELECT COUNT(*) FROM candidates {clause}");

        let mut q = sqlx::query_scalar::<_, i64>(&sql);
        for value in &binds {
            q = q.bind(value);
        }
        let total = q.fetch_one(&self.pool).await?;
        Ok(total.max(0) as u64)
    }
}

#[async_trait]
impl CandidateRepository for SqliteCandidateRepository {
    async fn add_if_absent(&self, candidate: &Candidate) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "INSERT INTO candidates
             (code, source, source_title, url, snippet, confidence, discovered_at, tried, hidden)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(code) DO NOTHING",
        )
        .bind(normalize_code(&candidate.code))
        .bind(&candidate.source)
        .bind(&candidate.source_title)
        .bind(&candidate.url)
        .bind(&candidate.snippet)
        .bind(candidate.confidence)
        .bind(format_timestamp(candidate.discovered_at))
        .bind(candidate.tried)
        .bind(candidate.hidden)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list(
        &self,
        query: &CandidateQuery,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Candidate>, StorageError> {
        self.fetch(query, offset, limit).await
    }

    async fn count(&self, query: &CandidateQuery) -> Result<u64, StorageError> {
        self.count_where(query, None).await
    }

    async fn count_since(
        &self,
        since: DateTime<Utc>,
        query: &CandidateQuery,
    ) -> Result<u64, StorageError> {
        self.count_where(query, Some(since)).await
    }

    async fn mark_tried(&self, code: &str, tried: bool) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE candidates SET tried = ? WHERE code = ?")
            .bind(tried)
            .bind(normalize_code(code))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn toggle_hidden(&self, code: &str) -> Result<Option<bool>, StorageError> {
        let hidden = sqlx::query_scalar::<_, i64>(
            "UPDATE candidates
             SET hidden = CASE hidden WHEN 0 THEN 1 ELSE 0 END
             WHERE code = ?
             RETURNING hidden",
        )
        .bind(normalize_code(code))
        .fetch_optional(&self.pool)
        .await?;

        Ok(hidden.map(|value| value != 0))
    }

    async fn delete(&self, code: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM candidates WHERE code = ?")
            .bind(normalize_code(code))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn latest(&self, limit: usize) -> Result<Vec<Candidate>, StorageError> {
        self.fetch(&CandidateQuery::everything(), 0, limit).await
    }

    async fn exists(&self, code: &str) -> Result<bool, StorageError> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM candidates WHERE code = ?")
            .bind(normalize_code(code))
            .fetch_optional(&self.pool)
            .await?;

        Ok(found.is_some())
    }

    /// Single transaction instead of one round trip per candidate.
    async fn bulk_add(&self, candidates: &[Candidate]) -> Result<usize, StorageError> {
        if candidates.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for candidate in candidates {
            let result = sqlx::query(
                "INSERT INTO candidates
                 (code, source, source_title, url, snippet, confidence,
                  discovered_at, tried, hidden)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(code) DO NOTHING",
            )
            .bind(normalize_code(&candidate.code))
            .bind(&candidate.source)
            .bind(&candidate.source_title)
            .bind(&candidate.url)
            .bind(&candidate.snippet)
            .bind(candidate.confidence)
            .bind(format_timestamp(candidate.discovered_at))
            .bind(candidate.tried)
            .bind(candidate.hidden)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 1 {
                inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Build `WHERE ...` for `query` plus the string binds it needs, in order.
fn where_clause(query: &CandidateQuery, since: Option<DateTime<Utc>>) -> (String, Vec<String>) {
    let mut conditions = vec!["1=1".to_string()];
    let mut binds = Vec::new();

    if !query.include_hidden {
        conditions.push("hidden = 0".into());
    }
    if !query.include_tried {
        conditions.push("tried = 0".into());
    }
    if let Some(source) = query.source_filter() {
        conditions.push("source = ?".into());
        binds.push(source.to_string());
    }
    if let Some(needle) = query.needle() {
        conditions.push(
            "UPPER(code || ' ' || source_title || ' ' || snippet) LIKE ? ESCAPE '\\'".into(),
        );
        binds.push(format!("%{}%", escape_like(&needle)));
    }
    if let Some(since) = since {
        conditions.push("discovered_at >= ?".into());
        binds.push(format_timestamp(since));
    }

    (format!("WHERE {}", conditions.join(" AND ")), binds)
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn row_to_candidate(row: &SqliteRow) -> Result<Candidate, StorageError> {
    use sqlx::Row;

    let discovered_raw: String = row.try_get("discovered_at")?;
    let discovered_at = DateTime::parse_from_rfc3339(&discovered_raw)
        .map_err(|err| StorageError::Corrupt(format!("discovered_at {discovered_raw:?}: {err}")))?
        .with_timezone(&Utc);
    let tried: i64 = row.try_get("tried")?;
    let hidden: i64 = row.try_get("hidden")?;

    Ok(Candidate {
        code: row.try_get("code")?,
        source: row.try_get("source")?,
        source_title: row.try_get("source_title")?,
        url: row.try_get("url")?,
        snippet: row.try_get("snippet")?,
        confidence: row.try_get("confidence")?,
        discovered_at,
        tried: tried != 0,
        hidden: hidden != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, open_file};

    #[test]
    fn escape_like_escapes_wildcards() {
        assert_eq!(escape_like("50%_OFF\\"), "50\\%\\_OFF\\\\");
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let early = "2024-01-01T00:00:09Z".parse::<DateTime<Utc>>().unwrap();
        let late = "2024-01-01T00:00:10.5Z".parse::<DateTime<Utc>>().unwrap();
        assert!(format_timestamp(early) < format_timestamp(late));
    }

    #[tokio::test]
    async fn unique_constraint_is_enforced_by_storage() {
        let pool = create_pool("sqlite::memory:").await.unwrap();

        let insert = "INSERT INTO candidates (code, source, discovered_at) \
                      VALUES ('ABC12', 'x', '2024-01-01T00:00:00.000000Z')";
        sqlx::query(insert).execute(&pool).await.unwrap();
        let second = sqlx::query(insert).execute(&pool).await;

        assert!(second.is_err());
    }

    #[tokio::test]
    async fn corrupt_timestamp_surfaces_as_error() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        sqlx::query(
            "INSERT INTO candidates (code, source, discovered_at) \
             VALUES ('ABC12', 'x', 'yesterday')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let repo = SqliteCandidateRepository::new(pool);
        let err = repo.latest(10).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }

    #[tokio::test]
    async fn candidates_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.db");

        let candidate = Candidate::new("ABC12", "reddit_search", Utc::now())
            .with_title("Sora codes")
            .with_confidence(Some(0.76));
        {
            let repo = SqliteCandidateRepository::new(open_file(&path).await.unwrap());
            assert!(repo.add_if_absent(&candidate).await.unwrap());
            repo.mark_tried("ABC12", true).await.unwrap();
            repo.pool().close().await;
        }

        let repo = SqliteCandidateRepository::new(open_file(&path).await.unwrap());
        assert!(!repo.add_if_absent(&candidate).await.unwrap());

        let stored = repo.latest(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].tried);
        assert_eq!(stored[0].discovered_at, candidate.discovered_at);
        assert_eq!(stored[0].confidence, Some(0.76));
    }
}
