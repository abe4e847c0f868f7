//! SQLite-backed [`ResolutionStore`]

use super::ResolutionStore;
use crate::error::{ResolutionError, ResolutionResult};
use crate::types::{BatchId, Classification, ExternalSearch, PayeeId};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::time::{Duration, Instant};

/// Longest a write keeps retrying while SQLite reports the database locked
const MAX_LOCK_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `db_path`
    pub async fn connect(db_path: &Path) -> ResolutionResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ResolutionError::Storage(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        tracing::debug!("Connecting to database: {}", db_url);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database
    pub async fn in_memory() -> ResolutionResult<Self> {
        // One connection: every connection to sqlite::memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> ResolutionResult<Self> {
        init_tables(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn init_tables(pool: &SqlitePool) -> ResolutionResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS external_searches (
            request_id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            search_id TEXT,
            submission_key TEXT NOT NULL,
            status TEXT NOT NULL,
            payload TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            last_polled_at TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_external_searches_key ON external_searches(submission_key)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            evidence_key TEXT NOT NULL,
            revision INTEGER NOT NULL,
            payee_id TEXT NOT NULL,
            batch_id TEXT NOT NULL,
            external_match_status TEXT NOT NULL,
            is_excluded INTEGER NOT NULL,
            confidence REAL NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(evidence_key, revision)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_classifications_payee ON classifications(payee_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_classifications_batch ON classifications(batch_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Retry a write with exponential backoff while SQLite reports the database locked
///
/// Backoff starts at 10ms and doubles up to 1s. Other errors return at once.
async fn retry_on_lock<F, Fut, T>(operation_name: &str, mut operation: F) -> ResolutionResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let start_time = Instant::now();
    let mut attempt = 0;
    let mut backoff = Duration::from_millis(10);

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database write succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !err.to_string().contains("database is locked") => return Err(err.into()),
            Err(err) => {
                let elapsed = start_time.elapsed();
                if elapsed >= MAX_LOCK_WAIT {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Database write failed: max lock wait exceeded"
                    );
                    return Err(ResolutionError::Storage(format!(
                        "Database locked after {} attempts: {}",
                        attempt, err
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Database locked, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(1));
            }
        }
    }
}

#[async_trait]
impl ResolutionStore for SqliteStore {
    async fn record_search(&self, batch_id: BatchId, search: &ExternalSearch) -> ResolutionResult<()> {
        let payload = serde_json::to_string(search)?;
        let batch_id = batch_id.to_string();
        let submitted_at = search.submitted_at.to_rfc3339();
        let last_polled_at = search.last_polled_at.map(|dt| dt.to_rfc3339());
        let updated_at = chrono::Utc::now().to_rfc3339();

        retry_on_lock("record_search", || async {
            sqlx::query(
                r#"
                INSERT INTO external_searches (
                    request_id, batch_id, search_id, submission_key, status,
                    payload, submitted_at, last_polled_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(request_id) DO UPDATE SET
                    search_id = excluded.search_id,
                    status = excluded.status,
                    payload = excluded.payload,
                    last_polled_at = excluded.last_polled_at,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&search.request_id)
            .bind(&batch_id)
            .bind(&search.search_id)
            .bind(&search.submission_key)
            .bind(search.status.as_str())
            .bind(&payload)
            .bind(&submitted_at)
            .bind(&last_polled_at)
            .bind(&updated_at)
            .execute(&self.pool)
            .await
        })
        .await?;

        Ok(())
    }

    async fn load_search(&self, request_id: &str) -> ResolutionResult<Option<ExternalSearch>> {
        let row = sqlx::query("SELECT payload FROM external_searches WHERE request_id = ?")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let payload: String = row.get("payload");
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn record_classification(&self, classification: &Classification) -> ResolutionResult<bool> {
        let payload = serde_json::to_string(classification)?;
        let evidence_key = classification.evidence_key();
        let payee_id = classification.payee_id.to_string();
        let batch_id = classification.batch_id.to_string();
        let created_at = classification.created_at.to_rfc3339();

        let result = retry_on_lock("record_classification", || async {
            sqlx::query(
                r#"
                INSERT INTO classifications (
                    evidence_key, revision, payee_id, batch_id,
                    external_match_status, is_excluded, confidence, payload, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(evidence_key, revision) DO NOTHING
                "#,
            )
            .bind(&evidence_key)
            .bind(classification.revision as i64)
            .bind(&payee_id)
            .bind(&batch_id)
            .bind(classification.external_match_status.as_str())
            .bind(classification.is_excluded)
            .bind(classification.confidence)
            .bind(&payload)
            .bind(&created_at)
            .execute(&self.pool)
            .await
        })
        .await?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            tracing::debug!(
                payee_id = %classification.payee_id,
                evidence_key = %evidence_key,
                revision = classification.revision,
                "Classification already recorded"
            );
        }
        Ok(inserted)
    }

    async fn classification_history(&self, payee_id: PayeeId) -> ResolutionResult<Vec<Classification>> {
        let rows = sqlx::query("SELECT payload FROM classifications WHERE payee_id = ? ORDER BY id")
            .bind(payee_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.get("payload");
                serde_json::from_str(&payload).map_err(ResolutionError::from)
            })
            .collect()
    }
}
