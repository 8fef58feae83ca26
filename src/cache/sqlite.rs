//! Durable cache tier backed by SQLite.
//!
//! Analyses are keyed by (developer_id, pr_id) so nothing leaks between
//! dashboards sharing one machine; pattern syntheses are keyed by developer
//! alone. Payloads are serialized JSON columns beside the bookkeeping
//! fields the rehydration query needs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Executor, Row, SqlitePool};
use tracing::debug;

use super::{CacheBackend, CacheEntry, CacheScope};
use crate::review::{AnalysisResult, PatternAnalysisResult};

const CREATE_PR_ANALYSES: &str = r#"
CREATE TABLE IF NOT EXISTS pr_analyses (
    developer_id TEXT NOT NULL,
    pr_id INTEGER NOT NULL,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER,
    has_error INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (developer_id, pr_id)
);
"#;

const CREATE_PATTERN_ANALYSES: &str = r#"
CREATE TABLE IF NOT EXISTS pattern_analyses (
    developer_id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER
);
"#;

/// Runs all required migrations. Safe to call at every startup (idempotent).
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    pool.execute(CREATE_PR_ANALYSES).await?;
    pool.execute(CREATE_PATTERN_ANALYSES).await?;
    Ok(())
}

pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) and migrate a cache database.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        run_migrations(&pool).await?;
        debug!("sqlite cache ready at {}", database_url);
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CacheBackend for SqliteCacheStore {
    async fn get_pr_analysis(
        &self,
        developer_id: &str,
        pr_id: i64,
    ) -> Result<Option<CacheEntry<AnalysisResult>>> {
        let row = sqlx::query(
            "SELECT payload, created_at, expires_at FROM pr_analyses
             WHERE developer_id = ? AND pr_id = ?",
        )
        .bind(developer_id)
        .bind(pr_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let payload: String = row.get("payload");
                let data: AnalysisResult = serde_json::from_str(&payload)?;
                Ok(Some(CacheEntry {
                    data,
                    timestamp: row.get("created_at"),
                    expires_at: row.get("expires_at"),
                }))
            }
            None => Ok(None),
        }
    }

    async fn put_pr_analysis(
        &self,
        developer_id: &str,
        entry: &CacheEntry<AnalysisResult>,
    ) -> Result<()> {
        let payload = serde_json::to_string(&entry.data)?;
        sqlx::query(
            r#"
            INSERT INTO pr_analyses (developer_id, pr_id, payload, created_at, expires_at, has_error)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(developer_id, pr_id) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                has_error = excluded.has_error
            "#,
        )
        .bind(developer_id)
        .bind(entry.data.pr_id)
        .bind(payload)
        .bind(entry.timestamp)
        .bind(entry.expires_at)
        .bind(entry.data.is_error())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_pr_analysis(&self, developer_id: &str, pr_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM pr_analyses WHERE developer_id = ? AND pr_id = ?")
            .bind(developer_id)
            .bind(pr_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_pattern_analysis(
        &self,
        developer_id: &str,
    ) -> Result<Option<CacheEntry<PatternAnalysisResult>>> {
        let row = sqlx::query(
            "SELECT payload, created_at, expires_at FROM pattern_analyses
             WHERE developer_id = ?",
        )
        .bind(developer_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let payload: String = row.get("payload");
                let data: PatternAnalysisResult = serde_json::from_str(&payload)?;
                Ok(Some(CacheEntry {
                    data,
                    timestamp: row.get("created_at"),
                    expires_at: row.get("expires_at"),
                }))
            }
            None => Ok(None),
        }
    }

    async fn put_pattern_analysis(
        &self,
        developer_id: &str,
        entry: &CacheEntry<PatternAnalysisResult>,
    ) -> Result<()> {
        let payload = serde_json::to_string(&entry.data)?;
        sqlx::query(
            r#"
            INSERT INTO pattern_analyses (developer_id, payload, created_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(developer_id) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(developer_id)
        .bind(payload)
        .bind(entry.timestamp)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_pattern_analysis(&self, developer_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM pattern_analyses WHERE developer_id = ?")
            .bind(developer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear(&self, scope: CacheScope) -> Result<()> {
        let sql = match scope {
            CacheScope::PrAnalyses => "DELETE FROM pr_analyses",
            CacheScope::PatternAnalyses => "DELETE FROM pattern_analyses",
        };
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn cached_pr_ids(&self, developer_id: &str) -> Result<Vec<i64>> {
        let now = Utc::now().timestamp_millis();
        let rows = sqlx::query(
            r#"
            SELECT pr_id FROM pr_analyses
            WHERE developer_id = ? AND has_error = 0
              AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY pr_id
            "#,
        )
        .bind(developer_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get::<i64, _>("pr_id")).collect())
    }
}
