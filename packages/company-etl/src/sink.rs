//! Persistence of confirmed matches.
//!
//! Rows are keyed by registry id. Inserting an id that already exists is a
//! no-op, so re-running the stage never duplicates or overwrites rows.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::DatabaseSettings;
use crate::error::Result;
use crate::types::MatchResult;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS matched_companies (
    abn TEXT PRIMARY KEY,
    company_name TEXT,
    website_url TEXT,
    state TEXT
)
"#;

const INSERT_MATCH: &str = r#"
INSERT INTO matched_companies (abn, company_name, website_url, state)
VALUES ($1, $2, $3, $4)
ON CONFLICT (abn) DO NOTHING
"#;

/// Destination for confirmed matches.
#[async_trait]
pub trait MatchSink: Send + Sync {
    /// Create the destination if it does not exist.
    async fn ensure_schema(&self) -> Result<()>;

    /// Insert unless the registry id is already present.
    ///
    /// Returns `true` when a row was written.
    async fn upsert(&self, record: &MatchResult) -> Result<bool>;
}

/// Sink backed by the `matched_companies` Postgres table.
#[derive(Clone)]
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(settings.connect_options()?)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MatchSink for PostgresSink {
    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert(&self, record: &MatchResult) -> Result<bool> {
        let result = sqlx::query(INSERT_MATCH)
            .bind(&record.registry_id)
            .bind(&record.company_name)
            .bind(&record.root_url)
            .bind(&record.jurisdiction)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// In-memory sink for tests and dry runs.
#[derive(Default)]
pub struct MemorySink {
    rows: RwLock<HashMap<String, MatchResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn get(&self, registry_id: &str) -> Option<MatchResult> {
        self.rows.read().await.get(registry_id).cloned()
    }
}

#[async_trait]
impl MatchSink for MemorySink {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, record: &MatchResult) -> Result<bool> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&record.registry_id) {
            return Ok(false);
        }
        rows.insert(record.registry_id.clone(), record.clone());
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistStats {
    pub inserted: usize,
    /// Records whose registry id was already stored
    pub skipped: usize,
}

/// Write every record; the first writer of a registry id wins.
pub async fn persist_all(sink: &dyn MatchSink, records: &[MatchResult]) -> Result<PersistStats> {
    sink.ensure_schema().await?;

    let mut stats = PersistStats::default();
    for record in records {
        if sink.upsert(record).await? {
            stats.inserted += 1;
        } else {
            stats.skipped += 1;
        }
    }

    info!(
        inserted = stats.inserted,
        skipped = stats.skipped,
        "Persisted matches"
    );
    Ok(stats)
}
