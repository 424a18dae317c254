//! SQLite research store
//!
//! Records and evidence bundles are stored whole as JSON, with the columns
//! needed for lookup and ordering kept alongside. Schema is created on
//! connect (`CREATE TABLE IF NOT EXISTS`).

use super::{EvidenceBundle, ResearchRecord, ResearchStore};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Research store backed by a SQLite database
#[derive(Debug, Clone)]
pub struct SqliteResearchStore {
    pool: SqlitePool,
}

impl SqliteResearchStore {
    /// Wrap an existing pool and make sure the schema exists
    pub async fn new(pool: SqlitePool) -> anyhow::Result<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open (creating if needed) a database file
    pub async fn connect(db_path: &Path) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(
            db_path.to_str().context("Invalid database path")?,
        )
        .context("Failed to parse database path")?
        .journal_mode(SqliteJournalMode::Wal)
        .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open research database {}", db_path.display()))?;

        info!(path = %db_path.display(), "Research database opened");
        Self::new(pool).await
    }

    /// Private in-memory database
    ///
    /// Limited to one connection: every SQLite in-memory connection is a
    /// separate database.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory research database")?;
        Self::new(pool).await
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS research_results (
                id TEXT PRIMARY KEY,
                item_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                decision TEXT NOT NULL,
                completion_score REAL NOT NULL,
                total_cost REAL NOT NULL,
                record TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create research_results table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_research_results_item ON research_results (item_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create research_results index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS evidence_bundles (
                run_id TEXT PRIMARY KEY,
                item_id TEXT NOT NULL,
                entry_count INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                bundle TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create evidence_bundles table")?;

        debug!("Research store schema ready");
        Ok(())
    }
}

#[async_trait]
impl ResearchStore for SqliteResearchStore {
    async fn save_research(&self, record: &ResearchRecord) -> anyhow::Result<()> {
        let json = serde_json::to_string(record).context("Failed to serialize research record")?;
        let decision = serde_json::to_value(record.outcome.decision)?
            .as_str()
            .unwrap_or_default()
            .to_string();

        sqlx::query(
            r#"
            INSERT INTO research_results (
                id, item_id, run_id, created_at, decision, completion_score, total_cost, record
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.item_id)
        .bind(record.run_id.to_string())
        .bind(record.created_at.timestamp_micros())
        .bind(decision)
        .bind(record.outcome.states.metrics.completion_score)
        .bind(record.outcome.spent)
        .bind(json)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save research for item {}", record.item_id))?;

        debug!(item_id = %record.item_id, run_id = %record.run_id, "Research record saved");
        Ok(())
    }

    async fn save_evidence(&self, bundle: &EvidenceBundle) -> anyhow::Result<()> {
        let json = serde_json::to_string(bundle).context("Failed to serialize evidence bundle")?;

        sqlx::query(
            r#"
            INSERT INTO evidence_bundles (run_id, item_id, entry_count, updated_at, bundle)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                item_id = excluded.item_id,
                entry_count = excluded.entry_count,
                updated_at = excluded.updated_at,
                bundle = excluded.bundle
            "#,
        )
        .bind(bundle.run_id.to_string())
        .bind(&bundle.item_id)
        .bind(bundle.entries.len() as i64)
        .bind(bundle.updated_at.timestamp_micros())
        .bind(json)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save evidence for run {}", bundle.run_id))?;

        Ok(())
    }

    async fn find_latest_research(&self, item_id: &str) -> anyhow::Result<Option<ResearchRecord>> {
        let row = sqlx::query(
            r#"
            SELECT record FROM research_results
            WHERE item_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load research for item {}", item_id))?;

        row.map(|row| {
            let json: String = row.try_get("record")?;
            serde_json::from_str(&json).context("Corrupt research record")
        })
        .transpose()
    }

    async fn get_evidence(&self, run_id: Uuid) -> anyhow::Result<Option<EvidenceBundle>> {
        let row = sqlx::query("SELECT bundle FROM evidence_bundles WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to load evidence for run {}", run_id))?;

        row.map(|row| {
            let json: String = row.try_get("bundle")?;
            serde_json::from_str(&json).context("Corrupt evidence bundle")
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldDataSource, FieldUpdate, FieldValue, SourceType, ToolId};

    #[tokio::test]
    async fn test_evidence_upsert_roundtrip() {
        let store = SqliteResearchStore::in_memory().await.unwrap();
        let run_id = Uuid::new_v4();
        let mut bundle = EvidenceBundle::new("item-7", run_id);
        store.save_evidence(&bundle).await.unwrap();

        bundle.record(
            Uuid::new_v4(),
            ToolId::Ocr,
            &[FieldUpdate {
                field_name: "model".to_string(),
                value: FieldValue::Text("KX-200".to_string()),
                source: FieldDataSource::new(SourceType::Ocr, 0.9),
            }],
        );
        store.save_evidence(&bundle).await.unwrap();

        let loaded = store.get_evidence(run_id).await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries[0].field_name, "model");
    }

    #[tokio::test]
    async fn test_missing_rows_are_none() {
        let store = SqliteResearchStore::in_memory().await.unwrap();
        assert!(store.find_latest_research("item-x").await.unwrap().is_none());
        assert!(store.get_evidence(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("research.db");
        let store = SqliteResearchStore::connect(&path).await.unwrap();
        store
            .save_evidence(&EvidenceBundle::new("item-1", Uuid::new_v4()))
            .await
            .unwrap();
        assert!(path.exists());
    }
}
