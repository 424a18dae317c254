//! Research persistence
//!
//! Opaque CRUD used at loop exit (research record), after every executed
//! phase or task (evidence bundle), and by salvage recovery.
//!
//! # Implementations
//! - **MemoryResearchStore** - in-process maps, for tests and embedding
//! - **SqliteResearchStore** - `sqlx` SQLite with JSON columns

pub mod memory;
pub mod sqlite;

use crate::types::{FieldUpdate, FieldValue, SourceType, ToolId};
use crate::workflow::ResearchOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub use memory::MemoryResearchStore;
pub use sqlite::SqliteResearchStore;

/// One accepted candidate, recorded as evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub task_id: Uuid,
    pub tool: ToolId,
    pub field_name: String,
    pub value: FieldValue,
    pub source_type: SourceType,
    /// Raw source confidence
    pub confidence: f64,
    pub weighted_confidence: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Evidence accumulated during one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub item_id: String,
    pub run_id: Uuid,
    pub entries: Vec<EvidenceEntry>,
    pub updated_at: DateTime<Utc>,
}

impl EvidenceBundle {
    pub fn new(item_id: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            item_id: item_id.into(),
            run_id,
            entries: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Record the updates a task got written to the ledger
    pub fn record(&mut self, task_id: Uuid, tool: ToolId, updates: &[FieldUpdate]) {
        let now = Utc::now();
        self.entries.extend(updates.iter().map(|u| EvidenceEntry {
            task_id,
            tool,
            field_name: u.field_name.clone(),
            value: u.value.clone(),
            source_type: u.source.source_type,
            confidence: u.source.confidence,
            weighted_confidence: u.source.weighted_confidence(),
            recorded_at: now,
        }));
        self.updated_at = now;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest weighted-confidence entry per field
    ///
    /// The earliest entry wins on equal weighted confidence.
    pub fn best_by_field(&self) -> BTreeMap<String, &EvidenceEntry> {
        let mut best: BTreeMap<String, &EvidenceEntry> = BTreeMap::new();
        for entry in &self.entries {
            match best.get(&entry.field_name) {
                Some(current) if current.weighted_confidence >= entry.weighted_confidence => {}
                _ => {
                    best.insert(entry.field_name.clone(), entry);
                }
            }
        }
        best
    }
}

/// Persisted research result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchRecord {
    pub id: Uuid,
    pub item_id: String,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub outcome: ResearchOutcome,
}

impl ResearchRecord {
    pub fn from_outcome(outcome: ResearchOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id: outcome.item_id.clone(),
            run_id: outcome.run_id,
            created_at: Utc::now(),
            outcome,
        }
    }
}

/// Persistence collaborator for research runs
#[async_trait]
pub trait ResearchStore: Send + Sync {
    async fn save_research(&self, record: &ResearchRecord) -> anyhow::Result<()>;

    /// Insert or replace the evidence bundle of a run
    async fn save_evidence(&self, bundle: &EvidenceBundle) -> anyhow::Result<()>;

    /// Most recently saved research record for an item
    async fn find_latest_research(&self, item_id: &str) -> anyhow::Result<Option<ResearchRecord>>;

    async fn get_evidence(&self, run_id: Uuid) -> anyhow::Result<Option<EvidenceBundle>>;
}
