//! In-memory research store

use super::{EvidenceBundle, ResearchRecord, ResearchStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Research store backed by process memory
#[derive(Debug, Default)]
pub struct MemoryResearchStore {
    research: RwLock<HashMap<String, Vec<ResearchRecord>>>,
    evidence: RwLock<HashMap<Uuid, EvidenceBundle>>,
}

impl MemoryResearchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of research records saved for an item
    pub async fn research_count(&self, item_id: &str) -> usize {
        self.research
            .read()
            .await
            .get(item_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl ResearchStore for MemoryResearchStore {
    async fn save_research(&self, record: &ResearchRecord) -> anyhow::Result<()> {
        self.research
            .write()
            .await
            .entry(record.item_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn save_evidence(&self, bundle: &EvidenceBundle) -> anyhow::Result<()> {
        self.evidence
            .write()
            .await
            .insert(bundle.run_id, bundle.clone());
        Ok(())
    }

    async fn find_latest_research(&self, item_id: &str) -> anyhow::Result<Option<ResearchRecord>> {
        Ok(self
            .research
            .read()
            .await
            .get(item_id)
            .and_then(|records| records.last().cloned()))
    }

    async fn get_evidence(&self, run_id: Uuid) -> anyhow::Result<Option<EvidenceBundle>> {
        Ok(self.evidence.read().await.get(&run_id).cloned())
    }
}
