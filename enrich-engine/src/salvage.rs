//! Salvage Recovery
//!
//! Rebuilds the best available partial result after a run ended abnormally
//! (crash, step limit). Preference order:
//!
//! 1. Latest persisted research record, with or without evidence
//!    (low-confidence salvage when evidence is below the minimum). When the
//!    record belongs to an earlier run, the requested run's evidence is
//!    laid over its values field by field.
//! 2. Evidence alone, best value per field reconstructed from the entries
//! 3. Nothing: `ResearchError::NothingToSalvage`

use crate::error::{ResearchError, Result};
use crate::store::{EvidenceBundle, ResearchRecord, ResearchStore};
use crate::types::{FieldValue, SourceType, ToolId};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// How a salvage was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalvageKind {
    /// Persisted research with enough evidence behind it
    Full,
    /// Persisted research with less evidence than the minimum
    LowConfidence,
    /// No persisted research; values rebuilt from evidence
    EvidenceOnly,
}

/// Best value recovered for one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalvagedValue {
    pub value: FieldValue,
    pub confidence: f64,
    /// Tool that produced the value; `None` when taken from field state
    pub tool: Option<ToolId>,
    pub source_type: Option<SourceType>,
}

/// Result of a salvage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalvageOutcome {
    pub item_id: String,
    pub run_id: Uuid,
    pub kind: SalvageKind,
    pub research: Option<ResearchRecord>,
    pub evidence_count: usize,
    pub values: BTreeMap<String, SalvagedValue>,
    pub warnings: Vec<String>,
}

/// Salvage Recovery
pub struct SalvageRecovery {
    store: Arc<dyn ResearchStore>,
    min_evidence: usize,
}

impl SalvageRecovery {
    pub fn new(store: Arc<dyn ResearchStore>, min_evidence: usize) -> Self {
        Self {
            store,
            min_evidence,
        }
    }

    /// Recover what a terminated run left behind
    ///
    /// # Errors
    /// - `ResearchError::NothingToSalvage` when there is neither a persisted
    ///   research record for the item nor any evidence for the run
    /// - `ResearchError::Store` when the store cannot be read
    pub async fn salvage(&self, item_id: &str, run_id: Uuid) -> Result<SalvageOutcome> {
        let research = self
            .store
            .find_latest_research(item_id)
            .await
            .with_context(|| format!("Failed to load research for item {}", item_id))?;
        let evidence = self
            .store
            .get_evidence(run_id)
            .await
            .with_context(|| format!("Failed to load evidence for run {}", run_id))?
            .filter(|bundle| !bundle.is_empty());
        let evidence_count = evidence.as_ref().map_or(0, EvidenceBundle::len);

        let mut warnings = Vec::new();
        let (kind, values) = match (&research, &evidence) {
            (Some(record), _) => {
                let mut values = values_from_research(record);
                if record.run_id != run_id {
                    warnings.push(format!(
                        "Latest research for item {} belongs to run {}, not {}",
                        item_id, record.run_id, run_id
                    ));
                    // Evidence of the requested run is newer than the record
                    if let Some(bundle) = &evidence {
                        values.extend(values_from_evidence(bundle));
                    }
                }
                let kind = if evidence_count >= self.min_evidence {
                    SalvageKind::Full
                } else {
                    warnings.push(format!(
                        "Low-confidence salvage: {} evidence entries (minimum {})",
                        evidence_count, self.min_evidence
                    ));
                    SalvageKind::LowConfidence
                };
                (kind, values)
            }
            (None, Some(bundle)) => {
                warnings.push(format!(
                    "No structured research was finalized for item {}; values rebuilt from {} evidence entries",
                    item_id, evidence_count
                ));
                (SalvageKind::EvidenceOnly, values_from_evidence(bundle))
            }
            (None, None) => {
                warn!(item_id, %run_id, "Nothing to salvage");
                return Err(ResearchError::NothingToSalvage {
                    item_id: item_id.to_string(),
                    run_id,
                });
            }
        };

        for warning in &warnings {
            warn!(item_id, %run_id, "{}", warning);
        }
        info!(
            item_id,
            %run_id,
            kind = ?kind,
            evidence = evidence_count,
            fields = values.len(),
            "Run salvaged"
        );

        Ok(SalvageOutcome {
            item_id: item_id.to_string(),
            run_id,
            kind,
            research,
            evidence_count,
            values,
            warnings,
        })
    }
}

fn values_from_research(record: &ResearchRecord) -> BTreeMap<String, SalvagedValue> {
    record
        .outcome
        .states
        .fields
        .iter()
        .filter_map(|(name, field)| {
            let value = field.value.clone().filter(|v| !v.is_empty())?;
            Some((
                name.clone(),
                SalvagedValue {
                    value,
                    confidence: field.confidence.value,
                    tool: None,
                    source_type: field.confidence.sources.last().map(|s| s.source_type),
                },
            ))
        })
        .collect()
}

fn values_from_evidence(bundle: &EvidenceBundle) -> BTreeMap<String, SalvagedValue> {
    bundle
        .best_by_field()
        .into_iter()
        .map(|(name, entry)| {
            (
                name,
                SalvagedValue {
                    value: entry.value.clone(),
                    confidence: entry.weighted_confidence,
                    tool: Some(entry.tool),
                    source_type: Some(entry.source_type),
                },
            )
        })
        .collect()
}
