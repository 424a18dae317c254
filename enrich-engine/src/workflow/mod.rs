//! Research workflow
//!
//! The loop driver walks a fixed node graph once per run:
//!
//! ```text
//! InitializeFieldStates → ExtractFromImages → QuickLookups
//!     → PlanNextResearch ⇄ ExecuteResearch → EvaluateFields
//!     → PersistResults
//! ```
//!
//! `ExtractFromImages` is skipped without images and `QuickLookups` without
//! a known identifier. The plan/execute/evaluate cycle repeats until the
//! scorer or the stuck detector stops it.

pub mod research_loop;
pub mod stuck_detector;

use crate::tools::{Decision, Diagnostics};
use crate::types::{
    FieldDefinition, FieldValue, ItemFieldStates, ResearchConstraints, ToolId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub use research_loop::{ResearchLoop, DEFAULT_MAX_STEPS, MAX_FIELD_ATTEMPTS};
pub use stuck_detector::StuckDetector;

/// Node of the research graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchNode {
    InitializeFieldStates,
    ExtractFromImages,
    QuickLookups,
    PlanNextResearch,
    ExecuteResearch,
    EvaluateFields,
    PersistResults,
}

impl ResearchNode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InitializeFieldStates => "initialize_field_states",
            Self::ExtractFromImages => "extract_from_images",
            Self::QuickLookups => "quick_lookups",
            Self::PlanNextResearch => "plan_next_research",
            Self::ExecuteResearch => "execute_research",
            Self::EvaluateFields => "evaluate_fields",
            Self::PersistResults => "persist_results",
        }
    }
}

impl fmt::Display for ResearchNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input of one research run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub item_id: String,
    pub required_fields: Vec<FieldDefinition>,
    pub recommended_fields: Vec<FieldDefinition>,
    /// Values already in the catalog
    pub seed_data: HashMap<String, FieldValue>,
    pub target_marketplaces: Vec<String>,
    pub image_urls: Vec<String>,
    pub constraints: ResearchConstraints,
}

impl ResearchRequest {
    pub fn new(item_id: impl Into<String>, constraints: ResearchConstraints) -> Self {
        Self {
            item_id: item_id.into(),
            required_fields: Vec::new(),
            recommended_fields: Vec::new(),
            seed_data: HashMap::new(),
            target_marketplaces: Vec::new(),
            image_urls: Vec::new(),
            constraints,
        }
    }

    /// Required fields by name, using the well-known definitions
    pub fn require<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.required_fields
            .extend(names.into_iter().map(|n| FieldDefinition::known(n.as_ref())));
        self
    }

    /// Recommended fields by name, using the well-known definitions
    pub fn recommend<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.recommended_fields
            .extend(names.into_iter().map(|n| FieldDefinition::known(n.as_ref())));
        self
    }

    pub fn with_seed(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.seed_data.insert(field.into(), value);
        self
    }

    pub fn with_images<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.image_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_marketplaces<I, S>(mut self, marketplaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_marketplaces = marketplaces.into_iter().map(Into::into).collect();
        self
    }
}

/// Summary of one executed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub tool: ToolId,
    pub target_fields: Vec<String>,
    pub success: bool,
    pub cost: f64,
    pub time_ms: u64,
    /// Updates written to the ledger
    pub accepted_updates: usize,
    /// Updates refused by the improvement gate or the ledger
    pub rejected_updates: usize,
    pub error: Option<String>,
}

/// Final result of a research run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub run_id: Uuid,
    pub item_id: String,
    pub decision: Decision,
    pub diagnostics: Diagnostics,
    pub states: ItemFieldStates,
    pub spent: f64,
    /// Adaptive loop iterations (parallel phases not counted)
    pub iterations: u32,
    /// Every executed task in execution order
    pub tasks: Vec<TaskRecord>,
}

impl ResearchOutcome {
    pub fn is_complete(&self) -> bool {
        self.decision == Decision::Complete
    }

    pub fn warnings(&self) -> &[String] {
        &self.diagnostics.warnings
    }
}
