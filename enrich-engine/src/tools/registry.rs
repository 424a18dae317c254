//! Tool Registry
//!
//! Static metadata for every research tool: cost, latency, which fields it
//! serves and what it needs before it can run. The registry is built once
//! and injected into the scorer; it is never mutated afterwards.

use crate::types::{ItemFieldStates, ResearchContext, ServiceKind, ToolId};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Maximum number of fields a wildcard tool is asked for in one task
pub const WILDCARD_TARGET_CAP: usize = 5;

/// Fields a tool can produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldCoverage {
    /// Only the listed fields
    Specific(Vec<String>),
    /// Any field (generic extraction)
    Wildcard,
}

impl FieldCoverage {
    fn specific(fields: &[&str]) -> Self {
        Self::Specific(fields.iter().map(|f| f.to_string()).collect())
    }

    pub fn covers(&self, field_name: &str) -> bool {
        match self {
            Self::Specific(fields) => fields.iter().any(|f| f == field_name),
            Self::Wildcard => true,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }
}

/// Input a tool needs besides its backing service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Prerequisite {
    /// At least one item image
    Images,
    /// A known product identifier (UPC/EAN)
    Identifier,
    /// At least one of the listed fields has a value
    AnyFieldKnown(Vec<String>),
}

impl Prerequisite {
    pub fn is_met(&self, states: &ItemFieldStates, context: &ResearchContext) -> bool {
        match self {
            Self::Images => context.has_images(),
            Self::Identifier => states.identifier().is_some(),
            Self::AnyFieldKnown(fields) => fields.iter().any(|f| states.value_of(f).is_some()),
        }
    }
}

/// Metadata describing one research tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub id: ToolId,
    pub description: String,
    /// Expected monetary cost per call
    pub cost: f64,
    /// Expected wall-clock latency per call
    pub latency_ms: u64,
    pub coverage: FieldCoverage,
    /// Typical self-reported confidence of the tool's results
    pub expected_confidence: f64,
    pub base_priority: f64,
    pub service: ServiceKind,
    pub prerequisites: Vec<Prerequisite>,
    /// Calls allowed per run
    pub max_attempts: u32,
}

impl ToolMetadata {
    /// Backing service configured and every input present
    pub fn prerequisites_met(&self, states: &ItemFieldStates, context: &ResearchContext) -> bool {
        context.is_configured(self.service)
            && self.prerequisites.iter().all(|p| p.is_met(states, context))
    }

    pub fn requires_identifier(&self) -> bool {
        self.prerequisites.contains(&Prerequisite::Identifier)
    }

    pub fn requires_images(&self) -> bool {
        self.prerequisites.contains(&Prerequisite::Images)
    }
}

/// Immutable set of tool metadata, in registration order
///
/// Registration order matters: the scorer keeps the first-seen tool on an
/// exact score tie.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolMetadata>,
}

impl ToolRegistry {
    /// Registry from explicit metadata
    ///
    /// A later entry with an id already registered is ignored.
    pub fn new(tools: Vec<ToolMetadata>) -> Self {
        let mut unique: Vec<ToolMetadata> = Vec::with_capacity(tools.len());
        for tool in tools {
            if unique.iter().any(|t| t.id == tool.id) {
                warn!(tool = %tool.id, "Duplicate tool registration ignored");
                continue;
            }
            unique.push(tool);
        }
        Self { tools: unique }
    }

    /// The standard tool set
    pub fn standard() -> Self {
        Self::new(vec![
            ToolMetadata {
                id: ToolId::UpcLookup,
                description: "Barcode database lookup".to_string(),
                cost: 0.001,
                latency_ms: 800,
                coverage: FieldCoverage::specific(&["title", "brand", "description", "category"]),
                expected_confidence: 0.95,
                base_priority: 60.0,
                service: ServiceKind::IdentifierLookup,
                prerequisites: vec![Prerequisite::Identifier],
                max_attempts: 1,
            },
            ToolMetadata {
                id: ToolId::PriceHistoryIdentifier,
                description: "Marketplace price history by identifier".to_string(),
                cost: 0.01,
                latency_ms: 2000,
                coverage: FieldCoverage::specific(&[
                    "title",
                    "brand",
                    "category",
                    "price",
                    "sales_rank",
                ]),
                expected_confidence: 0.90,
                base_priority: 55.0,
                service: ServiceKind::PriceHistory,
                prerequisites: vec![Prerequisite::Identifier],
                max_attempts: 1,
            },
            ToolMetadata {
                id: ToolId::PriceHistoryKeyword,
                description: "Marketplace price history by keyword".to_string(),
                cost: 0.01,
                latency_ms: 2500,
                coverage: FieldCoverage::specific(&["price", "sales_rank", "category", "title"]),
                expected_confidence: 0.70,
                base_priority: 40.0,
                service: ServiceKind::PriceHistory,
                prerequisites: vec![Prerequisite::AnyFieldKnown(vec![
                    "brand".to_string(),
                    "model".to_string(),
                    "title".to_string(),
                ])],
                max_attempts: 1,
            },
            ToolMetadata {
                id: ToolId::Ocr,
                description: "Text and label extraction from images".to_string(),
                cost: 0.0015,
                latency_ms: 3000,
                coverage: FieldCoverage::specific(&["upc", "model", "brand", "size", "title"]),
                expected_confidence: 0.80,
                base_priority: 50.0,
                service: ServiceKind::Ocr,
                prerequisites: vec![Prerequisite::Images],
                max_attempts: 2,
            },
            ToolMetadata {
                id: ToolId::Vision,
                description: "Prompted attribute extraction from images".to_string(),
                cost: 0.01,
                latency_ms: 5000,
                coverage: FieldCoverage::Wildcard,
                expected_confidence: 0.75,
                base_priority: 45.0,
                service: ServiceKind::Vision,
                prerequisites: vec![Prerequisite::Images],
                max_attempts: 3,
            },
            ToolMetadata {
                id: ToolId::WebSearch,
                description: "Web search with synthesized record".to_string(),
                cost: 0.02,
                latency_ms: 6000,
                coverage: FieldCoverage::Wildcard,
                expected_confidence: 0.65,
                base_priority: 35.0,
                service: ServiceKind::WebSearch,
                prerequisites: vec![Prerequisite::AnyFieldKnown(vec![
                    "upc".to_string(),
                    "brand".to_string(),
                    "model".to_string(),
                    "title".to_string(),
                ])],
                max_attempts: 3,
            },
        ])
    }

    pub fn get(&self, id: ToolId) -> Option<&ToolMetadata> {
        self.tools.iter().find(|t| t.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolMetadata> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ConfidenceLedger;
    use crate::types::{FieldDefinition, FieldValue};
    use std::collections::HashMap;

    fn states_with_upc(upc: Option<&str>) -> ItemFieldStates {
        let mut seed = HashMap::new();
        if let Some(upc) = upc {
            seed.insert("upc".to_string(), FieldValue::Text(upc.to_string()));
        }
        ConfidenceLedger::new().initialize(
            &[FieldDefinition::known("upc"), FieldDefinition::known("title")],
            &[],
            &seed,
            &[],
        )
    }

    #[test]
    fn test_standard_registry_covers_every_tool() {
        let registry = ToolRegistry::standard();
        assert_eq!(registry.len(), ToolId::COUNT);
        for id in ToolId::ALL {
            assert!(registry.get(id).is_some(), "missing {}", id);
        }
    }

    #[test]
    fn test_duplicate_registration_ignored() {
        let standard = ToolRegistry::standard();
        let mut tools: Vec<ToolMetadata> = standard.iter().cloned().collect();
        let mut dup = tools[0].clone();
        dup.base_priority = 1.0;
        tools.push(dup);

        let registry = ToolRegistry::new(tools);
        assert_eq!(registry.len(), ToolId::COUNT);
        assert_eq!(registry.get(ToolId::UpcLookup).unwrap().base_priority, 60.0);
    }

    #[test]
    fn test_identifier_prerequisite() {
        let registry = ToolRegistry::standard();
        let upc = registry.get(ToolId::UpcLookup).unwrap();
        let mut context = ResearchContext::new("item");
        context.services = vec![ServiceKind::IdentifierLookup];

        assert!(!upc.prerequisites_met(&states_with_upc(None), &context));
        assert!(upc.prerequisites_met(&states_with_upc(Some("012345678905")), &context));
    }

    #[test]
    fn test_missing_service_fails_prerequisites() {
        let registry = ToolRegistry::standard();
        let ocr = registry.get(ToolId::Ocr).unwrap();
        let context = ResearchContext::new("item").with_images(["https://img/1.jpg"]);

        assert!(!ocr.prerequisites_met(&states_with_upc(None), &context));
    }

    #[test]
    fn test_coverage() {
        let registry = ToolRegistry::standard();
        assert!(registry.get(ToolId::UpcLookup).unwrap().coverage.covers("brand"));
        assert!(!registry.get(ToolId::UpcLookup).unwrap().coverage.covers("condition"));
        assert!(registry.get(ToolId::Vision).unwrap().coverage.covers("condition"));
    }
}
