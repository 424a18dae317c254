//! Task Executor
//!
//! Runs one planned `ResearchTask` against its source and normalizes the
//! outcome into candidate `FieldUpdate`s with provenance.
//!
//! # Routines
//! 1. **barcode** - identifier lookup (`ToolId::UpcLookup`)
//! 2. **price_history** - marketplace product by identifier or keyword
//! 3. **ocr** - labels and identifiers read from images
//! 4. **vision** - prompted attribute extraction from images
//! 5. **web_search** - synthesized record from web results
//!
//! Each routine decides which of the task's target fields its result can
//! satisfy and discounts the source confidence per field.
//!
//! # Failure Semantics
//! - Missing backing service: `ResearchError::Config`, returned immediately
//! - Source failure: retried at this boundary when retryable, then turned
//!   into a failed `TaskResult` charged at half the estimated cost

pub mod barcode;
pub mod ocr;
pub mod price_history;
pub mod retry;
pub mod vision;
pub mod web_search;

use crate::error::{ResearchError, Result, SourceError};
use crate::ledger::ConfidenceLedger;
use crate::sources::ResearchServices;
use crate::types::{
    FieldDataSource, FieldUpdate, FieldValue, ItemFieldStates, ResearchContext, ResearchTask,
    ServiceKind, SourcePayload, ToolId,
};
use enrich_common::config::RetrySettings;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Share of the estimated cost charged for a failed task
pub const FAILED_TASK_COST_FACTOR: f64 = 0.5;

/// Outcome of one executed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub tool: ToolId,
    pub success: bool,
    pub field_updates: Vec<FieldUpdate>,
    /// Monetary cost charged for this task
    pub cost: f64,
    pub time_ms: u64,
    pub error: Option<String>,
}

/// Raw output of an extraction routine
#[derive(Debug, Default)]
pub(crate) struct Extraction {
    pub updates: Vec<FieldUpdate>,
    /// Cost reported by the source, when it reports one
    pub cost: Option<f64>,
}

impl Extraction {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_updates(updates: Vec<FieldUpdate>) -> Self {
        Self {
            updates,
            cost: None,
        }
    }
}

/// Task Executor
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    services: ResearchServices,
    retry: RetrySettings,
}

impl TaskExecutor {
    pub fn new(services: ResearchServices, retry: RetrySettings) -> Self {
        Self { services, retry }
    }

    pub fn services(&self) -> &ResearchServices {
        &self.services
    }

    /// Execute one task
    ///
    /// # Errors
    /// `ResearchError::Config` when the tool's backing service is missing.
    /// Source failures never error; they yield `success = false`.
    pub async fn execute_task(
        &self,
        task: &ResearchTask,
        context: &ResearchContext,
        states: &ItemFieldStates,
    ) -> Result<TaskResult> {
        self.ensure_configured(task.tool)?;

        let start = Instant::now();
        let outcome = retry::retry_source_call(task.tool.as_str(), &self.retry, || {
            self.dispatch(task, context, states)
        })
        .await;
        let time_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(extraction) => {
                let cost = extraction.cost.unwrap_or(task.estimated_cost).max(0.0);
                let field_updates = attach_cost(extraction.updates, cost);
                debug!(
                    tool = %task.tool,
                    item_id = %context.item_id,
                    updates = field_updates.len(),
                    cost,
                    time_ms,
                    "Task executed"
                );
                TaskResult {
                    task_id: task.id,
                    tool: task.tool,
                    success: true,
                    field_updates,
                    cost,
                    time_ms,
                    error: None,
                }
            }
            Err(e) => {
                let cost = task.estimated_cost * FAILED_TASK_COST_FACTOR;
                warn!(
                    tool = %task.tool,
                    item_id = %context.item_id,
                    error = %e,
                    cost,
                    "Task failed"
                );
                TaskResult {
                    task_id: task.id,
                    tool: task.tool,
                    success: false,
                    field_updates: Vec::new(),
                    cost,
                    time_ms,
                    error: Some(e.to_string()),
                }
            }
        };

        Ok(result)
    }

    fn ensure_configured(&self, tool: ToolId) -> Result<()> {
        let kind = service_for(tool);
        let configured = match kind {
            ServiceKind::IdentifierLookup => self.services.identifier_lookup.is_some(),
            ServiceKind::PriceHistory => self
                .services
                .price_history
                .as_ref()
                .is_some_and(|p| p.is_configured()),
            ServiceKind::Ocr => self.services.ocr.is_some(),
            ServiceKind::Vision => self.services.vision.is_some(),
            ServiceKind::WebSearch => self.services.web_search.is_some(),
        };

        if configured {
            Ok(())
        } else {
            error!(tool = %tool, service = ?kind, "Tool planned without its backing service");
            Err(ResearchError::Config(format!(
                "tool '{}' requires the {:?} service, which is not configured",
                tool, kind
            )))
        }
    }

    async fn dispatch(
        &self,
        task: &ResearchTask,
        context: &ResearchContext,
        states: &ItemFieldStates,
    ) -> std::result::Result<Extraction, SourceError> {
        let missing = || SourceError::NotConfigured(task.tool.to_string());

        match task.tool {
            ToolId::UpcLookup => {
                let service = self.services.identifier_lookup.as_deref().ok_or_else(missing)?;
                barcode::lookup(service, task, states).await
            }
            ToolId::PriceHistoryIdentifier => {
                let service = self.services.price_history.as_deref().ok_or_else(missing)?;
                price_history::by_identifier(service, task, states).await
            }
            ToolId::PriceHistoryKeyword => {
                let service = self.services.price_history.as_deref().ok_or_else(missing)?;
                price_history::by_keyword(service, task, states).await
            }
            ToolId::Ocr => {
                let service = self.services.ocr.as_deref().ok_or_else(missing)?;
                ocr::extract(service, task, context, states).await
            }
            ToolId::Vision => {
                let service = self.services.vision.as_deref().ok_or_else(missing)?;
                vision::analyze(service, task, context, states).await
            }
            ToolId::WebSearch => {
                let service = self.services.web_search.as_deref().ok_or_else(missing)?;
                web_search::research(service, task, states).await
            }
        }
    }
}

/// Backing service of a tool
pub fn service_for(tool: ToolId) -> ServiceKind {
    match tool {
        ToolId::UpcLookup => ServiceKind::IdentifierLookup,
        ToolId::PriceHistoryIdentifier | ToolId::PriceHistoryKeyword => ServiceKind::PriceHistory,
        ToolId::Ocr => ServiceKind::Ocr,
        ToolId::Vision => ServiceKind::Vision,
        ToolId::WebSearch => ServiceKind::WebSearch,
    }
}

/// Split the task cost evenly over its updates
fn attach_cost(updates: Vec<FieldUpdate>, cost: f64) -> Vec<FieldUpdate> {
    if updates.is_empty() {
        return updates;
    }
    let share = cost / updates.len() as f64;
    updates
        .into_iter()
        .map(|mut u| {
            u.source = u.source.with_cost(share);
            u
        })
        .collect()
}

/// Candidate update from a raw source string, coerced to the field's type
///
/// `None` when the field is untracked or the string does not coerce.
pub(crate) fn text_update(
    states: &ItemFieldStates,
    field_name: &str,
    raw: &str,
    tool: ToolId,
    confidence: f64,
    payload: &SourcePayload,
) -> Option<FieldUpdate> {
    let data_type = states.get(field_name)?.data_type;
    let value = FieldValue::coerce(raw, data_type)?;
    Some(build_update(field_name, value, tool, confidence, payload))
}

/// Candidate update from a structured (JSON) attribute
pub(crate) fn json_update(
    states: &ItemFieldStates,
    field_name: &str,
    raw: &serde_json::Value,
    tool: ToolId,
    confidence: f64,
    payload: &SourcePayload,
) -> Option<FieldUpdate> {
    let data_type = states.get(field_name)?.data_type;
    let value = FieldValue::from_json(raw, data_type)?;
    Some(build_update(field_name, value, tool, confidence, payload))
}

fn build_update(
    field_name: &str,
    value: FieldValue,
    tool: ToolId,
    confidence: f64,
    payload: &SourcePayload,
) -> FieldUpdate {
    FieldUpdate {
        field_name: field_name.to_string(),
        value,
        source: FieldDataSource::new(tool.source_type(), confidence).with_payload(payload.clone()),
    }
}

/// Apply executor updates through the call-site improvement gate
///
/// An update reaches the ledger only when its field has no value yet, or
/// its raw source confidence is strictly greater than every raw confidence
/// already recorded for the field. Updates are applied in order, so later
/// updates in a batch are gated against earlier accepted ones.
///
/// Returns the new states and the updates that were written.
pub fn apply_field_updates(
    ledger: &ConfidenceLedger,
    states: &ItemFieldStates,
    updates: &[FieldUpdate],
) -> (ItemFieldStates, Vec<FieldUpdate>) {
    let mut current = states.clone();
    let mut accepted = Vec::new();

    for update in updates {
        let Some(field) = current.get(&update.field_name) else {
            warn!(field = %update.field_name, "Update for untracked field dropped");
            continue;
        };

        let best_raw = field
            .confidence
            .sources
            .iter()
            .map(|s| s.confidence)
            .fold(0.0, f64::max);
        if field.has_value() && update.source.confidence <= best_raw {
            debug!(
                field = %update.field_name,
                confidence = update.source.confidence,
                best_raw,
                "Update not better than current, skipped"
            );
            continue;
        }

        let threshold = ledger.threshold_for(field);
        let source_count = field.confidence.sources.len();
        let next = ledger.update_field(
            &current,
            &update.field_name,
            Some(update.value.clone()),
            update.source.clone(),
            threshold,
        );
        // The ledger may still refuse a candidate that does not fit the field
        let written = next
            .get(&update.field_name)
            .is_some_and(|f| f.confidence.sources.len() > source_count);
        current = next;
        if written {
            accepted.push(update.clone());
        }
    }

    (current, accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{
        IdentifierLookup, IdentifierLookupResult, OcrResult, OcrService,
    };
    use crate::types::{FieldDefinition, SourceType};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FixedLookup;

    #[async_trait]
    impl IdentifierLookup for FixedLookup {
        async fn lookup(
            &self,
            _code: &str,
        ) -> std::result::Result<IdentifierLookupResult, SourceError> {
            Ok(IdentifierLookupResult {
                found: true,
                brand: Some("Acme".to_string()),
                name: Some("Acme Steel Kettle".to_string()),
                description: None,
                category: Some("Kitchen".to_string()),
            })
        }
    }

    struct FlakyOcr {
        calls: AtomicU32,
        error: SourceError,
    }

    #[async_trait]
    impl OcrService for FlakyOcr {
        async fn extract_text(&self, _urls: &[String]) -> std::result::Result<OcrResult, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    fn fast_retry() -> RetrySettings {
        RetrySettings {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        }
    }

    fn states() -> ItemFieldStates {
        let mut seed = HashMap::new();
        seed.insert("upc".to_string(), FieldValue::Text("012345678905".to_string()));
        ConfidenceLedger::new().initialize(
            &[
                FieldDefinition::known("upc"),
                FieldDefinition::known("brand"),
                FieldDefinition::known("title"),
            ],
            &[FieldDefinition::known("category")],
            &seed,
            &[],
        )
    }

    fn task(tool: ToolId, targets: &[&str], cost: f64) -> ResearchTask {
        ResearchTask {
            id: Uuid::new_v4(),
            target_fields: targets.iter().map(|s| s.to_string()).collect(),
            tool,
            priority: 1.0,
            estimated_cost: cost,
            estimated_time_ms: 100,
            rationale: "test".to_string(),
        }
    }

    fn web_update(field: &str, value: &str, source_type: SourceType, confidence: f64) -> FieldUpdate {
        FieldUpdate {
            field_name: field.to_string(),
            value: FieldValue::Text(value.to_string()),
            source: FieldDataSource::new(source_type, confidence),
        }
    }

    #[tokio::test]
    async fn test_missing_service_is_config_error() {
        let executor = TaskExecutor::new(ResearchServices::new(), fast_retry());
        let result = executor
            .execute_task(
                &task(ToolId::UpcLookup, &["brand"], 0.001),
                &ResearchContext::new("item-1"),
                &states(),
            )
            .await;
        assert!(matches!(result, Err(ResearchError::Config(_))));
    }

    #[tokio::test]
    async fn test_barcode_task_produces_targeted_updates() {
        let services = ResearchServices::new().with_identifier_lookup(Arc::new(FixedLookup));
        let executor = TaskExecutor::new(services, fast_retry());
        let result = executor
            .execute_task(
                &task(ToolId::UpcLookup, &["brand", "title"], 0.002),
                &ResearchContext::new("item-1"),
                &states(),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.cost, 0.002);
        let fields: Vec<&str> = result.field_updates.iter().map(|u| u.field_name.as_str()).collect();
        assert_eq!(fields, vec!["brand", "title"]);
        // Cost is split across the updates
        let total: f64 = result
            .field_updates
            .iter()
            .filter_map(|u| u.source.cost)
            .sum();
        assert!((total - 0.002).abs() < 1e-12);
        assert!(result
            .field_updates
            .iter()
            .all(|u| u.source.source_type == SourceType::BarcodeLookup));
    }

    #[tokio::test]
    async fn test_failed_task_charges_half_estimate() {
        let ocr = Arc::new(FlakyOcr {
            calls: AtomicU32::new(0),
            error: SourceError::Api("unsupported image".to_string()),
        });
        let services = ResearchServices::new().with_ocr(ocr.clone());
        let executor = TaskExecutor::new(services, fast_retry());
        let context = ResearchContext::new("item-1").with_images(["https://img/1.jpg"]);

        let result = executor
            .execute_task(&task(ToolId::Ocr, &["brand"], 0.002), &context, &states())
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.field_updates.is_empty());
        assert_eq!(result.cost, 0.001);
        assert!(result.error.unwrap().contains("unsupported image"));
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried() {
        let ocr = Arc::new(FlakyOcr {
            calls: AtomicU32::new(0),
            error: SourceError::Network("connection reset".to_string()),
        });
        let services = ResearchServices::new().with_ocr(ocr.clone());
        let executor = TaskExecutor::new(services, fast_retry());
        let context = ResearchContext::new("item-1").with_images(["https://img/1.jpg"]);

        let result = executor
            .execute_task(&task(ToolId::Ocr, &["brand"], 0.002), &context, &states())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_gate_three_competing_updates_two_writes() {
        let ledger = ConfidenceLedger::new();
        let updates = vec![
            web_update("brand", "Acme Corp", SourceType::WebSearch, 0.65),
            web_update("brand", "Acme", SourceType::BarcodeLookup, 0.95),
            web_update("brand", "ACME Inc", SourceType::Ocr, 0.75),
        ];

        let (next, accepted) = apply_field_updates(&ledger, &states(), &updates);

        assert_eq!(accepted.len(), 2);
        let brand = next.get("brand").unwrap();
        assert_eq!(brand.value, Some(FieldValue::Text("Acme".to_string())));
        assert_eq!(brand.confidence.sources.len(), 2);
        assert_eq!(brand.attempts, 2);
    }

    #[test]
    fn test_gate_drops_untracked_fields() {
        let ledger = ConfidenceLedger::new();
        let before = states();
        let updates = vec![web_update("colour", "red", SourceType::Vision, 0.9)];
        let (next, accepted) = apply_field_updates(&ledger, &before, &updates);
        assert!(accepted.is_empty());
        assert!(next.get("colour").is_none());
        assert_eq!(next.fields.len(), before.fields.len());
    }

    #[test]
    fn test_gate_rejects_equal_confidence() {
        let ledger = ConfidenceLedger::new();
        let updates = vec![
            web_update("brand", "Acme", SourceType::Vision, 0.8),
            web_update("brand", "Acme Co", SourceType::Vision, 0.8),
        ];
        let (_, accepted) = apply_field_updates(&ledger, &states(), &updates);
        assert_eq!(accepted.len(), 1);
    }
}
