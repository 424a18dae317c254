//! Test Helper Utilities
//!
//! In-process source collaborators for driving research runs without a
//! network.

#![allow(dead_code)]

use async_trait::async_trait;
use enrich_common::config::RetrySettings;
use enrich_engine::activity::{ActivityLogger, OperationId};
use enrich_engine::executor::TaskExecutor;
use enrich_engine::sources::{
    IdentifierLookup, IdentifierLookupResult, OcrResult, OcrService, ResearchServices, SearchHit,
    SourceError, VisionAttribute, VisionResult, VisionService, WebSearchQuery, WebSearchResult,
    WebSearchService,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Retry settings without backoff delays
pub fn fast_retry() -> RetrySettings {
    RetrySettings {
        max_attempts: 1,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
    }
}

pub fn executor(services: ResearchServices) -> TaskExecutor {
    TaskExecutor::new(services, fast_retry())
}

// ============================================================================
// Sources
// ============================================================================

/// Barcode database that knows every code
pub struct FixedLookup {
    pub brand: &'static str,
    pub name: &'static str,
    pub calls: AtomicU32,
}

impl FixedLookup {
    pub fn new(brand: &'static str, name: &'static str) -> Self {
        Self {
            brand,
            name,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl IdentifierLookup for FixedLookup {
    async fn lookup(&self, _code: &str) -> Result<IdentifierLookupResult, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(IdentifierLookupResult {
            found: true,
            brand: Some(self.brand.to_string()),
            name: Some(self.name.to_string()),
            description: None,
            category: None,
        })
    }
}

/// OCR returning one scripted result (or error) on every call
pub struct ScriptedOcr {
    pub result: Result<OcrResult, SourceError>,
    pub calls: AtomicU32,
}

impl ScriptedOcr {
    pub fn reading(identifier: &str, labels: &[(&str, &str)], confidence: f64) -> Self {
        Self {
            result: Ok(OcrResult {
                identifiers: vec![identifier.to_string()],
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                confidence,
            }),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(error: SourceError) -> Self {
        Self {
            result: Err(error),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl OcrService for ScriptedOcr {
    async fn extract_text(&self, _image_urls: &[String]) -> Result<OcrResult, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// OCR whose confidence creeps up by a negligible amount on every call
pub struct CreepingOcr {
    pub model: &'static str,
    pub base_confidence: f64,
    pub calls: AtomicU32,
}

#[async_trait]
impl OcrService for CreepingOcr {
    async fn extract_text(&self, _image_urls: &[String]) -> Result<OcrResult, SourceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut labels = HashMap::new();
        labels.insert("model".to_string(), self.model.to_string());
        Ok(OcrResult {
            identifiers: Vec::new(),
            labels,
            confidence: self.base_confidence + f64::from(n) * 1e-7,
        })
    }
}

/// Vision model reporting a fixed attribute map
pub struct FixedVision {
    pub attributes: Vec<(&'static str, serde_json::Value, f64)>,
    pub calls: AtomicU32,
}

impl FixedVision {
    pub fn new(attributes: Vec<(&'static str, serde_json::Value, f64)>) -> Self {
        Self {
            attributes,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl VisionService for FixedVision {
    async fn analyze(&self, _image_urls: &[String], _prompt: &str) -> Result<VisionResult, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(VisionResult {
            attributes: self
                .attributes
                .iter()
                .map(|(name, value, confidence)| {
                    (
                        name.to_string(),
                        VisionAttribute {
                            value: value.clone(),
                            confidence: Some(*confidence),
                        },
                    )
                })
                .collect(),
            confidence: 0.5,
        })
    }
}

/// Web search synthesizing a fixed record backed by `hits` results
pub struct FixedWebSearch {
    pub synthesized: Vec<(&'static str, &'static str)>,
    pub hits: usize,
    pub confidence: f64,
    pub queries: Mutex<Vec<WebSearchQuery>>,
}

impl FixedWebSearch {
    pub fn new(synthesized: Vec<(&'static str, &'static str)>, hits: usize, confidence: f64) -> Self {
        Self {
            synthesized,
            hits,
            confidence,
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl WebSearchService for FixedWebSearch {
    async fn research(&self, query: &WebSearchQuery) -> Result<WebSearchResult, SourceError> {
        self.queries.lock().unwrap().push(query.clone());
        Ok(WebSearchResult {
            results: (0..self.hits)
                .map(|i| SearchHit {
                    title: format!("Result {}", i),
                    url: format!("https://shop.example/{}", i),
                    snippet: None,
                })
                .collect(),
            synthesized: self
                .synthesized
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            confidence: self.confidence,
        })
    }
}

// ============================================================================
// Activity
// ============================================================================

/// Activity logger remembering every started operation and run id
#[derive(Default)]
pub struct RecordingActivityLogger {
    pub started: Mutex<Vec<(String, Uuid)>>,
    pub failed: Mutex<Vec<String>>,
}

impl RecordingActivityLogger {
    pub fn run_ids(&self) -> Vec<Uuid> {
        self.started.lock().unwrap().iter().map(|(_, id)| *id).collect()
    }

    pub fn operations(&self) -> Vec<String> {
        self.started.lock().unwrap().iter().map(|(op, _)| op.clone()).collect()
    }
}

impl ActivityLogger for RecordingActivityLogger {
    fn start_operation(&self, _item_id: &str, run_id: Uuid, operation: &str, _message: &str) -> OperationId {
        self.started
            .lock()
            .unwrap()
            .push((operation.to_string(), run_id));
        Uuid::new_v4()
    }

    fn emit_progress(&self, _operation_id: OperationId, _message: &str, _progress: Option<f32>) {}

    fn complete_operation(&self, _operation_id: OperationId, _summary: &str) {}

    fn fail_operation(&self, _operation_id: OperationId, error: &str) {
        self.failed.lock().unwrap().push(error.to_string());
    }
}
