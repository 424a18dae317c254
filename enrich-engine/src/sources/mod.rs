//! External Source Contracts
//!
//! Abstract interfaces for the information sources consulted during research.
//! Implementations (HTTP clients, model providers) live outside this crate;
//! the engine only consumes a value + confidence + cost outcome from each.
//!
//! # Sources
//! 1. **IdentifierLookup** - barcode database lookup by UPC/EAN
//! 2. **PriceHistoryService** - marketplace price history (identifier or keyword search)
//! 3. **OcrService** - text and label extraction from item photos
//! 4. **VisionService** - prompt-driven attribute extraction from photos
//! 5. **WebSearchService** - web search with a synthesized best-guess record
//!
//! Each source enforces its own timeouts; the executor retries only at the
//! task boundary, and only for errors reported as retryable.

pub mod cache;

use crate::types::ServiceKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use crate::error::SourceError;
pub use cache::CachedIdentifierLookup;

// ============================================================================
// Identifier Lookup
// ============================================================================

/// Barcode database record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentifierLookupResult {
    pub found: bool,
    pub brand: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
}

impl IdentifierLookupResult {
    pub fn not_found() -> Self {
        Self::default()
    }
}

/// Barcode (UPC/EAN) lookup capability
#[async_trait]
pub trait IdentifierLookup: Send + Sync {
    async fn lookup(&self, code: &str) -> Result<IdentifierLookupResult, SourceError>;
}

// ============================================================================
// Price History
// ============================================================================

/// Price statistics over the service's history window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceStats {
    pub current: Option<f64>,
    pub average: Option<f64>,
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl PriceStats {
    /// Representative price: the average, else the current price
    pub fn representative(&self) -> Option<f64> {
        self.average.or(self.current).filter(|p| p.is_finite() && *p > 0.0)
    }
}

/// Marketplace product record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryProduct {
    pub product_id: String,
    pub title: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub price_stats: PriceStats,
    pub sales_rank: Option<u64>,
}

/// Marketplace price-history capability
#[async_trait]
pub trait PriceHistoryService: Send + Sync {
    /// Whether credentials are present; unconfigured services are never planned
    fn is_configured(&self) -> bool;

    /// Product id for an identifier, if the marketplace knows it
    async fn search_by_identifier(&self, code: &str) -> Result<Option<String>, SourceError>;

    /// Best product id for a keyword query
    async fn search_by_keyword(&self, keywords: &str) -> Result<Option<String>, SourceError>;

    async fn get_product(&self, product_id: &str) -> Result<Option<PriceHistoryProduct>, SourceError>;
}

// ============================================================================
// OCR
// ============================================================================

/// Text extracted from item photos
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    /// Barcode-like digit strings found in the images
    pub identifiers: Vec<String>,
    /// Labelled text (e.g. "model" -> "KX-200")
    pub labels: HashMap<String, String>,
    pub confidence: f64,
}

/// Optical character recognition capability
#[async_trait]
pub trait OcrService: Send + Sync {
    async fn extract_text(&self, image_urls: &[String]) -> Result<OcrResult, SourceError>;
}

// ============================================================================
// Vision
// ============================================================================

/// Single attribute returned by vision analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionAttribute {
    pub value: serde_json::Value,
    /// Per-attribute confidence, when the model reports one
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Structured attribute map from vision analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionResult {
    pub attributes: HashMap<String, VisionAttribute>,
    /// Overall confidence used when an attribute has none
    pub confidence: f64,
}

/// Vision + prompt execution capability
#[async_trait]
pub trait VisionService: Send + Sync {
    async fn analyze(&self, image_urls: &[String], prompt: &str) -> Result<VisionResult, SourceError>;
}

// ============================================================================
// Web Search
// ============================================================================

/// Partial identifiers and wanted fields for a web search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSearchQuery {
    /// Known attributes to search with (e.g. "brand" -> "Acme")
    pub known: HashMap<String, String>,
    pub target_fields: Vec<String>,
}

impl WebSearchQuery {
    /// Query string assembled from known attributes, identifier first
    pub fn query_string(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for key in ["upc", "brand", "model", "title"] {
            if let Some(v) = self.known.get(key) {
                parts.push(v.as_str());
            }
        }
        parts.join(" ")
    }
}

/// Ranked search result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// Search results plus a synthesized best-guess record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSearchResult {
    pub results: Vec<SearchHit>,
    /// Best guess per field name
    pub synthesized: HashMap<String, String>,
    pub confidence: f64,
}

/// Web search + synthesis capability
#[async_trait]
pub trait WebSearchService: Send + Sync {
    async fn research(&self, query: &WebSearchQuery) -> Result<WebSearchResult, SourceError>;
}

// ============================================================================
// Service Bundle
// ============================================================================

/// The set of source collaborators available to a research run
#[derive(Clone, Default)]
pub struct ResearchServices {
    pub identifier_lookup: Option<Arc<dyn IdentifierLookup>>,
    pub price_history: Option<Arc<dyn PriceHistoryService>>,
    pub ocr: Option<Arc<dyn OcrService>>,
    pub vision: Option<Arc<dyn VisionService>>,
    pub web_search: Option<Arc<dyn WebSearchService>>,
}

impl ResearchServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identifier_lookup(mut self, service: Arc<dyn IdentifierLookup>) -> Self {
        self.identifier_lookup = Some(service);
        self
    }

    pub fn with_price_history(mut self, service: Arc<dyn PriceHistoryService>) -> Self {
        self.price_history = Some(service);
        self
    }

    pub fn with_ocr(mut self, service: Arc<dyn OcrService>) -> Self {
        self.ocr = Some(service);
        self
    }

    pub fn with_vision(mut self, service: Arc<dyn VisionService>) -> Self {
        self.vision = Some(service);
        self
    }

    pub fn with_web_search(mut self, service: Arc<dyn WebSearchService>) -> Self {
        self.web_search = Some(service);
        self
    }

    /// Services ready for use
    ///
    /// A price-history service that reports itself unconfigured is omitted.
    pub fn configured(&self) -> Vec<ServiceKind> {
        let mut kinds = Vec::new();
        if self.identifier_lookup.is_some() {
            kinds.push(ServiceKind::IdentifierLookup);
        }
        if self.price_history.as_ref().is_some_and(|p| p.is_configured()) {
            kinds.push(ServiceKind::PriceHistory);
        }
        if self.ocr.is_some() {
            kinds.push(ServiceKind::Ocr);
        }
        if self.vision.is_some() {
            kinds.push(ServiceKind::Vision);
        }
        if self.web_search.is_some() {
            kinds.push(ServiceKind::WebSearch);
        }
        kinds
    }
}

impl fmt::Debug for ResearchServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResearchServices")
            .field("configured", &self.configured())
            .finish()
    }
}
