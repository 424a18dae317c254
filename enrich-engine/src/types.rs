//! Core Types for the Research Engine
//!
//! Defines the data model shared by the ledger, planner, executor and loop:
//! - **Field state:** typed values, per-field confidence with provenance
//! - **Sources:** provenance types with fixed trust weights
//! - **Tasks:** planned research tasks, constraints and per-run history
//!
//! All state objects are plain data; `ItemFieldStates` is treated as an
//! immutable snapshot (every ledger operation returns a new instance).

use crate::executor::{
    barcode::BarcodePayload, ocr::OcrPayload, price_history::PriceHistoryPayload,
    vision::VisionPayload, web_search::WebSearchPayload,
};
use chrono::{DateTime, Utc};
use enrich_common::config::{ResearchMode, ResearchSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Field Values
// ============================================================================

/// Declared data type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDataType {
    Text,
    Number,
    Currency,
    Boolean,
    List,
}

/// Typed field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Currency(f64),
    Boolean(bool),
    List(Vec<String>),
}

impl FieldValue {
    /// True for values that carry no information (blank text, empty list)
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::List(items) => items.iter().all(|s| s.trim().is_empty()),
            Self::Number(n) | Self::Currency(n) => !n.is_finite(),
            Self::Boolean(_) => false,
        }
    }

    /// Data type this value satisfies
    pub fn data_type(&self) -> FieldDataType {
        match self {
            Self::Text(_) => FieldDataType::Text,
            Self::Number(_) => FieldDataType::Number,
            Self::Currency(_) => FieldDataType::Currency,
            Self::Boolean(_) => FieldDataType::Boolean,
            Self::List(_) => FieldDataType::List,
        }
    }

    /// Text view of the value, if it is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Coerce a raw source string into a value of the given type
    ///
    /// Returns `None` when the string is blank or cannot be parsed; callers
    /// treat that as a data-quality condition and skip the candidate.
    pub fn coerce(raw: &str, data_type: FieldDataType) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        match data_type {
            FieldDataType::Text => Some(Self::Text(trimmed.to_string())),
            FieldDataType::Number => parse_number(trimmed).map(Self::Number),
            FieldDataType::Currency => {
                let stripped = trimmed
                    .trim_start_matches(|c: char| "$€£¥".contains(c))
                    .trim_end_matches("USD")
                    .trim_start_matches("USD")
                    .trim();
                parse_number(stripped).map(Self::Currency)
            }
            FieldDataType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Some(Self::Boolean(true)),
                "false" | "no" | "n" | "0" => Some(Self::Boolean(false)),
                _ => None,
            },
            FieldDataType::List => {
                let items: Vec<String> = trimmed
                    .split(&[',', ';'][..])
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if items.is_empty() {
                    None
                } else {
                    Some(Self::List(items))
                }
            }
        }
    }

    /// Coerce a structured (JSON) attribute into a value of the given type
    pub fn from_json(value: &serde_json::Value, data_type: FieldDataType) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::Null => None,
            Value::String(s) => Self::coerce(s, data_type),
            Value::Bool(b) => match data_type {
                FieldDataType::Boolean => Some(Self::Boolean(*b)),
                FieldDataType::Text => Some(Self::Text(b.to_string())),
                _ => None,
            },
            Value::Number(n) => {
                let n = n.as_f64()?;
                match data_type {
                    FieldDataType::Number => Some(Self::Number(n)),
                    FieldDataType::Currency => Some(Self::Currency(n)),
                    FieldDataType::Text => Some(Self::Text(n.to_string())),
                    _ => None,
                }
            }
            Value::Array(items) => {
                let items: Vec<String> = items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.trim().to_string()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .filter(|s| !s.is_empty())
                    .collect();
                match data_type {
                    FieldDataType::List if !items.is_empty() => Some(Self::List(items)),
                    FieldDataType::Text if !items.is_empty() => {
                        Some(Self::Text(items.join(", ")))
                    }
                    _ => None,
                }
            }
            Value::Object(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Currency(n) => write!(f, "{:.2}", n),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

// ============================================================================
// Sources and Provenance
// ============================================================================

/// Provenance type of a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    BarcodeLookup,
    PriceHistory,
    Ocr,
    Vision,
    WebSearch,
    UserInput,
    UserHint,
}

impl SourceType {
    /// Fixed trust weight for this provenance type
    ///
    /// Multiplied with a source's self-reported confidence to obtain its
    /// weighted confidence.
    pub fn weight(self) -> f64 {
        match self {
            Self::UserInput => 1.0,
            Self::UserHint => 1.0,
            Self::BarcodeLookup => 0.95,
            Self::PriceHistory => 0.90,
            Self::Ocr => 0.75,
            Self::Vision => 0.70,
            Self::WebSearch => 0.65,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BarcodeLookup => "barcode_lookup",
            Self::PriceHistory => "price_history",
            Self::Ocr => "ocr",
            Self::Vision => "vision",
            Self::WebSearch => "web_search",
            Self::UserInput => "user_input",
            Self::UserHint => "user_hint",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw payload attached to a source, keyed by source type
///
/// Each payload type is owned by its extraction routine; its contents are
/// not inspected anywhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SourcePayload {
    BarcodeLookup(BarcodePayload),
    PriceHistory(PriceHistoryPayload),
    Ocr(OcrPayload),
    Vision(VisionPayload),
    WebSearch(WebSearchPayload),
}

/// A single contribution to a field's value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDataSource {
    pub source_type: SourceType,
    /// Self-reported confidence (0.0-1.0)
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Option<SourcePayload>,
    /// Monetary cost of the call that produced this value
    #[serde(default)]
    pub cost: Option<f64>,
}

impl FieldDataSource {
    /// Create a source with clamped confidence (0.0-1.0)
    pub fn new(source_type: SourceType, confidence: f64) -> Self {
        Self {
            source_type,
            confidence: clamp_unit(confidence),
            timestamp: Utc::now(),
            payload: None,
            cost: None,
        }
    }

    pub fn with_payload(mut self, payload: SourcePayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost.max(0.0));
        self
    }

    /// Self-reported confidence discounted by the provenance weight
    pub fn weighted_confidence(&self) -> f64 {
        self.confidence * self.source_type.weight()
    }
}

/// Clamp to [0, 1], mapping NaN to 0
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ============================================================================
// Field State
// ============================================================================

/// Lifecycle status of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Pending,
    Complete,
    Failed,
    UserRequired,
}

/// Merged confidence with every contributing source
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldConfidence {
    /// Weighted average over all sources (0.0-1.0)
    pub value: f64,
    /// Contributing sources in arrival order; never pruned
    pub sources: Vec<FieldDataSource>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl FieldConfidence {
    /// Highest weighted confidence ever recorded for this field
    pub fn best_weighted(&self) -> f64 {
        self.sources
            .iter()
            .map(FieldDataSource::weighted_confidence)
            .fold(0.0, f64::max)
    }
}

/// Tracked state of a single catalog attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldState {
    pub name: String,
    pub display_name: String,
    pub value: Option<FieldValue>,
    pub confidence: FieldConfidence,
    pub required: bool,
    /// Marketplaces requiring this field
    pub required_by: Vec<String>,
    pub data_type: FieldDataType,
    pub allowed_values: Option<Vec<String>>,
    pub attempts: u32,
    pub status: FieldStatus,
}

impl FieldState {
    /// Fresh, empty field built from its definition
    pub fn from_definition(def: &FieldDefinition, required: bool) -> Self {
        Self {
            name: def.name.clone(),
            display_name: def.display_name.clone(),
            value: None,
            confidence: FieldConfidence::default(),
            required,
            required_by: def.required_by.clone(),
            data_type: def.data_type,
            allowed_values: def.allowed_values.clone(),
            attempts: 0,
            status: FieldStatus::Pending,
        }
    }

    pub fn has_value(&self) -> bool {
        self.value.as_ref().is_some_and(|v| !v.is_empty())
    }

    /// Excluded from automated research
    pub fn is_excluded(&self) -> bool {
        matches!(self.status, FieldStatus::Failed | FieldStatus::UserRequired)
    }
}

/// Static description of a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub display_name: String,
    pub data_type: FieldDataType,
    #[serde(default)]
    pub allowed_values: Option<Vec<String>>,
    #[serde(default)]
    pub required_by: Vec<String>,
}

impl FieldDefinition {
    /// Text field with a title-cased display name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: display_name_for(&name),
            name,
            data_type: FieldDataType::Text,
            allowed_values: None,
            required_by: Vec::new(),
        }
    }

    pub fn with_type(mut self, data_type: FieldDataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Definition for a well-known catalog field, falling back to text
    pub fn known(name: &str) -> Self {
        let def = Self::new(name);
        match name {
            "price" | "msrp" => def.with_type(FieldDataType::Currency),
            "quantity" | "weight" | "sales_rank" => def.with_type(FieldDataType::Number),
            "features" | "keywords" => def.with_type(FieldDataType::List),
            "condition" => def.with_allowed_values(["new", "like_new", "good", "fair", "poor"]),
            "upc" => {
                let mut def = def;
                def.display_name = "UPC".to_string();
                def
            }
            _ => def,
        }
    }
}

fn display_name_for(name: &str) -> String {
    name.split(&['_', '-'][..])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Aggregate completion metrics for an item
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldMetrics {
    pub required_total: usize,
    pub required_complete: usize,
    pub recommended_total: usize,
    pub recommended_complete: usize,
    /// 0.7 × required ratio + 0.3 × recommended ratio
    pub completion_score: f64,
    pub ready: bool,
    pub total_cost: f64,
    pub iteration: u32,
}

/// All field states for one item plus aggregate metrics
///
/// Immutable by convention: ledger operations return new instances.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemFieldStates {
    pub fields: BTreeMap<String, FieldState>,
    pub metrics: FieldMetrics,
}

impl ItemFieldStates {
    pub fn get(&self, name: &str) -> Option<&FieldState> {
        self.fields.get(name)
    }

    /// Non-empty value of a field, if any
    pub fn value_of(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .get(name)
            .and_then(|f| f.value.as_ref())
            .filter(|v| !v.is_empty())
    }

    /// Text value of a field, if any
    pub fn text_of(&self, name: &str) -> Option<String> {
        self.value_of(name).map(|v| v.to_string())
    }

    /// Known product identifier (UPC/EAN), if any
    pub fn identifier(&self) -> Option<String> {
        self.text_of("upc")
    }
}

/// Candidate field update produced by the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub field_name: String,
    pub value: FieldValue,
    pub source: FieldDataSource,
}

// ============================================================================
// Tools, Tasks and Constraints
// ============================================================================

/// Closed set of research tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    UpcLookup,
    PriceHistoryIdentifier,
    PriceHistoryKeyword,
    Ocr,
    Vision,
    WebSearch,
}

impl ToolId {
    pub const COUNT: usize = 6;

    pub const ALL: [ToolId; Self::COUNT] = [
        ToolId::UpcLookup,
        ToolId::PriceHistoryIdentifier,
        ToolId::PriceHistoryKeyword,
        ToolId::Ocr,
        ToolId::Vision,
        ToolId::WebSearch,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpcLookup => "upc_lookup",
            Self::PriceHistoryIdentifier => "price_history_identifier",
            Self::PriceHistoryKeyword => "price_history_keyword",
            Self::Ocr => "ocr",
            Self::Vision => "vision",
            Self::WebSearch => "web_search",
        }
    }

    /// Provenance recorded for values this tool produces
    pub fn source_type(self) -> SourceType {
        match self {
            Self::UpcLookup => SourceType::BarcodeLookup,
            Self::PriceHistoryIdentifier | Self::PriceHistoryKeyword => SourceType::PriceHistory,
            Self::Ocr => SourceType::Ocr,
            Self::Vision => SourceType::Vision,
            Self::WebSearch => SourceType::WebSearch,
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External backing services a tool may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    IdentifierLookup,
    PriceHistory,
    Ocr,
    Vision,
    WebSearch,
}

/// A planned unit of research
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchTask {
    pub id: Uuid,
    /// Fields this task targets, highest priority first
    pub target_fields: Vec<String>,
    pub tool: ToolId,
    pub priority: f64,
    pub estimated_cost: f64,
    pub estimated_time_ms: u64,
    pub rationale: String,
}

/// Budget and quality limits for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchConstraints {
    pub mode: ResearchMode,
    pub max_cost: f64,
    pub max_iterations: u32,
    pub required_threshold: f64,
    pub recommended_threshold: f64,
    /// Consecutive no-progress evaluations tolerated before stopping
    pub stuck_threshold: u32,
}

impl ResearchConstraints {
    /// Mode presets with default thresholds
    pub fn for_mode(mode: ResearchMode) -> Self {
        Self {
            mode,
            max_cost: mode.default_max_cost(),
            max_iterations: mode.default_max_iterations(),
            required_threshold: 0.70,
            recommended_threshold: 0.50,
            stuck_threshold: 3,
        }
    }

    /// Constraints from the `[research]` configuration table
    pub fn from_settings(settings: &ResearchSettings) -> Self {
        let mode = settings.mode;
        Self {
            mode,
            max_cost: settings.max_cost.unwrap_or_else(|| mode.default_max_cost()),
            max_iterations: settings
                .max_iterations
                .unwrap_or_else(|| mode.default_max_iterations()),
            required_threshold: clamp_unit(settings.required_threshold),
            recommended_threshold: clamp_unit(settings.recommended_threshold),
            stuck_threshold: settings.stuck_threshold,
        }
    }

    /// Confidence threshold for a field's class
    pub fn threshold_for(&self, field: &FieldState) -> f64 {
        if field.required {
            self.required_threshold
        } else {
            self.recommended_threshold
        }
    }
}

impl Default for ResearchConstraints {
    fn default() -> Self {
        Self::for_mode(ResearchMode::default())
    }
}

/// Per-run tool history
///
/// Attempt counters live in a fixed-size table indexed by `ToolId`; a new
/// history is created for every run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskHistory {
    tool_attempts: [u32; ToolId::COUNT],
    /// Tools that produced no usable result this run
    pub failed_tools: Vec<ToolId>,
    pub consecutive_no_progress: u32,
    pub last_snapshot_hash: Option<String>,
}

impl TaskHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self, tool: ToolId) -> u32 {
        self.tool_attempts[tool.index()]
    }

    pub fn record_attempt(&mut self, tool: ToolId) {
        self.tool_attempts[tool.index()] += 1;
    }

    pub fn mark_failed(&mut self, tool: ToolId) {
        if !self.failed_tools.contains(&tool) {
            self.failed_tools.push(tool);
        }
    }

    pub fn is_failed(&self, tool: ToolId) -> bool {
        self.failed_tools.contains(&tool)
    }
}

// ============================================================================
// Research Context
// ============================================================================

/// Per-run inputs the planner and executor need besides field state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchContext {
    pub item_id: String,
    pub run_id: Uuid,
    pub image_urls: Vec<String>,
    /// Backing services available for this run
    pub services: Vec<ServiceKind>,
}

impl ResearchContext {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            run_id: Uuid::new_v4(),
            image_urls: Vec::new(),
            services: Vec::new(),
        }
    }

    pub fn with_images<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.image_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_images(&self) -> bool {
        !self.image_urls.is_empty()
    }

    pub fn is_configured(&self, service: ServiceKind) -> bool {
        self.services.contains(&service)
    }
}
