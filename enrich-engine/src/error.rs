//! Error types for the research engine
//!
//! Two tiers:
//! - `SourceError` for individual source calls; classified as retryable or
//!   not, and converted into a failed `TaskResult` by the executor
//! - `ResearchError` for failures that abort an operation (missing service
//!   configuration, step limit, persistence, salvage with nothing to recover)
//!
//! Ledger operations never fail and have no error type.

use thiserror::Error;
use uuid::Uuid;

/// Research engine result type
pub type Result<T> = std::result::Result<T, ResearchError>;

/// Errors that abort a research operation
#[derive(Debug, Error)]
pub enum ResearchError {
    /// A planned tool's backing service is not configured
    #[error("Configuration error: {0}")]
    Config(String),

    /// No persisted state exists for a salvage attempt
    #[error("Nothing to salvage for item {item_id} (run {run_id})")]
    NothingToSalvage { item_id: String, run_id: Uuid },

    /// Graph walk exceeded its hard step limit
    #[error("Research for item {item_id} (run {run_id}) exceeded the step limit ({steps} steps)")]
    StepLimitExceeded {
        item_id: String,
        run_id: Uuid,
        steps: u32,
    },

    /// Persistence failure
    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),

    /// enrich-common error
    #[error("Common error: {0}")]
    Common(#[from] enrich_common::Error),
}

/// Source call error
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    /// Rate limit hit (retryable)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Transient network failure (retryable)
    #[error("Network error: {0}")]
    Network(String),

    /// Call exceeded its deadline (retryable)
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// External API rejected the request
    #[error("API error: {0}")]
    Api(String),

    /// Response could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// Input the tool needs is not available
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Backing service is not configured
    #[error("Service not configured: {0}")]
    NotConfigured(String),
}

impl SourceError {
    /// Whether a retry may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Network(_) | Self::Timeout(_)
        )
    }
}
