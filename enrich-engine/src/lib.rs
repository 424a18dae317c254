//! enrich-engine library
//!
//! Adaptive, budget-constrained enrichment of catalog items. A research run
//! consults barcode, price-history, OCR, vision and web-search sources,
//! merges what they return into per-field confidence state and stops on
//! readiness, budget, iteration cap or lack of progress.
//!
//! # Modules
//! - **ledger** - per-field confidence state and the merge function
//! - **tools** - tool registry, scoring and stop decisions
//! - **executor** - task dispatch and result normalization
//! - **workflow** - loop driver and stuck detection
//! - **salvage** - recovery of partial results after abnormal termination
//! - **sources** / **store** / **activity** - collaborator contracts

pub mod activity;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod salvage;
pub mod sources;
pub mod store;
pub mod tools;
pub mod types;
pub mod workflow;

pub use crate::error::{ResearchError, Result, SourceError};
pub use crate::ledger::ConfidenceLedger;
pub use crate::salvage::{SalvageKind, SalvageOutcome, SalvageRecovery};
pub use crate::tools::{Decision, StopReason, ToolRegistry, ToolScorer};
pub use crate::workflow::{ResearchLoop, ResearchOutcome, ResearchRequest};
