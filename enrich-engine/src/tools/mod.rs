//! Tool Registry & Scorer
//!
//! - **registry** - immutable metadata for each research tool
//! - **scorer** - continue/stop evaluation and next-task selection

pub mod registry;
pub mod scorer;

pub use registry::{FieldCoverage, Prerequisite, ToolMetadata, ToolRegistry, WILDCARD_TARGET_CAP};
pub use scorer::{Decision, Diagnostics, Evaluation, StopReason, ToolScorer, BUDGET_EPSILON};
