//! Tool Scorer
//!
//! Owns the two planning decisions of the research loop:
//!
//! 1. **Macro evaluation** (`evaluate_field_states`): continue, complete, or
//!    stop with warnings. Cheap; runs after every task.
//! 2. **Micro planning** (`plan_next_task`, `plan_parallel_tasks`): score the
//!    eligible tools for the most urgent field and build the next task.
//!
//! # Scoring
//! ```text
//! score = base priority
//!       + field specificity bonus (exact field 20, wildcard 5)
//!       + expected confidence × source weight × 20
//!       - cost / max cost × 30
//!       - latency seconds × 2 × mode latency weight
//!       + context bonuses (known identifier 15, several images 5)
//!       - field attempts × 8
//! ```
//! The highest strictly greater score wins; on an exact tie the tool
//! registered first is kept.

use super::registry::{
    FieldCoverage, Prerequisite, ToolMetadata, ToolRegistry, WILDCARD_TARGET_CAP,
};
use crate::ledger::ConfidenceLedger;
use crate::types::{
    FieldState, ItemFieldStates, ResearchConstraints, ResearchContext, ResearchTask, TaskHistory,
    ToolId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Remaining budget at or below this is treated as exhausted
pub const BUDGET_EPSILON: f64 = 1e-4;

const SPECIFIC_FIELD_BONUS: f64 = 20.0;
const WILDCARD_FIELD_BONUS: f64 = 5.0;
const CONFIDENCE_BONUS_SCALE: f64 = 20.0;
const COST_PENALTY_SCALE: f64 = 30.0;
const LATENCY_PENALTY_PER_SECOND: f64 = 2.0;
const IDENTIFIER_CONTEXT_BONUS: f64 = 15.0;
const MULTI_IMAGE_BONUS: f64 = 5.0;
const ATTEMPT_PENALTY: f64 = 8.0;

/// Macro decision for the research loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Continue,
    Complete,
    StopWithWarnings,
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    BudgetExhausted,
    IterationsExhausted,
    RequiredSatisfied,
    NoResearchableFields,
    /// Fields remain but no tool can serve them
    NoViableTool,
    /// Field state stopped changing
    Stuck,
}

/// Details behind an evaluation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub reason: Option<StopReason>,
    pub missing_required: Vec<String>,
    pub low_confidence_required: Vec<String>,
    /// Researchable fields in planning order
    pub researchable: Vec<String>,
    pub spent: f64,
    pub remaining_budget: f64,
    pub iteration: u32,
    pub completion_score: f64,
    pub warnings: Vec<String>,
}

/// Result of `evaluate_field_states`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub decision: Decision,
    pub diagnostics: Diagnostics,
}

impl Evaluation {
    /// Override into a stop, keeping `Complete` when the item is ready
    pub fn into_stop(mut self, reason: StopReason, warning: impl Into<String>) -> Self {
        self.diagnostics.reason = Some(reason);
        self.diagnostics.warnings.push(warning.into());
        let ready = self.diagnostics.missing_required.is_empty()
            && self.diagnostics.low_confidence_required.is_empty();
        self.decision = if ready {
            Decision::Complete
        } else {
            Decision::StopWithWarnings
        };
        self
    }
}

/// Tool scorer and planner
///
/// Holds only the injected, immutable registry; every call is a pure
/// function of its arguments.
#[derive(Debug, Clone)]
pub struct ToolScorer {
    registry: Arc<ToolRegistry>,
}

impl ToolScorer {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Decide whether the loop continues
    ///
    /// Check order: budget, iterations, readiness, researchable fields.
    pub fn evaluate_field_states(
        &self,
        states: &ItemFieldStates,
        constraints: &ResearchConstraints,
        spent: f64,
        iteration: u32,
    ) -> Evaluation {
        let ledger = ConfidenceLedger::from_constraints(constraints);
        let readiness = ledger.check_readiness(states, constraints.required_threshold);
        let researchable = ledger.fields_needing_research(states);
        let remaining_budget = (constraints.max_cost - spent).max(0.0);

        let mut diagnostics = Diagnostics {
            reason: None,
            missing_required: readiness.missing_fields,
            low_confidence_required: readiness.low_confidence_fields,
            researchable,
            spent,
            remaining_budget,
            iteration,
            completion_score: states.metrics.completion_score,
            warnings: Vec::new(),
        };

        let reason = if remaining_budget <= BUDGET_EPSILON {
            Some(StopReason::BudgetExhausted)
        } else if iteration >= constraints.max_iterations {
            Some(StopReason::IterationsExhausted)
        } else if readiness.ready {
            Some(StopReason::RequiredSatisfied)
        } else if diagnostics.researchable.is_empty() {
            Some(StopReason::NoResearchableFields)
        } else {
            None
        };

        let decision = match reason {
            None => Decision::Continue,
            Some(_) if readiness.ready => Decision::Complete,
            Some(reason) => {
                diagnostics.warnings.push(stop_warning(reason));
                for field in &diagnostics.missing_required {
                    diagnostics
                        .warnings
                        .push(format!("Required field '{}' has no value", field));
                }
                for field in &diagnostics.low_confidence_required {
                    diagnostics
                        .warnings
                        .push(format!("Required field '{}' is below the confidence threshold", field));
                }
                Decision::StopWithWarnings
            }
        };
        diagnostics.reason = reason;

        debug!(
            decision = ?decision,
            reason = ?reason,
            spent,
            iteration,
            researchable = diagnostics.researchable.len(),
            "Field states evaluated"
        );

        Evaluation {
            decision,
            diagnostics,
        }
    }

    /// Plan the next single research task
    ///
    /// Returns `None` on any hard stop (iteration cap, stuck, budget) and when
    /// no eligible tool serves the highest-priority researchable field.
    pub fn plan_next_task(
        &self,
        states: &ItemFieldStates,
        constraints: &ResearchConstraints,
        context: &ResearchContext,
        spent: f64,
        iteration: u32,
        history: &TaskHistory,
    ) -> Option<ResearchTask> {
        if iteration >= constraints.max_iterations {
            debug!(iteration, "No task planned: iteration cap reached");
            return None;
        }
        if history.consecutive_no_progress >= constraints.stuck_threshold {
            debug!(
                no_progress = history.consecutive_no_progress,
                "No task planned: no progress"
            );
            return None;
        }
        let remaining = constraints.max_cost - spent;
        if remaining <= BUDGET_EPSILON {
            debug!(spent, "No task planned: budget exhausted");
            return None;
        }

        let ledger = ConfidenceLedger::from_constraints(constraints);
        let researchable = ledger.fields_needing_research(states);
        let field_name = researchable.first()?;
        let field = states.get(field_name)?;

        let mut best: Option<(&ToolMetadata, f64)> = None;
        for tool in self.registry.iter() {
            if !self.is_eligible(tool, field_name, states, context, remaining, history) {
                continue;
            }
            let score = self.score_tool(tool, field, states, constraints, context);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((tool, score));
            }
        }

        let Some((tool, score)) = best else {
            debug!(field = %field_name, "No eligible tool for top field");
            return None;
        };
        let task = build_task(tool, score, field_name, &researchable);
        debug!(
            tool = %tool.id,
            field = %field_name,
            score,
            targets = task.target_fields.len(),
            "Next task planned"
        );
        Some(task)
    }

    /// Plan up to `max_tasks` tasks with distinct tools for one concurrent phase
    ///
    /// Only tools in `allowed` are considered. Each tool is scored against the
    /// most urgent field it can serve; tasks are then taken greedily by score
    /// while they fit the remaining budget.
    pub fn plan_parallel_tasks(
        &self,
        states: &ItemFieldStates,
        constraints: &ResearchConstraints,
        context: &ResearchContext,
        spent: f64,
        history: &TaskHistory,
        max_tasks: usize,
        allowed: &[ToolId],
    ) -> Vec<ResearchTask> {
        let mut remaining = constraints.max_cost - spent;
        if remaining <= BUDGET_EPSILON || max_tasks == 0 {
            return Vec::new();
        }

        let ledger = ConfidenceLedger::from_constraints(constraints);
        let researchable = ledger.fields_needing_research(states);

        let mut candidates: Vec<(&ToolMetadata, f64, &str)> = Vec::new();
        for tool in self.registry.iter().filter(|t| allowed.contains(&t.id)) {
            let field = researchable.iter().find_map(|name| {
                if self.is_eligible(tool, name, states, context, remaining, history) {
                    states.get(name)
                } else {
                    None
                }
            });
            if let Some(field) = field {
                let score = self.score_tool(tool, field, states, constraints, context);
                candidates.push((tool, score, field.name.as_str()));
            }
        }

        // Stable sort keeps registration order on ties
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut tasks = Vec::new();
        for (tool, score, field_name) in candidates {
            if tasks.len() >= max_tasks {
                break;
            }
            if tool.cost > remaining {
                debug!(tool = %tool.id, cost = tool.cost, remaining, "Parallel task over budget");
                continue;
            }
            remaining -= tool.cost;
            tasks.push(build_task(tool, score, field_name, &researchable));
        }

        debug!(planned = tasks.len(), "Parallel tasks planned");
        tasks
    }

    fn is_eligible(
        &self,
        tool: &ToolMetadata,
        field_name: &str,
        states: &ItemFieldStates,
        context: &ResearchContext,
        remaining: f64,
        history: &TaskHistory,
    ) -> bool {
        tool.coverage.covers(field_name)
            && !history.is_failed(tool.id)
            && history.attempts(tool.id) < tool.max_attempts
            && tool.cost <= remaining
            && tool.prerequisites_met(states, context)
    }

    /// Score a tool for one field
    pub fn score_tool(
        &self,
        tool: &ToolMetadata,
        field: &FieldState,
        states: &ItemFieldStates,
        constraints: &ResearchConstraints,
        context: &ResearchContext,
    ) -> f64 {
        let specificity = match tool.coverage {
            FieldCoverage::Specific(_) => SPECIFIC_FIELD_BONUS,
            FieldCoverage::Wildcard => WILDCARD_FIELD_BONUS,
        };
        let confidence_bonus =
            tool.expected_confidence * tool.id.source_type().weight() * CONFIDENCE_BONUS_SCALE;
        let cost_penalty = if constraints.max_cost > 0.0 {
            tool.cost / constraints.max_cost * COST_PENALTY_SCALE
        } else {
            0.0
        };
        let latency_penalty = tool.latency_ms as f64 / 1000.0
            * LATENCY_PENALTY_PER_SECOND
            * constraints.mode.latency_weight();

        let mut context_bonus = 0.0;
        if states.identifier().is_some() && uses_identifier(tool) {
            context_bonus += IDENTIFIER_CONTEXT_BONUS;
        }
        if tool.requires_images() && context.image_urls.len() > 1 {
            context_bonus += MULTI_IMAGE_BONUS;
        }

        let attempt_penalty = field.attempts as f64 * ATTEMPT_PENALTY;

        tool.base_priority + specificity + confidence_bonus - cost_penalty - latency_penalty
            + context_bonus
            - attempt_penalty
    }
}

/// Tool searches by identifier when one is known
fn uses_identifier(tool: &ToolMetadata) -> bool {
    tool.requires_identifier()
        || tool.prerequisites.iter().any(|p| match p {
            Prerequisite::AnyFieldKnown(fields) => fields.iter().any(|f| f == "upc"),
            _ => false,
        })
}

fn build_task(tool: &ToolMetadata, score: f64, top_field: &str, researchable: &[String]) -> ResearchTask {
    let mut target_fields = vec![top_field.to_string()];
    target_fields.extend(
        researchable
            .iter()
            .filter(|f| f.as_str() != top_field && tool.coverage.covers(f))
            .cloned(),
    );
    if tool.coverage.is_wildcard() {
        target_fields.truncate(WILDCARD_TARGET_CAP);
    }

    ResearchTask {
        id: Uuid::new_v4(),
        rationale: format!(
            "{} for '{}' (score {:.1}, {} target field(s))",
            tool.description,
            top_field,
            score,
            target_fields.len()
        ),
        target_fields,
        tool: tool.id,
        priority: score,
        estimated_cost: tool.cost,
        estimated_time_ms: tool.latency_ms,
    }
}

fn stop_warning(reason: StopReason) -> String {
    match reason {
        StopReason::BudgetExhausted => "Budget exhausted before all required fields were satisfied",
        StopReason::IterationsExhausted => "Iteration limit reached before all required fields were satisfied",
        StopReason::RequiredSatisfied => "Required fields satisfied",
        StopReason::NoResearchableFields => "No researchable fields remain but required fields are unmet",
        StopReason::NoViableTool => "No available tool can research the remaining fields",
        StopReason::Stuck => "Research stopped making progress",
    }
    .to_string()
}
