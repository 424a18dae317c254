//! Confidence Ledger
//!
//! Durable per-field confidence state and the merge function of record.
//!
//! # Merge Rules
//! Every candidate accepted by `update_field`:
//! 1. Is appended to the field's source list (sources are never dropped)
//! 2. Triggers recomputation of the merged confidence as the weighted average
//!    over *all* sources ever attached, weight = provenance trust constant
//! 3. Replaces the displayed value only when the field is empty, or when the
//!    new source's weighted confidence exceeds the best weighted confidence
//!    already recorded by more than the replacement margin (10%)
//!
//! The value gate and the merged average are computed independently and can
//! diverge: the merged confidence may rise while the value stays put.
//!
//! # Failure Semantics
//! Ledger operations never fail. Unknown fields and empty candidates are
//! logged and ignored so that a bad update can never abort a research run.

use crate::types::{
    clamp_unit, FieldConfidence, FieldDataSource, FieldDataType, FieldDefinition, FieldMetrics,
    FieldState, FieldStatus, FieldValue, ItemFieldStates, ResearchConstraints, SourceType,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Weighted confidence assigned to pre-existing catalog values
pub const SEED_CONFIDENCE: f64 = 0.85;

/// Default completion threshold for `update_field`
pub const DEFAULT_THRESHOLD: f64 = 0.70;

/// Required improvement factor before a stored value is replaced
pub const REPLACEMENT_MARGIN: f64 = 1.10;

/// Minimum similarity for snapping a candidate onto an allowed value
const ALLOWED_VALUE_SIMILARITY: f64 = 0.85;

/// Share of the completion score contributed by required fields
const REQUIRED_SCORE_WEIGHT: f64 = 0.7;

/// Readiness report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    /// Required fields without a value
    pub missing_fields: Vec<String>,
    /// Required fields with a value below the threshold
    pub low_confidence_fields: Vec<String>,
}

/// Confidence Ledger
///
/// Stateless apart from its thresholds; all state lives in the
/// `ItemFieldStates` snapshots it produces.
#[derive(Debug, Clone)]
pub struct ConfidenceLedger {
    required_threshold: f64,
    recommended_threshold: f64,
}

impl Default for ConfidenceLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfidenceLedger {
    /// Ledger with default thresholds (required 0.70, recommended 0.50)
    pub fn new() -> Self {
        Self {
            required_threshold: DEFAULT_THRESHOLD,
            recommended_threshold: 0.50,
        }
    }

    /// Ledger using the thresholds of a run's constraints
    pub fn from_constraints(constraints: &ResearchConstraints) -> Self {
        Self {
            required_threshold: clamp_unit(constraints.required_threshold),
            recommended_threshold: clamp_unit(constraints.recommended_threshold),
        }
    }

    pub fn required_threshold(&self) -> f64 {
        self.required_threshold
    }

    /// Threshold for a field's class (required or recommended)
    pub fn threshold_for(&self, field: &FieldState) -> f64 {
        if field.required {
            self.required_threshold
        } else {
            self.recommended_threshold
        }
    }

    /// Build the initial field states for an item
    ///
    /// Required fields get `required = true` and inherit the target
    /// marketplaces. Existing catalog values are recorded as a `user_hint`
    /// source at `SEED_CONFIDENCE` and marked complete.
    pub fn initialize(
        &self,
        required_fields: &[FieldDefinition],
        recommended_fields: &[FieldDefinition],
        seed_data: &HashMap<String, FieldValue>,
        target_marketplaces: &[String],
    ) -> ItemFieldStates {
        let mut fields = BTreeMap::new();

        for def in recommended_fields {
            fields.insert(def.name.clone(), FieldState::from_definition(def, false));
        }
        // Required wins when a field is listed in both classes
        for def in required_fields {
            let mut state = FieldState::from_definition(def, true);
            if state.required_by.is_empty() {
                state.required_by = target_marketplaces.to_vec();
            }
            fields.insert(def.name.clone(), state);
        }

        let now = Utc::now();
        for (name, value) in seed_data {
            let Some(field) = fields.get_mut(name) else {
                debug!(field = %name, "Seed value for untracked field ignored");
                continue;
            };
            if value.is_empty() {
                continue;
            }

            let mut source = FieldDataSource::new(SourceType::UserHint, SEED_CONFIDENCE);
            source.timestamp = now;
            field.value = Some(value.clone());
            field.confidence = FieldConfidence {
                value: SEED_CONFIDENCE,
                sources: vec![source],
                last_updated: Some(now),
            };
            field.status = FieldStatus::Complete;
        }

        let mut states = ItemFieldStates {
            fields,
            metrics: FieldMetrics::default(),
        };
        states.metrics = self.compute_metrics(&states, 0.0, 0);

        debug!(
            required = states.metrics.required_total,
            recommended = states.metrics.recommended_total,
            seeded = seed_data.len(),
            "Field states initialized"
        );

        states
    }

    /// Merge a candidate value into a field
    ///
    /// Returns a new snapshot; the input is never modified. No-op (returns an
    /// identical copy) for unknown fields and null or empty candidates.
    pub fn update_field(
        &self,
        states: &ItemFieldStates,
        field_name: &str,
        candidate: Option<FieldValue>,
        source: FieldDataSource,
        threshold: f64,
    ) -> ItemFieldStates {
        let Some(field) = states.fields.get(field_name) else {
            warn!(
                field = field_name,
                source = %source.source_type,
                "Update for unknown field ignored"
            );
            return states.clone();
        };

        let Some(candidate) = candidate.filter(|v| !v.is_empty()) else {
            debug!(field = field_name, "Empty candidate skipped");
            return states.clone();
        };

        let Some(candidate) = conform_value(field, candidate) else {
            debug!(
                field = field_name,
                data_type = ?field.data_type,
                "Candidate does not fit field type or allowed values, skipped"
            );
            return states.clone();
        };

        let mut next = states.clone();
        let Some(field) = next.fields.get_mut(field_name) else {
            return next;
        };

        let best_existing = field.confidence.best_weighted();
        let new_weighted = source.weighted_confidence();
        let replace = !field.has_value() || new_weighted > best_existing * REPLACEMENT_MARGIN;

        let cost = source.cost.unwrap_or(0.0);
        let source_type = source.source_type;
        field.confidence.sources.push(source);
        field.confidence.value = merge_confidence(&field.confidence.sources);
        field.confidence.last_updated = Some(Utc::now());

        if replace {
            field.value = Some(candidate);
        }

        field.status = if field.confidence.value >= threshold {
            FieldStatus::Complete
        } else if field.is_excluded() {
            field.status
        } else {
            FieldStatus::Pending
        };
        field.attempts += 1;

        debug!(
            field = field_name,
            source = %source_type,
            new_weighted,
            best_existing,
            replaced = replace,
            merged = field.confidence.value,
            status = ?field.status,
            "Field updated"
        );

        let total_cost = states.metrics.total_cost + cost;
        let iteration = states.metrics.iteration;
        next.metrics = self.compute_metrics(&next, total_cost, iteration);
        next
    }

    /// Readiness against a confidence threshold
    ///
    /// Ready iff every required field has a non-empty value with confidence
    /// at or above `threshold`.
    pub fn check_readiness(&self, states: &ItemFieldStates, threshold: f64) -> Readiness {
        let mut missing_fields = Vec::new();
        let mut low_confidence_fields = Vec::new();

        for field in states.fields.values().filter(|f| f.required) {
            if !field.has_value() {
                missing_fields.push(field.name.clone());
            } else if field.confidence.value < threshold {
                low_confidence_fields.push(field.name.clone());
            }
        }

        Readiness {
            ready: missing_fields.is_empty() && low_confidence_fields.is_empty(),
            missing_fields,
            low_confidence_fields,
        }
    }

    /// Fields still worth researching, in planning order
    ///
    /// A field qualifies when it is empty or below its class threshold and
    /// is neither failed nor user-required. Ordered required-first, then
    /// lowest confidence, then fewest attempts.
    pub fn fields_needing_research(&self, states: &ItemFieldStates) -> Vec<String> {
        let mut candidates: Vec<&FieldState> = states
            .fields
            .values()
            .filter(|f| !f.is_excluded())
            .filter(|f| !f.has_value() || f.confidence.value < self.threshold_for(f))
            .collect();

        candidates.sort_by(|a, b| {
            b.required
                .cmp(&a.required)
                .then_with(|| a.confidence.value.total_cmp(&b.confidence.value))
                .then_with(|| a.attempts.cmp(&b.attempts))
        });

        candidates.into_iter().map(|f| f.name.clone()).collect()
    }

    /// Remove a field from automated research
    pub fn mark_as_user_required(&self, states: &ItemFieldStates, field_name: &str) -> ItemFieldStates {
        self.set_status(states, field_name, FieldStatus::UserRequired)
    }

    /// Give up on a field for the rest of the run
    pub fn mark_as_failed(&self, states: &ItemFieldStates, field_name: &str) -> ItemFieldStates {
        self.set_status(states, field_name, FieldStatus::Failed)
    }

    /// Inject a user-provided value
    ///
    /// User input is authoritative: the value always replaces, the field is
    /// complete, and earlier sources stay attached for provenance.
    pub fn set_user_value(
        &self,
        states: &ItemFieldStates,
        field_name: &str,
        value: FieldValue,
    ) -> ItemFieldStates {
        if value.is_empty() {
            debug!(field = field_name, "Empty user value skipped");
            return states.clone();
        }

        let mut next = states.clone();
        let Some(field) = next.fields.get_mut(field_name) else {
            warn!(field = field_name, "User value for unknown field ignored");
            return next;
        };

        field
            .confidence
            .sources
            .push(FieldDataSource::new(SourceType::UserInput, 1.0));
        field.confidence.value = merge_confidence(&field.confidence.sources);
        field.confidence.last_updated = Some(Utc::now());
        field.value = Some(value);
        field.status = FieldStatus::Complete;

        next.metrics = self.compute_metrics(&next, states.metrics.total_cost, states.metrics.iteration);
        next
    }

    /// Copy of the snapshot with the iteration counter set
    pub fn with_iteration(&self, states: &ItemFieldStates, iteration: u32) -> ItemFieldStates {
        let mut next = states.clone();
        next.metrics.iteration = iteration;
        next
    }

    /// Copy of the snapshot with an extra cost charged
    ///
    /// Used for failed tasks, which cost money without producing a source.
    pub fn with_charge(&self, states: &ItemFieldStates, cost: f64) -> ItemFieldStates {
        let mut next = states.clone();
        next.metrics.total_cost += cost.max(0.0);
        next
    }

    fn set_status(
        &self,
        states: &ItemFieldStates,
        field_name: &str,
        status: FieldStatus,
    ) -> ItemFieldStates {
        let mut next = states.clone();
        match next.fields.get_mut(field_name) {
            Some(field) => {
                field.status = status;
                next.metrics =
                    self.compute_metrics(&next, states.metrics.total_cost, states.metrics.iteration);
            }
            None => warn!(field = field_name, status = ?status, "Status change for unknown field ignored"),
        }
        next
    }

    /// Recompute aggregate metrics
    pub fn compute_metrics(&self, states: &ItemFieldStates, total_cost: f64, iteration: u32) -> FieldMetrics {
        let mut metrics = FieldMetrics {
            total_cost,
            iteration,
            ..Default::default()
        };

        for field in states.fields.values() {
            let complete = field.has_value() && field.confidence.value >= self.threshold_for(field);
            if field.required {
                metrics.required_total += 1;
                metrics.required_complete += usize::from(complete);
            } else {
                metrics.recommended_total += 1;
                metrics.recommended_complete += usize::from(complete);
            }
        }

        let ratio = |done: usize, total: usize| {
            if total == 0 {
                1.0
            } else {
                done as f64 / total as f64
            }
        };
        metrics.completion_score = REQUIRED_SCORE_WEIGHT
            * ratio(metrics.required_complete, metrics.required_total)
            + (1.0 - REQUIRED_SCORE_WEIGHT)
                * ratio(metrics.recommended_complete, metrics.recommended_total);
        metrics.ready = self.check_readiness(states, self.required_threshold).ready;
        metrics
    }
}

/// Weighted running average over every source of a field
///
/// Each source contributes its self-reported confidence weighted by its
/// provenance trust constant. A user-input source pins the result to 1.0.
/// Returns 0.0 for an empty source list.
pub fn merge_confidence(sources: &[FieldDataSource]) -> f64 {
    if sources
        .iter()
        .any(|s| s.source_type == SourceType::UserInput)
    {
        return 1.0;
    }

    let (weighted_sum, weight_sum) = sources.iter().fold((0.0, 0.0), |(ws, w), s| {
        let weight = s.source_type.weight();
        (ws + s.confidence * weight, w + weight)
    });

    if weight_sum <= 0.0 {
        0.0
    } else {
        clamp_unit(weighted_sum / weight_sum)
    }
}

/// Fit a candidate to the field's declared type and allowed values
fn conform_value(field: &FieldState, candidate: FieldValue) -> Option<FieldValue> {
    let candidate = if candidate.data_type() == field.data_type {
        candidate
    } else {
        FieldValue::coerce(&candidate.to_string(), field.data_type)?
    };

    let Some(allowed) = field.allowed_values.as_ref() else {
        return Some(candidate);
    };
    if field.data_type != FieldDataType::Text {
        return Some(candidate);
    }
    let text = candidate.as_text()?;
    snap_to_allowed(text, allowed).map(FieldValue::Text)
}

/// Match text to one of the allowed values
///
/// Case-insensitive exact match first (spaces and hyphens count as
/// underscores), then the closest allowed value by normalized Levenshtein
/// similarity if it clears the threshold.
pub(crate) fn snap_to_allowed(text: &str, allowed: &[String]) -> Option<String> {
    let normalize = |s: &str| s.trim().to_lowercase().replace(&[' ', '-'][..], "_");
    let needle = normalize(text);

    if let Some(exact) = allowed.iter().find(|a| normalize(a) == needle) {
        return Some(exact.clone());
    }

    allowed
        .iter()
        .map(|a| (a, strsim::normalized_levenshtein(&normalize(a), &needle)))
        .filter(|(_, score)| *score >= ALLOWED_VALUE_SIMILARITY)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(a, _)| a.clone())
}
