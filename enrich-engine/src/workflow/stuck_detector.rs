//! Stuck detection
//!
//! Hashes the observable field state (name, value, confidence to four
//! decimals) after every evaluation. A run whose hash stops changing for
//! `threshold` consecutive evaluations is stuck, whatever the planner
//! thinks of the remaining tools.

use crate::types::{ItemFieldStates, TaskHistory};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Detects runs that keep executing tasks without changing field state
#[derive(Debug, Clone, Copy)]
pub struct StuckDetector {
    threshold: u32,
}

impl StuckDetector {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Digest of the sorted (field, value, confidence) tuples
    pub fn snapshot_hash(states: &ItemFieldStates) -> String {
        let mut hasher = Sha256::new();
        // BTreeMap iteration is already sorted by field name
        for (name, field) in &states.fields {
            let value = field
                .value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default();
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
            hasher.update(format!("{:.4}", field.confidence.value).as_bytes());
            hasher.update([0xffu8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Record the current snapshot without judging it
    pub fn prime(&self, states: &ItemFieldStates, history: &mut TaskHistory) {
        history.last_snapshot_hash = Some(Self::snapshot_hash(states));
    }

    /// Compare against the previous snapshot and update the history
    ///
    /// Returns true when the snapshot is unchanged and the no-progress
    /// counter has reached the threshold.
    pub fn observe(&self, states: &ItemFieldStates, history: &mut TaskHistory) -> bool {
        let hash = Self::snapshot_hash(states);
        let unchanged = history.last_snapshot_hash.as_deref() == Some(hash.as_str());

        if unchanged {
            history.consecutive_no_progress += 1;
        } else {
            history.consecutive_no_progress = 0;
        }
        history.last_snapshot_hash = Some(hash);

        let stuck = unchanged && history.consecutive_no_progress >= self.threshold;
        debug!(
            unchanged,
            no_progress = history.consecutive_no_progress,
            threshold = self.threshold,
            stuck,
            "Snapshot observed"
        );
        stuck
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ConfidenceLedger;
    use crate::types::{FieldDataSource, FieldDefinition, FieldValue, SourceType};
    use std::collections::HashMap;

    fn states() -> (ConfidenceLedger, ItemFieldStates) {
        let ledger = ConfidenceLedger::new();
        let states = ledger.initialize(
            &[FieldDefinition::known("brand"), FieldDefinition::known("model")],
            &[],
            &HashMap::new(),
            &[],
        );
        (ledger, states)
    }

    #[test]
    fn test_hash_ignores_cost_and_attempts() {
        let (ledger, states) = states();
        let charged = ledger.with_charge(&states, 0.5);
        let mut attempted = charged.clone();
        attempted.fields.get_mut("brand").unwrap().attempts = 4;
        assert_eq!(
            StuckDetector::snapshot_hash(&states),
            StuckDetector::snapshot_hash(&attempted)
        );
    }

    #[test]
    fn test_hash_changes_with_value() {
        let (ledger, states) = states();
        let next = ledger.update_field(
            &states,
            "brand",
            Some(FieldValue::Text("Acme".into())),
            FieldDataSource::new(SourceType::Ocr, 0.5),
            0.7,
        );
        assert_ne!(
            StuckDetector::snapshot_hash(&states),
            StuckDetector::snapshot_hash(&next)
        );
    }

    #[test]
    fn test_stuck_after_threshold_unchanged_observations() {
        let (_, states) = states();
        let detector = StuckDetector::new(3);
        let mut history = TaskHistory::new();
        detector.prime(&states, &mut history);

        assert!(!detector.observe(&states, &mut history));
        assert!(!detector.observe(&states, &mut history));
        assert!(detector.observe(&states, &mut history));
        assert_eq!(history.consecutive_no_progress, 3);
    }

    #[test]
    fn test_progress_resets_counter() {
        let (ledger, states) = states();
        let detector = StuckDetector::new(2);
        let mut history = TaskHistory::new();
        detector.prime(&states, &mut history);
        assert!(!detector.observe(&states, &mut history));

        let next = ledger.set_user_value(&states, "model", FieldValue::Text("X1".into()));
        assert!(!detector.observe(&next, &mut history));
        assert_eq!(history.consecutive_no_progress, 0);
    }

    #[test]
    fn test_unprimed_first_observation_is_progress() {
        let (_, states) = states();
        let detector = StuckDetector::new(1);
        let mut history = TaskHistory::new();
        assert!(!detector.observe(&states, &mut history));
        assert!(detector.observe(&states, &mut history));
    }
}
