//! Activity logging
//!
//! Human-facing progress reporting for research runs. The loop reports
//! operations (the run, each phase, each tool call) through an
//! `ActivityLogger`; implementations decide where the messages go.
//!
//! Logging is observational only. A logger can never change control flow,
//! so every method is infallible and delivery failures are swallowed.

use chrono::Utc;
use enrich_common::events::{EventBus, ResearchEvent};
use tracing::{info, warn};
use uuid::Uuid;

/// Identifier of a logged operation
pub type OperationId = Uuid;

/// Sink for research progress messages
pub trait ActivityLogger: Send + Sync {
    /// Begin an operation and return its id
    fn start_operation(&self, item_id: &str, run_id: Uuid, operation: &str, message: &str) -> OperationId;

    fn emit_progress(&self, operation_id: OperationId, message: &str, progress: Option<f32>);

    fn complete_operation(&self, operation_id: OperationId, summary: &str);

    fn fail_operation(&self, operation_id: OperationId, error: &str);
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopActivityLogger;

impl ActivityLogger for NoopActivityLogger {
    fn start_operation(&self, _item_id: &str, _run_id: Uuid, _operation: &str, _message: &str) -> OperationId {
        Uuid::new_v4()
    }

    fn emit_progress(&self, _operation_id: OperationId, _message: &str, _progress: Option<f32>) {}

    fn complete_operation(&self, _operation_id: OperationId, _summary: &str) {}

    fn fail_operation(&self, _operation_id: OperationId, _error: &str) {}
}

/// Writes activity to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingActivityLogger;

impl ActivityLogger for TracingActivityLogger {
    fn start_operation(&self, item_id: &str, run_id: Uuid, operation: &str, message: &str) -> OperationId {
        let operation_id = Uuid::new_v4();
        info!(%operation_id, item_id, %run_id, operation, "{}", message);
        operation_id
    }

    fn emit_progress(&self, operation_id: OperationId, message: &str, progress: Option<f32>) {
        info!(%operation_id, ?progress, "{}", message);
    }

    fn complete_operation(&self, operation_id: OperationId, summary: &str) {
        info!(%operation_id, "Completed: {}", summary);
    }

    fn fail_operation(&self, operation_id: OperationId, error: &str) {
        warn!(%operation_id, "Failed: {}", error);
    }
}

/// Publishes activity as `ResearchEvent`s on an `EventBus`
#[derive(Debug, Clone)]
pub struct EventBusActivityLogger {
    bus: EventBus,
}

impl EventBusActivityLogger {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl ActivityLogger for EventBusActivityLogger {
    fn start_operation(&self, item_id: &str, run_id: Uuid, operation: &str, message: &str) -> OperationId {
        let operation_id = Uuid::new_v4();
        self.bus.emit_lossy(ResearchEvent::OperationStarted {
            operation_id,
            item_id: item_id.to_string(),
            run_id,
            operation: operation.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        operation_id
    }

    fn emit_progress(&self, operation_id: OperationId, message: &str, progress: Option<f32>) {
        self.bus.emit_lossy(ResearchEvent::OperationProgress {
            operation_id,
            message: message.to_string(),
            progress,
            timestamp: Utc::now(),
        });
    }

    fn complete_operation(&self, operation_id: OperationId, summary: &str) {
        self.bus.emit_lossy(ResearchEvent::OperationCompleted {
            operation_id,
            summary: summary.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn fail_operation(&self, operation_id: OperationId, error: &str) {
        self.bus.emit_lossy(ResearchEvent::OperationFailed {
            operation_id,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}
