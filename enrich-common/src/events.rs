//! Research activity events
//!
//! Provides the shared event definitions and a broadcast EventBus so that
//! progress of a research run can be observed (UI, chat transport, logs)
//! without the research core knowing who is listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Research activity event
///
/// Events are observational only: emitting never influences control flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResearchEvent {
    /// An operation (run, phase, tool call) started
    OperationStarted {
        operation_id: Uuid,
        item_id: String,
        run_id: Uuid,
        operation: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Progress within a running operation
    OperationProgress {
        operation_id: Uuid,
        message: String,
        /// Fractional progress (0.0-1.0) when known
        progress: Option<f32>,
        timestamp: DateTime<Utc>,
    },

    /// Operation finished normally
    OperationCompleted {
        operation_id: Uuid,
        summary: String,
        timestamp: DateTime<Utc>,
    },

    /// Operation failed
    OperationFailed {
        operation_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ResearchEvent {
    /// Operation this event belongs to
    pub fn operation_id(&self) -> Uuid {
        match self {
            Self::OperationStarted { operation_id, .. }
            | Self::OperationProgress { operation_id, .. }
            | Self::OperationCompleted { operation_id, .. }
            | Self::OperationFailed { operation_id, .. } => *operation_id,
        }
    }
}

/// Broadcast bus for research events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ResearchEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// Old events are dropped for slow subscribers once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ResearchEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, returning the number of subscribers reached
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ResearchEvent,
    ) -> Result<usize, broadcast::error::SendError<ResearchEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ResearchEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
