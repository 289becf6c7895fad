//! Fire-and-forget observability events.
//!
//! Listeners subscribe through a tokio broadcast channel; slow or absent
//! listeners never block the worker, and send errors are ignored.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Queue lifecycle notifications emitted by the worker and schedulers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// Number of pending items after a worker run.
    PendingCount {
        /// Items still waiting in the queue.
        count: i64,
    },
    /// An item was delivered.
    Sent {
        /// Schedule item id.
        id: i64,
    },
    /// An item reached terminal failure.
    Failed {
        /// Schedule item id.
        id: i64,
        /// Stored failure description.
        error: String,
    },
    /// An item failed transiently and stays pending.
    RetryPending {
        /// Schedule item id.
        id: i64,
        /// Attempts made so far.
        attempt: i32,
    },
    /// A new batch was accepted into the queue.
    Scheduled {
        /// Correlation id shared by the batch.
        batch_id: String,
        /// Items created.
        count: usize,
    },
}

/// Shared event bus handed to the worker and schedulers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to queue events. Events emitted while no receiver exists
    /// are dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: QueueEvent) {
        // A send error just means nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
