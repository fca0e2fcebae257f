//! Progress events emitted while a job runs.
//!
//! The scheduler emits to an [`EventBus`]; callers [`subscribe`](EventBus::subscribe)
//! and render progress however they like. Built on [`tokio::sync::broadcast`]
//! so several listeners can follow the same run.

use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::job::{CellAddress, ItemStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    JobStarted {
        job_id: Uuid,
        total: usize,
        workers: usize,
    },
    /// A retryable failure put the cell back in the queue.
    ItemRetrying {
        address: CellAddress,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// A cell reached a terminal status.
    ItemFinished {
        address: CellAddress,
        status: ItemStatus,
        completed: usize,
        total: usize,
    },
    JobFinished {
        job_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit to all current subscribers. Returns how many will see it.
    pub fn emit(&self, event: ProgressEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Receives future events only; nothing is replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
