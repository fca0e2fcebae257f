use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::range::CellAddress;
use crate::error::ErrorKind;
use crate::template::RowCell;

/// Tracks the lifecycle of one cell's transformation.
///
/// `Pending → InFlight → {Succeeded, Failed, Cancelled}`; a retried item
/// goes back to `Pending` until its next dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
    Cancelled,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemStatus::Succeeded | ItemStatus::Failed | ItemStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "PENDING"),
            ItemStatus::InFlight => write!(f, "IN_FLIGHT"),
            ItemStatus::Succeeded => write!(f, "SUCCEEDED"),
            ItemStatus::Failed => write!(f, "FAILED"),
            ItemStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Why an item did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

/// One cell's unit of work. Owned by exactly one task at a time.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Position in the job's row-major order.
    pub index: usize,
    pub address: CellAddress,
    pub source: String,
    pub header: Option<String>,
    /// The rest of the cell's row, read at submission.
    pub row_cells: Vec<RowCell>,
    /// Rendered on first dispatch and reused by retries.
    pub prompt: Option<String>,
    pub attempts: u32,
    pub status: ItemStatus,
    pub output: Option<String>,
    pub failure: Option<Failure>,
    /// Backoff delays waited before each retry, in order.
    pub backoffs: Vec<Duration>,
}

impl WorkItem {
    pub fn new(index: usize, address: CellAddress, source: String, header: Option<String>) -> Self {
        Self {
            index,
            address,
            source,
            header,
            row_cells: Vec::new(),
            prompt: None,
            attempts: 0,
            status: ItemStatus::Pending,
            output: None,
            failure: None,
            backoffs: Vec::new(),
        }
    }

    pub fn with_row_cells(mut self, row_cells: Vec<RowCell>) -> Self {
        self.row_cells = row_cells;
        self
    }

    pub fn dispatch(&mut self) {
        debug_assert_eq!(self.status, ItemStatus::Pending);
        self.status = ItemStatus::InFlight;
        self.attempts += 1;
    }

    pub fn succeed(&mut self, output: String) {
        self.status = ItemStatus::Succeeded;
        self.output = Some(output);
        self.failure = None;
    }

    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.status = ItemStatus::Failed;
        self.failure = Some(Failure {
            kind,
            message: message.into(),
        });
    }

    pub fn cancel(&mut self, message: impl Into<String>) {
        self.status = ItemStatus::Cancelled;
        self.failure = Some(Failure {
            kind: ErrorKind::Cancelled,
            message: message.into(),
        });
    }

    /// Returns the item to the queue after a retryable failure.
    pub fn requeue(&mut self, delay: Duration) {
        self.status = ItemStatus::Pending;
        self.backoffs.push(delay);
    }

    /// Number of retries performed so far.
    pub fn retries(&self) -> u32 {
        self.backoffs.len() as u32
    }
}
