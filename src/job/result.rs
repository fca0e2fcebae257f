use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::item::{ItemStatus, WorkItem};
use super::range::CellAddress;
use crate::error::ErrorKind;

/// A non-success entry in a run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellIssue {
    pub address: CellAddress,
    pub status: ItemStatus,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
}

/// Aggregate outcome of one job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Total retries performed across all cells.
    pub retries: u32,
    /// Failures and cancellations in row-major address order.
    pub issues: Vec<CellIssue>,
    pub elapsed: Duration,
}

impl RunResult {
    /// Summarizes terminal items. Issue order follows the address, not completion.
    pub fn from_items<'a>(
        job_id: Uuid,
        started_at: DateTime<Utc>,
        items: impl IntoIterator<Item = &'a WorkItem>,
        elapsed: Duration,
    ) -> Self {
        let mut result = Self {
            job_id,
            started_at,
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            retries: 0,
            issues: Vec::new(),
            elapsed,
        };

        for item in items {
            result.retries += item.retries();
            match item.status {
                ItemStatus::Succeeded => {
                    result.succeeded += 1;
                    continue;
                }
                ItemStatus::Failed => result.failed += 1,
                ItemStatus::Cancelled => result.cancelled += 1,
                // Non-terminal items never reach a summary; count them as cancelled
                // so every cell is still accounted for.
                ItemStatus::Pending | ItemStatus::InFlight => result.cancelled += 1,
            }
            let (kind, message) = match &item.failure {
                Some(f) => (f.kind, f.message.clone()),
                None => (ErrorKind::Cancelled, "not completed".to_string()),
            };
            result.issues.push(CellIssue {
                address: item.address,
                status: item.status,
                kind,
                message,
                attempts: item.attempts,
            });
        }

        result.issues.sort_by_key(|issue| issue.address);
        result
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}
