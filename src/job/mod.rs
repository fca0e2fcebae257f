//! Jobs: a frozen (range, template, backend) triple and its work items.

mod item;
mod range;
mod result;
mod scheduler;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use item::{Failure, ItemStatus, WorkItem};
pub use range::{CellAddress, CellRange};
pub(crate) use range::parse_column;
pub use result::{CellIssue, RunResult};
pub use scheduler::Scheduler;

use crate::backend::{BackendDescriptor, GenerationParams};
use crate::retry::RetryPolicy;
use crate::template::Template;

pub const DEFAULT_PER_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a caller supplies to submit a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub range: CellRange,
    pub template: String,
    pub backend: BackendDescriptor,
    /// Requested worker count; the effective count may be lower.
    pub concurrency: usize,
    /// Values for extra template variables.
    pub variables: BTreeMap<String, String>,
    pub params: GenerationParams,
    pub retry: RetryPolicy,
    pub per_call_timeout: Duration,
}

impl JobSpec {
    pub fn new(range: CellRange, template: impl Into<String>, backend: BackendDescriptor) -> Self {
        Self {
            range,
            template: template.into(),
            concurrency: backend.max_concurrency,
            backend,
            variables: BTreeMap::new(),
            params: GenerationParams::default(),
            retry: RetryPolicy::default(),
            per_call_timeout: DEFAULT_PER_CALL_TIMEOUT,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = timeout;
        self
    }
}

/// A submitted job. Its inputs cannot change once created.
#[derive(Debug)]
pub struct Job {
    id: Uuid,
    submitted_at: DateTime<Utc>,
    range: CellRange,
    template: Template,
    backend: BackendDescriptor,
    concurrency: usize,
    variables: BTreeMap<String, String>,
    params: GenerationParams,
    retry: RetryPolicy,
    per_call_timeout: Duration,
    items: Vec<WorkItem>,
}

impl Job {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn range(&self) -> CellRange {
        self.range
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn backend(&self) -> &BackendDescriptor {
        &self.backend
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Work items in row-major submission order.
    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Terminal items of a job, back in submission order.
#[derive(Debug)]
pub struct FinishedJob {
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub items: Vec<WorkItem>,
    pub elapsed: Duration,
}
