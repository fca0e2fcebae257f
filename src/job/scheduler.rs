//! Decomposes a cell range into work items and drives them to completion
//! with a bounded pool of channel-fed workers.
//!
//! Items move between tasks by value, so each one has a single owner at any
//! time. A retried item waits out its backoff in a detached task and then
//! goes back to the queue. Workers stop once every item is terminal. Each
//! item is processed on its own task, so a panic fails that item instead of
//! leaving the run waiting for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use super::{CellAddress, FinishedJob, Job, JobSpec, WorkItem};
use crate::backend::{Backend, BackendDescriptor, BackendError, GenerationParams};
use crate::cancel::CancelToken;
use crate::error::{EngineError, ErrorKind, TemplateError};
use crate::events::{EventBus, ProgressEvent};
use crate::governor::{Governor, GovernorPermit};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::sink::DataModel;
use crate::template::{RenderContext, RowCell, Template, TemplateRegistry, render_template};

pub struct Scheduler {
    registry: Arc<TemplateRegistry>,
    governor: Arc<Governor>,
    events: Option<EventBus>,
}

impl Scheduler {
    pub fn new(registry: Arc<TemplateRegistry>, governor: Arc<Governor>) -> Self {
        Self {
            registry,
            governor,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Builds one pending work item per cell of `spec.range`, row-major.
    pub fn submit(&self, model: &dyn DataModel, spec: JobSpec) -> Result<Job, EngineError> {
        let range = spec.range;
        let Some(end) = range.end() else {
            return Err(EngineError::InvalidRange(format!("range {range} is empty")));
        };
        let (rows, cols) = model.dimensions();
        if end.row >= rows || end.col >= cols {
            return Err(EngineError::InvalidRange(format!(
                "range {range} is outside the data ({rows} rows x {cols} columns)"
            )));
        }
        if spec.concurrency == 0 {
            return Err(EngineError::Config("concurrency must be at least 1".into()));
        }
        let template = self
            .registry
            .get(&spec.template)
            .ok_or_else(|| TemplateError::UnknownTemplate(spec.template.clone()))?;

        let items = range
            .cells()
            .enumerate()
            .map(|(index, address)| {
                WorkItem::new(
                    index,
                    address,
                    model.get_cell(address).unwrap_or_default(),
                    model.header(address.col),
                )
                .with_row_cells(row_cells(model, address, cols))
            })
            .collect();

        Ok(Job {
            id: Uuid::new_v4(),
            submitted_at: Utc::now(),
            range,
            template,
            backend: spec.backend,
            concurrency: spec.concurrency,
            variables: spec.variables,
            params: spec.params,
            retry: spec.retry,
            per_call_timeout: spec.per_call_timeout,
            items,
        })
    }

    /// Workers used for `job`: requested, backend, and governor limits combined.
    pub fn worker_count(&self, job: &Job) -> usize {
        job.concurrency
            .min(job.backend.max_concurrency)
            .min(self.governor.capacity())
            .max(1)
    }

    /// Runs `job` until every item is terminal and returns them in submission order.
    pub async fn run(&self, job: Job, backend: Arc<dyn Backend>, cancel: &CancelToken) -> FinishedJob {
        let workers = self.worker_count(&job);
        let total = job.items.len();
        let job_id = job.id;
        let started_at = Utc::now();
        let clock = Instant::now();

        log::info!(
            "job {job_id}: {total} cells in {} with template `{}` on {} backend ({workers} workers)",
            job.range,
            job.template.name(),
            job.backend.kind
        );
        self.emit(ProgressEvent::JobStarted {
            job_id,
            total,
            workers,
        });

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        for item in job.items {
            let _ = queue_tx.send(item);
        }
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let all_terminal = CancelToken::new();
        if total == 0 {
            all_terminal.cancel();
        }

        let ctx = Arc::new(RunContext {
            template: job.template,
            variables: job.variables,
            params: job.params,
            retry: job.retry,
            per_call_timeout: job.per_call_timeout,
            descriptor: job.backend,
            backend,
            governor: Arc::clone(&self.governor),
            cancel: cancel.clone(),
            events: self.events.clone(),
            queue: Mutex::new(queue_rx),
            requeue: queue_tx,
            finished: done_tx,
            total,
            completed: AtomicUsize::new(0),
            all_terminal,
        });

        let mut pool = JoinSet::new();
        for id in 0..workers {
            pool.spawn(worker(Arc::clone(&ctx), id));
        }
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                log::error!("job {job_id}: worker stopped abnormally: {e}");
            }
        }
        drop(ctx);

        let mut items = Vec::with_capacity(total);
        while let Ok(item) = done_rx.try_recv() {
            items.push(item);
        }
        items.sort_by_key(|item: &WorkItem| item.index);

        let elapsed = clock.elapsed();
        log::info!(
            "job {job_id}: finished {} of {total} cells in {elapsed:?}{}",
            items.len(),
            if cancel.is_cancelled() { " (cancelled)" } else { "" }
        );
        self.emit(ProgressEvent::JobFinished { job_id });

        FinishedJob {
            job_id,
            started_at,
            items,
            elapsed,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

/// Every other cell of `address`'s row, labelled by header or column letters.
fn row_cells(model: &dyn DataModel, address: CellAddress, cols: u32) -> Vec<RowCell> {
    (0..cols)
        .filter(|&col| col != address.col)
        .map(|col| {
            let cell = CellAddress::new(address.row, col);
            RowCell {
                col,
                label: model.header(col).unwrap_or_else(|| cell.column_letters()),
                value: model.get_cell(cell).unwrap_or_default(),
            }
        })
        .collect()
}

/// State shared by the workers of one run.
struct RunContext {
    template: Template,
    variables: std::collections::BTreeMap<String, String>,
    params: GenerationParams,
    retry: RetryPolicy,
    per_call_timeout: Duration,
    descriptor: BackendDescriptor,
    backend: Arc<dyn Backend>,
    governor: Arc<Governor>,
    cancel: CancelToken,
    events: Option<EventBus>,
    queue: Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    requeue: mpsc::UnboundedSender<WorkItem>,
    finished: mpsc::UnboundedSender<WorkItem>,
    total: usize,
    completed: AtomicUsize,
    /// Latched once the last item turns terminal.
    all_terminal: CancelToken,
}

async fn worker(ctx: Arc<RunContext>, id: usize) {
    log::debug!("worker {id} started");
    loop {
        let next = {
            let mut queue = ctx.queue.lock().await;
            tokio::select! {
                biased;
                _ = ctx.all_terminal.cancelled() => None,
                item = queue.recv() => item,
            }
        };
        let Some(mut item) = next else { break };

        if ctx.cancel.is_cancelled() {
            item.cancel("job cancelled before dispatch");
            ctx.finish(item);
            continue;
        }
        let item_ctx = Arc::clone(&ctx);
        if let Err(lost) = guarded(item, move |item| async move { item_ctx.process(item).await }).await {
            log::error!("{}: processing panicked", lost.address);
            ctx.finish(lost);
        }
    }
    log::debug!("worker {id} stopped");
}

/// Runs `work` on its own task. If it panics, the item it was handed comes
/// back failed so the run can still account for it.
async fn guarded<F, Fut>(item: WorkItem, work: F) -> Result<(), WorkItem>
where
    F: FnOnce(WorkItem) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut fallback = item.clone();
    match tokio::spawn(work(item)).await {
        Ok(()) => Ok(()),
        Err(join) => {
            fallback.fail(
                ErrorKind::InvalidResponse,
                format!("cell processing stopped abnormally: {join}"),
            );
            Err(fallback)
        }
    }
}

impl RunContext {
    async fn process(self: &Arc<Self>, mut item: WorkItem) {
        let prompt = match &item.prompt {
            Some(prompt) => prompt.clone(),
            None => {
                let context = RenderContext {
                    address: item.address,
                    value: &item.source,
                    header: item.header.as_deref(),
                    variables: &self.variables,
                    row_cells: &item.row_cells,
                };
                match render_template(&self.template, &context) {
                    Ok(prompt) => {
                        item.prompt = Some(prompt.clone());
                        prompt
                    }
                    Err(e) => {
                        item.fail(ErrorKind::Template, e.to_string());
                        return self.finish(item);
                    }
                }
            }
        };

        item.dispatch();
        log::debug!("{}: attempt {}", item.address, item.attempts);

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                item.cancel("job cancelled while waiting for a backend slot");
                return self.finish(item);
            }
            permit = self.governor.acquire(&self.descriptor) => permit,
        };
        let result = match permit {
            Ok(permit) => self.call_backend(prompt, permit).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(text) => {
                item.succeed(text);
                self.finish(item);
            }
            Err(err) => self.handle_failure(item, err),
        }
    }

    /// One adapter call, bounded by the per-call timeout. The slot is held
    /// for exactly the duration of the call.
    async fn call_backend(&self, prompt: String, permit: GovernorPermit) -> Result<String, BackendError> {
        let backend = Arc::clone(&self.backend);
        let params = self.params.clone();
        let mut call = tokio::spawn(async move { backend.submit(&prompt, &params).await });

        let result = match timeout(self.per_call_timeout, &mut call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(BackendError::InvalidResponse(format!(
                "backend call aborted: {join}"
            ))),
            Err(_) => {
                call.abort();
                Err(BackendError::TransientNetwork(format!(
                    "call timed out after {:?}",
                    self.per_call_timeout
                )))
            }
        };
        drop(permit);
        result
    }

    fn handle_failure(self: &Arc<Self>, mut item: WorkItem, err: BackendError) {
        if self.cancel.is_cancelled() && err.is_retryable() {
            item.cancel(format!(
                "job cancelled after attempt {}: {err}",
                item.attempts
            ));
            return self.finish(item);
        }

        match self.retry.decide(item.attempts, &err) {
            RetryDecision::Fail if err.is_retryable() => {
                let message = format!("{err} (gave up after {} attempts)", item.attempts);
                item.fail(err.kind(), message);
                self.finish(item);
            }
            RetryDecision::Fail => {
                item.fail(err.kind(), err.to_string());
                self.finish(item);
            }
            RetryDecision::Retry { delay } => {
                log::warn!(
                    "↻ Retry {}/{} for {}: {err} (waiting {delay:?})",
                    item.attempts,
                    self.retry.max_attempts.saturating_sub(1),
                    item.address
                );
                self.emit(ProgressEvent::ItemRetrying {
                    address: item.address,
                    attempt: item.attempts,
                    delay,
                    reason: err.to_string(),
                });
                item.requeue(delay);
                self.schedule_retry(item, delay);
            }
        }
    }

    /// Puts `item` back in the queue after `delay`, or at once on cancellation.
    fn schedule_retry(self: &Arc<Self>, item: WorkItem, delay: Duration) {
        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {}
                _ = sleep(delay) => {}
            }
            let _ = ctx.requeue.send(item);
        });
    }

    fn finish(&self, item: WorkItem) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit(ProgressEvent::ItemFinished {
            address: item.address,
            status: item.status,
            completed,
            total: self.total,
        });
        if let Some(failure) = &item.failure {
            log::debug!("{}: {} ({}: {})", item.address, item.status, failure.kind, failure.message);
        }
        let _ = self.finished.send(item);
        if completed == self.total {
            self.all_terminal.cancel();
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}
