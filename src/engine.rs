use std::sync::Arc;

use crate::backend::{self, Backend};
use crate::cancel::CancelToken;
use crate::error::EngineError;
use crate::events::EventBus;
use crate::governor::Governor;
use crate::job::{JobSpec, RunResult, Scheduler};
use crate::sink::{DataModel, ResultSink};
use crate::template::TemplateRegistry;

/// Submits jobs, runs them, and writes their results back.
///
/// Holds nothing between runs except the registered templates and the
/// governor's per-backend limits.
pub struct Engine {
    registry: Arc<TemplateRegistry>,
    governor: Arc<Governor>,
    events: EventBus,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Arc::new(TemplateRegistry::with_presets()), Arc::new(Governor::default()))
    }
}

impl Engine {
    pub fn new(registry: Arc<TemplateRegistry>, governor: Arc<Governor>) -> Self {
        Self {
            registry,
            governor,
            events: EventBus::default(),
        }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    /// Progress stream for every job this engine runs.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(Arc::clone(&self.registry), Arc::clone(&self.governor))
            .with_events(self.events.clone())
    }

    /// Runs `spec` against the backend its descriptor names.
    pub async fn execute(
        &self,
        model: &mut dyn DataModel,
        spec: JobSpec,
        cancel: &CancelToken,
    ) -> Result<RunResult, EngineError> {
        let adapter = backend::connect(&spec.backend);
        self.execute_with(model, spec, adapter, cancel).await
    }

    /// Runs `spec` against an explicit adapter.
    ///
    /// Only submission problems (bad range, unknown template) return `Err`;
    /// per-cell failures are reported inside the [`RunResult`].
    pub async fn execute_with(
        &self,
        model: &mut dyn DataModel,
        spec: JobSpec,
        adapter: Arc<dyn Backend>,
        cancel: &CancelToken,
    ) -> Result<RunResult, EngineError> {
        let scheduler = self.scheduler();
        let job = scheduler.submit(&*model, spec)?;
        let finished = scheduler.run(job, adapter, cancel).await;
        Ok(ResultSink::apply(model, finished))
    }
}
