//! Top-level pipeline entry point.

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::config::{PipelineConfig, ProcessingOptions, UserPreferences};
use crate::constants::defaults;
use crate::events::{EventSink, NullEventSink, PipelineEvent};
use crate::orchestration::nodes::execute_finalize;
use crate::orchestration::runner::panic_message;
use crate::orchestration::{GraphScheduler, PipelineGraph, StageRunner};
use crate::stage::StageExecutor;
use crate::state::PipelineState;

/// Runs whole pipelines.
///
/// One driver can execute any number of runs; each run gets a fresh state
/// and its own execution ID.
pub struct PipelineDriver {
    executor: Arc<dyn StageExecutor>,
    event_sink: Arc<dyn EventSink>,
    graph: PipelineGraph,
    max_steps: u32,
}

impl PipelineDriver {
    /// Create a driver for the tutorial graph with events discarded.
    pub fn new(executor: Arc<dyn StageExecutor>) -> Self {
        Self {
            executor,
            event_sink: Arc::new(NullEventSink),
            graph: PipelineGraph::tutorial(),
            max_steps: defaults::MAX_STEPS,
        }
    }

    /// Set the event sink.
    pub fn with_event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    /// Replace the stage graph.
    pub fn with_graph(mut self, graph: PipelineGraph) -> Self {
        self.graph = graph;
        self
    }

    /// Set the maximum number of graph nodes visited per run.
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Run the pipeline for one video and return its final state.
    ///
    /// Never fails: scheduling faults and panics are recorded in the
    /// returned state with status `error`.
    pub async fn execute(
        &self,
        job_id: impl Into<String>,
        video_ref: impl Into<String>,
        config: PipelineConfig,
        preferences: UserPreferences,
    ) -> PipelineState {
        let execution_id = format!("pipeline-exec-{}", uuid::Uuid::new_v4());
        let mut state = PipelineState::new(job_id, video_ref, config, preferences);

        log::info!(
            "Executing pipeline '{}' for job '{}' (execution {})",
            self.graph.id,
            state.job_id(),
            execution_id
        );
        self.emit_run_started(&execution_id, &state);

        let runner = StageRunner::new(
            self.executor.clone(),
            self.event_sink.clone(),
            execution_id.clone(),
        );
        let scheduler = GraphScheduler::new(runner).with_max_steps(self.max_steps);

        let outcome = AssertUnwindSafe(scheduler.run(&self.graph, &mut state))
            .catch_unwind()
            .await;

        let fault = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(panic) => Some(format!("panicked: {}", panic_message(panic.as_ref()))),
        };

        if let Some(fault) = fault {
            let error = format!("pipeline: {}", fault);
            log::error!("Pipeline execution failed: {}", error);
            state.fail(error.clone());
            execute_finalize(&mut state);
            self.emit_run_failed(&execution_id, &state, error);
        }

        state
    }

    /// Run the pipeline from flat processing options.
    pub async fn execute_with_options(
        &self,
        job_id: impl Into<String>,
        video_ref: impl Into<String>,
        options: ProcessingOptions,
    ) -> PipelineState {
        let (config, preferences) = options.into_parts();
        self.execute(job_id, video_ref, config, preferences).await
    }

    // =========================================================================
    // Event emission helpers
    // =========================================================================

    fn emit_run_started(&self, execution_id: &str, state: &PipelineState) {
        let _ = self.event_sink.send(PipelineEvent::RunStarted {
            job_id: state.job_id().to_string(),
            execution_id: execution_id.to_string(),
            video_ref: state.video_ref().to_string(),
        });
    }

    fn emit_run_failed(&self, execution_id: &str, state: &PipelineState, error: String) {
        let _ = self.event_sink.send(PipelineEvent::RunFailed {
            job_id: state.job_id().to_string(),
            execution_id: execution_id.to_string(),
            error,
        });
    }
}
