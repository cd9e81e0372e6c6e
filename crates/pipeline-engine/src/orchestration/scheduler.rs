//! Graph scheduler.
//!
//! Walks a [`PipelineGraph`] from its intake node to its finalize node,
//! running each node and choosing the next one from the node's transition.

use super::fork_join::ForkJoinCoordinator;
use super::graph::{NodeKind, PipelineGraph, PipelineNode, Route, StopReason, Transition};
use super::nodes::{execute_finalize, execute_intake};
use super::runner::StageRunner;
use crate::constants::defaults;
use crate::error::{PipelineError, Result};
use crate::events::PipelineEvent;
use crate::state::PipelineState;

/// Scheduler for pipeline graphs.
pub struct GraphScheduler {
    runner: StageRunner,
    fork_join: ForkJoinCoordinator,
    /// Maximum number of nodes to visit (for runaway graph protection).
    max_steps: u32,
}

impl GraphScheduler {
    /// Create a new scheduler.
    pub fn new(runner: StageRunner) -> Self {
        Self {
            fork_join: ForkJoinCoordinator::new(runner.clone()),
            runner,
            max_steps: defaults::MAX_STEPS,
        }
    }

    /// Set the maximum number of nodes to visit.
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Run `graph` to completion against `state`.
    ///
    /// Stage faults are recorded in the state and never returned. An `Err`
    /// is a scheduling fault: a malformed graph, an exhausted step budget or
    /// a state update that broke an ownership rule.
    pub async fn run(&self, graph: &PipelineGraph, state: &mut PipelineState) -> Result<()> {
        graph.validate()?;

        let finalize_id = graph
            .find_finalize_node()
            .map(|n| n.id.clone())
            .ok_or_else(|| PipelineError::graph("graph has no finalize node"))?;
        let mut current_id = graph
            .find_entry_node()
            .map(|n| n.id.clone())
            .ok_or_else(|| PipelineError::graph("graph has no intake node"))?;

        let mut steps: u32 = 0;

        loop {
            // Check execution limit
            if steps >= self.max_steps {
                return Err(PipelineError::StepLimit(self.max_steps));
            }
            steps += 1;

            let node = graph.find_node(&current_id).ok_or_else(|| {
                PipelineError::graph(format!("Node '{}' not found in graph", current_id))
            })?;

            log::debug!("Visiting {} node '{}'", node.kind.label(), node.id);

            match &node.kind {
                NodeKind::Intake => execute_intake(state),
                NodeKind::Stage(stage) => {
                    self.runner.run(*stage, state).await?;
                }
                NodeKind::ForkJoin(branches) => {
                    self.fork_join
                        .run_parallel(&node.id, branches, state)
                        .await?;
                }
                NodeKind::Finalize => {
                    execute_finalize(state);
                    self.emit_run_completed(state);
                    return Ok(());
                }
            }

            current_id = self.next_node(node, &finalize_id, state);
        }
    }

    /// Pick the node after `node`. Routers only read the state; the stop
    /// they return is applied here.
    fn next_node(
        &self,
        node: &PipelineNode,
        finalize_id: &str,
        state: &mut PipelineState,
    ) -> String {
        if state.is_failed() {
            log::warn!("Run failed at '{}', routing to finalize", node.id);
            return finalize_id.to_string();
        }

        match &node.transition {
            Transition::Next(next) => next.clone(),
            Transition::Conditional { router, next } => match router(state) {
                Route::Continue => next.clone(),
                Route::Stop(reason) => {
                    self.apply_stop(node, reason, state);
                    finalize_id.to_string()
                }
            },
            Transition::End => finalize_id.to_string(),
        }
    }

    fn apply_stop(&self, node: &PipelineNode, reason: StopReason, state: &mut PipelineState) {
        let message = reason.to_string();
        if reason.is_fault() {
            log::error!("Stopping after '{}': {}", node.id, message);
            state.fail(message.clone());
        } else {
            log::warn!("Stopping after '{}': {}", node.id, message);
            state.record_warning(message.clone());
        }
        self.emit_route_short_circuited(&node.id, message);
    }

    // =========================================================================
    // Event emission helpers
    // =========================================================================

    fn emit_route_short_circuited(&self, node_id: &str, reason: String) {
        let _ = self.runner.event_sink().send(PipelineEvent::RouteShortCircuited {
            node_id: node_id.to_string(),
            execution_id: self.runner.execution_id().to_string(),
            reason,
        });
    }

    fn emit_run_completed(&self, state: &PipelineState) {
        let _ = self.runner.event_sink().send(PipelineEvent::RunCompleted {
            job_id: state.job_id().to_string(),
            execution_id: self.runner.execution_id().to_string(),
            status: state.status(),
            output_video: state.final_video_ref().map(str::to_string),
        });
    }
}
