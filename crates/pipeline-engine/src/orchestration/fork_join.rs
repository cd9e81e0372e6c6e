//! Parallel fork/join region.
//!
//! Every branch captures its inputs from the same frozen view of the state,
//! runs on its own tokio task, and is merged back only after all branches
//! have returned. Merging follows the declared branch order, never the
//! completion order.

use futures_util::future::join_all;
use tokio::task::JoinHandle;

use super::runner::{StageDisposition, StageOutcome, StageRequest, StageRunner};
use crate::error::{PipelineError, Result};
use crate::events::PipelineEvent;
use crate::stage::StageId;
use crate::state::PipelineState;

/// Result of one fork/join region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReport {
    /// Disposition of every branch, in merge order
    pub branches: Vec<(StageId, StageDisposition)>,
}

impl JoinReport {
    /// Branches that failed (degraded or critical)
    pub fn failed_branches(&self) -> Vec<StageId> {
        self.branches
            .iter()
            .filter(|(_, d)| matches!(d, StageDisposition::Degraded | StageDisposition::Failed))
            .map(|(stage, _)| *stage)
            .collect()
    }

    pub fn disposition(&self, stage: StageId) -> Option<StageDisposition> {
        self.branches
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, d)| *d)
    }
}

/// A branch as launched at fork time
enum Branch {
    /// Disabled in configuration
    Disabled(StageId),
    /// Failed before its collaborator could be called
    Settled(StageOutcome),
    /// Running on its own task
    Running(StageId, JoinHandle<StageOutcome>),
}

/// A branch after the join barrier
enum Joined {
    Disabled(StageId),
    Finished(StageOutcome),
}

impl Branch {
    async fn join(self) -> Joined {
        match self {
            Self::Disabled(stage) => Joined::Disabled(stage),
            Self::Settled(outcome) => Joined::Finished(outcome),
            Self::Running(stage, handle) => match handle.await {
                Ok(outcome) => Joined::Finished(outcome),
                Err(join_error) => {
                    let err = PipelineError::StagePanicked {
                        stage: stage.name().to_string(),
                        message: join_error.to_string(),
                    };
                    Joined::Finished(StageOutcome::not_started(stage, err))
                }
            },
        }
    }
}

/// Runs independent stages concurrently and merges their results
pub struct ForkJoinCoordinator {
    runner: StageRunner,
}

impl ForkJoinCoordinator {
    pub fn new(runner: StageRunner) -> Self {
        Self { runner }
    }

    /// Run `branches` in parallel and merge them into `state`.
    ///
    /// Waits for every branch before merging anything. Branch faults are
    /// classified by the runner; an `Err` here means the state could not be
    /// updated or the branch list is malformed.
    pub async fn run_parallel(
        &self,
        node_id: &str,
        branches: &[StageId],
        state: &mut PipelineState,
    ) -> Result<JoinReport> {
        validate_branches(branches)?;

        log::info!(
            "Forking into parallel branches: {}",
            branch_names(branches)
        );
        state.set_current_stage(node_id);
        self.emit_fork_started(node_id, branches);

        // Capture from the frozen state, then launch
        let frozen: &PipelineState = state;
        let launched: Vec<Branch> = branches
            .iter()
            .map(|&stage| self.launch(stage, frozen))
            .collect();

        // Join barrier: wait for all
        let joined = join_all(launched.into_iter().map(Branch::join)).await;

        let mut report = JoinReport {
            branches: Vec::with_capacity(joined.len()),
        };
        for branch in joined {
            let (stage, disposition) = match branch {
                Joined::Disabled(stage) => (stage, self.runner.skip(stage, state)?),
                Joined::Finished(outcome) => {
                    let stage = outcome.stage;
                    (stage, self.runner.apply(outcome, state)?)
                }
            };
            if disposition == StageDisposition::Completed && produced_nothing(stage, state) {
                log::warn!("Branch '{}' completed without results", stage);
                state.record_warning(format!("{}: produced no results", stage));
            }
            report.branches.push((stage, disposition));
        }

        log::info!("Joined parallel branches: {}", branch_names(branches));
        self.emit_join_completed(node_id, report.failed_branches());

        Ok(report)
    }

    fn launch(&self, stage: StageId, state: &PipelineState) -> Branch {
        if !state.config().is_enabled(stage) {
            return Branch::Disabled(stage);
        }

        match StageRequest::capture(stage, state) {
            Ok(request) => {
                let runner = self.runner.clone();
                let handle = tokio::spawn(async move { runner.invoke(request).await });
                Branch::Running(stage, handle)
            }
            Err(err) => Branch::Settled(StageOutcome::not_started(stage, err)),
        }
    }

    // =========================================================================
    // Event emission helpers
    // =========================================================================

    fn emit_fork_started(&self, node_id: &str, branches: &[StageId]) {
        let _ = self.runner.event_sink().send(PipelineEvent::ForkStarted {
            node_id: node_id.to_string(),
            execution_id: self.runner.execution_id().to_string(),
            branches: branches.to_vec(),
        });
    }

    fn emit_join_completed(&self, node_id: &str, failed_branches: Vec<StageId>) {
        let _ = self.runner.event_sink().send(PipelineEvent::JoinCompleted {
            node_id: node_id.to_string(),
            execution_id: self.runner.execution_id().to_string(),
            failed_branches,
        });
    }
}

fn branch_names(branches: &[StageId]) -> String {
    branches
        .iter()
        .map(StageId::name)
        .collect::<Vec<_>>()
        .join(" + ")
}

/// Whether a completed branch left its slot empty
fn produced_nothing(stage: StageId, state: &PipelineState) -> bool {
    match stage {
        StageId::CursorDetection => state.cursor_events().is_some_and(|e| e.is_empty()),
        StageId::AudioProcessing => state.audio_transcript().is_some_and(|t| t.is_empty()),
        _ => false,
    }
}

/// Branches must be distinct collaborator stages.
pub(crate) fn validate_branches(branches: &[StageId]) -> Result<()> {
    if branches.is_empty() {
        return Err(PipelineError::graph("fork has no branches"));
    }
    for (i, stage) in branches.iter().enumerate() {
        if !stage.has_collaborator() {
            return Err(PipelineError::graph(format!(
                "stage '{}' cannot run as a parallel branch",
                stage
            )));
        }
        if branches[..i].contains(stage) {
            return Err(PipelineError::graph(format!(
                "stage '{}' appears twice in one fork",
                stage
            )));
        }
    }
    Ok(())
}
