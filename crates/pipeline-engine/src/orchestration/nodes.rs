//! Built-in control nodes.

use crate::stage::StageId;
use crate::state::{PipelineState, PipelineStatus};

/// Start of a run. Always succeeds.
pub fn execute_intake(state: &mut PipelineState) {
    log::info!(
        "Starting pipeline for job '{}' ({})",
        state.job_id(),
        state.video_ref()
    );
    state.mark_completed(StageId::Intake);
}

/// Settle the final status and log the run summary.
///
/// Runs at most once per run; later calls are no-ops.
pub fn execute_finalize(state: &mut PipelineState) {
    if !state.mark_finalized() {
        log::debug!("Job '{}' already finalized", state.job_id());
        return;
    }

    log::info!("Finalizing pipeline");
    state.complete();

    match state.status() {
        PipelineStatus::Complete => {
            state.mark_completed(StageId::Finalize);
            state.set_current_stage("completed");
        }
        _ => state.set_current_stage("failed"),
    }

    log::info!("Pipeline completed with status: {}", state.status());
    log::info!(
        "Total processing time: {:.2}s",
        state.processing_time().as_secs_f64()
    );
    log::info!("Total cost: ${:.4}", state.total_cost_usd());
    log::info!(
        "Completed stages: {}",
        state
            .completed_stages()
            .iter()
            .map(StageId::name)
            .collect::<Vec<_>>()
            .join(", ")
    );

    if !state.errors().is_empty() {
        log::error!("Errors: {}", state.errors().join(", "));
    }
    if !state.warnings().is_empty() {
        log::warn!("Warnings: {}", state.warnings().join(", "));
    }
}
