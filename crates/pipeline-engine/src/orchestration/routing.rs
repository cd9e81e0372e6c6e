//! Routing predicates for the tutorial graph.
//!
//! Pure reads over the state: they never mutate it, and an unset slot is
//! a valid (false) condition rather than an error.

use super::graph::{Route, StopReason};
use crate::state::PipelineState;

/// Frames are load-bearing for every downstream stage.
pub fn after_frame_extraction(state: &PipelineState) -> Route {
    if state.is_failed() || !state.has_frames() {
        return Route::Stop(StopReason::FramesUnavailable);
    }
    Route::Continue
}

/// Re-check frames after the parallel region. Missing cursor or audio
/// output never stops the run; those slots hold empty defaults.
pub fn after_join(state: &PipelineState) -> Route {
    if !state.has_frames() {
        return Route::Stop(StopReason::FramesUnavailable);
    }
    Route::Continue
}

/// Event analysis needs at least one frame description.
pub fn after_vision(state: &PipelineState) -> Route {
    if state.is_failed() || !state.has_descriptions() {
        return Route::Stop(StopReason::DescriptionsUnavailable);
    }
    Route::Continue
}

/// An empty edit plan skips render.
pub fn after_script_planning(state: &PipelineState) -> Route {
    if !state.has_edit_plan() {
        return Route::Stop(StopReason::EditPlanMissing);
    }
    Route::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{new_state, state_with_frames};
    use crate::types::{EditAction, EditDecision, EditPlan, NarrationScript, ScriptPlan};

    #[test]
    fn test_after_frame_extraction() {
        assert_eq!(
            after_frame_extraction(&new_state()),
            Route::Stop(StopReason::FramesUnavailable)
        );
        assert_eq!(after_frame_extraction(&state_with_frames(3)), Route::Continue);

        let mut failed = state_with_frames(3);
        failed.fail("frame_extraction: boom");
        assert_eq!(
            after_frame_extraction(&failed),
            Route::Stop(StopReason::FramesUnavailable)
        );
    }

    #[test]
    fn test_after_join_ignores_cursor_and_audio() {
        // Cursor and audio slots are unset here; only frames matter
        let state = state_with_frames(3);
        assert_eq!(after_join(&state), Route::Continue);
        assert_eq!(
            after_join(&new_state()),
            Route::Stop(StopReason::FramesUnavailable)
        );
    }

    #[test]
    fn test_after_vision_requires_descriptions() {
        assert_eq!(
            after_vision(&state_with_frames(3)),
            Route::Stop(StopReason::DescriptionsUnavailable)
        );
    }

    #[test]
    fn test_after_script_planning() {
        let mut empty = new_state();
        empty
            .store_script(ScriptPlan {
                narration_script: NarrationScript::default(),
                edit_plan: Some(EditPlan::default()),
                tts_config: None,
            })
            .unwrap();
        assert_eq!(
            after_script_planning(&empty),
            Route::Stop(StopReason::EditPlanMissing)
        );

        let mut planned = new_state();
        planned
            .store_script(ScriptPlan {
                narration_script: NarrationScript::default(),
                edit_plan: Some(EditPlan {
                    timeline: vec![EditDecision {
                        start: 0.0,
                        end: 4.0,
                        action: EditAction::Keep,
                    }],
                }),
                tts_config: None,
            })
            .unwrap();
        assert_eq!(after_script_planning(&planned), Route::Continue);
    }
}
