//! Single-stage execution.
//!
//! Running a stage is split into three phases so the fork/join coordinator
//! can run the middle one on its own task:
//!
//! 1. [`StageRequest::capture`] copies the stage's inputs out of the state.
//! 2. [`StageRunner::invoke`] calls the collaborator. It never touches the
//!    state, and every fault (error, panic, invalid payload) comes back as a
//!    failed [`StageResult`].
//! 3. [`StageRunner::apply`] merges the outcome into the state and classifies
//!    failures by the stage's criticality.

use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{StageConfig, UserPreferences};
use crate::constants::slots;
use crate::error::{PipelineError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::stage::{StageExecutor, StageId, StageResult, StageStatus};
use crate::state::{PipelineState, StageRecord};
use crate::types::{
    AudioAnalysis, CursorEvent, CursorSummary, EditPlan, Frame, FrameDescription,
    FrameExtraction, NarrationScript, RenderOutput, ScriptPlan, SilenceSegment, TimelineEvent,
    TimelineSynthesis, Transcript, TtsConfig, VideoMetadata,
};

/// Owned inputs for one collaborator call, captured from the state.
#[derive(Debug, Clone)]
pub enum StageRequest {
    ExtractFrames {
        video_ref: String,
        config: StageConfig,
    },
    DetectCursor {
        frames: Vec<Frame>,
        config: StageConfig,
    },
    ProcessAudio {
        video_ref: String,
        config: StageConfig,
    },
    DescribeFrames {
        frames: Vec<Frame>,
        cursor_events: Vec<CursorEvent>,
        config: StageConfig,
    },
    SynthesizeTimeline {
        cursor_summary: CursorSummary,
        descriptions: Vec<FrameDescription>,
        transcript: Transcript,
        silence_segments: Vec<SilenceSegment>,
        video_metadata: VideoMetadata,
    },
    PlanScript {
        event_timeline: Vec<TimelineEvent>,
        transcript: Transcript,
        video_metadata: VideoMetadata,
        preferences: UserPreferences,
    },
    Render {
        video_ref: String,
        edit_plan: EditPlan,
        narration_script: NarrationScript,
        tts_config: Option<TtsConfig>,
    },
}

fn require<'a, T: ?Sized>(stage: StageId, slot: &str, value: Option<&'a T>) -> Result<&'a T> {
    value.ok_or_else(|| PipelineError::missing_input(stage.name(), slot))
}

impl StageRequest {
    /// Copy the inputs `stage` reads out of `state`.
    ///
    /// Fails with [`PipelineError::MissingInput`] when an input slot is
    /// still unset, and with a graph error for built-in control stages.
    pub fn capture(stage: StageId, state: &PipelineState) -> Result<Self> {
        let config = state.config().stage(stage);
        let request = match stage {
            StageId::FrameExtraction => Self::ExtractFrames {
                video_ref: state.video_ref().to_string(),
                config,
            },
            StageId::CursorDetection => Self::DetectCursor {
                frames: require(stage, slots::FRAMES, state.frames())?.to_vec(),
                config,
            },
            StageId::AudioProcessing => Self::ProcessAudio {
                video_ref: state.video_ref().to_string(),
                config,
            },
            StageId::VisionDescription => Self::DescribeFrames {
                frames: require(stage, slots::FRAMES, state.frames())?.to_vec(),
                cursor_events: require(stage, slots::CURSOR_EVENTS, state.cursor_events())?
                    .to_vec(),
                config,
            },
            StageId::EventAnalysis => Self::SynthesizeTimeline {
                cursor_summary: CursorSummary::from_events(require(
                    stage,
                    slots::CURSOR_EVENTS,
                    state.cursor_events(),
                )?),
                descriptions: require(stage, slots::FRAME_DESCRIPTIONS, state.frame_descriptions())?
                    .to_vec(),
                transcript: require(stage, slots::AUDIO_TRANSCRIPT, state.audio_transcript())?
                    .clone(),
                silence_segments: require(stage, slots::SILENCE_SEGMENTS, state.silence_segments())?
                    .to_vec(),
                video_metadata: require(stage, slots::VIDEO_METADATA, state.video_metadata())?
                    .clone(),
            },
            StageId::ScriptPlanning => Self::PlanScript {
                event_timeline: require(stage, slots::EVENT_TIMELINE, state.event_timeline())?
                    .to_vec(),
                transcript: require(stage, slots::AUDIO_TRANSCRIPT, state.audio_transcript())?
                    .clone(),
                video_metadata: require(stage, slots::VIDEO_METADATA, state.video_metadata())?
                    .clone(),
                preferences: state.preferences().clone(),
            },
            StageId::Render => Self::Render {
                video_ref: state.video_ref().to_string(),
                edit_plan: require(stage, slots::EDIT_PLAN, state.edit_plan())?.clone(),
                narration_script: require(stage, slots::NARRATION_SCRIPT, state.narration_script())?
                    .clone(),
                tts_config: state.tts_config().cloned(),
            },
            StageId::Intake | StageId::Finalize => {
                return Err(PipelineError::graph(format!(
                    "stage '{}' has no collaborator",
                    stage
                )))
            }
        };
        Ok(request)
    }

    /// The stage this request is for
    pub fn stage(&self) -> StageId {
        match self {
            Self::ExtractFrames { .. } => StageId::FrameExtraction,
            Self::DetectCursor { .. } => StageId::CursorDetection,
            Self::ProcessAudio { .. } => StageId::AudioProcessing,
            Self::DescribeFrames { .. } => StageId::VisionDescription,
            Self::SynthesizeTimeline { .. } => StageId::EventAnalysis,
            Self::PlanScript { .. } => StageId::ScriptPlanning,
            Self::Render { .. } => StageId::Render,
        }
    }
}

/// Payload of a successful collaborator call
#[derive(Debug, Clone, PartialEq)]
pub enum StagePayload {
    Frames(FrameExtraction),
    CursorEvents(Vec<CursorEvent>),
    Audio(AudioAnalysis),
    Descriptions(Vec<FrameDescription>),
    Timeline(TimelineSynthesis),
    Script(ScriptPlan),
    Render(RenderOutput),
}

impl StagePayload {
    /// The stage that produces this payload
    pub fn stage(&self) -> StageId {
        match self {
            Self::Frames(_) => StageId::FrameExtraction,
            Self::CursorEvents(_) => StageId::CursorDetection,
            Self::Audio(_) => StageId::AudioProcessing,
            Self::Descriptions(_) => StageId::VisionDescription,
            Self::Timeline(_) => StageId::EventAnalysis,
            Self::Script(_) => StageId::ScriptPlanning,
            Self::Render(_) => StageId::Render,
        }
    }

    /// Reason this payload cannot feed the stages downstream, if any.
    fn defect(&self) -> Option<&'static str> {
        match self {
            Self::Frames(extraction) if extraction.frames.is_empty() => {
                Some("no frames extracted")
            }
            Self::Descriptions(descriptions) if descriptions.is_empty() => {
                Some("no frame descriptions generated")
            }
            Self::Render(output) if output.video_ref.trim().is_empty() => {
                Some("render produced no video")
            }
            _ => None,
        }
    }

    fn store(self, state: &mut PipelineState) -> Result<()> {
        match self {
            Self::Frames(extraction) => state.store_frames(extraction),
            Self::CursorEvents(events) => state.store_cursor_events(events),
            Self::Audio(audio) => state.store_audio(audio),
            Self::Descriptions(descriptions) => state.store_descriptions(descriptions),
            Self::Timeline(synthesis) => state.store_timeline(synthesis),
            Self::Script(plan) => state.store_script(plan),
            Self::Render(output) => state.store_render(output),
        }
    }
}

/// A finished collaborator call, ready to be merged into the state
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: StageId,
    pub result: StageResult<StagePayload>,
    /// Wall-clock time measured around the call
    pub wall_time: Duration,
}

impl StageOutcome {
    /// Outcome for a stage that failed before its collaborator was called.
    pub fn not_started(stage: StageId, error: PipelineError) -> Self {
        Self {
            stage,
            result: StageResult::failed(error.detail()),
            wall_time: Duration::ZERO,
        }
    }
}

/// How a stage invocation affected the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageDisposition {
    /// Payload merged, stage appended to completed stages
    Completed,
    /// Non-critical failure; empty default substituted
    Degraded,
    /// Critical failure; run status set to error
    Failed,
    /// Disabled by configuration; empty default substituted
    Skipped,
}

/// Call the collaborator for `request`, converting every fault into a
/// failed result.
pub async fn call_stage(
    executor: Arc<dyn StageExecutor>,
    request: StageRequest,
) -> StageResult<StagePayload> {
    let stage = request.stage();
    let call = dispatch(executor, request);

    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(result)) => validate(result),
        Ok(Err(err)) => StageResult::failed(err.detail()),
        Err(panic) => {
            let err = PipelineError::StagePanicked {
                stage: stage.name().to_string(),
                message: panic_message(panic.as_ref()),
            };
            StageResult::failed(err.detail())
        }
    }
}

async fn dispatch(
    executor: Arc<dyn StageExecutor>,
    request: StageRequest,
) -> Result<StageResult<StagePayload>> {
    let result = match request {
        StageRequest::ExtractFrames { video_ref, config } => executor
            .extract_frames(&video_ref, &config)
            .await?
            .map(StagePayload::Frames),
        StageRequest::DetectCursor { frames, config } => executor
            .detect_cursor(&frames, &config)
            .await?
            .map(StagePayload::CursorEvents),
        StageRequest::ProcessAudio { video_ref, config } => executor
            .process_audio(&video_ref, &config)
            .await?
            .map(StagePayload::Audio),
        StageRequest::DescribeFrames {
            frames,
            cursor_events,
            config,
        } => executor
            .describe_frames(&frames, &cursor_events, &config)
            .await?
            .map(StagePayload::Descriptions),
        StageRequest::SynthesizeTimeline {
            cursor_summary,
            descriptions,
            transcript,
            silence_segments,
            video_metadata,
        } => executor
            .synthesize_timeline(
                &cursor_summary,
                &descriptions,
                &transcript,
                &silence_segments,
                &video_metadata,
            )
            .await?
            .map(StagePayload::Timeline),
        StageRequest::PlanScript {
            event_timeline,
            transcript,
            video_metadata,
            preferences,
        } => executor
            .plan_script_and_edits(&event_timeline, &transcript, &video_metadata, &preferences)
            .await?
            .map(StagePayload::Script),
        StageRequest::Render {
            video_ref,
            edit_plan,
            narration_script,
            tts_config,
        } => executor
            .render_video(&video_ref, &edit_plan, &narration_script, tts_config.as_ref())
            .await?
            .map(StagePayload::Render),
    };
    Ok(result)
}

/// Reject successful results that carry no usable payload.
fn validate(result: StageResult<StagePayload>) -> StageResult<StagePayload> {
    if !result.is_success() {
        return result;
    }

    let defect = match &result.payload {
        None => Some("stage returned no payload"),
        Some(payload) => payload.defect(),
    };

    match defect {
        Some(reason) => StageResult::failed(reason).with_telemetry(result.telemetry),
        None => result,
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs stages against the pipeline state.
///
/// Cheap to clone; clones share the collaborator and the event sink.
#[derive(Clone)]
pub struct StageRunner {
    executor: Arc<dyn StageExecutor>,
    event_sink: Arc<dyn EventSink>,
    execution_id: String,
}

impl StageRunner {
    pub fn new(
        executor: Arc<dyn StageExecutor>,
        event_sink: Arc<dyn EventSink>,
        execution_id: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            event_sink,
            execution_id: execution_id.into(),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn event_sink(&self) -> &dyn EventSink {
        self.event_sink.as_ref()
    }

    /// Run one stage to completion and merge its result into `state`.
    ///
    /// Stage faults never surface as `Err`; an `Err` here means the state
    /// itself could not be updated.
    pub async fn run(&self, stage: StageId, state: &mut PipelineState) -> Result<StageDisposition> {
        if !state.config().is_enabled(stage) {
            return self.skip(stage, state);
        }

        let outcome = match StageRequest::capture(stage, state) {
            Ok(request) => self.invoke(request).await,
            Err(err) => StageOutcome::not_started(stage, err),
        };

        self.apply(outcome, state)
    }

    /// Call the collaborator. Does not touch the state, so it can run on
    /// another task.
    pub async fn invoke(&self, request: StageRequest) -> StageOutcome {
        let stage = request.stage();
        log::debug!("Invoking stage '{}'", stage);
        self.emit_stage_started(stage);

        let start = Instant::now();
        let mut result = call_stage(self.executor.clone(), request).await;
        let wall_time = start.elapsed();

        // Faults carry no telemetry; count the measured time
        if result.telemetry.duration.is_zero() {
            result.telemetry.duration = wall_time;
        }

        StageOutcome {
            stage,
            result,
            wall_time,
        }
    }

    /// Merge an outcome into the state.
    pub fn apply(
        &self,
        outcome: StageOutcome,
        state: &mut PipelineState,
    ) -> Result<StageDisposition> {
        let StageOutcome {
            stage,
            result,
            wall_time,
        } = outcome;
        let StageResult {
            status,
            payload,
            telemetry,
            error,
        } = result;

        state.record_telemetry(&telemetry);

        let (disposition, record_error) = match (status, payload) {
            (StageStatus::Success, Some(payload)) => {
                if payload.stage() != stage {
                    return Err(PipelineError::graph(format!(
                        "stage '{}' produced a payload for '{}'",
                        stage,
                        payload.stage()
                    )));
                }
                payload.store(state)?;
                state.mark_completed(stage);
                log::info!("Stage '{}' completed in {:?}", stage, telemetry.duration);
                (StageDisposition::Completed, None)
            }
            (_, _) => {
                let detail =
                    error.unwrap_or_else(|| "stage reported failure without a message".to_string());
                let message = format!("{}: {}", stage, detail);

                if stage.is_critical() {
                    log::error!("Critical stage failed: {}", message);
                    state.fail(message);
                    (StageDisposition::Failed, Some(detail))
                } else {
                    log::warn!("Stage failed, continuing with empty default: {}", message);
                    state.record_error(message);
                    state.record_warning(format!("{}: continuing with empty default", stage));
                    state.store_default(stage)?;
                    (StageDisposition::Degraded, Some(detail))
                }
            }
        };

        let status = match disposition {
            StageDisposition::Completed => StageStatus::Success,
            _ => StageStatus::Failed,
        };
        let record = StageRecord::new(stage, status, &telemetry, wall_time, record_error);
        state.push_record(record.clone());
        self.emit_stage_completed(record);

        Ok(disposition)
    }

    /// Substitute the empty default for a stage disabled in configuration.
    pub fn skip(&self, stage: StageId, state: &mut PipelineState) -> Result<StageDisposition> {
        log::info!("Stage '{}' disabled, using empty default", stage);
        state.store_default(stage)?;
        state.record_warning(format!("{}: disabled in configuration", stage));
        Ok(StageDisposition::Skipped)
    }

    // =========================================================================
    // Event emission helpers
    // =========================================================================

    fn emit_stage_started(&self, stage: StageId) {
        let _ = self.event_sink.send(PipelineEvent::StageStarted {
            stage,
            execution_id: self.execution_id.clone(),
        });
    }

    fn emit_stage_completed(&self, record: StageRecord) {
        let _ = self.event_sink.send(PipelineEvent::StageCompleted {
            execution_id: self.execution_id.clone(),
            record,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::events::VecEventSink;
    use crate::state::PipelineStatus;
    use crate::test_support::{new_state, ScriptedExecutor};

    fn runner(executor: ScriptedExecutor) -> (StageRunner, Arc<VecEventSink>) {
        let sink = Arc::new(VecEventSink::new());
        let runner = StageRunner::new(Arc::new(executor), sink.clone(), "exec-test");
        (runner, sink)
    }

    #[tokio::test]
    async fn test_success_merges_payload() {
        let (runner, sink) = runner(ScriptedExecutor::happy_path());
        let mut state = new_state();

        let disposition = runner.run(StageId::FrameExtraction, &mut state).await.unwrap();

        assert_eq!(disposition, StageDisposition::Completed);
        assert_eq!(state.frames().map(|f| f.len()), Some(10));
        assert_eq!(state.completed_stages(), [StageId::FrameExtraction]);
        assert_eq!(state.current_stage(), "frame_extraction");
        assert_eq!(state.stage_log().len(), 1);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], PipelineEvent::StageStarted { .. }));
        match &events[1] {
            PipelineEvent::StageCompleted { record, execution_id } => {
                assert_eq!(execution_id, "exec-test");
                assert_eq!(record.stage, StageId::FrameExtraction);
                assert_eq!(record.status, StageStatus::Success);
                assert!(record.error.is_none());
            }
            other => panic!("Expected StageCompleted event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_critical_failure_sets_error_status() {
        let (runner, sink) =
            runner(ScriptedExecutor::happy_path().failing(StageId::FrameExtraction));
        let mut state = new_state();

        let disposition = runner.run(StageId::FrameExtraction, &mut state).await.unwrap();

        assert_eq!(disposition, StageDisposition::Failed);
        assert_eq!(state.status(), PipelineStatus::Error);
        assert!(state.frames().is_none());
        assert!(state.completed_stages().is_empty());
        assert_eq!(state.errors().len(), 1);
        assert!(state.errors()[0].starts_with("frame_extraction: "));

        match sink.events().last() {
            Some(PipelineEvent::StageCompleted { record, .. }) => {
                assert_eq!(record.status, StageStatus::Failed);
                assert!(record.error.is_some());
            }
            other => panic!("Expected StageCompleted event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_critical_failure_substitutes_default() {
        let (runner, _) = runner(ScriptedExecutor::happy_path().failing(StageId::AudioProcessing));
        let mut state = new_state();

        let disposition = runner.run(StageId::AudioProcessing, &mut state).await.unwrap();

        assert_eq!(disposition, StageDisposition::Degraded);
        assert_eq!(state.status(), PipelineStatus::Processing);
        assert_eq!(
            state.errors(),
            ["audio_processing: audio_processing collaborator failed"]
        );
        assert_eq!(
            state.warnings(),
            ["audio_processing: continuing with empty default"]
        );
        assert_eq!(state.audio_transcript(), Some(&Transcript::default()));
        assert_eq!(state.silence_segments(), Some(&[][..]));
    }

    #[tokio::test]
    async fn test_collaborator_error_is_contained() {
        let (runner, _) = runner(ScriptedExecutor::happy_path().erroring(StageId::FrameExtraction));
        let mut state = new_state();

        let disposition = runner.run(StageId::FrameExtraction, &mut state).await.unwrap();

        assert_eq!(disposition, StageDisposition::Failed);
        assert_eq!(state.errors(), ["frame_extraction: transcoder exited with status 1"]);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let (runner, _) =
            runner(ScriptedExecutor::happy_path().panicking(StageId::FrameExtraction));
        let mut state = new_state();

        let disposition = runner.run(StageId::FrameExtraction, &mut state).await.unwrap();

        assert_eq!(disposition, StageDisposition::Failed);
        assert_eq!(state.errors().len(), 1);
        assert!(state.errors()[0].contains("panicked"));
        assert!(state.errors()[0].contains("frame_extraction"));
    }

    #[tokio::test]
    async fn test_zero_frames_is_a_fault() {
        let (runner, _) = runner(ScriptedExecutor::happy_path().with_frame_count(0));
        let mut state = new_state();

        runner.run(StageId::FrameExtraction, &mut state).await.unwrap();

        assert_eq!(state.status(), PipelineStatus::Error);
        assert_eq!(state.errors(), ["frame_extraction: no frames extracted"]);
        assert!(state.frames().is_none());
    }

    #[tokio::test]
    async fn test_missing_input_fails_stage() {
        let (runner, sink) = runner(ScriptedExecutor::happy_path());
        let mut state = new_state();

        let disposition = runner.run(StageId::CursorDetection, &mut state).await.unwrap();

        assert_eq!(disposition, StageDisposition::Degraded);
        assert_eq!(state.errors(), ["cursor_detection: frames is unset"]);
        assert_eq!(
            state.warnings(),
            ["cursor_detection: continuing with empty default"]
        );
        assert_eq!(state.status(), PipelineStatus::Processing);
        assert_eq!(state.cursor_events(), Some(&[][..]));
        // The collaborator was never called
        assert!(!sink
            .events()
            .iter()
            .any(|e| matches!(e, PipelineEvent::StageStarted { .. })));
    }

    #[tokio::test]
    async fn test_disabled_stage_is_skipped() {
        let (runner, sink) = runner(ScriptedExecutor::happy_path());
        let config = PipelineConfig {
            enable_cursor_detection: false,
            ..PipelineConfig::default()
        };
        let mut state = PipelineState::new("job-1", "demo.mp4", config, UserPreferences::default());

        let disposition = runner.run(StageId::CursorDetection, &mut state).await.unwrap();

        assert_eq!(disposition, StageDisposition::Skipped);
        assert_eq!(state.cursor_events(), Some(&[][..]));
        assert_eq!(state.warnings(), ["cursor_detection: disabled in configuration"]);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_failed_stage_telemetry_is_counted() {
        let (runner, _) = runner(ScriptedExecutor::happy_path().failing(StageId::AudioProcessing));
        let mut state = new_state();

        runner.run(StageId::AudioProcessing, &mut state).await.unwrap();

        assert_eq!(state.processing_time(), Duration::from_millis(300));
        assert_eq!(state.stage_log()[0].duration, Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_faulted_stage_counts_wall_time() {
        let executor = ScriptedExecutor::happy_path()
            .erroring(StageId::AudioProcessing)
            .with_delay(StageId::AudioProcessing, Duration::from_millis(20));
        let (runner, _) = runner(executor);
        let mut state = new_state();

        runner.run(StageId::AudioProcessing, &mut state).await.unwrap();

        let record = &state.stage_log()[0];
        assert_eq!(record.status, StageStatus::Failed);
        assert!(record.wall_time >= Duration::from_millis(20));
        assert_eq!(record.duration, record.wall_time);
        assert_eq!(state.processing_time(), record.wall_time);
    }

    #[test]
    fn test_capture_rejects_control_stages() {
        let state = new_state();
        assert!(StageRequest::capture(StageId::Intake, &state).is_err());
        assert!(StageRequest::capture(StageId::Finalize, &state).is_err());
    }

    #[test]
    fn test_capture_snapshots_inputs() {
        let mut state = new_state();
        state
            .store_frames(FrameExtraction {
                frames: crate::test_support::frames(3),
                video_metadata: VideoMetadata::default(),
            })
            .unwrap();

        let request = StageRequest::capture(StageId::CursorDetection, &state).unwrap();
        assert_eq!(request.stage(), StageId::CursorDetection);
        match request {
            StageRequest::DetectCursor { frames, .. } => assert_eq!(frames.len(), 3),
            other => panic!("Expected DetectCursor request, got {:?}", other),
        }
    }
}
