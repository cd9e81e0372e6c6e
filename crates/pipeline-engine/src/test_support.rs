//! Scripted stage collaborators for tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

use crate::config::{PipelineConfig, StageConfig, UserPreferences};
use crate::error::{PipelineError, Result};
use crate::stage::{StageExecutor, StageId, StageResult, StageTelemetry};
use crate::state::PipelineState;
use crate::types::{
    AudioAnalysis, CursorEvent, CursorPosition, CursorSummary, EditAction, EditDecision, EditPlan,
    Frame, FrameDescription, FrameExtraction, NarrationScript, NarrationSegment, RenderOutput,
    ScriptPlan, SilenceSegment, TimelineEvent, TimelineSynthesis, Transcript, TranscriptSegment,
    TtsConfig, VideoMetadata,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn new_state() -> PipelineState {
    PipelineState::new(
        "job-1",
        "recordings/demo.mp4",
        PipelineConfig::default(),
        UserPreferences::default(),
    )
}

pub fn frames(count: u32) -> Vec<Frame> {
    (0..count)
        .map(|index| Frame {
            index,
            timestamp: index as f64 * 0.4,
            image_ref: format!("frames/frame_{:04}.jpg", index),
            size: 48_000,
        })
        .collect()
}

/// State with frame extraction already merged.
pub fn state_with_frames(count: u32) -> PipelineState {
    let mut state = new_state();
    state
        .store_frames(FrameExtraction {
            frames: frames(count),
            video_metadata: metadata(count),
        })
        .unwrap();
    state
}

fn metadata(frame_count: u32) -> VideoMetadata {
    VideoMetadata {
        duration_secs: 4.0,
        fps: 30.0,
        width: 1920,
        height: 1080,
        frame_count,
    }
}

/// Telemetry each stage reports, successful or not.
fn telemetry(stage: StageId) -> StageTelemetry {
    let (millis, tokens, cost_usd) = match stage {
        StageId::FrameExtraction => (1000, None, None),
        StageId::CursorDetection => (500, None, None),
        StageId::AudioProcessing => (300, None, Some(0.006)),
        StageId::VisionDescription => (2000, Some(1500), Some(0.02)),
        StageId::EventAnalysis => (800, Some(900), Some(0.01)),
        StageId::ScriptPlanning => (1200, Some(1200), Some(0.015)),
        StageId::Render => (3000, None, None),
        StageId::Intake | StageId::Finalize => (0, None, None),
    };
    StageTelemetry {
        duration: Duration::from_millis(millis),
        tokens,
        cost_usd,
    }
}

#[derive(Debug, Clone, Copy)]
enum Behavior {
    /// Return a failed result
    Fail,
    /// Return `Err`
    Error,
    Panic,
}

/// A [`StageExecutor`] returning fixed results.
///
/// Clones share the call log.
#[derive(Clone)]
pub struct ScriptedExecutor {
    frame_count: u32,
    empty_descriptions: bool,
    empty_edit_plan: bool,
    behaviors: HashMap<StageId, Behavior>,
    delays: HashMap<StageId, Duration>,
    barrier: Option<Arc<Barrier>>,
    calls: Arc<Mutex<Vec<StageId>>>,
}

impl ScriptedExecutor {
    /// Every stage succeeds; 10 frames and a non-empty edit plan.
    pub fn happy_path() -> Self {
        Self {
            frame_count: 10,
            empty_descriptions: false,
            empty_edit_plan: false,
            behaviors: HashMap::new(),
            delays: HashMap::new(),
            barrier: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(mut self, stage: StageId) -> Self {
        self.behaviors.insert(stage, Behavior::Fail);
        self
    }

    pub fn erroring(mut self, stage: StageId) -> Self {
        self.behaviors.insert(stage, Behavior::Error);
        self
    }

    pub fn panicking(mut self, stage: StageId) -> Self {
        self.behaviors.insert(stage, Behavior::Panic);
        self
    }

    pub fn with_frame_count(mut self, frame_count: u32) -> Self {
        self.frame_count = frame_count;
        self
    }

    pub fn with_empty_descriptions(mut self) -> Self {
        self.empty_descriptions = true;
        self
    }

    pub fn with_empty_edit_plan(mut self) -> Self {
        self.empty_edit_plan = true;
        self
    }

    pub fn with_delay(mut self, stage: StageId, delay: Duration) -> Self {
        self.delays.insert(stage, delay);
        self
    }

    /// Cursor detection and audio processing both wait on `barrier`.
    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    /// Stages invoked so far, in call order
    pub fn calls(&self) -> Vec<StageId> {
        self.calls.lock().unwrap().clone()
    }

    pub fn was_called(&self, stage: StageId) -> bool {
        self.calls().contains(&stage)
    }

    async fn respond<T, F>(&self, stage: StageId, payload: F) -> Result<StageResult<T>>
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        self.calls.lock().unwrap().push(stage);

        if let Some(barrier) = &self.barrier {
            if matches!(stage, StageId::CursorDetection | StageId::AudioProcessing) {
                barrier.wait().await;
            }
        }
        if let Some(delay) = self.delays.get(&stage) {
            tokio::time::sleep(*delay).await;
        }

        match self.behaviors.get(&stage) {
            Some(Behavior::Fail) => Ok(StageResult::failed(format!("{} collaborator failed", stage))
                .with_telemetry(telemetry(stage))),
            Some(Behavior::Error) => Err(PipelineError::fault(
                stage.name(),
                "transcoder exited with status 1",
            )),
            Some(Behavior::Panic) => panic!("{} collaborator crashed", stage),
            None => Ok(StageResult::success(payload()).with_telemetry(telemetry(stage))),
        }
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    async fn extract_frames(
        &self,
        _video_ref: &str,
        _config: &StageConfig,
    ) -> Result<StageResult<FrameExtraction>> {
        let count = self.frame_count;
        self.respond(StageId::FrameExtraction, || FrameExtraction {
            frames: frames(count),
            video_metadata: metadata(count),
        })
        .await
    }

    async fn detect_cursor(
        &self,
        frames: &[Frame],
        _config: &StageConfig,
    ) -> Result<StageResult<Vec<CursorEvent>>> {
        self.respond(StageId::CursorDetection, || {
            frames
                .iter()
                .map(|frame| {
                    let detected = frame.index % 3 != 2;
                    CursorEvent {
                        frame_index: frame.index,
                        timestamp: frame.timestamp,
                        detected,
                        position: detected.then_some(CursorPosition {
                            x: 100.0 + frame.index as f64 * 10.0,
                            y: 200.0,
                        }),
                        action_label: (if frame.index % 4 == 0 { "click" } else { "move" })
                            .to_string(),
                    }
                })
                .collect()
        })
        .await
    }

    async fn process_audio(
        &self,
        _video_ref: &str,
        _config: &StageConfig,
    ) -> Result<StageResult<AudioAnalysis>> {
        self.respond(StageId::AudioProcessing, || AudioAnalysis {
            transcript: Transcript {
                segments: vec![
                    TranscriptSegment {
                        start: 0.0,
                        end: 1.8,
                        text: "Open the settings panel".to_string(),
                    },
                    TranscriptSegment {
                        start: 2.5,
                        end: 4.0,
                        text: "and enable dark mode".to_string(),
                    },
                ],
                duration_secs: 4.0,
                language: Some("en".to_string()),
            },
            silence_segments: vec![SilenceSegment {
                start: 1.8,
                end: 2.5,
            }],
        })
        .await
    }

    async fn describe_frames(
        &self,
        frames: &[Frame],
        _cursor_events: &[CursorEvent],
        _config: &StageConfig,
    ) -> Result<StageResult<Vec<FrameDescription>>> {
        let empty = self.empty_descriptions;
        self.respond(StageId::VisionDescription, || {
            if empty {
                return Vec::new();
            }
            frames
                .iter()
                .map(|frame| FrameDescription {
                    frame_index: frame.index,
                    timestamp: frame.timestamp,
                    description: format!("Settings window, step {}", frame.index),
                })
                .collect()
        })
        .await
    }

    async fn synthesize_timeline(
        &self,
        cursor_summary: &CursorSummary,
        _descriptions: &[FrameDescription],
        _transcript: &Transcript,
        _silence_segments: &[SilenceSegment],
        _video_metadata: &VideoMetadata,
    ) -> Result<StageResult<TimelineSynthesis>> {
        let clicks = cursor_summary.actions.get("click").copied().unwrap_or(0);
        self.respond(StageId::EventAnalysis, || TimelineSynthesis {
            event_timeline: vec![
                TimelineEvent {
                    start: 0.0,
                    end: 1.8,
                    event_type: "navigation".to_string(),
                    description: "Opens settings".to_string(),
                },
                TimelineEvent {
                    start: 2.5,
                    end: 4.0,
                    event_type: "configuration".to_string(),
                    description: "Enables dark mode".to_string(),
                },
            ],
            insights: json!({ "clicks": clicks }),
        })
        .await
    }

    async fn plan_script_and_edits(
        &self,
        _event_timeline: &[TimelineEvent],
        _transcript: &Transcript,
        _video_metadata: &VideoMetadata,
        preferences: &UserPreferences,
    ) -> Result<StageResult<ScriptPlan>> {
        let empty = self.empty_edit_plan;
        let style = serde_json::to_value(preferences.narration_style)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        self.respond(StageId::ScriptPlanning, || ScriptPlan {
            narration_script: NarrationScript {
                style,
                segments: vec![NarrationSegment {
                    start: 0.0,
                    end: 4.0,
                    text: "Here is how to enable dark mode.".to_string(),
                }],
                full_script_text: "Here is how to enable dark mode.".to_string(),
            },
            edit_plan: Some(if empty {
                EditPlan::default()
            } else {
                EditPlan {
                    timeline: vec![
                        EditDecision {
                            start: 0.0,
                            end: 1.8,
                            action: EditAction::Keep,
                        },
                        EditDecision {
                            start: 1.8,
                            end: 2.5,
                            action: EditAction::Cut,
                        },
                        EditDecision {
                            start: 2.5,
                            end: 4.0,
                            action: EditAction::Zoom { factor: 1.5 },
                        },
                    ],
                }
            }),
            tts_config: Some(TtsConfig {
                voice: "alloy".to_string(),
                estimated_cost_usd: 0.05,
            }),
        })
        .await
    }

    async fn render_video(
        &self,
        _video_ref: &str,
        edit_plan: &EditPlan,
        _narration_script: &NarrationScript,
        _tts_config: Option<&TtsConfig>,
    ) -> Result<StageResult<RenderOutput>> {
        let cuts = edit_plan.summary().total_cuts;
        self.respond(StageId::Render, || RenderOutput {
            video_ref: "output/tutorial.mp4".to_string(),
            metadata: json!({ "cuts": cuts }),
        })
        .await
    }
}
