//! Stage identity and the stage result contract.
//!
//! Every analysis stage is an opaque collaborator behind [`StageExecutor`].
//! Whatever a collaborator does internally (transcoding, model inference,
//! LLM calls, retries), it reports back through a single [`StageResult`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::{StageConfig, UserPreferences};
use crate::error::Result;
use crate::types::{
    AudioAnalysis, CursorEvent, CursorSummary, EditPlan, Frame, FrameDescription,
    FrameExtraction, NarrationScript, RenderOutput, ScriptPlan, SilenceSegment, TimelineEvent,
    TimelineSynthesis, Transcript, TtsConfig, VideoMetadata,
};

/// The stages of the tutorial pipeline, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Intake,
    FrameExtraction,
    CursorDetection,
    AudioProcessing,
    VisionDescription,
    EventAnalysis,
    ScriptPlanning,
    Render,
    Finalize,
}

/// Whether a stage failure stops the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Failure sets the run status to error
    Critical,
    /// Failure degrades to an empty default and the run continues
    NonCritical,
}

impl StageId {
    /// All stages in DAG order. The fork branches share a position; the
    /// order listed here is their merge order.
    pub const CANONICAL_ORDER: [StageId; 9] = [
        StageId::Intake,
        StageId::FrameExtraction,
        StageId::CursorDetection,
        StageId::AudioProcessing,
        StageId::VisionDescription,
        StageId::EventAnalysis,
        StageId::ScriptPlanning,
        StageId::Render,
        StageId::Finalize,
    ];

    /// Stable snake_case name used in logs, errors and configuration keys.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::FrameExtraction => "frame_extraction",
            Self::CursorDetection => "cursor_detection",
            Self::AudioProcessing => "audio_processing",
            Self::VisionDescription => "vision_description",
            Self::EventAnalysis => "event_analysis",
            Self::ScriptPlanning => "script_planning",
            Self::Render => "render",
            Self::Finalize => "finalize",
        }
    }

    /// Look a stage up by its name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::CANONICAL_ORDER
            .iter()
            .copied()
            .find(|stage| stage.name() == name)
    }

    pub fn criticality(&self) -> Criticality {
        match self {
            Self::CursorDetection | Self::AudioProcessing => Criticality::NonCritical,
            _ => Criticality::Critical,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.criticality() == Criticality::Critical
    }

    /// Position in [`Self::CANONICAL_ORDER`].
    pub fn position(&self) -> usize {
        Self::CANONICAL_ORDER
            .iter()
            .position(|stage| stage == self)
            .unwrap_or(usize::MAX)
    }

    /// Whether the stage is driven by a [`StageExecutor`] collaborator
    /// rather than being a built-in control step.
    pub fn has_collaborator(&self) -> bool {
        !matches!(self, Self::Intake | Self::Finalize)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome status reported by a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failed,
}

/// Cost and timing reported by a stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTelemetry {
    /// Execution time as measured by the stage itself
    pub duration: Duration,
    pub tokens: Option<u64>,
    pub cost_usd: Option<f64>,
}

/// Uniform envelope returned by every stage invocation.
///
/// `payload` is only meaningful on success, `error` only on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult<T> {
    pub status: StageStatus,
    pub payload: Option<T>,
    pub telemetry: StageTelemetry,
    pub error: Option<String>,
}

impl<T> StageResult<T> {
    /// Create a successful result.
    pub fn success(payload: T) -> Self {
        Self {
            status: StageStatus::Success,
            payload: Some(payload),
            telemetry: StageTelemetry::default(),
            error: None,
        }
    }

    /// Create a failed result.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            payload: None,
            telemetry: StageTelemetry::default(),
            error: Some(error.into()),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.telemetry.duration = duration;
        self
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.telemetry.tokens = Some(tokens);
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.telemetry.cost_usd = Some(cost_usd);
        self
    }

    pub fn with_telemetry(mut self, telemetry: StageTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }

    /// Transform the payload, keeping status, telemetry and error.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageResult<U> {
        StageResult {
            status: self.status,
            payload: self.payload.map(f),
            telemetry: self.telemetry,
            error: self.error,
        }
    }
}

/// External collaborators that implement the analysis stages.
///
/// The engine calls each method at most once per run and never retries;
/// timeouts and retries are the collaborator's business. Returning `Err`
/// or panicking is treated the same as returning a failed [`StageResult`].
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Sample frames from the source video.
    async fn extract_frames(
        &self,
        video_ref: &str,
        config: &StageConfig,
    ) -> Result<StageResult<FrameExtraction>>;

    /// Locate the cursor and infer actions for each frame.
    async fn detect_cursor(
        &self,
        frames: &[Frame],
        config: &StageConfig,
    ) -> Result<StageResult<Vec<CursorEvent>>>;

    /// Transcribe speech and find silent stretches.
    async fn process_audio(
        &self,
        video_ref: &str,
        config: &StageConfig,
    ) -> Result<StageResult<AudioAnalysis>>;

    /// Describe what is on screen, using cursor events as hints.
    async fn describe_frames(
        &self,
        frames: &[Frame],
        cursor_events: &[CursorEvent],
        config: &StageConfig,
    ) -> Result<StageResult<Vec<FrameDescription>>>;

    /// Merge all modalities into one event timeline.
    async fn synthesize_timeline(
        &self,
        cursor_summary: &CursorSummary,
        descriptions: &[FrameDescription],
        transcript: &Transcript,
        silence_segments: &[SilenceSegment],
        video_metadata: &VideoMetadata,
    ) -> Result<StageResult<TimelineSynthesis>>;

    /// Write the narration script and the edit plan.
    async fn plan_script_and_edits(
        &self,
        event_timeline: &[TimelineEvent],
        transcript: &Transcript,
        video_metadata: &VideoMetadata,
        preferences: &UserPreferences,
    ) -> Result<StageResult<ScriptPlan>>;

    /// Apply the edit plan and narration to produce the final video.
    async fn render_video(
        &self,
        video_ref: &str,
        edit_plan: &EditPlan,
        narration_script: &NarrationScript,
        tts_config: Option<&TtsConfig>,
    ) -> Result<StageResult<RenderOutput>>;
}
