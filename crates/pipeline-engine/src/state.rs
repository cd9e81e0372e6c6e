//! Pipeline state threaded through every stage of a run.
//!
//! The scheduler owns the state exclusively for the duration of a run.
//! Each output slot has exactly one writer (its owning stage) and can be
//! written at most once; the setters below enforce that.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{PipelineConfig, UserPreferences};
use crate::constants::{defaults, slots};
use crate::error::{PipelineError, Result};
use crate::stage::{StageId, StageStatus, StageTelemetry};
use crate::types::{
    AudioAnalysis, CursorEvent, EditPlan, Frame, FrameDescription, FrameExtraction,
    NarrationScript, RenderOutput, ScriptPlan, SilenceSegment, TimelineEvent, TimelineSynthesis,
    Transcript, TtsConfig, VideoMetadata,
};

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Processing,
    Complete,
    Error,
}

impl PipelineStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Log entry for one stage invocation.
///
/// This is what the `StageCompleted` event carries to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageId,
    pub status: StageStatus,
    /// Duration reported by the stage
    pub duration: Duration,
    /// Wall-clock time measured around the invocation
    pub wall_time: Duration,
    pub tokens: Option<u64>,
    pub cost_usd: Option<f64>,
    pub error: Option<String>,
}

impl StageRecord {
    pub fn new(
        stage: StageId,
        status: StageStatus,
        telemetry: &StageTelemetry,
        wall_time: Duration,
        error: Option<String>,
    ) -> Self {
        Self {
            stage,
            status,
            duration: telemetry.duration,
            wall_time,
            tokens: telemetry.tokens,
            cost_usd: telemetry.cost_usd,
            error,
        }
    }
}

/// Compact report of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub job_id: String,
    pub status: PipelineStatus,
    pub output_video: Option<String>,
    pub processing_time_secs: f64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub completed_stages: Vec<StageId>,
}

/// Shared, strongly typed record of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    // Identity
    job_id: String,
    video_ref: String,
    output_dir: PathBuf,

    // Progress
    status: PipelineStatus,
    current_stage: String,
    completed_stages: Vec<StageId>,
    finalized: bool,

    // Configuration
    config: PipelineConfig,
    preferences: UserPreferences,

    // frame_extraction
    frames: Option<Vec<Frame>>,
    video_metadata: Option<VideoMetadata>,
    // cursor_detection
    cursor_events: Option<Vec<CursorEvent>>,
    // audio_processing
    audio_transcript: Option<Transcript>,
    silence_segments: Option<Vec<SilenceSegment>>,
    // vision_description
    frame_descriptions: Option<Vec<FrameDescription>>,
    // event_analysis
    event_timeline: Option<Vec<TimelineEvent>>,
    insights: Option<serde_json::Value>,
    // script_planning
    narration_script: Option<NarrationScript>,
    edit_plan: Option<EditPlan>,
    tts_config: Option<TtsConfig>,
    // render
    final_video_ref: Option<String>,
    render_metadata: Option<serde_json::Value>,

    // Aggregates
    processing_time: Duration,
    total_tokens: u64,
    total_cost_usd: f64,
    errors: Vec<String>,
    warnings: Vec<String>,
    stage_log: Vec<StageRecord>,
}

fn ensure_unset<T>(slot: &Option<T>, name: &'static str) -> Result<()> {
    if slot.is_some() {
        return Err(PipelineError::SlotAlreadySet(name));
    }
    Ok(())
}

impl PipelineState {
    /// Create the initial state: all slots unset, aggregates zeroed.
    pub fn new(
        job_id: impl Into<String>,
        video_ref: impl Into<String>,
        config: PipelineConfig,
        preferences: UserPreferences,
    ) -> Self {
        let job_id = job_id.into();
        let output_dir = config
            .output_root
            .join(&job_id)
            .join(defaults::OUTPUT_SUBDIR);

        Self {
            job_id,
            video_ref: video_ref.into(),
            output_dir,
            status: PipelineStatus::Processing,
            current_stage: "initialized".to_string(),
            completed_stages: Vec::new(),
            finalized: false,
            config,
            preferences,
            frames: None,
            video_metadata: None,
            cursor_events: None,
            audio_transcript: None,
            silence_segments: None,
            frame_descriptions: None,
            event_timeline: None,
            insights: None,
            narration_script: None,
            edit_plan: None,
            tts_config: None,
            final_video_ref: None,
            render_metadata: None,
            processing_time: Duration::ZERO,
            total_tokens: 0,
            total_cost_usd: 0.0,
            errors: Vec::new(),
            warnings: Vec::new(),
            stage_log: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn video_ref(&self) -> &str {
        &self.video_ref
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    pub fn is_failed(&self) -> bool {
        self.status == PipelineStatus::Error
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn current_stage(&self) -> &str {
        &self.current_stage
    }

    pub fn completed_stages(&self) -> &[StageId] {
        &self.completed_stages
    }

    pub fn has_completed(&self, stage: StageId) -> bool {
        self.completed_stages.contains(&stage)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn preferences(&self) -> &UserPreferences {
        &self.preferences
    }

    pub fn frames(&self) -> Option<&[Frame]> {
        self.frames.as_deref()
    }

    pub fn video_metadata(&self) -> Option<&VideoMetadata> {
        self.video_metadata.as_ref()
    }

    pub fn cursor_events(&self) -> Option<&[CursorEvent]> {
        self.cursor_events.as_deref()
    }

    pub fn audio_transcript(&self) -> Option<&Transcript> {
        self.audio_transcript.as_ref()
    }

    pub fn silence_segments(&self) -> Option<&[SilenceSegment]> {
        self.silence_segments.as_deref()
    }

    pub fn frame_descriptions(&self) -> Option<&[FrameDescription]> {
        self.frame_descriptions.as_deref()
    }

    pub fn event_timeline(&self) -> Option<&[TimelineEvent]> {
        self.event_timeline.as_deref()
    }

    pub fn insights(&self) -> Option<&serde_json::Value> {
        self.insights.as_ref()
    }

    pub fn narration_script(&self) -> Option<&NarrationScript> {
        self.narration_script.as_ref()
    }

    pub fn edit_plan(&self) -> Option<&EditPlan> {
        self.edit_plan.as_ref()
    }

    pub fn tts_config(&self) -> Option<&TtsConfig> {
        self.tts_config.as_ref()
    }

    pub fn final_video_ref(&self) -> Option<&str> {
        self.final_video_ref.as_deref()
    }

    pub fn render_metadata(&self) -> Option<&serde_json::Value> {
        self.render_metadata.as_ref()
    }

    /// Sum of stage-reported execution times (parallel branches counted
    /// individually).
    pub fn processing_time(&self) -> Duration {
        self.processing_time
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_usd
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn stage_log(&self) -> &[StageRecord] {
        &self.stage_log
    }

    /// True when at least one frame is available.
    pub fn has_frames(&self) -> bool {
        self.frames.as_ref().is_some_and(|f| !f.is_empty())
    }

    /// True when at least one frame description is available.
    pub fn has_descriptions(&self) -> bool {
        self.frame_descriptions
            .as_ref()
            .is_some_and(|d| !d.is_empty())
    }

    /// True when an edit plan with at least one decision is available.
    pub fn has_edit_plan(&self) -> bool {
        self.edit_plan.as_ref().is_some_and(|p| !p.is_empty())
    }

    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            job_id: self.job_id.clone(),
            status: self.status,
            output_video: self.final_video_ref.clone(),
            processing_time_secs: self.processing_time.as_secs_f64(),
            total_tokens: self.total_tokens,
            total_cost_usd: self.total_cost_usd,
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
            completed_stages: self.completed_stages.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Slot writes (one writer per slot, at most once per run)
    // ------------------------------------------------------------------

    pub(crate) fn store_frames(&mut self, extraction: FrameExtraction) -> Result<()> {
        ensure_unset(&self.frames, slots::FRAMES)?;
        ensure_unset(&self.video_metadata, slots::VIDEO_METADATA)?;
        self.frames = Some(extraction.frames);
        self.video_metadata = Some(extraction.video_metadata);
        Ok(())
    }

    pub(crate) fn store_cursor_events(&mut self, events: Vec<CursorEvent>) -> Result<()> {
        ensure_unset(&self.cursor_events, slots::CURSOR_EVENTS)?;
        self.cursor_events = Some(events);
        Ok(())
    }

    pub(crate) fn store_audio(&mut self, audio: AudioAnalysis) -> Result<()> {
        ensure_unset(&self.audio_transcript, slots::AUDIO_TRANSCRIPT)?;
        ensure_unset(&self.silence_segments, slots::SILENCE_SEGMENTS)?;
        self.audio_transcript = Some(audio.transcript);
        self.silence_segments = Some(audio.silence_segments);
        Ok(())
    }

    pub(crate) fn store_descriptions(&mut self, descriptions: Vec<FrameDescription>) -> Result<()> {
        ensure_unset(&self.frame_descriptions, slots::FRAME_DESCRIPTIONS)?;
        self.frame_descriptions = Some(descriptions);
        Ok(())
    }

    pub(crate) fn store_timeline(&mut self, synthesis: TimelineSynthesis) -> Result<()> {
        ensure_unset(&self.event_timeline, slots::EVENT_TIMELINE)?;
        ensure_unset(&self.insights, slots::INSIGHTS)?;
        self.event_timeline = Some(synthesis.event_timeline);
        self.insights = Some(synthesis.insights);
        Ok(())
    }

    /// Store the script plan. The TTS cost estimate is folded into the
    /// run's total cost.
    pub(crate) fn store_script(&mut self, plan: ScriptPlan) -> Result<()> {
        ensure_unset(&self.narration_script, slots::NARRATION_SCRIPT)?;
        ensure_unset(&self.edit_plan, slots::EDIT_PLAN)?;
        ensure_unset(&self.tts_config, slots::TTS_CONFIG)?;
        if let Some(tts) = &plan.tts_config {
            self.add_cost(tts.estimated_cost_usd);
        }
        self.narration_script = Some(plan.narration_script);
        self.edit_plan = plan.edit_plan;
        self.tts_config = plan.tts_config;
        Ok(())
    }

    pub(crate) fn store_render(&mut self, output: RenderOutput) -> Result<()> {
        ensure_unset(&self.final_video_ref, slots::FINAL_VIDEO)?;
        ensure_unset(&self.render_metadata, slots::RENDER_METADATA)?;
        self.final_video_ref = Some(output.video_ref);
        self.render_metadata = Some(output.metadata);
        Ok(())
    }

    /// Fill a non-critical stage's slots with their empty defaults so that
    /// downstream stages never see them unset.
    pub(crate) fn store_default(&mut self, stage: StageId) -> Result<()> {
        match stage {
            StageId::CursorDetection => self.store_cursor_events(Vec::new()),
            StageId::AudioProcessing => self.store_audio(AudioAnalysis::default()),
            other => Err(PipelineError::graph(format!(
                "stage '{}' has no empty default",
                other
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Progress and aggregates
    // ------------------------------------------------------------------

    pub(crate) fn set_current_stage(&mut self, stage: impl Into<String>) {
        self.current_stage = stage.into();
    }

    pub(crate) fn mark_completed(&mut self, stage: StageId) {
        self.completed_stages.push(stage);
        self.current_stage = stage.name().to_string();
    }

    /// Add stage telemetry to the aggregates. Costs below zero are ignored
    /// so totals never decrease.
    pub(crate) fn record_telemetry(&mut self, telemetry: &StageTelemetry) {
        self.processing_time += telemetry.duration;
        self.total_tokens = self
            .total_tokens
            .saturating_add(telemetry.tokens.unwrap_or(0));
        if let Some(cost) = telemetry.cost_usd {
            self.add_cost(cost);
        }
    }

    fn add_cost(&mut self, cost: f64) {
        if cost.is_finite() && cost > 0.0 {
            self.total_cost_usd += cost;
        }
    }

    pub(crate) fn push_record(&mut self, record: StageRecord) {
        self.stage_log.push(record);
    }

    pub(crate) fn record_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Record an error without changing the status.
    pub(crate) fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Record an error and move to the terminal error status.
    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
        self.status = PipelineStatus::Error;
    }

    /// Move from processing to complete. Has no effect once the run failed.
    pub(crate) fn complete(&mut self) {
        if self.status == PipelineStatus::Processing {
            self.status = PipelineStatus::Complete;
        }
    }

    /// Mark the run finalized. Returns false if it already was.
    pub(crate) fn mark_finalized(&mut self) -> bool {
        !std::mem::replace(&mut self.finalized, true)
    }
}
