//! Typed stage payloads
//!
//! These are the artifacts the analysis stages hand back to the engine. The
//! engine never inspects them beyond emptiness checks and summaries; their
//! content is owned by the stage collaborators.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single sampled video frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Position in the sampled sequence
    pub index: u32,
    /// Offset into the source video in seconds
    pub timestamp: f64,
    /// Where the frame image lives (path or URI)
    pub image_ref: String,
    /// Encoded image size in bytes
    pub size: u64,
}

/// Properties of the source video reported by frame extraction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub duration_secs: f64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Number of frames actually sampled
    pub frame_count: u32,
}

/// Output of the frame extraction stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameExtraction {
    pub frames: Vec<Frame>,
    pub video_metadata: VideoMetadata,
}

/// Screen-space cursor position in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

/// Cursor observation for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorEvent {
    pub frame_index: u32,
    pub timestamp: f64,
    pub detected: bool,
    #[serde(default)]
    pub position: Option<CursorPosition>,
    /// Inferred action, e.g. "click", "hover", "drag", "move"
    pub action_label: String,
}

/// Condensed view of cursor activity handed to timeline synthesis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CursorSummary {
    pub total_events: usize,
    pub detected_events: usize,
    /// Number of detected events per action label
    pub actions: BTreeMap<String, usize>,
    pub events: Vec<CursorEvent>,
}

impl CursorSummary {
    /// Summarize a list of cursor events.
    pub fn from_events(events: &[CursorEvent]) -> Self {
        let mut actions = BTreeMap::new();
        let mut detected_events = 0;
        for event in events.iter().filter(|e| e.detected) {
            detected_events += 1;
            *actions.entry(event.action_label.clone()).or_insert(0) += 1;
        }
        Self {
            total_events: events.len(),
            detected_events,
            actions,
            events: events.to_vec(),
        }
    }
}

/// A timed span of recognized speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Speech transcript of the recording
///
/// The default value is the empty transcript substituted when audio
/// processing fails or is disabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
    #[serde(default)]
    pub duration_secs: f64,
    #[serde(default)]
    pub language: Option<String>,
}

impl Transcript {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// A stretch of audio below the silence threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SilenceSegment {
    pub start: f64,
    pub end: f64,
}

/// Output of the audio processing stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioAnalysis {
    pub transcript: Transcript,
    pub silence_segments: Vec<SilenceSegment>,
}

/// Vision-model description of one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDescription {
    pub frame_index: u32,
    pub timestamp: f64,
    pub description: String,
}

/// One entry of the cross-modal event timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub start: f64,
    pub end: f64,
    /// Event category, e.g. "navigation", "typing", "idle"
    pub event_type: String,
    pub description: String,
}

/// Output of the event analysis stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineSynthesis {
    pub event_timeline: Vec<TimelineEvent>,
    #[serde(default)]
    pub insights: serde_json::Value,
}

/// One narrated line of the script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Narration to be synthesized over the edited video
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrationScript {
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub segments: Vec<NarrationSegment>,
    #[serde(default)]
    pub full_script_text: String,
}

/// What to do with a span of the source video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditAction {
    Keep,
    Cut,
    Zoom { factor: f64 },
    Highlight { label: String },
    SpeedUp { rate: f64 },
}

/// A single decision of the edit plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditDecision {
    pub start: f64,
    pub end: f64,
    pub action: EditAction,
}

/// Counts of each edit kind in a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditSummary {
    pub total_cuts: usize,
    pub total_zooms: usize,
    pub total_highlights: usize,
    pub total_speed_changes: usize,
}

/// Ordered cut/zoom/highlight decisions consumed by the renderer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditPlan {
    #[serde(default)]
    pub timeline: Vec<EditDecision>,
}

impl EditPlan {
    /// A plan with no decisions has nothing to render.
    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
    }

    pub fn summary(&self) -> EditSummary {
        let mut summary = EditSummary::default();
        for decision in &self.timeline {
            match decision.action {
                EditAction::Keep => {}
                EditAction::Cut => summary.total_cuts += 1,
                EditAction::Zoom { .. } => summary.total_zooms += 1,
                EditAction::Highlight { .. } => summary.total_highlights += 1,
                EditAction::SpeedUp { .. } => summary.total_speed_changes += 1,
            }
        }
        summary
    }
}

/// Text-to-speech settings chosen by the script planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsConfig {
    pub voice: String,
    /// Estimated synthesis cost; added to the run's total cost
    #[serde(default)]
    pub estimated_cost_usd: f64,
}

/// Output of the script planning stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptPlan {
    pub narration_script: NarrationScript,
    #[serde(default)]
    pub edit_plan: Option<EditPlan>,
    #[serde(default)]
    pub tts_config: Option<TtsConfig>,
}

/// Output of the render stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderOutput {
    /// Reference to the encoded tutorial video
    pub video_ref: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}
