//! Engine-wide constants
//!
//! Single source of truth for defaults and graph node identifiers.

/// Default values for pipeline configuration
pub mod defaults {
    /// Root directory under which per-job output directories are created
    pub const OUTPUT_ROOT: &str = "projects";
    /// Name of the per-job output subdirectory
    pub const OUTPUT_SUBDIR: &str = "output";
    /// Maximum number of graph nodes the scheduler will visit in one run
    pub const MAX_STEPS: u32 = 64;
    /// Config file name used by `PipelineConfig::load_from_dir`
    pub const CONFIG_FILE: &str = "pipeline.json";
}

/// Node identifiers of the tutorial pipeline graph
pub mod nodes {
    pub const INTAKE: &str = "intake";
    pub const FRAME_EXTRACTION: &str = "frame_extraction";
    /// Fork/join region running cursor detection and audio processing
    pub const PARALLEL_ANALYSIS: &str = "parallel_analysis";
    pub const VISION_DESCRIPTION: &str = "vision_description";
    pub const EVENT_ANALYSIS: &str = "event_analysis";
    pub const SCRIPT_PLANNING: &str = "script_planning";
    pub const RENDER: &str = "render";
    pub const FINALIZE: &str = "finalize";
}

/// Slot names used in error messages
pub mod slots {
    pub const FRAMES: &str = "frames";
    pub const VIDEO_METADATA: &str = "video_metadata";
    pub const CURSOR_EVENTS: &str = "cursor_events";
    pub const FRAME_DESCRIPTIONS: &str = "frame_descriptions";
    pub const AUDIO_TRANSCRIPT: &str = "audio_transcript";
    pub const SILENCE_SEGMENTS: &str = "silence_segments";
    pub const EVENT_TIMELINE: &str = "event_timeline";
    pub const INSIGHTS: &str = "insights";
    pub const NARRATION_SCRIPT: &str = "narration_script";
    pub const EDIT_PLAN: &str = "edit_plan";
    pub const TTS_CONFIG: &str = "tts_config";
    pub const FINAL_VIDEO: &str = "final_video_ref";
    pub const RENDER_METADATA: &str = "render_metadata";
}
