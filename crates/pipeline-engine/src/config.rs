//! Pipeline configuration
//!
//! Per-stage configuration is opaque to the engine: each stage receives the
//! JSON value stored under its name and interprets it itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::constants::defaults;
use crate::stage::StageId;

/// Opaque configuration handed to a single stage
pub type StageConfig = serde_json::Value;

/// Configuration for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Stage name -> stage configuration
    #[serde(default)]
    pub stages: HashMap<String, StageConfig>,
    /// Directory under which `<job_id>/output` is created
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Run the cursor detection branch
    #[serde(default = "default_true")]
    pub enable_cursor_detection: bool,
    /// Run the audio processing branch
    #[serde(default = "default_true")]
    pub enable_audio_analysis: bool,
}

fn default_output_root() -> PathBuf {
    PathBuf::from(defaults::OUTPUT_ROOT)
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: HashMap::new(),
            output_root: default_output_root(),
            enable_cursor_detection: true,
            enable_audio_analysis: true,
        }
    }
}

impl PipelineConfig {
    /// Configuration for a stage, `Null` when none was provided.
    pub fn stage(&self, stage: StageId) -> StageConfig {
        self.stages
            .get(stage.name())
            .cloned()
            .unwrap_or(StageConfig::Null)
    }

    /// Set the configuration for a stage.
    pub fn with_stage(mut self, stage: StageId, config: StageConfig) -> Self {
        self.stages.insert(stage.name().to_string(), config);
        self
    }

    /// Whether the given stage should run at all.
    ///
    /// Only non-critical stages can be switched off.
    pub fn is_enabled(&self, stage: StageId) -> bool {
        match stage {
            StageId::CursorDetection => self.enable_cursor_detection,
            StageId::AudioProcessing => self.enable_audio_analysis,
            _ => true,
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the default configuration.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No pipeline config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await.map_err(ConfigError::Io)?;

        serde_json::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Load `pipeline.json` from a directory.
    pub async fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        Self::load(&dir.join(defaults::CONFIG_FILE)).await
    }

    /// Save configuration to a JSON file, creating parent directories.
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(ConfigError::Io)?;
        }

        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        fs::write(path, contents).await.map_err(ConfigError::Io)?;

        log::info!("Pipeline configuration saved to {:?}", path);
        Ok(())
    }
}

/// Narration tone requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrationStyle {
    #[default]
    Professional,
    Casual,
    Technical,
}

/// Editing pace requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    Slow,
    #[default]
    Medium,
    Fast,
}

/// User preferences forwarded to script planning
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub narration_style: NarrationStyle,
    /// Keep the original voice track under the narration
    #[serde(default)]
    pub keep_original_audio: bool,
    /// Add background music
    #[serde(default)]
    pub music: bool,
    #[serde(default)]
    pub pacing: Pacing,
}

/// Flat processing options as accepted from a CLI or web request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    /// Frames per second to sample
    pub fps: Option<f64>,
    /// Upper bound on sampled frames
    pub max_frames: Option<u32>,
    /// Describe every n-th frame
    pub vision_sample_rate: Option<u32>,
    #[serde(default)]
    pub narration_style: NarrationStyle,
    #[serde(default)]
    pub keep_original_audio: bool,
    #[serde(default)]
    pub music: bool,
    #[serde(default)]
    pub pacing: Pacing,
    #[serde(default = "default_true")]
    pub enable_cursor_detection: bool,
    #[serde(default = "default_true")]
    pub enable_audio_analysis: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            fps: None,
            max_frames: None,
            vision_sample_rate: None,
            narration_style: NarrationStyle::default(),
            keep_original_audio: false,
            music: false,
            pacing: Pacing::default(),
            enable_cursor_detection: true,
            enable_audio_analysis: true,
        }
    }
}

impl ProcessingOptions {
    /// Split the options into stage configuration and user preferences.
    pub fn into_parts(self) -> (PipelineConfig, UserPreferences) {
        let config = PipelineConfig {
            enable_cursor_detection: self.enable_cursor_detection,
            enable_audio_analysis: self.enable_audio_analysis,
            ..PipelineConfig::default()
        }
        .with_stage(
            StageId::FrameExtraction,
            serde_json::json!({ "fps": self.fps, "max_frames": self.max_frames }),
        )
        .with_stage(
            StageId::VisionDescription,
            serde_json::json!({ "sample_rate": self.vision_sample_rate }),
        );

        let preferences = UserPreferences {
            narration_style: self.narration_style,
            keep_original_audio: self.keep_original_audio,
            music: self.music,
            pacing: self.pacing,
        };

        (config, preferences)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.output_root, PathBuf::from("projects"));
        assert!(config.is_enabled(StageId::CursorDetection));
        assert_eq!(config.stage(StageId::Render), StageConfig::Null);
    }

    #[test]
    fn test_critical_stages_cannot_be_disabled() {
        let config = PipelineConfig {
            enable_cursor_detection: false,
            enable_audio_analysis: false,
            ..PipelineConfig::default()
        };
        assert!(!config.is_enabled(StageId::CursorDetection));
        assert!(!config.is_enabled(StageId::AudioProcessing));
        assert!(config.is_enabled(StageId::FrameExtraction));
        assert!(config.is_enabled(StageId::Render));
    }

    #[test]
    fn test_processing_options_into_parts() {
        let options = ProcessingOptions {
            fps: Some(2.5),
            max_frames: Some(500),
            vision_sample_rate: Some(5),
            narration_style: NarrationStyle::Technical,
            pacing: Pacing::Fast,
            enable_audio_analysis: false,
            ..ProcessingOptions::default()
        };

        let (config, preferences) = options.into_parts();
        assert_eq!(config.stage(StageId::FrameExtraction)["fps"], 2.5);
        assert_eq!(config.stage(StageId::FrameExtraction)["max_frames"], 500);
        assert_eq!(config.stage(StageId::VisionDescription)["sample_rate"], 5);
        assert!(!config.enable_audio_analysis);
        assert_eq!(preferences.narration_style, NarrationStyle::Technical);
        assert_eq!(preferences.pacing, Pacing::Fast);
    }

    #[test]
    fn test_preferences_serialization() {
        let prefs: UserPreferences =
            serde_json::from_str(r#"{"narration_style":"casual","music":true}"#).unwrap();
        assert_eq!(prefs.narration_style, NarrationStyle::Casual);
        assert!(prefs.music);
        assert_eq!(prefs.pacing, Pacing::Medium);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pipeline.json");

        let config = PipelineConfig::default()
            .with_stage(StageId::CursorDetection, serde_json::json!({"threshold": 0.7}));
        config.save(&path).await.unwrap();

        let loaded = PipelineConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = PipelineConfig::load_from_dir(dir.path()).await.unwrap();
        assert_eq!(loaded, PipelineConfig::default());
    }

    #[tokio::test]
    async fn test_load_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = PipelineConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
