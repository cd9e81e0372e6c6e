//! Error types for the pipeline engine

use thiserror::Error;

/// Result type alias using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur in the pipeline engine
///
/// Stage-level variants never escape a stage boundary: the stage runner turns
/// them into failed stage results. Everything else is a driver fault.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage collaborator reported a fault
    #[error("Stage '{stage}' failed: {message}")]
    StageFault { stage: String, message: String },

    /// A stage was invoked before the slot it reads was populated
    #[error("Missing required input for '{stage}': {slot} is unset")]
    MissingInput { stage: String, slot: String },

    /// A stage collaborator panicked
    #[error("Stage '{stage}' panicked: {message}")]
    StagePanicked { stage: String, message: String },

    /// The stage graph is malformed or cannot be walked
    #[error("Graph error: {0}")]
    Graph(String),

    /// The scheduler exceeded its step budget
    #[error("Execution limit reached ({0} steps)")]
    StepLimit(u32),

    /// A write-once slot was written twice
    #[error("Slot '{0}' is already populated")]
    SlotAlreadySet(&'static str),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Create a stage fault for the named stage
    pub fn fault(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageFault {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create a missing-input error
    pub fn missing_input(stage: impl Into<String>, slot: impl Into<String>) -> Self {
        Self::MissingInput {
            stage: stage.into(),
            slot: slot.into(),
        }
    }

    /// Create a graph error with a message
    pub fn graph(msg: impl Into<String>) -> Self {
        Self::Graph(msg.into())
    }

    /// Human-readable description without the variant prefix, used when the
    /// error is recorded against a stage that is already named.
    pub fn detail(&self) -> String {
        match self {
            Self::StageFault { message, .. } => message.clone(),
            Self::StagePanicked { message, .. } => format!("panicked: {}", message),
            Self::MissingInput { slot, .. } => format!("{} is unset", slot),
            other => other.to_string(),
        }
    }
}
