//! Pipeline Engine - stage orchestration for screen-recording tutorials
//!
//! This crate sequences the analysis stages that turn a raw screen recording
//! into an edited tutorial video. The stages themselves (frame sampling,
//! cursor detection, transcription, vision description, timeline synthesis,
//! script planning, rendering) are external collaborators behind the
//! [`StageExecutor`] trait. This crate owns everything around them:
//!
//! - A strongly typed [`PipelineState`] with write-once output slots
//! - Critical vs non-critical failure handling per stage
//! - A true-parallel fork/join region for cursor detection and audio
//! - A graph scheduler with pure routing predicates
//! - Cost, token and timing aggregation
//!
//! # Architecture
//!
//! - [`PipelineDriver`]: entry point, never fails, returns the final state
//! - [`GraphScheduler`]: walks a [`PipelineGraph`] from intake to finalize
//! - [`ForkJoinCoordinator`]: runs branches on tokio tasks, merges in order
//! - [`StageRunner`]: runs one stage inside a failure boundary
//! - [`EventSink`]: progress events for observers
//!
//! # Example
//!
//! ```ignore
//! use pipeline_engine::{PipelineConfig, PipelineDriver, UserPreferences};
//! use std::sync::Arc;
//!
//! let driver = PipelineDriver::new(Arc::new(my_stages));
//! let state = driver
//!     .execute("job-1", "recording.mp4", PipelineConfig::default(), UserPreferences::default())
//!     .await;
//! println!("{:?}", state.summary());
//! ```

pub mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod events;
pub mod orchestration;
pub mod stage;
pub mod state;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export key types
pub use config::{
    ConfigError, NarrationStyle, Pacing, PipelineConfig, ProcessingOptions, StageConfig,
    UserPreferences,
};
pub use driver::PipelineDriver;
pub use error::{PipelineError, Result};
pub use events::{
    ChannelEventSink, EventError, EventSink, NullEventSink, PipelineEvent, VecEventSink,
};
pub use orchestration::{
    ForkJoinCoordinator, GraphScheduler, JoinReport, NodeKind, PipelineGraph, PipelineNode, Route,
    StageDisposition, StageRunner, StopReason, Transition,
};
pub use stage::{Criticality, StageExecutor, StageId, StageResult, StageStatus, StageTelemetry};
pub use state::{PipelineState, PipelineStatus, PipelineSummary, StageRecord};
