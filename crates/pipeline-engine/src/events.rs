//! Event types for streaming pipeline progress
//!
//! Events are sent from the engine to any observer (UI, job store, logs)
//! to report stage progress, branch activity and the final outcome.
//! Delivery is best effort: a failing sink never affects the run.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

use crate::state::{PipelineStatus, StageRecord};
use crate::stage::StageId;

/// Trait for sending pipeline events
///
/// This abstracts over the transport mechanism (channel, job store, etc.)
/// allowing the engine to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: PipelineEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone, thiserror::Error)]
#[error("Event error: {message}")]
pub struct EventError {
    pub message: String,
}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    /// Run started
    #[serde(rename_all = "camelCase")]
    RunStarted {
        job_id: String,
        execution_id: String,
        video_ref: String,
    },

    /// A stage started executing
    #[serde(rename_all = "camelCase")]
    StageStarted {
        stage: StageId,
        execution_id: String,
    },

    /// A stage finished, successfully or not
    #[serde(rename_all = "camelCase")]
    StageCompleted {
        execution_id: String,
        record: StageRecord,
    },

    /// Parallel branches were launched
    #[serde(rename_all = "camelCase")]
    ForkStarted {
        node_id: String,
        execution_id: String,
        branches: Vec<StageId>,
    },

    /// All parallel branches finished and were merged
    #[serde(rename_all = "camelCase")]
    JoinCompleted {
        node_id: String,
        execution_id: String,
        failed_branches: Vec<StageId>,
    },

    /// A routing decision skipped the rest of the work stages
    #[serde(rename_all = "camelCase")]
    RouteShortCircuited {
        node_id: String,
        execution_id: String,
        reason: String,
    },

    /// Run reached finalize
    #[serde(rename_all = "camelCase")]
    RunCompleted {
        job_id: String,
        execution_id: String,
        status: PipelineStatus,
        output_video: Option<String>,
    },

    /// Run aborted on a driver fault
    #[serde(rename_all = "camelCase")]
    RunFailed {
        job_id: String,
        execution_id: String,
        error: String,
    },
}

impl PipelineEvent {
    /// Execution ID carried by every event
    pub fn execution_id(&self) -> &str {
        match self {
            Self::RunStarted { execution_id, .. }
            | Self::StageStarted { execution_id, .. }
            | Self::StageCompleted { execution_id, .. }
            | Self::ForkStarted { execution_id, .. }
            | Self::JoinCompleted { execution_id, .. }
            | Self::RouteShortCircuited { execution_id, .. }
            | Self::RunCompleted { execution_id, .. }
            | Self::RunFailed { execution_id, .. } => execution_id,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: PipelineEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: PipelineEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

/// Event sink forwarding into an unbounded tokio channel
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelEventSink {
    /// Create a sink together with the receiving half of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: PipelineEvent) -> Result<(), EventError> {
        self.sender
            .send(event)
            .map_err(|_| EventError::channel_closed())
    }
}
