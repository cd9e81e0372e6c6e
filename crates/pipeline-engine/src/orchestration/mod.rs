//! Pipeline orchestration.
//!
//! The orchestration layer sequences stages over a [`PipelineGraph`]:
//!
//! - [`StageRunner`] runs one stage and merges its result
//! - [`ForkJoinCoordinator`] runs independent stages in parallel
//! - [`GraphScheduler`] walks the graph and applies routing decisions
//!
//! Routing predicates live in [`routing`] and are pure reads over the state.

pub mod fork_join;
pub mod graph;
pub mod nodes;
pub mod routing;
pub mod runner;
pub mod scheduler;

pub use fork_join::{ForkJoinCoordinator, JoinReport};
pub use graph::{
    NodeId, NodeKind, PipelineGraph, PipelineNode, Route, Router, StopReason, Transition,
};
pub use runner::{StageDisposition, StageOutcome, StagePayload, StageRequest, StageRunner};
pub use scheduler::GraphScheduler;
