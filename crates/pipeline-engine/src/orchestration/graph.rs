//! Pipeline graph types.
//!
//! A pipeline graph is a chain of nodes from a single intake node to a
//! single finalize node. Each node names its successor either
//! unconditionally or through a router, a pure function over the state
//! that may stop the run early.

use std::collections::HashSet;
use std::fmt;

use super::fork_join::validate_branches;
use super::routing;
use crate::constants::nodes;
use crate::error::{PipelineError, Result};
use crate::stage::StageId;
use crate::state::PipelineState;

/// Unique identifier for a pipeline node.
pub type NodeId = String;

/// Routing predicate evaluated after a node completes.
///
/// Routers only read the state; stop reasons are applied by the scheduler.
pub type Router = fn(&PipelineState) -> Route;

/// Why a router ended the run early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No frames to analyze
    FramesUnavailable,
    /// No frame descriptions to build a timeline from
    DescriptionsUnavailable,
    /// Script planning produced no edit decisions; nothing to render
    EditPlanMissing,
}

impl StopReason {
    /// Stage whose output is missing
    pub fn owner(&self) -> StageId {
        match self {
            Self::FramesUnavailable => StageId::FrameExtraction,
            Self::DescriptionsUnavailable => StageId::VisionDescription,
            Self::EditPlanMissing => StageId::ScriptPlanning,
        }
    }

    /// Whether the stop is a fault rather than a designed soft stop.
    pub fn is_fault(&self) -> bool {
        !matches!(self, Self::EditPlanMissing)
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::FramesUnavailable => "no frames available, pipeline cannot proceed",
            Self::DescriptionsUnavailable => "no frame descriptions available",
            Self::EditPlanMissing => "edit plan is empty, skipping render",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.owner(), self.message())
    }
}

/// Decision returned by a router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Proceed to the transition's target
    Continue,
    /// Skip to finalize
    Stop(StopReason),
}

/// Edge leaving a node
#[derive(Clone)]
pub enum Transition {
    /// Always proceed to the given node
    Next(NodeId),
    /// Proceed to `next` unless `router` stops the run
    Conditional { router: Router, next: NodeId },
    /// Terminal node
    End,
}

impl Transition {
    pub fn conditional(router: Router, next: impl Into<NodeId>) -> Self {
        Self::Conditional {
            router,
            next: next.into(),
        }
    }

    pub fn next(next: impl Into<NodeId>) -> Self {
        Self::Next(next.into())
    }

    /// Target when the run continues normally
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Next(next) | Self::Conditional { next, .. } => Some(next),
            Self::End => None,
        }
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next(next) => f.debug_tuple("Next").field(next).finish(),
            Self::Conditional { next, .. } => f
                .debug_struct("Conditional")
                .field("next", next)
                .finish_non_exhaustive(),
            Self::End => f.write_str("End"),
        }
    }
}

/// What a node does when visited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Start of every run
    Intake,
    /// A single collaborator stage
    Stage(StageId),
    /// Collaborator stages run in parallel, merged in the listed order
    ForkJoin(Vec<StageId>),
    /// Always the last node executed
    Finalize,
}

impl NodeKind {
    /// Stages this node accounts for, in canonical order.
    pub fn stages(&self) -> Vec<StageId> {
        match self {
            Self::Intake => vec![StageId::Intake],
            Self::Stage(stage) => vec![*stage],
            Self::ForkJoin(branches) => branches.clone(),
            Self::Finalize => vec![StageId::Finalize],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Intake => "Intake",
            Self::Stage(_) => "Stage",
            Self::ForkJoin(_) => "Fork/Join",
            Self::Finalize => "Finalize",
        }
    }
}

/// A node in a pipeline graph
#[derive(Debug, Clone)]
pub struct PipelineNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub transition: Transition,
}

impl PipelineNode {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind, transition: Transition) -> Self {
        Self {
            id: id.into(),
            kind,
            transition,
        }
    }
}

/// A pipeline graph: nodes chained from intake to finalize
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    pub id: String,
    nodes: Vec<PipelineNode>,
}

impl PipelineGraph {
    /// Create a new empty graph.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
        }
    }

    /// Add a node.
    pub fn with_node(mut self, node: PipelineNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn nodes(&self) -> &[PipelineNode] {
        &self.nodes
    }

    /// Find a node by its ID.
    pub fn find_node(&self, node_id: &str) -> Option<&PipelineNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Find the intake node.
    pub fn find_entry_node(&self) -> Option<&PipelineNode> {
        self.nodes.iter().find(|n| n.kind == NodeKind::Intake)
    }

    /// Find the finalize node.
    pub fn find_finalize_node(&self) -> Option<&PipelineNode> {
        self.nodes.iter().find(|n| n.kind == NodeKind::Finalize)
    }

    /// The tutorial pipeline:
    ///
    /// `intake → frame_extraction → {cursor_detection, audio_processing} →
    /// vision_description → event_analysis → script_planning → [render] →
    /// finalize`
    pub fn tutorial() -> Self {
        Self::new("tutorial")
            .with_node(PipelineNode::new(
                nodes::INTAKE,
                NodeKind::Intake,
                Transition::next(nodes::FRAME_EXTRACTION),
            ))
            .with_node(PipelineNode::new(
                nodes::FRAME_EXTRACTION,
                NodeKind::Stage(StageId::FrameExtraction),
                Transition::conditional(routing::after_frame_extraction, nodes::PARALLEL_ANALYSIS),
            ))
            .with_node(PipelineNode::new(
                nodes::PARALLEL_ANALYSIS,
                NodeKind::ForkJoin(vec![StageId::CursorDetection, StageId::AudioProcessing]),
                Transition::conditional(routing::after_join, nodes::VISION_DESCRIPTION),
            ))
            .with_node(PipelineNode::new(
                nodes::VISION_DESCRIPTION,
                NodeKind::Stage(StageId::VisionDescription),
                Transition::conditional(routing::after_vision, nodes::EVENT_ANALYSIS),
            ))
            .with_node(PipelineNode::new(
                nodes::EVENT_ANALYSIS,
                NodeKind::Stage(StageId::EventAnalysis),
                Transition::next(nodes::SCRIPT_PLANNING),
            ))
            .with_node(PipelineNode::new(
                nodes::SCRIPT_PLANNING,
                NodeKind::Stage(StageId::ScriptPlanning),
                Transition::conditional(routing::after_script_planning, nodes::RENDER),
            ))
            .with_node(PipelineNode::new(
                nodes::RENDER,
                NodeKind::Stage(StageId::Render),
                Transition::next(nodes::FINALIZE),
            ))
            .with_node(PipelineNode::new(
                nodes::FINALIZE,
                NodeKind::Finalize,
                Transition::End,
            ))
    }

    /// Check that the graph is a single chain from intake to finalize whose
    /// stages follow the canonical stage order.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(PipelineError::graph(format!("duplicate node '{}'", node.id)));
            }
            if let NodeKind::ForkJoin(branches) = &node.kind {
                validate_branches(branches)?;
            }
            if let NodeKind::Stage(stage) = &node.kind {
                if !stage.has_collaborator() {
                    return Err(PipelineError::graph(format!(
                        "node '{}' cannot run control stage '{}'",
                        node.id, stage
                    )));
                }
            }
            let is_finalize = node.kind == NodeKind::Finalize;
            let is_end = matches!(node.transition, Transition::End);
            if is_finalize != is_end {
                return Err(PipelineError::graph(format!(
                    "node '{}': only the finalize node may end the graph",
                    node.id
                )));
            }
        }

        let count = |kind: &NodeKind| self.nodes.iter().filter(|n| &n.kind == kind).count();
        if count(&NodeKind::Intake) != 1 {
            return Err(PipelineError::graph("graph needs exactly one intake node"));
        }
        if count(&NodeKind::Finalize) != 1 {
            return Err(PipelineError::graph("graph needs exactly one finalize node"));
        }

        // Walk the chain: targets must exist, stages must strictly advance
        // through the canonical order, and every node must be on the chain.
        let mut node = self
            .find_entry_node()
            .ok_or_else(|| PipelineError::graph("graph has no intake node"))?;
        let mut visited = HashSet::new();
        let mut last_position = None;
        loop {
            if !visited.insert(node.id.as_str()) {
                return Err(PipelineError::graph(format!("cycle at node '{}'", node.id)));
            }
            for stage in node.kind.stages() {
                let position = stage.position();
                if last_position.is_some_and(|last| position <= last) {
                    return Err(PipelineError::graph(format!(
                        "stage '{}' at node '{}' is out of order",
                        stage, node.id
                    )));
                }
                last_position = Some(position);
            }

            match node.transition.target() {
                Some(target) => {
                    node = self.find_node(target).ok_or_else(|| {
                        PipelineError::graph(format!(
                            "node '{}' points to unknown node '{}'",
                            node.id, target
                        ))
                    })?;
                }
                None => break,
            }
        }

        if visited.len() != self.nodes.len() {
            return Err(PipelineError::graph("graph has unreachable nodes"));
        }
        Ok(())
    }
}
