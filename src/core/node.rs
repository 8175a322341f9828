//! Graph nodes and their payloads.
//!
//! Nodes are shared between edges (and between snapshots that share nodes) through
//! [`NodeHandle`], a reference-counted cell. Edges never own the nodes they connect.

use crate::core::information::InformationNode;
use crate::core::parameter::ParameterNode;
use crate::error::{CalibError, CalibResult};
use crate::manifold::{LieGroup, SE2, SE2Tangent, Tangent};
use nalgebra::{DVector, Vector2};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Node identifier, unique within a graph.
pub type NodeId = usize;

/// Shared, mutable reference to a node.
pub type NodeHandle = Rc<RefCell<Node>>;

/// Runtime kind of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Pose,
    Point,
    Parameter,
    Information,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeKind::Pose => "pose",
            NodeKind::Point => "point",
            NodeKind::Parameter => "parameter",
            NodeKind::Information => "information",
        };
        write!(f, "{label}")
    }
}

/// Value held by a node.
#[derive(Clone, Debug, PartialEq)]
pub enum NodePayload {
    Pose(SE2),
    Point(Vector2<f64>),
    Parameter(ParameterNode),
    Information(InformationNode),
}

/// A graph node.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    id: NodeId,
    name: String,
    timestamp: f64,
    timestep: usize,
    fixed: bool,
    truth: Option<NodeId>,
    payload: NodePayload,
}

impl Node {
    pub fn new(id: NodeId, name: impl Into<String>, payload: NodePayload) -> Self {
        Node {
            id,
            name: name.into(),
            timestamp: 0.0,
            timestep: 0,
            fixed: false,
            truth: None,
            payload,
        }
    }

    pub fn pose(id: NodeId, name: impl Into<String>, pose: SE2) -> Self {
        Node::new(id, name, NodePayload::Pose(pose))
    }

    pub fn point(id: NodeId, name: impl Into<String>, point: Vector2<f64>) -> Self {
        Node::new(id, name, NodePayload::Point(point))
    }

    pub fn parameter(id: NodeId, name: impl Into<String>, parameter: ParameterNode) -> Self {
        Node::new(id, name, NodePayload::Parameter(parameter))
    }

    pub fn information(id: NodeId, name: impl Into<String>, information: InformationNode) -> Self {
        Node::new(id, name, NodePayload::Information(information))
    }

    /// Wrap into a shared handle.
    pub fn into_handle(self) -> NodeHandle {
        Rc::new(RefCell::new(self))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        match self.payload {
            NodePayload::Pose(_) => NodeKind::Pose,
            NodePayload::Point(_) => NodeKind::Point,
            NodePayload::Parameter(_) => NodeKind::Parameter,
            NodePayload::Information(_) => NodeKind::Information,
        }
    }

    /// Whether the node takes part in the spatial (topological) structure.
    pub fn is_spatial(&self) -> bool {
        matches!(self.kind(), NodeKind::Pose | NodeKind::Point)
    }

    pub fn payload(&self) -> &NodePayload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut NodePayload {
        &mut self.payload
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: f64) {
        self.timestamp = timestamp;
    }

    pub fn timestep(&self) -> usize {
        self.timestep
    }

    pub fn set_timestep(&mut self, timestep: usize) {
        self.timestep = timestep;
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Exclude the node from estimation.
    pub fn fix(&mut self) {
        self.fixed = true;
    }

    pub fn set_fixed(&mut self, fixed: bool) {
        self.fixed = fixed;
    }

    pub fn truth(&self) -> Option<NodeId> {
        self.truth
    }

    /// Link this node to its counterpart in a truth graph.
    ///
    /// Reassigning the same id is a no-op; a different id is rejected.
    pub fn assign_truth(&mut self, truth: NodeId) -> CalibResult<()> {
        match self.truth {
            Some(existing) if existing != truth => Err(CalibError::IncompatibleTopology(format!(
                "node {} already has truth {existing}",
                self.id
            ))),
            _ => {
                self.truth = Some(truth);
                Ok(())
            }
        }
    }

    pub fn as_pose(&self) -> Option<&SE2> {
        match &self.payload {
            NodePayload::Pose(pose) => Some(pose),
            _ => None,
        }
    }

    pub fn as_parameter(&self) -> Option<&ParameterNode> {
        match &self.payload {
            NodePayload::Parameter(parameter) => Some(parameter),
            _ => None,
        }
    }

    pub fn as_parameter_mut(&mut self) -> Option<&mut ParameterNode> {
        match &mut self.payload {
            NodePayload::Parameter(parameter) => Some(parameter),
            _ => None,
        }
    }

    pub fn as_information(&self) -> Option<&InformationNode> {
        match &self.payload {
            NodePayload::Information(information) => Some(information),
            _ => None,
        }
    }

    /// Translation of a spatial node.
    pub fn translation(&self) -> Option<Vector2<f64>> {
        match &self.payload {
            NodePayload::Pose(pose) => Some(pose.translation()),
            NodePayload::Point(point) => Some(*point),
            _ => None,
        }
    }

    /// Heading of a pose node.
    pub fn orientation(&self) -> Option<f64> {
        self.as_pose().map(SE2::angle)
    }

    /// Number of estimated components.
    pub fn dim(&self) -> usize {
        match &self.payload {
            NodePayload::Pose(_) => SE2::DOF,
            NodePayload::Point(_) => 2,
            NodePayload::Parameter(parameter) => parameter.dim(),
            NodePayload::Information(information) => information.dim(),
        }
    }

    /// Minimal vector of the payload; poses use the logarithm.
    pub fn to_vector(&self) -> DVector<f64> {
        match &self.payload {
            NodePayload::Pose(pose) => DVector::from_column_slice(pose.log().coeffs().as_slice()),
            NodePayload::Point(point) => DVector::from_column_slice(point.as_slice()),
            NodePayload::Parameter(parameter) => parameter.to_minimal_vector(),
            NodePayload::Information(information) => information.diagonal().clone(),
        }
    }

    /// Overwrite the payload from its minimal vector.
    pub fn set_from_vector(&mut self, values: &[f64]) -> CalibResult<()> {
        if values.len() != self.dim() {
            return Err(CalibError::InvalidInput(format!(
                "node {} needs {} values, got {}",
                self.id,
                self.dim(),
                values.len()
            )));
        }
        match &mut self.payload {
            NodePayload::Pose(pose) => {
                *pose = SE2Tangent::from_components(values[0], values[1], values[2]).exp();
            }
            NodePayload::Point(point) => *point = Vector2::new(values[0], values[1]),
            NodePayload::Parameter(parameter) => parameter.set_from_minimal_vector(values)?,
            NodePayload::Information(information) => information.set_diagonal(values)?,
        }
        Ok(())
    }

    /// Squared translation error against a truth node.
    ///
    /// Only free spatial nodes (poses and points) report an error.
    pub fn ate2(&self, truth: &Node) -> Option<f64> {
        if self.fixed {
            return None;
        }
        let estimate = self.translation()?;
        let reference = truth.translation()?;
        Some((reference - estimate).norm_squared())
    }

    /// Copy of this node with the same id, detached from any truth.
    pub fn detached(&self) -> Node {
        Node {
            truth: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} '{}'", self.kind(), self.id, self.name)?;
        if self.fixed {
            write!(f, " (fixed)")?;
        }
        Ok(())
    }
}
