//! Calibration-aware measurement edges.
//!
//! An edge connects an ordered list of spatial endpoints, zero or more parameter nodes
//! (applied in attachment order) and at most one information node. Everything derived
//! from node values (delta, estimate, error, cost) is computed on demand, so it always
//! reflects the current node values.

use crate::core::measurement::Measurement;
use crate::core::node::{Node, NodeHandle, NodeId, NodeKind};
use crate::error::{CalibError, CalibResult};
use crate::factors::{EdgeKind, RelativeError};
use nalgebra::DMatrix;
use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

/// Shared, mutable reference to an edge.
pub type EdgeHandle = Rc<RefCell<Edge>>;

/// A measurement edge.
#[derive(Clone, Debug)]
pub struct Edge {
    kind: EdgeKind,
    name: String,
    spatial: Vec<NodeHandle>,
    parameters: Vec<NodeHandle>,
    information: Option<NodeHandle>,
    measurement: Measurement,
    information_matrix: DMatrix<f64>,
    truth: Option<usize>,
}

impl Edge {
    /// Create an edge without endpoints and with identity information.
    pub fn new(kind: EdgeKind, name: impl Into<String>, measurement: Measurement) -> CalibResult<Self> {
        let dim = kind.dim();
        Edge::with_information(kind, name, measurement, DMatrix::identity(dim, dim))
    }

    /// Create an edge with an explicit information matrix.
    pub fn with_information(
        kind: EdgeKind,
        name: impl Into<String>,
        measurement: Measurement,
        information_matrix: DMatrix<f64>,
    ) -> CalibResult<Self> {
        if measurement.kind() != kind.measurement_kind() {
            return Err(CalibError::InvalidInput(format!(
                "{kind} edge measures {}, got {}",
                kind.measurement_kind(),
                measurement.kind()
            )));
        }
        let dim = kind.dim();
        if information_matrix.nrows() != dim || information_matrix.ncols() != dim {
            return Err(CalibError::InvalidInput(format!(
                "{kind} edge needs a {dim}x{dim} information matrix, got {}x{}",
                information_matrix.nrows(),
                information_matrix.ncols()
            )));
        }
        Ok(Edge {
            kind,
            name: name.into(),
            spatial: Vec::new(),
            parameters: Vec::new(),
            information: None,
            measurement,
            information_matrix,
            truth: None,
        })
    }

    /// Wrap into a shared handle.
    pub fn into_handle(self) -> EdgeHandle {
        Rc::new(RefCell::new(self))
    }

    pub fn kind(&self) -> EdgeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    pub fn set_measurement(&mut self, measurement: Measurement) -> CalibResult<()> {
        if measurement.kind() != self.kind.measurement_kind() {
            return Err(CalibError::InvalidInput(format!(
                "{} edge cannot hold a {} measurement",
                self.kind,
                measurement.kind()
            )));
        }
        self.measurement = measurement;
        Ok(())
    }

    pub fn information_matrix(&self) -> &DMatrix<f64> {
        &self.information_matrix
    }

    pub fn spatial(&self) -> &[NodeHandle] {
        &self.spatial
    }

    pub fn parameters(&self) -> &[NodeHandle] {
        &self.parameters
    }

    pub fn information(&self) -> Option<&NodeHandle> {
        self.information.as_ref()
    }

    pub fn truth(&self) -> Option<usize> {
        self.truth
    }

    /// Link this edge to the edge at `index` in the truth graph.
    pub fn assign_truth(&mut self, index: usize) -> CalibResult<()> {
        match self.truth {
            Some(existing) if existing != index => Err(CalibError::IncompatibleTopology(format!(
                "{} edge already has truth {existing}",
                self.kind
            ))),
            _ => {
                self.truth = Some(index);
                Ok(())
            }
        }
    }

    fn contains(&self, id: NodeId) -> bool {
        self.nodes().any(|node| node.borrow().id() == id)
    }

    /// All attached handles: spatial endpoints, then parameters, then information.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeHandle> {
        self.spatial
            .iter()
            .chain(self.parameters.iter())
            .chain(self.information.iter())
    }

    /// Attached node ids in the same order as [`Edge::nodes`].
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().map(|node| node.borrow().id()).collect()
    }

    pub fn spatial_ids(&self) -> Vec<NodeId> {
        self.spatial.iter().map(|node| node.borrow().id()).collect()
    }

    pub fn parameter_ids(&self) -> Vec<NodeId> {
        self.parameters.iter().map(|node| node.borrow().id()).collect()
    }

    /// Attach a node, routing it by kind to endpoints, parameters or information.
    pub fn add_node(&mut self, node: NodeHandle) -> CalibResult<()> {
        let (id, kind) = {
            let n = node.borrow();
            (n.id(), n.kind())
        };
        if self.contains(id) {
            return Err(CalibError::DuplicateId { id });
        }
        match kind {
            NodeKind::Parameter => self.parameters.push(node),
            NodeKind::Information => {
                let dim = node.borrow().dim();
                if dim != self.kind.dim() {
                    return Err(CalibError::InvalidInput(format!(
                        "information node of dimension {dim} on a {} edge",
                        self.kind
                    )));
                }
                if self.information.is_some() {
                    return Err(CalibError::InvalidInput(format!(
                        "{} edge already has an information node",
                        self.kind
                    )));
                }
                self.information = Some(node);
            }
            NodeKind::Pose | NodeKind::Point => {
                let slot = self.spatial.len();
                let model = self.kind.model();
                if slot >= model.cardinality() {
                    return Err(CalibError::InvalidInput(format!(
                        "{} edge already has {} endpoints",
                        self.kind,
                        model.cardinality()
                    )));
                }
                if model.endpoint_kind(slot) != kind {
                    return Err(CalibError::InvalidInput(format!(
                        "endpoint {slot} of a {} edge must be a {} node, got {kind}",
                        self.kind,
                        model.endpoint_kind(slot)
                    )));
                }
                self.spatial.push(node);
            }
        }
        trace!(edge = %self.kind, node = id, "attached node");
        Ok(())
    }

    /// Detach a parameter node by id.
    pub fn remove_parameter(&mut self, id: NodeId) -> Option<NodeHandle> {
        let position = self
            .parameters
            .iter()
            .position(|node| node.borrow().id() == id)?;
        Some(self.parameters.remove(position))
    }

    /// Whether every spatial endpoint is attached.
    pub fn is_complete(&self) -> bool {
        self.spatial.len() == self.kind.cardinality()
    }

    fn check_complete(&self) -> CalibResult<()> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(CalibError::IncompleteEdge {
                attached: self.spatial.len(),
                required: self.kind.cardinality(),
            })
        }
    }

    /// Measurement implied by the endpoint values, ignoring parameters.
    pub fn delta(&self) -> CalibResult<Measurement> {
        self.check_complete()?;
        let guards: Vec<Ref<'_, Node>> = self.spatial.iter().map(|node| node.borrow()).collect();
        let endpoints: Vec<&Node> = guards.iter().map(|guard| &**guard).collect();
        self.kind.model().delta(&endpoints)
    }

    /// Delta with every attached parameter undone, in attachment order.
    pub fn estimate(&self) -> CalibResult<Measurement> {
        let mut estimate = self.delta()?;
        for node in &self.parameters {
            let node = node.borrow();
            if let Some(parameter) = node.as_parameter() {
                estimate = parameter.compose(&estimate, true)?;
            }
        }
        Ok(estimate)
    }

    /// `estimate ⊖ measurement`, rescaled by an attached information node.
    pub fn error(&self) -> CalibResult<nalgebra::DVector<f64>> {
        let error = self.estimate()?.ominus(&self.measurement)?;
        match &self.information {
            Some(node) => match node.borrow().as_information() {
                Some(information) => information.scale_error(&error),
                None => Ok(error),
            },
            None => Ok(error),
        }
    }

    /// Mahalanobis cost `eᵀ Ω e`.
    pub fn cost(&self) -> CalibResult<f64> {
        let error = self.error()?;
        Ok((error.transpose() * &self.information_matrix * &error)[(0, 0)])
    }

    /// Relative pose error against the corresponding truth edge.
    pub fn relative_error(&self, truth: &Edge) -> CalibResult<Option<RelativeError>> {
        let delta = self.delta()?;
        let truth_delta = truth.delta()?;
        Ok(self.kind.model().relative_error(&delta, &truth_delta))
    }

    /// Latest timestep over the attached nodes.
    pub fn timestep(&self) -> usize {
        self.nodes()
            .map(|node| node.borrow().timestep())
            .max()
            .unwrap_or(0)
    }

    /// Same spatial endpoints (by id and order).
    pub fn is_similar(&self, other: &Edge) -> bool {
        self.spatial_ids() == other.spatial_ids()
    }

    /// Same kind and same attached node ids, parameters and information included.
    pub fn is_equivalent(&self, other: &Edge) -> bool {
        self.kind == other.kind && self.node_ids() == other.node_ids()
    }

    /// Copy of this edge pointing at the handles in `nodes` instead of its own.
    pub fn remapped(&self, nodes: &HashMap<NodeId, NodeHandle>) -> CalibResult<Edge> {
        let remap = |handle: &NodeHandle| -> CalibResult<NodeHandle> {
            let id = handle.borrow().id();
            nodes
                .get(&id)
                .cloned()
                .ok_or(CalibError::DanglingReference { id })
        };
        Ok(Edge {
            kind: self.kind,
            name: self.name.clone(),
            spatial: self.spatial.iter().map(remap).collect::<CalibResult<_>>()?,
            parameters: self.parameters.iter().map(remap).collect::<CalibResult<_>>()?,
            information: self.information.as_ref().map(remap).transpose()?,
            measurement: self.measurement,
            information_matrix: self.information_matrix.clone(),
            truth: self.truth,
        })
    }
}
