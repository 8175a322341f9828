//! Parameter lifecycle strategies.
//!
//! A strategy owns the "current" parameter node of one sensor channel and decides how
//! fresh edges reference it:
//!
//! - [`StaticStrategy`]: one node until explicitly replaced
//! - [`TimelyBatchStrategy`]: a fresh node every `batch_size` edges
//! - [`SlidingStrategy`]: a window of edges keeps the live node, older edges have the
//!   parameter baked into their measurement once a loop closure is reported
//! - [`OldSlidingStrategy`]: size-only window, baking as soon as an edge leaves it
//!
//! Replacing a node never mutates the old one, so edges captured in earlier snapshots
//! keep the value they were built with.

use crate::core::{
    EdgeHandle, FactorGraph, Measurement, Node, NodeHandle, ParameterNode,
    ParameterSpecification, ParameterValue,
};
use crate::error::{CalibError, CalibResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub mod old_sliding;
pub mod sliding;
pub mod static_strategy;
pub mod timely_batch;

pub use old_sliding::OldSlidingStrategy;
pub use sliding::SlidingStrategy;
pub use static_strategy::StaticStrategy;
pub use timely_batch::TimelyBatchStrategy;

/// Closed set of strategy kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Static,
    TimelyBatch,
    Sliding,
    OldSliding,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Static => write!(f, "static"),
            StrategyKind::TimelyBatch => write!(f, "timely_batch"),
            StrategyKind::Sliding => write!(f, "sliding"),
            StrategyKind::OldSliding => write!(f, "old_sliding"),
        }
    }
}

/// Lifecycle policy for one calibration parameter.
pub trait CalibrationStrategy: fmt::Debug {
    fn kind(&self) -> StrategyKind;

    /// Logical name shared by every node this strategy creates.
    fn name(&self) -> &str;

    /// The current parameter node.
    fn node(&self) -> &NodeHandle;

    /// Node the next [`attach`](CalibrationStrategy::attach) adds to an edge, if any.
    fn attachment(&self) -> Option<&NodeHandle> {
        Some(self.node())
    }

    /// Attach the current parameter node to a fresh edge of this sensor.
    ///
    /// The edge must not be complete-checked yet; `graph` receives any node the
    /// strategy creates along the way.
    fn attach(&mut self, graph: &mut FactorGraph, edge: &EdgeHandle) -> CalibResult<()>;

    /// Signal that the most recent edge closed a loop.
    fn report_closure(&mut self) {}

    /// Replace the current node with a fresh one holding `value`.
    fn update(&mut self, graph: &mut FactorGraph, value: ParameterValue) -> CalibResult<NodeHandle> {
        let _ = (graph, value);
        Err(CalibError::InvalidInput(format!(
            "{} parameters cannot be updated",
            self.kind()
        )))
    }

    /// Apply the current parameter to a measurement.
    fn compose(&self, measurement: &Measurement, inverse: bool) -> CalibResult<Measurement> {
        with_parameter(self.node(), |parameter| parameter.compose(measurement, inverse))
    }
}

/// Run `f` on the parameter payload of `node`.
pub(crate) fn with_parameter<T>(
    node: &NodeHandle,
    f: impl FnOnce(&ParameterNode) -> CalibResult<T>,
) -> CalibResult<T> {
    let node = node.borrow();
    let parameter = node.as_parameter().ok_or_else(|| {
        CalibError::InvalidInput(format!("node {} is not a parameter", node.id()))
    })?;
    f(parameter)
}

/// Create a parameter node under a fresh id and insert it into `graph`.
pub(crate) fn insert_parameter(
    graph: &mut FactorGraph,
    name: &str,
    specification: ParameterSpecification,
    index: usize,
    value: ParameterValue,
) -> CalibResult<NodeHandle> {
    let parameter = ParameterNode::new(specification, index, value)?;
    let id = graph.allocate_id();
    graph.add_node(Node::parameter(id, name, parameter))
}

/// Insert a copy of `node`'s parameter under a fresh id.
pub(crate) fn renew(graph: &mut FactorGraph, node: &NodeHandle, value: Option<ParameterValue>) -> CalibResult<NodeHandle> {
    let (name, specification, index, current) = {
        let node = node.borrow();
        let parameter = node.as_parameter().ok_or_else(|| {
            CalibError::InvalidInput(format!("node {} is not a parameter", node.id()))
        })?;
        (
            node.name().to_string(),
            parameter.specification(),
            parameter.index(),
            *parameter.value(),
        )
    };
    let renewed = insert_parameter(graph, &name, specification, index, value.unwrap_or(current))?;
    debug!(
        name = %name,
        old = node.borrow().id(),
        new = renewed.borrow().id(),
        "renewed parameter"
    );
    Ok(renewed)
}

pub(crate) fn attach_node(edge: &EdgeHandle, node: &NodeHandle) -> CalibResult<()> {
    edge.borrow_mut().add_node(node.clone())
}

/// Remove `node` from `edge` and fold its forward composition into the measurement.
///
/// The edge keeps the same error as long as the parameter commutes with the edge's
/// residual transformation; in particular a consistent edge stays consistent.
pub(crate) fn bake(edge: &EdgeHandle, node: &NodeHandle) -> CalibResult<()> {
    let id = node.borrow().id();
    let mut edge = edge.borrow_mut();
    let baked = with_parameter(node, |parameter| parameter.compose(edge.measurement(), false))?;
    if edge.remove_parameter(id).is_none() {
        return Err(CalibError::InvalidInput(format!(
            "parameter {id} is not attached to this {} edge",
            edge.kind()
        )));
    }
    edge.set_measurement(baked)?;
    debug!(parameter = id, edge = %edge.kind(), "baked parameter into measurement");
    Ok(())
}
