use super::{attach_node, insert_parameter, renew, CalibrationStrategy, StrategyKind};
use crate::core::{EdgeHandle, FactorGraph, NodeHandle, ParameterSpecification, ParameterValue};
use crate::error::CalibResult;
use tracing::debug;

/// A single parameter node, replaced only on explicit update.
///
/// An invisible parameter is never attached: its distortion is undone directly in the
/// edge measurement, which models a sensor whose calibration is known perfectly.
#[derive(Debug, Clone)]
pub struct StaticStrategy {
    name: String,
    node: NodeHandle,
    visible: bool,
}

impl StaticStrategy {
    pub fn new(
        graph: &mut FactorGraph,
        name: impl Into<String>,
        specification: ParameterSpecification,
        index: usize,
        value: ParameterValue,
    ) -> CalibResult<Self> {
        let name = name.into();
        let node = insert_parameter(graph, &name, specification, index, value)?;
        Ok(StaticStrategy {
            name,
            node,
            visible: true,
        })
    }

    pub fn with_visibility(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

impl CalibrationStrategy for StaticStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Static
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn node(&self) -> &NodeHandle {
        &self.node
    }

    fn attachment(&self) -> Option<&NodeHandle> {
        self.visible.then_some(&self.node)
    }

    fn attach(&mut self, _graph: &mut FactorGraph, edge: &EdgeHandle) -> CalibResult<()> {
        if self.visible {
            return attach_node(edge, &self.node);
        }
        let measurement = *edge.borrow().measurement();
        let undone = self.compose(&measurement, true)?;
        edge.borrow_mut().set_measurement(undone)?;
        debug!(name = %self.name, "undid invisible parameter");
        Ok(())
    }

    fn update(&mut self, graph: &mut FactorGraph, value: ParameterValue) -> CalibResult<NodeHandle> {
        self.node = renew(graph, &self.node, Some(value))?;
        Ok(self.node.clone())
    }
}
