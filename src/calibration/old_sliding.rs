use super::{attach_node, bake, insert_parameter, CalibrationStrategy, StrategyKind};
use crate::core::{EdgeHandle, FactorGraph, NodeHandle, ParameterSpecification, ParameterValue};
use crate::error::{CalibError, CalibResult};
use std::collections::VecDeque;
use tracing::debug;

/// Size-only sliding window.
///
/// As soon as the window holds more than `window_size` edges the oldest one has the
/// parameter baked in and leaves. Closures are ignored.
#[derive(Debug, Clone)]
pub struct OldSlidingStrategy {
    name: String,
    node: NodeHandle,
    window_size: usize,
    inside: VecDeque<EdgeHandle>,
    out: Vec<EdgeHandle>,
}

impl OldSlidingStrategy {
    pub fn new(
        graph: &mut FactorGraph,
        name: impl Into<String>,
        specification: ParameterSpecification,
        index: usize,
        value: ParameterValue,
        window_size: usize,
    ) -> CalibResult<Self> {
        if window_size == 0 {
            return Err(CalibError::InvalidInput(
                "window size must be positive".to_string(),
            ));
        }
        let name = name.into();
        let node = insert_parameter(graph, &name, specification, index, value)?;
        Ok(OldSlidingStrategy {
            name,
            node,
            window_size,
            inside: VecDeque::new(),
            out: Vec::new(),
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn inside(&self) -> impl Iterator<Item = &EdgeHandle> {
        self.inside.iter()
    }

    pub fn out(&self) -> &[EdgeHandle] {
        &self.out
    }
}

impl CalibrationStrategy for OldSlidingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::OldSliding
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn node(&self) -> &NodeHandle {
        &self.node
    }

    fn attach(&mut self, _graph: &mut FactorGraph, edge: &EdgeHandle) -> CalibResult<()> {
        attach_node(edge, &self.node)?;
        self.inside.push_back(edge.clone());
        while self.inside.len() > self.window_size {
            if let Some(oldest) = self.inside.pop_front() {
                bake(&oldest, &self.node)?;
                self.out.push(oldest);
                debug!(name = %self.name, out = self.out.len(), "baked oldest edge");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Edge, Measurement, Node};
    use crate::factors::EdgeKind;
    use crate::manifold::SE2;
    use std::rc::Rc;

    #[test]
    fn test_old_sliding_bakes_without_closure() {
        let mut graph = FactorGraph::new();
        for i in 0..4 {
            graph
                .add_node(Node::pose(i, "odom", SE2::from_xy_angle(i as f64, 0.0, 0.0)))
                .unwrap();
        }
        let mut strategy = OldSlidingStrategy::new(
            &mut graph,
            "heading",
            ParameterSpecification::Bias,
            2,
            ParameterValue::V1(0.1),
            2,
        )
        .unwrap();
        let edges: Vec<EdgeHandle> = (0..3)
            .map(|i| {
                let edge = Edge::new(
                    EdgeKind::PosePose,
                    "odometry",
                    Measurement::Transformation(SE2::from_xy_angle(1.0, 0.0, 0.0)),
                )
                .unwrap()
                .into_handle();
                edge.borrow_mut().add_node(graph.node(i).unwrap().clone()).unwrap();
                edge.borrow_mut().add_node(graph.node(i + 1).unwrap().clone()).unwrap();
                edge
            })
            .collect();

        strategy.attach(&mut graph, &edges[0]).unwrap();
        strategy.attach(&mut graph, &edges[1]).unwrap();
        assert!(strategy.out().is_empty());
        strategy.attach(&mut graph, &edges[2]).unwrap();

        assert_eq!(strategy.out().len(), 1);
        assert!(Rc::ptr_eq(&strategy.out()[0], &edges[0]));
        assert!(edges[0].borrow().parameters().is_empty());
        let heading = edges[0].borrow().measurement().angle().unwrap();
        assert!((heading - 0.1).abs() < 1e-12);
        assert_eq!(strategy.inside().count(), 2);
    }
}
