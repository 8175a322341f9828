use super::{attach_node, insert_parameter, renew, CalibrationStrategy, StrategyKind};
use crate::core::{EdgeHandle, FactorGraph, NodeHandle, ParameterSpecification, ParameterValue};
use crate::error::{CalibError, CalibResult};

/// Static parameter renewed every `batch_size` attachments.
///
/// The renewal happens right after the `batch_size`-th attachment, so `node()` always
/// names the node the next edge will reference. Each renewal inserts a node with the current value under a new id, so no node is
/// ever referenced by more than `batch_size` edges.
#[derive(Debug, Clone)]
pub struct TimelyBatchStrategy {
    name: String,
    node: NodeHandle,
    batch_size: usize,
    attached: usize,
}

impl TimelyBatchStrategy {
    pub fn new(
        graph: &mut FactorGraph,
        name: impl Into<String>,
        specification: ParameterSpecification,
        index: usize,
        value: ParameterValue,
        batch_size: usize,
    ) -> CalibResult<Self> {
        if batch_size == 0 {
            return Err(CalibError::InvalidInput(
                "batch size must be positive".to_string(),
            ));
        }
        let name = name.into();
        let node = insert_parameter(graph, &name, specification, index, value)?;
        Ok(TimelyBatchStrategy {
            name,
            node,
            batch_size,
            attached: 0,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Edges attached to the current node so far.
    pub fn attached(&self) -> usize {
        self.attached
    }
}

impl CalibrationStrategy for TimelyBatchStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TimelyBatch
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn node(&self) -> &NodeHandle {
        &self.node
    }

    fn attach(&mut self, graph: &mut FactorGraph, edge: &EdgeHandle) -> CalibResult<()> {
        attach_node(edge, &self.node)?;
        self.attached += 1;
        if self.attached == self.batch_size {
            self.node = renew(graph, &self.node, None)?;
            self.attached = 0;
        }
        Ok(())
    }

    fn update(&mut self, graph: &mut FactorGraph, value: ParameterValue) -> CalibResult<NodeHandle> {
        self.node = renew(graph, &self.node, Some(value))?;
        self.attached = 0;
        Ok(self.node.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::tests::two_pose_graph;
    use crate::core::{Edge, Measurement, Node};
    use crate::factors::EdgeKind;
    use crate::manifold::SE2;
    use std::collections::HashSet;

    #[test]
    fn test_timely_batch_renews_every_batch() {
        let mut graph = two_pose_graph();
        let mut strategy = TimelyBatchStrategy::new(
            &mut graph,
            "bias",
            ParameterSpecification::Bias,
            2,
            ParameterValue::V1(0.05),
            2,
        )
        .unwrap();

        let mut parameter_ids = Vec::new();
        for i in 0..5 {
            let id = graph.allocate_id();
            graph
                .add_node(Node::pose(id, "odom", SE2::from_xy_angle(i as f64, 0.0, 0.0)))
                .unwrap();
            let edge = Edge::new(
                EdgeKind::PosePose,
                "odometry",
                Measurement::Transformation(SE2::identity()),
            )
            .unwrap()
            .into_handle();
            edge.borrow_mut().add_node(graph.node(1).unwrap().clone()).unwrap();
            edge.borrow_mut().add_node(graph.node(id).unwrap().clone()).unwrap();
            strategy.attach(&mut graph, &edge).unwrap();
            graph.add_edge_handle(edge.clone()).unwrap();
            parameter_ids.push(edge.borrow().parameter_ids()[0]);
        }

        assert_eq!(parameter_ids[0], parameter_ids[1]);
        assert_ne!(parameter_ids[1], parameter_ids[2]);
        assert_eq!(parameter_ids[2], parameter_ids[3]);
        assert_ne!(parameter_ids[3], parameter_ids[4]);
        let distinct: HashSet<_> = parameter_ids.iter().collect();
        assert_eq!(distinct.len(), 3);
        assert_eq!(graph.nodes_of_name("bias").len(), 3);
        assert_eq!(strategy.attached(), 1);
    }

    #[test]
    fn test_timely_batch_renews_right_after_full_batch() {
        let mut graph = two_pose_graph();
        let mut strategy = TimelyBatchStrategy::new(
            &mut graph,
            "bias",
            ParameterSpecification::Bias,
            0,
            ParameterValue::V1(0.05),
            1,
        )
        .unwrap();
        let first = strategy.node().borrow().id();
        let edge = Edge::new(
            EdgeKind::PosePose,
            "odometry",
            Measurement::Transformation(SE2::identity()),
        )
        .unwrap()
        .into_handle();
        edge.borrow_mut().add_node(graph.node(0).unwrap().clone()).unwrap();
        edge.borrow_mut().add_node(graph.node(1).unwrap().clone()).unwrap();
        strategy.attach(&mut graph, &edge).unwrap();

        assert_eq!(edge.borrow().parameter_ids(), vec![first]);
        let renewed = strategy.node().borrow().id();
        assert_ne!(renewed, first);
        assert!(graph.contains_node(renewed));
        assert_eq!(strategy.attached(), 0);
        assert_eq!(
            strategy.attachment().map(|node| node.borrow().id()),
            Some(renewed)
        );
    }

    #[test]
    fn test_timely_batch_rejects_zero_batch() {
        let mut graph = two_pose_graph();
        assert!(TimelyBatchStrategy::new(
            &mut graph,
            "bias",
            ParameterSpecification::Bias,
            0,
            ParameterValue::V1(0.0),
            0
        )
        .is_err());
    }
}
