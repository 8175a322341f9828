//! Shared fixtures for calibration integration tests

#![allow(dead_code)]

use apex_calib::core::{
    Edge, EdgeHandle, FactorGraph, Measurement, Node, NodeHandle, ParameterNode,
    ParameterSpecification, ParameterValue,
};
use apex_calib::factors::EdgeKind;
use apex_calib::manifold::SE2;
use apex_calib::optimizer::LevenbergMarquardt;
use apex_calib::sensor::Sensor;
use apex_calib::{Model, StepPolicy};
use nalgebra::DMatrix;

pub const TOLERANCE: f64 = 1e-9;

/// Straight-line odometry reading of `x` meters.
pub fn forward(x: f64) -> Measurement {
    Measurement::Transformation(SE2::from_xy_angle(x, 0.0, 0.0))
}

/// Model with an `odometry` SE2 sensor and a `gps` point sensor.
pub fn model_with_sensors(policy: StepPolicy) -> Model {
    let mut model = Model::new(
        FactorGraph::new(),
        policy,
        Box::new(LevenbergMarquardt::new()),
    )
    .unwrap();
    model
        .add_sensor(Sensor::new("odometry", DMatrix::identity(3, 3), 11).unwrap())
        .unwrap();
    model
        .add_sensor(Sensor::new("gps", DMatrix::identity(2, 2) * 4.0, 12).unwrap())
        .unwrap();
    model
}

/// Fixed origin at id 0 and a pose at `(x, 0, 0)` with id 1, joined by one
/// pose-pose edge measuring `(1, 0, 0)`.
pub fn two_pose_graph(x: f64) -> FactorGraph {
    let mut graph = FactorGraph::new();
    let mut origin = Node::pose(0, "pose", SE2::identity());
    origin.fix();
    let a = graph.add_node(origin).unwrap();
    let b = graph
        .add_node(Node::pose(1, "pose", SE2::from_xy_angle(x, 0.0, 0.0)))
        .unwrap();
    let mut edge = Edge::new(EdgeKind::PosePose, "odometry", forward(1.0)).unwrap();
    edge.add_node(a).unwrap();
    edge.add_node(b).unwrap();
    graph.add_edge(edge).unwrap();
    graph
}

/// Insert a scalar bias parameter under a fresh id.
pub fn add_bias(graph: &mut FactorGraph, value: f64) -> NodeHandle {
    let parameter =
        ParameterNode::new(ParameterSpecification::Bias, 0, ParameterValue::V1(value)).unwrap();
    let id = graph.allocate_id();
    graph.add_node(Node::parameter(id, "bias", parameter)).unwrap()
}

/// Pose-pose edge between two existing nodes, not yet inserted.
pub fn pose_edge(graph: &FactorGraph, from: usize, to: usize, measurement: Measurement) -> EdgeHandle {
    let edge = Edge::new(EdgeKind::PosePose, "odometry", measurement)
        .unwrap()
        .into_handle();
    edge.borrow_mut()
        .add_node(graph.node(from).unwrap().clone())
        .unwrap();
    edge.borrow_mut()
        .add_node(graph.node(to).unwrap().clone())
        .unwrap();
    edge
}
