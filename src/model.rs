//! Incremental calibration driver.
//!
//! A [`Model`] owns the live graph, the current robot pose and a set of named
//! sensors. Measurements are turned into edges whose parameters are attached by the
//! sensor's strategies before insertion. [`Model::step`] closes a time step: it chains
//! a snapshot of the live graph behind it and advances the timestamp.

use crate::calibration::CalibrationStrategy;
use crate::config::{CalibrationConfig, StrategyConfig};
use crate::core::{
    Edge, EdgeHandle, FactorGraph, Measurement, Node, NodeHandle, NodeId, ParameterValue, Snapshot,
};
use crate::error::{CalibError, CalibResult};
use crate::factors::EdgeKind;
use crate::manifold::{LieGroup, SE2};
use crate::optimizer::Optimizer;
use crate::sensor::Sensor;
use nalgebra::Vector2;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, info, warn};

pub const POSE_NAME: &str = "pose";
pub const POINT_NAME: &str = "point";

/// How [`Model::step`] builds the snapshot of a finished step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPolicy {
    /// Snapshots share node handles with the live graph.
    #[default]
    Plain,
    /// Optimise when a closure was reported during the step; snapshots own their nodes.
    Incremental,
}

pub struct Model {
    graph: FactorGraph,
    sensors: BTreeMap<String, Sensor>,
    current: NodeHandle,
    policy: StepPolicy,
    optimizer: Box<dyn Optimizer>,
    cost_threshold: Option<f64>,
    closure_reported: bool,
}

impl Model {
    /// Start a model with a fixed pose at the origin and timestamp 0.
    pub fn new(
        graph: FactorGraph,
        policy: StepPolicy,
        optimizer: Box<dyn Optimizer>,
    ) -> CalibResult<Self> {
        let mut graph = graph;
        if graph.timestamp().is_none() {
            graph.set_timestamp(0.0)?;
        }
        let id = graph.allocate_id();
        let mut origin = Node::pose(id, POSE_NAME, SE2::identity());
        origin.fix();
        let current = graph.add_node(origin)?;
        Ok(Model {
            graph,
            sensors: BTreeMap::new(),
            current,
            policy,
            optimizer,
            cost_threshold: None,
            closure_reported: false,
        })
    }

    /// Model with the graph tolerance and optimizer of `config`.
    pub fn from_config(config: &CalibrationConfig, policy: StepPolicy) -> CalibResult<Self> {
        let mut model = Model::new(config.new_graph(), policy, Box::new(config.build_optimizer()))?;
        model.cost_threshold = config.optimizer.cost_threshold;
        Ok(model)
    }

    pub fn with_cost_threshold(mut self, cost_threshold: Option<f64>) -> Self {
        self.cost_threshold = cost_threshold;
        self
    }

    pub fn graph(&self) -> &FactorGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut FactorGraph {
        &mut self.graph
    }

    pub fn into_graph(self) -> FactorGraph {
        self.graph
    }

    pub fn policy(&self) -> StepPolicy {
        self.policy
    }

    /// The most recent pose node.
    pub fn current(&self) -> &NodeHandle {
        &self.current
    }

    pub fn current_pose(&self) -> SE2 {
        self.current.borrow().as_pose().copied().unwrap_or_else(SE2::identity)
    }

    pub fn closure_reported(&self) -> bool {
        self.closure_reported
    }

    pub fn sensor(&self, name: &str) -> Option<&Sensor> {
        self.sensors.get(name)
    }

    pub fn sensor_mut(&mut self, name: &str) -> Option<&mut Sensor> {
        self.sensors.get_mut(name)
    }

    fn sensor_entry(&mut self, name: &str) -> CalibResult<&mut Sensor> {
        self.sensors
            .get_mut(name)
            .ok_or_else(|| CalibError::InvalidInput(format!("unknown sensor '{name}'")))
    }

    pub fn add_sensor(&mut self, sensor: Sensor) -> CalibResult<()> {
        if self.sensors.contains_key(sensor.name()) {
            return Err(CalibError::InvalidInput(format!(
                "sensor '{}' already exists",
                sensor.name()
            )));
        }
        debug!(sensor = sensor.name(), "added sensor");
        self.sensors.insert(sensor.name().to_string(), sensor);
        Ok(())
    }

    /// Add a parameter to `sensor` built from a strategy configuration.
    pub fn add_parameter(
        &mut self,
        sensor: &str,
        config: &StrategyConfig,
        name: &str,
        value: ParameterValue,
    ) -> CalibResult<NodeHandle> {
        if !self.sensors.contains_key(sensor) {
            return Err(CalibError::InvalidInput(format!("unknown sensor '{sensor}'")));
        }
        let strategy = config.build(&mut self.graph, name, value)?;
        self.add_strategy(sensor, strategy)
    }

    /// Add an already constructed strategy to `sensor`.
    pub fn add_strategy(
        &mut self,
        sensor: &str,
        strategy: Box<dyn CalibrationStrategy>,
    ) -> CalibResult<NodeHandle> {
        let node = strategy.node().clone();
        self.sensor_entry(sensor)?.add_parameter(strategy);
        Ok(node)
    }

    pub fn update_parameter(
        &mut self,
        sensor: &str,
        name: &str,
        value: ParameterValue,
    ) -> CalibResult<NodeHandle> {
        let sensors = &mut self.sensors;
        let sensor = sensors
            .get_mut(sensor)
            .ok_or_else(|| CalibError::InvalidInput(format!("unknown sensor '{sensor}'")))?;
        sensor.update_parameter(&mut self.graph, name, value)
    }

    /// Build an edge of `kind` from a sensor reading over existing nodes.
    ///
    /// The edge is validated against the graph, parameters included, before the
    /// sensor's strategies see it, so a rejected edge leaves strategies and graph
    /// untouched.
    pub fn add_edge_from_value(
        &mut self,
        sensor: &str,
        kind: EdgeKind,
        ids: &[NodeId],
        measurement: Measurement,
    ) -> CalibResult<EdgeHandle> {
        let nodes = ids
            .iter()
            .map(|id| {
                self.graph
                    .node(*id)
                    .cloned()
                    .ok_or(CalibError::DanglingReference { id: *id })
            })
            .collect::<CalibResult<Vec<_>>>()?;
        let edge = self.build_edge(sensor, kind, nodes, measurement)?;
        self.graph.check_edge(&self.with_attachments(sensor, &edge)?)?;
        self.insert_edge(sensor, edge)
    }

    fn build_edge(
        &self,
        sensor: &str,
        kind: EdgeKind,
        nodes: Vec<NodeHandle>,
        measurement: Measurement,
    ) -> CalibResult<Edge> {
        let sensor = self
            .sensor(sensor)
            .ok_or_else(|| CalibError::InvalidInput(format!("unknown sensor '{sensor}'")))?;
        let mut edge = Edge::with_information(
            kind,
            sensor.name(),
            measurement,
            sensor.information().clone(),
        )?;
        for node in nodes {
            edge.add_node(node)?;
        }
        if !edge.is_complete() {
            return Err(CalibError::IncompleteEdge {
                attached: edge.spatial().len(),
                required: kind.cardinality(),
            });
        }
        Ok(edge)
    }

    /// Copy of `edge` carrying the nodes the sensor's strategies would attach.
    fn with_attachments(&self, sensor: &str, edge: &Edge) -> CalibResult<Edge> {
        let sensor = self
            .sensor(sensor)
            .ok_or_else(|| CalibError::InvalidInput(format!("unknown sensor '{sensor}'")))?;
        let mut trial = edge.clone();
        for node in sensor.attachments() {
            trial.add_node(node)?;
        }
        Ok(trial)
    }

    fn insert_edge(&mut self, sensor: &str, edge: Edge) -> CalibResult<EdgeHandle> {
        let sensors = &mut self.sensors;
        let sensor = sensors
            .get_mut(sensor)
            .ok_or_else(|| CalibError::InvalidInput(format!("unknown sensor '{sensor}'")))?;
        let edge = edge.into_handle();
        sensor.attach(&mut self.graph, &edge)?;
        self.graph.add_edge_handle(edge)
    }

    /// Dead-reckon a new pose from an odometry reading and connect it.
    ///
    /// Pose and edge are both validated before either is inserted.
    pub fn add_odometry(&mut self, sensor: &str, measurement: Measurement) -> CalibResult<NodeHandle> {
        let corrected = self
            .sensor(sensor)
            .ok_or_else(|| CalibError::InvalidInput(format!("unknown sensor '{sensor}'")))?
            .compose(&measurement)?;
        let pose = self.current_pose().compose(&corrected.as_transformation());

        let id = self.graph.allocate_id();
        let node = Node::pose(id, POSE_NAME, pose);
        let pending = node.clone().into_handle();
        let edge = self.build_edge(
            sensor,
            EdgeKind::PosePose,
            vec![self.current.clone(), pending],
            measurement,
        )?;
        self.graph
            .check_edge_with_pending(&self.with_attachments(sensor, &edge)?, &node)?;

        let node = self.graph.add_node(node)?;
        let edge = self.build_edge(
            sensor,
            EdgeKind::PosePose,
            vec![self.current.clone(), node.clone()],
            measurement,
        )?;
        self.insert_edge(sensor, edge)?;
        self.current = node.clone();
        self.closure_reported = false;
        Ok(node)
    }

    pub fn add_point(&mut self, point: Vector2<f64>) -> CalibResult<NodeHandle> {
        let id = self.graph.allocate_id();
        self.graph.add_node(Node::point(id, POINT_NAME, point))
    }

    /// Observe a point from the current pose.
    pub fn add_observation(
        &mut self,
        sensor: &str,
        point: NodeId,
        measurement: Measurement,
    ) -> CalibResult<EdgeHandle> {
        let from = self.current.borrow().id();
        self.add_edge_from_value(sensor, EdgeKind::PosePoint, &[from, point], measurement)
    }

    /// Absolute position reading of the current pose.
    pub fn add_gps(&mut self, sensor: &str, measurement: Measurement) -> CalibResult<EdgeHandle> {
        let from = self.current.borrow().id();
        self.add_edge_from_value(sensor, EdgeKind::PosePrior, &[from], measurement)
    }

    /// Connect the current pose back to an earlier one and report the closure.
    pub fn add_closure(
        &mut self,
        sensor: &str,
        target: NodeId,
        measurement: Measurement,
    ) -> CalibResult<EdgeHandle> {
        let from = self.current.borrow().id();
        let edge = self.add_edge_from_value(sensor, EdgeKind::PosePose, &[from, target], measurement)?;
        self.report_closure();
        Ok(edge)
    }

    /// Tell every sensor parameter that the latest edge closed a loop.
    pub fn report_closure(&mut self) {
        for sensor in self.sensors.values_mut() {
            sensor.report_closure();
        }
        self.closure_reported = true;
        debug!(timestamp = ?self.graph.timestamp(), "closure reported");
    }

    /// Finish the current step and advance the timestamp by `delta`.
    ///
    /// Returns the snapshot chained behind the live graph.
    pub fn step(&mut self, delta: f64) -> CalibResult<Rc<FactorGraph>> {
        let snapshot = match self.policy {
            StepPolicy::Plain => Snapshot::share_nodes(&self.graph),
            StepPolicy::Incremental => {
                if self.closure_reported {
                    match self.graph.optimise(self.optimizer.as_mut(), self.cost_threshold)? {
                        Some(_) => info!(timestamp = ?self.graph.timestamp(), "optimised step"),
                        None => warn!(
                            timestamp = ?self.graph.timestamp(),
                            "optimisation failed, keeping current estimate"
                        ),
                    }
                }
                Snapshot::clone_nodes(&self.graph)?
            }
        };
        let snapshot = self.graph.chain(snapshot);
        self.graph.increment_timestamp(delta)?;
        Ok(snapshot)
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("graph", &self.graph)
            .field("sensors", &self.sensors)
            .field("current", &self.current.borrow().id())
            .field("policy", &self.policy)
            .field("cost_threshold", &self.cost_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::StrategyKind;
    use crate::core::ParameterSpecification;
    use crate::optimizer::LevenbergMarquardt;
    use nalgebra::DMatrix;

    const TOLERANCE: f64 = 1e-9;

    fn model(policy: StepPolicy) -> Model {
        let mut model = Model::new(FactorGraph::new(), policy, Box::new(LevenbergMarquardt::new())).unwrap();
        model
            .add_sensor(Sensor::new("odometry", DMatrix::identity(3, 3), 3).unwrap())
            .unwrap();
        model
            .add_sensor(Sensor::new("gps", DMatrix::identity(2, 2), 4).unwrap())
            .unwrap();
        model
    }

    fn forward() -> Measurement {
        Measurement::Transformation(SE2::from_xy_angle(1.0, 0.0, 0.0))
    }

    #[test]
    fn test_model_starts_at_fixed_origin() {
        let model = model(StepPolicy::Plain);
        assert_eq!(model.graph().num_nodes(), 1);
        assert!(model.current().borrow().is_fixed());
        assert_eq!(model.graph().timestamp(), Some(0.0));
    }

    #[test]
    fn test_model_odometry_applies_parameters() {
        let mut model = model(StepPolicy::Plain);
        let config = StrategyConfig {
            specification: ParameterSpecification::Bias,
            index: 0,
            ..StrategyConfig::default()
        };
        model
            .add_parameter("odometry", &config, "bias", ParameterValue::V1(0.5))
            .unwrap();
        let pose = model.add_odometry("odometry", forward()).unwrap();
        model.add_odometry("odometry", forward()).unwrap();

        let x = pose.borrow().translation().unwrap().x;
        assert!((x - 1.5).abs() < TOLERANCE);
        assert!((model.current_pose().x() - 3.0).abs() < TOLERANCE);
        assert_eq!(model.graph().num_edges(), 2);
        assert!(model.graph().cost().unwrap() < TOLERANCE);
        let edge = model.graph().edge(0).unwrap().borrow();
        assert_eq!(edge.parameters().len(), 1);
        assert_eq!(edge.name(), "odometry");
    }

    #[test]
    fn test_model_dangling_edge_leaves_state_untouched() {
        let mut model = model(StepPolicy::Plain);
        let config = StrategyConfig {
            kind: StrategyKind::TimelyBatch,
            batch_size: 1,
            ..StrategyConfig::default()
        };
        model
            .add_parameter("odometry", &config, "bias", ParameterValue::V1(0.0))
            .unwrap();
        let nodes = model.graph().num_nodes();
        let result = model.add_edge_from_value("odometry", EdgeKind::PosePose, &[0, 42], forward());
        assert_eq!(result.unwrap_err(), CalibError::DanglingReference { id: 42 });
        assert_eq!(model.graph().num_nodes(), nodes);
        assert_eq!(model.graph().num_edges(), 0);
    }

    #[test]
    fn test_model_duplicate_edge_does_not_enter_sliding_window() {
        let mut model = model(StepPolicy::Plain);
        let config = StrategyConfig {
            kind: StrategyKind::Sliding,
            window_size: 2,
            ..StrategyConfig::default()
        };
        model
            .add_parameter("odometry", &config, "bias", ParameterValue::V1(0.0))
            .unwrap();
        let first = model.add_odometry("odometry", forward()).unwrap();
        let ids = [0, first.borrow().id()];

        let duplicate = model.add_edge_from_value("odometry", EdgeKind::PosePose, &ids, forward());
        assert!(matches!(duplicate, Err(CalibError::DuplicateEdge { .. })));
        assert_eq!(model.graph().num_edges(), 1);

        model.add_odometry("odometry", forward()).unwrap();
        model.report_closure();
        model.add_odometry("odometry", forward()).unwrap();

        // e1 only just left the window, so it still references the live parameter
        assert_eq!(model.graph().edge(0).unwrap().borrow().parameters().len(), 1);
        assert_eq!(model.graph().num_edges(), 3);
    }

    #[test]
    fn test_model_rejected_edge_keeps_batch_count() {
        let mut model = model(StepPolicy::Plain);
        let config = StrategyConfig {
            kind: StrategyKind::TimelyBatch,
            batch_size: 2,
            ..StrategyConfig::default()
        };
        let bias = model
            .add_parameter("gps", &config, "gps_bias", ParameterValue::V1(0.0))
            .unwrap();
        model
            .add_gps("gps", Measurement::Translation(Vector2::new(0.0, 0.0)))
            .unwrap();
        let point = model.add_point(Vector2::new(2.0, 0.0)).unwrap();
        let id = point.borrow().id();

        // "gps" already names pose-prior edges
        let rejected = model.add_observation("gps", id, Measurement::Translation(Vector2::new(2.0, 0.0)));
        assert!(matches!(rejected, Err(CalibError::InvalidInput(_))));
        assert_eq!(model.graph().num_edges(), 1);
        let current = model.sensor("gps").unwrap().parameter("gps_bias").unwrap().node().clone();
        assert!(Rc::ptr_eq(&current, &bias));
    }

    #[test]
    fn test_model_rejected_odometry_leaves_no_orphan_pose() {
        let mut model = model(StepPolicy::Plain);
        let mut prior = Edge::new(
            EdgeKind::PosePrior,
            "odometry",
            Measurement::Translation(Vector2::new(0.0, 0.0)),
        )
        .unwrap();
        prior.add_node(model.current().clone()).unwrap();
        model.graph_mut().add_edge(prior).unwrap();
        let nodes = model.graph().num_nodes();
        let origin = model.current().borrow().id();

        assert!(model.add_odometry("odometry", forward()).is_err());
        assert_eq!(model.graph().num_nodes(), nodes);
        assert_eq!(model.graph().num_edges(), 1);
        assert_eq!(model.current().borrow().id(), origin);
    }

    #[test]
    fn test_model_plain_step_chains_shared_snapshot() {
        let mut model = model(StepPolicy::Plain);
        model.add_odometry("odometry", forward()).unwrap();
        let snapshot = model.step(1.0).unwrap();
        assert_eq!(snapshot.timestamp(), Some(0.0));
        assert_eq!(model.graph().timestamp(), Some(1.0));
        assert_eq!(model.graph().previous_depth(), 2);

        let live = model.current().clone();
        let id = live.borrow().id();
        assert!(Rc::ptr_eq(snapshot.node(id).unwrap(), &live));
    }

    #[test]
    fn test_model_gps_and_closure() {
        let mut model = model(StepPolicy::Incremental);
        model.add_odometry("odometry", forward()).unwrap();
        model
            .add_gps("gps", Measurement::Translation(Vector2::new(1.0, 0.0)))
            .unwrap();
        model.add_odometry("odometry", forward()).unwrap();
        model
            .add_closure(
                "odometry",
                0,
                Measurement::Transformation(SE2::from_xy_angle(-2.0, 0.0, 0.0)),
            )
            .unwrap();
        assert!(model.closure_reported());
        assert_eq!(model.graph().num_edges(), 4);

        let snapshot = model.step(1.0).unwrap();
        let id = model.current().borrow().id();
        assert!(!Rc::ptr_eq(snapshot.node(id).unwrap(), model.current()));
        assert!(model.graph().cost().unwrap() < TOLERANCE);
    }

    #[test]
    fn test_model_rejects_unknown_and_duplicate_sensor() {
        let mut model = model(StepPolicy::Plain);
        assert!(model.add_odometry("wheel", forward()).is_err());
        assert!(model
            .add_sensor(Sensor::new("gps", DMatrix::identity(2, 2), 0).unwrap())
            .is_err());
    }
}
