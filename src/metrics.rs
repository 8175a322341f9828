//! Consistency metrics against a truth graph.
//!
//! - ATE: root-mean-square translation error over free pose nodes
//! - RPE translation: mean squared translation difference of edge deltas
//! - RPE rotation: mean absolute wrapped heading difference of edge deltas
//! - cost: total Mahalanobis cost
//!
//! Only pose-pose edges contribute to RPE. Every function is read-only.

use crate::core::{Edge, FactorGraph};
use crate::error::{CalibError, CalibResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of scalar graph metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Ate,
    RpeTranslation,
    RpeRotation,
    Cost,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Ate,
        MetricKind::RpeTranslation,
        MetricKind::RpeRotation,
        MetricKind::Cost,
    ];

    /// Whether this metric needs a truth graph.
    pub fn needs_truth(&self) -> bool {
        !matches!(self, MetricKind::Cost)
    }

    /// Evaluate on `graph`; `None` when no element contributes.
    pub fn evaluate(&self, graph: &FactorGraph) -> CalibResult<Option<f64>> {
        match self {
            MetricKind::Cost => graph.cost().map(Some),
            _ => {
                let truth = graph.truth().ok_or(CalibError::MissingTruth)?;
                self.evaluate_against(graph, truth)
            }
        }
    }

    fn evaluate_against(&self, graph: &FactorGraph, truth: &FactorGraph) -> CalibResult<Option<f64>> {
        match self {
            MetricKind::Ate => {
                let errors = squared_translation_errors(graph, truth);
                Ok(mean(&errors).map(f64::sqrt))
            }
            MetricKind::RpeTranslation => {
                let errors = relative_errors(graph, truth)?;
                Ok(mean(&errors.iter().map(|(t, _)| *t).collect::<Vec<_>>()))
            }
            MetricKind::RpeRotation => {
                let errors = relative_errors(graph, truth)?;
                Ok(mean(&errors.iter().map(|(_, r)| *r).collect::<Vec<_>>()))
            }
            MetricKind::Cost => graph.cost().map(Some),
        }
    }

    /// `(timestamp, value)` pairs over the history chain, oldest first.
    ///
    /// Each snapshot is compared with its own truth graph when it has one, otherwise
    /// with the truth of `graph`. Snapshots without a value are skipped.
    pub fn history(&self, graph: &FactorGraph) -> CalibResult<Vec<(f64, f64)>> {
        let fallback = graph.truth();
        if self.needs_truth() && fallback.is_none() {
            return Err(CalibError::MissingTruth);
        }
        let mut series = Vec::new();
        for snapshot in graph.subgraphs() {
            let value = match (self, snapshot.truth().or(fallback)) {
                (MetricKind::Cost, _) => Some(snapshot.cost()?),
                (_, Some(truth)) => self.evaluate_against(snapshot, truth)?,
                (_, None) => return Err(CalibError::MissingTruth),
            };
            if let Some(value) = value {
                series.push((snapshot.timestamp().unwrap_or(0.0), value));
            }
        }
        series.reverse();
        Ok(series)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Ate => write!(f, "ate"),
            MetricKind::RpeTranslation => write!(f, "rpe_translation"),
            MetricKind::RpeRotation => write!(f, "rpe_rotation"),
            MetricKind::Cost => write!(f, "cost"),
        }
    }
}

impl FromStr for MetricKind {
    type Err = CalibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.to_string() == s)
            .ok_or_else(|| CalibError::InvalidInput(format!("unknown metric '{s}'")))
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Per-node squared translation errors of free spatial nodes.
fn squared_translation_errors(graph: &FactorGraph, truth: &FactorGraph) -> Vec<f64> {
    graph
        .nodes()
        .filter_map(|node| {
            let node = node.borrow();
            let reference = truth.node(node.truth().unwrap_or(node.id()))?;
            let reference = reference.borrow();
            node.ate2(&reference)
        })
        .collect()
}

fn truth_edge<'a>(graph_index: usize, edge: &Edge, truth: &'a FactorGraph) -> Option<&'a crate::core::EdgeHandle> {
    match edge.truth() {
        Some(index) => truth.edge(index),
        None => truth
            .edge(graph_index)
            .filter(|candidate| candidate.borrow().is_similar(edge)),
    }
}

/// `(translation², rotation)` per contributing edge.
fn relative_errors(graph: &FactorGraph, truth: &FactorGraph) -> CalibResult<Vec<(f64, f64)>> {
    let mut errors = Vec::new();
    for (index, edge) in graph.edges().iter().enumerate() {
        let edge = edge.borrow();
        let Some(reference) = truth_edge(index, &edge, truth) else {
            continue;
        };
        if let Some(error) = edge.relative_error(&reference.borrow())? {
            errors.push((error.translation2, error.rotation));
        }
    }
    Ok(errors)
}

/// Absolute trajectory error.
pub fn ate(graph: &FactorGraph) -> CalibResult<Option<f64>> {
    MetricKind::Ate.evaluate(graph)
}

/// Mean squared relative translation error.
pub fn rpe_translation(graph: &FactorGraph) -> CalibResult<Option<f64>> {
    MetricKind::RpeTranslation.evaluate(graph)
}

/// Mean absolute relative heading error.
pub fn rpe_rotation(graph: &FactorGraph) -> CalibResult<Option<f64>> {
    MetricKind::RpeRotation.evaluate(graph)
}

/// Error statistics for trajectory comparison.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryError {
    /// Root mean square error
    pub rmse: f64,

    /// Mean error
    pub mean: f64,

    /// Standard deviation
    pub std: f64,

    /// Minimum error
    pub min: f64,

    /// Maximum error
    pub max: f64,

    /// Median error
    pub median: f64,

    /// Number of samples
    pub count: usize,
}

impl TrajectoryError {
    /// Compute statistics from a list of errors.
    pub fn from_errors(errors: &[f64]) -> Self {
        if errors.is_empty() {
            return Self::default();
        }

        let count = errors.len();
        let n = count as f64;

        let mean = errors.iter().sum::<f64>() / n;
        let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt();
        let std = (errors.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n).sqrt();
        let min = errors.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = errors.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let mut sorted = errors.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };

        Self {
            rmse,
            mean,
            std,
            min,
            max,
            median,
            count,
        }
    }

    /// Translation error statistics of the free pose nodes of `graph`.
    pub fn from_graph(graph: &FactorGraph) -> CalibResult<Self> {
        let truth = graph.truth().ok_or(CalibError::MissingTruth)?;
        let errors: Vec<f64> = squared_translation_errors(graph, truth)
            .into_iter()
            .map(f64::sqrt)
            .collect();
        Ok(Self::from_errors(&errors))
    }

    /// Format as a single-line summary.
    pub fn summary(&self) -> String {
        format!(
            "rmse: {:.4}, mean: {:.4}, std: {:.4}, min: {:.4}, max: {:.4}",
            self.rmse, self.mean, self.std, self.min, self.max
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Measurement, Node};
    use crate::factors::EdgeKind;
    use crate::manifold::SE2;
    use std::rc::Rc;

    const TOLERANCE: f64 = 1e-10;

    fn two_pose(second_x: f64) -> FactorGraph {
        let mut graph = FactorGraph::new();
        let mut origin = Node::pose(0, "odom", SE2::identity());
        origin.fix();
        let a = graph.add_node(origin).unwrap();
        let b = graph
            .add_node(Node::pose(1, "odom", SE2::from_xy_angle(second_x, 0.0, 0.0)))
            .unwrap();
        let mut edge = Edge::new(
            EdgeKind::PosePose,
            "odometry",
            Measurement::Transformation(SE2::from_xy_angle(1.0, 0.0, 0.0)),
        )
        .unwrap();
        edge.add_node(a).unwrap();
        edge.add_node(b).unwrap();
        graph.add_edge(edge).unwrap();
        graph
    }

    #[test]
    fn test_metrics_two_pose_scenario() {
        let mut graph = two_pose(1.1);
        graph.assign_truth(Rc::new(two_pose(1.0))).unwrap();
        assert!((ate(&graph).unwrap().unwrap() - 0.1).abs() < TOLERANCE);
        assert!((rpe_translation(&graph).unwrap().unwrap() - 0.01).abs() < TOLERANCE);
        assert!(rpe_rotation(&graph).unwrap().unwrap().abs() < TOLERANCE);
        assert!((MetricKind::Cost.evaluate(&graph).unwrap().unwrap() - 0.01).abs() < TOLERANCE);
    }

    fn pose_and_landmark(point_x: f64) -> FactorGraph {
        let mut graph = FactorGraph::new();
        graph
            .add_node(Node::pose(0, "odom", SE2::from_xy_angle(1.0, 0.0, 0.0)))
            .unwrap();
        graph
            .add_node(Node::point(1, "landmark", nalgebra::Vector2::new(point_x, 0.0)))
            .unwrap();
        graph
    }

    #[test]
    fn test_metrics_ate_includes_landmarks() {
        let mut graph = pose_and_landmark(2.3);
        graph.assign_truth(Rc::new(pose_and_landmark(2.0))).unwrap();
        let expected = (0.09_f64 / 2.0).sqrt();
        assert!((ate(&graph).unwrap().unwrap() - expected).abs() < TOLERANCE);
    }

    #[test]
    fn test_metrics_missing_truth() {
        let graph = two_pose(1.1);
        assert_eq!(ate(&graph), Err(CalibError::MissingTruth));
        assert!(MetricKind::Cost.evaluate(&graph).is_ok());
        assert_eq!(
            MetricKind::Ate.history(&graph),
            Err(CalibError::MissingTruth)
        );
    }

    #[test]
    fn test_metrics_history_is_chronological() {
        let mut graph = two_pose(1.1);
        graph.set_timestamp(0.0).unwrap();
        let truth = Rc::new(two_pose(1.0));
        graph.assign_truth(truth).unwrap();
        let mut snapshot = crate::core::Snapshot::clone_nodes(&graph).unwrap().into_graph();
        snapshot
            .node(1)
            .unwrap()
            .borrow_mut()
            .set_from_vector(&[1.3, 0.0, 0.0])
            .unwrap();
        snapshot.set_timestamp(0.5).unwrap();
        graph.set_previous(Some(Rc::new(snapshot)));
        graph.set_timestamp(1.0).unwrap();

        let series = MetricKind::Ate.history(&graph).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].0, 0.5);
        assert!((series[0].1 - 0.3).abs() < TOLERANCE);
        assert!((series[1].1 - 0.1).abs() < TOLERANCE);
    }

    #[test]
    fn test_metrics_parse_kind() {
        assert_eq!("rpe_rotation".parse::<MetricKind>().unwrap(), MetricKind::RpeRotation);
        assert!("speed".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_trajectory_error_statistics() {
        let stats = TrajectoryError::from_errors(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(stats.count, 4);
        assert!((stats.mean - 0.25).abs() < TOLERANCE);
        assert!((stats.median - 0.25).abs() < TOLERANCE);
        assert!((stats.rmse - (0.3f64 / 4.0).sqrt()).abs() < TOLERANCE);
        assert_eq!(stats.min, 0.1);
        assert_eq!(stats.max, 0.4);
        assert_eq!(TrajectoryError::from_errors(&[]), TrajectoryError::default());
    }
}
