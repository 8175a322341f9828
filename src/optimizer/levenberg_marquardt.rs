//! Levenberg-Marquardt algorithm implementation.
//!
//! The Levenberg-Marquardt algorithm interpolates between Gauss-Newton and gradient
//! descent by adding a damping term to the normal equations. This implementation
//! works on the concatenated minimal vector of a graph:
//! - residuals are the edge errors whitened by the Cholesky factor of each edge's
//!   information matrix, so their squared norm is the graph cost
//! - Jacobians are central finite differences over free coordinates
//! - fixed nodes and information nodes are held constant
//! - the normal equations are solved densely with a Cholesky factorization

use crate::core::{FactorGraph, NodeKind, Snapshot};
use crate::error::{CalibError, CalibResult};
use crate::optimizer::{OptimizationStatus, Optimizer, OptimizerConfig};
use nalgebra::{Cholesky, DMatrix, DVector};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Summary statistics for the Levenberg-Marquardt optimization process.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtSummary {
    /// Initial cost value
    pub initial_cost: f64,
    /// Final cost value
    pub final_cost: f64,
    /// Total number of iterations performed
    pub iterations: usize,
    /// Number of successful steps (cost decreased)
    pub successful_steps: usize,
    /// Number of unsuccessful steps (cost increased, damping increased)
    pub unsuccessful_steps: usize,
    /// Final damping parameter value
    pub final_damping: f64,
    /// Number of free coordinates
    pub free_coordinates: usize,
    /// Why the solver stopped
    pub status: OptimizationStatus,
    /// Total time elapsed
    pub total_time: Duration,
}

impl fmt::Display for LevenbergMarquardtSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Levenberg-Marquardt Optimization Summary ===")?;
        writeln!(f, "Initial cost:              {:.6e}", self.initial_cost)?;
        writeln!(f, "Final cost:                {:.6e}", self.final_cost)?;
        writeln!(
            f,
            "Cost reduction:            {:.6e} ({:.2}%)",
            self.initial_cost - self.final_cost,
            100.0 * (self.initial_cost - self.final_cost) / self.initial_cost.max(1e-12)
        )?;
        writeln!(f, "Total iterations:          {}", self.iterations)?;
        writeln!(f, "Successful steps:          {}", self.successful_steps)?;
        writeln!(f, "Unsuccessful steps:        {}", self.unsuccessful_steps)?;
        writeln!(f, "Final damping parameter:   {:.6e}", self.final_damping)?;
        writeln!(f, "Free coordinates:          {}", self.free_coordinates)?;
        writeln!(f, "Status:                    {}", self.status)?;
        write!(f, "Total time:                {:?}", self.total_time)
    }
}

/// Levenberg-Marquardt solver for calibration graphs.
pub struct LevenbergMarquardt {
    config: OptimizerConfig,
    damping_min: f64,
    damping_max: f64,
    damping_increase_factor: f64,
    damping_decrease_factor: f64,
    last_summary: Option<LevenbergMarquardtSummary>,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt solver with default configuration.
    pub fn new() -> Self {
        Self::with_config(OptimizerConfig::default())
    }

    /// Create a new Levenberg-Marquardt solver with the given configuration.
    pub fn with_config(config: OptimizerConfig) -> Self {
        Self {
            config,
            damping_min: 1e-12,
            damping_max: 1e12,
            damping_increase_factor: 10.0,
            damping_decrease_factor: 0.3,
            last_summary: None,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Summary of the most recent run.
    pub fn last_summary(&self) -> Option<&LevenbergMarquardtSummary> {
        self.last_summary.as_ref()
    }

    /// Positions in the graph vector that the solver may change.
    fn free_coordinates(graph: &FactorGraph) -> Vec<usize> {
        let mut free = Vec::new();
        let mut offset = 0;
        for node in graph.nodes() {
            let node = node.borrow();
            let dim = node.dim();
            if !node.is_fixed() && node.kind() != NodeKind::Information {
                free.extend(offset..offset + dim);
            }
            offset += dim;
        }
        free
    }

    /// Whitened residual vector; its squared norm equals the graph cost.
    fn residuals(graph: &FactorGraph) -> CalibResult<DVector<f64>> {
        let mut stacked: Vec<f64> = Vec::new();
        for edge in graph.edges() {
            let edge = edge.borrow();
            let error = edge.error()?;
            let factor = Cholesky::new(edge.information_matrix().clone()).ok_or_else(|| {
                CalibError::InvalidInput(format!(
                    "{} edge has a non positive-definite information matrix",
                    edge.kind()
                ))
            })?;
            let whitened = factor.l().transpose() * error;
            stacked.extend(whitened.iter());
        }
        Ok(DVector::from_vec(stacked))
    }

    fn evaluate(graph: &mut FactorGraph, x: &DVector<f64>) -> CalibResult<DVector<f64>> {
        graph.from_vector(x)?;
        Self::residuals(graph)
    }

    fn jacobian(
        &self,
        graph: &mut FactorGraph,
        x: &DVector<f64>,
        free: &[usize],
        rows: usize,
    ) -> CalibResult<DMatrix<f64>> {
        let h = self.config.jacobian_step;
        let mut jacobian = DMatrix::zeros(rows, free.len());
        let mut shifted = x.clone();
        for (column, index) in free.iter().enumerate() {
            shifted[*index] = x[*index] + h;
            let forward = Self::evaluate(graph, &shifted)?;
            shifted[*index] = x[*index] - h;
            let backward = Self::evaluate(graph, &shifted)?;
            shifted[*index] = x[*index];
            jacobian.set_column(column, &((forward - backward) / (2.0 * h)));
        }
        graph.from_vector(x)?;
        Ok(jacobian)
    }

    /// Minimise the cost of `graph` in place and return the run summary.
    pub fn minimize(&mut self, graph: &mut FactorGraph) -> CalibResult<LevenbergMarquardtSummary> {
        let start = Instant::now();
        let free = Self::free_coordinates(graph);
        let mut x = graph.to_vector();
        let mut residuals = Self::residuals(graph)?;
        let initial_cost = residuals.norm_squared();
        let mut cost = initial_cost;
        let mut damping = self.config.initial_damping;
        let mut iterations = 0;
        let mut successful_steps = 0;
        let mut unsuccessful_steps = 0;

        let mut status = if free.is_empty() || residuals.is_empty() {
            OptimizationStatus::NoFreeVariables
        } else {
            OptimizationStatus::MaxIterationsReached
        };

        while status == OptimizationStatus::MaxIterationsReached
            && iterations < self.config.max_iterations
        {
            iterations += 1;
            let jacobian = self.jacobian(graph, &x, &free, residuals.len())?;
            let gradient = jacobian.transpose() * &residuals;
            if gradient.amax() < self.config.gradient_tolerance {
                status = OptimizationStatus::GradientToleranceReached;
                break;
            }
            let hessian = jacobian.transpose() * &jacobian;

            let mut stepped = false;
            while !stepped {
                let mut damped = hessian.clone();
                for i in 0..damped.nrows() {
                    damped[(i, i)] += damping * hessian[(i, i)].max(1e-9);
                }
                let Some(factor) = Cholesky::new(damped) else {
                    damping *= self.damping_increase_factor;
                    if damping > self.damping_max {
                        status = OptimizationStatus::NumericalFailure;
                        break;
                    }
                    continue;
                };
                let step = factor.solve(&(-&gradient));
                let mut candidate = x.clone();
                for (k, index) in free.iter().enumerate() {
                    candidate[*index] += step[k];
                }
                let candidate_residuals = Self::evaluate(graph, &candidate)?;
                let candidate_cost = candidate_residuals.norm_squared();

                if candidate_cost < cost {
                    successful_steps += 1;
                    stepped = true;
                    let decrease = (cost - candidate_cost) / cost.max(f64::MIN_POSITIVE);
                    x = candidate;
                    residuals = candidate_residuals;
                    cost = candidate_cost;
                    damping = (damping * self.damping_decrease_factor).max(self.damping_min);
                    debug!(iteration = iterations, cost, damping, "accepted step");
                    if decrease < self.config.cost_tolerance {
                        status = OptimizationStatus::CostToleranceReached;
                    } else if step.norm() < self.config.parameter_tolerance {
                        status = OptimizationStatus::ParameterToleranceReached;
                    }
                } else {
                    unsuccessful_steps += 1;
                    graph.from_vector(&x)?;
                    damping *= self.damping_increase_factor;
                    if step.norm() < self.config.parameter_tolerance {
                        status = OptimizationStatus::ParameterToleranceReached;
                        break;
                    }
                    if damping > self.damping_max {
                        status = OptimizationStatus::NumericalFailure;
                        break;
                    }
                }
            }
        }
        graph.from_vector(&x)?;

        let summary = LevenbergMarquardtSummary {
            initial_cost,
            final_cost: cost,
            iterations,
            successful_steps,
            unsuccessful_steps,
            final_damping: damping,
            free_coordinates: free.len(),
            status,
            total_time: start.elapsed(),
        };
        debug!(status = %summary.status, cost = summary.final_cost, "solver finished");
        self.last_summary = Some(summary.clone());
        Ok(summary)
    }
}

impl Optimizer for LevenbergMarquardt {
    fn optimise(
        &mut self,
        graph: &FactorGraph,
        cost_threshold: f64,
    ) -> CalibResult<Option<FactorGraph>> {
        let mut working = Snapshot::clone_nodes(graph)?.into_graph();
        let summary = self.minimize(&mut working)?;
        if summary.final_cost > cost_threshold {
            return Ok(None);
        }
        Ok(Some(working))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Edge, Measurement, Node, ParameterNode, ParameterSpecification, ParameterValue};
    use crate::factors::EdgeKind;
    use crate::manifold::SE2;
    use nalgebra::Vector2;

    const TOLERANCE: f64 = 1e-6;

    fn odometry(graph: &mut FactorGraph, from: usize, to: usize, x: f64) {
        let mut edge = Edge::new(
            EdgeKind::PosePose,
            "odometry",
            Measurement::Transformation(SE2::from_xy_angle(x, 0.0, 0.0)),
        )
        .unwrap();
        edge.add_node(graph.node(from).unwrap().clone()).unwrap();
        edge.add_node(graph.node(to).unwrap().clone()).unwrap();
        graph.add_edge(edge).unwrap();
    }

    #[test]
    fn test_levenberg_marquardt_recovers_chain() {
        let mut graph = FactorGraph::new();
        let mut origin = Node::pose(0, "odom", SE2::identity());
        origin.fix();
        graph.add_node(origin).unwrap();
        graph
            .add_node(Node::pose(1, "odom", SE2::from_xy_angle(1.3, 0.2, 0.1)))
            .unwrap();
        graph
            .add_node(Node::pose(2, "odom", SE2::from_xy_angle(1.7, -0.3, 0.0)))
            .unwrap();
        odometry(&mut graph, 0, 1, 1.0);
        odometry(&mut graph, 1, 2, 1.0);

        let mut solver = LevenbergMarquardt::new();
        let solution = solver.optimise(&graph, 1e-8).unwrap().unwrap();
        let last = solution.node(2).unwrap().borrow().translation().unwrap();
        assert!((last - Vector2::new(2.0, 0.0)).norm() < TOLERANCE);
        assert!(graph.cost().unwrap() > 0.1);
        assert!(solver.last_summary().unwrap().final_cost < 1e-8);
    }

    #[test]
    fn test_levenberg_marquardt_reports_unreachable_threshold() {
        let mut graph = FactorGraph::new();
        let mut a = Node::pose(0, "odom", SE2::identity());
        let mut b = Node::pose(1, "odom", SE2::from_xy_angle(2.0, 0.0, 0.0));
        a.fix();
        b.fix();
        graph.add_node(a).unwrap();
        graph.add_node(b).unwrap();
        odometry(&mut graph, 0, 1, 1.0);

        let mut solver = LevenbergMarquardt::new();
        assert!(solver.optimise(&graph, 0.5).unwrap().is_none());
        assert_eq!(
            solver.last_summary().unwrap().status,
            OptimizationStatus::NoFreeVariables
        );
        assert!(solver.optimise(&graph, f64::INFINITY).unwrap().is_some());
    }

    #[test]
    fn test_levenberg_marquardt_estimates_bias() {
        let mut graph = FactorGraph::new();
        let mut a = Node::pose(0, "odom", SE2::identity());
        let mut b = Node::pose(1, "odom", SE2::from_xy_angle(1.0, 0.0, 0.0));
        a.fix();
        b.fix();
        graph.add_node(a).unwrap();
        graph.add_node(b).unwrap();
        let parameter =
            ParameterNode::new(ParameterSpecification::Bias, 0, ParameterValue::V1(0.0)).unwrap();
        let bias = graph.add_node(Node::parameter(2, "bias", parameter)).unwrap();
        let mut edge = Edge::new(
            EdgeKind::PosePose,
            "odometry",
            Measurement::Transformation(SE2::from_xy_angle(0.8, 0.0, 0.0)),
        )
        .unwrap();
        edge.add_node(graph.node(0).unwrap().clone()).unwrap();
        edge.add_node(graph.node(1).unwrap().clone()).unwrap();
        edge.add_node(bias).unwrap();
        graph.add_edge(edge).unwrap();

        let mut solver = LevenbergMarquardt::new();
        let solution = solver.optimise(&graph, 1e-8).unwrap().unwrap();
        let value = solution.node(2).unwrap().borrow().to_vector();
        assert!((value[0] - 0.2).abs() < TOLERANCE);
    }
}
