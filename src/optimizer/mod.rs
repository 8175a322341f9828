//! Optimizer boundary for calibration graphs.
//!
//! The graph hands its live state to an [`Optimizer`] together with a cost threshold.
//! The optimizer works on its own copy and either returns an improved graph whose cost
//! is at or below the threshold, or `None`. Retry and revert policy lives on
//! [`crate::core::FactorGraph::optimise`], not here.
//!
//! [`LevenbergMarquardt`] is a dense damped least-squares solver over the free node
//! coordinates, suitable for the small windows calibration runs work with.

use crate::core::FactorGraph;
use crate::error::CalibResult;
use serde::Deserialize;
use std::fmt;

pub mod levenberg_marquardt;

pub use levenberg_marquardt::{LevenbergMarquardt, LevenbergMarquardtSummary};

/// Black-box graph optimizer.
pub trait Optimizer {
    /// Optimise a copy of `graph`.
    ///
    /// Returns `Ok(None)` when no solution with cost at or below `cost_threshold` was
    /// found. The input graph is never modified.
    fn optimise(&mut self, graph: &FactorGraph, cost_threshold: f64)
        -> CalibResult<Option<FactorGraph>>;
}

/// Solver settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Relative cost decrease below which the solver stops
    pub cost_tolerance: f64,
    /// Step norm below which the solver stops
    pub parameter_tolerance: f64,
    /// Gradient max-norm below which the solver stops
    pub gradient_tolerance: f64,
    /// Initial damping
    pub initial_damping: f64,
    /// Finite difference step for Jacobians
    pub jacobian_step: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            cost_tolerance: 1e-10,
            parameter_tolerance: 1e-10,
            gradient_tolerance: 1e-10,
            initial_damping: 1e-3,
            jacobian_step: 1e-7,
        }
    }
}

impl OptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of iterations
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the cost tolerance
    pub fn with_cost_tolerance(mut self, cost_tolerance: f64) -> Self {
        self.cost_tolerance = cost_tolerance;
        self
    }

    /// Set the parameter tolerance
    pub fn with_parameter_tolerance(mut self, parameter_tolerance: f64) -> Self {
        self.parameter_tolerance = parameter_tolerance;
        self
    }

    /// Set the gradient tolerance
    pub fn with_gradient_tolerance(mut self, gradient_tolerance: f64) -> Self {
        self.gradient_tolerance = gradient_tolerance;
        self
    }
}

/// Status of an optimization process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Nothing left to estimate
    NoFreeVariables,
    /// Maximum number of iterations reached
    MaxIterationsReached,
    /// Cost function tolerance reached
    CostToleranceReached,
    /// Parameter tolerance reached
    ParameterToleranceReached,
    /// Gradient tolerance reached
    GradientToleranceReached,
    /// Damping grew without finding a descent step
    NumericalFailure,
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::NoFreeVariables => write!(f, "No free variables"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::CostToleranceReached => write!(f, "Cost tolerance reached"),
            OptimizationStatus::ParameterToleranceReached => {
                write!(f, "Parameter tolerance reached")
            }
            OptimizationStatus::GradientToleranceReached => write!(f, "Gradient tolerance reached"),
            OptimizationStatus::NumericalFailure => write!(f, "Numerical failure"),
        }
    }
}
