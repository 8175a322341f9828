//! Configuration loading for calibration runs

use crate::calibration::{
    CalibrationStrategy, OldSlidingStrategy, SlidingStrategy, StaticStrategy, StrategyKind,
    TimelyBatchStrategy,
};
use crate::core::{FactorGraph, ParameterSpecification, ParameterValue};
use crate::error::{CalibError, CalibResult};
use crate::optimizer::{LevenbergMarquardt, OptimizerConfig};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub optimizer: OptimizerSection,
}

/// Graph settings
#[derive(Clone, Debug, Deserialize)]
pub struct GraphConfig {
    /// Absolute tolerance for consistency checks (default: 1e-6)
    #[serde(default = "default_atol")]
    pub atol: f64,
}

/// Parameter strategy settings
#[derive(Clone, Debug, Deserialize)]
pub struct StrategyConfig {
    /// Lifecycle policy (default: static)
    #[serde(default)]
    pub kind: StrategyKind,

    /// Edges inside a sliding window (default: 10)
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Edges per parameter node for timely batches (default: 10)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How the parameter acts on measurements (default: bias)
    #[serde(default = "default_specification")]
    pub specification: ParameterSpecification,

    /// Channel of a scalar parameter, or filler position of a 2-vector (default: 0)
    #[serde(default)]
    pub index: usize,

    /// Whether a static parameter is attached to edges (default: true)
    #[serde(default = "default_visible")]
    pub visible: bool,
}

/// Optimizer settings plus the acceptance threshold
#[derive(Clone, Debug, Default, Deserialize)]
pub struct OptimizerSection {
    #[serde(flatten)]
    pub solver: OptimizerConfig,

    /// Cost a solution must reach; defaults to the cost after reinitialisation
    #[serde(default)]
    pub cost_threshold: Option<f64>,
}

fn default_atol() -> f64 {
    1e-6
}
fn default_window_size() -> usize {
    10
}
fn default_batch_size() -> usize {
    10
}
fn default_specification() -> ParameterSpecification {
    ParameterSpecification::Bias
}
fn default_visible() -> bool {
    true
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            atol: default_atol(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::default(),
            window_size: default_window_size(),
            batch_size: default_batch_size(),
            specification: default_specification(),
            index: 0,
            visible: default_visible(),
        }
    }
}

impl CalibrationConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> CalibResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CalibError::Config(format!("Failed to read config file: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> CalibResult<Self> {
        let config: CalibrationConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CalibResult<()> {
        if !(self.graph.atol.is_finite() && self.graph.atol >= 0.0) {
            return Err(CalibError::Config(format!(
                "graph.atol must be a non-negative number, got {}",
                self.graph.atol
            )));
        }
        if let Some(threshold) = self.optimizer.cost_threshold {
            if !(threshold.is_finite() && threshold >= 0.0) {
                return Err(CalibError::Config(format!(
                    "optimizer.cost_threshold must be a non-negative number, got {threshold}"
                )));
            }
        }
        if self.optimizer.solver.max_iterations == 0 {
            return Err(CalibError::Config(
                "optimizer.max_iterations must be positive".to_string(),
            ));
        }
        self.strategy.validate()
    }

    /// Empty graph with the configured tolerance.
    pub fn new_graph(&self) -> FactorGraph {
        FactorGraph::with_atol(self.graph.atol)
    }

    pub fn build_optimizer(&self) -> LevenbergMarquardt {
        LevenbergMarquardt::with_config(self.optimizer.solver.clone())
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> CalibResult<()> {
        match self.kind {
            StrategyKind::Sliding | StrategyKind::OldSliding if self.window_size == 0 => Err(
                CalibError::Config("strategy.window_size must be positive".to_string()),
            ),
            StrategyKind::TimelyBatch if self.batch_size == 0 => Err(CalibError::Config(
                "strategy.batch_size must be positive".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Construct the configured strategy around an initial value.
    ///
    /// The strategy inserts its first parameter node into `graph`.
    pub fn build(
        &self,
        graph: &mut FactorGraph,
        name: &str,
        value: ParameterValue,
    ) -> CalibResult<Box<dyn CalibrationStrategy>> {
        self.validate()?;
        if !value.allows(self.specification) {
            return Err(CalibError::Config(format!(
                "a {} parameter cannot be a {}",
                value.type_name(),
                self.specification
            )));
        }

        let (specification, index) = (self.specification, self.index);
        let strategy: Box<dyn CalibrationStrategy> = match self.kind {
            StrategyKind::Static => Box::new(
                StaticStrategy::new(graph, name, specification, index, value)?
                    .with_visibility(self.visible),
            ),
            StrategyKind::TimelyBatch => Box::new(TimelyBatchStrategy::new(
                graph,
                name,
                specification,
                index,
                value,
                self.batch_size,
            )?),
            StrategyKind::Sliding => Box::new(SlidingStrategy::new(
                graph,
                name,
                specification,
                index,
                value,
                self.window_size,
            )?),
            StrategyKind::OldSliding => Box::new(OldSlidingStrategy::new(
                graph,
                name,
                specification,
                index,
                value,
                self.window_size,
            )?),
        };
        Ok(strategy)
    }
}
