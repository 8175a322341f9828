//! Simulated sensors with calibration parameters.
//!
//! A [`Sensor`] turns true relative measurements into what the sensor would report:
//! the true value is passed through the inverse of every parameter
//! ([`Sensor::decompose`]) and perturbed with Gaussian noise drawn from the inverse of
//! the sensor's information matrix ([`Sensor::measure`]). [`Sensor::compose`] undoes
//! the parameters again using their current estimates.

use crate::calibration::CalibrationStrategy;
use crate::core::{EdgeHandle, FactorGraph, Measurement, MeasurementKind, NodeHandle, ParameterValue};
use crate::error::{CalibError, CalibResult};
use crate::manifold::{LieGroup, SE2Tangent};
use nalgebra::{DMatrix, DVector, Vector2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::fmt;
use tracing::debug;

pub struct Sensor {
    name: String,
    kind: MeasurementKind,
    information: DMatrix<f64>,
    /// Lower Cholesky factor of the covariance.
    noise_factor: DMatrix<f64>,
    parameters: Vec<Box<dyn CalibrationStrategy>>,
    rng: StdRng,
}

impl Sensor {
    /// Create a sensor; the information dimension (3 or 2) selects the measurement kind.
    pub fn new(name: impl Into<String>, information: DMatrix<f64>, seed: u64) -> CalibResult<Self> {
        let kind = match (information.nrows(), information.ncols()) {
            (3, 3) => MeasurementKind::Transformation,
            (2, 2) => MeasurementKind::Translation,
            (rows, cols) => {
                return Err(CalibError::InvalidInput(format!(
                    "sensor information must be 2x2 or 3x3, got {rows}x{cols}"
                )))
            }
        };
        let covariance = information
            .clone()
            .try_inverse()
            .ok_or_else(|| CalibError::InvalidInput("sensor information is singular".to_string()))?;
        let noise_factor = covariance
            .cholesky()
            .ok_or_else(|| {
                CalibError::InvalidInput("sensor information is not positive definite".to_string())
            })?
            .unpack();

        Ok(Sensor {
            name: name.into(),
            kind,
            information,
            noise_factor,
            parameters: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn measurement_kind(&self) -> MeasurementKind {
        self.kind
    }

    pub fn information(&self) -> &DMatrix<f64> {
        &self.information
    }

    pub fn add_parameter(&mut self, strategy: Box<dyn CalibrationStrategy>) {
        debug!(sensor = %self.name, parameter = strategy.name(), kind = %strategy.kind(), "added parameter");
        self.parameters.push(strategy);
    }

    pub fn parameters(&self) -> &[Box<dyn CalibrationStrategy>] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&dyn CalibrationStrategy> {
        self.parameters
            .iter()
            .find(|strategy| strategy.name() == name)
            .map(|strategy| strategy.as_ref())
    }

    /// Replace the current node of parameter `name` with one holding `value`.
    pub fn update_parameter(
        &mut self,
        graph: &mut FactorGraph,
        name: &str,
        value: ParameterValue,
    ) -> CalibResult<NodeHandle> {
        let strategy = self
            .parameters
            .iter_mut()
            .find(|strategy| strategy.name() == name)
            .ok_or_else(|| {
                CalibError::InvalidInput(format!("sensor {} has no parameter '{name}'", self.name))
            })?;
        strategy.update(graph, value)
    }

    /// Apply the current parameter estimates in order.
    pub fn compose(&self, measurement: &Measurement) -> CalibResult<Measurement> {
        self.parameters
            .iter()
            .try_fold(*measurement, |current, strategy| strategy.compose(&current, false))
    }

    /// Remove the parameters from a measurement, last one first.
    pub fn decompose(&self, measurement: &Measurement) -> CalibResult<Measurement> {
        self.parameters
            .iter()
            .rev()
            .try_fold(*measurement, |current, strategy| strategy.compose(&current, true))
    }

    /// Draw one noise sample with covariance equal to the inverse information.
    pub fn sample_noise(&mut self) -> DVector<f64> {
        let dim = self.noise_factor.nrows();
        let standard = DVector::from_fn(dim, |_, _| self.rng.sample::<f64, _>(StandardNormal));
        &self.noise_factor * standard
    }

    /// Noisy reading of a measurement.
    pub fn measure(&mut self, value: &Measurement) -> CalibResult<Measurement> {
        if value.kind() != self.kind {
            return Err(CalibError::InvalidInput(format!(
                "sensor {} measures {}, got {}",
                self.name,
                self.kind,
                value.kind()
            )));
        }
        let noise = self.sample_noise();
        Ok(match value {
            Measurement::Transformation(pose) => Measurement::Transformation(
                pose.right_plus(&SE2Tangent::from_components(noise[0], noise[1], noise[2])),
            ),
            Measurement::Translation(translation) => {
                Measurement::Translation(translation + Vector2::new(noise[0], noise[1]))
            }
        })
    }

    /// What the sensor reports for a true value: parameters removed, then noise added.
    pub fn observe(&mut self, truth: &Measurement) -> CalibResult<Measurement> {
        let decomposed = self.decompose(truth)?;
        self.measure(&decomposed)
    }

    /// Parameter nodes the next [`Sensor::attach`] adds to an edge, in order.
    pub fn attachments(&self) -> Vec<NodeHandle> {
        self.parameters
            .iter()
            .filter_map(|strategy| strategy.attachment().cloned())
            .collect()
    }

    /// Let every parameter attach to a fresh edge, in order.
    pub fn attach(&mut self, graph: &mut FactorGraph, edge: &EdgeHandle) -> CalibResult<()> {
        for strategy in &mut self.parameters {
            strategy.attach(graph, edge)?;
        }
        Ok(())
    }

    pub fn report_closure(&mut self) {
        for strategy in &mut self.parameters {
            strategy.report_closure();
        }
    }
}

impl fmt::Debug for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sensor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("information", &self.information)
            .field("parameters", &self.parameters)
            .finish()
    }
}
