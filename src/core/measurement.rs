//! Measurement values carried by edges.

use crate::error::{CalibError, CalibResult};
use crate::manifold::{LieGroup, SE2};
use nalgebra::{DVector, Vector2};
use std::fmt;

/// The kind of value an edge measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MeasurementKind {
    /// A planar rigid transformation
    Transformation,
    /// A planar translation
    Translation,
}

impl MeasurementKind {
    /// Length of the error vector for this kind of measurement.
    pub fn dim(&self) -> usize {
        match self {
            MeasurementKind::Transformation => 3,
            MeasurementKind::Translation => 2,
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementKind::Transformation => write!(f, "SE2"),
            MeasurementKind::Translation => write!(f, "V2"),
        }
    }
}

/// A measured (or predicted) edge value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Measurement {
    Transformation(SE2),
    Translation(Vector2<f64>),
}

impl Measurement {
    pub fn kind(&self) -> MeasurementKind {
        match self {
            Measurement::Transformation(_) => MeasurementKind::Transformation,
            Measurement::Translation(_) => MeasurementKind::Translation,
        }
    }

    pub fn dim(&self) -> usize {
        self.kind().dim()
    }

    /// Translation component of the measurement.
    pub fn translation(&self) -> Vector2<f64> {
        match self {
            Measurement::Transformation(pose) => pose.translation(),
            Measurement::Translation(t) => *t,
        }
    }

    /// Rotation angle, if the measurement carries one.
    pub fn angle(&self) -> Option<f64> {
        match self {
            Measurement::Transformation(pose) => Some(pose.angle()),
            Measurement::Translation(_) => None,
        }
    }

    /// The measurement as a transformation; translations become `SE2(t, 0)`.
    pub fn as_transformation(&self) -> SE2 {
        match self {
            Measurement::Transformation(pose) => *pose,
            Measurement::Translation(t) => SE2::from_translation_angle(*t, 0.0),
        }
    }

    /// Rebuild a measurement of the same kind from a transformation.
    pub fn with_transformation(&self, pose: SE2) -> Measurement {
        match self {
            Measurement::Transformation(_) => Measurement::Transformation(pose),
            Measurement::Translation(_) => Measurement::Translation(pose.translation()),
        }
    }

    /// Translation-angle words, `[x, y, θ]` or `[x, y]`.
    pub fn to_vector(&self) -> DVector<f64> {
        match self {
            Measurement::Transformation(pose) => {
                DVector::from_column_slice(pose.translation_angle_vector().as_slice())
            }
            Measurement::Translation(t) => DVector::from_column_slice(t.as_slice()),
        }
    }

    /// Inverse of [`Measurement::to_vector`] for a given kind.
    pub fn from_vector(kind: MeasurementKind, values: &[f64]) -> CalibResult<Measurement> {
        if values.len() != kind.dim() {
            return Err(CalibError::InvalidInput(format!(
                "{kind} measurement needs {} values, got {}",
                kind.dim(),
                values.len()
            )));
        }
        Ok(match kind {
            MeasurementKind::Transformation => {
                Measurement::Transformation(SE2::from_xy_angle(values[0], values[1], values[2]))
            }
            MeasurementKind::Translation => {
                Measurement::Translation(Vector2::new(values[0], values[1]))
            }
        })
    }

    /// Manifold difference `self ⊖ other`.
    ///
    /// For transformations this is `log(other⁻¹ ∘ self)`; for translations the plain
    /// difference.
    pub fn ominus(&self, other: &Measurement) -> CalibResult<DVector<f64>> {
        match (self, other) {
            (Measurement::Transformation(a), Measurement::Transformation(b)) => {
                Ok(DVector::from_column_slice(a.right_minus(b).coeffs().as_slice()))
            }
            (Measurement::Translation(a), Measurement::Translation(b)) => {
                Ok(DVector::from_column_slice((a - b).as_slice()))
            }
            _ => Err(CalibError::InvalidInput(format!(
                "cannot subtract a {} measurement from a {} measurement",
                other.kind(),
                self.kind()
            ))),
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measurement::Transformation(pose) => write!(f, "{pose}"),
            Measurement::Translation(t) => write!(f, "V2([{:.4}, {:.4}])", t.x, t.y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn test_measurement_ominus_of_equal_values_is_zero() {
        let m = Measurement::Transformation(SE2::from_xy_angle(1.0, 2.0, 0.4));
        assert!(m.ominus(&m).unwrap().norm() < TOLERANCE);
    }

    #[test]
    fn test_measurement_ominus_translation_is_difference() {
        let a = Measurement::Translation(Vector2::new(1.0, 2.0));
        let b = Measurement::Translation(Vector2::new(0.5, 3.0));
        let diff = a.ominus(&b).unwrap();
        assert!((diff[0] - 0.5).abs() < TOLERANCE);
        assert!((diff[1] + 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_measurement_ominus_rejects_mixed_kinds() {
        let a = Measurement::Translation(Vector2::new(1.0, 2.0));
        let b = Measurement::Transformation(SE2::identity());
        assert!(a.ominus(&b).is_err());
    }

    #[test]
    fn test_measurement_vector_round_trip() {
        let m = Measurement::Transformation(SE2::from_xy_angle(1.0, -2.0, 0.7));
        let back = Measurement::from_vector(m.kind(), m.to_vector().as_slice()).unwrap();
        assert!((back.to_vector() - m.to_vector()).norm() < TOLERANCE);
    }
}
