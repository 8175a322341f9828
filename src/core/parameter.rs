//! Calibration parameter payloads.
//!
//! A parameter describes how a sensor distorts the true measurement into the observed
//! one. Three models exist:
//!
//! | Specification | Forward composition | Inverse composition |
//! |---------------|---------------------|---------------------|
//! | `bias`   | `T ∘ p`        | `T ∘ p⁻¹`        |
//! | `offset` | `p ∘ T ∘ p⁻¹`  | `p⁻¹ ∘ T ∘ p`    |
//! | `scale`  | `T ⊙ p`        | `T ⊘ p`          |
//!
//! Scale acts elementwise on the translation-angle vector `[x, y, θ]` of `T`.
//!
//! Payloads narrower than three channels are embedded into `[x, y, θ]` with a filler
//! value (0, or 1 for scale), so a scalar bias on channel 2 is a pure heading bias.

use crate::core::measurement::Measurement;
use crate::error::{CalibError, CalibResult};
use crate::manifold::{LieGroup, SE2, Tangent, SE2Tangent};
use nalgebra::{DVector, Vector2, Vector3};
use std::fmt;
use std::str::FromStr;

/// Which composition a parameter applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSpecification {
    Bias,
    Offset,
    Scale,
    /// One factor applied to both translation components; scalar payloads only
    UniformTranslationScale,
}

impl fmt::Display for ParameterSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterSpecification::Bias => write!(f, "bias"),
            ParameterSpecification::Offset => write!(f, "offset"),
            ParameterSpecification::Scale => write!(f, "scale"),
            ParameterSpecification::UniformTranslationScale => {
                write!(f, "uniform_translation_scale")
            }
        }
    }
}

impl FromStr for ParameterSpecification {
    type Err = CalibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bias" => Ok(ParameterSpecification::Bias),
            "offset" => Ok(ParameterSpecification::Offset),
            "scale" => Ok(ParameterSpecification::Scale),
            "uniform_translation_scale" => Ok(ParameterSpecification::UniformTranslationScale),
            other => Err(CalibError::InvalidInput(format!(
                "unknown parameter specification '{other}'"
            ))),
        }
    }
}

/// Parameter payload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParameterValue {
    /// One channel, placed at `index`
    V1(f64),
    /// Two channels, with the filler inserted at `index`
    V2(Vector2<f64>),
    /// All three channels; scale only
    V3(Vector3<f64>),
    /// A full transformation; bias or offset only
    SE2(SE2),
}

impl ParameterValue {
    /// Number of estimated components.
    pub fn dim(&self) -> usize {
        match self {
            ParameterValue::V1(_) => 1,
            ParameterValue::V2(_) => 2,
            ParameterValue::V3(_) | ParameterValue::SE2(_) => 3,
        }
    }

    /// Short payload tag used for persistence suffixes.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::V1(_) => "V1",
            ParameterValue::V2(_) => "V2",
            ParameterValue::V3(_) => "V3",
            ParameterValue::SE2(_) => "SE2",
        }
    }

    /// Whether this payload supports the given specification.
    pub fn allows(&self, specification: ParameterSpecification) -> bool {
        match self {
            ParameterValue::V1(_) => true,
            ParameterValue::V2(_) => specification != ParameterSpecification::UniformTranslationScale,
            ParameterValue::V3(_) => specification == ParameterSpecification::Scale,
            ParameterValue::SE2(_) => matches!(
                specification,
                ParameterSpecification::Bias | ParameterSpecification::Offset
            ),
        }
    }

    /// A payload of the same shape with every component set to `filler`.
    fn filled(&self, filler: f64) -> ParameterValue {
        match self {
            ParameterValue::V1(_) => ParameterValue::V1(filler),
            ParameterValue::V2(_) => ParameterValue::V2(Vector2::repeat(filler)),
            ParameterValue::V3(_) => ParameterValue::V3(Vector3::repeat(filler)),
            ParameterValue::SE2(_) => ParameterValue::SE2(SE2::identity()),
        }
    }
}

/// A calibration parameter: payload plus the composition it applies.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterNode {
    specification: ParameterSpecification,
    index: usize,
    value: ParameterValue,
    anchor: Option<Vector2<f64>>,
}

impl ParameterNode {
    /// Create a parameter, rejecting illegal specification/payload pairs.
    pub fn new(
        specification: ParameterSpecification,
        index: usize,
        value: ParameterValue,
    ) -> CalibResult<Self> {
        if !value.allows(specification) {
            return Err(CalibError::InvalidInput(format!(
                "{} parameters cannot be {specification}",
                value.type_name()
            )));
        }
        if index > 2 {
            return Err(CalibError::InvalidInput(format!(
                "parameter index {index} is out of range"
            )));
        }
        Ok(ParameterNode {
            specification,
            index,
            value,
            anchor: None,
        })
    }

    /// Attach a spatial anchor used for clustering analysis.
    pub fn with_anchor(mut self, anchor: Vector2<f64>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn specification(&self) -> ParameterSpecification {
        self.specification
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    pub fn anchor(&self) -> Option<Vector2<f64>> {
        self.anchor
    }

    pub fn dim(&self) -> usize {
        self.value.dim()
    }

    /// Replace the payload, keeping its shape.
    pub fn set_value(&mut self, value: ParameterValue) -> CalibResult<()> {
        if std::mem::discriminant(&value) != std::mem::discriminant(&self.value) {
            return Err(CalibError::InvalidInput(format!(
                "cannot replace a {} parameter with a {} value",
                self.value.type_name(),
                value.type_name()
            )));
        }
        self.value = value;
        Ok(())
    }

    /// Neutral component value: 1 for scale, 0 otherwise.
    pub fn filler(&self) -> f64 {
        match self.specification {
            ParameterSpecification::Scale | ParameterSpecification::UniformTranslationScale => 1.0,
            _ => 0.0,
        }
    }

    /// Embed the payload into the `[x, y, θ]` channel layout.
    pub fn to_vector3(&self) -> Vector3<f64> {
        let filler = self.filler();
        match &self.value {
            ParameterValue::V1(v) => {
                let mut out = Vector3::repeat(filler);
                out[self.index] = *v;
                out
            }
            ParameterValue::V2(v) => {
                let mut channels = vec![v[0], v[1]];
                channels.insert(self.index.min(2), filler);
                Vector3::from_column_slice(&channels)
            }
            ParameterValue::V3(v) => *v,
            ParameterValue::SE2(pose) => pose.translation_angle_vector(),
        }
    }

    /// Estimated components; the logarithm for transformations.
    pub fn to_minimal_vector(&self) -> DVector<f64> {
        match &self.value {
            ParameterValue::V1(v) => DVector::from_element(1, *v),
            ParameterValue::V2(v) => DVector::from_column_slice(v.as_slice()),
            ParameterValue::V3(v) => DVector::from_column_slice(v.as_slice()),
            ParameterValue::SE2(pose) => DVector::from_column_slice(pose.log().coeffs().as_slice()),
        }
    }

    /// Inverse of [`ParameterNode::to_minimal_vector`].
    pub fn set_from_minimal_vector(&mut self, values: &[f64]) -> CalibResult<()> {
        if values.len() != self.dim() {
            return Err(CalibError::InvalidInput(format!(
                "parameter needs {} values, got {}",
                self.dim(),
                values.len()
            )));
        }
        self.value = match self.value {
            ParameterValue::V1(_) => ParameterValue::V1(values[0]),
            ParameterValue::V2(_) => ParameterValue::V2(Vector2::new(values[0], values[1])),
            ParameterValue::V3(_) => {
                ParameterValue::V3(Vector3::new(values[0], values[1], values[2]))
            }
            ParameterValue::SE2(_) => {
                ParameterValue::SE2(SE2Tangent::from_components(values[0], values[1], values[2]).exp())
            }
        };
        Ok(())
    }

    /// Set every component to the filler (identity for transformations).
    pub fn reset(&mut self) {
        self.value = self.value.filled(self.filler());
    }

    /// Reset the payload and return the previous minimal vector.
    pub fn reinitialise(&mut self) -> DVector<f64> {
        let previous = self.to_minimal_vector();
        self.reset();
        previous
    }

    /// Apply this parameter to a measurement.
    ///
    /// Translations are lifted to `SE2(t, 0)`, composed and projected back.
    pub fn compose(&self, measurement: &Measurement, inverse: bool) -> CalibResult<Measurement> {
        let transformation = measurement.as_transformation();
        let composed = match self.specification {
            ParameterSpecification::Bias => {
                let p = SE2::from_translation_angle_vector(&self.to_vector3());
                if inverse {
                    transformation.compose(&p.inverse())
                } else {
                    transformation.compose(&p)
                }
            }
            ParameterSpecification::Offset => {
                let p = SE2::from_translation_angle_vector(&self.to_vector3());
                let p = if inverse { p.inverse() } else { p };
                p.compose(&transformation).compose(&p.inverse())
            }
            ParameterSpecification::Scale => {
                let factors = self.to_vector3();
                let vector = transformation.translation_angle_vector();
                let scaled = if inverse {
                    if let Some(index) = factors.iter().position(|v| *v == 0.0) {
                        return Err(CalibError::DegenerateScaleParameter { index });
                    }
                    vector.component_div(&factors)
                } else {
                    vector.component_mul(&factors)
                };
                SE2::from_translation_angle_vector(&scaled)
            }
            ParameterSpecification::UniformTranslationScale => {
                let factor = self.to_minimal_vector()[0];
                let factor = if inverse {
                    if factor == 0.0 {
                        return Err(CalibError::DegenerateScaleParameter { index: self.index });
                    }
                    1.0 / factor
                } else {
                    factor
                };
                SE2::from_translation_angle(transformation.translation() * factor, transformation.angle())
            }
        };
        Ok(measurement.with_transformation(composed))
    }

    /// Undo [`ParameterNode::compose`]: `compose(.., inverse = true)`.
    pub fn decompose(&self, measurement: &Measurement) -> CalibResult<Measurement> {
        self.compose(measurement, true)
    }
}

impl fmt::Display for ParameterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.to_vector3();
        write!(
            f,
            "{}[{}]({:.4}, {:.4}, {:.4})",
            self.specification, self.index, v[0], v[1], v[2]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-10;

    fn pose_measurement() -> Measurement {
        Measurement::Transformation(SE2::from_xy_angle(1.0, 0.5, 0.3))
    }

    fn assert_same(a: &Measurement, b: &Measurement) {
        assert!(a.ominus(b).unwrap().norm() < TOLERANCE, "{a} != {b}");
    }

    #[test]
    fn test_parameter_rejects_illegal_specification() {
        let scale_pose = ParameterNode::new(
            ParameterSpecification::Scale,
            0,
            ParameterValue::SE2(SE2::identity()),
        );
        assert!(scale_pose.is_err());
        let bias_v3 = ParameterNode::new(
            ParameterSpecification::Bias,
            0,
            ParameterValue::V3(Vector3::zeros()),
        );
        assert!(bias_v3.is_err());
    }

    #[test]
    fn test_parameter_to_vector3_embeds_channels() {
        let v1 = ParameterNode::new(ParameterSpecification::Scale, 2, ParameterValue::V1(2.0))
            .unwrap();
        assert_eq!(v1.to_vector3(), Vector3::new(1.0, 1.0, 2.0));

        let v2 = ParameterNode::new(
            ParameterSpecification::Bias,
            1,
            ParameterValue::V2(Vector2::new(3.0, 4.0)),
        )
        .unwrap();
        assert_eq!(v2.to_vector3(), Vector3::new(3.0, 0.0, 4.0));
    }

    #[test]
    fn test_parameter_round_trip_every_specification() {
        let parameters = vec![
            ParameterNode::new(
                ParameterSpecification::Bias,
                0,
                ParameterValue::SE2(SE2::from_xy_angle(0.1, -0.2, 0.05)),
            )
            .unwrap(),
            ParameterNode::new(
                ParameterSpecification::Offset,
                0,
                ParameterValue::SE2(SE2::from_xy_angle(0.3, 0.1, -0.2)),
            )
            .unwrap(),
            ParameterNode::new(
                ParameterSpecification::Scale,
                0,
                ParameterValue::V3(Vector3::new(1.1, 0.9, 1.05)),
            )
            .unwrap(),
            ParameterNode::new(ParameterSpecification::Bias, 2, ParameterValue::V1(0.02)).unwrap(),
        ];
        let measurement = pose_measurement();
        for parameter in &parameters {
            let composed = parameter.compose(&measurement, false).unwrap();
            assert_same(&parameter.decompose(&composed).unwrap(), &measurement);

            let inverted = parameter.compose(&measurement, true).unwrap();
            assert_same(&parameter.compose(&inverted, false).unwrap(), &measurement);
        }
    }

    #[test]
    fn test_parameter_bias_on_translation() {
        let parameter = ParameterNode::new(
            ParameterSpecification::Bias,
            2,
            ParameterValue::V2(Vector2::new(0.5, -0.5)),
        )
        .unwrap();
        let measurement = Measurement::Translation(Vector2::new(1.0, 1.0));
        let composed = parameter.compose(&measurement, false).unwrap();
        assert_same(&composed, &Measurement::Translation(Vector2::new(1.5, 0.5)));
    }

    #[test]
    fn test_parameter_scale_with_zero_is_degenerate_on_inversion() {
        let parameter = ParameterNode::new(
            ParameterSpecification::Scale,
            0,
            ParameterValue::V3(Vector3::new(1.0, 0.0, 1.0)),
        )
        .unwrap();
        assert_eq!(
            parameter.decompose(&pose_measurement()),
            Err(CalibError::DegenerateScaleParameter { index: 1 })
        );
        assert!(parameter.compose(&pose_measurement(), false).is_ok());
    }

    #[test]
    fn test_parameter_uniform_translation_scale() {
        let parameter = ParameterNode::new(
            ParameterSpecification::UniformTranslationScale,
            0,
            ParameterValue::V1(2.0),
        )
        .unwrap();
        let composed = parameter.compose(&pose_measurement(), false).unwrap();
        assert_same(
            &composed,
            &Measurement::Transformation(SE2::from_xy_angle(2.0, 1.0, 0.3)),
        );
        assert_same(&parameter.decompose(&composed).unwrap(), &pose_measurement());

        let point = Measurement::Translation(Vector2::new(1.0, -1.0));
        let composed = parameter.compose(&point, false).unwrap();
        assert_same(&composed, &Measurement::Translation(Vector2::new(2.0, -2.0)));

        let zero = ParameterNode::new(
            ParameterSpecification::UniformTranslationScale,
            0,
            ParameterValue::V1(0.0),
        )
        .unwrap();
        assert_eq!(
            zero.decompose(&pose_measurement()),
            Err(CalibError::DegenerateScaleParameter { index: 0 })
        );
        assert!(ParameterNode::new(
            ParameterSpecification::UniformTranslationScale,
            0,
            ParameterValue::V2(Vector2::new(1.0, 1.0)),
        )
        .is_err());
        assert_eq!(
            "uniform_translation_scale".parse::<ParameterSpecification>().unwrap(),
            ParameterSpecification::UniformTranslationScale
        );
    }

    #[test]
    fn test_parameter_reinitialise_returns_previous_value() {
        let mut parameter =
            ParameterNode::new(ParameterSpecification::Scale, 0, ParameterValue::V1(1.2)).unwrap();
        let previous = parameter.reinitialise();
        assert!((previous[0] - 1.2).abs() < TOLERANCE);
        assert_eq!(parameter.value(), &ParameterValue::V1(1.0));
    }

    #[test]
    fn test_parameter_specification_parse() {
        assert_eq!(
            "offset".parse::<ParameterSpecification>().unwrap(),
            ParameterSpecification::Offset
        );
        assert!("tilt".parse::<ParameterSpecification>().is_err());
    }
}
