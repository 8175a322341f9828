//! Relative SE(2) constraint between two poses.

use super::{check_endpoints, EdgeModel, RelativeError};
use crate::core::measurement::{Measurement, MeasurementKind};
use crate::core::node::{Node, NodeKind};
use crate::error::{CalibError, CalibResult};
use crate::manifold::{LieGroup, SO2};

/// Odometry or loop-closure edge.
///
/// # Mathematical Formulation
///
/// ```text
/// delta = T_a⁻¹ ∘ T_b
/// ```
///
/// The error is `estimate ⊖ measurement`, a 3D vector `[dx, dy, dθ]` in the
/// tangent space.
#[derive(Clone, Copy, Debug, Default)]
pub struct PosePoseEdge;

impl EdgeModel for PosePoseEdge {
    fn cardinality(&self) -> usize {
        2
    }

    fn endpoint_kind(&self, _slot: usize) -> NodeKind {
        NodeKind::Pose
    }

    fn measurement_kind(&self) -> MeasurementKind {
        MeasurementKind::Transformation
    }

    fn delta(&self, endpoints: &[&Node]) -> CalibResult<Measurement> {
        check_endpoints(self, endpoints)?;
        match (endpoints[0].as_pose(), endpoints[1].as_pose()) {
            (Some(a), Some(b)) => Ok(Measurement::Transformation(a.between(b))),
            _ => Err(CalibError::InvalidInput(
                "pose-pose edge needs two pose endpoints".to_string(),
            )),
        }
    }

    fn relative_error(&self, delta: &Measurement, truth: &Measurement) -> Option<RelativeError> {
        let translation2 = (truth.translation() - delta.translation()).norm_squared();
        let angle = SO2::from_angle(truth.angle()? - delta.angle()?).angle();
        Some(RelativeError {
            translation2,
            rotation: angle.abs(),
        })
    }
}
