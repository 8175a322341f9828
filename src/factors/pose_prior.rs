//! Absolute position constraint on a single pose.

use super::{check_endpoints, EdgeModel};
use crate::core::measurement::{Measurement, MeasurementKind};
use crate::core::node::{Node, NodeKind};
use crate::error::{CalibError, CalibResult};

/// Position prior, e.g. a GPS fix. The delta is the pose translation.
#[derive(Clone, Copy, Debug, Default)]
pub struct PosePriorEdge;

impl EdgeModel for PosePriorEdge {
    fn cardinality(&self) -> usize {
        1
    }

    fn endpoint_kind(&self, _slot: usize) -> NodeKind {
        NodeKind::Pose
    }

    fn measurement_kind(&self) -> MeasurementKind {
        MeasurementKind::Translation
    }

    fn delta(&self, endpoints: &[&Node]) -> CalibResult<Measurement> {
        check_endpoints(self, endpoints)?;
        endpoints[0]
            .as_pose()
            .map(|pose| Measurement::Translation(pose.translation()))
            .ok_or_else(|| CalibError::InvalidInput("pose-prior edge needs a pose".to_string()))
    }
}
