//! Translation constraint between a pose and a point.

use super::{check_endpoints, EdgeModel};
use crate::core::measurement::{Measurement, MeasurementKind};
use crate::core::node::{Node, NodeKind};
use crate::error::{CalibError, CalibResult};

/// Landmark observation. The delta is the world-frame offset `p - t_a`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PosePointEdge;

impl EdgeModel for PosePointEdge {
    fn cardinality(&self) -> usize {
        2
    }

    fn endpoint_kind(&self, slot: usize) -> NodeKind {
        if slot == 0 {
            NodeKind::Pose
        } else {
            NodeKind::Point
        }
    }

    fn measurement_kind(&self) -> MeasurementKind {
        MeasurementKind::Translation
    }

    fn delta(&self, endpoints: &[&Node]) -> CalibResult<Measurement> {
        check_endpoints(self, endpoints)?;
        match (endpoints[0].as_pose(), endpoints[1].translation()) {
            (Some(pose), Some(point)) => Ok(Measurement::Translation(point - pose.translation())),
            _ => Err(CalibError::InvalidInput(
                "pose-point edge needs a pose and a point".to_string(),
            )),
        }
    }
}
