//! Measurement models for calibration edges
//!
//! Each edge kind knows how many spatial endpoints it connects, which node kinds may
//! occupy each endpoint slot, and how to predict its measurement (`delta`) from the
//! endpoint values alone. Parameter composition and error computation are shared and
//! live on [`crate::core::Edge`].
//!
//! | Kind | Endpoints | Measurement | Delta |
//! |------|-----------|-------------|-------|
//! | pose-pose  | pose, pose  | SE(2) | `a⁻¹ ∘ b` |
//! | pose-point | pose, point | V2    | `b - a.t` |
//! | pose-prior | pose        | V2    | `a.t`     |

use crate::core::measurement::{Measurement, MeasurementKind};
use crate::core::node::{Node, NodeKind};
use crate::error::{CalibError, CalibResult};
use std::fmt;

pub mod pose_point;
pub mod pose_pose;
pub mod pose_prior;

pub use pose_point::PosePointEdge;
pub use pose_pose::PosePoseEdge;
pub use pose_prior::PosePriorEdge;

/// Relative pose error components of one edge against its truth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelativeError {
    /// Squared translation difference
    pub translation2: f64,
    /// Absolute wrapped angle difference
    pub rotation: f64,
}

/// Measurement model of one edge kind.
pub trait EdgeModel: fmt::Debug + Sync {
    /// Number of spatial endpoints.
    fn cardinality(&self) -> usize;

    /// Kind of node allowed in endpoint slot `slot`.
    fn endpoint_kind(&self, slot: usize) -> NodeKind;

    /// Kind of value measured.
    fn measurement_kind(&self) -> MeasurementKind;

    /// Measurement implied by the endpoint values, ignoring parameters.
    fn delta(&self, endpoints: &[&Node]) -> CalibResult<Measurement>;

    /// Relative error between an estimated and a true delta, if this kind reports one.
    fn relative_error(&self, _delta: &Measurement, _truth: &Measurement) -> Option<RelativeError> {
        None
    }
}

/// Closed set of edge kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeKind {
    PosePose,
    PosePoint,
    PosePrior,
}

impl EdgeKind {
    /// Measurement model for this kind.
    pub fn model(&self) -> &'static dyn EdgeModel {
        match self {
            EdgeKind::PosePose => &PosePoseEdge,
            EdgeKind::PosePoint => &PosePointEdge,
            EdgeKind::PosePrior => &PosePriorEdge,
        }
    }

    pub fn cardinality(&self) -> usize {
        self.model().cardinality()
    }

    pub fn measurement_kind(&self) -> MeasurementKind {
        self.model().measurement_kind()
    }

    /// Error vector dimension.
    pub fn dim(&self) -> usize {
        self.measurement_kind().dim()
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EdgeKind::PosePose => "pose-pose",
            EdgeKind::PosePoint => "pose-point",
            EdgeKind::PosePrior => "pose-prior",
        };
        write!(f, "{label}")
    }
}

/// Check that `endpoints` fills every slot of `model` with the right node kind.
pub(crate) fn check_endpoints(model: &dyn EdgeModel, endpoints: &[&Node]) -> CalibResult<()> {
    if endpoints.len() != model.cardinality() {
        return Err(CalibError::IncompleteEdge {
            attached: endpoints.len(),
            required: model.cardinality(),
        });
    }
    for (slot, node) in endpoints.iter().enumerate() {
        if node.kind() != model.endpoint_kind(slot) {
            return Err(CalibError::InvalidInput(format!(
                "endpoint {slot} must be a {} node, found {}",
                model.endpoint_kind(slot),
                node.kind()
            )));
        }
    }
    Ok(())
}
