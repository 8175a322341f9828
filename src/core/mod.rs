//! Graph data model for online calibration.
//!
//! - [`node`]: pose, point, parameter and information nodes
//! - [`edge`]: measurement edges with attached parameters
//! - [`graph`]: the factor graph, its history chain and truth association
//! - [`snapshot`]: shared or deep copies used to build the history chain

pub mod edge;
pub mod graph;
pub mod information;
pub mod measurement;
pub mod node;
pub mod parameter;
pub mod snapshot;

pub use edge::{Edge, EdgeHandle};
pub use graph::{FactorGraph, FactorGraphStatistics, Subgraphs};
pub use information::InformationNode;
pub use measurement::{Measurement, MeasurementKind};
pub use node::{Node, NodeHandle, NodeId, NodeKind, NodePayload};
pub use parameter::{ParameterNode, ParameterSpecification, ParameterValue};
pub use snapshot::{Snapshot, SnapshotMode};
