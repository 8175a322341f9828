//! Point-in-time copies of a factor graph.
//!
//! A snapshot either shares node handles with the live graph, so later value changes
//! show through, or owns fresh copies of every node, freezing the values it saw.

use crate::core::graph::FactorGraph;
use crate::error::CalibResult;

/// How a snapshot relates to the graph it was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMode {
    /// Nodes and edges are the live handles.
    SharedNodes,
    /// Every node is copied and edges are rebuilt against the copies.
    ClonedNodes,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    mode: SnapshotMode,
    graph: FactorGraph,
}

impl Snapshot {
    /// Capture `graph` sharing its node handles.
    pub fn share_nodes(graph: &FactorGraph) -> Self {
        Snapshot {
            mode: SnapshotMode::SharedNodes,
            graph: graph.share_nodes(),
        }
    }

    /// Capture `graph` with deep copies of its nodes and edges.
    pub fn clone_nodes(graph: &FactorGraph) -> CalibResult<Self> {
        Ok(Snapshot {
            mode: SnapshotMode::ClonedNodes,
            graph: graph.clone_nodes()?,
        })
    }

    pub fn mode(&self) -> SnapshotMode {
        self.mode
    }

    pub fn graph(&self) -> &FactorGraph {
        &self.graph
    }

    pub fn into_graph(self) -> FactorGraph {
        self.graph
    }
}
