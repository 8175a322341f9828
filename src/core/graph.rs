use crate::core::edge::{Edge, EdgeHandle};
use crate::core::node::{Node, NodeHandle, NodeId, NodeKind};
use crate::error::{CalibError, CalibResult};
use crate::factors::EdgeKind;
use crate::optimizer::Optimizer;
use nalgebra::DVector;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Default absolute tolerance for consistency checks.
pub const DEFAULT_ATOL: f64 = 1e-6;

/// Statistics about a factor graph
#[derive(Debug, Clone, PartialEq)]
pub struct FactorGraphStatistics {
    pub nodes_by_kind: BTreeMap<NodeKind, usize>,
    pub edges_by_kind: BTreeMap<EdgeKind, usize>,
    pub num_fixed_nodes: usize,
    pub total_dimension: usize,
    pub depth: usize,
    pub timestamp: Option<f64>,
    pub has_truth: bool,
}

impl fmt::Display for FactorGraphStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes: usize = self.nodes_by_kind.values().sum();
        let edges: usize = self.edges_by_kind.values().sum();
        writeln!(f, "FactorGraph Statistics:")?;
        writeln!(f, "Nodes: {nodes} (fixed: {})", self.num_fixed_nodes)?;
        for (kind, count) in &self.nodes_by_kind {
            writeln!(f, "  {kind}: {count}")?;
        }
        writeln!(f, "Edges: {edges}")?;
        for (kind, count) in &self.edges_by_kind {
            writeln!(f, "  {kind}: {count}")?;
        }
        writeln!(f, "Dimension: {}", self.total_dimension)?;
        match self.timestamp {
            Some(timestamp) => writeln!(f, "Timestamp: {timestamp:.3}")?,
            None => writeln!(f, "Timestamp: unset")?,
        }
        write!(f, "History depth: {} (truth: {})", self.depth, self.has_truth)
    }
}

/// Lazy walk over a graph and its `previous` chain, newest first.
pub struct Subgraphs<'a> {
    current: Option<&'a FactorGraph>,
}

impl<'a> Iterator for Subgraphs<'a> {
    type Item = &'a FactorGraph;

    fn next(&mut self) -> Option<Self::Item> {
        let graph = self.current?;
        self.current = graph.previous.as_deref();
        Some(graph)
    }
}

/// Calibration factor graph.
///
/// Owns a node-id map and an edge list, indexes both by runtime kind and by logical
/// name, and links to an optional `previous` snapshot and an optional `truth` graph.
/// Nodes and edges are reference counted so snapshots can share them.
#[derive(Clone, Debug)]
pub struct FactorGraph {
    pub(crate) nodes: HashMap<NodeId, NodeHandle>,
    pub(crate) node_ordering: Vec<NodeId>,
    pub(crate) nodes_by_kind: BTreeMap<NodeKind, Vec<NodeId>>,
    pub(crate) nodes_by_name: HashMap<String, Vec<NodeId>>,
    pub(crate) edges: Vec<EdgeHandle>,
    pub(crate) edges_by_kind: BTreeMap<EdgeKind, Vec<usize>>,
    pub(crate) edges_by_name: HashMap<String, Vec<usize>>,
    pub(crate) next_id: NodeId,
    pub(crate) timestamp: Option<f64>,
    pub(crate) timestep: usize,
    pub(crate) previous: Option<Rc<FactorGraph>>,
    pub(crate) truth: Option<Rc<FactorGraph>>,
    pub(crate) atol: f64,
}

impl Default for FactorGraph {
    fn default() -> Self {
        FactorGraph {
            nodes: HashMap::new(),
            node_ordering: Vec::new(),
            nodes_by_kind: BTreeMap::new(),
            nodes_by_name: HashMap::new(),
            edges: Vec::new(),
            edges_by_kind: BTreeMap::new(),
            edges_by_name: HashMap::new(),
            next_id: 0,
            timestamp: None,
            timestep: 0,
            previous: None,
            truth: None,
            atol: DEFAULT_ATOL,
        }
    }
}

impl FactorGraph {
    /// Creates a new, empty factor graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty graph with a custom consistency tolerance.
    pub fn with_atol(atol: f64) -> Self {
        FactorGraph {
            atol,
            ..Self::default()
        }
    }

    /// Empty graph carrying this graph's chain, truth and bookkeeping but no elements.
    fn empty_like(&self) -> FactorGraph {
        FactorGraph {
            next_id: self.next_id,
            timestamp: self.timestamp,
            timestep: self.timestep,
            previous: self.previous.clone(),
            truth: self.truth.clone(),
            atol: self.atol,
            ..Self::default()
        }
    }

    // ids

    /// Reserve the next unused node id.
    pub fn allocate_id(&mut self) -> NodeId {
        while self.nodes.contains_key(&self.next_id) {
            self.next_id += 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // nodes

    /// Insert a node, stamping it with the graph's timestamp and timestep.
    pub fn add_node(&mut self, mut node: Node) -> CalibResult<NodeHandle> {
        self.check_node(&node)?;
        node.set_timestamp(self.timestamp.unwrap_or(0.0));
        node.set_timestep(self.timestep);
        let handle = node.into_handle();
        self.insert_node_handle(handle.clone());
        Ok(handle)
    }

    /// Whether [`FactorGraph::add_node`] would accept `node`.
    pub fn check_node(&self, node: &Node) -> CalibResult<()> {
        let id = node.id();
        if self.nodes.contains_key(&id) {
            return Err(CalibError::DuplicateId { id });
        }
        self.check_name(&self.nodes_by_name, node.name(), |graph, first| {
            graph
                .nodes
                .get(&first)
                .map(|existing| existing.borrow().kind() == node.kind())
                .unwrap_or(true)
        })
    }

    /// Insert an existing handle without restamping it.
    pub(crate) fn insert_node_handle(&mut self, handle: NodeHandle) {
        let (id, kind, name) = {
            let node = handle.borrow();
            (node.id(), node.kind(), node.name().to_string())
        };
        self.next_id = self.next_id.max(id + 1);
        self.node_ordering.push(id);
        self.nodes_by_kind.entry(kind).or_default().push(id);
        self.nodes_by_name.entry(name).or_default().push(id);
        self.nodes.insert(id, handle);
        debug!(node = id, %kind, "added node");
    }

    fn check_name<T: Copy>(
        &self,
        index: &HashMap<String, Vec<T>>,
        name: &str,
        same_kind: impl Fn(&FactorGraph, T) -> bool,
    ) -> CalibResult<()> {
        if let Some(first) = index.get(name).and_then(|members| members.first()) {
            if !same_kind(self, *first) {
                return Err(CalibError::InvalidInput(format!(
                    "elements named '{name}' must share one kind"
                )));
            }
        }
        Ok(())
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeHandle> {
        self.nodes.get(&id)
    }

    /// Node ids in insertion order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.node_ordering
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeHandle> {
        self.node_ordering.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes of one kind, in insertion order.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeHandle> {
        self.nodes_by_kind
            .get(&kind)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Pose and point nodes, in insertion order.
    pub fn spatial_nodes(&self) -> Vec<NodeHandle> {
        self.nodes()
            .filter(|node| node.borrow().is_spatial())
            .cloned()
            .collect()
    }

    pub fn parameter_nodes(&self) -> Vec<NodeHandle> {
        self.nodes_of_kind(NodeKind::Parameter)
    }

    /// Nodes sharing a logical name.
    pub fn nodes_of_name(&self, name: &str) -> Vec<NodeHandle> {
        self.nodes_by_name
            .get(name)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    // edges

    /// Insert an edge after checking every attached node is present.
    ///
    /// The graph is left untouched on error.
    pub fn add_edge(&mut self, edge: Edge) -> CalibResult<EdgeHandle> {
        self.add_edge_handle(edge.into_handle())
    }

    /// Insert an edge that other owners (e.g. a sliding window) already hold.
    pub fn add_edge_handle(&mut self, handle: EdgeHandle) -> CalibResult<EdgeHandle> {
        self.check_edge(&handle.borrow())?;
        self.insert_edge_handle(handle.clone());
        Ok(handle)
    }

    /// Whether [`FactorGraph::add_edge`] would accept `edge`.
    ///
    /// Callers that mutate other state for an edge (such as calibration strategies)
    /// validate with this first, so a rejected edge leaves nothing behind.
    pub fn check_edge(&self, edge: &Edge) -> CalibResult<()> {
        self.check_edge_with(edge, None)
    }

    /// Like [`FactorGraph::check_edge`], for an edge that also references `pending`,
    /// a node not inserted yet.
    pub fn check_edge_with_pending(&self, edge: &Edge, pending: &Node) -> CalibResult<()> {
        self.check_node(pending)?;
        self.check_edge_with(edge, Some(pending.id()))
    }

    fn check_edge_with(&self, edge: &Edge, pending: Option<NodeId>) -> CalibResult<()> {
        for id in edge.node_ids() {
            if !self.nodes.contains_key(&id) && pending != Some(id) {
                return Err(CalibError::DanglingReference { id });
            }
        }
        if self.edges.iter().any(|other| other.borrow().is_equivalent(edge)) {
            return Err(CalibError::DuplicateEdge {
                kind: edge.kind().to_string(),
                ids: edge.node_ids(),
            });
        }
        self.check_name(&self.edges_by_name, edge.name(), |graph, first| {
            graph
                .edges
                .get(first)
                .map(|existing| existing.borrow().kind() == edge.kind())
                .unwrap_or(true)
        })
    }

    pub(crate) fn insert_edge_handle(&mut self, handle: EdgeHandle) {
        let index = self.edges.len();
        let (kind, name) = {
            let edge = handle.borrow();
            (edge.kind(), edge.name().to_string())
        };
        self.edges_by_kind.entry(kind).or_default().push(index);
        self.edges_by_name.entry(name).or_default().push(index);
        self.edges.push(handle);
        debug!(edge = index, %kind, "added edge");
    }

    pub fn edges(&self) -> &[EdgeHandle] {
        &self.edges
    }

    pub fn edge(&self, index: usize) -> Option<&EdgeHandle> {
        self.edges.get(index)
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn edges_of_kind(&self, kind: EdgeKind) -> Vec<EdgeHandle> {
        self.edges_by_kind
            .get(&kind)
            .map(|indices| indices.iter().map(|i| self.edges[*i].clone()).collect())
            .unwrap_or_default()
    }

    /// Edges sharing a logical name (e.g. one sensor).
    pub fn edges_of_name(&self, name: &str) -> Vec<EdgeHandle> {
        self.edges_by_name
            .get(name)
            .map(|indices| indices.iter().map(|i| self.edges[*i].clone()).collect())
            .unwrap_or_default()
    }

    /// All element names, nodes and edges alike.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .nodes_by_name
            .keys()
            .chain(self.edges_by_name.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    // time

    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    pub fn timestep(&self) -> usize {
        self.timestep
    }

    /// Set the graph time; it must strictly increase.
    pub fn set_timestamp(&mut self, timestamp: f64) -> CalibResult<()> {
        if let Some(current) = self.timestamp {
            if timestamp <= current {
                return Err(CalibError::NonMonotonicTimestamp {
                    current,
                    requested: timestamp,
                });
            }
            self.timestep += 1;
        }
        self.timestamp = Some(timestamp);
        Ok(())
    }

    /// Advance the graph time by `delta`.
    pub fn increment_timestamp(&mut self, delta: f64) -> CalibResult<()> {
        let current = self.timestamp.unwrap_or(0.0);
        match self.timestamp {
            Some(_) => self.set_timestamp(current + delta),
            None if delta > 0.0 => self.set_timestamp(delta),
            None => Err(CalibError::NonMonotonicTimestamp {
                current,
                requested: delta,
            }),
        }
    }

    // history

    pub fn previous(&self) -> Option<&Rc<FactorGraph>> {
        self.previous.as_ref()
    }

    pub fn set_previous(&mut self, previous: Option<Rc<FactorGraph>>) {
        self.previous = previous;
    }

    /// Number of graphs in the chain, this one included.
    pub fn previous_depth(&self) -> usize {
        self.subgraphs().count()
    }

    /// This graph followed by every snapshot behind it.
    pub fn subgraphs(&self) -> Subgraphs<'_> {
        Subgraphs {
            current: Some(self),
        }
    }

    /// Chain a snapshot behind this graph and return it.
    pub fn chain(&mut self, snapshot: crate::core::snapshot::Snapshot) -> Rc<FactorGraph> {
        let mode = snapshot.mode();
        let graph = Rc::new(snapshot.into_graph());
        self.previous = Some(graph.clone());
        info!(
            depth = self.previous_depth(),
            ?mode,
            timestamp = ?graph.timestamp,
            "chained snapshot"
        );
        graph
    }

    /// Rebuild the per-step chain of a flat graph.
    ///
    /// Edges are consumed in order; a step ends when the next edge reaches a spatial
    /// node not yet seen. Nodes take their discovery step as timestep. When truth is
    /// assigned, the truth graph is split the same way and paired step by step.
    ///
    /// Returns the chain oldest first; the last element mirrors this graph.
    pub fn find_subgraphs(&self) -> CalibResult<Vec<Rc<FactorGraph>>> {
        if self.previous.is_some() {
            return Err(CalibError::InvalidInput(
                "graph is already part of a history chain".to_string(),
            ));
        }

        let mut groups: Vec<Vec<EdgeHandle>> = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::new();
        for edge in &self.edges {
            let spatial = edge.borrow().spatial_ids();
            let contained = spatial.iter().all(|id| seen.contains(id));
            match groups.last_mut() {
                Some(group) if contained => group.push(edge.clone()),
                _ => groups.push(vec![edge.clone()]),
            }
            seen.extend(spatial);
        }

        let truth_chain = match &self.truth {
            Some(truth) => {
                let chain = truth.find_subgraphs()?;
                if chain.len() != groups.len().max(1) {
                    return Err(CalibError::IncompatibleTopology(format!(
                        "truth splits into {} steps, graph into {}",
                        chain.len(),
                        groups.len()
                    )));
                }
                Some(chain)
            }
            None => None,
        };

        let mut chain: Vec<Rc<FactorGraph>> = Vec::new();
        let mut growing = FactorGraph::with_atol(self.atol);
        let last = groups.len().saturating_sub(1);
        for (step, group) in groups.iter().enumerate() {
            for edge in group {
                for node in edge.borrow().nodes() {
                    let id = node.borrow().id();
                    if !growing.contains_node(id) {
                        node.borrow_mut().set_timestep(step);
                        growing.insert_node_handle(node.clone());
                    }
                }
                growing.insert_edge_handle(edge.clone());
            }
            let mut snapshot = if step == last {
                // nodes outside every edge only appear in the full graph
                let mut full = growing.clone();
                for id in &self.node_ordering {
                    if !full.contains_node(*id) {
                        if let Some(node) = self.nodes.get(id) {
                            full.insert_node_handle(node.clone());
                        }
                    }
                }
                full
            } else {
                growing.clone()
            };
            snapshot.timestamp = Some(step as f64);
            snapshot.timestep = step;
            snapshot.previous = chain.last().cloned();
            snapshot.truth = truth_chain.as_ref().map(|truths| truths[step].clone());
            chain.push(Rc::new(snapshot));
        }
        if chain.is_empty() {
            let mut snapshot = self.clone();
            snapshot.truth = truth_chain.and_then(|truths| truths.first().cloned());
            chain.push(Rc::new(snapshot));
        }
        debug!(steps = chain.len(), "reconstructed subgraphs");
        Ok(chain)
    }

    /// Link a list of graphs (oldest first) into a chain and return its head.
    pub fn from_subgraphs(subgraphs: Vec<FactorGraph>) -> Option<Rc<FactorGraph>> {
        let mut head: Option<Rc<FactorGraph>> = None;
        for mut graph in subgraphs {
            graph.previous = head.take();
            head = Some(Rc::new(graph));
        }
        head
    }

    // truth

    pub fn truth(&self) -> Option<&Rc<FactorGraph>> {
        self.truth.as_ref()
    }

    pub fn has_truth(&self) -> bool {
        self.truth.is_some()
    }

    /// Associate an unperturbed graph with identical spatial connectivity.
    ///
    /// Every node receives the id of its truth counterpart and every edge the index of
    /// the matching truth edge. Nothing is modified on error.
    pub fn assign_truth(&mut self, truth: Rc<FactorGraph>) -> CalibResult<()> {
        if let Some(existing) = &self.truth {
            if Rc::ptr_eq(existing, &truth) {
                return Ok(());
            }
            return Err(CalibError::IncompatibleTopology(
                "truth is already assigned".to_string(),
            ));
        }
        if !truth.is_consistent()? {
            return Err(CalibError::IncompatibleTopology(format!(
                "truth graph is perturbed (cost {:.3e})",
                truth.cost()?
            )));
        }
        if !self.is_similar(&truth) {
            return Err(CalibError::IncompatibleTopology(
                "spatial connectivity differs from truth".to_string(),
            ));
        }

        let node_pairs: Vec<(NodeHandle, NodeId)> = self
            .nodes()
            .filter_map(|node| {
                let id = node.borrow().id();
                truth.contains_node(id).then(|| (node.clone(), id))
            })
            .collect();
        for (node, id) in &node_pairs {
            if let Some(existing) = node.borrow().truth() {
                if existing != *id {
                    return Err(CalibError::IncompatibleTopology(format!(
                        "node {id} already has truth {existing}"
                    )));
                }
            }
        }

        let mut edge_pairs: Vec<(EdgeHandle, usize)> = Vec::new();
        let mut candidates = self.edges.iter();
        for (index, truth_edge) in truth.edges.iter().enumerate() {
            let truth_edge = truth_edge.borrow();
            let matched = candidates
                .by_ref()
                .find(|edge| edge.borrow().is_similar(&truth_edge))
                .ok_or_else(|| {
                    CalibError::IncompatibleTopology(format!(
                        "no edge matches truth edge {index}"
                    ))
                })?;
            edge_pairs.push((matched.clone(), index));
        }

        for (node, id) in node_pairs {
            node.borrow_mut().assign_truth(id)?;
        }
        for (edge, index) in edge_pairs {
            edge.borrow_mut().assign_truth(index)?;
        }
        self.truth = Some(truth);
        info!(nodes = self.nodes.len(), edges = self.edges.len(), "assigned truth");
        Ok(())
    }

    // comparison

    fn spatial_signature(&self) -> (Vec<NodeId>, Vec<Vec<NodeId>>) {
        let mut nodes: Vec<NodeId> = self
            .nodes()
            .filter(|node| node.borrow().is_spatial())
            .map(|node| node.borrow().id())
            .collect();
        nodes.sort_unstable();
        let edges = self
            .edges
            .iter()
            .map(|edge| edge.borrow().spatial_ids())
            .collect();
        (nodes, edges)
    }

    /// Identical spatial nodes and spatial edge connectivity.
    pub fn is_similar(&self, other: &FactorGraph) -> bool {
        self.spatial_signature() == other.spatial_signature()
    }

    /// Identical nodes and full edge connectivity, parameters included.
    pub fn is_equivalent(&self, other: &FactorGraph) -> bool {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        let mut other_ids: Vec<NodeId> = other.nodes.keys().copied().collect();
        ids.sort_unstable();
        other_ids.sort_unstable();
        let edges: Vec<(EdgeKind, Vec<NodeId>)> = self
            .edges
            .iter()
            .map(|edge| (edge.borrow().kind(), edge.borrow().node_ids()))
            .collect();
        let other_edges: Vec<(EdgeKind, Vec<NodeId>)> = other
            .edges
            .iter()
            .map(|edge| (edge.borrow().kind(), edge.borrow().node_ids()))
            .collect();
        ids == other_ids && edges == other_edges
    }

    // metrics

    pub fn atol(&self) -> f64 {
        self.atol
    }

    pub fn set_atol(&mut self, atol: f64) {
        self.atol = atol;
    }

    /// Sum of edge costs.
    pub fn cost(&self) -> CalibResult<f64> {
        self.edges
            .iter()
            .map(|edge| edge.borrow().cost())
            .sum::<CalibResult<f64>>()
    }

    /// Whether the total cost is zero within `atol`.
    pub fn is_consistent(&self) -> CalibResult<bool> {
        Ok(self.cost()?.abs() <= self.atol)
    }

    // vectors

    /// Concatenated minimal vectors of every node, in insertion order.
    pub fn to_vector(&self) -> DVector<f64> {
        let values: Vec<f64> = self
            .nodes()
            .flat_map(|node| node.borrow().to_vector().iter().copied().collect::<Vec<_>>())
            .collect();
        DVector::from_vec(values)
    }

    /// Inverse of [`FactorGraph::to_vector`].
    pub fn from_vector(&mut self, vector: &DVector<f64>) -> CalibResult<()> {
        let total: usize = self.nodes().map(|node| node.borrow().dim()).sum();
        if total != vector.len() {
            return Err(CalibError::InvalidInput(format!(
                "graph needs a vector of length {total}, got {}",
                vector.len()
            )));
        }
        let mut offset = 0;
        for node in self.nodes() {
            let dim = node.borrow().dim();
            node.borrow_mut()
                .set_from_vector(&vector.as_slice()[offset..offset + dim])?;
            offset += dim;
        }
        Ok(())
    }

    // optimisation

    /// Optimise with retry-then-revert.
    ///
    /// Free parameters are reinitialised first; the threshold defaults to the cost at
    /// that point. If the optimizer finds no solution below the threshold, every
    /// parameter is fixed and one more attempt accepts any solution. If that fails too,
    /// parameter values and fixed flags are restored and `None` is returned.
    pub fn optimise(
        &mut self,
        optimizer: &mut dyn Optimizer,
        cost_threshold: Option<f64>,
    ) -> CalibResult<Option<FactorGraph>> {
        let parameters = self.parameter_nodes();
        let saved: Vec<(DVector<f64>, bool)> = parameters
            .iter()
            .map(|node| {
                let mut node = node.borrow_mut();
                let fixed = node.is_fixed();
                if !fixed {
                    if let Some(parameter) = node.as_parameter_mut() {
                        return (parameter.reinitialise(), fixed);
                    }
                }
                (node.to_vector(), fixed)
            })
            .collect();
        let threshold = match cost_threshold {
            Some(threshold) => threshold,
            None => self.cost()?,
        };
        debug!(threshold, parameters = parameters.len(), "optimising");

        if let Some(solution) = optimizer.optimise(self, threshold)? {
            return self.accept_solution(solution).map(Some);
        }

        warn!("no solution below threshold, retrying with fixed parameters");
        for node in &parameters {
            node.borrow_mut().fix();
        }
        if let Some(solution) = optimizer.optimise(self, f64::INFINITY)? {
            return self.accept_solution(solution).map(Some);
        }

        warn!("optimisation failed, reverting parameters");
        for (node, (vector, fixed)) in parameters.iter().zip(saved) {
            let mut node = node.borrow_mut();
            node.set_fixed(fixed);
            node.set_from_vector(vector.as_slice())?;
        }
        Ok(None)
    }

    fn accept_solution(&mut self, mut solution: FactorGraph) -> CalibResult<FactorGraph> {
        self.from_vector(&solution.to_vector())?;
        solution.previous = self.previous.clone();
        info!(cost = solution.cost()?, "accepted solution");
        Ok(solution)
    }

    // copies, used by snapshots

    pub(crate) fn share_nodes(&self) -> FactorGraph {
        FactorGraph {
            nodes: self.nodes.clone(),
            node_ordering: self.node_ordering.clone(),
            nodes_by_kind: self.nodes_by_kind.clone(),
            nodes_by_name: self.nodes_by_name.clone(),
            edges: self.edges.clone(),
            edges_by_kind: self.edges_by_kind.clone(),
            edges_by_name: self.edges_by_name.clone(),
            ..self.empty_like()
        }
    }

    pub(crate) fn clone_nodes(&self) -> CalibResult<FactorGraph> {
        let mut copy = FactorGraph {
            node_ordering: self.node_ordering.clone(),
            nodes_by_kind: self.nodes_by_kind.clone(),
            nodes_by_name: self.nodes_by_name.clone(),
            edges_by_kind: self.edges_by_kind.clone(),
            edges_by_name: self.edges_by_name.clone(),
            ..self.empty_like()
        };
        copy.nodes = self
            .nodes
            .iter()
            .map(|(id, node)| (*id, node.borrow().clone().into_handle()))
            .collect();
        copy.edges = self
            .edges
            .iter()
            .map(|edge| edge.borrow().remapped(&copy.nodes).map(Edge::into_handle))
            .collect::<CalibResult<_>>()?;
        Ok(copy)
    }

    // statistics

    pub fn statistics(&self) -> FactorGraphStatistics {
        FactorGraphStatistics {
            nodes_by_kind: self
                .nodes_by_kind
                .iter()
                .map(|(kind, ids)| (*kind, ids.len()))
                .collect(),
            edges_by_kind: self
                .edges_by_kind
                .iter()
                .map(|(kind, indices)| (*kind, indices.len()))
                .collect(),
            num_fixed_nodes: self.nodes().filter(|node| node.borrow().is_fixed()).count(),
            total_dimension: self.nodes().map(|node| node.borrow().dim()).sum(),
            depth: self.previous_depth(),
            timestamp: self.timestamp,
            has_truth: self.truth.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::measurement::Measurement;
    use crate::manifold::SE2;
    use nalgebra::Vector2;

    const TOLERANCE: f64 = 1e-10;

    fn chain_graph(offsets: &[f64]) -> FactorGraph {
        let mut graph = FactorGraph::new();
        let mut origin = Node::pose(0, "odom", SE2::identity());
        origin.fix();
        graph.add_node(origin).unwrap();
        for (i, x) in offsets.iter().enumerate() {
            let id = graph.allocate_id();
            graph
                .add_node(Node::pose(id, "odom", SE2::from_xy_angle(*x, 0.0, 0.0)))
                .unwrap();
            let mut edge = Edge::new(
                EdgeKind::PosePose,
                "odometry",
                Measurement::Transformation(SE2::from_xy_angle(1.0, 0.0, 0.0)),
            )
            .unwrap();
            edge.add_node(graph.node(i).unwrap().clone()).unwrap();
            edge.add_node(graph.node(id).unwrap().clone()).unwrap();
            graph.add_edge(edge).unwrap();
        }
        graph
    }

    #[test]
    fn test_graph_duplicate_id() {
        let mut graph = FactorGraph::new();
        graph.add_node(Node::pose(3, "odom", SE2::identity())).unwrap();
        let result = graph.add_node(Node::pose(3, "odom", SE2::identity()));
        assert_eq!(result.err(), Some(CalibError::DuplicateId { id: 3 }));
        assert_eq!(graph.allocate_id(), 4);
    }

    #[test]
    fn test_graph_allocate_id_skips_taken_ids() {
        let mut graph = FactorGraph::new();
        assert_eq!(graph.allocate_id(), 0);
        graph.add_node(Node::pose(1, "odom", SE2::identity())).unwrap();
        assert_eq!(graph.allocate_id(), 2);
    }

    #[test]
    fn test_graph_dangling_reference_leaves_graph_unmodified() {
        let mut graph = chain_graph(&[1.0]);
        let stranger = Node::pose(42, "odom", SE2::identity()).into_handle();
        let mut edge = Edge::new(
            EdgeKind::PosePose,
            "odometry",
            Measurement::Transformation(SE2::identity()),
        )
        .unwrap();
        edge.add_node(graph.node(1).unwrap().clone()).unwrap();
        edge.add_node(stranger).unwrap();
        let before = graph.statistics();
        assert_eq!(
            graph.add_edge(edge).err(),
            Some(CalibError::DanglingReference { id: 42 })
        );
        assert_eq!(graph.statistics(), before);
    }

    #[test]
    fn test_graph_duplicate_edge() {
        let mut graph = chain_graph(&[1.0]);
        let mut edge = Edge::new(
            EdgeKind::PosePose,
            "odometry",
            Measurement::Transformation(SE2::identity()),
        )
        .unwrap();
        edge.add_node(graph.node(0).unwrap().clone()).unwrap();
        edge.add_node(graph.node(1).unwrap().clone()).unwrap();
        assert!(matches!(
            graph.add_edge(edge),
            Err(CalibError::DuplicateEdge { .. })
        ));
    }

    #[test]
    fn test_graph_name_family_shares_kind() {
        let mut graph = FactorGraph::new();
        graph.add_node(Node::pose(0, "odom", SE2::identity())).unwrap();
        let result = graph.add_node(Node::point(1, "odom", Vector2::zeros()));
        assert!(matches!(result, Err(CalibError::InvalidInput(_))));
    }

    #[test]
    fn test_graph_timestamp_is_strictly_increasing() {
        let mut graph = FactorGraph::new();
        graph.set_timestamp(1.0).unwrap();
        assert_eq!(
            graph.set_timestamp(1.0),
            Err(CalibError::NonMonotonicTimestamp {
                current: 1.0,
                requested: 1.0
            })
        );
        graph.increment_timestamp(0.5).unwrap();
        assert_eq!(graph.timestamp(), Some(1.5));
        assert_eq!(graph.timestep(), 1);
    }

    #[test]
    fn test_graph_vector_round_trip() {
        let mut graph = chain_graph(&[1.0, 2.0]);
        let vector = graph.to_vector();
        assert_eq!(vector.len(), 9);
        let shifted = vector.map(|v| v + 0.1);
        graph.from_vector(&shifted).unwrap();
        assert!((graph.to_vector() - shifted).norm() < TOLERANCE);
        assert!(graph.from_vector(&DVector::zeros(2)).is_err());
    }

    #[test]
    fn test_graph_assign_truth() {
        let truth = Rc::new(chain_graph(&[1.0, 2.0]));
        assert!(truth.is_consistent().unwrap());
        let mut graph = chain_graph(&[1.1, 2.3]);
        graph.assign_truth(truth.clone()).unwrap();
        assert_eq!(graph.node(2).unwrap().borrow().truth(), Some(2));
        assert_eq!(graph.edge(1).unwrap().borrow().truth(), Some(1));
        graph.assign_truth(truth).unwrap();
    }

    #[test]
    fn test_graph_assign_truth_rejects_perturbed_truth() {
        let truth = Rc::new(chain_graph(&[1.5]));
        let mut graph = chain_graph(&[1.0]);
        assert!(matches!(
            graph.assign_truth(truth),
            Err(CalibError::IncompatibleTopology(_))
        ));
        assert!(!graph.has_truth());
        assert_eq!(graph.node(1).unwrap().borrow().truth(), None);
    }

    #[test]
    fn test_graph_assign_truth_rejects_different_topology() {
        let truth = Rc::new(chain_graph(&[1.0, 2.0]));
        let mut graph = chain_graph(&[1.0]);
        assert!(graph.assign_truth(truth).is_err());
    }

    #[test]
    fn test_graph_find_subgraphs_splits_by_new_nodes() {
        let graph = chain_graph(&[1.0, 2.0, 3.0]);
        let chain = graph.find_subgraphs().unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].num_edges(), 1);
        assert_eq!(chain[2].num_edges(), 3);
        assert_eq!(chain[2].previous_depth(), 3);
        assert_eq!(graph.node(3).unwrap().borrow().timestep(), 2);
    }

    #[test]
    fn test_graph_from_subgraphs_links_chain() {
        let head = FactorGraph::from_subgraphs(vec![
            chain_graph(&[1.0]),
            chain_graph(&[1.0, 2.0]),
        ])
        .unwrap();
        assert_eq!(head.previous_depth(), 2);
        let sizes: Vec<usize> = head.subgraphs().map(FactorGraph::num_edges).collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[test]
    fn test_graph_statistics_display() {
        let graph = chain_graph(&[1.0]);
        let text = graph.statistics().to_string();
        assert!(text.contains("Nodes: 2 (fixed: 1)"));
        assert!(text.contains("pose-pose: 1"));
    }
}
