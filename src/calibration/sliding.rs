//! Closure-gated sliding window.
//!
//! Edges move through three FIFO buckets:
//!
//! ```text
//! attach ──► in (≤ window) ──► between ──(closure)──► out
//! ```
//!
//! Edges in `in` and `between` reference the live parameter node. When the flag of the
//! edge before the newest one reports a closure, every edge in `between` has the
//! parameter baked into its measurement and moves to `out`. Only that one flag is
//! inspected; a closure reported earlier in the window does not trigger a flush.

use super::{attach_node, bake, insert_parameter, CalibrationStrategy, StrategyKind};
use crate::core::{EdgeHandle, FactorGraph, NodeHandle, ParameterSpecification, ParameterValue};
use crate::error::{CalibError, CalibResult};
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SlidingStrategy {
    name: String,
    node: NodeHandle,
    window_size: usize,
    inside: VecDeque<EdgeHandle>,
    closures: VecDeque<bool>,
    between: Vec<EdgeHandle>,
    out: Vec<EdgeHandle>,
}

impl SlidingStrategy {
    pub fn new(
        graph: &mut FactorGraph,
        name: impl Into<String>,
        specification: ParameterSpecification,
        index: usize,
        value: ParameterValue,
        window_size: usize,
    ) -> CalibResult<Self> {
        if window_size == 0 {
            return Err(CalibError::InvalidInput(
                "window size must be positive".to_string(),
            ));
        }
        let name = name.into();
        let node = insert_parameter(graph, &name, specification, index, value)?;
        Ok(SlidingStrategy {
            name,
            node,
            window_size,
            inside: VecDeque::new(),
            closures: VecDeque::new(),
            between: Vec::new(),
            out: Vec::new(),
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Edges inside the window, oldest first.
    pub fn inside(&self) -> impl Iterator<Item = &EdgeHandle> {
        self.inside.iter()
    }

    /// Edges evicted from the window and waiting for a closure.
    pub fn between(&self) -> &[EdgeHandle] {
        &self.between
    }

    /// Edges with the parameter baked in.
    pub fn out(&self) -> &[EdgeHandle] {
        &self.out
    }

    /// Closure flags of the window edges, oldest first.
    pub fn closures(&self) -> impl Iterator<Item = bool> + '_ {
        self.closures.iter().copied()
    }

    fn flush(&mut self) -> CalibResult<()> {
        let count = self.between.len();
        for edge in self.between.drain(..) {
            bake(&edge, &self.node)?;
            self.out.push(edge);
        }
        debug!(name = %self.name, flushed = count, out = self.out.len(), "flushed window");
        Ok(())
    }
}

impl CalibrationStrategy for SlidingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sliding
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn node(&self) -> &NodeHandle {
        &self.node
    }

    fn attach(&mut self, _graph: &mut FactorGraph, edge: &EdgeHandle) -> CalibResult<()> {
        attach_node(edge, &self.node)?;
        self.closures.push_back(false);

        let previous_closed = self.closures.len() >= 2 && self.closures[self.closures.len() - 2];
        if previous_closed {
            self.flush()?;
        }

        if self.inside.len() < self.window_size {
            self.inside.push_back(edge.clone());
        } else {
            if let Some(evicted) = self.inside.pop_front() {
                self.between.push(evicted);
            }
            self.inside.push_back(edge.clone());
            self.closures.pop_front();
            debug!(name = %self.name, between = self.between.len(), "evicted edge from window");
        }
        Ok(())
    }

    fn report_closure(&mut self) {
        if let Some(last) = self.closures.back_mut() {
            *last = true;
        }
    }
}
