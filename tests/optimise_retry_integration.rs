//! Retry-then-revert policy of `FactorGraph::optimise`
//!
//! A scripted optimizer answers each attempt from a queue so that every branch of
//! the policy can be driven deterministically.

#![allow(clippy::unwrap_used)]

use apex_calib::core::{FactorGraph, NodeHandle, Snapshot};
use apex_calib::optimizer::{LevenbergMarquardt, Optimizer};
use apex_calib::CalibResult;
use std::collections::VecDeque;
use std::rc::Rc;

mod calibration_test_utils;
use calibration_test_utils::*;

/// Answers attempts from a script; a solution moves pose 1 to `x = 1.0`.
struct ScriptedOptimizer {
    script: VecDeque<bool>,
    thresholds: Vec<f64>,
    parameters_fixed: Vec<bool>,
}

impl ScriptedOptimizer {
    fn new(script: &[bool]) -> Self {
        Self {
            script: script.iter().copied().collect(),
            thresholds: Vec::new(),
            parameters_fixed: Vec::new(),
        }
    }
}

impl Optimizer for ScriptedOptimizer {
    fn optimise(&mut self, graph: &FactorGraph, cost_threshold: f64) -> CalibResult<Option<FactorGraph>> {
        self.thresholds.push(cost_threshold);
        self.parameters_fixed.push(
            graph
                .parameter_nodes()
                .iter()
                .all(|node| node.borrow().is_fixed()),
        );
        if !self.script.pop_front().unwrap_or(false) {
            return Ok(None);
        }
        let solution = Snapshot::clone_nodes(graph)?.into_graph();
        solution
            .node(1)
            .unwrap()
            .borrow_mut()
            .set_from_vector(&[1.0, 0.0, 0.0])?;
        Ok(Some(solution))
    }
}

/// Two-pose graph whose edge carries a bias of 0.2.
fn graph_with_bias() -> (FactorGraph, NodeHandle) {
    let mut graph = two_pose_graph(1.3);
    let bias = add_bias(&mut graph, 0.2);
    graph.edge(0).unwrap().borrow_mut().add_node(bias.clone()).unwrap();
    (graph, bias)
}

fn bias_value(bias: &NodeHandle) -> f64 {
    bias.borrow().to_vector()[0]
}

fn pose_x(graph: &FactorGraph) -> f64 {
    graph.node(1).unwrap().borrow().translation().unwrap().x
}

#[test]
fn test_optimise_accepts_first_solution() {
    let (mut graph, bias) = graph_with_bias();
    let mut optimizer = ScriptedOptimizer::new(&[true]);

    let solution = graph.optimise(&mut optimizer, None).unwrap().unwrap();

    // threshold defaults to the cost after the bias was reset to zero
    assert_eq!(optimizer.thresholds.len(), 1);
    assert!((optimizer.thresholds[0] - 0.09).abs() < TOLERANCE);
    assert!(!optimizer.parameters_fixed[0]);
    assert!((pose_x(&graph) - 1.0).abs() < TOLERANCE);
    assert!((pose_x(&solution) - 1.0).abs() < TOLERANCE);
    assert!(bias_value(&bias).abs() < TOLERANCE);
    assert!(!bias.borrow().is_fixed());
}

#[test]
fn test_optimise_retries_with_fixed_parameters() {
    let (mut graph, bias) = graph_with_bias();
    let previous = Rc::new(two_pose_graph(1.3));
    graph.set_previous(Some(previous.clone()));
    let mut optimizer = ScriptedOptimizer::new(&[false, true]);

    let solution = graph.optimise(&mut optimizer, Some(1e-12)).unwrap().unwrap();

    assert_eq!(optimizer.thresholds, vec![1e-12, f64::INFINITY]);
    assert_eq!(optimizer.parameters_fixed, vec![false, true]);
    assert!(bias.borrow().is_fixed());
    assert!((pose_x(&graph) - 1.0).abs() < TOLERANCE);
    assert!(Rc::ptr_eq(solution.previous().unwrap(), &previous));
}

#[test]
fn test_optimise_reverts_after_two_failures() {
    let (mut graph, bias) = graph_with_bias();
    let vector_before = graph.to_vector();
    let mut optimizer = ScriptedOptimizer::new(&[false, false]);

    assert!(graph.optimise(&mut optimizer, None).unwrap().is_none());

    assert_eq!(optimizer.thresholds.len(), 2);
    assert!(!bias.borrow().is_fixed());
    assert!((bias_value(&bias) - 0.2).abs() < TOLERANCE);
    assert!(graph.node(0).unwrap().borrow().is_fixed());
    assert_eq!(graph.to_vector(), vector_before);
}

#[test]
fn test_optimise_keeps_fixed_parameter_fixed() {
    let (mut graph, bias) = graph_with_bias();
    bias.borrow_mut().fix();
    let mut optimizer = ScriptedOptimizer::new(&[false, false]);

    assert!(graph.optimise(&mut optimizer, None).unwrap().is_none());
    assert!(bias.borrow().is_fixed());
    // fixed parameters are not reinitialised
    assert!((bias_value(&bias) - 0.2).abs() < TOLERANCE);
    assert!(optimizer.parameters_fixed[0]);
}

#[test]
fn test_optimise_with_levenberg_marquardt_recovers_bias() {
    let (mut graph, bias) = graph_with_bias();
    graph
        .node(1)
        .unwrap()
        .borrow_mut()
        .fix();
    let mut optimizer = LevenbergMarquardt::new();

    let solution = graph.optimise(&mut optimizer, None).unwrap();

    assert!(solution.is_some());
    assert!((bias_value(&bias) - 0.3).abs() < 1e-6);
    assert!(graph.cost().unwrap() < 1e-10);
}
