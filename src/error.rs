//! Error types for the apex-calib library
//!
//! This module provides the main error and result types used throughout the library.
//! All errors use the `thiserror` crate for automatic trait implementations.

use crate::{io::IoError, manifold::ManifoldError};
use std::{
    io::Error,
    num::{ParseFloatError, ParseIntError},
};
use thiserror::Error;

/// Main result type used throughout the apex-calib library
pub type CalibResult<T> = Result<T, CalibError>;

/// Main error type for the apex-calib library
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibError {
    /// A node or element with this id is already present in the graph
    #[error("Duplicate id: {id}")]
    DuplicateId { id: usize },

    /// An edge refers to a node id that is not in the graph
    #[error("Dangling reference to node {id}")]
    DanglingReference { id: usize },

    /// An equivalent edge (same kind, same ordered nodes) already exists
    #[error("Duplicate {kind} edge over nodes {ids:?}")]
    DuplicateEdge { kind: String, ids: Vec<usize> },

    /// Two graphs do not share the same structure
    #[error("Incompatible topology: {0}")]
    IncompatibleTopology(String),

    /// An edge is missing one of its endpoints
    #[error("Incomplete edge: {attached} of {required} spatial nodes attached")]
    IncompleteEdge { attached: usize, required: usize },

    /// A scale parameter with a zero component cannot be inverted
    #[error("Scale parameter has a zero component at index {index}")]
    DegenerateScaleParameter { index: usize },

    /// Graph timestamps must increase strictly
    #[error("Timestamp {requested} does not exceed current timestamp {current}")]
    NonMonotonicTimestamp { current: f64, requested: f64 },

    /// A metric requiring ground truth was evaluated on a graph without it
    #[error("Graph has no assigned truth")]
    MissingTruth,

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO related errors (file loading, parsing, etc.)
    #[error("IO error: {0}")]
    Io(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Manifold operations errors
    #[error("Manifold error: {0}")]
    Manifold(String),
}

// Conversions from standard library errors

impl From<Error> for CalibError {
    fn from(err: Error) -> Self {
        CalibError::Io(err.to_string())
    }
}

impl From<ParseFloatError> for CalibError {
    fn from(err: ParseFloatError) -> Self {
        CalibError::InvalidInput(format!("Failed to parse float: {err}"))
    }
}

impl From<ParseIntError> for CalibError {
    fn from(err: ParseIntError) -> Self {
        CalibError::InvalidInput(format!("Failed to parse integer: {err}"))
    }
}

// Convert module-specific errors to CalibError

impl From<ManifoldError> for CalibError {
    fn from(err: ManifoldError) -> Self {
        CalibError::Manifold(err.to_string())
    }
}

impl From<IoError> for CalibError {
    fn from(err: IoError) -> Self {
        CalibError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for CalibError {
    fn from(err: toml::de::Error) -> Self {
        CalibError::Config(err.to_string())
    }
}
