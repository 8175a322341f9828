pub mod calibration;
pub mod config;
pub mod core;
pub mod error;
pub mod factors;
pub mod io;
pub mod logger;
pub mod manifold;
pub mod metrics;
pub mod model;
pub mod optimizer;
pub mod sensor;

pub use calibration::{CalibrationStrategy, StrategyKind};
pub use config::CalibrationConfig;
pub use error::{CalibError, CalibResult};
pub use io::{load_graph, G2oLoader, GraphLoader, IoError, TagRegistry};
pub use logger::{init_logger, init_logger_with_level};
pub use metrics::{MetricKind, TrajectoryError};
pub use model::{Model, StepPolicy};
pub use sensor::Sensor;
