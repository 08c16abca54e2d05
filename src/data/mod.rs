//! Time-indexed data storage and the textual sensor file format.

pub mod dataset;
pub mod file_io;

pub use dataset::DataSet;

use crate::core::types::{Measurement, MeasurementKind, StateVariable};

/// All sensor readings of a run, keyed by measurement kind.
pub type SensorDataSet = DataSet<MeasurementKind, Measurement>;

/// State variables keyed by name (`"position"`, `"clock_error"`, ...).
/// Used for graph exports and for the recorded trajectory.
pub type StateDataSet = DataSet<String, StateVariable>;
