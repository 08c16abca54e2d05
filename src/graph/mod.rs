//! Factor graph, residual blocks and the nonlinear solve driver.

pub mod factor;
pub mod factor_graph;
pub mod solver;

pub use factor::{Factor, FactorKind};
pub use factor_graph::{FactorGraph, FactorHandle, StateKey};
pub use solver::{SolverOptions, SolverReport, TerminationReason};
