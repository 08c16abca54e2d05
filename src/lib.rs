//! GaganFusion - Robust GNSS pseudorange + wheel odometry fusion
//!
//! Online 3D pose estimation in a sliding-window factor graph. Pseudorange
//! noise is treated as a heavy-tailed, multi-modal distribution that is
//! learned *while* the graph is being solved, so multipath and NLOS
//! outliers do not corrupt the trajectory.
//!
//! # Architecture
//!
//! The crate is organized into 5 logical layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    app/ + main                      │  ← Fusion driver
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     graph/                          │  ← Factor graph,
//! │        (factors, arena, LM solve driver)            │    solve loop
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │              models/ + estimator/                   │  ← Error models,
//! │     (Gaussian, DCS, cDCE, GMM; EM and VBI fits)     │    self-tuning
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     data/                           │  ← Time-indexed
//! │             (dataset, sensor file I/O)              │    storage
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                 (types, math)                       │
//! └─────────────────────────────────────────────────────┘
//! ```

// Layer 1: Core foundation (no internal deps)
pub mod core;

// Layer 2: Errors, shared by everything above
pub mod error;

// Layer 3: Data storage and file formats
pub mod data;

// Layer 4: Error models and their online estimation
pub mod estimator;
pub mod models;

// Layer 5: Factor graph and solver
pub mod graph;

// Layer 6: Application driver
pub mod app;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

pub use crate::app::{
    clock_drift_noise_for, run, ErrorModelConfig, ErrorModelKind, FusionConfig, MixtureKind,
    SelfTuner, TuningKind, CLOCK_DRIFT_STATE, CLOCK_ERROR_STATE, ORIENTATION_STATE, POSITION_STATE,
};
pub use crate::core::types::{
    Measurement, MeasurementKind, MeasurementMeta, StateKind, StateVariable, Time,
};
pub use crate::data::{file_io, DataSet, SensorDataSet, StateDataSet};
pub use crate::error::{FusionError, Result};
pub use crate::estimator::{EstimationConfig, TuningAlgorithm};
pub use crate::graph::{
    Factor, FactorGraph, FactorHandle, FactorKind, SolverOptions, SolverReport, TerminationReason,
};
pub use crate::models::{
    CdceKernel, DcsKernel, ErrorModel, GaussianComponent, GaussianDiagonal, GaussianMixture,
};
