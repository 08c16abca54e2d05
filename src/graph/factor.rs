//! Residual blocks binding measurements to state variables.

use nalgebra::{DVector, Vector3};

use crate::core::math::{angle_diff, SPEED_OF_LIGHT};
use crate::core::types::{Measurement, StateKind, StateVariable};
use crate::error::{FusionError, Result};
use crate::models::ErrorModel;

/// Kind tag of a residual block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactorKind {
    /// Pseudorange observation in ECEF.
    Pseudorange3Ecef,
    /// 4-DOF wheel odometry between two epochs.
    Odom4Ecef,
    /// Constant clock drift model between two epochs.
    ConstClockDrift,
}

impl FactorKind {
    /// Dimension of the raw (pre-kernel) residual.
    pub fn raw_dim(self) -> usize {
        match self {
            FactorKind::Pseudorange3Ecef => 1,
            FactorKind::Odom4Ecef => 4,
            FactorKind::ConstClockDrift => 2,
        }
    }

    /// Ordered state kinds this factor consumes.
    pub fn state_signature(self) -> &'static [StateKind] {
        match self {
            FactorKind::Pseudorange3Ecef => &[StateKind::Point3, StateKind::ClockError],
            FactorKind::Odom4Ecef => &[
                StateKind::Point3,
                StateKind::Angle,
                StateKind::Point3,
                StateKind::Angle,
            ],
            FactorKind::ConstClockDrift => &[
                StateKind::ClockError,
                StateKind::ClockDrift,
                StateKind::ClockError,
                StateKind::ClockDrift,
            ],
        }
    }
}

/// One residual block of the graph. Holds slot indices into the graph's
/// state arena, never references, so container growth cannot invalidate it.
#[derive(Debug, Clone)]
pub struct Factor {
    pub kind: FactorKind,
    pub states: Vec<usize>,
    pub measurement: Option<Measurement>,
    pub model: ErrorModel,
}

impl Factor {
    /// Raw residual `e` at the given state values, before whitening and
    /// before any robust kernel. Order of `states` matches the signature.
    pub fn raw_residual(&self, states: &[&StateVariable]) -> Result<Vec<f64>> {
        debug_assert_eq!(states.len(), self.kind.state_signature().len());
        match self.kind {
            FactorKind::Pseudorange3Ecef => self.pseudorange_residual(states),
            FactorKind::Odom4Ecef => self.odometry_residual(states),
            FactorKind::ConstClockDrift => Self::clock_drift_residual(states),
        }
    }

    /// Residual handed to the solver: raw residual run through the model.
    pub fn residual(&self, states: &[&StateVariable]) -> Result<DVector<f64>> {
        let raw = self.raw_residual(states)?;
        Ok(self.model.evaluate(&raw))
    }

    /// Residual dimension after the error model is applied.
    pub fn residual_dim(&self) -> usize {
        self.model.output_dim(self.kind.raw_dim())
    }

    fn measurement(&self) -> Result<&Measurement> {
        self.measurement.as_ref().ok_or_else(|| {
            FusionError::Numeric(format!("factor {:?} is missing its measurement", self.kind))
        })
    }

    fn pseudorange_residual(&self, states: &[&StateVariable]) -> Result<Vec<f64>> {
        let m = self.measurement()?;
        let sat = m.sat_position().ok_or_else(|| {
            FusionError::Numeric("pseudorange measurement without satellite data".into())
        })?;
        let sat_clock = m.sat_clock_bias().unwrap_or(0.0);

        let p = Vector3::new(states[0].mean[0], states[0].mean[1], states[0].mean[2]);
        let clock_error = states[1].mean[0];

        let predicted = (sat - p).norm() + SPEED_OF_LIGHT * sat_clock + clock_error;
        Ok(vec![predicted - m.mean[0]])
    }

    fn odometry_residual(&self, states: &[&StateVariable]) -> Result<Vec<f64>> {
        let m = self.measurement()?;
        let dt = states[2].time - states[0].time;
        if dt <= 0.0 {
            return Err(FusionError::Numeric(format!(
                "non-positive odometry interval {dt}s"
            )));
        }

        let p0 = &states[0].mean;
        let yaw0 = states[1].mean[0];
        let p1 = &states[2].mean;
        let yaw1 = states[3].mean[0];

        let dx = p1[0] - p0[0];
        let dy = p1[1] - p0[1];
        let dz = p1[2] - p0[2];

        // displacement rotated into the body frame at t0, as a velocity
        let (sin0, cos0) = yaw0.sin_cos();
        let vx = (cos0 * dx + sin0 * dy) / dt;
        let vy = (-sin0 * dx + cos0 * dy) / dt;
        let vz = dz / dt;
        let yaw_rate = angle_diff(yaw1, yaw0) / dt;

        Ok(vec![
            vx - m.mean[0],
            vy - m.mean[1],
            vz - m.mean[2],
            yaw_rate - m.mean[3],
        ])
    }

    fn clock_drift_residual(states: &[&StateVariable]) -> Result<Vec<f64>> {
        let dt = states[2].time - states[0].time;
        let ce0 = states[0].mean[0];
        let cd0 = states[1].mean[0];
        let ce1 = states[2].mean[0];
        let cd1 = states[3].mean[0];
        Ok(vec![ce1 - ce0 - dt * cd0, cd1 - cd0])
    }
}
