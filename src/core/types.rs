//! Measurement and state variable catalogs.
//!
//! Measurements are immutable once ingested; state variables are owned by
//! the factor graph and mutated only by the solver or `set_mean`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::math::normalize_angle;

/// Timestamp in seconds, ordered by `f64::total_cmp` so it can key ordered
/// maps. Equality is bit-exact, matching the stream semantics: entries at
/// "the same time" are entries inserted with the identical f64 value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Time(pub f64);

impl Eq for Time {}

impl Ord for Time {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Time {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Time {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<f64> for Time {
    fn from(t: f64) -> Self {
        Time(t)
    }
}

/// Kind tag for a measurement stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MeasurementKind {
    /// Scalar pseudorange to one satellite (ECEF).
    Pseudorange3,
    /// Body-frame velocity (3 axes) plus yaw rate from wheel odometry.
    Odom3,
}

impl MeasurementKind {
    /// Record tag used in the textual sensor format.
    pub fn tag(self) -> &'static str {
        match self {
            MeasurementKind::Pseudorange3 => "pseudorange3",
            MeasurementKind::Odom3 => "odom3",
        }
    }
}

/// Type-specific measurement payload beyond mean and std-dev.
#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementMeta {
    None,
    /// Transmitter data attached to a pseudorange.
    Satellite {
        /// Satellite position in ECEF [m].
        position: Vector3<f64>,
        /// Satellite clock bias [s]; converted to meters in the residual.
        clock_bias: f64,
    },
}

/// One sensor reading. Immutable once inserted into a data set.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub kind: MeasurementKind,
    pub time: f64,
    pub mean: DVector<f64>,
    pub std_dev: DVector<f64>,
    pub meta: MeasurementMeta,
}

impl Measurement {
    /// Pseudorange to one satellite.
    pub fn pseudorange(
        time: f64,
        range: f64,
        std_dev: f64,
        sat_position: Vector3<f64>,
        sat_clock_bias: f64,
    ) -> Self {
        Self {
            kind: MeasurementKind::Pseudorange3,
            time,
            mean: DVector::from_vec(vec![range]),
            std_dev: DVector::from_vec(vec![std_dev]),
            meta: MeasurementMeta::Satellite {
                position: sat_position,
                clock_bias: sat_clock_bias,
            },
        }
    }

    /// Wheel odometry: body-frame velocity [m/s] and yaw rate [rad/s],
    /// with one std-dev per axis in the same order.
    pub fn odometry(time: f64, velocity: Vector3<f64>, yaw_rate: f64, std_dev: [f64; 4]) -> Self {
        Self {
            kind: MeasurementKind::Odom3,
            time,
            mean: DVector::from_vec(vec![velocity.x, velocity.y, velocity.z, yaw_rate]),
            std_dev: DVector::from_vec(std_dev.to_vec()),
            meta: MeasurementMeta::None,
        }
    }

    /// Satellite position for pseudorange measurements.
    pub fn sat_position(&self) -> Option<Vector3<f64>> {
        match self.meta {
            MeasurementMeta::Satellite { position, .. } => Some(position),
            MeasurementMeta::None => None,
        }
    }

    /// Satellite clock bias [s] for pseudorange measurements.
    pub fn sat_clock_bias(&self) -> Option<f64> {
        match self.meta {
            MeasurementMeta::Satellite { clock_bias, .. } => Some(clock_bias),
            MeasurementMeta::None => None,
        }
    }
}

/// Kind tag for a state variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKind {
    /// 3D position in ECEF [m].
    Point3,
    /// Heading angle [rad], wrapped to (-π, π].
    Angle,
    /// Receiver clock error [m].
    ClockError,
    /// Receiver clock drift [m/s].
    ClockDrift,
}

impl StateKind {
    /// Number of scalar parameters in the block.
    pub fn dim(self) -> usize {
        match self {
            StateKind::Point3 => 3,
            StateKind::Angle | StateKind::ClockError | StateKind::ClockDrift => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StateKind::Point3 => "Point3",
            StateKind::Angle => "Angle",
            StateKind::ClockError => "ClockError",
            StateKind::ClockDrift => "ClockDrift",
        }
    }
}

/// One optimizable variable of the factor graph.
#[derive(Debug, Clone, PartialEq)]
pub struct StateVariable {
    pub kind: StateKind,
    pub time: f64,
    pub mean: DVector<f64>,
    pub covariance: Option<nalgebra::DMatrix<f64>>,
}

impl StateVariable {
    /// Create a zero-initialized state at a timestamp.
    pub fn new(kind: StateKind, time: f64) -> Self {
        Self {
            kind,
            time,
            mean: DVector::zeros(kind.dim()),
            covariance: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.kind.dim()
    }

    /// Overwrite the mean. Panics if the length does not match the kind.
    pub fn set_mean(&mut self, mean: &[f64]) {
        assert_eq!(mean.len(), self.dim(), "mean length must match state dim");
        self.mean.copy_from_slice(mean);
        if self.kind == StateKind::Angle {
            self.mean[0] = normalize_angle(self.mean[0]);
        }
    }

    /// Tangent-space update: add a solver increment to the parameter block.
    /// Angle states are wrapped back into (-π, π] afterwards.
    pub fn apply_delta(&mut self, delta: &[f64]) {
        debug_assert_eq!(delta.len(), self.dim());
        for (m, d) in self.mean.iter_mut().zip(delta) {
            *m += d;
        }
        if self.kind == StateKind::Angle {
            self.mean[0] = normalize_angle(self.mean[0]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_time_total_order() {
        let mut times = vec![Time(2.0), Time(0.5), Time(1.0)];
        times.sort();
        assert_eq!(times, vec![Time(0.5), Time(1.0), Time(2.0)]);
    }

    #[test]
    fn test_state_dims() {
        assert_eq!(StateKind::Point3.dim(), 3);
        assert_eq!(StateKind::Angle.dim(), 1);
        assert_eq!(StateKind::ClockError.dim(), 1);
        assert_eq!(StateKind::ClockDrift.dim(), 1);
    }

    #[test]
    fn test_angle_wraps_on_update() {
        let mut angle = StateVariable::new(StateKind::Angle, 0.0);
        angle.set_mean(&[3.0]);
        angle.apply_delta(&[1.0]);
        // 4.0 rad wraps to 4.0 - 2π
        assert_relative_eq!(angle.mean[0], 4.0 - 2.0 * std::f64::consts::PI, epsilon = 1e-12);
    }

    #[test]
    fn test_pseudorange_accessors() {
        let m = Measurement::pseudorange(1.0, 2.0e7, 1.0, Vector3::new(1.0, 2.0, 3.0), 1e-6);
        assert_eq!(m.sat_position(), Some(Vector3::new(1.0, 2.0, 3.0)));
        assert_eq!(m.sat_clock_bias(), Some(1e-6));
    }

    #[test]
    fn test_odometry_layout() {
        let m = Measurement::odometry(0.0, Vector3::new(1.0, 0.0, 0.0), 0.1, [0.01; 4]);
        assert_eq!(m.mean.len(), 4);
        assert_relative_eq!(m.mean[3], 0.1);
        assert!(m.sat_position().is_none());
    }
}
