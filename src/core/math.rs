//! Math primitives shared across the crate.

/// Speed of light in vacuum [m/s], used to convert satellite clock bias
/// to a range correction.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Normalize an angle to (-π, π].
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle;
    while a > std::f64::consts::PI {
        a -= 2.0 * std::f64::consts::PI;
    }
    while a <= -std::f64::consts::PI {
        a += 2.0 * std::f64::consts::PI;
    }
    a
}

/// Shortest signed difference `a - b` between two angles, in (-π, π].
pub fn angle_diff(a: f64, b: f64) -> f64 {
    normalize_angle(a - b)
}

/// Numerically stable log(Σ exp(x_i)).
///
/// Shifts by the maximum before exponentiating so mixtures with widely
/// separated log-densities do not underflow to -inf.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Sample mean of a slice. Returns 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation of a slice.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Digamma function ψ(x) = d/dx ln Γ(x), for x > 0.
///
/// Uses the recurrence ψ(x+1) = ψ(x) + 1/x to shift the argument into the
/// asymptotic region (x ≥ 6), then a Bernoulli-coefficient expansion.
/// Sufficient for the variational mixture updates, which only evaluate it
/// at positive hyperparameters.
pub fn digamma(x: f64) -> f64 {
    debug_assert!(x > 0.0, "digamma argument must be positive");

    // B_{2k}/(2k) for k = 1..5
    const ASYMP: [f64; 5] = [
        1.0 / 12.0,
        -1.0 / 120.0,
        1.0 / 252.0,
        -1.0 / 240.0,
        1.0 / 132.0,
    ];

    let mut result = 0.0;
    let mut xx = x;
    while xx < 6.0 {
        result -= 1.0 / xx;
        xx += 1.0;
    }

    result += xx.ln() - 0.5 / xx;
    let inv_x2 = 1.0 / (xx * xx);
    let mut term = inv_x2;
    for c in ASYMP {
        result -= c * term;
        term *= inv_x2;
    }
    result
}
