//! Closed-form robust kernels.
//!
//! Both kernels reshape the residual handed to the solver so that large
//! errors lose influence; neither carries mutable state, so evaluation is
//! safe under parallel residual evaluation.

use nalgebra::DVector;

use super::gaussian::GaussianDiagonal;

/// Dynamic Covariance Scaling.
///
/// For the whitened residual `r` with `s = ‖r‖²`, the scale
/// `k = min(1, 2φ/(φ + s))` is applied as `√k·r`. Influence saturates for
/// `s ≫ φ`, which bounds the effect of a single outlier on the solution.
#[derive(Debug, Clone, PartialEq)]
pub struct DcsKernel {
    phi: f64,
    noise: GaussianDiagonal,
}

impl DcsKernel {
    pub fn new(phi: f64, noise: GaussianDiagonal) -> Self {
        debug_assert!(phi > 0.0);
        Self { phi, noise }
    }

    pub fn evaluate(&self, raw: &[f64]) -> DVector<f64> {
        let whitened = self.noise.whiten(raw);
        let s = whitened.norm_squared();
        let k = (2.0 * self.phi / (self.phi + s)).min(1.0);
        whitened * k.sqrt()
    }
}

/// Closed-form Dynamic Covariance Estimation.
///
/// Works on the unwhitened residual: the nominal σ captured at construction
/// is inflated by the empirical magnitude, `r′ = e·√(σ²/(σ² + ‖e‖²/ν))`.
#[derive(Debug, Clone, PartialEq)]
pub struct CdceKernel {
    sigma: f64,
    dof: f64,
}

impl CdceKernel {
    /// Default degrees of freedom for the covariance estimate.
    pub const DEFAULT_DOF: f64 = 1.0;

    pub fn new(sigma: f64) -> Self {
        debug_assert!(sigma > 0.0);
        Self {
            sigma,
            dof: Self::DEFAULT_DOF,
        }
    }

    pub fn evaluate(&self, raw: &[f64]) -> DVector<f64> {
        let e = DVector::from_column_slice(raw);
        let s2 = self.sigma * self.sigma;
        let scale = (s2 / (s2 + e.norm_squared() / self.dof)).sqrt();
        e * scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_dcs_passes_small_residuals() {
        let kernel = DcsKernel::new(1.0, GaussianDiagonal::unit(1));
        // s = 0.25 < phi: k = min(1, 2/(1.25)) = 1
        let r = kernel.evaluate(&[0.5]);
        assert_relative_eq!(r[0], 0.5);
    }

    #[test]
    fn test_dcs_saturates_outliers() {
        let phi = 1.0;
        let kernel = DcsKernel::new(phi, GaussianDiagonal::unit(1));
        let e = 50.0;
        let r = kernel.evaluate(&[e]);
        let s = e * e;
        let expected = (2.0 * phi / (phi + s)).sqrt() * e;
        assert_relative_eq!(r[0], expected, epsilon = 1e-12);
        // squared contribution bounded by 2·phi
        assert!(r[0] * r[0] <= 2.0 * phi + 1e-9);
    }

    #[test]
    fn test_cdce_inflates_sigma_with_magnitude() {
        let kernel = CdceKernel::new(1.0);
        let small = kernel.evaluate(&[0.1])[0].abs();
        let large = kernel.evaluate(&[100.0])[0].abs();
        // near-linear for small errors, saturating for large ones
        assert_relative_eq!(small, 0.1, epsilon = 1e-2);
        assert!(large < 2.0);
    }
}
