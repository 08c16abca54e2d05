//! Diagonal Gaussian noise model.

use nalgebra::DVector;

/// Diagonal Gaussian noise: stores the square-root information
/// `W = diag(1/σ)` and whitens raw residuals with it.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianDiagonal {
    sqrt_info: DVector<f64>,
}

impl GaussianDiagonal {
    /// Build from per-axis standard deviations. Non-positive entries are
    /// rejected by the caller before construction; debug builds assert.
    pub fn from_std_dev(std_dev: &[f64]) -> Self {
        debug_assert!(std_dev.iter().all(|s| *s > 0.0));
        Self {
            sqrt_info: DVector::from_iterator(std_dev.len(), std_dev.iter().map(|s| 1.0 / s)),
        }
    }

    /// Unit noise (identity square-root information).
    pub fn unit(dim: usize) -> Self {
        Self {
            sqrt_info: DVector::from_element(dim, 1.0),
        }
    }

    pub fn dim(&self) -> usize {
        self.sqrt_info.len()
    }

    /// Whitened residual `W·e`.
    pub fn whiten(&self, raw: &[f64]) -> DVector<f64> {
        debug_assert_eq!(raw.len(), self.dim());
        DVector::from_iterator(
            raw.len(),
            raw.iter().zip(self.sqrt_info.iter()).map(|(e, w)| e * w),
        )
    }
}
