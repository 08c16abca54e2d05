//! Error models attached to factors.
//!
//! Every model turns a raw residual `e` into the vector `r′` that the outer
//! solver squares and sums. The closed sum type keeps dispatch in one place
//! (`evaluate`) and lets the graph swap models on live factors without
//! touching topology.

pub mod gaussian;
pub mod mixture;
pub mod robust;

pub use gaussian::GaussianDiagonal;
pub use mixture::{GaussianComponent, GaussianMixture};
pub use robust::{CdceKernel, DcsKernel};

use nalgebra::DVector;

use crate::core::math::log_sum_exp;

/// Floor added to the SumMix likelihood ratio before the log, so a sample
/// far from every component still yields a finite residual.
const SUM_MIX_FLOOR: f64 = 1e-9;

/// Noise model of a single factor. All variants evaluate as pure functions
/// of the raw residual; per-factor constants are captured at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorModel {
    /// Plain whitening by the measurement std-dev.
    Gaussian(GaussianDiagonal),
    /// Dynamic Covariance Scaling on the whitened residual.
    Dcs(DcsKernel),
    /// Closed-form Dynamic Covariance Estimation on the raw residual.
    Cdce(CdceKernel),
    /// Full-sum mixture likelihood, collapsed to a scalar residual.
    SumMix(GaussianMixture),
    /// Dominant-component mixture likelihood with a weight penalty term.
    MaxMix(GaussianMixture),
}

impl ErrorModel {
    /// Dimension of the residual this model hands to the solver for a raw
    /// residual of dimension `raw_dim`.
    pub fn output_dim(&self, raw_dim: usize) -> usize {
        match self {
            ErrorModel::Gaussian(_) | ErrorModel::Dcs(_) | ErrorModel::Cdce(_) => raw_dim,
            ErrorModel::SumMix(_) => 1,
            ErrorModel::MaxMix(_) => raw_dim + 1,
        }
    }

    /// Apply the model to a raw residual.
    ///
    /// The mixture variants operate on scalar residuals (the mixtures are
    /// one-dimensional); the graph only binds them to dim-1 factors.
    pub fn evaluate(&self, raw: &[f64]) -> DVector<f64> {
        match self {
            ErrorModel::Gaussian(g) => g.whiten(raw),
            ErrorModel::Dcs(k) => k.evaluate(raw),
            ErrorModel::Cdce(k) => k.evaluate(raw),
            ErrorModel::SumMix(gmm) => {
                debug_assert_eq!(raw.len(), 1);
                DVector::from_vec(vec![sum_mix_residual(gmm, raw[0])])
            }
            ErrorModel::MaxMix(gmm) => {
                debug_assert_eq!(raw.len(), 1);
                let (r, penalty) = max_mix_residual(gmm, raw[0]);
                DVector::from_vec(vec![r, penalty])
            }
        }
    }

    /// Replace the mixture inside a SumMix/MaxMix model. No-op for the
    /// closed-form variants.
    pub fn rebind_mixture(&mut self, gmm: &GaussianMixture) {
        match self {
            ErrorModel::SumMix(existing) | ErrorModel::MaxMix(existing) => {
                *existing = gmm.clone();
            }
            _ => {}
        }
    }
}

/// SumMix: `r′ = √(−2·ln(L_sum/C + δ))` with `C = Σ w_k·S_k`, evaluated in
/// log-space. The ratio is ≤ 1 by construction, so the root argument is
/// non-negative up to the floor, which is clamped away.
fn sum_mix_residual(gmm: &GaussianMixture, e: f64) -> f64 {
    let scores: Vec<f64> = gmm
        .components()
        .iter()
        .map(|c| c.scaled_log_density(e))
        .collect();
    let log_l = log_sum_exp(&scores);
    let log_c = gmm
        .components()
        .iter()
        .map(|c| c.weight * c.sqrt_info())
        .sum::<f64>()
        .ln();
    let ratio = (log_l - log_c).exp();
    (-2.0 * (ratio + SUM_MIX_FLOOR).ln()).max(0.0).sqrt()
}

/// MaxMix: whitened residual of the dominant component plus the weight
/// penalty `√(−2·ln(w·S/C))` with `C = max_k w_k·S_k`, which keeps the
/// penalty real and zero for the globally heaviest component.
fn max_mix_residual(gmm: &GaussianMixture, e: f64) -> (f64, f64) {
    let best = gmm
        .components()
        .iter()
        .max_by(|a, b| a.scaled_log_density(e).total_cmp(&b.scaled_log_density(e)))
        .expect("mixture must have at least one component");

    let log_c = gmm
        .components()
        .iter()
        .map(|c| (c.weight * c.sqrt_info()).ln())
        .fold(f64::NEG_INFINITY, f64::max);

    let r = best.sqrt_info() * (e - best.mean);
    let penalty_sq = -2.0 * ((best.weight * best.sqrt_info()).ln() - log_c);
    (r, penalty_sq.max(0.0).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_mode() -> GaussianMixture {
        let mut gmm = GaussianMixture::new();
        gmm.add_component(GaussianComponent::new(0.0, 1.0, 0.8));
        gmm.add_component(GaussianComponent::new(20.0, 5.0, 0.2));
        gmm
    }

    #[test]
    fn test_output_dims() {
        let gmm = two_mode();
        assert_eq!(ErrorModel::Gaussian(GaussianDiagonal::unit(4)).output_dim(4), 4);
        assert_eq!(ErrorModel::SumMix(gmm.clone()).output_dim(1), 1);
        assert_eq!(ErrorModel::MaxMix(gmm).output_dim(1), 2);
    }

    #[test]
    fn test_single_component_max_equals_sum() {
        // with one component of weight 1 both formulations reduce to the
        // plain whitened residual (in norm)
        let mut gmm = GaussianMixture::new();
        gmm.add_component(GaussianComponent::new(0.0, 2.0, 1.0));

        for e in [-3.0, -0.5, 0.0, 1.0, 4.0] {
            let sm = ErrorModel::SumMix(gmm.clone()).evaluate(&[e]);
            let mm = ErrorModel::MaxMix(gmm.clone()).evaluate(&[e]);
            assert_relative_eq!(sm.norm(), mm.norm(), epsilon = 1e-6);
            assert_relative_eq!(sm.norm(), (e / 2.0).abs(), epsilon = 1e-4);
        }
    }

    #[test]
    fn test_max_mix_penalty_zero_for_dominant_component() {
        let gmm = two_mode();
        let r = ErrorModel::MaxMix(gmm).evaluate(&[0.1]);
        // near the LOS mode the heaviest component wins, penalty vanishes
        assert_relative_eq!(r[0], 0.1, epsilon = 1e-9);
        assert_relative_eq!(r[1], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_max_mix_switches_to_outlier_mode() {
        let gmm = two_mode();
        let r = ErrorModel::MaxMix(gmm).evaluate(&[20.0]);
        // at the NLOS mode the second component dominates; the residual is
        // whitened by its σ and the penalty pays for the lower weight
        assert_relative_eq!(r[0], 0.0, epsilon = 1e-9);
        assert!(r[1] > 0.0);
    }

    #[test]
    fn test_sum_mix_monotone_away_from_modes() {
        let gmm = two_mode();
        let model = ErrorModel::SumMix(gmm);
        let near = model.evaluate(&[0.0])[0];
        let mid = model.evaluate(&[5.0])[0];
        let far = model.evaluate(&[60.0])[0];
        assert!(near < mid);
        assert!(mid < far);
    }

    #[test]
    fn test_sum_mix_finite_far_from_all_modes() {
        let gmm = two_mode();
        let r = ErrorModel::SumMix(gmm).evaluate(&[1e6]);
        assert!(r[0].is_finite());
    }

    #[test]
    fn test_rebind_mixture_updates_in_place() {
        let mut model = ErrorModel::SumMix(two_mode());
        let mut replacement = GaussianMixture::new();
        replacement.add_component(GaussianComponent::new(0.0, 1.0, 1.0));
        model.rebind_mixture(&replacement);
        match &model {
            ErrorModel::SumMix(g) => assert_eq!(g.num_components(), 1),
            _ => unreachable!(),
        }
        // closed-form models ignore the rebind
        let mut gauss = ErrorModel::Gaussian(GaussianDiagonal::unit(1));
        gauss.rebind_mixture(&replacement);
        assert_eq!(gauss.output_dim(1), 1);
    }
}
