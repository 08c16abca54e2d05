//! Online estimation of residual mixtures.
//!
//! The graph hands the estimator a flat array of unweighted scalar
//! residuals; the estimator refits the mixture in place. Two fitters are
//! available: classic Expectation-Maximization and a variational Bayes
//! update that prunes weakly supported components, enabling automatic
//! model-order selection when the caller grows the mixture over time.

pub mod em;
pub mod vbi;

use serde::{Deserialize, Serialize};

use crate::error::{FusionError, Result};
use crate::models::GaussianMixture;

/// Fitting algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningAlgorithm {
    Em,
    Vbi,
}

/// Knobs of one `estimate` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationConfig {
    pub algorithm: TuningAlgorithm,
    /// Drop components below `min_weight` after the fit.
    pub remove_small_components: bool,
    /// Merge near-identical components after the fit.
    pub merge_similar_components: bool,
    pub min_weight: f64,
    /// Hard iteration cap of the inner fit loop.
    pub max_iterations: usize,
    /// Log-likelihood change below which an iteration counts as converged.
    pub tolerance: f64,
    /// Consecutive converged iterations required to stop.
    pub tolerance_streak: usize,
    /// Degrees of freedom of the Wishart precision prior (VBI only).
    pub prior_wishart_dof: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            algorithm: TuningAlgorithm::Em,
            remove_small_components: false,
            merge_similar_components: false,
            min_weight: 1e-3,
            max_iterations: 100,
            tolerance: 1e-5,
            tolerance_streak: 10,
            prior_wishart_dof: 2.0,
        }
    }
}

/// Refit the mixture to the residual samples, then apply the configured
/// post-passes and renormalize. The mixture must already hold at least one
/// component (see [`GaussianMixture::init_spread`]).
pub fn estimate(
    gmm: &mut GaussianMixture,
    samples: &[f64],
    config: &EstimationConfig,
) -> Result<()> {
    if samples.is_empty() {
        return Err(FusionError::Numeric(
            "cannot estimate mixture from zero residual samples".into(),
        ));
    }
    if gmm.is_empty() {
        return Err(FusionError::Config(
            "mixture must be initialized before estimation".into(),
        ));
    }

    match config.algorithm {
        TuningAlgorithm::Em => em::fit(gmm, samples, config),
        TuningAlgorithm::Vbi => vbi::fit(gmm, samples, config),
    }?;

    if config.remove_small_components {
        gmm.prune_small(config.min_weight);
    }
    if config.merge_similar_components {
        gmm.merge_similar();
    }
    gmm.normalize_weights();
    Ok(())
}

/// Replacement for a component that collapsed to non-positive variance:
/// respawned from the spread initializer's scale.
pub(crate) fn respawn_component(
    gmm: &GaussianMixture,
    samples: &[f64],
    weight: f64,
) -> crate::models::GaussianComponent {
    let range = if gmm.init_range() > 0.0 {
        gmm.init_range()
    } else {
        crate::core::math::std_dev(samples).max(1.0)
    };
    crate::models::GaussianComponent::new(0.0, range, weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_rejects_empty_inputs() {
        let mut gmm = GaussianMixture::init_spread(2, 10.0);
        let cfg = EstimationConfig::default();
        assert!(estimate(&mut gmm, &[], &cfg).is_err());

        let mut empty = GaussianMixture::new();
        assert!(estimate(&mut empty, &[1.0, 2.0], &cfg).is_err());
    }

    #[test]
    fn test_estimate_normalizes_weights() {
        let mut gmm = GaussianMixture::init_spread(2, 10.0);
        let samples: Vec<f64> = (0..100).map(|i| (i % 7) as f64 * 0.1).collect();
        estimate(&mut gmm, &samples, &EstimationConfig::default()).unwrap();
        let total: f64 = gmm.components().iter().map(|c| c.weight).sum();
        approx::assert_relative_eq!(total, 1.0, epsilon = 1e-9);
    }
}
