//! Expectation-Maximization fit for 1-D Gaussian mixtures.

use crate::core::math::log_sum_exp;
use crate::error::Result;
use crate::models::{GaussianComponent, GaussianMixture};

use super::{respawn_component, EstimationConfig};

/// Variance floor; components collapsing below it are respawned from the
/// spread initializer instead of degenerating into delta spikes.
const VARIANCE_FLOOR: f64 = 1e-12;

/// Standard EM with log-space responsibilities.
///
/// Terminates when the log-likelihood change stays below the tolerance for
/// `tolerance_streak` consecutive iterations, or at the iteration cap.
pub fn fit(gmm: &mut GaussianMixture, samples: &[f64], config: &EstimationConfig) -> Result<()> {
    let n = samples.len();
    let k = gmm.num_components();

    let mut resp = vec![0.0; n * k];
    let mut scores = vec![0.0; k];
    let mut prev_ll = f64::NEG_INFINITY;
    let mut streak = 0usize;

    for _ in 0..config.max_iterations {
        // E-step
        let mut ll = 0.0;
        for (i, &x) in samples.iter().enumerate() {
            for (score, c) in scores.iter_mut().zip(gmm.components()) {
                *score = c.log_density(x);
            }
            let norm = log_sum_exp(&scores);
            ll += norm;
            for (j, score) in scores.iter().enumerate() {
                resp[i * k + j] = (score - norm).exp();
            }
        }

        // M-step
        for j in 0..k {
            let nk: f64 = (0..n).map(|i| resp[i * k + j]).sum();
            if nk < VARIANCE_FLOOR {
                let w = gmm.components()[j].weight;
                let replacement = respawn_component(gmm, samples, w);
                gmm.components_mut()[j] = replacement;
                continue;
            }

            let mean: f64 = (0..n).map(|i| resp[i * k + j] * samples[i]).sum::<f64>() / nk;
            let var: f64 = (0..n)
                .map(|i| resp[i * k + j] * (samples[i] - mean).powi(2))
                .sum::<f64>()
                / nk;
            let weight = nk / n as f64;

            if !var.is_finite() || var <= VARIANCE_FLOOR {
                let replacement = respawn_component(gmm, samples, weight);
                gmm.components_mut()[j] = replacement;
            } else {
                gmm.components_mut()[j] = GaussianComponent::new(mean, var.sqrt(), weight);
            }
        }
        gmm.normalize_weights();

        // termination bookkeeping
        if (ll - prev_ll).abs() < config.tolerance {
            streak += 1;
            if streak >= config.tolerance_streak {
                break;
            }
        } else {
            streak = 0;
        }
        prev_ll = ll;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    fn bimodal_samples(n: usize, outlier_ratio: f64) -> Vec<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let los = Normal::new(0.0, 1.0).unwrap();
        let nlos = Normal::new(20.0, 5.0).unwrap();
        (0..n)
            .map(|i| {
                if (i as f64 / n as f64) < outlier_ratio {
                    nlos.sample(&mut rng)
                } else {
                    los.sample(&mut rng)
                }
            })
            .collect()
    }

    #[test]
    fn test_em_recovers_two_modes() {
        let samples = bimodal_samples(2000, 0.3);
        let mut gmm = GaussianMixture::init_spread(2, 10.0);
        fit(&mut gmm, &samples, &EstimationConfig::default()).unwrap();

        let mut means: Vec<f64> = gmm.components().iter().map(|c| c.mean).collect();
        means.sort_by(f64::total_cmp);
        assert!(means[0].abs() < 1.0, "LOS mode at {}", means[0]);
        assert!(means[1] > 15.0, "NLOS mode at {}", means[1]);

        // the LOS mode should carry roughly 70% of the mass
        let los_weight = gmm
            .components()
            .iter()
            .find(|c| c.mean.abs() < 1.0)
            .unwrap()
            .weight;
        assert!((los_weight - 0.7).abs() < 0.1);
    }

    #[test]
    fn test_em_unimodal_concentrates_weight() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let dist = Normal::new(1.0, 0.5).unwrap();
        let samples: Vec<f64> = (0..500).map(|_| dist.sample(&mut rng)).collect();

        let mut gmm = GaussianMixture::init_spread(3, 10.0);
        fit(&mut gmm, &samples, &EstimationConfig::default()).unwrap();

        // best component should sit on the data
        let best = gmm
            .components()
            .iter()
            .max_by(|a, b| a.weight.total_cmp(&b.weight))
            .unwrap();
        assert!((best.mean - 1.0).abs() < 0.3);
        assert!(best.std_dev < 1.5);
    }

    #[test]
    fn test_em_respawns_collapsed_component() {
        // all mass on a single point collapses variances; the fit must not
        // produce NaN or zero-σ components
        let samples = vec![2.0; 50];
        let mut gmm = GaussianMixture::init_spread(2, 10.0);
        fit(&mut gmm, &samples, &EstimationConfig::default()).unwrap();
        for c in gmm.components() {
            assert!(c.std_dev > 0.0 && c.std_dev.is_finite());
            assert!(c.mean.is_finite());
        }
    }
}
