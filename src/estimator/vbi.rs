//! Variational Bayesian fit for 1-D Gaussian mixtures.
//!
//! Each component carries a Normal-Gamma posterior (the 1-D reduction of
//! the Normal-Wishart prior): Dirichlet pseudo-count α over weights, mean
//! `m` with precision scale β, and Gamma shape/rate (a, b) over the
//! component precision λ. The sparse Dirichlet prior starves components the
//! data does not support, so their posterior weight decays and the caller's
//! pruning removes them; model-order selection falls out of the update.

use crate::core::math::{digamma, log_sum_exp};
use crate::error::Result;
use crate::models::{GaussianComponent, GaussianMixture};

use super::{respawn_component, EstimationConfig};

/// Sparse Dirichlet concentration; values ≪ 1 drive unsupported components
/// toward zero weight.
const PRIOR_DIRICHLET: f64 = 1e-3;

/// Prior pseudo-observations of each component mean.
const PRIOR_BETA: f64 = 1e-2;

/// Prior mean location; zero matches the zero-centered LOS convention.
const PRIOR_MEAN: f64 = 0.0;

/// Per-component Normal-Gamma posterior.
struct Posterior {
    alpha: f64,
    beta: f64,
    m: f64,
    a: f64,
    b: f64,
}

/// Variational update loop.
///
/// The prior Gamma shape is `prior_wishart_dof / 2`; the rate is seeded so
/// the prior expected precision matches each component's current σ.
pub fn fit(gmm: &mut GaussianMixture, samples: &[f64], config: &EstimationConfig) -> Result<()> {
    let n = samples.len();
    let k = gmm.num_components();
    let a0 = 0.5 * config.prior_wishart_dof;

    let mut post: Vec<Posterior> = gmm
        .components()
        .iter()
        .map(|c| Posterior {
            alpha: PRIOR_DIRICHLET + c.weight * n as f64,
            beta: PRIOR_BETA,
            m: c.mean,
            a: a0,
            b: a0 * c.std_dev * c.std_dev,
        })
        .collect();

    let mut resp = vec![0.0; n * k];
    let mut scores = vec![0.0; k];
    let mut prev_bound = f64::NEG_INFINITY;
    let mut streak = 0usize;

    for _ in 0..config.max_iterations {
        // E-step with expected sufficient statistics
        let alpha_total: f64 = post.iter().map(|p| p.alpha).sum();
        let psi_total = digamma(alpha_total);

        let mut bound = 0.0;
        for (i, &x) in samples.iter().enumerate() {
            for (score, p) in scores.iter_mut().zip(&post) {
                let e_ln_pi = digamma(p.alpha) - psi_total;
                let e_ln_lambda = digamma(p.a) - p.b.ln();
                let d = x - p.m;
                let e_lambda_d2 = p.a / p.b * d * d + 1.0 / p.beta;
                *score = e_ln_pi + 0.5 * e_ln_lambda
                    - 0.5 * (2.0 * std::f64::consts::PI).ln()
                    - 0.5 * e_lambda_d2;
            }
            let norm = log_sum_exp(&scores);
            bound += norm;
            for (j, score) in scores.iter().enumerate() {
                resp[i * k + j] = (score - norm).exp();
            }
        }

        // M-step: refresh the posteriors from the weighted statistics
        for (j, p) in post.iter_mut().enumerate() {
            let nk: f64 = (0..n).map(|i| resp[i * k + j]).sum();
            let nk_safe = nk.max(1e-12);
            let xbar: f64 = (0..n).map(|i| resp[i * k + j] * samples[i]).sum::<f64>() / nk_safe;
            let sk: f64 = (0..n)
                .map(|i| resp[i * k + j] * (samples[i] - xbar).powi(2))
                .sum::<f64>()
                / nk_safe;

            p.alpha = PRIOR_DIRICHLET + nk;
            p.beta = PRIOR_BETA + nk;
            p.m = (PRIOR_BETA * PRIOR_MEAN + nk * xbar) / p.beta;
            p.a = a0 + 0.5 * nk;
            p.b = a0 * gmm.init_range().max(1.0).powi(2) / config.prior_wishart_dof.max(1.0)
                + 0.5
                    * (nk * sk
                        + PRIOR_BETA * nk * (xbar - PRIOR_MEAN).powi(2) / p.beta);
        }

        if (bound - prev_bound).abs() < config.tolerance {
            streak += 1;
            if streak >= config.tolerance_streak {
                break;
            }
        } else {
            streak = 0;
        }
        prev_bound = bound;
    }

    // collapse the posteriors into point estimates
    let alpha_total: f64 = post.iter().map(|p| p.alpha).sum();
    for (j, p) in post.iter().enumerate() {
        let weight = p.alpha / alpha_total;
        let var = p.b / p.a;
        if !var.is_finite() || var <= 0.0 {
            let replacement = respawn_component(gmm, samples, weight);
            gmm.components_mut()[j] = replacement;
        } else {
            gmm.components_mut()[j] = GaussianComponent::new(p.m, var.sqrt(), weight);
        }
    }
    gmm.normalize_weights();
    Ok(())
}
