//! One-dimensional Gaussian mixtures for heavy-tailed residual modelling.
//!
//! The mixture is the shared currency between the estimator (which fits it
//! to residual samples) and the MaxMix/SumMix likelihood kernels (which
//! evaluate it inside the solver). Components are kept in an explicit order
//! so they can be sorted by weight and trimmed from the tail.

use serde::{Deserialize, Serialize};

use crate::core::math::log_sum_exp;

/// A single mixture component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianComponent {
    pub mean: f64,
    pub std_dev: f64,
    pub weight: f64,
}

impl GaussianComponent {
    pub fn new(mean: f64, std_dev: f64, weight: f64) -> Self {
        Self {
            mean,
            std_dev,
            weight,
        }
    }

    /// Square-root information 1/σ.
    pub fn sqrt_info(&self) -> f64 {
        1.0 / self.std_dev
    }

    /// Scaled log-density `ln(w·S) − ½(S·(e−μ))²` used by the likelihood
    /// kernels. The 1/√(2π) constant is dropped consistently across
    /// components, so comparisons and normalized ratios are unaffected.
    pub fn scaled_log_density(&self, e: f64) -> f64 {
        let s = self.sqrt_info();
        let z = s * (e - self.mean);
        (self.weight * s).ln() - 0.5 * z * z
    }

    /// Proper log-density `ln(w·N(e | μ, σ²))` used by the estimators.
    pub fn log_density(&self, e: f64) -> f64 {
        let z = (e - self.mean) / self.std_dev;
        self.weight.ln()
            - self.std_dev.ln()
            - 0.5 * (2.0 * std::f64::consts::PI).ln()
            - 0.5 * z * z
    }
}

/// Ordered 1-D Gaussian mixture with normalized weights.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GaussianMixture {
    components: Vec<GaussianComponent>,
    /// Spread used by `init_spread`; kept so collapsed components can be
    /// respawned with the same scale.
    init_range: f64,
}

impl GaussianMixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// K components with equal weights, means spread evenly across
    /// [−range, +range] (a single component sits at 0), and all standard
    /// deviations equal to `range`.
    pub fn init_spread(num_components: usize, range: f64) -> Self {
        assert!(num_components > 0 && range > 0.0);
        let weight = 1.0 / num_components as f64;
        let components = (0..num_components)
            .map(|i| {
                let mean = if num_components == 1 {
                    0.0
                } else {
                    -range + 2.0 * range * i as f64 / (num_components - 1) as f64
                };
                GaussianComponent::new(mean, range, weight)
            })
            .collect();
        Self {
            components,
            init_range: range,
        }
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[GaussianComponent] {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut [GaussianComponent] {
        &mut self.components
    }

    pub fn init_range(&self) -> f64 {
        self.init_range
    }

    pub fn add_component(&mut self, component: GaussianComponent) {
        self.components.push(component);
    }

    /// Sort components by descending weight.
    pub fn sort_by_weight(&mut self) {
        self.components
            .sort_by(|a, b| b.weight.total_cmp(&a.weight));
    }

    /// Drop the last component (the lightest one after `sort_by_weight`).
    pub fn remove_last_component(&mut self) {
        self.components.pop();
    }

    /// Rescale weights to sum to one.
    pub fn normalize_weights(&mut self) {
        let total: f64 = self.components.iter().map(|c| c.weight).sum();
        if total > 0.0 {
            for c in &mut self.components {
                c.weight /= total;
            }
        }
    }

    /// Shift all means by −μ₀ where μ₀ is the mean of the highest-weight
    /// component, so the dominant (line-of-sight) mode is zero-centered.
    pub fn remove_offset(&mut self) {
        let Some(offset) = self
            .components
            .iter()
            .max_by(|a, b| a.weight.total_cmp(&b.weight))
            .map(|c| c.mean)
        else {
            return;
        };
        for c in &mut self.components {
            c.mean -= offset;
        }
    }

    /// Remove components lighter than `min_weight`, then renormalize.
    /// Always keeps at least one component.
    pub fn prune_small(&mut self, min_weight: f64) {
        if self.components.len() <= 1 {
            return;
        }
        self.sort_by_weight();
        while self.components.len() > 1
            && self.components.last().is_some_and(|c| c.weight < min_weight)
        {
            self.components.pop();
        }
        self.normalize_weights();
    }

    /// Merge component pairs whose means differ by less than 0.1·σ and whose
    /// σ ratio is within 2×, combining them weight-proportionally.
    pub fn merge_similar(&mut self) {
        let mut i = 0;
        while i < self.components.len() {
            let mut j = i + 1;
            while j < self.components.len() {
                let a = self.components[i];
                let b = self.components[j];
                let sigma = a.std_dev.min(b.std_dev);
                let ratio = a.std_dev.max(b.std_dev) / sigma;
                if (a.mean - b.mean).abs() < 0.1 * sigma && ratio <= 2.0 {
                    let w = a.weight + b.weight;
                    let mean = (a.weight * a.mean + b.weight * b.mean) / w;
                    let var = (a.weight * a.std_dev * a.std_dev
                        + b.weight * b.std_dev * b.std_dev)
                        / w;
                    self.components[i] = GaussianComponent::new(mean, var.sqrt(), w);
                    self.components.remove(j);
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
        self.normalize_weights();
    }

    /// Total log-likelihood of the samples under the mixture.
    pub fn log_likelihood(&self, samples: &[f64]) -> f64 {
        let mut scores = vec![0.0; self.components.len()];
        samples
            .iter()
            .map(|&x| {
                for (score, c) in scores.iter_mut().zip(&self.components) {
                    *score = c.log_density(x);
                }
                log_sum_exp(&scores)
            })
            .sum()
    }
}
