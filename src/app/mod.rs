//! Time-stepped fusion driver.
//!
//! Wires the data store, factor graph, error models and mixture estimator
//! into the pseudorange + odometry fusion loop:
//!
//! - **INIT**: a throwaway Gaussian-only subgraph (position + clock error
//!   only) produces a coarse fix at the first pseudorange epoch, which
//!   seeds the main graph; solve, tune, solve again.
//! - **STEADY**: per pseudorange epoch, add the four state kinds, the
//!   odometry and clock-drift factors against the previous epoch and all
//!   pseudoranges, tune the error model, solve, record the position and
//!   evict states older than the window.
//! - **DONE** when the pseudorange stream is exhausted.

use std::path::Path;

use serde::Deserialize;

use crate::core::math::{mean, std_dev};
use crate::core::types::{Measurement, MeasurementKind, StateKind};
use crate::data::{SensorDataSet, StateDataSet};
use crate::error::{FusionError, Result};
use crate::estimator::{self, EstimationConfig, TuningAlgorithm};
use crate::graph::{FactorGraph, FactorKind, SolverOptions};
use crate::models::{
    CdceKernel, DcsKernel, ErrorModel, GaussianComponent, GaussianDiagonal, GaussianMixture,
};

pub const POSITION_STATE: &str = "position";
pub const ORIENTATION_STATE: &str = "orientation";
pub const CLOCK_ERROR_STATE: &str = "clock_error";
pub const CLOCK_DRIFT_STATE: &str = "clock_drift";

/// Base error model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorModelKind {
    Gaussian,
    Dcs,
    Cdce,
    Gmm,
}

/// Mixture likelihood formulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixtureKind {
    SumMix,
    MaxMix,
}

/// Online tuning algorithm for the mixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningKind {
    None,
    Em,
    Vbi,
}

/// Parsed `ERROR_MODEL` CLI token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorModelConfig {
    pub kind: ErrorModelKind,
    pub mixture: MixtureKind,
    pub tuning: TuningKind,
}

impl ErrorModelConfig {
    /// Parse an error model token (case-sensitive).
    pub fn from_token(token: &str) -> Result<Self> {
        let (kind, mixture, tuning) = match token {
            "gauss" => (ErrorModelKind::Gaussian, MixtureKind::SumMix, TuningKind::None),
            "dcs" => (ErrorModelKind::Dcs, MixtureKind::SumMix, TuningKind::None),
            "cdce" => (ErrorModelKind::Cdce, MixtureKind::SumMix, TuningKind::None),
            "sm" => (ErrorModelKind::Gmm, MixtureKind::SumMix, TuningKind::None),
            "mm" => (ErrorModelKind::Gmm, MixtureKind::MaxMix, TuningKind::None),
            "stsm" => (ErrorModelKind::Gmm, MixtureKind::SumMix, TuningKind::Em),
            "stmm" => (ErrorModelKind::Gmm, MixtureKind::MaxMix, TuningKind::Em),
            "stsm_vbi" => (ErrorModelKind::Gmm, MixtureKind::SumMix, TuningKind::Vbi),
            "stmm_vbi" => (ErrorModelKind::Gmm, MixtureKind::MaxMix, TuningKind::Vbi),
            _ => {
                return Err(FusionError::Config(format!(
                    "unknown error model '{token}'"
                )));
            }
        };
        Ok(Self {
            kind,
            mixture,
            tuning,
        })
    }
}

/// Run parameters beyond the CLI. Loadable from TOML; compiled defaults
/// match the reference scenario.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Sliding window width in seconds.
    pub window_seconds: f64,
    /// Component count of EM-tuned (and untuned) mixtures.
    pub gmm_components: usize,
    /// Spread range of freshly initialized mixtures [m].
    pub init_spread_range: f64,
    /// Hard cap on the VBI mixture's active component count.
    pub vbi_max_components: usize,
    /// Degrees of freedom of the VBI precision prior.
    pub vbi_prior_dof: f64,
    /// DCS kernel parameter φ.
    pub dcs_phi: f64,
    pub solver: SolverOptions,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60.0,
            gmm_components: 3,
            init_spread_range: 10.0,
            vbi_max_components: 8,
            vbi_prior_dof: 2.0,
            dcs_phi: 1.0,
            solver: SolverOptions::default(),
        }
    }
}

impl FusionConfig {
    /// Load from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        basic_toml::from_str(&contents)
            .map_err(|e| FusionError::Config(format!("bad config file: {e}")))
    }
}

/// Clock-drift model noise std-devs for a dataset. The Chemnitz City
/// recording uses its own hand-measured pair.
pub fn clock_drift_noise_for(input_file: &str) -> [f64; 2] {
    let name = Path::new(input_file)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(input_file);
    if name == "Chemnitz_Input.txt" {
        [0.1, 0.009]
    } else {
        [0.05, 0.01]
    }
}

/// Owns the mixture that is re-estimated online. All tuning state lives
/// here explicitly, so two runs never share hidden mixture state.
#[derive(Debug)]
pub struct SelfTuner {
    model: ErrorModelConfig,
    gmm_components: usize,
    init_spread_range: f64,
    vbi_max_components: usize,
    vbi_prior_dof: f64,
    mixture: GaussianMixture,
}

impl SelfTuner {
    pub fn new(model: ErrorModelConfig, config: &FusionConfig) -> Self {
        let mixture = if model.kind == ErrorModelKind::Gmm {
            // with VBI the component count is unknown up front, so start
            // with two and let the update grow/shrink the mixture
            let k = if model.tuning == TuningKind::Vbi {
                2
            } else {
                config.gmm_components
            };
            GaussianMixture::init_spread(k, config.init_spread_range)
        } else {
            GaussianMixture::new()
        };
        Self {
            model,
            gmm_components: config.gmm_components,
            init_spread_range: config.init_spread_range,
            vbi_max_components: config.vbi_max_components,
            vbi_prior_dof: config.vbi_prior_dof,
            mixture,
        }
    }

    /// Current mixture, used when attaching new pseudorange factors.
    pub fn mixture(&self) -> &GaussianMixture {
        &self.mixture
    }

    fn mixture_model(&self) -> ErrorModel {
        match self.model.mixture {
            MixtureKind::SumMix => ErrorModel::SumMix(self.mixture.clone()),
            MixtureKind::MaxMix => ErrorModel::MaxMix(self.mixture.clone()),
        }
    }

    /// Re-estimate the mixture from the graph's current pseudorange
    /// residuals and re-bind every pseudorange factor to it. A no-op for
    /// untuned models.
    pub fn tune(&mut self, graph: &mut FactorGraph) -> Result<()> {
        if self.model.tuning == TuningKind::None {
            return Ok(());
        }

        let residuals = graph.compute_unweighted_error(FactorKind::Pseudorange3Ecef)?;
        if residuals.is_empty() {
            log::warn!("tuning skipped: no pseudorange residuals in the graph");
            return Ok(());
        }

        match self.model.tuning {
            TuningKind::Em => {
                // a fresh mixture per epoch; the window residuals carry
                // enough evidence on their own
                let mut gmm =
                    GaussianMixture::init_spread(self.gmm_components, self.init_spread_range);
                let config = EstimationConfig {
                    algorithm: TuningAlgorithm::Em,
                    remove_small_components: false,
                    merge_similar_components: false,
                    ..EstimationConfig::default()
                };
                estimator::estimate(&mut gmm, &residuals, &config)?;
                gmm.remove_offset();
                self.mixture = gmm;
            }
            TuningKind::Vbi => {
                // grow by one component per step; enforce the cap by
                // dropping the lightest component first
                if self.mixture.num_components() >= self.vbi_max_components {
                    self.mixture.sort_by_weight();
                    self.mixture.remove_last_component();
                }
                let seed_mean = mean(&residuals);
                let seed_std = std_dev(&residuals).max(1e-3);
                let weight = 1.0 / (self.mixture.num_components() + 1) as f64;
                self.mixture
                    .add_component(GaussianComponent::new(seed_mean, seed_std, weight));

                let config = EstimationConfig {
                    algorithm: TuningAlgorithm::Vbi,
                    remove_small_components: true,
                    merge_similar_components: false,
                    prior_wishart_dof: self.vbi_prior_dof,
                    ..EstimationConfig::default()
                };
                estimator::estimate(&mut self.mixture, &residuals, &config)?;
                self.mixture.remove_offset();
            }
            TuningKind::None => unreachable!(),
        }

        graph.set_new_error_model(FactorKind::Pseudorange3Ecef, &self.mixture_model());
        Ok(())
    }
}

/// Attach one factor per pseudorange at `time` under the configured model.
fn add_pseudorange_measurements(
    graph: &mut FactorGraph,
    measurements: &SensorDataSet,
    model: ErrorModelConfig,
    tuner: &SelfTuner,
    config: &FusionConfig,
    time: f64,
) -> Result<()> {
    let count = measurements.count_at(&MeasurementKind::Pseudorange3, time);
    if count == 0 {
        log::warn!("no pseudorange measurements at {time}s");
        return Ok(());
    }

    for index in 0..count {
        let m = measurements
            .get(&MeasurementKind::Pseudorange3, time, index)?
            .clone();
        let noise = match model.kind {
            ErrorModelKind::Gaussian => {
                ErrorModel::Gaussian(GaussianDiagonal::from_std_dev(m.std_dev.as_slice()))
            }
            ErrorModelKind::Dcs => ErrorModel::Dcs(DcsKernel::new(
                config.dcs_phi,
                GaussianDiagonal::from_std_dev(m.std_dev.as_slice()),
            )),
            ErrorModelKind::Cdce => ErrorModel::Cdce(CdceKernel::new(m.std_dev[0])),
            ErrorModelKind::Gmm => tuner.mixture_model(),
        };
        graph.add_factor(
            FactorKind::Pseudorange3Ecef,
            &[(POSITION_STATE, time), (CLOCK_ERROR_STATE, time)],
            Some(m),
            noise,
        )?;
    }
    Ok(())
}

/// Build the main graph's first epoch, seeded by a coarse Gaussian-only fix
/// from a throwaway subgraph.
fn init_graph(
    graph: &mut FactorGraph,
    measurements: &SensorDataSet,
    model: ErrorModelConfig,
    tuner: &SelfTuner,
    config: &FusionConfig,
    time_first: f64,
) -> Result<()> {
    let simple_model = ErrorModelConfig {
        kind: ErrorModelKind::Gaussian,
        mixture: model.mixture,
        tuning: TuningKind::None,
    };
    let mut simple = FactorGraph::new();
    simple.add_state(POSITION_STATE, StateKind::Point3, time_first)?;
    simple.add_state(CLOCK_ERROR_STATE, StateKind::ClockError, time_first)?;
    add_pseudorange_measurements(&mut simple, measurements, simple_model, tuner, config, time_first)?;
    simple.solve(&config.solver)?;

    graph.add_state(POSITION_STATE, StateKind::Point3, time_first)?;
    graph.add_state(CLOCK_ERROR_STATE, StateKind::ClockError, time_first)?;
    graph.add_state(ORIENTATION_STATE, StateKind::Angle, time_first)?;
    graph.add_state(CLOCK_DRIFT_STATE, StateKind::ClockDrift, time_first)?;

    let position = simple.state(POSITION_STATE, time_first)?.mean.clone();
    let clock = simple.state(CLOCK_ERROR_STATE, time_first)?.mean.clone();
    graph.set_mean(POSITION_STATE, time_first, position.as_slice())?;
    graph.set_mean(CLOCK_ERROR_STATE, time_first, clock.as_slice())?;

    add_pseudorange_measurements(graph, measurements, model, tuner, config, time_first)
}

fn record_position(
    graph: &FactorGraph,
    results: &mut StateDataSet,
    time: f64,
) -> Result<()> {
    let state = graph.state(POSITION_STATE, time)?.clone();
    results.add(POSITION_STATE.to_string(), time, state);
    Ok(())
}

/// Run the full fusion over a measurement set. Returns the recorded
/// position trajectory.
pub fn run(
    measurements: &SensorDataSet,
    model: ErrorModelConfig,
    config: &FusionConfig,
    clock_drift_std: [f64; 2],
) -> Result<StateDataSet> {
    let mut graph = FactorGraph::new();
    let mut results = StateDataSet::new();
    let mut tuner = SelfTuner::new(model, config);

    let time_first = measurements
        .first_time(&MeasurementKind::Pseudorange3)
        .ok_or_else(|| FusionError::Config("input contains no pseudoranges".into()))?;

    // INIT: coarse fix, then solve-tune-solve for good initial convergence
    init_graph(&mut graph, measurements, model, &tuner, config, time_first)?;
    graph.solve(&config.solver)?;
    tuner.tune(&mut graph)?;
    graph.solve(&config.solver)?;
    record_position(&graph, &mut results, time_first)?;

    // odometry noise is fixed to the first odometry element of the run
    let odom_noise = {
        let first_odom_time = measurements
            .first_time(&MeasurementKind::Odom3)
            .ok_or_else(|| FusionError::Config("input contains no odometry".into()))?;
        let first = measurements.get(&MeasurementKind::Odom3, first_odom_time, 0)?;
        GaussianDiagonal::from_std_dev(first.std_dev.as_slice())
    };
    let drift_noise = GaussianDiagonal::from_std_dev(&clock_drift_std);

    // STEADY: one graph extension per pseudorange epoch. The cursor walks
    // the stream; `time_prev` tracks the last epoch that made it into the
    // graph, so a dropped epoch leaves the chain intact.
    let mut cursor = time_first;
    let mut time_prev = time_first;
    let mut epochs = 1usize;
    while let Some(time) = measurements.next_time(&MeasurementKind::Pseudorange3, cursor) {
        cursor = time;
        let odom: Measurement = match measurements.get(&MeasurementKind::Odom3, time, 0) {
            Ok(m) => m.clone(),
            Err(e) => {
                log::warn!("epoch {time}s dropped: {e}");
                continue;
            }
        };

        graph.add_state(POSITION_STATE, StateKind::Point3, time)?;
        graph.add_state(CLOCK_ERROR_STATE, StateKind::ClockError, time)?;
        graph.add_state(ORIENTATION_STATE, StateKind::Angle, time)?;
        graph.add_state(CLOCK_DRIFT_STATE, StateKind::ClockDrift, time)?;

        // warm-start the new epoch from the previous one; the clock error
        // is propagated along its drift, everything else carries over
        let position = graph.state(POSITION_STATE, time_prev)?.mean.clone();
        let orientation = graph.state(ORIENTATION_STATE, time_prev)?.mean.clone();
        let clock_error = graph.state(CLOCK_ERROR_STATE, time_prev)?.mean[0];
        let clock_drift = graph.state(CLOCK_DRIFT_STATE, time_prev)?.mean[0];
        let dt = time - time_prev;
        graph.set_mean(POSITION_STATE, time, position.as_slice())?;
        graph.set_mean(ORIENTATION_STATE, time, orientation.as_slice())?;
        graph.set_mean(CLOCK_ERROR_STATE, time, &[clock_error + dt * clock_drift])?;
        graph.set_mean(CLOCK_DRIFT_STATE, time, &[clock_drift])?;

        graph.add_factor(
            FactorKind::Odom4Ecef,
            &[
                (POSITION_STATE, time_prev),
                (ORIENTATION_STATE, time_prev),
                (POSITION_STATE, time),
                (ORIENTATION_STATE, time),
            ],
            Some(odom),
            ErrorModel::Gaussian(odom_noise.clone()),
        )?;

        graph.add_factor(
            FactorKind::ConstClockDrift,
            &[
                (CLOCK_ERROR_STATE, time_prev),
                (CLOCK_DRIFT_STATE, time_prev),
                (CLOCK_ERROR_STATE, time),
                (CLOCK_DRIFT_STATE, time),
            ],
            None,
            ErrorModel::Gaussian(drift_noise.clone()),
        )?;

        add_pseudorange_measurements(&mut graph, measurements, model, &tuner, config, time)?;

        tuner.tune(&mut graph)?;
        graph.solve(&config.solver)?;
        record_position(&graph, &mut results, time)?;

        graph.remove_all_states_outside_window(config.window_seconds, time);
        time_prev = time;
        epochs += 1;
    }

    log::info!("fusion finished after {epochs} epochs");
    graph.print_report();
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_model_token_table() {
        let cases = [
            ("gauss", ErrorModelKind::Gaussian, TuningKind::None),
            ("dcs", ErrorModelKind::Dcs, TuningKind::None),
            ("cdce", ErrorModelKind::Cdce, TuningKind::None),
            ("sm", ErrorModelKind::Gmm, TuningKind::None),
            ("mm", ErrorModelKind::Gmm, TuningKind::None),
            ("stsm", ErrorModelKind::Gmm, TuningKind::Em),
            ("stmm", ErrorModelKind::Gmm, TuningKind::Em),
            ("stsm_vbi", ErrorModelKind::Gmm, TuningKind::Vbi),
            ("stmm_vbi", ErrorModelKind::Gmm, TuningKind::Vbi),
        ];
        for (token, kind, tuning) in cases {
            let parsed = ErrorModelConfig::from_token(token).unwrap();
            assert_eq!(parsed.kind, kind, "{token}");
            assert_eq!(parsed.tuning, tuning, "{token}");
        }

        assert_eq!(
            ErrorModelConfig::from_token("mm").unwrap().mixture,
            MixtureKind::MaxMix
        );
        assert_eq!(
            ErrorModelConfig::from_token("stsm_vbi").unwrap().mixture,
            MixtureKind::SumMix
        );

        // case-sensitive, unknown tokens rejected
        assert!(ErrorModelConfig::from_token("GAUSS").is_err());
        assert!(ErrorModelConfig::from_token("huber").is_err());
    }

    #[test]
    fn test_clock_drift_scenario_constants() {
        assert_eq!(clock_drift_noise_for("Chemnitz_Input.txt"), [0.1, 0.009]);
        assert_eq!(
            clock_drift_noise_for("/data/Chemnitz_Input.txt"),
            [0.1, 0.009]
        );
        assert_eq!(clock_drift_noise_for("Berlin_Input.txt"), [0.05, 0.01]);
    }

    #[test]
    fn test_tune_is_noop_without_tuning() {
        let model = ErrorModelConfig::from_token("gauss").unwrap();
        let config = FusionConfig::default();
        let mut tuner = SelfTuner::new(model, &config);
        let mut graph = FactorGraph::new();
        tuner.tune(&mut graph).unwrap();
        assert!(tuner.mixture().is_empty());
    }

    #[test]
    fn test_vbi_tuner_caps_component_count() {
        let model = ErrorModelConfig::from_token("stsm_vbi").unwrap();
        let config = FusionConfig {
            vbi_max_components: 3,
            ..FusionConfig::default()
        };
        let mut tuner = SelfTuner::new(model, &config);

        // drive several tuning rounds against a fixed synthetic graph
        let mut graph = FactorGraph::new();
        graph.add_state(POSITION_STATE, StateKind::Point3, 0.0).unwrap();
        graph
            .add_state(CLOCK_ERROR_STATE, StateKind::ClockError, 0.0)
            .unwrap();
        for i in 0..8 {
            let sat = nalgebra::Vector3::new(2.0e7, i as f64 * 1.0e6, 0.0);
            let range = sat.norm() + if i % 3 == 0 { 25.0 } else { 0.1 * i as f64 };
            let m = Measurement::pseudorange(0.0, range, 1.0, sat, 0.0);
            graph
                .add_factor(
                    FactorKind::Pseudorange3Ecef,
                    &[(POSITION_STATE, 0.0), (CLOCK_ERROR_STATE, 0.0)],
                    Some(m),
                    ErrorModel::SumMix(tuner.mixture().clone()),
                )
                .unwrap();
        }

        for _ in 0..6 {
            tuner.tune(&mut graph).unwrap();
            assert!(tuner.mixture().num_components() <= config.vbi_max_components);
            assert!(tuner.mixture().num_components() >= 1);
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = FusionConfig::default();
        assert_eq!(config.window_seconds, 60.0);
        assert!(config.gmm_components >= 2);
        assert!(config.solver.max_iterations > 0);
    }
}
