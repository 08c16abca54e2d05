//! End-to-end fusion scenarios on synthetic constellations.
//!
//! Builds measurement sets in memory, runs the full INIT/STEADY driver and
//! checks the recovered trajectory. Satellite geometry is the standard
//! four-satellite setup at 20,000 km on the coordinate axes.
//!
//! Run with: `cargo test --test gnss_fusion`

use nalgebra::Vector3;

use gagan_fusion::{
    app, DcsKernel, ErrorModel, ErrorModelConfig, FactorGraph, FactorKind, FusionConfig,
    GaussianDiagonal, Measurement, MeasurementKind, SensorDataSet, SolverOptions, StateKind,
    POSITION_STATE,
};

fn constellation() -> Vec<Vector3<f64>> {
    vec![
        Vector3::new(20_000_000.0, 0.0, 0.0),
        Vector3::new(0.0, 20_000_000.0, 0.0),
        Vector3::new(0.0, 0.0, 20_000_000.0),
        Vector3::new(20_000_000.0, 20_000_000.0, 0.0),
    ]
}

/// Add noiseless pseudoranges from `truth` to every satellite, with an
/// optional per-satellite range bias.
fn add_pseudoranges(
    data: &mut SensorDataSet,
    time: f64,
    truth: Vector3<f64>,
    clock_error: f64,
    sats: &[Vector3<f64>],
    biases: &[f64],
) {
    for (sat, bias) in sats.iter().zip(biases) {
        let range = (sat - truth).norm() + clock_error + bias;
        let m = Measurement::pseudorange(time, range, 1.0, *sat, 0.0);
        data.add(m.kind, time, m);
    }
}

fn add_odometry(data: &mut SensorDataSet, time: f64, velocity: Vector3<f64>, yaw_rate: f64) {
    let m = Measurement::odometry(time, velocity, yaw_rate, [0.01, 0.01, 0.01, 0.01]);
    data.add(m.kind, time, m);
}

/// Straight-line run along +x at 1 m/s, 1 Hz, noiseless.
fn straight_line_data(epochs: usize) -> SensorDataSet {
    let sats = constellation();
    let mut data = SensorDataSet::new();
    for i in 0..epochs {
        let t = i as f64;
        let truth = Vector3::new(t, 0.0, 0.0);
        add_pseudoranges(&mut data, t, truth, 0.0, &sats, &[0.0; 4]);
        add_odometry(&mut data, t, Vector3::new(1.0, 0.0, 0.0), 0.0);
    }
    data
}

fn position_error(results: &gagan_fusion::StateDataSet, time: f64, truth: Vector3<f64>) -> f64 {
    let state = results.get(&POSITION_STATE.to_string(), time, 0).unwrap();
    (Vector3::new(state.mean[0], state.mean[1], state.mean[2]) - truth).norm()
}

// ============================================================================
// Static fix
// ============================================================================

#[test]
fn test_single_epoch_static_fix() {
    let sats = constellation();
    let mut data = SensorDataSet::new();
    add_pseudoranges(&mut data, 0.0, Vector3::zeros(), 0.0, &sats, &[0.0; 4]);
    add_odometry(&mut data, 0.0, Vector3::zeros(), 0.0);

    let model = ErrorModelConfig::from_token("gauss").unwrap();
    let config = FusionConfig::default();
    let results = app::run(&data, model, &config, [0.05, 0.01]).unwrap();

    assert_eq!(results.count(&POSITION_STATE.to_string()), 1);
    assert!(
        position_error(&results, 0.0, Vector3::zeros()) < 2.0,
        "static fix off by {} m",
        position_error(&results, 0.0, Vector3::zeros())
    );
}

// ============================================================================
// Motion with odometry
// ============================================================================

#[test]
fn test_two_epoch_motion() {
    let data = straight_line_data(2);

    let model = ErrorModelConfig::from_token("gauss").unwrap();
    let config = FusionConfig::default();
    let results = app::run(&data, model, &config, [0.05, 0.01]).unwrap();

    assert!(
        position_error(&results, 1.0, Vector3::new(1.0, 0.0, 0.0)) < 2.0,
        "t1 fix off by {} m",
        position_error(&results, 1.0, Vector3::new(1.0, 0.0, 0.0))
    );
}

#[test]
fn test_straight_line_trajectory_stays_accurate() {
    let epochs = 60;
    let data = straight_line_data(epochs);

    let model = ErrorModelConfig::from_token("gauss").unwrap();
    let config = FusionConfig {
        window_seconds: 20.0,
        ..FusionConfig::default()
    };
    let results = app::run(&data, model, &config, [0.05, 0.01]).unwrap();

    assert_eq!(results.count(&POSITION_STATE.to_string()), epochs);
    for i in 0..epochs {
        let t = i as f64;
        let err = position_error(&results, t, Vector3::new(t, 0.0, 0.0));
        assert!(err < 2.0, "epoch {t}: error {err} m");
    }
}

// ============================================================================
// Outlier robustness
// ============================================================================

/// Solve a single-epoch graph with five pseudoranges, one biased by +50 m,
/// under the given per-measurement noise model. Returns the position error.
fn static_fix_error(robust: bool) -> f64 {
    let mut sats = constellation();
    sats.push(Vector3::new(20_000_000.0, 0.0, 20_000_000.0));

    let mut graph = FactorGraph::new();
    graph.add_state("position", StateKind::Point3, 0.0).unwrap();
    graph
        .add_state("clock_error", StateKind::ClockError, 0.0)
        .unwrap();

    for (i, sat) in sats.iter().enumerate() {
        let bias = if i == 4 { 50.0 } else { 0.0 }; // NLOS on the fifth
        let m = Measurement::pseudorange(0.0, sat.norm() + bias, 1.0, *sat, 0.0);
        let noise = GaussianDiagonal::from_std_dev(&[1.0]);
        let model = if robust {
            ErrorModel::Dcs(DcsKernel::new(1.0, noise))
        } else {
            ErrorModel::Gaussian(noise)
        };
        graph
            .add_factor(
                FactorKind::Pseudorange3Ecef,
                &[("position", 0.0), ("clock_error", 0.0)],
                Some(m),
                model,
            )
            .unwrap();
    }

    graph.solve(&SolverOptions::default()).unwrap();
    let p = graph.state("position", 0.0).unwrap();
    Vector3::new(p.mean[0], p.mean[1], p.mean[2]).norm()
}

#[test]
fn test_dcs_bounds_nlos_outlier() {
    let gauss_err = static_fix_error(false);
    let dcs_err = static_fix_error(true);

    assert!(gauss_err > 10.0, "gauss should be corrupted, got {gauss_err} m");
    assert!(dcs_err < 5.0, "dcs should bound the outlier, got {dcs_err} m");
}

// ============================================================================
// Sliding window arithmetic
// ============================================================================

#[test]
fn test_sliding_window_steady_state_count() {
    // the S2 graph pattern for 300 epochs at 1 Hz with a 60 s window:
    // at steady state exactly 60 epochs x 4 states stay live
    let mut graph = FactorGraph::new();
    let mut steady_counts = Vec::new();

    for i in 0..300 {
        let t = i as f64;
        graph.add_state("position", StateKind::Point3, t).unwrap();
        graph.add_state("orientation", StateKind::Angle, t).unwrap();
        graph.add_state("clock_error", StateKind::ClockError, t).unwrap();
        graph.add_state("clock_drift", StateKind::ClockDrift, t).unwrap();

        if i > 0 {
            let t_prev = t - 1.0;
            graph
                .add_factor(
                    FactorKind::Odom4Ecef,
                    &[
                        ("position", t_prev),
                        ("orientation", t_prev),
                        ("position", t),
                        ("orientation", t),
                    ],
                    Some(Measurement::odometry(
                        t,
                        Vector3::new(1.0, 0.0, 0.0),
                        0.0,
                        [0.01; 4],
                    )),
                    ErrorModel::Gaussian(GaussianDiagonal::from_std_dev(&[0.01; 4])),
                )
                .unwrap();
        }

        graph.remove_all_states_outside_window(60.0, t);
        if i >= 100 {
            steady_counts.push(graph.num_states());
        }
    }

    assert!(
        steady_counts.iter().all(|&n| n == 240),
        "steady-state counts: {:?}",
        &steady_counts[..5]
    );

    // no factor references an evicted state
    for factor in [FactorKind::Odom4Ecef] {
        let residuals = graph.compute_unweighted_error(factor).unwrap();
        assert!(residuals.iter().all(|r| r.is_finite()));
    }
}

// ============================================================================
// Input plumbing
// ============================================================================

#[test]
fn test_run_requires_pseudoranges() {
    let mut data = SensorDataSet::new();
    add_odometry(&mut data, 0.0, Vector3::zeros(), 0.0);
    assert_eq!(data.count(&MeasurementKind::Pseudorange3), 0);

    let model = ErrorModelConfig::from_token("gauss").unwrap();
    let result = app::run(&data, model, &FusionConfig::default(), [0.05, 0.01]);
    assert!(result.is_err());
}

#[test]
fn test_missing_odometry_epoch_is_skipped() {
    let mut data = straight_line_data(4);
    // drop the odometry record at t=2; the epoch is skipped but the chain
    // survives across it
    data.remove(&MeasurementKind::Odom3, 2.0, None).unwrap();

    let model = ErrorModelConfig::from_token("gauss").unwrap();
    let results = app::run(&data, model, &FusionConfig::default(), [0.05, 0.01]).unwrap();

    assert_eq!(results.count(&POSITION_STATE.to_string()), 3);
    let err = position_error(&results, 3.0, Vector3::new(3.0, 0.0, 0.0));
    assert!(err < 2.0, "post-gap fix off by {err} m");
}
