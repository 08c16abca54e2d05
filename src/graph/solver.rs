//! Nonlinear least-squares solve driver.
//!
//! Levenberg-Marquardt over the graph's parameter blocks: per-factor
//! Jacobians by central finite differences, dense normal equations, and
//! Cholesky factorization. The damped system interpolates between
//! Gauss-Newton and gradient descent; a rejected step raises the damping
//! and retries from the previous state, so the cost never increases.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use serde::Deserialize;

use crate::error::{FusionError, Result};

use super::factor_graph::FactorGraph;

/// Relative finite-difference step.
const DIFF_STEP: f64 = 1e-6;

/// Damping bounds of the trust-region loop.
const MU_MIN: f64 = 1e-10;
const MU_MAX: f64 = 1e10;

/// Solver options. `num_threads` is accepted for interface compatibility;
/// residual evaluation is sequential (and side-effect-free, so a parallel
/// backend could evaluate concurrently without changes to the factors).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub max_iterations: usize,
    /// Relative cost decrease below which the solve counts as converged.
    pub cost_tolerance: f64,
    /// Max-norm of the gradient below which the solve stops immediately.
    pub gradient_tolerance: f64,
    pub num_threads: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            cost_tolerance: 1e-6,
            gradient_tolerance: 1e-10,
            num_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Why the solve loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Converged,
    MaxIterations,
    /// Damping exhausted without an acceptable step.
    Stalled,
    NoFactors,
}

/// Summary of one solve.
#[derive(Debug, Clone)]
pub struct SolverReport {
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub termination: TerminationReason,
    pub num_states: usize,
    pub num_factors: usize,
}

/// Mapping from live state slots to offsets in the packed parameter vector.
struct Ordering {
    slots: Vec<usize>,
    offsets: HashMap<usize, usize>,
    total_dim: usize,
}

impl Ordering {
    fn build(graph: &FactorGraph) -> Self {
        let slots: Vec<usize> = graph.live_state_slots().collect();
        let mut offsets = HashMap::with_capacity(slots.len());
        let mut total_dim = 0;
        for &slot in &slots {
            offsets.insert(slot, total_dim);
            total_dim += graph.state_at_slot(slot).dim();
        }
        Self {
            slots,
            offsets,
            total_dim,
        }
    }
}

/// Chi-squared cost Σ‖r′‖² of all live factors at the current states.
fn total_cost(graph: &FactorGraph) -> Result<f64> {
    let mut cost = 0.0;
    for factor in graph.live_factors() {
        let states = graph.factor_states(factor);
        cost += factor.residual(&states)?.norm_squared();
    }
    if !cost.is_finite() {
        return Err(FusionError::Numeric(format!("non-finite cost {cost}")));
    }
    Ok(cost)
}

/// Assemble the normal equations `H = JᵀJ`, `g = Jᵀr` and the cost.
fn build_normal_equations(
    graph: &FactorGraph,
    ordering: &Ordering,
) -> Result<(DMatrix<f64>, DVector<f64>, f64)> {
    let n = ordering.total_dim;
    let mut h = DMatrix::<f64>::zeros(n, n);
    let mut g = DVector::<f64>::zeros(n);
    let mut cost = 0.0;

    for factor in graph.live_factors() {
        let states = graph.factor_states(factor);
        let residual = factor.residual(&states)?;
        let m = residual.len();
        cost += residual.norm_squared();

        // scratch copies of the involved states for perturbation
        let mut scratch: Vec<_> = states.iter().map(|s| (*s).clone()).collect();

        let mut blocks: Vec<DMatrix<f64>> = Vec::with_capacity(scratch.len());
        for bi in 0..scratch.len() {
            let dim = scratch[bi].dim();
            let mut jac = DMatrix::<f64>::zeros(m, dim);
            for p in 0..dim {
                let x0 = scratch[bi].mean[p];
                let step = DIFF_STEP * x0.abs().max(1.0);

                scratch[bi].mean[p] = x0 + step;
                let refs: Vec<_> = scratch.iter().collect();
                let r_plus = factor.residual(&refs)?;

                scratch[bi].mean[p] = x0 - step;
                let refs: Vec<_> = scratch.iter().collect();
                let r_minus = factor.residual(&refs)?;

                scratch[bi].mean[p] = x0;
                jac.set_column(p, &((r_plus - r_minus) / (2.0 * step)));
            }
            blocks.push(jac);
        }

        for (bi, &slot_i) in factor.states.iter().enumerate() {
            let off_i = ordering.offsets[&slot_i];
            let jac_i_t = blocks[bi].transpose();

            let grad = &jac_i_t * &residual;
            for (k, v) in grad.iter().enumerate() {
                g[off_i + k] += v;
            }

            for (bj, &slot_j) in factor.states.iter().enumerate() {
                let off_j = ordering.offsets[&slot_j];
                let contrib = &jac_i_t * &blocks[bj];
                for r in 0..contrib.nrows() {
                    for c in 0..contrib.ncols() {
                        h[(off_i + r, off_j + c)] += contrib[(r, c)];
                    }
                }
            }
        }
    }

    if !cost.is_finite() {
        return Err(FusionError::Numeric(format!("non-finite cost {cost}")));
    }
    Ok((h, g, cost))
}

fn apply_step(graph: &mut FactorGraph, ordering: &Ordering, delta: &DVector<f64>) {
    for &slot in &ordering.slots {
        let offset = ordering.offsets[&slot];
        let dim = graph.state_at_slot(slot).dim();
        let block: Vec<f64> = delta.rows(offset, dim).iter().copied().collect();
        graph.state_at_slot_mut(slot).apply_delta(&block);
    }
}

fn snapshot(graph: &FactorGraph, ordering: &Ordering) -> Vec<DVector<f64>> {
    ordering
        .slots
        .iter()
        .map(|&slot| graph.state_at_slot(slot).mean.clone())
        .collect()
}

fn restore(graph: &mut FactorGraph, ordering: &Ordering, saved: &[DVector<f64>]) {
    for (&slot, mean) in ordering.slots.iter().zip(saved) {
        graph.state_at_slot_mut(slot).mean.copy_from(mean);
    }
}

pub(crate) fn solve(graph: &mut FactorGraph, options: &SolverOptions) -> Result<SolverReport> {
    let num_states = graph.num_states();
    let num_factors = graph.num_factors();
    let ordering = Ordering::build(graph);

    if num_factors == 0 || ordering.total_dim == 0 {
        return Ok(SolverReport {
            iterations: 0,
            initial_cost: 0.0,
            final_cost: 0.0,
            termination: TerminationReason::NoFactors,
            num_states,
            num_factors,
        });
    }

    let (mut h, mut g, mut cost) = build_normal_equations(graph, &ordering)?;
    let initial_cost = cost;
    let mut mu = 1e-4;
    let mut iterations = 0;

    let report = |iterations, final_cost, termination| SolverReport {
        iterations,
        initial_cost,
        final_cost,
        termination,
        num_states,
        num_factors,
    };

    for iter in 0..options.max_iterations {
        iterations = iter + 1;

        if g.amax() < options.gradient_tolerance {
            return Ok(report(iterations, cost, TerminationReason::Converged));
        }

        // damped solve; a non-SPD system raises the damping instead of aborting
        let delta = loop {
            let mut damped = h.clone();
            for i in 0..ordering.total_dim {
                damped[(i, i)] += mu * h[(i, i)].max(1.0);
            }
            match damped.cholesky() {
                Some(chol) => break chol.solve(&(-&g)),
                None => {
                    mu *= 10.0;
                    if mu > MU_MAX {
                        return Ok(report(iterations, cost, TerminationReason::Stalled));
                    }
                }
            }
        };

        let saved = snapshot(graph, &ordering);
        apply_step(graph, &ordering, &delta);

        let new_cost = total_cost(graph).unwrap_or(f64::INFINITY);
        if new_cost > cost {
            restore(graph, &ordering, &saved);
            mu *= 10.0;
            if mu > MU_MAX {
                return Ok(report(iterations, cost, TerminationReason::Stalled));
            }
            continue;
        }

        let relative_decrease = (cost - new_cost) / cost.max(1e-300);
        cost = new_cost;
        mu = (mu * 0.1).max(MU_MIN);

        if relative_decrease < options.cost_tolerance {
            return Ok(report(iterations, cost, TerminationReason::Converged));
        }

        let rebuilt = build_normal_equations(graph, &ordering)?;
        h = rebuilt.0;
        g = rebuilt.1;
    }

    Ok(report(iterations, cost, TerminationReason::MaxIterations))
}
