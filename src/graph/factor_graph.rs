//! Sliding-window factor graph.
//!
//! States live in a stable-slot arena: once a variable is created its slot
//! index never changes until the variable is evicted, so factors and the
//! solver can hold plain indices across solves. Evicting a state always
//! removes every factor that references it first, keeping the graph free of
//! dangling references.

use std::collections::HashMap;

use crate::core::types::{Measurement, StateKind, StateVariable, Time};
use crate::data::StateDataSet;
use crate::error::{FusionError, Result};
use crate::models::ErrorModel;

use super::factor::{Factor, FactorKind};
use super::solver::{self, SolverOptions, SolverReport};

/// Identity of a state variable: logical name plus timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub name: String,
    pub time: Time,
}

impl StateKey {
    pub fn new(name: &str, time: f64) -> Self {
        Self {
            name: name.to_string(),
            time: Time(time),
        }
    }
}

/// Handle returned by `add_factor`. Valid until the factor is evicted.
pub type FactorHandle = usize;

/// Factor graph over named, timestamped state variables.
#[derive(Debug, Default)]
pub struct FactorGraph {
    states: Vec<Option<(StateKey, StateVariable)>>,
    state_index: HashMap<StateKey, usize>,
    free_states: Vec<usize>,
    factors: Vec<Option<Factor>>,
    free_factors: Vec<usize>,
    last_report: Option<SolverReport>,
}

impl FactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state variable. Idempotent: re-adding the same
    /// `(name, timestamp)` with a matching kind is a no-op; a differing
    /// kind fails with `KindConflict`.
    pub fn add_state(&mut self, name: &str, kind: StateKind, time: f64) -> Result<()> {
        let key = StateKey::new(name, time);
        if let Some(&slot) = self.state_index.get(&key) {
            let existing = self.states[slot].as_ref().expect("indexed slot is live");
            if existing.1.kind != kind {
                return Err(FusionError::KindConflict {
                    name: name.to_string(),
                    time,
                    existing: existing.1.kind.name(),
                    requested: kind.name(),
                });
            }
            return Ok(());
        }

        let state = StateVariable::new(kind, time);
        let slot = match self.free_states.pop() {
            Some(slot) => {
                self.states[slot] = Some((key.clone(), state));
                slot
            }
            None => {
                self.states.push(Some((key.clone(), state)));
                self.states.len() - 1
            }
        };
        self.state_index.insert(key, slot);
        Ok(())
    }

    pub fn has_state(&self, name: &str, time: f64) -> bool {
        self.state_index.contains_key(&StateKey::new(name, time))
    }

    /// Read access to one state variable.
    pub fn state(&self, name: &str, time: f64) -> Result<&StateVariable> {
        self.state_index
            .get(&StateKey::new(name, time))
            .map(|&slot| &self.states[slot].as_ref().expect("indexed slot is live").1)
            .ok_or_else(|| FusionError::NotFound {
                key: name.to_string(),
                time,
                what: "state",
            })
    }

    /// Overwrite the mean of one state variable (e.g. to seed it from a
    /// coarse initial fix).
    pub fn set_mean(&mut self, name: &str, time: f64, mean: &[f64]) -> Result<()> {
        let slot = *self
            .state_index
            .get(&StateKey::new(name, time))
            .ok_or_else(|| FusionError::NotFound {
                key: name.to_string(),
                time,
                what: "state",
            })?;
        self.states[slot]
            .as_mut()
            .expect("indexed slot is live")
            .1
            .set_mean(mean);
        Ok(())
    }

    /// Bind a residual block to existing states. The reference order must
    /// match the factor kind's state signature.
    pub fn add_factor(
        &mut self,
        kind: FactorKind,
        state_refs: &[(&str, f64)],
        measurement: Option<Measurement>,
        model: ErrorModel,
    ) -> Result<FactorHandle> {
        let signature = kind.state_signature();
        if state_refs.len() != signature.len() {
            return Err(FusionError::Config(format!(
                "factor {:?} takes {} states, got {}",
                kind,
                signature.len(),
                state_refs.len()
            )));
        }

        let mut slots = Vec::with_capacity(state_refs.len());
        for (&(name, time), &expected) in state_refs.iter().zip(signature) {
            let slot = *self
                .state_index
                .get(&StateKey::new(name, time))
                .ok_or_else(|| FusionError::NotFound {
                    key: name.to_string(),
                    time,
                    what: "state referenced by factor",
                })?;
            let state = &self.states[slot].as_ref().expect("indexed slot is live").1;
            if state.kind != expected {
                return Err(FusionError::KindConflict {
                    name: name.to_string(),
                    time,
                    existing: state.kind.name(),
                    requested: expected.name(),
                });
            }
            slots.push(slot);
        }

        let factor = Factor {
            kind,
            states: slots,
            measurement,
            model,
        };
        let handle = match self.free_factors.pop() {
            Some(slot) => {
                self.factors[slot] = Some(factor);
                slot
            }
            None => {
                self.factors.push(Some(factor));
                self.factors.len() - 1
            }
        };
        Ok(handle)
    }

    /// Replace the error model of every factor of a type. Parameter-block
    /// identity and graph topology are untouched, so solver warm state for
    /// unchanged variables carries over to the next solve.
    pub fn set_new_error_model(&mut self, kind: FactorKind, model: &ErrorModel) {
        for factor in self.factors.iter_mut().flatten() {
            if factor.kind == kind {
                factor.model = model.clone();
            }
        }
    }

    /// Raw (pre-whitening, pre-kernel) residuals of every factor of a type
    /// at the current state values, flattened in stable factor order. This
    /// feeds the mixture estimator.
    pub fn compute_unweighted_error(&self, kind: FactorKind) -> Result<Vec<f64>> {
        let mut errors = Vec::new();
        for factor in self.factors.iter().flatten() {
            if factor.kind != kind {
                continue;
            }
            let states = self.factor_states(factor);
            errors.extend(factor.raw_residual(&states)?);
        }
        Ok(errors)
    }

    /// Run the nonlinear solver to local convergence, mutating all states.
    pub fn solve(&mut self, options: &SolverOptions) -> Result<SolverReport> {
        let report = solver::solve(self, options)?;
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Evict every state at or before `anchor - width` seconds, together
    /// with every factor referencing such a state. Idempotent. At a fixed
    /// measurement rate this keeps exactly `width / dt` epochs live.
    pub fn remove_all_states_outside_window(&mut self, width: f64, anchor: f64) {
        let threshold = anchor - width;
        let doomed: Vec<usize> = self
            .states
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| {
                entry
                    .as_ref()
                    .filter(|(_, s)| s.time <= threshold)
                    .map(|_| slot)
            })
            .collect();
        if doomed.is_empty() {
            return;
        }
        let doomed_set: std::collections::HashSet<usize> = doomed.iter().copied().collect();

        // factors first, so no dangling references can exist
        let mut removed_factors = 0usize;
        for slot in 0..self.factors.len() {
            let touches = self.factors[slot]
                .as_ref()
                .is_some_and(|f| f.states.iter().any(|s| doomed_set.contains(s)));
            if touches {
                self.factors[slot] = None;
                self.free_factors.push(slot);
                removed_factors += 1;
            }
        }

        for slot in doomed {
            let (key, _) = self.states[slot].take().expect("doomed slot was live");
            self.state_index.remove(&key);
            self.free_states.push(slot);
        }

        log::debug!(
            "window eviction at {anchor}s: removed {} states and {removed_factors} factors",
            doomed_set.len()
        );
    }

    /// Number of live state variables.
    pub fn num_states(&self) -> usize {
        self.state_index.len()
    }

    /// Number of live factors.
    pub fn num_factors(&self) -> usize {
        self.factors.iter().flatten().count()
    }

    /// Export all live states, keyed by name.
    pub fn state_data(&self) -> StateDataSet {
        let mut data = StateDataSet::new();
        for (key, state) in self.states.iter().flatten() {
            data.add(key.name.clone(), state.time, state.clone());
        }
        data
    }

    /// Log the report of the most recent solve.
    pub fn print_report(&self) {
        match &self.last_report {
            Some(report) => log::info!(
                "solver: {:?} after {} iterations, cost {:.3e} -> {:.3e}, {} states, {} factors",
                report.termination,
                report.iterations,
                report.initial_cost,
                report.final_cost,
                report.num_states,
                report.num_factors
            ),
            None => log::info!("solver: no solve has run yet"),
        }
    }

    // ------------------------------------------------------------------
    // solver access
    // ------------------------------------------------------------------

    pub(crate) fn live_state_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|_| slot))
    }

    pub(crate) fn live_factors(&self) -> impl Iterator<Item = &Factor> {
        self.factors.iter().flatten()
    }

    pub(crate) fn state_at_slot(&self, slot: usize) -> &StateVariable {
        &self.states[slot].as_ref().expect("slot is live").1
    }

    pub(crate) fn state_at_slot_mut(&mut self, slot: usize) -> &mut StateVariable {
        &mut self.states[slot].as_mut().expect("slot is live").1
    }

    pub(crate) fn factor_states<'a>(&'a self, factor: &Factor) -> Vec<&'a StateVariable> {
        factor
            .states
            .iter()
            .map(|&slot| self.state_at_slot(slot))
            .collect()
    }
}
