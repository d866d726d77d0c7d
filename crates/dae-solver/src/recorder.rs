//! Accumulates the raw trajectory the driver produces in full-state mode.
//!
//! Storage grows one snapshot at a time via plain `Vec::push` rather than
//! being pre-sized to the schedule length up front: the memory high-water
//! mark this leaves during a run is an observable difference from a
//! pre-reserving implementation, and preserving it was an explicit design
//! decision (see `DESIGN.md`) rather than an oversight.

use crate::result::AxisTriple;

/// Accumulates `(t, y, y')` snapshots and, when requested, per-parameter
/// sensitivity rows, as the driver records them.
pub struct StepRecorder {
    n_states: usize,
    n_params: usize,
    times: Vec<f64>,
    states: Vec<Vec<f64>>,
    derivs: Vec<Vec<f64>>,
    /// Outer index is the parameter, matching the eventual
    /// `(n_params, N, n_states)` axis order (§4.7) directly.
    sensitivities: Vec<Vec<Vec<f64>>>,
}

impl StepRecorder {
    pub fn new(n_states: usize, n_params: usize) -> Self {
        Self {
            n_states,
            n_params,
            times: Vec::new(),
            states: Vec::new(),
            derivs: Vec::new(),
            sensitivities: vec![Vec::new(); n_params],
        }
    }

    /// Append one snapshot. `s`, if present, holds one row per parameter,
    /// each of length `n_states`.
    pub fn write(&mut self, t: f64, y: &[f64], yp: &[f64], s: Option<&[Vec<f64>]>) {
        debug_assert_eq!(y.len(), self.n_states);
        debug_assert_eq!(yp.len(), self.n_states);
        self.times.push(t);
        self.states.push(y.to_vec());
        self.derivs.push(yp.to_vec());
        if let Some(s) = s {
            debug_assert_eq!(s.len(), self.n_params);
            for (param, row) in self.sensitivities.iter_mut().zip(s.iter()) {
                param.push(row.clone());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Consume the recorder into its immutable, caller-owned result.
    pub fn freeze(self) -> RecordedTrajectory {
        let n = self.times.len();
        let n_states = self.n_states;

        let mut states_flat = Vec::with_capacity(n * n_states);
        for row in &self.states {
            states_flat.extend_from_slice(row);
        }
        let mut derivs_flat = Vec::with_capacity(n * n_states);
        for row in &self.derivs {
            derivs_flat.extend_from_slice(row);
        }

        let sensitivities = if self.n_params == 0 || self.sensitivities[0].is_empty() {
            None
        } else {
            let mut data = Vec::with_capacity(self.n_params * n * n_states);
            for param_rows in &self.sensitivities {
                for row in param_rows {
                    data.extend_from_slice(row);
                }
            }
            Some(AxisTriple::from_flat((self.n_params, n, n_states), data))
        };

        RecordedTrajectory {
            times: self.times,
            n_states,
            states: states_flat,
            derivs: derivs_flat,
            sensitivities,
        }
    }
}

/// Frozen, move-only full-state trajectory. Not `Clone`: a consumer that
/// wants a copy should extract and copy the fields it needs, rather than
/// the driver handing out an implicit duplicate of a potentially large
/// buffer.
pub struct RecordedTrajectory {
    pub times: Vec<f64>,
    n_states: usize,
    states: Vec<f64>,
    derivs: Vec<f64>,
    pub sensitivities: Option<AxisTriple>,
}

impl RecordedTrajectory {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn state_at(&self, step: usize) -> &[f64] {
        let base = step * self.n_states;
        &self.states[base..base + self.n_states]
    }

    pub fn deriv_at(&self, step: usize) -> &[f64] {
        let base = step * self.n_states;
        &self.derivs[base..base + self.n_states]
    }
}
