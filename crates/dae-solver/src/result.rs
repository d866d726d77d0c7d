//! The caller-facing solution type and the axis-triple sensitivity tensor.
//!
//! §4.7 fixes two different axis orders for the sensitivity tensor
//! depending on recording mode — `(n_params, N, n_states)` in full-state
//! mode, `(N, L, n_params)` in outputs-only mode — because that is the
//! historical, externally observed contract of the system this driver
//! replaces. It reads as backwards in full-state mode (parameter-major
//! instead of time-major); that is preserved deliberately rather than
//! "fixed" (see `DESIGN.md`, Open Question (b)).

use dae_core::{Error, Result, StatusFlag};

use crate::recorder::RecordedTrajectory;

/// A dense row-major 3-D tensor with an explicit, caller-visible axis
/// order. Does not interpret its own axes; callers index it according to
/// whichever contract produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisTriple {
    shape: (usize, usize, usize),
    data: Vec<f64>,
}

impl AxisTriple {
    pub fn from_flat(shape: (usize, usize, usize), data: Vec<f64>) -> Self {
        let expected = shape.0 * shape.1 * shape.2;
        assert_eq!(
            data.len(),
            expected,
            "axis triple data length {} does not match shape {:?}",
            data.len(),
            shape
        );
        Self { shape, data }
    }

    pub fn zeros(shape: (usize, usize, usize)) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.0 * shape.1 * shape.2],
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.shape.1 + j) * self.shape.2 + k
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.index(i, j, k)]
    }

    pub fn set(&mut self, i: usize, j: usize, k: usize, v: f64) {
        let idx = self.index(i, j, k);
        self.data[idx] = v;
    }

    pub fn as_flat(&self) -> &[f64] {
        &self.data
    }

    /// Append one row along the first axis (used by outputs-only mode,
    /// whose growing axis — time — is the leading one, so a new row is a
    /// contiguous append rather than a scatter).
    pub fn push_leading_row(&mut self, row: &[f64]) {
        assert_eq!(row.len(), self.shape.1 * self.shape.2);
        self.data.extend_from_slice(row);
        self.shape.0 += 1;
    }
}

/// Which recording mode produced a [`SolutionData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingMode {
    FullState,
    OutputsOnly,
}

/// The assembled, caller-owned result of a drive. Intentionally not
/// `Clone`: this is meant to have a single owner, matching §9 Open
/// Question (a) — cloning a potentially large trajectory implicitly is
/// the kind of surprise the non-`Clone` choice heads off.
pub struct SolutionData {
    pub mode: RecordingMode,
    pub times: Vec<f64>,
    pub status: StatusFlag,
    full_state: Option<RecordedTrajectory>,
    outputs: Option<(Vec<f64>, usize)>,
    pub output_sensitivities: Option<AxisTriple>,
    /// The last raw state vector (§4.6 "Final yterm slice"), present only
    /// in outputs-only mode, so a caller that needs to resume a
    /// simulation from the terminal state does not have to invert the
    /// output expressions to recover it.
    y_term: Option<Vec<f64>>,
}

impl SolutionData {
    pub fn from_full_state(traj: RecordedTrajectory, status: StatusFlag) -> Self {
        Self {
            mode: RecordingMode::FullState,
            times: traj.times.clone(),
            status,
            full_state: Some(traj),
            outputs: None,
            output_sensitivities: None,
            y_term: None,
        }
    }

    pub fn from_outputs_only(
        times: Vec<f64>,
        outputs: Vec<f64>,
        l: usize,
        sensitivities: Option<AxisTriple>,
        status: StatusFlag,
        y_term: Vec<f64>,
    ) -> Self {
        Self {
            mode: RecordingMode::OutputsOnly,
            times,
            status,
            full_state: None,
            outputs: Some((outputs, l)),
            output_sensitivities: sensitivities,
            y_term: Some(y_term),
        }
    }

    pub fn n_steps(&self) -> usize {
        self.times.len()
    }

    /// State vector at recorded step `step`. Only valid in full-state mode.
    pub fn state_at(&self, step: usize) -> Result<&[f64]> {
        self.full_state
            .as_ref()
            .map(|t| t.state_at(step))
            .ok_or_else(|| Error::SolverError("state_at called in outputs-only mode".into()))
    }

    pub fn sensitivities(&self) -> Option<&AxisTriple> {
        match self.mode {
            RecordingMode::FullState => self.full_state.as_ref().and_then(|t| t.sensitivities.as_ref()),
            RecordingMode::OutputsOnly => self.output_sensitivities.as_ref(),
        }
    }

    /// Output row `k` (0-indexed) across every recorded step. Only valid
    /// in outputs-only mode.
    pub fn output_series(&self, k: usize) -> Result<Vec<f64>> {
        let (data, l) = self
            .outputs
            .as_ref()
            .ok_or_else(|| Error::SolverError("output_series called in full-state mode".into()))?;
        Ok((0..self.times.len()).map(|n| data[n * l + k]).collect())
    }

    /// The terminal raw state vector. Only valid in outputs-only mode.
    pub fn y_term(&self) -> Result<&[f64]> {
        self.y_term
            .as_deref()
            .ok_or_else(|| Error::SolverError("y_term called in full-state mode".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_triple_roundtrips_param_major() {
        let mut t = AxisTriple::zeros((2, 3, 1));
        t.set(0, 0, 0, 1.0);
        t.set(1, 2, 0, 9.0);
        assert_eq!(t.get(0, 0, 0), 1.0);
        assert_eq!(t.get(1, 2, 0), 9.0);
        assert_eq!(t.get(0, 1, 0), 0.0);
    }

    #[test]
    fn axis_triple_push_leading_row_grows_first_axis() {
        let mut t = AxisTriple::from_flat((0, 2, 3), vec![]);
        t.push_leading_row(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        t.push_leading_row(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        assert_eq!(t.shape(), (2, 2, 3));
        assert_eq!(t.get(1, 0, 2), 9.0);
        assert_eq!(t.get(1, 1, 2), 12.0);
    }

    #[test]
    fn y_term_is_only_valid_in_outputs_only_mode() {
        let outputs_only = SolutionData::from_outputs_only(
            vec![0.0, 1.0],
            vec![1.0, 2.0],
            1,
            None,
            StatusFlag::Success,
            vec![2.0, 3.0],
        );
        assert_eq!(outputs_only.y_term().unwrap(), &[2.0, 3.0]);

        let mut recorder = crate::recorder::StepRecorder::new(1, 0);
        recorder.write(0.0, &[1.0], &[0.0], None);
        let full_state = SolutionData::from_full_state(recorder.freeze(), StatusFlag::Success);
        assert!(full_state.y_term().is_err());
    }

    #[test]
    #[should_panic(expected = "does not match shape")]
    fn axis_triple_rejects_mismatched_flat_data() {
        AxisTriple::from_flat((2, 2, 2), vec![0.0; 3]);
    }
}
