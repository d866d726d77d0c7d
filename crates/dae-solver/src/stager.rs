//! Outputs-only recording: evaluate user output expressions and their
//! parametric sensitivities at each snapshot instead of keeping the full
//! state vector (§4.3).
//!
//! The sensitivity of an output `f_k(t, y)` with respect to parameter
//! `p_i` splits into two pieces that this module sums:
//!
//!   d f_k / d p_i  =  (∂f_k/∂y) · S_i   +   (∂f_k/∂p_i)_explicit
//!
//! The first term is a dense-row, sparse-column contraction against the
//! state sensitivity `S_i = ∂y/∂p_i` the back-end already tracks; the
//! second is the output expression's own explicit parameter dependence,
//! itself sparse. Both are accumulated into one dense `nnz_out`-length
//! vector per parameter.

use crate::expression::OutputExpr;
use crate::result::AxisTriple;

/// Evaluate one output expression's explicit values at `(t, y, inputs)`.
pub fn eval_output(expr: &impl OutputExpr, t: f64, y: &[f64], inputs: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; expr.nnz_out()];
    expr.call(t, y, inputs, &mut out);
    out
}

/// Evaluate `d f_k / d p_i` for a single parameter `i`, given that
/// parameter's state sensitivity row `s_i = ∂y/∂p_i`.
pub fn eval_output_sensitivity(
    expr: &impl OutputExpr,
    param: usize,
    t: f64,
    y: &[f64],
    inputs: &[f64],
    s_i: &[f64],
) -> Vec<f64> {
    let mut out = vec![0.0; expr.nnz_out()];

    let cols = expr.dy_col_indices();
    let vals = expr.dy_values(t, y, inputs);
    for (row, (&col, &val)) in cols.iter().zip(vals.iter()).enumerate() {
        out[row] += val * s_i[col];
    }

    let dp_rows = expr.dp_row_indices(param);
    let dp_vals = expr.dp_values(param, t, y, inputs);
    for (&row, &val) in dp_rows.iter().zip(dp_vals.iter()) {
        out[row] += val;
    }

    out
}

/// Accumulates outputs-only snapshots. Growing axis of the sensitivity
/// tensor is time (the leading axis of the `(N, L, n_params)` contract),
/// so each step's row is a contiguous append rather than the param-major
/// scatter full-state mode needs.
pub struct OutputStager<'e, E: OutputExpr> {
    exprs: &'e [E],
    n_params: usize,
    l_total: usize,
    times: Vec<f64>,
    outputs: Vec<f64>,
    sensitivities: Option<AxisTriple>,
}

impl<'e, E: OutputExpr> OutputStager<'e, E> {
    pub fn new(exprs: &'e [E], n_params: usize) -> Self {
        let l_total: usize = exprs.iter().map(|e| e.nnz_out()).sum();
        let sensitivities = if n_params > 0 {
            Some(AxisTriple::from_flat((0, l_total, n_params), vec![]))
        } else {
            None
        };
        Self {
            exprs,
            n_params,
            l_total,
            times: Vec::new(),
            outputs: Vec::new(),
            sensitivities,
        }
    }

    pub fn l_total(&self) -> usize {
        self.l_total
    }

    /// Evaluate every output expression and, if sensitivities were
    /// requested, every parameter's output sensitivity, and append the
    /// results as the next snapshot.
    pub fn record(&mut self, t: f64, y: &[f64], inputs: &[f64], s: Option<&[Vec<f64>]>) {
        self.times.push(t);

        let mut row = Vec::with_capacity(self.l_total);
        for expr in self.exprs {
            row.extend(eval_output(expr, t, y, inputs));
        }
        self.outputs.extend_from_slice(&row);

        if let (Some(tensor), Some(s)) = (self.sensitivities.as_mut(), s) {
            debug_assert_eq!(s.len(), self.n_params);
            // The tensor's leading axis is time, so one snapshot is a
            // single (l_total, n_params) plane, filled parameter-column
            // by parameter-column since each column comes from a
            // separate sensitivity row `s[p]`.
            let mut plane = vec![0.0; self.l_total * self.n_params];
            for p in 0..self.n_params {
                let mut col = Vec::with_capacity(self.l_total);
                for expr in self.exprs {
                    col.extend(eval_output_sensitivity(expr, p, t, y, inputs, &s[p]));
                }
                for (l, v) in col.into_iter().enumerate() {
                    plane[l * self.n_params + p] = v;
                }
            }
            tensor.push_leading_row(&plane);
        }
    }

    pub fn freeze(self) -> (Vec<f64>, Vec<f64>, usize, Option<AxisTriple>) {
        (self.times, self.outputs, self.l_total, self.sensitivities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scale(f64);

    impl OutputExpr for Scale {
        fn call(&self, _t: f64, y: &[f64], _inputs: &[f64], out: &mut [f64]) {
            out[0] = self.0 * y[0];
        }
        fn nnz_out(&self) -> usize {
            1
        }
        fn out_shape(&self, d: usize) -> usize {
            if d == 0 {
                1
            } else {
                0
            }
        }
        fn dy_col_indices(&self) -> &[usize] {
            &[0]
        }
        fn dy_values(&self, _t: f64, _y: &[f64], _inputs: &[f64]) -> Vec<f64> {
            vec![self.0]
        }
        fn dp_row_indices(&self, _p: usize) -> &[usize] {
            &[]
        }
        fn dp_values(&self, _p: usize, _t: f64, _y: &[f64], _inputs: &[f64]) -> Vec<f64> {
            vec![]
        }
    }

    #[test]
    fn output_value_tracks_scaled_state() {
        let exprs = [Scale(2.0)];
        let mut stager = OutputStager::new(&exprs, 0);
        stager.record(0.0, &[3.0], &[], None);
        let (times, outputs, l, _) = stager.freeze();
        assert_eq!(times, vec![0.0]);
        assert_eq!(l, 1);
        assert_eq!(outputs, vec![6.0]);
    }

    #[test]
    fn output_sensitivity_is_dy_dot_s() {
        let exprs = [Scale(2.0)];
        let mut stager = OutputStager::new(&exprs, 1);
        stager.record(0.0, &[3.0], &[], Some(&[vec![5.0]]));
        let (_, _, l, sens) = stager.freeze();
        let sens = sens.expect("sensitivities present");
        assert_eq!(sens.shape(), (1, l, 1));
        assert_eq!(sens.get(0, 0, 0), 10.0);
    }
}
