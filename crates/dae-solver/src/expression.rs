//! The expression-set contract consumed (not defined) by the driver.
//!
//! Construction of a real expression backend — a symbolic AD library, an
//! MLIR-compiled kernel set, or similar — is out of scope (§1). These
//! traits exist solely so [`crate::driver::StepDriver`] can be generic
//! over "whatever produced the residual and output callables" without
//! inspecting their internals (§9, "Polymorphism over expression
//! backends").

/// The residual `F(t, y, y'; p) = 0` of the DAE system.
///
/// Implementations are expected to be cheap to call repeatedly: the
/// reference back-end calls this once per Newton iteration and once more
/// for the ODE consistent-init shortcut (§4.5).
pub trait Residual {
    /// Evaluate `F(t, y, yp, inputs)` into `out` (length `n_states`).
    fn call(&self, t: f64, y: &[f64], yp: &[f64], inputs: &[f64], out: &mut [f64]);

    /// Number of state variables the residual expects.
    fn n_states(&self) -> usize;
}

/// A user-supplied output expression `f_k(t, y; inputs)`, evaluated by
/// [`crate::stager::OutputStager`] in outputs-only mode instead of
/// returning the full state vector.
///
/// `get_row`/`get_col` describe the sparsity of `∂f_k/∂y` and
/// `∂f_k/∂p` respectively, per §4.3: column indices for the (dense-row,
/// sparse-column) Jacobian-vector contraction, and row indices for the
/// densified explicit parameter derivative.
pub trait OutputExpr {
    /// Evaluate `f_k(t, y, inputs)` into `out` (length [`Self::nnz_out`]).
    fn call(&self, t: f64, y: &[f64], inputs: &[f64], out: &mut [f64]);

    /// Number of nonzero output entries this expression contributes.
    fn nnz_out(&self) -> usize;

    /// Size along dimension `d` of the dense output shape (before
    /// flattening to `nnz_out` nonzeros). `d == 0` is the row count.
    fn out_shape(&self, d: usize) -> usize;

    /// Column indices (into `y`) of the nonzero entries of `∂f_k/∂y`,
    /// one per row of the dense jacobian contraction.
    fn dy_col_indices(&self) -> &[usize];

    /// Values of `∂f_k/∂y` at the nonzero columns named by
    /// [`Self::dy_col_indices`], evaluated at the current `(t, y,
    /// inputs)`.
    fn dy_values(&self, t: f64, y: &[f64], inputs: &[f64]) -> Vec<f64>;

    /// Row indices (into the flattened `nnz_out` output) of the nonzero
    /// entries of the explicit parameter derivative `(∂f_k/∂p)_explicit`.
    fn dp_row_indices(&self, p: usize) -> &[usize];

    /// Values of `(∂f_k/∂p)_explicit` at the nonzero rows named by
    /// [`Self::dp_row_indices`] for parameter `p`.
    fn dp_values(&self, p: usize, t: f64, y: &[f64], inputs: &[f64]) -> Vec<f64>;
}
