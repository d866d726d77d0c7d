//! Structural and tunable configuration carried into the back-end.
//!
//! `SetupOptions` fixes structural choices at driver construction — a
//! change requires a fresh driver. `SolverOptions` carries integration
//! tunables that may be re-applied to a live driver between solves.

/// Linear-solver family offered to the back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolverKind {
    Dense,
    Banded,
    /// Sparse direct solve via KLU (or an equivalent sparse LU).
    SparseKlu,
    /// Matrix-free Krylov methods, distinguished by the base iterative
    /// algorithm.
    MatrixFree(KrylovMethod),
}

/// Matrix-free Krylov method selection for `LinearSolverKind::MatrixFree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KrylovMethod {
    Cg,
    Gmres,
    Tfqmr,
    Fgmres,
}

/// Jacobian evaluation/storage mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JacobianMode {
    Sparse,
    Banded,
    Dense,
    /// No jacobian is supplied; the back-end must approximate it.
    None,
    /// The back-end only ever sees jacobian-vector products.
    MatrixFree,
}

/// Preconditioner selection, with the half-bandwidths the banded
/// block-diagonal (BBD) preconditioner needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preconditioner {
    None,
    /// Banded block-diagonal preconditioner.
    Bbd { mu: usize, ml: usize },
}

/// Structural choices fixed for the lifetime of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupOptions {
    pub linear_solver: LinearSolverKind,
    pub jacobian_mode: JacobianMode,
    pub preconditioner: Preconditioner,
    /// Worker-thread count handed to the back-end's vector/matrix kernels.
    /// Opaque to the driver (§5): it neither spawns nor joins these workers.
    pub num_threads: usize,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            linear_solver: LinearSolverKind::Dense,
            jacobian_mode: JacobianMode::Dense,
            preconditioner: Preconditioner::None,
            num_threads: 1,
        }
    }
}

/// Integration tunables that may be re-applied between solves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// Maximum BDF order (1-5 for IDA-shaped back-ends).
    pub max_order: u8,
    /// Minimum internal step size.
    pub h_min: f64,
    /// Maximum internal step size (0.0 disables the cap).
    pub h_max: f64,
    /// Initial step size guess (0.0 lets the back-end choose).
    pub h_init: f64,
    /// Consecutive error-test failures tolerated before the step aborts.
    pub max_err_test_fails: u32,
    /// Nonlinear (Newton) iteration cap per step.
    pub max_nonlinear_iters: u32,
    /// Nonlinear convergence coefficient (scales the convergence test).
    pub nonlinear_conv_coef: f64,
    /// Suppress local error testing on algebraic variables.
    pub suppress_alg: bool,
    /// Enable a damped-Newton line search.
    pub line_search: bool,
    /// Iteration cap for the consistent-IC solve.
    pub max_ic_iters: u32,
    /// Scale the linear solve by the Newton step's error weights.
    pub linear_solution_scaling: bool,
    /// Ask the back-end to print cumulative statistics on return.
    pub print_stats: bool,
    /// Run `ConsistentInit` once at t0 before the first step.
    pub calc_ic: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_order: 5,
            h_min: 0.0,
            h_max: 0.0,
            h_init: 0.0,
            max_err_test_fails: 10,
            max_nonlinear_iters: 4,
            nonlinear_conv_coef: 0.33,
            suppress_alg: false,
            line_search: true,
            max_ic_iters: 5,
            linear_solution_scaling: true,
            print_stats: false,
            calc_ic: true,
        }
    }
}
