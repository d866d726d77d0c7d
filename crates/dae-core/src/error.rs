//! Error types for DAE driver configuration and integration.

use thiserror::Error;

/// Errors raised by the options layer, the stepping driver, and its
/// supporting components.
///
/// Configuration errors (the first group below) are raised synchronously
/// from driver construction and never leave a partially built driver alive.
/// Integration errors are surfaced from `step_one`/`calc_ic` failures and
/// always carry a partially filled result back to the caller rather than
/// unwinding.
#[derive(Debug, Error)]
pub enum Error {
    /// Two array arguments that must share a length did not.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A dense or sparse linear solve hit a singular (or numerically
    /// singular) matrix.
    #[error("singular matrix in linear solve")]
    SingularMatrix,

    /// An unrecognized linear-solver name was supplied in `SetupOptions`.
    #[error("unknown linear solver: {0}")]
    UnknownLinearSolver(String),

    /// The requested jacobian mode is not supported by the chosen linear
    /// solver kind.
    #[error("unsupported jacobian mode {mode:?} for linear solver {solver:?}")]
    UnsupportedJacobianMode { mode: String, solver: String },

    /// `calc_ic`/`step_one` was invoked before a linear solver was attached.
    #[error("linear solver not set before initialize")]
    LinearSolverUnset,

    /// `t_eval`/`t_interp` failed the schedule invariants of the data model
    /// (length, ordering, or bracketing).
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A required residual/jacobian/output expression was not supplied.
    #[error("missing expression: {0}")]
    MissingExpression(String),

    /// The nonlinear (Newton) iteration failed to converge within the
    /// configured iteration cap.
    #[error("nonlinear convergence failure after {iterations} iterations")]
    ConvergenceFailure { iterations: usize },

    /// The adaptive step size was driven below `h_min` by repeated
    /// error-test failures.
    #[error("step size underflow below h_min = {h_min:e}")]
    StepSizeUnderflow { h_min: f64 },

    /// `step_one` returned the same time it was called at: no progress was
    /// made on this call, distinct from (and checked before) the
    /// sliding-window stall the no-progress guard detects.
    #[error("back-end returned duplicate time t={t} with no progress")]
    DuplicateTimeStall { t: f64 },

    /// Catch-all for back-end failures that do not fit a more specific
    /// variant (mirrors the reference solver's `SolverError(String)`).
    #[error("solver error: {0}")]
    SolverError(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
