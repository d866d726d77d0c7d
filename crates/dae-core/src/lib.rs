//! Core value types shared by the DAE stepping driver: configuration
//! (`SetupOptions`/`SolverOptions`), the stall detector, the status-flag
//! taxonomy, and the error type. Construction of an actual integrator
//! back-end is out of scope for this crate — see `dae-solver`.

pub mod error;
pub mod guard;
pub mod options;
pub mod status;

pub use error::{Error, Result};
pub use guard::NoProgressGuard;
pub use options::{JacobianMode, KrylovMethod, LinearSolverKind, Preconditioner, SetupOptions, SolverOptions};
pub use status::StatusFlag;
