//! The stepping driver for stiff, parameterised index-1 DAE systems.
//!
//! This crate owns the control flow around a back-end integrator — the
//! schedule walk, consistent initialization, sensitivity-aware recording,
//! and the stall/failure machinery — without implementing the integrator
//! itself. See [`backend::DaeIntegrator`] for the seam and
//! [`backend::RefIntegrator`] for the dense reference implementation used
//! in tests and the CLI demo.

pub mod backend;
pub mod consistent_init;
pub mod driver;
pub mod expression;
pub mod recorder;
pub mod result;
pub mod stager;

pub use backend::{DaeIntegrator, IcMode, RefIntegrator, StepOutcome};
pub use driver::{DriverState, SchedulePolicy, StepDriver};
pub use expression::{OutputExpr, Residual};
pub use recorder::{RecordedTrajectory, StepRecorder};
pub use result::{AxisTriple, RecordingMode, SolutionData};
pub use stager::OutputStager;
