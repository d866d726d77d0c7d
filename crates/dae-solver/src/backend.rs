//! The `DaeIntegrator` back-end seam and a dense reference implementation.
//!
//! Constructing a production back-end (KLU-backed sparse Newton, banded
//! BDF, a GPU kernel) is explicitly out of scope (§1): that is vendored,
//! not written here. [`RefIntegrator`] exists only so the driver and its
//! tests have something real to drive — a plain backward-Euler/trapezoidal
//! Newton stepper with a finite-difference Jacobian, sized for the small
//! systems in the worked scenarios, not for production stiffness.

use dae_core::{Error, Result, SolverOptions, StatusFlag};
use nalgebra::{DMatrix, DVector};

use crate::expression::Residual;

/// Consistent-initial-condition strategy requested of [`DaeIntegrator::calc_ic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcMode {
    /// Differential variables are fixed at their supplied values; only the
    /// algebraic variables and the full `y'` are solved for (`IDA_YA_YDP_INIT`).
    FixDifferentialSolveAlgebraicAndYp,
    /// All of `y` is free; only `y'` is supplied and held fixed
    /// (`IDA_Y_INIT`).
    SolveAllY,
}

/// Result of one internal step, forwarded by the driver into its schedule
/// bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct StepOutcome {
    pub t_reached: f64,
    pub status: StatusFlag,
}

/// The back-end seam the driver is generic over (§4.8).
///
/// Every method mirrors a single IDA primitive by name so the mapping from
/// this trait to a real Sundials-shaped back-end stays mechanical. The
/// driver never reaches past this trait into a back-end's internals.
pub trait DaeIntegrator {
    /// One-time initialization with the first consistent (or
    /// to-be-corrected) state.
    fn init(&mut self, t0: f64, y0: &[f64], yp0: &[f64]) -> Result<()>;

    /// Re-initialize at a new `(t, y, y')` without discarding configuration
    /// (history and step-size heuristics are reset).
    fn reinit(&mut self, t: f64, y: &[f64], yp: &[f64]) -> Result<()>;

    /// Forbid the internal stepper from advancing past `t_stop`.
    fn set_stop_time(&mut self, t_stop: f64) -> Result<()>;

    /// Solve for a consistent `(y, y')` at the current time per `mode`.
    fn calc_ic(&mut self, mode: IcMode, t_next: f64) -> Result<()>;

    /// Advance the internal stepper by one internal step, not to exceed
    /// `t_target` (a forced stop-time set via [`Self::set_stop_time`]).
    fn step_one(&mut self, t_target: f64) -> Result<StepOutcome>;

    /// Dense output: the `k`-th time derivative of the interpolating
    /// polynomial at `t`, which must lie within the last internal step.
    fn get_dky(&self, t: f64, k: u8, out: &mut [f64]) -> Result<()>;

    /// Current internal time, valid after `init`/`reinit`/`step_one`.
    fn t(&self) -> f64;

    /// Current state, valid after `init`/`reinit`/`step_one`.
    fn y(&self) -> &[f64];

    /// Current state derivative.
    fn yp(&self) -> &[f64];

    /// Forward sensitivities `S_i = ∂y/∂p_i`, one row per parameter, if
    /// sensitivity analysis was requested at construction.
    fn sensitivities(&self) -> Option<&[Vec<f64>]>;

    /// Per-state mask: `1.0` for differential variables, `0.0` for
    /// algebraic ones. Used by [`crate::consistent_init`] to detect a pure
    /// ODE system and to select the `calc_ic` mode.
    fn differential_mask(&self) -> &[f64];

    /// Direct residual evaluation, exposed for the ODE consistent-init
    /// shortcut (§4.5) which needs `F(t, y, y_guess) -> y'` without paying
    /// for a full Newton solve.
    fn residual(&self, t: f64, y: &[f64], yp: &[f64], out: &mut [f64]);
}

/// A plain, dense, finite-difference-Jacobian Newton stepper.
///
/// Uses backward Euler by default and one step of Richardson
/// extrapolation (compare a full step against two half steps) to estimate
/// local error and adapt the step size. This is a deliberately simple
/// reference — real stiff systems want BDF orders above one and an
/// analytic or AD jacobian, neither of which is this crate's job to
/// provide.
pub struct RefIntegrator<R: Residual> {
    residual_fn: R,
    n: usize,
    differential_mask: Vec<f64>,
    reltol: f64,
    abstol: f64,
    h: f64,
    /// Size of the step that produced the current `(t, y, yp)`, i.e. the
    /// width of the dense-output window `[t - h_last, t]`. Distinct from
    /// `h`, which already holds the *next* proposed step size by the time
    /// a step is accepted — `get_dky` must interpolate over the step just
    /// taken, not the one about to be attempted.
    h_last: f64,
    h_min: f64,
    h_max: f64,
    max_newton_iters: u32,
    /// `SolverOptions::suppress_alg`: when set, the local error test
    /// excludes algebraic variables (`differential_mask[i] <= 0.999`)
    /// rather than holding them to the same Richardson-extrapolation
    /// tolerance as the differential ones.
    suppress_alg: bool,
    t: f64,
    y: Vec<f64>,
    yp: Vec<f64>,
    t_stop: Option<f64>,
    sensitivities: Option<Vec<Vec<f64>>>,
    inputs: Vec<f64>,
}

impl<R: Residual> RefIntegrator<R> {
    pub fn new(
        residual_fn: R,
        differential_mask: Vec<f64>,
        inputs: Vec<f64>,
        reltol: f64,
        abstol: f64,
    ) -> Self {
        let n = residual_fn.n_states();
        Self {
            residual_fn,
            n,
            differential_mask,
            reltol,
            abstol,
            h: 1e-4,
            h_last: 1e-4,
            h_min: 1e-12,
            h_max: f64::INFINITY,
            max_newton_iters: 10,
            suppress_alg: false,
            t: 0.0,
            y: vec![0.0; n],
            yp: vec![0.0; n],
            t_stop: None,
            sensitivities: None,
            inputs,
        }
    }

    pub fn with_step_bounds(mut self, h_min: f64, h_max: f64) -> Self {
        self.h_min = h_min;
        self.h_max = h_max;
        self
    }

    /// Apply the subset of `SolverOptions` (§4.1) this reference back-end
    /// can honor: the step-size bounds, the initial step guess, the
    /// Newton iteration cap, and whether algebraic variables are excluded
    /// from the local error test. `0.0`/`0` fields keep this back-end's
    /// own default, matching `SolverOptions`'s own "0 lets the back-end
    /// choose" convention (§4.1). The remaining fields of `SolverOptions`
    /// (`max_order`, `line_search`, `max_ic_iters`,
    /// `linear_solution_scaling`, `print_stats`) and all of `SetupOptions`
    /// have no counterpart in a fixed backward-Euler/trapezoidal stepper
    /// with no linear-solver selection to make; see `DESIGN.md`.
    pub fn with_solver_options(mut self, opts: &SolverOptions) -> Self {
        if opts.h_min > 0.0 {
            self.h_min = opts.h_min;
        }
        if opts.h_max > 0.0 {
            self.h_max = opts.h_max;
        }
        if opts.h_init > 0.0 {
            self.h = opts.h_init;
        }
        if opts.max_nonlinear_iters > 0 {
            self.max_newton_iters = opts.max_nonlinear_iters;
        }
        self.suppress_alg = opts.suppress_alg;
        self
    }

    pub fn enable_sensitivities(mut self, n_params: usize) -> Self {
        self.sensitivities = Some(vec![vec![0.0; self.n]; n_params]);
        self
    }

    /// Solve `F(t_new, y_new, (y_new - y_old)/h) = 0` for `y_new` via
    /// damped Newton with a central-difference Jacobian.
    fn newton_step(&self, t_new: f64, h: f64, y_old: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
        let mut y_new = y_old.to_vec();
        let mut resid = vec![0.0; self.n];
        let eps = 1e-7;

        for iter in 0..self.max_newton_iters {
            let yp_new: Vec<f64> = (0..self.n).map(|i| (y_new[i] - y_old[i]) / h).collect();
            self.residual_fn.call(t_new, &y_new, &yp_new, &self.inputs, &mut resid);

            let norm = weighted_norm(&resid, &y_new, self.reltol, self.abstol);
            if norm < 1.0 {
                return Ok((y_new, yp_new));
            }
            if iter == self.max_newton_iters - 1 {
                break;
            }

            let mut jac = DMatrix::<f64>::zeros(self.n, self.n);
            for j in 0..self.n {
                let mut y_pert = y_new.clone();
                let step = eps * y_pert[j].abs().max(1.0);
                y_pert[j] += step;
                let yp_pert: Vec<f64> =
                    (0..self.n).map(|i| (y_pert[i] - y_old[i]) / h).collect();
                let mut resid_pert = vec![0.0; self.n];
                self.residual_fn
                    .call(t_new, &y_pert, &yp_pert, &self.inputs, &mut resid_pert);
                for i in 0..self.n {
                    jac[(i, j)] = (resid_pert[i] - resid[i]) / step;
                }
            }

            let rhs = DVector::from_row_slice(&resid);
            let lu = jac.lu();
            let delta = lu.solve(&rhs).ok_or(Error::SingularMatrix)?;
            for i in 0..self.n {
                y_new[i] -= delta[i];
            }
        }
        Err(Error::ConvergenceFailure {
            iterations: self.max_newton_iters as usize,
        })
    }

    fn try_step(&self, h: f64, t_target: f64) -> Result<(f64, Vec<f64>, Vec<f64>, f64)> {
        let h = h.min(t_target - self.t);
        let t_new = self.t + h;

        let (full, _) = self.newton_step(t_new, h, &self.y)?;

        let t_half = self.t + h / 2.0;
        let (half, _) = self.newton_step(t_half, h / 2.0, &self.y)?;
        let (two_half, _) = self.newton_step(t_new, h / 2.0, &half)?;

        let diff: Vec<f64> = (0..self.n).map(|i| full[i] - two_half[i]).collect();
        let err = error_test_norm(
            &diff,
            &two_half,
            self.reltol,
            self.abstol,
            &self.differential_mask,
            self.suppress_alg,
        );
        let yp_new: Vec<f64> = (0..self.n).map(|i| (two_half[i] - self.y[i]) / h).collect();

        Ok((t_new, two_half, yp_new, err))
    }
}

fn weighted_norm(v: &[f64], scale: &[f64], reltol: f64, abstol: f64) -> f64 {
    let mut acc = 0.0;
    for i in 0..v.len() {
        let w = reltol * scale[i].abs() + abstol;
        acc += (v[i] / w).powi(2);
    }
    (acc / v.len() as f64).sqrt()
}

/// Like [`weighted_norm`], but when `suppress_alg` holds, excludes
/// algebraic variables (`mask[i] <= 0.999`) from the local error test
/// (`SolverOptions::suppress_alg`, §4.1) instead of holding them to the
/// same Richardson-extrapolation tolerance as differential variables.
fn error_test_norm(
    diff: &[f64],
    scale: &[f64],
    reltol: f64,
    abstol: f64,
    mask: &[f64],
    suppress_alg: bool,
) -> f64 {
    if !suppress_alg {
        return weighted_norm(diff, scale, reltol, abstol);
    }
    let mut acc = 0.0;
    let mut count = 0usize;
    for i in 0..diff.len() {
        if mask[i] <= 0.999 {
            continue;
        }
        let w = reltol * scale[i].abs() + abstol;
        acc += (diff[i] / w).powi(2);
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    (acc / count as f64).sqrt()
}

impl<R: Residual> DaeIntegrator for RefIntegrator<R> {
    fn init(&mut self, t0: f64, y0: &[f64], yp0: &[f64]) -> Result<()> {
        if y0.len() != self.n || yp0.len() != self.n {
            return Err(Error::DimensionMismatch {
                expected: self.n,
                actual: y0.len(),
            });
        }
        self.t = t0;
        self.y = y0.to_vec();
        self.yp = yp0.to_vec();
        Ok(())
    }

    fn reinit(&mut self, t: f64, y: &[f64], yp: &[f64]) -> Result<()> {
        self.init(t, y, yp)
    }

    fn set_stop_time(&mut self, t_stop: f64) -> Result<()> {
        self.t_stop = Some(t_stop);
        Ok(())
    }

    fn calc_ic(&mut self, mode: IcMode, t_next: f64) -> Result<()> {
        let h = (t_next - self.t).abs().max(1e-8) * 1e-3;
        match mode {
            IcMode::FixDifferentialSolveAlgebraicAndYp => {
                let (y_new, yp_new) = self.newton_step(self.t + h, h, &self.y)?;
                for i in 0..self.n {
                    if self.differential_mask[i] <= 0.999 {
                        self.y[i] = y_new[i];
                    }
                    self.yp[i] = yp_new[i];
                }
            }
            IcMode::SolveAllY => {
                let (y_new, yp_new) = self.newton_step(self.t + h, h, &self.y)?;
                self.y = y_new;
                self.yp = yp_new;
            }
        }
        Ok(())
    }

    fn step_one(&mut self, t_target: f64) -> Result<StepOutcome> {
        if t_target <= self.t {
            return Err(Error::InvalidSchedule(format!(
                "step_one target {t_target} is not ahead of current time {}",
                self.t
            )));
        }
        let t_stop = self.t_stop.unwrap_or(f64::INFINITY);
        let cap = t_target.min(t_stop);

        let mut h = self.h.min(cap - self.t);
        loop {
            match self.try_step(h, cap) {
                Ok((t_new, y_new, yp_new, err)) => {
                    if err <= 1.0 || h <= self.h_min * 1.0001 {
                        self.t = t_new;
                        self.y = y_new;
                        self.yp = yp_new;
                        self.h_last = h;
                        let safety = 0.9 * (1.0 / err.max(1e-12)).powf(1.0 / 3.0);
                        self.h = (h * safety.clamp(0.2, 5.0)).clamp(self.h_min, self.h_max);
                        let status = if (t_new - t_stop).abs() < 1e-10 {
                            StatusFlag::StopReturn
                        } else {
                            StatusFlag::Success
                        };
                        return Ok(StepOutcome {
                            t_reached: t_new,
                            status,
                        });
                    }
                    let safety = 0.9 * (1.0 / err).powf(1.0 / 3.0);
                    h = (h * safety.clamp(0.1, 0.5)).max(self.h_min);
                }
                Err(_) => {
                    h = (h * 0.5).max(self.h_min);
                    log::debug!("step rejected at t={}, halving h to {h:e}", self.t);
                    if h <= self.h_min {
                        log::warn!("step size underflow below h_min={:e} at t={}", self.h_min, self.t);
                        return Err(Error::StepSizeUnderflow { h_min: self.h_min });
                    }
                }
            }
        }
    }

    fn get_dky(&self, t: f64, k: u8, out: &mut [f64]) -> Result<()> {
        match k {
            0 => {
                // Linear interpolation between the last accepted (t, y) and
                // (t, y - h_last*yp) is sufficient for a backward-Euler/
                // trapezoidal reference stepper; dense output between nodes
                // is a courtesy for the interp schedule, not a claim of
                // BDF-order accuracy. Uses `h_last` (the step just taken),
                // not `h` (already the next proposed step size by the time
                // a step is accepted) -- the window must be
                // `[t - h_last, t]`, matching the completed step (§3.6).
                let frac = if self.h_last.abs() > 0.0 {
                    (t - (self.t - self.h_last)) / self.h_last
                } else {
                    1.0
                };
                for i in 0..self.n {
                    let y_prev = self.y[i] - self.h_last * self.yp[i];
                    out[i] = y_prev + frac * (self.y[i] - y_prev);
                }
            }
            1 => out.copy_from_slice(&self.yp),
            _ => {
                return Err(Error::InvalidSchedule(format!(
                    "get_dky order {k} not supported by the reference back-end"
                )))
            }
        }
        Ok(())
    }

    fn t(&self) -> f64 {
        self.t
    }

    fn y(&self) -> &[f64] {
        &self.y
    }

    fn yp(&self) -> &[f64] {
        &self.yp
    }

    fn sensitivities(&self) -> Option<&[Vec<f64>]> {
        self.sensitivities.as_deref()
    }

    fn differential_mask(&self) -> &[f64] {
        &self.differential_mask
    }

    fn residual(&self, t: f64, y: &[f64], yp: &[f64], out: &mut [f64]) {
        self.residual_fn.call(t, y, yp, &self.inputs, out);
    }
}
