//! The stepping driver state machine (§4.6).
//!
//! ```text
//!        INIT
//!          |
//!          v
//!     STEPPING <----.
//!        |  |       |
//!        |  `-------'  (internal substep, target not yet reached)
//!        v
//!   STOP_DISCONT -> STEPPING   (forced node recorded, more windows remain)
//!        |
//!        v
//!       DONE
//!
//!   any state -> FAIL   (back-end failure, stalled progress, bad schedule)
//! ```
//!
//! Three schedule policies share this machine (§4.4): `Eval` records only
//! the forced `t_eval` nodes, `Interp` additionally records dense-output
//! points between them via `get_dky`, and `Adaptive` records every
//! internal step the back-end accepts.
//!
//! Per §4.6/§7, only schedule-validation problems caught at construction
//! are genuine configuration errors returned as `Err`. Everything that can
//! go wrong once stepping has begun — a back-end failure, a stalled
//! no-progress guard, a duplicate-time return — is an *integration* error:
//! the driver stops, tags the partially filled recorder with the failing
//! [`StatusFlag`], and hands it back through the normal `Ok(SolutionData)`
//! path. The assembler never throws on integrator failure.

use dae_core::{Error, NoProgressGuard, Result, StatusFlag};

use crate::backend::DaeIntegrator;
use crate::consistent_init;
use crate::recorder::StepRecorder;
use crate::result::SolutionData;

/// Which nodes the driver records a snapshot at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePolicy {
    /// Only the forced `t_eval` nodes.
    Eval,
    /// `t_eval` nodes plus the interior `t_interp` points, reconstructed
    /// by dense output between internal steps.
    Interp,
    /// Every internal step the back-end accepts.
    Adaptive,
}

/// Driver lifecycle state, named after §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Init,
    Stepping,
    StopDiscont,
    Done,
    Fail,
}

/// Drives a [`DaeIntegrator`] across a schedule of forced stop-times,
/// recording snapshots according to the configured [`SchedulePolicy`].
pub struct StepDriver<B: DaeIntegrator> {
    backend: B,
    guard: NoProgressGuard,
    t_eval: Vec<f64>,
    t_interp: Vec<f64>,
    policy: SchedulePolicy,
    state: DriverState,
    /// Run `ConsistentInit` (§4.5) once at `t_eval[0]` and again after every
    /// forced stop-time short of the last. Mirrors `SolverOptions::calc_ic`.
    calc_ic: bool,
}

/// What ended the stepping loop, carrying the status the assembled
/// [`SolutionData`] should report.
enum Termination {
    /// `t_eval`'s last node was reached without incident.
    Success,
    /// A root (event) crossing ended the trajectory early.
    Root,
    /// An integration failure (back-end error, stall, duplicate time).
    Failed(StatusFlag),
}

impl<B: DaeIntegrator> StepDriver<B> {
    pub fn new(
        backend: B,
        t_eval: Vec<f64>,
        policy: SchedulePolicy,
        guard: NoProgressGuard,
    ) -> Result<Self> {
        Self::with_calc_ic(backend, t_eval, policy, guard, false)
    }

    /// Like [`Self::new`], additionally enabling the `ConsistentInit` pass
    /// at `t_eval[0]` and at each forced stop-time (§4.5, §4.6).
    pub fn with_calc_ic(
        backend: B,
        t_eval: Vec<f64>,
        policy: SchedulePolicy,
        guard: NoProgressGuard,
        calc_ic: bool,
    ) -> Result<Self> {
        if t_eval.len() < 2 {
            return Err(Error::InvalidSchedule(
                "t_eval needs at least two nodes (start and stop)".into(),
            ));
        }
        if !t_eval.windows(2).all(|w| w[1] > w[0]) {
            return Err(Error::InvalidSchedule(
                "t_eval must be strictly increasing".into(),
            ));
        }
        Ok(Self {
            backend,
            guard,
            t_eval,
            t_interp: Vec::new(),
            policy,
            state: DriverState::Init,
            calc_ic,
        })
    }

    /// Like [`Self::with_calc_ic`], deriving `calc_ic` from a
    /// [`dae_core::SolverOptions`] (§4.1) rather than a bare bool, so
    /// callers holding a fully-populated options struct can thread it
    /// straight through without picking fields out by hand.
    pub fn with_solver_options(
        backend: B,
        t_eval: Vec<f64>,
        policy: SchedulePolicy,
        guard: NoProgressGuard,
        opts: &dae_core::SolverOptions,
    ) -> Result<Self> {
        Self::with_calc_ic(backend, t_eval, policy, guard, opts.calc_ic)
    }

    /// Run `ConsistentInit` at the current backend time, feeding it a
    /// strictly-future `t_next` perturbed per §9's "Scalar perturbation at
    /// stop-times" note, then re-initialize the backend with the
    /// corrected `(y, y')` so every caller observes the same consistent
    /// state regardless of which path (ODE shortcut or general DAE)
    /// produced it.
    fn run_consistent_init(&mut self, t_next_target: f64) -> Result<()> {
        let t0 = self.backend.t();
        let y0 = self.backend.y().to_vec();
        let yp0 = self.backend.yp().to_vec();
        let forward = t_next_target >= t0;
        let t_next = consistent_init::perturbed_t_next(t0, forward);
        log::debug!("consistent-init at t={t0} (t_next={t_next})");
        let (y, yp) = consistent_init::run(&mut self.backend, t0, &y0, &yp0, t_next)?;
        self.backend.init(t0, &y, &yp)
    }

    /// Attach interior dense-output points. Each must fall strictly
    /// between `t_eval`'s first and last node; only meaningful under
    /// [`SchedulePolicy::Interp`].
    pub fn with_interp_points(mut self, mut t_interp: Vec<f64>) -> Result<Self> {
        t_interp.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let (lo, hi) = (self.t_eval[0], *self.t_eval.last().unwrap());
        if t_interp.iter().any(|&t| t <= lo || t >= hi) {
            return Err(Error::InvalidSchedule(
                "t_interp points must lie strictly within the t_eval bracket".into(),
            ));
        }
        self.t_interp = t_interp;
        Ok(self)
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run the full schedule to completion, producing a [`SolutionData`]
    /// in full-state mode.
    ///
    /// `n_states`/`n_params` describe the back-end's state; sensitivities
    /// are recorded alongside the state whenever `backend.sensitivities()`
    /// returns `Some`. Only a schedule/construction problem escapes as
    /// `Err`; every integration-time failure comes back as `Ok` with the
    /// partial trajectory and a failing status (§4.6, §7).
    pub fn run(&mut self, n_states: usize, n_params: usize) -> Result<SolutionData> {
        let mut recorder = StepRecorder::new(n_states, n_params);

        if self.calc_ic {
            let t_next_target = self.t_eval[1];
            if let Err(e) = self.run_consistent_init(t_next_target) {
                self.state = DriverState::Fail;
                log::warn!("consistent-init failed at t0: {e}");
                return Ok(SolutionData::from_full_state(
                    recorder.freeze(),
                    StatusFlag::ErrFail,
                ));
            }
        }

        recorder.write(
            self.backend.t(),
            self.backend.y(),
            self.backend.yp(),
            self.backend.sensitivities(),
        );

        self.state = DriverState::Stepping;
        let mut interp_cursor = 0usize;

        let n_windows = self.t_eval.len() - 1;
        let windows: Vec<[f64; 2]> = self.t_eval.windows(2).map(|w| [w[0], w[1]]).collect();

        let mut termination = Termination::Success;

        'windows: for (window_idx, [_, t_target]) in windows.into_iter().enumerate() {
            if let Err(e) = self.backend.set_stop_time(t_target) {
                log::warn!("set_stop_time({t_target}) failed: {e}");
                termination = Termination::Failed(StatusFlag::ErrFail);
                break 'windows;
            }

            loop {
                let t_before = self.backend.t();
                let outcome = match self.backend.step_one(t_target) {
                    Ok(o) => o,
                    Err(e) => {
                        log::warn!("step_one failed at t={t_before}: {e}");
                        termination = Termination::Failed(StatusFlag::ErrFail);
                        break 'windows;
                    }
                };

                log::trace!(
                    "step_one: t {} -> {} ({:?})",
                    t_before,
                    outcome.t_reached,
                    outcome.status
                );

                if (outcome.t_reached - t_before).abs() < 1e-12 {
                    let err = Error::DuplicateTimeStall { t: outcome.t_reached };
                    log::warn!("{err}");
                    termination = Termination::Failed(StatusFlag::ErrFail);
                    break 'windows;
                }

                self.guard.add(outcome.t_reached - t_before);
                if self.guard.violated() {
                    log::warn!(
                        "no-progress guard tripped at t={}: step size stalled",
                        outcome.t_reached
                    );
                    termination = Termination::Failed(StatusFlag::ErrFail);
                    break 'windows;
                }

                match outcome.status {
                    StatusFlag::Success | StatusFlag::StopReturn => {}
                    StatusFlag::RootReturn => {
                        // An event fired: the final snapshot, then DONE
                        // (§4.6 "root hit: evaluate schedules; transition
                        // to DONE" — a root ends the trajectory, it does
                        // not merely interrupt it).
                        recorder.write(
                            outcome.t_reached,
                            self.backend.y(),
                            self.backend.yp(),
                            self.backend.sensitivities(),
                        );
                        termination = Termination::Root;
                        break 'windows;
                    }
                    failure => {
                        log::warn!("back-end reported failure status {failure:?}");
                        termination = Termination::Failed(failure);
                        break 'windows;
                    }
                }

                if self.policy == SchedulePolicy::Adaptive {
                    recorder.write(
                        outcome.t_reached,
                        self.backend.y(),
                        self.backend.yp(),
                        self.backend.sensitivities(),
                    );
                } else if self.policy == SchedulePolicy::Interp {
                    while interp_cursor < self.t_interp.len()
                        && self.t_interp[interp_cursor] <= outcome.t_reached + 1e-12
                        && self.t_interp[interp_cursor] >= t_before - 1e-12
                    {
                        let t_i = self.t_interp[interp_cursor];
                        let mut y_i = vec![0.0; n_states];
                        let mut yp_i = vec![0.0; n_states];
                        if let Err(e) = self.backend.get_dky(t_i, 0, &mut y_i) {
                            log::warn!("get_dky(y, t={t_i}) failed: {e}");
                            termination = Termination::Failed(StatusFlag::ErrFail);
                            break 'windows;
                        }
                        if let Err(e) = self.backend.get_dky(t_i, 1, &mut yp_i) {
                            log::warn!("get_dky(yp, t={t_i}) failed: {e}");
                            termination = Termination::Failed(StatusFlag::ErrFail);
                            break 'windows;
                        }
                        recorder.write(t_i, &y_i, &yp_i, self.backend.sensitivities());
                        interp_cursor += 1;
                    }
                }

                if matches!(outcome.status, StatusFlag::StopReturn) {
                    break;
                }
            }

            self.state = DriverState::StopDiscont;
            if self.policy != SchedulePolicy::Adaptive {
                recorder.write(
                    t_target,
                    self.backend.y(),
                    self.backend.yp(),
                    self.backend.sensitivities(),
                );
            }

            // Only windows short of the last one land on a genuine
            // STOP_DISCONT transition (§4.6): the final forced stop goes
            // straight to DONE, with no discontinuity left to absorb.
            let is_last_window = window_idx + 1 == n_windows;
            if self.calc_ic && !is_last_window {
                let next_target = self.t_eval[window_idx + 2];
                log::debug!("stop-time discontinuity at t={t_target}: reinitializing");
                if let Err(e) = self.run_consistent_init(next_target) {
                    log::warn!("consistent-init failed at stop-time t={t_target}: {e}");
                    termination = Termination::Failed(StatusFlag::ErrFail);
                    break 'windows;
                }
            }
            self.state = DriverState::Stepping;
        }

        let status = match termination {
            Termination::Success => {
                self.state = DriverState::Done;
                StatusFlag::Success
            }
            Termination::Root => {
                self.state = DriverState::Done;
                StatusFlag::RootReturn
            }
            Termination::Failed(flag) => {
                self.state = DriverState::Fail;
                flag
            }
        };

        Ok(SolutionData::from_full_state(recorder.freeze(), status))
    }

    /// Run the full schedule, staging user output expressions (and their
    /// parametric sensitivities) at each snapshot instead of recording the
    /// full state vector (§4.3), producing a [`SolutionData`] in
    /// outputs-only mode. Same failure contract as [`Self::run`]: only a
    /// construction-time schedule problem escapes as `Err`.
    pub fn run_outputs_only<E: crate::expression::OutputExpr>(
        &mut self,
        exprs: &[E],
        n_params: usize,
        inputs: &[f64],
    ) -> Result<SolutionData> {
        let mut stager = crate::stager::OutputStager::new(exprs, n_params);

        if self.calc_ic {
            let t_next_target = self.t_eval[1];
            if let Err(e) = self.run_consistent_init(t_next_target) {
                self.state = DriverState::Fail;
                log::warn!("consistent-init failed at t0: {e}");
                let (times, outputs, l, sens) = stager.freeze();
                return Ok(SolutionData::from_outputs_only(
                    times,
                    outputs,
                    l,
                    sens,
                    StatusFlag::ErrFail,
                    Vec::new(),
                ));
            }
        }

        stager.record(self.backend.t(), self.backend.y(), inputs, self.backend.sensitivities());

        self.state = DriverState::Stepping;

        let n_windows = self.t_eval.len() - 1;
        let windows: Vec<[f64; 2]> = self.t_eval.windows(2).map(|w| [w[0], w[1]]).collect();

        let mut termination = Termination::Success;

        'windows: for (window_idx, [_, t_target]) in windows.into_iter().enumerate() {
            if let Err(e) = self.backend.set_stop_time(t_target) {
                log::warn!("set_stop_time({t_target}) failed: {e}");
                termination = Termination::Failed(StatusFlag::ErrFail);
                break 'windows;
            }

            loop {
                let t_before = self.backend.t();
                let outcome = match self.backend.step_one(t_target) {
                    Ok(o) => o,
                    Err(e) => {
                        log::warn!("step_one failed at t={t_before}: {e}");
                        termination = Termination::Failed(StatusFlag::ErrFail);
                        break 'windows;
                    }
                };

                log::trace!(
                    "step_one: t {} -> {} ({:?})",
                    t_before,
                    outcome.t_reached,
                    outcome.status
                );

                if (outcome.t_reached - t_before).abs() < 1e-12 {
                    let err = Error::DuplicateTimeStall { t: outcome.t_reached };
                    log::warn!("{err}");
                    termination = Termination::Failed(StatusFlag::ErrFail);
                    break 'windows;
                }

                self.guard.add(outcome.t_reached - t_before);
                if self.guard.violated() {
                    log::warn!(
                        "no-progress guard tripped at t={}: step size stalled",
                        outcome.t_reached
                    );
                    termination = Termination::Failed(StatusFlag::ErrFail);
                    break 'windows;
                }

                match outcome.status {
                    StatusFlag::Success | StatusFlag::StopReturn => {}
                    StatusFlag::RootReturn => {
                        stager.record(
                            outcome.t_reached,
                            self.backend.y(),
                            inputs,
                            self.backend.sensitivities(),
                        );
                        termination = Termination::Root;
                        break 'windows;
                    }
                    failure => {
                        log::warn!("back-end reported failure status {failure:?}");
                        termination = Termination::Failed(failure);
                        break 'windows;
                    }
                }

                if self.policy == SchedulePolicy::Adaptive {
                    stager.record(outcome.t_reached, self.backend.y(), inputs, self.backend.sensitivities());
                }

                if matches!(outcome.status, StatusFlag::StopReturn) {
                    break;
                }
            }

            self.state = DriverState::StopDiscont;
            if self.policy != SchedulePolicy::Adaptive {
                stager.record(t_target, self.backend.y(), inputs, self.backend.sensitivities());
            }

            let is_last_window = window_idx + 1 == n_windows;
            if self.calc_ic && !is_last_window {
                let next_target = self.t_eval[window_idx + 2];
                log::debug!("stop-time discontinuity at t={t_target}: reinitializing");
                if let Err(e) = self.run_consistent_init(next_target) {
                    log::warn!("consistent-init failed at stop-time t={t_target}: {e}");
                    termination = Termination::Failed(StatusFlag::ErrFail);
                    break 'windows;
                }
            }
            self.state = DriverState::Stepping;
        }

        // Final yterm slice (§4.6): the last raw state vector, so a
        // consumer of outputs-only results can resume a simulation from
        // the terminal state without re-deriving it from the expressions.
        // Valid even on failure -- whatever the back-end's working vectors
        // held at the point stepping stopped.
        let y_term = self.backend.y().to_vec();

        let status = match termination {
            Termination::Success => {
                self.state = DriverState::Done;
                StatusFlag::Success
            }
            Termination::Root => {
                self.state = DriverState::Done;
                StatusFlag::RootReturn
            }
            Termination::Failed(flag) => {
                self.state = DriverState::Fail;
                flag
            }
        };

        let (times, outputs, l, sens) = stager.freeze();
        Ok(SolutionData::from_outputs_only(
            times, outputs, l, sens, status, y_term,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{IcMode, StepOutcome};

    /// A scripted mock back-end, grounded on the design note that the
    /// driver should be testable against a prescribed trajectory
    /// generator independent of any real numerical method: `y(t) = t`,
    /// `y'(t) = 1` everywhere, stepping in fixed `0.1` increments.
    struct ScriptedLine {
        t: f64,
        y: Vec<f64>,
        yp: Vec<f64>,
        mask: Vec<f64>,
        h: f64,
    }

    impl ScriptedLine {
        fn new() -> Self {
            Self {
                t: 0.0,
                y: vec![0.0],
                yp: vec![1.0],
                mask: vec![1.0],
                h: 0.1,
            }
        }
    }

    impl DaeIntegrator for ScriptedLine {
        fn init(&mut self, t0: f64, y0: &[f64], yp0: &[f64]) -> Result<()> {
            self.t = t0;
            self.y = y0.to_vec();
            self.yp = yp0.to_vec();
            Ok(())
        }
        fn reinit(&mut self, t: f64, y: &[f64], yp: &[f64]) -> Result<()> {
            self.init(t, y, yp)
        }
        fn set_stop_time(&mut self, _t_stop: f64) -> Result<()> {
            Ok(())
        }
        fn calc_ic(&mut self, _mode: IcMode, _t_next: f64) -> Result<()> {
            Ok(())
        }
        fn step_one(&mut self, t_target: f64) -> Result<StepOutcome> {
            let t_new = (self.t + self.h).min(t_target);
            self.t = t_new;
            self.y = vec![t_new];
            let status = if (t_new - t_target).abs() < 1e-12 {
                StatusFlag::StopReturn
            } else {
                StatusFlag::Success
            };
            Ok(StepOutcome {
                t_reached: t_new,
                status,
            })
        }
        fn get_dky(&self, t: f64, k: u8, out: &mut [f64]) -> Result<()> {
            match k {
                0 => out[0] = t,
                1 => out[0] = 1.0,
                _ => return Err(Error::InvalidSchedule("order not supported".into())),
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
            None
        }
        fn differential_mask(&self) -> &[f64] {
            &self.mask
        }
        fn residual(&self, _t: f64, _y: &[f64], _yp: &[f64], out: &mut [f64]) {
            out[0] = 0.0;
        }
    }

    /// Like [`ScriptedLine`], but reports a root crossing as soon as
    /// internal time passes `root_at`, so driver tests can exercise the
    /// root-terminates-the-trajectory path (§4.6) without a real back-end.
    struct ScriptedLineWithRoot {
        inner: ScriptedLine,
        root_at: f64,
        root_fired: bool,
    }

    impl DaeIntegrator for ScriptedLineWithRoot {
        fn init(&mut self, t0: f64, y0: &[f64], yp0: &[f64]) -> Result<()> {
            self.inner.init(t0, y0, yp0)
        }
        fn reinit(&mut self, t: f64, y: &[f64], yp: &[f64]) -> Result<()> {
            self.inner.reinit(t, y, yp)
        }
        fn set_stop_time(&mut self, t_stop: f64) -> Result<()> {
            self.inner.set_stop_time(t_stop)
        }
        fn calc_ic(&mut self, mode: IcMode, t_next: f64) -> Result<()> {
            self.inner.calc_ic(mode, t_next)
        }
        fn step_one(&mut self, t_target: f64) -> Result<StepOutcome> {
            let mut outcome = self.inner.step_one(t_target)?;
            if !self.root_fired && outcome.t_reached >= self.root_at {
                self.root_fired = true;
                outcome.status = StatusFlag::RootReturn;
            }
            Ok(outcome)
        }
        fn get_dky(&self, t: f64, k: u8, out: &mut [f64]) -> Result<()> {
            self.inner.get_dky(t, k, out)
        }
        fn t(&self) -> f64 {
            self.inner.t()
        }
        fn y(&self) -> &[f64] {
            self.inner.y()
        }
        fn yp(&self) -> &[f64] {
            self.inner.yp()
        }
        fn sensitivities(&self) -> Option<&[Vec<f64>]> {
            None
        }
        fn differential_mask(&self) -> &[f64] {
            self.inner.differential_mask()
        }
        fn residual(&self, t: f64, y: &[f64], yp: &[f64], out: &mut [f64]) {
            self.inner.residual(t, y, yp, out)
        }
    }

    #[test]
    fn eval_policy_records_only_forced_nodes() {
        let backend = ScriptedLine::new();
        let guard = NoProgressGuard::new(0, 0.0);
        let mut driver =
            StepDriver::new(backend, vec![0.0, 0.5, 1.0], SchedulePolicy::Eval, guard).unwrap();

        let sol = driver.run(1, 0).unwrap();
        assert_eq!(driver.state(), DriverState::Done);
        assert_eq!(sol.status, StatusFlag::Success);
        assert_eq!(sol.times, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn interp_policy_adds_interior_points() {
        let backend = ScriptedLine::new();
        let guard = NoProgressGuard::new(0, 0.0);
        let mut driver = StepDriver::new(backend, vec![0.0, 1.0], SchedulePolicy::Interp, guard)
            .unwrap()
            .with_interp_points(vec![0.25, 0.75])
            .unwrap();

        let sol = driver.run(1, 0).unwrap();
        assert_eq!(sol.times, vec![0.0, 0.25, 0.75, 1.0]);
        assert_eq!(sol.state_at(1).unwrap(), &[0.25]);
    }

    #[test]
    fn adaptive_policy_records_every_internal_step() {
        let backend = ScriptedLine::new();
        let guard = NoProgressGuard::new(0, 0.0);
        let mut driver =
            StepDriver::new(backend, vec![0.0, 0.35], SchedulePolicy::Adaptive, guard).unwrap();

        let sol = driver.run(1, 0).unwrap();
        // Initial snapshot, then 0.1, 0.2, 0.3, 0.35 (clamped) = 5 total.
        assert_eq!(sol.n_steps(), 5);
        assert_eq!(*sol.times.last().unwrap(), 0.35);
    }

    #[test]
    fn rejects_schedule_with_fewer_than_two_nodes() {
        let backend = ScriptedLine::new();
        let guard = NoProgressGuard::new(0, 0.0);
        assert!(StepDriver::new(backend, vec![0.0], SchedulePolicy::Eval, guard).is_err());
    }

    #[test]
    fn rejects_non_increasing_schedule() {
        let backend = ScriptedLine::new();
        let guard = NoProgressGuard::new(0, 0.0);
        assert!(StepDriver::new(backend, vec![0.0, 1.0, 0.5], SchedulePolicy::Eval, guard).is_err());
    }

    #[test]
    fn rejects_interp_points_outside_bracket() {
        let backend = ScriptedLine::new();
        let guard = NoProgressGuard::new(0, 0.0);
        let driver = StepDriver::new(backend, vec![0.0, 1.0], SchedulePolicy::Interp, guard).unwrap();
        assert!(driver.with_interp_points(vec![1.5]).is_err());
    }

    #[test]
    fn calc_ic_runs_at_init_and_corrects_the_initial_snapshot() {
        // ScriptedLine's residual is identically zero, so the ODE
        // shortcut (yp = -residual(t, y, 0)) drives the recorded initial
        // y' from the raw 1.0 seed down to 0.0 -- proof the consistent-init
        // pass actually ran rather than being dead code.
        let backend = ScriptedLine::new();
        let guard = NoProgressGuard::new(0, 0.0);
        let mut driver =
            StepDriver::with_calc_ic(backend, vec![0.0, 0.5], SchedulePolicy::Eval, guard, true)
                .unwrap();

        let sol = driver.run(1, 0).unwrap();
        assert_eq!(sol.deriv_at(0).unwrap(), &[0.0]);
    }

    #[test]
    fn calc_ic_runs_again_at_each_forced_stop_short_of_the_last() {
        let backend = ScriptedLine::new();
        let guard = NoProgressGuard::new(0, 0.0);
        let mut driver = StepDriver::with_calc_ic(
            backend,
            vec![0.0, 0.5, 1.0],
            SchedulePolicy::Eval,
            guard,
            true,
        )
        .unwrap();

        let sol = driver.run(1, 0).unwrap();
        assert_eq!(driver.state(), DriverState::Done);
        // Every recorded y' was corrected by the same shortcut, including
        // the two interior stop-time snapshots.
        assert_eq!(sol.deriv_at(0).unwrap(), &[0.0]);
        assert_eq!(sol.deriv_at(1).unwrap(), &[0.0]);
        assert_eq!(sol.deriv_at(2).unwrap(), &[0.0]);
    }

    #[test]
    fn duplicate_time_from_step_one_is_a_synthesized_stall() {
        struct Stuck {
            t: f64,
            y: Vec<f64>,
            yp: Vec<f64>,
            mask: Vec<f64>,
        }
        impl DaeIntegrator for Stuck {
            fn init(&mut self, t0: f64, y0: &[f64], yp0: &[f64]) -> Result<()> {
                self.t = t0;
                self.y = y0.to_vec();
                self.yp = yp0.to_vec();
                Ok(())
            }
            fn reinit(&mut self, t: f64, y: &[f64], yp: &[f64]) -> Result<()> {
                self.init(t, y, yp)
            }
            fn set_stop_time(&mut self, _t_stop: f64) -> Result<()> {
                Ok(())
            }
            fn calc_ic(&mut self, _mode: IcMode, _t_next: f64) -> Result<()> {
                Ok(())
            }
            fn step_one(&mut self, _t_target: f64) -> Result<StepOutcome> {
                // Never advances: the back-end keeps returning the same t.
                Ok(StepOutcome {
                    t_reached: self.t,
                    status: StatusFlag::Success,
                })
            }
            fn get_dky(&self, _t: f64, _k: u8, _out: &mut [f64]) -> Result<()> {
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
                None
            }
            fn differential_mask(&self) -> &[f64] {
                &self.mask
            }
            fn residual(&self, _t: f64, _y: &[f64], _yp: &[f64], out: &mut [f64]) {
                out[0] = 0.0;
            }
        }

        let backend = Stuck {
            t: 0.0,
            y: vec![0.0],
            yp: vec![0.0],
            mask: vec![1.0],
        };
        let guard = NoProgressGuard::new(0, 0.0);
        let mut driver =
            StepDriver::new(backend, vec![0.0, 1.0], SchedulePolicy::Eval, guard).unwrap();

        // Per §4.6/§7 a duplicate-time stall is an integration error, not
        // a configuration one: the driver still returns `Ok`, carrying the
        // partial (here: just the initial) snapshot and a failing status.
        let sol = driver.run(1, 0).unwrap();
        assert_eq!(sol.status, StatusFlag::ErrFail);
        assert_eq!(sol.n_steps(), 1);
        assert_eq!(driver.state(), DriverState::Fail);
    }

    #[test]
    fn root_return_terminates_the_trajectory_with_the_root_snapshot() {
        let backend = ScriptedLineWithRoot {
            inner: ScriptedLine::new(),
            root_at: 0.25,
            root_fired: false,
        };
        let guard = NoProgressGuard::new(0, 0.0);
        let mut driver =
            StepDriver::new(backend, vec![0.0, 10.0], SchedulePolicy::Eval, guard).unwrap();

        let sol = driver.run(1, 0).unwrap();
        assert_eq!(driver.state(), DriverState::Done);
        assert_eq!(sol.status, StatusFlag::RootReturn);
        // Initial snapshot at 0.0, then the root crossing at 0.3 (the
        // first multiple of the fixed 0.1 step at/after root_at=0.25) --
        // nothing past it, since the root ends the run.
        assert_eq!(sol.times, vec![0.0, 0.3]);
    }

    #[test]
    fn outputs_only_yterm_matches_the_last_raw_state() {
        use crate::expression::OutputExpr;

        struct Identity;
        impl OutputExpr for Identity {
            fn call(&self, _t: f64, y: &[f64], _inputs: &[f64], out: &mut [f64]) {
                out[0] = y[0];
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
                vec![1.0]
            }
            fn dp_row_indices(&self, _p: usize) -> &[usize] {
                &[]
            }
            fn dp_values(&self, _p: usize, _t: f64, _y: &[f64], _inputs: &[f64]) -> Vec<f64> {
                vec![]
            }
        }

        let backend = ScriptedLine::new();
        let guard = NoProgressGuard::new(0, 0.0);
        let mut driver =
            StepDriver::new(backend, vec![0.0, 1.0], SchedulePolicy::Eval, guard).unwrap();

        let exprs = [Identity];
        let sol = driver.run_outputs_only(&exprs, 0, &[]).unwrap();

        assert_eq!(sol.status, StatusFlag::Success);
        assert_eq!(*sol.times.last().unwrap(), 1.0);
        assert_eq!(sol.y_term().unwrap(), &[1.0]);
    }
}
