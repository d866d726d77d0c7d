//! Consistent initial conditions (§4.5).
//!
//! A pure ODE system (every state differential — `differential_mask` is
//! all ones) never needs a nonlinear algebraic solve: `y'` is already
//! pinned by evaluating the residual once at the supplied `y`. Anything
//! with at least one algebraic variable goes through the back-end's
//! `calc_ic`, with a perturb-and-retry fallback grounded in the same
//! rollback-on-rejection idiom the reference stepper uses for adaptive
//! step control.

use dae_core::{Error, Result};

use crate::backend::{DaeIntegrator, IcMode};

/// True iff every entry of `mask` marks a differential variable, meaning
/// the system has no algebraic constraints at all.
///
/// Uses `> 0.999` rather than `== 1.0` deliberately: this is the
/// tolerance the back-end's own mask construction uses, and changing it
/// to an exact comparison would be a semantic change, not a cleanup.
pub fn is_ode(differential_mask: &[f64]) -> bool {
    differential_mask.iter().all(|&m| m > 0.999)
}

/// Nudge `y[idx]` forward by a small relative step and return the applied
/// delta, for use when a direct consistent-IC solve fails to converge and
/// a perturbed restart is attempted.
pub fn perturb_forward(y: &mut [f64], idx: usize, scale: f64) -> f64 {
    let delta = scale * y[idx].abs().max(1.0);
    y[idx] += delta;
    delta
}

/// Undo a [`perturb_forward`] call.
pub fn perturb_backward(y: &mut [f64], idx: usize, delta: f64) {
    y[idx] -= delta;
}

/// Perturbed future time a back-end's `calc_ic` can be handed when the
/// driver has not yet committed to stepping that far (§9 "Scalar
/// perturbation at stop-times"): `t_next = (1 + sqrt(eps)) * t + sqrt(eps)`
/// for forward integration, sign-flipped for backward integration. This
/// guarantees forward progress whether `t` sits near zero or far from it.
pub fn perturbed_t_next(t: f64, forward: bool) -> f64 {
    let eps = f64::EPSILON.sqrt();
    if forward {
        (1.0 + eps) * t + eps
    } else {
        (1.0 - eps) * t - eps
    }
}

/// Solve for a consistent `(y, y')` at `t0`, choosing the ODE shortcut or
/// the general DAE path based on the back-end's `differential_mask`.
pub fn run<B: DaeIntegrator>(
    backend: &mut B,
    t0: f64,
    y0: &[f64],
    yp0_guess: &[f64],
    t_next: f64,
) -> Result<(Vec<f64>, Vec<f64>)> {
    backend.init(t0, y0, yp0_guess)?;

    if is_ode(backend.differential_mask()) {
        // F(t, y, y') = 0 is expressed throughout this crate as
        // `y' - f(t, y)`, so evaluating the residual with a zeroed `y'`
        // recovers `-f(t, y)`; negate once to land on `y' = f(t, y)`
        // (§4.5's "ODE shortcut", adapted to this residual's sign
        // convention rather than the source's `f(t, y) - y'` one).
        let n = y0.len();
        let zero_yp = vec![0.0; n];
        let mut residual_at_zero = vec![0.0; n];
        backend.residual(t0, y0, &zero_yp, &mut residual_at_zero);
        let yp: Vec<f64> = residual_at_zero.iter().map(|&r| -r).collect();
        return Ok((y0.to_vec(), yp));
    }

    let mode = IcMode::FixDifferentialSolveAlgebraicAndYp;
    match backend.calc_ic(mode, t_next) {
        Ok(()) => Ok((backend.y().to_vec(), backend.yp().to_vec())),
        Err(first_err) => retry_perturbed(backend, t0, y0, yp0_guess, t_next, mode, first_err),
    }
}

fn retry_perturbed<B: DaeIntegrator>(
    backend: &mut B,
    t0: f64,
    y0: &[f64],
    yp0_guess: &[f64],
    t_next: f64,
    mode: IcMode,
    first_err: Error,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let mask = backend.differential_mask().to_vec();
    let mut y_pert = y0.to_vec();
    let mut deltas = Vec::new();
    let scale = f64::EPSILON.sqrt();
    for (i, &m) in mask.iter().enumerate() {
        if m <= 0.999 {
            deltas.push((i, perturb_forward(&mut y_pert, i, scale)));
        }
    }

    backend.reinit(t0, &y_pert, yp0_guess)?;
    match backend.calc_ic(mode, t_next) {
        Ok(()) => Ok((backend.y().to_vec(), backend.yp().to_vec())),
        Err(_) => {
            for (i, delta) in deltas {
                perturb_backward(&mut y_pert, i, delta);
            }
            Err(first_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_ode_mask_is_detected() {
        assert!(is_ode(&[1.0, 1.0, 1.0]));
        assert!(!is_ode(&[1.0, 0.0, 1.0]));
    }

    #[test]
    fn perturb_forward_then_backward_is_a_no_op() {
        let mut y = vec![1.0, 2.0, 3.0];
        let delta = perturb_forward(&mut y, 1, 1e-3);
        assert_ne!(y[1], 2.0);
        perturb_backward(&mut y, 1, delta);
        assert_eq!(y[1], 2.0);
    }

    #[test]
    fn perturb_forward_scales_with_magnitude() {
        let mut y = vec![100.0];
        let delta = perturb_forward(&mut y, 0, 1e-6);
        assert!(delta > 1e-5, "expected a magnitude-scaled delta, got {delta}");
    }

    #[test]
    fn perturbed_t_next_advances_forward_and_backward() {
        assert!(perturbed_t_next(1.0, true) > 1.0);
        assert!(perturbed_t_next(-1.0, false) < -1.0);
        assert!(perturbed_t_next(0.0, true) > 0.0);
    }

    struct Decay;
    impl DaeIntegrator for Decay {
        fn init(&mut self, _t0: f64, _y0: &[f64], _yp0: &[f64]) -> Result<()> {
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
        fn step_one(&mut self, _t_target: f64) -> Result<crate::backend::StepOutcome> {
            unreachable!("not exercised by consistent-init tests")
        }
        fn get_dky(&self, _t: f64, _k: u8, _out: &mut [f64]) -> Result<()> {
            Ok(())
        }
        fn t(&self) -> f64 {
            0.0
        }
        fn y(&self) -> &[f64] {
            &[]
        }
        fn yp(&self) -> &[f64] {
            &[]
        }
        fn sensitivities(&self) -> Option<&[Vec<f64>]> {
            None
        }
        fn differential_mask(&self) -> &[f64] {
            &[1.0]
        }
        fn residual(&self, _t: f64, y: &[f64], yp: &[f64], out: &mut [f64]) {
            // F = y' + y, matching the residual convention used by
            // RefIntegrator's worked scenarios: y' = -y at a consistent IC.
            out[0] = yp[0] + y[0];
        }
    }

    #[test]
    fn ode_shortcut_matches_residual_at_zero_yp() {
        let mut backend = Decay;
        let (y, yp) = run(&mut backend, 0.0, &[2.0], &[-2.0], 1.0).unwrap();
        assert_eq!(y, vec![2.0]);
        // residual(t, y, 0) = 0 + 2.0 = 2.0, negated -> yp = -2.0.
        assert!((yp[0] - (-2.0)).abs() < 1e-12, "yp={}", yp[0]);
    }
}
