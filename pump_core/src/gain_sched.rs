//! Error conditioning and integral-gain scheduling.
//!
//! Two filters run on the raw error. A coarse one with the fixed
//! `alpha_static` feeds the secondary curve, which picks how hard the second
//! (dynamic) filter smooths. The dynamic filter, fed from the raw error,
//! produces the error the integrator sees and the input to the primary `Ki`
//! curve. Large errors therefore get little smoothing and a large gain;
//! near the set-point smoothing increases and the gain tapers off.

use crate::filter::LowPassFilter;
use crate::params::ExpParams;

/// Initial coefficient of the dynamic filter before the first update.
const ALPHA_DYN_INITIAL: f32 = 0.5;

/// Everything the scheduler derived from one raw error sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Schedule {
    /// Coarsely filtered error.
    pub e_static: f32,
    /// Dynamically filtered error, fed to the PID integrator.
    pub e_dyn: f32,
    /// Integral gain from the primary curve at `e_dyn`; fed to the PID.
    pub ki: f32,
    /// Primary curve at `e_static`. Reported only.
    pub ki_primary: f32,
    pub alpha_dyn: f32,
}

#[derive(Debug, Clone)]
pub struct GainScheduler {
    params: ExpParams,
    lpf_static: LowPassFilter,
    lpf_dyn: LowPassFilter,
    last: Schedule,
}

impl GainScheduler {
    pub fn new(params: ExpParams) -> Self {
        Self {
            params,
            lpf_static: LowPassFilter::new(params.alpha_static),
            lpf_dyn: LowPassFilter::new(ALPHA_DYN_INITIAL),
            last: Schedule {
                alpha_dyn: ALPHA_DYN_INITIAL,
                ..Schedule::default()
            },
        }
    }

    pub fn update(&mut self, err_raw: f32) -> Schedule {
        let e_static = self.lpf_static.update(err_raw);
        let ki_primary = self.params.ki(e_static);

        let alpha_dyn = self.params.alpha_dyn(e_static);
        self.lpf_dyn.set_alpha(alpha_dyn);
        let e_dyn = self.lpf_dyn.update(err_raw);

        let ki = self.params.ki(e_dyn);

        self.last = Schedule {
            e_static,
            e_dyn,
            ki,
            ki_primary,
            alpha_dyn,
        };
        self.last
    }

    /// Re-seed both filters to zero. Coefficients are kept.
    pub fn reset(&mut self) {
        self.lpf_static.reset(0.0);
        self.lpf_dyn.reset(0.0);
    }

    /// Swap in a new parameter bundle (after re-calibration) and reset.
    pub fn set_params(&mut self, params: ExpParams) {
        self.params = params;
        self.lpf_static.set_alpha(params.alpha_static);
        self.reset();
    }

    pub fn params(&self) -> &ExpParams {
        &self.params
    }

    pub fn last(&self) -> Schedule {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ALPHA_DYN_MAX, ALPHA_DYN_MIN};

    fn params() -> ExpParams {
        ExpParams {
            a: 0.01,
            b: 0.02,
            k: 0.4,
            c: 0.0,
            t_ref: 25.0,
            alpha_static: 0.2,
            a2: 0.05,
            b2: 0.01,
            k2: 0.95,
            c2: 0.0,
        }
    }

    #[test]
    fn first_tick_matches_hand_computation() {
        let p = params();
        let mut s = GainScheduler::new(p);
        let out = s.update(100.0);
        assert!((out.e_static - 20.0).abs() < 1e-4);
        let alpha = p.alpha_dyn(20.0);
        assert_eq!(out.alpha_dyn, alpha);
        assert!((out.e_dyn - alpha * 100.0).abs() < 1e-3);
        assert_eq!(out.ki, p.ki(out.e_dyn));
        assert_eq!(out.ki_primary, p.ki(out.e_static));
    }

    #[test]
    fn dynamic_filter_is_fed_from_raw_error() {
        // Push alpha_dyn to its ceiling: e_dyn must then track the raw error
        // far faster than e_static does.
        let p = ExpParams {
            b2: 1.0e3,
            ..params()
        };
        let mut s = GainScheduler::new(p);
        let mut out = Schedule::default();
        for _ in 0..5 {
            out = s.update(50.0);
        }
        assert!(out.alpha_dyn > 0.94 && out.alpha_dyn <= ALPHA_DYN_MAX);
        assert!(out.e_dyn > 49.9);
        assert!(out.e_static < 40.0);
    }

    #[test]
    fn reset_then_zero_error_converges() {
        let p = params();
        let mut s = GainScheduler::new(p);
        for _ in 0..20 {
            s.update(80.0);
        }
        s.reset();
        let mut out = Schedule::default();
        for _ in 0..10 {
            out = s.update(0.0);
        }
        assert_eq!(out.e_dyn, 0.0);
        assert_eq!(out.ki, p.ki(0.0));
        assert_eq!(out.ki, p.a);
        assert_eq!(out.alpha_dyn, ALPHA_DYN_MIN);
    }

    #[test]
    fn zero_error_without_reset_decays_toward_zero() {
        let p = params();
        let mut s = GainScheduler::new(p);
        for _ in 0..20 {
            s.update(80.0);
        }
        let mut prev = f32::INFINITY;
        for _ in 0..400 {
            let out = s.update(0.0);
            assert!(out.e_dyn.abs() <= prev + 1e-6);
            prev = out.e_dyn.abs();
        }
        assert!(prev < 1e-3, "e_dyn still {prev}");
        assert!((s.last().ki - p.ki(0.0)).abs() < 1e-3);
    }

    #[test]
    fn set_params_replaces_curve_and_resets() {
        let mut s = GainScheduler::new(params());
        s.update(30.0);
        let fresh = ExpParams {
            alpha_static: 1.0,
            ..params()
        };
        s.set_params(fresh);
        let out = s.update(10.0);
        assert_eq!(out.e_static, 10.0);
        assert_eq!(s.params().alpha_static, 1.0);
    }
}
