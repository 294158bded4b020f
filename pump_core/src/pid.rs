//! PID producing a pump duty fraction in `[0, 1]` from a scheduled integral gain.
//!
//! The integral gain changes every tick, so the integrator stores the
//! already-weighted sum `Σ Ki·e·dt` rather than `Σ e·dt`. When the schedule
//! jumps from `Ki_old` to `Ki_new` the stored sum is rescaled by
//! `Ki_old / Ki_new` (in [`AntiWindup::Rollback`] mode).

use crate::config::AntiWindup;

/// Integrator clamp magnitude.
pub const IMAX: f32 = 1.0;
/// Gain changes (and gains) at or below this size count as "no change" / degenerate.
pub const KI_EPSILON: f32 = 1e-9;

/// Per-tick breakdown, kept for telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidTerms {
    pub p: f32,
    pub i: f32,
    pub d: f32,
    /// `p + i + d` before output clamping.
    pub unclamped: f32,
    pub output: f32,
}

#[derive(Debug, Clone)]
pub struct PidController {
    kp: f32,
    kd: f32,
    integ: f32,
    last_err: f32,
    last_ki: f32,
    anti_windup: AntiWindup,
    last: PidTerms,
}

impl PidController {
    pub fn new(kp: f32, kd: f32) -> Self {
        Self {
            kp,
            kd,
            integ: 0.0,
            last_err: 0.0,
            last_ki: 0.0,
            anti_windup: AntiWindup::default(),
            last: PidTerms::default(),
        }
    }

    pub fn with_anti_windup(mut self, mode: AntiWindup) -> Self {
        self.anti_windup = mode;
        self
    }

    pub fn set_gains(&mut self, kp: f32, kd: f32) {
        self.kp = kp;
        self.kd = kd;
    }

    /// One control step.
    ///
    /// `dt_s` must be positive; the caller guarantees non-zero tick spacing.
    pub fn update(&mut self, err_raw: f32, err_filtered: f32, ki: f32, dt_s: f32) -> f32 {
        debug_assert!(dt_s > 0.0, "PID dt must be > 0, got {dt_s}");

        if self.anti_windup == AntiWindup::Rollback {
            if (ki - self.last_ki).abs() > KI_EPSILON {
                if self.last_ki.abs() > KI_EPSILON && ki.abs() > KI_EPSILON {
                    self.integ *= self.last_ki / ki;
                }
                self.last_ki = ki;
            }
        } else {
            self.last_ki = ki;
        }

        let before = self.integ;
        self.integ = (self.integ + ki * err_filtered * dt_s).clamp(-IMAX, IMAX);

        let deriv = (err_raw - self.last_err) / dt_s;
        self.last_err = err_raw;

        let p = self.kp * err_raw;
        let d = self.kd * deriv;
        let unclamped = p + self.integ + d;

        let output = if unclamped > 1.0 {
            if self.anti_windup == AntiWindup::Rollback {
                // undo this tick's increment
                self.integ = before;
            }
            1.0
        } else if unclamped < 0.0 {
            0.0
        } else {
            unclamped
        };

        self.last = PidTerms {
            p,
            i: self.integ,
            d,
            unclamped,
            output,
        };
        output
    }

    pub fn reset(&mut self) {
        self.integ = 0.0;
        self.last_err = 0.0;
        self.last_ki = 0.0;
        self.last = PidTerms::default();
    }

    pub fn integrator(&self) -> f32 {
        self.integ
    }

    /// Seed the integrator (bumpless hand-over from another controller), clamped to `±IMAX`.
    pub fn preload_integrator(&mut self, value: f32, ki: f32) {
        self.integ = value.clamp(-IMAX, IMAX);
        self.last_ki = ki;
    }

    pub fn anti_windup(&self) -> AntiWindup {
        self.anti_windup
    }

    pub fn last_terms(&self) -> PidTerms {
        self.last
    }
}
