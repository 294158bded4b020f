//! Open-loop calibration of the gain schedule.
//!
//! The pump is driven at a fixed speed, the sensor is sampled over a window,
//! and the primary `Ki` curve is solved analytically so it spans
//! `[Ki_min, Ki_max]` around a knee derived from the steady-state error.
//!
//! [`CalibrationRun`] is the poll-driven state machine
//! (`Idle → Settling → Sampling → Done`); [`calibrate`] drives it to
//! completion with a [`Clock`], blocking for `settle_ms + window_ms`.

use std::time::Duration;

use pump_traits::{Clock, FlowSensor, Pump};

use crate::config::CalConfig;
use crate::error::CalError;
use crate::params::{EgcParams, ExpParams, ScaleAffine, T_REF_FLOOR};

/// Mean flow below this (µL/min) cannot support a fit.
pub const MIN_MEAN_FLOW: f32 = 1e-3;

/// Running count, sum and sum of squares of the sampled flow.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SampleStats {
    pub n: u32,
    pub sum: f32,
    pub sum_sq: f32,
}

impl SampleStats {
    pub fn push(&mut self, f: f32) {
        self.n = self.n.saturating_add(1);
        self.sum += f;
        self.sum_sq += f * f;
    }

    pub fn mean(&self) -> Option<f32> {
        (self.n > 0).then(|| self.sum / self.n as f32)
    }

    /// Population variance, floored at zero against cancellation.
    pub fn variance(&self) -> Option<f32> {
        let mean = self.mean()?;
        Some((self.sum_sq / self.n as f32 - mean * mean).max(0.0))
    }
}

/// Successful calibration: the fitted curves plus the measurement behind them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalReport {
    pub gain: ExpParams,
    pub samples: u32,
    pub mean_ul_min: f32,
    pub cv_pct: f32,
    /// `f_nom − mean`: steady-state error at full open-loop drive.
    pub err_upper: f32,
}

impl CalReport {
    /// Write the fitted gain into `params` and reset its scale to identity.
    /// `kp`, `kd` and `sps_max` are left alone.
    pub fn apply_to(&self, params: &mut EgcParams) {
        params.scale = ScaleAffine::IDENTITY;
        params.gain = self.gain;
    }
}

/// Turn the window statistics into a gain schedule.
pub fn fit_gain(cfg: &CalConfig, stats: &SampleStats) -> Result<CalReport, CalError> {
    let mean = stats.mean().ok_or(CalError::NoSamples)?;
    if !(mean >= MIN_MEAN_FLOW) {
        return Err(CalError::ZeroFlow { mean });
    }
    let var = stats.variance().unwrap_or(0.0);
    let cv_pct = 100.0 * var.sqrt() / mean;
    if cv_pct > cfg.stab_pct {
        return Err(CalError::Unstable {
            cv_pct,
            limit_pct: cfg.stab_pct,
        });
    }

    let err_upper = cfg.f_nom_ul_min - mean;
    let t_ref = (cfg.knee_frac * err_upper.abs()).max(T_REF_FLOOR);
    let b = (cfg.ki_max - cfg.ki_min) / (4.0 * t_ref * t_ref);

    let gain = ExpParams {
        a: cfg.ki_min,
        b,
        k: cfg.ki_max,
        c: 0.0,
        t_ref,
        alpha_static: cfg.alpha_static,
        a2: 0.05,
        b2: b * 0.5,
        k2: 0.95,
        c2: 0.0,
    };
    Ok(CalReport {
        gain,
        samples: stats.n,
        mean_ul_min: mean,
        cv_pct,
        err_upper,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalPhase {
    Idle,
    Settling { until_ms: u64 },
    Sampling { t0_ms: u64, next_sample_ms: u64 },
    Done(Result<CalReport, CalError>),
}

/// Result of one [`CalibrationRun::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum CalPoll {
    /// Not finished; poll again in this many milliseconds.
    Pending { wait_ms: u64 },
    Finished(Result<CalReport, CalError>),
}

/// One calibration attempt, advanced by repeated polls.
///
/// The run is one-shot: once `Done`, further polls replay the outcome and
/// never touch the hardware again.
#[derive(Debug, Clone)]
pub struct CalibrationRun {
    cfg: CalConfig,
    phase: CalPhase,
    stats: SampleStats,
}

impl CalibrationRun {
    pub fn new(cfg: CalConfig) -> Self {
        Self {
            cfg,
            phase: CalPhase::Idle,
            stats: SampleStats::default(),
        }
    }

    pub fn config(&self) -> &CalConfig {
        &self.cfg
    }

    pub fn phase(&self) -> &CalPhase {
        &self.phase
    }

    pub fn stats(&self) -> SampleStats {
        self.stats
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, CalPhase::Done(_))
    }

    /// Fraction of the open-loop time elapsed at `now_ms`, for progress display.
    pub fn progress(&self, now_ms: u64) -> f32 {
        let total = self.cfg.duration_ms().max(1) as f32;
        match self.phase {
            CalPhase::Idle => 0.0,
            CalPhase::Settling { until_ms } => {
                let start = until_ms.saturating_sub(self.cfg.settle_ms);
                (now_ms.saturating_sub(start) as f32 / total).min(1.0)
            }
            CalPhase::Sampling { t0_ms, .. } => {
                let done = self.cfg.settle_ms + now_ms.saturating_sub(t0_ms);
                (done as f32 / total).min(1.0)
            }
            CalPhase::Done(_) => 1.0,
        }
    }

    /// Validate the config and, if it holds, command the pump to `sps_max`.
    ///
    /// On a config error the run goes straight to `Done` and the pump is not touched.
    pub fn start<P: Pump + ?Sized>(&mut self, now_ms: u64, pump: &mut P) -> CalPoll {
        if !matches!(self.phase, CalPhase::Idle) {
            return self.poll_done_or_wait();
        }
        if let Err(e) = self.cfg.validate() {
            tracing::warn!(error = %e, "calibration rejected");
            self.phase = CalPhase::Done(Err(e.clone()));
            return CalPoll::Finished(Err(e));
        }
        tracing::info!(
            sps = self.cfg.sps_max,
            settle_ms = self.cfg.settle_ms,
            window_ms = self.cfg.window_ms,
            "calibration open-loop pulse"
        );
        pump.set_target_sps(self.cfg.sps_max);
        self.stats = SampleStats::default();
        self.phase = CalPhase::Settling {
            until_ms: now_ms.saturating_add(self.cfg.settle_ms),
        };
        CalPoll::Pending {
            wait_ms: self.cfg.settle_ms,
        }
    }

    /// Advance the run. Must be called after [`CalibrationRun::start`].
    pub fn poll<S, P>(&mut self, now_ms: u64, sensor: &mut S, pump: &mut P) -> CalPoll
    where
        S: FlowSensor + ?Sized,
        P: Pump + ?Sized,
    {
        if let CalPhase::Settling { until_ms } = self.phase {
            if now_ms < until_ms {
                return CalPoll::Pending {
                    wait_ms: until_ms - now_ms,
                };
            }
            tracing::debug!("calibration settle complete; sampling");
            self.phase = CalPhase::Sampling {
                t0_ms: now_ms,
                next_sample_ms: now_ms,
            };
        }

        match self.phase {
            CalPhase::Idle => self.start(now_ms, pump),
            CalPhase::Settling { .. } => CalPoll::Pending { wait_ms: 0 },
            CalPhase::Sampling {
                t0_ms,
                next_sample_ms,
            } => {
                if now_ms.saturating_sub(t0_ms) >= self.cfg.window_ms {
                    return self.finish(pump);
                }
                let mut next = next_sample_ms;
                if now_ms >= next {
                    let f = sensor.read_ul_per_min();
                    self.stats.push(f);
                    tracing::trace!(flow_ul_min = f, n = self.stats.n, "calibration sample");
                    next = now_ms.saturating_add(self.cfg.sample_ms.max(1));
                }
                self.phase = CalPhase::Sampling {
                    t0_ms,
                    next_sample_ms: next,
                };
                let window_end = t0_ms.saturating_add(self.cfg.window_ms);
                CalPoll::Pending {
                    wait_ms: next.min(window_end).saturating_sub(now_ms),
                }
            }
            CalPhase::Done(_) => self.poll_done_or_wait(),
        }
    }

    fn finish<P: Pump + ?Sized>(&mut self, pump: &mut P) -> CalPoll {
        pump.stop();
        let outcome = fit_gain(&self.cfg, &self.stats);
        match &outcome {
            Ok(r) => tracing::info!(
                samples = r.samples,
                mean_ul_min = r.mean_ul_min,
                cv_pct = r.cv_pct,
                t_ref = r.gain.t_ref,
                b = r.gain.b,
                "calibration success"
            ),
            Err(e) => tracing::warn!(error = %e, samples = self.stats.n, "calibration failed"),
        }
        self.phase = CalPhase::Done(outcome.clone());
        CalPoll::Finished(outcome)
    }

    fn poll_done_or_wait(&self) -> CalPoll {
        match &self.phase {
            CalPhase::Done(outcome) => CalPoll::Finished(outcome.clone()),
            _ => CalPoll::Pending { wait_ms: 0 },
        }
    }
}

/// Blocking calibration: runs the open-loop pulse to completion.
///
/// The pump is stopped before returning on every path that started it.
pub fn calibrate<S, P, C>(
    cfg: &CalConfig,
    sensor: &mut S,
    pump: &mut P,
    clock: &C,
) -> Result<CalReport, CalError>
where
    S: FlowSensor + ?Sized,
    P: Pump + ?Sized,
    C: Clock + ?Sized,
{
    let epoch = clock.now();
    let mut run = CalibrationRun::new(*cfg);
    let mut step = run.start(0, &mut *pump);
    loop {
        match step {
            CalPoll::Finished(outcome) => return outcome,
            CalPoll::Pending { wait_ms } => {
                clock.sleep(Duration::from_millis(wait_ms));
                step = run.poll(clock.ms_since(epoch), &mut *sensor, &mut *pump);
            }
        }
    }
}

/// Blocking calibration that writes into `out` only on success.
pub fn calibrate_into<S, P, C>(
    cfg: &CalConfig,
    sensor: &mut S,
    pump: &mut P,
    clock: &C,
    out: &mut EgcParams,
) -> Result<CalReport, CalError>
where
    S: FlowSensor + ?Sized,
    P: Pump + ?Sized,
    C: Clock + ?Sized,
{
    let report = calibrate(cfg, sensor, pump, clock)?;
    report.apply_to(out);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_mean_and_variance() {
        let mut s = SampleStats::default();
        assert_eq!(s.mean(), None);
        for f in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            s.push(f);
        }
        assert_eq!(s.mean(), Some(5.0));
        assert!((s.variance().unwrap() - 4.0).abs() < 1e-5);
    }

    #[test]
    fn fit_gain_matches_worked_example() {
        let cfg = CalConfig {
            f_nom_ul_min: 1000.0,
            ki_min: 0.0,
            ki_max: 0.40,
            knee_frac: 0.5,
            ..CalConfig::default()
        };
        let mut s = SampleStats::default();
        for _ in 0..16 {
            s.push(950.0);
        }
        let r = fit_gain(&cfg, &s).unwrap();
        assert_eq!(r.err_upper, 50.0);
        assert_eq!(r.gain.t_ref, 25.0);
        assert!((r.gain.b - 0.00016).abs() < 1e-9);
        assert!((r.gain.b2 - 0.00008).abs() < 1e-9);
        assert_eq!(r.cv_pct, 0.0);
    }

    #[test]
    fn t_ref_is_floored() {
        let cfg = CalConfig {
            f_nom_ul_min: 500.0,
            ..CalConfig::default()
        };
        let mut s = SampleStats::default();
        s.push(499.5);
        let r = fit_gain(&cfg, &s).unwrap();
        assert_eq!(r.gain.t_ref, 1.0);
        assert!((r.gain.b - 0.1).abs() < 1e-7);
    }

    #[test]
    fn progress_runs_from_zero_to_one() {
        let cfg = CalConfig {
            settle_ms: 100,
            window_ms: 100,
            ..CalConfig::default()
        };
        let mut run = CalibrationRun::new(cfg);
        assert_eq!(run.progress(0), 0.0);
        struct Null;
        impl Pump for Null {
            fn set_target_sps(&mut self, _sps: f32) {}
        }
        run.start(0, &mut Null);
        assert!((run.progress(50) - 0.25).abs() < 1e-6);
    }
}
