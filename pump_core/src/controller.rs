//! The closed-loop controller: one sensor read, one pump command per tick.

use std::sync::Arc;
use std::time::Instant;

use pump_traits::{Clock, FlowSensor, Pump};

use crate::calibrator::{self, CalReport};
use crate::config::{CalConfig, PidCfg};
use crate::error::CalError;
use crate::gain_sched::GainScheduler;
use crate::params::EgcParams;
use crate::pid::PidController;
use crate::telemetry::Telemetry;
use crate::util::{err_pct, secs_from_ms};
use crate::volume::VolumeTracker;

/// Generic, statically dispatched controller core.
pub struct Controller<S, P> {
    pub(crate) sensor: S,
    pub(crate) pump: P,
    pub(crate) params: EgcParams,
    pub(crate) sched: GainScheduler,
    pub(crate) pid: PidController,
    pub(crate) volume: VolumeTracker,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) epoch: Instant,
    pub(crate) last_tick_ms: u64,
    pub(crate) last_sps: f32,
}

impl<S, P> core::fmt::Debug for Controller<S, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Controller")
            .field("params", &self.params)
            .field("integrator", &self.pid.integrator())
            .field("volume_ul", &self.volume.volume_ul())
            .field("last_sps", &self.last_sps)
            .finish_non_exhaustive()
    }
}

impl<S: FlowSensor, P: Pump> Controller<S, P> {
    pub(crate) fn from_parts(
        sensor: S,
        pump: P,
        params: EgcParams,
        pid_cfg: PidCfg,
        density_g_per_ml: f32,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let epoch = clock.now();
        Self {
            sensor,
            pump,
            params,
            sched: GainScheduler::new(params.gain),
            pid: PidController::new(params.kp, params.kd).with_anti_windup(pid_cfg.anti_windup),
            volume: VolumeTracker::new(density_g_per_ml),
            clock,
            epoch,
            last_tick_ms: 0,
            last_sps: 0.0,
        }
    }

    /// Milliseconds since construction on the controller's clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    /// One control iteration. Returns the commanded speed.
    ///
    /// `dt` is the clock time since the previous tick (or construction, or
    /// `reset`); ticks closer than 1 ms apart count as 1 ms.
    pub fn tick(&mut self, setpoint_ul_min: f32, telem: &mut Telemetry) -> f32 {
        let now = self.now_ms();
        let dt_ms = now.saturating_sub(self.last_tick_ms).max(1);
        self.last_tick_ms = now;

        let raw = self.sensor.read_ul_per_min();
        let flow = self.params.scale.apply(raw);
        let err = setpoint_ul_min - flow;

        let s = self.sched.update(err);
        let fraction = self
            .pid
            .update(err, s.e_dyn, s.ki, secs_from_ms(dt_ms))
            .clamp(0.0, 1.0);
        let sps = fraction * self.params.sps_max;
        self.pump.set_target_sps(sps);
        self.last_sps = sps;

        self.volume.update(flow, dt_ms);

        *telem = Telemetry {
            t_ms: now,
            setpoint_ul_min,
            raw_flow_ul_min: raw,
            flow_ul_min: flow,
            err,
            err_pct: err_pct(err, setpoint_ul_min),
            e_dyn: s.e_dyn,
            ki: s.ki,
            ki_primary: s.ki_primary,
            alpha_dyn: s.alpha_dyn,
            fraction,
            sps,
            volume_ul: self.volume.volume_ul(),
            mass_g: self.volume.mass_g(),
            calibrating: false,
        };
        tracing::trace!(flow, err, ki = s.ki, fraction, sps, "tick");
        sps
    }

    /// Clear scheduler filters and PID state and re-seed the tick timer.
    /// Accumulated volume is kept.
    pub fn reset(&mut self) {
        self.sched.reset();
        self.pid.reset();
        self.last_tick_ms = self.now_ms();
        tracing::info!("controller reset");
    }

    pub fn reset_volume(&mut self) {
        self.volume.reset();
    }

    /// Replace the bundle wholesale and reset.
    pub fn set_params(&mut self, params: EgcParams) {
        self.params = params;
        self.sched.set_params(params.gain);
        self.pid.set_gains(params.kp, params.kd);
        self.reset();
    }

    pub fn params(&self) -> &EgcParams {
        &self.params
    }

    pub fn scheduler(&self) -> &GainScheduler {
        &self.sched
    }

    pub fn pid(&self) -> &PidController {
        &self.pid
    }

    pub fn volume(&self) -> &VolumeTracker {
        &self.volume
    }

    pub fn last_sps(&self) -> f32 {
        self.last_sps
    }

    pub fn clock(&self) -> &Arc<dyn Clock + Send + Sync> {
        &self.clock
    }

    /// Stop the pump. The next tick will command it again.
    pub fn stop(&mut self) {
        self.pump.stop();
        self.last_sps = 0.0;
    }

    /// Borrow the hardware, e.g. to drive a calibration run.
    pub fn hardware_mut(&mut self) -> (&mut S, &mut P) {
        (&mut self.sensor, &mut self.pump)
    }

    /// Blocking re-calibration. On success the fitted gain replaces the
    /// current one (scale reset to identity) and the loop is reset; on
    /// failure the bundle is unchanged.
    pub fn calibrate(&mut self, cfg: &CalConfig) -> Result<CalReport, CalError> {
        let mut next = self.params;
        let clock = Arc::clone(&self.clock);
        let result =
            calibrator::calibrate_into(cfg, &mut self.sensor, &mut self.pump, &*clock, &mut next);
        self.last_sps = 0.0;
        match result {
            Ok(report) => {
                self.set_params(next);
                Ok(report)
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    /// Give back the sensor and pump.
    pub fn into_parts(self) -> (S, P) {
        (self.sensor, self.pump)
    }
}
