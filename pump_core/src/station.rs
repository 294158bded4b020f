//! Cooperative loop host: closed-loop ticks, on-demand re-calibration and
//! periodic telemetry reporting around one [`Controller`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pump_traits::{FlowSensor, Pump};

use crate::calibrator::{CalPoll, CalReport, CalibrationRun};
use crate::config::CalConfig;
use crate::controller::Controller;
use crate::error::{CalError, ControlError, Result};
use crate::params::EgcParams;
use crate::telemetry::Telemetry;

/// What the station is doing between ticks.
#[derive(Debug)]
pub enum Mode {
    ClosedLoop,
    Calibrating(CalibrationRun),
}

/// Outcome of a calibration that finished during [`Station::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum StationEvent {
    /// The new bundle is already live; persist it if desired.
    Calibrated { report: CalReport, params: EgcParams },
    /// The previous bundle is still live.
    CalibrationFailed(CalError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Duration,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub tick: Duration,
    /// Stop after this long; `None` runs until shutdown.
    pub max_run: Option<Duration>,
    /// Report period; zero reports every tick.
    pub report_every: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub reason: StopReason,
    pub elapsed_ms: u64,
    pub ticks: u64,
    pub volume_ul: f64,
    pub mass_g: f64,
}

pub struct Station<S, P> {
    ctrl: Controller<S, P>,
    setpoint_ul_min: f32,
    mode: Mode,
    telemetry: Telemetry,
}

impl<S: FlowSensor, P: Pump> Station<S, P> {
    pub fn new(ctrl: Controller<S, P>, setpoint_ul_min: f32) -> Self {
        Self {
            ctrl,
            setpoint_ul_min,
            mode: Mode::ClosedLoop,
            telemetry: Telemetry {
                setpoint_ul_min,
                ..Telemetry::default()
            },
        }
    }

    pub fn controller(&self) -> &Controller<S, P> {
        &self.ctrl
    }

    pub fn controller_mut(&mut self) -> &mut Controller<S, P> {
        &mut self.ctrl
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn is_calibrating(&self) -> bool {
        matches!(self.mode, Mode::Calibrating(_))
    }

    pub fn setpoint(&self) -> f32 {
        self.setpoint_ul_min
    }

    pub fn set_setpoint(&mut self, setpoint_ul_min: f32) {
        self.setpoint_ul_min = setpoint_ul_min;
    }

    /// Begin a non-blocking calibration.
    ///
    /// Rejected while one is already running. A config error is returned
    /// immediately and the loop stays closed.
    pub fn request_calibration(&mut self, cfg: CalConfig) -> std::result::Result<(), ControlError> {
        if self.is_calibrating() {
            return Err(ControlError::State("calibration already in progress".into()));
        }
        let mut run = CalibrationRun::new(cfg);
        let now = self.ctrl.now_ms();
        let (_, pump) = self.ctrl.hardware_mut();
        match run.start(now, pump) {
            CalPoll::Finished(Err(e)) => Err(ControlError::Calibration(e)),
            _ => {
                self.mode = Mode::Calibrating(run);
                self.telemetry.calibrating = true;
                Ok(())
            }
        }
    }

    /// One cooperative step: a control tick, or one calibration poll.
    pub fn step(&mut self) -> Option<StationEvent> {
        let now = self.ctrl.now_ms();
        let Mode::Calibrating(run) = &mut self.mode else {
            self.ctrl.tick(self.setpoint_ul_min, &mut self.telemetry);
            return None;
        };

        let (sensor, pump) = self.ctrl.hardware_mut();
        let outcome = match run.poll(now, sensor, pump) {
            CalPoll::Pending { .. } => {
                self.telemetry.t_ms = now;
                self.telemetry.calibrating = true;
                self.telemetry.sps = run.config().sps_max;
                return None;
            }
            CalPoll::Finished(outcome) => outcome,
        };

        self.mode = Mode::ClosedLoop;
        self.telemetry.calibrating = false;
        self.telemetry.sps = 0.0;
        Some(match outcome {
            Ok(report) => {
                let mut params = *self.ctrl.params();
                report.apply_to(&mut params);
                self.ctrl.set_params(params);
                StationEvent::Calibrated { report, params }
            }
            Err(e) => {
                self.ctrl.reset();
                StationEvent::CalibrationFailed(e)
            }
        })
    }

    /// Run until `max_run` elapses or `shutdown` is raised, then stop the pump.
    ///
    /// `on_report` sees the telemetry every `report_every`; `on_event` sees
    /// each finished calibration. An `on_event` error ends the run (pump stopped).
    pub fn run<R, E>(
        &mut self,
        opts: &RunOptions,
        shutdown: &AtomicBool,
        mut on_report: R,
        mut on_event: E,
    ) -> Result<RunSummary>
    where
        R: FnMut(&Telemetry),
        E: FnMut(&StationEvent) -> Result<()>,
    {
        let clock = std::sync::Arc::clone(self.ctrl.clock());
        let start = clock.now();
        let max_ms = opts.max_run.map(|d| d.as_millis() as u64);
        let report_ms = opts.report_every.as_millis() as u64;
        let mut next_report_ms = 0u64;
        let mut ticks = 0u64;

        tracing::info!(
            setpoint_ul_min = self.setpoint_ul_min,
            tick_ms = opts.tick.as_millis() as u64,
            max_run_ms = ?max_ms,
            "run start"
        );

        let reason = loop {
            if shutdown.load(Ordering::Relaxed) {
                break StopReason::Shutdown;
            }
            let elapsed = clock.ms_since(start);
            if max_ms.is_some_and(|m| elapsed >= m) {
                break StopReason::Duration;
            }

            if let Some(ev) = self.step()
                && let Err(e) = on_event(&ev)
            {
                self.ctrl.stop();
                return Err(e);
            }
            ticks += 1;

            if elapsed >= next_report_ms {
                on_report(&self.telemetry);
                next_report_ms = elapsed.saturating_add(report_ms);
            }
            clock.sleep(opts.tick);
        };

        self.ctrl.stop();
        let summary = RunSummary {
            reason,
            elapsed_ms: clock.ms_since(start),
            ticks,
            volume_ul: self.ctrl.volume().volume_ul(),
            mass_g: self.ctrl.volume().mass_g(),
        };
        tracing::info!(
            reason = ?summary.reason,
            elapsed_ms = summary.elapsed_ms,
            ticks = summary.ticks,
            volume_ul = summary.volume_ul,
            "run stop"
        );
        Ok(summary)
    }

    pub fn into_controller(self) -> Controller<S, P> {
        self.ctrl
    }
}
