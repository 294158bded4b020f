//! Pump and flow-sensor backends.
//!
//! Only the simulated plant lives here: a peristaltic pump head feeding a
//! flow sensor, sharing one state so the sensor sees what the pump does.
//! Time comes from a `pump_traits::Clock`, so a `ManualClock` runs the
//! plant faster than real time.

pub mod error;

use std::cell::RefCell;
use std::f64::consts::TAU;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use pump_traits::{Clock, FlowSensor, Pump};

use crate::error::{HwError, Result};

/// Physical parameters of the simulated pump head and sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantModel {
    /// Delivered volume per motor step.
    pub ul_per_step: f32,
    /// First-order lag from commanded to delivered flow; 0 is instantaneous.
    pub tau_ms: u64,
    /// Sensor reads `gain·flow + offset`.
    pub sensor_gain: f32,
    pub sensor_offset_ul_min: f32,
    /// Peak pulsation per roller pass, as a fraction of flow.
    pub ripple_frac: f32,
    pub rollers: u32,
    pub steps_per_rev: u32,
    /// Driver speed limit (steps/s).
    pub max_sps: f32,
}

impl Default for PlantModel {
    fn default() -> Self {
        Self {
            ul_per_step: 0.5 / 60.0,
            tau_ms: 150,
            sensor_gain: 1.0,
            sensor_offset_ul_min: 0.0,
            ripple_frac: 0.0,
            rollers: 6,
            steps_per_rev: 200,
            max_sps: 4000.0,
        }
    }
}

impl PlantModel {
    pub fn validate(&self) -> Result<()> {
        if !(self.ul_per_step.is_finite() && self.ul_per_step > 0.0) {
            return Err(HwError::InvalidModel("ul_per_step must be > 0"));
        }
        if !(self.sensor_gain.is_finite() && self.sensor_gain != 0.0) {
            return Err(HwError::InvalidModel("sensor_gain must be non-zero"));
        }
        if !self.sensor_offset_ul_min.is_finite() {
            return Err(HwError::InvalidModel("sensor_offset must be finite"));
        }
        if !(0.0..1.0).contains(&self.ripple_frac) {
            return Err(HwError::InvalidModel("ripple_frac must be in [0, 1)"));
        }
        if self.rollers == 0 || self.steps_per_rev == 0 {
            return Err(HwError::InvalidModel("rollers and steps_per_rev must be >= 1"));
        }
        if !(self.max_sps.is_finite() && self.max_sps > 0.0) {
            return Err(HwError::InvalidModel("max_sps must be > 0"));
        }
        Ok(())
    }

    /// Steady-state flow (µL/min) at a constant speed.
    pub fn flow_at(&self, sps: f32) -> f32 {
        sps * self.ul_per_step * 60.0
    }
}

#[derive(Debug)]
struct PlantState {
    last_ms: u64,
    commanded_sps: f32,
    flow_ul_min: f64,
    position_steps: f64,
    delivered_ul: f64,
    faulty_reads: u32,
}

struct Shared {
    model: PlantModel,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    state: RefCell<PlantState>,
}

impl Shared {
    /// Bring the plant up to the clock's current time.
    fn advance(&self) {
        let now = self.clock.ms_since(self.epoch);
        let mut s = self.state.borrow_mut();
        let dt_ms = now.saturating_sub(s.last_ms);
        if dt_ms == 0 {
            return;
        }
        s.last_ms = now;

        let sps = f64::from(s.commanded_sps);
        let target = f64::from(self.model.flow_at(s.commanded_sps));
        let prev = s.flow_ul_min;
        s.flow_ul_min = if self.model.tau_ms == 0 {
            target
        } else {
            let k = 1.0 - (-(dt_ms as f64) / self.model.tau_ms as f64).exp();
            prev + (target - prev) * k
        };
        s.position_steps += sps * dt_ms as f64 / 1000.0;
        s.delivered_ul += 0.5 * (prev + s.flow_ul_min) * dt_ms as f64 / 60_000.0;
    }
}

/// A simulated pump head and the sensor downstream of it.
#[derive(Clone)]
pub struct SimPlant {
    shared: Rc<Shared>,
}

impl core::fmt::Debug for SimPlant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = self.shared.state.borrow();
        f.debug_struct("SimPlant")
            .field("model", &self.shared.model)
            .field("commanded_sps", &s.commanded_sps)
            .field("flow_ul_min", &s.flow_ul_min)
            .finish_non_exhaustive()
    }
}

impl SimPlant {
    pub fn new(model: PlantModel, clock: Arc<dyn Clock + Send + Sync>) -> Result<Self> {
        model.validate()?;
        let epoch = clock.now();
        tracing::debug!(?model, "simulated plant");
        Ok(Self {
            shared: Rc::new(Shared {
                model,
                clock,
                epoch,
                state: RefCell::new(PlantState {
                    last_ms: 0,
                    commanded_sps: 0.0,
                    flow_ul_min: 0.0,
                    position_steps: 0.0,
                    delivered_ul: 0.0,
                    faulty_reads: 0,
                }),
            }),
        })
    }

    pub fn model(&self) -> &PlantModel {
        &self.shared.model
    }

    pub fn sensor(&self) -> SimFlowSensor {
        SimFlowSensor {
            shared: Rc::clone(&self.shared),
        }
    }

    pub fn pump(&self) -> SimPump {
        SimPump {
            shared: Rc::clone(&self.shared),
        }
    }

    /// Delivered flow before the sensor's error and ripple.
    pub fn true_flow_ul_min(&self) -> f32 {
        self.shared.advance();
        self.shared.state.borrow().flow_ul_min as f32
    }

    pub fn delivered_ul(&self) -> f64 {
        self.shared.advance();
        self.shared.state.borrow().delivered_ul
    }

    pub fn commanded_sps(&self) -> f32 {
        self.shared.state.borrow().commanded_sps
    }

    /// Make the next `n` sensor reads fail (reported as 0.0).
    pub fn inject_sensor_faults(&self, n: u32) {
        self.shared.state.borrow_mut().faulty_reads = n;
    }
}

/// Sensor end of a [`SimPlant`].
pub struct SimFlowSensor {
    shared: Rc<Shared>,
}

impl FlowSensor for SimFlowSensor {
    fn read_ul_per_min(&mut self) -> f32 {
        self.shared.advance();
        let m = &self.shared.model;
        let mut s = self.shared.state.borrow_mut();
        if s.faulty_reads > 0 {
            s.faulty_reads -= 1;
            tracing::warn!(remaining = s.faulty_reads, "simulated sensor fault");
            return 0.0;
        }
        let phase = s.position_steps * f64::from(m.rollers) / f64::from(m.steps_per_rev);
        let ripple = 1.0 + f64::from(m.ripple_frac) * (TAU * phase).sin();
        let measured =
            f64::from(m.sensor_gain) * s.flow_ul_min * ripple + f64::from(m.sensor_offset_ul_min);
        let v = measured as f32;
        if v.is_finite() { v } else { 0.0 }
    }
}

/// Pump end of a [`SimPlant`].
pub struct SimPump {
    shared: Rc<Shared>,
}

impl Pump for SimPump {
    fn set_target_sps(&mut self, sps: f32) {
        self.shared.advance();
        let limited = if sps.is_finite() {
            sps.clamp(0.0, self.shared.model.max_sps)
        } else {
            0.0
        };
        self.shared.state.borrow_mut().commanded_sps = limited;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pump_traits::ManualClock;
    use std::time::Duration;

    fn plant(model: PlantModel) -> (SimPlant, ManualClock) {
        let clock = ManualClock::new();
        let p = SimPlant::new(model, Arc::new(clock.clone())).unwrap();
        (p, clock)
    }

    #[test]
    fn instant_plant_follows_command() {
        let (p, clock) = plant(PlantModel {
            tau_ms: 0,
            ..PlantModel::default()
        });
        let mut pump = p.pump();
        let mut sensor = p.sensor();
        pump.set_target_sps(1000.0);
        clock.advance(Duration::from_millis(1));
        assert!((sensor.read_ul_per_min() - 500.0).abs() < 1e-3);
    }

    #[test]
    fn lag_reaches_63_percent_after_tau() {
        let (p, clock) = plant(PlantModel::default());
        let mut pump = p.pump();
        pump.set_target_sps(2000.0);
        clock.advance(Duration::from_millis(150));
        let f = p.true_flow_ul_min();
        let expected = 1000.0 * (1.0 - (-1.0f32).exp());
        assert!((f - expected).abs() < 0.5, "flow {f}");
    }

    #[test]
    fn speed_is_clamped() {
        let (p, _clock) = plant(PlantModel::default());
        let mut pump = p.pump();
        pump.set_target_sps(-5.0);
        assert_eq!(p.commanded_sps(), 0.0);
        pump.set_target_sps(f32::NAN);
        assert_eq!(p.commanded_sps(), 0.0);
        pump.set_target_sps(1e9);
        assert_eq!(p.commanded_sps(), 4000.0);
        pump.stop();
        assert_eq!(p.commanded_sps(), 0.0);
    }
}
