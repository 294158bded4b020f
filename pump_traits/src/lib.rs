//! Capability traits shared by the control core, the hardware backends and tests.
//!
//! The core never talks to a bus or a timer directly: it polls a [`FlowSensor`],
//! commands a [`Pump`] in steps per second and measures time through a [`Clock`].

pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// A polled flow sensor reporting calibrated-by-driver flow in µL/min.
///
/// Drivers report `0.0` on an internal fault; there is no error channel.
pub trait FlowSensor {
    fn read_ul_per_min(&mut self) -> f32;
}

/// A pump actuator speaking absolute stepper speed.
///
/// Any non-negative speed is accepted; clamping to what the hardware can do
/// is the implementation's job.
pub trait Pump {
    fn set_target_sps(&mut self, sps: f32);

    fn stop(&mut self) {
        self.set_target_sps(0.0);
    }
}

impl<T: FlowSensor + ?Sized> FlowSensor for Box<T> {
    fn read_ul_per_min(&mut self) -> f32 {
        (**self).read_ul_per_min()
    }
}

impl<T: FlowSensor + ?Sized> FlowSensor for &mut T {
    fn read_ul_per_min(&mut self) -> f32 {
        (**self).read_ul_per_min()
    }
}

impl<T: Pump + ?Sized> Pump for Box<T> {
    fn set_target_sps(&mut self, sps: f32) {
        (**self).set_target_sps(sps);
    }
    fn stop(&mut self) {
        (**self).stop();
    }
}

impl<T: Pump + ?Sized> Pump for &mut T {
    fn set_target_sps(&mut self, sps: f32) {
        (**self).set_target_sps(sps);
    }
    fn stop(&mut self) {
        (**self).stop();
    }
}
