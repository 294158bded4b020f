//! Cumulative volume and mass from a flow-rate signal.

use crate::util::MILLIS_PER_MIN;

/// Integrates flow (µL/min) over tick spacing (ms) into delivered volume.
///
/// The accumulator is `f64` so multi-day runs at a few hundred µL/min do
/// not lose increments to `f32` rounding.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeTracker {
    density_g_per_ml: f32,
    volume_ul: f64,
}

impl Default for VolumeTracker {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl VolumeTracker {
    pub fn new(density_g_per_ml: f32) -> Self {
        Self {
            density_g_per_ml,
            volume_ul: 0.0,
        }
    }

    pub fn update(&mut self, flow_ul_per_min: f32, dt_ms: u64) {
        self.volume_ul += f64::from(flow_ul_per_min) * dt_ms as f64 / MILLIS_PER_MIN;
    }

    pub fn volume_ul(&self) -> f64 {
        self.volume_ul
    }

    pub fn mass_g(&self) -> f64 {
        self.volume_ul * f64::from(self.density_g_per_ml) / 1000.0
    }

    pub fn density_g_per_ml(&self) -> f32 {
        self.density_g_per_ml
    }

    pub fn reset(&mut self) {
        self.volume_ul = 0.0;
    }
}
