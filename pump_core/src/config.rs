//! Runtime configuration types for the control core.
//!
//! These are separate from the TOML-deserialized config in `pump_config`;
//! see `conversions` for the mapping.

use crate::error::CalError;

/// How the PID keeps its integrator from winding up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AntiWindup {
    /// Hard clamp of the integrator at `±imax` only.
    Clamp,
    /// Clamp, plus undo of the current tick's increment when the output
    /// saturates high, plus integrator rescaling when the scheduled gain jumps.
    #[default]
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidCfg {
    pub anti_windup: AntiWindup,
}

/// Knobs for one open-loop calibration run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalConfig {
    /// Nominal set-point (µL/min) the gain curve is fitted around.
    pub f_nom_ul_min: f32,
    /// Open-loop pump speed for the pulse (steps/s).
    pub sps_max: f32,
    /// Wait after commanding the pump before sampling starts.
    pub settle_ms: u64,
    /// Length of the sampling window.
    pub window_ms: u64,
    /// Sensor poll interval inside the window.
    pub sample_ms: u64,
    pub ki_min: f32,
    pub ki_max: f32,
    pub alpha_static: f32,
    /// Fraction of `|err_upper|` placed at the curve knee.
    pub knee_frac: f32,
    /// Maximum coefficient of variation (%) for the run to count as stable.
    pub stab_pct: f32,
}

impl Default for CalConfig {
    fn default() -> Self {
        Self {
            f_nom_ul_min: 0.0,
            sps_max: 2000.0,
            settle_ms: 2000,
            window_ms: 800,
            sample_ms: 50,
            ki_min: 0.0,
            ki_max: 0.40,
            alpha_static: 0.20,
            knee_frac: 0.5,
            stab_pct: 2.5,
        }
    }
}

impl CalConfig {
    /// Check the preconditions that must hold before the pump is touched.
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn validate(&self) -> Result<(), CalError> {
        if !(self.ki_max > self.ki_min) {
            return Err(CalError::GainRange {
                ki_min: self.ki_min,
                ki_max: self.ki_max,
            });
        }
        if !(self.knee_frac > 0.0 && self.knee_frac < 1.0) {
            return Err(CalError::KneeOutOfRange(self.knee_frac));
        }
        Ok(())
    }

    /// Total time the pump runs open loop.
    pub fn duration_ms(&self) -> u64 {
        self.settle_ms.saturating_add(self.window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        CalConfig::default().validate().unwrap();
        assert_eq!(CalConfig::default().duration_ms(), 2800);
    }

    #[rstest]
    #[case(0.4, 0.4, 0.5)]
    #[case(0.4, 0.1, 0.5)]
    #[case(0.0, 0.4, 0.0)]
    #[case(0.0, 0.4, 1.0)]
    #[case(0.0, 0.4, -0.2)]
    #[case(0.0, 0.4, f32::NAN)]
    fn rejects_bad_preconditions(#[case] ki_min: f32, #[case] ki_max: f32, #[case] knee: f32) {
        let cfg = CalConfig {
            ki_min,
            ki_max,
            knee_frac: knee,
            ..CalConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.is_config_error());
    }
}
