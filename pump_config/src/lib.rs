#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and scale-fit parsing for the pump controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - `PersistedParams` is the `[params]` section written after a successful
//!   calibration; when present it is preferred at startup.
//! - The scale CSV loader enforces headers and performs a robust refit
//!   to reduce outlier influence before slope/intercept estimation.
use serde::{Deserialize, Serialize};

mod scale;

pub use scale::{AffineFit, ScaleRow, fit_affine, load_scale_csv};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AntiWindupMode {
    Clamp,
    #[default]
    Rollback,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControlCfg {
    /// Target flow in µL/min.
    pub setpoint_ul_min: f32,
    /// Control loop period.
    pub tick_ms: u64,
    pub anti_windup: AntiWindupMode,
    /// Overrides for the bundle's proportional/derivative gains.
    pub kp: Option<f32>,
    pub kd: Option<f32>,
    /// Override for the bundle's full-scale pump speed (steps/s).
    pub sps_max: Option<f32>,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            setpoint_ul_min: 500.0,
            tick_ms: 10,
            anti_windup: AntiWindupMode::Rollback,
            kp: None,
            kd: None,
            sps_max: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CalibrationCfg {
    /// Flow the gain curve is fitted around; defaults to `control.setpoint_ul_min`.
    pub f_nom_ul_min: Option<f32>,
    pub sps_max: f32,
    pub settle_ms: u64,
    pub window_ms: u64,
    pub sample_ms: u64,
    pub ki_min: f32,
    pub ki_max: f32,
    pub alpha_static: f32,
    pub knee_frac: f32,
    pub stab_pct: f32,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            f_nom_ul_min: None,
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VolumeCfg {
    pub density_g_per_ml: f32,
}

impl Default for VolumeCfg {
    fn default() -> Self {
        Self {
            density_g_per_ml: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryCfg {
    /// Report period; 0 reports every tick.
    pub interval_ms: u64,
}

impl Default for TelemetryCfg {
    fn default() -> Self {
        Self { interval_ms: 500 }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Simulated plant used when no hardware backend is available.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimCfg {
    /// Delivered volume per motor step.
    pub ul_per_step: f32,
    /// First-order lag between commanded and delivered flow.
    pub tau_ms: u64,
    /// Sensor reads `gain·true + offset`.
    pub sensor_gain: f32,
    pub sensor_offset_ul_min: f32,
    /// Peak roller ripple as a fraction of flow.
    pub ripple_frac: f32,
    pub rollers: u32,
    pub steps_per_rev: u32,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            ul_per_step: 0.5 / 60.0,
            tau_ms: 150,
            sensor_gain: 1.0,
            sensor_offset_ul_min: 0.0,
            ripple_frac: 0.0,
            rollers: 6,
            steps_per_rev: 200,
        }
    }
}

/// Persisted controller bundle, in wire order.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct PersistedParams {
    pub scale_a: f32,
    pub scale_b: f32,
    pub a: f32,
    pub b: f32,
    pub k: f32,
    pub c: f32,
    pub t_ref: f32,
    pub alpha_static: f32,
    pub a2: f32,
    pub b2: f32,
    pub k2: f32,
    pub c2: f32,
    #[serde(default)]
    pub kp: f32,
    #[serde(default)]
    pub kd: f32,
    pub sps_max: f32,
}

/// Standalone file holding just a `[params]` table.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct ParamsFile {
    pub params: PersistedParams,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub control: ControlCfg,
    #[serde(default)]
    pub calibration: CalibrationCfg,
    #[serde(default)]
    pub volume: VolumeCfg,
    #[serde(default)]
    pub telemetry: TelemetryCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub sim: SimCfg,
    /// Optional persisted bundle; preferred at startup over factory defaults.
    #[serde(default)]
    pub params: Option<PersistedParams>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn load_params_toml(s: &str) -> Result<PersistedParams, toml::de::Error> {
    toml::from_str::<ParamsFile>(s).map(|f| f.params)
}

pub fn params_to_toml(p: &PersistedParams) -> eyre::Result<String> {
    toml::to_string_pretty(&ParamsFile { params: *p })
        .map_err(|e| eyre::eyre!("serialize params: {e}"))
}

impl Config {
    /// Nominal calibration flow: explicit value or the control set-point.
    pub fn f_nom_ul_min(&self) -> f32 {
        self.calibration
            .f_nom_ul_min
            .unwrap_or(self.control.setpoint_ul_min)
    }

    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn validate(&self) -> eyre::Result<()> {
        // Control
        let c = &self.control;
        if !(c.setpoint_ul_min.is_finite() && c.setpoint_ul_min >= 0.0) {
            eyre::bail!("control.setpoint_ul_min must be finite and >= 0");
        }
        if c.tick_ms == 0 {
            eyre::bail!("control.tick_ms must be >= 1");
        }
        if c.tick_ms > 60_000 {
            eyre::bail!("control.tick_ms is unreasonably large (>1min)");
        }
        if let Some(kp) = c.kp
            && !(kp.is_finite() && kp >= 0.0)
        {
            eyre::bail!("control.kp must be finite and >= 0");
        }
        if let Some(kd) = c.kd
            && !(kd.is_finite() && kd >= 0.0)
        {
            eyre::bail!("control.kd must be finite and >= 0");
        }
        if let Some(sps) = c.sps_max
            && !(sps.is_finite() && sps > 0.0)
        {
            eyre::bail!("control.sps_max must be > 0");
        }

        // Calibration
        let k = &self.calibration;
        if let Some(f) = k.f_nom_ul_min
            && !(f.is_finite() && f >= 0.0)
        {
            eyre::bail!("calibration.f_nom_ul_min must be finite and >= 0");
        }
        if !(k.sps_max.is_finite() && k.sps_max > 0.0) {
            eyre::bail!("calibration.sps_max must be > 0");
        }
        if k.sample_ms == 0 {
            eyre::bail!("calibration.sample_ms must be >= 1");
        }
        if k.window_ms < k.sample_ms {
            eyre::bail!("calibration.window_ms must be >= calibration.sample_ms");
        }
        if !(k.ki_max > k.ki_min) {
            eyre::bail!("calibration.ki_max must be greater than calibration.ki_min");
        }
        if !(k.alpha_static > 0.0 && k.alpha_static <= 1.0) {
            eyre::bail!("calibration.alpha_static must be in (0.0, 1.0]");
        }
        if !(k.knee_frac > 0.0 && k.knee_frac < 1.0) {
            eyre::bail!("calibration.knee_frac must be in (0.0, 1.0)");
        }
        if !(k.stab_pct > 0.0) {
            eyre::bail!("calibration.stab_pct must be > 0");
        }

        // Volume
        if !(self.volume.density_g_per_ml > 0.0 && self.volume.density_g_per_ml.is_finite()) {
            eyre::bail!("volume.density_g_per_ml must be > 0");
        }

        // Sim
        let s = &self.sim;
        if !(s.ul_per_step > 0.0 && s.ul_per_step.is_finite()) {
            eyre::bail!("sim.ul_per_step must be > 0");
        }
        if !(s.sensor_gain.is_finite() && s.sensor_gain != 0.0) {
            eyre::bail!("sim.sensor_gain must be finite and non-zero");
        }
        if !(0.0..1.0).contains(&s.ripple_frac) {
            eyre::bail!("sim.ripple_frac must be in [0.0, 1.0)");
        }
        if s.rollers == 0 || s.steps_per_rev == 0 {
            eyre::bail!("sim.rollers and sim.steps_per_rev must be >= 1");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        // Params
        if let Some(p) = &self.params {
            validate_params(p)?;
        }

        Ok(())
    }
}

/// Reject a persisted bundle that could not have come from a calibration.
pub fn validate_params(p: &PersistedParams) -> eyre::Result<()> {
    let fields = [
        p.scale_a,
        p.scale_b,
        p.a,
        p.b,
        p.k,
        p.c,
        p.t_ref,
        p.alpha_static,
        p.a2,
        p.b2,
        p.k2,
        p.c2,
        p.kp,
        p.kd,
        p.sps_max,
    ];
    if fields.iter().any(|v| !v.is_finite()) {
        eyre::bail!("params must all be finite");
    }
    if p.scale_a == 0.0 {
        eyre::bail!("params.scale_a must be non-zero");
    }
    if p.sps_max <= 0.0 {
        eyre::bail!("params.sps_max must be > 0");
    }
    if !(p.alpha_static > 0.0 && p.alpha_static <= 1.0) {
        eyre::bail!("params.alpha_static must be in (0.0, 1.0]");
    }
    Ok(())
}
