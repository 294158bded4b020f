//! Per-tick snapshot for an external reporter.
//!
//! Written only by the controller (and the station while calibrating);
//! readers get it by reference.

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Telemetry {
    /// Milliseconds since the controller was built.
    pub t_ms: u64,
    pub setpoint_ul_min: f32,
    pub raw_flow_ul_min: f32,
    /// Flow after the affine scale correction.
    pub flow_ul_min: f32,
    pub err: f32,
    pub err_pct: f32,
    /// Dynamically filtered error seen by the integrator.
    pub e_dyn: f32,
    pub ki: f32,
    pub ki_primary: f32,
    pub alpha_dyn: f32,
    /// Actuation fraction in `[0, 1]`.
    pub fraction: f32,
    pub sps: f32,
    pub volume_ul: f64,
    pub mass_g: f64,
    pub calibrating: bool,
}
