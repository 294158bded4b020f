//! Type-state builder for `FlowController` and generic `build_controller` constructor.
//!
//! The builder enforces at compile time that a sensor and a pump are provided
//! before `build()` is available. `try_build()` is always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use pump_traits::{Clock, FlowSensor, MonotonicClock, Pump};

use crate::config::PidCfg;
use crate::controller::Controller;
use crate::error::{BuildError, Result};
use crate::params::EgcParams;

/// Boxed, dynamically dispatched controller.
pub type FlowController = Controller<Box<dyn FlowSensor>, Box<dyn Pump>>;

impl FlowController {
    /// Start building a controller.
    pub fn builder() -> ControllerBuilder<Missing, Missing> {
        ControllerBuilder::default()
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `FlowController`. All fields are validated on `build()`.
pub struct ControllerBuilder<S, P> {
    sensor: Option<Box<dyn FlowSensor>>,
    pump: Option<Box<dyn Pump>>,
    params: Option<EgcParams>,
    pid: Option<PidCfg>,
    density_g_per_ml: Option<f32>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    _s: PhantomData<S>,
    _p: PhantomData<P>,
}

impl Default for ControllerBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            sensor: None,
            pump: None,
            params: None,
            pid: None,
            density_g_per_ml: None,
            clock: None,
            _s: PhantomData,
            _p: PhantomData,
        }
    }
}

/// Validate configuration and construct a `Controller`.
///
/// Single source of truth for validation, used by both
/// `ControllerBuilder::try_build()` and `build_controller()`.
fn validate_and_build<S: FlowSensor, P: Pump>(
    sensor: S,
    pump: P,
    params: EgcParams,
    pid: PidCfg,
    density_g_per_ml: f32,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
) -> Result<Controller<S, P>> {
    // ── Validation ───────────────────────────────────────────────────────────
    if params.to_fields().iter().any(|v| !v.is_finite()) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "params must all be finite",
        )));
    }
    if params.scale.a == 0.0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "scale.a must be non-zero",
        )));
    }
    if params.sps_max <= 0.0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "sps_max must be > 0",
        )));
    }
    if params.kp < 0.0 || params.kd < 0.0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "kp and kd must be >= 0",
        )));
    }
    if !(params.gain.alpha_static > 0.0 && params.gain.alpha_static <= 1.0) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "alpha_static must be in (0, 1]",
        )));
    }
    if !(density_g_per_ml.is_finite() && density_g_per_ml > 0.0) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "density must be > 0",
        )));
    }

    let clock: Arc<dyn Clock + Send + Sync> = match clock {
        Some(c) => c,
        None => Arc::new(MonotonicClock::new()),
    };

    Ok(Controller::from_parts(
        sensor,
        pump,
        params,
        pid,
        density_g_per_ml,
        clock,
    ))
}

impl<S, P> ControllerBuilder<S, P> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<FlowController> {
        let sensor = self
            .sensor
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSensor))?;
        let pump = self
            .pump
            .ok_or_else(|| eyre::Report::new(BuildError::MissingPump))?;
        validate_and_build(
            sensor,
            pump,
            self.params.unwrap_or_default(),
            self.pid.unwrap_or_default(),
            self.density_g_per_ml.unwrap_or(1.0),
            self.clock,
        )
    }

    /// Chainable setters that do not affect type-state.
    pub fn with_params(mut self, params: EgcParams) -> Self {
        self.params = Some(params);
        self
    }
    pub fn with_pid(mut self, pid: PidCfg) -> Self {
        self.pid = Some(pid);
        self
    }
    pub fn with_density(mut self, density_g_per_ml: f32) -> Self {
        self.density_g_per_ml = Some(density_g_per_ml);
        self
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(Arc::from(clock));
        self
    }
    /// Share a clock with other parts of the system (e.g. a simulated plant).
    pub fn with_shared_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
}

// Setters that advance type-state
impl<P> ControllerBuilder<Missing, P> {
    pub fn with_sensor(self, sensor: impl FlowSensor + 'static) -> ControllerBuilder<Set, P> {
        ControllerBuilder {
            sensor: Some(Box::new(sensor)),
            pump: self.pump,
            params: self.params,
            pid: self.pid,
            density_g_per_ml: self.density_g_per_ml,
            clock: self.clock,
            _s: PhantomData,
            _p: PhantomData,
        }
    }
}

impl<S> ControllerBuilder<S, Missing> {
    pub fn with_pump(self, pump: impl Pump + 'static) -> ControllerBuilder<S, Set> {
        ControllerBuilder {
            sensor: self.sensor,
            pump: Some(Box::new(pump)),
            params: self.params,
            pid: self.pid,
            density_g_per_ml: self.density_g_per_ml,
            clock: self.clock,
            _s: PhantomData,
            _p: PhantomData,
        }
    }
}

impl ControllerBuilder<Set, Set> {
    /// Validate and build. Only available when sensor and pump are set.
    pub fn build(self) -> Result<FlowController> {
        self.try_build()
    }
}

/// Build a generic, statically dispatched controller from a concrete sensor and pump.
pub fn build_controller<S, P>(
    sensor: S,
    pump: P,
    params: EgcParams,
    pid: PidCfg,
    density_g_per_ml: f32,
    clock: Option<Box<dyn Clock + Send + Sync>>,
) -> Result<Controller<S, P>>
where
    S: FlowSensor,
    P: Pump,
{
    validate_and_build(
        sensor,
        pump,
        params,
        pid,
        density_g_per_ml,
        clock.map(Arc::from),
    )
}
