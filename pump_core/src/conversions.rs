//! `From` implementations bridging `pump_config` types to `pump_core` types.

use crate::config::{AntiWindup, CalConfig, PidCfg};
use crate::params::{EgcParams, ExpParams, ScaleAffine};

// ── PID ──────────────────────────────────────────────────────────────────────

impl From<pump_config::AntiWindupMode> for AntiWindup {
    fn from(m: pump_config::AntiWindupMode) -> Self {
        match m {
            pump_config::AntiWindupMode::Clamp => Self::Clamp,
            pump_config::AntiWindupMode::Rollback => Self::Rollback,
        }
    }
}

impl From<&pump_config::ControlCfg> for PidCfg {
    fn from(c: &pump_config::ControlCfg) -> Self {
        Self {
            anti_windup: c.anti_windup.into(),
        }
    }
}

// ── CalConfig ────────────────────────────────────────────────────────────────

/// Needs the whole config: `f_nom` falls back to the control set-point.
impl From<&pump_config::Config> for CalConfig {
    fn from(cfg: &pump_config::Config) -> Self {
        let c = &cfg.calibration;
        Self {
            f_nom_ul_min: cfg.f_nom_ul_min(),
            sps_max: c.sps_max,
            settle_ms: c.settle_ms,
            window_ms: c.window_ms,
            sample_ms: c.sample_ms,
            ki_min: c.ki_min,
            ki_max: c.ki_max,
            alpha_static: c.alpha_static,
            knee_frac: c.knee_frac,
            stab_pct: c.stab_pct,
        }
    }
}

// ── Persisted bundle ─────────────────────────────────────────────────────────

impl From<&pump_config::PersistedParams> for EgcParams {
    fn from(p: &pump_config::PersistedParams) -> Self {
        Self {
            scale: ScaleAffine::new(p.scale_a, p.scale_b),
            gain: ExpParams {
                a: p.a,
                b: p.b,
                k: p.k,
                c: p.c,
                t_ref: p.t_ref,
                alpha_static: p.alpha_static,
                a2: p.a2,
                b2: p.b2,
                k2: p.k2,
                c2: p.c2,
            },
            kp: p.kp,
            kd: p.kd,
            sps_max: p.sps_max,
        }
    }
}

impl From<&EgcParams> for pump_config::PersistedParams {
    fn from(p: &EgcParams) -> Self {
        let g = &p.gain;
        Self {
            scale_a: p.scale.a,
            scale_b: p.scale.b,
            a: g.a,
            b: g.b,
            k: g.k,
            c: g.c,
            t_ref: g.t_ref,
            alpha_static: g.alpha_static,
            a2: g.a2,
            b2: g.b2,
            k2: g.k2,
            c2: g.c2,
            kp: p.kp,
            kd: p.kd,
            sps_max: p.sps_max,
        }
    }
}

/// Bundle to start with: the persisted `[params]` section if present, else the
/// factory bundle, with any `[control]` gain/speed overrides applied on top.
pub fn startup_params(cfg: &pump_config::Config) -> EgcParams {
    let mut p = cfg
        .params
        .as_ref()
        .map_or_else(EgcParams::factory, EgcParams::from);
    if let Some(kp) = cfg.control.kp {
        p.kp = kp;
    }
    if let Some(kd) = cfg.control.kd {
        p.kd = kd;
    }
    if let Some(sps) = cfg.control.sps_max {
        p.sps_max = sps;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_round_trip_preserves_every_field() {
        let p = EgcParams::factory();
        let persisted = pump_config::PersistedParams::from(&p);
        assert_eq!(EgcParams::from(&persisted), p);
    }

    #[test]
    fn startup_prefers_persisted_then_overrides() {
        let mut cfg = pump_config::Config::default();
        assert_eq!(startup_params(&cfg), EgcParams::factory());

        let mut stored = EgcParams::default();
        stored.gain.t_ref = 25.0;
        cfg.params = Some((&stored).into());
        cfg.control.kp = Some(0.002);
        let p = startup_params(&cfg);
        assert_eq!(p.gain.t_ref, 25.0);
        assert_eq!(p.kp, 0.002);
        assert_eq!(p.scale, ScaleAffine::IDENTITY);
    }

    #[test]
    fn cal_config_takes_setpoint_when_f_nom_absent() {
        let mut cfg = pump_config::Config::default();
        cfg.control.setpoint_ul_min = 800.0;
        let cal = CalConfig::from(&cfg);
        assert_eq!(cal.f_nom_ul_min, 800.0);
        assert_eq!(cal.window_ms, 800);
    }
}
