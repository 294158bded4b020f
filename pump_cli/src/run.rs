//! Command implementations: hardware assembly, the run loop, calibration and
//! bundle file handling.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use eyre::WrapErr;
use pump_config::Config;
use pump_core::{
    CalConfig, CalReport, EgcParams, FlowController, PidCfg, RunOptions, RunSummary, Station,
    StationEvent, Telemetry, persist, startup_params,
};
use pump_hardware::{PlantModel, SimPlant};
use pump_traits::{Clock, ManualClock, MonotonicClock};
use serde_json::json;

pub fn load_config(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = pump_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

fn is_blob(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "bin")
}

/// Load a bundle from a `.bin` blob or a TOML file holding a `[params]` table.
pub fn load_params_file(path: &Path) -> eyre::Result<EgcParams> {
    if is_blob(path) {
        return persist::load_blob(path);
    }
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read params {}", path.display()))?;
    let p = pump_config::load_params_toml(&text)
        .wrap_err_with(|| format!("parse params {}", path.display()))?;
    pump_config::validate_params(&p)?;
    Ok(EgcParams::from(&p))
}

/// Store a bundle atomically as a `.bin` blob or a `[params]` TOML file.
pub fn save_params_file(path: &Path, params: &EgcParams) -> eyre::Result<()> {
    if is_blob(path) {
        return persist::save_blob(path, params);
    }
    let text = pump_config::params_to_toml(&params.into())?;
    persist::write_atomic(path, text.as_bytes())
        .wrap_err_with(|| format!("write params {}", path.display()))?;
    tracing::info!(path = %path.display(), "params saved");
    Ok(())
}

fn plant_model(cfg: &pump_config::SimCfg) -> PlantModel {
    PlantModel {
        ul_per_step: cfg.ul_per_step,
        tau_ms: cfg.tau_ms,
        sensor_gain: cfg.sensor_gain,
        sensor_offset_ul_min: cfg.sensor_offset_ul_min,
        ripple_frac: cfg.ripple_frac,
        rollers: cfg.rollers,
        steps_per_rev: cfg.steps_per_rev,
        ..PlantModel::default()
    }
}

fn make_clock(fast: bool) -> Arc<dyn Clock + Send + Sync> {
    if fast {
        Arc::new(ManualClock::new())
    } else {
        Arc::new(MonotonicClock::new())
    }
}

/// Assemble the simulated plant and a controller around it.
pub fn assemble(cfg: &Config, params: EgcParams, fast: bool) -> eyre::Result<FlowController> {
    let clock = make_clock(fast);
    let plant = SimPlant::new(plant_model(&cfg.sim), Arc::clone(&clock))?;
    let pid: PidCfg = (&cfg.control).into();
    FlowController::builder()
        .with_sensor(plant.sensor())
        .with_pump(plant.pump())
        .with_params(params)
        .with_pid(pid)
        .with_density(cfg.volume.density_g_per_ml)
        .with_shared_clock(clock)
        .build()
}

fn initial_params(cfg: &Config, file: Option<&Path>) -> eyre::Result<EgcParams> {
    match file {
        Some(path) => load_params_file(path),
        None => Ok(startup_params(cfg)),
    }
}

pub fn telemetry_json(t: &Telemetry) -> serde_json::Value {
    json!({
        "t": t.t_ms,
        "sp": t.setpoint_ul_min,
        "r_flw": t.raw_flow_ul_min,
        "flw": t.flow_ul_min,
        "err": t.err,
        "err_pct": t.err_pct,
        "e_dyn": t.e_dyn,
        "ki": t.ki,
        "ki_primary": t.ki_primary,
        "alpha_dyn": t.alpha_dyn,
        "frac": t.fraction,
        "sps": t.sps,
        "vol_ul": t.volume_ul,
        "mass_g": t.mass_g,
        "cal": t.calibrating,
    })
}

fn print_telemetry(t: &Telemetry, json_mode: bool) {
    if json_mode {
        println!("{}", telemetry_json(t));
    } else {
        let tag = if t.calibrating { " [cal]" } else { "" };
        println!(
            "t={:>7}ms sp={:.1} flow={:.2} err={:+.2}% ki={:.5} sps={:.1} vol={:.3}uL{tag}",
            t.t_ms, t.setpoint_ul_min, t.flow_ul_min, t.err_pct, t.ki, t.sps, t.volume_ul
        );
    }
}

fn report_json(r: &CalReport) -> serde_json::Value {
    json!({
        "samples": r.samples,
        "mean_ul_min": r.mean_ul_min,
        "cv_pct": r.cv_pct,
        "err_upper": r.err_upper,
        "t_ref": r.gain.t_ref,
        "b": r.gain.b,
        "b2": r.gain.b2,
    })
}

fn print_report(r: &CalReport, json_mode: bool) {
    if json_mode {
        println!("{}", json!({ "event": "calibrated", "report": report_json(r) }));
    } else {
        println!(
            "Calibration complete: {} samples, mean {:.2} uL/min, CV {:.2}%, t_ref {:.2}, B {:.6}",
            r.samples, r.mean_ul_min, r.cv_pct, r.gain.t_ref, r.gain.b
        );
    }
}

fn print_summary(s: &RunSummary, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            json!({
                "event": "summary",
                "reason": format!("{:?}", s.reason),
                "elapsed_ms": s.elapsed_ms,
                "ticks": s.ticks,
                "vol_ul": s.volume_ul,
                "mass_g": s.mass_g,
            })
        );
    } else {
        println!(
            "Run complete ({:?}): {} ms, {} ticks, {:.3} uL delivered ({:.6} g)",
            s.reason, s.elapsed_ms, s.ticks, s.volume_ul, s.mass_g
        );
    }
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    cfg: &Config,
    setpoint: Option<f32>,
    duration_ms: Option<u64>,
    params_file: Option<&Path>,
    calibrate_first: bool,
    save_params: Option<&Path>,
    fast: bool,
    json_mode: bool,
    shutdown: &AtomicBool,
) -> eyre::Result<RunSummary> {
    let setpoint = setpoint.unwrap_or(cfg.control.setpoint_ul_min);
    if !(setpoint.is_finite() && setpoint >= 0.0) {
        eyre::bail!("setpoint must be finite and >= 0");
    }
    let params = initial_params(cfg, params_file)?;
    let ctrl = assemble(cfg, params, fast)?;
    let mut station = Station::new(ctrl, setpoint);

    if calibrate_first {
        station.request_calibration(CalConfig::from(cfg))?;
    }

    let opts = RunOptions {
        tick: Duration::from_millis(cfg.control.tick_ms),
        max_run: duration_ms.map(Duration::from_millis),
        report_every: Duration::from_millis(cfg.telemetry.interval_ms),
    };
    let summary = station.run(
        &opts,
        shutdown,
        |t| print_telemetry(t, json_mode),
        |ev| {
            match ev {
                StationEvent::Calibrated { report, params } => {
                    print_report(report, json_mode);
                    if let Some(path) = save_params {
                        save_params_file(path, params)?;
                    }
                }
                StationEvent::CalibrationFailed(e) => {
                    tracing::warn!(error = %e, "calibration failed; keeping previous parameters");
                    if json_mode {
                        println!(
                            "{}",
                            json!({ "event": "calibration_failed", "message": e.to_string() })
                        );
                    }
                }
            }
            Ok(())
        },
    )?;
    print_summary(&summary, json_mode);
    Ok(summary)
}

pub fn calibrate(
    cfg: &Config,
    f_nom: Option<f32>,
    params_file: Option<&Path>,
    out: Option<&Path>,
    fast: bool,
    json_mode: bool,
) -> eyre::Result<EgcParams> {
    let mut cal = CalConfig::from(cfg);
    if let Some(f) = f_nom {
        cal.f_nom_ul_min = f;
    }
    let params = initial_params(cfg, params_file)?;
    let mut ctrl = assemble(cfg, params, fast)?;
    tracing::info!(f_nom = cal.f_nom_ul_min, "calibration requested");
    let report = ctrl.calibrate(&cal)?;
    print_report(&report, json_mode);
    let fitted = *ctrl.params();
    if let Some(path) = out {
        save_params_file(path, &fitted)?;
    }
    Ok(fitted)
}

pub fn fit_scale(csv: &Path, params_file: Option<&Path>, json_mode: bool) -> eyre::Result<()> {
    let fit = pump_config::load_scale_csv(csv)?;
    if json_mode {
        println!(
            "{}",
            json!({ "a": fit.a, "b": fit.b, "used": fit.used, "rms": fit.rms })
        );
    } else {
        println!(
            "Scale fit: true = {:.6} * raw + {:.6} ({} points used, rms {:.4})",
            fit.a, fit.b, fit.used, fit.rms
        );
    }
    if let Some(path) = params_file {
        let mut p = if path.exists() {
            load_params_file(path)?
        } else {
            EgcParams::factory()
        };
        p.scale = pump_core::ScaleAffine::new(fit.a, fit.b);
        save_params_file(path, &p)?;
    }
    Ok(())
}

pub fn show_params(cfg: &Config, params_file: Option<&Path>, json_mode: bool) -> eyre::Result<()> {
    let p = initial_params(cfg, params_file)?;
    let persisted = pump_config::PersistedParams::from(&p);
    if json_mode {
        println!("{}", json!({ "params": fields_json(&persisted) }));
    } else {
        print!("{}", pump_config::params_to_toml(&persisted)?);
    }
    Ok(())
}

fn fields_json(p: &pump_config::PersistedParams) -> serde_json::Value {
    json!({
        "scale_a": p.scale_a,
        "scale_b": p.scale_b,
        "a": p.a,
        "b": p.b,
        "k": p.k,
        "c": p.c,
        "t_ref": p.t_ref,
        "alpha_static": p.alpha_static,
        "a2": p.a2,
        "b2": p.b2,
        "k2": p.k2,
        "c2": p.c2,
        "kp": p.kp,
        "kd": p.kd,
        "sps_max": p.sps_max,
    })
}

/// Build everything on a virtual clock and run a few ticks.
pub fn self_check(cfg: &Config, json_mode: bool) -> eyre::Result<()> {
    let mut ctrl = assemble(cfg, startup_params(cfg), true)?;
    let mut t = Telemetry::default();
    let clock = Arc::clone(ctrl.clock());
    for _ in 0..10 {
        clock.sleep(Duration::from_millis(cfg.control.tick_ms));
        ctrl.tick(cfg.control.setpoint_ul_min, &mut t);
    }
    ctrl.stop();
    if !t.sps.is_finite() || !t.flow_ul_min.is_finite() {
        eyre::bail!("self-check produced non-finite output");
    }
    if json_mode {
        println!("{}", json!({ "status": "ok", "backend": "sim" }));
    } else {
        println!("self-check ok (backend: sim)");
    }
    Ok(())
}
