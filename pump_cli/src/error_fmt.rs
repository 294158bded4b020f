//! Human-readable error descriptions and structured JSON error formatting.

use pump_core::error::{BuildError, CalError, CodecError, ControlError};
use pump_hardware::error::HwError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(ce) = err.downcast_ref::<CalError>() {
        return humanize_cal(ce);
    }
    if let Some(ControlError::Calibration(ce)) = err.downcast_ref::<ControlError>() {
        return humanize_cal(ce);
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSensor => {
                "What happened: No flow sensor was provided to the controller.\nLikely causes: The sensor backend failed to initialize or was not wired into the builder.\nHow to fix: Ensure the sensor is created successfully and passed via with_sensor(...).".to_string()
            }
            BuildError::MissingPump => {
                "What happened: No pump was provided to the controller.\nLikely causes: The pump driver failed to initialize or was not wired into the builder.\nHow to fix: Ensure the pump is created successfully and passed via with_pump(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid controller parameters ({msg}).\nLikely causes: A hand-edited or corrupted [params] bundle, or out-of-range [control] overrides.\nHow to fix: Fix the values, or delete [params] to fall back to the factory bundle."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<CodecError>() {
        return format!(
            "What happened: The stored parameter blob is unreadable ({ce}).\nLikely causes: The file is truncated, or is not a parameter blob.\nHow to fix: Re-run `pumpctl calibrate --out <file>` to write a fresh one."
        );
    }

    if let Some(HwError::InvalidModel(msg)) = err.downcast_ref::<HwError>() {
        return format!(
            "What happened: The simulated plant could not be built ({msg}).\nLikely causes: Out-of-range values in [sim].\nHow to fix: Edit the [sim] section of the config and try again."
        );
    }

    if let Some(ControlError::State(msg)) = err.downcast_ref::<ControlError>() {
        return format!(
            "What happened: {msg}.\nLikely causes: A request arrived while the controller was busy.\nHow to fix: Wait for the current operation to finish."
        );
    }

    // String-based heuristics for errors coming from config loading
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("read config") || lower.contains("parse config") {
        return format!(
            "What happened: The configuration could not be loaded.\nLikely causes: Wrong --config path or a TOML syntax error.\nHow to fix: Check the path and the file contents. Original: {msg}"
        );
    }

    if lower.contains("must be") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: A value in the TOML is out of range.\nHow to fix: Edit the named key and try again."
        );
    }

    if lower.contains("scale csv must have headers") {
        return "Invalid headers in scale CSV. Expected 'raw,true'.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn humanize_cal(ce: &CalError) -> String {
    match ce {
        CalError::GainRange { .. } | CalError::KneeOutOfRange(_) => format!(
            "What happened: Calibration was refused ({ce}).\nLikely causes: calibration.ki_min/ki_max or calibration.knee_frac out of range.\nHow to fix: Fix the [calibration] section. The pump was not started."
        ),
        CalError::NoSamples => "What happened: Calibration collected no samples.\nLikely causes: calibration.window_ms is shorter than calibration.sample_ms.\nHow to fix: Lengthen the window. The previous parameters are still in use.".to_string(),
        CalError::ZeroFlow { .. } => format!(
            "What happened: Calibration saw no flow ({ce}).\nLikely causes: Tubing not loaded, empty reservoir, pump not turning, or sensor disconnected.\nHow to fix: Check the fluid path and the sensor, then re-run. The previous parameters are still in use."
        ),
        CalError::Unstable { .. } => format!(
            "What happened: Calibration flow was unstable ({ce}).\nLikely causes: Air bubbles, a loose tube, or too short a settle time.\nHow to fix: Prime the line, raise calibration.settle_ms or calibration.stab_pct, then re-run. The previous parameters are still in use."
        ),
    }
}

fn cal_error_name(ce: &CalError) -> &'static str {
    match ce {
        CalError::GainRange { .. } => "GainRange",
        CalError::KneeOutOfRange(_) => "KneeOutOfRange",
        CalError::NoSamples => "NoSamples",
        CalError::ZeroFlow { .. } => "ZeroFlow",
        CalError::Unstable { .. } => "Unstable",
    }
}

fn find_cal_error(err: &eyre::Report) -> Option<&CalError> {
    err.downcast_ref::<CalError>().or_else(|| {
        match err.downcast_ref::<ControlError>() {
            Some(ControlError::Calibration(ce)) => Some(ce),
            _ => None,
        }
    })
}

/// Stable exit codes: calibration refused 3, no usable flow 4, unstable 5; anything else 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match find_cal_error(err) {
        Some(CalError::GainRange { .. } | CalError::KneeOutOfRange(_)) => 3,
        Some(CalError::NoSamples | CalError::ZeroFlow { .. }) => 4,
        Some(CalError::Unstable { .. }) => 5,
        None => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    if let Some(ce) = find_cal_error(err) {
        let details = match ce {
            CalError::GainRange { ki_min, ki_max } => {
                Some(json!({ "ki_min": ki_min, "ki_max": ki_max }))
            }
            CalError::KneeOutOfRange(k) => Some(json!({ "knee_frac": k })),
            CalError::ZeroFlow { mean } => Some(json!({ "mean_ul_min": mean })),
            CalError::Unstable { cv_pct, limit_pct } => {
                Some(json!({ "cv_pct": cv_pct, "limit_pct": limit_pct }))
            }
            CalError::NoSamples => None,
        };
        let msg = humanize(err);
        let obj = if let Some(d) = details {
            json!({ "reason": cal_error_name(ce), "details": d, "message": msg })
        } else {
            json!({ "reason": cal_error_name(ce), "message": msg })
        };
        return obj.to_string();
    }

    // Generic error JSON
    json!({ "reason": "Error", "message": humanize(err) }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_errors_map_to_stable_codes() {
        let r = eyre::Report::new(CalError::KneeOutOfRange(1.5));
        assert_eq!(exit_code_for_error(&r), 3);
        let r = eyre::Report::new(CalError::ZeroFlow { mean: 0.0 });
        assert_eq!(exit_code_for_error(&r), 4);
        let r = eyre::Report::new(ControlError::Calibration(CalError::Unstable {
            cv_pct: 9.0,
            limit_pct: 2.5,
        }));
        assert_eq!(exit_code_for_error(&r), 5);
        assert_eq!(exit_code_for_error(&eyre::eyre!("boom")), 1);
    }

    #[test]
    fn json_error_carries_reason_and_details() {
        let r = eyre::Report::new(CalError::Unstable {
            cv_pct: 9.0,
            limit_pct: 2.5,
        });
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&r)).unwrap();
        assert_eq!(v["reason"], "Unstable");
        assert_eq!(v["details"]["limit_pct"], 2.5);
        assert!(v["message"].as_str().unwrap().contains("unstable"));
    }

    #[test]
    fn config_messages_are_explained() {
        let r = eyre::eyre!("control.tick_ms must be >= 1");
        assert!(humanize(&r).contains("Configuration is invalid"));
    }
}
