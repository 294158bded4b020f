use assert_cmd::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[control]
setpoint_ul_min = 400.0
tick_ms = 10

[calibration]
f_nom_ul_min = 1000.0
settle_ms = 500
window_ms = 200
sample_ms = 20

[telemetry]
interval_ms = 100

[sim]
tau_ms = 20
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn json_lines(args: &[&str]) -> Vec<serde_json::Value> {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let mut cmd = Command::cargo_bin("pumpctl").unwrap();
    cmd.arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .args(args);
    let out = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8_lossy(&out)
        .lines()
        .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("bad JSON line {l:?}: {e}")))
        .collect()
}

/// Every telemetry record carries the full field set.
#[rstest]
fn telemetry_lines_have_stable_keys() {
    let lines = json_lines(&["run", "--fast", "--duration-ms", "500"]);
    let telem: Vec<_> = lines.iter().filter(|v| v.get("sps").is_some()).collect();
    assert!(telem.len() >= 4, "expected several telemetry lines, got {lines:?}");

    for v in &telem {
        let obj = v.as_object().unwrap();
        for key in [
            "t", "sp", "r_flw", "flw", "err", "err_pct", "e_dyn", "ki", "ki_primary", "alpha_dyn",
            "frac", "sps", "vol_ul", "mass_g", "cal",
        ] {
            assert!(obj.contains_key(key), "missing key {key} in {v}");
        }
        assert_eq!(v["sp"], 400.0);
        assert_eq!(v["cal"], false);
        assert!(v["t"].is_u64());
    }

    let ts: Vec<u64> = telem.iter().map(|v| v["t"].as_u64().unwrap()).collect();
    assert!(ts.windows(2).all(|w| w[0] < w[1]), "timestamps not increasing: {ts:?}");

    let summary = lines
        .iter()
        .find(|v| v["event"] == "summary")
        .expect("summary line");
    assert_eq!(summary["reason"], "Duration");
    assert!(summary["vol_ul"].as_f64().unwrap() > 0.0);
}

/// A calibrate-first run reports calibrating records, then the fit, then closed loop.
#[rstest]
fn calibrate_first_emits_event_between_phases() {
    let lines = json_lines(&["run", "--fast", "--calibrate-first", "--duration-ms", "1500"]);
    let idx = lines
        .iter()
        .position(|v| v["event"] == "calibrated")
        .expect("calibrated event");
    let report = &lines[idx]["report"];
    assert!(report["samples"].as_u64().unwrap() >= 10);
    assert!(report["t_ref"].as_f64().unwrap() >= 1.0);

    assert!(lines[..idx].iter().any(|v| v["cal"] == true));
    assert!(lines[idx..].iter().any(|v| v["cal"] == false));
}
