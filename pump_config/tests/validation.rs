use pump_config::{AntiWindupMode, load_params_toml, load_toml, params_to_toml};
use rstest::rstest;

#[test]
fn empty_config_uses_defaults_and_validates() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults should pass");
    assert_eq!(cfg.control.anti_windup, AntiWindupMode::Rollback);
    assert_eq!(cfg.calibration.window_ms, 800);
    assert!(cfg.params.is_none());
}

#[test]
fn f_nom_falls_back_to_setpoint() {
    let cfg = load_toml(
        r#"
[control]
setpoint_ul_min = 750.0
"#,
    )
    .unwrap();
    assert_eq!(cfg.f_nom_ul_min(), 750.0);

    let cfg = load_toml(
        r#"
[control]
setpoint_ul_min = 750.0

[calibration]
f_nom_ul_min = 1000.0
"#,
    )
    .unwrap();
    assert_eq!(cfg.f_nom_ul_min(), 1000.0);
}

#[test]
fn anti_windup_parses_lowercase() {
    let cfg = load_toml(
        r#"
[control]
anti_windup = "clamp"
"#,
    )
    .unwrap();
    assert_eq!(cfg.control.anti_windup, AntiWindupMode::Clamp);
    assert!(load_toml("[control]\nanti_windup = \"bogus\"\n").is_err());
}

#[rstest]
#[case("[control]\ntick_ms = 0\n", "control.tick_ms must be >= 1")]
#[case("[control]\nsetpoint_ul_min = -1.0\n", "control.setpoint_ul_min")]
#[case("[control]\nkp = -0.5\n", "control.kp")]
#[case("[calibration]\nki_min = 0.4\nki_max = 0.4\n", "calibration.ki_max must be greater")]
#[case("[calibration]\nknee_frac = 1.0\n", "calibration.knee_frac")]
#[case("[calibration]\nsample_ms = 0\n", "calibration.sample_ms")]
#[case("[calibration]\nwindow_ms = 10\nsample_ms = 50\n", "calibration.window_ms")]
#[case("[volume]\ndensity_g_per_ml = 0.0\n", "volume.density_g_per_ml")]
#[case("[sim]\nripple_frac = 1.5\n", "sim.ripple_frac")]
#[case("[logging]\nrotation = \"weekly\"\n", "logging.rotation")]
fn rejects_bad_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(format!("{err}").contains(needle), "got: {err}");
}

const PARAMS: &str = r#"
[params]
scale_a = 0.993
scale_b = 2.1
a = 0.0
b = 0.00025
k = 0.38
c = 0.0
t_ref = 57.4
alpha_static = 0.2
a2 = 0.05
b2 = 0.00012
k2 = 0.95
c2 = 0.0
kp = 0.0
kd = 0.0
sps_max = 2000.0
"#;

#[test]
fn persisted_params_section_is_read() {
    let cfg = load_toml(PARAMS).unwrap();
    cfg.validate().unwrap();
    let p = cfg.params.expect("params present");
    assert_eq!(p.t_ref, 57.4);
    assert_eq!(p.b2, 0.00012);
}

#[test]
fn params_survive_toml_round_trip() {
    let p = load_params_toml(PARAMS).unwrap();
    let text = params_to_toml(&p).unwrap();
    assert!(text.contains("[params]"));
    assert_eq!(load_params_toml(&text).unwrap(), p);
}

#[test]
fn non_finite_params_are_rejected() {
    let text = PARAMS.replace("t_ref = 57.4", "t_ref = nan");
    let cfg = load_toml(&text).unwrap();
    let err = cfg.validate().unwrap_err();
    assert!(format!("{err}").contains("params must all be finite"));
}
