use std::sync::Arc;
use std::time::Duration;

use pump_hardware::error::HwError;
use pump_hardware::{PlantModel, SimPlant};
use pump_traits::{FlowSensor, ManualClock, Pump};
use rstest::rstest;

fn plant(model: PlantModel) -> (SimPlant, ManualClock) {
    let clock = ManualClock::new();
    let p = SimPlant::new(model, Arc::new(clock.clone())).unwrap();
    (p, clock)
}

#[test]
fn sensor_applies_gain_and_offset() {
    let (p, clock) = plant(PlantModel {
        tau_ms: 0,
        sensor_gain: 1.02,
        sensor_offset_ul_min: -3.0,
        ..PlantModel::default()
    });
    let mut pump = p.pump();
    let mut sensor = p.sensor();
    pump.set_target_sps(1000.0);
    clock.advance(Duration::from_millis(5));
    let read = sensor.read_ul_per_min();
    assert!((read - (1.02 * 500.0 - 3.0)).abs() < 1e-2, "read {read}");
    assert!((p.true_flow_ul_min() - 500.0).abs() < 1e-3);
}

#[test]
fn ripple_averages_out_over_a_roller_pass() {
    let (p, clock) = plant(PlantModel {
        tau_ms: 0,
        ripple_frac: 0.05,
        ..PlantModel::default()
    });
    let mut pump = p.pump();
    let mut sensor = p.sensor();
    // 1200 sps, 6 rollers / 200 steps: one pass every 33.3 steps = 27.8 ms
    pump.set_target_sps(1200.0);
    let mut sum = 0.0f64;
    let mut lo = f32::MAX;
    let mut hi = f32::MIN;
    let n = 1000;
    for _ in 0..n {
        clock.advance(Duration::from_millis(1));
        let f = sensor.read_ul_per_min();
        lo = lo.min(f);
        hi = hi.max(f);
        sum += f64::from(f);
    }
    let mean = sum / f64::from(n);
    assert!((mean - 600.0).abs() < 1.0, "mean {mean}");
    assert!(hi > 620.0 && lo < 580.0, "range {lo}..{hi}");
}

#[test]
fn delivered_volume_integrates_true_flow() {
    let (p, clock) = plant(PlantModel {
        tau_ms: 0,
        ..PlantModel::default()
    });
    let mut pump = p.pump();
    pump.set_target_sps(2000.0);
    clock.advance(Duration::from_millis(1));
    let start = p.delivered_ul();
    clock.advance(Duration::from_secs(60));
    let delivered = p.delivered_ul() - start;
    assert!((delivered - 1000.0).abs() < 1e-6, "delivered {delivered}");
}

#[test]
fn faults_read_as_zero_then_recover() {
    let (p, clock) = plant(PlantModel {
        tau_ms: 0,
        ..PlantModel::default()
    });
    let mut pump = p.pump();
    let mut sensor = p.sensor();
    pump.set_target_sps(1000.0);
    clock.advance(Duration::from_millis(1));
    p.inject_sensor_faults(2);
    assert_eq!(sensor.read_ul_per_min(), 0.0);
    assert_eq!(sensor.read_ul_per_min(), 0.0);
    assert!(sensor.read_ul_per_min() > 499.0);
}

#[rstest]
#[case(PlantModel { ul_per_step: 0.0, ..PlantModel::default() })]
#[case(PlantModel { sensor_gain: 0.0, ..PlantModel::default() })]
#[case(PlantModel { ripple_frac: 1.0, ..PlantModel::default() })]
#[case(PlantModel { rollers: 0, ..PlantModel::default() })]
#[case(PlantModel { max_sps: -1.0, ..PlantModel::default() })]
fn invalid_models_are_rejected(#[case] model: PlantModel) {
    let clock = ManualClock::new();
    let err = SimPlant::new(model, Arc::new(clock)).unwrap_err();
    assert!(matches!(err, HwError::InvalidModel(_)));
}
