#![no_main]
use libfuzzer_sys::fuzz_target;

// Arbitrary TOML must parse or fail cleanly, and validation must never panic.
fuzz_target!(|data: &str| {
    if let Ok(cfg) = pump_config::load_toml(data)
        && cfg.validate().is_ok()
    {
        let _ = pump_core::startup_params(&cfg);
    }
    if let Ok(p) = pump_config::load_params_toml(data) {
        let _ = pump_config::validate_params(&p);
    }
});
