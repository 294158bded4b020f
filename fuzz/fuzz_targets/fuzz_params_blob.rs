#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(p) = pump_core::persist::decode(data) {
        let again = pump_core::persist::encode(&p);
        assert_eq!(&again[..], data);
    }
});
