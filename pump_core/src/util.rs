//! Common time and ratio helpers for pump_core.

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;
/// Milliseconds in one minute; flow is specified per minute.
pub const MILLIS_PER_MIN: f64 = 60_000.0;

/// Milliseconds as fractional seconds.
#[inline]
pub fn secs_from_ms(ms: u64) -> f32 {
    ms as f32 / MILLIS_PER_SEC as f32
}

/// Error as a percentage of the set-point; 0 when the set-point is not positive.
#[inline]
pub fn err_pct(err: f32, setpoint: f32) -> f32 {
    if setpoint > 0.0 {
        100.0 * err / setpoint
    } else {
        0.0
    }
}
