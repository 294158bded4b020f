use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use std::thread;

/// Time source for tick spacing and calibration phases.
///
/// The controller measures `dt` with `ms_since`, and blocking calibration
/// waits with `sleep`, so a virtual clock makes both deterministic.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, dur: Duration);

    /// Whole milliseconds from `epoch` to now; 0 if `epoch` lies ahead.
    fn ms_since(&self, epoch: Instant) -> u64 {
        u64::try_from(self.now().saturating_duration_since(epoch).as_millis()).unwrap_or(u64::MAX)
    }
}

/// Wall-time clock for running against real hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, dur: Duration) {
        if !dur.is_zero() {
            thread::sleep(dur);
        }
    }
}

/// Deterministic clock whose time only moves when advanced.
///
/// `sleep` moves time forward instead of blocking, so an
/// open-loop calibration completes instantly under test or in a
/// faster-than-real-time simulation. Clones share the same offset.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut elapsed) = self.offset.lock() {
            *elapsed = elapsed.saturating_add(by);
        }
    }

    /// Jump to `at` past construction, forwards or backwards.
    pub fn set_offset(&self, at: Duration) {
        if let Ok(mut elapsed) = self.offset.lock() {
            *elapsed = at;
        }
    }

    /// Time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, dur: Duration) {
        self.advance(dur);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_when_told() {
        let c = ManualClock::new();
        let t0 = c.now();
        assert_eq!(c.ms_since(t0), 0);
        c.sleep(Duration::from_millis(250));
        assert_eq!(c.ms_since(t0), 250);
        c.advance(Duration::from_millis(50));
        assert_eq!(c.ms_since(t0), 300);
    }

    #[test]
    fn clones_share_time() {
        let a = ManualClock::new();
        let b = a.clone();
        a.advance(Duration::from_secs(2));
        assert_eq!(b.elapsed(), Duration::from_secs(2));
        b.set_offset(Duration::from_millis(10));
        assert_eq!(a.elapsed(), Duration::from_millis(10));
    }

    #[test]
    fn ms_since_saturates_for_future_epoch() {
        let c = ManualClock::new();
        let future = c.now() + Duration::from_secs(1);
        assert_eq!(c.ms_since(future), 0);
    }
}
