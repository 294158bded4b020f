//! Single-pole exponential smoother.

/// First-order low-pass filter `y = α·x + (1−α)·y_prev` with a coefficient
/// that can be changed between updates without disturbing the state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowPassFilter {
    alpha: f32,
    state: f32,
}

impl Default for LowPassFilter {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl LowPassFilter {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, state: 0.0 }
    }

    #[inline]
    pub fn update(&mut self, x: f32) -> f32 {
        self.state = self.alpha * x + (1.0 - self.alpha) * self.state;
        self.state
    }

    /// Seed the state; the coefficient is left alone.
    pub fn reset(&mut self, x0: f32) {
        self.state = x0;
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha;
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn value(&self) -> f32 {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_update_blends_with_zero_state() {
        let mut f = LowPassFilter::new(0.25);
        assert!((f.update(8.0) - 2.0).abs() < 1e-6);
        assert!((f.update(8.0) - 3.5).abs() < 1e-6);
    }

    #[test]
    fn set_alpha_keeps_state() {
        let mut f = LowPassFilter::new(0.5);
        f.update(10.0);
        f.set_alpha(1.0);
        assert_eq!(f.value(), 5.0);
        assert_eq!(f.update(3.0), 3.0);
    }

    #[test]
    fn reset_seeds_state() {
        let mut f = LowPassFilter::new(0.5);
        f.reset(4.0);
        assert_eq!(f.update(0.0), 2.0);
    }

    proptest! {
        #[test]
        fn output_stays_between_previous_state_and_input(
            alpha in 0.0f32..=1.0,
            prev in -1.0e4f32..1.0e4,
            x in -1.0e4f32..1.0e4,
        ) {
            let mut f = LowPassFilter::new(alpha);
            f.reset(prev);
            let y = f.update(x);
            let (lo, hi) = if prev <= x { (prev, x) } else { (x, prev) };
            prop_assert!(y >= lo - 1e-2 && y <= hi + 1e-2);
        }
    }
}
