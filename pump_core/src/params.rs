//! Calibration bundle types and the exponential response curve they parameterise.
//!
//! Every curve in this crate has the form
//!
//! ```text
//! f(x) = A + (K − A) · exp(−1 / (B · (x − c)))
//! ```
//!
//! For `B > 0` and `x > c` the exponential lies in `(0, 1)`, so `f` rises
//! from `A` near `x = c` toward `K` as `x` grows.

/// Smallest magnitude allowed for the curve denominator `B·(x−c)`.
pub const DENOM_FLOOR: f32 = 1e-6;
/// Bounds for the dynamic smoothing coefficient.
pub const ALPHA_DYN_MIN: f32 = 0.05;
pub const ALPHA_DYN_MAX: f32 = 0.95;
/// Lower bound on `t_ref` so a calibration near the set-point cannot
/// collapse the curve.
pub const T_REF_FLOOR: f32 = 1.0;

/// Raw exponential curve. The denominator is floored at [`DENOM_FLOOR`] in
/// magnitude, keeping its sign, so `x == c` evaluates to `A` instead of NaN.
#[inline]
pub fn exp_curve(x: f32, a: f32, b: f32, k: f32, c: f32) -> f32 {
    let mut denom = b * (x - c);
    if denom.abs() < DENOM_FLOOR {
        denom = if denom >= 0.0 { DENOM_FLOOR } else { -DENOM_FLOOR };
    }
    if k == a {
        return a;
    }
    a + (k - a) * (-1.0 / denom).exp()
}

/// Clamp `v` to the closed interval spanned by `a` and `k`, whichever order they come in.
#[inline]
pub fn clamp_between(v: f32, a: f32, k: f32) -> f32 {
    if a <= k { v.clamp(a, k) } else { v.clamp(k, a) }
}

/// Raw-to-true linear correction: `true = a·raw + b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleAffine {
    pub a: f32,
    pub b: f32,
}

impl Default for ScaleAffine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ScaleAffine {
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0 };

    pub const fn new(a: f32, b: f32) -> Self {
        Self { a, b }
    }

    #[inline]
    pub fn apply(&self, raw: f32) -> f32 {
        self.a * raw + self.b
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

/// Parameters of the two gain-schedule curves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpParams {
    pub a: f32,
    pub b: f32,
    pub k: f32,
    pub c: f32,
    /// Characteristic error scale used to derive `b` during calibration.
    pub t_ref: f32,
    /// Fixed coefficient of the first-stage (coarse) error filter.
    pub alpha_static: f32,
    pub a2: f32,
    pub b2: f32,
    pub k2: f32,
    pub c2: f32,
}

impl Default for ExpParams {
    fn default() -> Self {
        Self {
            a: 0.0,
            b: 0.0,
            k: 0.0,
            c: 0.0,
            t_ref: 0.0,
            alpha_static: 0.20,
            a2: 0.05,
            b2: 0.001,
            k2: 0.95,
            c2: 0.0,
        }
    }
}

impl ExpParams {
    /// Integral gain for an error of the given size, clamped to `[A, K]`.
    #[inline]
    pub fn ki(&self, err: f32) -> f32 {
        clamp_between(
            exp_curve(err.abs(), self.a, self.b, self.k, self.c),
            self.a,
            self.k,
        )
    }

    /// Dynamic smoothing coefficient for an error of the given size,
    /// clamped to `[ALPHA_DYN_MIN, ALPHA_DYN_MAX]`.
    #[inline]
    pub fn alpha_dyn(&self, err: f32) -> f32 {
        exp_curve(err.abs(), self.a2, self.b2, self.k2, self.c2).clamp(ALPHA_DYN_MIN, ALPHA_DYN_MAX)
    }
}

/// The persisted calibration bundle consumed by the controller every tick.
///
/// Field order is the persisted order; see [`crate::persist`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EgcParams {
    pub scale: ScaleAffine,
    pub gain: ExpParams,
    pub kp: f32,
    pub kd: f32,
    /// Pump speed (steps/s) that an actuation fraction of 1.0 maps to.
    pub sps_max: f32,
}

impl Default for EgcParams {
    fn default() -> Self {
        Self {
            scale: ScaleAffine::IDENTITY,
            gain: ExpParams::default(),
            kp: 0.0,
            kd: 0.0,
            sps_max: 2000.0,
        }
    }
}

impl EgcParams {
    /// Number of `f32` fields in the persisted layout.
    pub const FIELD_COUNT: usize = 15;

    /// Bench-measured factory bundle shipped with the pump head.
    pub fn factory() -> Self {
        Self {
            scale: ScaleAffine::new(0.993, 2.1),
            gain: ExpParams {
                a: 0.0,
                b: 0.00025,
                k: 0.38,
                c: 0.0,
                t_ref: 57.4,
                alpha_static: 0.20,
                a2: 0.05,
                b2: 0.00012,
                k2: 0.95,
                c2: 0.0,
            },
            kp: 0.0,
            kd: 0.0,
            sps_max: 2000.0,
        }
    }

    /// Flatten in persisted order.
    pub fn to_fields(&self) -> [f32; Self::FIELD_COUNT] {
        let g = &self.gain;
        [
            self.scale.a,
            self.scale.b,
            g.a,
            g.b,
            g.k,
            g.c,
            g.t_ref,
            g.alpha_static,
            g.a2,
            g.b2,
            g.k2,
            g.c2,
            self.kp,
            self.kd,
            self.sps_max,
        ]
    }

    /// Inverse of [`EgcParams::to_fields`].
    pub fn from_fields(f: [f32; Self::FIELD_COUNT]) -> Self {
        Self {
            scale: ScaleAffine::new(f[0], f[1]),
            gain: ExpParams {
                a: f[2],
                b: f[3],
                k: f[4],
                c: f[5],
                t_ref: f[6],
                alpha_static: f[7],
                a2: f[8],
                b2: f[9],
                k2: f[10],
                c2: f[11],
            },
            kp: f[12],
            kd: f[13],
            sps_max: f[14],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn curve_at_centre_is_a() {
        // denominator floors to +1e-6, exp(-1e6) underflows to 0
        assert_eq!(exp_curve(0.0, 0.1, 0.5, 0.9, 0.0), 0.1);
        assert_eq!(exp_curve(2.0, 0.1, 0.5, 0.9, 2.0), 0.1);
    }

    #[test]
    fn curve_approaches_k_for_large_x() {
        let v = exp_curve(1.0e6, 0.0, 1.0, 0.4, 0.0);
        assert!((v - 0.4).abs() < 1e-5, "{v}");
    }

    #[test]
    fn clamp_contains_overflow_just_below_centre() {
        // negative floored denominator: exp(+1e6) overflows, clamp catches it
        let raw = exp_curve(-1.0e-9, 0.0, 1.0, 0.4, 0.0);
        assert!(raw.is_infinite());
        assert_eq!(clamp_between(raw, 0.0, 0.4), 0.4);
    }

    #[test]
    fn ki_uses_error_magnitude() {
        let g = ExpParams {
            a: 0.01,
            b: 0.02,
            k: 0.3,
            ..ExpParams::default()
        };
        assert_eq!(g.ki(40.0), g.ki(-40.0));
        assert!(g.ki(40.0) > g.a && g.ki(40.0) < g.k);
    }

    #[test]
    fn alpha_dyn_uses_error_magnitude() {
        let g = ExpParams {
            a2: 0.05,
            b2: 0.01,
            k2: 0.95,
            ..ExpParams::default()
        };
        assert_eq!(g.alpha_dyn(60.0), g.alpha_dyn(-60.0));
        assert!(g.alpha_dyn(-60.0) > ALPHA_DYN_MIN);
    }

    #[test]
    fn alpha_dyn_is_clamped() {
        let g = ExpParams {
            a2: 0.0,
            k2: 1.0,
            b2: 10.0,
            ..ExpParams::default()
        };
        assert_eq!(g.alpha_dyn(0.0), ALPHA_DYN_MIN);
        assert_eq!(g.alpha_dyn(1.0e9), ALPHA_DYN_MAX);
    }

    #[test]
    fn factory_round_trips_through_fields() {
        let p = EgcParams::factory();
        assert_eq!(EgcParams::from_fields(p.to_fields()), p);
    }

    #[test]
    fn default_scale_is_identity() {
        assert!(EgcParams::default().scale.is_identity());
        assert_eq!(ScaleAffine::new(2.0, -1.0).apply(3.0), 5.0);
    }

    proptest! {
        #[test]
        fn ki_bounded_by_a_and_k(
            x in -1.0e5f32..1.0e5,
            a in 0.0f32..1.0,
            span in 0.0f32..1.0,
            b in 1.0e-6f32..10.0,
            c in -10.0f32..10.0,
        ) {
            let g = ExpParams { a, k: a + span, b, c, ..ExpParams::default() };
            let v = g.ki(x);
            prop_assert!(v >= a && v <= a + span, "ki({x}) = {v}");
        }

        #[test]
        fn alpha_dyn_always_in_band(x in -1.0e5f32..1.0e5, b2 in 0.0f32..10.0) {
            let g = ExpParams { b2, ..ExpParams::default() };
            let v = g.alpha_dyn(x);
            prop_assert!((ALPHA_DYN_MIN..=ALPHA_DYN_MAX).contains(&v));
        }
    }
}
