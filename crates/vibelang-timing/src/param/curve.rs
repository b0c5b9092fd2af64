//! Closed-form automation curves.
//!
//! A [`Segment`] is the shape of an automated value between two breakpoints.
//! Each shape knows its value, its integral, and where possible the time at
//! which its integral reaches a given area. The tick signal relies on the
//! integral to count ticks under tempo automation.

/// `v0 + (v1 - v0) * (t - t0) / (t1 - t0)`.
pub fn linear_interpolate(t0: f64, v0: f64, t1: f64, v1: f64, t: f64) -> f64 {
    if t1 <= t0 {
        return v1;
    }
    v0 + (v1 - v0) * ((t - t0) / (t1 - t0))
}

/// `v0 * (v1 / v0) ^ ((t - t0) / (t1 - t0))`.
pub fn exponential_interpolate(t0: f64, v0: f64, t1: f64, v1: f64, t: f64) -> f64 {
    if t1 <= t0 {
        return v1;
    }
    v0 * (v1 / v0).powf((t - t0) / (t1 - t0))
}

/// `v1 + (v0 - v1) * e^(-(t - t0) / time_constant)`.
pub fn exponential_approach(t0: f64, v0: f64, v1: f64, time_constant: f64, t: f64) -> f64 {
    v1 + (v0 - v1) * (-(t - t0) / time_constant).exp()
}

/// Value of an evenly spaced sample curve starting at `start`.
///
/// Before the start the first sample is held; after the end the last one.
pub fn curve_value(samples: &[f64], start: f64, duration: f64, t: f64) -> f64 {
    match samples {
        [] => 0.0,
        [only] => *only,
        _ => {
            let last = samples.len() - 1;
            if t <= start {
                return samples[0];
            }
            if t >= start + duration || duration <= 0.0 {
                return samples[last];
            }
            let position = (t - start) / duration * last as f64;
            let index = (position.floor() as usize).min(last - 1);
            let frac = position - index as f64;
            samples[index] + (samples[index + 1] - samples[index]) * frac
        }
    }
}

/// Time of sample `index` of a curve.
pub fn curve_sample_time(len: usize, start: f64, duration: f64, index: usize) -> f64 {
    if len < 2 {
        return start;
    }
    start + duration * index as f64 / (len - 1) as f64
}

/// Shape of an automated value over one stretch of time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Segment {
    Constant {
        value: f64,
    },
    Linear {
        t0: f64,
        v0: f64,
        t1: f64,
        v1: f64,
    },
    Exponential {
        t0: f64,
        v0: f64,
        t1: f64,
        v1: f64,
    },
    Target {
        t0: f64,
        v0: f64,
        v1: f64,
        time_constant: f64,
    },
}

impl Segment {
    /// Value at `t`.
    pub fn value_at(&self, t: f64) -> f64 {
        match *self {
            Segment::Constant { value } => value,
            Segment::Linear { t0, v0, t1, v1 } => linear_interpolate(t0, v0, t1, v1, t),
            Segment::Exponential { t0, v0, t1, v1 } => {
                exponential_interpolate(t0, v0, t1, v1, t)
            }
            Segment::Target {
                t0,
                v0,
                v1,
                time_constant,
            } => exponential_approach(t0, v0, v1, time_constant, t),
        }
    }

    /// Integral of the value over `[a, b]`.
    pub fn integral(&self, a: f64, b: f64) -> f64 {
        if b == a {
            return 0.0;
        }
        match *self {
            Segment::Constant { value } => value * (b - a),
            Segment::Linear { .. } => 0.5 * (self.value_at(a) + self.value_at(b)) * (b - a),
            Segment::Exponential { t0, v0, t1, v1 } => {
                let ratio = v1 / v0;
                if t1 <= t0 || (ratio - 1.0).abs() < 1e-12 {
                    return self.value_at(a) * (b - a);
                }
                (self.value_at(b) - self.value_at(a)) * (t1 - t0) / ratio.ln()
            }
            Segment::Target {
                t0,
                v0,
                v1,
                time_constant,
            } => {
                let decay_a = (-(a - t0) / time_constant).exp();
                let decay_b = (-(b - t0) / time_constant).exp();
                v1 * (b - a) + (v0 - v1) * time_constant * (decay_a - decay_b)
            }
        }
    }

    /// The time `x >= a` at which `integral(a, x) == area`, for shapes with
    /// a closed-form inverse.
    ///
    /// Returns `Some(f64::INFINITY)` when the area is never reached and
    /// `None` when the caller has to search numerically.
    pub fn solve(&self, a: f64, area: f64) -> Option<f64> {
        if area <= 0.0 {
            return Some(a);
        }
        match *self {
            Segment::Constant { value } => {
                if value > 0.0 {
                    Some(a + area / value)
                } else {
                    Some(f64::INFINITY)
                }
            }
            Segment::Linear { t0, v0, t1, v1 } => {
                let va = self.value_at(a);
                let slope = if t1 > t0 { (v1 - v0) / (t1 - t0) } else { 0.0 };
                let disc = va * va + 2.0 * slope * area;
                if disc < 0.0 {
                    return Some(f64::INFINITY);
                }
                let denom = va + disc.sqrt();
                if denom <= 0.0 {
                    return Some(f64::INFINITY);
                }
                Some(a + 2.0 * area / denom)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation_formulas() {
        assert!((linear_interpolate(0.0, 0.0, 2.0, 10.0, 1.0) - 5.0).abs() < 1e-12);
        assert!((exponential_interpolate(0.0, 1.0, 2.0, 100.0, 1.0) - 10.0).abs() < 1e-9);
        let approach = exponential_approach(0.0, 0.0, 1.0, 1.0, 1.0);
        assert!((approach - (1.0 - (-1.0f64).exp())).abs() < 1e-12);
    }

    #[test]
    fn test_curve_value() {
        let samples = [0.0, 1.0, 0.0];
        assert!((curve_value(&samples, 1.0, 2.0, 1.0) - 0.0).abs() < 1e-12);
        assert!((curve_value(&samples, 1.0, 2.0, 1.5) - 0.5).abs() < 1e-12);
        assert!((curve_value(&samples, 1.0, 2.0, 2.0) - 1.0).abs() < 1e-12);
        assert!((curve_value(&samples, 1.0, 2.0, 2.5) - 0.5).abs() < 1e-12);
        assert!((curve_value(&samples, 1.0, 2.0, 9.0) - 0.0).abs() < 1e-12);
        assert!((curve_sample_time(3, 1.0, 2.0, 1) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_integrals_match_numeric() {
        let segments = [
            Segment::Constant { value: 3.0 },
            Segment::Linear {
                t0: 0.0,
                v0: 1.0,
                t1: 4.0,
                v1: 5.0,
            },
            Segment::Exponential {
                t0: 0.0,
                v0: 1.0,
                t1: 4.0,
                v1: 16.0,
            },
            Segment::Target {
                t0: 0.0,
                v0: 2.0,
                v1: 8.0,
                time_constant: 0.7,
            },
        ];
        for segment in segments {
            let (a, b) = (0.5, 3.0);
            let steps = 20_000;
            let h = (b - a) / steps as f64;
            let numeric: f64 = (0..steps)
                .map(|i| segment.value_at(a + (i as f64 + 0.5) * h) * h)
                .sum();
            let exact = segment.integral(a, b);
            assert!(
                (numeric - exact).abs() < 1e-6 * exact.abs().max(1.0),
                "{segment:?}: {numeric} vs {exact}"
            );
        }
    }

    #[test]
    fn test_solve_inverts_integral() {
        let linear = Segment::Linear {
            t0: 0.0,
            v0: 2.0,
            t1: 10.0,
            v1: 4.0,
        };
        let x = linear.solve(1.0, 7.0).unwrap();
        assert!((linear.integral(1.0, x) - 7.0).abs() < 1e-9);

        let slowing = Segment::Linear {
            t0: 0.0,
            v0: 4.0,
            t1: 10.0,
            v1: 1.0,
        };
        let x = slowing.solve(0.0, 10.0).unwrap();
        assert!((slowing.integral(0.0, x) - 10.0).abs() < 1e-9);

        let constant = Segment::Constant { value: 384.0 };
        assert!((constant.solve(0.0, 192.0).unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(
            Segment::Constant { value: 0.0 }.solve(0.0, 1.0),
            Some(f64::INFINITY)
        );
        let target = Segment::Target {
            t0: 0.0,
            v0: 1.0,
            v1: 2.0,
            time_constant: 1.0,
        };
        assert!(target.solve(0.0, 1.0).is_none());
    }
}
