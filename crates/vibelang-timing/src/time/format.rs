//! Formatting seconds back into musical notation.

use super::context::TimeContext;
use crate::error::{Error, Result};

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Format `seconds` as `bars:beats:sixteenths` at the context tempo.
///
/// Bars and beats are whole numbers; sixteenths keep up to six decimals so
/// the string parses back to the same time. Negative times get a leading
/// `-` on the whole position.
pub fn bars_beats_sixteenths(seconds: f64, ctx: &TimeContext) -> String {
    let quarters = round_to(ctx.seconds_to_beats(seconds), 9);
    if quarters < 0.0 {
        return format!("-{}", format_quarters(-quarters, ctx.beats_per_bar()));
    }
    format_quarters(quarters, ctx.beats_per_bar())
}

fn format_quarters(quarters: f64, beats_per_bar: f64) -> String {
    let bars = (quarters / beats_per_bar).floor();
    let rem = quarters - bars * beats_per_bar;
    let beats = rem.floor();
    let sixteenths = round_to((rem - beats) * 4.0, 6);
    format!("{bars}:{beats}:{sixteenths}")
}

/// The note-duration token closest to `seconds`.
///
/// Candidates are `1m`, then for each power of two from 2 to 256 the dotted,
/// plain and triplet notes, then `0`. Earlier candidates win ties.
pub fn closest_notation(seconds: f64, ctx: &TimeContext) -> String {
    let beats_per_bar = ctx.beats_per_bar();
    let mut candidates: Vec<(String, f64)> = vec![("1m".to_string(), beats_per_bar)];
    for power in 1..9 {
        let subdivision = 2u32.pow(power);
        let beats = 4.0 / subdivision as f64;
        candidates.push((format!("{subdivision}n."), beats * 1.5));
        candidates.push((format!("{subdivision}n"), beats));
        candidates.push((format!("{subdivision}t"), 8.0 / (subdivision as f64 * 3.0)));
    }
    candidates.push(("0".to_string(), 0.0));

    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, (_, beats)) in candidates.iter().enumerate() {
        let distance = (ctx.beats_to_seconds(*beats) - seconds).abs();
        if distance < best_distance {
            best = i;
            best_distance = distance;
        }
    }
    candidates.swap_remove(best).0
}

/// Move `value` towards the nearest multiple of `subdivision` by `percent`.
pub fn quantize(value: f64, subdivision: f64, percent: f64) -> Result<f64> {
    if subdivision == 0.0 {
        return Err(Error::Domain("cannot quantize to a zero subdivision".into()));
    }
    let ideal = (value / subdivision).round() * subdivision;
    Ok(value + (ideal - value) * percent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::context::TimeSignature;
    use crate::time::TimeExpression;

    #[test]
    fn test_bars_beats_sixteenths() {
        let ctx = TimeContext::default();
        assert_eq!(bars_beats_sixteenths(0.0, &ctx), "0:0:0");
        assert_eq!(bars_beats_sixteenths(0.5, &ctx), "0:1:0");
        assert_eq!(bars_beats_sixteenths(2.0, &ctx), "1:0:0");
        assert_eq!(bars_beats_sixteenths(2.875, &ctx), "1:1:3");
        assert_eq!(bars_beats_sixteenths(0.0625, &ctx), "0:0:0.5");

        let waltz = TimeContext {
            time_signature: TimeSignature::new(3, 4),
            ..TimeContext::default()
        };
        assert_eq!(bars_beats_sixteenths(2.0, &waltz), "1:1:0");
    }

    #[test]
    fn test_bars_beats_sixteenths_round_trip() {
        let ctx = TimeContext::with_bpm(97.0);
        for seconds in [0.0, 0.123, 1.0, 3.7, 12.25, 61.003] {
            let text = bars_beats_sixteenths(seconds, &ctx);
            let back = TimeExpression::parse(&text).unwrap().evaluate(&ctx).unwrap();
            assert!((back - seconds).abs() < 1e-5, "{seconds} -> {text} -> {back}");
        }
    }

    #[test]
    fn test_bars_beats_sixteenths_in_odd_meters() {
        for (numerator, denominator) in [(7, 8), (5, 8), (6, 8)] {
            let ctx = TimeContext {
                time_signature: TimeSignature::new(numerator, denominator),
                ..TimeContext::default()
            };
            for seconds in [0.25, 1.375, 2.375, 3.1, 9.0625] {
                let text = bars_beats_sixteenths(seconds, &ctx);
                let back = TimeExpression::parse(&text).unwrap().evaluate(&ctx).unwrap();
                assert!((back - seconds).abs() < 1e-5, "{seconds} -> {text} -> {back}");
            }
        }

        let seven_eight = TimeContext {
            time_signature: TimeSignature::new(7, 8),
            ..TimeContext::default()
        };
        assert_eq!(bars_beats_sixteenths(2.375, &seven_eight), "1:1:1");
    }

    #[test]
    fn test_negative_bars_beats_sixteenths() {
        let ctx = TimeContext::default();
        assert_eq!(bars_beats_sixteenths(-0.5, &ctx), "-0:1:0");
        assert_eq!(bars_beats_sixteenths(-2.875, &ctx), "-1:1:3");
        for seconds in [-0.5, -2.875, -0.03125] {
            let text = bars_beats_sixteenths(seconds, &ctx);
            let back = TimeExpression::parse(&text).unwrap().evaluate(&ctx).unwrap();
            assert!((back - seconds).abs() < 1e-9, "{seconds} -> {text} -> {back}");
        }
    }

    #[test]
    fn test_closest_notation() {
        let ctx = TimeContext::default();
        assert_eq!(closest_notation(0.5, &ctx), "4n");
        assert_eq!(closest_notation(0.75, &ctx), "4n.");
        assert_eq!(closest_notation(2.0, &ctx), "1m");
        assert_eq!(closest_notation(1.0 / 6.0, &ctx), "8t");
        assert_eq!(closest_notation(0.0, &ctx), "0");
        assert_eq!(closest_notation(0.26, &ctx), "8n");
    }

    #[test]
    fn test_quantize() {
        assert!((quantize(1.1, 0.5, 1.0).unwrap() - 1.0).abs() < 1e-12);
        assert!((quantize(1.1, 0.5, 0.5).unwrap() - 1.05).abs() < 1e-12);
        assert!((quantize(1.4, 0.5, 1.0).unwrap() - 1.5).abs() < 1e-12);
        assert!((quantize(1.4, 0.5, 0.0).unwrap() - 1.4).abs() < 1e-12);
        assert!(quantize(1.0, 0.0, 1.0).is_err());
    }
}
