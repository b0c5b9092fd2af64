//! The tagged time value and its evaluation.

use std::fmt;
use std::str::FromStr;

use super::context::TimeContext;
use super::format;
use super::parser;
use crate::error::{Error, Result};

/// Kind of a note-duration token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NoteKind {
    /// `<n>n`, a 1/n note (`1n` is a whole measure).
    Note,
    /// `<n>t`, a triplet.
    Triplet,
    /// `<n>m`, measures.
    Measure,
}

/// Arithmetic operator between two time expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl Op {
    fn symbol(&self) -> char {
        match self {
            Op::Add => '+',
            Op::Sub => '-',
            Op::Mul => '*',
            Op::Div => '/',
        }
    }
}

/// A time value that resolves to seconds against a [`TimeContext`].
///
/// Parse strings once at the boundary (`"4n"`, `"1:2:0"`, `"+8n"`,
/// `"(1m + 4n) * 2"`) and pass the resulting value around. Evaluation never
/// mutates anything.
#[derive(Clone, Debug, PartialEq)]
pub enum TimeExpression {
    Seconds(f64),
    Ticks(f64),
    /// A frequency in Hz, evaluating to its period.
    Frequency(f64),
    Samples(f64),
    Notation {
        value: f64,
        kind: NoteKind,
        dotted: bool,
    },
    BarsBeatsSixteenths {
        bars: f64,
        beats: f64,
        sixteenths: f64,
    },
    /// The context's reference time.
    Now,
    Relative {
        base: Box<TimeExpression>,
        offset: Box<TimeExpression>,
    },
    Math {
        op: Op,
        lhs: Box<TimeExpression>,
        rhs: Box<TimeExpression>,
    },
}

impl TimeExpression {
    /// Parse a time string.
    pub fn parse(input: &str) -> Result<Self> {
        parser::parse(input)
    }

    /// An expression relative to the evaluation-time "now".
    pub fn relative(offset: TimeExpression) -> Self {
        TimeExpression::Relative {
            base: Box::new(TimeExpression::Now),
            offset: Box::new(offset),
        }
    }

    /// A note-duration token such as `4n` or `8t`.
    pub fn notation(value: f64, kind: NoteKind) -> Self {
        TimeExpression::Notation {
            value,
            kind,
            dotted: false,
        }
    }

    /// Combine two expressions with an operator.
    pub fn math(op: Op, lhs: TimeExpression, rhs: TimeExpression) -> Self {
        TimeExpression::Math {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Whether evaluation depends on the context's `now`.
    pub fn is_relative(&self) -> bool {
        match self {
            TimeExpression::Now | TimeExpression::Relative { .. } => true,
            TimeExpression::Math { lhs, rhs, .. } => lhs.is_relative() || rhs.is_relative(),
            _ => false,
        }
    }

    /// Resolve to seconds.
    pub fn evaluate(&self, ctx: &TimeContext) -> Result<f64> {
        match self {
            TimeExpression::Seconds(seconds) => Ok(*seconds),
            TimeExpression::Ticks(ticks) => Ok(ctx.ticks_to_seconds(*ticks)),
            TimeExpression::Frequency(hz) => {
                if *hz == 0.0 {
                    return Err(Error::Domain("a frequency of 0hz has no period".into()));
                }
                Ok(1.0 / hz)
            }
            TimeExpression::Samples(samples) => Ok(samples / ctx.sample_rate),
            TimeExpression::Notation { .. } | TimeExpression::BarsBeatsSixteenths { .. } => {
                Ok(ctx.beats_to_seconds(self.musical_beats(ctx)?))
            }
            TimeExpression::Now => Ok(ctx.now),
            TimeExpression::Relative { base, offset } => {
                Ok(base.evaluate(ctx)? + offset.evaluate(ctx)?)
            }
            TimeExpression::Math { op, lhs, rhs } => {
                let a = lhs.evaluate(ctx)?;
                let b = rhs.evaluate(ctx)?;
                combine(*op, a, b)
            }
        }
    }

    /// Resolve to seconds, rejecting negative results.
    pub fn to_duration(&self, ctx: &TimeContext) -> Result<f64> {
        let seconds = self.evaluate(ctx)?;
        if seconds < 0.0 {
            return Err(Error::OutOfRange(format!(
                "duration '{self}' resolves to negative {seconds}s"
            )));
        }
        Ok(seconds)
    }

    /// Resolve to ticks at the context's PPQ.
    ///
    /// Musical notation converts exactly; everything else goes through
    /// seconds at the context tempo.
    pub fn to_ticks(&self, ctx: &TimeContext) -> Result<f64> {
        match self {
            TimeExpression::Ticks(ticks) => Ok(*ticks),
            TimeExpression::Notation { .. } | TimeExpression::BarsBeatsSixteenths { .. } => {
                Ok(self.musical_beats(ctx)? * ctx.ppq as f64)
            }
            TimeExpression::Relative { base, offset } => {
                Ok(base.to_ticks(ctx)? + offset.to_ticks(ctx)?)
            }
            TimeExpression::Math {
                op: op @ (Op::Add | Op::Sub),
                lhs,
                rhs,
            } => combine(*op, lhs.to_ticks(ctx)?, rhs.to_ticks(ctx)?),
            _ => Ok(ctx.seconds_to_ticks(self.evaluate(ctx)?)),
        }
    }

    /// Resolve to a sample count at the context's sample rate.
    pub fn to_samples(&self, ctx: &TimeContext) -> Result<f64> {
        Ok(self.evaluate(ctx)? * ctx.sample_rate)
    }

    /// Resolve to milliseconds.
    pub fn to_milliseconds(&self, ctx: &TimeContext) -> Result<f64> {
        Ok(self.evaluate(ctx)? * 1000.0)
    }

    /// Resolve to the frequency whose period is this time.
    pub fn to_frequency(&self, ctx: &TimeContext) -> Result<f64> {
        let seconds = self.evaluate(ctx)?;
        if seconds == 0.0 {
            return Err(Error::Domain(format!("'{self}' has zero length")));
        }
        Ok(1.0 / seconds)
    }

    /// Format as `bars:beats:sixteenths`.
    pub fn to_bars_beats_sixteenths(&self, ctx: &TimeContext) -> Result<String> {
        Ok(format::bars_beats_sixteenths(self.evaluate(ctx)?, ctx))
    }

    /// The closest note-duration token (`1m`, `4n`, `8n.`, `16t`, ...).
    pub fn to_notation(&self, ctx: &TimeContext) -> Result<String> {
        Ok(format::closest_notation(self.evaluate(ctx)?, ctx))
    }

    /// Move the value towards the nearest multiple of `subdivision`.
    ///
    /// `percent` of 1 snaps fully, 0 leaves the value unchanged.
    pub fn quantize(
        &self,
        subdivision: &TimeExpression,
        percent: f64,
        ctx: &TimeContext,
    ) -> Result<f64> {
        let value = self.evaluate(ctx)?;
        let subdivision = subdivision.evaluate(ctx)?;
        format::quantize(value, subdivision, percent)
    }

    /// Quarter-note beats for notation and bars:beats:sixteenths values.
    fn musical_beats(&self, ctx: &TimeContext) -> Result<f64> {
        let beats_per_bar = ctx.beats_per_bar();
        match self {
            TimeExpression::Notation { value, kind, dotted } => {
                let beats = match kind {
                    NoteKind::Note if *value == 1.0 => beats_per_bar,
                    NoteKind::Note | NoteKind::Triplet if *value == 0.0 => {
                        return Err(Error::Domain(format!("'{self}' divides by zero")));
                    }
                    NoteKind::Note => 4.0 / value,
                    NoteKind::Triplet => 8.0 / (value * 3.0),
                    NoteKind::Measure => value * beats_per_bar,
                };
                Ok(if *dotted { beats * 1.5 } else { beats })
            }
            TimeExpression::BarsBeatsSixteenths {
                bars,
                beats,
                sixteenths,
            } => Ok(bars * beats_per_bar + beats + sixteenths / 4.0),
            _ => Ok(ctx.seconds_to_beats(self.evaluate(ctx)?)),
        }
    }
}

fn combine(op: Op, a: f64, b: f64) -> Result<f64> {
    match op {
        Op::Add => Ok(a + b),
        Op::Sub => Ok(a - b),
        Op::Mul => Ok(a * b),
        Op::Div => {
            if b == 0.0 {
                Err(Error::Domain("time expression divides by zero".into()))
            } else {
                Ok(a / b)
            }
        }
    }
}

impl fmt::Display for TimeExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeExpression::Seconds(seconds) => write!(f, "{seconds}"),
            TimeExpression::Ticks(ticks) => write!(f, "{ticks}i"),
            TimeExpression::Frequency(hz) => write!(f, "{hz}hz"),
            TimeExpression::Samples(samples) => write!(f, "{samples}samples"),
            TimeExpression::Notation {
                value,
                kind,
                dotted,
            } => {
                let suffix = match kind {
                    NoteKind::Note => 'n',
                    NoteKind::Triplet => 't',
                    NoteKind::Measure => 'm',
                };
                write!(f, "{value}{suffix}")?;
                if *dotted {
                    f.write_str(".")?;
                }
                Ok(())
            }
            TimeExpression::BarsBeatsSixteenths {
                bars,
                beats,
                sixteenths,
            } => write!(f, "{bars}:{beats}:{sixteenths}"),
            TimeExpression::Now => f.write_str("now"),
            TimeExpression::Relative { base, offset } => {
                if **base == TimeExpression::Now {
                    write!(f, "+{}", Nested(offset))
                } else {
                    write!(f, "({} + {})", Nested(base), Nested(offset))
                }
            }
            TimeExpression::Math { op, lhs, rhs } => {
                write!(f, "({} {} {})", Nested(lhs), op.symbol(), Nested(rhs))
            }
        }
    }
}

/// Display inside a larger expression, where the leading `+` shorthand for
/// relative times does not parse.
struct Nested<'a>(&'a TimeExpression);

impl fmt::Display for Nested<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            TimeExpression::Relative { base, offset } => {
                write!(f, "({} + {})", Nested(base), Nested(offset))
            }
            other => write!(f, "{other}"),
        }
    }
}

impl FromStr for TimeExpression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parser::parse(s)
    }
}

impl From<f64> for TimeExpression {
    fn from(seconds: f64) -> Self {
        TimeExpression::Seconds(seconds)
    }
}

/// Anything accepted where a time is expected.
pub trait IntoTimeExpression {
    fn into_time_expression(self) -> Result<TimeExpression>;
}

impl IntoTimeExpression for TimeExpression {
    fn into_time_expression(self) -> Result<TimeExpression> {
        Ok(self)
    }
}

impl IntoTimeExpression for &TimeExpression {
    fn into_time_expression(self) -> Result<TimeExpression> {
        Ok(self.clone())
    }
}

impl IntoTimeExpression for f64 {
    fn into_time_expression(self) -> Result<TimeExpression> {
        Ok(TimeExpression::Seconds(self))
    }
}

impl IntoTimeExpression for &str {
    fn into_time_expression(self) -> Result<TimeExpression> {
        parser::parse(self)
    }
}

impl IntoTimeExpression for String {
    fn into_time_expression(self) -> Result<TimeExpression> {
        parser::parse(&self)
    }
}

impl IntoTimeExpression for &String {
    fn into_time_expression(self) -> Result<TimeExpression> {
        parser::parse(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::context::TimeSignature;

    fn eval(input: &str, ctx: &TimeContext) -> f64 {
        TimeExpression::parse(input).unwrap().evaluate(ctx).unwrap()
    }

    #[test]
    fn test_note_durations_at_120_bpm() {
        let ctx = TimeContext::default();
        assert!((eval("4n", &ctx) - 0.5).abs() < 1e-12);
        assert!((eval("8n", &ctx) - 0.25).abs() < 1e-12);
        assert!((eval("4n.", &ctx) - 0.75).abs() < 1e-12);
        assert!((eval("1n", &ctx) - 2.0).abs() < 1e-12);
        assert!((eval("1m", &ctx) - 2.0).abs() < 1e-12);
        assert!((eval("2m", &ctx) - 4.0).abs() < 1e-12);
        // Eighth-note triplet: a third of a quarter note.
        assert!((eval("8t", &ctx) - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_measure_follows_time_signature() {
        let ctx = TimeContext {
            time_signature: TimeSignature::new(3, 4),
            ..TimeContext::default()
        };
        assert!((eval("1m", &ctx) - 1.5).abs() < 1e-12);
        assert!((eval("1:0:0", &ctx) - 1.5).abs() < 1e-12);
        assert!((eval("1:1:2", &ctx) - (1.5 + 0.5 + 0.25)).abs() < 1e-12);
    }

    #[test]
    fn test_other_units() {
        let ctx = TimeContext::default();
        assert!((eval("2hz", &ctx) - 0.5).abs() < 1e-12);
        assert!((eval("192i", &ctx) - 0.5).abs() < 1e-12);
        assert!((eval("44100samples", &ctx) - 1.0).abs() < 1e-12);
        assert!((eval("1.5s", &ctx) - 1.5).abs() < 1e-12);
        assert!((eval("0.25", &ctx) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_relative_and_math() {
        let ctx = TimeContext::default().at(10.0);
        assert!((eval("+4n", &ctx) - 10.5).abs() < 1e-12);
        assert!((eval("4n + 8n", &ctx) - 0.75).abs() < 1e-12);
        assert!((eval("1m - 4n", &ctx) - 1.5).abs() < 1e-12);
        assert!((eval("4n * 3", &ctx) - 1.5).abs() < 1e-12);
        assert!((eval("(1m + 4n) / 2", &ctx) - 1.25).abs() < 1e-12);
        assert!((eval("1 + 2 * 3", &ctx) - 7.0).abs() < 1e-12);
        assert!(TimeExpression::parse("+4n").unwrap().is_relative());
        assert!(!TimeExpression::parse("4n").unwrap().is_relative());
    }

    #[test]
    fn test_evaluation_errors() {
        let ctx = TimeContext::default();
        let zero_hz = TimeExpression::Frequency(0.0);
        assert!(matches!(zero_hz.evaluate(&ctx), Err(Error::Domain(_))));
        let div = TimeExpression::parse("1 / 0").unwrap();
        assert!(matches!(div.evaluate(&ctx), Err(Error::Domain(_))));
        let negative = TimeExpression::parse("1 - 2").unwrap();
        assert!(matches!(negative.to_duration(&ctx), Err(Error::OutOfRange(_))));
        assert!((negative.evaluate(&ctx).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_to_ticks() {
        let ctx = TimeContext::default();
        let ticks = |s: &str| TimeExpression::parse(s).unwrap().to_ticks(&ctx).unwrap();
        assert!((ticks("4n") - 192.0).abs() < 1e-9);
        assert!((ticks("1m") - 768.0).abs() < 1e-9);
        assert!((ticks("0:1:2") - 288.0).abs() < 1e-9);
        assert!((ticks("0.5") - 192.0).abs() < 1e-9);
        assert!((ticks("1m + 4n") - 960.0).abs() < 1e-9);
        assert!((ticks("10i") - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_display_reparses_to_same_value() {
        let ctx = TimeContext::default().at(3.0);
        for input in [
            "4n", "8n.", "16t", "3m", "1:2:3", "2hz", "96i", "0.125", "+4n", "(1m + 4n) * 2",
            "1 - -0.5", "22050samples",
        ] {
            let expr = TimeExpression::parse(input).unwrap();
            let again = TimeExpression::parse(&expr.to_string()).unwrap();
            assert_eq!(expr, again, "display of {input} did not round trip");
            let a = expr.evaluate(&ctx).unwrap();
            let b = again.evaluate(&ctx).unwrap();
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_display_of_nested_relative_time() {
        let ctx = TimeContext::default().at(3.0);
        let expr = TimeExpression::math(
            Op::Add,
            TimeExpression::relative(TimeExpression::notation(4.0, NoteKind::Note)),
            TimeExpression::Seconds(1.0),
        );
        let text = expr.to_string();
        assert_eq!(text, "((now + 4n) + 1)");
        let again = TimeExpression::parse(&text).unwrap();
        assert!((again.evaluate(&ctx).unwrap() - 4.5).abs() < 1e-12);
        assert!(again.is_relative());

        let top = TimeExpression::relative(TimeExpression::math(
            Op::Mul,
            TimeExpression::relative(TimeExpression::Seconds(0.5)),
            TimeExpression::Seconds(2.0),
        ));
        let again = TimeExpression::parse(&top.to_string()).unwrap();
        assert!((again.evaluate(&ctx).unwrap() - top.evaluate(&ctx).unwrap()).abs() < 1e-12);
    }

    #[test]
    fn test_into_time_expression() {
        let ctx = TimeContext::default();
        let a = 0.5_f64.into_time_expression().unwrap();
        let b = "4n".into_time_expression().unwrap();
        let c = String::from("192i").into_time_expression().unwrap();
        for expr in [a, b, c] {
            assert!((expr.evaluate(&ctx).unwrap() - 0.5).abs() < 1e-12);
        }
        assert!("4x".into_time_expression().is_err());
    }
}
