//! Tempo context used to resolve musical time into seconds.

use serde::{Deserialize, Serialize};

/// Default ticks per quarter note.
pub const DEFAULT_PPQ: u32 = 192;

/// Default tempo in beats per minute.
pub const DEFAULT_BPM: f64 = 120.0;

/// Default sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: f64 = 44_100.0;

/// Musical time signature (numerator/denominator).
///
/// The numerator indicates beats per bar, and the denominator indicates
/// the note value that gets one beat (4 = quarter note, 8 = eighth note).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[u32; 2]", into = "[u32; 2]")]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    /// Create a new time signature.
    ///
    /// Values are clamped to at least 1 to prevent division by zero.
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator: numerator.max(1),
            denominator: denominator.max(1),
        }
    }

    /// Calculate the number of quarter-note beats per bar.
    ///
    /// For 4/4: 4 beats per bar
    /// For 3/4: 3 beats per bar
    /// For 6/8: 3 beats per bar (6 eighth notes = 3 quarter notes)
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 * (4.0 / self.denominator as f64)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

impl TryFrom<[u32; 2]> for TimeSignature {
    type Error = String;

    fn try_from(parts: [u32; 2]) -> std::result::Result<Self, Self::Error> {
        match parts {
            [0, _] | [_, 0] => Err(format!(
                "time signature parts must be positive, got {}/{}",
                parts[0], parts[1]
            )),
            [numerator, denominator] => Ok(Self::new(numerator, denominator)),
        }
    }
}

impl From<TimeSignature> for [u32; 2] {
    fn from(signature: TimeSignature) -> Self {
        [signature.numerator, signature.denominator]
    }
}

impl std::fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Everything needed to turn a time expression into seconds.
///
/// `now` is the reference for relative (`+`) expressions. Notation is
/// resolved at the constant `bpm`; tempo automation is handled by the clock,
/// not here.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeContext {
    pub now: f64,
    pub bpm: f64,
    pub ppq: u32,
    pub time_signature: TimeSignature,
    pub sample_rate: f64,
}

impl Default for TimeContext {
    fn default() -> Self {
        Self {
            now: 0.0,
            bpm: DEFAULT_BPM,
            ppq: DEFAULT_PPQ,
            time_signature: TimeSignature::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl TimeContext {
    /// A context at `bpm` with every other field at its default.
    pub fn with_bpm(bpm: f64) -> Self {
        Self {
            bpm,
            ..Self::default()
        }
    }

    /// Same context with a different reference time.
    pub fn at(mut self, now: f64) -> Self {
        self.now = now;
        self
    }

    /// Seconds per quarter note.
    pub fn quarter_seconds(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Quarter-note beats per bar.
    pub fn beats_per_bar(&self) -> f64 {
        self.time_signature.beats_per_bar()
    }

    pub fn beats_to_seconds(&self, beats: f64) -> f64 {
        beats * self.quarter_seconds()
    }

    pub fn seconds_to_beats(&self, seconds: f64) -> f64 {
        seconds / self.quarter_seconds()
    }

    pub fn ticks_to_seconds(&self, ticks: f64) -> f64 {
        self.beats_to_seconds(ticks / self.ppq as f64)
    }

    pub fn seconds_to_ticks(&self, seconds: f64) -> f64 {
        self.seconds_to_beats(seconds) * self.ppq as f64
    }
}
