//! Unit policy for automated parameters.

use std::fmt;

use crate::error::{Error, Result};

/// What a parameter's values mean.
///
/// The unit decides the accepted range, whether values are converted before
/// being stored, and which curve `ramp_to` picks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Unit {
    #[default]
    Number,
    Gain,
    /// Decibels on the API, linear gain internally.
    Decibels,
    /// 0 to 1.
    NormalRange,
    /// -1 to 1.
    AudioRange,
    Positive,
    Frequency,
    Bpm,
    Time,
}

impl Unit {
    /// Smallest accepted value, in API units.
    pub fn min_value(&self) -> f64 {
        match self {
            Unit::NormalRange
            | Unit::Positive
            | Unit::Frequency
            | Unit::Bpm
            | Unit::Time => 0.0,
            Unit::AudioRange => -1.0,
            Unit::Number | Unit::Gain | Unit::Decibels => f64::NEG_INFINITY,
        }
    }

    /// Largest accepted value, in API units.
    pub fn max_value(&self) -> f64 {
        match self {
            Unit::NormalRange | Unit::AudioRange => 1.0,
            _ => f64::INFINITY,
        }
    }

    /// Reject values outside the unit's range.
    pub fn validate(&self, value: f64) -> Result<()> {
        if value.is_nan() {
            return Err(Error::OutOfRange(format!("{self} value is NaN")));
        }
        if value < self.min_value() || value > self.max_value() {
            return Err(Error::OutOfRange(format!(
                "{value} is outside the {self} range [{}, {}]",
                self.min_value(),
                self.max_value()
            )));
        }
        Ok(())
    }

    /// Whether `ramp_to` should use an exponential curve for this unit.
    pub fn prefers_exponential(&self) -> bool {
        matches!(self, Unit::Frequency | Unit::Bpm | Unit::Decibels)
    }

    /// Convert an API value to the stored representation.
    pub fn to_internal(&self, value: f64) -> f64 {
        match self {
            Unit::Decibels => db_to_gain(value),
            _ => value,
        }
    }

    /// Convert a stored value back to API units.
    pub fn from_internal(&self, value: f64) -> f64 {
        match self {
            Unit::Decibels => gain_to_db(value),
            _ => value,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Unit::Number => "number",
            Unit::Gain => "gain",
            Unit::Decibels => "decibels",
            Unit::NormalRange => "normalRange",
            Unit::AudioRange => "audioRange",
            Unit::Positive => "positive",
            Unit::Frequency => "frequency",
            Unit::Bpm => "bpm",
            Unit::Time => "time",
        };
        f.write_str(name)
    }
}

/// Convert decibels to linear gain.
pub fn db_to_gain(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Convert linear gain to decibels.
pub fn gain_to_db(gain: f64) -> f64 {
    20.0 * gain.log10()
}
