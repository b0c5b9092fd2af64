//! Per-callback switches shared by loops, parts and sequences.
//!
//! - [`Humanize`] - random variation of the time a callback receives
//! - `Trigger` - mute, probability and humanize, read every time the
//!   wrapped callback fires

use std::sync::{Arc, RwLock};

use rand::Rng;

use super::event::Callback;
use crate::error::{Error, Result};

/// Variation of [`Humanize::On`], in seconds either way.
pub const DEFAULT_HUMANIZE: f64 = 0.01;

/// Random variation of the callback time.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Humanize {
    #[default]
    Off,
    /// Up to [`DEFAULT_HUMANIZE`] seconds early or late.
    On,
    /// Up to the given number of seconds early or late.
    By(f64),
}

impl Humanize {
    /// Largest shift in seconds.
    pub fn amount(&self) -> f64 {
        match self {
            Humanize::Off => 0.0,
            Humanize::On => DEFAULT_HUMANIZE,
            Humanize::By(seconds) => *seconds,
        }
    }
}

impl From<bool> for Humanize {
    fn from(on: bool) -> Self {
        if on {
            Humanize::On
        } else {
            Humanize::Off
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Settings {
    mute: bool,
    probability: f64,
    humanize: Humanize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mute: false,
            probability: 1.0,
            humanize: Humanize::Off,
        }
    }
}

impl Settings {
    /// The time to call back with, or `None` when this call is skipped.
    fn resolve<R: Rng + ?Sized>(&self, time: f64, rng: &mut R) -> Option<f64> {
        if self.mute {
            return None;
        }
        if self.probability < 1.0 && rng.random::<f64>() >= self.probability {
            return None;
        }
        let amount = self.humanize.amount();
        if amount > 0.0 {
            Some(time + rng.random_range(-amount..=amount))
        } else {
            Some(time)
        }
    }
}

/// Settings handle cloned into every callback it wraps. Changes apply to
/// calls already on the timeline.
#[derive(Clone, Default)]
pub(crate) struct Trigger {
    settings: Arc<RwLock<Settings>>,
}

impl Trigger {
    fn current(&self) -> Settings {
        *self.settings.read().expect("State lock poisoned")
    }

    fn update(&self, f: impl FnOnce(&mut Settings)) {
        let mut settings = self.settings.write().expect("State lock poisoned");
        f(&mut settings);
    }

    pub fn mute(&self) -> bool {
        self.current().mute
    }

    pub fn set_mute(&self, mute: bool) {
        self.update(|s| s.mute = mute);
    }

    pub fn probability(&self) -> f64 {
        self.current().probability
    }

    pub fn set_probability(&self, probability: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(Error::OutOfRange(format!(
                "probability must be between 0 and 1, got {probability}"
            )));
        }
        self.update(|s| s.probability = probability);
        Ok(())
    }

    pub fn humanize(&self) -> Humanize {
        self.current().humanize
    }

    pub fn set_humanize(&self, humanize: Humanize) -> Result<()> {
        let amount = humanize.amount();
        if !(amount.is_finite() && amount >= 0.0) {
            return Err(Error::OutOfRange(format!(
                "humanize amount must be a non-negative number of seconds, got {amount}"
            )));
        }
        self.update(|s| s.humanize = humanize);
        Ok(())
    }

    /// A callback that consults the settings before calling `callback`.
    pub fn wrap(&self, callback: Callback) -> Callback {
        let settings = self.settings.clone();
        Arc::new(move |time| {
            let current = *settings.read().expect("State lock poisoned");
            match current.resolve(time, &mut rand::rng()) {
                Some(time) => callback(time),
                None => log::trace!("[TRANSPORT] Skipped callback at {time:.3}s"),
            }
        })
    }
}
