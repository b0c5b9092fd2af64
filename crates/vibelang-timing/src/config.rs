//! Engine configuration.
//!
//! Configuration is stored in TOML. Every field has a default, so an empty
//! file is a valid configuration:
//!
//! ```toml
//! ppq = 192
//! bpm = 120.0
//! time_signature = [4, 4]
//! sample_rate = 44100.0
//! lookahead = "100ms"
//! update_interval = "25ms"
//! # timeline_memory = 1000
//! # state_memory = 100
//! ```

use crate::error::{Error, Result};
use crate::time::{TimeContext, TimeSignature, DEFAULT_BPM, DEFAULT_PPQ, DEFAULT_SAMPLE_RATE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Settings for a [`SchedulingContext`](crate::SchedulingContext) and the
/// transport it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ticks per quarter note
    pub ppq: u32,
    /// Initial tempo in beats per minute
    pub bpm: f64,
    /// Time signature as `[numerator, denominator]`
    pub time_signature: TimeSignature,
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// How far ahead of the time source events are dispatched
    pub lookahead: String,
    /// How often the scheduling thread wakes up
    pub update_interval: String,
    /// Retention bound for passed transport events and tempo points.
    /// Events still ahead of playback are never dropped.
    pub timeline_memory: Option<usize>,
    /// Retention bound for clock state transitions
    pub state_memory: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ppq: DEFAULT_PPQ,
            bpm: DEFAULT_BPM,
            time_signature: TimeSignature::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            lookahead: "100ms".to_string(),
            update_interval: "25ms".to_string(),
            timeline_memory: None,
            state_memory: None,
        }
    }
}

impl EngineConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Config(format!("Config file not found at {:?}", path)));
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load a configuration file or fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Using default engine configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ppq == 0 {
            return Err(Error::Config("ppq must be positive".to_string()));
        }
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(Error::Config(format!("bpm must be positive, got {}", self.bpm)));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(Error::Config(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.time_signature.numerator == 0 || self.time_signature.denominator == 0 {
            return Err(Error::Config(format!(
                "time_signature parts must be positive, got {}",
                self.time_signature
            )));
        }
        if self.timeline_memory == Some(0) || self.state_memory == Some(0) {
            return Err(Error::Config("memory bounds must be at least 1".to_string()));
        }
        self.lookahead_duration()?;
        if self.update_interval_duration()?.is_zero() {
            return Err(Error::Config("update_interval must be positive".to_string()));
        }
        Ok(())
    }

    /// The lookahead window.
    pub fn lookahead_duration(&self) -> Result<Duration> {
        parse_duration("lookahead", &self.lookahead)
    }

    /// The scheduling thread's wake-up interval.
    pub fn update_interval_duration(&self) -> Result<Duration> {
        parse_duration("update_interval", &self.update_interval)
    }

    /// Tempo context at time 0 for evaluating time expressions.
    pub fn time_context(&self) -> TimeContext {
        TimeContext {
            now: 0.0,
            bpm: self.bpm,
            ppq: self.ppq,
            time_signature: self.time_signature,
            sample_rate: self.sample_rate,
        }
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| Error::Config(format!("{field} '{value}' is not a duration: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.ppq, 192);
        assert_eq!(config.time_signature, TimeSignature::new(4, 4));
        assert_eq!(config.lookahead_duration().unwrap(), Duration::from_millis(100));
        assert_eq!(config.update_interval_duration().unwrap(), Duration::from_millis(25));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
bpm = 90.0
time_signature = [6, 8]
lookahead = "50ms"
"#,
        )
        .unwrap();
        assert!((config.bpm - 90.0).abs() < 1e-12);
        assert!((config.time_signature.beats_per_bar() - 3.0).abs() < 1e-12);
        assert_eq!(config.ppq, 192);
        assert_eq!(config.lookahead_duration().unwrap(), Duration::from_millis(50));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            EngineConfig::from_toml_str("ppq = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("bpm = -1.0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("lookahead = \"soon\""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("update_interval = \"0s\""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("bpm = \"fast\""),
            Err(Error::TomlParse(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("time_signature = [0, 4]"),
            Err(Error::TomlParse(_))
        ));
        let zero = EngineConfig {
            time_signature: TimeSignature {
                numerator: 3,
                denominator: 0,
            },
            ..EngineConfig::default()
        };
        assert!(matches!(zero.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.toml");
        let config = EngineConfig {
            bpm: 140.0,
            timeline_memory: Some(64),
            ..EngineConfig::default()
        };
        config.save(&path).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(EngineConfig::load(&missing), Err(Error::Config(_))));
        assert_eq!(EngineConfig::load_or_default(&missing), EngineConfig::default());
    }
}
