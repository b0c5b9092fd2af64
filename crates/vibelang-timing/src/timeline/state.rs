//! Playback state stored along a timeline.
//!
//! State transitions are timeline events, so "what was the state at time T"
//! is a lookup rather than a read of mutable fields. This is what lets the
//! clock answer queries about scheduled, not-yet-reached transitions.

use std::fmt;

use super::{Timed, Timeline};

/// Playback state of a clock or transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Started,
    Paused,
}

impl PlaybackState {
    /// Check if this is the started state.
    pub fn is_started(&self) -> bool {
        matches!(self, PlaybackState::Started)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Started => "started",
            PlaybackState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// A state transition at a point in time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StateEvent {
    pub time: f64,
    pub state: PlaybackState,
}

impl Timed for StateEvent {
    fn time(&self) -> f64 {
        self.time
    }
}

/// A timeline of [`StateEvent`]s with an initial state.
#[derive(Clone, Debug)]
pub struct TimelineState {
    events: Timeline<StateEvent>,
    initial: PlaybackState,
}

impl Default for TimelineState {
    fn default() -> Self {
        Self::new(PlaybackState::Stopped)
    }
}

impl TimelineState {
    /// Create a state timeline that reports `initial` before any event.
    pub fn new(initial: PlaybackState) -> Self {
        Self {
            events: Timeline::new(),
            initial,
        }
    }

    /// Create a state timeline that retains at most `memory` transitions.
    pub fn with_memory(initial: PlaybackState, memory: usize) -> Self {
        Self {
            events: Timeline::with_memory(memory),
            initial,
        }
    }

    /// Add a state transition at `time`.
    pub fn set_state_at_time(&mut self, state: PlaybackState, time: f64) {
        self.events.add(StateEvent { time, state });
    }

    /// The state scheduled at or before `time`.
    pub fn get_value_at_time(&self, time: f64) -> PlaybackState {
        self.events
            .get(time)
            .map(|e| e.state)
            .unwrap_or(self.initial)
    }

    /// The latest event at or before `time` whose state is `state`.
    pub fn get_last_state(&self, state: PlaybackState, time: f64) -> Option<&StateEvent> {
        self.events
            .before_or_at(time)
            .iter()
            .rev()
            .find(|e| e.state == state)
    }

    /// The earliest event at or after `time` whose state is `state`.
    pub fn get_next_state(&self, state: PlaybackState, time: f64) -> Option<&StateEvent> {
        self.events
            .at_or_after(time)
            .iter()
            .find(|e| e.state == state)
    }

    /// The latest transition at or before `time`.
    pub fn get(&self, time: f64) -> Option<&StateEvent> {
        self.events.get(time)
    }

    /// Transitions in `[start, end)`.
    pub fn between(&self, start: f64, end: f64) -> &[StateEvent] {
        self.events.between(start, end)
    }

    /// Remove all transitions at or after `after`.
    pub fn cancel(&mut self, after: f64) {
        self.events.cancel(after);
    }

    /// The underlying timeline.
    pub fn events(&self) -> &Timeline<StateEvent> {
        &self.events
    }

    /// The state reported before the first transition.
    pub fn initial(&self) -> PlaybackState {
        self.initial
    }

    /// Drop every transition.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_when_empty() {
        let state = TimelineState::new(PlaybackState::Stopped);
        assert_eq!(state.get_value_at_time(0.0), PlaybackState::Stopped);
        assert_eq!(state.get_value_at_time(100.0), PlaybackState::Stopped);

        let paused = TimelineState::new(PlaybackState::Paused);
        assert_eq!(paused.get_value_at_time(1.0), PlaybackState::Paused);
    }

    #[test]
    fn test_state_lookup_at_future_times() {
        let mut state = TimelineState::default();
        state.set_state_at_time(PlaybackState::Started, 1.0);
        state.set_state_at_time(PlaybackState::Paused, 2.0);
        state.set_state_at_time(PlaybackState::Started, 3.0);
        state.set_state_at_time(PlaybackState::Stopped, 4.0);

        assert_eq!(state.get_value_at_time(0.5), PlaybackState::Stopped);
        assert_eq!(state.get_value_at_time(1.0), PlaybackState::Started);
        assert_eq!(state.get_value_at_time(2.5), PlaybackState::Paused);
        assert_eq!(state.get_value_at_time(3.5), PlaybackState::Started);
        assert_eq!(state.get_value_at_time(9.0), PlaybackState::Stopped);
    }

    #[test]
    fn test_last_and_next_state() {
        let mut state = TimelineState::default();
        state.set_state_at_time(PlaybackState::Stopped, 0.0);
        state.set_state_at_time(PlaybackState::Started, 1.0);
        state.set_state_at_time(PlaybackState::Paused, 2.0);
        state.set_state_at_time(PlaybackState::Started, 3.0);

        let last = state.get_last_state(PlaybackState::Started, 2.5);
        assert_eq!(last.map(|e| e.time), Some(1.0));
        let last = state.get_last_state(PlaybackState::Started, 3.0);
        assert_eq!(last.map(|e| e.time), Some(3.0));
        assert!(state.get_last_state(PlaybackState::Paused, 1.5).is_none());

        let next = state.get_next_state(PlaybackState::Started, 1.5);
        assert_eq!(next.map(|e| e.time), Some(3.0));
        assert!(state.get_next_state(PlaybackState::Stopped, 0.5).is_none());
    }

    #[test]
    fn test_cancel_removes_future_transitions() {
        let mut state = TimelineState::default();
        state.set_state_at_time(PlaybackState::Started, 1.0);
        state.set_state_at_time(PlaybackState::Stopped, 2.0);
        state.cancel(2.0);
        assert_eq!(state.get_value_at_time(5.0), PlaybackState::Started);
    }

    #[test]
    fn test_display() {
        assert_eq!(PlaybackState::Started.to_string(), "started");
        assert_eq!(PlaybackState::Paused.to_string(), "paused");
        assert!(PlaybackState::Started.is_started());
        assert!(!PlaybackState::Stopped.is_started());
    }
}
