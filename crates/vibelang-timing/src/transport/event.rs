//! Scheduled callbacks and the dispatches they produce.

use std::fmt;
use std::sync::Arc;

use crate::timeline::Timed;

/// A callback invoked with the exact time its event was scheduled for.
pub type Callback = Arc<dyn Fn(f64) + Send + Sync>;

/// Handle returned by the scheduling methods, used to clear the event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub(crate) u64);

impl EventId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EventKind {
    /// Stays on the timeline and fires every time the transport passes it.
    Persistent,
    /// Removed after it fires.
    Once,
    /// The pending occurrence of a repeat, replaced by the next one on firing.
    Occurrence,
}

/// An entry on the transport timeline, keyed by tick.
#[derive(Clone)]
pub(crate) struct ScheduledEvent {
    pub id: EventId,
    pub ticks: f64,
    pub kind: EventKind,
    pub callback: Callback,
}

impl Timed for ScheduledEvent {
    fn time(&self) -> f64 {
        self.ticks
    }
}

impl fmt::Debug for ScheduledEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledEvent")
            .field("id", &self.id)
            .field("ticks", &self.ticks)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Payload of a repeat on the interval timeline. The interval's start and
/// duration are in ticks.
#[derive(Clone)]
pub(crate) struct RepeatEvent {
    pub id: EventId,
    pub interval: f64,
    pub callback: Callback,
}

impl RepeatEvent {
    /// First occurrence at or after `ticks` for a repeat starting at `start`.
    pub fn next_at_or_after(&self, start: f64, ticks: f64) -> f64 {
        if ticks <= start {
            return start;
        }
        let periods = ((ticks - start) / self.interval - 1e-6).ceil();
        start + periods * self.interval
    }

    /// The occurrence following the one that fired at `fired`.
    pub fn next_after(&self, start: f64, fired: f64) -> f64 {
        let index = ((fired - start) / self.interval).round();
        start + (index + 1.0) * self.interval
    }
}

/// A callback that is due, with the time it should take effect.
///
/// The time is the scheduled time, not the wall-clock time of dispatch, so
/// consumers can still act sample-accurately.
#[derive(Clone)]
pub struct Dispatch {
    pub id: EventId,
    /// Scheduled time in seconds, including swing.
    pub time: f64,
    /// Transport position the event fired at.
    pub ticks: u64,
    pub(crate) callback: Callback,
}

impl Dispatch {
    /// Invoke the callback with the scheduled time.
    pub fn fire(&self) {
        (self.callback)(self.time);
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("id", &self.id)
            .field("time", &self.time)
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}
