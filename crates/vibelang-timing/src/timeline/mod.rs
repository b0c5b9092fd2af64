//! Time-ordered event containers.
//!
//! - [`Timeline`] - sorted sequence of timed events with binary-search queries
//! - [`TimelineState`] - a timeline of playback state transitions
//! - [`IntervalTimeline`] - interval tree answering "what covers time T"
//!
//! Times are plain `f64` values; whether they are seconds or ticks depends on
//! the owner of the timeline.

pub mod interval;
pub mod state;

pub use interval::{IntervalEvent, IntervalId, IntervalTimeline};
pub use state::{PlaybackState, StateEvent, TimelineState};

/// Anything that can be stored on a [`Timeline`].
pub trait Timed {
    /// The ordering key of this event.
    fn time(&self) -> f64;
}

/// A sorted container of timed events.
///
/// Events are kept in non-decreasing time order. Events with equal times are
/// kept in insertion order. All lookups are binary searches on the backing
/// vector.
///
/// An optional `memory` bound caps the number of retained events; when an
/// insertion pushes the length past the bound, the oldest events are evicted.
#[derive(Clone, Debug)]
pub struct Timeline<T> {
    events: Vec<T>,
    memory: Option<usize>,
}

impl<T: Timed> Default for Timeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Timed> Timeline<T> {
    /// Create an unbounded timeline.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            memory: None,
        }
    }

    /// Create a timeline retaining at most `memory` events.
    pub fn with_memory(memory: usize) -> Self {
        Self {
            events: Vec::new(),
            memory: Some(memory.max(1)),
        }
    }

    /// Number of events on the timeline.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the timeline holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The retention bound, if any.
    pub fn memory(&self) -> Option<usize> {
        self.memory
    }

    /// Change the retention bound. Shrinking evicts the oldest events.
    pub fn set_memory(&mut self, memory: Option<usize>) {
        self.memory = memory.map(|m| m.max(1));
        self.evict();
    }

    /// Insert an event, keeping time order. Equal times keep insertion order.
    pub fn add(&mut self, event: T) {
        debug_assert!(!event.time().is_nan(), "timeline events need a comparable time");
        let index = self.upper_bound(event.time());
        self.events.insert(index, event);
        self.evict();
        self.debug_check_order();
    }

    /// Insert an event, replacing the first event at exactly the same time
    /// for which `same` returns true.
    ///
    /// Without a match the event goes after the existing events at its time.
    /// Returns the index the event ended up at.
    pub fn add_or_replace<F>(&mut self, event: T, same: F) -> Option<usize>
    where
        F: Fn(&T, &T) -> bool,
    {
        let time = event.time();
        let start = self.lower_bound(time);
        let end = self.upper_bound(time);
        if let Some(offset) = self.events[start..end].iter().position(|e| same(e, &event)) {
            self.events[start + offset] = event;
            return Some(start + offset);
        }
        self.add(event);
        self.search(time)
    }

    /// The last event whose time is less than or equal to `time`.
    pub fn get(&self, time: f64) -> Option<&T> {
        self.search(time).map(|i| &self.events[i])
    }

    /// Mutable access to the last event at or before `time`.
    pub fn get_mut(&mut self, time: f64) -> Option<&mut T> {
        self.search(time).map(move |i| &mut self.events[i])
    }

    /// The first event whose time is strictly greater than `time`.
    pub fn get_after(&self, time: f64) -> Option<&T> {
        self.events.get(self.upper_bound(time))
    }

    /// The last event whose time is strictly less than `time`.
    pub fn get_before(&self, time: f64) -> Option<&T> {
        let index = self.lower_bound(time);
        index.checked_sub(1).map(|i| &self.events[i])
    }

    /// The event preceding the one at `index`.
    pub fn previous_event(&self, index: usize) -> Option<&T> {
        index
            .checked_sub(1)
            .and_then(|i| self.events.get(i))
    }

    /// Index of the last event at or before `time`.
    pub fn search(&self, time: f64) -> Option<usize> {
        self.upper_bound(time).checked_sub(1)
    }

    /// Event by index (in time order).
    pub fn get_index(&self, index: usize) -> Option<&T> {
        self.events.get(index)
    }

    /// The earliest event, without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.events.first()
    }

    /// Mutable access to the earliest event. Changing its time must keep the
    /// order.
    pub fn peek_mut(&mut self) -> Option<&mut T> {
        self.events.first_mut()
    }

    /// The latest event.
    pub fn last(&self) -> Option<&T> {
        self.events.last()
    }

    /// Remove and return the earliest event.
    pub fn shift(&mut self) -> Option<T> {
        if self.events.is_empty() {
            None
        } else {
            Some(self.events.remove(0))
        }
    }

    /// Remove the first event matching the predicate.
    pub fn remove_by<F>(&mut self, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let index = self.events.iter().position(|e| predicate(e))?;
        Some(self.events.remove(index))
    }

    /// Keep only the events matching the predicate.
    pub fn retain<F>(&mut self, predicate: F)
    where
        F: FnMut(&T) -> bool,
    {
        self.events.retain(predicate);
    }

    /// Remove every event at or after `after`.
    ///
    /// Only events with `time < after` remain.
    pub fn cancel(&mut self, after: f64) {
        let index = self.lower_bound(after);
        self.events.truncate(index);
    }

    /// Evict the oldest events before `time` until at most `bound` remain.
    ///
    /// Events at or after `time` are never evicted, so the timeline can stay
    /// above the bound. Returns how many events were evicted.
    pub fn trim_before(&mut self, time: f64, bound: usize) -> usize {
        let excess = self.events.len().saturating_sub(bound);
        let count = excess.min(self.lower_bound(time));
        self.events.drain(..count);
        count
    }

    /// Remove every event at or before `time`.
    pub fn cancel_before(&mut self, time: f64) {
        let index = self.upper_bound(time);
        self.events.drain(..index);
    }

    /// Remove all events.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// All events in time order.
    pub fn as_slice(&self) -> &[T] {
        &self.events
    }

    /// Iterate over all events in time order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.events.iter()
    }

    /// Events with `time <= time`.
    pub fn before_or_at(&self, time: f64) -> &[T] {
        &self.events[..self.upper_bound(time)]
    }

    /// Events with `time > time`.
    pub fn after(&self, time: f64) -> &[T] {
        &self.events[self.upper_bound(time)..]
    }

    /// Events with `time >= time`.
    pub fn at_or_after(&self, time: f64) -> &[T] {
        &self.events[self.lower_bound(time)..]
    }

    /// Events exactly at `time`.
    pub fn at_time(&self, time: f64) -> &[T] {
        &self.events[self.lower_bound(time)..self.upper_bound(time)]
    }

    /// Events in `[start, end)`.
    pub fn between(&self, start: f64, end: f64) -> &[T] {
        let from = self.lower_bound(start);
        let to = self.lower_bound(end).max(from);
        &self.events[from..to]
    }

    /// Visit every event in time order.
    pub fn for_each<F: FnMut(&T)>(&self, callback: F) {
        self.events.iter().for_each(callback);
    }

    /// Visit events with `time <= time`.
    pub fn for_each_before<F: FnMut(&T)>(&self, time: f64, callback: F) {
        self.before_or_at(time).iter().for_each(callback);
    }

    /// Visit events with `time > time`.
    pub fn for_each_after<F: FnMut(&T)>(&self, time: f64, callback: F) {
        self.after(time).iter().for_each(callback);
    }

    /// Visit events with `time >= time`.
    pub fn for_each_from<F: FnMut(&T)>(&self, time: f64, callback: F) {
        self.at_or_after(time).iter().for_each(callback);
    }

    /// Visit events exactly at `time`.
    pub fn for_each_at_time<F: FnMut(&T)>(&self, time: f64, callback: F) {
        self.at_time(time).iter().for_each(callback);
    }

    /// Remove the first event equal to `event`.
    pub fn remove(&mut self, event: &T) -> Option<T>
    where
        T: PartialEq,
    {
        let start = self.lower_bound(event.time());
        let end = self.upper_bound(event.time());
        let offset = self.events[start..end].iter().position(|e| e == event)?;
        Some(self.events.remove(start + offset))
    }

    /// First index whose event time is `>= time`.
    fn lower_bound(&self, time: f64) -> usize {
        self.events.partition_point(|e| e.time() < time)
    }

    /// First index whose event time is `> time`.
    fn upper_bound(&self, time: f64) -> usize {
        self.events.partition_point(|e| e.time() <= time)
    }

    fn evict(&mut self) {
        if let Some(memory) = self.memory {
            if self.events.len() > memory {
                let excess = self.events.len() - memory;
                self.events.drain(..excess);
            }
        }
    }

    fn debug_check_order(&self) {
        debug_assert!(
            self.events.windows(2).all(|w| w[0].time() <= w[1].time()),
            "timeline order invariant violated"
        );
    }
}

impl<'a, T: Timed> IntoIterator for &'a Timeline<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
