//! Valued events at offsets from a start, played and looped as one unit.
//!
//! - [`Part`] - a list of `(time, value)` events scheduled together
//! - [`Looping`] - whether and how often a part repeats its loop region

use std::sync::Arc;

use super::event::{Callback, EventId};
use super::trigger::{Humanize, Trigger};
use super::Transport;
use crate::error::{Error, Result};
use crate::time::{IntoTimeExpression, NoteKind, TimeExpression};
use crate::timeline::PlaybackState;

/// Called with the scheduled time and the event's value.
pub type PartCallback<T> = Arc<dyn Fn(f64, &T) + Send + Sync>;

/// How often a part plays its loop region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Looping {
    /// Play every event once per start.
    #[default]
    Off,
    Forever,
    /// Play the loop region this many times per start.
    Times(u32),
}

impl Looping {
    pub fn is_looping(&self) -> bool {
        !matches!(self, Looping::Off)
    }
}

impl From<bool> for Looping {
    fn from(looping: bool) -> Self {
        if looping {
            Looping::Forever
        } else {
            Looping::Off
        }
    }
}

struct Entry<T> {
    time: TimeExpression,
    value: Arc<T>,
}

/// One start of the part. Positions are part-relative ticks.
#[derive(Clone, Copy, Debug)]
struct Start {
    at: f64,
    /// Part position playing at `at`.
    offset: f64,
    /// Part ticks consumed by earlier segments of this start.
    played: f64,
    stop: f64,
}

/// A collection of valued events that start, stop and loop together.
///
/// Event times are offsets from the part's start. While looping, only
/// events inside `[loop_start, loop_end)` play, and a start offset is
/// folded into that region. Changes made while the part is scheduled
/// take effect right away.
pub struct Part<T> {
    callback: PartCallback<T>,
    trigger: Trigger,
    events: Vec<Entry<T>>,
    looping: Looping,
    loop_start: TimeExpression,
    loop_end: TimeExpression,
    playback_rate: f64,
    starts: Vec<Start>,
    scheduled: Vec<EventId>,
}

impl<T: Send + Sync + 'static> Part<T> {
    pub fn new<F, E>(callback: F, events: impl IntoIterator<Item = (E, T)>) -> Result<Self>
    where
        F: Fn(f64, &T) + Send + Sync + 'static,
        E: IntoTimeExpression,
    {
        let events = events
            .into_iter()
            .map(|(time, value)| {
                Ok(Entry {
                    time: time.into_time_expression()?,
                    value: Arc::new(value),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            callback: Arc::new(callback),
            trigger: Trigger::default(),
            events,
            looping: Looping::Off,
            loop_start: TimeExpression::Ticks(0.0),
            loop_end: TimeExpression::notation(1.0, NoteKind::Measure),
            playback_rate: 1.0,
            starts: Vec::new(),
            scheduled: Vec::new(),
        })
    }

    /// Loop the region from the start.
    pub fn with_looping(mut self, looping: impl Into<Looping>) -> Self {
        self.looping = looping.into();
        self
    }

    /// Set the loop region before the part is started.
    pub fn with_loop_points(
        mut self,
        start: impl IntoTimeExpression,
        end: impl IntoTimeExpression,
    ) -> Result<Self> {
        self.loop_start = start.into_time_expression()?;
        self.loop_end = end.into_time_expression()?;
        Ok(self)
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Add an event at `time` from the part's start.
    pub fn add(
        &mut self,
        transport: &mut Transport,
        time: impl IntoTimeExpression,
        value: T,
    ) -> Result<()> {
        let time = time.into_time_expression()?;
        transport.offset_ticks(&time)?;
        self.events.push(Entry {
            time,
            value: Arc::new(value),
        });
        self.reschedule(transport)
    }

    /// Remove every event at `time`. Returns how many were removed.
    pub fn remove(
        &mut self,
        transport: &mut Transport,
        time: impl IntoTimeExpression,
    ) -> Result<usize> {
        let target = transport.offset_ticks(time)?.round();
        let offsets = self.offsets(transport)?;
        let before = self.events.len();
        let mut index = 0;
        self.events.retain(|_| {
            let keep = offsets[index].round() != target;
            index += 1;
            keep
        });
        let removed = before - self.events.len();
        if removed > 0 {
            self.reschedule(transport)?;
        }
        Ok(removed)
    }

    /// Swap in a new event list and loop region in one reschedule.
    pub(crate) fn replace_events(
        &mut self,
        transport: &mut Transport,
        events: Vec<(TimeExpression, T)>,
        loop_end: TimeExpression,
    ) -> Result<()> {
        loop_span(transport, &self.loop_start, &loop_end)?;
        self.events = events
            .into_iter()
            .map(|(time, value)| Entry {
                time,
                value: Arc::new(value),
            })
            .collect();
        self.loop_end = loop_end;
        self.reschedule(transport)
    }

    /// Remove every event, keeping the part's starts.
    pub fn clear(&mut self, transport: &mut Transport) {
        self.events.clear();
        self.unschedule(transport);
    }

    /// Value of the first event at `time`.
    pub fn value_at(&self, transport: &Transport, time: impl IntoTimeExpression) -> Result<Option<&T>> {
        let target = transport.offset_ticks(time)?.round();
        let offsets = self.offsets(transport)?;
        Ok(self
            .events
            .iter()
            .zip(offsets)
            .find(|(_, ticks)| ticks.round() == target)
            .map(|(entry, _)| entry.value.as_ref()))
    }

    pub fn looping(&self) -> Looping {
        self.looping
    }

    pub fn set_looping(&mut self, transport: &mut Transport, looping: impl Into<Looping>) -> Result<()> {
        let looping = looping.into();
        if looping.is_looping() {
            loop_span(transport, &self.loop_start, &self.loop_end)?;
        }
        self.looping = looping;
        self.reschedule(transport)
    }

    pub fn loop_start(&self) -> &TimeExpression {
        &self.loop_start
    }

    pub fn loop_end(&self) -> &TimeExpression {
        &self.loop_end
    }

    /// Move the loop region. Rejected when the region spans less than a tick.
    pub fn set_loop_points(
        &mut self,
        transport: &mut Transport,
        start: impl IntoTimeExpression,
        end: impl IntoTimeExpression,
    ) -> Result<()> {
        let start = start.into_time_expression()?;
        let end = end.into_time_expression()?;
        loop_span(transport, &start, &end)?;
        self.loop_start = start;
        self.loop_end = end;
        self.reschedule(transport)
    }

    pub fn mute(&self) -> bool {
        self.trigger.mute()
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.trigger.set_mute(mute);
    }

    pub fn probability(&self) -> f64 {
        self.trigger.probability()
    }

    pub fn set_probability(&mut self, probability: f64) -> Result<()> {
        self.trigger.set_probability(probability)
    }

    pub fn humanize(&self) -> Humanize {
        self.trigger.humanize()
    }

    pub fn set_humanize(&mut self, humanize: impl Into<Humanize>) -> Result<()> {
        self.trigger.set_humanize(humanize.into())
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    /// Play faster or slower from the next unplayed position on.
    pub fn set_playback_rate(&mut self, transport: &mut Transport, rate: f64) -> Result<()> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(Error::OutOfRange(format!(
                "playback rate must be positive, got {rate}"
            )));
        }
        if let Some((_, span)) = self.region(transport)? {
            if span / rate < 1.0 {
                return Err(Error::OutOfRange(format!(
                    "loop must span at least one tick, got {}",
                    span / rate
                )));
            }
        }
        let at = transport.next_unprocessed_tick();
        for start in self.starts.iter_mut().filter(|s| s.at < at) {
            let elapsed = (at - start.at) * self.playback_rate;
            start.offset += elapsed;
            start.played += elapsed;
            start.at = at;
        }
        self.playback_rate = rate;
        self.reschedule(transport)
    }

    /// Start playing from the part's beginning at `time`.
    pub fn start(&mut self, transport: &mut Transport, time: impl IntoTimeExpression) -> Result<()> {
        self.start_at_offset(transport, time, 0.0)
    }

    /// Start playing at `time` from `offset` into the part.
    pub fn start_at_offset(
        &mut self,
        transport: &mut Transport,
        time: impl IntoTimeExpression,
        offset: impl IntoTimeExpression,
    ) -> Result<()> {
        let at = transport.event_ticks(time)?;
        let offset = transport.offset_ticks(offset)?;
        self.starts.push(Start {
            at,
            offset,
            played: 0.0,
            stop: f64::INFINITY,
        });
        log::debug!("[TRANSPORT] Part started at tick {at} from offset {offset}");
        self.reschedule(transport)
    }

    /// Stop playing at `time`. Events at exactly `time` are skipped.
    pub fn stop(&mut self, transport: &mut Transport, time: impl IntoTimeExpression) -> Result<()> {
        let at = transport.event_ticks(time)?;
        self.starts.retain(|s| s.at < at);
        for start in &mut self.starts {
            start.stop = start.stop.min(at);
        }
        self.reschedule(transport)
    }

    /// Forget every start at or after `after`.
    pub fn cancel(&mut self, transport: &mut Transport, after: impl IntoTimeExpression) -> Result<()> {
        let at = transport.event_ticks(after)?;
        self.starts.retain(|s| s.at < at);
        self.reschedule(transport)
    }

    /// Started when the transport is playing inside one of the part's starts.
    pub fn state(&self, transport: &Transport) -> PlaybackState {
        match self.current_start(transport) {
            Some(_) => PlaybackState::Started,
            None => PlaybackState::Stopped,
        }
    }

    /// Position inside the loop region, from 0 to 1. Always 0 when the part
    /// does not loop.
    pub fn progress(&self, transport: &Transport) -> f64 {
        let Ok(Some((loop_start, span))) = self.region(transport) else {
            return 0.0;
        };
        let Some(start) = self.current_start(transport) else {
            return 0.0;
        };
        let position = start.offset + (transport.ticks() - start.at) * self.playback_rate;
        (position - loop_start).max(0.0).rem_euclid(span) / span
    }

    /// Clear every start and scheduled event from the transport.
    pub fn dispose(&mut self, transport: &mut Transport) {
        self.starts.clear();
        self.unschedule(transport);
    }

    fn current_start(&self, transport: &Transport) -> Option<&Start> {
        if !transport.state().is_started() {
            return None;
        }
        let ticks = transport.ticks();
        let region = self.region(transport).ok().flatten();
        self.starts
            .iter()
            .filter(|s| s.at <= ticks && ticks < self.end_of(s, region))
            .max_by(|a, b| a.at.total_cmp(&b.at))
    }

    fn offsets(&self, transport: &Transport) -> Result<Vec<f64>> {
        self.events
            .iter()
            .map(|entry| transport.offset_ticks(&entry.time))
            .collect()
    }

    /// Loop start and span in ticks, when looping.
    fn region(&self, transport: &Transport) -> Result<Option<(f64, f64)>> {
        if !self.looping.is_looping() {
            return Ok(None);
        }
        loop_span(transport, &self.loop_start, &self.loop_end).map(Some)
    }

    fn end_of(&self, start: &Start, region: Option<(f64, f64)>) -> f64 {
        let limit = match (self.looping, region) {
            (Looping::Times(n), Some((_, span))) => {
                start.at + (n as f64 * span - start.played).max(0.0) / self.playback_rate
            }
            _ => f64::INFINITY,
        };
        limit.min(start.stop)
    }

    fn unschedule(&mut self, transport: &mut Transport) {
        for id in self.scheduled.drain(..) {
            transport.clear(id);
        }
    }

    /// Replace everything on the transport with the events of every start.
    fn reschedule(&mut self, transport: &mut Transport) -> Result<()> {
        self.unschedule(transport);
        if self.starts.is_empty() || self.events.is_empty() {
            return Ok(());
        }
        let offsets = self.offsets(transport)?;
        let region = self.region(transport)?;
        let callbacks: Vec<Callback> = self
            .events
            .iter()
            .map(|entry| {
                let callback = self.callback.clone();
                let value = entry.value.clone();
                self.trigger
                    .wrap(Arc::new(move |time| callback(time, value.as_ref())))
            })
            .collect();
        let rate = self.playback_rate;

        for start in &self.starts {
            let end = self.end_of(start, region);
            match region {
                None => {
                    for (ticks, callback) in offsets.iter().zip(&callbacks) {
                        if *ticks < start.offset {
                            continue;
                        }
                        let at = (start.at + (ticks - start.offset) / rate).round();
                        if at < end {
                            self.scheduled
                                .push(transport.add_persistent(callback.clone(), at));
                        }
                    }
                }
                Some((loop_start, span)) => {
                    let into = (start.offset - loop_start).max(0.0).rem_euclid(span);
                    for (ticks, callback) in offsets.iter().zip(&callbacks) {
                        let position = ticks - loop_start;
                        if position < 0.0 || position >= span {
                            continue;
                        }
                        let ahead = if position >= into {
                            position - into
                        } else {
                            position - into + span
                        };
                        let first = (start.at + ahead / rate).round();
                        if first < end {
                            self.scheduled.push(transport.add_repeat(
                                callback.clone(),
                                span / rate,
                                first,
                                end - first,
                            )?);
                        }
                    }
                }
            }
        }
        log::trace!(
            "[TRANSPORT] Part scheduled {} events for {} starts",
            self.scheduled.len(),
            self.starts.len()
        );
        Ok(())
    }
}

/// Loop start and span in ticks, rejecting regions shorter than a tick.
fn loop_span(transport: &Transport, start: &TimeExpression, end: &TimeExpression) -> Result<(f64, f64)> {
    let start = transport.offset_ticks(start)?;
    let span = transport.offset_ticks(end)? - start;
    if span < 1.0 {
        return Err(Error::OutOfRange(format!(
            "loop end must be at least one tick after loop start, got a span of {span}"
        )));
    }
    Ok((start, span))
}
