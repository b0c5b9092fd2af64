//! The musical transport.
//!
//! - [`Transport`] - a tempo-driven [`Clock`] plus a timeline of callbacks
//!   keyed by tick, with looping and swing
//! - [`Loop`] - a repeating callback that can be started and stopped on the
//!   transport
//! - [`Part`] - valued events at offsets, started, stopped and looped
//!   together
//! - [`Sequence`] - a part written as evenly spaced, nestable steps
//! - [`Dispatch`] - a callback that became due, with its exact time
//! - [`TransportNotification`] - start/stop/pause/loop changes for subscribers
//!
//! The transport never invokes callbacks itself. [`Transport::process`]
//! returns everything due inside a window and the caller fires the
//! dispatches once it no longer holds the transport.

pub mod event;
pub mod looper;
pub mod notification;
pub mod part;
pub mod sequence;
pub mod trigger;

pub use event::{Callback, Dispatch, EventId};
pub use looper::Loop;
pub use notification::TransportNotification;
pub use part::{Looping, Part, PartCallback};
pub use sequence::{Sequence, Step};
pub use trigger::Humanize;

use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::clock::{Clock, ClockEvent, TickSignal};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::time::format;
use crate::time::{IntoTimeExpression, TimeContext, TimeExpression, TimeSignature, TimeSource};
use crate::timeline::{IntervalEvent, IntervalId, IntervalTimeline, PlaybackState, Timeline};
use event::{EventKind, RepeatEvent, ScheduledEvent};
use notification::Subscribers;

/// Tolerance when comparing a fractional clock position to a whole tick.
const TICK_EPSILON: f64 = 1e-6;

/// Master transport: schedules callbacks in musical time.
pub struct Transport {
    clock: Clock,
    ppq: u32,
    time_signature: TimeSignature,
    sample_rate: f64,
    lookahead: f64,
    time_source: Arc<dyn TimeSource>,
    timeline: Timeline<ScheduledEvent>,
    /// Retention bound for passed events and tempo points.
    memory: Option<usize>,
    repeats: IntervalTimeline<RepeatEvent>,
    repeat_ids: HashMap<EventId, IntervalId>,
    /// Events scheduled behind the processed position, due next window.
    immediate: Vec<Dispatch>,
    next_id: u64,
    looping: bool,
    loop_start: f64,
    loop_end: f64,
    swing: f64,
    swing_ticks: f64,
    subscribers: Subscribers,
}

impl Transport {
    /// A stopped transport at tick 0.
    pub fn new(config: &EngineConfig, time_source: Arc<dyn TimeSource>) -> Result<Self> {
        config.validate()?;
        let bpm = TickSignal::bpm(config.bpm, config.ppq)?;
        let clock = match config.state_memory {
            Some(memory) => Clock::with_state_memory(bpm, config.sample_rate, memory),
            None => Clock::new(bpm, config.sample_rate),
        };
        let ppq = config.ppq as f64;
        Ok(Self {
            clock,
            ppq: config.ppq,
            time_signature: config.time_signature,
            sample_rate: config.sample_rate,
            lookahead: config.lookahead_duration()?.as_secs_f64(),
            time_source,
            timeline: Timeline::new(),
            memory: config.timeline_memory,
            repeats: IntervalTimeline::new(),
            repeat_ids: HashMap::new(),
            immediate: Vec::new(),
            next_id: 0,
            looping: false,
            loop_start: 0.0,
            loop_end: ppq * config.time_signature.beats_per_bar() * 4.0,
            swing: 0.0,
            swing_ticks: ppq / 2.0,
            subscribers: Subscribers::default(),
        })
    }

    // ========================================================================
    // Time
    // ========================================================================

    /// The time scheduling decisions are made for: the time source plus the
    /// lookahead.
    pub fn now(&self) -> f64 {
        self.time_source.now() + self.lookahead
    }

    /// Lookahead in seconds.
    pub fn lookahead(&self) -> f64 {
        self.lookahead
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Context for evaluating time expressions at [`Transport::now`].
    pub fn time_context(&self) -> TimeContext {
        let now = self.now();
        TimeContext {
            now,
            bpm: self.clock.frequency().value_at(now),
            ppq: self.ppq,
            time_signature: self.time_signature,
            sample_rate: self.sample_rate,
        }
    }

    /// Resolve a time to seconds on the time source's clock.
    pub fn to_seconds(&self, time: impl IntoTimeExpression) -> Result<f64> {
        time.into_time_expression()?.evaluate(&self.time_context())
    }

    /// Resolve a time to a transport position in ticks.
    ///
    /// `"+4n"` means four quarter notes after the current position.
    pub fn to_ticks(&self, time: impl IntoTimeExpression) -> Result<f64> {
        let expr = time.into_time_expression()?;
        self.expression_ticks(&expr, &self.time_context())
    }

    fn expression_ticks(&self, expr: &TimeExpression, ctx: &TimeContext) -> Result<f64> {
        match expr {
            TimeExpression::Now => Ok(self.clock.get_ticks_at_time(ctx.now)),
            TimeExpression::Relative { base, offset } => {
                Ok(self.expression_ticks(base, ctx)? + offset.to_ticks(ctx)?)
            }
            _ => expr.to_ticks(ctx),
        }
    }

    /// A non-negative position, rounded to a whole tick.
    pub(crate) fn event_ticks(&self, time: impl IntoTimeExpression) -> Result<f64> {
        let ticks = self.to_ticks(time)?;
        if !ticks.is_finite() || ticks < 0.0 {
            return Err(Error::OutOfRange(format!(
                "event position must be a non-negative tick, got {ticks}"
            )));
        }
        Ok(ticks.round())
    }

    /// A span of at least one tick.
    pub(crate) fn interval_ticks(&self, interval: impl IntoTimeExpression) -> Result<f64> {
        let ticks = interval.into_time_expression()?.to_ticks(&self.time_context())?;
        if !ticks.is_finite() || ticks < 1.0 {
            return Err(Error::OutOfRange(format!(
                "interval must span at least one tick, got {ticks}"
            )));
        }
        Ok(ticks)
    }

    /// A non-negative distance in ticks, not rounded.
    pub(crate) fn offset_ticks(&self, offset: impl IntoTimeExpression) -> Result<f64> {
        let ticks = offset
            .into_time_expression()?
            .to_ticks(&self.time_context())?;
        if !ticks.is_finite() || ticks < 0.0 {
            return Err(Error::OutOfRange(format!(
                "offset must be a non-negative number of ticks, got {ticks}"
            )));
        }
        Ok(ticks)
    }

    // ========================================================================
    // Playback state
    // ========================================================================

    /// State at [`Transport::now`].
    pub fn state(&self) -> PlaybackState {
        self.clock.get_state_at_time(self.now())
    }

    pub fn get_state_at_time(&self, time: f64) -> PlaybackState {
        self.clock.get_state_at_time(time)
    }

    /// Start playback at `time` from the current position.
    pub fn start(&mut self, time: impl IntoTimeExpression) -> Result<()> {
        let time = self.to_seconds(time)?;
        log::debug!("[TRANSPORT] Start at {time:.3}s");
        self.clock.start(time, None)
    }

    /// Start playback at `time` from `offset`.
    pub fn start_from(
        &mut self,
        time: impl IntoTimeExpression,
        offset: impl IntoTimeExpression,
    ) -> Result<()> {
        let time = self.to_seconds(time)?;
        let offset = self.event_ticks(offset)?;
        log::debug!("[TRANSPORT] Start at {time:.3}s from tick {offset}");
        self.clock.start(time, Some(offset))
    }

    /// Stop at `time`; the position returns to 0.
    pub fn stop(&mut self, time: impl IntoTimeExpression) -> Result<()> {
        let time = self.to_seconds(time)?;
        log::debug!("[TRANSPORT] Stop at {time:.3}s");
        self.clock.stop(time)
    }

    /// Pause at `time`, keeping the position.
    pub fn pause(&mut self, time: impl IntoTimeExpression) -> Result<()> {
        let time = self.to_seconds(time)?;
        log::debug!("[TRANSPORT] Pause at {time:.3}s");
        self.clock.pause(time)
    }

    /// Stop if started at `time`, otherwise start.
    pub fn toggle(&mut self, time: impl IntoTimeExpression) -> Result<()> {
        let time = self.to_seconds(time)?;
        if self.clock.get_state_at_time(time).is_started() {
            self.stop(time)
        } else {
            self.start(time)
        }
    }

    /// Receive every future notification.
    pub fn subscribe(&mut self) -> Receiver<TransportNotification> {
        self.subscribers.subscribe()
    }

    // ========================================================================
    // Tempo and meter
    // ========================================================================

    /// Tempo automation in beats per minute.
    pub fn bpm(&self) -> &TickSignal {
        self.clock.frequency()
    }

    /// Mutable tempo automation, e.g. for ramps.
    pub fn bpm_mut(&mut self) -> &mut TickSignal {
        self.clock.frequency_mut()
    }

    /// Tempo at [`Transport::now`].
    pub fn bpm_value(&self) -> f64 {
        self.clock.frequency().value_at(self.now())
    }

    /// Change the tempo from now on.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<()> {
        let now = self.now();
        log::debug!("[TRANSPORT] Tempo {bpm} bpm at {now:.3}s");
        self.clock.frequency_mut().set_value(bpm, now)
    }

    /// Ticks per quarter note.
    pub fn ppq(&self) -> u32 {
        self.ppq
    }

    /// Change the tick resolution, keeping the tempo.
    pub fn set_ppq(&mut self, ppq: u32) -> Result<()> {
        if ppq == 0 {
            return Err(Error::OutOfRange("ppq must be positive".into()));
        }
        self.ppq = ppq;
        self.clock.frequency_mut().set_multiplier(ppq as f64 / 60.0);
        Ok(())
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn set_time_signature(&mut self, signature: TimeSignature) -> Result<()> {
        if signature.numerator == 0 || signature.denominator == 0 {
            return Err(Error::OutOfRange(format!(
                "time signature parts must be positive, got {signature}"
            )));
        }
        self.time_signature = signature;
        Ok(())
    }

    // ========================================================================
    // Position
    // ========================================================================

    /// Position in whole ticks at `time`.
    pub fn get_ticks_at_time(&self, time: f64) -> f64 {
        self.clock.get_ticks_at_time(time).round()
    }

    /// Seconds of playback at `time`, excluding pauses.
    pub fn get_seconds_at_time(&self, time: f64) -> f64 {
        self.clock.get_seconds_at_time(time)
    }

    /// Position in ticks at [`Transport::now`].
    pub fn ticks(&self) -> f64 {
        self.get_ticks_at_time(self.now())
    }

    /// Jump to `ticks`.
    ///
    /// While playing, the jump lands on the next tick boundary and is
    /// reported as a stop followed by a start.
    pub fn set_ticks(&mut self, ticks: f64) -> Result<()> {
        if !ticks.is_finite() || ticks < 0.0 {
            return Err(Error::OutOfRange(format!(
                "tick position must be non-negative, got {ticks}"
            )));
        }
        let now = self.now();
        if self.clock.get_state_at_time(now).is_started() {
            let current = self.clock.get_ticks_at_time(now);
            let remaining = (current - TICK_EPSILON).ceil() - current;
            let time = if remaining > 0.0 {
                now + self.clock.frequency().duration_of_ticks(remaining, now)
            } else {
                now
            };
            self.subscribers.publish(TransportNotification::Stop { time });
            self.clock.set_ticks_at_time(ticks, time)?;
            self.restart_repeats(time);
            let seconds = self.clock.get_seconds_at_time(time);
            self.subscribers
                .publish(TransportNotification::Start { time, seconds });
            log::debug!("[TRANSPORT] Jumped to tick {ticks} at {time:.3}s");
        } else {
            self.clock.set_ticks_at_time(ticks, now)?;
        }
        Ok(())
    }

    /// Playback seconds at [`Transport::now`].
    pub fn seconds(&self) -> f64 {
        self.clock.get_seconds_at_time(self.now())
    }

    /// Jump to the position `seconds` of playback at the current tempo.
    pub fn set_seconds(&mut self, seconds: f64) -> Result<()> {
        let now = self.now();
        let signal = self.clock.frequency();
        let ticks = signal.ticks_at_time(now + seconds) - signal.ticks_at_time(now);
        self.set_ticks(ticks)
    }

    /// Position as `bars:beats:sixteenths`.
    pub fn position(&self) -> String {
        let ctx = self.time_context();
        let ticks = self.clock.get_ticks_at_time(ctx.now);
        format::bars_beats_sixteenths(ctx.ticks_to_seconds(ticks), &ctx)
    }

    /// Jump to a position such as `"2:0:0"` or `"4m"`.
    pub fn set_position(&mut self, position: impl IntoTimeExpression) -> Result<()> {
        let ticks = self.event_ticks(position)?;
        self.set_ticks(ticks)
    }

    /// Where playback is inside the loop, from 0 to 1. Always 0 when not
    /// looping.
    pub fn progress(&self) -> f64 {
        if !self.looping || self.loop_end <= self.loop_start {
            return 0.0;
        }
        let ticks = self.clock.get_ticks_at_time(self.now());
        (ticks - self.loop_start) / (self.loop_end - self.loop_start)
    }

    /// Time of the next multiple of `subdivision`, or 0 when not playing.
    pub fn next_subdivision(&self, subdivision: impl IntoTimeExpression) -> Result<f64> {
        let subdivision = self.interval_ticks(subdivision)?;
        let now = self.now();
        if !self.clock.get_state_at_time(now).is_started() {
            return Ok(0.0);
        }
        let position = self.clock.get_ticks_at_time(now);
        let remaining = subdivision - position % subdivision;
        Ok(self.clock.next_tick_time(remaining, now))
    }

    // ========================================================================
    // Loop and swing
    // ========================================================================

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Loop start in ticks.
    pub fn loop_start(&self) -> f64 {
        self.loop_start
    }

    /// Loop end in ticks.
    pub fn loop_end(&self) -> f64 {
        self.loop_end
    }

    pub fn set_loop_start(&mut self, start: impl IntoTimeExpression) -> Result<()> {
        self.loop_start = self.event_ticks(start)?;
        Ok(())
    }

    pub fn set_loop_end(&mut self, end: impl IntoTimeExpression) -> Result<()> {
        self.loop_end = self.event_ticks(end)?;
        Ok(())
    }

    /// Set both loop points. The end must come after the start.
    pub fn set_loop_points(
        &mut self,
        start: impl IntoTimeExpression,
        end: impl IntoTimeExpression,
    ) -> Result<()> {
        let start = self.event_ticks(start)?;
        let end = self.event_ticks(end)?;
        if end <= start {
            return Err(Error::OutOfRange(format!(
                "loop end (tick {end}) must be after loop start (tick {start})"
            )));
        }
        self.loop_start = start;
        self.loop_end = end;
        Ok(())
    }

    /// Swing amount from 0 (straight) to 1.
    pub fn swing(&self) -> f64 {
        self.swing
    }

    pub fn set_swing(&mut self, amount: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&amount) {
            return Err(Error::OutOfRange(format!(
                "swing must be between 0 and 1, got {amount}"
            )));
        }
        self.swing = amount;
        Ok(())
    }

    /// The swung note value in ticks.
    pub fn swing_subdivision(&self) -> f64 {
        self.swing_ticks
    }

    pub fn set_swing_subdivision(&mut self, subdivision: impl IntoTimeExpression) -> Result<()> {
        self.swing_ticks = self.interval_ticks(subdivision)?;
        Ok(())
    }

    fn swing_offset(&self, tick_time: f64, ticks: f64) -> f64 {
        let double = self.swing_ticks * 2.0;
        if self.swing <= 0.0 || ticks % self.ppq as f64 == 0.0 || ticks % double == 0.0 {
            return 0.0;
        }
        let rate = self.clock.frequency().ticks_per_second_at(tick_time);
        if rate <= 0.0 {
            return 0.0;
        }
        let progress = (ticks % double) / double;
        (self.swing_ticks * 2.0 / 3.0) / rate * (progress * PI).sin() * self.swing
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    fn allocate_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        id
    }

    /// First tick the next [`Transport::process`] call can still fire.
    pub(crate) fn next_unprocessed_tick(&self) -> f64 {
        let ticks = self.clock.get_ticks_at_time(self.clock.last_update());
        (ticks - TICK_EPSILON).ceil().max(0.0)
    }

    fn is_behind(&self, ticks: f64) -> bool {
        let processed = self.clock.last_update();
        self.clock.get_state_at_time(processed).is_started() && ticks < self.next_unprocessed_tick()
    }

    fn insert(&mut self, callback: Callback, ticks: f64, kind: EventKind) -> EventId {
        let id = self.allocate_id();
        if self.is_behind(ticks) {
            let time = self.clock.last_update();
            log::debug!(
                "[TRANSPORT] Event {id} at tick {ticks} already passed, dispatching at {time:.3}s"
            );
            let ticks = self.next_unprocessed_tick() as u64;
            self.immediate.push(Dispatch {
                id,
                time,
                ticks,
                callback: callback.clone(),
            });
            if kind == EventKind::Once {
                return id;
            }
        }
        self.timeline.add(ScheduledEvent {
            id,
            ticks,
            kind,
            callback,
        });
        id
    }

    /// Call `callback` every time the transport passes `time`.
    pub fn schedule<F>(&mut self, callback: F, time: impl IntoTimeExpression) -> Result<EventId>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let ticks = self.event_ticks(time)?;
        let id = self.insert(Arc::new(callback), ticks, EventKind::Persistent);
        log::debug!("[TRANSPORT] Scheduled {id} at tick {ticks}");
        Ok(id)
    }

    /// Like [`Transport::schedule`], but a position the transport already
    /// passed waits for the next pass instead of firing right away.
    pub(crate) fn add_persistent(&mut self, callback: Callback, ticks: f64) -> EventId {
        let id = self.allocate_id();
        self.timeline.add(ScheduledEvent {
            id,
            ticks,
            kind: EventKind::Persistent,
            callback,
        });
        log::trace!("[TRANSPORT] Scheduled {id} at tick {ticks}");
        id
    }

    /// Call `callback` once at `time`, then forget it.
    pub fn schedule_once<F>(
        &mut self,
        callback: F,
        time: impl IntoTimeExpression,
    ) -> Result<EventId>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let ticks = self.event_ticks(time)?;
        let id = self.insert(Arc::new(callback), ticks, EventKind::Once);
        log::debug!("[TRANSPORT] Scheduled {id} once at tick {ticks}");
        Ok(id)
    }

    /// Call `callback` every `interval` from `start` on, without end.
    pub fn schedule_repeat<F>(
        &mut self,
        callback: F,
        interval: impl IntoTimeExpression,
        start: impl IntoTimeExpression,
    ) -> Result<EventId>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let interval = self.interval_ticks(interval)?;
        let start = self.event_ticks(start)?;
        self.add_repeat(Arc::new(callback), interval, start, f64::INFINITY)
    }

    /// Call `callback` every `interval` from `start` for `duration`.
    ///
    /// Occurrences at or after `start + duration` do not fire.
    pub fn schedule_repeat_for<F>(
        &mut self,
        callback: F,
        interval: impl IntoTimeExpression,
        start: impl IntoTimeExpression,
        duration: impl IntoTimeExpression,
    ) -> Result<EventId>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let interval = self.interval_ticks(interval)?;
        let start = self.event_ticks(start)?;
        let duration = duration
            .into_time_expression()?
            .to_ticks(&self.time_context())?;
        self.add_repeat(Arc::new(callback), interval, start, duration)
    }

    pub(crate) fn add_repeat(
        &mut self,
        callback: Callback,
        interval: f64,
        start: f64,
        duration: f64,
    ) -> Result<EventId> {
        let id = EventId(self.next_id);
        let repeat = RepeatEvent {
            id,
            interval,
            callback,
        };
        let interval_id = self.repeats.add(IntervalEvent::new(start, duration, repeat))?;
        self.next_id += 1;
        self.repeat_ids.insert(id, interval_id);
        self.queue_occurrence(interval_id, self.next_unprocessed_tick());
        log::debug!(
            "[TRANSPORT] Scheduled repeat {id} every {interval} ticks from {start} for {duration}"
        );
        Ok(id)
    }

    /// Put the first occurrence at or after `ticks` on the timeline.
    fn queue_occurrence(&mut self, interval_id: IntervalId, ticks: f64) {
        let Some(entry) = self.repeats.get_by_id(interval_id) else {
            return;
        };
        let next = entry.payload.next_at_or_after(entry.time, ticks);
        if next < entry.end() {
            self.timeline.add(ScheduledEvent {
                id: entry.payload.id,
                ticks: next.round(),
                kind: EventKind::Occurrence,
                callback: entry.payload.callback.clone(),
            });
        }
    }

    fn queue_following(&mut self, id: EventId, fired: f64) {
        let Some(entry) = self
            .repeat_ids
            .get(&id)
            .and_then(|interval_id| self.repeats.get_by_id(*interval_id))
        else {
            return;
        };
        let next = entry.payload.next_after(entry.time, fired);
        if next < entry.end() {
            self.timeline.add(ScheduledEvent {
                id,
                ticks: next.round(),
                kind: EventKind::Occurrence,
                callback: entry.payload.callback.clone(),
            });
        } else {
            log::debug!("[TRANSPORT] Repeat {id} finished at tick {fired}");
        }
    }

    /// Re-align every repeat to the position at `time`.
    fn restart_repeats(&mut self, time: f64) {
        let ticks = self.clock.get_ticks_at_time(time);
        self.timeline.retain(|e| e.kind != EventKind::Occurrence);
        for interval_id in self.repeats.ids() {
            self.queue_occurrence(interval_id, ticks);
        }
    }

    /// Remove an event or repeat. Returns whether anything was removed.
    pub fn clear(&mut self, id: EventId) -> bool {
        let before = self.timeline.len() + self.immediate.len();
        self.timeline.retain(|e| e.id != id);
        self.immediate.retain(|d| d.id != id);
        let repeat = self
            .repeat_ids
            .remove(&id)
            .and_then(|interval_id| self.repeats.remove(interval_id))
            .is_some();
        let removed = repeat || before != self.timeline.len() + self.immediate.len();
        if removed {
            log::debug!("[TRANSPORT] Cleared {id}");
        }
        removed
    }

    /// Remove everything scheduled at or after `after`.
    ///
    /// Repeats that started earlier are cut off so none of their occurrences
    /// fire at or after `after`.
    pub fn cancel(&mut self, after: impl IntoTimeExpression) -> Result<()> {
        let after = self.to_ticks(after)?.max(0.0);
        self.timeline.cancel(after);
        for removed in self.repeats.cancel(after) {
            self.repeat_ids.remove(&removed.payload.id);
        }
        let mut running = Vec::new();
        self.repeats.for_each(|interval_id, entry| {
            if entry.end() > after {
                running.push(interval_id);
            }
        });
        for interval_id in running {
            if let Some(entry) = self.repeats.remove(interval_id) {
                let id = entry.payload.id;
                let truncated = IntervalEvent::new(entry.time, after - entry.time, entry.payload);
                let replacement = self.repeats.add(truncated)?;
                self.repeat_ids.insert(id, replacement);
            }
        }
        log::debug!("[TRANSPORT] Cancelled events at or after tick {after}");
        Ok(())
    }

    // ========================================================================
    // Processing
    // ========================================================================

    /// Everything due from the previous window end up to `until`, in order.
    pub fn process(&mut self, until: f64) -> Vec<Dispatch> {
        let mut due = std::mem::take(&mut self.immediate);
        for event in self.clock.update(until) {
            match event {
                ClockEvent::Start { time, ticks } => {
                    log::debug!("[TRANSPORT] Started at {time:.3}s from tick {ticks:.0}");
                    self.restart_repeats(time);
                    let seconds = self.clock.get_seconds_at_time(time);
                    self.subscribers
                        .publish(TransportNotification::Start { time, seconds });
                }
                ClockEvent::Stop { time } => {
                    self.subscribers.publish(TransportNotification::Stop { time });
                }
                ClockEvent::Pause { time } => {
                    self.subscribers
                        .publish(TransportNotification::Pause { time });
                }
                ClockEvent::Tick { time, .. } => self.process_tick(time, &mut due),
            }
        }
        self.forget_history();
        due
    }

    /// Drop what playback has passed: unreadable tick offsets always, and
    /// events and tempo points beyond the retention bound.
    ///
    /// Events inside the loop and tempo points since the last stop are kept,
    /// since positions ahead can still reach them.
    fn forget_history(&mut self) {
        let processed = self.clock.last_update();
        self.clock.forget_offsets_before(processed);
        let Some(memory) = self.memory else {
            return;
        };
        let mut horizon = self.next_unprocessed_tick();
        if self.looping {
            horizon = horizon.min(self.loop_start);
        }
        let events = self.timeline.trim_before(horizon, memory);
        let since = self.clock.last_stop_before(processed);
        let points = self.clock.frequency_mut().forget_before(since, memory);
        if events + points > 0 {
            log::trace!(
                "[TRANSPORT] Forgot {events} passed events and {points} tempo points"
            );
        }
    }

    /// Process up to [`Transport::now`].
    pub fn process_due(&mut self) -> Vec<Dispatch> {
        let now = self.now();
        self.process(now)
    }

    fn process_tick(&mut self, tick_time: f64, due: &mut Vec<Dispatch>) {
        // A loop wrap earlier in the window moves the position, so the
        // clock's precomputed tick number can be stale.
        let mut ticks = self.clock.get_ticks_at_time(tick_time).round().max(0.0);
        let time = tick_time + self.swing_offset(tick_time, ticks);

        if self.looping && ticks >= self.loop_end {
            self.subscribers
                .publish(TransportNotification::LoopEnd { time });
            if let Err(e) = self.clock.set_ticks_at_time(self.loop_start, tick_time) {
                log::warn!("[TRANSPORT] Loop wrap at {tick_time:.3}s failed: {e}");
            }
            ticks = self.loop_start;
            let seconds = self.clock.get_seconds_at_time(tick_time);
            self.subscribers
                .publish(TransportNotification::LoopStart { time, seconds });
            self.subscribers.publish(TransportNotification::Loop { time });
            self.restart_repeats(tick_time);
            log::debug!("[TRANSPORT] Looped to tick {ticks} at {time:.3}s");
        }

        let fired: Vec<ScheduledEvent> = self.timeline.at_time(ticks).to_vec();
        for event in fired {
            log::trace!("[TRANSPORT] Dispatch {} at tick {} ({:.6}s)", event.id, ticks, time);
            due.push(Dispatch {
                id: event.id,
                time,
                ticks: ticks as u64,
                callback: event.callback.clone(),
            });
            match event.kind {
                EventKind::Persistent => {}
                EventKind::Once => {
                    self.timeline.remove_by(|e| e.id == event.id);
                }
                EventKind::Occurrence => {
                    self.timeline.remove_by(|e| {
                        e.id == event.id && e.kind == EventKind::Occurrence && e.ticks == ticks
                    });
                    self.queue_following(event.id, ticks);
                }
            }
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("ppq", &self.ppq)
            .field("time_signature", &self.time_signature)
            .field("scheduled", &self.timeline.len())
            .field("repeats", &self.repeats.len())
            .field("looping", &self.looping)
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualTimeSource;
    use std::sync::Mutex;

    fn transport() -> (Transport, ManualTimeSource) {
        let source = ManualTimeSource::new(0.0);
        let config = EngineConfig {
            lookahead: "0s".to_string(),
            ..EngineConfig::default()
        };
        let transport = Transport::new(&config, Arc::new(source.clone())).unwrap();
        (transport, source)
    }

    type Log = Arc<Mutex<Vec<f64>>>;

    fn recorder() -> (Log, impl Fn(f64) + Send + Sync + 'static) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |time| sink.lock().unwrap().push(time))
    }

    fn run(transport: &mut Transport, until: f64) -> Vec<Dispatch> {
        let due = transport.process(until);
        due.iter().for_each(Dispatch::fire);
        due
    }

    fn times(log: &Log) -> Vec<f64> {
        log.lock().unwrap().clone()
    }

    fn assert_times(got: &[f64], expected: &[f64]) {
        assert_eq!(got.len(), expected.len(), "got {got:?}, expected {expected:?}");
        for (a, b) in got.iter().zip(expected) {
            assert!((a - b).abs() < 1e-9, "got {got:?}, expected {expected:?}");
        }
    }

    #[test]
    fn test_quarter_note_fires_at_half_second() {
        let (mut transport, _) = transport();
        let (log, callback) = recorder();
        transport.schedule(callback, "4n").unwrap();
        transport.start(0.0).unwrap();
        let due = run(&mut transport, 1.0);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].ticks, 192);
        assert_times(&times(&log), &[0.5]);
    }

    #[test]
    fn test_repeat_fires_four_times_in_four_measures() {
        let (mut transport, _) = transport();
        let (log, callback) = recorder();
        transport
            .schedule_repeat_for(callback, "1m", 0.0, "4m")
            .unwrap();
        transport.start(0.0).unwrap();
        run(&mut transport, 20.0);
        assert_times(&times(&log), &[0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_small_windows_fire_the_same_events() {
        let (mut transport, _) = transport();
        let (log, callback) = recorder();
        transport.schedule_repeat(callback, "8n", "4n").unwrap();
        transport.start(0.0).unwrap();
        let mut t = 0.0;
        while t < 2.1 {
            t = (t + 0.025f64).min(2.1);
            run(&mut transport, t);
        }
        let expected: Vec<f64> = (0..7).map(|i| 0.5 + i as f64 * 0.25).collect();
        assert_times(&times(&log), &expected);
    }

    #[test]
    fn test_loop_wraps_and_notifies() {
        let (mut transport, _) = transport();
        let notifications = transport.subscribe();
        let (downbeat, on_downbeat) = recorder();
        let (half, on_half) = recorder();
        transport.set_loop_points(0.0, "1m").unwrap();
        transport.set_loop(true);
        transport.schedule(on_downbeat, 0.0).unwrap();
        transport.schedule(on_half, "2n").unwrap();
        transport.start(0.0).unwrap();
        run(&mut transport, 4.5);

        assert_times(&times(&downbeat), &[0.0, 2.0, 4.0]);
        assert_times(&times(&half), &[1.0, 3.0]);
        assert!((transport.get_ticks_at_time(4.5) - 192.0).abs() < 1e-9);

        let kinds: Vec<TransportNotification> = notifications.try_iter().collect();
        assert!(matches!(kinds[0], TransportNotification::Start { time, .. } if time == 0.0));
        assert!(matches!(kinds[1], TransportNotification::LoopEnd { time } if (time - 2.0).abs() < 1e-9));
        assert!(matches!(kinds[2], TransportNotification::LoopStart { .. }));
        assert!(matches!(kinds[3], TransportNotification::Loop { .. }));
        assert_eq!(kinds.len(), 7);
    }

    #[test]
    fn test_repeat_realigns_after_loop() {
        let (mut transport, _) = transport();
        let (log, callback) = recorder();
        transport.set_loop_points(0.0, "2n").unwrap();
        transport.set_loop(true);
        transport.schedule_repeat(callback, "4n", 0.0).unwrap();
        transport.start(0.0).unwrap();
        run(&mut transport, 2.1);
        assert_times(&times(&log), &[0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_swing_delays_offbeats() {
        let (mut transport, _) = transport();
        let (log, callback) = recorder();
        transport.set_swing(1.0).unwrap();
        assert!((transport.swing_subdivision() - 96.0).abs() < 1e-12);
        transport.schedule(callback, "8n").unwrap();
        let (beat, on_beat) = recorder();
        transport.schedule(on_beat, "4n").unwrap();
        transport.start(0.0).unwrap();
        run(&mut transport, 1.0);
        assert_times(&times(&log), &[0.25 + 64.0 / 384.0]);
        assert_times(&times(&beat), &[0.5]);
    }

    #[test]
    fn test_next_subdivision() {
        let (mut transport, source) = transport();
        assert_eq!(transport.next_subdivision("4n").unwrap(), 0.0);
        transport.start(0.0).unwrap();
        source.set(0.3);
        assert!((transport.next_subdivision("4n").unwrap() - 0.5).abs() < 1e-9);
        assert!((transport.next_subdivision("1m").unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_past_events_fire_at_next_window() {
        let (mut transport, _) = transport();
        transport.start(0.0).unwrap();
        run(&mut transport, 1.0);

        let (once, on_once) = recorder();
        let (kept, on_kept) = recorder();
        transport.schedule_once(on_once, "4n").unwrap();
        transport.schedule(on_kept, "4n").unwrap();
        let due = run(&mut transport, 1.5);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].ticks, 384);
        assert_times(&times(&once), &[1.0]);
        assert_times(&times(&kept), &[1.0]);

        run(&mut transport, 3.0);
        assert_eq!(times(&once).len(), 1);
        assert_eq!(times(&kept).len(), 1);
    }

    #[test]
    fn test_cancel_cuts_repeats_and_drops_events() {
        let (mut transport, _) = transport();
        let (repeat, on_repeat) = recorder();
        let (late, on_late) = recorder();
        transport.schedule_repeat(on_repeat, "4n", 0.0).unwrap();
        transport.schedule(on_late, "2m").unwrap();
        transport.cancel("1m").unwrap();
        transport.start(0.0).unwrap();
        run(&mut transport, 10.0);
        assert_times(&times(&repeat), &[0.0, 0.5, 1.0, 1.5]);
        assert!(times(&late).is_empty());
    }

    #[test]
    fn test_clear_stops_repeat() {
        let (mut transport, _) = transport();
        let (log, callback) = recorder();
        let id = transport.schedule_repeat(callback, "4n", 0.0).unwrap();
        transport.start(0.0).unwrap();
        assert_eq!(run(&mut transport, 0.6).len(), 2);
        assert!(transport.clear(id));
        assert!(run(&mut transport, 2.0).is_empty());
        assert!(!transport.clear(id));
        assert_eq!(times(&log).len(), 2);
    }

    #[test]
    fn test_once_is_removed_after_firing() {
        let (mut transport, _) = transport();
        let (log, callback) = recorder();
        transport.set_loop_points(0.0, "2n").unwrap();
        transport.set_loop(true);
        transport.schedule_once(callback, "4n").unwrap();
        transport.start(0.0).unwrap();
        run(&mut transport, 3.0);
        assert_times(&times(&log), &[0.5]);
    }

    #[test]
    fn test_position_and_jumps() {
        let (mut transport, source) = transport();
        let notifications = transport.subscribe();
        transport.start(0.0).unwrap();
        source.set(1.25);
        assert_eq!(transport.position(), "0:2:2");
        assert!((transport.seconds() - 1.25).abs() < 1e-9);
        assert!((transport.ticks() - 480.0).abs() < 1e-9);

        transport.set_position("2:0:0").unwrap();
        assert!((transport.ticks() - 1536.0).abs() < 1e-9);
        assert!((transport.get_ticks_at_time(1.75) - 1728.0).abs() < 1e-9);
        let got: Vec<TransportNotification> = notifications.try_iter().collect();
        assert!(matches!(got[0], TransportNotification::Stop { time } if (time - 1.25).abs() < 1e-9));
        assert!(matches!(got[1], TransportNotification::Start { .. }));
    }

    #[test]
    fn test_set_position_while_stopped() {
        let (mut transport, _) = transport();
        transport.set_seconds(1.0).unwrap();
        assert!((transport.ticks() - 384.0).abs() < 1e-9);
        transport.start_from(0.0, "1m").unwrap();
        assert!((transport.get_ticks_at_time(0.5) - 960.0).abs() < 1e-9);
        assert!(transport.set_ticks(-1.0).is_err());
    }

    #[test]
    fn test_pause_holds_scheduled_events() {
        let (mut transport, _) = transport();
        let (log, callback) = recorder();
        transport.schedule(callback, "1m").unwrap();
        transport.start(0.0).unwrap();
        transport.pause(1.0).unwrap();
        transport.start(2.0).unwrap();
        run(&mut transport, 5.0);
        assert_times(&times(&log), &[3.0]);
    }

    #[test]
    fn test_stop_then_restart_plays_from_zero() {
        let (mut transport, _) = transport();
        let (log, callback) = recorder();
        transport.schedule(callback, "4n").unwrap();
        transport.start(0.0).unwrap();
        transport.stop(1.0).unwrap();
        transport.start(2.0).unwrap();
        run(&mut transport, 3.0);
        assert_times(&times(&log), &[0.5, 2.5]);
    }

    #[test]
    fn test_tempo_and_meter() {
        let (mut transport, _) = transport();
        transport.set_bpm(60.0).unwrap();
        assert!((transport.bpm_value() - 60.0).abs() < 1e-12);
        let (log, callback) = recorder();
        transport.schedule(callback, "4n").unwrap();
        transport.start(0.0).unwrap();
        run(&mut transport, 2.0);
        assert_times(&times(&log), &[1.0]);

        transport
            .set_time_signature(TimeSignature::new(3, 4))
            .unwrap();
        assert!((transport.to_ticks("1m").unwrap() - 576.0).abs() < 1e-9);
        transport.set_ppq(96).unwrap();
        assert!((transport.to_ticks("4n").unwrap() - 96.0).abs() < 1e-9);
        assert!(transport.set_ppq(0).is_err());
    }

    #[test]
    fn test_tempo_ramp_moves_events() {
        let (mut transport, _) = transport();
        transport
            .bpm_mut()
            .automate(|p| {
                p.set_value_at_time(60.0, 0.0)?;
                p.linear_ramp_to_value_at_time(180.0, 2.0)
            })
            .unwrap();
        let (log, callback) = recorder();
        transport.schedule(callback, "4n").unwrap();
        transport.start(0.0).unwrap();
        run(&mut transport, 3.0);
        let fired = times(&log);
        assert_eq!(fired.len(), 1);
        // One beat is reached when 60t + 30t^2 = 60.
        let expected = (-60.0 + (3600.0f64 + 7200.0).sqrt()) / 60.0;
        assert!((fired[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_progress_and_toggle() {
        let (mut transport, source) = transport();
        transport.set_loop_points(0.0, "1m").unwrap();
        assert_eq!(transport.progress(), 0.0);
        transport.set_loop(true);
        transport.toggle(0.0).unwrap();
        source.set(1.0);
        assert!((transport.progress() - 0.5).abs() < 1e-9);
        assert_eq!(transport.state(), PlaybackState::Started);
        transport.toggle(1.0).unwrap();
        assert_eq!(transport.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_relative_positions() {
        let (mut transport, source) = transport();
        transport.start(0.0).unwrap();
        source.set(1.0);
        assert!((transport.to_ticks("+4n").unwrap() - 576.0).abs() < 1e-9);
        assert!((transport.to_seconds("+4n").unwrap() - 1.5).abs() < 1e-9);
    }

    fn bounded_transport(memory: usize) -> (Transport, ManualTimeSource) {
        let source = ManualTimeSource::new(0.0);
        let config = EngineConfig {
            lookahead: "0s".to_string(),
            timeline_memory: Some(memory),
            ..EngineConfig::default()
        };
        let transport = Transport::new(&config, Arc::new(source.clone())).unwrap();
        (transport, source)
    }

    #[test]
    fn test_memory_bound_keeps_pending_events() {
        let (mut transport, _) = bounded_transport(2);
        let (log, callback) = recorder();
        let callback = Arc::new(callback);
        for time in ["1m", "2m", "3m"] {
            let callback = callback.clone();
            transport.schedule_once(move |t| callback(t), time).unwrap();
        }
        transport.start(0.0).unwrap();
        run(&mut transport, 7.0);
        assert_times(&times(&log), &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_memory_bound_forgets_passed_events() {
        let (mut transport, _) = bounded_transport(2);
        let (log, callback) = recorder();
        let callback = Arc::new(callback);
        for time in [0.5, 1.0, 1.5, 2.0] {
            let callback = callback.clone();
            transport.schedule(move |t| callback(t), time).unwrap();
        }
        transport.start(0.0).unwrap();
        run(&mut transport, 1.6);
        assert_eq!(transport.timeline.len(), 2);
        run(&mut transport, 3.0);
        assert_times(&times(&log), &[0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_memory_bound_keeps_loop_events() {
        let (mut transport, _) = bounded_transport(1);
        let (log, callback) = recorder();
        let callback = Arc::new(callback);
        transport.set_loop_points(0.0, "1m").unwrap();
        transport.set_loop(true);
        for time in ["0:1:0", "0:2:0"] {
            let callback = callback.clone();
            transport.schedule(move |t| callback(t), time).unwrap();
        }
        transport.start(0.0).unwrap();
        run(&mut transport, 3.9);
        assert_eq!(transport.timeline.len(), 2);
        assert_times(&times(&log), &[0.5, 1.0, 2.5, 3.0]);
    }

    #[test]
    fn test_memory_bound_keeps_tempo_history_exact() {
        let (mut transport, _) = bounded_transport(2);
        transport.start(0.0).unwrap();
        transport.bpm_mut().set_value_at_time(60.0, 1.0).unwrap();
        transport.bpm_mut().set_value_at_time(90.0, 2.0).unwrap();
        assert!((transport.get_ticks_at_time(1.5) - 480.0).abs() < 1e-9);
        transport.bpm_mut().set_value_at_time(120.0, 3.0).unwrap();
        run(&mut transport, 5.0);
        assert_eq!(transport.bpm().param().len(), 3);
        assert!((transport.get_ticks_at_time(1.5) - 480.0).abs() < 1e-9);
        let later = transport.bpm().ticks_at_time(6.0) - transport.bpm().ticks_at_time(2.5);

        // After a stop, points before it fold into the count.
        transport.stop(5.0).unwrap();
        transport.start(5.5).unwrap();
        run(&mut transport, 6.0);
        assert_eq!(transport.bpm().param().len(), 2);
        let folded = transport.bpm().ticks_at_time(6.0) - transport.bpm().ticks_at_time(2.5);
        assert!((folded - later).abs() < 1e-6);
        assert!((transport.get_ticks_at_time(6.0) - 192.0).abs() < 1e-9);
        assert!((transport.bpm().value_at(6.0) - 120.0).abs() < 1e-12);
    }

    #[test]
    fn test_looping_does_not_pile_up_offsets() {
        let (mut transport, _) = transport();
        let (log, callback) = recorder();
        transport.set_loop_points(0.0, "4n").unwrap();
        transport.set_loop(true);
        transport.schedule(callback, 0.0).unwrap();
        transport.start(0.0).unwrap();
        for i in 1..200 {
            run(&mut transport, i as f64 * 0.1);
        }
        assert_eq!(times(&log).len(), 40);
        assert!(format!("{:?}", transport.clock).matches("TickOffset").count() <= 4);
        assert!((transport.get_ticks_at_time(19.9) - 154.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_input() {
        let (mut transport, _) = transport();
        assert!(matches!(
            transport.schedule(|_| {}, -1.0),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            transport.schedule_repeat(|_| {}, 0.0, 0.0),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            transport.schedule(|_| {}, "4x"),
            Err(Error::Parse { .. })
        ));
        assert!(transport.set_swing(1.5).is_err());
        assert!(transport.set_loop_points("1m", "4n").is_err());
        assert!(transport
            .set_time_signature(TimeSignature {
                numerator: 4,
                denominator: 0
            })
            .is_err());
    }
}
