//! Tick clock.
//!
//! - [`Clock`] - start/stop/pause state machine counting the ticks of a
//!   [`TickSignal`]
//! - [`TickSignal`] - rate automation integrated into tick counts
//! - [`ClockEvent`] - what [`Clock::update`] reports for a time window
//!
//! State transitions and tick offsets live on timelines, so tick and second
//! positions can be queried for any time, including times after scheduled
//! transitions that have not happened yet.

pub mod tick_signal;

pub use tick_signal::TickSignal;

use crate::error::{Error, Result};
use crate::timeline::{PlaybackState, StateEvent, Timed, Timeline, TimelineState};

/// Tick position fixed at a point in time by `set_ticks_at_time` or `stop`.
#[derive(Clone, Copy, Debug, PartialEq)]
struct TickOffset {
    time: f64,
    ticks: f64,
    seconds: f64,
}

impl TickOffset {
    const ZERO: TickOffset = TickOffset {
        time: 0.0,
        ticks: 0.0,
        seconds: 0.0,
    };
}

impl Timed for TickOffset {
    fn time(&self) -> f64 {
        self.time
    }
}

/// Something that happened inside an update window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClockEvent {
    /// The clock started; `ticks` is the position it started from.
    Start { time: f64, ticks: f64 },
    Stop { time: f64 },
    Pause { time: f64 },
    /// One tick, with the clock position at that time.
    Tick { time: f64, ticks: u64 },
}

impl ClockEvent {
    pub fn time(&self) -> f64 {
        match *self {
            ClockEvent::Start { time, .. }
            | ClockEvent::Stop { time }
            | ClockEvent::Pause { time }
            | ClockEvent::Tick { time, .. } => time,
        }
    }
}

fn check_time(time: f64) -> Result<()> {
    if !time.is_finite() {
        return Err(Error::OutOfRange(format!("clock time must be finite, got {time}")));
    }
    Ok(())
}

/// Counts ticks at the rate of a [`TickSignal`] while started.
#[derive(Clone, Debug)]
pub struct Clock {
    frequency: TickSignal,
    state: TimelineState,
    tick_offset: Timeline<TickOffset>,
    last_update: f64,
    /// Ticks closer than this to a stop are dropped.
    sample_time: f64,
    pending: Vec<ClockEvent>,
}

impl Clock {
    /// A stopped clock at tick 0.
    pub fn new(frequency: TickSignal, sample_rate: f64) -> Self {
        Self::with_state(frequency, sample_rate, TimelineState::new(PlaybackState::Stopped))
    }

    /// Like [`Clock::new`], retaining at most `memory` state transitions.
    pub fn with_state_memory(frequency: TickSignal, sample_rate: f64, memory: usize) -> Self {
        Self::with_state(
            frequency,
            sample_rate,
            TimelineState::with_memory(PlaybackState::Stopped, memory),
        )
    }

    fn with_state(frequency: TickSignal, sample_rate: f64, mut state: TimelineState) -> Self {
        state.set_state_at_time(PlaybackState::Stopped, 0.0);
        let mut tick_offset = Timeline::new();
        tick_offset.add(TickOffset::ZERO);
        Self {
            frequency,
            state,
            tick_offset,
            last_update: 0.0,
            sample_time: 1.0 / sample_rate.max(1.0),
            pending: Vec::new(),
        }
    }

    pub fn frequency(&self) -> &TickSignal {
        &self.frequency
    }

    /// Mutable access to the rate automation.
    pub fn frequency_mut(&mut self) -> &mut TickSignal {
        &mut self.frequency
    }

    /// The state transitions.
    pub fn state(&self) -> &TimelineState {
        &self.state
    }

    /// End of the last window passed to [`Clock::update`].
    pub fn last_update(&self) -> f64 {
        self.last_update
    }

    /// Start counting at `time`, optionally from `offset` ticks.
    ///
    /// Starting a clock that is already started at `time` does nothing.
    pub fn start(&mut self, time: f64, offset: Option<f64>) -> Result<()> {
        check_time(time)?;
        if self.state.get_value_at_time(time).is_started() {
            log::debug!("[CLOCK] Start at {time:.3}s ignored, already started");
            return Ok(());
        }
        self.state.set_state_at_time(PlaybackState::Started, time);
        if let Some(ticks) = offset {
            self.set_ticks_at_time(ticks, time)?;
        }
        log::debug!("[CLOCK] Start at {time:.3}s (offset {offset:?})");
        if time < self.last_update {
            let ticks = self.get_ticks_at_time(time);
            self.pending.push(ClockEvent::Start { time, ticks });
        }
        Ok(())
    }

    /// Stop at `time` and reset the position to 0.
    pub fn stop(&mut self, time: f64) -> Result<()> {
        check_time(time)?;
        if self.state.get_value_at_time(time) == PlaybackState::Stopped {
            // Fold into the earlier stop instead of stacking a second one.
            if let Some(event) = self.state.get(time).copied() {
                if event.time > 0.0 {
                    self.tick_offset.cancel(event.time);
                    self.state.cancel(event.time);
                }
            }
        }
        self.state.cancel(time);
        self.state.set_state_at_time(PlaybackState::Stopped, time);
        self.set_ticks_at_time(0.0, time)?;
        log::debug!("[CLOCK] Stop at {time:.3}s");
        if time < self.last_update {
            self.pending.push(ClockEvent::Stop { time });
        }
        Ok(())
    }

    /// Freeze the position at `time`. Only a started clock pauses.
    pub fn pause(&mut self, time: f64) -> Result<()> {
        check_time(time)?;
        if !self.state.get_value_at_time(time).is_started() {
            log::debug!("[CLOCK] Pause at {time:.3}s ignored, not started");
            return Ok(());
        }
        self.state.set_state_at_time(PlaybackState::Paused, time);
        log::debug!("[CLOCK] Pause at {time:.3}s");
        if time < self.last_update {
            self.pending.push(ClockEvent::Pause { time });
        }
        Ok(())
    }

    /// Drop every state transition and tick offset at or after `after`.
    pub fn cancel(&mut self, after: f64) {
        self.state.cancel(after);
        self.tick_offset.cancel(after);
        log::debug!("[CLOCK] Cancelled transitions at or after {after:.3}s");
    }

    /// Playback state at `time`.
    pub fn get_state_at_time(&self, time: f64) -> PlaybackState {
        self.state.get_value_at_time(time)
    }

    /// Jump to `ticks` at `time`.
    pub fn set_ticks_at_time(&mut self, ticks: f64, time: f64) -> Result<()> {
        check_time(time)?;
        if !ticks.is_finite() || ticks < 0.0 {
            return Err(Error::OutOfRange(format!(
                "tick position must be non-negative, got {ticks}"
            )));
        }
        self.tick_offset.cancel(time);
        self.tick_offset.add(TickOffset {
            time,
            ticks,
            seconds: self.frequency.duration_of_ticks(ticks, time),
        });
        Ok(())
    }

    /// When the clock last stopped at or before `time`.
    ///
    /// Positions at or after `time` never read the rate automation before
    /// this point.
    pub fn last_stop_before(&self, time: f64) -> f64 {
        self.state
            .get_last_state(PlaybackState::Stopped, time)
            .map_or(0.0, |e| e.time)
    }

    /// Drop the tick offsets that no position at or after `time` reads.
    ///
    /// Every jump leaves an offset behind, so a looping clock calls this as
    /// it advances. Returns how many offsets were dropped.
    pub fn forget_offsets_before(&mut self, time: f64) -> usize {
        let read: Vec<f64> = self
            .periods_until(time)
            .filter_map(|event| self.tick_offset.get(event.time).map(|o| o.time))
            .collect();
        let before = self.tick_offset.len();
        self.tick_offset
            .retain(|offset| offset.time > time || read.contains(&offset.time));
        let dropped = before - self.tick_offset.len();
        if dropped > 0 {
            log::trace!("[CLOCK] Dropped {dropped} tick offsets before {time:.3}s");
        }
        dropped
    }

    /// State events from the last stop at or before `time` up to `time`,
    /// closed by a virtual pause at `time`.
    fn periods_until(&self, time: f64) -> impl Iterator<Item = StateEvent> + '_ {
        let from = self
            .state
            .get_last_state(PlaybackState::Stopped, time)
            .map_or(f64::NEG_INFINITY, |e| e.time);
        self.state
            .events()
            .before_or_at(time)
            .iter()
            .filter(move |e| e.time >= from)
            .copied()
            .chain(std::iter::once(StateEvent {
                time,
                state: PlaybackState::Paused,
            }))
    }

    /// Clock position in ticks at `time`.
    pub fn get_ticks_at_time(&self, time: f64) -> f64 {
        let mut elapsed = 0.0;
        let mut last: Option<StateEvent> = None;
        for event in self.periods_until(time) {
            if let Some(prev) = last {
                let mut period_start = prev.time;
                if let Some(offset) = self.tick_offset.get(event.time) {
                    if offset.time >= prev.time {
                        elapsed = offset.ticks;
                        period_start = offset.time;
                    }
                }
                if prev.state.is_started() && !event.state.is_started() {
                    elapsed += self.frequency.ticks_at_time(event.time)
                        - self.frequency.ticks_at_time(period_start);
                }
            }
            last = Some(event);
        }
        elapsed
    }

    /// Seconds the clock has been running at `time`, excluding pauses.
    pub fn get_seconds_at_time(&self, time: f64) -> f64 {
        let mut elapsed = 0.0;
        let mut last: Option<StateEvent> = None;
        for event in self.periods_until(time) {
            if let Some(prev) = last {
                let mut period_start = prev.time;
                if let Some(offset) = self.tick_offset.get(event.time) {
                    if offset.time >= prev.time {
                        elapsed = offset.seconds;
                        period_start = offset.time;
                    }
                }
                if prev.state.is_started() && !event.state.is_started() {
                    elapsed += event.time - period_start;
                }
            }
            last = Some(event);
        }
        elapsed
    }

    /// The time at which the clock reaches `tick`, judged from the state
    /// and offset in effect at `before`.
    pub fn time_of_tick(&self, tick: f64, before: f64) -> f64 {
        let offset = self
            .tick_offset
            .get(before)
            .copied()
            .unwrap_or(TickOffset::ZERO);
        let state_time = self.state.get(before).map_or(0.0, |e| e.time);
        let start = offset.time.max(state_time);
        let absolute = self.frequency.ticks_at_time(start) + tick - offset.ticks;
        self.frequency.time_of_tick(absolute)
    }

    /// The time `offset` ticks after the position at `when`.
    pub fn next_tick_time(&self, offset: f64, when: f64) -> f64 {
        let current = self.get_ticks_at_time(when);
        self.time_of_tick(current + offset, when)
    }

    /// Call `callback(time, ticks)` for every tick in `[start, end)`.
    pub fn for_each_tick_between<F>(&self, start: f64, end: f64, mut callback: F)
    where
        F: FnMut(f64, u64),
    {
        self.ticks_between(start, end, &mut callback);
    }

    fn ticks_between(&self, start: f64, end: f64, callback: &mut dyn FnMut(f64, u64)) {
        let mut last = self.state.events().get_before(start).copied();
        for event in self.state.between(start, end) {
            if let Some(prev) = last {
                if prev.state.is_started() && !event.state.is_started() {
                    self.ticks_between(prev.time.max(start), event.time - self.sample_time, callback);
                }
            }
            last = Some(*event);
        }
        let Some(prev) = last.filter(|e| e.state.is_started()) else {
            return;
        };
        // Tick n of a running period is reached when n ticks have elapsed
        // since the period began. Both window edges use the same formula, so
        // adjacent windows never drop or repeat a tick.
        let from = prev.time.max(start);
        let base = self.frequency.ticks_at_time(prev.time);
        let elapsed = self.frequency.ticks_at_time(from) - base;
        let mut n = (elapsed - 1e-6).ceil().max(0.0);
        loop {
            let time = self.frequency.time_of_tick(base + n);
            if time.is_nan() || time >= end {
                break;
            }
            if time >= from {
                let ticks = self.get_ticks_at_time(time).round().max(0.0) as u64;
                log::trace!("[CLOCK] Tick {ticks} at {time:.6}s");
                callback(time, ticks);
            }
            n += 1.0;
        }
    }

    /// Everything that happens in `[last_update, until)`, ordered by time.
    ///
    /// Transitions scheduled in an already processed window are reported by
    /// the next call.
    pub fn update(&mut self, until: f64) -> Vec<ClockEvent> {
        let start = self.last_update;
        let mut events = std::mem::take(&mut self.pending);
        if until <= start {
            return events;
        }
        self.last_update = until;
        for event in self.state.between(start, until) {
            match event.state {
                PlaybackState::Started => events.push(ClockEvent::Start {
                    time: event.time,
                    ticks: self.get_ticks_at_time(event.time),
                }),
                PlaybackState::Stopped if event.time != 0.0 => {
                    events.push(ClockEvent::Stop { time: event.time })
                }
                PlaybackState::Stopped => {}
                PlaybackState::Paused => events.push(ClockEvent::Pause { time: event.time }),
            }
        }
        self.for_each_tick_between(start, until, |time, ticks| {
            events.push(ClockEvent::Tick { time, ticks })
        });
        events.sort_by(|a, b| a.time().total_cmp(&b.time()));
        events
    }
}
