//! A callback repeated on the transport that can be started and stopped.

use std::sync::Arc;

use super::event::{Callback, EventId};
use super::trigger::{Humanize, Trigger};
use super::Transport;
use crate::error::{Error, Result};
use crate::time::{IntoTimeExpression, TimeExpression};
use crate::timeline::PlaybackState;

/// One start of the loop, backed by a transport repeat.
#[derive(Clone, Copy, Debug)]
struct Run {
    id: Option<EventId>,
    start: f64,
    interval: f64,
    /// Calls left from `start`, unbounded when `None`.
    count: Option<u32>,
    stop: f64,
}

impl Run {
    fn end(&self) -> f64 {
        let natural = match self.count {
            Some(n) => self.start + n as f64 * self.interval,
            None => f64::INFINITY,
        };
        natural.min(self.stop)
    }

    fn contains(&self, ticks: f64) -> bool {
        self.start <= ticks && ticks < self.end()
    }

    fn next_at_or_after(&self, ticks: f64) -> f64 {
        if ticks <= self.start {
            return self.start;
        }
        let periods = ((ticks - self.start) / self.interval - 1e-6).ceil();
        self.start + periods * self.interval
    }

    /// Replace the transport repeat with one matching the current fields.
    fn schedule(&mut self, transport: &mut Transport, callback: &Callback) -> Result<()> {
        self.unschedule(transport);
        let end = self.end();
        if end > self.start {
            self.id = Some(transport.add_repeat(
                callback.clone(),
                self.interval,
                self.start,
                end - self.start,
            )?);
        }
        Ok(())
    }

    fn unschedule(&mut self, transport: &mut Transport) {
        if let Some(id) = self.id.take() {
            transport.clear(id);
        }
    }
}

/// Calls a callback every `interval` while started, optionally a fixed
/// number of times per start.
///
/// The loop keeps no reference to the transport; every operation takes it
/// explicitly. Mute, probability and humanize apply to calls already
/// scheduled.
pub struct Loop {
    callback: Callback,
    trigger: Trigger,
    interval: TimeExpression,
    iterations: Option<u32>,
    playback_rate: f64,
    runs: Vec<Run>,
}

impl Loop {
    pub fn new<F>(callback: F, interval: impl IntoTimeExpression) -> Result<Self>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let trigger = Trigger::default();
        Ok(Self {
            callback: trigger.wrap(Arc::new(callback)),
            trigger,
            interval: interval.into_time_expression()?,
            iterations: None,
            playback_rate: 1.0,
            runs: Vec::new(),
        })
    }

    /// Stop by itself after `iterations` calls per start.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = Some(iterations);
        self
    }

    pub fn interval(&self) -> &TimeExpression {
        &self.interval
    }

    pub fn iterations(&self) -> Option<u32> {
        self.iterations
    }

    /// Applies to later starts.
    pub fn set_iterations(&mut self, iterations: Option<u32>) {
        self.iterations = iterations;
    }

    pub fn mute(&self) -> bool {
        self.trigger.mute()
    }

    /// A muted loop keeps its place on the timeline but skips its calls.
    pub fn set_mute(&mut self, mute: bool) {
        self.trigger.set_mute(mute);
    }

    pub fn probability(&self) -> f64 {
        self.trigger.probability()
    }

    /// Chance from 0 to 1 that each call happens.
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

    /// Speed the loop up or slow it down. Running starts keep their
    /// remaining iterations and continue from their next call.
    pub fn set_playback_rate(&mut self, transport: &mut Transport, rate: f64) -> Result<()> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(Error::OutOfRange(format!(
                "playback rate must be positive, got {rate}"
            )));
        }
        self.scaled_interval(transport, rate)?;
        let scale = self.playback_rate / rate;
        self.playback_rate = rate;

        let at = transport.next_unprocessed_tick();
        let callback = &self.callback;
        for run in self.runs.iter_mut().filter(|run| run.end() > at) {
            let next = run.next_at_or_after(at);
            if next >= run.end() {
                continue;
            }
            let passed = ((next - run.start) / run.interval).round() as u32;
            run.count = run.count.map(|n| n.saturating_sub(passed));
            run.start = next;
            run.interval *= scale;
            run.schedule(transport, callback)?;
        }
        log::debug!("[TRANSPORT] Loop playback rate set to {rate}");
        Ok(())
    }

    fn scaled_interval(&self, transport: &Transport, rate: f64) -> Result<f64> {
        let interval = transport.interval_ticks(&self.interval)? / rate;
        if interval < 1.0 {
            return Err(Error::OutOfRange(format!(
                "interval must span at least one tick, got {interval}"
            )));
        }
        Ok(interval)
    }

    /// Begin calling the callback at `time`.
    pub fn start(&mut self, transport: &mut Transport, time: impl IntoTimeExpression) -> Result<()> {
        let start = transport.event_ticks(time)?;
        let mut run = Run {
            id: None,
            start,
            interval: self.scaled_interval(transport, self.playback_rate)?,
            count: self.iterations,
            stop: f64::INFINITY,
        };
        run.schedule(transport, &self.callback)?;
        self.runs.push(run);
        Ok(())
    }

    /// Stop calling the callback at `time`. Calls at exactly `time` are
    /// skipped.
    pub fn stop(&mut self, transport: &mut Transport, time: impl IntoTimeExpression) -> Result<()> {
        let at = transport.event_ticks(time)?;
        self.cancel_from(transport, at);
        let callback = &self.callback;
        for run in self.runs.iter_mut().filter(|r| r.end() > at) {
            run.stop = at;
            run.schedule(transport, callback)?;
        }
        Ok(())
    }

    /// Forget every start at or after `after`.
    pub fn cancel(&mut self, transport: &mut Transport, after: impl IntoTimeExpression) -> Result<()> {
        let at = transport.event_ticks(after)?;
        self.cancel_from(transport, at);
        Ok(())
    }

    fn cancel_from(&mut self, transport: &mut Transport, at: f64) {
        self.runs.retain_mut(|run| {
            if run.start >= at {
                run.unschedule(transport);
                false
            } else {
                true
            }
        });
    }

    /// Started when the transport is playing inside one of the loop's runs.
    pub fn state(&self, transport: &Transport) -> PlaybackState {
        match self.current_run(transport) {
            Some(_) => PlaybackState::Started,
            None => PlaybackState::Stopped,
        }
    }

    /// Position inside the current interval, from 0 to 1.
    pub fn progress(&self, transport: &Transport) -> f64 {
        let ticks = transport.ticks();
        self.current_run(transport)
            .map_or(0.0, |run| ((ticks - run.start) % run.interval) / run.interval)
    }

    fn current_run(&self, transport: &Transport) -> Option<&Run> {
        if !transport.state().is_started() {
            return None;
        }
        let ticks = transport.ticks();
        self.runs
            .iter()
            .filter(|run| run.contains(ticks))
            .max_by(|a, b| a.start.total_cmp(&b.start))
    }

    /// Clear every run from the transport.
    pub fn dispose(&mut self, transport: &mut Transport) {
        for mut run in self.runs.drain(..) {
            run.unschedule(transport);
        }
    }
}
