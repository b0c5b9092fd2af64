//! Parameter automation.
//!
//! - [`Param`] - scheduled control points over one numeric value
//! - [`Unit`] - range and conversion policy for a parameter
//! - [`Evaluable`] - anything that can report its value at a time
//! - [`Segment`] - closed-form curve shapes used for evaluation and
//!   integration
//!
//! A point describes how its value is reached from the previous state, so the
//! value between two points is shaped by the kind of the later one. Values
//! can be queried for any time, past or future, as long as the points are
//! still on the timeline.

pub mod curve;
pub mod event;
pub mod units;

pub use curve::Segment;
pub use event::{AutomationEvent, AutomationKind};
pub use units::{db_to_gain, gain_to_db, Unit};

use std::mem::discriminant;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::timeline::Timeline;
use curve::{curve_sample_time, curve_value, exponential_approach};

/// Something whose value can be read at any time.
pub trait Evaluable {
    /// Value at `time` in seconds.
    fn value_at_time(&self, time: f64) -> f64;

    /// Render one value per sample starting at `start`.
    fn fill_block(&self, start: f64, sample_rate: f64, out: &mut [f64]) {
        let step = 1.0 / sample_rate;
        for (i, sample) in out.iter_mut().enumerate() {
            *sample = self.value_at_time(start + i as f64 * step);
        }
    }
}

/// Read-only evaluation over a sorted slice of automation points.
#[derive(Clone, Copy)]
struct Schedule<'a> {
    events: &'a [AutomationEvent],
    initial: f64,
}

impl Schedule<'_> {
    /// Index of the last point at or before `t`.
    fn search(&self, t: f64) -> Option<usize> {
        self.events.partition_point(|e| e.time <= t).checked_sub(1)
    }

    /// Where the segment following point `index` starts: (time, value).
    fn anchor(&self, index: usize) -> (f64, f64) {
        let event = &self.events[index];
        match &event.kind {
            AutomationKind::Target { .. } => (event.time, self.start_value(index)),
            AutomationKind::ValueCurve { duration, .. } => (event.time + duration, event.value),
            _ => (event.time, event.value),
        }
    }

    /// The value just before point `index` takes effect.
    fn start_value(&self, index: usize) -> f64 {
        let events = self.events;
        if events[index].is_ramp() {
            return events[index].value;
        }
        // Walk back over a chain of targets to the first point whose held
        // value is known without recursion.
        let mut first = index;
        while first > 0 && matches!(events[first - 1].kind, AutomationKind::Target { .. }) {
            first -= 1;
        }
        let mut value = match first.checked_sub(1) {
            None => self.initial,
            Some(prev) => {
                let prev = &events[prev];
                match &prev.kind {
                    AutomationKind::ValueCurve { samples, duration } => {
                        curve_value(samples, prev.time, *duration, events[first].time)
                    }
                    _ => prev.value,
                }
            }
        };
        for j in first..index {
            if let AutomationKind::Target { time_constant } = events[j].kind {
                value = exponential_approach(
                    events[j].time,
                    value,
                    events[j].value,
                    time_constant,
                    events[j + 1].time,
                );
            }
        }
        value
    }

    fn segment_at(&self, t: f64) -> Segment {
        let events = self.events;
        let index = self.search(t);

        if let Some(i) = index {
            let event = &events[i];
            if let AutomationKind::ValueCurve { samples, duration } = &event.kind {
                if t < event.time + duration {
                    return curve_piece(samples, event.time, *duration, t);
                }
            }
        }

        let next_index = index.map_or(0, |i| i + 1);
        if let Some(next) = events.get(next_index) {
            if next.is_ramp() {
                let (t0, v0) = match index {
                    Some(i) => self.anchor(i),
                    None if t < 0.0 => {
                        return Segment::Constant {
                            value: self.initial,
                        }
                    }
                    None => (0.0, self.initial),
                };
                return match next.kind {
                    AutomationKind::LinearRamp => Segment::Linear {
                        t0,
                        v0,
                        t1: next.time,
                        v1: next.value,
                    },
                    // Rejected on insert; only reachable through memory
                    // eviction of the anchoring point.
                    _ if v0 * next.value <= 0.0 => Segment::Constant { value: v0 },
                    _ => Segment::Exponential {
                        t0,
                        v0,
                        t1: next.time,
                        v1: next.value,
                    },
                };
            }
        }

        match index {
            None => Segment::Constant {
                value: self.initial,
            },
            Some(i) => {
                let event = &events[i];
                match event.kind {
                    AutomationKind::Target { time_constant } => Segment::Target {
                        t0: event.time,
                        v0: self.start_value(i),
                        v1: event.value,
                        time_constant,
                    },
                    _ => Segment::Constant { value: event.value },
                }
            }
        }
    }

    fn value_at(&self, t: f64) -> f64 {
        self.segment_at(t).value_at(t)
    }

    /// The first time after `a` where the segment shape may change.
    fn next_breakpoint(&self, a: f64) -> f64 {
        let after = self.events.partition_point(|e| e.time <= a);
        let mut next = self.events.get(after).map_or(f64::INFINITY, |e| e.time);
        if a < 0.0 {
            next = next.min(0.0);
        }
        if let Some(i) = self.search(a) {
            let event = &self.events[i];
            if let AutomationKind::ValueCurve { samples, duration } = &event.kind {
                let len = samples.len();
                if a < event.time + duration && len > 1 {
                    let position = (a - event.time) / duration * (len - 1) as f64;
                    let mut k = (position.max(0.0).floor() as usize + 1).min(len - 1);
                    while k < len - 1 && curve_sample_time(len, event.time, *duration, k) <= a {
                        k += 1;
                    }
                    let sample_time = curve_sample_time(len, event.time, *duration, k);
                    if sample_time > a {
                        next = next.min(sample_time);
                    }
                }
            }
        }
        next
    }

    fn integrate(&self, from: f64, to: f64) -> f64 {
        if to < from {
            return -self.integrate(to, from);
        }
        let mut total = 0.0;
        let mut a = from;
        while a < to {
            let b = self.next_breakpoint(a).min(to);
            if b <= a {
                break;
            }
            total += self.segment_at(a).integral(a, b);
            a = b;
        }
        total
    }

    /// Why the exponential ramp at `index` is invalid, if it is one.
    fn exponential_ramp_error(&self, index: usize) -> Option<String> {
        let event = self.events.get(index)?;
        if !matches!(event.kind, AutomationKind::ExponentialRamp) {
            return None;
        }
        let from = match index.checked_sub(1) {
            Some(prev) => self.anchor(prev).1,
            None => self.initial,
        };
        if from == 0.0 || event.value == 0.0 || from.signum() != event.value.signum() {
            return Some(format!(
                "exponential ramp from {from} to {} at {}s needs non-zero values of the same sign",
                event.value, event.time
            ));
        }
        None
    }
}

fn curve_piece(samples: &[f64], start: f64, duration: f64, t: f64) -> Segment {
    let len = samples.len();
    if len < 2 || duration <= 0.0 {
        return Segment::Constant {
            value: samples.last().copied().unwrap_or(0.0),
        };
    }
    let last = len - 1;
    let position = ((t - start) / duration * last as f64).max(0.0);
    let k = (position.floor() as usize).min(last - 1);
    Segment::Linear {
        t0: curve_sample_time(len, start, duration, k),
        v0: samples[k],
        t1: curve_sample_time(len, start, duration, k + 1),
        v1: samples[k + 1],
    }
}

fn is_curve(event: &AutomationEvent) -> bool {
    matches!(event.kind, AutomationKind::ValueCurve { .. })
}

fn check_time(time: f64) -> Result<()> {
    if !time.is_finite() || time < 0.0 {
        return Err(Error::OutOfRange(format!(
            "automation time must be finite and non-negative, got {time}"
        )));
    }
    Ok(())
}

/// An automatable numeric parameter.
///
/// Points are kept on a [`Timeline`] ordered by time. Adding a point at a
/// time that already holds one replaces it. Value curves only ever replace
/// value curves; their overlap rules keep other points off their start.
#[derive(Clone, Debug)]
pub struct Param {
    name: String,
    unit: Unit,
    initial: f64,
    events: Timeline<AutomationEvent>,
}

impl Param {
    /// Create a parameter holding `value` until the first point.
    pub fn new(unit: Unit, value: f64) -> Result<Self> {
        unit.validate(value)?;
        Ok(Self {
            name: unit.to_string(),
            unit,
            initial: unit.to_internal(value),
            events: Timeline::new(),
        })
    }

    /// Name used in log messages.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// The value reported before the first point, in API units.
    pub fn initial_value(&self) -> f64 {
        self.unit.from_internal(self.initial)
    }

    /// Scheduled points, values in internal units.
    pub fn events(&self) -> &Timeline<AutomationEvent> {
        &self.events
    }

    /// Number of scheduled points.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Cap the number of retained points.
    pub fn set_memory(&mut self, memory: Option<usize>) {
        self.events.set_memory(memory);
    }

    /// Drop the points before `index` and restate the point at `index` as a
    /// plain set that the parameter starts from.
    ///
    /// Values from that point on are unchanged as long as it is a set or a
    /// ramp end. Earlier times read its value.
    pub(crate) fn forget_before_index(&mut self, index: usize) {
        let Some(anchor) = self.events.get_index(index).cloned() else {
            return;
        };
        let mut position = 0;
        self.events.retain(|_| {
            position += 1;
            position > index
        });
        if let Some(first) = self.events.peek_mut() {
            *first = AutomationEvent::set(anchor.time, anchor.value);
        }
        self.initial = anchor.value;
        log::trace!(
            "[PARAM] {}: forgot {index} points before {:.3}s",
            self.name,
            anchor.time
        );
    }

    /// The value before the first point, in internal units.
    pub(crate) fn initial_internal(&self) -> f64 {
        self.initial
    }

    fn schedule(&self) -> Schedule<'_> {
        Schedule {
            events: self.events.as_slice(),
            initial: self.initial,
        }
    }

    fn api_value(&self, value: f64) -> Result<f64> {
        self.unit.validate(value)?;
        Ok(self.unit.to_internal(value))
    }

    fn check_curve_overlap(&self, event: &AutomationEvent) -> Result<()> {
        let time = event.time;
        let is_curve = matches!(event.kind, AutomationKind::ValueCurve { .. });
        if let Some(last) = self.events.get(time) {
            if matches!(last.kind, AutomationKind::ValueCurve { .. }) {
                let inside = last.time < time && time < last.end_time();
                let same_start = last.time == time && !is_curve;
                if inside || same_start {
                    return Err(Error::State(format!(
                        "{} at {time}s overlaps the value curve running from {}s to {}s",
                        event.kind_name(),
                        last.time,
                        last.end_time()
                    )));
                }
            }
        }
        if is_curve {
            let end = event.end_time();
            let blocked = self
                .events
                .at_time(time)
                .iter()
                .any(|e| !matches!(e.kind, AutomationKind::ValueCurve { .. }))
                || self.events.get_after(time).is_some_and(|e| e.time < end);
            if blocked {
                return Err(Error::State(format!(
                    "value curve from {time}s to {end}s overlaps scheduled automation"
                )));
            }
        }
        Ok(())
    }

    fn insert(&mut self, event: AutomationEvent) -> Result<()> {
        self.insert_with(event, |a, b| is_curve(a) == is_curve(b))
    }

    /// Insert right after a hold point made by [`Param::set_ramp_point`].
    ///
    /// A hold that ends a ramp stays in place so the curve leading up to it
    /// is unchanged; any other point at that time is replaced.
    fn insert_after_hold(&mut self, event: AutomationEvent) -> Result<()> {
        self.insert_with(event, |existing, new| {
            !existing.is_ramp() && is_curve(existing) == is_curve(new)
        })
    }

    fn insert_with<F>(&mut self, event: AutomationEvent, replaces: F) -> Result<()>
    where
        F: Fn(&AutomationEvent, &AutomationEvent) -> bool,
    {
        self.check_curve_overlap(&event)?;
        let kind = event.kind_name();
        let time = event.time;
        let mut candidate = self.events.clone();
        let index = candidate.add_or_replace(event, replaces);
        if let Some(index) = index {
            let schedule = Schedule {
                events: candidate.as_slice(),
                initial: self.initial,
            };
            for i in [index, index + 1] {
                if let Some(reason) = schedule.exponential_ramp_error(i) {
                    log::warn!("[PARAM] {}: rejected {kind} at {time:.3}s: {reason}", self.name);
                    return Err(Error::Domain(reason));
                }
            }
        }
        log::trace!("[PARAM] {}: {kind} at {time:.3}s", self.name);
        self.events = candidate;
        Ok(())
    }

    /// Apply a multi-step edit atomically: on error nothing changes.
    fn transaction<F>(&mut self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Param) -> Result<()>,
    {
        let mut next = self.clone();
        edit(&mut next)?;
        *self = next;
        Ok(())
    }

    /// Jump to `value` at `time`.
    pub fn set_value_at_time(&mut self, value: f64, time: f64) -> Result<()> {
        check_time(time)?;
        let value = self.api_value(value)?;
        self.insert(AutomationEvent::set(time, value))
    }

    /// Ramp linearly from the previous point to `value` at `end_time`.
    pub fn linear_ramp_to_value_at_time(&mut self, value: f64, end_time: f64) -> Result<()> {
        check_time(end_time)?;
        let value = self.api_value(value)?;
        self.insert(AutomationEvent {
            time: end_time,
            value,
            kind: AutomationKind::LinearRamp,
        })
    }

    /// Ramp exponentially from the previous point to `value` at `end_time`.
    ///
    /// Both ends must be non-zero with the same sign.
    pub fn exponential_ramp_to_value_at_time(&mut self, value: f64, end_time: f64) -> Result<()> {
        check_time(end_time)?;
        let value = self.api_value(value)?;
        self.insert(AutomationEvent {
            time: end_time,
            value,
            kind: AutomationKind::ExponentialRamp,
        })
    }

    /// Approach `value` from `start_time` on, with the given time constant.
    pub fn set_target_at_time(
        &mut self,
        value: f64,
        start_time: f64,
        time_constant: f64,
    ) -> Result<()> {
        let event = self.target_event(value, start_time, time_constant)?;
        self.insert(event)
    }

    fn target_event(
        &self,
        value: f64,
        start_time: f64,
        time_constant: f64,
    ) -> Result<AutomationEvent> {
        check_time(start_time)?;
        if !time_constant.is_finite() || time_constant <= 0.0 {
            return Err(Error::OutOfRange(format!(
                "time constant must be positive, got {time_constant}"
            )));
        }
        Ok(AutomationEvent {
            time: start_time,
            value: self.api_value(value)?,
            kind: AutomationKind::Target { time_constant },
        })
    }

    /// Follow `values` (times `scaling`) spread evenly over `duration`.
    pub fn set_value_curve_at_time(
        &mut self,
        values: &[f64],
        start_time: f64,
        duration: f64,
        scaling: f64,
    ) -> Result<()> {
        check_time(start_time)?;
        if values.len() < 2 {
            return Err(Error::OutOfRange(format!(
                "value curve needs at least 2 values, got {}",
                values.len()
            )));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(Error::OutOfRange(format!(
                "value curve duration must be positive, got {duration}"
            )));
        }
        let samples = values
            .iter()
            .map(|v| {
                let internal = self.unit.to_internal(*v) * scaling;
                self.unit.validate(self.unit.from_internal(internal))?;
                Ok(internal)
            })
            .collect::<Result<Vec<f64>>>()?;
        let last = samples[samples.len() - 1];
        self.insert(AutomationEvent {
            time: start_time,
            value: last,
            kind: AutomationKind::ValueCurve {
                samples: Arc::from(samples),
                duration,
            },
        })
    }

    /// Remove every point at or after `after`.
    ///
    /// A value curve still running at `after` is removed as well.
    pub fn cancel_scheduled_values(&mut self, after: f64) -> Result<()> {
        check_time(after)?;
        let running_curve = self
            .events
            .get_before(after)
            .filter(|e| matches!(e.kind, AutomationKind::ValueCurve { .. }) && e.end_time() > after)
            .map(|e| e.time);
        self.events.cancel(running_curve.unwrap_or(after).min(after));
        log::debug!(
            "[PARAM] {}: cancelled automation at or after {after:.3}s",
            self.name
        );
        Ok(())
    }

    /// Freeze the value at `time`: drop everything after it and keep the
    /// curve leading up to it unchanged.
    pub fn cancel_and_hold_at_time(&mut self, time: f64) -> Result<()> {
        check_time(time)?;
        let value = self.schedule().value_at(time);
        let cut = self
            .events
            .get_after(time)
            .map(|e| (e.time, discriminant(&e.kind), e.kind_name()));
        if let Some((cut_time, ..)) = cut {
            self.events.cancel(cut_time);
        }

        // A curve still running at `time` is rewritten as the ramps through
        // its samples up to `time`.
        let running = self
            .events
            .get(time)
            .filter(|e| e.time < time && time < e.end_time())
            .cloned();
        if let Some(curve) = running {
            if let AutomationKind::ValueCurve { samples, duration } = &curve.kind {
                let start = curve.time;
                self.events.remove_by(|e| e.time == start);
                self.events.add(AutomationEvent::set(start, samples[0]));
                for (k, sample) in samples.iter().enumerate().skip(1) {
                    let sample_time = curve_sample_time(samples.len(), start, *duration, k);
                    if sample_time >= time {
                        break;
                    }
                    self.events.add(AutomationEvent {
                        time: sample_time,
                        value: *sample,
                        kind: AutomationKind::LinearRamp,
                    });
                }
                self.events.add(AutomationEvent {
                    time,
                    value,
                    kind: AutomationKind::LinearRamp,
                });
                log::debug!("[PARAM] {}: held {value} at {time:.3}s inside a curve", self.name);
                return Ok(());
            }
        }

        let at_time = self.events.get(time).filter(|e| e.time == time).cloned();
        match at_time {
            Some(existing) => {
                if matches!(
                    existing.kind,
                    AutomationKind::Target { .. } | AutomationKind::ValueCurve { .. }
                ) {
                    self.events.remove_by(|e| e.time == time && e.kind == existing.kind);
                    self.events.add(AutomationEvent::set(time, value));
                }
            }
            None => {
                let kind = match cut {
                    Some((_, d, _)) if d == discriminant(&AutomationKind::LinearRamp) => {
                        AutomationKind::LinearRamp
                    }
                    Some((_, d, _)) if d == discriminant(&AutomationKind::ExponentialRamp) => {
                        AutomationKind::ExponentialRamp
                    }
                    _ => AutomationKind::Set,
                };
                self.events.add(AutomationEvent { time, value, kind });
            }
        }
        log::debug!(
            "[PARAM] {}: held {value} at {time:.3}s (cut {})",
            self.name,
            cut.map_or("nothing", |c| c.2)
        );
        Ok(())
    }

    /// Value at `time`, in API units.
    pub fn get_value_at_time(&self, time: f64) -> f64 {
        self.unit.from_internal(self.schedule().value_at(time))
    }

    /// Shorthand for [`Param::get_value_at_time`].
    pub fn value_at(&self, time: f64) -> f64 {
        self.get_value_at_time(time)
    }

    /// Replace all automation from `now` on with a constant `value`.
    pub fn set_value(&mut self, value: f64, now: f64) -> Result<()> {
        self.transaction(|param| {
            param.cancel_scheduled_values(now)?;
            param.set_value_at_time(value, now)
        })
    }

    /// Anchor the next ramp at the current value at `time`.
    ///
    /// Everything after `time` is dropped and a point holding the value at
    /// `time` is left in place.
    pub fn set_ramp_point(&mut self, time: f64) -> Result<()> {
        self.cancel_and_hold_at_time(time)
    }

    /// Ramp linearly from the value at `start_time` to `value` over
    /// `ramp_time` seconds.
    pub fn linear_ramp_to(&mut self, value: f64, ramp_time: f64, start_time: f64) -> Result<()> {
        self.ramp_with(value, ramp_time, start_time, AutomationKind::LinearRamp)
    }

    /// Ramp exponentially from the value at `start_time` to `value` over
    /// `ramp_time` seconds.
    pub fn exponential_ramp_to(
        &mut self,
        value: f64,
        ramp_time: f64,
        start_time: f64,
    ) -> Result<()> {
        self.ramp_with(value, ramp_time, start_time, AutomationKind::ExponentialRamp)
    }

    /// Ramp to `value`, exponentially for frequency, bpm and decibel units
    /// and linearly otherwise.
    pub fn ramp_to(&mut self, value: f64, ramp_time: f64, start_time: f64) -> Result<()> {
        if self.unit.prefers_exponential() {
            self.exponential_ramp_to(value, ramp_time, start_time)
        } else {
            self.linear_ramp_to(value, ramp_time, start_time)
        }
    }

    /// Approach `value` from the value at `start_time`, landing on it after
    /// `ramp_time` seconds.
    pub fn target_ramp_to(&mut self, value: f64, ramp_time: f64, start_time: f64) -> Result<()> {
        self.transaction(|param| {
            param.set_ramp_point(start_time)?;
            param.exponential_approach_value_at_time(value, start_time, ramp_time)
        })
    }

    /// Exponential approach towards `value` starting at `time`, finished by
    /// a short linear ramp so the value is reached at `time + ramp_time`.
    pub fn exponential_approach_value_at_time(
        &mut self,
        value: f64,
        time: f64,
        ramp_time: f64,
    ) -> Result<()> {
        if ramp_time <= 0.0 {
            return self.set_value_at_time(value, time);
        }
        let time_constant = (ramp_time + 1.0).ln() / 200f64.ln();
        self.transaction(|param| {
            let target = param.target_event(value, time, time_constant)?;
            param.insert_after_hold(target)?;
            param.cancel_and_hold_at_time(time + ramp_time * 0.9)?;
            param.linear_ramp_to_value_at_time(value, time + ramp_time)
        })
    }

    fn ramp_with(
        &mut self,
        value: f64,
        ramp_time: f64,
        start_time: f64,
        kind: AutomationKind,
    ) -> Result<()> {
        if !ramp_time.is_finite() || ramp_time < 0.0 {
            return Err(Error::OutOfRange(format!(
                "ramp time must be non-negative, got {ramp_time}"
            )));
        }
        self.transaction(|param| {
            param.set_ramp_point(start_time)?;
            if ramp_time == 0.0 {
                let value = param.api_value(value)?;
                return param.insert_after_hold(AutomationEvent::set(start_time, value));
            }
            let end = start_time + ramp_time;
            match kind {
                AutomationKind::ExponentialRamp => {
                    param.exponential_ramp_to_value_at_time(value, end)
                }
                _ => param.linear_ramp_to_value_at_time(value, end),
            }
        })
    }

    /// Integral of the internal value over `[from, to]`.
    pub fn integrate(&self, from: f64, to: f64) -> f64 {
        self.schedule().integrate(from, to)
    }

    /// Internal value at `time`.
    pub(crate) fn internal_value_at(&self, time: f64) -> f64 {
        self.schedule().value_at(time)
    }

    /// Shape of the internal value at `time`.
    pub(crate) fn segment_at(&self, time: f64) -> Segment {
        self.schedule().segment_at(time)
    }

    /// Next time after `time` where the shape may change.
    pub(crate) fn next_breakpoint(&self, time: f64) -> f64 {
        self.schedule().next_breakpoint(time)
    }
}

impl Evaluable for Param {
    fn value_at_time(&self, time: f64) -> f64 {
        self.get_value_at_time(time)
    }
}
