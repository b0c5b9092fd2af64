//! Tempo automation integrated into tick counts.
//!
//! A [`TickSignal`] is a [`Param`] whose value is a rate (bpm or hertz). The
//! number of ticks elapsed since time 0 is the integral of that rate, so
//! tempo ramps produce musically correct positions. Integration is closed
//! form per segment; inverting it (tick to time) is closed form for constant
//! and linear segments and a bisection for the rest.
//!
//! Old automation points can be folded into a running total with
//! [`TickSignal::forget_before`]; counts from the fold point on stay exact.

use crate::error::Result;
use crate::param::{AutomationEvent, AutomationKind, Param, Segment, Unit};

const BISECT_ITERATIONS: usize = 200;
const MAX_EXPANSIONS: usize = 64;

/// A rate parameter that can be integrated into ticks.
#[derive(Clone, Debug)]
pub struct TickSignal {
    param: Param,
    /// Ticks per second for one unit of the parameter value.
    multiplier: f64,
    /// Integral of the parameter value from 0 to each automation point.
    cumulative: Vec<f64>,
    /// Where the integral starts: time 0, or the last folded point.
    origin: f64,
    /// Integral of the parameter value from 0 to `origin`.
    base: f64,
}

impl TickSignal {
    /// A tempo in beats per minute counted at `ppq` ticks per quarter note.
    pub fn bpm(bpm: f64, ppq: u32) -> Result<Self> {
        let param = Param::new(Unit::Bpm, bpm)?.with_name("bpm");
        Ok(Self::from_param(param, ppq as f64 / 60.0))
    }

    /// A rate in ticks per second.
    pub fn frequency(hz: f64) -> Result<Self> {
        let param = Param::new(Unit::Frequency, hz)?.with_name("frequency");
        Ok(Self::from_param(param, 1.0))
    }

    fn from_param(param: Param, multiplier: f64) -> Self {
        let mut signal = Self {
            param,
            multiplier,
            cumulative: Vec::new(),
            origin: 0.0,
            base: 0.0,
        };
        signal.refresh();
        signal
    }

    pub fn param(&self) -> &Param {
        &self.param
    }

    pub fn unit(&self) -> Unit {
        self.param.unit()
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Change how many ticks one unit of the value produces per second.
    pub fn set_multiplier(&mut self, multiplier: f64) {
        self.multiplier = multiplier;
    }

    /// The rate at `time`, in the parameter's unit.
    pub fn value_at(&self, time: f64) -> f64 {
        self.param.get_value_at_time(time)
    }

    /// Ticks per second at `time`.
    pub fn ticks_per_second_at(&self, time: f64) -> f64 {
        self.param.internal_value_at(time) * self.multiplier
    }

    /// Edit the automation. The edit applies in full or not at all.
    pub fn automate<F>(&mut self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Param) -> Result<()>,
    {
        let mut next = self.param.clone();
        edit(&mut next)?;
        self.param = next;
        self.refresh();
        Ok(())
    }

    pub fn set_value_at_time(&mut self, value: f64, time: f64) -> Result<()> {
        self.automate(|p| p.set_value_at_time(value, time))
    }

    /// Replace the rate from `now` on.
    pub fn set_value(&mut self, value: f64, now: f64) -> Result<()> {
        self.automate(|p| p.set_value(value, now))
    }

    /// Glide to `value` over `ramp_time` seconds starting at `start_time`.
    pub fn ramp_to(&mut self, value: f64, ramp_time: f64, start_time: f64) -> Result<()> {
        self.automate(|p| p.ramp_to(value, ramp_time, start_time))
    }

    /// Fold the points before `time` into the running tick count, keeping at
    /// most `keep` points. Returns how many points were dropped.
    ///
    /// Only a set or a ramp end at or before `time` can become the new first
    /// point, so tick counts from there on do not change. Counts for earlier
    /// times use the value held at that point.
    pub fn forget_before(&mut self, time: f64, keep: usize) -> usize {
        let events = self.param.events().as_slice();
        let excess = events.len().saturating_sub(keep.max(1));
        let passed = events.partition_point(|e| e.time <= time);
        let mut anchor = excess.min(passed.saturating_sub(1));
        while anchor > 0 && !holds_value(&events[anchor]) {
            anchor -= 1;
        }
        if anchor == 0 {
            return 0;
        }
        self.origin = events[anchor].time;
        self.base = self.cumulative[anchor];
        self.param.forget_before_index(anchor);
        self.refresh();
        log::debug!(
            "[CLOCK] Folded {anchor} {} points into the count at {:.3}s",
            self.param.name(),
            self.origin
        );
        anchor
    }

    fn refresh(&mut self) {
        let mut total = self.base;
        let mut last = self.origin;
        let cumulative = self
            .param
            .events()
            .iter()
            .map(|event| {
                total += self.param.integrate(last, event.time);
                last = event.time;
                total
            })
            .collect();
        self.cumulative = cumulative;
    }

    /// Ticks elapsed between time 0 and `time`. Negative times count as 0.
    pub fn ticks_at_time(&self, time: f64) -> f64 {
        let time = time.max(0.0);
        let events = self.param.events().as_slice();
        let index = events.partition_point(|e| e.time <= time);
        let (from, base) = match index.checked_sub(1) {
            Some(i) => (events[i].time, self.cumulative[i]),
            None => (self.origin, self.base),
        };
        (base + self.param.integrate(from, time)) * self.multiplier
    }

    /// The time at which `tick` ticks have elapsed since time 0.
    ///
    /// Returns infinity when the rate never gets there.
    pub fn time_of_tick(&self, tick: f64) -> f64 {
        if tick <= 0.0 {
            return 0.0;
        }
        if self.multiplier <= 0.0 {
            return f64::INFINITY;
        }
        let target = tick / self.multiplier;
        let events = self.param.events().as_slice();
        let index = self.cumulative.partition_point(|c| *c <= target);
        let (mut a, mut remaining) = match index.checked_sub(1) {
            Some(i) => (events[i].time, target - self.cumulative[i]),
            None => (self.origin, target - self.base),
        };
        if remaining < 0.0 {
            // Before the fold point the rate is the value held there.
            let rate = self.param.initial_internal();
            if rate <= 0.0 {
                return a;
            }
            return (a + remaining / rate).max(0.0);
        }
        loop {
            let segment = self.param.segment_at(a);
            let b = self.param.next_breakpoint(a);
            if b.is_infinite() {
                return solve_open(&segment, a, remaining);
            }
            let area = segment.integral(a, b);
            if area >= remaining {
                return match segment.solve(a, remaining) {
                    Some(x) => x.min(b),
                    None => bisect(&segment, a, b, remaining),
                };
            }
            remaining -= area;
            a = b;
        }
    }

    /// Seconds it takes for `ticks` ticks to elapse starting at `time`.
    pub fn duration_of_ticks(&self, ticks: f64, time: f64) -> f64 {
        let start = self.ticks_at_time(time);
        self.time_of_tick(start + ticks) - time.max(0.0)
    }
}

fn holds_value(event: &AutomationEvent) -> bool {
    matches!(
        event.kind,
        AutomationKind::Set | AutomationKind::LinearRamp | AutomationKind::ExponentialRamp
    )
}

fn solve_open(segment: &Segment, a: f64, area: f64) -> f64 {
    if let Some(x) = segment.solve(a, area) {
        return x;
    }
    let mut span = 1.0;
    for _ in 0..MAX_EXPANSIONS {
        let hi = a + span;
        if segment.integral(a, hi) >= area {
            return bisect(segment, a, hi, area);
        }
        span *= 2.0;
    }
    f64::INFINITY
}

fn bisect(segment: &Segment, a: f64, b: f64, area: f64) -> f64 {
    let (mut lo, mut hi) = (a, b);
    for _ in 0..BISECT_ITERATIONS {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        if segment.integral(a, mid) < area {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_tempo_quarter_note() {
        let signal = TickSignal::bpm(120.0, 192).unwrap();
        assert!((signal.ticks_at_time(0.5) - 192.0).abs() < 1e-9);
        assert!((signal.ticks_at_time(2.0) - 768.0).abs() < 1e-9);
        assert!((signal.time_of_tick(192.0) - 0.5).abs() < 1e-9);
        assert!((signal.duration_of_ticks(96.0, 1.0) - 0.25).abs() < 1e-9);
        assert_eq!(signal.ticks_at_time(-1.0), 0.0);
        assert_eq!(signal.time_of_tick(0.0), 0.0);
    }

    #[test]
    fn test_linear_tempo_ramp() {
        let mut signal = TickSignal::frequency(1.0).unwrap();
        signal.set_value_at_time(1.0, 0.0).unwrap();
        signal
            .automate(|p| p.linear_ramp_to_value_at_time(3.0, 2.0))
            .unwrap();
        assert!((signal.ticks_at_time(2.0) - 4.0).abs() < 1e-9);
        assert!((signal.ticks_at_time(3.0) - 7.0).abs() < 1e-9);
        assert!((signal.time_of_tick(1.5) - 1.0).abs() < 1e-9);
        assert!((signal.time_of_tick(4.0) - 2.0).abs() < 1e-9);
        assert!((signal.time_of_tick(5.5) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_exponential_tempo_ramp_inverts() {
        let mut signal = TickSignal::frequency(1.0).unwrap();
        signal.set_value_at_time(1.0, 0.0).unwrap();
        signal
            .automate(|p| p.exponential_ramp_to_value_at_time(4.0, 2.0))
            .unwrap();
        let expected = 2.0 / 4f64.ln();
        assert!((signal.ticks_at_time(1.0) - expected).abs() < 1e-9);
        for time in [0.3, 1.3, 1.9, 2.7] {
            let ticks = signal.ticks_at_time(time);
            assert!((signal.time_of_tick(ticks) - time).abs() < 1e-9);
        }
    }

    #[test]
    fn test_target_tempo_inverts() {
        let mut signal = TickSignal::bpm(100.0, 96).unwrap();
        signal
            .automate(|p| p.set_target_at_time(140.0, 1.0, 0.5))
            .unwrap();
        for time in [0.5, 1.2, 4.0] {
            let ticks = signal.ticks_at_time(time);
            assert!((signal.time_of_tick(ticks) - time).abs() < 1e-9);
        }
    }

    #[test]
    fn test_zero_rate_never_reaches_tick() {
        let signal = TickSignal::frequency(0.0).unwrap();
        assert!(signal.time_of_tick(1.0).is_infinite());
    }

    #[test]
    fn test_failed_automation_keeps_ticks() {
        let mut signal = TickSignal::bpm(120.0, 192).unwrap();
        let before = signal.ticks_at_time(3.0);
        let result = signal.automate(|p| {
            p.set_value_at_time(60.0, 1.0)?;
            p.set_value_at_time(-1.0, 2.0)
        });
        assert!(result.is_err());
        assert!((signal.ticks_at_time(3.0) - before).abs() < 1e-9);
    }

    #[test]
    fn test_forget_before_keeps_later_ticks() {
        let mut signal = TickSignal::bpm(120.0, 192).unwrap();
        signal
            .automate(|p| {
                p.set_value_at_time(60.0, 1.0)?;
                p.linear_ramp_to_value_at_time(180.0, 2.0)?;
                p.set_value_at_time(90.0, 3.0)?;
                p.exponential_ramp_to_value_at_time(120.0, 4.0)
            })
            .unwrap();
        let sample_times = [3.0, 3.5, 4.0, 6.0];
        let ticks: Vec<f64> = sample_times.iter().map(|t| signal.ticks_at_time(*t)).collect();

        assert_eq!(signal.forget_before(3.5, 2), 2);
        assert_eq!(signal.param().len(), 2);
        for (t, expected) in sample_times.iter().zip(&ticks) {
            assert!((signal.ticks_at_time(*t) - expected).abs() < 1e-6);
            assert!((signal.time_of_tick(*expected) - t).abs() < 1e-6);
        }
        assert!((signal.value_at(3.5) - 90.0 * (4.0f64 / 3.0).sqrt()).abs() < 1e-6);

        // Later edits build on the folded count.
        signal.set_value(60.0, 5.0).unwrap();
        assert!((signal.ticks_at_time(4.0) - ticks[2]).abs() < 1e-6);
        assert!((signal.ticks_at_time(6.0) - (signal.ticks_at_time(5.0) + 192.0)).abs() < 1e-6);
    }

    #[test]
    fn test_forget_before_leaves_future_points() {
        let mut signal = TickSignal::bpm(120.0, 192).unwrap();
        signal.set_value_at_time(60.0, 1.0).unwrap();
        signal.set_value_at_time(90.0, 2.0).unwrap();
        signal.set_value_at_time(120.0, 3.0).unwrap();
        let before = signal.ticks_at_time(1.5);
        assert_eq!(signal.forget_before(0.5, 1), 0);
        assert_eq!(signal.forget_before(10.0, 8), 0);
        assert_eq!(signal.param().len(), 3);
        assert!((signal.ticks_at_time(1.5) - before).abs() < 1e-9);
    }

    #[test]
    fn test_multiplier_scales_ticks() {
        let mut signal = TickSignal::bpm(120.0, 192).unwrap();
        signal.set_multiplier(96.0 / 60.0);
        assert!((signal.ticks_at_time(0.5) - 96.0).abs() < 1e-9);
        assert!((signal.ticks_per_second_at(0.0) - 192.0).abs() < 1e-9);
        assert!((signal.value_at(0.0) - 120.0).abs() < 1e-12);
    }
}
