//! Evenly spaced steps, with nested groups splitting a step further.

use super::part::{Looping, Part};
use super::Transport;
use crate::error::Result;
use crate::time::{IntoTimeExpression, Op, TimeExpression};
use crate::timeline::PlaybackState;

/// One step of a [`Sequence`].
#[derive(Clone, Debug, PartialEq)]
pub enum Step<T> {
    Rest,
    Value(T),
    /// Steps sharing this step's length equally.
    Group(Vec<Step<T>>),
}

/// A [`Part`] written as a list of steps `subdivision` apart. Loops over
/// all of its steps by default.
pub struct Sequence<T> {
    part: Part<T>,
    subdivision: TimeExpression,
    steps: Vec<Step<T>>,
}

impl<T: Clone + Send + Sync + 'static> Sequence<T> {
    pub fn new<F>(callback: F, steps: Vec<Step<T>>, subdivision: impl IntoTimeExpression) -> Result<Self>
    where
        F: Fn(f64, &T) + Send + Sync + 'static,
    {
        let subdivision = subdivision.into_time_expression()?;
        let part = Part::new(callback, events(&steps, &subdivision))?
            .with_looping(Looping::Forever)
            .with_loop_points(0.0, loop_end(&steps, &subdivision))?;
        Ok(Self {
            part,
            subdivision,
            steps,
        })
    }

    pub fn subdivision(&self) -> &TimeExpression {
        &self.subdivision
    }

    pub fn steps(&self) -> &[Step<T>] {
        &self.steps
    }

    /// Number of top-level steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Replace the steps. The loop region follows the new length.
    pub fn set_steps(&mut self, transport: &mut Transport, steps: Vec<Step<T>>) -> Result<()> {
        self.part.replace_events(
            transport,
            events(&steps, &self.subdivision),
            loop_end(&steps, &self.subdivision),
        )?;
        self.steps = steps;
        Ok(())
    }

    /// The underlying part, for looping, playback rate and trigger settings.
    pub fn part(&self) -> &Part<T> {
        &self.part
    }

    pub fn part_mut(&mut self) -> &mut Part<T> {
        &mut self.part
    }

    pub fn start(&mut self, transport: &mut Transport, time: impl IntoTimeExpression) -> Result<()> {
        self.part.start(transport, time)
    }

    pub fn stop(&mut self, transport: &mut Transport, time: impl IntoTimeExpression) -> Result<()> {
        self.part.stop(transport, time)
    }

    pub fn cancel(&mut self, transport: &mut Transport, after: impl IntoTimeExpression) -> Result<()> {
        self.part.cancel(transport, after)
    }

    pub fn state(&self, transport: &Transport) -> PlaybackState {
        self.part.state(transport)
    }

    pub fn progress(&self, transport: &Transport) -> f64 {
        self.part.progress(transport)
    }

    pub fn dispose(&mut self, transport: &mut Transport) {
        self.part.dispose(transport);
    }
}

fn events<T: Clone>(steps: &[Step<T>], subdivision: &TimeExpression) -> Vec<(TimeExpression, T)> {
    let mut positions = Vec::new();
    flatten(steps, 0.0, 1.0, &mut positions);
    positions
        .into_iter()
        .map(|(position, value)| (steps_from_start(subdivision, position), value))
        .collect()
}

/// Positions in subdivisions for every value, depth first.
fn flatten<T: Clone>(steps: &[Step<T>], start: f64, width: f64, out: &mut Vec<(f64, T)>) {
    for (i, step) in steps.iter().enumerate() {
        let position = start + i as f64 * width;
        match step {
            Step::Rest => {}
            Step::Value(value) => out.push((position, value.clone())),
            Step::Group(inner) if !inner.is_empty() => {
                flatten(inner, position, width / inner.len() as f64, out);
            }
            Step::Group(_) => {}
        }
    }
}

fn loop_end<T>(steps: &[Step<T>], subdivision: &TimeExpression) -> TimeExpression {
    steps_from_start(subdivision, steps.len().max(1) as f64)
}

fn steps_from_start(subdivision: &TimeExpression, steps: f64) -> TimeExpression {
    TimeExpression::math(Op::Mul, subdivision.clone(), TimeExpression::Seconds(steps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::time::ManualTimeSource;
    use std::sync::{Arc, Mutex};

    type Hits = Arc<Mutex<Vec<(f64, char)>>>;

    fn transport() -> Transport {
        let config = EngineConfig {
            lookahead: "0s".to_string(),
            ..EngineConfig::default()
        };
        Transport::new(&config, Arc::new(ManualTimeSource::new(0.0))).unwrap()
    }

    fn sequence(steps: Vec<Step<char>>, subdivision: &str) -> (Hits, Sequence<char>) {
        let hits: Hits = Arc::new(Mutex::new(Vec::new()));
        let sink = hits.clone();
        let sequence = Sequence::new(
            move |time, note: &char| sink.lock().unwrap().push((time, *note)),
            steps,
            subdivision,
        )
        .unwrap();
        (hits, sequence)
    }

    fn run(transport: &mut Transport, until: f64) {
        for dispatch in transport.process(until) {
            dispatch.fire();
        }
    }

    fn assert_hits(hits: &Hits, expected: &[(f64, char)]) {
        let hits = hits.lock().unwrap();
        assert_eq!(hits.len(), expected.len(), "{hits:?}");
        for ((time, note), (want_time, want_note)) in hits.iter().zip(expected) {
            assert!((time - want_time).abs() < 1e-9, "{time} != {want_time}");
            assert_eq!(note, want_note);
        }
    }

    #[test]
    fn test_steps_are_spaced_and_looped() {
        let mut transport = transport();
        let (hits, mut seq) = sequence(
            vec![Step::Value('c'), Step::Rest, Step::Value('e'), Step::Value('g')],
            "8n",
        );
        assert_eq!(seq.len(), 4);
        seq.start(&mut transport, 0.0).unwrap();
        transport.start(0.0).unwrap();
        run(&mut transport, 1.9);
        assert_hits(
            &hits,
            &[
                (0.0, 'c'),
                (0.5, 'e'),
                (0.75, 'g'),
                (1.0, 'c'),
                (1.5, 'e'),
                (1.75, 'g'),
            ],
        );
    }

    #[test]
    fn test_groups_split_a_step() {
        let mut transport = transport();
        let (hits, mut seq) = sequence(
            vec![
                Step::Value('c'),
                Step::Group(vec![Step::Value('d'), Step::Value('e')]),
                Step::Group(vec![Step::Value('f'), Step::Rest, Step::Value('g')]),
            ],
            "4n",
        );
        seq.part_mut()
            .set_looping(&mut transport, Looping::Times(1))
            .unwrap();
        seq.start(&mut transport, 0.0).unwrap();
        transport.start(0.0).unwrap();
        run(&mut transport, 5.0);
        assert_hits(
            &hits,
            &[
                (0.0, 'c'),
                (0.5, 'd'),
                (0.75, 'e'),
                (1.0, 'f'),
                (1.0 + 2.0 / 3.0 * 0.5, 'g'),
            ],
        );
    }

    #[test]
    fn test_set_steps_changes_loop_length() {
        let mut transport = transport();
        let (hits, mut seq) = sequence(vec![Step::Value('a'), Step::Value('b'), Step::Rest], "4n");
        seq.set_steps(&mut transport, vec![Step::Value('x'), Step::Value('y')])
            .unwrap();
        assert_eq!(seq.steps(), &[Step::Value('x'), Step::Value('y')]);
        seq.start(&mut transport, 0.0).unwrap();
        transport.start(0.0).unwrap();
        run(&mut transport, 1.6);
        assert_hits(&hits, &[(0.0, 'x'), (0.5, 'y'), (1.0, 'x'), (1.5, 'y')]);
        seq.dispose(&mut transport);
        assert_eq!(seq.state(&transport), PlaybackState::Stopped);
    }
}
