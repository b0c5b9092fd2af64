//! Interval timeline backed by an augmented AVL tree.
//!
//! Each node stores an interval `[time, time + duration)` and the maximum end
//! time of its subtree, so "which intervals cover T" prunes whole subtrees
//! and runs in `O(log n + k)`.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Handle returned by [`IntervalTimeline::add`], used to remove an interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalId(u64);

impl IntervalId {
    /// Raw numeric value of the id.
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// An interval `[time, time + duration)` carrying a payload.
#[derive(Clone, Debug, PartialEq)]
pub struct IntervalEvent<T> {
    pub time: f64,
    pub duration: f64,
    pub payload: T,
}

impl<T> IntervalEvent<T> {
    pub fn new(time: f64, duration: f64, payload: T) -> Self {
        Self {
            time,
            duration,
            payload,
        }
    }

    /// Exclusive end of the interval.
    pub fn end(&self) -> f64 {
        self.time + self.duration
    }

    /// Whether `time` falls inside the interval.
    pub fn contains(&self, time: f64) -> bool {
        self.time <= time && time < self.end()
    }
}

type Link<T> = Option<Box<Node<T>>>;

#[derive(Debug)]
struct Node<T> {
    seq: u64,
    height: i32,
    max_end: f64,
    event: IntervalEvent<T>,
    left: Link<T>,
    right: Link<T>,
}

impl<T> Node<T> {
    fn new(seq: u64, event: IntervalEvent<T>) -> Box<Self> {
        Box::new(Self {
            seq,
            height: 1,
            max_end: event.end(),
            event,
            left: None,
            right: None,
        })
    }

    fn key(&self) -> (f64, u64) {
        (self.event.time, self.seq)
    }

    fn update(&mut self) {
        self.height = 1 + height(&self.left).max(height(&self.right));
        let mut max_end = self.event.end();
        if let Some(left) = &self.left {
            max_end = max_end.max(left.max_end);
        }
        if let Some(right) = &self.right {
            max_end = max_end.max(right.max_end);
        }
        self.max_end = max_end;
    }

    fn balance(&self) -> i32 {
        height(&self.left) - height(&self.right)
    }
}

fn height<T>(link: &Link<T>) -> i32 {
    link.as_ref().map_or(0, |n| n.height)
}

fn compare(a: (f64, u64), b: (f64, u64)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

fn rotate_right<T>(mut node: Box<Node<T>>) -> Box<Node<T>> {
    match node.left.take() {
        Some(mut pivot) => {
            node.left = pivot.right.take();
            node.update();
            pivot.right = Some(node);
            pivot.update();
            pivot
        }
        None => node,
    }
}

fn rotate_left<T>(mut node: Box<Node<T>>) -> Box<Node<T>> {
    match node.right.take() {
        Some(mut pivot) => {
            node.right = pivot.left.take();
            node.update();
            pivot.left = Some(node);
            pivot.update();
            pivot
        }
        None => node,
    }
}

fn rebalance<T>(mut node: Box<Node<T>>) -> Box<Node<T>> {
    node.update();
    let balance = node.balance();
    if balance > 1 {
        if let Some(left) = node.left.take() {
            node.left = Some(if left.balance() < 0 {
                rotate_left(left)
            } else {
                left
            });
        }
        return rotate_right(node);
    }
    if balance < -1 {
        if let Some(right) = node.right.take() {
            node.right = Some(if right.balance() > 0 {
                rotate_right(right)
            } else {
                right
            });
        }
        return rotate_left(node);
    }
    node
}

fn insert<T>(link: Link<T>, new: Box<Node<T>>) -> Box<Node<T>> {
    match link {
        None => new,
        Some(mut node) => {
            if compare(new.key(), node.key()) == Ordering::Less {
                node.left = Some(insert(node.left.take(), new));
            } else {
                node.right = Some(insert(node.right.take(), new));
            }
            rebalance(node)
        }
    }
}

fn remove_min<T>(mut node: Box<Node<T>>) -> (Link<T>, Box<Node<T>>) {
    match node.left.take() {
        None => {
            let rest = node.right.take();
            (rest, node)
        }
        Some(left) => {
            let (rest, min) = remove_min(left);
            node.left = rest;
            (Some(rebalance(node)), min)
        }
    }
}

fn remove<T>(
    link: Link<T>,
    key: (f64, u64),
    removed: &mut Option<IntervalEvent<T>>,
) -> Link<T> {
    let mut node = link?;
    match compare(key, node.key()) {
        Ordering::Less => node.left = remove(node.left.take(), key, removed),
        Ordering::Greater => node.right = remove(node.right.take(), key, removed),
        Ordering::Equal => {
            let Node {
                left, right, event, ..
            } = *node;
            *removed = Some(event);
            return match (left, right) {
                (None, None) => None,
                (Some(child), None) | (None, Some(child)) => Some(child),
                (Some(left), Some(right)) => {
                    let (rest, mut successor) = remove_min(right);
                    successor.left = Some(left);
                    successor.right = rest;
                    Some(rebalance(successor))
                }
            };
        }
    }
    Some(rebalance(node))
}

fn search_at<'a, T>(link: &'a Link<T>, time: f64, out: &mut Vec<&'a Node<T>>) {
    let Some(node) = link else {
        return;
    };
    if time >= node.max_end {
        return;
    }
    search_at(&node.left, time, out);
    if node.event.contains(time) {
        out.push(node);
    }
    // Right subtree starts no earlier than this node.
    if node.event.time <= time {
        search_at(&node.right, time, out);
    }
}

fn search_from<'a, T>(link: &'a Link<T>, time: f64, out: &mut Vec<&'a Node<T>>) {
    let Some(node) = link else {
        return;
    };
    if node.event.time >= time {
        search_from(&node.left, time, out);
        out.push(node);
    }
    search_from(&node.right, time, out);
}

fn in_order<'a, T>(link: &'a Link<T>, out: &mut Vec<&'a Node<T>>) {
    if let Some(node) = link {
        in_order(&node.left, out);
        out.push(node);
        in_order(&node.right, out);
    }
}

/// A set of possibly overlapping intervals.
///
/// Intervals are ordered by start time, then by insertion order. Queries for
/// a point return the covering interval with the latest start; among
/// intervals with the same start, the earliest inserted wins.
#[derive(Debug)]
pub struct IntervalTimeline<T> {
    root: Link<T>,
    starts: HashMap<IntervalId, f64>,
    next_seq: u64,
}

impl<T> Default for IntervalTimeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IntervalTimeline<T> {
    pub fn new() -> Self {
        Self {
            root: None,
            starts: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Number of stored intervals.
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Add an interval. The duration may be infinite but not negative.
    pub fn add(&mut self, event: IntervalEvent<T>) -> Result<IntervalId> {
        if !event.time.is_finite() {
            return Err(Error::OutOfRange(format!(
                "interval start must be finite, got {}",
                event.time
            )));
        }
        if event.duration.is_nan() || event.duration < 0.0 {
            return Err(Error::OutOfRange(format!(
                "interval duration must be non-negative, got {}",
                event.duration
            )));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = IntervalId(seq);
        self.starts.insert(id, event.time);
        let root = insert(self.root.take(), Node::new(seq, event));
        self.root = Some(root);
        self.debug_check();
        Ok(id)
    }

    /// Remove an interval by id, returning it.
    pub fn remove(&mut self, id: IntervalId) -> Option<IntervalEvent<T>> {
        let start = self.starts.remove(&id)?;
        let mut removed = None;
        self.root = remove(self.root.take(), (start, id.0), &mut removed);
        self.debug_check();
        removed
    }

    /// Look up an interval by id.
    pub fn get_by_id(&self, id: IntervalId) -> Option<&IntervalEvent<T>> {
        let start = *self.starts.get(&id)?;
        let key = (start, id.0);
        let mut link = &self.root;
        while let Some(node) = link {
            match compare(key, node.key()) {
                Ordering::Less => link = &node.left,
                Ordering::Greater => link = &node.right,
                Ordering::Equal => return Some(&node.event),
            }
        }
        None
    }

    /// The interval covering `time` with the latest start.
    pub fn get(&self, time: f64) -> Option<&IntervalEvent<T>> {
        let mut hits = Vec::new();
        search_at(&self.root, time, &mut hits);
        // Hits arrive in (start, insertion) order; keep the first of the
        // latest start.
        let mut best: Option<&Node<T>> = None;
        for node in hits {
            match best {
                Some(b) if b.event.time >= node.event.time => {}
                _ => best = Some(node),
            }
        }
        best.map(|n| &n.event)
    }

    /// Visit every interval covering `time`, ordered by start.
    pub fn for_each_at_time<F>(&self, time: f64, mut f: F)
    where
        F: FnMut(IntervalId, &IntervalEvent<T>),
    {
        let mut hits = Vec::new();
        search_at(&self.root, time, &mut hits);
        for node in hits {
            f(IntervalId(node.seq), &node.event);
        }
    }

    /// Visit every interval starting at or after `time`.
    pub fn for_each_from<F>(&self, time: f64, mut f: F)
    where
        F: FnMut(IntervalId, &IntervalEvent<T>),
    {
        let mut hits = Vec::new();
        search_from(&self.root, time, &mut hits);
        for node in hits {
            f(IntervalId(node.seq), &node.event);
        }
    }

    /// Visit every interval, ordered by start.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(IntervalId, &IntervalEvent<T>),
    {
        let mut all = Vec::with_capacity(self.len());
        in_order(&self.root, &mut all);
        for node in all {
            f(IntervalId(node.seq), &node.event);
        }
    }

    /// Ids of every interval, ordered by start.
    pub fn ids(&self) -> Vec<IntervalId> {
        let mut ids = Vec::with_capacity(self.len());
        self.for_each(|id, _| ids.push(id));
        ids
    }

    /// Remove every interval whose start is at or after `after`.
    pub fn cancel(&mut self, after: f64) -> Vec<IntervalEvent<T>> {
        let mut ids = Vec::new();
        self.for_each_from(after, |id, _| ids.push(id));
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Remove every interval.
    pub fn clear(&mut self) {
        self.root = None;
        self.starts.clear();
    }

    fn debug_check(&self) {
        if cfg!(debug_assertions) {
            fn check<T>(link: &Link<T>) -> (i32, f64, usize) {
                match link {
                    None => (0, f64::NEG_INFINITY, 0),
                    Some(node) => {
                        let (lh, lmax, lc) = check(&node.left);
                        let (rh, rmax, rc) = check(&node.right);
                        assert!((lh - rh).abs() <= 1, "interval tree out of balance");
                        assert_eq!(node.height, 1 + lh.max(rh), "interval tree height stale");
                        let max_end = node.event.end().max(lmax).max(rmax);
                        assert!(
                            node.max_end == max_end,
                            "interval tree max end stale"
                        );
                        (node.height, max_end, lc + rc + 1)
                    }
                }
            }
            let (_, _, count) = check(&self.root);
            assert_eq!(count, self.starts.len(), "interval tree lost a node");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline_with(intervals: &[(f64, f64, &'static str)]) -> IntervalTimeline<&'static str> {
        let mut timeline = IntervalTimeline::new();
        for &(time, duration, name) in intervals {
            timeline
                .add(IntervalEvent::new(time, duration, name))
                .unwrap();
        }
        timeline
    }

    #[test]
    fn test_get_covering_interval() {
        let timeline = timeline_with(&[(0.0, 2.0, "a"), (3.0, 1.0, "b")]);
        assert_eq!(timeline.get(1.0).map(|e| e.payload), Some("a"));
        assert_eq!(timeline.get(0.0).map(|e| e.payload), Some("a"));
        // End is exclusive.
        assert!(timeline.get(2.0).is_none());
        assert!(timeline.get(2.5).is_none());
        assert_eq!(timeline.get(3.5).map(|e| e.payload), Some("b"));
        assert!(timeline.get(-1.0).is_none());
    }

    #[test]
    fn test_overlap_prefers_latest_start() {
        let timeline = timeline_with(&[(0.0, 10.0, "long"), (4.0, 2.0, "short")]);
        assert_eq!(timeline.get(5.0).map(|e| e.payload), Some("short"));
        assert_eq!(timeline.get(7.0).map(|e| e.payload), Some("long"));
    }

    #[test]
    fn test_equal_start_prefers_first_inserted() {
        let timeline = timeline_with(&[(1.0, 5.0, "first"), (1.0, 5.0, "second")]);
        assert_eq!(timeline.get(2.0).map(|e| e.payload), Some("first"));
    }

    #[test]
    fn test_infinite_duration() {
        let timeline = timeline_with(&[(2.0, f64::INFINITY, "forever")]);
        assert_eq!(timeline.get(1e9).map(|e| e.payload), Some("forever"));
        assert!(timeline.get(1.0).is_none());
    }

    #[test]
    fn test_rejects_negative_duration() {
        let mut timeline = IntervalTimeline::new();
        assert!(matches!(
            timeline.add(IntervalEvent::new(0.0, -1.0, ())),
            Err(Error::OutOfRange(_))
        ));
        assert!(timeline.is_empty());
    }

    #[test]
    fn test_remove_by_id() {
        let mut timeline = IntervalTimeline::new();
        let a = timeline.add(IntervalEvent::new(0.0, 4.0, "a")).unwrap();
        let b = timeline.add(IntervalEvent::new(1.0, 4.0, "b")).unwrap();
        assert_eq!(timeline.get(2.0).map(|e| e.payload), Some("b"));
        assert_eq!(timeline.remove(b).map(|e| e.payload), Some("b"));
        assert_eq!(timeline.get(2.0).map(|e| e.payload), Some("a"));
        assert!(timeline.remove(b).is_none());
        assert_eq!(timeline.get_by_id(a).map(|e| e.payload), Some("a"));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn test_for_each_at_time_and_from() {
        let timeline = timeline_with(&[
            (0.0, 10.0, "a"),
            (2.0, 2.0, "b"),
            (3.0, 5.0, "c"),
            (6.0, 1.0, "d"),
        ]);
        let mut hits = Vec::new();
        timeline.for_each_at_time(3.5, |_, e| hits.push(e.payload));
        assert_eq!(hits, vec!["a", "b", "c"]);

        let mut from = Vec::new();
        timeline.for_each_from(3.0, |_, e| from.push(e.payload));
        assert_eq!(from, vec!["c", "d"]);
    }

    #[test]
    fn test_cancel_removes_late_starts() {
        let mut timeline = timeline_with(&[(0.0, 10.0, "a"), (2.0, 1.0, "b"), (5.0, 1.0, "c")]);
        let removed = timeline.cancel(2.0);
        assert_eq!(removed.len(), 2);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.get(5.5).map(|e| e.payload), Some("a"));
    }

    #[test]
    fn test_many_inserts_and_removes_stay_consistent() {
        let mut timeline = IntervalTimeline::new();
        let mut ids = Vec::new();
        let mut seed: u64 = 7;
        for i in 0..300usize {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let start = (seed >> 33) as f64 % 1000.0;
            let id = timeline
                .add(IntervalEvent::new(start, 5.0, i))
                .unwrap();
            ids.push((id, start));
        }
        for (id, _) in ids.iter().step_by(2) {
            assert!(timeline.remove(*id).is_some());
        }
        assert_eq!(timeline.len(), 150);

        // Brute force comparison against the survivors.
        for query in [0.5, 100.0, 333.3, 999.0] {
            let mut expected: Vec<usize> = Vec::new();
            for (idx, (id, start)) in ids.iter().enumerate().skip(1).step_by(2) {
                if *start <= query && query < start + 5.0 {
                    assert!(timeline.get_by_id(*id).is_some());
                    expected.push(idx);
                }
            }
            let mut found = Vec::new();
            timeline.for_each_at_time(query, |_, e| found.push(e.payload));
            found.sort_unstable();
            assert_eq!(found, expected);
        }
    }

    #[test]
    fn test_clear() {
        let mut timeline = timeline_with(&[(0.0, 1.0, "a")]);
        timeline.clear();
        assert!(timeline.is_empty());
        assert!(timeline.get(0.5).is_none());
        assert!(timeline.ids().is_empty());
    }
}
