//! Wall-clock sources for the scheduler.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A monotonic source of "now" in seconds.
pub trait TimeSource: Send + Sync + Debug {
    /// Seconds since the source's epoch.
    fn now(&self) -> f64;
}

/// Monotonic time measured from when the source was created.
#[derive(Clone, Debug)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A time source that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and give
/// another to the transport.
#[derive(Clone, Debug, Default)]
pub struct ManualTimeSource {
    bits: Arc<AtomicU64>,
}

impl ManualTimeSource {
    /// A source starting at `seconds`.
    pub fn new(seconds: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(seconds.to_bits())),
        }
    }

    /// Jump to `seconds`.
    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::SeqCst);
    }

    /// Move forward by `seconds`, returning the new time.
    pub fn advance(&self, seconds: f64) -> f64 {
        let mut current = self.bits.load(Ordering::SeqCst);
        loop {
            let next = f64::from_bits(current) + seconds;
            match self.bits.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
