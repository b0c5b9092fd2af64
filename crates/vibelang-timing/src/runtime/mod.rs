//! Scheduling runtime.
//!
//! The runtime owns one thread that:
//! - wakes every `update_interval`
//! - collects everything due before now plus the lookahead
//! - fires the callbacks with the transport unlocked

pub mod thread;

pub use thread::{Runtime, RuntimeHandle, RuntimeMessage};
