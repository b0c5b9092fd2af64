//! VibeLang Timing - Sample-accurate musical time for VibeLang.
//!
//! This crate provides the scheduling engine underneath VibeLang's audio
//! graph:
//!
//! - **Time** - Parsing and evaluating time expressions (`"4n"`, `"1:2:0"`,
//!   `"+8n"`, `"(1m + 4n) * 2"`)
//! - **Timeline** - Sorted event timelines, playback state timelines and an
//!   interval tree
//! - **Param** - Automation curves with closed-form evaluation and
//!   integration
//! - **Clock** - Tick counting under tempo automation, pause and stop
//! - **Transport** - Musical scheduling with repeats, looping and swing,
//!   plus loops, parts and sequences on top of it
//! - **Runtime** - A scheduling thread that dispatches callbacks ahead of
//!   time
//!
//! # Architecture
//!
//! One [`Transport`] is the scheduling authority. Applications create it
//! through a [`SchedulingContext`] and pass clones of the context to
//! everything that schedules. Callbacks receive the exact time they were
//! scheduled for, which lies up to one lookahead window in the future of
//! the moment they run.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vibelang_timing::{EngineConfig, Runtime, SchedulingContext};
//!
//! let context = SchedulingContext::with_system_clock(EngineConfig::default())?;
//! context.with_transport_mut(|t| {
//!     t.schedule_repeat(|time| println!("beat at {time:.3}s"), "4n", 0.0)?;
//!     t.start("+0.1")
//! })?;
//! let runtime = Runtime::start(context)?;
//! # drop(runtime);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod param;
pub mod runtime;
pub mod time;
pub mod timeline;
pub mod transport;

pub use clock::{Clock, ClockEvent, TickSignal};
pub use config::EngineConfig;
pub use context::SchedulingContext;
pub use error::{Error, Result};
pub use param::{AutomationEvent, AutomationKind, Evaluable, Param, Unit};
pub use runtime::{Runtime, RuntimeHandle, RuntimeMessage};
pub use time::{
    IntoTimeExpression, ManualTimeSource, SystemTimeSource, TimeContext, TimeExpression,
    TimeSignature, TimeSource,
};
pub use timeline::{
    IntervalEvent, IntervalId, IntervalTimeline, PlaybackState, Timed, Timeline, TimelineState,
};
pub use transport::{
    Callback, Dispatch, EventId, Humanize, Loop, Looping, Part, PartCallback, Sequence, Step,
    Transport, TransportNotification,
};
