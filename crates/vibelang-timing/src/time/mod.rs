//! Musical time values.
//!
//! - [`TimeExpression`] - tagged time value parsed once from strings or numbers
//! - [`TimeContext`] - tempo, PPQ, time signature and sample rate used to
//!   resolve expressions to seconds
//! - [`TimeSignature`] - numerator/denominator pair
//! - [`TimeSource`] - where "now" comes from (system clock or manual)
//!
//! Accepted strings:
//!
//! | form            | meaning                                   |
//! |-----------------|-------------------------------------------|
//! | `0.5`, `0.5s`   | seconds                                   |
//! | `4n`, `8n.`     | note durations, optionally dotted         |
//! | `8t`            | triplets                                  |
//! | `2m`            | measures                                  |
//! | `1:2:3`         | bars:beats:sixteenths                     |
//! | `96i`           | ticks                                     |
//! | `2hz`           | period of a frequency                     |
//! | `512samples`    | samples at the context sample rate        |
//! | `+4n`           | relative to now                           |
//! | `(1m + 4n) * 2` | arithmetic between any of the above       |

pub mod context;
pub mod expression;
pub mod format;
pub mod parser;
pub mod source;

pub use context::{TimeContext, TimeSignature, DEFAULT_BPM, DEFAULT_PPQ, DEFAULT_SAMPLE_RATE};
pub use expression::{IntoTimeExpression, NoteKind, Op, TimeExpression};
pub use source::{ManualTimeSource, SystemTimeSource, TimeSource};
