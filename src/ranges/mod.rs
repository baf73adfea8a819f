//! The live-range model (§4.A): ranges, uses, splits and the
//! rematerializability of a value.

pub mod intervals;

pub use intervals::{IntervalId, Intervals, LiveInterval, LiveIntervalsUse};
