//! Error reporting.
//!
//! Adapted from the compiler driver's `fatal`/`fatal_at` diagnostics: the
//! same two-tier split applies here. Internal invariant violations
//! (interval-set inconsistency, double-free, register collision) are
//! programming bugs; in debug builds they trip an assertion immediately,
//! in release builds they go through `fail_fast`, which prints a message
//! carrying the offending method and value and then aborts. Recoverable
//! failures (4-bit mode ran out of registers, a value has no intervals)
//! are reported through `RegAllocError` and returned to the caller instead.

use std::fmt;
use std::process;

use crate::interner::{Ident, Interner};

/// Identifies where an error occurred: which method, and optionally which
/// SSA value within it. Used both by `RegAllocError` and by `fail_fast`.
#[derive(Clone, Copy, Debug)]
pub struct MethodOrigin {
    pub method: Ident,
    pub value: Option<Ident>,
}

impl MethodOrigin {
    pub fn method(method: Ident) -> MethodOrigin {
        MethodOrigin {
            method,
            value: None,
        }
    }

    pub fn value(method: Ident, value: Ident) -> MethodOrigin {
        MethodOrigin {
            method,
            value: Some(value),
        }
    }

    fn describe(&self, interner: &Interner) -> String {
        match self.value {
            Some(value) => format!(
                "method `{}`, value `{}`",
                interner.resolve(self.method),
                interner.resolve(value)
            ),
            None => format!("method `{}`", interner.resolve(self.method)),
        }
    }
}

/// Errors surfaced to the allocator's caller. Never swallowed internally;
/// `allocate_registers` either returns `Ok` with a complete assignment or
/// one of these.
#[derive(Debug)]
pub enum RegAllocError {
    /// `get_register_for_value` (or an internal query) was asked about a
    /// value that never received a live interval.
    NoIntervalForValue(MethodOrigin),
    /// Anything else the allocator's environment got wrong (malformed
    /// `IRCode`, an `Options` combination the allocator can't satisfy).
    Other(String),
}

impl fmt::Display for RegAllocError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegAllocError::NoIntervalForValue(origin) => {
                write!(f, "no live interval recorded ({:?})", origin)
            }
            RegAllocError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RegAllocError {}

/// Report an internal invariant violation and abort.
///
/// Debug builds should prefer `debug_assert!`/`assert!` at the call site so
/// that the failure is caught with a backtrace during testing; this is the
/// release-mode fallback for invariants that are too expensive to check on
/// every call (or that depend on state gathered across the whole pass).
pub fn fail_fast(msg: &str, origin: MethodOrigin, interner: &Interner) -> ! {
    eprintln!(
        "internal error: {} ({})",
        msg,
        origin.describe(interner)
    );
    process::exit(1)
}
