//! The retry ladder (§4.G).
//!
//! Grounded on design note §9's instruction to implement the ladder as a
//! top-level loop over an explicit mode enum with a `reset()` that clears
//! only mode-owned state: register/spill assignments and inserted moves.
//! Liveness, argument chains and hints are computed once and survive every
//! reset, matching the separation between `lifetime_intervals` (computed
//! once) and the allocator state that mutates per attempt.

use crate::ir::RegWidthLimit;

/// Which attempt of the ladder is currently running. Ordered so that
/// `Mode::next` always escalates strictly forward; the ladder never goes
/// back to an earlier mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    AllowArgumentReuse4Bit,
    AllowArgumentReuse8Bit,
    EightBitRefinement,
    EightBitRetry,
    Sixteen,
}

impl Mode {
    pub fn initial() -> Mode {
        Mode::AllowArgumentReuse4Bit
    }

    /// The register-width limit this mode allocates against when a
    /// candidate register has no per-use constraint of its own.
    pub fn width_limit(self) -> RegWidthLimit {
        match self {
            Mode::AllowArgumentReuse4Bit => RegWidthLimit::Four,
            Mode::AllowArgumentReuse8Bit | Mode::EightBitRefinement | Mode::EightBitRetry => {
                RegWidthLimit::Eight
            }
            Mode::Sixteen => RegWidthLimit::Sixteen,
        }
    }

    /// Splitting and spilling are available. Only the first rung forbids
    /// them outright (it succeeds only if the method needs no register
    /// pressure relief at all).
    pub fn allows_splitting(self) -> bool {
        self != Mode::AllowArgumentReuse4Bit
    }

    /// Argument registers may be reused by other values (the 4-bit rung's
    /// only lever, since it cannot split or spill).
    pub fn allows_argument_reuse(self) -> bool {
        self == Mode::AllowArgumentReuse4Bit
    }

    /// The refinement rung relaxes blocking using a previously-computed
    /// 4-bit-safe argument prefix.
    pub fn uses_refinement(self) -> bool {
        self == Mode::EightBitRefinement
    }
}

/// Why an attempt at the current mode failed, distinguishing the one
/// recoverable failure (§7 "mode failure") from everything else, which is
/// an internal invariant violation and must not be silently retried.
#[derive(Debug)]
pub enum ModeFailure {
    /// `allocate(I)` hit a position with no free register of the required
    /// width and splitting is not available at this mode.
    NoRegisterAvailable,
    /// The mode completed but the final highest register exceeds the
    /// mode's width limit.
    RegisterLimitExceeded { highest: u32, limit: u32 },
}

/// The outcome of running one mode to completion, before the ladder
/// decides whether to escalate.
pub struct Attempt {
    pub mode: Mode,
    pub result: Result<u32, ModeFailure>,
}

/// Decides the next mode to try, given the just-finished attempt. Returns
/// `None` once the ladder is exhausted (only possible if `Sixteen` itself
/// failed, which §7 says must never happen — callers should treat that as
/// an internal invariant violation, not a `None` from here).
pub fn escalate(attempt: &Attempt) -> Option<Mode> {
    match (attempt.mode, &attempt.result) {
        (Mode::AllowArgumentReuse4Bit, Ok(highest)) if *highest <= 15 => None,
        (Mode::AllowArgumentReuse4Bit, _) => Some(Mode::AllowArgumentReuse8Bit),

        (Mode::AllowArgumentReuse8Bit, Ok(highest)) if *highest > 255 => Some(Mode::Sixteen),
        (Mode::AllowArgumentReuse8Bit, Ok(_)) => Some(Mode::EightBitRefinement),
        (Mode::AllowArgumentReuse8Bit, Err(_)) => Some(Mode::EightBitRetry),

        (Mode::EightBitRefinement, Ok(highest)) if *highest <= 255 => None,
        (Mode::EightBitRefinement, _) => Some(Mode::EightBitRetry),

        (Mode::EightBitRetry, Ok(highest)) if *highest <= 255 => None,
        (Mode::EightBitRetry, _) => Some(Mode::Sixteen),

        (Mode::Sixteen, Ok(_)) => None,
        (Mode::Sixteen, Err(_)) => None,
    }
}

/// Whether this attempt should be accepted as final (as opposed to
/// escalated), independent of what `escalate` would return — used by the
/// driver to decide whether to keep iterating.
pub fn succeeded(attempt: &Attempt) -> bool {
    escalate(attempt).is_none() && attempt.result.is_ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn four_bit_success_within_budget_stops_the_ladder() {
        let attempt = Attempt { mode: Mode::AllowArgumentReuse4Bit, result: Ok(10) };
        assert_eq!(escalate(&attempt), None);
        assert!(succeeded(&attempt));
    }

    #[test]
    fn four_bit_overflow_escalates_to_eight_bit() {
        let attempt = Attempt { mode: Mode::AllowArgumentReuse4Bit, result: Ok(20) };
        assert_eq!(escalate(&attempt), Some(Mode::AllowArgumentReuse8Bit));
    }

    #[test]
    fn eight_bit_failure_goes_to_retry_not_refinement() {
        let attempt = Attempt {
            mode: Mode::AllowArgumentReuse8Bit,
            result: Err(ModeFailure::NoRegisterAvailable),
        };
        assert_eq!(escalate(&attempt), Some(Mode::EightBitRetry));
    }

    #[test]
    fn sixteen_bit_always_terminates_the_ladder() {
        let attempt = Attempt { mode: Mode::Sixteen, result: Ok(9000) };
        assert_eq!(escalate(&attempt), None);
    }
}
