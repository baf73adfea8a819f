//! Program positions at a fixed stride of 2.
//!
//! Even numbers denote an instruction; the preceding odd number is a *gap*
//! where spill/restore moves may be inserted. A move inserted at gap `p` is
//! logically between instruction `p-1` and `p+1`.

use std::fmt;

/// A position in the method's linear instruction stream.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgPoint(u32);

impl ProgPoint {
    /// The instruction position for the `index`-th instruction (0-based).
    pub fn instruction(index: u32) -> ProgPoint {
        ProgPoint(index * 2)
    }

    /// The gap immediately before this position's instruction.
    ///
    /// `splitBefore` in the core driver loop clamps split positions to a
    /// gap this way: splitting "before instruction p" always means
    /// inserting at `gap_before(p)`, never at `p` itself, since `p` is
    /// already committed to the instruction that occupies it.
    pub fn gap_before(self) -> ProgPoint {
        debug_assert!(self.is_instruction(), "gap_before of a gap");
        ProgPoint(self.0 - 1)
    }

    /// The gap immediately after this position's instruction.
    pub fn gap_after(self) -> ProgPoint {
        debug_assert!(self.is_instruction(), "gap_after of a gap");
        ProgPoint(self.0 + 1)
    }

    pub fn is_instruction(self) -> bool {
        self.0 % 2 == 0
    }

    pub fn is_gap(self) -> bool {
        !self.is_instruction()
    }

    /// The instruction this position belongs to (itself if already an
    /// instruction position, otherwise the instruction following the gap).
    pub fn round_up_to_instruction(self) -> ProgPoint {
        if self.is_instruction() {
            self
        } else {
            ProgPoint(self.0 + 1)
        }
    }

    /// The instruction position immediately preceding a gap (itself if
    /// already an instruction position).
    pub fn round_down_to_instruction(self) -> ProgPoint {
        if self.is_instruction() {
            self
        } else {
            ProgPoint(self.0 - 1)
        }
    }

    pub fn next_instruction(self) -> ProgPoint {
        ProgPoint(self.round_up_to_instruction().0 + 2)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub const ZERO: ProgPoint = ProgPoint(0);
}

impl fmt::Debug for ProgPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_gap() {
            write!(f, "gap{}", self.0)
        } else {
            write!(f, "pos{}", self.0)
        }
    }
}

/// A half-open `[start, end)` range of program positions.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct LiveRange {
    pub start: ProgPoint,
    pub end: ProgPoint,
}

impl LiveRange {
    pub fn new(start: ProgPoint, end: ProgPoint) -> LiveRange {
        debug_assert!(start <= end, "empty or inverted live range");
        LiveRange { start, end }
    }

    pub fn contains(&self, pos: ProgPoint) -> bool {
        self.start <= pos && pos < self.end
    }

    pub fn intersects(&self, other: &LiveRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The first position at or after `pos` where this range and `other`
    /// overlap, or `None` if they never do.
    pub fn intersection_start(&self, other: &LiveRange) -> Option<ProgPoint> {
        if self.intersects(other) {
            Some(std::cmp::max(self.start, other.start))
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gap_roundtrip() {
        let p = ProgPoint::instruction(4);
        assert!(p.is_instruction());
        let gap = p.gap_before();
        assert!(gap.is_gap());
        assert_eq!(gap.round_up_to_instruction(), p);
        assert_eq!(p.gap_after().round_down_to_instruction(), p);
    }

    #[test]
    fn range_intersection() {
        let a = LiveRange::new(ProgPoint::instruction(0), ProgPoint::instruction(10));
        let b = LiveRange::new(ProgPoint::instruction(6), ProgPoint::instruction(20));
        assert!(a.intersects(&b));
        assert_eq!(a.intersection_start(&b), Some(ProgPoint::instruction(6)));

        let c = LiveRange::new(ProgPoint::instruction(10), ProgPoint::instruction(20));
        assert!(!a.intersects(&c));
        assert_eq!(a.intersection_start(&c), None);
    }
}
