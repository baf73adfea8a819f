//! Live ranges, splitting and the live-interval arena (§3, §4.A).
//!
//! Cyclic references (a split's parent, a parent's ordered split set) are
//! represented as indices into a single arena rather than as owned/mutual
//! `Rc`/`RefCell` links (design note §9): `Intervals` owns every
//! `LiveInterval`, and `IntervalId` is the only way to refer to one from
//! outside the arena.

use crate::ir::{LiveRange, ProgPoint, RegWidthLimit, ValueId};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntervalId(pub u32);

impl std::fmt::Debug for IntervalId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// A use of an interval's value at a specific position, with the maximum
/// register width the use site tolerates. A use with a 4-bit limit forces
/// the value into a low register at that position.
#[derive(Copy, Clone, Debug)]
pub struct LiveIntervalsUse {
    pub pos: ProgPoint,
    pub limit: RegWidthLimit,
}

/// One SSA value's live interval, or one split child of it.
pub struct LiveInterval {
    pub id: IntervalId,
    pub value: ValueId,
    pub wide: bool,

    /// Disjoint, ascending.
    ranges: Vec<LiveRange>,
    /// Ascending by position.
    uses: Vec<LiveIntervalsUse>,

    pub register: Option<u32>,
    pub spill_slot: Option<u32>,
    pub spilled: bool,

    pub parent: Option<IntervalId>,
    /// Ordered (by start) split children of *this* interval. Populated
    /// only on the interval that was actually split; `Intervals::splits_of`
    /// is what callers should use to see the whole chain for a value.
    pub children: Vec<IntervalId>,

    pub rematerializable: bool,
    pub hint: Option<IntervalId>,

    /// This interval is one of the two bracketing splits the invoke-range
    /// planner creates around a call site (§4.F); it is handled specially
    /// by the main loop instead of going through ordinary allocation.
    pub is_invoke_range: bool,

    /// Argument-chain link: the interval covering the next argument in a
    /// consecutive calling-convention block.
    pub next_consecutive: Option<IntervalId>,
}

impl LiveInterval {
    pub fn ranges(&self) -> &[LiveRange] {
        &self.ranges
    }

    pub fn uses(&self) -> &[LiveIntervalsUse] {
        &self.uses
    }

    pub fn start(&self) -> ProgPoint {
        self.ranges.first().expect("interval has no ranges").start
    }

    pub fn end(&self) -> ProgPoint {
        self.ranges.last().expect("interval has no ranges").end
    }

    pub fn covers(&self, pos: ProgPoint) -> bool {
        self.ranges.iter().any(|r| r.contains(pos))
    }

    pub fn intersects(&self, other: &LiveInterval) -> bool {
        self.ranges
            .iter()
            .any(|a| other.ranges.iter().any(|b| a.intersects(b)))
    }

    /// First position in `[start, start + 1)`... i.e. the earliest
    /// overlap between `self` and `other`, at or after `self.start()`.
    pub fn next_intersection(&self, other: &LiveInterval) -> Option<ProgPoint> {
        let mut best: Option<ProgPoint> = None;
        for a in &self.ranges {
            for b in &other.ranges {
                if let Some(pos) = a.intersection_start(b) {
                    best = Some(match best {
                        Some(cur) => std::cmp::min(cur, pos),
                        None => pos,
                    });
                }
            }
        }
        best
    }

    /// Does this interval have any lifetime hole (a position inside
    /// `[start(), end())` not covered by any range) at or before `pos`?
    pub fn covers_at_or_is_hole(&self, pos: ProgPoint) -> bool {
        self.covers(pos)
    }

    /// The first use at or after `pos`, optionally restricted to uses that
    /// carry a register-width constraint tighter than `Sixteen`.
    pub fn next_use_from(&self, pos: ProgPoint) -> Option<&LiveIntervalsUse> {
        self.uses.iter().find(|u| u.pos >= pos)
    }

    pub fn next_constrained_use_from(&self, pos: ProgPoint) -> Option<&LiveIntervalsUse> {
        self.uses
            .iter()
            .find(|u| u.pos >= pos && u.limit != RegWidthLimit::Sixteen)
    }

    pub fn first_use(&self) -> Option<&LiveIntervalsUse> {
        self.uses.first()
    }

    fn add_range(&mut self, range: LiveRange) {
        merge_into(&mut self.ranges, range);
    }

    fn add_use(&mut self, u: LiveIntervalsUse) {
        match self.uses.binary_search_by_key(&u.pos, |u| u.pos) {
            Ok(idx) => {
                // Keep the tighter constraint at a repeated position.
                if u.limit < self.uses[idx].limit {
                    self.uses[idx] = u;
                }
            }
            Err(idx) => self.uses.insert(idx, u),
        }
    }

    pub fn width(&self) -> u32 {
        if self.wide {
            2
        } else {
            1
        }
    }
}

fn merge_into(ranges: &mut Vec<LiveRange>, range: LiveRange) {
    // Ranges are built backwards (liveness runs from block exit toward
    // entry) so new ranges usually sort before or coalesce with the first
    // existing one; a linear scan from the front matches that access
    // pattern and stays simple.
    for existing in ranges.iter_mut() {
        if range.start <= existing.end && existing.start <= range.end {
            existing.start = std::cmp::min(existing.start, range.start);
            existing.end = std::cmp::max(existing.end, range.end);
            return;
        }
    }
    let idx = ranges.partition_point(|r| r.start < range.start);
    ranges.insert(idx, range);
}

/// Owns every `LiveInterval` created during allocation (parents and all of
/// their splits). `IntervalId`s are stable for the arena's lifetime; a
/// split never invalidates its parent's id.
pub struct Intervals {
    arena: Vec<LiveInterval>,
    /// All intervals for a given value, ordered ascending by start —
    /// the parent plus every split, in chain order. Used to answer
    /// `getSplitCovering`.
    by_value: Vec<Vec<IntervalId>>,
}

impl Intervals {
    pub fn new(num_values: usize) -> Intervals {
        Intervals {
            arena: Vec::new(),
            by_value: vec![Vec::new(); num_values],
        }
    }

    pub fn create(&mut self, value: ValueId, wide: bool, rematerializable: bool) -> IntervalId {
        let id = IntervalId(self.arena.len() as u32);
        self.arena.push(LiveInterval {
            id,
            value,
            wide,
            ranges: Vec::new(),
            uses: Vec::new(),
            register: None,
            spill_slot: None,
            spilled: false,
            parent: None,
            children: Vec::new(),
            rematerializable,
            hint: None,
            is_invoke_range: false,
            next_consecutive: None,
        });
        self.insert_into_chain(value, id);
        id
    }

    fn insert_into_chain(&mut self, value: ValueId, id: IntervalId) {
        let chain = &mut self.by_value[value.0 as usize];
        let start = self.arena[id.0 as usize].start_or_zero();
        let idx = chain.partition_point(|&other| self.arena[other.0 as usize].start_or_zero() < start);
        chain.insert(idx, id);
    }

    pub fn get(&self, id: IntervalId) -> &LiveInterval {
        &self.arena[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: IntervalId) -> &mut LiveInterval {
        &mut self.arena[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// The number of SSA values this arena was sized for (`IRCode::num_values()`
    /// at construction time), used to rebuild a fresh arena of the same shape
    /// between mode-ladder attempts.
    pub fn num_values_hint(&self) -> usize {
        self.by_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiveInterval> {
        self.arena.iter()
    }

    /// Mutable walk over every interval in the arena (parents and splits
    /// alike), used by post-allocation register-number finalization to
    /// rewrite every assigned `.register` in place.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut LiveInterval> {
        self.arena.iter_mut()
    }

    /// Record a range of liveness for `value`'s (not-yet-split) parent
    /// interval, creating the parent lazily on first use.
    pub fn add_range(&mut self, value: ValueId, wide: bool, range: LiveRange) -> IntervalId {
        let parent = self.parent_of(value).unwrap_or_else(|| self.create(value, wide, false));
        self.arena[parent.0 as usize].add_range(range);
        parent
    }

    pub fn add_use(&mut self, value: ValueId, u: LiveIntervalsUse) {
        let parent = self.parent_of(value).expect("add_use before any range recorded");
        self.arena[parent.0 as usize].add_use(u);
    }

    fn parent_of(&self, value: ValueId) -> Option<IntervalId> {
        self.by_value[value.0 as usize].first().copied()
    }

    pub fn splits_of(&self, value: ValueId) -> &[IntervalId] {
        &self.by_value[value.0 as usize]
    }

    /// The unique split (parent or child) of `value` whose range covers
    /// `pos`.
    pub fn get_split_covering(&self, value: ValueId, pos: ProgPoint) -> Option<IntervalId> {
        self.by_value[value.0 as usize]
            .iter()
            .copied()
            .find(|&id| self.get(id).covers(pos))
    }

    /// The split of `value` active immediately before `pos` (used by
    /// CFG-edge resolution to find "the split covering the predecessor's
    /// exit").
    pub fn get_split_covering_or_before(&self, value: ValueId, pos: ProgPoint) -> Option<IntervalId> {
        self.get_split_covering(value, pos).or_else(|| {
            self.by_value[value.0 as usize]
                .iter()
                .copied()
                .filter(|&id| self.get(id).end() <= pos)
                .last()
        })
    }

    /// Split `parent` at `pos` (clamped to a gap). Returns the new child,
    /// which takes ownership of every range and use at or after the split
    /// point; `parent` is truncated to end at `pos`.
    pub fn split_before(&mut self, parent: IntervalId, pos: ProgPoint) -> IntervalId {
        let pos = clamp_to_gap(pos);
        let value = self.get(parent).value;
        let wide = self.get(parent).wide;
        let rematerializable = self.get(parent).rematerializable;

        let child_id = IntervalId(self.arena.len() as u32);
        let mut child = LiveInterval {
            id: child_id,
            value,
            wide,
            ranges: Vec::new(),
            uses: Vec::new(),
            register: None,
            spill_slot: None,
            spilled: false,
            parent: Some(parent),
            children: Vec::new(),
            rematerializable,
            hint: None,
            is_invoke_range: false,
            next_consecutive: None,
        };

        {
            let p = &mut self.arena[parent.0 as usize];
            debug_assert!(
                pos > p.start() && pos < p.end(),
                "split position must fall strictly inside the parent's liveness"
            );

            let split_idx = p.ranges.partition_point(|r| r.end <= pos);
            let mut moved: Vec<LiveRange> = p.ranges.split_off(split_idx);
            if let Some(first) = moved.first_mut() {
                if first.start < pos {
                    // The split point falls inside this range: truncate the
                    // parent's tail and hand the child the remainder.
                    p.ranges.push(LiveRange::new(first.start, pos));
                    first.start = pos;
                }
            }
            child.ranges = moved;

            let use_idx = p.uses.partition_point(|u| u.pos < pos);
            let moved_uses = p.uses.split_off(use_idx);
            child.uses = moved_uses;

            p.children.push(child_id);
        }

        self.arena.push(child);
        self.insert_into_chain(value, child_id);
        child_id
    }
}

fn clamp_to_gap(pos: ProgPoint) -> ProgPoint {
    if pos.is_gap() {
        pos
    } else {
        pos.gap_before()
    }
}

impl LiveInterval {
    fn start_or_zero(&self) -> ProgPoint {
        self.ranges.first().map(|r| r.start).unwrap_or(ProgPoint::ZERO)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::ProgPoint;

    fn pp(n: u32) -> ProgPoint {
        ProgPoint::instruction(n)
    }

    #[test]
    fn split_moves_tail_ranges_and_uses() {
        let mut intervals = Intervals::new(1);
        let value = ValueId(0);
        intervals.add_range(value, false, LiveRange::new(pp(0), pp(20)));
        intervals.add_use(
            value,
            LiveIntervalsUse {
                pos: pp(10),
                limit: RegWidthLimit::Sixteen,
            },
        );
        intervals.add_use(
            value,
            LiveIntervalsUse {
                pos: pp(16),
                limit: RegWidthLimit::Four,
            },
        );

        let parent = intervals.parent_of(value).unwrap();
        let child = intervals.split_before(parent, pp(12));

        assert_eq!(intervals.get(parent).end(), pp(12).gap_before());
        assert_eq!(intervals.get(child).start(), pp(12).gap_before());
        assert_eq!(intervals.get(parent).uses().len(), 1);
        assert_eq!(intervals.get(child).uses().len(), 1);
        assert_eq!(intervals.get(child).uses()[0].limit, RegWidthLimit::Four);

        assert_eq!(intervals.get_split_covering(value, pp(4)), Some(parent));
        assert_eq!(intervals.get_split_covering(value, pp(16)), Some(child));
    }
}
