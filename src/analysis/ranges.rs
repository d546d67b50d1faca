// SPDX-FileCopyrightText: 2024 University of Rochester
//
// SPDX-License-Identifier: MIT

/*! Maps from IR values to their intervals, and per edge snapshots.

A [`RangeMap`] entry means the value is tracked; absence means the value
lies outside the scalar integer domain (arrays, opaque pointers). A
tracked but unconstrained value holds the full `[i32::MIN, i32::MAX]`
interval, which is distinct from being absent.
*/

use super::interval::Interval;
use crate::ir::{BlockId, ValueId};
use crate::FastHashMap;

/// The abstract state at one program point: every tracked IR value and
/// the interval it may hold.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RangeMap {
    ranges: FastHashMap<ValueId, Interval>,
}

impl RangeMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, value: ValueId) -> Option<Interval> {
        self.ranges.get(&value).copied()
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, value: ValueId) -> bool {
        self.ranges.contains_key(&value)
    }

    #[inline]
    pub fn insert(&mut self, value: ValueId, interval: Interval) {
        self.ranges.insert(value, interval);
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueId, Interval)> + '_ {
        self.ranges.iter().map(|(&v, &i)| (v, i))
    }

    /// The join used at control flow merges: the key set is the
    /// intersection of both key sets, and shared keys take the hull of
    /// their intervals. A value defined on only one incoming path is not
    /// safely live at the merge, so one sided keys are dropped.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        let mut ranges = FastHashMap::default();
        for (&value, &lhs) in &self.ranges {
            if let Some(&rhs) = other.ranges.get(&value) {
                ranges.insert(value, lhs.hull(rhs));
            }
        }
        RangeMap { ranges }
    }

    /// Widen this map relative to the state recorded on the previous
    /// visit. Any bound that grew jumps straight to the matching `i32`
    /// extreme, which bounds how often an interval can change and forces
    /// the fixed point iteration to terminate on loops.
    pub fn widen_from(&mut self, previous: &Self) {
        for (value, current) in &mut self.ranges {
            let Some(old) = previous.ranges.get(value) else {
                continue;
            };
            if old.is_bottom() || current.is_bottom() {
                continue;
            }
            let mut lo = current.lo();
            let mut hi = current.hi();
            if hi > old.hi() {
                hi = i32::MAX;
            }
            if lo < old.lo() {
                lo = i32::MIN;
            }
            *current = Interval::of(lo, hi);
        }
    }
}

impl FromIterator<(ValueId, Interval)> for RangeMap {
    fn from_iter<T: IntoIterator<Item = (ValueId, Interval)>>(iter: T) -> Self {
        RangeMap {
            ranges: iter.into_iter().collect(),
        }
    }
}

/// The state carried by one directed CFG edge: whether the edge can be
/// taken at all, and the ranges that hold when it is.
///
/// Edges whose branch condition is infeasible are never written into the
/// edge store, so an absent edge also counts as unreachable.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeState {
    pub reachable: bool,
    pub ranges: RangeMap,
}

/// A directed CFG edge, predecessor first.
pub type Edge = (BlockId, BlockId);
