//! Half-open integer boxes over normalized 3-tuples, with row- and
//! column-major linear indexers.
//!
//! A `Range` spans `[begin, end)` per axis. Trailing axes beyond the active
//! dimension hold `[0, 1)` so every iteration kernel can be written for
//! three nested axes.

use super::{IntTuple, MAX_DIMS};
use serde::{Deserialize, Serialize};

/// Memory ordering of a flat buffer over a [`Range`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    /// Last axis varies fastest (C order). The crate's canonical ordering:
    /// range iteration and all "global row-major index" sort keys use it.
    RowMajor,
    /// First axis varies fastest (Fortran order).
    ColumnMajor,
}

/// Half-open integer box `[begin, end)` per axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    begin: IntTuple,
    end: IntTuple,
}

impl Range {
    /// A range with explicit bounds. Trailing axes must already be
    /// normalized by the caller; use [`Range::from_extents`] when building
    /// from dimension-sized slices.
    #[inline]
    pub fn new(begin: IntTuple, end: IntTuple) -> Self {
        Self { begin, end }
    }

    /// Empty range for `dim` active axes: active axes `[0, 0)`, trailing
    /// axes `[0, 1)`.
    pub fn empty(dim: usize) -> Self {
        let mut r = Self {
            begin: [0; MAX_DIMS],
            end: [0; MAX_DIMS],
        };
        for d in dim..MAX_DIMS {
            r.end[d] = 1;
        }
        r
    }

    /// Build from per-axis `(begin, end)` pairs for the first `dim` axes,
    /// normalizing the rest.
    pub fn from_extents(dim: usize, begin: &[i64], end: &[i64]) -> Self {
        debug_assert!(dim <= MAX_DIMS && begin.len() >= dim && end.len() >= dim);
        let mut r = Self::empty(dim);
        for d in 0..dim {
            r.begin[d] = begin[d];
            r.end[d] = end[d];
        }
        r
    }

    #[inline]
    pub fn begin(&self) -> IntTuple {
        self.begin
    }

    #[inline]
    pub fn end(&self) -> IntTuple {
        self.end
    }

    /// Extent along one axis (clamped at zero).
    #[inline]
    pub fn size(&self, axis: usize) -> i64 {
        (self.end[axis] - self.begin[axis]).max(0)
    }

    /// Total number of tuples.
    #[inline]
    pub fn count(&self) -> usize {
        (self.size(0) * self.size(1) * self.size(2)) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..MAX_DIMS).any(|d| self.end[d] <= self.begin[d])
    }

    #[inline]
    pub fn contains(&self, p: IntTuple) -> bool {
        (0..MAX_DIMS).all(|d| p[d] >= self.begin[d] && p[d] < self.end[d])
    }

    /// True iff `other` is entirely inside `self`.
    pub fn includes(&self, other: &Range) -> bool {
        other.is_empty()
            || (0..MAX_DIMS)
                .all(|d| other.begin[d] >= self.begin[d] && other.end[d] <= self.end[d])
    }

    pub fn intersects(&self, other: &Range) -> bool {
        (0..MAX_DIMS).all(|d| self.begin[d] < other.end[d] && other.begin[d] < self.end[d])
    }

    pub fn intersection(&self, other: &Range) -> Range {
        let mut r = *self;
        for d in 0..MAX_DIMS {
            r.begin[d] = self.begin[d].max(other.begin[d]);
            r.end[d] = self.end[d].min(other.end[d]).max(r.begin[d]);
        }
        r
    }

    /// Grow by `lower` downward and `upper` upward per axis.
    pub fn grown(&self, lower: IntTuple, upper: IntTuple) -> Range {
        let mut r = *self;
        for d in 0..MAX_DIMS {
            r.begin[d] -= lower[d];
            r.end[d] += upper[d];
        }
        r
    }

    /// Row-major iteration over all tuples (last axis fastest).
    pub fn iter(&self) -> RangeIter {
        RangeIter {
            range: *self,
            next: self.begin,
            done: self.is_empty(),
        }
    }
}

/// Row-major tuple iterator produced by [`Range::iter`].
pub struct RangeIter {
    range: Range,
    next: IntTuple,
    done: bool,
}

impl Iterator for RangeIter {
    type Item = IntTuple;

    fn next(&mut self) -> Option<IntTuple> {
        if self.done {
            return None;
        }
        let current = self.next;
        for d in (0..MAX_DIMS).rev() {
            self.next[d] += 1;
            if self.next[d] < self.range.end[d] {
                return Some(current);
            }
            self.next[d] = self.range.begin[d];
        }
        self.done = true;
        Some(current)
    }
}

/// Maps tuples inside a [`Range`] to linear indices for a given [`Layout`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeIndexer {
    range: Range,
    strides: [i64; MAX_DIMS],
}

impl RangeIndexer {
    /// Canonical (row-major) indexer.
    pub fn new(range: Range) -> Self {
        Self::with_layout(range, Layout::RowMajor)
    }

    pub fn with_layout(range: Range, layout: Layout) -> Self {
        let mut strides = [1i64; MAX_DIMS];
        match layout {
            Layout::RowMajor => {
                for d in (0..MAX_DIMS - 1).rev() {
                    strides[d] = strides[d + 1] * range.size(d + 1).max(1);
                }
            }
            Layout::ColumnMajor => {
                for d in 1..MAX_DIMS {
                    strides[d] = strides[d - 1] * range.size(d - 1).max(1);
                }
            }
        }
        Self { range, strides }
    }

    #[inline]
    pub fn range(&self) -> &Range {
        &self.range
    }

    /// Linear index of `p`; `p` must lie inside the range.
    #[inline]
    pub fn index_of(&self, p: IntTuple) -> usize {
        debug_assert!(self.range.contains(p), "tuple {p:?} outside {:?}", self.range);
        let mut idx = 0i64;
        for d in 0..MAX_DIMS {
            idx += (p[d] - self.range.begin[d]) * self.strides[d];
        }
        idx as usize
    }

    /// Inverse of [`RangeIndexer::index_of`] (row-major indexers only).
    pub fn tuple_of(&self, index: usize) -> IntTuple {
        let mut rem = index as i64;
        let mut p = [0i64; MAX_DIMS];
        for d in 0..MAX_DIMS {
            p[d] = self.range.begin[d] + rem / self.strides[d];
            rem %= self.strides[d];
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_and_counts() {
        let r = Range::from_extents(2, &[1, 2], &[4, 5]);
        assert_eq!(r.begin(), [1, 2, 0]);
        assert_eq!(r.end(), [4, 5, 1]);
        assert_eq!(r.count(), 9);
        assert!(!r.is_empty());
        assert!(Range::empty(3).is_empty());
    }

    #[test]
    fn iter_is_row_major() {
        let r = Range::from_extents(2, &[0, 0], &[2, 3]);
        let tuples: Vec<_> = r.iter().collect();
        assert_eq!(tuples.len(), 6);
        assert_eq!(tuples[0], [0, 0, 0]);
        assert_eq!(tuples[1], [0, 1, 0]);
        assert_eq!(tuples[3], [1, 0, 0]);
        let idx = RangeIndexer::new(r);
        for (i, t) in tuples.iter().enumerate() {
            assert_eq!(idx.index_of(*t), i);
            assert_eq!(idx.tuple_of(i), *t);
        }
    }

    #[test]
    fn column_major_strides() {
        let r = Range::from_extents(2, &[0, 0], &[2, 3]);
        let idx = RangeIndexer::with_layout(r, Layout::ColumnMajor);
        assert_eq!(idx.index_of([0, 0, 0]), 0);
        assert_eq!(idx.index_of([1, 0, 0]), 1);
        assert_eq!(idx.index_of([0, 1, 0]), 2);
    }

    #[test]
    fn intersection_clamps_to_empty() {
        let a = Range::from_extents(1, &[0], &[4]);
        let b = Range::from_extents(1, &[6], &[9]);
        assert!(!a.intersects(&b));
        assert!(a.intersection(&b).is_empty());
    }
}
