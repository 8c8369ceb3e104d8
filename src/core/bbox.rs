//! Axis-aligned boxes in physical space.

use super::{RealTuple, MAX_DIMS};
use serde::{Deserialize, Serialize};

/// Closed axis-aligned box `[min, max]` per active axis. Trailing axes are
/// degenerate at zero. An empty box has `min > max` on some active axis.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    min: RealTuple,
    max: RealTuple,
}

impl BBox {
    /// Empty box for `dim` active axes (ready to be extended point-wise).
    pub fn empty(dim: usize) -> Self {
        let mut b = Self {
            min: [0.; MAX_DIMS],
            max: [0.; MAX_DIMS],
        };
        for d in 0..dim {
            b.min[d] = f64::INFINITY;
            b.max[d] = f64::NEG_INFINITY;
        }
        b
    }

    pub fn new(min: RealTuple, max: RealTuple) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn min(&self) -> RealTuple {
        self.min
    }

    #[inline]
    pub fn max(&self) -> RealTuple {
        self.max
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..MAX_DIMS).any(|d| self.min[d] > self.max[d])
    }

    /// Smallest box containing `self` and `p`.
    pub fn extended(&self, p: RealTuple) -> Self {
        let mut b = *self;
        for d in 0..MAX_DIMS {
            b.min[d] = b.min[d].min(p[d]);
            b.max[d] = b.max[d].max(p[d]);
        }
        b
    }

    /// Union of two boxes (empty boxes are absorbed).
    pub fn union(&self, other: &BBox) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let mut b = *self;
        for d in 0..MAX_DIMS {
            b.min[d] = b.min[d].min(other.min[d]);
            b.max[d] = b.max[d].max(other.max[d]);
        }
        b
    }

    #[inline]
    pub fn contains(&self, p: RealTuple) -> bool {
        (0..MAX_DIMS).all(|d| p[d] >= self.min[d] && p[d] <= self.max[d])
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && (0..MAX_DIMS).all(|d| self.min[d] <= other.max[d] && other.min[d] <= self.max[d])
    }

    /// Per-axis extent.
    #[inline]
    pub fn length(&self, axis: usize) -> f64 {
        (self.max[axis] - self.min[axis]).max(0.)
    }
}
