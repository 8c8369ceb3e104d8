//! Cartesian index-space topology: a global range plus per-axis
//! periodicity, with periodic image mapping.

use super::range::Range;
use super::{IntTuple, MAX_DIMS};
use serde::{Deserialize, Serialize};

/// Global index-space topology of one grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    dim: usize,
    range: Range,
    periodic: [bool; MAX_DIMS],
}

impl Cart {
    pub fn new(dim: usize, range: Range, periodic: [bool; MAX_DIMS]) -> Self {
        debug_assert!(dim >= 1 && dim <= MAX_DIMS, "invalid dimension {dim}");
        debug_assert!(
            (dim..MAX_DIMS).all(|d| !periodic[d]),
            "periodicity set on an inactive axis"
        );
        Self { dim, range, periodic }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn range(&self) -> &Range {
        &self.range
    }

    #[inline]
    pub fn periodic(&self, axis: usize) -> bool {
        self.periodic[axis]
    }

    /// Wrap `p` into the global range along periodic axes. Non-periodic
    /// axes are returned untouched (they may legitimately lie outside the
    /// global range when `p` comes from an extended range).
    pub fn periodic_adjust(&self, p: IntTuple) -> IntTuple {
        let mut q = p;
        for d in 0..MAX_DIMS {
            if self.periodic[d] {
                let size = self.range.size(d);
                q[d] = self.range.begin()[d] + (p[d] - self.range.begin()[d]).rem_euclid(size);
            }
        }
        q
    }

    /// Map `p` (or one of its periodic images) into `target`. Tries the
    /// identity first, then single wraps per periodic axis, and returns the
    /// first image contained by `target`.
    pub fn map_to_range(&self, target: &Range, p: IntTuple) -> Option<IntTuple> {
        let mut offsets = [[0i64; 3]; MAX_DIMS];
        let mut n_offsets = [1usize; MAX_DIMS];
        for d in 0..MAX_DIMS {
            offsets[d][0] = 0;
            if self.periodic[d] {
                let size = self.range.size(d);
                offsets[d][1] = -size;
                offsets[d][2] = size;
                n_offsets[d] = 3;
            }
        }
        for k in 0..n_offsets[2] {
            for j in 0..n_offsets[1] {
                for i in 0..n_offsets[0] {
                    let q = [
                        p[0] + offsets[0][i],
                        p[1] + offsets[1][j],
                        p[2] + offsets[2][k],
                    ];
                    if target.contains(q) {
                        return Some(q);
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart_1d_periodic(n: i64) -> Cart {
        Cart::new(1, Range::from_extents(1, &[0], &[n]), [true, false, false])
    }

    #[test]
    fn adjust_wraps_periodic_axes() {
        let cart = cart_1d_periodic(16);
        assert_eq!(cart.periodic_adjust([-1, 0, 0]), [15, 0, 0]);
        assert_eq!(cart.periodic_adjust([16, 0, 0]), [0, 0, 0]);
        assert_eq!(cart.periodic_adjust([5, 0, 0]), [5, 0, 0]);
    }

    #[test]
    fn map_to_range_finds_wrapped_image() {
        let cart = cart_1d_periodic(16);
        let target = Range::from_extents(1, &[12], &[17]);
        assert_eq!(cart.map_to_range(&target, [0, 0, 0]), Some([16, 0, 0]));
        assert_eq!(cart.map_to_range(&target, [13, 0, 0]), Some([13, 0, 0]));
        assert_eq!(cart.map_to_range(&target, [5, 0, 0]), None);
    }

    #[test]
    fn non_periodic_points_do_not_wrap() {
        let cart = Cart::new(1, Range::from_extents(1, &[0], &[16]), [false; 3]);
        let target = Range::from_extents(1, &[12], &[17]);
        assert_eq!(cart.map_to_range(&target, [0, 0, 0]), None);
    }
}
