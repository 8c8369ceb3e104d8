//! Core geometric and index-space primitives shared by every subsystem:
//! half-open integer ranges, axis-aligned boxes, Cartesian topologies, and
//! dense fields.
//!
//! All index tuples are carried as `[i64; 3]` regardless of the spatial
//! dimension; trailing axes are normalized to the unit range `[0, 1)` so the
//! same triple-nested kernels serve 1D, 2D, and 3D grids.

pub mod bbox;
pub mod cart;
pub mod field;
pub mod range;

pub use bbox::BBox;
pub use cart::Cart;
pub use field::Field;
pub use range::{Layout, Range, RangeIndexer};

/// Maximum (and internal) number of spatial dimensions.
pub const MAX_DIMS: usize = 3;

/// Integer index tuple, trailing dimensions normalized.
pub type IntTuple = [i64; MAX_DIMS];

/// Physical coordinate tuple, trailing dimensions zero.
pub type RealTuple = [f64; MAX_DIMS];

/// Generate a `u32`-backed bitset newtype with the usual operator set.
///
/// The pack's repos hand-roll their bitsets rather than pulling in a macro
/// crate; this keeps the per-flag-type boilerplate in one place.
macro_rules! bitset_type {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr;)* }) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub const NONE: Self = Self(0);
            $( $(#[$fmeta])* pub const $flag: Self = Self($bit); )*

            /// True iff every bit of `other` is set in `self`.
            #[inline]
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// True iff any bit of `other` is set in `self`.
            #[inline]
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            #[inline]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Clear the bits of `other`.
            #[inline]
            pub const fn without(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;
            #[inline]
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl core::ops::BitOrAssign for $name {
            #[inline]
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl core::ops::BitAnd for $name {
            type Output = Self;
            #[inline]
            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl core::ops::BitAndAssign for $name {
            #[inline]
            fn bitand_assign(&mut self, rhs: Self) {
                self.0 &= rhs.0;
            }
        }

        impl core::ops::Not for $name {
            type Output = Self;
            #[inline]
            fn not(self) -> Self {
                Self(!self.0)
            }
        }
    };
}

pub(crate) use bitset_type;
