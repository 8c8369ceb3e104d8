//! Per-grid state flags and the state component.

use crate::core::{bitset_type, Field, Range};
use crate::grid::Grid;

bitset_type! {
    /// Per-point state bitset over the extended range.
    StateFlags {
        /// Point participates in the simulation.
        ACTIVE = 1 << 0;
        /// Point lies on a physical domain boundary.
        DOMAIN_BOUNDARY = 1 << 1;
        /// Point lies on an internal (block-interface) boundary.
        INTERNAL_BOUNDARY = 1 << 2;
        /// Boundary deduced by the assembler rather than declared.
        INFERRED_DOMAIN_BOUNDARY = 1 << 3;
        /// Point is overlapped by some donor grid.
        OVERLAPPED = 1 << 4;
        /// Deactivated because it sits behind a donor-side boundary.
        BOUNDARY_HOLE = 1 << 5;
        /// Hidden by a higher-priority grid.
        OCCLUDED = 1 << 6;
        /// Member of the inter-grid fringe.
        FRINGE = 1 << 7;
        /// Receives donor data through generated connectivity.
        RECEIVER = 1 << 8;
        /// Needs donor data but none was found.
        ORPHAN = 1 << 9;
    }
}

unsafe impl bytemuck::Zeroable for StateFlags {}
unsafe impl bytemuck::Pod for StateFlags {}

bitset_type! {
    /// Events published by the state component.
    StateEventFlags {
        CREATE = 1 << 0;
        DESTROY = 1 << 1;
        EDIT_FLAGS = 1 << 2;
    }
}

/// Per-grid state: a flags field over the extended range.
#[derive(Clone, Debug)]
pub struct State {
    flags: Field<StateFlags>,
}

impl State {
    pub(crate) fn create(grid: &Grid) -> Self {
        Self {
            flags: Field::new(*grid.extended_range(), StateFlags::ACTIVE),
        }
    }

    #[inline]
    pub fn flags(&self) -> &Field<StateFlags> {
        &self.flags
    }

    pub(crate) fn flags_mut(&mut self) -> &mut Field<StateFlags> {
        &mut self.flags
    }

    #[inline]
    pub fn range(&self) -> &Range {
        self.flags.range()
    }
}
