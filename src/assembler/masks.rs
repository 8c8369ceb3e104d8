//! Auxiliary masks derived from state flags at the start of assembly.

use crate::comm::{Communicator, TAG_HALO};
use crate::core::{Field, IntTuple, Range, MAX_DIMS};
use crate::grid::Grid;
use crate::state::StateFlags;

/// Per-grid masks used throughout the assembly phases.
#[derive(Clone, Debug)]
pub(crate) struct GridAuxData {
    /// ACTIVE per point, extended range.
    pub active: Field<bool>,
    /// AND of the 2^d corner activities per cell, cell extended range.
    pub cell_active: Field<bool>,
    /// ACTIVE ∧ DOMAIN_BOUNDARY, extended range.
    pub domain_boundary: Field<bool>,
    /// ACTIVE ∧ INTERNAL_BOUNDARY, extended range.
    pub internal_boundary: Field<bool>,
}

impl GridAuxData {
    pub fn generate<C: Communicator>(comm: &C, grid: &Grid, flags: &Field<StateFlags>) -> Self {
        Self {
            active: flag_mask(flags, StateFlags::ACTIVE),
            cell_active: generate_cell_active_mask(comm, grid, flags),
            domain_boundary: flag_mask(flags, StateFlags::ACTIVE | StateFlags::DOMAIN_BOUNDARY),
            internal_boundary: flag_mask(flags, StateFlags::ACTIVE | StateFlags::INTERNAL_BOUNDARY),
        }
    }

    /// Recompute point and cell activity after a policy phase changed the
    /// flags.
    pub fn refresh_activity<C: Communicator>(
        &mut self,
        comm: &C,
        grid: &Grid,
        flags: &Field<StateFlags>,
    ) {
        self.active = flag_mask(flags, StateFlags::ACTIVE);
        self.cell_active = generate_cell_active_mask(comm, grid, flags);
    }
}

fn flag_mask(flags: &Field<StateFlags>, wanted: StateFlags) -> Field<bool> {
    Field::from_values(
        *flags.range(),
        flags.values().iter().map(|f| f.contains(wanted)).collect(),
    )
}

/// A cell is active when all of its corner points are. Computed over the
/// cell local range, then halo-exchanged over the cell partition.
fn generate_cell_active_mask<C: Communicator>(
    comm: &C,
    grid: &Grid,
    flags: &Field<StateFlags>,
) -> Field<bool> {
    let dim = grid.dim();
    let mut mask = Field::new(*grid.cell_extended_range(), false);
    for cell in grid.cell_local_range().iter() {
        let mut active = true;
        for corner in cell_corners(dim, cell) {
            let p = grid
                .cart()
                .map_to_range(grid.extended_range(), corner)
                .unwrap_or(corner);
            active = active && flags[p].contains(StateFlags::ACTIVE);
        }
        mask[cell] = active;
    }
    grid.partition().cell_space().exchange_bool(comm, TAG_HALO, &mut mask);
    mask
}

/// Unit-offset neighborhood of a point along the active axes,
/// diagonals included (the point itself is a member).
pub(crate) fn unit_neighborhood(dim: usize, p: IntTuple) -> Range {
    let mut begin = p;
    let mut end = [p[0] + 1, p[1] + 1, p[2] + 1];
    for d in 0..dim {
        begin[d] -= 1;
        end[d] += 1;
    }
    Range::new(begin, end)
}

/// The 2^d corner points of a cell.
pub(crate) fn cell_corners(dim: usize, cell: IntTuple) -> impl Iterator<Item = IntTuple> {
    let mut upper = cell;
    for d in 0..dim {
        upper[d] += 2;
    }
    for d in dim..MAX_DIMS {
        upper[d] += 1;
    }
    Range::new(cell, upper).iter()
}

/// Inner-edge detection with a FALSE exterior: a point is an inner edge
/// when it is set and at least one unit-offset neighbor (any direction,
/// diagonals included) is unset or outside the extended range. Computed
/// over the local range; callers exchange afterwards.
pub(crate) fn detect_inner_edge(
    dim: usize,
    mask: &Field<bool>,
    local_range: &Range,
) -> Field<bool> {
    let extended = *mask.range();
    let mut edge = Field::new(extended, false);
    for p in local_range.iter() {
        if !mask[p] {
            continue;
        }
        let neighborhood = unit_neighborhood(dim, p);
        let mut is_edge = false;
        for q in neighborhood.iter() {
            if q == p {
                continue;
            }
            let unset = if extended.contains(q) { !mask[q] } else { true };
            if unset {
                is_edge = true;
                break;
            }
        }
        edge[p] = is_edge;
    }
    edge
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_edge_of_a_block_is_its_ring() {
        let r = Range::from_extents(2, &[0, 0], &[6, 6]);
        let mut mask = Field::new(r, false);
        for p in Range::from_extents(2, &[1, 1], &[5, 5]).iter() {
            mask[p] = true;
        }
        let edge = detect_inner_edge(2, &mask, &r);
        let count = edge.values().iter().filter(|&&b| b).count();
        assert_eq!(count, 12);
        assert!(edge[[1, 1, 0]]);
        assert!(!edge[[2, 2, 0]]);
    }

    #[test]
    fn exterior_counts_as_unset() {
        let r = Range::from_extents(1, &[0], &[4]);
        let mask = Field::new(r, true);
        let edge = detect_inner_edge(1, &mask, &r);
        assert_eq!(edge.values(), &[true, false, false, true]);
    }

    #[test]
    fn corners_enumerate_the_cell_vertex_set() {
        let corners: Vec<_> = cell_corners(2, [3, 4, 0]).collect();
        assert_eq!(corners.len(), 4);
        assert!(corners.contains(&[3, 4, 0]));
        assert!(corners.contains(&[4, 5, 0]));
    }
}
