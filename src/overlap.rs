//! Geometric overlap tables: every receiver point spatially contained by a
//! donor cell, before any policy filtering. Connectivity is the subset of
//! these rows that survives the policy phases.

use crate::core::{bitset_type, Field, IntTuple, RealTuple};
use crate::grid::GridId;
use std::collections::BTreeMap;

bitset_type! {
    /// Events published by the overlap component.
    OverlapEventFlags {
        CREATE = 1 << 0;
        DESTROY = 1 << 1;
        EDIT = 1 << 2;
    }
}

/// Donor-side overlap rows for one `(m, n)` pair, resident on m-grid ranks.
/// Rows are ordered by the destination point's global row-major index on
/// the n grid, aligning them with the n-side table.
#[derive(Clone, Debug, Default)]
pub struct OverlapM {
    pub(crate) cells: Vec<IntTuple>,
    pub(crate) coords: Vec<RealTuple>,
    pub(crate) destinations: Vec<IntTuple>,
    pub(crate) destination_ranks: Vec<i32>,
}

impl OverlapM {
    #[inline]
    pub fn count(&self) -> usize {
        self.cells.len()
    }

    /// Donor cell anchors, possibly mapped into this rank's cell cover
    /// range (periodic images keep their unwrapped indices).
    #[inline]
    pub fn cells(&self) -> &[IntTuple] {
        &self.cells
    }

    /// Iso-parametric coordinates of each destination point in its cell.
    #[inline]
    pub fn coords(&self) -> &[RealTuple] {
        &self.coords
    }

    /// Receiver points in the n grid's global index space.
    #[inline]
    pub fn destinations(&self) -> &[IntTuple] {
        &self.destinations
    }

    /// Domain rank owning each receiver point.
    #[inline]
    pub fn destination_ranks(&self) -> &[i32] {
        &self.destination_ranks
    }
}

/// Receiver-side overlap rows for one `(m, n)` pair, resident on n-grid
/// ranks, in local row-major point order.
#[derive(Clone, Debug)]
pub struct OverlapN {
    pub(crate) points: Vec<IntTuple>,
    pub(crate) sources: Vec<IntTuple>,
    pub(crate) source_ranks: Vec<i32>,
    /// True at overlapped points, correct over the extended range.
    pub(crate) mask: Field<bool>,
}

impl OverlapN {
    #[inline]
    pub fn count(&self) -> usize {
        self.points.len()
    }

    /// Receiver points in the n grid's global index space.
    #[inline]
    pub fn points(&self) -> &[IntTuple] {
        &self.points
    }

    /// Containing donor cell anchor in the m grid's global index space.
    #[inline]
    pub fn sources(&self) -> &[IntTuple] {
        &self.sources
    }

    /// Domain rank owning each donor cell.
    #[inline]
    pub fn source_ranks(&self) -> &[i32] {
        &self.source_ranks
    }

    #[inline]
    pub fn mask(&self) -> &Field<bool> {
        &self.mask
    }
}

/// Holds every overlap table of the domain. Rewritten wholesale by each
/// `assemble` call; read-only in between.
#[derive(Clone, Debug, Default)]
pub struct OverlapComponent {
    pub(crate) m_tables: BTreeMap<(GridId, GridId), OverlapM>,
    pub(crate) n_tables: BTreeMap<(GridId, GridId), OverlapN>,
    /// Pairs that overlap anywhere in the domain (globally agreed).
    pub(crate) pairs: Vec<(GridId, GridId)>,
    pub(crate) events: OverlapEventFlags,
}

impl OverlapComponent {
    pub(crate) fn clear(&mut self) {
        self.m_tables.clear();
        self.n_tables.clear();
        self.pairs.clear();
        self.events |= OverlapEventFlags::EDIT;
    }

    /// Globally overlapping pairs, sorted.
    #[inline]
    pub fn pairs(&self) -> &[(GridId, GridId)] {
        &self.pairs
    }

    /// Donor-side table for a pair, when the m grid is local and overlaps.
    #[inline]
    pub fn overlap_m(&self, m: GridId, n: GridId) -> Option<&OverlapM> {
        self.m_tables.get(&(m, n))
    }

    /// Receiver-side table for a pair, when the n grid is local and
    /// overlaps.
    #[inline]
    pub fn overlap_n(&self, m: GridId, n: GridId) -> Option<&OverlapN> {
        self.n_tables.get(&(m, n))
    }

    /// Receiver-side pair keys with tables on this rank.
    pub fn local_n_ids(&self) -> impl Iterator<Item = (GridId, GridId)> + '_ {
        self.n_tables.keys().copied()
    }

    /// Donor-side pair keys with tables on this rank.
    pub fn local_m_ids(&self) -> impl Iterator<Item = (GridId, GridId)> + '_ {
        self.m_tables.keys().copied()
    }

    #[inline]
    pub fn events(&self) -> OverlapEventFlags {
        self.events
    }

    pub fn clear_events(&mut self) {
        self.events = OverlapEventFlags::NONE;
    }
}
