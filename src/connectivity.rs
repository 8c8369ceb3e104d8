//! Donor (M-side) and receiver (N-side) connectivity tables with the
//! resize + edit/restore protocol.
//!
//! A table is rewritten by `resize`, mutated through scoped edit guards,
//! and read-only otherwise. Guard drop is the restore: it publishes the
//! field's edit event and bumps the table version that exchange handles
//! validate against. Exclusive borrowing makes overlapping writers
//! unrepresentable; the cross-rank agreement checks that the original
//! protocol performed with reference counts are debug-asserted instead.

use crate::comm::subset::SubsetComm;
use crate::comm::Communicator;
use crate::core::{bitset_type, IntTuple, RealTuple, MAX_DIMS};
use crate::grid::GridId;
use std::collections::BTreeMap;

bitset_type! {
    /// Events published by a connectivity component.
    ConnectivityEventFlags {
        CREATE = 1 << 0;
        DESTROY = 1 << 1;
        RESIZE_M = 1 << 2;
        EDIT_M_EXTENTS = 1 << 3;
        EDIT_M_COORDS = 1 << 4;
        EDIT_M_INTERP_COEFS = 1 << 5;
        EDIT_M_DESTINATIONS = 1 << 6;
        RESIZE_N = 1 << 7;
        EDIT_N_POINTS = 1 << 8;
        EDIT_N_SOURCES = 1 << 9;
    }
}

impl ConnectivityEventFlags {
    pub const ALL_EDITS: Self = Self(
        Self::RESIZE_M.0
            | Self::EDIT_M_EXTENTS.0
            | Self::EDIT_M_COORDS.0
            | Self::EDIT_M_INTERP_COEFS.0
            | Self::EDIT_M_DESTINATIONS.0
            | Self::RESIZE_N.0
            | Self::EDIT_N_POINTS.0
            | Self::EDIT_N_SOURCES.0,
    );
}

/// Scoped mutable access to one column of a table. Dropping the guard is
/// the restore step.
pub struct Edit<'a, T> {
    data: &'a mut [T],
    events: &'a mut ConnectivityEventFlags,
    event: ConnectivityEventFlags,
    version: &'a mut u64,
}

impl<T> core::ops::Deref for Edit<'_, T> {
    type Target = [T];
    #[inline]
    fn deref(&self) -> &[T] {
        self.data
    }
}

impl<T> core::ops::DerefMut for Edit<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [T] {
        self.data
    }
}

impl<T> Drop for Edit<'_, T> {
    fn drop(&mut self) {
        *self.events |= self.event;
        *self.version = self.version.wrapping_add(1);
    }
}

/// Donor-side connectivity for one `(m, n)` pair, resident on m-grid ranks.
#[derive(Clone, Debug, Default)]
pub struct ConnectivityM {
    num_donors: usize,
    max_donor_size: usize,
    extents_begin: Vec<IntTuple>,
    extents_end: Vec<IntTuple>,
    coords: Vec<RealTuple>,
    /// `coef[axis][point_in_cell][donor]`, flattened as
    /// `(axis * max_donor_size + point) * num_donors + donor`.
    interp_coefs: Vec<f64>,
    destinations: Vec<IntTuple>,
    destination_ranks: Vec<i32>,
    events: ConnectivityEventFlags,
    version: u64,
}

impl ConnectivityM {
    /// Collective over the pair subset: rewrites storage with defaults and
    /// invalidates previous rows. `max_donor_size` must agree across the
    /// pair's ranks (debug-checked, as editing coefficients is collective).
    pub fn resize<C: Communicator>(
        &mut self,
        pair_comm: &SubsetComm<'_, C>,
        num_donors: usize,
        max_donor_size: usize,
    ) {
        pair_comm.barrier();
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        {
            let gathered = pair_comm.all_gather(&(max_donor_size as u64).to_le_bytes());
            for bytes in gathered {
                let peer = u64::from_le_bytes(bytes.try_into().expect("size record"));
                debug_assert_eq!(
                    peer as usize, max_donor_size,
                    "max donor size must agree on all connectivity ranks"
                );
            }
        }
        self.num_donors = num_donors;
        self.max_donor_size = max_donor_size;
        self.extents_begin = vec![[0; MAX_DIMS]; num_donors];
        self.extents_end = vec![[0, 0, 1]; num_donors];
        self.coords = vec![[0.; MAX_DIMS]; num_donors];
        self.interp_coefs = vec![0.; MAX_DIMS * max_donor_size * num_donors];
        self.destinations = vec![[0; MAX_DIMS]; num_donors];
        self.destination_ranks = vec![-1; num_donors];
        self.events |= ConnectivityEventFlags::RESIZE_M;
        self.version = self.version.wrapping_add(1);
        pair_comm.barrier();
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.num_donors
    }

    #[inline]
    pub fn max_donor_size(&self) -> usize {
        self.max_donor_size
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub fn extents_begin(&self) -> &[IntTuple] {
        &self.extents_begin
    }

    #[inline]
    pub fn extents_end(&self) -> &[IntTuple] {
        &self.extents_end
    }

    #[inline]
    pub fn coords(&self) -> &[RealTuple] {
        &self.coords
    }

    #[inline]
    pub fn interp_coefs(&self) -> &[f64] {
        &self.interp_coefs
    }

    /// Flat index into [`ConnectivityM::interp_coefs`].
    #[inline]
    pub fn coef_index(&self, axis: usize, point: usize, donor: usize) -> usize {
        (axis * self.max_donor_size + point) * self.num_donors + donor
    }

    #[inline]
    pub fn destinations(&self) -> &[IntTuple] {
        &self.destinations
    }

    #[inline]
    pub fn destination_ranks(&self) -> &[i32] {
        &self.destination_ranks
    }

    pub fn edit_extents(&mut self) -> (Edit<'_, IntTuple>, &mut [IntTuple]) {
        let Self {
            extents_begin,
            extents_end,
            events,
            version,
            ..
        } = self;
        (
            Edit {
                data: extents_begin.as_mut_slice(),
                events,
                event: ConnectivityEventFlags::EDIT_M_EXTENTS,
                version,
            },
            extents_end,
        )
    }

    pub fn edit_coords(&mut self) -> Edit<'_, RealTuple> {
        let Self {
            coords,
            events,
            version,
            ..
        } = self;
        Edit {
            data: coords.as_mut_slice(),
            events,
            event: ConnectivityEventFlags::EDIT_M_COORDS,
            version,
        }
    }

    pub fn edit_interp_coefs(&mut self) -> Edit<'_, f64> {
        let Self {
            interp_coefs,
            events,
            version,
            ..
        } = self;
        Edit {
            data: interp_coefs.as_mut_slice(),
            events,
            event: ConnectivityEventFlags::EDIT_M_INTERP_COEFS,
            version,
        }
    }

    pub fn edit_destinations(&mut self) -> (Edit<'_, IntTuple>, &mut [i32]) {
        let Self {
            destinations,
            destination_ranks,
            events,
            version,
            ..
        } = self;
        (
            Edit {
                data: destinations.as_mut_slice(),
                events,
                event: ConnectivityEventFlags::EDIT_M_DESTINATIONS,
                version,
            },
            destination_ranks,
        )
    }
}

/// Receiver-side connectivity for one `(m, n)` pair, resident on n-grid
/// ranks.
#[derive(Clone, Debug, Default)]
pub struct ConnectivityN {
    num_receivers: usize,
    points: Vec<IntTuple>,
    sources: Vec<IntTuple>,
    source_ranks: Vec<i32>,
    events: ConnectivityEventFlags,
    version: u64,
}

impl ConnectivityN {
    /// Collective over the pair subset; rewrites storage with defaults.
    pub fn resize<C: Communicator>(&mut self, pair_comm: &SubsetComm<'_, C>, num_receivers: usize) {
        pair_comm.barrier();
        self.num_receivers = num_receivers;
        self.points = vec![[0; MAX_DIMS]; num_receivers];
        self.sources = vec![[0; MAX_DIMS]; num_receivers];
        self.source_ranks = vec![-1; num_receivers];
        self.events |= ConnectivityEventFlags::RESIZE_N;
        self.version = self.version.wrapping_add(1);
        pair_comm.barrier();
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.num_receivers
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub fn points(&self) -> &[IntTuple] {
        &self.points
    }

    #[inline]
    pub fn sources(&self) -> &[IntTuple] {
        &self.sources
    }

    #[inline]
    pub fn source_ranks(&self) -> &[i32] {
        &self.source_ranks
    }

    pub fn edit_points(&mut self) -> Edit<'_, IntTuple> {
        let Self {
            points,
            events,
            version,
            ..
        } = self;
        Edit {
            data: points.as_mut_slice(),
            events,
            event: ConnectivityEventFlags::EDIT_N_POINTS,
            version,
        }
    }

    pub fn edit_sources(&mut self) -> (Edit<'_, IntTuple>, &mut [i32]) {
        let Self {
            sources,
            source_ranks,
            events,
            version,
            ..
        } = self;
        (
            Edit {
                data: sources.as_mut_slice(),
                events,
                event: ConnectivityEventFlags::EDIT_N_SOURCES,
                version,
            },
            source_ranks,
        )
    }
}

/// A connectivity component: tables for a set of grid pairs, addressed by
/// `(m_grid, n_grid)`.
#[derive(Clone, Debug, Default)]
pub struct ConnectivityComponent {
    m_tables: BTreeMap<(GridId, GridId), ConnectivityM>,
    n_tables: BTreeMap<(GridId, GridId), ConnectivityN>,
    pairs: Vec<(GridId, GridId)>,
    events: ConnectivityEventFlags,
}

impl ConnectivityComponent {
    /// Register tables for `pairs`; the m/n sides are instantiated on
    /// ranks owning the respective grids.
    pub(crate) fn create_pairs(
        &mut self,
        pairs: &[(GridId, GridId)],
        m_local: impl Fn(GridId) -> bool,
        n_local: impl Fn(GridId) -> bool,
    ) {
        for &(m, n) in pairs {
            if !self.pairs.contains(&(m, n)) {
                self.pairs.push((m, n));
            }
            if m_local(m) {
                self.m_tables.entry((m, n)).or_default();
            }
            if n_local(n) {
                self.n_tables.entry((m, n)).or_default();
            }
        }
        self.pairs.sort_unstable();
        self.events |= ConnectivityEventFlags::CREATE;
    }

    pub(crate) fn clear_pairs(&mut self) {
        self.m_tables.clear();
        self.n_tables.clear();
        self.pairs.clear();
        self.events |= ConnectivityEventFlags::DESTROY;
    }

    /// All registered pairs, sorted.
    #[inline]
    pub fn pairs(&self) -> &[(GridId, GridId)] {
        &self.pairs
    }

    #[inline]
    pub fn connectivity_m(&self, m: GridId, n: GridId) -> Option<&ConnectivityM> {
        self.m_tables.get(&(m, n))
    }

    #[inline]
    pub fn connectivity_n(&self, m: GridId, n: GridId) -> Option<&ConnectivityN> {
        self.n_tables.get(&(m, n))
    }

    pub fn connectivity_m_mut(&mut self, m: GridId, n: GridId) -> Option<&mut ConnectivityM> {
        self.m_tables.get_mut(&(m, n))
    }

    pub fn connectivity_n_mut(&mut self, m: GridId, n: GridId) -> Option<&mut ConnectivityN> {
        self.n_tables.get_mut(&(m, n))
    }

    /// Combined version of a pair's tables on this rank, used by exchange
    /// handles to detect staleness.
    pub fn pair_version(&self, m: GridId, n: GridId) -> u64 {
        let vm = self.m_tables.get(&(m, n)).map_or(0, |t| t.version);
        let vn = self.n_tables.get(&(m, n)).map_or(0, |t| t.version);
        vm.wrapping_add(vn.wrapping_mul(0x9E37_79B9))
    }

    /// Events accumulated on this rank's tables since the last clear.
    pub fn events(&self) -> ConnectivityEventFlags {
        let mut e = self.events;
        for t in self.m_tables.values() {
            e |= t.events;
        }
        for t in self.n_tables.values() {
            e |= t.events;
        }
        e
    }

    pub fn clear_events(&mut self) {
        self.events = ConnectivityEventFlags::NONE;
        for t in self.m_tables.values_mut() {
            t.events = ConnectivityEventFlags::NONE;
        }
        for t in self.n_tables.values_mut() {
            t.events = ConnectivityEventFlags::NONE;
        }
    }
}
