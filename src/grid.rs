//! Grids: named, logically rectangular index spaces partitioned across the
//! ranks of a domain.

use crate::core::{Cart, Range, MAX_DIMS};
use crate::partition::{cell_global_range_of, Partition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Integer grid id, unique within a domain.
pub type GridId = i32;

/// Per-rank grid creation parameters. Only ranks that own part of the grid
/// supply them; the rest pass `None` to the collective create call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GridParams {
    pub name: String,
    /// Global index box of the grid.
    pub global_range: Range,
    /// Per-axis periodicity.
    pub periodic: [bool; MAX_DIMS],
    /// This rank's owned sub-box. Local ranges must tile the global range.
    pub local_range: Range,
}

impl GridParams {
    pub fn new(name: impl Into<String>, global_range: Range, local_range: Range) -> Self {
        Self {
            name: name.into(),
            global_range,
            periodic: [false; MAX_DIMS],
            local_range,
        }
    }

    pub fn with_periodic(mut self, periodic: [bool; MAX_DIMS]) -> Self {
        self.periodic = periodic;
        self
    }
}

/// Metadata about a grid known on every rank of the domain, including
/// ranks that own none of it.
#[derive(Clone, Debug)]
pub struct GridInfo {
    pub id: GridId,
    pub name: String,
    pub cart: Cart,
    pub cell_global_range: Range,
    /// Domain ranks owning part of the grid, sorted.
    pub ranks: Vec<usize>,
}

impl GridInfo {
    /// Lowest owning rank; used as the broadcast root for per-grid data.
    #[inline]
    pub fn root_rank(&self) -> usize {
        self.ranks[0]
    }
}

/// A locally resident grid: info plus this rank's partition.
#[derive(Clone, Debug)]
pub struct Grid {
    info: GridInfo,
    partition: Arc<Partition>,
}

impl Grid {
    /// Build from the decomposition table gathered at grid creation.
    pub(crate) fn new(
        info: GridInfo,
        local_range: Range,
        my_rank: usize,
        decomp: Vec<(usize, Range)>,
    ) -> Self {
        debug_assert_eq!(info.cell_global_range, cell_global_range_of(&info.cart));
        let partition = Partition::from_decomp(info.cart, local_range, my_rank, decomp);
        Self {
            info,
            partition: Arc::new(partition),
        }
    }

    #[inline]
    pub fn id(&self) -> GridId {
        self.info.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    #[inline]
    pub fn info(&self) -> &GridInfo {
        &self.info
    }

    #[inline]
    pub fn cart(&self) -> &Cart {
        self.partition.cart()
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.cart().dim()
    }

    #[inline]
    pub fn global_range(&self) -> &Range {
        self.cart().range()
    }

    #[inline]
    pub fn local_range(&self) -> &Range {
        self.partition.local_range()
    }

    #[inline]
    pub fn extended_range(&self) -> &Range {
        self.partition.extended_range()
    }

    #[inline]
    pub fn cell_local_range(&self) -> &Range {
        self.partition.cell_local_range()
    }

    #[inline]
    pub fn cell_extended_range(&self) -> &Range {
        self.partition.cell_extended_range()
    }

    #[inline]
    pub fn cell_cover_range(&self) -> &Range {
        self.partition.cell_cover_range()
    }

    #[inline]
    pub fn partition(&self) -> &Arc<Partition> {
        &self.partition
    }

    /// Domain ranks owning part of this grid.
    #[inline]
    pub fn member_ranks(&self) -> &[usize] {
        &self.info.ranks
    }
}
