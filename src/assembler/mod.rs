//! The assembly driver: orders the phases that turn geometry and state
//! into overlap tables, inferred boundaries, and connectivity.

mod detect;
mod infer;
pub(crate) mod masks;
mod policies;

use crate::comm::Communicator;
use crate::domain::{ComponentId, Domain};
use crate::error::OvergridError;
use crate::grid::GridId;
use masks::GridAuxData;
use std::collections::{BTreeMap, BTreeSet};

/// Per-pair and per-grid assembly policy switches.
///
/// Pairs are keyed `(m_grid, n_grid)` — donor first. Nothing overlaps
/// until `set_overlappable` says so.
#[derive(Clone, Debug, Default)]
pub struct AssemblerOptions {
    overlappable: BTreeSet<(GridId, GridId)>,
    overlap_tolerance: BTreeMap<(GridId, GridId), f64>,
    infer_boundaries: BTreeSet<GridId>,
    cut_boundary_holes: BTreeSet<(GridId, GridId)>,
    occludes: BTreeSet<(GridId, GridId)>,
    edge_padding: BTreeMap<(GridId, GridId), usize>,
    edge_smoothing: BTreeMap<GridId, usize>,
    minimize_overlap: BTreeSet<(GridId, GridId)>,
    fringe_size: BTreeMap<GridId, usize>,
}

impl AssemblerOptions {
    const DEFAULT_TOLERANCE: f64 = 1.0e-10;

    pub fn set_overlappable(&mut self, m: GridId, n: GridId, value: bool) -> &mut Self {
        if value {
            self.overlappable.insert((m, n));
        } else {
            self.overlappable.remove(&(m, n));
        }
        self
    }

    #[inline]
    pub fn overlappable(&self, m: GridId, n: GridId) -> bool {
        self.overlappable.contains(&(m, n))
    }

    pub fn set_overlap_tolerance(&mut self, m: GridId, n: GridId, tolerance: f64) -> &mut Self {
        debug_assert!(tolerance >= 0., "tolerance must be nonnegative");
        self.overlap_tolerance.insert((m, n), tolerance);
        self
    }

    #[inline]
    pub fn overlap_tolerance(&self, m: GridId, n: GridId) -> f64 {
        self.overlap_tolerance
            .get(&(m, n))
            .copied()
            .unwrap_or(Self::DEFAULT_TOLERANCE)
    }

    pub fn set_infer_boundaries(&mut self, grid: GridId, value: bool) -> &mut Self {
        if value {
            self.infer_boundaries.insert(grid);
        } else {
            self.infer_boundaries.remove(&grid);
        }
        self
    }

    #[inline]
    pub fn infer_boundaries(&self, grid: GridId) -> bool {
        self.infer_boundaries.contains(&grid)
    }

    /// Cut n-side points lying behind m-side boundaries. Requires both
    /// `(m, n)` and `(n, m)` to be overlappable.
    pub fn set_cut_boundary_holes(&mut self, m: GridId, n: GridId, value: bool) -> &mut Self {
        if value {
            self.cut_boundary_holes.insert((m, n));
        } else {
            self.cut_boundary_holes.remove(&(m, n));
        }
        self
    }

    #[inline]
    pub fn cut_boundary_holes(&self, m: GridId, n: GridId) -> bool {
        self.cut_boundary_holes.contains(&(m, n))
    }

    pub fn set_occludes(&mut self, m: GridId, n: GridId, value: bool) -> &mut Self {
        if value {
            self.occludes.insert((m, n));
        } else {
            self.occludes.remove(&(m, n));
        }
        self
    }

    #[inline]
    pub fn occludes(&self, m: GridId, n: GridId) -> bool {
        self.occludes.contains(&(m, n))
    }

    pub fn set_edge_padding(&mut self, m: GridId, n: GridId, layers: usize) -> &mut Self {
        self.edge_padding.insert((m, n), layers);
        self
    }

    #[inline]
    pub fn edge_padding(&self, m: GridId, n: GridId) -> usize {
        self.edge_padding.get(&(m, n)).copied().unwrap_or(0)
    }

    pub fn set_edge_smoothing(&mut self, grid: GridId, sweeps: usize) -> &mut Self {
        self.edge_smoothing.insert(grid, sweeps);
        self
    }

    #[inline]
    pub fn edge_smoothing(&self, grid: GridId) -> usize {
        self.edge_smoothing.get(&grid).copied().unwrap_or(0)
    }

    pub fn set_minimize_overlap(&mut self, m: GridId, n: GridId, value: bool) -> &mut Self {
        if value {
            self.minimize_overlap.insert((m, n));
        } else {
            self.minimize_overlap.remove(&(m, n));
        }
        self
    }

    #[inline]
    pub fn minimize_overlap(&self, m: GridId, n: GridId) -> bool {
        self.minimize_overlap.contains(&(m, n))
    }

    pub fn set_fringe_size(&mut self, grid: GridId, size: usize) -> &mut Self {
        self.fringe_size.insert(grid, size);
        self
    }

    #[inline]
    pub fn fringe_size(&self, grid: GridId) -> usize {
        self.fringe_size.get(&grid).copied().unwrap_or(1)
    }

    fn validate(&self) {
        for &(m, n) in &self.cut_boundary_holes {
            debug_assert!(
                self.overlappable(m, n) && self.overlappable(n, m),
                "boundary-hole cutting of grid {n} by grid {m} requires overlappability both ways"
            );
        }
    }
}

/// Scratch state carried across the phases of one `assemble` call.
#[derive(Default)]
pub(crate) struct AssemblyData {
    pub grid_aux: BTreeMap<GridId, GridAuxData>,
}

/// Runs the assembly phases in order against a domain.
pub struct Assembler {
    name: String,
    options: AssemblerOptions,
}

impl Assembler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: AssemblerOptions::default(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn options(&self) -> &AssemblerOptions {
        &self.options
    }

    #[inline]
    pub fn options_mut(&mut self) -> &mut AssemblerOptions {
        &mut self.options
    }

    /// Assemble the domain: rebuild the overlap tables, infer boundaries,
    /// apply the enabled policy phases, and regenerate the connectivity
    /// tables of `connectivity_component`. Collective over the domain
    /// communicator; every phase is barrier-bracketed so the log narrative
    /// is ordered.
    pub fn assemble<C: Communicator>(
        &mut self,
        domain: &mut Domain<C>,
        connectivity_component: ComponentId,
    ) -> Result<(), OvergridError> {
        let comm_rank = domain.comm().rank();
        let is_root = comm_rank == 0;
        domain.comm().barrier();
        domain.logger().status(
            is_root,
            format!("Assembling domain using assembler {}...", self.name),
        );
        self.options.validate();

        let mut data = AssemblyData::default();
        self.initialize(domain, &mut data)?;
        detect::detect_overlap(domain, &self.options, &mut data)?;
        infer::infer_boundaries(domain, &self.options, &mut data)?;
        policies::cut_boundary_holes(domain, &self.options, &mut data)?;
        policies::compute_occlusion(domain, &self.options)?;
        policies::apply_padding(domain, &self.options)?;
        policies::apply_smoothing(domain, &self.options)?;
        policies::minimize_overlap(domain, &self.options, &mut data)?;
        policies::generate_connectivity(domain, &self.options, connectivity_component)?;

        domain.comm().barrier();
        domain.logger().status(
            is_root,
            format!("Done assembling domain using assembler {}.", self.name),
        );
        Ok(())
    }

    /// Phase 1: derive the auxiliary masks from the state flags.
    fn initialize<C: Communicator>(
        &self,
        domain: &Domain<C>,
        data: &mut AssemblyData,
    ) -> Result<(), OvergridError> {
        domain.comm().barrier();
        for grid_id in domain.local_grid_ids() {
            let grid = domain.grid(grid_id)?;
            let state = domain.state(grid_id)?;
            domain.geometry(grid_id)?;
            data.grid_aux.insert(
                grid_id,
                GridAuxData::generate(domain.comm(), grid, state.flags()),
            );
        }
        domain.comm().barrier();
        Ok(())
    }
}
