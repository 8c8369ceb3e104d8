//! Domains: a collection of grids and components sharing a communicator,
//! plus the context (logger) they are created under.
//!
//! Ownership is arena-style: the domain owns grids and components by id;
//! components refer to grids by id, never by pointer.

use crate::comm::Communicator;
use crate::connectivity::ConnectivityComponent;
use crate::core::{bitset_type, Cart, Field, Range, MAX_DIMS};
use crate::error::OvergridError;
use crate::geometry::{Geometry, GeometryParams};
use crate::grid::{Grid, GridId, GridInfo, GridParams};
use crate::overlap::OverlapComponent;
use crate::partition::WireRange;
use crate::state::{State, StateEventFlags, StateFlags};
use bytemuck::Zeroable;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Component id, unique within a domain.
pub type ComponentId = i32;

bitset_type! {
    /// Log categories a context emits.
    LogFlags {
        ERRORS = 1 << 0;
        WARNINGS = 1 << 1;
        STATUS = 1 << 2;
        DEBUG = 1 << 3;
    }
}

impl LogFlags {
    pub const ALL: Self = Self(0b1111);
}

bitset_type! {
    /// Events published for grid creation/destruction.
    GridEventFlags {
        CREATE = 1 << 0;
        DESTROY = 1 << 1;
    }
}

bitset_type! {
    /// Events published for component creation/destruction/edits.
    ComponentEventFlags {
        CREATE = 1 << 0;
        DESTROY = 1 << 1;
        EDIT = 1 << 2;
    }
}

bitset_type! {
    /// Events published by the geometry component.
    GeometryEventFlags {
        CREATE = 1 << 0;
        DESTROY = 1 << 1;
        EDIT_COORDS = 1 << 2;
    }
}

/// Forwards categorized messages to the `log` facade, gated by the
/// context's flags. Collective progress lines pass `emit = rank == root`.
#[derive(Clone, Debug)]
pub struct Logger {
    flags: LogFlags,
}

impl Logger {
    fn new(flags: LogFlags) -> Self {
        Self { flags }
    }

    pub fn logging_debug(&self) -> bool {
        self.flags.contains(LogFlags::DEBUG)
    }

    pub fn status(&self, emit: bool, msg: impl AsRef<str>) {
        if emit && self.flags.contains(LogFlags::STATUS) {
            log::info!("{}", msg.as_ref());
        }
    }

    pub fn debug(&self, emit: bool, msg: impl AsRef<str>) {
        if emit && self.flags.contains(LogFlags::DEBUG) {
            log::debug!("{}", msg.as_ref());
        }
    }

    pub fn warning(&self, msg: impl AsRef<str>) {
        if self.flags.contains(LogFlags::WARNINGS) {
            log::warn!("{}", msg.as_ref());
        }
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        if self.flags.contains(LogFlags::ERRORS) {
            log::error!("{}", msg.as_ref());
        }
    }
}

/// Shared execution context: logging configuration. One per embedder,
/// shareable across domains.
#[derive(Debug)]
pub struct Context {
    logger: Logger,
}

impl Context {
    /// Create a context over `comm`. The communicator is only inspected
    /// here; domains keep their own handle.
    pub fn create<C: Communicator>(comm: &C, flags: LogFlags) -> Result<Arc<Self>, OvergridError> {
        if comm.size() == 0 {
            return Err(OvergridError::ContextCreation(
                "communicator has no ranks".into(),
            ));
        }
        Ok(Arc::new(Self {
            logger: Logger::new(flags),
        }))
    }

    #[inline]
    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

/// Geometry tables for the domain's local grids.
#[derive(Clone, Debug, Default)]
pub struct GeometryComponent {
    geometries: BTreeMap<GridId, Geometry>,
    events: GeometryEventFlags,
}

impl GeometryComponent {
    #[inline]
    pub fn geometry(&self, grid: GridId) -> Option<&Geometry> {
        self.geometries.get(&grid)
    }

    #[inline]
    pub fn events(&self) -> GeometryEventFlags {
        self.events
    }

    pub fn clear_events(&mut self) {
        self.events = GeometryEventFlags::NONE;
    }
}

/// State tables for the domain's local grids.
#[derive(Clone, Debug, Default)]
pub struct StateComponent {
    states: BTreeMap<GridId, State>,
    events: StateEventFlags,
}

impl StateComponent {
    #[inline]
    pub fn state(&self, grid: GridId) -> Option<&State> {
        self.states.get(&grid)
    }

    #[inline]
    pub fn events(&self) -> StateEventFlags {
        self.events
    }

    pub fn clear_events(&mut self) {
        self.events = StateEventFlags::NONE;
    }
}

/// A collection of grids plus components sharing one communicator.
pub struct Domain<C: Communicator> {
    context: Arc<Context>,
    comm: Arc<C>,
    dim: usize,
    grids: BTreeMap<GridId, Grid>,
    grid_info: BTreeMap<GridId, GridInfo>,
    geometry: GeometryComponent,
    state: StateComponent,
    overlap: OverlapComponent,
    connectivity: BTreeMap<ComponentId, ConnectivityComponent>,
    grid_events: GridEventFlags,
    component_events: BTreeMap<ComponentId, ComponentEventFlags>,
}

/// Fixed-size creation record gathered across the domain.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct WireGridParams {
    global: WireRange,
    local: WireRange,
    participates: u32,
    periodic: [u32; MAX_DIMS],
    name_len: u32,
    _pad: u32,
}

impl<C: Communicator> Domain<C> {
    /// Create an empty domain. Collective over `comm`.
    pub fn create(context: Arc<Context>, dim: usize, comm: Arc<C>) -> Result<Self, OvergridError> {
        if !(1..=MAX_DIMS).contains(&dim) {
            return Err(OvergridError::ContextCreation(format!(
                "invalid domain dimension {dim}"
            )));
        }
        comm.barrier();
        Ok(Self {
            context,
            comm,
            dim,
            grids: BTreeMap::new(),
            grid_info: BTreeMap::new(),
            geometry: GeometryComponent::default(),
            state: StateComponent::default(),
            overlap: OverlapComponent::default(),
            connectivity: BTreeMap::new(),
            grid_events: GridEventFlags::NONE,
            component_events: BTreeMap::new(),
        })
    }

    #[inline]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    #[inline]
    pub fn logger(&self) -> &Logger {
        self.context.logger()
    }

    #[inline]
    pub fn comm(&self) -> &C {
        &self.comm
    }

    #[inline]
    pub fn comm_arc(&self) -> Arc<C> {
        self.comm.clone()
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Create grids collectively. Every rank passes the full id list;
    /// ranks owning part of a grid pass its params, the rest `None`.
    pub fn create_grids(
        &mut self,
        entries: &[(GridId, Option<GridParams>)],
    ) -> Result<(), OvergridError> {
        for (id, params) in entries {
            self.create_grid(*id, params.as_ref())?;
        }
        self.grid_events |= GridEventFlags::CREATE;
        Ok(())
    }

    fn create_grid(
        &mut self,
        id: GridId,
        params: Option<&GridParams>,
    ) -> Result<(), OvergridError> {
        if self.grid_info.contains_key(&id) {
            return Err(OvergridError::DuplicateGrid(id));
        }
        // Grid ids double as message tags during assembly.
        debug_assert!(
            id >= 0 && (id as u32) < crate::comm::RESERVED_TAG_BASE as u32,
            "grid id {id} outside the usable tag range"
        );
        let mut record = WireGridParams::zeroed();
        let mut name_bytes: &[u8] = &[];
        if let Some(p) = params {
            record.participates = 1;
            record.global = WireRange::from(&p.global_range);
            record.local = WireRange::from(&p.local_range);
            for d in 0..MAX_DIMS {
                record.periodic[d] = p.periodic[d] as u32;
            }
            record.name_len = p.name.len() as u32;
            name_bytes = p.name.as_bytes();
        }
        let mut payload = bytemuck::bytes_of(&record).to_vec();
        payload.extend_from_slice(name_bytes);
        let gathered = self.comm.all_gather(&payload);

        let mut ranks = Vec::new();
        let mut name = String::new();
        let mut global: Option<Range> = None;
        let mut periodic = [false; MAX_DIMS];
        let mut decomp = Vec::new();
        for (rank, bytes) in gathered.iter().enumerate() {
            let head: WireGridParams =
                bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<WireGridParams>()]);
            if head.participates == 0 {
                continue;
            }
            ranks.push(rank);
            let local: Range = head.local.into();
            decomp.push((rank, local));
            let this_global: Range = head.global.into();
            debug_assert!(
                global.map_or(true, |g| g == this_global),
                "grid {id}: participants disagree on the global range"
            );
            global = Some(this_global);
            for d in 0..MAX_DIMS {
                periodic[d] = head.periodic[d] != 0;
            }
            if name.is_empty() {
                let start = std::mem::size_of::<WireGridParams>();
                name = String::from_utf8_lossy(&bytes[start..start + head.name_len as usize])
                    .into_owned();
            }
        }
        let Some(global) = global else {
            return Err(OvergridError::UnknownGrid(id));
        };
        debug_assert_eq!(
            decomp.iter().map(|(_, r)| r.count()).sum::<usize>(),
            global.count(),
            "grid {id}: local ranges must tile the global range"
        );
        let cart = Cart::new(self.dim, global, periodic);
        let info = GridInfo {
            id,
            name,
            cart,
            cell_global_range: crate::partition::cell_global_range_of(&cart),
            ranks,
        };
        if let Some(p) = params {
            let grid = Grid::new(info.clone(), p.local_range, self.comm.rank(), decomp);
            self.grids.insert(id, grid);
        }
        self.grid_info.insert(id, info);
        Ok(())
    }

    /// Ids of every grid in the domain, sorted.
    pub fn grid_ids(&self) -> Vec<GridId> {
        self.grid_info.keys().copied().collect()
    }

    /// Ids of grids with a partition on this rank, sorted.
    pub fn local_grid_ids(&self) -> Vec<GridId> {
        self.grids.keys().copied().collect()
    }

    #[inline]
    pub fn grid_is_local(&self, id: GridId) -> bool {
        self.grids.contains_key(&id)
    }

    pub fn grid(&self, id: GridId) -> Result<&Grid, OvergridError> {
        self.grids.get(&id).ok_or(OvergridError::GridNotLocal(id))
    }

    pub fn grid_info(&self, id: GridId) -> Result<&GridInfo, OvergridError> {
        self.grid_info.get(&id).ok_or(OvergridError::UnknownGrid(id))
    }

    #[inline]
    pub fn grid_events(&self) -> GridEventFlags {
        self.grid_events
    }

    // --- geometry component ---

    /// Create geometry for a local grid (defaults to index coordinates).
    pub fn create_geometry(
        &mut self,
        grid_id: GridId,
        params: GeometryParams,
    ) -> Result<(), OvergridError> {
        let grid = self
            .grids
            .get(&grid_id)
            .ok_or(OvergridError::GridNotLocal(grid_id))?;
        self.geometry
            .geometries
            .insert(grid_id, Geometry::create(grid, params));
        self.geometry.events |= GeometryEventFlags::CREATE;
        Ok(())
    }

    pub fn geometry(&self, grid_id: GridId) -> Result<&Geometry, OvergridError> {
        self.geometry
            .geometry(grid_id)
            .ok_or(OvergridError::MissingGeometry(grid_id))
    }

    #[inline]
    pub fn geometry_component(&self) -> &GeometryComponent {
        &self.geometry
    }

    /// Scoped coordinate edit; the restore (guard drop) refreshes halo
    /// coordinates with periodic offsets applied. Collective over the
    /// grid's member ranks.
    pub fn edit_geometry_coords(
        &mut self,
        grid_id: GridId,
    ) -> Result<CoordsEdit<'_, C>, OvergridError> {
        let grid = self
            .grids
            .get(&grid_id)
            .ok_or(OvergridError::GridNotLocal(grid_id))?;
        let partition = grid.partition().clone();
        let geometry = self
            .geometry
            .geometries
            .get_mut(&grid_id)
            .ok_or(OvergridError::MissingGeometry(grid_id))?;
        Ok(CoordsEdit {
            comm: self.comm.clone(),
            partition,
            geometry,
            events: &mut self.geometry.events,
        })
    }

    // --- state component ---

    /// Create state for a local grid (every point starts `ACTIVE`).
    pub fn create_state(&mut self, grid_id: GridId) -> Result<(), OvergridError> {
        let grid = self
            .grids
            .get(&grid_id)
            .ok_or(OvergridError::GridNotLocal(grid_id))?;
        self.state.states.insert(grid_id, State::create(grid));
        self.state.events |= StateEventFlags::CREATE;
        Ok(())
    }

    pub fn state(&self, grid_id: GridId) -> Result<&State, OvergridError> {
        self.state
            .state(grid_id)
            .ok_or(OvergridError::MissingState(grid_id))
    }

    #[inline]
    pub fn state_component(&self) -> &StateComponent {
        &self.state
    }

    /// Scoped flags edit; the restore refreshes the halo layer. Collective
    /// over the grid's member ranks.
    pub fn edit_state_flags(
        &mut self,
        grid_id: GridId,
    ) -> Result<StateFlagsEdit<'_, C>, OvergridError> {
        let grid = self
            .grids
            .get(&grid_id)
            .ok_or(OvergridError::GridNotLocal(grid_id))?;
        let partition = grid.partition().clone();
        let state = self
            .state
            .states
            .get_mut(&grid_id)
            .ok_or(OvergridError::MissingState(grid_id))?;
        Ok(StateFlagsEdit {
            comm: self.comm.clone(),
            partition,
            state,
            events: &mut self.state.events,
        })
    }

    // --- overlap component ---

    #[inline]
    pub fn overlap(&self) -> &OverlapComponent {
        &self.overlap
    }

    pub(crate) fn overlap_mut(&mut self) -> &mut OverlapComponent {
        &mut self.overlap
    }

    // --- connectivity components ---

    /// Register a connectivity component under `id`.
    pub fn create_connectivity_component(
        &mut self,
        id: ComponentId,
    ) -> Result<(), OvergridError> {
        if self.connectivity.contains_key(&id) {
            return Err(OvergridError::DuplicateComponent(id));
        }
        self.connectivity.insert(id, ConnectivityComponent::default());
        self.component_events
            .entry(id)
            .or_insert(ComponentEventFlags::NONE)
            .0 |= ComponentEventFlags::CREATE.0;
        Ok(())
    }

    pub fn destroy_connectivity_component(
        &mut self,
        id: ComponentId,
    ) -> Result<(), OvergridError> {
        self.connectivity
            .remove(&id)
            .ok_or(OvergridError::UnknownComponent(id))?;
        self.component_events
            .entry(id)
            .or_insert(ComponentEventFlags::NONE)
            .0 |= ComponentEventFlags::DESTROY.0;
        Ok(())
    }

    pub fn connectivity(&self, id: ComponentId) -> Result<&ConnectivityComponent, OvergridError> {
        self.connectivity
            .get(&id)
            .ok_or(OvergridError::UnknownComponent(id))
    }

    pub fn connectivity_mut(
        &mut self,
        id: ComponentId,
    ) -> Result<&mut ConnectivityComponent, OvergridError> {
        self.component_events
            .entry(id)
            .or_insert(ComponentEventFlags::NONE)
            .0 |= ComponentEventFlags::EDIT.0;
        self.connectivity
            .get_mut(&id)
            .ok_or(OvergridError::UnknownComponent(id))
    }

    /// Register connectivity tables for `pairs` in component `id` (m/n
    /// sides are instantiated on ranks owning the respective grids).
    pub fn create_connectivities(
        &mut self,
        id: ComponentId,
        pairs: &[(GridId, GridId)],
    ) -> Result<(), OvergridError> {
        let local: std::collections::BTreeSet<GridId> = self.grids.keys().copied().collect();
        let component = self
            .connectivity
            .get_mut(&id)
            .ok_or(OvergridError::UnknownComponent(id))?;
        component.create_pairs(pairs, |g| local.contains(&g), |g| local.contains(&g));
        self.component_events
            .entry(id)
            .or_insert(ComponentEventFlags::NONE)
            .0 |= ComponentEventFlags::EDIT.0;
        Ok(())
    }

    pub fn component_events(&self, id: ComponentId) -> ComponentEventFlags {
        self.component_events
            .get(&id)
            .copied()
            .unwrap_or(ComponentEventFlags::NONE)
    }

    pub fn clear_component_events(&mut self, id: ComponentId) {
        self.component_events.insert(id, ComponentEventFlags::NONE);
    }
}

/// RAII coordinate edit; drop restores (halo refresh + event).
pub struct CoordsEdit<'a, C: Communicator> {
    comm: Arc<C>,
    partition: Arc<crate::partition::Partition>,
    geometry: &'a mut Geometry,
    events: &'a mut GeometryEventFlags,
}

impl<C: Communicator> CoordsEdit<'_, C> {
    #[inline]
    pub fn coords_mut(&mut self) -> &mut [Field<f64>; MAX_DIMS] {
        self.geometry.coords_mut()
    }
}

impl<C: Communicator> core::ops::Deref for CoordsEdit<'_, C> {
    type Target = [Field<f64>; MAX_DIMS];
    fn deref(&self) -> &Self::Target {
        self.geometry.coords()
    }
}

impl<C: Communicator> Drop for CoordsEdit<'_, C> {
    fn drop(&mut self) {
        let periodic_length = self.geometry.periodic_length();
        self.partition.exchange_coords(
            &*self.comm,
            crate::comm::TAG_HALO,
            self.geometry.coords_mut(),
            periodic_length,
        );
        *self.events |= GeometryEventFlags::EDIT_COORDS;
    }
}

/// RAII state-flags edit; drop restores (halo refresh + event).
pub struct StateFlagsEdit<'a, C: Communicator> {
    comm: Arc<C>,
    partition: Arc<crate::partition::Partition>,
    state: &'a mut State,
    events: &'a mut StateEventFlags,
}

impl<C: Communicator> StateFlagsEdit<'_, C> {
    #[inline]
    pub fn flags_mut(&mut self) -> &mut Field<StateFlags> {
        self.state.flags_mut()
    }
}

impl<C: Communicator> core::ops::Deref for StateFlagsEdit<'_, C> {
    type Target = Field<StateFlags>;
    fn deref(&self) -> &Self::Target {
        self.state.flags()
    }
}

impl<C: Communicator> Drop for StateFlagsEdit<'_, C> {
    fn drop(&mut self) {
        self.partition
            .exchange(&*self.comm, crate::comm::TAG_HALO, self.state.flags_mut());
        *self.events |= StateEventFlags::EDIT_FLAGS;
    }
}
