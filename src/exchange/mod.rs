//! The exchange pipeline: collect → send → receive → disperse, plus the
//! slot-addressable [`Exchanger`] façade that binds plans to a domain's
//! connectivity component.

pub mod collect;
pub mod disperse;
pub mod maps;
pub mod transfer;
pub mod value;

pub use collect::{CollectOp, CollectPlan};
pub use disperse::{DisperseOp, DispersePlan};
pub use maps::{RecvMap, SendMap};
pub use transfer::{RecvPlan, SendPlan};
pub use value::{DataType, ExchangeValue};

use crate::comm::request::Request;
use crate::comm::Communicator;
use crate::core::{Layout, Range, RangeIndexer};
use crate::domain::{ComponentId, Domain};
use crate::error::OvergridError;
use crate::grid::GridId;
use std::any::Any;
use std::collections::BTreeMap;

type SlotKey = (GridId, GridId, i32);

struct Slot {
    plan: Box<dyn Any + Send>,
    data_type: DataType,
    version: u64,
}

impl Slot {
    fn new<T: ExchangeValue>(plan: Box<dyn Any + Send>, version: u64) -> Self {
        Self {
            plan,
            data_type: T::DATA_TYPE,
            version,
        }
    }

    /// The typed plan, or the mismatch error naming both data types.
    fn plan_of<T: ExchangeValue, P: 'static>(
        &self,
        (m, n, slot): SlotKey,
    ) -> Result<&P, OvergridError> {
        if self.data_type != T::DATA_TYPE {
            return Err(OvergridError::SlotTypeMismatch {
                m,
                n,
                slot,
                expected: self.data_type,
                got: T::DATA_TYPE,
            });
        }
        self.plan.downcast_ref::<P>().ok_or(OvergridError::SlotTypeMismatch {
            m,
            n,
            slot,
            expected: self.data_type,
            got: T::DATA_TYPE,
        })
    }
}

/// Binds exchange plans to one connectivity component. Plans are created
/// per `(m, n, slot)` and validated against the component's table versions
/// on every execution, so connectivity edits invalidate affected slots.
pub struct Exchanger {
    component: ComponentId,
    collects: BTreeMap<SlotKey, Slot>,
    sends: BTreeMap<SlotKey, Slot>,
    recvs: BTreeMap<SlotKey, Slot>,
    disperses: BTreeMap<SlotKey, Slot>,
}

impl Exchanger {
    /// Bind to connectivity component `component` of the domain the
    /// execution calls will pass.
    pub fn bind<C: Communicator>(
        domain: &Domain<C>,
        component: ComponentId,
    ) -> Result<Self, OvergridError> {
        domain.connectivity(component)?;
        Ok(Self {
            component,
            collects: BTreeMap::new(),
            sends: BTreeMap::new(),
            recvs: BTreeMap::new(),
            disperses: BTreeMap::new(),
        })
    }

    #[inline]
    pub fn component(&self) -> ComponentId {
        self.component
    }

    /// Drop every slot whose connectivity tables changed since creation.
    pub fn invalidate_stale<C: Communicator>(&mut self, domain: &Domain<C>) {
        let component = match domain.connectivity(self.component) {
            Ok(c) => c,
            Err(_) => return,
        };
        for slots in [
            &mut self.collects,
            &mut self.sends,
            &mut self.recvs,
            &mut self.disperses,
        ] {
            slots.retain(|&(m, n, _), slot| component.pair_version(m, n) == slot.version);
        }
    }

    fn check_version<C: Communicator>(
        &self,
        domain: &Domain<C>,
        key: SlotKey,
        slot: &Slot,
    ) -> Result<(), OvergridError> {
        let component = domain.connectivity(self.component)?;
        if component.pair_version(key.0, key.1) != slot.version {
            return Err(OvergridError::StaleSlot {
                m: key.0,
                n: key.1,
                slot: key.2,
            });
        }
        Ok(())
    }

    // --- collect ---

    /// Create a collect slot on m-grid ranks of the pair.
    #[allow(clippy::too_many_arguments)]
    pub fn create_collect<T: ExchangeValue, C: Communicator>(
        &mut self,
        domain: &Domain<C>,
        m: GridId,
        n: GridId,
        slot: i32,
        op: CollectOp,
        count: usize,
        field_range: Range,
        layout: Layout,
        tag: u16,
    ) -> Result<(), OvergridError> {
        let component = domain.connectivity(self.component)?;
        let connectivity = component
            .connectivity_m(m, n)
            .ok_or(OvergridError::UnknownConnectivity { m, n })?;
        let partition = domain.grid(m)?.partition().clone();
        let plan = CollectPlan::<T>::new(connectivity, partition, op, count, field_range, layout, tag)?;
        self.collects.insert(
            (m, n, slot),
            Slot::new::<T>(Box::new(plan), component.pair_version(m, n)),
        );
        Ok(())
    }

    /// Execute a collect slot. Collective over the m grid's member ranks.
    pub fn collect<T: ExchangeValue, C: Communicator>(
        &mut self,
        domain: &Domain<C>,
        m: GridId,
        n: GridId,
        slot: i32,
        fields: &[&[T]],
        donors: &mut [T],
    ) -> Result<(), OvergridError> {
        let key = (m, n, slot);
        let entry = self
            .collects
            .get_mut(&key)
            .ok_or(OvergridError::UnknownSlot { m, n, slot })?;
        let component = domain.connectivity(self.component)?;
        if component.pair_version(m, n) != entry.version {
            return Err(OvergridError::StaleSlot { m, n, slot });
        }
        if entry.data_type != T::DATA_TYPE {
            return Err(OvergridError::SlotTypeMismatch {
                m,
                n,
                slot,
                expected: entry.data_type,
                got: T::DATA_TYPE,
            });
        }
        let plan = entry
            .plan
            .downcast_mut::<CollectPlan<T>>()
            .ok_or(OvergridError::SlotTypeMismatch {
                m,
                n,
                slot,
                expected: T::DATA_TYPE,
                got: T::DATA_TYPE,
            })?;
        plan.collect(domain.comm(), fields, donors)
    }

    // --- send ---

    /// Create a send slot on m-grid ranks of the pair.
    pub fn create_send<T: ExchangeValue, C: Communicator>(
        &mut self,
        domain: &Domain<C>,
        m: GridId,
        n: GridId,
        slot: i32,
        count: usize,
        tag: u16,
    ) -> Result<(), OvergridError> {
        let component = domain.connectivity(self.component)?;
        let connectivity = component
            .connectivity_m(m, n)
            .ok_or(OvergridError::UnknownConnectivity { m, n })?;
        let n_indexer = RangeIndexer::new(*domain.grid_info(n)?.cart.range());
        let map = SendMap::build(
            connectivity.destinations(),
            connectivity.destination_ranks(),
            &n_indexer,
        );
        let plan = SendPlan::<T>::new(map, connectivity.count(), count, tag);
        self.sends.insert(
            (m, n, slot),
            Slot::new::<T>(Box::new(plan), component.pair_version(m, n)),
        );
        Ok(())
    }

    /// Post the sends for a slot; complete the returned request with
    /// `wait` before reusing `values`.
    pub fn send<'buf, T: ExchangeValue, C: Communicator>(
        &self,
        domain: &Domain<C>,
        m: GridId,
        n: GridId,
        slot: i32,
        values: &[T],
    ) -> Result<Request<'buf, C>, OvergridError> {
        let key = (m, n, slot);
        let entry = self
            .sends
            .get(&key)
            .ok_or(OvergridError::UnknownSlot { m, n, slot })?;
        self.check_version(domain, key, entry)?;
        let plan: &SendPlan<T> = entry.plan_of::<T, _>(key)?;
        plan.send(domain.comm(), values)
    }

    // --- receive ---

    /// Create a receive slot on n-grid ranks of the pair.
    pub fn create_receive<T: ExchangeValue, C: Communicator>(
        &mut self,
        domain: &Domain<C>,
        m: GridId,
        n: GridId,
        slot: i32,
        count: usize,
        tag: u16,
    ) -> Result<(), OvergridError> {
        let component = domain.connectivity(self.component)?;
        let connectivity = component
            .connectivity_n(m, n)
            .ok_or(OvergridError::UnknownConnectivity { m, n })?;
        let n_indexer = RangeIndexer::new(*domain.grid_info(n)?.cart.range());
        let map = RecvMap::build(
            connectivity.points(),
            connectivity.source_ranks(),
            &n_indexer,
        );
        let plan = RecvPlan::<T>::new(map, connectivity.count(), count, tag);
        self.recvs.insert(
            (m, n, slot),
            Slot::new::<T>(Box::new(plan), component.pair_version(m, n)),
        );
        Ok(())
    }

    /// Post the receives for a slot. The request's `wait` scatters into
    /// `out`.
    pub fn receive<'buf, T: ExchangeValue, C: Communicator>(
        &'buf self,
        domain: &Domain<C>,
        m: GridId,
        n: GridId,
        slot: i32,
        out: &'buf mut [T],
    ) -> Result<Request<'buf, C>, OvergridError> {
        let key = (m, n, slot);
        let entry = self
            .recvs
            .get(&key)
            .ok_or(OvergridError::UnknownSlot { m, n, slot })?;
        self.check_version(domain, key, entry)?;
        let plan: &RecvPlan<T> = entry.plan_of::<T, _>(key)?;
        plan.receive(domain.comm(), out)
    }

    // --- disperse ---

    /// Create a disperse slot on n-grid ranks of the pair.
    #[allow(clippy::too_many_arguments)]
    pub fn create_disperse<T: ExchangeValue, C: Communicator>(
        &mut self,
        domain: &Domain<C>,
        m: GridId,
        n: GridId,
        slot: i32,
        op: DisperseOp,
        count: usize,
        field_range: Range,
        layout: Layout,
    ) -> Result<(), OvergridError> {
        let component = domain.connectivity(self.component)?;
        let connectivity = component
            .connectivity_n(m, n)
            .ok_or(OvergridError::UnknownConnectivity { m, n })?;
        let plan = DispersePlan::<T>::new(connectivity, op, count, field_range, layout)?;
        self.disperses.insert(
            (m, n, slot),
            Slot::new::<T>(Box::new(plan), component.pair_version(m, n)),
        );
        Ok(())
    }

    /// Execute a disperse slot (purely local).
    pub fn disperse<T: ExchangeValue, C: Communicator>(
        &self,
        domain: &Domain<C>,
        m: GridId,
        n: GridId,
        slot: i32,
        values: &[T],
        field: &mut [T],
    ) -> Result<(), OvergridError> {
        let key = (m, n, slot);
        let entry = self
            .disperses
            .get(&key)
            .ok_or(OvergridError::UnknownSlot { m, n, slot })?;
        self.check_version(domain, key, entry)?;
        let plan: &DispersePlan<T> = entry.plan_of::<T, _>(key)?;
        plan.disperse(values, field)
    }

    /// Remove one slot of every kind addressed by `(m, n, slot)`.
    pub fn destroy(&mut self, m: GridId, n: GridId, slot: i32) {
        let key = (m, n, slot);
        self.collects.remove(&key);
        self.sends.remove(&key);
        self.recvs.remove(&key);
        self.disperses.remove(&key);
    }
}
