//! Per-grid partition bookkeeping: local/extended/cell ranges, the full
//! decomposition table, and halo links.
//!
//! Both endpoints of every halo link derive identical transfer orders from
//! the shared decomposition table (each side walks the receiver's extended
//! range in row-major order), so halo exchanges need no size negotiation.

use crate::comm::subset::SubsetComm;
use crate::comm::{Communicator, Wait};
use crate::core::{Cart, Field, IntTuple, Range, RealTuple, MAX_DIMS};
use bytemuck::Pod;

/// One neighbor's halo traffic. `send_idx` are linear indices into this
/// rank's extended-range field (values we own that sit in the peer's halo);
/// `recv_idx` are linear indices of our halo points the peer owns.
#[derive(Clone, Debug)]
pub struct HaloLink {
    pub rank: usize,
    send_idx: Vec<usize>,
    recv_idx: Vec<usize>,
    /// Periodic wrap counts per axis applied when the owned point was
    /// mapped into our halo; coordinate-like fields subtract
    /// `wrap * periodic_length` on receipt.
    recv_wraps: Vec<IntTuple>,
}

/// Index-space partition of one grid on one rank.
#[derive(Clone, Debug)]
pub struct Partition {
    cart: Cart,
    my_rank: usize,
    local_range: Range,
    extended_range: Range,
    cell_local_range: Range,
    cell_extended_range: Range,
    cell_cover_range: Range,
    decomp: Vec<(usize, Range)>,
    links: Vec<HaloLink>,
    self_link: Option<HaloLink>,
}

/// Extended range: local range grown by one cell toward every side where a
/// neighbor exists or the axis wraps.
pub fn extended_range_of(cart: &Cart, local: &Range) -> Range {
    let global = cart.range();
    let mut lower = [0i64; MAX_DIMS];
    let mut upper = [0i64; MAX_DIMS];
    for d in 0..cart.dim() {
        if local.begin()[d] > global.begin()[d] || cart.periodic(d) {
            lower[d] = 1;
        }
        if local.end()[d] < global.end()[d] || cart.periodic(d) {
            upper[d] = 1;
        }
    }
    local.grown(lower, upper)
}

/// Global cell range: one smaller per axis unless periodic.
pub fn cell_global_range_of(cart: &Cart) -> Range {
    let global = cart.range();
    let mut end = global.end();
    for d in 0..cart.dim() {
        if !cart.periodic(d) {
            end[d] -= 1;
        }
    }
    Range::new(global.begin(), end)
}

fn cell_local_range_of(cart: &Cart, local: &Range) -> Range {
    let cell_global = cell_global_range_of(cart);
    let mut end = local.end();
    for d in 0..cart.dim() {
        end[d] = end[d].min(cell_global.end()[d]);
    }
    Range::new(local.begin(), end)
}

fn cell_extended_range_of(cart: &Cart, extended: &Range) -> Range {
    let mut end = extended.end();
    for d in 0..cart.dim() {
        end[d] -= 1;
    }
    Range::new(extended.begin(), end)
}

/// Cells having at least one vertex in the local point range: the cell
/// local range extended one cell downward where a lower neighbor exists,
/// or where the axis wraps and this rank does not own the wrap cell.
pub fn cell_cover_range_of(cart: &Cart, cell_local: &Range) -> Range {
    let cell_global = cell_global_range_of(cart);
    let mut begin = cell_local.begin();
    for d in 0..cart.dim() {
        if cell_local.begin()[d] > cell_global.begin()[d]
            || (cart.periodic(d) && cell_local.end()[d] != cell_global.end()[d])
        {
            begin[d] -= 1;
        }
    }
    Range::new(begin, cell_local.end())
}

/// Derive both sides of every halo link from the shared range table.
/// `entries` holds `(rank, local, extended)` for every member, this rank
/// included; each receiver's scatter order is the row-major walk of its
/// own extended range, which the sender reproduces.
fn compute_links(
    cart: &Cart,
    my_rank: usize,
    entries: &[(usize, Range, Range)],
) -> (Vec<HaloLink>, Option<HaloLink>) {
    use std::collections::BTreeMap;
    let my_entry = entries
        .iter()
        .find(|(rank, _, _)| *rank == my_rank)
        .expect("rank missing from its own decomposition");
    let (_, my_local, my_extended) = *my_entry;
    let indexer = crate::core::RangeIndexer::new(my_extended);
    let owner_of = |q: IntTuple| -> Option<usize> {
        entries
            .iter()
            .find(|(_, local, _)| local.contains(q))
            .map(|(rank, _, _)| *rank)
    };

    let mut recv: BTreeMap<usize, (Vec<usize>, Vec<IntTuple>)> = BTreeMap::new();
    let mut self_link: Option<HaloLink> = None;
    for p in my_extended.iter() {
        if my_local.contains(p) {
            continue;
        }
        let q = cart.periodic_adjust(p);
        let Some(owner) = owner_of(q) else { continue };
        let mut wraps = [0i64; MAX_DIMS];
        for d in 0..MAX_DIMS {
            if cart.periodic(d) {
                wraps[d] = (q[d] - p[d]) / cart.range().size(d);
            }
        }
        if owner == my_rank {
            let link = self_link.get_or_insert_with(|| HaloLink {
                rank: my_rank,
                send_idx: Vec::new(),
                recv_idx: Vec::new(),
                recv_wraps: Vec::new(),
            });
            link.send_idx.push(indexer.index_of(q));
            link.recv_idx.push(indexer.index_of(p));
            link.recv_wraps.push(wraps);
        } else {
            let entry = recv.entry(owner).or_default();
            entry.0.push(indexer.index_of(p));
            entry.1.push(wraps);
        }
    }

    let mut send: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &(rank, local, extended) in entries {
        if rank == my_rank {
            continue;
        }
        for p in extended.iter() {
            if local.contains(p) {
                continue;
            }
            let q = cart.periodic_adjust(p);
            if my_local.contains(q) {
                send.entry(rank).or_default().push(indexer.index_of(q));
            }
        }
    }

    let mut ranks: Vec<usize> = recv.keys().chain(send.keys()).copied().collect();
    ranks.sort_unstable();
    ranks.dedup();
    let links = ranks
        .into_iter()
        .map(|rank| {
            let (recv_idx, recv_wraps) = recv.remove(&rank).unwrap_or_default();
            HaloLink {
                rank,
                send_idx: send.remove(&rank).unwrap_or_default(),
                recv_idx,
                recv_wraps,
            }
        })
        .collect();
    (links, self_link)
}

impl Partition {
    /// Collective over the grid's member subset: gathers every member's
    /// local range and derives the halo links.
    pub fn assemble<C: Communicator>(
        cart: Cart,
        local_range: Range,
        subset: &SubsetComm<'_, C>,
    ) -> Self {
        let records = subset.all_gather(bytemuck::cast_slice(&[WireRange::from(&local_range)]));
        let decomp: Vec<(usize, Range)> = records
            .iter()
            .enumerate()
            .map(|(i, bytes)| {
                let wire: WireRange = bytemuck::pod_read_unaligned(bytes);
                (subset.world_rank(i), wire.into())
            })
            .collect();
        Self::from_decomp(cart, local_range, subset.parent().rank(), decomp)
    }

    /// Build from an already-known decomposition table.
    pub fn from_decomp(
        cart: Cart,
        local_range: Range,
        my_rank: usize,
        decomp: Vec<(usize, Range)>,
    ) -> Self {
        let extended_range = extended_range_of(&cart, &local_range);
        let entries: Vec<(usize, Range, Range)> = decomp
            .iter()
            .map(|&(rank, local)| (rank, local, extended_range_of(&cart, &local)))
            .collect();
        let (links, self_link) = compute_links(&cart, my_rank, &entries);
        let cell_local_range = cell_local_range_of(&cart, &local_range);
        Self {
            cart,
            my_rank,
            local_range,
            extended_range,
            cell_local_range,
            cell_extended_range: cell_extended_range_of(&cart, &extended_range),
            cell_cover_range: cell_cover_range_of(&cart, &cell_local_range),
            decomp,
            links,
            self_link,
        }
    }

    /// The cell-space companion partition: exchanges fields shaped by the
    /// cell extended range (cell ownership follows the cell local range).
    pub fn cell_space(&self) -> Partition {
        let point_cart = self.cart;
        let cell_cart = Cart::new(
            point_cart.dim(),
            cell_global_range_of(&point_cart),
            core::array::from_fn(|d| d < point_cart.dim() && point_cart.periodic(d)),
        );
        let entries: Vec<(usize, Range, Range)> = self
            .decomp
            .iter()
            .map(|&(rank, point_local)| {
                let point_ext = extended_range_of(&point_cart, &point_local);
                (
                    rank,
                    cell_local_range_of(&point_cart, &point_local),
                    cell_extended_range_of(&point_cart, &point_ext),
                )
            })
            .collect();
        let (links, self_link) = compute_links(&cell_cart, self.my_rank, &entries);
        let decomp = entries.iter().map(|&(rank, local, _)| (rank, local)).collect();
        Self {
            cart: cell_cart,
            my_rank: self.my_rank,
            local_range: self.cell_local_range,
            extended_range: self.cell_extended_range,
            cell_local_range: self.cell_local_range,
            cell_extended_range: self.cell_extended_range,
            cell_cover_range: self.cell_cover_range,
            decomp,
            links,
            self_link,
        }
    }

    #[inline]
    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    #[inline]
    pub fn local_range(&self) -> &Range {
        &self.local_range
    }

    #[inline]
    pub fn extended_range(&self) -> &Range {
        &self.extended_range
    }

    #[inline]
    pub fn cell_local_range(&self) -> &Range {
        &self.cell_local_range
    }

    #[inline]
    pub fn cell_extended_range(&self) -> &Range {
        &self.cell_extended_range
    }

    #[inline]
    pub fn cell_cover_range(&self) -> &Range {
        &self.cell_cover_range
    }

    /// `(rank, local range)` for every member, in member order.
    #[inline]
    pub fn decomp(&self) -> &[(usize, Range)] {
        &self.decomp
    }

    /// Ranks this partition exchanges halo data with.
    pub fn neighbor_ranks(&self) -> impl Iterator<Item = usize> + '_ {
        self.links.iter().map(|l| l.rank)
    }

    /// Refresh the halo layer of `field` (extended-range shaped) from the
    /// owning ranks. Collective over the grid members.
    pub fn exchange<T: Pod, C: Communicator>(&self, comm: &C, tag: u16, field: &mut Field<T>) {
        debug_assert_eq!(field.range(), &self.extended_range);
        let mut recvs = Vec::with_capacity(self.links.len());
        for link in &self.links {
            if !link.recv_idx.is_empty() {
                recvs.push((
                    link,
                    comm.irecv(link.rank, tag, link.recv_idx.len() * std::mem::size_of::<T>()),
                ));
            }
        }
        let mut sends = Vec::with_capacity(self.links.len());
        for link in &self.links {
            if !link.send_idx.is_empty() {
                let packed: Vec<T> = link.send_idx.iter().map(|&i| field[i]).collect();
                sends.push(comm.isend(link.rank, tag, bytemuck::cast_slice(&packed)));
            }
        }
        if let Some(link) = &self.self_link {
            for (&src, &dst) in link.send_idx.iter().zip(&link.recv_idx) {
                field[dst] = field[src];
            }
        }
        for (link, h) in recvs {
            let bytes = h.wait().expect("halo exchange receive failed");
            let values: Vec<T> = bytemuck::pod_collect_to_vec(&bytes);
            for (&dst, &v) in link.recv_idx.iter().zip(&values) {
                field[dst] = v;
            }
        }
        for s in sends {
            let _ = s.wait();
        }
    }

    /// Halo exchange for boolean masks (staged through bytes).
    pub fn exchange_bool<C: Communicator>(&self, comm: &C, tag: u16, field: &mut Field<bool>) {
        let mut staged = Field::from_values(
            *field.range(),
            field.values().iter().map(|&b| b as u8).collect(),
        );
        self.exchange(comm, tag, &mut staged);
        for (dst, &src) in field.values_mut().iter_mut().zip(staged.values()) {
            *dst = src != 0;
        }
    }

    /// Halo exchange for the three coordinate fields, offsetting wrapped
    /// halo points by the periodic length.
    pub fn exchange_coords<C: Communicator>(
        &self,
        comm: &C,
        tag: u16,
        coords: &mut [Field<f64>; MAX_DIMS],
        periodic_length: RealTuple,
    ) {
        let n = |link: &HaloLink| link.recv_idx.len() * MAX_DIMS * std::mem::size_of::<f64>();
        let mut recvs = Vec::with_capacity(self.links.len());
        for link in &self.links {
            if !link.recv_idx.is_empty() {
                recvs.push((link, comm.irecv(link.rank, tag, n(link))));
            }
        }
        let mut sends = Vec::with_capacity(self.links.len());
        for link in &self.links {
            if !link.send_idx.is_empty() {
                let mut packed = Vec::with_capacity(link.send_idx.len() * MAX_DIMS);
                for d in 0..MAX_DIMS {
                    packed.extend(link.send_idx.iter().map(|&i| coords[d][i]));
                }
                sends.push(comm.isend(link.rank, tag, bytemuck::cast_slice(&packed)));
            }
        }
        let apply = |coords: &mut [Field<f64>; MAX_DIMS],
                     link: &HaloLink,
                     values: &dyn Fn(usize, usize) -> f64| {
            for (j, (&dst, wraps)) in link.recv_idx.iter().zip(&link.recv_wraps).enumerate() {
                for d in 0..MAX_DIMS {
                    coords[d][dst] = values(d, j) - wraps[d] as f64 * periodic_length[d];
                }
            }
        };
        if let Some(link) = &self.self_link {
            let snapshot: Vec<f64> = (0..MAX_DIMS)
                .flat_map(|d| link.send_idx.iter().map(move |&i| (d, i)))
                .map(|(d, i)| coords[d][i])
                .collect();
            let count = link.send_idx.len();
            apply(coords, link, &|d, j| snapshot[d * count + j]);
        }
        for (link, h) in recvs {
            let bytes = h.wait().expect("coordinate halo exchange failed");
            let values: Vec<f64> = bytemuck::pod_collect_to_vec(&bytes);
            let count = link.recv_idx.len();
            apply(coords, link, &|d, j| values[d * count + j]);
        }
        for s in sends {
            let _ = s.wait();
        }
    }
}

/// Fixed-size wire record for a [`Range`].
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct WireRange {
    pub begin: [i64; MAX_DIMS],
    pub end: [i64; MAX_DIMS],
}

impl From<&Range> for WireRange {
    fn from(r: &Range) -> Self {
        Self {
            begin: r.begin(),
            end: r.end(),
        }
    }
}

impl From<WireRange> for Range {
    fn from(w: WireRange) -> Self {
        Range::new(w.begin, w.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart_1d(n: i64, periodic: bool) -> Cart {
        Cart::new(1, Range::from_extents(1, &[0], &[n]), [periodic, false, false])
    }

    #[test]
    fn ranges_non_periodic_interior_rank() {
        let cart = cart_1d(16, false);
        let local = Range::from_extents(1, &[4], &[8]);
        let p = Partition::from_decomp(
            cart,
            local,
            1,
            vec![
                (0, Range::from_extents(1, &[0], &[4])),
                (1, local),
                (2, Range::from_extents(1, &[8], &[16])),
            ],
        );
        assert_eq!(*p.extended_range(), Range::from_extents(1, &[3], &[9]));
        assert_eq!(*p.cell_local_range(), Range::from_extents(1, &[4], &[8]));
        assert_eq!(*p.cell_cover_range(), Range::from_extents(1, &[3], &[8]));
        let neighbors: Vec<_> = p.neighbor_ranks().collect();
        assert_eq!(neighbors, vec![0, 2]);
    }

    #[test]
    fn periodic_single_rank_wraps_onto_itself() {
        let cart = cart_1d(16, true);
        let local = Range::from_extents(1, &[0], &[16]);
        let p = Partition::from_decomp(cart, local, 0, vec![(0, local)]);
        assert_eq!(*p.extended_range(), Range::from_extents(1, &[-1], &[17]));
        assert_eq!(*p.cell_local_range(), Range::from_extents(1, &[0], &[16]));
        assert_eq!(*p.cell_cover_range(), Range::from_extents(1, &[0], &[16]));
        assert!(p.self_link.is_some());
        assert_eq!(p.links.len(), 0);
    }

    #[test]
    fn collective_assembly_matches_from_decomp() {
        use crate::comm::LocalUniverse;
        let cart = cart_1d(16, false);
        let locals = [
            Range::from_extents(1, &[0], &[8]),
            Range::from_extents(1, &[8], &[16]),
        ];
        let handles: Vec<_> = LocalUniverse::comms(2)
            .into_iter()
            .enumerate()
            .map(|(rank, comm)| {
                let local = locals[rank];
                std::thread::spawn(move || {
                    let members = [0usize, 1];
                    let subset = SubsetComm::new(&comm, &members).unwrap();
                    let p = Partition::assemble(cart, local, &subset);
                    (*p.extended_range(), p.neighbor_ranks().collect::<Vec<_>>())
                })
            })
            .collect();
        let got: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(got[0].0, Range::from_extents(1, &[0], &[9]));
        assert_eq!(got[0].1, vec![1]);
        assert_eq!(got[1].0, Range::from_extents(1, &[7], &[16]));
        assert_eq!(got[1].1, vec![0]);
    }

    #[test]
    fn periodic_self_exchange_offsets_coordinates() {
        let cart = cart_1d(16, true);
        let local = Range::from_extents(1, &[0], &[16]);
        let p = Partition::from_decomp(cart, local, 0, vec![(0, local)]);
        let ext = *p.extended_range();
        let mut coords = [
            Field::new(ext, 0.0),
            Field::new(ext, 0.0),
            Field::new(ext, 0.0),
        ];
        for q in p.local_range().iter() {
            coords[0][q] = q[0] as f64;
        }
        let comm = crate::comm::NoComm;
        p.exchange_coords(&comm, crate::comm::TAG_HALO, &mut coords, [16.0, 0.0, 0.0]);
        assert_eq!(coords[0][[-1, 0, 0]], -1.0);
        assert_eq!(coords[0][[16, 0, 0]], 16.0);
    }
}
