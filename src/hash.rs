//! Distributed bounding-box hash: a uniform bin grid over the
//! communicator-wide union of per-rank region bounds.
//!
//! Bins are owned by `bin_index % comm_size`. Construction scatters each
//! region to the homes of every bin its box intersects; retrieval pulls
//! bin contents point-to-point. Both directions discover their peers with
//! the dynamic handshake and then run a count message followed by the
//! payload, so nothing blocks on unknown sizes.

use crate::comm::handshake::dynamic_handshake;
use crate::comm::{Communicator, Wait, TAG_HASH_COUNT, TAG_HASH_DATA};
use crate::core::{BBox, IntTuple, Range, RangeIndexer, RealTuple, MAX_DIMS};
use crate::grid::GridId;
use std::collections::{BTreeMap, BTreeSet};

/// One tagged axis-aligned box owned by some rank.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub rank: usize,
    pub grid_id: GridId,
    pub bounds: BBox,
}

/// Contents of one bin: every region whose bounds intersect it.
#[derive(Clone, Debug, Default)]
pub struct Bin {
    pub regions: Vec<Region>,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct WireRegion {
    min: [f64; MAX_DIMS],
    max: [f64; MAX_DIMS],
    bin: i64,
    rank: i32,
    grid_id: i32,
}

impl WireRegion {
    fn pack(bin: i64, region: &Region) -> Self {
        Self {
            min: region.bounds.min(),
            max: region.bounds.max(),
            bin,
            rank: region.rank as i32,
            grid_id: region.grid_id,
        }
    }

    fn unpack(&self) -> (i64, Region) {
        (
            self.bin,
            Region {
                rank: self.rank as usize,
                grid_id: self.grid_id,
                bounds: BBox::new(self.min, self.max),
            },
        )
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct WireSummary {
    min: [f64; MAX_DIMS],
    max: [f64; MAX_DIMS],
    count: u64,
}

/// Distributed spatial index over per-rank grid bounds.
#[derive(Clone, Debug)]
pub struct BoundingBoxHash {
    dim: usize,
    comm_size: usize,
    union: BBox,
    bin_range: Range,
    bin_size: RealTuple,
    bin_indexer: RangeIndexer,
    /// Bins homed on this rank.
    local_bins: BTreeMap<i64, Bin>,
}

impl BoundingBoxHash {
    /// Collective over `comm`: every rank contributes its tagged local
    /// bounds; bin homes ingest the regions overlapping their bins.
    pub fn assemble<C: Communicator>(dim: usize, comm: &C, regions: &[(GridId, BBox)]) -> Self {
        let me = comm.rank();
        let size = comm.size();

        // Union box and global region count.
        let mut local_union = BBox::empty(dim);
        for (_, b) in regions {
            local_union = local_union.union(b);
        }
        let summary = WireSummary {
            min: local_union.min(),
            max: local_union.max(),
            count: regions.len() as u64,
        };
        let gathered = comm.all_gather(bytemuck::bytes_of(&summary));
        let mut union = BBox::empty(dim);
        let mut total: u64 = 0;
        for bytes in &gathered {
            let s: WireSummary = bytemuck::pod_read_unaligned(bytes);
            union = union.union(&BBox::new(s.min, s.max));
            total += s.count;
        }

        let (bin_range, bin_size) = Self::choose_bins(dim, &union, total);
        let bin_indexer = RangeIndexer::new(bin_range);
        let hash = Self {
            dim,
            comm_size: size,
            union,
            bin_range,
            bin_size,
            bin_indexer,
            local_bins: BTreeMap::new(),
        };

        // Scatter each region to the homes of the bins it intersects.
        let mut batches: BTreeMap<usize, Vec<WireRegion>> = BTreeMap::new();
        let mut local_ingest: Vec<(i64, Region)> = Vec::new();
        for (grid_id, bounds) in regions {
            if bounds.is_empty() {
                continue;
            }
            let region = Region {
                rank: me,
                grid_id: *grid_id,
                bounds: *bounds,
            };
            let lo = hash.bin_tuple_of(bounds.min());
            let hi = hash.bin_tuple_of(bounds.max());
            let mut upper = hi;
            for d in 0..MAX_DIMS {
                upper[d] += 1;
            }
            for bin_tuple in Range::new(lo, upper).iter() {
                let bin = hash.bin_indexer.index_of(bin_tuple) as i64;
                let home = hash.bin_home(bin);
                if home == me {
                    local_ingest.push((bin, region.clone()));
                } else {
                    batches.entry(home).or_default().push(WireRegion::pack(bin, &region));
                }
            }
        }

        let peers: Vec<usize> = batches.keys().copied().collect();
        let senders = dynamic_handshake(comm, &peers);

        let mut count_recvs = Vec::with_capacity(senders.len());
        for &src in &senders {
            count_recvs.push((src, comm.irecv(src, TAG_HASH_COUNT, 8)));
        }
        let mut sends = Vec::new();
        for (&home, batch) in &batches {
            sends.push(comm.isend(home, TAG_HASH_COUNT, &(batch.len() as u64).to_le_bytes()));
            sends.push(comm.isend(home, TAG_HASH_DATA, bytemuck::cast_slice(batch)));
        }

        let mut hash = hash;
        for (bin, region) in local_ingest {
            hash.local_bins.entry(bin).or_default().regions.push(region);
        }
        for (src, h) in count_recvs {
            let raw = h.wait().expect("hash count phase failed");
            let count = u64::from_le_bytes(raw.try_into().expect("count record")) as usize;
            let bytes = comm
                .irecv(src, TAG_HASH_DATA, count * std::mem::size_of::<WireRegion>())
                .wait()
                .expect("hash payload phase failed");
            for w in bytemuck::pod_collect_to_vec::<u8, WireRegion>(&bytes) {
                let (bin, region) = w.unpack();
                hash.local_bins.entry(bin).or_default().regions.push(region);
            }
        }
        for s in sends {
            let _ = s.wait();
        }
        // Deterministic bin contents regardless of arrival order.
        for bin in hash.local_bins.values_mut() {
            bin.regions.sort_by_key(|r| (r.rank, r.grid_id));
        }
        comm.barrier();
        hash
    }

    /// Per-axis bin counts: approximately the d-th root of the region
    /// count, scaled to the union box aspect ratio.
    fn choose_bins(dim: usize, union: &BBox, total: u64) -> (Range, RealTuple) {
        let target = (total.max(1) as f64).min((1u64 << 20) as f64);
        let mut lengths = [1.0f64; MAX_DIMS];
        let mut product = 1.0;
        for d in 0..dim {
            lengths[d] = union.length(d).max(f64::MIN_POSITIVE);
            product *= lengths[d];
        }
        let geometric_mean = product.powf(1.0 / dim as f64);
        let per_axis = target.powf(1.0 / dim as f64);
        let mut counts = [1i64; MAX_DIMS];
        for d in 0..dim {
            counts[d] = ((per_axis * lengths[d] / geometric_mean).round() as i64).max(1);
        }
        let range = Range::new([0; MAX_DIMS], [counts[0], counts[1], counts[2]]);
        let mut bin_size = [0.0; MAX_DIMS];
        for d in 0..dim {
            bin_size[d] = union.length(d) / counts[d] as f64;
        }
        (range, bin_size)
    }

    fn bin_tuple_of(&self, x: RealTuple) -> IntTuple {
        let mut t = [0i64; MAX_DIMS];
        for d in 0..self.dim {
            let raw = if self.bin_size[d] > 0.0 {
                ((x[d] - self.union.min()[d]) / self.bin_size[d]).floor() as i64
            } else {
                0
            };
            t[d] = raw.clamp(0, self.bin_range.end()[d] - 1);
        }
        t
    }

    /// Pure local bin lookup; coordinates clamp to the union box.
    pub fn map_point_to_bin(&self, x: RealTuple) -> i64 {
        self.bin_indexer.index_of(self.bin_tuple_of(x)) as i64
    }

    /// Home rank of a bin.
    #[inline]
    pub fn bin_home(&self, bin: i64) -> usize {
        (bin as usize) % self.comm_size
    }

    /// Spatial extent of a bin.
    pub fn bin_bounds(&self, bin: i64) -> BBox {
        let t = self.bin_indexer.tuple_of(bin as usize);
        let mut min = [0.0; MAX_DIMS];
        let mut max = [0.0; MAX_DIMS];
        for d in 0..self.dim {
            min[d] = self.union.min()[d] + t[d] as f64 * self.bin_size[d];
            max[d] = min[d] + self.bin_size[d];
        }
        BBox::new(min, max)
    }

    #[inline]
    pub fn bin_range(&self) -> &Range {
        &self.bin_range
    }

    /// Bins homed on this rank (ingested at construction).
    #[inline]
    pub fn local_bins(&self) -> &BTreeMap<i64, Bin> {
        &self.local_bins
    }

    /// Pull the contents of `bins` from their home ranks. Collective over
    /// `comm` (ranks requesting nothing still participate). Empty bins
    /// yield empty contents.
    pub fn retrieve_bins<C: Communicator>(
        &self,
        comm: &C,
        bins: &BTreeSet<i64>,
    ) -> BTreeMap<i64, Bin> {
        let me = comm.rank();
        let mut out = BTreeMap::new();

        let mut requests: BTreeMap<usize, Vec<i64>> = BTreeMap::new();
        for &bin in bins {
            let home = self.bin_home(bin);
            if home == me {
                out.insert(bin, self.local_bins.get(&bin).cloned().unwrap_or_default());
            } else {
                requests.entry(home).or_default().push(bin);
            }
        }

        let homes: Vec<usize> = requests.keys().copied().collect();
        let requesters = dynamic_handshake(comm, &homes);

        // Send our request lists (count, then indices).
        let mut sends = Vec::new();
        for (&home, list) in &requests {
            sends.push(comm.isend(home, TAG_HASH_COUNT, &(list.len() as u64).to_le_bytes()));
            sends.push(comm.isend(home, TAG_HASH_DATA, bytemuck::cast_slice(list)));
        }

        // Serve incoming requests: per requested bin, a count header then
        // the concatenated regions.
        for &peer in &requesters {
            let raw = comm
                .irecv(peer, TAG_HASH_COUNT, 8)
                .wait()
                .expect("bin request count failed");
            let n = u64::from_le_bytes(raw.try_into().expect("count record")) as usize;
            let bytes = comm
                .irecv(peer, TAG_HASH_DATA, n * 8)
                .wait()
                .expect("bin request list failed");
            let wanted: Vec<i64> = bytemuck::pod_collect_to_vec(&bytes);
            let mut header: Vec<u64> = Vec::with_capacity(n);
            let mut payload: Vec<WireRegion> = Vec::new();
            for bin in wanted {
                match self.local_bins.get(&bin) {
                    Some(contents) => {
                        header.push(contents.regions.len() as u64);
                        payload.extend(contents.regions.iter().map(|r| WireRegion::pack(bin, r)));
                    }
                    None => header.push(0),
                }
            }
            sends.push(comm.isend(peer, TAG_HASH_COUNT, bytemuck::cast_slice(&header)));
            sends.push(comm.isend(peer, TAG_HASH_DATA, bytemuck::cast_slice(&payload)));
        }

        // Collect replies.
        for (&home, list) in &requests {
            let raw = comm
                .irecv(home, TAG_HASH_COUNT, list.len() * 8)
                .wait()
                .expect("bin reply header failed");
            let header: Vec<u64> = bytemuck::pod_collect_to_vec(&raw);
            let total: usize = header.iter().map(|&c| c as usize).sum();
            let bytes = comm
                .irecv(home, TAG_HASH_DATA, total * std::mem::size_of::<WireRegion>())
                .wait()
                .expect("bin reply payload failed");
            let regions: Vec<WireRegion> = bytemuck::pod_collect_to_vec(&bytes);
            let mut cursor = 0usize;
            for (&bin, &count) in list.iter().zip(&header) {
                let mut contents = Bin::default();
                for w in &regions[cursor..cursor + count as usize] {
                    contents.regions.push(w.unpack().1);
                }
                cursor += count as usize;
                out.insert(bin, contents);
            }
        }
        for s in sends {
            let _ = s.wait();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;

    #[test]
    fn regions_land_in_every_intersecting_bin() {
        let comm = NoComm;
        let regions = vec![
            (1, BBox::new([0., 0., 0.], [4., 4., 0.])),
            (2, BBox::new([3., 3., 0.], [8., 8., 0.])),
        ];
        let hash = BoundingBoxHash::assemble(2, &comm, &regions);
        // Every bin that intersects a region's box must list it.
        for (&bin, contents) in hash.local_bins() {
            for r in &contents.regions {
                assert!(hash
                    .bins_of(&r.bounds)
                    .any(|b| b == bin));
            }
        }
        // And the bin containing a point inside region 1 must know it.
        let bin = hash.map_point_to_bin([1.0, 1.0, 0.0]);
        let contents = &hash.local_bins()[&bin];
        assert!(contents.regions.iter().any(|r| r.grid_id == 1));
    }

    #[test]
    fn map_point_clamps_outside_points() {
        let comm = NoComm;
        let regions = vec![(1, BBox::new([0., 0., 0.], [4., 4., 0.]))];
        let hash = BoundingBoxHash::assemble(2, &comm, &regions);
        let inside = hash.map_point_to_bin([2.0, 2.0, 0.0]);
        assert!(inside >= 0);
        let clamped = hash.map_point_to_bin([100.0, -5.0, 0.0]);
        assert!(hash.bin_range().contains(hash.bin_indexer.tuple_of(clamped as usize)));
    }

    impl BoundingBoxHash {
        /// Test helper: bin indices intersecting a box.
        fn bins_of<'a>(&'a self, b: &BBox) -> impl Iterator<Item = i64> + 'a {
            let lo = self.bin_tuple_of(b.min());
            let mut hi = self.bin_tuple_of(b.max());
            for d in 0..MAX_DIMS {
                hi[d] += 1;
            }
            Range::new(lo, hi)
                .iter()
                .map(move |t| self.bin_indexer.index_of(t) as i64)
        }
    }
}
