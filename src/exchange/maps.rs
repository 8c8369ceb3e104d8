//! Precomputed per-peer orderings of donor and receiver rows.
//!
//! Both sides of a pair sort by the receiver point's global row-major
//! index on the n grid: the send map packs donors by (destination rank,
//! destination index), the receive map scatters by (source rank, receiver
//! index). Matching is therefore stable across any number of exchanges.

use crate::core::{IntTuple, RangeIndexer};

/// Per-peer packing order for donor rows.
#[derive(Clone, Debug, Default)]
pub struct SendMap {
    /// `(peer rank, row count)` in ascending peer order.
    sends: Vec<(usize, usize)>,
    /// Donor row indices, concatenated peer by peer, ordered within each
    /// peer by destination global index.
    order: Vec<usize>,
}

impl SendMap {
    pub fn build(
        destinations: &[IntTuple],
        destination_ranks: &[i32],
        n_global_indexer: &RangeIndexer,
    ) -> Self {
        debug_assert_eq!(destinations.len(), destination_ranks.len());
        let mut rows: Vec<usize> = (0..destinations.len())
            .filter(|&i| destination_ranks[i] >= 0)
            .collect();
        rows.sort_by_key(|&i| {
            (
                destination_ranks[i],
                n_global_indexer.index_of(destinations[i]),
            )
        });
        let mut sends: Vec<(usize, usize)> = Vec::new();
        for &i in &rows {
            let rank = destination_ranks[i] as usize;
            match sends.last_mut() {
                Some((r, count)) if *r == rank => *count += 1,
                _ => sends.push((rank, 1)),
            }
        }
        Self { sends, order: rows }
    }

    #[inline]
    pub fn sends(&self) -> &[(usize, usize)] {
        &self.sends
    }

    #[inline]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Total rows with a valid destination.
    #[inline]
    pub fn count(&self) -> usize {
        self.order.len()
    }
}

/// Per-peer scatter order for receiver rows.
#[derive(Clone, Debug, Default)]
pub struct RecvMap {
    recvs: Vec<(usize, usize)>,
    order: Vec<usize>,
}

impl RecvMap {
    pub fn build(
        points: &[IntTuple],
        source_ranks: &[i32],
        n_global_indexer: &RangeIndexer,
    ) -> Self {
        debug_assert_eq!(points.len(), source_ranks.len());
        let mut rows: Vec<usize> = (0..points.len())
            .filter(|&i| source_ranks[i] >= 0)
            .collect();
        rows.sort_by_key(|&i| (source_ranks[i], n_global_indexer.index_of(points[i])));
        let mut recvs: Vec<(usize, usize)> = Vec::new();
        for &i in &rows {
            let rank = source_ranks[i] as usize;
            match recvs.last_mut() {
                Some((r, count)) if *r == rank => *count += 1,
                _ => recvs.push((rank, 1)),
            }
        }
        Self { recvs, order: rows }
    }

    #[inline]
    pub fn recvs(&self) -> &[(usize, usize)] {
        &self.recvs
    }

    #[inline]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Range;

    #[test]
    fn send_map_orders_by_rank_then_destination() {
        let indexer = RangeIndexer::new(Range::from_extents(2, &[0, 0], &[4, 4]));
        let destinations = vec![[2, 0, 0], [0, 1, 0], [0, 0, 0], [3, 3, 0]];
        let ranks = vec![1, 0, 1, -1];
        let map = SendMap::build(&destinations, &ranks, &indexer);
        assert_eq!(map.sends(), &[(0, 1), (1, 2)]);
        // Rank 0 gets row 1; rank 1 gets rows 2 then 0 (global order).
        assert_eq!(map.order(), &[1, 2, 0]);
        assert_eq!(map.count(), 3);
    }

    #[test]
    fn recv_map_mirrors_send_ordering() {
        let indexer = RangeIndexer::new(Range::from_extents(1, &[0], &[8]));
        let points = vec![[5, 0, 0], [1, 0, 0], [3, 0, 0]];
        let sources = vec![2, 2, 0];
        let map = RecvMap::build(&points, &sources, &indexer);
        assert_eq!(map.recvs(), &[(0, 1), (2, 2)]);
        assert_eq!(map.order(), &[2, 1, 0]);
    }
}
