//! Bounding-box hash coverage: every bin lists the regions overlapping it,
//! and remote retrieval returns the same contents the home rank stores.

mod util;

use overgrid::hash::BoundingBoxHash;
use overgrid::prelude::*;
use proptest::prelude::*;
use std::collections::{BTreeSet, BTreeMap};

proptest! {
    #[test]
    fn bins_list_exactly_the_overlapping_regions(
        boxes in prop::collection::vec(
            (0.0..100.0f64, 0.1..40.0f64, 0.0..100.0f64, 0.1..40.0f64),
            1..16,
        )
    ) {
        let regions: Vec<(GridId, BBox)> = boxes
            .iter()
            .enumerate()
            .map(|(i, &(x, w, y, h))| {
                (i as GridId + 1, BBox::new([x, y, 0.], [x + w, y + h, 0.]))
            })
            .collect();
        let comm = NoComm;
        let hash = BoundingBoxHash::assemble(2, &comm, &regions);

        // Strict (positive-measure) overlap per axis.
        let strictly_overlaps = |a: &BBox, b: &BBox| {
            (0..2).all(|d| a.min()[d] < b.max()[d] && b.min()[d] < a.max()[d])
        };
        for bin in 0..hash.bin_range().count() as i64 {
            let bounds = hash.bin_bounds(bin);
            let got: BTreeSet<GridId> = hash
                .local_bins()
                .get(&bin)
                .map(|b| b.regions.iter().map(|r| r.grid_id).collect())
                .unwrap_or_default();
            // Strictly overlapping regions must be listed.
            for (id, b) in &regions {
                if strictly_overlaps(b, &bounds) {
                    prop_assert!(got.contains(id), "bin {bin} missing region {id}");
                }
            }
            // Nothing disjoint from the bin may be listed.
            for id in &got {
                let b = &regions[(*id - 1) as usize].1;
                prop_assert!(b.intersects(&bounds), "bin {bin} lists distant region {id}");
            }
        }

        // Each region appears at most once per bin.
        for (bin, contents) in hash.local_bins() {
            let mut seen = BTreeSet::new();
            for r in &contents.regions {
                prop_assert!(seen.insert(r.grid_id), "bin {bin} lists a region twice");
            }
        }
    }
}

#[test]
fn point_lookup_hits_a_bin_listing_the_containing_region() {
    let comm = NoComm;
    let regions = vec![
        (1, BBox::new([0., 0., 0.], [10., 10., 0.])),
        (2, BBox::new([20., 20., 0.], [30., 30., 0.])),
    ];
    let hash = BoundingBoxHash::assemble(2, &comm, &regions);
    let bin = hash.map_point_to_bin([25.0, 25.0, 0.0]);
    let ids: Vec<GridId> = hash.local_bins()[&bin]
        .regions
        .iter()
        .map(|r| r.grid_id)
        .collect();
    assert!(ids.contains(&2));
    assert!(!ids.contains(&1));
}

#[test]
fn retrieval_pulls_remote_bins_by_value() {
    let results = util::run_ranks(2, |comm| {
        let rank = comm.rank();
        // Disjoint boxes, one per rank.
        let my_box = if rank == 0 {
            BBox::new([0., 0., 0.], [10., 10., 0.])
        } else {
            BBox::new([90., 90., 0.], [100., 100., 0.])
        };
        let hash = BoundingBoxHash::assemble(2, &comm, &[(rank as GridId + 1, my_box)]);
        // Every rank asks for the bin containing the *other* rank's box.
        let other_center = if rank == 0 { [95.0, 95.0, 0.0] } else { [5.0, 5.0, 0.0] };
        let wanted: BTreeSet<i64> = [hash.map_point_to_bin(other_center)].into_iter().collect();
        let bins: BTreeMap<i64, _> = hash.retrieve_bins(&comm, &wanted);
        let bin = &bins[wanted.iter().next().unwrap()];
        bin.regions
            .iter()
            .map(|r| (r.rank, r.grid_id))
            .collect::<Vec<_>>()
    });
    assert!(results[0].contains(&(1, 2)));
    assert!(results[1].contains(&(0, 1)));
}
