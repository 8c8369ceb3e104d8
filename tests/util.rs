#![allow(dead_code)]
use overgrid::prelude::*;
use std::sync::Arc;

/// Run one closure per rank, each on its own thread over a shared mailbox
/// universe, and collect the per-rank results in rank order.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(LocalComm) -> T + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = LocalUniverse::comms(size)
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            std::thread::spawn(move || f(comm))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank thread panicked"))
        .collect()
}

/// Domain with one fully-owned 2D grid per rank: grid id `rank + 1`,
/// `size × size` points, x coordinates offset by `x_offset[rank]`.
pub fn seam_domain(
    comm: LocalComm,
    size: i64,
    x_offsets: &[f64],
) -> Domain<LocalComm> {
    let rank = comm.rank();
    let num_grids = x_offsets.len();
    let context = Context::create(&comm, LogFlags::ALL).unwrap();
    let mut domain = Domain::create(context, 2, Arc::new(comm)).unwrap();
    let extent = Range::from_extents(2, &[0, 0], &[size, size]);
    let entries: Vec<(GridId, Option<GridParams>)> = (0..num_grids)
        .map(|g| {
            let id = g as GridId + 1;
            let params = (g == rank)
                .then(|| GridParams::new(format!("grid-{id}"), extent, extent));
            (id, params)
        })
        .collect();
    domain.create_grids(&entries).unwrap();
    let my_grid = rank as GridId + 1;
    domain
        .create_geometry(my_grid, GeometryParams::uniform())
        .unwrap();
    domain.create_state(my_grid).unwrap();
    {
        let mut coords = domain.edit_geometry_coords(my_grid).unwrap();
        let offset = x_offsets[rank];
        let ext = *coords[0].range();
        for p in ext.iter() {
            coords.coords_mut()[0][p] = p[0] as f64 + offset;
        }
    }
    domain
}
