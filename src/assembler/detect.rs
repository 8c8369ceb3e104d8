//! Overlap detection: distributed bounding-box hash, candidate filtering,
//! donor partition metadata exchange, brute-force point-in-cell search,
//! and emission of the aligned overlap tables.

use super::masks::cell_corners;
use super::{AssemblerOptions, AssemblyData};
use crate::comm::handshake::dynamic_handshake;
use crate::comm::{Communicator, Wait, TAG_HALO, TAG_PAIR_COUNT, TAG_PAIR_DATA};
use crate::core::{BBox, Field, Range, RangeIndexer, RealTuple, MAX_DIMS};
use crate::domain::Domain;
use crate::error::OvergridError;
use crate::geometry::ops::{coords_in_cell, overlaps_cell};
use crate::geometry::GeometryType;
use crate::grid::GridId;
use crate::hash::BoundingBoxHash;
use crate::overlap::{OverlapM, OverlapN};
use crate::partition::WireRange;
use std::collections::{BTreeMap, BTreeSet};

const NO_CELL: i64 = i64::MIN;

/// Donor partition metadata held on the receiver side.
struct PartitionMeta {
    cell_local: Range,
    geometry_type: GeometryType,
    coords: [Field<f64>; MAX_DIMS],
    cell_active: Field<bool>,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct WirePartitionMeta {
    extended: WireRange,
    cell_local: WireRange,
    cell_extended: WireRange,
    geometry_type: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct WireOverlapRow {
    cell: [i64; MAX_DIMS],
    destination: [i64; MAX_DIMS],
    coords: [f64; MAX_DIMS],
}

pub(crate) fn detect_overlap<C: Communicator>(
    domain: &mut Domain<C>,
    options: &AssemblerOptions,
    data: &mut AssemblyData,
) -> Result<(), OvergridError> {
    let comm = domain.comm_arc();
    let me = comm.rank();
    let is_root = me == 0;
    comm.barrier();
    domain
        .logger()
        .debug(is_root, "Detecting overlap between grids...");

    let dim = domain.dim();
    let local_grids = domain.local_grid_ids();

    // Per-rank bounds over cell-active cells of the cell cover range.
    let mut regions: Vec<(GridId, BBox)> = Vec::new();
    for &g in &local_grids {
        let grid = domain.grid(g)?;
        let aux = &data.grid_aux[&g];
        let coords = domain.geometry(g)?.coords();
        let mut bounds = BBox::empty(dim);
        for cell in grid.cell_cover_range().iter() {
            if !aux.cell_active[cell] {
                continue;
            }
            for v in cell_corners(dim, cell) {
                bounds = bounds.extended([coords[0][v], coords[1][v], coords[2][v]]);
            }
        }
        regions.push((g, bounds));
    }
    let hash = BoundingBoxHash::assemble(dim, &*comm, &regions);
    domain
        .logger()
        .debug(is_root, "Done generating distributed bounding box hash.");

    // Bin index per active local point; retrieve the unique bins.
    let mut bin_fields: BTreeMap<GridId, Field<i64>> = BTreeMap::new();
    let mut unique_bins: BTreeSet<i64> = BTreeSet::new();
    for &g in &local_grids {
        let grid = domain.grid(g)?;
        let aux = &data.grid_aux[&g];
        let coords = domain.geometry(g)?.coords();
        let mut bins = Field::new(*grid.local_range(), -1i64);
        for p in grid.local_range().iter() {
            if !aux.active[p] {
                continue;
            }
            let bin = hash.map_point_to_bin([coords[0][p], coords[1][p], coords[2][p]]);
            bins[p] = bin;
            unique_bins.insert(bin);
        }
        bin_fields.insert(g, bins);
    }
    let bins = hash.retrieve_bins(&*comm, &unique_bins);
    domain
        .logger()
        .debug(is_root, "Done retrieving remote hash bins.");

    // Candidate donor partitions per local receiver grid.
    let mut candidates: BTreeMap<GridId, BTreeMap<GridId, BTreeSet<usize>>> = BTreeMap::new();
    for &n in &local_grids {
        let grid = domain.grid(n)?;
        let coords = domain.geometry(n)?.coords();
        let bin_field = &bin_fields[&n];
        let entry = candidates.entry(n).or_default();
        for p in grid.local_range().iter() {
            let bin = bin_field[p];
            if bin < 0 {
                continue;
            }
            let x = [coords[0][p], coords[1][p], coords[2][p]];
            for region in &bins[&bin].regions {
                if options.overlappable(region.grid_id, n) && region.bounds.contains(x) {
                    entry
                        .entry(region.grid_id)
                        .or_default()
                        .insert(region.rank);
                }
            }
        }
    }

    // Discover the symmetric rank links.
    let remote_m_ranks: Vec<usize> = candidates
        .values()
        .flat_map(|per_m| per_m.values())
        .flatten()
        .copied()
        .filter(|&r| r != me)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let remote_n_ranks = dynamic_handshake(&*comm, &remote_m_ranks);
    domain.logger().debug(
        is_root,
        "Done establishing communication between potentially-overlapping ranks.",
    );

    // Exchange (m, n) grid-id pairs over the discovered links.
    let mut pairs_to_rank: BTreeMap<usize, Vec<[i32; 2]>> = BTreeMap::new();
    for (&n, per_m) in &candidates {
        for (&m, ranks) in per_m {
            for &rank in ranks {
                if rank != me {
                    pairs_to_rank.entry(rank).or_default().push([m, n]);
                }
            }
        }
    }
    for list in pairs_to_rank.values_mut() {
        list.sort_unstable();
    }
    let mut count_recvs = Vec::new();
    for &rank in &remote_n_ranks {
        count_recvs.push((rank, comm.irecv(rank, TAG_PAIR_COUNT, 8)));
    }
    let mut sends = Vec::new();
    for &rank in &remote_m_ranks {
        let list = pairs_to_rank.get(&rank).map_or(&[][..], |v| &v[..]);
        sends.push(comm.isend(rank, TAG_PAIR_COUNT, &(list.len() as u64).to_le_bytes()));
        sends.push(comm.isend(rank, TAG_PAIR_DATA, bytemuck::cast_slice(list)));
    }
    // (m local) -> set of (n grid, n rank) links, local links included.
    let mut n_links: BTreeMap<GridId, BTreeSet<(GridId, usize)>> = BTreeMap::new();
    for &g in &local_grids {
        n_links.insert(g, BTreeSet::new());
    }
    for (&n, per_m) in &candidates {
        for (&m, ranks) in per_m {
            if ranks.contains(&me) {
                if let Some(links) = n_links.get_mut(&m) {
                    links.insert((n, me));
                }
            }
        }
    }
    for (rank, h) in count_recvs {
        let raw = h.wait().ok_or(OvergridError::CommError {
            neighbor: rank,
            detail: "pair count receive failed".into(),
        })?;
        let count = u64::from_le_bytes(raw.try_into().expect("count record")) as usize;
        let bytes = comm
            .irecv(rank, TAG_PAIR_DATA, count * 8)
            .wait()
            .ok_or(OvergridError::CommError {
                neighbor: rank,
                detail: "pair list receive failed".into(),
            })?;
        for pair in bytemuck::pod_collect_to_vec::<u8, [i32; 2]>(&bytes) {
            let (m, n) = (pair[0], pair[1]);
            if let Some(links) = n_links.get_mut(&m) {
                links.insert((n, rank));
            }
        }
    }
    for s in sends.drain(..) {
        let _ = s.wait();
    }

    // Donor partition metadata exchange, tag = m grid id.
    let mut meta_sends = Vec::new();
    for &m in &local_grids {
        let links = &n_links[&m];
        let peers: BTreeSet<usize> = links
            .iter()
            .map(|&(_, rank)| rank)
            .filter(|&r| r != me)
            .collect();
        if peers.is_empty() {
            continue;
        }
        let grid = domain.grid(m)?;
        let geometry = domain.geometry(m)?;
        let aux = &data.grid_aux[&m];
        let header = WirePartitionMeta {
            extended: WireRange::from(grid.extended_range()),
            cell_local: WireRange::from(grid.cell_local_range()),
            cell_extended: WireRange::from(grid.cell_extended_range()),
            geometry_type: geometry.geometry_type() as u32,
            _pad: 0,
        };
        let ext_count = grid.extended_range().count();
        let mut coord_payload = Vec::with_capacity(MAX_DIMS * ext_count);
        for d in 0..MAX_DIMS {
            coord_payload.extend_from_slice(geometry.coords()[d].values());
        }
        let mask_payload: Vec<u8> = aux.cell_active.values().iter().map(|&b| b as u8).collect();
        let tag = m as u16;
        for &rank in &peers {
            meta_sends.push(comm.isend(rank, tag, bytemuck::bytes_of(&header)));
            meta_sends.push(comm.isend(rank, tag, bytemuck::cast_slice(&coord_payload)));
            meta_sends.push(comm.isend(rank, tag, &mask_payload));
        }
    }

    let mut meta_wanted: BTreeSet<(GridId, usize)> = BTreeSet::new();
    for per_m in candidates.values() {
        for (&m, ranks) in per_m {
            for &rank in ranks {
                meta_wanted.insert((m, rank));
            }
        }
    }
    let mut meta: BTreeMap<(GridId, usize), PartitionMeta> = BTreeMap::new();
    for &(m, rank) in &meta_wanted {
        if rank == me {
            let grid = domain.grid(m)?;
            let geometry = domain.geometry(m)?;
            let aux = &data.grid_aux[&m];
            meta.insert(
                (m, rank),
                PartitionMeta {
                    cell_local: *grid.cell_local_range(),
                    geometry_type: geometry.geometry_type(),
                    coords: geometry.coords().clone(),
                    cell_active: aux.cell_active.clone(),
                },
            );
            continue;
        }
        let tag = m as u16;
        let raw = comm
            .irecv(rank, tag, std::mem::size_of::<WirePartitionMeta>())
            .wait()
            .ok_or(OvergridError::CommError {
                neighbor: rank,
                detail: "partition metadata receive failed".into(),
            })?;
        let header: WirePartitionMeta = bytemuck::pod_read_unaligned(&raw);
        let extended: Range = header.extended.into();
        let cell_extended: Range = header.cell_extended.into();
        let ext_count = extended.count();
        let coord_bytes = comm
            .irecv(rank, tag, MAX_DIMS * ext_count * 8)
            .wait()
            .ok_or(OvergridError::CommError {
                neighbor: rank,
                detail: "coordinate payload receive failed".into(),
            })?;
        let flat: Vec<f64> = bytemuck::pod_collect_to_vec(&coord_bytes);
        let coords = [
            Field::from_values(extended, flat[..ext_count].to_vec()),
            Field::from_values(extended, flat[ext_count..2 * ext_count].to_vec()),
            Field::from_values(extended, flat[2 * ext_count..].to_vec()),
        ];
        let mask_bytes = comm
            .irecv(rank, tag, cell_extended.count())
            .wait()
            .ok_or(OvergridError::CommError {
                neighbor: rank,
                detail: "cell mask receive failed".into(),
            })?;
        meta.insert(
            (m, rank),
            PartitionMeta {
                cell_local: header.cell_local.into(),
                geometry_type: GeometryType::from_u8(header.geometry_type as u8)
                    .unwrap_or(GeometryType::Curvilinear),
                coords,
                cell_active: Field::from_values(
                    cell_extended,
                    mask_bytes.iter().map(|&b| b != 0).collect(),
                ),
            },
        );
    }
    for s in meta_sends {
        let _ = s.wait();
    }
    domain
        .logger()
        .debug(is_root, "Done transferring coordinate data.");

    // Brute-force point-in-cell search; first match in candidate order
    // then row-major cell order wins, and the finding rank owns the row.
    let mut cells: BTreeMap<(GridId, GridId), Field<i64>> = BTreeMap::new();
    let mut owners: BTreeMap<(GridId, GridId), Field<i32>> = BTreeMap::new();
    let mut local_coords: BTreeMap<(GridId, GridId), Field<RealTuple>> = BTreeMap::new();
    for &n in &local_grids {
        let grid = domain.grid(n)?;
        let coords = domain.geometry(n)?.coords();
        let aux = &data.grid_aux[&n];
        let bin_field = &bin_fields[&n];
        let local_range = *grid.local_range();
        for p in local_range.iter() {
            if !aux.active[p] || bin_field[p] < 0 {
                continue;
            }
            let x = [coords[0][p], coords[1][p], coords[2][p]];
            for region in &bins[&bin_field[p]].regions {
                let m = region.grid_id;
                if !options.overlappable(m, n) || !region.bounds.contains(x) {
                    continue;
                }
                let key = (m, n);
                let already_found = cells.get(&key).map_or(false, |f| f[p] != NO_CELL);
                if already_found {
                    continue;
                }
                let donor = &meta[&(m, region.rank)];
                let tolerance = options.overlap_tolerance(m, n);
                let found = donor.cell_local.iter().find(|&cell| {
                    donor.cell_active[cell]
                        && overlaps_cell(dim, &donor.coords, donor.geometry_type, tolerance, cell, x)
                });
                if let Some(cell) = found {
                    let m_cell_indexer =
                        RangeIndexer::new(domain.grid_info(m)?.cell_global_range);
                    cells
                        .entry(key)
                        .or_insert_with(|| Field::new(local_range, NO_CELL))[p] =
                        m_cell_indexer.index_of(cell) as i64;
                    owners
                        .entry(key)
                        .or_insert_with(|| Field::new(local_range, -1i32))[p] =
                        region.rank as i32;
                    let iso = coords_in_cell(dim, &donor.coords, donor.geometry_type, cell, x);
                    let iso = match iso {
                        Some(u) => u,
                        None => {
                            domain.logger().warning(format!(
                                "Failed to compute local coordinates of point ({},{},{}) of grid {} inside cell ({},{},{}) of grid {}.",
                                p[0], p[1], p[2], n, cell[0], cell[1], cell[2], m
                            ));
                            [0.; MAX_DIMS]
                        }
                    };
                    local_coords
                        .entry(key)
                        .or_insert_with(|| Field::new(local_range, [0.; MAX_DIMS]))[p] = iso;
                }
            }
        }
    }
    if domain.logger().logging_debug() {
        comm.barrier();
        domain
            .logger()
            .debug(is_root, "Done searching for overlapping cells.");
    }

    // Row counts per (m, n, owner) link, exchanged over the step-5 links.
    let mut counts_out: BTreeMap<(GridId, GridId, usize), u64> = BTreeMap::new();
    for (&n, per_m) in &candidates {
        for (&m, ranks) in per_m {
            for &rank in ranks {
                counts_out.insert((m, n, rank), 0);
            }
        }
    }
    for (&(m, n), owner_field) in &owners {
        for p in owner_field.range().iter() {
            let owner = owner_field[p];
            if owner >= 0 {
                *counts_out
                    .get_mut(&(m, n, owner as usize))
                    .expect("count slot exists") += 1;
            }
        }
    }
    let mut count_handles = Vec::new();
    for &m in &local_grids {
        for &(n, rank) in &n_links[&m] {
            if rank != me {
                count_handles.push(((m, n, rank), comm.irecv(rank, m as u16, 8)));
            }
        }
    }
    for (&(m, _n, rank), &count) in &counts_out {
        if rank != me {
            sends.push(comm.isend(rank, m as u16, &count.to_le_bytes()));
        }
    }
    let mut counts_in: BTreeMap<(GridId, GridId, usize), u64> = BTreeMap::new();
    for ((m, n, rank), h) in count_handles {
        let raw = h.wait().ok_or(OvergridError::CommError {
            neighbor: rank,
            detail: "overlap count receive failed".into(),
        })?;
        counts_in.insert(
            (m, n, rank),
            u64::from_le_bytes(raw.try_into().expect("count record")),
        );
    }
    for &m in &local_grids {
        for &(n, rank) in &n_links[&m] {
            if rank == me {
                let count = counts_out.get(&(m, n, me)).copied().unwrap_or(0);
                counts_in.insert((m, n, me), count);
            }
        }
    }
    for s in sends.drain(..) {
        let _ = s.wait();
    }

    // Row payloads: the n side packs (cell, destination, iso coords) per
    // owner; the m side merges per pair sorted by destination index.
    let pack_rows = |m: GridId, n: GridId, owner: usize| -> Vec<WireOverlapRow> {
        let key = (m, n);
        let mut rows = Vec::new();
        if let (Some(cell_field), Some(owner_field), Some(coord_field)) =
            (cells.get(&key), owners.get(&key), local_coords.get(&key))
        {
            let m_cell_indexer = RangeIndexer::new(
                domain
                    .grid_info(m)
                    .expect("grid info exists")
                    .cell_global_range,
            );
            for p in cell_field.range().iter() {
                if owner_field[p] == owner as i32 && cell_field[p] != NO_CELL {
                    rows.push(WireOverlapRow {
                        cell: m_cell_indexer.tuple_of(cell_field[p] as usize),
                        destination: p,
                        coords: coord_field[p],
                    });
                }
            }
        }
        rows
    };
    let mut row_handles = Vec::new();
    for &m in &local_grids {
        for &(n, rank) in &n_links[&m] {
            if rank != me {
                let count = counts_in[&(m, n, rank)] as usize;
                if count > 0 {
                    row_handles.push((
                        (m, n, rank),
                        comm.irecv(rank, m as u16, count * std::mem::size_of::<WireOverlapRow>()),
                    ));
                }
            }
        }
    }
    let mut row_buffers: Vec<Vec<WireOverlapRow>> = Vec::new();
    for (&(m, n, rank), &count) in &counts_out {
        if rank != me && count > 0 {
            let rows = pack_rows(m, n, rank);
            debug_assert_eq!(rows.len() as u64, count);
            sends.push(comm.isend(rank, m as u16, bytemuck::cast_slice(&rows)));
            row_buffers.push(rows);
        }
    }
    let mut rows_in: BTreeMap<(GridId, GridId, usize), Vec<WireOverlapRow>> = BTreeMap::new();
    for ((m, n, rank), h) in row_handles {
        let bytes = h.wait().ok_or(OvergridError::CommError {
            neighbor: rank,
            detail: "overlap row receive failed".into(),
        })?;
        rows_in.insert((m, n, rank), bytemuck::pod_collect_to_vec(&bytes));
    }
    for &m in &local_grids {
        for &(n, rank) in &n_links[&m] {
            if rank == me && counts_in.get(&(m, n, me)).copied().unwrap_or(0) > 0 {
                rows_in.insert((m, n, me), pack_rows(m, n, me));
            }
        }
    }
    for s in sends.drain(..) {
        let _ = s.wait();
    }
    drop(row_buffers);

    // Assemble the m-side tables, ordered by destination global index.
    let mut m_tables: BTreeMap<(GridId, GridId), OverlapM> = BTreeMap::new();
    for &m in &local_grids {
        let pair_keys: BTreeSet<GridId> = n_links[&m].iter().map(|&(n, _)| n).collect();
        for n in pair_keys {
            let n_indexer = RangeIndexer::new(*domain.grid_info(n)?.cart.range());
            let mut merged: Vec<(usize, WireOverlapRow, usize)> = Vec::new();
            for &(n_grid, rank) in &n_links[&m] {
                if n_grid != n {
                    continue;
                }
                if let Some(rows) = rows_in.get(&(m, n, rank)) {
                    for row in rows {
                        merged.push((n_indexer.index_of(row.destination), *row, rank));
                    }
                }
            }
            if merged.is_empty() {
                continue;
            }
            merged.sort_by_key(|&(dest_index, _, _)| dest_index);
            let mut table = OverlapM::default();
            for (_, row, rank) in merged {
                table.cells.push(row.cell);
                table.coords.push(row.coords);
                table.destinations.push(row.destination);
                table.destination_ranks.push(rank as i32);
            }
            m_tables.insert((m, n), table);
        }
    }

    // Assemble the n-side tables in local row-major order.
    let mut n_tables: BTreeMap<(GridId, GridId), OverlapN> = BTreeMap::new();
    for (&(m, n), cell_field) in &cells {
        let grid = domain.grid(n)?;
        let owner_field = &owners[&(m, n)];
        let m_cell_indexer = RangeIndexer::new(domain.grid_info(m)?.cell_global_range);
        let mut table = OverlapN {
            points: Vec::new(),
            sources: Vec::new(),
            source_ranks: Vec::new(),
            mask: Field::new(*grid.extended_range(), false),
        };
        for p in cell_field.range().iter() {
            if cell_field[p] == NO_CELL {
                continue;
            }
            if owner_field[p] < 0 {
                domain.logger().warning(format!(
                    "Dropping overlapped point ({},{},{}) of grid {}: no owning rank for its donor cell.",
                    p[0], p[1], p[2], n
                ));
                continue;
            }
            table.points.push(p);
            table
                .sources
                .push(m_cell_indexer.tuple_of(cell_field[p] as usize));
            table.source_ranks.push(owner_field[p]);
            table.mask[p] = true;
        }
        if !table.points.is_empty() {
            n_tables.insert((m, n), table);
        }
    }

    // Globally agreed pair list (any rank with rows nominates the pair).
    let local_pairs: Vec<[i32; 2]> = n_tables.keys().map(|&(m, n)| [m, n]).collect();
    let gathered = comm.all_gather(bytemuck::cast_slice(&local_pairs));
    let mut pairs: BTreeSet<(GridId, GridId)> = BTreeSet::new();
    for bytes in &gathered {
        for pair in bytemuck::pod_collect_to_vec::<u8, [i32; 2]>(bytes) {
            pairs.insert((pair[0], pair[1]));
        }
    }

    // Every rank owning a side of an overlapping pair carries a table,
    // empty or not, so later per-pair collectives line up. The n-side
    // masks exchange here for the same reason.
    for &(m, n) in &pairs {
        if domain.grid_is_local(m) {
            m_tables.entry((m, n)).or_default();
        }
        if domain.grid_is_local(n) {
            let grid = domain.grid(n)?;
            let table = n_tables.entry((m, n)).or_insert_with(|| OverlapN {
                points: Vec::new(),
                sources: Vec::new(),
                source_ranks: Vec::new(),
                mask: Field::new(*grid.extended_range(), false),
            });
            grid.partition()
                .exchange_bool(&*comm, TAG_HALO, &mut table.mask);
        }
    }

    let overlap = domain.overlap_mut();
    overlap.clear();
    overlap.pairs = pairs.into_iter().collect();
    overlap.m_tables = m_tables;
    overlap.n_tables = n_tables;

    comm.barrier();
    domain
        .logger()
        .debug(is_root, "Done detecting overlap between grids.");
    Ok(())
}
