//! Policy phases layered on overlap detection, and the connectivity
//! generation that turns surviving overlap rows into donor/receiver tables
//! with linear interpolation stencils.
//!
//! The overlap tables on both sides of a pair are row-aligned (sorted by
//! the receiver point's global index), so per-row values move between the
//! sides with a plain per-peer pack/scatter and no negotiation.

use super::{AssemblerOptions, AssemblyData};
use crate::comm::subset::SubsetComm;
use crate::comm::{Communicator, Wait, TAG_HALO, TAG_PAIR_DATA};
use crate::core::{RealTuple, MAX_DIMS};
use crate::domain::{ComponentId, Domain};
use crate::error::OvergridError;
use crate::geometry::ops::interp_basis_linear;
use crate::grid::GridId;
use crate::overlap::{OverlapM, OverlapN};
use crate::state::StateFlags;
use std::collections::BTreeMap;

/// Move one byte per m-side row to the aligned n-side rows (or the
/// reverse when `m_to_n` is false). Collective over the ranks holding
/// either table of the pair.
fn exchange_row_values<C: Communicator>(
    comm: &C,
    m_table: Option<&OverlapM>,
    n_table: Option<&OverlapN>,
    values: &[u8],
    m_to_n: bool,
) -> Result<Vec<u8>, OvergridError> {
    let (out_len, recv_peers, send_buckets): (usize, Vec<(usize, Vec<usize>)>, Vec<(usize, Vec<usize>)>);
    // Bucket row indices by peer, preserving table order.
    let bucket = |ranks: &[i32]| -> Vec<(usize, Vec<usize>)> {
        let mut map: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, &r) in ranks.iter().enumerate() {
            if r >= 0 {
                map.entry(r as usize).or_default().push(i);
            }
        }
        map.into_iter().collect()
    };
    if m_to_n {
        out_len = n_table.map_or(0, |t| t.count());
        recv_peers = n_table.map_or_else(Vec::new, |t| bucket(t.source_ranks()));
        send_buckets = m_table.map_or_else(Vec::new, |t| bucket(t.destination_ranks()));
    } else {
        out_len = m_table.map_or(0, |t| t.count());
        recv_peers = m_table.map_or_else(Vec::new, |t| bucket(t.destination_ranks()));
        send_buckets = n_table.map_or_else(Vec::new, |t| bucket(t.source_ranks()));
    }

    let me = comm.rank();
    let mut recvs = Vec::with_capacity(recv_peers.len());
    for (peer, rows) in &recv_peers {
        if *peer != me {
            recvs.push(comm.irecv(*peer, TAG_PAIR_DATA, rows.len()));
        }
    }
    let mut sends = Vec::with_capacity(send_buckets.len());
    for (peer, rows) in &send_buckets {
        if *peer != me {
            let packed: Vec<u8> = rows.iter().map(|&i| values[i]).collect();
            sends.push(comm.isend(*peer, TAG_PAIR_DATA, &packed));
        }
    }
    let mut out = vec![0u8; out_len];
    // Same-rank rows copy directly; the two buckets share their ordering.
    if let Some((_, recv_rows)) = recv_peers.iter().find(|(peer, _)| *peer == me) {
        let send_rows = send_buckets
            .iter()
            .find(|(peer, _)| *peer == me)
            .map_or(&[][..], |(_, rows)| &rows[..]);
        debug_assert_eq!(send_rows.len(), recv_rows.len());
        for (&dst, &src) in recv_rows.iter().zip(send_rows) {
            out[dst] = values[src];
        }
    }
    let mut pending = recvs.into_iter();
    for (peer, rows) in &recv_peers {
        if *peer == me {
            continue;
        }
        let handle = pending.next().expect("one handle per remote peer");
        let bytes = handle.wait().ok_or(OvergridError::CommError {
            neighbor: *peer,
            detail: "row value receive failed".into(),
        })?;
        if bytes.len() != rows.len() {
            return Err(OvergridError::BufferSizeMismatch {
                neighbor: *peer,
                expected: rows.len(),
                got: bytes.len(),
            });
        }
        for (&row, &v) in rows.iter().zip(&bytes) {
            out[row] = v;
        }
    }
    for s in sends {
        let _ = s.wait();
    }
    Ok(out)
}

/// Phase 4: deactivate n-side points whose donor cell touches an m-side
/// domain boundary. Gated per pair; requires overlappability both ways.
pub(crate) fn cut_boundary_holes<C: Communicator>(
    domain: &mut Domain<C>,
    options: &AssemblerOptions,
    data: &mut AssemblyData,
) -> Result<(), OvergridError> {
    let comm = domain.comm_arc();
    let is_root = comm.rank() == 0;
    comm.barrier();
    let enabled: Vec<(GridId, GridId)> = domain
        .overlap()
        .pairs()
        .iter()
        .copied()
        .filter(|&(m, n)| options.cut_boundary_holes(m, n))
        .collect();
    if !enabled.is_empty() {
        domain.logger().debug(is_root, "Cutting boundary holes...");
    }
    for (m, n) in enabled {
        let m_values: Vec<u8> = match domain.overlap().overlap_m(m, n) {
            Some(table) if domain.grid_is_local(m) => {
                let flags = domain.state(m)?.flags();
                let dim = domain.dim();
                table
                    .cells()
                    .iter()
                    .map(|&cell| {
                        super::masks::cell_corners(dim, cell)
                            .any(|v| flags[v].contains(StateFlags::DOMAIN_BOUNDARY))
                            as u8
                    })
                    .collect()
            }
            _ => Vec::new(),
        };
        let behind = exchange_row_values(
            &*comm,
            domain.overlap().overlap_m(m, n),
            domain.overlap().overlap_n(m, n),
            &m_values,
            true,
        )?;
        if let Some(table) = domain.overlap().overlap_n(m, n) {
            let points: Vec<_> = table
                .points()
                .iter()
                .zip(&behind)
                .filter(|(_, &b)| b != 0)
                .map(|(&p, _)| p)
                .collect();
            let mut cut = 0usize;
            {
                let mut flags = domain.edit_state_flags(n)?;
                for p in points {
                    let f = &mut flags.flags_mut()[p];
                    if f.contains(StateFlags::ACTIVE) {
                        *f = f.without(StateFlags::ACTIVE) | StateFlags::BOUNDARY_HOLE;
                        cut += 1;
                    }
                }
            }
            if cut > 0 {
                let grid_root = domain.grid_info(n)?.root_rank();
                domain
                    .logger()
                    .debug(comm.rank() == grid_root, format!("{cut} points cut on grid {n}."));
            }
            let grid = domain.grid(n)?;
            let flags = domain.state(n)?.flags().clone();
            data.grid_aux
                .get_mut(&n)
                .expect("aux data exists")
                .refresh_activity(&*comm, grid, &flags);
        }
    }
    comm.barrier();
    Ok(())
}

/// Phase 5: mark every overlapped point, and occlude points overlapped by
/// an occluding donor grid.
pub(crate) fn compute_occlusion<C: Communicator>(
    domain: &mut Domain<C>,
    options: &AssemblerOptions,
) -> Result<(), OvergridError> {
    let comm = domain.comm_arc();
    comm.barrier();
    let local_pairs: Vec<(GridId, GridId)> = domain.overlap().local_n_ids().collect();
    for (m, n) in local_pairs {
        let points: Vec<_> = domain
            .overlap()
            .overlap_n(m, n)
            .expect("n-side table exists for local pair")
            .points()
            .to_vec();
        let occlude = options.occludes(m, n);
        let mut flags = domain.edit_state_flags(n)?;
        for p in points {
            let f = &mut flags.flags_mut()[p];
            *f |= StateFlags::OVERLAPPED;
            if occlude {
                *f |= StateFlags::OCCLUDED;
            }
        }
    }
    comm.barrier();
    Ok(())
}

/// Phase 6: dilate the occluded set by the configured number of layers.
pub(crate) fn apply_padding<C: Communicator>(
    domain: &mut Domain<C>,
    options: &AssemblerOptions,
) -> Result<(), OvergridError> {
    let comm = domain.comm_arc();
    comm.barrier();
    let dim = domain.dim();
    let pairs: Vec<(GridId, GridId)> = domain.overlap().pairs().to_vec();
    for (m, n) in pairs {
        let layers = options.edge_padding(m, n);
        if layers == 0 || !domain.grid_is_local(n) {
            continue;
        }
        for _ in 0..layers {
            let grow: Vec<_> = {
                let grid = domain.grid(n)?;
                let flags = domain.state(n)?.flags();
                grid.local_range()
                    .iter()
                    .filter(|&p| {
                        let f = flags[p];
                        f.contains(StateFlags::ACTIVE)
                            && !f.contains(StateFlags::OCCLUDED)
                            && super::masks::unit_neighborhood(dim, p).iter().any(|q| {
                                q != p
                                    && flags.range().contains(q)
                                    && flags[q].contains(StateFlags::OCCLUDED)
                            })
                    })
                    .collect()
            };
            let mut flags = domain.edit_state_flags(n)?;
            for p in grow {
                flags.flags_mut()[p] |= StateFlags::OCCLUDED;
            }
        }
    }
    comm.barrier();
    Ok(())
}

/// Phase 7: remove isolated specks of the occluded mask (and fill isolated
/// holes in it) with the configured number of sweeps.
pub(crate) fn apply_smoothing<C: Communicator>(
    domain: &mut Domain<C>,
    options: &AssemblerOptions,
) -> Result<(), OvergridError> {
    let comm = domain.comm_arc();
    comm.barrier();
    let dim = domain.dim();
    for grid_id in domain.local_grid_ids() {
        let sweeps = options.edge_smoothing(grid_id);
        for _ in 0..sweeps {
            let (clear, set): (Vec<_>, Vec<_>) = {
                let grid = domain.grid(grid_id)?;
                let flags = domain.state(grid_id)?.flags();
                let occluded_neighbors = |p| {
                    super::masks::unit_neighborhood(dim, p)
                        .iter()
                        .filter(|&q| {
                            q != p
                                && flags.range().contains(q)
                                && flags[q].contains(StateFlags::ACTIVE | StateFlags::OCCLUDED)
                        })
                        .count()
                };
                let clear = grid
                    .local_range()
                    .iter()
                    .filter(|&p| {
                        flags[p].contains(StateFlags::ACTIVE | StateFlags::OCCLUDED)
                            && occluded_neighbors(p) == 0
                    })
                    .collect();
                let set = grid
                    .local_range()
                    .iter()
                    .filter(|&p| {
                        let f = flags[p];
                        f.contains(StateFlags::ACTIVE) && !f.contains(StateFlags::OCCLUDED) && {
                            let total = super::masks::unit_neighborhood(dim, p)
                                .iter()
                                .filter(|&q| {
                                    q != p
                                        && flags.range().contains(q)
                                        && flags[q].contains(StateFlags::ACTIVE)
                                })
                                .count();
                            total > 0 && occluded_neighbors(p) == total
                        }
                    })
                    .collect();
                (clear, set)
            };
            let mut flags = domain.edit_state_flags(grid_id)?;
            for p in clear {
                let f = &mut flags.flags_mut()[p];
                *f = f.without(StateFlags::OCCLUDED);
            }
            for p in set {
                flags.flags_mut()[p] |= StateFlags::OCCLUDED;
            }
        }
    }
    comm.barrier();
    Ok(())
}

/// Phase 8: deactivate overlapped points deeper than the fringe size into
/// the active region's interior.
pub(crate) fn minimize_overlap<C: Communicator>(
    domain: &mut Domain<C>,
    options: &AssemblerOptions,
    data: &mut AssemblyData,
) -> Result<(), OvergridError> {
    let comm = domain.comm_arc();
    let is_root = comm.rank() == 0;
    comm.barrier();
    let dim = domain.dim();
    let pairs: Vec<(GridId, GridId)> = domain.overlap().pairs().to_vec();
    for (m, n) in pairs {
        if !options.minimize_overlap(m, n) || !domain.grid_is_local(n) {
            continue;
        }
        domain
            .logger()
            .debug(is_root, format!("Minimizing overlap of grid {n} by grid {m}..."));
        // Erode the active mask to find the deep interior.
        let mut interior = data.grid_aux[&n].active.clone();
        for _ in 0..options.fringe_size(n) {
            let grid = domain.grid(n)?;
            let mut next = interior.clone();
            for p in grid.local_range().iter() {
                if !interior[p] {
                    continue;
                }
                let shrink = super::masks::unit_neighborhood(dim, p).iter().any(|q| {
                    q != p && (!interior.range().contains(q) || !interior[q])
                });
                if shrink {
                    next[p] = false;
                }
            }
            grid.partition().exchange_bool(&*comm, TAG_HALO, &mut next);
            interior = next;
        }
        let deep: Vec<_> = {
            let grid = domain.grid(n)?;
            let mask = domain
                .overlap()
                .overlap_n(m, n)
                .expect("n-side table exists for pair")
                .mask();
            grid.local_range()
                .iter()
                .filter(|&p| interior[p] && mask[p])
                .collect()
        };
        {
            let mut flags = domain.edit_state_flags(n)?;
            for &p in &deep {
                let f = &mut flags.flags_mut()[p];
                *f = f.without(StateFlags::ACTIVE) | StateFlags::OCCLUDED;
            }
        }
        let grid = domain.grid(n)?;
        let flags = domain.state(n)?.flags().clone();
        data.grid_aux
            .get_mut(&n)
            .expect("aux data exists")
            .refresh_activity(&*comm, grid, &flags);
    }
    comm.barrier();
    Ok(())
}

/// Final phase: write connectivity tables for the overlap rows whose
/// receiver points survived the policy phases, with linear tensor-product
/// interpolation stencils.
pub(crate) fn generate_connectivity<C: Communicator>(
    domain: &mut Domain<C>,
    _options: &AssemblerOptions,
    component_id: ComponentId,
) -> Result<(), OvergridError> {
    let comm = domain.comm_arc();
    let is_root = comm.rank() == 0;
    comm.barrier();
    domain.logger().debug(is_root, "Generating connectivity...");

    let dim = domain.dim();
    let pairs: Vec<(GridId, GridId)> = domain.overlap().pairs().to_vec();
    domain.connectivity_mut(component_id)?.clear_pairs();
    domain.create_connectivities(component_id, &pairs)?;

    for &(m, n) in &pairs {
        let m_local = domain.grid_is_local(m);
        let n_local = domain.grid_is_local(n);
        if !m_local && !n_local {
            continue;
        }

        // Receiver rows that survive: active, not a hole, not occluded,
        // with a resolved source rank.
        let keep: Vec<u8> = match domain.overlap().overlap_n(m, n) {
            Some(table) if n_local => {
                let flags = domain.state(n)?.flags();
                table
                    .points()
                    .iter()
                    .zip(table.source_ranks())
                    .map(|(&p, &rank)| {
                        let f = flags[p];
                        (rank >= 0
                            && f.contains(StateFlags::ACTIVE)
                            && !f.intersects(StateFlags::BOUNDARY_HOLE | StateFlags::OCCLUDED))
                            as u8
                    })
                    .collect()
            }
            _ => Vec::new(),
        };
        let m_keep = exchange_row_values(
            &*comm,
            domain.overlap().overlap_m(m, n),
            domain.overlap().overlap_n(m, n),
            &keep,
            false,
        )?;

        if m_local {
            let members = domain.grid_info(m)?.ranks.clone();
            let table = domain
                .overlap()
                .overlap_m(m, n)
                .expect("m-side table exists for pair")
                .clone();
            let rows: Vec<usize> = (0..table.count()).filter(|&i| m_keep[i] != 0).collect();
            let component = domain.connectivity_mut(component_id)?;
            let connectivity = component
                .connectivity_m_mut(m, n)
                .expect("m-side connectivity exists");
            let subset =
                SubsetComm::new(&*comm, &members).expect("rank is a member of its local grid");
            connectivity.resize(&subset, rows.len(), 2);
            {
                let (mut begin, end) = connectivity.edit_extents();
                for (j, &i) in rows.iter().enumerate() {
                    begin[j] = table.cells()[i];
                    for d in 0..MAX_DIMS {
                        end[j][d] = begin[j][d] + if d < dim { 2 } else { 1 };
                    }
                }
            }
            {
                let mut coords = connectivity.edit_coords();
                for (j, &i) in rows.iter().enumerate() {
                    coords[j] = table.coords()[i];
                }
            }
            {
                let num = rows.len();
                let mut coefs = connectivity.edit_interp_coefs();
                for (j, &i) in rows.iter().enumerate() {
                    let local: RealTuple = table.coords()[i];
                    for d in 0..MAX_DIMS {
                        if d < dim {
                            let basis = interp_basis_linear(local[d]);
                            coefs[(d * 2) * num + j] = basis[0];
                            coefs[(d * 2 + 1) * num + j] = basis[1];
                        } else {
                            coefs[(d * 2) * num + j] = 1.0;
                        }
                    }
                }
            }
            {
                let (mut destinations, destination_ranks) = connectivity.edit_destinations();
                for (j, &i) in rows.iter().enumerate() {
                    destinations[j] = table.destinations()[i];
                    destination_ranks[j] = table.destination_ranks()[i];
                }
            }
        }

        if n_local {
            let members = domain.grid_info(n)?.ranks.clone();
            let table = domain
                .overlap()
                .overlap_n(m, n)
                .expect("n-side table exists for pair")
                .clone();
            let rows: Vec<usize> = (0..table.count()).filter(|&i| keep[i] != 0).collect();
            let receiver_points: Vec<_> = rows.iter().map(|&i| table.points()[i]).collect();
            let component = domain.connectivity_mut(component_id)?;
            let connectivity = component
                .connectivity_n_mut(m, n)
                .expect("n-side connectivity exists");
            let subset =
                SubsetComm::new(&*comm, &members).expect("rank is a member of its local grid");
            connectivity.resize(&subset, rows.len());
            {
                let mut points = connectivity.edit_points();
                for (j, &i) in rows.iter().enumerate() {
                    points[j] = table.points()[i];
                }
            }
            {
                let (mut sources, source_ranks) = connectivity.edit_sources();
                for (j, &i) in rows.iter().enumerate() {
                    sources[j] = table.sources()[i];
                    source_ranks[j] = table.source_ranks()[i];
                }
            }
            let mut flags = domain.edit_state_flags(n)?;
            for p in receiver_points {
                flags.flags_mut()[p] |= StateFlags::RECEIVER;
            }
        }
    }

    comm.barrier();
    domain
        .logger()
        .debug(is_root, "Done generating connectivity.");
    Ok(())
}
