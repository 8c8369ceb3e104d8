//! Boundary inference: active-region inner edges that are neither declared
//! boundaries nor overlapped by an allowed donor grid become inferred
//! domain boundaries.

use super::masks::detect_inner_edge;
use super::{AssemblerOptions, AssemblyData};
use crate::comm::{Communicator, TAG_HALO};
use crate::domain::Domain;
use crate::error::OvergridError;
use crate::state::StateFlags;

pub(crate) fn infer_boundaries<C: Communicator>(
    domain: &mut Domain<C>,
    options: &AssemblerOptions,
    data: &mut AssemblyData,
) -> Result<(), OvergridError> {
    let comm = domain.comm_arc();
    let is_root = comm.rank() == 0;
    comm.barrier();
    domain
        .logger()
        .debug(is_root, "Inferring non-overlapping boundaries...");

    let dim = domain.dim();
    for grid_id in domain.local_grid_ids() {
        if !options.infer_boundaries(grid_id) {
            continue;
        }
        let mut inferred = {
            let grid = domain.grid(grid_id)?;
            let aux = &data.grid_aux[&grid_id];
            let mut mask = detect_inner_edge(dim, &aux.active, grid.local_range());
            for (edge, boundary) in mask.values_mut().iter_mut().zip(aux.domain_boundary.values())
            {
                *edge = *edge && !boundary;
            }
            for (m, n) in domain.overlap().local_n_ids() {
                if n != grid_id {
                    continue;
                }
                let overlap_mask = domain
                    .overlap()
                    .overlap_n(m, n)
                    .expect("n-side table exists for local pair")
                    .mask();
                for p in grid.local_range().iter() {
                    mask[p] = mask[p] && !overlap_mask[p];
                }
            }
            grid.partition().exchange_bool(&*comm, TAG_HALO, &mut mask);
            mask
        };

        let mut num_inferred = 0usize;
        {
            let mut flags = domain.edit_state_flags(grid_id)?;
            for (flag, &edge) in flags
                .flags_mut()
                .values_mut()
                .iter_mut()
                .zip(inferred.values())
            {
                if edge {
                    *flag |= StateFlags::DOMAIN_BOUNDARY | StateFlags::INFERRED_DOMAIN_BOUNDARY;
                }
            }
        }
        {
            let grid = domain.grid(grid_id)?;
            for p in grid.local_range().iter() {
                if inferred[p] {
                    num_inferred += 1;
                }
            }
        }
        let aux = data.grid_aux.get_mut(&grid_id).expect("aux data exists");
        for (boundary, edge) in aux
            .domain_boundary
            .values_mut()
            .iter_mut()
            .zip(inferred.values_mut())
        {
            *boundary = *boundary || *edge;
        }
        if num_inferred > 0 {
            let grid_root = domain.grid_info(grid_id)?.root_rank();
            domain.logger().debug(
                comm.rank() == grid_root,
                format!(
                    "{} points marked as boundaries on grid {}.",
                    num_inferred, grid_id
                ),
            );
        }
    }

    comm.barrier();
    domain
        .logger()
        .debug(is_root, "Done inferring non-overlapping boundaries.");
    Ok(())
}
