//! A donor grid and a receiver grid, each split across two ranks with
//! opposite decompositions, so every exchange crosses rank boundaries.
//! Interpolation of an affine field must reproduce the receiver
//! coordinates exactly.

mod util;

use overgrid::prelude::*;
use std::sync::Arc;

const N: i64 = 16;
const SHIFT: f64 = 0.25;

fn build_domain(comm: LocalComm) -> Domain<LocalComm> {
    let rank = comm.rank();
    let context = Context::create(&comm, LogFlags::ALL).unwrap();
    let mut domain = Domain::create(context, 1, Arc::new(comm)).unwrap();
    let extent = Range::from_extents(1, &[0], &[N]);
    let lower = Range::from_extents(1, &[0], &[N / 2]);
    let upper = Range::from_extents(1, &[N / 2], &[N]);
    // Grid 1 puts its lower half on rank 0; grid 2 is decomposed the
    // opposite way so donors and receivers sit on different ranks.
    let local_1 = if rank == 0 { lower } else { upper };
    let local_2 = if rank == 0 { upper } else { lower };
    domain
        .create_grids(&[
            (1, Some(GridParams::new("donor", extent, local_1))),
            (2, Some(GridParams::new("receiver", extent, local_2))),
        ])
        .unwrap();
    for id in [1, 2] {
        domain.create_geometry(id, GeometryParams::uniform()).unwrap();
        domain.create_state(id).unwrap();
    }
    // Receiver points sit a quarter cell above the donor points.
    {
        let mut coords = domain.edit_geometry_coords(2).unwrap();
        let ext = *coords[0].range();
        for p in ext.iter() {
            coords.coords_mut()[0][p] = p[0] as f64 + SHIFT;
        }
    }
    domain.create_connectivity_component(1).unwrap();
    domain
}

#[test]
fn affine_field_interpolates_exactly_across_ranks() {
    let results = util::run_ranks(2, |comm| {
        let mut domain = build_domain(comm);
        let mut assembler = Assembler::new("split");
        assembler.options_mut().set_overlappable(1, 2, true);
        assembler.assemble(&mut domain, 1).unwrap();

        assert_eq!(domain.grid(1).unwrap().member_ranks(), &[0, 1]);
        let ext_1 = *domain.grid(1).unwrap().extended_range();
        let ext_2 = *domain.grid(2).unwrap().extended_range();
        let tag = 9u16;
        let mut exchanger = Exchanger::bind(&domain, 1).unwrap();
        exchanger
            .create_collect::<f64, _>(
                &domain,
                1,
                2,
                0,
                CollectOp::Interpolate,
                1,
                ext_1,
                Layout::RowMajor,
                tag,
            )
            .unwrap();
        exchanger.create_send::<f64, _>(&domain, 1, 2, 0, 1, tag).unwrap();
        exchanger
            .create_receive::<f64, _>(&domain, 1, 2, 0, 1, tag)
            .unwrap();
        exchanger
            .create_disperse::<f64, _>(
                &domain,
                1,
                2,
                0,
                DisperseOp::Overwrite,
                1,
                ext_2,
                Layout::RowMajor,
            )
            .unwrap();

        // The donor field is the x coordinate itself.
        let field_1: Vec<f64> = ext_1.iter().map(|p| p[0] as f64).collect();
        let component = domain.connectivity(1).unwrap();
        let num_donors = component.connectivity_m(1, 2).unwrap().count();
        let num_receivers = component.connectivity_n(1, 2).unwrap().count();
        let receiver_points = component.connectivity_n(1, 2).unwrap().points().to_vec();
        let cross_rank = component
            .connectivity_m(1, 2)
            .unwrap()
            .destination_ranks()
            .iter()
            .any(|&r| r as usize != domain.comm().rank());

        let mut donors = vec![0.0f64; num_donors];
        exchanger
            .collect(&domain, 1, 2, 0, &[&field_1[..]], &mut donors)
            .unwrap();
        let mut received = vec![0.0f64; num_receivers];
        let mut field_2 = vec![f64::NAN; ext_2.count()];
        {
            let recv_req = exchanger.receive(&domain, 1, 2, 0, &mut received).unwrap();
            let send_req = exchanger.send(&domain, 1, 2, 0, &donors).unwrap();
            wait_all(vec![send_req, recv_req]).unwrap();
        }
        exchanger
            .disperse(&domain, 1, 2, 0, &received, &mut field_2)
            .unwrap();

        let indexer = RangeIndexer::new(ext_2);
        let values: Vec<(IntTuple, f64)> = receiver_points
            .iter()
            .map(|&p| (p, field_2[indexer.index_of(p)]))
            .collect();
        (values, cross_rank)
    });

    // Receivers 0..15 exist (x = 15.25 falls past the last donor cell);
    // each reads its own coordinate.
    let mut total = 0usize;
    for (values, _) in &results {
        for &(p, v) in values {
            assert!(p[0] < N - 1, "receiver {p:?} has no containing donor cell");
            assert!((v - (p[0] as f64 + SHIFT)).abs() < 1e-12, "receiver {p:?} read {v}");
            total += 1;
        }
    }
    assert_eq!(total, (N - 1) as usize);
    // The reversed decomposition forces at least one cross-rank transfer.
    assert!(results.iter().any(|(_, cross)| *cross));
}
