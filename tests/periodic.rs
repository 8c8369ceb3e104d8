//! Periodic wrap: the extended range carries the wrap halo, coordinates
//! offset by the periodic length, and the collect kernel reads across the
//! seam.

mod util;

use overgrid::comm::subset::SubsetComm;
use overgrid::prelude::*;
use std::sync::Arc;

#[test]
fn wrap_halo_carries_offset_coordinates_and_collects() {
    let results = util::run_ranks(1, |comm| {
        let context = Context::create(&comm, LogFlags::NONE).unwrap();
        let comm = Arc::new(comm);
        let mut domain = Domain::create(context, 1, comm.clone()).unwrap();
        let extent = Range::from_extents(1, &[0], &[16]);
        domain
            .create_grids(&[(
                1,
                Some(
                    GridParams::new("ring", extent, extent)
                        .with_periodic([true, false, false]),
                ),
            )])
            .unwrap();
        domain
            .create_geometry(
                1,
                GeometryParams::uniform().with_periodic_length([16.0, 0.0, 0.0]),
            )
            .unwrap();
        domain.create_state(1).unwrap();

        // Extended range includes both wrap halos.
        let grid = domain.grid(1).unwrap();
        let ext = *grid.extended_range();
        let cover = *grid.cell_cover_range();
        assert_eq!(ext, Range::from_extents(1, &[-1], &[17]));
        assert_eq!(cover, Range::from_extents(1, &[0], &[16]));
        let partition = grid.partition().clone();

        // Editing coordinates refreshes the halo with the periodic offset.
        {
            let mut coords = domain.edit_geometry_coords(1).unwrap();
            for p in Range::from_extents(1, &[0], &[16]).iter() {
                coords.coords_mut()[0][p] = p[0] as f64;
            }
        }
        let geometry = domain.geometry(1).unwrap();
        assert_eq!(geometry.coords()[0][[-1, 0, 0]], -1.0);
        assert_eq!(geometry.coords()[0][[16, 0, 0]], 16.0);

        // The grid's bounds wrap: the top cover cell reaches x = 16.
        let mut bounds = BBox::empty(1);
        for cell in cover.iter() {
            for v in [cell, [cell[0] + 1, 0, 0]] {
                bounds = bounds.extended([geometry.coords()[0][v], 0.0, 0.0]);
            }
        }
        assert_eq!(bounds.max()[0], 16.0);

        // A plain field exchange pulls the wrap halo from the owners.
        let mut field = Field::new(ext, 0.0f64);
        for p in Range::from_extents(1, &[0], &[16]).iter() {
            field[p] = p[0] as f64;
        }
        partition.exchange(&*comm, 0x40, &mut field);
        assert_eq!(field[[-1, 0, 0]], 15.0);
        assert_eq!(field[[16, 0, 0]], 0.0);

        // Hand-built connectivity across the seam: the donor stencil of
        // cell 15 spans vertices {15, 16}, the latter the wrap image of 0.
        domain.create_connectivity_component(1).unwrap();
        domain.create_connectivities(1, &[(1, 1)]).unwrap();
        let members = [0usize];
        {
            let component = domain.connectivity_mut(1).unwrap();
            let table = component.connectivity_m_mut(1, 1).unwrap();
            let sub = SubsetComm::new(&*comm, &members).unwrap();
            table.resize(&sub, 1, 2);
            {
                let (mut begin, end) = table.edit_extents();
                begin[0] = [15, 0, 0];
                end[0] = [17, 1, 1];
            }
            {
                let mut coords = table.edit_coords();
                coords[0] = [0.5, 0.0, 0.0];
            }
            {
                let mut coefs = table.edit_interp_coefs();
                coefs[0] = 0.5; // axis 0, point 0
                coefs[1] = 0.5; // axis 0, point 1
                coefs[2] = 1.0; // axis 1, point 0
                coefs[4] = 1.0; // axis 2, point 0
            }
            {
                let (mut destinations, ranks) = table.edit_destinations();
                destinations[0] = [0, 0, 0];
                ranks[0] = 0;
            }
            let table = component.connectivity_n_mut(1, 1).unwrap();
            let sub = SubsetComm::new(&*comm, &members).unwrap();
            table.resize(&sub, 1);
            {
                let mut points = table.edit_points();
                points[0] = [0, 0, 0];
            }
            {
                let (mut sources, ranks) = table.edit_sources();
                sources[0] = [15, 0, 0];
                ranks[0] = 0;
            }
        }

        let indexer = RangeIndexer::new(ext);
        let field: Vec<f64> = ext.iter().map(|p| p[0] as f64).collect();
        let mut exchanger = Exchanger::bind(&domain, 1).unwrap();
        exchanger
            .create_collect::<f64, _>(
                &domain,
                1,
                1,
                0,
                CollectOp::Interpolate,
                1,
                ext,
                Layout::RowMajor,
                0x41,
            )
            .unwrap();
        exchanger.create_send::<f64, _>(&domain, 1, 1, 0, 1, 0x41).unwrap();
        exchanger
            .create_receive::<f64, _>(&domain, 1, 1, 0, 1, 0x41)
            .unwrap();
        exchanger
            .create_disperse::<f64, _>(
                &domain,
                1,
                1,
                0,
                DisperseOp::Overwrite,
                1,
                ext,
                Layout::RowMajor,
            )
            .unwrap();

        let mut donors = vec![0.0f64; 1];
        exchanger
            .collect(&domain, 1, 1, 0, &[&field[..]], &mut donors)
            .unwrap();
        // 0.5 * x(15) + 0.5 * wrap(x(0)) = 0.5 * 15 + 0.5 * 0.
        assert_eq!(donors[0], 7.5);

        let mut received = vec![0.0f64; 1];
        {
            let recv_req = exchanger.receive(&domain, 1, 1, 0, &mut received).unwrap();
            let send_req = exchanger.send(&domain, 1, 1, 0, &donors).unwrap();
            wait_all(vec![send_req, recv_req]).unwrap();
        }
        let mut out = field.clone();
        exchanger
            .disperse(&domain, 1, 1, 0, &received, &mut out)
            .unwrap();
        out[indexer.index_of([0, 0, 0])]
    });
    assert_eq!(results[0], 7.5);
}
