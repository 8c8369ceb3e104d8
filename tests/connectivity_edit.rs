//! The resize + edit/restore protocol: written rows read back, events
//! accumulate, and exchange slots notice stale connectivity.

use overgrid::comm::subset::SubsetComm;
use overgrid::connectivity::ConnectivityEventFlags;
use overgrid::prelude::*;
use std::sync::Arc;

fn line_domain() -> Domain<NoComm> {
    let comm = Arc::new(NoComm);
    let context = Context::create(&*comm, LogFlags::NONE).unwrap();
    let mut domain = Domain::create(context, 1, comm).unwrap();
    let extent = Range::from_extents(1, &[0], &[8]);
    domain
        .create_grids(&[(1, Some(GridParams::new("line", extent, extent)))])
        .unwrap();
    domain.create_geometry(1, GeometryParams::uniform()).unwrap();
    domain.create_state(1).unwrap();
    domain.create_connectivity_component(1).unwrap();
    domain.create_connectivities(1, &[(1, 1)]).unwrap();
    domain
}

#[test]
fn resize_edit_restore_round_trip() {
    let mut domain = line_domain();
    let comm = domain.comm_arc();
    let members = [0usize];
    let component = domain.connectivity_mut(1).unwrap();
    let table = component.connectivity_n_mut(1, 1).unwrap();
    let sub = SubsetComm::new(&*comm, &members).unwrap();
    table.resize(&sub, 3);
    assert_eq!(table.points(), &[[0, 0, 0]; 3]);
    assert_eq!(table.source_ranks(), &[-1; 3]);
    {
        let mut points = table.edit_points();
        points[0] = [5, 0, 0];
        points[2] = [7, 0, 0];
    }
    {
        let (mut sources, ranks) = table.edit_sources();
        sources[1] = [4, 0, 0];
        ranks.fill(0);
    }
    assert_eq!(table.points()[0], [5, 0, 0]);
    assert_eq!(table.points()[2], [7, 0, 0]);
    assert_eq!(table.sources()[1], [4, 0, 0]);
    assert_eq!(table.source_ranks(), &[0; 3]);

    let events = component.events();
    assert!(events.contains(ConnectivityEventFlags::RESIZE_N));
    assert!(events.contains(ConnectivityEventFlags::EDIT_N_POINTS));
    assert!(events.contains(ConnectivityEventFlags::EDIT_N_SOURCES));
    component.clear_events();
    assert!(component
        .events()
        .without(ConnectivityEventFlags::CREATE)
        .is_empty());
}

#[test]
fn resize_invalidates_previous_rows() {
    let mut domain = line_domain();
    let comm = domain.comm_arc();
    let members = [0usize];
    let component = domain.connectivity_mut(1).unwrap();
    let table = component.connectivity_m_mut(1, 1).unwrap();
    let sub = SubsetComm::new(&*comm, &members).unwrap();
    table.resize(&sub, 2, 2);
    {
        let (mut destinations, ranks) = table.edit_destinations();
        destinations[0] = [3, 0, 0];
        ranks[0] = 0;
    }
    table.resize(&sub, 1, 2);
    assert_eq!(table.destinations(), &[[0, 0, 0]]);
    assert_eq!(table.destination_ranks(), &[-1]);
}

#[test]
fn exchanger_slots_go_stale_on_edit() {
    let mut domain = line_domain();
    let comm = domain.comm_arc();
    let members = [0usize];
    {
        let component = domain.connectivity_mut(1).unwrap();
        let table = component.connectivity_n_mut(1, 1).unwrap();
        let sub = SubsetComm::new(&*comm, &members).unwrap();
        table.resize(&sub, 1);
        {
            let mut points = table.edit_points();
            points[0] = [2, 0, 0];
        }
        {
            let (_, ranks) = table.edit_sources();
            ranks[0] = 0;
        }
    }
    let ext = *domain.grid(1).unwrap().extended_range();
    let mut exchanger = Exchanger::bind(&domain, 1).unwrap();
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
    let mut field = vec![0.0f64; ext.count()];
    exchanger
        .disperse(&domain, 1, 1, 0, &[9.0], &mut field)
        .unwrap();
    assert_eq!(field[2], 9.0);

    // Editing the tables bumps the pair version; the slot goes stale.
    {
        let component = domain.connectivity_mut(1).unwrap();
        let table = component.connectivity_n_mut(1, 1).unwrap();
        let mut points = table.edit_points();
        points[0] = [3, 0, 0];
    }
    let err = exchanger
        .disperse(&domain, 1, 1, 0, &[9.0], &mut field)
        .unwrap_err();
    assert!(matches!(err, OvergridError::StaleSlot { m: 1, n: 1, slot: 0 }));

    // Invalidation drops the slot entirely.
    exchanger.invalidate_stale(&domain);
    let err = exchanger
        .disperse(&domain, 1, 1, 0, &[9.0], &mut field)
        .unwrap_err();
    assert!(matches!(err, OvergridError::UnknownSlot { .. }));

    // A slot created for one type rejects execution at another.
    exchanger
        .create_disperse::<f64, _>(
            &domain,
            1,
            1,
            1,
            DisperseOp::Overwrite,
            1,
            ext,
            Layout::RowMajor,
        )
        .unwrap();
    let mut ints = vec![0i32; ext.count()];
    let err = exchanger
        .disperse(&domain, 1, 1, 1, &[1i32], &mut ints)
        .unwrap_err();
    assert!(matches!(
        err,
        OvergridError::SlotTypeMismatch {
            expected: DataType::Float64,
            got: DataType::Int32,
            ..
        }
    ));

    exchanger.destroy(1, 1, 1);
    let err = exchanger
        .disperse(&domain, 1, 1, 1, &[1.0f64], &mut field)
        .unwrap_err();
    assert!(matches!(err, OvergridError::UnknownSlot { .. }));
}
