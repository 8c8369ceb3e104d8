//! Boundary inference: the inner edge of an isolated active block becomes
//! an inferred domain boundary.

use overgrid::prelude::*;
use std::sync::Arc;

#[test]
fn ring_of_isolated_block_is_inferred() {
    let comm = Arc::new(NoComm);
    let context = Context::create(&*comm, LogFlags::ALL).unwrap();
    let mut domain = Domain::create(context, 2, comm).unwrap();
    let extent = Range::from_extents(2, &[0, 0], &[6, 6]);
    domain
        .create_grids(&[(1, Some(GridParams::new("block", extent, extent)))])
        .unwrap();
    domain.create_geometry(1, GeometryParams::uniform()).unwrap();
    domain.create_state(1).unwrap();
    {
        // 4x4 active block surrounded by inactive points.
        let active = Range::from_extents(2, &[1, 1], &[5, 5]);
        let mut flags = domain.edit_state_flags(1).unwrap();
        for p in extent.iter() {
            if !active.contains(p) {
                let f = &mut flags.flags_mut()[p];
                *f = f.without(StateFlags::ACTIVE);
            }
        }
    }
    domain.create_connectivity_component(1).unwrap();

    let mut assembler = Assembler::new("infer");
    assembler.options_mut().set_infer_boundaries(1, true);
    assembler.assemble(&mut domain, 1).unwrap();

    let flags = domain.state(1).unwrap().flags();
    let inferred: Vec<_> = extent
        .iter()
        .filter(|&p| {
            flags[p].contains(StateFlags::DOMAIN_BOUNDARY | StateFlags::INFERRED_DOMAIN_BOUNDARY)
        })
        .collect();
    assert_eq!(inferred.len(), 12);
    // The ring of the 4x4 block, e.g. its corners.
    assert!(inferred.contains(&[1, 1, 0]));
    assert!(inferred.contains(&[4, 4, 0]));
    // The interior 2x2 stays plain active.
    assert!(!flags[[2, 2, 0]].contains(StateFlags::INFERRED_DOMAIN_BOUNDARY));
    assert!(flags[[2, 2, 0]].contains(StateFlags::ACTIVE));
}

#[test]
fn inference_is_off_by_default() {
    let comm = Arc::new(NoComm);
    let context = Context::create(&*comm, LogFlags::NONE).unwrap();
    let mut domain = Domain::create(context, 1, comm).unwrap();
    let extent = Range::from_extents(1, &[0], &[8]);
    domain
        .create_grids(&[(1, Some(GridParams::new("line", extent, extent)))])
        .unwrap();
    domain.create_geometry(1, GeometryParams::uniform()).unwrap();
    domain.create_state(1).unwrap();
    domain.create_connectivity_component(7).unwrap();

    Assembler::new("noop").assemble(&mut domain, 7).unwrap();

    let flags = domain.state(1).unwrap().flags();
    assert!(extent
        .iter()
        .all(|p| !flags[p].contains(StateFlags::INFERRED_DOMAIN_BOUNDARY)));
}
