use geometry::Vec3;

use super::util::{assert_box_eq, build_mesh, scattered_boxes, walk};
use crate::{BvhParams, GeometryData, Progress};

#[test]
fn refit_with_unchanged_positions_is_stable() {
    let boxes = scattered_boxes(200, 17);
    let (geometries, objects, mut bvh) = build_mesh(&boxes, BvhParams::default());

    let nodes = bvh.pack.nodes.clone();
    let leaf_nodes = bvh.pack.leaf_nodes.clone();

    let progress = Progress::new();
    bvh.refit(&objects, &geometries, &progress);

    // same topology, same boxes
    assert_eq!(bvh.pack.nodes, nodes);
    assert_eq!(bvh.pack.leaf_nodes, leaf_nodes);
}

#[test]
fn refit_follows_deformed_positions() {
    let boxes = scattered_boxes(300, 29);
    let (mut geometries, objects, mut bvh) = build_mesh(&boxes, BvhParams::default());

    let before = walk(&bvh, &objects, &geometries, true);

    let shift = Vec3::new(25.0, -3.0, 7.0);
    let GeometryData::Mesh(mesh) = &mut geometries[0].data else {
        unreachable!();
    };
    for vert in &mut mesh.verts {
        *vert += shift;
    }

    let progress = Progress::new();
    bvh.refit(&objects, &geometries, &progress);

    // child indices untouched, every box moved with the geometry
    let after = walk(&bvh, &objects, &geometries, true);
    let mut expected = before.root_bounds;
    expected.min += shift;
    expected.max += shift;
    assert_box_eq(after.root_bounds, expected);
    assert_eq!(after.leaf_counts, before.leaf_counts);
    assert_eq!(after.slots, before.slots);
}

#[test]
fn single_leaf_structure_refits() {
    let boxes = scattered_boxes(4, 5);
    let (mut geometries, objects, mut bvh) = build_mesh(
        &boxes,
        BvhParams {
            // everything fits one leaf
            min_leaf_size: 4,
            ..BvhParams::default()
        },
    );
    assert_eq!(bvh.pack.root_index, -1);

    let GeometryData::Mesh(mesh) = &mut geometries[0].data else {
        unreachable!();
    };
    for vert in &mut mesh.verts {
        *vert *= 2.0;
    }

    let progress = Progress::new();
    bvh.refit(&objects, &geometries, &progress);

    let stats = walk(&bvh, &objects, &geometries, true);
    assert_eq!(stats.slots.len(), 4);
}
