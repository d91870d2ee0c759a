use std::{thread, time::Duration};

use super::util::{mesh_from_boxes, scattered_boxes, walk};
use crate::{Bvh2, BvhParams, Geometry, GeometryData, Object, Progress};

#[test]
fn precanceled_build_produces_nothing() {
    let boxes = scattered_boxes(100, 13);
    let geometries = vec![Geometry::new(GeometryData::Mesh(mesh_from_boxes(&boxes)))];
    let objects = vec![Object::new(0)];

    let progress = Progress::new();
    progress.cancel();

    let mut bvh = Bvh2::new(BvhParams::default());
    bvh.build(&objects, &geometries, &progress);

    // no structure produced this update
    assert!(bvh.pack.nodes.is_empty());
    assert!(bvh.pack.leaf_nodes.is_empty());
    assert!(bvh.pack.prim_index.is_empty());

    // the same Bvh2 rebuilds cleanly afterwards
    let progress = Progress::new();
    bvh.build(&objects, &geometries, &progress);
    let stats = walk(&bvh, &objects, &geometries, true);
    assert_eq!(stats.slots.len(), 100);
}

#[test]
fn midbuild_cancel_unwinds_safely() {
    let boxes = scattered_boxes(10_000, 19);
    let geometries = vec![Geometry::new(GeometryData::Mesh(mesh_from_boxes(&boxes)))];
    let objects = vec![Object::new(0)];

    let progress = Progress::new();
    let mut bvh = Bvh2::new(BvhParams::default());

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_micros(200));
            progress.cancel();
        });
        bvh.build(&objects, &geometries, &progress);
    });

    // either the cancel landed in time and nothing was produced, or the
    // build won the race and the result must be fully consistent
    if bvh.pack.leaf_nodes.is_empty() {
        assert!(bvh.pack.nodes.is_empty());
    } else {
        let stats = walk(&bvh, &objects, &geometries, true);
        assert_eq!(stats.slots.len(), 10_000);
    }

    // a fresh build of the same inputs is unaffected by the canceled one
    let progress = Progress::new();
    bvh.build(&objects, &geometries, &progress);
    let stats = walk(&bvh, &objects, &geometries, true);
    assert_eq!(stats.slots.len(), 10_000);
}
