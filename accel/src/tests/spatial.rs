use geometry::{BoundBox, Vec3};

use super::util::{build_mesh, walk};
use crate::{
    pack_segment, split::split_reference, BvhBuild, BvhParams, Curve, CurveSet, Geometry,
    GeometryData, Mesh, Object, Progress, Reference, PRIMITIVE_CURVE, PRIMITIVE_TRIANGLE,
};

fn contains(outer: BoundBox, point: Vec3) -> bool {
    point.cmpge(outer.min - 1e-5).all() && point.cmple(outer.max + 1e-5).all()
}

fn within(inner: BoundBox, outer: BoundBox) -> bool {
    inner.min.cmpge(outer.min - 1e-5).all() && inner.max.cmple(outer.max + 1e-5).all()
}

#[test]
fn clipped_triangle_stays_within_its_bounds() {
    let verts = [
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(2.0, 1.0, 0.0),
        Vec3::new(0.0, 0.5, 1.0),
    ];
    let mesh = Mesh::new(verts.to_vec(), vec![[0, 1, 2]]);
    let geometries = vec![Geometry::new(GeometryData::Mesh(mesh))];
    let objects = vec![Object::new(0)];
    let progress = Progress::new();
    let build = BvhBuild::new(&objects, &geometries, BvhParams::default(), &progress);

    let mut bounds = BoundBox::EMPTY;
    for vert in verts {
        bounds.grow(vert);
    }
    let reference = Reference::new(bounds, 0, 0, PRIMITIVE_TRIANGLE);

    let (left, right) = split_reference(&build, &reference, 0, 1.0, None);

    // the plane coordinate is pinned and neither half exceeds the original
    assert_eq!(left.bounds().max.x, 1.0);
    assert_eq!(right.bounds().min.x, 1.0);
    assert!(within(left.bounds(), bounds));
    assert!(within(right.bounds(), bounds));

    // together the halves still contain every vertex
    let union = BoundBox::merge(left.bounds(), right.bounds());
    for vert in verts {
        assert!(contains(union, vert));
    }
}

#[test]
fn clipped_curve_segment_interpolates_endpoints() {
    let keys = vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(4.0, 2.0, 0.0)];
    let radius = vec![0.5, 0.5];
    let curves = CurveSet::new(
        keys.clone(),
        radius,
        vec![Curve {
            first_key: 0,
            num_keys: 2,
        }],
    );
    let geometries = vec![Geometry::new(GeometryData::Curves(curves))];
    let objects = vec![Object::new(0)];
    let progress = Progress::new();
    let build = BvhBuild::new(&objects, &geometries, BvhParams::default(), &progress);

    let mut bounds = BoundBox::EMPTY;
    bounds.grow_with_radius(keys[0], 0.5);
    bounds.grow_with_radius(keys[1], 0.5);
    let reference = Reference::new(bounds, 0, 0, pack_segment(PRIMITIVE_CURVE, 0));

    let (left, right) = split_reference(&build, &reference, 0, 2.0, None);

    assert_eq!(left.bounds().max.x, 2.0);
    assert_eq!(right.bounds().min.x, 2.0);
    assert!(within(left.bounds(), bounds));
    assert!(within(right.bounds(), bounds));

    // the interpolated plane crossing point belongs to both halves
    let crossing = Vec3::new(2.0, 1.0, 0.0);
    assert!(contains(left.bounds(), crossing));
    assert!(contains(right.bounds(), crossing));
}

#[test]
fn spatial_build_keeps_every_primitive_covered() {
    // a waffle of long overlapping slabs, the worst case for object
    // splitting and a reliable spatial split trigger
    let mut boxes = Vec::new();
    for i in 0..16 {
        let y = i as f32 * 2.0;
        boxes.push(BoundBox::new(
            Vec3::new(0.0, y, 0.0),
            Vec3::new(32.0, y + 1.0, 1.0),
        ));
    }
    for j in 0..16 {
        let x = j as f32 * 2.0;
        boxes.push(BoundBox::new(
            Vec3::new(x, 0.0, 0.0),
            Vec3::new(x + 1.0, 32.0, 1.0),
        ));
    }

    let params = BvhParams {
        use_spatial_split: true,
        max_triangle_leaf_size: 4,
        ..BvhParams::default()
    };
    let (geometries, objects, bvh) = build_mesh(&boxes, params);

    // duplication may add slots but never loses a primitive
    assert!(bvh.pack.prim_index.len() >= boxes.len());
    let stats = walk(&bvh, &objects, &geometries, false);
    assert!(stats.leaf_counts.iter().all(|&count| count <= 4));

    for prim in 0..boxes.len() as i32 {
        let mut union = BoundBox::EMPTY;
        for (leaf_box, slots) in &stats.leaf_boxes {
            if slots
                .iter()
                .any(|&slot| bvh.pack.prim_index[slot] == prim)
            {
                union.grow_box(*leaf_box);
            }
        }
        // the union of every leaf referencing the primitive still covers it
        assert!(
            within(boxes[prim as usize], union),
            "primitive {prim} is not covered"
        );
    }
}

#[test]
fn disjoint_boxes_produce_no_duplicates() {
    // well separated boxes: the object split separates them cleanly, so
    // the overlap heuristic never evaluates a spatial split
    let boxes: Vec<BoundBox> = (0..64)
        .map(|i| {
            let x = i as f32 * 10.0;
            BoundBox::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0))
        })
        .collect();

    let params = BvhParams {
        use_spatial_split: true,
        ..BvhParams::default()
    };
    let (geometries, objects, bvh) = build_mesh(&boxes, params);

    assert_eq!(bvh.pack.prim_index.len(), 64);
    let stats = walk(&bvh, &objects, &geometries, true);
    assert_eq!(stats.slots.len(), 64);
}

#[test]
fn degenerate_mesh_is_skipped() {
    // a triangle with a non-finite vertex must not poison the build
    let verts = vec![
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(f32::NAN, 0.0, 0.0),
        Vec3::new(3.0, 0.0, 0.0),
        Vec3::new(3.0, 1.0, 0.0),
    ];
    let mesh = Mesh::new(verts, vec![[0, 1, 2], [3, 4, 5]]);
    let geometries = vec![Geometry::new(GeometryData::Mesh(mesh))];
    let objects = vec![Object::new(0)];

    let progress = Progress::new();
    let mut bvh = crate::Bvh2::new(BvhParams::default());
    bvh.build(&objects, &geometries, &progress);

    // only the finite triangle is referenced
    assert_eq!(bvh.pack.prim_index.len(), 1);
    assert_eq!(bvh.pack.prim_index[0], 0);
}
