use geometry::{BoundBox, Vec3};

use crate::{
    Bvh2, BvhParams, Geometry, GeometryData, Mesh, Object, PackedBvh, Progress,
    VISIBILITY_NODE_UNALIGNED,
};

/// One triangle per box, with the triangle's bounds exactly equal to the box
pub fn mesh_from_boxes(boxes: &[BoundBox]) -> Mesh {
    let mut verts = Vec::with_capacity(boxes.len() * 3);
    let mut triangles = Vec::with_capacity(boxes.len());

    for (i, b) in boxes.iter().enumerate() {
        verts.push(b.min);
        verts.push(Vec3::new(b.max.x, b.max.y, b.min.z));
        verts.push(Vec3::new(b.min.x, b.max.y, b.max.z));
        let v = (i * 3) as u32;
        triangles.push([v, v + 1, v + 2]);
    }

    Mesh::new(verts, triangles)
}

/// Adjacent unit boxes along the x axis
pub fn line_boxes(count: usize) -> Vec<BoundBox> {
    (0..count)
        .map(|i| {
            BoundBox::new(
                Vec3::new(i as f32, 0.0, 0.0),
                Vec3::new(i as f32 + 1.0, 1.0, 1.0),
            )
        })
        .collect()
}

fn lcg_next(state: &mut u64) -> f32 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    ((*state >> 40) as f32 / (1_u64 << 24) as f32) * 2.0 - 1.0
}

/// Deterministic pseudo-random boxes of varying position and extent
pub fn scattered_boxes(count: usize, seed: u64) -> Vec<BoundBox> {
    let mut state = seed | 1;
    (0..count)
        .map(|_| {
            let center = Vec3::new(
                10.0 * lcg_next(&mut state),
                10.0 * lcg_next(&mut state),
                10.0 * lcg_next(&mut state),
            );
            let half = Vec3::new(
                0.1 + lcg_next(&mut state).abs(),
                0.1 + lcg_next(&mut state).abs(),
                0.1 + lcg_next(&mut state).abs(),
            );
            BoundBox::new(center - half, center + half)
        })
        .collect()
}

/// Build a single-mesh scene and return everything a test needs to inspect
pub fn build_mesh(boxes: &[BoundBox], params: BvhParams) -> (Vec<Geometry>, Vec<Object>, Bvh2) {
    let geometries = vec![Geometry::new(GeometryData::Mesh(mesh_from_boxes(boxes)))];
    let objects = vec![Object::new(0)];
    let progress = Progress::new();
    let mut bvh = Bvh2::new(params);
    bvh.build(&objects, &geometries, &progress);
    (geometries, objects, bvh)
}

fn bits(word: i32) -> f32 {
    f32::from_bits(word as u32)
}

/// Decode an aligned inner node into its two child boxes and indices
pub fn decode_aligned(pack: &PackedBvh, idx: usize) -> (BoundBox, BoundBox, i32, i32) {
    let header = pack.nodes[idx];
    assert_eq!(
        (header.x as u32) & VISIBILITY_NODE_UNALIGNED,
        0,
        "expected an axis aligned node"
    );
    let x = pack.nodes[idx + 1];
    let y = pack.nodes[idx + 2];
    let z = pack.nodes[idx + 3];

    let b0 = BoundBox::new(
        Vec3::new(bits(x.x), bits(y.x), bits(z.x)),
        Vec3::new(bits(x.z), bits(y.z), bits(z.z)),
    );
    let b1 = BoundBox::new(
        Vec3::new(bits(x.y), bits(y.y), bits(z.y)),
        Vec3::new(bits(x.w), bits(y.w), bits(z.w)),
    );
    (b0, b1, header.z, header.w)
}

/// Bounds of one packed primitive slot, recomputed from the geometry
pub fn slot_bounds(
    pack: &PackedBvh,
    slot: usize,
    objects: &[Object],
    geometries: &[Geometry],
) -> BoundBox {
    let prim_index = pack.prim_index[slot];
    let object = &objects[pack.prim_object[slot] as usize];
    assert_ne!(prim_index, -1, "slot_bounds used on an object instance");

    let mut bounds = BoundBox::EMPTY;
    match &geometries[object.geometry].data {
        GeometryData::Mesh(mesh) => mesh.grow_triangle_bounds(prim_index as usize, &mut bounds),
        GeometryData::Curves(curves) => curves.grow_segment_bounds(
            prim_index as usize,
            crate::unpack_segment(pack.prim_type[slot]) as usize,
            &mut bounds,
        ),
        GeometryData::Points(points) => points.grow_point_bounds(prim_index as usize, &mut bounds),
    }
    bounds
}

pub fn assert_box_eq(a: BoundBox, b: BoundBox) {
    if !a.valid() && !b.valid() {
        return;
    }
    assert!(
        (a.min - b.min).length() < 1e-5 && (a.max - b.max).length() < 1e-5,
        "{a:?} != {b:?}"
    );
}

#[derive(Debug, Default)]
pub struct WalkStats {
    pub root_bounds: BoundBox,
    pub leaf_counts: Vec<usize>,
    pub slots: Vec<usize>,
    /// Stored box of every leaf together with the slots it owns
    pub leaf_boxes: Vec<(BoundBox, Vec<usize>)>,
}

/// Walk a packed single-geometry structure, asserting that every inner
/// node's child boxes match the union of that child's own children and
/// (when `strict_leaves` is set) that leaf boxes equal the union of their
/// primitives' bounds.
pub fn walk(
    bvh: &Bvh2,
    objects: &[Object],
    geometries: &[Geometry],
    strict_leaves: bool,
) -> WalkStats {
    let mut stats = WalkStats {
        root_bounds: BoundBox::EMPTY,
        ..WalkStats::default()
    };

    stats.root_bounds = if bvh.pack.root_index < 0 {
        let computed = walk_leaf(&bvh.pack, 0, objects, geometries, &mut stats);
        let slots = stats.slots.clone();
        stats.leaf_boxes.push((computed, slots));
        computed
    } else {
        walk_inner(
            &bvh.pack,
            bvh.pack.root_index as usize,
            objects,
            geometries,
            strict_leaves,
            &mut stats,
        )
    };
    stats
}

fn walk_inner(
    pack: &PackedBvh,
    idx: usize,
    objects: &[Object],
    geometries: &[Geometry],
    strict_leaves: bool,
    stats: &mut WalkStats,
) -> BoundBox {
    let (b0, b1, c0, c1) = decode_aligned(pack, idx);
    walk_child(pack, c0, b0, objects, geometries, strict_leaves, stats);
    walk_child(pack, c1, b1, objects, geometries, strict_leaves, stats);
    BoundBox::merge(b0, b1)
}

fn walk_child(
    pack: &PackedBvh,
    child: i32,
    stored: BoundBox,
    objects: &[Object],
    geometries: &[Geometry],
    strict_leaves: bool,
    stats: &mut WalkStats,
) {
    if child < 0 {
        let before = stats.slots.len();
        let computed = walk_leaf(pack, (!child) as usize, objects, geometries, stats);
        let slots = stats.slots[before..].to_vec();
        stats.leaf_boxes.push((stored, slots));
        if strict_leaves {
            assert_box_eq(stored, computed);
        }
    } else {
        let computed = walk_inner(
            pack,
            child as usize,
            objects,
            geometries,
            strict_leaves,
            stats,
        );
        // an inner node's box is exactly the union of its children
        assert_box_eq(stored, computed);
    }
}

fn walk_leaf(
    pack: &PackedBvh,
    idx: usize,
    objects: &[Object],
    geometries: &[Geometry],
    stats: &mut WalkStats,
) -> BoundBox {
    let data = pack.leaf_nodes[idx];
    if data.x < 0 {
        // single object instance leaf
        let slot = (!data.x) as usize;
        stats.leaf_counts.push(1);
        stats.slots.push(slot);
        let object = &objects[pack.prim_object[slot] as usize];
        return object.bounds(geometries);
    }

    let (lo, hi) = (data.x as usize, data.y as usize);
    stats.leaf_counts.push(hi - lo);

    let mut bounds = BoundBox::EMPTY;
    for slot in lo..hi {
        stats.slots.push(slot);
        bounds.grow_box(slot_bounds(pack, slot, objects, geometries));
    }
    bounds
}
