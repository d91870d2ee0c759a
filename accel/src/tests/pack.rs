use geometry::{Transform, Vec3};

use super::util::{line_boxes, mesh_from_boxes, scattered_boxes, walk};
use crate::{
    Bvh2, BvhParams, Geometry, GeometryData, Object, PointCloud, Progress, BVH_NODE_SIZE,
};

fn build_bottom_level(geometries: &mut [Geometry], params: &BvhParams) {
    for index in 0..geometries.len() {
        if geometries[index].need_build_bvh() {
            let progress = Progress::new();
            let mut bvh = Bvh2::new(params.clone());
            bvh.build(&[Object::new(index)], geometries, &progress);
            geometries[index].bvh = Some(bvh);
        }
    }
}

#[test]
fn instances_share_one_packed_structure() {
    let params = BvhParams::default();

    let mut geometries = vec![
        Geometry::new(GeometryData::Mesh(mesh_from_boxes(&line_boxes(10)))),
        Geometry::new(GeometryData::Mesh(mesh_from_boxes(&scattered_boxes(12, 21)))),
    ];
    geometries[0].prim_offset = 0;
    geometries[1].prim_offset = 10;
    build_bottom_level(&mut geometries, &params);

    // two instances of the first geometry, one of the second
    let mut objects = vec![Object::new(0), Object::new(0), Object::new(1)];
    objects[0].tfm = Transform::translation(Vec3::new(0.0, 0.0, 0.0));
    objects[1].tfm = Transform::translation(Vec3::new(50.0, 0.0, 0.0));
    objects[2].tfm = Transform::translation(Vec3::new(0.0, 50.0, 0.0));

    let top_params = BvhParams {
        top_level: true,
        ..params
    };
    let mut top = Bvh2::new(top_params);
    let progress = Progress::new();
    top.build(&objects, &geometries, &progress);

    // both instances of geometry 0 point at the same sub-structure
    assert_eq!(top.pack.object_node.len(), 3);
    assert_eq!(top.pack.object_node[0], top.pack.object_node[1]);
    assert_ne!(top.pack.object_node[0], top.pack.object_node[2]);

    let g0 = geometries[0].bvh.as_ref().unwrap();
    let g1 = geometries[1].bvh.as_ref().unwrap();

    // merged arrays hold the top level plus one copy of each geometry
    assert_eq!(
        top.pack.prim_index.len(),
        3 + g0.pack.prim_index.len() + g1.pack.prim_index.len()
    );
    let own_nodes =
        top.pack.nodes.len() - g0.pack.nodes.len() - g1.pack.nodes.len();
    assert!(own_nodes >= BVH_NODE_SIZE);
    assert_eq!(own_nodes % BVH_NODE_SIZE, 0);

    // sub-structures land behind the top level arrays in first-use order
    assert_eq!(top.pack.object_node[0], own_nodes as i32);
    assert_eq!(
        top.pack.object_node[2] - top.pack.object_node[0],
        g0.pack.nodes.len() as i32
    );

    // the three object instances pack as negated-index leaves over slots
    // with prim_index -1
    let own_leaves =
        top.pack.leaf_nodes.len() - g0.pack.leaf_nodes.len() - g1.pack.leaf_nodes.len();
    let object_leaves: Vec<_> = top.pack.leaf_nodes[..own_leaves]
        .iter()
        .filter(|data| data.x < 0)
        .collect();
    assert_eq!(object_leaves.len(), 3);
    for data in object_leaves {
        let slot = (!data.x) as usize;
        assert_eq!(top.pack.prim_index[slot], -1);
    }

    // instanced primitive indices were shifted into the global numbering
    let merged_start = 3;
    let g0_prims = &top.pack.prim_index[merged_start..merged_start + g0.pack.prim_index.len()];
    assert!(g0_prims.iter().all(|&prim| (0..10).contains(&prim)));
    let g1_start = merged_start + g0.pack.prim_index.len();
    let g1_prims = &top.pack.prim_index[g1_start..];
    assert!(g1_prims.iter().all(|&prim| (10..22).contains(&prim)));
}

#[test]
fn transform_applied_geometry_is_flattened() {
    let count = 64;
    let mut points = Vec::new();
    let mut radius = Vec::new();
    for i in 0..count {
        points.push(Vec3::new(i as f32, (i % 7) as f32, 0.0));
        radius.push(0.1);
    }

    let mut geom = Geometry::new(GeometryData::Points(PointCloud::new(points, radius)));
    geom.transform_applied = true;
    let geometries = vec![geom];
    let objects = vec![Object::new(0)];

    let params = BvhParams {
        top_level: true,
        ..BvhParams::default()
    };
    let mut top = Bvh2::new(params);
    let progress = Progress::new();
    top.build(&objects, &geometries, &progress);

    // no sub-structure, the points live directly in the top level
    assert_eq!(top.pack.object_node, vec![0]);
    assert!(top.pack.root_index >= 0, "top level keeps an inner root");

    let stats = walk(&top, &objects, &geometries, true);
    assert_eq!(stats.slots.len(), count);
}
