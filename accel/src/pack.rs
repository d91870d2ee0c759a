use std::collections::HashMap;

use geometry::{BoundBox, IVec4, Transform, Vec4};

use crate::{
    build::BvhBuild,
    node::{BuildNode, LeafNode},
    params::{unpack_segment, BvhParams, PRIMITIVE_CURVE, PRIMITIVE_POINT},
    progress::Progress,
    scene::{Geometry, GeometryData, Object},
    unaligned::UnalignedHeuristic,
};

/// Packed size of an axis aligned inner node, in IVec4 words
pub const BVH_NODE_SIZE: usize = 4;

/// Packed size of an orientation fitted inner node, in IVec4 words
pub const BVH_UNALIGNED_NODE_SIZE: usize = 7;

/// Packed size of a leaf node, in IVec4 words
pub const BVH_NODE_LEAF_SIZE: usize = 1;

/// Visibility bit flagging a packed inner node as orientation fitted
pub const VISIBILITY_NODE_UNALIGNED: u32 = 1 << 31;

/// The structure as consumed by traversal: flat node and leaf arrays plus
/// per-packed-slot primitive identity.  Slots are indexed by packed
/// position rather than original reference index, since spatial splits can
/// duplicate a primitive into multiple slots.
///
/// An inner node is 4 words: `[visibility0, visibility1, child0, child1]`
/// then the x, y and z rows of both child boxes as float bits, interleaved
/// `min0, min1, max0, max1`.  Orientation fitted nodes are 7 words: the
/// header then three transform rows per child.  Child indices are negated
/// (`!index`) when they point into the leaf array.  A leaf is one word:
/// `[lo, hi, visibility, prim_type]`, or `[!prim, 0, ...]` for a leaf
/// holding a single object instance.
#[derive(Debug, Default, Clone)]
pub struct PackedBvh {
    pub nodes: Vec<IVec4>,
    pub leaf_nodes: Vec<IVec4>,
    /// Object index to node index mapping for instances
    pub object_node: Vec<i32>,
    pub prim_type: Vec<i32>,
    /// Primitive index within its geometry, -1 for object instances
    pub prim_index: Vec<i32>,
    pub prim_object: Vec<i32>,
    pub prim_visibility: Vec<u32>,
    pub prim_time: Vec<[f32; 2]>,
    /// Traversal entry point, -1 when the whole structure is one leaf
    pub root_index: i32,
}

/// A node about to be packed, with the array offset it was assigned
struct StackEntry<'a> {
    node: &'a BuildNode,
    idx: i32,
}

impl<'a> StackEntry<'a> {
    fn new(node: &'a BuildNode, idx: i32) -> Self {
        Self { node, idx }
    }

    fn encoded_idx(&self) -> i32 {
        if self.node.is_leaf() {
            !self.idx
        } else {
            self.idx
        }
    }
}

fn float4_as_ivec4(v: Vec4) -> IVec4 {
    IVec4::new(
        v.x.to_bits() as i32,
        v.y.to_bits() as i32,
        v.z.to_bits() as i32,
        v.w.to_bits() as i32,
    )
}

/// A built structure: the packed arrays plus the parameters they were
/// built with.  Owned long-term by the geometry or scene it accelerates
/// and either replaced wholesale (rebuild) or updated in place (refit).
#[derive(Debug, Default, Clone)]
pub struct Bvh2 {
    pub params: BvhParams,
    pub pack: PackedBvh,
}

impl Bvh2 {
    pub fn new(params: BvhParams) -> Self {
        Self {
            params,
            pack: PackedBvh::default(),
        }
    }

    /// Run a full build.  On cancellation the packed arrays are left empty
    /// and the caller keeps whatever structure it had before.
    pub fn build(&mut self, objects: &[Object], geometries: &[Geometry], progress: &Progress) {
        progress.set_substatus("Building BVH");

        let builder = BvhBuild::new(objects, geometries, self.params.clone(), progress);
        let (root, output) = builder.run();

        self.pack = PackedBvh::default();
        let Some(root) = root else {
            return;
        };

        self.pack.prim_type = output.prim_type;
        self.pack.prim_index = output.prim_index;
        self.pack.prim_object = output.prim_object;
        self.pack.prim_time = output.prim_time;

        progress.set_substatus("Packing BVH triangles and strands");
        self.pack_primitives(objects);

        if progress.is_canceled() {
            return;
        }

        progress.set_substatus("Packing BVH nodes");
        self.pack_nodes(&root, objects, geometries);
    }

    /// Per packed slot visibility, derived from the owning objects
    fn pack_primitives(&mut self, objects: &[Object]) {
        let count = self.pack.prim_index.len();
        self.pack.prim_visibility.clear();
        self.pack.prim_visibility.resize(count, 0);

        for i in 0..count {
            if self.pack.prim_index[i] != -1 {
                let object = &objects[self.pack.prim_object[i] as usize];
                self.pack.prim_visibility[i] = object.visibility_for_tracing();
            }
        }
    }

    /// Flatten the transient tree into the packed arrays.  Offsets are
    /// assigned depth first with an explicit stack; the size of every inner
    /// node depends on whether its children carry orientation frames.
    fn pack_nodes(&mut self, root: &BuildNode, objects: &[Object], geometries: &[Geometry]) {
        let num_nodes = root.num_nodes();
        let num_leaf_nodes = root.num_leaf_nodes();
        assert!(num_leaf_nodes <= num_nodes);
        let num_inner_nodes = num_nodes - num_leaf_nodes;

        let node_size = if self.params.use_unaligned_nodes {
            let num_unaligned = root.num_unaligned_inner();
            num_unaligned * BVH_UNALIGNED_NODE_SIZE
                + (num_inner_nodes - num_unaligned) * BVH_NODE_SIZE
        } else {
            num_inner_nodes * BVH_NODE_SIZE
        };

        self.pack.nodes.clear();
        self.pack.leaf_nodes.clear();

        // for a top level structure, merge the existing bottom level
        // structures first so the offsets are known
        if self.params.top_level {
            self.pack_instances(
                node_size,
                num_leaf_nodes * BVH_NODE_LEAF_SIZE,
                objects,
                geometries,
            );
        } else {
            self.pack.nodes.resize(node_size, IVec4::ZERO);
            self.pack
                .leaf_nodes
                .resize(num_leaf_nodes * BVH_NODE_LEAF_SIZE, IVec4::ZERO);
        }

        let mut next_node_idx = 0_i32;
        let mut next_leaf_idx = 0_i32;

        let mut stack: Vec<StackEntry<'_>> = Vec::with_capacity(BvhParams::MAX_DEPTH * 2);
        if root.is_leaf() {
            stack.push(StackEntry::new(root, next_leaf_idx));
            next_leaf_idx += BVH_NODE_LEAF_SIZE as i32;
        } else {
            stack.push(StackEntry::new(root, next_node_idx));
            next_node_idx += if root.has_unaligned() {
                BVH_UNALIGNED_NODE_SIZE
            } else {
                BVH_NODE_SIZE
            } as i32;
        }

        while let Some(entry) = stack.pop() {
            match entry.node {
                BuildNode::Leaf(leaf) => self.pack_leaf(&entry, leaf),
                BuildNode::Inner(inner) => {
                    let mut idx = [0_i32; 2];
                    for (i, child) in inner.children.iter().enumerate() {
                        if child.is_leaf() {
                            idx[i] = next_leaf_idx;
                            next_leaf_idx += BVH_NODE_LEAF_SIZE as i32;
                        } else {
                            idx[i] = next_node_idx;
                            next_node_idx += if child.has_unaligned() {
                                BVH_UNALIGNED_NODE_SIZE
                            } else {
                                BVH_NODE_SIZE
                            } as i32;
                        }
                    }

                    let e0 = StackEntry::new(&inner.children[0], idx[0]);
                    let e1 = StackEntry::new(&inner.children[1], idx[1]);
                    self.pack_inner(&entry, &e0, &e1);
                    stack.push(e0);
                    stack.push(e1);
                }
            }
        }

        // the precomputed size and the emitted size must agree, anything
        // else is a builder/packer bug
        assert_eq!(
            node_size as i32, next_node_idx,
            "packed node size does not match precomputed size"
        );

        // root index to start traversal at, to handle the single leaf case
        self.pack.root_index = if root.is_leaf() { -1 } else { 0 };
    }

    fn pack_leaf(&mut self, entry: &StackEntry<'_>, leaf: &LeafNode) {
        let mut data = IVec4::ZERO;
        if leaf.num_prims() == 1 && self.pack.prim_index[leaf.lo as usize] == -1 {
            // object instance leaf
            data.x = !leaf.lo;
            data.y = 0;
        } else {
            data.x = leaf.lo;
            data.y = leaf.hi;
        }
        data.z = leaf.visibility as i32;
        if leaf.num_prims() != 0 {
            data.w = self.pack.prim_type[leaf.lo as usize];
        }

        self.pack.leaf_nodes[entry.idx as usize] = data;
    }

    fn pack_inner(&mut self, entry: &StackEntry<'_>, e0: &StackEntry<'_>, e1: &StackEntry<'_>) {
        if e0.node.is_unaligned() || e1.node.is_unaligned() {
            self.pack_unaligned_node(
                entry.idx,
                e0.node.aligned_space(),
                e1.node.aligned_space(),
                e0.node.bounds(),
                e1.node.bounds(),
                e0.encoded_idx(),
                e1.encoded_idx(),
                e0.node.visibility(),
                e1.node.visibility(),
            );
        } else {
            self.pack_aligned_node(
                entry.idx,
                e0.node.bounds(),
                e1.node.bounds(),
                e0.encoded_idx(),
                e1.encoded_idx(),
                e0.node.visibility(),
                e1.node.visibility(),
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn pack_aligned_node(
        &mut self,
        idx: i32,
        b0: BoundBox,
        b1: BoundBox,
        c0: i32,
        c1: i32,
        visibility0: u32,
        visibility1: u32,
    ) {
        assert!(idx as usize + BVH_NODE_SIZE <= self.pack.nodes.len());
        assert!(c0 < 0 || (c0 as usize) < self.pack.nodes.len());
        assert!(c1 < 0 || (c1 as usize) < self.pack.nodes.len());

        let data = [
            IVec4::new(
                (visibility0 & !VISIBILITY_NODE_UNALIGNED) as i32,
                (visibility1 & !VISIBILITY_NODE_UNALIGNED) as i32,
                c0,
                c1,
            ),
            IVec4::new(
                b0.min.x.to_bits() as i32,
                b1.min.x.to_bits() as i32,
                b0.max.x.to_bits() as i32,
                b1.max.x.to_bits() as i32,
            ),
            IVec4::new(
                b0.min.y.to_bits() as i32,
                b1.min.y.to_bits() as i32,
                b0.max.y.to_bits() as i32,
                b1.max.y.to_bits() as i32,
            ),
            IVec4::new(
                b0.min.z.to_bits() as i32,
                b1.min.z.to_bits() as i32,
                b0.max.z.to_bits() as i32,
                b1.max.z.to_bits() as i32,
            ),
        ];

        self.pack.nodes[idx as usize..idx as usize + BVH_NODE_SIZE].copy_from_slice(&data);
    }

    #[allow(clippy::too_many_arguments)]
    fn pack_unaligned_node(
        &mut self,
        idx: i32,
        aligned_space0: Transform,
        aligned_space1: Transform,
        b0: BoundBox,
        b1: BoundBox,
        c0: i32,
        c1: i32,
        visibility0: u32,
        visibility1: u32,
    ) {
        assert!(idx as usize + BVH_UNALIGNED_NODE_SIZE <= self.pack.nodes.len());
        assert!(c0 < 0 || (c0 as usize) < self.pack.nodes.len());
        assert!(c1 < 0 || (c1 as usize) < self.pack.nodes.len());

        let space0 = UnalignedHeuristic::compute_node_transform(b0, aligned_space0);
        let space1 = UnalignedHeuristic::compute_node_transform(b1, aligned_space1);

        let data = [
            IVec4::new(
                (visibility0 | VISIBILITY_NODE_UNALIGNED) as i32,
                (visibility1 | VISIBILITY_NODE_UNALIGNED) as i32,
                c0,
                c1,
            ),
            float4_as_ivec4(space0.x),
            float4_as_ivec4(space0.y),
            float4_as_ivec4(space0.z),
            float4_as_ivec4(space1.x),
            float4_as_ivec4(space1.y),
            float4_as_ivec4(space1.z),
        ];

        self.pack.nodes[idx as usize..idx as usize + BVH_UNALIGNED_NODE_SIZE]
            .copy_from_slice(&data);
    }

    /* Refitting */

    /// Update every box in place after positions changed but topology did
    /// not.  Not supported for top level structures, those always rebuild.
    pub fn refit(&mut self, objects: &[Object], geometries: &[Geometry], progress: &Progress) {
        assert!(
            !self.params.top_level,
            "top level structures are rebuilt, not refit"
        );

        progress.set_substatus("Packing BVH primitives");
        self.pack_primitives(objects);

        if progress.is_canceled() {
            return;
        }

        progress.set_substatus("Refitting BVH nodes");
        self.refit_nodes(objects, geometries);
    }

    /// Post-order walk over the packed arrays with an explicit stack, the
    /// tree can be as deep as the build depth cap allows
    fn refit_nodes(&mut self, objects: &[Object], geometries: &[Geometry]) {
        if self.pack.leaf_nodes.is_empty() {
            return;
        }

        struct RefitEntry {
            idx: i32,
            leaf: bool,
            expanded: bool,
        }

        let mut stack = vec![RefitEntry {
            idx: 0,
            leaf: self.pack.root_index == -1,
            expanded: false,
        }];
        let mut results: Vec<(BoundBox, u32)> = Vec::new();

        while let Some(entry) = stack.pop() {
            if entry.leaf {
                let data = self.pack.leaf_nodes[entry.idx as usize];
                let (bounds, visibility) =
                    self.refit_primitives(data.x, data.y, objects, geometries);
                self.pack.leaf_nodes[entry.idx as usize] =
                    IVec4::new(data.x, data.y, visibility as i32, data.w);
                results.push((bounds, visibility));
            } else if !entry.expanded {
                stack.push(RefitEntry {
                    expanded: true,
                    ..entry
                });
                let data = self.pack.nodes[entry.idx as usize];
                for child in [data.z, data.w] {
                    stack.push(RefitEntry {
                        idx: if child < 0 { !child } else { child },
                        leaf: child < 0,
                        expanded: false,
                    });
                }
            } else {
                let r0 = results.pop().unwrap();
                let r1 = results.pop().unwrap();

                let data = self.pack.nodes[entry.idx as usize];
                let is_unaligned = (data.x as u32) & VISIBILITY_NODE_UNALIGNED != 0;
                if is_unaligned {
                    // the original orientation frame is gone after a refit,
                    // fall back to identity spaces around the new boxes
                    self.pack_unaligned_node(
                        entry.idx,
                        Transform::IDENTITY,
                        Transform::IDENTITY,
                        r0.0,
                        r1.0,
                        data.z,
                        data.w,
                        r0.1,
                        r1.1,
                    );
                } else {
                    self.pack_aligned_node(entry.idx, r0.0, r1.0, data.z, data.w, r0.1, r1.1);
                }

                results.push((BoundBox::merge(r0.0, r1.0), r0.1 | r1.1));
            }
        }
    }

    /// Recompute the bounds of a packed primitive slot range from the
    /// current geometry positions, motion keyframes included
    fn refit_primitives(
        &self,
        start: i32,
        end: i32,
        objects: &[Object],
        geometries: &[Geometry],
    ) -> (BoundBox, u32) {
        let mut bounds = BoundBox::EMPTY;
        let mut visibility = 0;

        for prim in start..end {
            let prim_index = self.pack.prim_index[prim as usize];
            let object = &objects[self.pack.prim_object[prim as usize] as usize];
            assert!(
                prim_index != -1,
                "object instances only appear in top level structures"
            );

            let prim_type = self.pack.prim_type[prim as usize];
            match &geometries[object.geometry].data {
                GeometryData::Mesh(mesh) => {
                    mesh.grow_triangle_bounds(prim_index as usize, &mut bounds);
                }
                GeometryData::Curves(curves) => {
                    debug_assert!(prim_type & PRIMITIVE_CURVE != 0);
                    curves.grow_segment_bounds(
                        prim_index as usize,
                        unpack_segment(prim_type) as usize,
                        &mut bounds,
                    );
                }
                GeometryData::Points(points) => {
                    debug_assert!(prim_type & PRIMITIVE_POINT != 0);
                    points.grow_point_bounds(prim_index as usize, &mut bounds);
                }
            }
            visibility |= object.visibility_for_tracing();
        }

        (bounds, visibility)
    }

    /* Instance merge */

    /// Concatenate every instanced geometry's packed structure behind this
    /// top level one, rewriting child and primitive indices by the running
    /// offsets.  Geometry shared by several objects is emitted once and the
    /// objects' entries point at the same offset.
    fn pack_instances(
        &mut self,
        nodes_size: usize,
        leaf_nodes_size: usize,
        objects: &[Object],
        geometries: &[Geometry],
    ) {
        // adjust our own primitive indices to point into the scene global
        // primitive numbering, for geometry flattened into the top level
        for i in 0..self.pack.prim_index.len() {
            if self.pack.prim_index[i] != -1 {
                let geom = objects[self.pack.prim_object[i] as usize].geometry;
                self.pack.prim_index[i] += geometries[geom].prim_offset as i32;
            }
        }

        // track offsets of instanced structure data in the global arrays
        let mut prim_offset = self.pack.prim_index.len();
        let mut nodes_offset = nodes_size;
        let mut nodes_leaf_offset = leaf_nodes_size;

        self.pack.object_node.clear();

        // size the merged arrays, counting shared geometry only once
        let mut prim_index_size = self.pack.prim_index.len();
        let mut total_nodes_size = nodes_size;
        let mut total_leaf_size = leaf_nodes_size;

        let mut seen = vec![false; geometries.len()];
        for object in objects {
            let geom = &geometries[object.geometry];
            if geom.need_build_bvh() && !seen[object.geometry] {
                seen[object.geometry] = true;
                let bvh = geom
                    .bvh
                    .as_ref()
                    .expect("instanced geometry must own a packed structure");
                prim_index_size += bvh.pack.prim_index.len();
                total_nodes_size += bvh.pack.nodes.len();
                total_leaf_size += bvh.pack.leaf_nodes.len();
            }
        }

        self.pack.prim_index.resize(prim_index_size, 0);
        self.pack.prim_type.resize(prim_index_size, 0);
        self.pack.prim_object.resize(prim_index_size, 0);
        self.pack.prim_visibility.resize(prim_index_size, 0);
        self.pack.nodes.resize(total_nodes_size, IVec4::ZERO);
        self.pack.leaf_nodes.resize(total_leaf_size, IVec4::ZERO);
        self.pack.object_node.resize(objects.len(), 0);

        let need_prim_time = self.params.use_motion_steps();
        if need_prim_time {
            self.pack.prim_time.resize(prim_index_size, [0.0, 1.0]);
        }

        let mut prim_write = prim_offset;
        let mut node_write = nodes_size;
        let mut leaf_write = leaf_nodes_size;

        let mut geometry_map: HashMap<usize, i32> = HashMap::new();

        // merge
        for (object_index, object) in objects.iter().enumerate() {
            let geom = &geometries[object.geometry];

            // flattened geometry is already part of the top level arrays
            if !geom.need_build_bvh() {
                self.pack.object_node[object_index] = 0;
                continue;
            }

            // geometry added once already, reuse its node offset
            if let Some(&offset) = geometry_map.get(&object.geometry) {
                self.pack.object_node[object_index] = offset;
                continue;
            }

            let bvh = geom.bvh.as_ref().unwrap();
            let noffset = nodes_offset as i32;
            let noffset_leaf = nodes_leaf_offset as i32;
            let geom_prim_offset = geom.prim_offset as i32;

            let entry = if bvh.pack.root_index == -1 {
                -noffset_leaf - 1
            } else {
                noffset
            };
            self.pack.object_node[object_index] = entry;
            geometry_map.insert(object.geometry, entry);

            // merge primitive identity arrays
            for i in 0..bvh.pack.prim_index.len() {
                self.pack.prim_index[prim_write] = bvh.pack.prim_index[i] + geom_prim_offset;
                self.pack.prim_type[prim_write] = bvh.pack.prim_type[i];
                self.pack.prim_visibility[prim_write] = bvh.pack.prim_visibility[i];
                self.pack.prim_object[prim_write] = 0; // unused for instances
                if need_prim_time {
                    self.pack.prim_time[prim_write] =
                        bvh.pack.prim_time.get(i).copied().unwrap_or([0.0, 1.0]);
                }
                prim_write += 1;
            }

            // merge leaf nodes, shifting primitive slot ranges
            for i in 0..bvh.pack.leaf_nodes.len() {
                let mut data = bvh.pack.leaf_nodes[i];
                data.x += prim_offset as i32;
                data.y += prim_offset as i32;
                self.pack.leaf_nodes[leaf_write] = data;
                leaf_write += 1;
            }

            // merge nodes, rewriting child indices by the destination
            // offsets; negated leaf indices shift by the leaf offset
            let mut i = 0;
            while i < bvh.pack.nodes.len() {
                let mut data = bvh.pack.nodes[i];
                let size = if (data.x as u32) & VISIBILITY_NODE_UNALIGNED != 0 {
                    BVH_UNALIGNED_NODE_SIZE
                } else {
                    BVH_NODE_SIZE
                };

                data.z += if data.z < 0 { -noffset_leaf } else { noffset };
                data.w += if data.w < 0 { -noffset_leaf } else { noffset };
                self.pack.nodes[node_write] = data;
                for j in 1..size {
                    self.pack.nodes[node_write + j] = bvh.pack.nodes[i + j];
                }

                node_write += size;
                i += size;
            }

            nodes_offset += bvh.pack.nodes.len();
            nodes_leaf_offset += bvh.pack.leaf_nodes.len();
            prim_offset += bvh.pack.prim_index.len();
        }
    }
}
