use std::sync::Mutex;

use geometry::{BoundBox, Vec3};

use crate::{
    binning::ObjectBinning,
    node::BuildNode,
    params::{
        pack_segment, BvhParams, PRIMITIVE_CURVE, PRIMITIVE_MOTION, PRIMITIVE_NONE,
        PRIMITIVE_POINT, PRIMITIVE_TRIANGLE,
    },
    progress::Progress,
    reference::{Range, Reference},
    scene::{CurveSet, Geometry, GeometryData, Mesh, Object, PointCloud},
    split::{MixedSplit, SpatialStorage},
    unaligned::UnalignedHeuristic,
};

/// Ranges below this size are recursed in the calling task; above it one
/// child is handed to the worker pool, so scheduling overhead never
/// dominates tiny partitions
const THREAD_TASK_SIZE: usize = 4096;

/// Identity arrays describing every packed primitive slot, filled while the
/// builder emits leaves.  Slots are claimed through `free_index` under the
/// build's output lock since spatial splits make the final count unknown up
/// front.
#[derive(Debug, Default)]
pub struct BuildOutput {
    pub prim_type: Vec<i32>,
    pub prim_index: Vec<i32>,
    pub prim_object: Vec<i32>,
    pub prim_time: Vec<[f32; 2]>,
    pub free_index: usize,
}

/// Recursive construction core: collects primitive references, partitions
/// them by SAH cost into a transient binary tree, and fills the packed
/// primitive identity arrays as leaves are emitted.
pub struct BvhBuild<'a> {
    objects: &'a [Object],
    geometries: &'a [Geometry],
    pub(crate) params: BvhParams,
    progress: &'a Progress,
    unaligned_heuristic: UnalignedHeuristic<'a>,
    need_prim_time: bool,
    spatial_min_overlap: f32,
    out: Mutex<BuildOutput>,
}

impl<'a> BvhBuild<'a> {
    pub fn new(
        objects: &'a [Object],
        geometries: &'a [Geometry],
        params: BvhParams,
        progress: &'a Progress,
    ) -> Self {
        let need_prim_time = params.use_motion_steps();
        Self {
            objects,
            geometries,
            params,
            progress,
            unaligned_heuristic: UnalignedHeuristic::new(objects, geometries),
            need_prim_time,
            spatial_min_overlap: 0.0,
            out: Mutex::new(BuildOutput::default()),
        }
    }

    pub(crate) fn objects(&self) -> &[Object] {
        self.objects
    }

    pub(crate) fn geometries(&self) -> &[Geometry] {
        self.geometries
    }

    pub(crate) fn spatial_min_overlap(&self) -> f32 {
        self.spatial_min_overlap
    }

    /// Run the build.  Returns the transient tree root, or `None` when the
    /// build was canceled, along with the primitive identity arrays.
    pub fn run(mut self) -> (Option<BuildNode>, BuildOutput) {
        let mut references = Vec::new();
        let root = self.add_references(&mut references);

        if self.progress.is_canceled() {
            return (None, self.out.into_inner().unwrap());
        }

        self.spatial_min_overlap = root.bounds().safe_area() * self.params.spatial_split_alpha;
        {
            let mut out = self.out.lock().unwrap();
            out.prim_type.reserve(references.len());
            out.prim_index.reserve(references.len());
            out.prim_object.reserve(references.len());
            if self.need_prim_time {
                out.prim_time.reserve(references.len());
            }
        }
        self.progress.set_total(references.len());

        let root_node = if self.params.use_spatial_split {
            let mut storage = SpatialStorage::default();
            self.build_spatial_node(root, &mut references, 0, &mut storage)
        } else {
            let binning = ObjectBinning::new(root, &references);
            self.build_binned_node(binning, &mut references, 0)
        };

        let root_node = match root_node {
            Some(node) if !self.progress.is_canceled() => {
                let mut node = *node;
                // cheap local optimization pass over the finished topology
                node.rotate(4, 5);
                Some(node)
            }
            _ => None,
        };

        (root_node, self.out.into_inner().unwrap())
    }

    /* Reference collection */

    fn add_references(&self, refs: &mut Vec<Reference>) -> Range {
        // reserve space for references
        let mut num_alloc = 0;
        for object in self.objects {
            let geom = &self.geometries[object.geometry];
            if self.params.top_level && geom.need_build_bvh() {
                num_alloc += 1;
            } else {
                num_alloc += geom.num_primitives();
            }
        }
        refs.reserve(num_alloc);

        let mut bounds = BoundBox::EMPTY;
        let mut center = BoundBox::EMPTY;
        for (index, object) in self.objects.iter().enumerate() {
            if self.params.top_level {
                let geom = &self.geometries[object.geometry];
                if geom.need_build_bvh() {
                    self.add_reference_object(&mut bounds, &mut center, refs, object, index);
                } else {
                    self.add_reference_geometry(&mut bounds, &mut center, refs, geom, index);
                }
            } else {
                let geom = &self.geometries[object.geometry];
                self.add_reference_geometry(&mut bounds, &mut center, refs, geom, index);
            }
        }

        // happens mostly on empty meshes
        if !bounds.valid() {
            bounds.grow(Vec3::ZERO);
        }

        Range::with_centroids(bounds, center, 0, refs.len())
    }

    fn add_reference_geometry(
        &self,
        bounds: &mut BoundBox,
        center: &mut BoundBox,
        refs: &mut Vec<Reference>,
        geom: &Geometry,
        object_index: usize,
    ) {
        match &geom.data {
            GeometryData::Mesh(mesh) => {
                self.add_reference_triangles(bounds, center, refs, mesh, object_index);
            }
            GeometryData::Curves(curves) => {
                self.add_reference_curves(bounds, center, refs, curves, object_index);
            }
            GeometryData::Points(points) => {
                self.add_reference_points(bounds, center, refs, points, object_index);
            }
        }
    }

    fn add_reference_triangles(
        &self,
        bounds: &mut BoundBox,
        center: &mut BoundBox,
        refs: &mut Vec<Reference>,
        mesh: &Mesh,
        object_index: usize,
    ) {
        let prim_type = if mesh.use_motion_blur() {
            PRIMITIVE_TRIANGLE | PRIMITIVE_MOTION
        } else {
            PRIMITIVE_TRIANGLE
        };

        for prim in 0..mesh.num_triangles() {
            let mut prim_bounds = BoundBox::EMPTY;
            mesh.grow_triangle_bounds(prim, &mut prim_bounds);
            if prim_bounds.valid() && mesh.triangle_valid(prim) {
                refs.push(Reference::new(
                    prim_bounds,
                    prim as i32,
                    object_index as i32,
                    prim_type,
                ));
                bounds.grow_box(prim_bounds);
                center.grow(prim_bounds.center2());
            }
        }
    }

    fn add_reference_curves(
        &self,
        bounds: &mut BoundBox,
        center: &mut BoundBox,
        refs: &mut Vec<Reference>,
        curves: &CurveSet,
        object_index: usize,
    ) {
        let base_type = if curves.use_motion_blur() {
            PRIMITIVE_CURVE | PRIMITIVE_MOTION
        } else {
            PRIMITIVE_CURVE
        };

        for (curve_index, curve) in curves.curves.iter().enumerate() {
            for segment in 0..curve.num_segments() {
                let mut prim_bounds = BoundBox::EMPTY;
                curves.grow_segment_bounds(curve_index, segment, &mut prim_bounds);
                if prim_bounds.valid() {
                    refs.push(Reference::new(
                        prim_bounds,
                        curve_index as i32,
                        object_index as i32,
                        pack_segment(base_type, segment as i32),
                    ));
                    bounds.grow_box(prim_bounds);
                    center.grow(prim_bounds.center2());
                }
            }
        }
    }

    fn add_reference_points(
        &self,
        bounds: &mut BoundBox,
        center: &mut BoundBox,
        refs: &mut Vec<Reference>,
        points: &PointCloud,
        object_index: usize,
    ) {
        let prim_type = if points.use_motion_blur() {
            PRIMITIVE_POINT | PRIMITIVE_MOTION
        } else {
            PRIMITIVE_POINT
        };

        for prim in 0..points.num_points() {
            let mut prim_bounds = BoundBox::EMPTY;
            points.grow_point_bounds(prim, &mut prim_bounds);
            if prim_bounds.valid() {
                refs.push(Reference::new(
                    prim_bounds,
                    prim as i32,
                    object_index as i32,
                    prim_type,
                ));
                bounds.grow_box(prim_bounds);
                center.grow(prim_bounds.center2());
            }
        }
    }

    fn add_reference_object(
        &self,
        bounds: &mut BoundBox,
        center: &mut BoundBox,
        refs: &mut Vec<Reference>,
        object: &Object,
        object_index: usize,
    ) {
        let object_bounds = object.bounds(self.geometries);
        refs.push(Reference::new(
            object_bounds,
            -1,
            object_index as i32,
            PRIMITIVE_NONE,
        ));
        bounds.grow_box(object_bounds);
        center.grow(object_bounds.center2());
    }

    /* Binned build path, used when spatial splits are disabled */

    fn build_binned_node(
        &self,
        binning: ObjectBinning,
        refs: &mut [Reference],
        level: usize,
    ) -> Option<Box<BuildNode>> {
        if self.progress.is_canceled() {
            return None;
        }

        let size = binning.range.size();
        let leaf_sah = self.params.sah_primitive_cost * binning.leaf_sah;
        let split_sah = self.params.sah_node_cost * binning.bounds.half_area()
            + self.params.sah_primitive_cost * binning.split_sah;

        // the top level keeps at least one inner node above the leaves
        if !(size > 0 && self.params.top_level && level == 0) {
            if self.params.small_enough_for_leaf(size, level)
                || (self.range_within_max_leaf_size(binning.range, refs)
                    && leaf_sah < split_sah)
            {
                self.progress.add_completed(size);
                return Some(self.create_leaf_node(binning.range, refs));
            }
        }

        // orientation fitted candidate
        let mut aligned_space = None;
        let mut chosen = binning;
        if self.params.use_unaligned_nodes {
            if let Some(space) = self
                .unaligned_heuristic
                .compute_aligned_space(binning.range, refs)
            {
                let unaligned = ObjectBinning::new_in_space(
                    binning.range,
                    refs,
                    &self.unaligned_heuristic,
                    &space,
                );
                let unaligned_split_sah = self.params.sah_node_cost
                    * unaligned.bounds.half_area()
                    + self.params.sah_primitive_cost * unaligned.split_sah;
                if unaligned_split_sah < self.params.unaligned_split_threshold * split_sah {
                    chosen = unaligned;
                    aligned_space = Some(space);
                }
            }
        }

        let ctx = aligned_space
            .as_ref()
            .map(|space| (&self.unaligned_heuristic, space));
        let (left_range, right_range) = chosen.split(refs, ctx);
        let bounds = chosen.bounds;

        // sibling tasks own disjoint halves of the reference slice
        let (left_refs, right_refs) = refs.split_at_mut(left_range.size());
        let left = ObjectBinning::new(left_range.rebased(), left_refs);
        let right = ObjectBinning::new(right_range.rebased(), right_refs);

        let mut node = if size < THREAD_TASK_SIZE {
            let c0 = self.build_binned_node(left, left_refs, level + 1)?;
            let c1 = self.build_binned_node(right, right_refs, level + 1)?;
            BuildNode::inner(bounds, c0, c1)
        } else {
            let (c0, c1) = rayon::join(
                || self.build_binned_node(left, left_refs, level + 1),
                || self.build_binned_node(right, right_refs, level + 1),
            );
            BuildNode::inner(bounds, c0?, c1?)
        };

        if let Some(space) = aligned_space {
            node.set_aligned_space(space);
        }
        Some(Box::new(node))
    }

    /* Spatial split build path */

    fn build_spatial_node(
        &self,
        range: Range,
        refs: &mut Vec<Reference>,
        level: usize,
        storage: &mut SpatialStorage,
    ) -> Option<Box<BuildNode>> {
        if self.progress.is_canceled() {
            return None;
        }

        // small enough or too deep => create leaf
        if !(range.size() > 0 && self.params.top_level && level == 0)
            && self.params.small_enough_for_leaf(range.size(), level)
        {
            self.progress.add_completed(range.size());
            return Some(self.create_leaf_node(range, refs));
        }

        // splitting test
        let mut split = MixedSplit::new(self, storage, range, refs, level, None);
        if !(range.size() > 0 && self.params.top_level && level == 0) && split.no_split {
            self.progress.add_completed(range.size());
            return Some(self.create_leaf_node(range, refs));
        }

        // orientation fitted candidate
        let mut aligned_space = None;
        if self.params.use_unaligned_nodes {
            if let Some(space) = self.unaligned_heuristic.compute_aligned_space(range, refs) {
                let unaligned = MixedSplit::new(
                    self,
                    storage,
                    range,
                    refs,
                    level,
                    Some((&self.unaligned_heuristic, &space)),
                );
                if !unaligned.no_split
                    && unaligned.min_sah < self.params.unaligned_split_threshold * split.min_sah
                {
                    split = unaligned;
                    aligned_space = Some(space);
                }
            }
        }

        let bounds = split.bounds;
        let ctx = aligned_space
            .as_ref()
            .map(|space| (&self.unaligned_heuristic, space));
        let (left, right) = split.split(self, storage, range, refs, ctx);
        self.progress
            .add_total((left.size() + right.size()).saturating_sub(range.size()));

        let node = if range.size() < THREAD_TASK_SIZE {
            // the right child is built first: reference duplication splices
            // in at the end of the range being split, which keeps every
            // pending window (always to the left) stable
            let c1 = self.build_spatial_node(right, refs, level + 1, storage)?;
            let c0 = self.build_spatial_node(left, refs, level + 1, storage)?;
            BuildNode::inner(bounds, c0, c1)
        } else {
            // forked tasks copy their sub-range and own it outright
            let mut left_refs = refs[left.start()..left.end()].to_vec();
            let mut right_refs = refs[right.start()..right.end()].to_vec();
            let (c0, c1) = rayon::join(
                || {
                    let mut storage = SpatialStorage::default();
                    self.build_spatial_node(left.rebased(), &mut left_refs, level + 1, &mut storage)
                },
                || {
                    let mut storage = SpatialStorage::default();
                    self.build_spatial_node(
                        right.rebased(),
                        &mut right_refs,
                        level + 1,
                        &mut storage,
                    )
                },
            );
            BuildNode::inner(bounds, c0?, c1?)
        };

        let mut node = node;
        if let Some(space) = aligned_space {
            node.set_aligned_space(space);
        }
        Some(Box::new(node))
    }

    /* Leaf creation */

    /// Can the range become one leaf without breaking any per-kind cap
    pub(crate) fn range_within_max_leaf_size(&self, range: Range, refs: &[Reference]) -> bool {
        let size = range.size();
        let max_size = self
            .params
            .max_triangle_leaf_size
            .max(self.params.max_motion_triangle_leaf_size)
            .max(self.params.max_curve_leaf_size)
            .max(self.params.max_motion_curve_leaf_size)
            .max(self.params.max_point_leaf_size)
            .max(self.params.max_motion_point_leaf_size);
        if size > max_size {
            return false;
        }

        let mut counts = [0_usize; NUM_LEAF_KINDS];
        for reference in &refs[range.start()..range.end()] {
            if !reference.is_object() {
                counts[leaf_kind(reference.prim_type())] += 1;
            }
        }

        counts[0] <= self.params.max_triangle_leaf_size
            && counts[1] <= self.params.max_motion_triangle_leaf_size
            && counts[2] <= self.params.max_curve_leaf_size
            && counts[3] <= self.params.max_motion_curve_leaf_size
            && counts[4] <= self.params.max_point_leaf_size
            && counts[5] <= self.params.max_motion_point_leaf_size
    }

    /// Emit leaves for a range.  References are grouped by primitive kind
    /// so each packed leaf is homogeneous, object instances get their own
    /// balanced chain, and multiple leaves are merged under inner nodes.
    fn create_leaf_node(&self, range: Range, refs: &[Reference]) -> Box<BuildNode> {
        let mut kind_refs: [Vec<Reference>; NUM_LEAF_KINDS] = Default::default();
        let mut kind_bounds = [BoundBox::EMPTY; NUM_LEAF_KINDS];
        let mut kind_visibility = [0_u32; NUM_LEAF_KINDS];
        let mut object_refs = Vec::new();

        for reference in &refs[range.start()..range.end()] {
            if reference.is_object() {
                object_refs.push(*reference);
            } else {
                let kind = leaf_kind(reference.prim_type());
                kind_refs[kind].push(*reference);
                kind_bounds[kind].grow_box(reference.bounds());
                kind_visibility[kind] |= self.objects[reference.prim_object() as usize]
                    .visibility_for_tracing();
            }
        }

        let num_new_prims: usize = kind_refs.iter().map(Vec::len).sum();

        // claim a contiguous slot range in the output arrays and copy the
        // identity data over.  The lock covers the allocation and the short
        // copy; claimed slots are never touched by anyone else afterwards.
        let start_index = {
            let mut out = self.out.lock().unwrap();
            let start = out.free_index;
            out.free_index += num_new_prims + object_refs.len();
            let end = out.free_index;

            if out.prim_type.len() < end {
                out.prim_type.resize(end, 0);
                out.prim_index.resize(end, 0);
                out.prim_object.resize(end, 0);
                if self.need_prim_time {
                    out.prim_time.resize(end, [0.0, 1.0]);
                }
            }

            let mut slot = start;
            for kind in &kind_refs {
                for reference in kind {
                    out.prim_type[slot] = reference.prim_type();
                    out.prim_index[slot] = reference.prim_index();
                    out.prim_object[slot] = reference.prim_object();
                    if self.need_prim_time {
                        out.prim_time[slot] = reference.time();
                    }
                    slot += 1;
                }
            }
            for reference in &object_refs {
                out.prim_type[slot] = reference.prim_type();
                out.prim_index[slot] = reference.prim_index();
                out.prim_object[slot] = reference.prim_object();
                if self.need_prim_time {
                    out.prim_time[slot] = reference.time();
                }
                slot += 1;
            }

            start
        };

        let mut leaves: Vec<Box<BuildNode>> = Vec::new();
        let mut offset = start_index;
        for kind in 0..NUM_LEAF_KINDS {
            let count = kind_refs[kind].len();
            if count == 0 {
                continue;
            }
            leaves.push(Box::new(BuildNode::leaf(
                kind_bounds[kind],
                kind_visibility[kind],
                offset as i32,
                (offset + count) as i32,
            )));
            offset += count;
        }

        if leaves.is_empty() || !object_refs.is_empty() {
            let object_leaf =
                self.create_object_leaf_nodes(&object_refs, (start_index + num_new_prims) as i32);
            if leaves.is_empty() {
                return object_leaf;
            }
            leaves.push(object_leaf);
        }

        // merge multiple per-kind leaves under inner nodes
        let mut node = leaves.pop().unwrap();
        while let Some(prev) = leaves.pop() {
            let bounds = BoundBox::merge(prev.bounds(), node.bounds());
            node = Box::new(BuildNode::inner(bounds, prev, node));
        }
        node
    }

    /// A balanced chain of single-instance leaves; packing later encodes
    /// these with the negated index convention
    fn create_object_leaf_nodes(&self, refs: &[Reference], start: i32) -> Box<BuildNode> {
        match refs.len() {
            0 => Box::new(BuildNode::leaf(BoundBox::EMPTY, 0, 0, 0)),
            1 => {
                let reference = &refs[0];
                let visibility = self.objects[reference.prim_object() as usize]
                    .visibility_for_tracing();
                Box::new(BuildNode::leaf(
                    reference.bounds(),
                    visibility,
                    start,
                    start + 1,
                ))
            }
            count => {
                let mid = count / 2;
                let c0 = self.create_object_leaf_nodes(&refs[..mid], start);
                let c1 = self.create_object_leaf_nodes(&refs[mid..], start + mid as i32);
                let bounds = BoundBox::merge(c0.bounds(), c1.bounds());
                Box::new(BuildNode::inner(bounds, c0, c1))
            }
        }
    }
}

/// Number of distinct leaf groupings: triangle/curve/point, each with a
/// motion variant
const NUM_LEAF_KINDS: usize = 6;

fn leaf_kind(prim_type: i32) -> usize {
    let base = if prim_type & PRIMITIVE_TRIANGLE != 0 {
        0
    } else if prim_type & PRIMITIVE_CURVE != 0 {
        1
    } else {
        2
    };
    base * 2 + usize::from(prim_type & PRIMITIVE_MOTION != 0)
}
