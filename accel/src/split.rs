use geometry::{safe_divide, BoundBox, Transform, Vec3};

use crate::{
    build::BvhBuild,
    params::{
        unpack_segment, BvhParams, PRIMITIVE_CURVE, PRIMITIVE_POINT, PRIMITIVE_TRIANGLE,
    },
    reference::{Range, Reference},
    scene::{CurveSet, GeometryData, Mesh, Object, PointCloud},
    sort::sort_references,
    unaligned::UnalignedHeuristic,
};

/// Optional projection of split evaluation into an orientation space
pub(crate) type UnalignedCtx<'a> = Option<(&'a UnalignedHeuristic<'a>, &'a Transform)>;

fn prim_bounds(reference: &Reference, unaligned: UnalignedCtx<'_>) -> BoundBox {
    match unaligned {
        Some((heuristic, space)) => heuristic.compute_aligned_prim_bounds(reference, space),
        None => reference.bounds(),
    }
}

fn unaligned_point(point: Vec3, unaligned: UnalignedCtx<'_>) -> Vec3 {
    match unaligned {
        Some((_, space)) => space.transform_point(point),
        None => point,
    }
}

/// One spatial bin: bounds of the clipped reference pieces inside it plus
/// how many references start and end here
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SpatialBin {
    pub bounds: BoundBox,
    pub enter: usize,
    pub exit: usize,
}

/// Scratch storage for split evaluation.  One per build task, so
/// concurrently binning tasks never contend or false-share.
#[derive(Debug, Default)]
pub(crate) struct SpatialStorage {
    right_bounds: Vec<BoundBox>,
    bins: [[SpatialBin; BvhParams::NUM_SPATIAL_BINS]; 3],
    new_refs: Vec<Reference>,
}

/* Object Split */

/// Exact sort-based object split: for every axis, sort the range and sweep
/// prefix/suffix bounds to find the cheapest partition point.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ObjectSplit {
    pub sah: f32,
    pub dim: usize,
    pub num_left: usize,
    pub left_bounds: BoundBox,
    pub right_bounds: BoundBox,
}

impl ObjectSplit {
    pub fn new(
        build: &BvhBuild<'_>,
        storage: &mut SpatialStorage,
        range: Range,
        refs: &mut [Reference],
        node_sah: f32,
        unaligned: UnalignedCtx<'_>,
    ) -> Self {
        let mut best = Self {
            sah: f32::MAX,
            dim: 0,
            num_left: 0,
            left_bounds: BoundBox::EMPTY,
            right_bounds: BoundBox::EMPTY,
        };
        let size = range.size();

        for dim in 0..3 {
            sort_references(&mut refs[range.start()..range.end()], dim, unaligned);

            // sweep right to left and record the suffix bounds
            storage.right_bounds.resize(size, BoundBox::EMPTY);
            let mut right = BoundBox::EMPTY;
            for i in (1..size).rev() {
                right.grow_box(prim_bounds(&refs[range.start() + i], unaligned));
                storage.right_bounds[i - 1] = right;
            }

            // sweep left to right and keep the lowest SAH
            let mut left = BoundBox::EMPTY;
            for i in 1..size {
                left.grow_box(prim_bounds(&refs[range.start() + i - 1], unaligned));
                let right = storage.right_bounds[i - 1];

                let sah = node_sah
                    + left.safe_area() * build.params.primitive_cost(i)
                    + right.safe_area() * build.params.primitive_cost(size - i);

                if sah < best.sah {
                    best = Self {
                        sah,
                        dim,
                        num_left: i,
                        left_bounds: left,
                        right_bounds: right,
                    };
                }
            }
        }

        best
    }

    /// Re-sort along the chosen axis and produce the child windows
    pub fn split(
        &self,
        range: Range,
        refs: &mut [Reference],
        unaligned: UnalignedCtx<'_>,
    ) -> (Range, Range) {
        sort_references(&mut refs[range.start()..range.end()], self.dim, unaligned);

        let num_right = range.size() - self.num_left;
        let (left_bounds, right_bounds) = if unaligned.is_none() {
            (self.left_bounds, self.right_bounds)
        } else {
            // the cached bounds are in the orientation space, the child
            // windows need world bounds recomputed from the actual refs
            let mut left_bounds = BoundBox::EMPTY;
            let mut right_bounds = BoundBox::EMPTY;
            for reference in &refs[range.start()..range.start() + self.num_left] {
                left_bounds.grow_box(reference.bounds());
            }
            for reference in &refs[range.start() + self.num_left..range.end()] {
                right_bounds.grow_box(reference.bounds());
            }
            (left_bounds, right_bounds)
        };

        let left = Range::new(left_bounds, range.start(), self.num_left);
        let right = Range::new(right_bounds, left.end(), num_right);
        (left, right)
    }
}

/* Spatial Split */

/// Spatial split: bins primitive boxes rather than centroids, clipping
/// straddling references at bin boundaries, so a primitive may end up
/// referenced from both sides of the chosen plane.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpatialSplit {
    pub sah: f32,
    pub dim: usize,
    pub pos: f32,
}

impl SpatialSplit {
    pub fn new(
        build: &BvhBuild<'_>,
        storage: &mut SpatialStorage,
        range: Range,
        refs: &[Reference],
        node_sah: f32,
        unaligned: UnalignedCtx<'_>,
    ) -> Self {
        const NUM_BINS: usize = BvhParams::NUM_SPATIAL_BINS;

        let range_bounds = match unaligned {
            Some((heuristic, space)) => {
                heuristic.compute_aligned_bounds(range, refs, space, None)
            }
            None => range.bounds(),
        };

        let origin = range_bounds.min;
        let bin_size = range_bounds.size() * (1.0 / NUM_BINS as f32);
        let inv_bin_size = safe_divide(Vec3::ONE, bin_size);

        for dim in 0..3 {
            for bin in &mut storage.bins[dim] {
                *bin = SpatialBin::default();
            }
        }

        // chop references into bins
        for reference in &refs[range.start()..range.end()] {
            let bounds = prim_bounds(reference, unaligned);
            let first_f = (bounds.min - origin) * inv_bin_size;
            let last_f = (bounds.max - origin) * inv_bin_size;

            let mut first = [0_usize; 3];
            let mut last = [0_usize; 3];
            for dim in 0..3 {
                first[dim] = (first_f[dim] as i32).clamp(0, NUM_BINS as i32 - 1) as usize;
                last[dim] =
                    (last_f[dim] as i32).clamp(first[dim] as i32, NUM_BINS as i32 - 1) as usize;
            }

            for dim in 0..3 {
                let mut curr = reference.with_bounds(bounds);

                for i in first[dim]..last[dim] {
                    let pos = origin[dim] + bin_size[dim] * (i + 1) as f32;
                    let (left, right) = split_reference(build, &curr, dim, pos, unaligned);
                    storage.bins[dim][i].bounds.grow_box(left.bounds());
                    curr = right;
                }

                storage.bins[dim][last[dim]].bounds.grow_box(curr.bounds());
                storage.bins[dim][first[dim]].enter += 1;
                storage.bins[dim][last[dim]].exit += 1;
            }
        }

        // select the best split plane
        let mut best = Self {
            sah: f32::MAX,
            dim: 0,
            pos: 0.0,
        };

        storage.right_bounds.resize(NUM_BINS, BoundBox::EMPTY);
        for dim in 0..3 {
            // sweep right to left and record the suffix bounds
            let mut right = BoundBox::EMPTY;
            for i in (1..NUM_BINS).rev() {
                right.grow_box(storage.bins[dim][i].bounds);
                storage.right_bounds[i - 1] = right;
            }

            // sweep left to right and select the lowest SAH
            let mut left = BoundBox::EMPTY;
            let mut left_num = 0_usize;
            let mut right_num = range.size();

            for i in 1..NUM_BINS {
                left.grow_box(storage.bins[dim][i - 1].bounds);
                left_num += storage.bins[dim][i - 1].enter;
                right_num -= storage.bins[dim][i - 1].exit;

                let sah = node_sah
                    + left.safe_area() * build.params.primitive_cost(left_num)
                    + storage.right_bounds[i - 1].safe_area()
                        * build.params.primitive_cost(right_num);

                if sah < best.sah {
                    best = Self {
                        sah,
                        dim,
                        pos: origin[dim] + bin_size[dim] * i as f32,
                    };
                }
            }
        }

        best
    }

    /// Apply the split.  Straddling references are resolved to the side
    /// with the cheaper SAH, or duplicated with clipped boxes; duplicates
    /// are buffered and spliced in at the end of the range in one go.
    pub fn split(
        &self,
        build: &BvhBuild<'_>,
        storage: &mut SpatialStorage,
        range: Range,
        refs: &mut Vec<Reference>,
        unaligned: UnalignedCtx<'_>,
    ) -> (Range, Range) {
        // Categorize references and compute bounds.
        //
        // Left-hand side:      [left_start, left_end)
        // Straddling:          [left_end, right_start)
        // Right-hand side:     [right_start, right_end)
        let left_start = range.start();
        let mut left_end = left_start;
        let mut right_start = range.end();
        let mut right_end = range.end();
        let mut left_bounds = BoundBox::EMPTY;
        let mut right_bounds = BoundBox::EMPTY;

        let mut i = left_start;
        while i < right_start {
            let bounds = prim_bounds(&refs[i], unaligned);
            if bounds.max[self.dim] <= self.pos {
                // entirely on the left-hand side
                left_bounds.grow_box(bounds);
                refs.swap(i, left_end);
                left_end += 1;
                i += 1;
            } else if bounds.min[self.dim] >= self.pos {
                // entirely on the right-hand side
                right_bounds.grow_box(bounds);
                right_start -= 1;
                refs.swap(i, right_start);
            } else {
                i += 1;
            }
        }

        // resolve references intersecting both sides
        storage.new_refs.clear();
        storage.new_refs.reserve(right_start - left_end);

        while left_end < right_start {
            let curr = refs[left_end].with_bounds(prim_bounds(&refs[left_end], unaligned));
            let (lref, rref) = split_reference(build, &curr, self.dim, self.pos, unaligned);

            // compute the SAH of keeping the reference whole on either
            // side versus splitting it in two
            let mut lub = left_bounds; // unsplit to left: new left bounds
            let mut rub = right_bounds; // unsplit to right: new right bounds
            let mut ldb = left_bounds; // duplicate: new left bounds
            let mut rdb = right_bounds; // duplicate: new right bounds
            lub.grow_box(curr.bounds());
            rub.grow_box(curr.bounds());
            ldb.grow_box(lref.bounds());
            rdb.grow_box(rref.bounds());

            let lac = build.params.primitive_cost(left_end - left_start);
            let rac = build.params.primitive_cost(right_end - right_start);
            let lbc = build.params.primitive_cost(left_end - left_start + 1);
            let rbc = build.params.primitive_cost(right_end - right_start + 1);

            let unsplit_left_sah = lub.safe_area() * lbc + right_bounds.safe_area() * rac;
            let unsplit_right_sah = left_bounds.safe_area() * lac + rub.safe_area() * rbc;
            let duplicate_sah = ldb.safe_area() * lbc + rdb.safe_area() * rbc;
            let min_sah = unsplit_left_sah.min(unsplit_right_sah).min(duplicate_sah);

            if min_sah == unsplit_left_sah {
                left_bounds = lub;
                left_end += 1;
            } else if min_sah == unsplit_right_sah {
                right_bounds = rub;
                right_start -= 1;
                refs.swap(left_end, right_start);
            } else {
                left_bounds = ldb;
                right_bounds = rdb;
                refs[left_end] = lref;
                left_end += 1;
                storage.new_refs.push(rref);
                right_end += 1;
            }
        }

        // splice the duplicated references in at the end of the range
        if !storage.new_refs.is_empty() {
            let at = right_end - storage.new_refs.len();
            refs.splice(at..at, storage.new_refs.drain(..));
        }

        if unaligned.is_some() {
            // clipped boxes are in the orientation space, recompute the
            // child window bounds from the references themselves
            left_bounds = BoundBox::EMPTY;
            right_bounds = BoundBox::EMPTY;
            for reference in &refs[left_start..left_end] {
                left_bounds.grow_box(reference.bounds());
            }
            for reference in &refs[right_start..right_end] {
                right_bounds.grow_box(reference.bounds());
            }
        }

        (
            Range::new(left_bounds, left_start, left_end - left_start),
            Range::new(right_bounds, right_start, right_end - right_start),
        )
    }
}

/* Reference clipping, per primitive kind */

/// Clip a reference at an axis plane, producing the two halves.  Clipped
/// boxes never exceed the original reference bounds.
pub(crate) fn split_reference(
    build: &BvhBuild<'_>,
    reference: &Reference,
    dim: usize,
    pos: f32,
    unaligned: UnalignedCtx<'_>,
) -> (Reference, Reference) {
    let mut left_bounds = BoundBox::EMPTY;
    let mut right_bounds = BoundBox::EMPTY;

    let object = &build.objects()[reference.prim_object() as usize];
    let geom = &build.geometries()[object.geometry];
    let prim_type = reference.prim_type();

    if prim_type & PRIMITIVE_TRIANGLE != 0 {
        let GeometryData::Mesh(mesh) = &geom.data else {
            unreachable!("triangle reference into non-mesh geometry");
        };
        split_triangle_primitive(
            mesh,
            None,
            reference.prim_index() as usize,
            dim,
            pos,
            unaligned,
            &mut left_bounds,
            &mut right_bounds,
        );
    } else if prim_type & PRIMITIVE_CURVE != 0 {
        let GeometryData::Curves(curves) = &geom.data else {
            unreachable!("curve reference into non-curve geometry");
        };
        split_curve_primitive(
            curves,
            None,
            reference.prim_index() as usize,
            unpack_segment(prim_type) as usize,
            dim,
            pos,
            unaligned,
            &mut left_bounds,
            &mut right_bounds,
        );
    } else if prim_type & PRIMITIVE_POINT != 0 {
        let GeometryData::Points(points) = &geom.data else {
            unreachable!("point reference into non-point geometry");
        };
        split_point_primitive(
            points,
            None,
            reference.prim_index() as usize,
            dim,
            pos,
            unaligned,
            &mut left_bounds,
            &mut right_bounds,
        );
    } else {
        split_object_reference(
            build,
            object,
            dim,
            pos,
            unaligned,
            &mut left_bounds,
            &mut right_bounds,
        );
    }

    // clamp to the plane and the original bounds
    left_bounds.max[dim] = pos;
    right_bounds.min[dim] = pos;
    left_bounds.intersect(reference.bounds());
    right_bounds.intersect(reference.bounds());

    (
        reference.with_bounds(left_bounds),
        reference.with_bounds(right_bounds),
    )
}

#[allow(clippy::too_many_arguments)]
fn split_triangle_primitive(
    mesh: &Mesh,
    tfm: Option<&Transform>,
    prim_index: usize,
    dim: usize,
    pos: f32,
    unaligned: UnalignedCtx<'_>,
    left_bounds: &mut BoundBox,
    right_bounds: &mut BoundBox,
) {
    let verts = mesh.triangle_verts(prim_index);
    let project = |v: Vec3| {
        let v = tfm.map_or(v, |t| t.transform_point(v));
        unaligned_point(v, unaligned)
    };

    let mut v1 = project(verts[2]);
    for vert in verts {
        let v0 = v1;
        v1 = project(vert);
        let v0p = v0[dim];
        let v1p = v1[dim];

        // insert vertex to the boxes it belongs to
        if v0p <= pos {
            left_bounds.grow(v0);
        }
        if v0p >= pos {
            right_bounds.grow(v0);
        }

        // edge intersects the plane, insert intersection to both boxes
        if (v0p < pos && v1p > pos) || (v0p > pos && v1p < pos) {
            let t = v0.lerp(v1, ((pos - v0p) / (v1p - v0p)).clamp(0.0, 1.0));
            left_bounds.grow(t);
            right_bounds.grow(t);
        }
    }
}

/// Curve split: NOTE - Currently ignores curve width and needs to be fixed.
#[allow(clippy::too_many_arguments)]
fn split_curve_primitive(
    curves: &CurveSet,
    tfm: Option<&Transform>,
    prim_index: usize,
    segment_index: usize,
    dim: usize,
    pos: f32,
    unaligned: UnalignedCtx<'_>,
    left_bounds: &mut BoundBox,
    right_bounds: &mut BoundBox,
) {
    let (v0, v1) = curves.segment_keys(prim_index, segment_index);
    let project = |v: Vec3| {
        let v = tfm.map_or(v, |t| t.transform_point(v));
        unaligned_point(v, unaligned)
    };
    let v0 = project(v0);
    let v1 = project(v1);
    let v0p = v0[dim];
    let v1p = v1[dim];

    // insert both keys to the boxes they belong to
    if v0p <= pos {
        left_bounds.grow(v0);
    }
    if v0p >= pos {
        right_bounds.grow(v0);
    }
    if v1p <= pos {
        left_bounds.grow(v1);
    }
    if v1p >= pos {
        right_bounds.grow(v1);
    }

    // segment intersects the plane, insert intersection to both boxes
    if (v0p < pos && v1p > pos) || (v0p > pos && v1p < pos) {
        let t = v0.lerp(v1, ((pos - v0p) / (v1p - v0p)).clamp(0.0, 1.0));
        left_bounds.grow(t);
        right_bounds.grow(t);
    }
}

/// No real splitting support for points, assume they are small enough for
/// it not to matter
#[allow(clippy::too_many_arguments)]
fn split_point_primitive(
    points: &PointCloud,
    tfm: Option<&Transform>,
    prim_index: usize,
    dim: usize,
    pos: f32,
    unaligned: UnalignedCtx<'_>,
    left_bounds: &mut BoundBox,
    right_bounds: &mut BoundBox,
) {
    let point = points.points[prim_index];
    let radius = points.radius[prim_index];
    let point = tfm.map_or(point, |t| t.transform_point(point));
    let point = unaligned_point(point, unaligned);

    if point[dim] <= pos {
        left_bounds.grow_with_radius(point, radius);
    }
    if point[dim] >= pos {
        right_bounds.grow_with_radius(point, radius);
    }
}

/// Clip an object instance by clipping every primitive of the underlying
/// geometry with the object's transform applied
fn split_object_reference(
    build: &BvhBuild<'_>,
    object: &Object,
    dim: usize,
    pos: f32,
    unaligned: UnalignedCtx<'_>,
    left_bounds: &mut BoundBox,
    right_bounds: &mut BoundBox,
) {
    let geom = &build.geometries()[object.geometry];
    let tfm = Some(&object.tfm);

    match &geom.data {
        GeometryData::Mesh(mesh) => {
            for prim in 0..mesh.num_triangles() {
                split_triangle_primitive(
                    mesh, tfm, prim, dim, pos, unaligned, left_bounds, right_bounds,
                );
            }
        }
        GeometryData::Curves(curves) => {
            for (curve_index, curve) in curves.curves.iter().enumerate() {
                for segment in 0..curve.num_segments() {
                    split_curve_primitive(
                        curves,
                        tfm,
                        curve_index,
                        segment,
                        dim,
                        pos,
                        unaligned,
                        left_bounds,
                        right_bounds,
                    );
                }
            }
        }
        GeometryData::Points(points) => {
            for prim in 0..points.num_points() {
                split_point_primitive(
                    points, tfm, prim, dim, pos, unaligned, left_bounds, right_bounds,
                );
            }
        }
    }
}

/* Mixed Object-Spatial Split */

/// Evaluates the leaf cost, the object split and (when the object split's
/// children overlap enough) the spatial split for one range, and remembers
/// which of the three won.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MixedSplit {
    pub object: ObjectSplit,
    pub spatial: Option<SpatialSplit>,
    pub leaf_sah: f32,
    pub min_sah: f32,
    pub no_split: bool,
    pub bounds: BoundBox,
}

impl MixedSplit {
    pub fn new(
        build: &BvhBuild<'_>,
        storage: &mut SpatialStorage,
        range: Range,
        refs: &mut [Reference],
        level: usize,
        unaligned: UnalignedCtx<'_>,
    ) -> Self {
        let bounds = match unaligned {
            Some((heuristic, space)) => {
                heuristic.compute_aligned_bounds(range, refs, space, None)
            }
            None => range.bounds(),
        };

        // find split candidates
        let area = bounds.safe_area();
        let leaf_sah = area * build.params.primitive_cost(range.size());
        let node_sah = area * build.params.node_cost(2);

        let object = ObjectSplit::new(build, storage, range, refs, node_sah, unaligned);

        let mut spatial = None;
        if build.params.use_spatial_split && level < BvhParams::MAX_SPATIAL_DEPTH {
            let mut overlap = object.left_bounds;
            overlap.intersect(object.right_bounds);

            if overlap.safe_area() >= build.spatial_min_overlap() {
                spatial = Some(SpatialSplit::new(
                    build, storage, range, refs, node_sah, unaligned,
                ));
            }
        }

        // leaf SAH is the lowest => create leaf
        let spatial_sah = spatial.map_or(f32::MAX, |split| split.sah);
        let min_sah = leaf_sah.min(object.sah).min(spatial_sah);
        let no_split =
            min_sah == leaf_sah && build.range_within_max_leaf_size(range, refs);

        Self {
            object,
            spatial,
            leaf_sah,
            min_sah,
            no_split,
            bounds,
        }
    }

    /// Apply the winning split, falling back to the object split when the
    /// spatial one leaves a side empty after clipping
    pub fn split(
        &self,
        build: &BvhBuild<'_>,
        storage: &mut SpatialStorage,
        range: Range,
        refs: &mut Vec<Reference>,
        unaligned: UnalignedCtx<'_>,
    ) -> (Range, Range) {
        if let Some(spatial) = &self.spatial {
            if build.params.use_spatial_split && self.min_sah == spatial.sah {
                let (left, right) = spatial.split(build, storage, range, refs, unaligned);
                if left.size() > 0 && right.size() > 0 {
                    return (left, right);
                }
            }
        }
        self.object.split(range, refs, unaligned)
    }
}
