use geometry::{BoundBox, Transform, Vec3};

use crate::{
    params::{unpack_segment, PRIMITIVE_CURVE, PRIMITIVE_MOTION},
    reference::{Range, Reference},
    scene::{Geometry, GeometryData, Object},
};

/// Computes per-range orientation frames and projects primitive and range
/// bounds into them, so elongated curve segments can be fitted with much
/// tighter boxes than their world axis ones.
#[derive(Debug, Clone, Copy)]
pub struct UnalignedHeuristic<'a> {
    objects: &'a [Object],
    geometries: &'a [Geometry],
}

impl<'a> UnalignedHeuristic<'a> {
    pub fn new(objects: &'a [Object], geometries: &'a [Geometry]) -> Self {
        Self {
            objects,
            geometries,
        }
    }

    /// Direction of a curve segment reference, if it has one.  Motion blur
    /// curves are excluded, they cannot be fitted to a single frame well.
    fn segment_direction(&self, reference: &Reference) -> Option<Vec3> {
        let prim_type = reference.prim_type();
        if prim_type & PRIMITIVE_CURVE == 0 || prim_type & PRIMITIVE_MOTION != 0 {
            return None;
        }

        let object = &self.objects[reference.prim_object() as usize];
        let GeometryData::Curves(curves) = &self.geometries[object.geometry].data else {
            return None;
        };

        let (v0, v1) = curves.segment_keys(
            reference.prim_index() as usize,
            unpack_segment(prim_type) as usize,
        );
        let axis = v1 - v0;
        let length = axis.length();
        (length > 1e-6).then(|| axis / length)
    }

    /// Orientation frame for a range.  The first primitive that defines a
    /// direction decides the space; `None` when nothing in the range does.
    pub fn compute_aligned_space(&self, range: Range, refs: &[Reference]) -> Option<Transform> {
        refs[range.start()..range.end()]
            .iter()
            .find_map(|reference| self.segment_direction(reference))
            .map(Transform::frame)
    }

    /// Bounds of one primitive in the given space.  Curve segments re-grow
    /// their keys and radius in the space; other primitives transform their
    /// world box.
    pub fn compute_aligned_prim_bounds(
        &self,
        reference: &Reference,
        space: &Transform,
    ) -> BoundBox {
        let prim_type = reference.prim_type();
        if prim_type & PRIMITIVE_CURVE != 0 && prim_type & PRIMITIVE_MOTION == 0 {
            let object = &self.objects[reference.prim_object() as usize];
            if let GeometryData::Curves(curves) = &self.geometries[object.geometry].data {
                let mut bounds = BoundBox::EMPTY;
                curves.grow_segment_bounds_in(
                    space,
                    reference.prim_index() as usize,
                    unpack_segment(prim_type) as usize,
                    &mut bounds,
                );
                return bounds;
            }
        }
        reference.bounds().transformed(space)
    }

    /// Aggregate (and optionally centroid) bounds of a range in the given
    /// space
    pub fn compute_aligned_bounds(
        &self,
        range: Range,
        refs: &[Reference],
        space: &Transform,
        mut cent_bounds: Option<&mut BoundBox>,
    ) -> BoundBox {
        let mut bounds = BoundBox::EMPTY;
        if let Some(cent) = cent_bounds.as_deref_mut() {
            *cent = BoundBox::EMPTY;
        }
        for reference in &refs[range.start()..range.end()] {
            let ref_bounds = self.compute_aligned_prim_bounds(reference, space);
            bounds.grow_box(ref_bounds);
            if let Some(cent) = cent_bounds.as_deref_mut() {
                cent.grow(ref_bounds.center2());
            }
        }
        bounds
    }

    /// The transform stored in a packed unaligned node: translate the space
    /// box to the origin and scale it to the unit cube
    pub fn compute_node_transform(bounds: BoundBox, space: Transform) -> Transform {
        let mut space = space;
        space.x.w -= bounds.min.x;
        space.y.w -= bounds.min.y;
        space.z.w -= bounds.min.z;

        let size = bounds.size();
        Transform::scale(Vec3::new(
            1.0 / size.x.max(1e-18),
            1.0 / size.y.max(1e-18),
            1.0 / size.z.max(1e-18),
        )) * space
    }
}
