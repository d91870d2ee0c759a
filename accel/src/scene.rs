use geometry::{BoundBox, Transform, Vec3};

use crate::{pack::Bvh2, VISIBILITY_ALL};

/// Triangle mesh collaborator.  Only the data the builder needs: vertex
/// positions, triangle indices and optional motion keyframes.
///
/// `motion_verts` holds `(motion_steps - 1) * verts.len()` positions, one
/// copy of the vertex array per keyframe other than the center one.
#[derive(Debug, Default, Clone)]
pub struct Mesh {
    pub verts: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
    pub motion_verts: Vec<Vec3>,
    pub motion_steps: usize,
}

impl Mesh {
    pub fn new(verts: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            verts,
            triangles,
            motion_verts: vec![],
            motion_steps: 1,
        }
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    pub fn use_motion_blur(&self) -> bool {
        self.motion_steps > 1 && !self.motion_verts.is_empty()
    }

    /// Corner positions of a triangle at the center keyframe
    pub fn triangle_verts(&self, index: usize) -> [Vec3; 3] {
        let t = self.triangles[index];
        [
            self.verts[t[0] as usize],
            self.verts[t[1] as usize],
            self.verts[t[2] as usize],
        ]
    }

    /// Are all corner positions finite
    pub fn triangle_valid(&self, index: usize) -> bool {
        self.triangle_verts(index).iter().all(|v| v.is_finite())
    }

    /// Grow a box over the triangle's positions at every motion keyframe
    pub fn grow_triangle_bounds(&self, index: usize, bounds: &mut BoundBox) {
        for vert in self.triangle_verts(index) {
            bounds.grow(vert);
        }
        if self.use_motion_blur() {
            let t = self.triangles[index];
            for step in 0..self.motion_steps - 1 {
                let offset = step * self.verts.len();
                for corner in t {
                    bounds.grow(self.motion_verts[offset + corner as usize]);
                }
            }
        }
    }
}

/// One polyline curve inside a [`CurveSet`], a window of its key array.
/// A curve with `num_keys` keys contributes `num_keys - 1` segment
/// primitives.
#[derive(Debug, Clone, Copy)]
pub struct Curve {
    pub first_key: usize,
    pub num_keys: usize,
}

impl Curve {
    pub fn num_segments(&self) -> usize {
        self.num_keys - 1
    }
}

/// Curve geometry collaborator: shared key/radius arrays plus per-curve
/// windows, with optional motion keyframes laid out like [`Mesh`] motion.
#[derive(Debug, Default, Clone)]
pub struct CurveSet {
    pub keys: Vec<Vec3>,
    pub radius: Vec<f32>,
    pub curves: Vec<Curve>,
    pub motion_keys: Vec<Vec3>,
    pub motion_steps: usize,
}

impl CurveSet {
    pub fn new(keys: Vec<Vec3>, radius: Vec<f32>, curves: Vec<Curve>) -> Self {
        Self {
            keys,
            radius,
            curves,
            motion_keys: vec![],
            motion_steps: 1,
        }
    }

    pub fn num_curves(&self) -> usize {
        self.curves.len()
    }

    pub fn num_segments(&self) -> usize {
        self.curves.iter().map(Curve::num_segments).sum()
    }

    pub fn use_motion_blur(&self) -> bool {
        self.motion_steps > 1 && !self.motion_keys.is_empty()
    }

    /// Endpoint positions of one segment at the center keyframe
    pub fn segment_keys(&self, curve: usize, segment: usize) -> (Vec3, Vec3) {
        let k0 = self.curves[curve].first_key + segment;
        (self.keys[k0], self.keys[k0 + 1])
    }

    /// Grow a box over a segment's keys at every motion keyframe, padded by
    /// the larger endpoint radius
    pub fn grow_segment_bounds(&self, curve: usize, segment: usize, bounds: &mut BoundBox) {
        let k0 = self.curves[curve].first_key + segment;
        let radius = self.radius[k0].max(self.radius[k0 + 1]);

        bounds.grow_with_radius(self.keys[k0], radius);
        bounds.grow_with_radius(self.keys[k0 + 1], radius);

        if self.use_motion_blur() {
            for step in 0..self.motion_steps - 1 {
                let offset = step * self.keys.len();
                bounds.grow_with_radius(self.motion_keys[offset + k0], radius);
                bounds.grow_with_radius(self.motion_keys[offset + k0 + 1], radius);
            }
        }
    }

    /// Grow a box over a segment's center keyframe keys projected into the
    /// given space, used when fitting orientation frames
    pub fn grow_segment_bounds_in(
        &self,
        space: &Transform,
        curve: usize,
        segment: usize,
        bounds: &mut BoundBox,
    ) {
        let k0 = self.curves[curve].first_key + segment;
        let radius = self.radius[k0].max(self.radius[k0 + 1]);

        bounds.grow_with_radius(space.transform_point(self.keys[k0]), radius);
        bounds.grow_with_radius(space.transform_point(self.keys[k0 + 1]), radius);
    }
}

/// Point cloud collaborator, one sphere-ish primitive per entry
#[derive(Debug, Default, Clone)]
pub struct PointCloud {
    pub points: Vec<Vec3>,
    pub radius: Vec<f32>,
    pub motion_points: Vec<Vec3>,
    pub motion_steps: usize,
}

impl PointCloud {
    pub fn new(points: Vec<Vec3>, radius: Vec<f32>) -> Self {
        Self {
            points,
            radius,
            motion_points: vec![],
            motion_steps: 1,
        }
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn use_motion_blur(&self) -> bool {
        self.motion_steps > 1 && !self.motion_points.is_empty()
    }

    pub fn grow_point_bounds(&self, index: usize, bounds: &mut BoundBox) {
        bounds.grow_with_radius(self.points[index], self.radius[index]);
        if self.use_motion_blur() {
            for step in 0..self.motion_steps - 1 {
                let offset = step * self.points.len();
                bounds.grow_with_radius(self.motion_points[offset + index], self.radius[index]);
            }
        }
    }
}

/// The primitive payload of a [`Geometry`]
#[derive(Debug, Clone)]
pub enum GeometryData {
    Mesh(Mesh),
    Curves(CurveSet),
    Points(PointCloud),
}

/// A geometry plus the bookkeeping the builder and instance merge need.
/// `prim_offset` is the geometry's first primitive in the scene-global
/// primitive numbering.  `transform_applied` geometry has world space
/// positions and exactly one user, so a top level build flattens it instead
/// of keeping an instanced sub-structure.
#[derive(Debug)]
pub struct Geometry {
    pub data: GeometryData,
    pub prim_offset: usize,
    pub transform_applied: bool,
    pub bvh: Option<Bvh2>,
}

impl Geometry {
    pub fn new(data: GeometryData) -> Self {
        Self {
            data,
            prim_offset: 0,
            transform_applied: false,
            bvh: None,
        }
    }

    pub fn num_primitives(&self) -> usize {
        match &self.data {
            GeometryData::Mesh(mesh) => mesh.num_triangles(),
            GeometryData::Curves(curves) => curves.num_segments(),
            GeometryData::Points(points) => points.num_points(),
        }
    }

    /// Does this geometry keep its own bottom level structure when it
    /// appears in a top level build
    pub fn need_build_bvh(&self) -> bool {
        !self.transform_applied
    }

    pub fn use_motion_blur(&self) -> bool {
        match &self.data {
            GeometryData::Mesh(mesh) => mesh.use_motion_blur(),
            GeometryData::Curves(curves) => curves.use_motion_blur(),
            GeometryData::Points(points) => points.use_motion_blur(),
        }
    }

    /// Bounds of every primitive, motion keyframes included
    pub fn bounds(&self) -> BoundBox {
        let mut bounds = BoundBox::EMPTY;
        match &self.data {
            GeometryData::Mesh(mesh) => {
                for i in 0..mesh.num_triangles() {
                    mesh.grow_triangle_bounds(i, &mut bounds);
                }
            }
            GeometryData::Curves(curves) => {
                for (c, curve) in curves.curves.iter().enumerate() {
                    for s in 0..curve.num_segments() {
                        curves.grow_segment_bounds(c, s, &mut bounds);
                    }
                }
            }
            GeometryData::Points(points) => {
                for i in 0..points.num_points() {
                    points.grow_point_bounds(i, &mut bounds);
                }
            }
        }
        bounds
    }
}

/// Object collaborator: a transform placing a geometry in the scene plus
/// ray visibility flags
#[derive(Debug, Clone)]
pub struct Object {
    pub geometry: usize,
    pub tfm: Transform,
    pub visibility: u32,
}

impl Object {
    pub fn new(geometry: usize) -> Self {
        Self {
            geometry,
            tfm: Transform::IDENTITY,
            visibility: VISIBILITY_ALL,
        }
    }

    pub fn visibility_for_tracing(&self) -> u32 {
        self.visibility & VISIBILITY_ALL
    }

    /// World space bounds of the instanced geometry
    pub fn bounds(&self, geometries: &[Geometry]) -> BoundBox {
        let geom = &geometries[self.geometry];
        let bounds = geom.bounds();
        if geom.transform_applied {
            bounds
        } else {
            bounds.transformed(&self.tfm)
        }
    }
}
