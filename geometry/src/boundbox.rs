use glam::Vec3;

use crate::Transform;

/// 3D axis aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for BoundBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BoundBox {
    /// Box containing nothing, the identity element of [`BoundBox::grow`]
    pub const EMPTY: Self = Self {
        min: Vec3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
        max: Vec3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
    };

    /// Create a bounding box from its two extreme corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create a bounding box containing only the given point
    pub fn at_point(point: Vec3) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// Grow the box to include a point.  Uses NaN-safe min/max, so a NaN
    /// coordinate is ignored instead of poisoning the box.
    pub fn grow(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Grow the box to include a sphere around the given point
    pub fn grow_with_radius(&mut self, point: Vec3, radius: f32) {
        self.grow(point - Vec3::splat(radius));
        self.grow(point + Vec3::splat(radius));
    }

    /// Grow the box to include another box
    pub fn grow_box(&mut self, other: Self) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// The smallest box containing both inputs
    pub fn merge(a: Self, b: Self) -> Self {
        Self {
            min: a.min.min(b.min),
            max: a.max.max(b.max),
        }
    }

    /// Shrink the box to the region it shares with another box
    pub fn intersect(&mut self, other: Self) {
        self.min = self.min.max(other.min);
        self.max = self.max.min(other.max);
    }

    /// Is min <= max on all axes and every coordinate finite.  The empty box
    /// is not valid.
    pub fn valid(&self) -> bool {
        self.min.cmple(self.max).all() && self.min.is_finite() && self.max.is_finite()
    }

    /// Extent of the box on each axis
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Center point of the box
    pub fn center(&self) -> Vec3 {
        0.5 * (self.min + self.max)
    }

    /// Twice the center point.  Comparing these avoids a multiply per
    /// primitive in the binning loops.
    pub fn center2(&self) -> Vec3 {
        self.min + self.max
    }

    /// Half of the surface area of the box
    pub fn half_area(&self) -> f32 {
        let size = self.size();
        size.x * size.y + size.x * size.z + size.y * size.z
    }

    /// Surface area of the box
    pub fn area(&self) -> f32 {
        2.0 * self.half_area()
    }

    /// Surface area, or zero for boxes that do not contain anything
    pub fn safe_area(&self) -> f32 {
        if self.valid() {
            self.area()
        } else {
            0.0
        }
    }

    /// The box containing all eight transformed corners of self
    pub fn transformed(&self, tfm: &Transform) -> Self {
        let mut result = Self::EMPTY;
        for corner in 0..8 {
            let point = Vec3::new(
                if corner & 1 == 0 { self.min.x } else { self.max.x },
                if corner & 2 == 0 { self.min.y } else { self.max.y },
                if corner & 4 == 0 { self.min.z } else { self.max.z },
            );
            result.grow(tfm.transform_point(point));
        }
        result
    }
}
