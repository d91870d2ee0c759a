use std::ops::Mul;

use glam::{Vec3, Vec4};

/// Affine transform stored as the top three rows of a 4x4 matrix.  The
/// bottom row is an implicit (0, 0, 0, 1).  Row storage is load-bearing:
/// the packed unaligned node layout serializes exactly these three rows
/// per child.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub x: Vec4,
    pub y: Vec4,
    pub z: Vec4,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        x: Vec4::new(1.0, 0.0, 0.0, 0.0),
        y: Vec4::new(0.0, 1.0, 0.0, 0.0),
        z: Vec4::new(0.0, 0.0, 1.0, 0.0),
    };

    /// Transform scaling each axis independently
    pub fn scale(scale: Vec3) -> Self {
        Self {
            x: Vec4::new(scale.x, 0.0, 0.0, 0.0),
            y: Vec4::new(0.0, scale.y, 0.0, 0.0),
            z: Vec4::new(0.0, 0.0, scale.z, 0.0),
        }
    }

    /// Transform translating by the given offset
    pub fn translation(offset: Vec3) -> Self {
        Self {
            x: Vec4::new(1.0, 0.0, 0.0, offset.x),
            y: Vec4::new(0.0, 1.0, 0.0, offset.y),
            z: Vec4::new(0.0, 0.0, 1.0, offset.z),
        }
    }

    /// Orthonormal frame whose third row is the given direction.  Maps world
    /// space into a space where the direction becomes the z axis, used to
    /// fit tight boxes around elongated primitives.
    pub fn frame(normal: Vec3) -> Self {
        let dx0 = Vec3::X.cross(normal);
        let dx1 = Vec3::Y.cross(normal);
        let dx = if dx0.length_squared() > dx1.length_squared() {
            dx0
        } else {
            dx1
        }
        .normalize();
        let dy = normal.cross(dx).normalize();

        Self {
            x: dx.extend(0.0),
            y: dy.extend(0.0),
            z: normal.extend(0.0),
        }
    }

    /// Apply the transform to a point
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        Vec3::new(
            self.x.truncate().dot(point) + self.x.w,
            self.y.truncate().dot(point) + self.y.w,
            self.z.truncate().dot(point) + self.z.w,
        )
    }
}

impl Mul for Transform {
    type Output = Self;

    /// Compose two transforms, the right hand side is applied first
    fn mul(self, rhs: Self) -> Self {
        let row = |a: Vec4| {
            Vec4::new(
                a.x * rhs.x.x + a.y * rhs.y.x + a.z * rhs.z.x,
                a.x * rhs.x.y + a.y * rhs.y.y + a.z * rhs.z.y,
                a.x * rhs.x.z + a.y * rhs.y.z + a.z * rhs.z.z,
                a.x * rhs.x.w + a.y * rhs.y.w + a.z * rhs.z.w + a.w,
            )
        };

        Self {
            x: row(self.x),
            y: row(self.y),
            z: row(self.z),
        }
    }
}
