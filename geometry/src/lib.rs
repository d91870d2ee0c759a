mod boundbox;
mod transform;

#[cfg(test)]
mod tests;

pub use boundbox::BoundBox;
pub use transform::Transform;

pub use glam::{IVec4, Vec3, Vec4};

/// Divide a vector componentwise, mapping division by zero to zero instead
/// of infinity
pub fn safe_divide(a: Vec3, b: Vec3) -> Vec3 {
    Vec3::new(
        if b.x != 0.0 { a.x / b.x } else { 0.0 },
        if b.y != 0.0 { a.y / b.y } else { 0.0 },
        if b.z != 0.0 { a.z / b.z } else { 0.0 },
    )
}
