use glam::Vec3;

use crate::{BoundBox, Transform};

fn assert_close(a: Vec3, b: Vec3) {
    assert!((a - b).length() < 1e-5, "{:?} != {:?}", a, b);
}

#[test]
fn identity_leaves_points_alone() {
    let p = Vec3::new(1.0, -2.0, 3.5);
    assert_eq!(Transform::IDENTITY.transform_point(p), p);
}

#[test]
fn scale_then_translate() {
    let tfm = Transform::translation(Vec3::new(1.0, 0.0, 0.0))
        * Transform::scale(Vec3::new(2.0, 2.0, 2.0));
    assert_close(
        tfm.transform_point(Vec3::new(1.0, 1.0, 1.0)),
        Vec3::new(3.0, 2.0, 2.0),
    );
}

#[test]
fn frame_is_orthonormal() {
    let axis = Vec3::new(1.0, 2.0, -0.5).normalize();
    let frame = Transform::frame(axis);

    let x = frame.x.truncate();
    let y = frame.y.truncate();
    let z = frame.z.truncate();

    assert!(x.dot(y).abs() < 1e-5);
    assert!(x.dot(z).abs() < 1e-5);
    assert!(y.dot(z).abs() < 1e-5);
    assert!((x.length() - 1.0).abs() < 1e-5);
    assert!((y.length() - 1.0).abs() < 1e-5);
    assert_close(z, axis);
}

#[test]
fn frame_maps_axis_to_z() {
    let axis = Vec3::new(0.3, -0.9, 0.2).normalize();
    let frame = Transform::frame(axis);

    // a step along the axis becomes a step along local z
    let a = frame.transform_point(Vec3::ZERO);
    let b = frame.transform_point(axis);
    assert_close(b - a, Vec3::Z);
}

#[test]
fn transformed_bounds_contain_transformed_corners() {
    let bounds = BoundBox::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(2.0, 1.0, 3.0));
    let tfm = Transform::frame(Vec3::new(0.5, 0.5, 0.7).normalize());
    let moved = bounds.transformed(&tfm);

    for corner in 0..8 {
        let point = Vec3::new(
            if corner & 1 == 0 { bounds.min.x } else { bounds.max.x },
            if corner & 2 == 0 { bounds.min.y } else { bounds.max.y },
            if corner & 4 == 0 { bounds.min.z } else { bounds.max.z },
        );
        let p = tfm.transform_point(point);
        assert!(p.cmpge(moved.min - 1e-5).all());
        assert!(p.cmple(moved.max + 1e-5).all());
    }
}
