//! Projection and view helpers shared by the camera and the shadow light.

use cgmath::{Deg, Matrix4, Point3, SquareMatrix, Vector3, Vector4};

/// Matrix to convert from OpenGL clip-space depth [-1, 1] to WGPU depth [0, 1].
///
/// WGPU uses a different depth convention than OpenGL:
/// - OpenGL NDC depth: [-1, 1] (near to far)
/// - WGPU NDC depth: [0, 1] (near to far)
///
/// This matrix remaps Z: `z' = 0.5 * z + 0.5`
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Vertical field of view of the main camera, in degrees.
pub const FIELD_OF_VIEW: f32 = 44.0;
pub const NEAR: f32 = 0.1;
pub const FAR: f32 = 1000.0;

pub const Y_AXIS: Vector3<f32> = Vector3::new(0.0, 1.0, 0.0);

/// Perspective projection for a viewport of the given size, in WGPU clip space.
pub fn perspective(width: u32, height: u32) -> Matrix4<f32> {
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    OPENGL_TO_WGPU_MATRIX * cgmath::perspective(Deg(FIELD_OF_VIEW), aspect, NEAR, FAR)
}

/// Orthographic projection enclosing a terrain of the given extent as seen
/// from a light placed at most one extent away from it.
pub fn shadow_projection(extent: f32) -> Matrix4<f32> {
    OPENGL_TO_WGPU_MATRIX * cgmath::ortho(-extent, extent, -extent, extent, NEAR, extent * 3.0)
}

/// View matrix looking from `eye` towards `target`. Falls back to the Z axis
/// as up vector when `up` is parallel to the view direction.
pub fn look_at(eye: Point3<f32>, target: Point3<f32>, up: Vector3<f32>) -> Matrix4<f32> {
    use cgmath::InnerSpace;

    let forward = target - eye;
    let up = if forward.cross(up).magnitude2() < f32::EPSILON {
        Vector3::unit_z()
    } else {
        up
    };
    Matrix4::look_at_rh(eye, target, up)
}

/// Drops the translation part of a view matrix, keeping its rotation.
pub fn without_translation(view: Matrix4<f32>) -> Matrix4<f32> {
    let mut rotation = view;
    rotation.w = Vector4::new(0.0, 0.0, 0.0, 1.0);
    rotation
}

/// Aspect ratio encoded in a perspective matrix built by [`perspective`].
pub fn aspect_ratio(projection: &Matrix4<f32>) -> f32 {
    projection.y.y / projection.x.x
}

/// World-space position of the eye encoded in a view matrix.
pub fn eye_position(view: &Matrix4<f32>) -> Option<Point3<f32>> {
    let inverse = view.invert()?;
    Some(Point3::new(inverse.w.x, inverse.w.y, inverse.w.z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::EPSILON;
    use cgmath::Transform;

    #[test]
    fn test_perspective_aspect() {
        let projection = perspective(800, 600);
        assert!((aspect_ratio(&projection) - 800.0 / 600.0).abs() < EPSILON);
    }

    #[test]
    fn test_perspective_depth_range() {
        let projection = perspective(100, 100);

        let near = projection * Vector4::new(0.0, 0.0, -NEAR, 1.0);
        let far = projection * Vector4::new(0.0, 0.0, -FAR, 1.0);
        assert!((near.z / near.w).abs() < 1e-4);
        assert!((far.z / far.w - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_without_translation_keeps_rotation() {
        let view = look_at(Point3::new(3.0, 4.0, 5.0), Point3::new(0.0, 0.0, 0.0), Y_AXIS);
        let rotation = without_translation(view);

        let direction = Vector3::new(0.0, 0.0, -1.0);
        let a = view.transform_vector(direction);
        let b = rotation.transform_vector(direction);
        assert!((a - b).x.abs() < EPSILON && (a - b).y.abs() < EPSILON && (a - b).z.abs() < EPSILON);
        assert_eq!(rotation.transform_point(Point3::new(0.0, 0.0, 0.0)), Point3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_look_at_straight_down() {
        // Looking along the up vector must still produce an invertible view.
        let view = look_at(Point3::new(0.0, 10.0, 0.0), Point3::new(0.0, 0.0, 0.0), Y_AXIS);
        let eye = eye_position(&view).unwrap();
        assert!((eye.y - 10.0).abs() < 1e-4);
    }
}
