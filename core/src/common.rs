use cgmath::{Vector3, Vector4};

/// Tolerance used for floating point comparisons.
pub const EPSILON: f32 = 1e-5;

/// Linear RGBA color, laid out for direct upload as a `vec4<f32>`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RgbaColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl RgbaColor {
    pub const WHITE: RgbaColor = RgbaColor::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn gray(value: f32) -> Self {
        Self::new(value, value, value, 1.0)
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl From<RgbaColor> for Vector4<f32> {
    fn from(c: RgbaColor) -> Self {
        Vector4::new(c.r, c.g, c.b, c.a)
    }
}

/// Linear RGB color used for per-node color overrides and light colors.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RgbColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl RgbColor {
    pub const BLACK: RgbColor = RgbColor::new(0.0, 0.0, 0.0);
    pub const WHITE: RgbColor = RgbColor::new(1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }
}

impl From<RgbColor> for Vector3<f32> {
    fn from(c: RgbColor) -> Self {
        Vector3::new(c.r, c.g, c.b)
    }
}

impl From<Vector3<f32>> for RgbColor {
    fn from(v: Vector3<f32>) -> Self {
        RgbColor::new(v.x, v.y, v.z)
    }
}

/// Rounds `value` up to the next multiple of `alignment` (which must be a power of two).
pub(crate) const fn align_to(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(0, 256), 0);
        assert_eq!(align_to(1, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(260, 16), 272);
    }

    #[test]
    fn test_color_conversions() {
        let v: Vector3<f32> = RgbColor::new(0.1, 0.2, 0.3).into();
        assert!((v.y - 0.2).abs() < EPSILON);

        let c = RgbaColor::gray(0.5);
        assert_eq!(c.to_array(), [0.5, 0.5, 0.5, 1.0]);
    }
}
