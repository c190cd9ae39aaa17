//! CPU-side model of a program's uniform block.
//!
//! Every program declares a single uniform struct at `@group(0) @binding(0)`.
//! [`UniformLayout`] mirrors that struct's WGSL layout so that values can be
//! written by name, the way `glGetUniformLocation` + `glUniform*` would, into
//! a [`UniformBlock`] that is later snapshotted into the GPU arena per draw.

use cgmath::{Matrix4, Vector3, Vector4};

/// Scalar and vector types that may appear in a uniform block.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UniformType {
    Int,
    Float,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformType {
    /// Size in bytes in the uniform address space.
    pub const fn size(self) -> usize {
        match self {
            UniformType::Int | UniformType::Float => 4,
            UniformType::Vec3 => 12,
            UniformType::Vec4 => 16,
            UniformType::Mat4 => 64,
        }
    }

    /// Required alignment in bytes in the uniform address space.
    pub const fn align(self) -> usize {
        match self {
            UniformType::Int | UniformType::Float => 4,
            UniformType::Vec3 | UniformType::Vec4 | UniformType::Mat4 => 16,
        }
    }
}

/// Resolved position of a named uniform inside its block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UniformLocation {
    offset: usize,
    ty: UniformType,
}

impl UniformLocation {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn ty(&self) -> UniformType {
        self.ty
    }
}

/// Field-by-field description of a program's uniform struct.
///
/// Fields are laid out in declaration order following WGSL alignment rules;
/// the WGSL struct in the program's root module must declare the same fields
/// in the same order.
#[derive(Debug, Clone)]
pub struct UniformLayout {
    fields: Vec<(&'static str, UniformLocation)>,
    size: usize,
}

impl UniformLayout {
    pub fn new(fields: &[(&'static str, UniformType)]) -> Self {
        let mut offset = 0usize;
        let mut resolved = Vec::with_capacity(fields.len());
        for &(name, ty) in fields {
            offset = offset.next_multiple_of(ty.align());
            resolved.push((name, UniformLocation { offset, ty }));
            offset += ty.size();
        }

        Self {
            fields: resolved,
            size: offset.next_multiple_of(16).max(16),
        }
    }

    /// Looks up a uniform by name. Absence is not an error: a program that
    /// does not use a uniform simply does not declare it.
    pub fn location(&self, name: &str) -> Option<UniformLocation> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, location)| *location)
    }

    /// Size of the block in bytes, rounded up to 16.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A value to be written to a uniform location.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec3(Vector3<f32>),
    Vec4(Vector4<f32>),
    Mat4(Matrix4<f32>),
}

impl UniformValue {
    pub fn ty(&self) -> UniformType {
        match self {
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Mat4(_) => UniformType::Mat4,
        }
    }
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        UniformValue::Int(value as i32)
    }
}

/// Something that accepts uniform writes for the currently active program.
pub trait UniformSink {
    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue);

    /// Writes `value` if `location` resolved, and does nothing otherwise.
    fn set_optional(&mut self, location: Option<UniformLocation>, value: UniformValue) {
        if let Some(location) = location {
            self.set_uniform(location, value);
        }
    }
}

/// The current contents of a program's uniform block.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformBlock {
    bytes: Vec<u8>,
}

impl UniformBlock {
    pub fn new(layout: &UniformLayout) -> Self {
        Self {
            bytes: vec![0; layout.size()],
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn read_i32(&self, location: UniformLocation) -> i32 {
        bytemuck::pod_read_unaligned(&self.bytes[location.offset..location.offset + 4])
    }

    pub fn read_f32(&self, location: UniformLocation) -> f32 {
        bytemuck::pod_read_unaligned(&self.bytes[location.offset..location.offset + 4])
    }

    pub fn read_vec3(&self, location: UniformLocation) -> Vector3<f32> {
        let v: [f32; 3] =
            bytemuck::pod_read_unaligned(&self.bytes[location.offset..location.offset + 12]);
        v.into()
    }

    pub fn read_vec4(&self, location: UniformLocation) -> Vector4<f32> {
        let v: [f32; 4] =
            bytemuck::pod_read_unaligned(&self.bytes[location.offset..location.offset + 16]);
        v.into()
    }

    pub fn read_mat4(&self, location: UniformLocation) -> Matrix4<f32> {
        let cols: [[f32; 4]; 4] =
            bytemuck::pod_read_unaligned(&self.bytes[location.offset..location.offset + 64]);
        cols.into()
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}

impl UniformSink for UniformBlock {
    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        debug_assert_eq!(location.ty, value.ty(), "Uniform type mismatch");
        if location.ty != value.ty() {
            return;
        }

        let offset = location.offset;
        match value {
            UniformValue::Int(v) => self.write(offset, bytemuck::bytes_of(&v)),
            UniformValue::Float(v) => self.write(offset, bytemuck::bytes_of(&v)),
            UniformValue::Vec3(v) => {
                let v: [f32; 3] = v.into();
                self.write(offset, bytemuck::bytes_of(&v))
            }
            UniformValue::Vec4(v) => {
                let v: [f32; 4] = v.into();
                self.write(offset, bytemuck::bytes_of(&v))
            }
            UniformValue::Mat4(m) => {
                let cols: [[f32; 4]; 4] = m.into();
                self.write(offset, bytemuck::cast_slice(&cols))
            }
        }
    }
}
