use cgmath::{InnerSpace, Vector3};
use wgpu::util::{BufferInitDescriptor, DeviceExt};

use crate::{
    gpu::GpuContext,
    scene::{draw_context::DrawContext, material::Material, texture::GpuTexture, DrawTarget},
};

/// Errors when building mesh data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeshError {
    #[error("Index {index} at position {position} is out of bounds for {vertex_count} vertices")]
    IndexOutOfBounds {
        index: u32,
        position: usize,
        vertex_count: usize,
    },
    #[error("Index count {0} is not a multiple of 3")]
    NotTriangleList(usize),
    #[error("Mesh has no vertices or no indices")]
    Empty,
}

/// GPU-compatible vertex structure containing position, normal and texture
/// coordinates.
///
/// Each vertex is 32 bytes so that vertex-pulling shaders can read it as
/// eight consecutive floats.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coords: [f32; 2],
}

impl Vertex {
    pub const fn new(position: [f32; 3], normal: [f32; 3], tex_coords: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tex_coords,
        }
    }

    /// Returns the vertex buffer layout descriptor for the rendering pipeline.
    pub(crate) fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 3 * 2]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

/// How a mesh's indices are consumed by the draw.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Topology {
    Triangles,
    /// Fixed-size patches expanded by a tessellating program.
    Patches { size: u32 },
}

// =============================================================================
// Mesh Data
// =============================================================================

/// Validated CPU-side mesh: vertices plus a `u32` triangle list.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

impl MeshData {
    /// Builds mesh data, checking that the indices form a triangle list
    /// over the given vertices.
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Result<Self, MeshError> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(MeshError::Empty);
        }
        if indices.len() % 3 != 0 {
            return Err(MeshError::NotTriangleList(indices.len()));
        }
        if let Some((position, &index)) = indices
            .iter()
            .enumerate()
            .find(|(_, &index)| index as usize >= vertices.len())
        {
            return Err(MeshError::IndexOutOfBounds {
                index,
                position,
                vertex_count: vertices.len(),
            });
        }
        Ok(Self { vertices, indices })
    }

    /// Builds mesh data from positions and texture coordinates and fills in
    /// flat normals.
    pub fn with_flat_normals(
        positions: &[[f32; 3]],
        tex_coords: &[[f32; 2]],
        indices: Vec<u32>,
    ) -> Result<Self, MeshError> {
        let vertices = positions
            .iter()
            .enumerate()
            .map(|(i, &position)| {
                let uv = tex_coords.get(i).copied().unwrap_or([0.0, 0.0]);
                Vertex::new(position, [0.0, 0.0, 0.0], uv)
            })
            .collect();
        let mut data = Self::new(vertices, indices)?;
        data.compute_flat_normals();
        Ok(data)
    }

    /// Replaces every normal with the face normal of a triangle that uses
    /// the vertex. Shared vertices keep the normal of the last triangle.
    pub fn compute_flat_normals(&mut self) {
        for triangle in self.indices.chunks_exact(3) {
            let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|i| self.vertices[i as usize].position);
            let normal = face_normal(a, b, c);
            for &i in triangle {
                self.vertices[i as usize].normal = normal;
            }
        }
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// `normalize(cross(b - a, c - a))`, or zero for a degenerate triangle.
pub fn face_normal(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> [f32; 3] {
    let a = Vector3::from(a);
    let n = (Vector3::from(b) - a).cross(Vector3::from(c) - a);
    if n.magnitude2() <= f32::EPSILON * f32::EPSILON {
        return [0.0, 0.0, 0.0];
    }
    n.normalize().into()
}

// =============================================================================
// GPU Mesh
// =============================================================================

/// Vertex and index buffers of one mesh, plus a bind group exposing both as
/// storage buffers to vertex-pulling programs.
pub struct MeshBuffers {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub patch_bind_group: wgpu::BindGroup,
    index_count: u32,
}

impl MeshBuffers {
    pub fn new(gpu: &GpuContext, data: &MeshData, label: &str) -> Self {
        let vertex_buffer = gpu.device.create_buffer_init(&BufferInitDescriptor {
            label: Some(&format!("{label} Vertex Buffer")),
            contents: bytemuck::cast_slice(data.vertices()),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE,
        });
        let index_buffer = gpu.device.create_buffer_init(&BufferInitDescriptor {
            label: Some(&format!("{label} Index Buffer")),
            contents: bytemuck::cast_slice(data.indices()),
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::STORAGE,
        });
        let patch_bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label} Patch Bind Group")),
            layout: &gpu.layouts.patch_indexed,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: vertex_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: index_buffer.as_entire_binding(),
                },
            ],
        });

        Self {
            vertex_buffer,
            index_buffer,
            patch_bind_group,
            index_count: data.indices().len() as u32,
        }
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// A drawable triangle mesh with its material and optional texture.
///
/// GPU buffers are created by [`Mesh::upload`]. A mesh without them still
/// walks the full draw sequence; the pass skips the draw call itself.
pub struct Mesh {
    data: MeshData,
    material: Material,
    texture: Option<GpuTexture>,
    buffers: Option<MeshBuffers>,
}

impl Mesh {
    pub fn new(gpu: &GpuContext, data: MeshData, material: Material, texture: Option<GpuTexture>) -> Self {
        let mut mesh = Self::from_data(data, material);
        mesh.texture = texture;
        mesh.upload(gpu);
        mesh
    }

    pub fn from_data(data: MeshData, material: Material) -> Self {
        Self {
            data,
            material,
            texture: None,
            buffers: None,
        }
    }

    /// Creates the vertex and index buffers. Replaces earlier ones.
    pub fn upload(&mut self, gpu: &GpuContext) {
        self.buffers = Some(MeshBuffers::new(gpu, &self.data, "Mesh"));
    }

    pub fn data(&self) -> &MeshData {
        &self.data
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn has_texture(&self) -> bool {
        self.texture.is_some()
    }

    pub fn buffers(&self) -> Option<&MeshBuffers> {
        self.buffers.as_ref()
    }

    /// Uploads the material, binds the texture and issues the draw. The
    /// caller has already pushed the owning node.
    pub fn draw<T: DrawTarget>(&self, ctx: &mut DrawContext<'_, T>) {
        ctx.upload_material(&self.material, self.texture.is_some());
        if let Some(texture) = &self.texture {
            ctx.bind_texture(texture);
        }
        let topology = if ctx.target().tess_control_shader() {
            Topology::Patches { size: 3 }
        } else {
            Topology::Triangles
        };
        ctx.target_mut().draw_mesh(self, topology);
    }
}
