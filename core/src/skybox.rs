//! Cube-mapped sky drawn behind everything else.

use std::path::{Path, PathBuf};

use cgmath::Matrix4;
use image::RgbaImage;
use rayon::prelude::*;
use wgpu::util::{BufferInitDescriptor, DeviceExt};

use crate::{
    gpu::GpuContext,
    pass::PassRecorder,
    program::{BindSlot, PipelineOptions, Program, ProgramDescriptor, ProgramError, VertexInput},
    scene::texture::{load_rgba, TextureError},
    shaders::{ShaderLibrary, ShaderSet},
    uniforms::{UniformLayout, UniformType, UniformValue},
};

/// Face images in cube layer order: +X, -X, +Y, -Y, +Z, -Z.
pub const FACE_NAMES: [&str; 6] = ["right", "left", "top", "bottom", "back", "front"];

const FACES_DIR: &str = "skybox/faces";

#[derive(Debug, thiserror::Error)]
pub enum SkyboxError {
    #[error("Skybox face failed: {0}")]
    Texture(#[from] TextureError),
    #[error("Skybox program failed: {0}")]
    Program(#[from] ProgramError),
}

/// Paths of the six faces under `resource_root`, in layer order.
pub fn face_paths(resource_root: &Path) -> [PathBuf; 6] {
    FACE_NAMES.map(|name| resource_root.join(FACES_DIR).join(format!("{name}.jpg")))
}

/// Checks that all faces are squares of the same side, and returns it.
pub fn face_size(faces: &[(PathBuf, RgbaImage)]) -> Result<u32, TextureError> {
    let expected = faces.first().map(|(_, image)| image.width()).unwrap_or(0);
    for (path, image) in faces {
        if image.width() != expected || image.height() != expected || expected == 0 {
            return Err(TextureError::CubemapFace {
                path: path.clone(),
                width: image.width(),
                height: image.height(),
                expected,
            });
        }
    }
    Ok(expected)
}

#[rustfmt::skip]
const CUBE_POSITIONS: [[f32; 3]; 36] = [
    [-1.0,  1.0, -1.0], [-1.0, -1.0, -1.0], [ 1.0, -1.0, -1.0],
    [ 1.0, -1.0, -1.0], [ 1.0,  1.0, -1.0], [-1.0,  1.0, -1.0],

    [-1.0, -1.0,  1.0], [-1.0, -1.0, -1.0], [-1.0,  1.0, -1.0],
    [-1.0,  1.0, -1.0], [-1.0,  1.0,  1.0], [-1.0, -1.0,  1.0],

    [ 1.0, -1.0, -1.0], [ 1.0, -1.0,  1.0], [ 1.0,  1.0,  1.0],
    [ 1.0,  1.0,  1.0], [ 1.0,  1.0, -1.0], [ 1.0, -1.0, -1.0],

    [-1.0, -1.0,  1.0], [-1.0,  1.0,  1.0], [ 1.0,  1.0,  1.0],
    [ 1.0,  1.0,  1.0], [ 1.0, -1.0,  1.0], [-1.0, -1.0,  1.0],

    [-1.0,  1.0, -1.0], [ 1.0,  1.0, -1.0], [ 1.0,  1.0,  1.0],
    [ 1.0,  1.0,  1.0], [-1.0,  1.0,  1.0], [-1.0,  1.0, -1.0],

    [-1.0, -1.0, -1.0], [-1.0, -1.0,  1.0], [ 1.0, -1.0, -1.0],
    [ 1.0, -1.0, -1.0], [-1.0, -1.0,  1.0], [ 1.0, -1.0,  1.0],
];

/// Six-layer cube texture sampled by direction.
pub struct GpuCubemap {
    #[allow(unused)]
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub bind_group: wgpu::BindGroup,
}

impl GpuCubemap {
    /// Uploads validated faces; every image must be `size` by `size`.
    pub fn from_faces(gpu: &GpuContext, faces: &[RgbaImage], size: u32, label: &str) -> Self {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 6,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (layer, face) in faces.iter().enumerate() {
            gpu.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    aspect: wgpu::TextureAspect::All,
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: layer as u32,
                    },
                },
                face.as_raw(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * size),
                    rows_per_image: Some(size),
                },
                wgpu::Extent3d {
                    width: size,
                    height: size,
                    depth_or_array_layers: 1,
                },
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{label} Cube View")),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            array_layer_count: Some(6),
            ..Default::default()
        });
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{label} Sampler")),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label} Bind Group")),
            layout: &gpu.layouts.cubemap,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        Self {
            texture,
            view,
            sampler,
            bind_group,
        }
    }
}

pub struct Skybox {
    cubemap: GpuCubemap,
    cube: wgpu::Buffer,
    program: Program,
}

impl Skybox {
    pub fn new(gpu: &GpuContext, library: &ShaderLibrary, resource_root: &Path) -> Result<Self, SkyboxError> {
        // Decoding the faces dominates startup
        let faces = face_paths(resource_root)
            .into_par_iter()
            .map(|path| load_rgba(&path).map(|image| (path, image)))
            .collect::<Result<Vec<_>, _>>()?;
        let size = face_size(&faces)?;
        let images: Vec<RgbaImage> = faces.into_iter().map(|(_, image)| image).collect();
        let cubemap = GpuCubemap::from_faces(gpu, &images, size, "Skybox");
        log::info!("Loaded skybox with {}px faces", size);

        let cube = gpu.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Skybox Cube"),
            contents: bytemuck::cast_slice(&CUBE_POSITIONS),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Ok(Self {
            cubemap,
            cube,
            program: Self::create_program(gpu, library)?,
        })
    }

    fn create_program(gpu: &GpuContext, library: &ShaderLibrary) -> Result<Program, ProgramError> {
        Program::new(
            gpu,
            library,
            ProgramDescriptor {
                label: "Skybox",
                shaders: ShaderSet::new(&[], "skybox"),
                features: &[],
                layout: UniformLayout::new(&[("uViewProjection", UniformType::Mat4)]),
                slots: &[BindSlot::Uniforms, BindSlot::Cubemap],
                options: PipelineOptions::color(VertexInput::Position3)
                    .cull(None)
                    .depth(false, wgpu::CompareFunction::LessEqual),
            },
        )
    }

    /// Rebuilds the program from the current shader sources. The old
    /// program stays in use on failure.
    pub fn reload(&mut self, gpu: &GpuContext, library: &ShaderLibrary) -> Result<(), ProgramError> {
        self.program = Self::create_program(gpu, library)?;
        Ok(())
    }

    /// Draws the sky at the far plane. `view_projection` must not translate.
    pub fn draw<'a>(&'a self, pass: &mut PassRecorder<'a>, view_projection: Matrix4<f32>) {
        pass.use_program(&self.program);
        pass.bind_slot(BindSlot::Cubemap, &self.cubemap.bind_group);
        pass.set_named("uViewProjection", UniformValue::Mat4(view_projection));
        pass.set_vertex_buffer(0, &self.cube);
        pass.draw(0..CUBE_POSITIONS.len() as u32, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(name: &str, width: u32, height: u32) -> (PathBuf, RgbaImage) {
        (PathBuf::from(name), RgbaImage::new(width, height))
    }

    #[test]
    fn test_face_paths_in_layer_order() {
        let paths = face_paths(Path::new("res"));
        assert_eq!(paths[0], Path::new("res/skybox/faces/right.jpg"));
        assert_eq!(paths[4], Path::new("res/skybox/faces/back.jpg"));
        assert_eq!(paths[5], Path::new("res/skybox/faces/front.jpg"));
    }

    #[test]
    fn test_equal_square_faces() {
        let faces: Vec<_> = FACE_NAMES.iter().map(|name| face(name, 8, 8)).collect();
        assert_eq!(face_size(&faces).unwrap(), 8);
    }

    #[test]
    fn test_rectangular_face_is_rejected() {
        let mut faces: Vec<_> = FACE_NAMES.iter().map(|name| face(name, 8, 8)).collect();
        faces[2] = face("top", 8, 4);
        match face_size(&faces) {
            Err(TextureError::CubemapFace { path, height, expected, .. }) => {
                assert_eq!(path, PathBuf::from("top"));
                assert_eq!(height, 4);
                assert_eq!(expected, 8);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_face_sizes_are_rejected() {
        let mut faces: Vec<_> = FACE_NAMES.iter().map(|name| face(name, 8, 8)).collect();
        faces[5] = face("front", 16, 16);
        assert!(matches!(face_size(&faces), Err(TextureError::CubemapFace { .. })));
    }
}
