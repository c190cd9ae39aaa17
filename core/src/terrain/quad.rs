use cgmath::Matrix4;
use wgpu::util::{BufferInitDescriptor, DeviceExt};

use crate::{
    config::EngineConfig,
    gpu::GpuContext,
    pass::PassRecorder,
    program::{BindSlot, PassTarget, PipelineOptions, Program, ProgramDescriptor, VertexInput},
    scene::{
        state::FrameParams,
        texture::{GpuTexture, Heightmap},
    },
    shaders::{ShaderLibrary, ShaderSet},
    shadow::ShadowMap,
};

use super::{
    patch_terrain_layout, sample_height, set_patch_uniforms, Terrain, TerrainError, TerrainImages,
    TerrainMode, QUAD_PLANE_SIZE, TERRAIN_DIMENSIONS,
};

const COVER_UNIT: u32 = 0;
const HEIGHTMAP_UNIT: u32 = 1;

/// Two triangle patches per grid cell, as XZ corners in the unit square
/// centered on the origin.
///
/// Each cell `(x, y)` yields the corners `(x, y+1), (x+1, y), (x, y)` and
/// `(x+1, y+1), (x+1, y), (x, y+1)`, counter-clockwise seen from above.
pub fn make_quad_plane(width: u32, height: u32) -> Vec<[f32; 2]> {
    let at = |x: u32, y: u32| [x as f32 / width as f32 - 0.5, y as f32 / height as f32 - 0.5];

    let mut corners = Vec::with_capacity((width * height * 6) as usize);
    for x in 0..width {
        for y in 0..height {
            corners.extend_from_slice(&[at(x, y + 1), at(x + 1, y), at(x, y)]);
            corners.extend_from_slice(&[at(x + 1, y + 1), at(x + 1, y), at(x, y + 1)]);
        }
    }
    corners
}

/// A flat grid of triangle patches, tessellated and displaced by the
/// heightmap on the GPU.
pub struct QuadTerrain {
    corners: wgpu::Buffer,
    patch_count: u32,
    cover: GpuTexture,
    heightmap_texture: GpuTexture,
    heightmap: Heightmap,
    program: Program,
    shadow_program: Program,
    transform: Matrix4<f32>,
}

impl QuadTerrain {
    pub fn new(
        gpu: &GpuContext,
        library: &ShaderLibrary,
        config: &EngineConfig,
    ) -> Result<Self, TerrainError> {
        let program = Self::create_program(gpu, library, false)?;
        let shadow_program = Self::create_program(gpu, library, true)?;
        let images = TerrainImages::load(gpu, &config.resource_root)?;
        let heightmap_texture = images.heightmap_texture(gpu);

        let plane = make_quad_plane(QUAD_PLANE_SIZE, QUAD_PLANE_SIZE);
        let corners = gpu.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Quad Terrain Corners"),
            contents: bytemuck::cast_slice(&plane),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let patch_count = (plane.len() / 3) as u32;
        log::info!("Quad terrain: {} patches", patch_count);

        Ok(Self {
            corners,
            patch_count,
            cover: images.cover,
            heightmap_texture,
            heightmap: images.heightmap,
            program,
            shadow_program,
            transform: Matrix4::from_scale(TERRAIN_DIMENSIONS),
        })
    }

    fn create_program(
        gpu: &GpuContext,
        library: &ShaderLibrary,
        shadow: bool,
    ) -> Result<Program, TerrainError> {
        let mut shaders = ShaderSet::new(&["common", "lighting"], "quad_terrain");
        shaders.tessellation_control = Some("tess_level");
        shaders.tessellation_evaluation = Some("triangle_patch");
        shaders.geometry = Some("face_normals");

        let (label, options) = if shadow {
            ("Quad Terrain Shadow", PipelineOptions::shadow(VertexInput::PatchCorners))
        } else {
            ("Quad Terrain", PipelineOptions::color(VertexInput::PatchCorners))
        };

        let program = Program::new(
            gpu,
            library,
            ProgramDescriptor {
                label,
                shaders,
                features: &[],
                layout: patch_terrain_layout(),
                slots: &[
                    BindSlot::Uniforms,
                    BindSlot::Texture(COVER_UNIT),
                    BindSlot::Texture(HEIGHTMAP_UNIT),
                    BindSlot::ShadowMap,
                ],
                options: options.cull(None),
            },
        )?;
        Ok(program)
    }

    fn draw_with<'a>(
        &'a self,
        program: &'a Program,
        pass: &mut PassRecorder<'a>,
        frame: &FrameParams,
        shadow_map: Option<&'a ShadowMap>,
    ) {
        let from_light = program.options().target == PassTarget::DepthOnly;
        pass.use_program(program);
        pass.bind_slot(BindSlot::Texture(COVER_UNIT), &self.cover.bind_group);
        pass.bind_slot(BindSlot::Texture(HEIGHTMAP_UNIT), &self.heightmap_texture.bind_group);
        if let Some(shadow_map) = shadow_map {
            pass.bind_shadow_map(shadow_map);
        }
        let level = pass.tess_level();
        set_patch_uniforms(pass, frame, self.transform, from_light, level);
        pass.set_vertex_buffer(0, &self.corners);
        pass.draw_triangle_patches(self.patch_count);
    }
}

impl Terrain for QuadTerrain {
    fn mode(&self) -> TerrainMode {
        TerrainMode::DynTerrain
    }

    fn draw_terrain<'a>(
        &'a self,
        pass: &mut PassRecorder<'a>,
        frame: &FrameParams,
        shadow_map: Option<&'a ShadowMap>,
    ) {
        self.draw_with(&self.program, pass, frame, shadow_map);
    }

    fn draw_shadow<'a>(&'a self, pass: &mut PassRecorder<'a>, frame: &FrameParams) {
        self.draw_with(&self.shadow_program, pass, frame, None);
    }

    fn height_at(&self, x: f32, y: f32) -> f32 {
        sample_height(&self.heightmap, x, y, TERRAIN_DIMENSIONS)
    }

    fn programs_mut(&mut self) -> Vec<&mut Program> {
        vec![&mut self.program, &mut self.shadow_program]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{common::EPSILON, scene::mesh::face_normal};

    fn lift(corner: [f32; 2]) -> [f32; 3] {
        [corner[0], 0.0, corner[1]]
    }

    #[test]
    fn test_six_corners_per_quad() {
        assert_eq!(make_quad_plane(3, 2).len(), 3 * 2 * 6);
    }

    #[test]
    fn test_plane_spans_unit_square() {
        let plane = make_quad_plane(4, 4);
        for corner in &plane {
            assert!(corner[0] >= -0.5 - EPSILON && corner[0] <= 0.5 + EPSILON);
            assert!(corner[1] >= -0.5 - EPSILON && corner[1] <= 0.5 + EPSILON);
        }
        assert!(plane.iter().any(|c| (c[0] - 0.5).abs() < EPSILON && (c[1] - 0.5).abs() < EPSILON));
    }

    #[test]
    fn test_first_cell_corners() {
        let plane = make_quad_plane(2, 2);
        assert_eq!(plane[0], [-0.5, 0.0]);
        assert_eq!(plane[1], [0.0, -0.5]);
        assert_eq!(plane[2], [-0.5, -0.5]);
        assert_eq!(plane[3], [0.0, 0.0]);
    }

    #[test]
    fn test_patches_wind_counter_clockwise_from_above() {
        for patch in make_quad_plane(3, 3).chunks_exact(3) {
            let normal = face_normal(lift(patch[0]), lift(patch[1]), lift(patch[2]));
            assert!((normal[1] - 1.0).abs() < EPSILON, "normal {:?}", normal);
        }
    }
}
