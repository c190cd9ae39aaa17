use cgmath::Matrix4;
use wgpu::util::{BufferInitDescriptor, DeviceExt};

use crate::{
    config::EngineConfig,
    gpu::GpuContext,
    pass::{FrameUniforms, PassRecorder},
    program::{BindSlot, PassTarget, PipelineOptions, Program, ProgramDescriptor, VertexInput},
    scene::{
        state::FrameParams,
        texture::{GpuTexture, Heightmap},
    },
    shaders::{ShaderLibrary, ShaderSet},
    shadow::ShadowMap,
};

use super::{
    map_to_height, patch_terrain_layout, sample_height, set_patch_uniforms, Terrain, TerrainError,
    TerrainImages, TerrainMode, BEZIER_PLANE_SIZE, MAX_TESS_LEVEL, TERRAIN_DIMENSIONS,
};

const COVER_UNIT: u32 = 0;

/// Control points per patch.
pub const PATCH_POINTS: usize = 16;

/// A square grid of control points and the 16 indices of every bicubic
/// patch over it.
///
/// Neighbouring patches share their border row of control points, which
/// makes a plane of `size = 3n + 4` points hold `n + 1` patches per row.
#[derive(Debug, Clone, PartialEq)]
pub struct BezierPlane {
    pub size: u32,
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl BezierPlane {
    pub fn patches_per_row(&self) -> u32 {
        (self.size - 4) / 3 + 1
    }

    pub fn patch_count(&self) -> u32 {
        (self.indices.len() / PATCH_POINTS) as u32
    }

    /// Control points padded to `vec4` for storage buffer upload.
    fn padded_positions(&self) -> Vec<[f32; 4]> {
        self.positions.iter().map(|&[x, y, z]| [x, y, z, 1.0]).collect()
    }
}

/// Samples `heightmap` into a `size` by `size` control grid in the unit
/// square centered on the origin.
///
/// Point `x * size + y` sits at `(x / size, height, y / size) - (0.5, 0, 0.5)`.
/// Patch `(x, y)` starts at point `y * 3 + x * size * 3` and takes four
/// consecutive points from each of four consecutive rows.
pub fn make_bezier_plane(size: u32, heightmap: &Heightmap) -> Result<BezierPlane, TerrainError> {
    if size <= 4 || (size - 4) % 3 != 0 {
        return Err(TerrainError::InvalidPatchSize(size));
    }

    let xratio = heightmap.width() as f32 / size as f32;
    let yratio = heightmap.height() as f32 / size as f32;

    let mut positions = Vec::with_capacity((size * size) as usize);
    for x in 0..size {
        for y in 0..size {
            let red = heightmap.red_at((x as f32 * xratio) as u32, (y as f32 * yratio) as u32);
            positions.push([
                x as f32 / size as f32 - 0.5,
                map_to_height(red),
                y as f32 / size as f32 - 0.5,
            ]);
        }
    }

    let patches_per_row = (size - 4) / 3 + 1;
    let mut indices = Vec::with_capacity((patches_per_row * patches_per_row) as usize * PATCH_POINTS);
    for x in 0..patches_per_row {
        for y in 0..patches_per_row {
            let corner = y * 3 + x * size * 3;
            for j in 0..4 {
                let row = corner + size * j;
                indices.extend_from_slice(&[row, row + 1, row + 2, row + 3]);
            }
        }
    }

    Ok(BezierPlane {
        size,
        positions,
        indices,
    })
}

/// Bicubic Bezier patches evaluated on the GPU. The light-space depth of
/// the terrain is rendered once into a cached map at the maximum
/// tessellation level, and copied into the scene map every frame.
pub struct BezierTerrain {
    patch_bind_group: wgpu::BindGroup,
    // Kept alive for the bind group
    _control_points: wgpu::Buffer,
    _indices: wgpu::Buffer,
    patch_count: u32,
    cover: GpuTexture,
    heightmap: Heightmap,
    program: Program,
    shadow_program: Program,
    shadow_map: ShadowMap,
    transform: Matrix4<f32>,
}

impl BezierTerrain {
    pub fn new(
        gpu: &GpuContext,
        library: &ShaderLibrary,
        config: &EngineConfig,
    ) -> Result<Self, TerrainError> {
        let program = Self::create_program(gpu, library, false)?;
        let shadow_program = Self::create_program(gpu, library, true)?;
        let TerrainImages { heightmap, cover } = TerrainImages::load(gpu, &config.resource_root)?;

        let plane = make_bezier_plane(BEZIER_PLANE_SIZE, &heightmap)?;
        let control_points = gpu.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Bezier Control Points"),
            contents: bytemuck::cast_slice(&plane.padded_positions()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let indices = gpu.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Bezier Patch Indices"),
            contents: bytemuck::cast_slice(&plane.indices),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let patch_bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bezier Patch Bind Group"),
            layout: &gpu.layouts.patch_indexed,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: control_points.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: indices.as_entire_binding(),
                },
            ],
        });
        log::info!(
            "Bezier terrain: {} patches over {}x{} control points",
            plane.patch_count(),
            plane.size,
            plane.size
        );

        let shadow_map = ShadowMap::new(
            &gpu.device,
            &gpu.layouts.shadow,
            config.shadow_map_size,
            "Bezier Terrain Shadow Map",
        );

        Ok(Self {
            patch_bind_group,
            _control_points: control_points,
            _indices: indices,
            patch_count: plane.patch_count(),
            cover,
            heightmap,
            program,
            shadow_program,
            shadow_map,
            transform: Matrix4::from_scale(TERRAIN_DIMENSIONS),
        })
    }

    fn create_program(
        gpu: &GpuContext,
        library: &ShaderLibrary,
        shadow: bool,
    ) -> Result<Program, TerrainError> {
        let mut shaders = ShaderSet::new(&["common", "lighting"], "bezier_terrain");
        shaders.tessellation_control = Some("tess_level");
        shaders.tessellation_evaluation = Some("bezier_patch");

        let (label, options) = if shadow {
            ("Bezier Terrain Shadow", PipelineOptions::shadow(VertexInput::Pulled))
        } else {
            ("Bezier Terrain", PipelineOptions::color(VertexInput::Pulled))
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
                    BindSlot::ShadowMap,
                    BindSlot::PatchSource,
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
        pass.bind_slot(BindSlot::PatchSource, &self.patch_bind_group);
        if let Some(shadow_map) = shadow_map {
            pass.bind_shadow_map(shadow_map);
        }
        let level = pass.tess_level();
        set_patch_uniforms(pass, frame, self.transform, from_light, level);
        // Two triangles per cell of a level x level grid over each patch
        pass.draw(0..6 * level * level, 0..self.patch_count);
    }
}

impl Terrain for BezierTerrain {
    fn mode(&self) -> TerrainMode {
        TerrainMode::BezierTerrain
    }

    fn draw_terrain<'a>(
        &'a self,
        pass: &mut PassRecorder<'a>,
        frame: &FrameParams,
        shadow_map: Option<&'a ShadowMap>,
    ) {
        self.draw_with(&self.program, pass, frame, shadow_map);
    }

    fn recompute_shadow_map(&self, gpu: &GpuContext, frame: &FrameParams) {
        let _scope = gpu.error_scope("Bezier shadow map");
        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Bezier Shadow Encoder"),
        });
        let pass = encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Bezier Shadow Pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(self.shadow_map.depth_attachment(true)),
                occlusion_query_set: None,
                timestamp_writes: None,
            })
            .forget_lifetime();

        let mut recorder = PassRecorder::new(pass, FrameUniforms::new(), &gpu.defaults, false, MAX_TESS_LEVEL);
        let frame = FrameParams {
            dynamic_tessellation: false,
            ..*frame
        };
        self.draw_with(&self.shadow_program, &mut recorder, &frame, None);
        recorder.finish().flush(&gpu.queue);

        gpu.queue.submit(Some(encoder.finish()));
        log::debug!("Recomputed Bezier terrain shadow map");
    }

    fn shadow_map(&self) -> Option<&ShadowMap> {
        Some(&self.shadow_map)
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
    use crate::common::EPSILON;
    use image::{Rgba, RgbaImage};

    fn heightmap(red: u8) -> Heightmap {
        Heightmap::from_image(RgbaImage::from_pixel(64, 64, Rgba([red, 0, 0, 255])))
    }

    #[test]
    fn test_production_size_is_accepted() {
        let plane = make_bezier_plane(BEZIER_PLANE_SIZE, &heightmap(128)).unwrap();
        assert_eq!(plane.positions.len(), 139 * 139);
        assert_eq!(plane.patches_per_row(), 46);
        assert_eq!(plane.indices.len(), 46 * 46 * 16);
    }

    #[test]
    fn test_invalid_sizes_are_rejected() {
        for size in [0, 4, 5, 140] {
            assert!(
                matches!(make_bezier_plane(size, &heightmap(0)), Err(TerrainError::InvalidPatchSize(s)) if s == size),
                "size {size}"
            );
        }
    }

    #[test]
    fn test_smallest_valid_plane() {
        let plane = make_bezier_plane(7, &heightmap(0)).unwrap();
        assert_eq!(plane.patch_count(), 4);
        // First patch: the first four points of grid rows 0 and 1
        assert_eq!(&plane.indices[..8], &[0, 1, 2, 3, 7, 8, 9, 10]);
    }

    #[test]
    fn test_patches_share_borders() {
        let plane = make_bezier_plane(10, &heightmap(0)).unwrap();
        let first = &plane.indices[..PATCH_POINTS];
        let next = &plane.indices[PATCH_POINTS..2 * PATCH_POINTS];
        // The second patch starts on the last column of the first
        assert_eq!(next[0], first[3]);
        assert_eq!(next[12], first[15]);
    }

    #[test]
    fn test_indices_stay_in_grid() {
        let plane = make_bezier_plane(BEZIER_PLANE_SIZE, &heightmap(0)).unwrap();
        let count = plane.positions.len() as u32;
        assert!(plane.indices.iter().all(|&i| i < count));
    }

    #[test]
    fn test_control_point_positions() {
        let plane = make_bezier_plane(7, &heightmap(255)).unwrap();
        let p = plane.positions[2 * 7 + 3];
        assert!((p[0] - (2.0 / 7.0 - 0.5)).abs() < EPSILON);
        assert!((p[1] - 1.0 / 6.0).abs() < EPSILON);
        assert!((p[2] - (3.0 / 7.0 - 0.5)).abs() < EPSILON);
    }
}
