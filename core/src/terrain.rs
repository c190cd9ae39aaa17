//! Height-mapped ground, drawn by one of three strategies.
//!
//! Every strategy is built from the same pair of images under
//! `res/terrain/`: a heightmap whose red channel encodes elevation and a
//! tiling cover texture. A CPU copy of the heightmap answers
//! [`Terrain::height_at`], so that objects can be placed on the ground.

pub mod bezier;
pub mod quad;
pub mod static_mesh;

use std::path::Path;

use crate::{
    config::EngineConfig,
    gpu::GpuContext,
    pass::PassRecorder,
    program::{Program, ProgramError},
    scene::{
        mesh::MeshError,
        state::FrameParams,
        texture::{GpuTexture, Heightmap, TextureError, TextureOptions},
    },
    shaders::ShaderLibrary,
    shadow::ShadowMap,
    uniforms::{UniformLayout, UniformType, UniformValue},
};

pub use bezier::{make_bezier_plane, BezierPlane, BezierTerrain};
pub use quad::{make_quad_plane, QuadTerrain};
pub use static_mesh::{static_heightmap_mesh, StaticTerrain};

/// Side length of the terrain in world units.
pub const TERRAIN_DIMENSIONS: f32 = 100.0;

/// Highest tessellation level a patch is subdivided into.
pub const MAX_TESS_LEVEL: u32 = 16;

pub const DEFAULT_TESS_LEVEL: u32 = 8;

/// Control points per side of the Bezier plane.
pub const BEZIER_PLANE_SIZE: u32 = 139;

/// Quads per side of the dynamic terrain grid.
pub const QUAD_PLANE_SIZE: u32 = 64;

/// Times the cover texture repeats across the static terrain.
pub const COVER_REPEAT: f32 = 8.0;

const HEIGHTMAP_PATH: &str = "terrain/heightmap.png";
const COVER_PATH: &str = "terrain/cover.png";

/// Maps a heightmap byte to a height in `[-1/6, 1/6]` of the terrain size.
pub fn map_to_height(byte: u8) -> f32 {
    let portion = byte as f32 / 255.0;
    (portion - 0.5) / 3.0
}

/// Height at world coordinates `x, y` in `[0, extent)`, sampled from the red
/// channel of `heightmap`.
pub fn sample_height(heightmap: &Heightmap, x: f32, y: f32, extent: f32) -> f32 {
    debug_assert!(
        (0.0..extent).contains(&x) && (0.0..extent).contains(&y),
        "Terrain height queried outside of the terrain: ({x}, {y})"
    );
    let x = x.clamp(0.0, extent);
    let y = y.clamp(0.0, extent);
    let px = (x / extent * heightmap.width() as f32) as u32;
    let py = (y / extent * heightmap.height() as f32) as u32;
    map_to_height(heightmap.red_at(px, py)) * extent
}

/// Which terrain strategy a scene is built with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum TerrainMode {
    NoTerrain,
    /// One static triangle per heightmap pixel pair.
    Terrain,
    /// Tessellated quad grid displaced on the GPU.
    #[default]
    DynTerrain,
    /// Bicubic Bezier patches over sampled control points.
    BezierTerrain,
}

/// Errors when building a terrain.
#[derive(Debug, thiserror::Error)]
pub enum TerrainError {
    #[error("Terrain program failed: {0}")]
    Program(#[from] ProgramError),
    #[error("Terrain texture failed: {0}")]
    Texture(#[from] TextureError),
    #[error("Terrain mesh failed: {0}")]
    Mesh(#[from] MeshError),
    #[error("Invalid Bezier plane size {0}: must be 3n + 4")]
    InvalidPatchSize(u32),
}

/// A drawable ground.
pub trait Terrain: Send {
    fn mode(&self) -> TerrainMode;

    /// Records the color-pass draw. `shadow_map` is the scene map holding
    /// this frame's light-space depth, if shadows are enabled.
    fn draw_terrain<'a>(
        &'a self,
        pass: &mut PassRecorder<'a>,
        frame: &FrameParams,
        shadow_map: Option<&'a ShadowMap>,
    );

    /// Records depth from the light into the scene shadow pass. Terrains
    /// with a cached map skip this.
    fn draw_shadow<'a>(&'a self, _pass: &mut PassRecorder<'a>, _frame: &FrameParams) {}

    /// Re-renders the cached light-space depth, if the terrain keeps one.
    fn recompute_shadow_map(&self, _gpu: &GpuContext, _frame: &FrameParams) {}

    fn shadow_map(&self) -> Option<&ShadowMap> {
        None
    }

    fn wants_shadow_map(&self) -> bool {
        true
    }

    /// Height at world coordinates in `[0, TERRAIN_DIMENSIONS)`.
    fn height_at(&self, x: f32, y: f32) -> f32;

    /// Uniform snapshots the terrain stages per frame and program.
    fn draw_count(&self) -> usize {
        1
    }

    fn programs_mut(&mut self) -> Vec<&mut Program>;
}

/// Builds the terrain of `config`. `NoTerrain` yields `None`.
pub fn create_terrain(
    gpu: &GpuContext,
    library: &ShaderLibrary,
    config: &EngineConfig,
) -> Result<Option<Box<dyn Terrain>>, TerrainError> {
    let terrain: Box<dyn Terrain> = match config.terrain_mode {
        TerrainMode::NoTerrain => return Ok(None),
        TerrainMode::Terrain => Box::new(StaticTerrain::new(gpu, library, config)?),
        TerrainMode::DynTerrain => Box::new(QuadTerrain::new(gpu, library, config)?),
        TerrainMode::BezierTerrain => Box::new(BezierTerrain::new(gpu, library, config)?),
    };
    log::info!("Created {:?}", terrain.mode());
    Ok(Some(terrain))
}

// =============================================================================
// Shared Resources
// =============================================================================

/// The images every strategy starts from.
pub(crate) struct TerrainImages {
    pub heightmap: Heightmap,
    pub cover: GpuTexture,
}

impl TerrainImages {
    pub fn load(gpu: &GpuContext, resource_root: &Path) -> Result<Self, TerrainError> {
        let heightmap = Heightmap::from_path(&resource_root.join(HEIGHTMAP_PATH))?;
        let cover = GpuTexture::from_path(
            &gpu.device,
            &gpu.queue,
            &gpu.layouts.texture,
            &resource_root.join(COVER_PATH),
            TextureOptions::tiled(),
        )?;
        log::info!(
            "Loaded heightmap {}x{} and cover {:?}",
            heightmap.width(),
            heightmap.height(),
            cover.size()
        );
        Ok(Self { heightmap, cover })
    }

    /// Uploads the heightmap for shaders that displace on the GPU.
    pub fn heightmap_texture(&self, gpu: &GpuContext) -> GpuTexture {
        GpuTexture::from_image(
            &gpu.device,
            &gpu.queue,
            &gpu.layouts.texture,
            self.heightmap.image(),
            TextureOptions::data(),
            "Heightmap",
        )
    }
}

/// Uniform block of the patch-based terrain programs.
pub(crate) fn patch_terrain_layout() -> UniformLayout {
    UniformLayout::new(&[
        ("uViewProjection", UniformType::Mat4),
        ("uShadowMapViewProjection", UniformType::Mat4),
        ("uModel", UniformType::Mat4),
        ("uCameraPosition", UniformType::Vec3),
        ("uDimension", UniformType::Float),
        ("uLightSourcePosition", UniformType::Vec3),
        ("uTessLevel", UniformType::Int),
        ("uDynamicTessellation", UniformType::Int),
        ("uShadowsEnabled", UniformType::Int),
    ])
}

/// Writes the frame uniforms shared by the patch terrains. From the light,
/// the eye is the light position and the view is the light's.
pub(crate) fn set_patch_uniforms(
    pass: &mut PassRecorder<'_>,
    frame: &FrameParams,
    model: cgmath::Matrix4<f32>,
    from_light: bool,
    tess_level: u32,
) {
    let (view_projection, eye) = if from_light {
        (frame.shadow_view_projection, frame.light_position)
    } else {
        (frame.view_projection, frame.camera_position)
    };
    pass.set_named("uViewProjection", UniformValue::Mat4(view_projection));
    pass.set_named(
        "uShadowMapViewProjection",
        UniformValue::Mat4(frame.shadow_view_projection),
    );
    pass.set_named("uModel", UniformValue::Mat4(model));
    pass.set_named("uCameraPosition", UniformValue::Vec3(cgmath::Vector3::new(eye.x, eye.y, eye.z)));
    pass.set_named("uDimension", UniformValue::Float(TERRAIN_DIMENSIONS));
    let light = frame.light_position;
    pass.set_named(
        "uLightSourcePosition",
        UniformValue::Vec3(cgmath::Vector3::new(light.x, light.y, light.z)),
    );
    pass.set_named("uTessLevel", UniformValue::Int(tess_level as i32));
    pass.set_named("uDynamicTessellation", frame.dynamic_tessellation.into());
    pass.set_named("uShadowsEnabled", (frame.shadows_enabled && !from_light).into());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::EPSILON;
    use image::{Rgba, RgbaImage};

    fn flat_heightmap(red: u8) -> Heightmap {
        Heightmap::from_image(RgbaImage::from_pixel(4, 4, Rgba([red, 0, 0, 255])))
    }

    #[test]
    fn test_map_to_height_range() {
        assert!((map_to_height(0) + 1.0 / 6.0).abs() < EPSILON);
        assert!((map_to_height(255) - 1.0 / 6.0).abs() < EPSILON);
    }

    #[test]
    fn test_height_of_red_128() {
        let mut image = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
        image.put_pixel(50, 50, Rgba([128, 0, 0, 255]));
        let heightmap = Heightmap::from_image(image);

        let expected = ((128.0 / 255.0) - 0.5) / 3.0 * TERRAIN_DIMENSIONS;
        let height = sample_height(&heightmap, 50.0, 50.0, TERRAIN_DIMENSIONS);
        assert!((height - expected).abs() < EPSILON);
    }

    #[test]
    fn test_height_matches_mapped_red() {
        let heightmap = flat_heightmap(200);
        for &(x, y) in &[(0.0, 0.0), (12.5, 80.0), (99.9, 99.9)] {
            let height = sample_height(&heightmap, x, y, TERRAIN_DIMENSIONS);
            assert!((height - map_to_height(200) * TERRAIN_DIMENSIONS).abs() < EPSILON);
        }
    }

    #[test]
    fn test_height_scales_pixel_coordinates() {
        // 4x4 map: world x = 30 falls into pixel column 1
        let mut image = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        image.put_pixel(1, 2, Rgba([255, 0, 0, 255]));
        let heightmap = Heightmap::from_image(image);
        let height = sample_height(&heightmap, 30.0, 60.0, TERRAIN_DIMENSIONS);
        assert!((height - TERRAIN_DIMENSIONS / 6.0).abs() < EPSILON);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside of the terrain")]
    fn test_height_outside_domain_asserts() {
        let heightmap = flat_heightmap(0);
        sample_height(&heightmap, -1.0, 10.0, TERRAIN_DIMENSIONS);
    }

    #[test]
    fn test_patch_layout_fits_wgsl_struct() {
        let layout = patch_terrain_layout();
        assert_eq!(layout.location("uDimension").unwrap().offset(), 204);
        assert_eq!(layout.location("uShadowsEnabled").unwrap().offset(), 228);
        assert_eq!(layout.size(), 240);
    }
}
