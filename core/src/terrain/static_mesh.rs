use crate::{
    config::EngineConfig,
    gpu::GpuContext,
    pass::PassRecorder,
    program::{PassTarget, Program},
    scene::{
        draw_context::DrawContext,
        material::Material,
        mesh::{Mesh, MeshData, MeshError},
        node::Node,
        object_program::{object_program, set_object_uniforms},
        state::FrameParams,
        texture::Heightmap,
    },
    shaders::ShaderLibrary,
    shadow::ShadowMap,
};

use super::{
    map_to_height, sample_height, Terrain, TerrainError, TerrainImages, TerrainMode, COVER_REPEAT,
    TERRAIN_DIMENSIONS,
};

/// One vertex per heightmap pixel, two triangles per pixel quad, in the
/// unit square centered on the origin.
///
/// Vertex `y * w + x` sits at `(x / w - 0.5, height, y / h - 0.5)` and its
/// texture coordinates repeat the cover `cover_repeat` times across the
/// square. Triangles wind counter-clockwise seen from above.
pub fn static_heightmap_mesh(heightmap: &Heightmap, cover_repeat: f32) -> Result<MeshData, MeshError> {
    let (w, h) = (heightmap.width(), heightmap.height());

    let mut positions = Vec::with_capacity((w * h) as usize);
    let mut tex_coords = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
        for x in 0..w {
            let px = x as f32 / w as f32;
            let py = y as f32 / h as f32;
            positions.push([px - 0.5, map_to_height(heightmap.red_at(x, y)), py - 0.5]);
            tex_coords.push([px * cover_repeat, py * cover_repeat]);
        }
    }

    let quads = w.saturating_sub(1) * h.saturating_sub(1);
    let mut indices = Vec::with_capacity(quads as usize * 6);
    for y in 0..h.saturating_sub(1) {
        for x in 0..w.saturating_sub(1) {
            let i = y * w + x;
            indices.extend_from_slice(&[i, i + w + 1, i + 1]);
            indices.extend_from_slice(&[i, i + w, i + w + 1]);
        }
    }

    MeshData::with_flat_normals(&positions, &tex_coords, indices)
}

/// The heightmap as a plain lit mesh, drawn with the object program.
pub struct StaticTerrain {
    node: Node,
    heightmap: Heightmap,
    program: Program,
    shadow_program: Program,
}

impl StaticTerrain {
    pub fn new(
        gpu: &GpuContext,
        library: &ShaderLibrary,
        config: &EngineConfig,
    ) -> Result<Self, TerrainError> {
        let program = object_program(gpu, library, false, false)?;
        let shadow_program = object_program(gpu, library, true, false)?;
        let TerrainImages { heightmap, cover } = TerrainImages::load(gpu, &config.resource_root)?;

        let data = static_heightmap_mesh(&heightmap, COVER_REPEAT)?;
        log::info!(
            "Static terrain: {} vertices, {} triangles",
            data.vertices().len(),
            data.triangle_count()
        );
        let material = Material {
            shininess: 1.0,
            shininess_percent: 0.1,
            ..Material::default()
        };
        let mut node = Node::mesh(Mesh::new(gpu, data, material, Some(cover)));
        node.scale(TERRAIN_DIMENSIONS);

        Ok(Self {
            node,
            heightmap,
            program,
            shadow_program,
        })
    }

    fn draw_with<'a>(
        &'a self,
        program: &'a Program,
        pass: &mut PassRecorder<'a>,
        frame: &FrameParams,
        shadow_map: Option<&'a ShadowMap>,
    ) {
        pass.use_program(program);
        if let Some(shadow_map) = shadow_map {
            pass.bind_shadow_map(shadow_map);
        }
        set_object_uniforms(pass, frame, program.options().target == PassTarget::DepthOnly);
        let mut ctx = DrawContext::new(pass);
        self.node.draw(&mut ctx);
    }
}

impl Terrain for StaticTerrain {
    fn mode(&self) -> TerrainMode {
        TerrainMode::Terrain
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
    use crate::common::EPSILON;
    use image::{Rgba, RgbaImage};

    fn ramp(width: u32, height: u32) -> Heightmap {
        Heightmap::from_image(RgbaImage::from_fn(width, height, |x, _| {
            Rgba([(x * 40) as u8, 0, 0, 255])
        }))
    }

    #[test]
    fn test_one_vertex_per_pixel() {
        let data = static_heightmap_mesh(&ramp(4, 3), 1.0).unwrap();
        assert_eq!(data.vertices().len(), 12);
        assert_eq!(data.triangle_count(), 3 * 2 * 2);
    }

    #[test]
    fn test_vertices_are_row_major() {
        let heightmap = ramp(4, 3);
        let data = static_heightmap_mesh(&heightmap, 1.0).unwrap();
        // Vertex y * w + x
        let v = data.vertices()[2 * 4 + 1].position;
        assert!((v[0] - (1.0 / 4.0 - 0.5)).abs() < EPSILON);
        assert!((v[1] - map_to_height(40)).abs() < EPSILON);
        assert!((v[2] - (2.0 / 3.0 - 0.5)).abs() < EPSILON);
    }

    #[test]
    fn test_flat_terrain_faces_up() {
        let heightmap = Heightmap::from_image(RgbaImage::from_pixel(3, 3, Rgba([128, 0, 0, 255])));
        let data = static_heightmap_mesh(&heightmap, 1.0).unwrap();
        for v in data.vertices() {
            assert!((v.normal[1] - 1.0).abs() < EPSILON, "normal {:?}", v.normal);
        }
    }

    #[test]
    fn test_cover_repeats() {
        let data = static_heightmap_mesh(&ramp(4, 4), 8.0).unwrap();
        let uv = data.vertices()[4 * 2 + 2].tex_coords;
        assert!((uv[0] - 4.0).abs() < EPSILON);
        assert!((uv[1] - 4.0).abs() < EPSILON);
    }

    #[test]
    fn test_single_pixel_is_empty() {
        let heightmap = Heightmap::from_image(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255])));
        assert!(matches!(static_heightmap_mesh(&heightmap, 1.0), Err(MeshError::Empty)));
    }
}
