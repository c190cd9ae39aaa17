use cgmath::{Matrix4, SquareMatrix};

use crate::{
    common::RgbColor,
    scene::{
        material::Material,
        mesh::{Mesh, Topology},
        node::Node,
        texture::GpuTexture,
    },
    shaders::ProgramStages,
    uniforms::{UniformLocation, UniformSink, UniformValue},
};

/// Texture unit that mesh textures are bound to.
pub const MESH_TEXTURE_UNIT: u32 = 0;

/// What a draw context records into: the active program's uniform block plus
/// the primitives needed to draw a mesh.
pub trait DrawTarget: UniformSink {
    fn uniform_location(&self, name: &str) -> Option<UniformLocation>;
    fn has_stage(&self, stage: ProgramStages) -> bool;
    fn bind_texture(&mut self, unit: u32, texture: &GpuTexture);
    fn draw_mesh(&mut self, mesh: &Mesh, topology: Topology);

    /// True when meshes must be drawn as triangle patches.
    fn tess_control_shader(&self) -> bool {
        self.has_stage(ProgramStages::TESS_CONTROL)
    }
}

/// Uniform locations a draw context writes, resolved once per pass.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ContextLocations {
    pub transform: Option<UniformLocation>,
    pub color: Option<UniformLocation>,
    pub diffuse: Option<UniformLocation>,
    pub specular: Option<UniformLocation>,
    pub ambient: Option<UniformLocation>,
    pub emissive: Option<UniformLocation>,
    pub shininess: Option<UniformLocation>,
    pub shininess_percent: Option<UniformLocation>,
    pub uses_texture: Option<UniformLocation>,
    pub texture_unit: u32,
}

impl ContextLocations {
    pub fn resolve<T: DrawTarget + ?Sized>(target: &T) -> Self {
        Self {
            transform: target.uniform_location("uModel"),
            color: target.uniform_location("uColor"),
            diffuse: target.uniform_location("uDiffuse"),
            specular: target.uniform_location("uSpecular"),
            ambient: target.uniform_location("uAmbient"),
            emissive: target.uniform_location("uEmissive"),
            shininess: target.uniform_location("uShininess"),
            shininess_percent: target.uniform_location("uShininessPercent"),
            uses_texture: target.uniform_location("uUsesTexture"),
            texture_unit: MESH_TEXTURE_UNIT,
        }
    }
}

/// Accumulated transform and color at one level of the traversal.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DrawState {
    pub transform: Matrix4<f32>,
    pub color: RgbColor,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            transform: Matrix4::identity(),
            color: RgbColor::BLACK,
        }
    }
}

/// Transform/color stack driven by a node traversal.
///
/// Every push uploads the new top of the stack to the target right away, so
/// the uniform block always reflects the node being drawn.
pub struct DrawContext<'s, T: DrawTarget> {
    target: &'s mut T,
    locations: ContextLocations,
    stack: Vec<DrawState>,
}

impl<'s, T: DrawTarget> DrawContext<'s, T> {
    pub fn new(target: &'s mut T) -> Self {
        let locations = ContextLocations::resolve(&*target);
        Self::with_locations(target, locations)
    }

    pub fn with_locations(target: &'s mut T, locations: ContextLocations) -> Self {
        Self {
            target,
            locations,
            stack: vec![DrawState::default()],
        }
    }

    pub fn push(&mut self, node: &Node) {
        self.push_state(node.transform(), node.color());
    }

    /// Pushes `top.transform * transform`, keeping the current color unless
    /// `color` overrides it.
    pub fn push_state(&mut self, transform: Matrix4<f32>, color: Option<RgbColor>) {
        let top = *self.top();
        let state = DrawState {
            transform: top.transform * transform,
            color: color.unwrap_or(top.color),
        };
        self.stack.push(state);
        self.upload(state);
    }

    /// Pops the top entry and restores the uniforms of the new top.
    pub fn pop(&mut self) {
        debug_assert!(self.stack.len() > 1, "DrawContext popped more often than pushed");
        if self.stack.len() > 1 {
            self.stack.pop();
        }
        let top = *self.top();
        self.upload(top);
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn top(&self) -> &DrawState {
        // The stack is never empty; see `pop`
        &self.stack[self.stack.len() - 1]
    }

    pub fn locations(&self) -> &ContextLocations {
        &self.locations
    }

    pub fn target(&self) -> &T {
        &*self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut *self.target
    }

    pub fn upload_material(&mut self, material: &Material, uses_texture: bool) {
        let l = self.locations;
        let target = &mut *self.target;
        target.set_optional(l.diffuse, UniformValue::Vec4(material.diffuse.into()));
        target.set_optional(l.specular, UniformValue::Vec4(material.specular.into()));
        target.set_optional(l.ambient, UniformValue::Vec4(material.ambient.into()));
        target.set_optional(l.emissive, UniformValue::Vec4(material.emissive.into()));
        target.set_optional(l.shininess, UniformValue::Float(material.shininess));
        target.set_optional(l.shininess_percent, UniformValue::Float(material.shininess_percent));
        target.set_optional(l.uses_texture, UniformValue::from(uses_texture));
    }

    pub fn bind_texture(&mut self, texture: &GpuTexture) {
        self.target.bind_texture(self.locations.texture_unit, texture);
    }

    fn upload(&mut self, state: DrawState) {
        self.target
            .set_optional(self.locations.transform, UniformValue::Mat4(state.transform));
        self.target
            .set_optional(self.locations.color, UniformValue::Vec3(state.color.into()));
    }
}

impl<T: DrawTarget> Drop for DrawContext<'_, T> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert_eq!(self.stack.len(), 1, "DrawContext dropped with unbalanced stack");
        }
    }
}
