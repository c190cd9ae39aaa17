use cgmath::{Deg, InnerSpace, Matrix4, SquareMatrix, Vector3};

use crate::{
    common::RgbColor,
    scene::{draw_context::DrawContext, mesh::Mesh, DrawTarget},
};

/// What a node draws besides its children.
pub enum NodeKind {
    Group,
    Mesh(Mesh),
}

/// A scene graph node.
///
/// Nodes own their children exclusively; the draw order of the children is
/// their insertion order. The transform is local: the world transform of a
/// node is the product of its ancestors' transforms and its own.
pub struct Node {
    transform: Matrix4<f32>,
    color: Option<RgbColor>,
    children: Vec<Node>,
    kind: NodeKind,
}

impl Default for Node {
    fn default() -> Self {
        Self::group()
    }
}

impl Node {
    pub fn group() -> Self {
        Self::with_kind(NodeKind::Group)
    }

    pub fn mesh(mesh: Mesh) -> Self {
        Self::with_kind(NodeKind::Mesh(mesh))
    }

    fn with_kind(kind: NodeKind) -> Self {
        Self {
            transform: Matrix4::identity(),
            color: None,
            children: Vec::new(),
            kind,
        }
    }

    // =========================================================================
    // Hierarchy
    // =========================================================================

    pub fn add_child(&mut self, child: Node) {
        self.children.push(child);
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    // =========================================================================
    // Transform
    // =========================================================================

    pub fn transform(&self) -> Matrix4<f32> {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Matrix4<f32>) {
        self.transform = transform;
    }

    pub fn color(&self) -> Option<RgbColor> {
        self.color
    }

    pub fn set_color(&mut self, color: Option<RgbColor>) {
        self.color = color;
    }

    /// Post-multiplies the local transform by `m`.
    pub fn apply(&mut self, m: Matrix4<f32>) -> &mut Self {
        self.transform = self.transform * m;
        self
    }

    pub fn translate(&mut self, offset: Vector3<f32>) -> &mut Self {
        self.apply(Matrix4::from_translation(offset))
    }

    /// Translates by `amount` along the normalized `direction`.
    pub fn translate_along(&mut self, amount: f32, direction: Vector3<f32>) -> &mut Self {
        if direction.magnitude2() <= f32::EPSILON {
            return self;
        }
        self.translate(direction.normalize() * amount)
    }

    pub fn translate_x(&mut self, amount: f32) -> &mut Self {
        self.translate(Vector3::new(amount, 0.0, 0.0))
    }

    pub fn translate_y(&mut self, amount: f32) -> &mut Self {
        self.translate(Vector3::new(0.0, amount, 0.0))
    }

    pub fn translate_z(&mut self, amount: f32) -> &mut Self {
        self.translate(Vector3::new(0.0, 0.0, amount))
    }

    pub fn rotate(&mut self, angle: Deg<f32>, axis: Vector3<f32>) -> &mut Self {
        if axis.magnitude2() <= f32::EPSILON {
            return self;
        }
        self.apply(Matrix4::from_axis_angle(axis.normalize(), angle))
    }

    pub fn rotate_x(&mut self, angle: Deg<f32>) -> &mut Self {
        self.apply(Matrix4::from_angle_x(angle))
    }

    pub fn rotate_y(&mut self, angle: Deg<f32>) -> &mut Self {
        self.apply(Matrix4::from_angle_y(angle))
    }

    pub fn rotate_z(&mut self, angle: Deg<f32>) -> &mut Self {
        self.apply(Matrix4::from_angle_z(angle))
    }

    pub fn scale(&mut self, factor: f32) -> &mut Self {
        self.apply(Matrix4::from_scale(factor))
    }

    pub fn scale_xyz(&mut self, factors: Vector3<f32>) -> &mut Self {
        self.apply(Matrix4::from_nonuniform_scale(factors.x, factors.y, factors.z))
    }

    pub fn scale_x(&mut self, factor: f32) -> &mut Self {
        self.scale_xyz(Vector3::new(factor, 1.0, 1.0))
    }

    pub fn scale_y(&mut self, factor: f32) -> &mut Self {
        self.scale_xyz(Vector3::new(1.0, factor, 1.0))
    }

    pub fn scale_z(&mut self, factor: f32) -> &mut Self {
        self.scale_xyz(Vector3::new(1.0, 1.0, factor))
    }

    // =========================================================================
    // Drawing
    // =========================================================================

    pub fn draw<T: DrawTarget>(&self, ctx: &mut DrawContext<'_, T>) {
        if let NodeKind::Mesh(mesh) = &self.kind {
            ctx.push(self);
            mesh.draw(ctx);
            ctx.pop();
        }
        self.draw_children(ctx);
    }

    fn draw_children<T: DrawTarget>(&self, ctx: &mut DrawContext<'_, T>) {
        if self.children.is_empty() {
            return;
        }
        ctx.push(self);
        for child in &self.children {
            child.draw(ctx);
        }
        ctx.pop();
    }
}
