//! The lit, shadowed program that scene objects and the static terrain use.

use cgmath::Vector3;

use crate::{
    common::RgbColor,
    gpu::GpuContext,
    pass::PassRecorder,
    program::{BindSlot, PipelineOptions, Program, ProgramDescriptor, ProgramError, VertexInput},
    scene::state::FrameParams,
    shaders::{ShaderLibrary, ShaderSet},
    uniforms::{UniformLayout, UniformType, UniformValue},
};

pub const LIGHT_SOURCE_COLOR: RgbColor = RgbColor::new(1.0, 0.7, 0.7);
pub const AMBIENT_LIGHT_COLOR: RgbColor = RgbColor::WHITE;
pub const AMBIENT_LIGHT_STRENGTH: f32 = 0.5;

/// Must match `Uniforms` in `shaders/main.wesl`.
pub fn object_layout() -> UniformLayout {
    UniformLayout::new(&[
        ("uViewProjection", UniformType::Mat4),
        ("uShadowMapViewProjection", UniformType::Mat4),
        ("uModel", UniformType::Mat4),
        ("uDiffuse", UniformType::Vec4),
        ("uSpecular", UniformType::Vec4),
        ("uAmbient", UniformType::Vec4),
        ("uEmissive", UniformType::Vec4),
        ("uColor", UniformType::Vec3),
        ("uFrame", UniformType::Float),
        ("uAmbientLightColor", UniformType::Vec3),
        ("uAmbientLightStrength", UniformType::Float),
        ("uLightSourcePosition", UniformType::Vec3),
        ("uShininess", UniformType::Float),
        ("uLightSourceColor", UniformType::Vec3),
        ("uShininessPercent", UniformType::Float),
        ("uCameraPosition", UniformType::Vec3),
        ("uUsesTexture", UniformType::Int),
        ("uShadowsEnabled", UniformType::Int),
        ("uTessLevel", UniformType::Int),
        ("uDynamicTessellation", UniformType::Int),
    ])
}

/// Builds the object program for color or light-space depth rendering.
/// With `tessellated`, triangles are pulled from the mesh storage buffers
/// and subdivided as patches.
pub fn object_program(
    gpu: &GpuContext,
    library: &ShaderLibrary,
    shadow: bool,
    tessellated: bool,
) -> Result<Program, ProgramError> {
    let mut shaders = ShaderSet::new(&["common", "lighting"], "main");
    let mut slots = vec![BindSlot::Uniforms, BindSlot::Texture(0), BindSlot::ShadowMap];
    let vertex_input = if tessellated {
        shaders.tessellation_control = Some("tess_level");
        shaders.tessellation_evaluation = Some("triangle_patch");
        slots.push(BindSlot::PatchSource);
        VertexInput::Pulled
    } else {
        VertexInput::Mesh
    };

    let (label, options) = if shadow {
        ("Main Shadow", PipelineOptions::shadow(vertex_input))
    } else {
        ("Main", PipelineOptions::color(vertex_input))
    };

    Program::new(
        gpu,
        library,
        ProgramDescriptor {
            label,
            shaders,
            features: &[],
            layout: object_layout(),
            slots: &slots,
            options,
        },
    )
}

/// Writes the per-frame uniforms of the object program. Per-node values
/// come from the draw context afterwards.
pub fn set_object_uniforms(pass: &mut PassRecorder<'_>, frame: &FrameParams, from_light: bool) {
    let view_projection = if from_light {
        frame.shadow_view_projection
    } else {
        frame.view_projection
    };
    let camera = frame.camera_position;
    let light = frame.light_position;

    pass.set_named("uViewProjection", UniformValue::Mat4(view_projection));
    pass.set_named(
        "uShadowMapViewProjection",
        UniformValue::Mat4(frame.shadow_view_projection),
    );
    pass.set_named("uFrame", UniformValue::Float(frame.frame));
    pass.set_named("uAmbientLightColor", UniformValue::Vec3(AMBIENT_LIGHT_COLOR.into()));
    pass.set_named("uAmbientLightStrength", UniformValue::Float(AMBIENT_LIGHT_STRENGTH));
    pass.set_named(
        "uLightSourcePosition",
        UniformValue::Vec3(Vector3::new(light.x, light.y, light.z)),
    );
    pass.set_named("uLightSourceColor", UniformValue::Vec3(LIGHT_SOURCE_COLOR.into()));
    pass.set_named(
        "uCameraPosition",
        UniformValue::Vec3(Vector3::new(camera.x, camera.y, camera.z)),
    );
    pass.set_named("uShadowsEnabled", (frame.shadows_enabled && !from_light).into());
    pass.set_named("uTessLevel", UniformValue::Int(pass.tess_level() as i32));
    pass.set_named("uDynamicTessellation", frame.dynamic_tessellation.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_layout_offsets() {
        let layout = object_layout();
        assert_eq!(layout.location("uModel").unwrap().offset(), 128);
        assert_eq!(layout.location("uColor").unwrap().offset(), 256);
        // Scalars pack into the tail of the preceding vec3
        assert_eq!(layout.location("uFrame").unwrap().offset(), 268);
        assert_eq!(layout.location("uUsesTexture").unwrap().offset(), 332);
        assert_eq!(layout.location("uDynamicTessellation").unwrap().offset(), 344);
        assert_eq!(layout.size(), 352);
    }
}
