//! Recording draws into a render pass.
//!
//! A [`PassRecorder`] tracks the active program and its uniform block. Every
//! draw snapshots the block into the program's uniform arena through
//! [`FrameUniforms`], which writes all snapshots to the GPU before submit.

use std::ops::Range;

use crate::{
    gpu::DefaultBindings,
    program::{BindSlot, Program, ProgramId},
    scene::{
        mesh::{Mesh, Topology},
        texture::GpuTexture,
        DrawTarget,
    },
    shaders::ProgramStages,
    shadow::ShadowMap,
    terrain::MAX_TESS_LEVEL,
    uniforms::{UniformBlock, UniformLocation, UniformSink, UniformValue},
};

struct StagedArena<'a> {
    program: ProgramId,
    label: &'a str,
    buffer: &'a wgpu::Buffer,
    stride: usize,
    capacity: usize,
    bytes: Vec<u8>,
    count: usize,
}

/// Uniform snapshots staged during recording, per program.
#[derive(Default)]
pub struct FrameUniforms<'a> {
    arenas: Vec<StagedArena<'a>>,
    skipped: usize,
}

impl<'a> FrameUniforms<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a snapshot of `block` to the arena of `program` and returns
    /// its dynamic offset, or `None` when the arena is full.
    pub fn stage(&mut self, program: &'a Program, block: &UniformBlock) -> Option<u32> {
        let arena = program.arena();
        let index = match self.arenas.iter().position(|a| a.program == program.id()) {
            Some(index) => index,
            None => {
                self.arenas.push(StagedArena {
                    program: program.id(),
                    label: program.label(),
                    buffer: &arena.buffer,
                    stride: arena.stride as usize,
                    capacity: arena.capacity,
                    bytes: Vec::new(),
                    count: 0,
                });
                self.arenas.len() - 1
            }
        };

        let staged = &mut self.arenas[index];
        if staged.count >= staged.capacity {
            if self.skipped == 0 {
                log::error!(
                    "Uniform arena of {} is full ({} blocks), skipping draws",
                    staged.label,
                    staged.capacity
                );
            }
            self.skipped += 1;
            return None;
        }

        let offset = staged.count * staged.stride;
        staged.bytes.resize(offset + staged.stride, 0);
        staged.bytes[offset..offset + block.bytes().len()].copy_from_slice(block.bytes());
        staged.count += 1;
        Some(offset as u32)
    }

    /// Number of draws dropped because an arena was full.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Writes every staged snapshot. Must run before the commands that read
    /// them are submitted.
    pub fn flush(self, queue: &wgpu::Queue) {
        for arena in &self.arenas {
            if !arena.bytes.is_empty() {
                queue.write_buffer(arena.buffer, 0, &arena.bytes);
            }
        }
    }
}

/// Wraps a render pass with program state, implementing [`DrawTarget`] for
/// node traversal.
pub struct PassRecorder<'a> {
    pass: wgpu::RenderPass<'a>,
    uniforms: FrameUniforms<'a>,
    defaults: &'a DefaultBindings,
    program: Option<&'a Program>,
    block: Option<UniformBlock>,
    wireframe: bool,
    tess_level: u32,
}

impl<'a> PassRecorder<'a> {
    pub fn new(
        pass: wgpu::RenderPass<'a>,
        uniforms: FrameUniforms<'a>,
        defaults: &'a DefaultBindings,
        wireframe: bool,
        tess_level: u32,
    ) -> Self {
        Self {
            pass,
            uniforms,
            defaults,
            program: None,
            block: None,
            wireframe,
            tess_level: tess_level.clamp(1, MAX_TESS_LEVEL),
        }
    }

    /// Ends the pass and hands back the staged uniforms for the next pass.
    pub fn finish(self) -> FrameUniforms<'a> {
        self.uniforms
    }

    /// Makes `program` current with a zeroed uniform block. Texture and
    /// shadow slots start out bound to neutral defaults.
    pub fn use_program(&mut self, program: &'a Program) {
        self.pass.set_pipeline(program.pipeline(self.wireframe));
        for (group, slot) in program.slots().iter().enumerate() {
            match slot {
                BindSlot::Texture(_) => self.pass.set_bind_group(group as u32, &self.defaults.white.bind_group, &[]),
                BindSlot::ShadowMap => {
                    self.pass.set_bind_group(group as u32, &self.defaults.shadow.bind_group, &[])
                }
                BindSlot::Uniforms | BindSlot::Cubemap | BindSlot::PatchSource => {}
            }
        }
        self.block = Some(UniformBlock::new(program.layout()));
        self.program = Some(program);
    }

    pub fn program(&self) -> Option<&'a Program> {
        self.program
    }

    pub fn tess_level(&self) -> u32 {
        self.tess_level
    }

    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    /// Writes a uniform by name, skipping names the program lacks.
    pub fn set_named(&mut self, name: &str, value: UniformValue) {
        let location = DrawTarget::uniform_location(self, name);
        self.set_optional(location, value);
    }

    /// Binds `group` to the program's bind group for `slot`, if it has one.
    pub fn bind_slot(&mut self, slot: BindSlot, group: &wgpu::BindGroup) {
        if let Some(index) = self.program.and_then(|p| p.slot_group(slot)) {
            self.pass.set_bind_group(index, group, &[]);
        }
    }

    pub fn bind_shadow_map(&mut self, shadow_map: &ShadowMap) {
        self.bind_slot(BindSlot::ShadowMap, &shadow_map.bind_group);
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: &wgpu::Buffer) {
        self.pass.set_vertex_buffer(slot, buffer.slice(..));
    }

    /// Stages the uniform block and binds it. Returns false when the draw
    /// must be skipped.
    fn prepare_draw(&mut self) -> bool {
        let (Some(program), Some(block)) = (self.program, self.block.as_ref()) else {
            log::warn!("Draw without a program");
            return false;
        };
        let Some(offset) = self.uniforms.stage(program, block) else {
            return false;
        };
        self.pass.set_bind_group(0, &program.arena().bind_group, &[offset]);
        true
    }

    pub fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        if self.prepare_draw() {
            self.pass.draw(vertices, instances);
        }
    }

    pub fn draw_indexed(&mut self, index_buffer: &wgpu::Buffer, indices: Range<u32>) {
        if self.prepare_draw() {
            self.pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            self.pass.draw_indexed(indices, 0, 0..1);
        }
    }

    /// Draws `patches` triangle patches expanded at the current
    /// tessellation level: `3 * level * level` pulled vertices each.
    pub fn draw_triangle_patches(&mut self, patches: u32) {
        let level = self.tess_level;
        self.draw(0..3 * level * level, 0..patches);
    }
}

impl UniformSink for PassRecorder<'_> {
    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        if let Some(block) = self.block.as_mut() {
            block.set_uniform(location, value);
        }
    }
}

impl DrawTarget for PassRecorder<'_> {
    fn uniform_location(&self, name: &str) -> Option<UniformLocation> {
        self.program.and_then(|program| program.uniform_location(name))
    }

    fn has_stage(&self, stage: ProgramStages) -> bool {
        self.program.is_some_and(|program| program.has_stage(stage))
    }

    fn bind_texture(&mut self, unit: u32, texture: &GpuTexture) {
        if let Some(index) = self.program.and_then(|program| program.texture_unit_group(unit)) {
            self.pass.set_bind_group(index, &texture.bind_group, &[]);
        }
    }

    fn tess_control_shader(&self) -> bool {
        self.program.is_some_and(Program::tess_control_shader)
    }

    fn draw_mesh(&mut self, mesh: &Mesh, topology: Topology) {
        let Some(mesh) = mesh.buffers() else {
            log::warn!("Mesh was never uploaded, skipping draw");
            return;
        };
        match topology {
            Topology::Triangles => {
                self.set_vertex_buffer(0, &mesh.vertex_buffer);
                self.draw_indexed(&mesh.index_buffer, 0..mesh.index_count());
            }
            Topology::Patches { size } => {
                debug_assert_eq!(size, 3, "Only triangle patches are supported for meshes");
                self.bind_slot(BindSlot::PatchSource, &mesh.patch_bind_group);
                self.draw_triangle_patches(mesh.index_count() / size);
            }
        }
    }
}
