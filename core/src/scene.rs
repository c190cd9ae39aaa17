pub mod draw_context;
pub mod frame;
pub mod loader;
pub mod lock;
pub mod material;
pub mod mesh;
pub mod node;
pub mod object_program;
pub mod state;
pub mod texture;
pub mod tree;

#[cfg(test)]
mod scene_tests;

use std::sync::Arc;

use cgmath::{Matrix4, Point3, Vector3};

use crate::{
    config::EngineConfig,
    gpu::GpuContext,
    pass::{FrameUniforms, PassRecorder},
    program::{PassTarget, Program, ProgramError},
    shaders::ShaderLibrary,
    shadow::ShadowMap,
    skybox::{Skybox, SkyboxError},
    terrain::{self, Terrain},
};

use frame::{DepthLoad, FramePlan, FrameStep, PassPlan};
use lock::LockTracked;
use object_program::{object_program, set_object_uniforms};
use state::{FrameParams, SceneState, DEFAULT_LIGHT_POSITION};
use texture::DepthTexture;

// Public API exports
pub use draw_context::{DrawContext, DrawTarget};
pub use material::Material;
pub use mesh::{Mesh, MeshData, Vertex};
pub use node::{Node, NodeKind};
pub use tree::TreeVisitor;

/// Clear color of the color pass, visible where the skybox does not draw.
const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.5,
    g: 0.7,
    b: 1.0,
    a: 1.0,
};

/// Called once per frame, under the scene lock, before anything is drawn.
pub type PhysicsCallback = Box<dyn FnMut(&mut Scene) + Send>;

/// Errors that prevent a scene from being built or drawn.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("Failed to build skybox: {0}")]
    Skybox(#[from] SkyboxError),
    #[error("Failed to build main program: {0}")]
    Program(#[from] ProgramError),
    #[error("Surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
}

/// What to do when a surface frame could not be acquired.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SurfaceRecovery {
    Reconfigure,
    Skip,
    Fatal,
}

impl SurfaceRecovery {
    pub fn for_error(error: &wgpu::SurfaceError) -> Self {
        match error {
            wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => Self::Reconfigure,
            wgpu::SurfaceError::Timeout => Self::Skip,
            _ => Self::Fatal,
        }
    }
}

/// A rendered frame waiting to be shown. Presenting does not need the
/// scene, so it happens after the lock is released.
pub struct PresentFrame {
    texture: wgpu::SurfaceTexture,
}

impl PresentFrame {
    pub fn present(self) {
        self.texture.present();
    }
}

/// Everything drawn in a frame: objects, an optional terrain and the sky,
/// lit by one shadow-casting light.
///
/// Every method must be called while holding the scene's
/// [`SceneLock`](lock::SceneLock); debug builds check it.
pub struct Scene {
    state: SceneState,
    gpu: GpuContext,
    config: EngineConfig,
    library: ShaderLibrary,
    main_program: Program,
    main_shadow_program: Program,
    skybox: Skybox,
    terrain: Option<Box<dyn Terrain>>,
    shadow_map: Option<ShadowMap>,
    depth: DepthTexture,
    objects: Vec<Node>,
    physics: Option<PhysicsCallback>,
}

impl Scene {
    /// Builds the scene on `gpu`. A terrain that fails to build is logged
    /// and left out; anything else failing is an error.
    pub fn new(gpu: GpuContext, config: EngineConfig) -> Result<Self, SceneError> {
        let mut state = SceneState::new();
        let library = ShaderLibrary::new(config.shaders.clone());

        let skybox = Skybox::new(&gpu, &library, &config.resource_root)?;
        let main_program = object_program(&gpu, &library, false, config.tessellate_meshes)?;
        let main_shadow_program = object_program(&gpu, &library, true, config.tessellate_meshes)?;

        let terrain = match terrain::create_terrain(&gpu, &library, &config) {
            Ok(terrain) => terrain,
            Err(e) => {
                log::error!("Failed to create terrain, continuing without: {}", e);
                None
            }
        };
        let shadow_map = terrain
            .as_ref()
            .filter(|terrain| terrain.wants_shadow_map())
            .map(|_| ShadowMap::new(&gpu.device, &gpu.layouts.shadow, config.shadow_map_size, "Scene Shadow Map"));

        let (width, height) = gpu.size();
        state.resize(width, height);
        state.apply_pending_resize();
        state.set_terrain_extent(terrain::TERRAIN_DIMENSIONS);
        state.recompute_view();
        state.set_light_source_position(DEFAULT_LIGHT_POSITION);

        let depth = DepthTexture::new(&gpu.device, &gpu.config, "Scene Depth");

        let mut scene = Self {
            state,
            gpu,
            config,
            library,
            main_program,
            main_shadow_program,
            skybox,
            terrain,
            shadow_map,
            depth,
            objects: Vec::new(),
            physics: None,
        };
        scene.recompute_terrain_shadow_map();
        scene.gpu.dump_rendering_info();

        scene.state.set_locked(false);
        Ok(scene)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &SceneState {
        &self.state
    }

    pub fn should_paint(&self) -> bool {
        self.state.should_paint()
    }

    pub fn stop_painting(&mut self) {
        self.state.stop_painting();
    }

    pub fn frame_count(&self) -> u64 {
        self.state.frame_count()
    }

    // =========================================================================
    // Objects
    // =========================================================================

    pub fn add_object(&mut self, node: Node) {
        self.state.assert_locked();
        self.objects.push(node);
    }

    pub fn objects(&self) -> &[Node] {
        self.state.assert_locked();
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut [Node] {
        self.state.assert_locked();
        &mut self.objects
    }

    pub fn has_terrain(&self) -> bool {
        self.terrain.is_some()
    }

    /// Terrain height at world coordinates in `[0, TERRAIN_DIMENSIONS)`.
    pub fn terrain_height_at(&self, x: f32, y: f32) -> Option<f32> {
        self.state.assert_locked();
        self.terrain.as_ref().map(|terrain| terrain.height_at(x, y))
    }

    pub fn set_physics_callback(&mut self, callback: impl FnMut(&mut Scene) + Send + 'static) {
        self.state.assert_locked();
        self.physics = Some(Box::new(callback));
    }

    // =========================================================================
    // Camera and Light
    // =========================================================================

    pub fn camera_position(&self) -> Point3<f32> {
        self.state.camera_position()
    }

    pub fn set_camera_position(&mut self, position: Point3<f32>) {
        self.state.set_camera_position(position);
    }

    pub fn recompute_view(&mut self) {
        self.state.recompute_view();
    }

    pub fn recompute_view_towards(&mut self, target: Point3<f32>, up: Vector3<f32>) {
        self.state.recompute_view_towards(target, up);
    }

    pub fn view_projection(&self) -> Matrix4<f32> {
        self.state.view_projection()
    }

    pub fn light_source_position(&self) -> Point3<f32> {
        self.state.light_source_position()
    }

    /// Moves the light and re-renders the terrain's cached shadow.
    pub fn set_light_source_position(&mut self, position: Point3<f32>) {
        self.state.set_light_source_position(position);
        self.recompute_terrain_shadow_map();
    }

    pub fn shadow_map_view_projection(&self) -> Matrix4<f32> {
        self.state.shadow_map_view_projection()
    }

    pub fn shadow_map(&self) -> Option<&ShadowMap> {
        self.state.assert_locked();
        self.shadow_map.as_ref()
    }

    /// Records a viewport size to apply before the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.state.resize(width, height);
    }

    // =========================================================================
    // Render Modes
    // =========================================================================

    pub fn toggle_wireframe_mode(&mut self) {
        let wireframe = self.state.toggle_wireframe(self.gpu.supports_wireframe());
        log::info!("Wireframe mode: {}", wireframe);
    }

    pub fn modify_tess_level(&mut self, delta: i32) {
        self.state.modify_tess_level(delta);
    }

    pub fn tess_level(&self) -> u32 {
        self.state.tess_level()
    }

    pub fn toggle_dynamic_tessellation(&mut self) {
        self.state.toggle_dynamic_tessellation();
    }

    pub fn dynamic_tessellation_enabled(&self) -> bool {
        self.state.dynamic_tessellation_enabled()
    }

    /// Rebuilds every program from the configured shader sources. Programs
    /// that fail to build are logged and the previous ones stay in use.
    pub fn reload_shaders(&mut self) {
        self.state.assert_locked();
        match self.try_reload_programs() {
            Ok(()) => log::info!("Reloaded shaders"),
            Err(e) => log::error!("Shader reload failed, keeping previous programs: {}", e),
        }

        if self.terrain.is_some() {
            match terrain::create_terrain(&self.gpu, &self.library, &self.config) {
                Ok(terrain) => {
                    self.terrain = terrain;
                    self.recompute_terrain_shadow_map();
                }
                Err(e) => log::error!("Terrain reload failed, keeping previous terrain: {}", e),
            }
        }
    }

    fn try_reload_programs(&mut self) -> Result<(), ProgramError> {
        let tessellated = self.config.tessellate_meshes;
        let main_program = object_program(&self.gpu, &self.library, false, tessellated)?;
        let main_shadow_program = object_program(&self.gpu, &self.library, true, tessellated)?;
        self.skybox.reload(&self.gpu, &self.library)?;
        self.main_program = main_program;
        self.main_shadow_program = main_shadow_program;
        Ok(())
    }

    fn recompute_terrain_shadow_map(&self) {
        if let Some(terrain) = &self.terrain {
            let params = self.state.frame_params(self.shadow_map.is_some());
            terrain.recompute_shadow_map(&self.gpu, &params);
        }
    }

    // =========================================================================
    // Frame
    // =========================================================================

    /// The passes a frame of this scene records.
    pub fn frame_plan(&self) -> FramePlan {
        let cached = self
            .terrain
            .as_ref()
            .is_some_and(|terrain| terrain.shadow_map().is_some());
        FramePlan::new(self.shadow_map.is_some(), cached, self.terrain.is_some())
    }

    fn reserve_uniforms(&mut self) {
        let meshes = tree::count_meshes(self.objects.iter());
        self.main_program.reserve(&self.gpu, meshes);
        self.main_shadow_program.reserve(&self.gpu, meshes);
        if let Some(terrain) = self.terrain.as_mut() {
            let draws = terrain.draw_count();
            for program in terrain.programs_mut() {
                program.reserve(&self.gpu, draws);
            }
        }
    }

    /// The surface frames are acquired from. Acquiring blocks on vsync, so
    /// callers do it before taking the scene lock and hand the result to
    /// [`Scene::draw`].
    pub fn surface(&self) -> Arc<wgpu::Surface<'static>> {
        Arc::clone(&self.gpu.surface)
    }

    /// Records and submits one frame into `acquired`. Returns `None` when
    /// the frame was skipped: the surface was not ready or the viewport
    /// changed since it was acquired.
    pub fn draw(
        &mut self,
        acquired: Result<wgpu::SurfaceTexture, wgpu::SurfaceError>,
    ) -> Result<Option<PresentFrame>, SceneError> {
        self.state.assert_locked();

        if self.state.pending_resize().is_some() {
            // The surface cannot be reconfigured while a frame is outstanding
            drop(acquired);
            if let Some((width, height)) = self.state.apply_pending_resize() {
                self.gpu.resize(width, height);
                self.depth = DepthTexture::new(&self.gpu.device, &self.gpu.config, "Scene Depth");
                self.recompute_terrain_shadow_map();
            }
            return Ok(None);
        }

        let output = match acquired {
            Ok(output) => output,
            Err(e) => match SurfaceRecovery::for_error(&e) {
                SurfaceRecovery::Reconfigure => {
                    log::warn!("Surface lost or outdated, reconfiguring");
                    self.gpu.reconfigure();
                    return Ok(None);
                }
                SurfaceRecovery::Skip => {
                    log::warn!("Surface timed out, skipping frame");
                    return Ok(None);
                }
                SurfaceRecovery::Fatal => return Err(e.into()),
            },
        };

        if let Some(mut physics) = self.physics.take() {
            physics(self);
            if self.physics.is_none() {
                self.physics = Some(physics);
            }
        }

        self.reserve_uniforms();

        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let _scope = self.gpu.error_scope("Scene frame");
        let mut encoder = self.gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Scene Encoder"),
        });

        let params = self.state.frame_params(self.shadow_map.is_some());
        let skybox_view_projection = self.state.skybox_view_projection();
        log::debug!(
            "Frame {}: camera {:?}, light {:?}",
            self.state.frame_count(),
            params.camera_position,
            params.light_position
        );

        let plan = self.frame_plan();
        debug_assert!(plan.shadow_writes_precede_samples());

        let mut uniforms = FrameUniforms::new();
        if let (Some(pass), Some(shadow_map)) = (plan.shadow_pass(), self.shadow_map.as_ref()) {
            uniforms = self.record_shadow_pass(&mut encoder, pass, shadow_map, &params, uniforms);
        }
        if let Some(pass) = plan.color_pass() {
            uniforms = self.record_color_pass(
                &mut encoder,
                pass,
                &view,
                &params,
                skybox_view_projection,
                uniforms,
            );
        }
        if uniforms.skipped() > 0 {
            log::warn!("Skipped {} draws this frame", uniforms.skipped());
        }
        uniforms.flush(&self.gpu.queue);

        self.gpu.queue.submit(Some(encoder.finish()));
        self.state.advance_frame();

        Ok(Some(PresentFrame { texture: output }))
    }

    fn record_shadow_pass<'a>(
        &'a self,
        encoder: &mut wgpu::CommandEncoder,
        plan: &PassPlan,
        shadow_map: &'a ShadowMap,
        params: &FrameParams,
        uniforms: FrameUniforms<'a>,
    ) -> FrameUniforms<'a> {
        let terrain = self.terrain.as_deref();

        let mut loaded = false;
        for step in &plan.before {
            if *step == FrameStep::CopyCachedShadow {
                if let Some(cached) = terrain.and_then(|terrain| terrain.shadow_map()) {
                    loaded = shadow_map.copy_from(encoder, cached);
                }
            }
        }
        let clear = plan.depth_load == DepthLoad::Clear || !loaded;

        let pass = encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Shadow Pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(shadow_map.depth_attachment(clear)),
                occlusion_query_set: None,
                timestamp_writes: None,
            })
            .forget_lifetime();
        let mut recorder = PassRecorder::new(pass, uniforms, &self.gpu.defaults, false, params.tess_level);

        for step in &plan.steps {
            match step {
                FrameStep::TerrainShadow => {
                    if let Some(terrain) = terrain {
                        terrain.draw_shadow(&mut recorder, params);
                    }
                }
                FrameStep::ObjectShadows => {
                    self.draw_objects(&mut recorder, &self.main_shadow_program, params, None);
                }
                _ => {}
            }
        }

        recorder.finish()
    }

    fn record_color_pass<'a>(
        &'a self,
        encoder: &mut wgpu::CommandEncoder,
        plan: &PassPlan,
        view: &wgpu::TextureView,
        params: &FrameParams,
        skybox_view_projection: Matrix4<f32>,
        uniforms: FrameUniforms<'a>,
    ) -> FrameUniforms<'a> {
        let pass = encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Color Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            })
            .forget_lifetime();
        let mut recorder = PassRecorder::new(
            pass,
            uniforms,
            &self.gpu.defaults,
            self.state.wireframe(),
            params.tess_level,
        );
        let shadow_map = self.shadow_map.as_ref();

        for step in &plan.steps {
            match step {
                FrameStep::Skybox => self.skybox.draw(&mut recorder, skybox_view_projection),
                FrameStep::Terrain => {
                    if let Some(terrain) = self.terrain.as_deref() {
                        terrain.draw_terrain(&mut recorder, params, shadow_map);
                    }
                }
                FrameStep::Objects => {
                    self.draw_objects(&mut recorder, &self.main_program, params, shadow_map);
                }
                _ => {}
            }
        }

        recorder.finish()
    }

    fn draw_objects<'a>(
        &'a self,
        pass: &mut PassRecorder<'a>,
        program: &'a Program,
        params: &FrameParams,
        shadow_map: Option<&'a ShadowMap>,
    ) {
        if self.objects.is_empty() {
            return;
        }
        pass.use_program(program);
        if let Some(shadow_map) = shadow_map {
            pass.bind_shadow_map(shadow_map);
        }
        set_object_uniforms(pass, params, program.options().target == PassTarget::DepthOnly);

        let mut ctx = DrawContext::new(pass);
        for object in &self.objects {
            object.draw(&mut ctx);
        }
    }
}

impl LockTracked for Scene {
    fn set_locked(&mut self, locked: bool) {
        self.state.set_locked(locked);
    }
}
