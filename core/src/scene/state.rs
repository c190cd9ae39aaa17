//! GPU-free part of the scene: camera, light, viewport and per-frame flags.

use cgmath::{Matrix4, Point3, SquareMatrix, Vector3};

use crate::{
    camera::{self, Y_AXIS},
    terrain::{DEFAULT_TESS_LEVEL, MAX_TESS_LEVEL, TERRAIN_DIMENSIONS},
};

pub const DEFAULT_CAMERA_POSITION: Point3<f32> = Point3::new(0.0, 0.0, 5.0);
pub const DEFAULT_LIGHT_POSITION: Point3<f32> = Point3::new(0.0, 20.0, 30.0);

/// Per-frame values every draw of the frame reads.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FrameParams {
    pub view_projection: Matrix4<f32>,
    pub shadow_view_projection: Matrix4<f32>,
    pub camera_position: Point3<f32>,
    pub light_position: Point3<f32>,
    /// Frame counter in radians, for animated shading.
    pub frame: f32,
    pub tess_level: u32,
    pub dynamic_tessellation: bool,
    /// True when a scene shadow map is bound and may be sampled.
    pub shadows_enabled: bool,
}

/// Camera, light and frame bookkeeping, checked against the scene lock.
#[derive(Debug, Clone)]
pub struct SceneState {
    camera_position: Point3<f32>,
    light_position: Point3<f32>,
    view: Matrix4<f32>,
    projection: Matrix4<f32>,
    shadow_view: Matrix4<f32>,
    shadow_projection: Matrix4<f32>,
    viewport: (u32, u32),
    pending_resize: Option<(u32, u32)>,
    should_paint: bool,
    frame_count: u64,
    tess_level: u32,
    dynamic_tessellation: bool,
    wireframe: bool,
    terrain_extent: f32,
    locked: bool,
}

impl Default for SceneState {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneState {
    /// A new state starts locked: whoever constructs the scene owns it until
    /// it is handed to a [`SceneLock`](super::lock::SceneLock).
    pub fn new() -> Self {
        let mut state = Self {
            camera_position: DEFAULT_CAMERA_POSITION,
            light_position: DEFAULT_LIGHT_POSITION,
            view: Matrix4::identity(),
            projection: camera::perspective(1, 1),
            shadow_view: Matrix4::identity(),
            shadow_projection: camera::shadow_projection(TERRAIN_DIMENSIONS),
            viewport: (1, 1),
            pending_resize: None,
            should_paint: true,
            frame_count: 0,
            tess_level: DEFAULT_TESS_LEVEL,
            dynamic_tessellation: false,
            wireframe: false,
            terrain_extent: TERRAIN_DIMENSIONS,
            locked: true,
        };
        state.recompute_view();
        state.recompute_light_view();
        state
    }

    // =========================================================================
    // Lock Tracking
    // =========================================================================

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    #[track_caller]
    pub fn assert_locked(&self) {
        debug_assert!(self.locked, "Scene accessed without holding the scene lock");
    }

    // =========================================================================
    // Camera
    // =========================================================================

    pub fn camera_position(&self) -> Point3<f32> {
        self.assert_locked();
        self.camera_position
    }

    pub fn set_camera_position(&mut self, position: Point3<f32>) {
        self.assert_locked();
        self.camera_position = position;
    }

    /// Looks from the camera position at the origin.
    pub fn recompute_view(&mut self) {
        self.recompute_view_towards(Point3::new(0.0, 0.0, 0.0), Y_AXIS);
    }

    pub fn recompute_view_towards(&mut self, target: Point3<f32>, up: Vector3<f32>) {
        self.assert_locked();
        self.view = camera::look_at(self.camera_position, target, up);
        log::debug!("View from {:?} towards {:?}", self.camera_position, target);
    }

    pub fn view(&self) -> Matrix4<f32> {
        self.view
    }

    pub fn projection(&self) -> Matrix4<f32> {
        self.projection
    }

    pub fn view_projection(&self) -> Matrix4<f32> {
        self.assert_locked();
        self.projection * self.view
    }

    /// View-projection for the skybox: the camera rotation without its
    /// translation.
    pub fn skybox_view_projection(&self) -> Matrix4<f32> {
        self.projection * camera::without_translation(self.view)
    }

    // =========================================================================
    // Light
    // =========================================================================

    pub fn light_source_position(&self) -> Point3<f32> {
        self.assert_locked();
        self.light_position
    }

    pub fn set_light_source_position(&mut self, position: Point3<f32>) {
        self.assert_locked();
        self.light_position = position;
        self.recompute_light_view();
    }

    fn recompute_light_view(&mut self) {
        self.shadow_view = camera::look_at(self.light_position, Point3::new(0.0, 0.0, 0.0), Y_AXIS);
    }

    pub fn shadow_map_view_projection(&self) -> Matrix4<f32> {
        self.assert_locked();
        self.shadow_projection * self.shadow_view
    }

    /// Sets the extent the shadow projection must cover.
    pub fn set_terrain_extent(&mut self, extent: f32) {
        self.assert_locked();
        self.terrain_extent = extent;
        self.shadow_projection = camera::shadow_projection(extent);
    }

    // =========================================================================
    // Viewport
    // =========================================================================

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// Records a resize to apply before the next frame. Consecutive resizes
    /// collapse into the last one.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.assert_locked();
        self.pending_resize = Some((width.max(1), height.max(1)));
    }

    pub fn pending_resize(&self) -> Option<(u32, u32)> {
        self.pending_resize
    }

    /// Applies the pending resize, if any, and returns the new viewport.
    pub fn apply_pending_resize(&mut self) -> Option<(u32, u32)> {
        self.assert_locked();
        let (width, height) = self.pending_resize.take()?;
        self.viewport = (width, height);
        self.projection = camera::perspective(width, height);
        self.shadow_projection = camera::shadow_projection(self.terrain_extent);
        log::debug!("Viewport resized to {}x{}", width, height);
        Some((width, height))
    }

    // =========================================================================
    // Frame
    // =========================================================================

    pub fn should_paint(&self) -> bool {
        self.assert_locked();
        self.should_paint
    }

    pub fn stop_painting(&mut self) {
        self.assert_locked();
        self.should_paint = false;
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Counts a recorded frame.
    pub fn advance_frame(&mut self) {
        self.assert_locked();
        self.frame_count += 1;
    }

    pub fn frame_params(&self, shadows_enabled: bool) -> FrameParams {
        self.assert_locked();
        FrameParams {
            view_projection: self.view_projection(),
            shadow_view_projection: self.shadow_map_view_projection(),
            camera_position: self.camera_position,
            light_position: self.light_position,
            frame: (self.frame_count as f32).to_radians(),
            tess_level: self.tess_level,
            dynamic_tessellation: self.dynamic_tessellation,
            shadows_enabled,
        }
    }

    // =========================================================================
    // Render Modes
    // =========================================================================

    pub fn tess_level(&self) -> u32 {
        self.tess_level
    }

    pub fn modify_tess_level(&mut self, delta: i32) {
        self.assert_locked();
        let level = (self.tess_level as i64 + delta as i64).clamp(1, MAX_TESS_LEVEL as i64);
        self.tess_level = level as u32;
        log::info!("Tessellation level: {}", self.tess_level);
    }

    pub fn dynamic_tessellation_enabled(&self) -> bool {
        self.dynamic_tessellation
    }

    pub fn toggle_dynamic_tessellation(&mut self) {
        self.assert_locked();
        self.dynamic_tessellation = !self.dynamic_tessellation;
        log::info!("Dynamic tessellation: {}", self.dynamic_tessellation);
    }

    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    /// Flips wireframe mode when `supported`; returns the resulting mode.
    pub fn toggle_wireframe(&mut self, supported: bool) -> bool {
        self.assert_locked();
        if !supported {
            log::warn!("Wireframe mode needs POLYGON_MODE_LINE, which the adapter lacks");
            return self.wireframe;
        }
        self.wireframe = !self.wireframe;
        self.wireframe
    }
}
