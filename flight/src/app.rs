use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::JoinHandle,
    time::Instant,
};

use anyhow::{anyhow, Context};
use cgmath::{Deg, Rad};
use terrain_engine::{scene::state::DEFAULT_LIGHT_POSITION, EngineConfig, Scene, SceneLock, SceneSlot};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::{
    physics::{Direction, PhysicsState},
    render_thread::{self, PLANE_INDEX},
};

const WINDOW_TITLE: &str = "Terrain Flight";
const WINDOW_SIZE: f64 = 1000.0;
const SPEED_STEP: f32 = 0.2;
const ROTATION_STEP: Deg<f32> = Deg(1.0);

/// What a key press asks the scene or the plane to do.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum KeyAction {
    Close,
    Speed(f32),
    Rotate(Direction),
    ReloadShaders,
    ToggleWireframe,
    TessLevel(i32),
    ToggleDynamicTessellation,
}

pub fn key_action(key: &Key) -> Option<KeyAction> {
    match key {
        Key::Named(NamedKey::Escape) => Some(KeyAction::Close),
        Key::Named(NamedKey::PageUp) => Some(KeyAction::Speed(SPEED_STEP)),
        Key::Named(NamedKey::PageDown) => Some(KeyAction::Speed(-SPEED_STEP)),
        Key::Named(NamedKey::ArrowUp) => Some(KeyAction::Rotate(Direction::Up)),
        Key::Named(NamedKey::ArrowDown) => Some(KeyAction::Rotate(Direction::Down)),
        Key::Named(NamedKey::ArrowLeft) => Some(KeyAction::Rotate(Direction::Left)),
        Key::Named(NamedKey::ArrowRight) => Some(KeyAction::Rotate(Direction::Right)),
        Key::Character(c) => match c.as_str() {
            "r" | "R" => Some(KeyAction::ReloadShaders),
            "w" | "W" => Some(KeyAction::ToggleWireframe),
            "j" | "J" => Some(KeyAction::TessLevel(1)),
            "k" | "K" => Some(KeyAction::TessLevel(-1)),
            "p" | "P" => Some(KeyAction::ToggleDynamicTessellation),
            _ => None,
        },
        _ => None,
    }
}

fn lock_physics(physics: &Mutex<PhysicsState>) -> MutexGuard<'_, PhysicsState> {
    physics.lock().unwrap_or_else(PoisonError::into_inner)
}

fn render_thread_result(joined: std::thread::Result<()>) -> anyhow::Result<()> {
    joined.map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown cause".to_string());
        anyhow!("Render thread panicked: {message}")
    })
}

/// Window and event handling. The scene lives on the render thread; every
/// access from here goes through its lock, taken before the physics mutex.
pub struct App {
    config: EngineConfig,
    trees: usize,
    window: Option<Arc<Window>>,
    scene: Option<Arc<SceneLock<Scene>>>,
    render_thread: Option<JoinHandle<()>>,
    physics: Arc<Mutex<PhysicsState>>,
    error: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: EngineConfig, trees: usize) -> Self {
        Self {
            config,
            trees,
            window: None,
            scene: None,
            render_thread: None,
            physics: Arc::new(Mutex::new(PhysicsState::new())),
            error: None,
        }
    }

    fn initialize(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let window_attrs = Window::default_attributes()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(WINDOW_SIZE, WINDOW_SIZE));
        let window = Arc::new(event_loop.create_window(window_attrs).context("Failed to create window")?);

        let slot = Arc::new(SceneSlot::new());
        let handle = render_thread::spawn(Arc::clone(&window), self.config.clone(), self.trees, Arc::clone(&slot))
            .context("Failed to spawn render thread")?;
        self.window = Some(window);
        self.render_thread = Some(handle);

        let scene = slot.wait().map_err(|e| anyhow!(e))?;
        {
            let mut guard = scene.lock();
            let physics = Arc::clone(&self.physics);
            let mut last_tick = Instant::now();
            guard.set_physics_callback(move |scene: &mut Scene| {
                let now = Instant::now();
                let mut physics = lock_physics(&physics);
                physics.tick(now - last_tick);
                physics.apply(scene, PLANE_INDEX);
                last_tick = now;
            });
            guard.set_light_source_position(DEFAULT_LIGHT_POSITION);
            lock_physics(&self.physics).apply(&mut guard, PLANE_INDEX);
        }
        self.scene = Some(scene);
        log::info!("Scene ready");
        Ok(())
    }

    /// Stops painting and joins the render thread. A panic there becomes
    /// the app's error unless an earlier one is already recorded.
    fn stop_render_thread(&mut self) {
        if let Some(scene) = self.scene.take() {
            scene.lock().stop_painting();
        }
        if let Some(handle) = self.render_thread.take() {
            if let Err(e) = render_thread_result(handle.join()) {
                log::error!("{:#}", e);
                self.error.get_or_insert(e);
            }
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.stop_render_thread();
        event_loop.exit();
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: &Key) {
        let Some(action) = key_action(key) else {
            return;
        };
        if action == KeyAction::Close {
            self.shutdown(event_loop);
            return;
        }
        let Some(lock) = &self.scene else {
            return;
        };

        let mut scene = lock.lock();
        match action {
            KeyAction::Speed(amount) => lock_physics(&self.physics).speed_up(amount),
            KeyAction::Rotate(direction) => {
                let mut physics = lock_physics(&self.physics);
                physics.rotate(direction, Rad::from(ROTATION_STEP));
                physics.apply(&mut scene, PLANE_INDEX);
            }
            KeyAction::ReloadShaders => scene.reload_shaders(),
            KeyAction::ToggleWireframe => scene.toggle_wireframe_mode(),
            KeyAction::TessLevel(delta) => scene.modify_tess_level(delta),
            KeyAction::ToggleDynamicTessellation => scene.toggle_dynamic_tessellation(),
            KeyAction::Close => {}
        }
    }

    /// Consumes the app once the event loop has returned.
    pub fn finish(mut self) -> anyhow::Result<()> {
        self.stop_render_thread();
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Err(e) = self.initialize(event_loop) {
            log::error!("{:#}", e);
            self.error = Some(e);
            self.shutdown(event_loop);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.shutdown(event_loop),
            WindowEvent::Resized(size) => {
                if let Some(scene) = &self.scene {
                    scene.lock().resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                self.handle_key(event_loop, &event.logical_key);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flight_keys() {
        assert_eq!(key_action(&Key::Named(NamedKey::Escape)), Some(KeyAction::Close));
        assert_eq!(key_action(&Key::Named(NamedKey::PageUp)), Some(KeyAction::Speed(0.2)));
        assert_eq!(key_action(&Key::Named(NamedKey::PageDown)), Some(KeyAction::Speed(-0.2)));
        assert_eq!(
            key_action(&Key::Named(NamedKey::ArrowUp)),
            Some(KeyAction::Rotate(Direction::Up))
        );
        assert_eq!(
            key_action(&Key::Named(NamedKey::ArrowRight)),
            Some(KeyAction::Rotate(Direction::Right))
        );
    }

    #[test]
    fn test_render_mode_keys() {
        assert_eq!(key_action(&Key::Character("r".into())), Some(KeyAction::ReloadShaders));
        assert_eq!(key_action(&Key::Character("w".into())), Some(KeyAction::ToggleWireframe));
        assert_eq!(key_action(&Key::Character("j".into())), Some(KeyAction::TessLevel(1)));
        assert_eq!(key_action(&Key::Character("k".into())), Some(KeyAction::TessLevel(-1)));
        assert_eq!(
            key_action(&Key::Character("P".into())),
            Some(KeyAction::ToggleDynamicTessellation)
        );
    }

    #[test]
    fn test_finish_reports_render_thread_panic() {
        let mut app = App::new(EngineConfig::default(), 0);
        app.render_thread = Some(std::thread::spawn(|| panic!("device lost")));

        let err = app.finish().unwrap_err();
        assert_eq!(err.to_string(), "Render thread panicked: device lost");
    }

    #[test]
    fn test_finish_keeps_earlier_error() {
        let mut app = App::new(EngineConfig::default(), 0);
        app.error = Some(anyhow!("Failed to create window"));
        app.render_thread = Some(std::thread::spawn(|| panic!("device lost")));

        let err = app.finish().unwrap_err();
        assert_eq!(err.to_string(), "Failed to create window");
    }

    #[test]
    fn test_finish_after_clean_exit() {
        let mut app = App::new(EngineConfig::default(), 0);
        app.render_thread = Some(std::thread::spawn(|| {}));
        assert!(app.finish().is_ok());
    }

    #[test]
    fn test_render_thread_panic_with_formatted_message() {
        let joined = std::thread::spawn(|| panic!("frame {} failed", 3)).join();
        let err = render_thread_result(joined).unwrap_err();
        assert_eq!(err.to_string(), "Render thread panicked: frame 3 failed");
    }

    #[test]
    fn test_unbound_keys_are_ignored() {
        assert_eq!(key_action(&Key::Character("x".into())), None);
        assert_eq!(key_action(&Key::Named(NamedKey::Space)), None);
    }
}
