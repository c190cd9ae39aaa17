//! Builds the scene on its own thread, then draws it until painting stops.

use std::{path::Path, sync::Arc, thread::JoinHandle};

use anyhow::{Context, Result};
use cgmath::{Deg, Vector3};
use rand::Rng;
use terrain_engine::{
    scene::lock::LockTracked, EngineConfig, GpuContext, Node, PresentFrame, Scene, SceneLock, SceneSlot,
    TERRAIN_DIMENSIONS,
};
use winit::window::Window;

pub const PLANE_MODEL: &str = "models/Airbus A310.obj";
pub const TREE_MODEL: &str = "models/tree/lowpolytree.obj";
pub const HELICOPTER_MODEL: &str = "models/helicopter/uh60.obj";

/// Index of the plane in the scene objects.
pub const PLANE_INDEX: usize = 0;

/// Height of a tree's origin above the terrain.
const TREE_LIFT: f32 = 1.5;

/// Integer terrain coordinates in `[0, bound)` on each axis.
pub fn random_tree_coords(rng: &mut impl Rng, bound: u32) -> (u32, u32) {
    let bound = bound.max(1);
    (rng.random_range(0..bound), rng.random_range(0..bound))
}

/// World position of a tree planted at terrain coordinates `(x, y)`.
pub fn tree_position(x: f32, y: f32, height: f32) -> Vector3<f32> {
    Vector3::new(
        x - TERRAIN_DIMENSIONS / 2.0,
        height + TREE_LIFT,
        y - TERRAIN_DIMENSIONS / 2.0,
    )
}

fn load_model(gpu: &GpuContext, path: &Path) -> Option<Node> {
    match Node::from_file(gpu, path) {
        Ok(node) => Some(node),
        Err(e) => {
            log::error!("Skipping model {}: {}", path.display(), e);
            None
        }
    }
}

/// Adds the plane, the trees and the helicopter. Missing models are
/// skipped. The plane always ends up at [`PLANE_INDEX`].
fn populate(scene: &mut Scene, config: &EngineConfig, trees: usize) {
    let mut plane = Node::group();
    if let Some(model) = load_model(scene.gpu(), &config.resource(PLANE_MODEL)) {
        plane.add_child(model);
    }
    scene.add_object(plane);

    let mut rng = rand::rng();
    let bound = TERRAIN_DIMENSIONS as u32;
    let tree_path = config.resource(TREE_MODEL);
    for _ in 0..trees {
        let Some(mut tree) = load_model(scene.gpu(), &tree_path) else {
            break;
        };
        let (x, y) = random_tree_coords(&mut rng, bound);
        let (x, y) = (x as f32, y as f32);
        let height = scene.terrain_height_at(x, y).unwrap_or(0.0);
        tree.translate(tree_position(x, y, height));
        scene.add_object(tree);
    }

    if let Some(mut helicopter) = load_model(scene.gpu(), &config.resource(HELICOPTER_MODEL)) {
        helicopter
            .translate(Vector3::new(10.0, 10.0, -10.0))
            .rotate_x(Deg(270.0));
        scene.add_object(helicopter);
    }

    log::info!("Scene populated with {} objects", scene.objects().len());
}

fn build_scene(window: Arc<Window>, config: &EngineConfig, trees: usize) -> Result<Arc<SceneLock<Scene>>> {
    let size = window.inner_size();
    let gpu = pollster::block_on(GpuContext::new(window, size.width, size.height, config.vsync))
        .context("Failed to create GPU context")?;
    let scene = Scene::new(gpu, config.clone()).context("Failed to build scene")?;

    let lock = Arc::new(SceneLock::new(scene));
    {
        let mut scene = lock.lock();
        scene.resize(size.width, size.height);
        populate(&mut scene, config, trees);
    }
    Ok(lock)
}

/// What the render loop needs from the locked scene.
pub trait Painter: LockTracked {
    type Acquired;
    type Frame;

    fn should_paint(&self) -> bool;

    /// Draws into an acquired surface frame. Returns the frame to present,
    /// or `None` when nothing should be shown.
    fn paint(&mut self, acquired: Self::Acquired) -> Option<Self::Frame>;
}

impl Painter for Scene {
    type Acquired = Result<wgpu::SurfaceTexture, wgpu::SurfaceError>;
    type Frame = PresentFrame;

    fn should_paint(&self) -> bool {
        Scene::should_paint(self)
    }

    fn paint(&mut self, acquired: Self::Acquired) -> Option<PresentFrame> {
        match self.draw(acquired) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Frame failed, stopping: {}", e);
                self.stop_painting();
                None
            }
        }
    }
}

/// Acquires, paints and presents frames until painting stops. Acquiring
/// and presenting wait on the display, so both happen without the lock.
pub fn render_loop<T: Painter>(
    lock: &SceneLock<T>,
    mut acquire: impl FnMut() -> T::Acquired,
    mut present: impl FnMut(T::Frame),
) {
    loop {
        let acquired = acquire();
        let frame = {
            let mut scene = lock.lock();
            if !scene.should_paint() {
                break;
            }
            scene.paint(acquired)
        };
        if let Some(frame) = frame {
            present(frame);
        }
    }
    log::info!("Render loop finished");
}

/// Spawns the render thread. The scene, or the error that prevented
/// building it, is published to `slot` before any frame is drawn.
pub fn spawn(
    window: Arc<Window>,
    config: EngineConfig,
    trees: usize,
    slot: Arc<SceneSlot<Scene>>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("render".to_string())
        .spawn(move || match build_scene(window, &config, trees) {
            Ok(lock) => {
                slot.publish(Ok(Arc::clone(&lock)));
                let surface = lock.lock().surface();
                render_loop(&lock, || surface.get_current_texture(), PresentFrame::present);
            }
            Err(e) => slot.publish(Err(format!("{e:#}"))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_tree_coords_stay_on_terrain() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            let (x, y) = random_tree_coords(&mut rng, 100);
            assert!(x < 100 && y < 100);
        }
    }

    #[test]
    fn test_tree_coords_with_empty_bound() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(random_tree_coords(&mut rng, 0), (0, 0));
    }

    /// Paints a fixed number of frames, then stops.
    struct CountdownScene {
        locked: bool,
        frames_left: u32,
        painted: Vec<u32>,
    }

    impl LockTracked for CountdownScene {
        fn set_locked(&mut self, locked: bool) {
            self.locked = locked;
        }
    }

    impl Painter for CountdownScene {
        type Acquired = u32;
        type Frame = u32;

        fn should_paint(&self) -> bool {
            self.frames_left > 0
        }

        fn paint(&mut self, acquired: u32) -> Option<u32> {
            assert!(self.locked);
            self.frames_left -= 1;
            self.painted.push(acquired);
            // Odd frames are skipped
            (acquired % 2 == 0).then_some(acquired)
        }
    }

    #[test]
    fn test_render_loop_waits_on_display_without_lock() {
        let lock = SceneLock::new(CountdownScene {
            locked: false,
            frames_left: 4,
            painted: Vec::new(),
        });
        let mut next = 0;
        let mut presented = Vec::new();
        render_loop(
            &lock,
            || {
                assert!(lock.try_lock().is_some(), "lock held while acquiring");
                next += 1;
                next
            },
            |frame| {
                assert!(lock.try_lock().is_some(), "lock held while presenting");
                presented.push(frame);
            },
        );

        assert_eq!(lock.lock().painted, vec![1, 2, 3, 4]);
        assert_eq!(presented, vec![2, 4]);
    }

    #[test]
    fn test_tree_position_centers_terrain() {
        let position = tree_position(50.0, 0.0, 2.0);
        assert_eq!(position, Vector3::new(0.0, 3.5, -50.0));
    }
}
