pub mod camera;
pub mod common;
pub mod config;
pub mod gpu;
pub mod pass;
pub mod program;
pub mod scene;
pub mod shaders;
pub mod shadow;
pub mod skybox;
pub mod terrain;
pub mod uniforms;

pub use config::EngineConfig;
pub use gpu::{GpuContext, GpuError};
pub use scene::{
    lock::{SceneGuard, SceneLock, SceneSlot},
    Node, PhysicsCallback, PresentFrame, Scene, SceneError, SurfaceRecovery,
};
pub use shaders::{ShaderConfig, ShaderSource};
pub use terrain::{TerrainMode, TERRAIN_DIMENSIONS};
