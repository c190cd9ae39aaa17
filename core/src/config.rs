use std::path::{Path, PathBuf};

use crate::{shaders::ShaderConfig, terrain::TerrainMode};

pub const DEFAULT_SHADOW_MAP_SIZE: u32 = 4096;

/// Startup configuration, passed by reference to every constructor that
/// needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub shaders: ShaderConfig,
    /// Directory holding `terrain/`, `skybox/` and `models/`.
    pub resource_root: PathBuf,
    pub terrain_mode: TerrainMode,
    /// Side of the square light-space depth maps.
    pub shadow_map_size: u32,
    /// Draw objects as tessellated triangle patches.
    pub tessellate_meshes: bool,
    pub vsync: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shaders: ShaderConfig::default(),
            resource_root: PathBuf::from("res"),
            terrain_mode: TerrainMode::default(),
            shadow_map_size: DEFAULT_SHADOW_MAP_SIZE,
            tessellate_meshes: false,
            vsync: true,
        }
    }
}

impl EngineConfig {
    /// Resolves `relative` against the resource root.
    pub fn resource(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.resource_root.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.terrain_mode, TerrainMode::DynTerrain);
        assert_eq!(config.shadow_map_size, 4096);
        assert_eq!(config.resource("models/tree.obj"), PathBuf::from("res/models/tree.obj"));
    }
}
