mod app;
mod physics;
mod render_thread;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use terrain_engine::{EngineConfig, ShaderConfig, ShaderSource, TerrainMode};
use winit::event_loop::EventLoop;

use app::App;

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum TerrainArg {
    #[value(name = "none")]
    Off,
    Static,
    Dynamic,
    Bezier,
}

impl From<TerrainArg> for TerrainMode {
    fn from(arg: TerrainArg) -> Self {
        match arg {
            TerrainArg::Off => TerrainMode::NoTerrain,
            TerrainArg::Static => TerrainMode::Terrain,
            TerrainArg::Dynamic => TerrainMode::DynTerrain,
            TerrainArg::Bezier => TerrainMode::BezierTerrain,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "terrain-flight")]
#[command(about = "Fly a plane over a height-mapped terrain")]
#[command(version)]
struct Cli {
    /// Terrain strategy
    #[arg(long, value_enum, default_value_t = TerrainArg::Dynamic)]
    terrain: TerrainArg,

    /// Shorthand for `--terrain bezier`
    #[arg(long)]
    bezier: bool,

    /// Read WESL modules from this directory instead of the embedded copies;
    /// `r` reloads them
    #[arg(long)]
    shader_dir: Option<PathBuf>,

    /// Asset root holding terrain/, skybox/ and models/
    #[arg(long, default_value = "res")]
    res: PathBuf,

    /// Number of trees scattered over the terrain
    #[arg(long, default_value_t = 20)]
    trees: usize,

    /// Draw objects as tessellated triangle patches
    #[arg(long)]
    tessellate_meshes: bool,

    /// Present without waiting for vertical sync
    #[arg(long)]
    no_vsync: bool,
}

impl Cli {
    fn config(&self) -> EngineConfig {
        let terrain = if self.bezier { TerrainArg::Bezier } else { self.terrain };
        let source = match &self.shader_dir {
            Some(dir) => ShaderSource::Directory(dir.clone()),
            None => ShaderSource::Embedded,
        };
        EngineConfig {
            shaders: ShaderConfig {
                source,
                ..ShaderConfig::default()
            },
            resource_root: self.res.clone(),
            terrain_mode: terrain.into(),
            tessellate_meshes: self.tessellate_meshes,
            vsync: !self.no_vsync,
            ..EngineConfig::default()
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = cli.config();
    log::info!("Starting with {:?}", config);

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config, cli.trees);
    event_loop.run_app(&mut app).context("Event loop failed")?;
    app.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("terrain-flight").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert_eq!(cli.trees, 20);
        let config = cli.config();
        assert_eq!(config.terrain_mode, TerrainMode::DynTerrain);
        assert_eq!(config.shaders.source, ShaderSource::Embedded);
        assert_eq!(config.resource_root, PathBuf::from("res"));
        assert!(config.vsync);
        assert!(!config.tessellate_meshes);
    }

    #[test]
    fn test_bezier_shorthand() {
        assert_eq!(parse(&["--bezier"]).config().terrain_mode, TerrainMode::BezierTerrain);
        assert_eq!(
            parse(&["--terrain", "static", "--bezier"]).config().terrain_mode,
            TerrainMode::BezierTerrain
        );
    }

    #[test]
    fn test_terrain_names() {
        assert_eq!(parse(&["--terrain", "none"]).config().terrain_mode, TerrainMode::NoTerrain);
        assert_eq!(parse(&["--terrain", "static"]).config().terrain_mode, TerrainMode::Terrain);
        assert!(Cli::try_parse_from(["terrain-flight", "--terrain", "flat"]).is_err());
    }

    #[test]
    fn test_shader_dir_and_flags() {
        let config = parse(&["--shader-dir", "shaders", "--no-vsync", "--tessellate-meshes", "--res", "assets"]).config();
        assert_eq!(config.shaders.source, ShaderSource::Directory(PathBuf::from("shaders")));
        assert_eq!(config.resource_root, PathBuf::from("assets"));
        assert!(!config.vsync);
        assert!(config.tessellate_meshes);
    }
}
