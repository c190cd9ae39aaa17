use std::{borrow::Cow, path::PathBuf};

use bitflags::bitflags;
use wesl::{ModulePath, VirtualResolver, Wesl};

use crate::program::ProgramError;

// Embed shader sources at compile time so the binary runs without a shader directory
const SHADER_COMMON: &str = include_str!("shaders/common.wesl");
const SHADER_LIGHTING: &str = include_str!("shaders/lighting.wesl");
const SHADER_TESS_LEVEL: &str = include_str!("shaders/tess_level.wesl");
const SHADER_TRIANGLE_PATCH: &str = include_str!("shaders/triangle_patch.wesl");
const SHADER_BEZIER_PATCH: &str = include_str!("shaders/bezier_patch.wesl");
const SHADER_FACE_NORMALS: &str = include_str!("shaders/face_normals.wesl");
const SHADER_MAIN: &str = include_str!("shaders/main.wesl");
const SHADER_SKYBOX: &str = include_str!("shaders/skybox.wesl");
const SHADER_QUAD_TERRAIN: &str = include_str!("shaders/quad_terrain.wesl");
const SHADER_BEZIER_TERRAIN: &str = include_str!("shaders/bezier_terrain.wesl");

const EMBEDDED: &[(&str, &str)] = &[
    ("common", SHADER_COMMON),
    ("lighting", SHADER_LIGHTING),
    ("tess_level", SHADER_TESS_LEVEL),
    ("triangle_patch", SHADER_TRIANGLE_PATCH),
    ("bezier_patch", SHADER_BEZIER_PATCH),
    ("face_normals", SHADER_FACE_NORMALS),
    ("main", SHADER_MAIN),
    ("skybox", SHADER_SKYBOX),
    ("quad_terrain", SHADER_QUAD_TERRAIN),
    ("bezier_terrain", SHADER_BEZIER_TERRAIN),
];

bitflags! {
    /// Pipeline stages a program was assembled from.
    ///
    /// wgpu has no geometry or tessellation stages; programs that name them
    /// are emulated with vertex pulling, and the flags tell draw code which
    /// primitive layout the program expects.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ProgramStages: u8 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const GEOMETRY = 1 << 2;
        const TESS_CONTROL = 1 << 3;
        const TESS_EVALUATION = 1 << 4;
    }
}

/// Where WESL sources are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    /// Sources compiled into the binary.
    Embedded,
    /// `<dir>/<module>.wesl` files read at program creation, which makes
    /// shader reloading pick up edits.
    Directory(PathBuf),
}

/// Shader configuration, computed once at startup and passed to every
/// program constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderConfig {
    pub source: ShaderSource,
    /// Extra WESL features enabled for every program.
    pub features: Vec<(String, bool)>,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            source: ShaderSource::Embedded,
            features: Vec::new(),
        }
    }
}

/// The modules a program is assembled from, by stage.
///
/// `vertex` is the root module: it declares the uniform struct, the bindings
/// and both entry points. The other stages are library modules whose
/// functions the root calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSet {
    pub common: Vec<&'static str>,
    pub vertex: &'static str,
    pub fragment: Option<&'static str>,
    pub geometry: Option<&'static str>,
    pub tessellation_control: Option<&'static str>,
    pub tessellation_evaluation: Option<&'static str>,
}

impl ShaderSet {
    pub fn new(common: &[&'static str], vertex: &'static str) -> Self {
        Self {
            common: common.to_vec(),
            vertex,
            fragment: None,
            geometry: None,
            tessellation_control: None,
            tessellation_evaluation: None,
        }
    }

    pub fn stages(&self) -> ProgramStages {
        let mut stages = ProgramStages::VERTEX | ProgramStages::FRAGMENT;
        if self.geometry.is_some() {
            stages |= ProgramStages::GEOMETRY;
        }
        if self.tessellation_control.is_some() {
            stages |= ProgramStages::TESS_CONTROL;
        }
        if self.tessellation_evaluation.is_some() {
            stages |= ProgramStages::TESS_EVALUATION;
        }
        stages
    }

    /// Every module the program may import, root last.
    fn modules(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.common
            .iter()
            .copied()
            .chain(self.tessellation_control)
            .chain(self.tessellation_evaluation)
            .chain(self.geometry)
            .chain(self.fragment)
            .chain(std::iter::once(self.vertex))
    }
}

/// Assembles shader sets into WGSL through the WESL compiler.
pub struct ShaderLibrary {
    config: ShaderConfig,
}

impl ShaderLibrary {
    pub fn new(config: ShaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ShaderConfig {
        &self.config
    }

    fn load_module(&self, name: &str) -> Result<Cow<'static, str>, ProgramError> {
        match &self.config.source {
            ShaderSource::Embedded => EMBEDDED
                .iter()
                .find(|(module, _)| *module == name)
                .map(|(_, source)| Cow::Borrowed(*source))
                .ok_or_else(|| ProgramError::MissingModule(name.to_string())),
            ShaderSource::Directory(dir) => {
                let path = dir.join(format!("{name}.wesl"));
                std::fs::read_to_string(&path)
                    .map(Cow::Owned)
                    .map_err(|source| ProgramError::Io { path, source })
            }
        }
    }

    /// Sources of every module in `shaders`, each under `package::<name>`.
    fn module_sources(
        &self,
        shaders: &ShaderSet,
    ) -> Result<Vec<(ModulePath, Cow<'static, str>)>, ProgramError> {
        shaders
            .modules()
            .map(|module| Ok((module_path(module)?, self.load_module(module)?)))
            .collect()
    }

    /// Compiles `shaders` to WGSL with the given per-program features on
    /// top of the configured global ones.
    pub fn compile(
        &self,
        shaders: &ShaderSet,
        features: &[(&str, bool)],
    ) -> Result<String, ProgramError> {
        let mut resolver = VirtualResolver::default();
        for (path, source) in self.module_sources(shaders)? {
            resolver.add_module(path, source);
        }
        let path = module_path(shaders.vertex)?;

        let mut compiler = Wesl::new(".").set_custom_resolver(resolver);
        let stages = shaders.stages();
        let mut all_features: Vec<(String, bool)> = vec![
            ("tessellated".to_string(), stages.contains(ProgramStages::TESS_CONTROL)),
            ("face_normals".to_string(), stages.contains(ProgramStages::GEOMETRY)),
        ];
        all_features.extend(self.config.features.iter().cloned());
        all_features.extend(features.iter().map(|(name, on)| (name.to_string(), *on)));
        compiler.set_features(all_features);

        let result = compiler
            .compile(&path)
            .map_err(|e| ProgramError::Compile(format!("{} ({}): {e}", shaders.vertex, stages_label(stages))))?;
        Ok(result.to_string())
    }
}

fn module_path(name: &str) -> Result<ModulePath, ProgramError> {
    format!("package::{name}")
        .parse()
        .map_err(|e| ProgramError::Compile(format!("{name}: {e}")))
}

fn stages_label(stages: ProgramStages) -> String {
    let names: Vec<&str> = stages.iter_names().map(|(name, _)| name).collect();
    names.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_from_set() {
        let mut set = ShaderSet::new(&["common"], "quad_terrain");
        assert_eq!(set.stages(), ProgramStages::VERTEX | ProgramStages::FRAGMENT);

        set.tessellation_control = Some("tess_level");
        set.tessellation_evaluation = Some("triangle_patch");
        assert!(set.stages().contains(ProgramStages::TESS_CONTROL));
        assert!(set.stages().contains(ProgramStages::TESS_EVALUATION));
        assert!(!set.stages().contains(ProgramStages::GEOMETRY));
    }

    #[test]
    fn test_modules_are_listed_root_last() {
        let mut set = ShaderSet::new(&["common", "lighting"], "main");
        set.tessellation_control = Some("tess_level");
        let modules: Vec<_> = set.modules().collect();
        assert_eq!(modules, vec!["common", "lighting", "tess_level", "main"]);
    }

    #[test]
    fn test_each_module_is_registered_on_its_own() {
        let library = ShaderLibrary::new(ShaderConfig::default());
        let set = ShaderSet::new(&["common", "lighting"], "main");
        let sources = library.module_sources(&set).unwrap();

        let paths: Vec<&ModulePath> = sources.iter().map(|(path, _)| path).collect();
        let expected: Vec<ModulePath> = ["package::common", "package::lighting", "package::main"]
            .iter()
            .map(|path| path.parse().unwrap())
            .collect();
        assert_eq!(paths, expected.iter().collect::<Vec<_>>());
        assert_eq!(sources[0].1, SHADER_COMMON);
        assert_eq!(sources[1].1, SHADER_LIGHTING);
        assert_eq!(sources[2].1, SHADER_MAIN);
    }

    /// Module names a WESL source imports from `package::`.
    fn imported_modules(source: &str) -> Vec<&str> {
        source
            .lines()
            .filter_map(|line| line.trim().strip_prefix("import package::"))
            .filter_map(|rest| rest.split("::").next())
            .collect()
    }

    #[test]
    fn test_imports_name_embedded_modules() {
        for (name, source) in EMBEDDED {
            for import in imported_modules(source) {
                assert!(
                    EMBEDDED.iter().any(|(module, _)| *module == import),
                    "{name} imports unknown module {import}"
                );
            }
        }
        assert_eq!(imported_modules(SHADER_LIGHTING), vec!["common"]);
        assert!(imported_modules(SHADER_QUAD_TERRAIN).contains(&"face_normals"));
        assert!(imported_modules(SHADER_SKYBOX).is_empty());
    }

    #[test]
    fn test_program_sets_carry_their_imports() {
        let object = ShaderSet::new(&["common", "lighting"], "main");
        let mut bezier = ShaderSet::new(&["common", "lighting"], "bezier_terrain");
        bezier.tessellation_control = Some("tess_level");
        bezier.tessellation_evaluation = Some("bezier_patch");

        for set in [object, bezier] {
            let modules: Vec<_> = set.modules().collect();
            for module in set.modules() {
                let source = EMBEDDED.iter().find(|(name, _)| *name == module).unwrap().1;
                for import in imported_modules(source) {
                    // Tessellation-only imports are behind @if(tessellated)
                    if set.vertex == "main" && matches!(import, "tess_level" | "triangle_patch") {
                        continue;
                    }
                    assert!(modules.contains(&import), "{} is missing {import}", set.vertex);
                }
            }
        }
    }

    #[test]
    fn test_every_embedded_module_is_unique() {
        for (i, (name, _)) in EMBEDDED.iter().enumerate() {
            assert!(EMBEDDED[i + 1..].iter().all(|(other, _)| other != name));
        }
    }

    #[test]
    fn test_missing_directory_module_reports_path() {
        let library = ShaderLibrary::new(ShaderConfig {
            source: ShaderSource::Directory(PathBuf::from("/nonexistent/shaders")),
            features: Vec::new(),
        });
        match library.load_module("main") {
            Err(ProgramError::Io { path, .. }) => assert!(path.ends_with("main.wesl")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
