//! Wavefront OBJ import.
//!
//! Parsing is split from GPU upload: [`parse_obj`] produces validated
//! [`MeshData`] per material group, and [`Node::from_file`] turns those into
//! mesh nodes.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use obj::raw::{
    material::Material as RawMaterial,
    object::{Polygon, RawObj},
};

use crate::{
    gpu::GpuContext,
    scene::{
        material::Material,
        mesh::{Mesh, MeshData, MeshError, Vertex},
        node::Node,
        texture::{GpuTexture, TextureOptions},
    },
};

/// Errors when importing a model.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to open {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse OBJ {path:?}: {message}")]
    Obj { path: PathBuf, message: String },
    #[error("Failed to parse material library {path:?}: {message}")]
    Material { path: PathBuf, message: String },
    #[error("Invalid mesh in {path:?}: {source}")]
    Mesh {
        path: PathBuf,
        #[source]
        source: MeshError,
    },
}

/// One material group of an imported model.
#[derive(Debug, Clone)]
pub struct ImportedMesh {
    pub material_name: Option<String>,
    pub data: MeshData,
    pub material: Material,
    /// Diffuse texture, relative to the working directory.
    pub texture: Option<PathBuf>,
}

/// Index of a polygon corner into the position, texture and normal arrays.
type CornerKey = (usize, Option<usize>, Option<usize>);

/// Parses OBJ data and its material libraries, which are resolved relative
/// to `base_dir`. Returns one entry per material group in file order.
pub fn parse_obj(
    source: impl BufRead,
    base_dir: &Path,
    path: &Path,
) -> Result<Vec<ImportedMesh>, LoadError> {
    let raw = obj::raw::parse_obj(source).map_err(|e| LoadError::Obj {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let materials = load_material_libraries(&raw, base_dir)?;

    let mut meshes = Vec::new();
    for (name, polygons) in material_groups(&raw) {
        let data = build_mesh_data(&raw, &polygons).map_err(|source| LoadError::Mesh {
            path: path.to_path_buf(),
            source,
        })?;
        let raw_material = name.as_ref().and_then(|name| materials.get(name));
        if name.is_some() && raw_material.is_none() {
            log::warn!("{:?}: material {:?} not found, using defaults", path, name);
        }
        meshes.push(ImportedMesh {
            material: raw_material.map(Material::from_mtl).unwrap_or_default(),
            texture: raw_material
                .and_then(|m| m.diffuse_map.as_ref())
                .map(|map| base_dir.join(&map.file)),
            material_name: name,
            data,
        });
    }
    Ok(meshes)
}

fn load_material_libraries(
    raw: &RawObj,
    base_dir: &Path,
) -> Result<HashMap<String, RawMaterial>, LoadError> {
    let mut materials = HashMap::new();
    for library in &raw.material_libraries {
        let path = base_dir.join(library);
        let file = File::open(&path).map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
        let mtl = obj::raw::parse_mtl(BufReader::new(file)).map_err(|e| LoadError::Material {
            path: path.clone(),
            message: e.to_string(),
        })?;
        materials.extend(mtl.materials);
    }
    Ok(materials)
}

/// Polygon indices per material group, ordered by first appearance.
/// Polygons outside any `usemtl` group form a group without material,
/// whether the parser reports them under an empty name or not at all.
fn material_groups(raw: &RawObj) -> Vec<(Option<String>, Vec<usize>)> {
    let mut covered = vec![false; raw.polygons.len()];
    let mut groups: Vec<(Option<String>, Vec<usize>)> = raw
        .meshes
        .iter()
        .map(|(name, group)| {
            let polygons: Vec<usize> = group
                .polygons
                .iter()
                .flat_map(|range| range.start..range.end)
                .filter(|&i| i < covered.len())
                .collect();
            ((!name.is_empty()).then(|| name.clone()), polygons)
        })
        .filter(|(_, polygons)| !polygons.is_empty())
        .collect();

    for (_, polygons) in &groups {
        for &i in polygons {
            covered[i] = true;
        }
    }
    let uncovered: Vec<usize> = (0..covered.len()).filter(|&i| !covered[i]).collect();
    if !uncovered.is_empty() {
        groups.push((None, uncovered));
    }

    groups.sort_by_key(|(_, polygons)| polygons.first().copied().unwrap_or(usize::MAX));
    groups
}

fn polygon_corners(polygon: &Polygon) -> Vec<CornerKey> {
    match polygon {
        Polygon::P(corners) => corners.iter().map(|&p| (p, None, None)).collect(),
        Polygon::PT(corners) => corners.iter().map(|&(p, t)| (p, Some(t), None)).collect(),
        Polygon::PN(corners) => corners.iter().map(|&(p, n)| (p, None, Some(n))).collect(),
        Polygon::PTN(corners) => corners.iter().map(|&(p, t, n)| (p, Some(t), Some(n))).collect(),
    }
}

/// De-indexes the corners of `polygons` into a vertex list and fan
/// triangulates each polygon. Normals are computed when any corner lacks one.
fn build_mesh_data(raw: &RawObj, polygons: &[usize]) -> Result<MeshData, MeshError> {
    let mut vertices: Vec<Vertex> = Vec::new();
    let mut lookup: HashMap<CornerKey, u32> = HashMap::new();
    let mut indices = Vec::new();
    let mut missing_normals = false;

    for &polygon in polygons {
        let corners = polygon_corners(&raw.polygons[polygon]);
        let mut corner_indices = Vec::with_capacity(corners.len());
        for key in corners {
            let (p, t, n) = key;
            missing_normals |= n.is_none();
            let index = match lookup.get(&key) {
                Some(&index) => index,
                None => {
                    let position = raw.positions.get(p).ok_or(MeshError::IndexOutOfBounds {
                        index: p as u32,
                        position: indices.len(),
                        vertex_count: raw.positions.len(),
                    })?;
                    let tex_coords = t
                        .and_then(|t| raw.tex_coords.get(t))
                        .map(|&(u, v, _)| [u, 1.0 - v])
                        .unwrap_or([0.0, 0.0]);
                    let normal = n
                        .and_then(|n| raw.normals.get(n))
                        .map(|&(x, y, z)| [x, y, z])
                        .unwrap_or([0.0, 0.0, 0.0]);
                    let index = vertices.len() as u32;
                    vertices.push(Vertex::new([position.0, position.1, position.2], normal, tex_coords));
                    lookup.insert(key, index);
                    index
                }
            };
            corner_indices.push(index);
        }

        for i in 1..corner_indices.len().saturating_sub(1) {
            indices.extend_from_slice(&[corner_indices[0], corner_indices[i], corner_indices[i + 1]]);
        }
    }

    let mut data = MeshData::new(vertices, indices)?;
    if missing_normals {
        data.compute_flat_normals();
    }
    Ok(data)
}

impl Node {
    /// Imports a Wavefront OBJ file with its materials and textures.
    ///
    /// A file with a single material group becomes a mesh node; otherwise
    /// the result is a group node with one mesh child per material group.
    pub fn from_file(gpu: &GpuContext, path: impl AsRef<Path>) -> Result<Node, LoadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let imported = parse_obj(BufReader::new(file), base_dir, path)?;

        let mut meshes: Vec<Node> = imported
            .into_iter()
            .map(|mesh| {
                let texture = mesh.texture.as_deref().and_then(|texture_path| {
                    GpuTexture::from_path(
                        &gpu.device,
                        &gpu.queue,
                        &gpu.layouts.texture,
                        texture_path,
                        TextureOptions::tiled(),
                    )
                    .map_err(|e| log::warn!("{:?}: {}", path, e))
                    .ok()
                });
                Node::mesh(Mesh::new(gpu, mesh.data, mesh.material, texture))
            })
            .collect();

        log::info!("Loaded model {:?} ({} meshes)", path, meshes.len());
        match meshes.len() {
            0 => Err(LoadError::Mesh {
                path: path.to_path_buf(),
                source: MeshError::Empty,
            }),
            1 => Ok(meshes.remove(0)),
            _ => {
                let mut group = Node::group();
                for mesh in meshes {
                    group.add_child(mesh);
                }
                Ok(group)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::EPSILON;

    const TWO_GROUPS: &str = "\
v 0 0 0
v 1 0 0
v 1 0 -1
v 0 0 -1
v 0 1 0
usemtl first
f 1 2 3 4
usemtl second
f 1 2 5
";

    fn parse(source: &str) -> Vec<ImportedMesh> {
        parse_obj(source.as_bytes(), Path::new("."), Path::new("test.obj")).unwrap()
    }

    #[test]
    fn test_one_mesh_per_material_group() {
        let meshes = parse(TWO_GROUPS);
        assert_eq!(meshes.len(), 2);
        assert_eq!(meshes[0].material_name.as_deref(), Some("first"));
        assert_eq!(meshes[1].material_name.as_deref(), Some("second"));
        // Unknown materials fall back to defaults
        assert_eq!(meshes[0].material, Material::default());
    }

    #[test]
    fn test_quad_is_fan_triangulated() {
        let meshes = parse(TWO_GROUPS);
        assert_eq!(meshes[0].data.triangle_count(), 2);
        assert_eq!(meshes[0].data.indices(), &[0, 1, 2, 0, 2, 3]);
        assert_eq!(meshes[0].data.vertices().len(), 4);
    }

    #[test]
    fn test_missing_normals_are_computed() {
        let meshes = parse(TWO_GROUPS);
        // Counter-clockwise from above
        for v in meshes[0].data.vertices() {
            assert!((v.normal[1] - 1.0).abs() < EPSILON);
        }
        // The second triangle stands in the XY plane
        for v in meshes[1].data.vertices() {
            assert!((v.normal[2] - 1.0).abs() < EPSILON);
        }
    }

    #[test]
    fn test_file_normals_are_kept() {
        let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nvn 0 0 -1\nf 1//1 2//1 3//1\n";
        let meshes = parse(source);
        assert_eq!(meshes.len(), 1);
        assert!(meshes[0].material_name.is_none());
        assert_eq!(meshes[0].data.vertices()[0].normal, [0.0, 0.0, -1.0]);
    }

    #[test]
    fn test_polygons_before_usemtl_have_no_material() {
        let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\nusemtl a\nf 3 2 1\n";
        let names: Vec<_> = parse(source).into_iter().map(|mesh| mesh.material_name).collect();
        assert_eq!(names, vec![None, Some("a".to_string())]);
    }

    #[test]
    fn test_material_library_is_loaded() {
        let dir = std::env::temp_dir().join(format!("terrain-engine-loader-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("model.mtl"), "newmtl red\nKd 1 0 0\nmap_Kd red.png\n").unwrap();
        let source = "mtllib model.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl red\nf 1 2 3\n";

        let meshes = parse_obj(source.as_bytes(), &dir, Path::new("model.obj")).unwrap();
        assert_eq!(meshes[0].material.diffuse.r, 1.0);
        assert_eq!(meshes[0].material.ambient.r, 1.0);
        assert_eq!(meshes[0].texture.as_deref(), Some(dir.join("red.png").as_path()));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_material_library() {
        let source = "mtllib missing.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let result = parse_obj(source.as_bytes(), Path::new("/nonexistent"), Path::new("model.obj"));
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }
}
