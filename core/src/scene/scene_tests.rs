use super::*;
use cgmath::{Deg, Matrix4, Point3, SquareMatrix, Vector3};
use crate::{
    camera,
    common::EPSILON,
    scene::{
        draw_context::tests::RecordingTarget,
        lock::SceneLock,
        mesh::Topology,
        tree::count_meshes,
    },
    shaders::ProgramStages,
    terrain::MAX_TESS_LEVEL,
    uniforms::UniformValue,
};

fn assert_matrix_eq(a: Matrix4<f32>, b: Matrix4<f32>) {
    let a: &[f32; 16] = a.as_ref();
    let b: &[f32; 16] = b.as_ref();
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() < EPSILON, "{a:?} != {b:?}");
    }
}

/// Translated root -> rotated child -> empty leaf.
fn three_level_tree() -> (Node, Matrix4<f32>, Matrix4<f32>) {
    let translation = Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0));
    let rotation = Matrix4::from_angle_y(Deg(90.0));

    let mut child = Node::group();
    child.rotate_y(Deg(90.0));
    child.add_child(Node::group());

    let mut root = Node::group();
    root.translate(Vector3::new(1.0, 2.0, 3.0));
    root.add_child(child);

    (root, translation, rotation)
}

fn model_uploads(target: &RecordingTarget) -> Vec<Matrix4<f32>> {
    target
        .uploads
        .iter()
        .filter_map(|(_, value)| match value {
            UniformValue::Mat4(m) => Some(*m),
            _ => None,
        })
        .collect()
}

// ========================================================================
// Node Transforms
// ========================================================================

#[test]
fn test_translate_then_rotate_matches_multiplication() {
    let offset = Vector3::new(0.0, 0.0, -4.0);
    let mut node = Node::group();
    node.translate(offset).rotate_x(Deg(30.0));

    let expected = Matrix4::from_translation(offset) * Matrix4::from_angle_x(Deg(30.0));
    assert_matrix_eq(node.transform(), expected);
}

#[test]
fn test_transform_order_matters() {
    let mut translated_first = Node::group();
    translated_first.translate_x(2.0).rotate_y(Deg(90.0));
    let mut rotated_first = Node::group();
    rotated_first.rotate_y(Deg(90.0)).translate_x(2.0);

    assert_ne!(translated_first.transform(), rotated_first.transform());
}

#[test]
fn test_translate_along_normalizes_direction() {
    let mut node = Node::group();
    node.translate_along(3.0, Vector3::new(0.0, 10.0, 0.0));
    assert_matrix_eq(node.transform(), Matrix4::from_translation(Vector3::new(0.0, 3.0, 0.0)));

    // A zero direction leaves the node in place
    node.translate_along(3.0, Vector3::new(0.0, 0.0, 0.0));
    assert_matrix_eq(node.transform(), Matrix4::from_translation(Vector3::new(0.0, 3.0, 0.0)));
}

// ========================================================================
// Node Traversal
// ========================================================================

#[test]
fn test_child_transform_is_composed_after_parent() {
    let (root, translation, rotation) = three_level_tree();
    let mut target = RecordingTarget::new();
    {
        let mut ctx = DrawContext::new(&mut target);
        root.draw(&mut ctx);
        assert_eq!(ctx.depth(), 1);
    }

    let models = model_uploads(&target);
    // push root, push child, pop child, pop root
    assert_eq!(models.len(), 4);
    assert_matrix_eq(models[0], translation);
    assert_matrix_eq(models[1], translation * rotation);
    assert_matrix_eq(models[2], translation);
    assert_matrix_eq(models[3], Matrix4::identity());
}

#[test]
fn test_repeated_traversal_is_identical() {
    let (root, _, _) = three_level_tree();
    let mut first = RecordingTarget::new();
    let mut second = RecordingTarget::new();
    {
        let mut ctx = DrawContext::new(&mut first);
        root.draw(&mut ctx);
    }
    {
        let mut ctx = DrawContext::new(&mut second);
        root.draw(&mut ctx);
    }
    assert_eq!(first.uploads, second.uploads);
}

#[test]
fn test_color_is_inherited_by_children() {
    let mut child = Node::group();
    child.add_child(Node::group());
    let mut root = Node::group();
    root.set_color(Some(crate::common::RgbColor::new(0.0, 1.0, 0.0)));
    root.add_child(child);

    let mut target = RecordingTarget::new();
    {
        let mut ctx = DrawContext::new(&mut target);
        root.draw(&mut ctx);
    }
    let colors: Vec<_> = target
        .uploads
        .iter()
        .filter_map(|(_, value)| match value {
            UniformValue::Vec3(c) => Some(*c),
            _ => None,
        })
        .collect();
    assert_eq!(colors[0], Vector3::new(0.0, 1.0, 0.0));
    assert_eq!(colors[1], Vector3::new(0.0, 1.0, 0.0));
}

#[test]
fn test_empty_leaf_uploads_nothing() {
    let mut target = RecordingTarget::new();
    {
        let mut ctx = DrawContext::new(&mut target);
        Node::group().draw(&mut ctx);
    }
    assert!(target.uploads.is_empty());
}

#[test]
fn test_group_trees_count_no_meshes() {
    let (root, _, _) = three_level_tree();
    assert_eq!(count_meshes(std::iter::once(&root)), 0);
}

// ========================================================================
// Mesh Drawing
// ========================================================================

fn triangle_mesh() -> Mesh {
    let data = MeshData::with_flat_normals(
        &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]],
        &[],
        vec![0, 1, 2],
    )
    .unwrap();
    Mesh::from_data(data, Material::default())
}

#[test]
fn test_mesh_draws_triangles_without_tess_control() {
    let mut target = RecordingTarget::new();
    {
        let mut ctx = DrawContext::new(&mut target);
        Node::mesh(triangle_mesh()).draw(&mut ctx);
    }
    assert_eq!(target.draws.len(), 1);
    assert_eq!(target.draws[0].topology, Topology::Triangles);
    assert_eq!(target.draws[0].index_count, 3);
}

#[test]
fn test_mesh_draws_patches_with_tess_control() {
    let mut target = RecordingTarget::new();
    target.stages |= ProgramStages::TESS_CONTROL;
    {
        let mut ctx = DrawContext::new(&mut target);
        Node::mesh(triangle_mesh()).draw(&mut ctx);
    }
    assert_eq!(target.draws[0].topology, Topology::Patches { size: 3 });
}

#[test]
fn test_mesh_with_children_draws_parent_first() {
    let translation = Matrix4::from_translation(Vector3::new(0.0, 5.0, 0.0));
    let rotation = Matrix4::from_angle_z(Deg(45.0));

    let mut child = Node::mesh(triangle_mesh());
    child.rotate_z(Deg(45.0));
    let mut root = Node::mesh(triangle_mesh());
    root.translate(Vector3::new(0.0, 5.0, 0.0));
    root.add_child(child);
    assert_eq!(count_meshes(std::iter::once(&root)), 2);

    let mut target = RecordingTarget::new();
    {
        let mut ctx = DrawContext::new(&mut target);
        root.draw(&mut ctx);
        assert_eq!(ctx.depth(), 1);
    }

    assert_eq!(target.draws.len(), 2);
    assert_matrix_eq(target.draws[0].transform.unwrap(), translation);
    assert_matrix_eq(target.draws[1].transform.unwrap(), translation * rotation);

    // push (transform, color), then the material, then the draw
    assert_eq!(target.draws[0].after_upload, 5);
    let models = model_uploads(&target);
    // root: push, pop; children: push root, push child, pop child, pop root
    assert_eq!(models.len(), 6);
    assert_matrix_eq(models[1], Matrix4::identity());
    assert_matrix_eq(models[5], Matrix4::identity());
}

#[test]
fn test_mesh_uploads_its_material() {
    let mut target = RecordingTarget::new();
    {
        let mut ctx = DrawContext::new(&mut target);
        Node::mesh(triangle_mesh()).draw(&mut ctx);
    }
    let shininess = target.layout.location("uShininess").unwrap();
    let uses_texture = target.layout.location("uUsesTexture").unwrap();
    assert_eq!(target.block.read_f32(shininess), Material::default().shininess);
    assert_eq!(target.block.read_i32(uses_texture), 0);
    assert!(matches!(Node::mesh(triangle_mesh()).kind(), NodeKind::Mesh(mesh) if mesh.buffers().is_none()));
}

// ========================================================================
// Viewport and Camera
// ========================================================================

#[test]
fn test_resize_reprojects() {
    let mut state = SceneState::new();
    state.resize(800, 600);
    assert_eq!(state.pending_resize(), Some((800, 600)));

    assert_eq!(state.apply_pending_resize(), Some((800, 600)));
    assert!(state.pending_resize().is_none());
    assert_eq!(state.viewport(), (800, 600));

    let aspect = camera::aspect_ratio(&state.projection());
    assert!((aspect - 800.0 / 600.0).abs() < EPSILON, "aspect {}", aspect);
}

#[test]
fn test_consecutive_resizes_collapse() {
    let mut state = SceneState::new();
    state.resize(640, 480);
    state.resize(1024, 512);
    assert_eq!(state.apply_pending_resize(), Some((1024, 512)));
    assert_eq!(state.apply_pending_resize(), None);
}

#[test]
fn test_zero_size_resize_is_clamped() {
    let mut state = SceneState::new();
    state.resize(0, 0);
    assert_eq!(state.apply_pending_resize(), Some((1, 1)));
}

#[test]
fn test_view_follows_camera_position() {
    let mut state = SceneState::new();
    state.set_camera_position(Point3::new(10.0, 5.0, 10.0));
    state.recompute_view();
    let eye = camera::eye_position(&state.view()).unwrap();
    assert!((eye.x - 10.0).abs() < 1e-3);
    assert!((eye.y - 5.0).abs() < 1e-3);
    assert!((eye.z - 10.0).abs() < 1e-3);
}

#[test]
fn test_light_moves_shadow_view_projection() {
    let mut state = SceneState::new();
    let before = state.shadow_map_view_projection();
    state.set_light_source_position(Point3::new(-30.0, 40.0, 0.0));
    assert_ne!(state.shadow_map_view_projection(), before);
    assert_eq!(state.light_source_position(), Point3::new(-30.0, 40.0, 0.0));
}

// ========================================================================
// Frame Parameters and Render Modes
// ========================================================================

#[test]
fn test_frame_counter_advances_in_radians() {
    let mut state = SceneState::new();
    assert_eq!(state.frame_params(true).frame, 0.0);
    state.advance_frame();
    state.advance_frame();
    assert_eq!(state.frame_count(), 2);
    let frame = state.frame_params(true).frame;
    assert!((frame - 2.0f32.to_radians()).abs() < EPSILON);
}

#[test]
fn test_frame_params_snapshot_state() {
    let mut state = SceneState::new();
    state.toggle_dynamic_tessellation();
    let params = state.frame_params(false);
    assert_eq!(params.camera_position, state.camera_position());
    assert_eq!(params.light_position, state.light_source_position());
    assert!(params.dynamic_tessellation);
    assert!(!params.shadows_enabled);
    assert_matrix_eq(params.view_projection, state.view_projection());
}

#[test]
fn test_tess_level_is_clamped() {
    let mut state = SceneState::new();
    state.modify_tess_level(-100);
    assert_eq!(state.tess_level(), 1);
    state.modify_tess_level(1000);
    assert_eq!(state.tess_level(), MAX_TESS_LEVEL);
}

#[test]
fn test_wireframe_needs_support() {
    let mut state = SceneState::new();
    assert!(!state.toggle_wireframe(false));
    assert!(state.toggle_wireframe(true));
    assert!(!state.toggle_wireframe(true));
}

// ========================================================================
// Lock Discipline
// ========================================================================

#[test]
fn test_state_is_usable_under_guard() {
    let lock = SceneLock::new(SceneState::new());
    {
        let mut state = lock.lock();
        state.resize(320, 200);
        state.apply_pending_resize();
    }
    assert_eq!(lock.lock().viewport(), (320, 200));
}

#[test]
fn test_guard_release_unlocks() {
    let lock = SceneLock::new(SceneState::new());
    drop(lock.lock());
    let guard = lock.lock();
    assert!(guard.is_locked());
}

// ========================================================================
// Surface Acquisition
// ========================================================================

#[test]
fn test_surface_errors_recover_or_fail() {
    use wgpu::SurfaceError;
    assert_eq!(SurfaceRecovery::for_error(&SurfaceError::Lost), SurfaceRecovery::Reconfigure);
    assert_eq!(SurfaceRecovery::for_error(&SurfaceError::Outdated), SurfaceRecovery::Reconfigure);
    assert_eq!(SurfaceRecovery::for_error(&SurfaceError::Timeout), SurfaceRecovery::Skip);
    assert_eq!(SurfaceRecovery::for_error(&SurfaceError::OutOfMemory), SurfaceRecovery::Fatal);
}
