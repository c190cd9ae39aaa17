//! Flight model of the plane the camera follows.

use std::time::Duration;

use cgmath::{InnerSpace, Matrix4, One, Point3, Quaternion, Rad, Rotation, Rotation3, Vector3};
use terrain_engine::Scene;

pub const INITIAL_SPEED: f32 = 2.0;
/// Distance from the camera to the plane, measured backwards along the
/// flight direction.
pub const CAMERA_DISTANCE: f32 = 4.0;

const FORWARD: Vector3<f32> = Vector3::new(0.0, 0.0, -1.0);
const UP: Vector3<f32> = Vector3::new(0.0, 1.0, 0.0);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct PhysicsState {
    position: Point3<f32>,
    speed: f32,
    orientation: Quaternion<f32>,
}

impl Default for PhysicsState {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsState {
    pub fn new() -> Self {
        Self {
            position: Point3::new(0.0, 0.0, 0.0),
            speed: INITIAL_SPEED,
            orientation: Quaternion::one(),
        }
    }

    pub fn position(&self) -> Point3<f32> {
        self.position
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn direction(&self) -> Vector3<f32> {
        self.orientation.rotate_vector(FORWARD)
    }

    pub fn normal(&self) -> Vector3<f32> {
        self.orientation.rotate_vector(UP)
    }

    pub fn left(&self) -> Vector3<f32> {
        self.direction().cross(self.normal())
    }

    pub fn camera_position(&self) -> Point3<f32> {
        self.position - CAMERA_DISTANCE * self.direction()
    }

    pub fn plane_transform(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position - Point3::new(0.0, 0.0, 0.0)) * Matrix4::from(self.orientation)
    }

    pub fn speed_up(&mut self, amount: f32) {
        self.speed += amount;
        log::debug!("Plane speed: {}", self.speed);
    }

    /// Moves the plane along its direction for `elapsed`.
    pub fn tick(&mut self, elapsed: Duration) {
        let distance = self.speed * elapsed.as_secs_f32();
        self.position += distance * self.direction();
    }

    /// Pitches (Up/Down) about the left axis or yaws (Left/Right) about the
    /// normal. Down and Right turn by `-amount`.
    pub fn rotate(&mut self, direction: Direction, amount: Rad<f32>) {
        let (axis, amount) = match direction {
            Direction::Up => (self.left(), amount),
            Direction::Down => (self.left(), -amount),
            Direction::Left => (self.normal(), amount),
            Direction::Right => (self.normal(), -amount),
        };
        let rotation = Quaternion::from_axis_angle(axis.normalize(), amount);
        self.orientation = (rotation * self.orientation).normalize();
    }

    /// Places the plane node at `plane_index` and the camera behind it.
    pub fn apply(&self, scene: &mut Scene, plane_index: usize) {
        if let Some(plane) = scene.objects_mut().get_mut(plane_index) {
            plane.set_transform(self.plane_transform());
        }
        scene.set_camera_position(self.camera_position());
        scene.recompute_view_towards(self.position, UP);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Deg, Transform};

    const EPSILON: f32 = 1e-5;

    fn assert_vec_eq(a: Vector3<f32>, b: Vector3<f32>) {
        assert!((a - b).magnitude() < EPSILON, "{:?} != {:?}", a, b);
    }

    #[test]
    fn test_initial_state() {
        let physics = PhysicsState::new();
        assert_eq!(physics.speed(), 2.0);
        assert_vec_eq(physics.direction(), Vector3::new(0.0, 0.0, -1.0));
        assert_vec_eq(physics.left(), Vector3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_tick_integrates_speed() {
        let mut physics = PhysicsState::new();
        physics.tick(Duration::from_millis(500));
        assert_vec_eq(physics.position() - Point3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, -1.0));

        physics.speed_up(0.2);
        physics.tick(Duration::from_secs(1));
        assert!((physics.position().z + 3.2).abs() < EPSILON);
    }

    #[test]
    fn test_camera_trails_plane() {
        let mut physics = PhysicsState::new();
        physics.tick(Duration::from_secs(2));
        let camera = physics.camera_position();
        assert_vec_eq(camera - physics.position(), Vector3::new(0.0, 0.0, 4.0));
    }

    #[test]
    fn test_pitch_up_raises_nose() {
        let mut physics = PhysicsState::new();
        physics.rotate(Direction::Up, Deg(10.0).into());
        assert!(physics.direction().y > 0.0);
        physics.rotate(Direction::Down, Deg(10.0).into());
        assert_vec_eq(physics.direction(), Vector3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn test_yaw_left_turns_towards_negative_x() {
        let mut physics = PhysicsState::new();
        physics.rotate(Direction::Left, Deg(90.0).into());
        assert_vec_eq(physics.direction(), Vector3::new(-1.0, 0.0, 0.0));
        // Yaw keeps the plane level
        assert_vec_eq(physics.normal(), Vector3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_rotations_keep_direction_normalized() {
        let mut physics = PhysicsState::new();
        for i in 0..1000 {
            let direction = [Direction::Up, Direction::Right, Direction::Left, Direction::Up][i % 4];
            physics.rotate(direction, Deg(1.0).into());
        }
        assert!((physics.direction().magnitude() - 1.0).abs() < EPSILON);
        assert!(physics.direction().dot(physics.normal()).abs() < 1e-4);
    }

    #[test]
    fn test_plane_transform_places_model() {
        let mut physics = PhysicsState::new();
        physics.tick(Duration::from_secs(1));
        physics.rotate(Direction::Left, Deg(90.0).into());
        let transform = physics.plane_transform();
        let origin = transform.transform_point(Point3::new(0.0, 0.0, 0.0));
        assert!((origin - physics.position()).magnitude() < EPSILON);
        // The model's forward axis follows the flight direction
        let forward = transform.transform_vector(Vector3::new(0.0, 0.0, -1.0));
        assert_vec_eq(forward, physics.direction());
    }
}
