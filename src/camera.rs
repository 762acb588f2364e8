use nalgebra::{Matrix4, Perspective3, Point3};

use crate::math::Vec3;

#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(position: Vec3, yaw: f32, pitch: f32) -> Self {
        let mut camera = Self {
            position,
            forward: Vec3::new(0.0, 0.0, -1.0),
            right: Vec3::new(1.0, 0.0, 0.0),
            up: Vec3::new(0.0, 1.0, 0.0),
            yaw,
            pitch,
            fov: std::f32::consts::PI / 3.0,
            near: 0.1,
            far: 1000.0,
        };
        camera.update_vectors();
        camera
    }

    pub fn update_vectors(&mut self) {
        let forward = Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize();

        let world_up = Vec3::y();
        let right = forward.cross(&world_up);

        self.forward = forward;
        self.right = if right.norm_squared() < 1e-6 {
            Vec3::x()
        } else {
            right.normalize()
        };
        self.up = self.right.cross(&forward).normalize();
    }

    /// Camera-frame coordinates: x right, y up, z forward.
    pub fn world_to_view(&self, point: Vec3) -> Vec3 {
        let rel = point - self.position;
        Vec3::new(rel.dot(&self.right), rel.dot(&self.up), rel.dot(&self.forward))
    }

    /// Right-handed view matrix; the camera looks down `-z`.
    pub fn view_matrix(&self) -> Matrix4<f32> {
        let eye = Point3::from(self.position);
        let target = Point3::from(self.position + self.forward);
        Matrix4::look_at_rh(&eye, &target, &self.up)
    }

    /// OpenGL-style perspective (clip z in `[-w, w]`).
    pub fn projection_matrix(&self, width: usize, height: usize) -> Matrix4<f32> {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        Perspective3::new(aspect, self.fov, self.near, self.far).to_homogeneous()
    }

    /// Focal lengths in pixels for square pixels, matching [`Self::projection_matrix`].
    pub fn focal_lengths(&self, height: usize) -> (f32, f32) {
        let h = height.max(1) as f32;
        let tan_half = (self.fov * 0.5).tan().max(1e-6);
        let fy = h / (2.0 * tan_half);
        (fy, fy)
    }
}

pub fn look_at_target(camera: &mut Camera, target: Vec3) {
    let Some(to_target) = (target - camera.position).try_normalize(1e-8) else {
        return;
    };
    camera.yaw = to_target.z.atan2(to_target.x);
    camera.pitch = to_target.y.clamp(-1.0, 1.0).asin();
    camera.update_vectors();
}

/// Places the camera on a horizontal circle around `target` and aims it there.
pub fn orbit(camera: &mut Camera, target: Vec3, angle: f32, radius: f32, height: f32) {
    camera.position = target + Vec3::new(radius * angle.cos(), height, radius * angle.sin());
    look_at_target(camera, target);
}
