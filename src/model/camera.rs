use glam::{Mat4, Vec3};

use crate::config::CameraConfig;

/// Perspective camera looking from `eye` at `target`.
#[derive(Debug, Clone)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y: f32,
    pub aspect: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        Self::from_config(&CameraConfig::default(), width, height)
    }

    pub fn from_config(config: &CameraConfig, width: u32, height: u32) -> Self {
        let mut camera = Self {
            eye: Vec3::from(config.eye),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: config.fov_y_degrees.to_radians(),
            aspect: 1.0,
            z_near: config.z_near,
            z_far: config.z_far,
        };
        camera.set_aspect(width, height);
        camera
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.eye).normalize_or_zero()
    }

    /// Zero-sized viewports (minimised windows) keep the previous aspect.
    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.z_near, self.z_far)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection() * self.view()
    }
}
