use std::cell::RefCell;
use std::f32::consts::{PI, TAU};
use std::rc::Rc;

use glam::Vec3;

use crate::model::Camera;

/// Per-frame camera tick. Runs every frame, independent of the fixed step.
pub trait CameraControl {
    fn update(&mut self, camera: &mut Camera);
}

impl<C: CameraControl> CameraControl for Rc<RefCell<C>> {
    fn update(&mut self, camera: &mut Camera) {
        self.borrow_mut().update(camera);
    }
}

const POLAR_EPS: f32 = 1e-4;
const ZOOM_STEP: f32 = 0.95;

/// Mouse-driven orbit around a target point.
///
/// Input handlers queue rotation and zoom; `update` folds them into the
/// spherical position and rewrites the camera's eye and target.
pub struct OrbitController {
    pub target: Vec3,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub enable_zoom: bool,
    pub min_distance: f32,
    pub max_distance: f32,
    radius: f32,
    azimuth: f32,
    polar: f32,
    pending_azimuth: f32,
    pending_polar: f32,
    pending_zoom: f32,
    dragging: bool,
}

impl OrbitController {
    pub fn new(camera: &Camera) -> Self {
        let mut controller = Self {
            target: camera.target,
            rotate_speed: 1.0,
            zoom_speed: 1.0,
            enable_zoom: true,
            min_distance: 0.1,
            max_distance: 500.0,
            radius: 1.0,
            azimuth: 0.0,
            polar: PI / 2.0,
            pending_azimuth: 0.0,
            pending_polar: 0.0,
            pending_zoom: 1.0,
            dragging: false,
        };
        controller.sync_from(camera);
        controller
    }

    /// Re-derive the spherical position from the camera's current eye.
    pub fn sync_from(&mut self, camera: &Camera) {
        let offset = camera.eye - self.target;
        self.radius = offset.length().max(self.min_distance);
        self.azimuth = offset.x.atan2(offset.z);
        self.polar = (offset.y / self.radius).clamp(-1.0, 1.0).acos();
    }

    pub fn distance(&self) -> f32 {
        self.radius
    }

    pub fn begin_drag(&mut self) {
        self.dragging = true;
    }

    pub fn end_drag(&mut self) {
        self.dragging = false;
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Pointer motion in pixels; a full viewport height turns a full circle.
    pub fn drag(&mut self, dx: f32, dy: f32, viewport_height: f32) {
        if !self.dragging || viewport_height <= 0.0 {
            return;
        }
        self.pending_azimuth -= TAU * dx / viewport_height * self.rotate_speed;
        self.pending_polar -= TAU * dy / viewport_height * self.rotate_speed;
    }

    /// Wheel delta: positive moves away from the target, negative moves closer.
    pub fn zoom(&mut self, delta_y: f32) {
        if !self.enable_zoom || delta_y == 0.0 {
            return;
        }
        let step = ZOOM_STEP.powf(self.zoom_speed);
        if delta_y > 0.0 {
            self.pending_zoom /= step;
        } else {
            self.pending_zoom *= step;
        }
    }

    fn offset(&self) -> Vec3 {
        let s = self.polar.sin();
        Vec3::new(
            self.radius * s * self.azimuth.sin(),
            self.radius * self.polar.cos(),
            self.radius * s * self.azimuth.cos(),
        )
    }
}

impl CameraControl for OrbitController {
    fn update(&mut self, camera: &mut Camera) {
        self.azimuth += self.pending_azimuth;
        self.polar = (self.polar + self.pending_polar).clamp(POLAR_EPS, PI - POLAR_EPS);
        self.radius = (self.radius * self.pending_zoom).clamp(self.min_distance, self.max_distance);
        self.pending_azimuth = 0.0;
        self.pending_polar = 0.0;
        self.pending_zoom = 1.0;

        camera.target = self.target;
        camera.eye = self.target + self.offset();
    }
}
