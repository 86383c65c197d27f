use crate::engine::math::{ClipSpace, Mat4};
use crate::engine::xr::View;

/// The single flat content surface, placed along view-forward (-Z).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentPlane {
    /// Meters in front of the reference space origin.
    pub distance: f32,
    /// Meters.
    pub height: f32,
    /// width / height.
    pub aspect: f32,
}

impl Default for ContentPlane {
    fn default() -> Self {
        Self {
            distance: 2.0,
            height: 1.8,
            aspect: 16.0 / 9.0,
        }
    }
}

impl ContentPlane {
    pub fn width(&self) -> f32 {
        self.height * self.aspect
    }

    /// Scales the unit quad to size and pushes it `distance` down -Z.
    pub fn model(&self) -> Mat4 {
        Mat4::from_translation([0.0, 0.0, -self.distance]) * Mat4::from_scale([self.width(), self.height, 1.0])
    }
}

/// Per-eye transform source for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoCamera {
    pub near: f32,
    pub far: f32,
    pub clip: ClipSpace,
    pub plane: ContentPlane,
}

impl Default for StereoCamera {
    fn default() -> Self {
        Self {
            near: 0.1,
            far: 100.0,
            clip: ClipSpace::Vulkan,
            plane: ContentPlane::default(),
        }
    }
}

impl StereoCamera {
    /// `projection · view · model` for one located eye.
    ///
    /// The view matrix comes from `Mat4::from_pose`, so head rotation is not
    /// applied.
    pub fn eye_mvp(&self, view: &View) -> Mat4 {
        let projection = Mat4::from_fov(&view.fov, self.near, self.far, self.clip);
        let eye_from_space = Mat4::from_pose(&view.pose).rigid_inverse();
        projection * eye_from_space * self.plane.model()
    }
}
