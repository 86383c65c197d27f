//! 4x4 transforms for per-eye rendering.
//!
//! Matrices are stored row-major (`m[row][col]`) and act on column vectors, so
//! composition reads right-to-left: `projection * view * model`.

use std::ops::Mul;

use crate::engine::xr::{Fov, Pose};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4 {
    pub m: [[f32; 4]; 4],
}

/// Target clip-space convention for projection matrices.
///
/// - `Vulkan`: y points down, depth in [0, 1].
/// - `OpenGl`: y points up, depth in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipSpace {
    #[default]
    Vulkan,
    OpenGl,
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    pub const IDENTITY: Self = Self {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    /// `self * rhs`. Not commutative.
    pub fn mul_mat4(&self, rhs: &Mat4) -> Mat4 {
        let mut out = [[0.0f32; 4]; 4];
        for (row, out_row) in out.iter_mut().enumerate() {
            for (col, out_cell) in out_row.iter_mut().enumerate() {
                *out_cell = (0..4).map(|k| self.m[row][k] * rhs.m[k][col]).sum();
            }
        }
        Mat4 { m: out }
    }

    pub fn from_translation(t: [f32; 3]) -> Self {
        let mut out = Self::IDENTITY;
        out.m[0][3] = t[0];
        out.m[1][3] = t[1];
        out.m[2][3] = t[2];
        out
    }

    pub fn from_scale(s: [f32; 3]) -> Self {
        let mut out = Self::IDENTITY;
        out.m[0][0] = s[0];
        out.m[1][1] = s[1];
        out.m[2][2] = s[2];
        out
    }

    /// Asymmetric perspective frustum from the four FOV half-angles (radians,
    /// `angle_left`/`angle_down` negative for a centered eye).
    ///
    /// A `far` that is not greater than `near` yields an infinite far plane.
    pub fn from_fov(fov: &Fov, near: f32, far: f32, clip: ClipSpace) -> Self {
        let tan_left = fov.angle_left.tan();
        let tan_right = fov.angle_right.tan();
        let tan_up = fov.angle_up.tan();
        let tan_down = fov.angle_down.tan();

        let tan_width = tan_right - tan_left;
        let (tan_height, offset_z) = match clip {
            ClipSpace::Vulkan => (tan_down - tan_up, 0.0),
            ClipSpace::OpenGl => (tan_up - tan_down, near),
        };

        let mut m = [[0.0f32; 4]; 4];
        m[0][0] = 2.0 / tan_width;
        m[0][2] = (tan_right + tan_left) / tan_width;
        m[1][1] = 2.0 / tan_height;
        m[1][2] = (tan_up + tan_down) / tan_height;

        if far <= near {
            m[2][2] = -1.0;
            m[2][3] = -(near + offset_z);
        } else {
            m[2][2] = -(far + offset_z) / (far - near);
            m[2][3] = -(far * (near + offset_z)) / (far - near);
        }
        m[3][2] = -1.0;

        Mat4 { m }
    }

    /// Pose to transform.
    ///
    /// # Limitation
    /// Only `pose.position` is honored; `pose.orientation` is ignored, so the
    /// result is a pure translation. Content stays head-locked in rotation.
    /// Full 6-DOF tracking needs the orientation quaternion applied as the
    /// rotation block.
    pub fn from_pose(pose: &Pose) -> Self {
        Self::from_translation(pose.position)
    }

    /// Inverse of a rigid transform (rotation + translation only).
    ///
    /// Computed as the transposed rotation block and a translation of
    /// `-(R^T * t)`. Only valid when the upper 3x3 block is a proper rotation:
    /// a matrix carrying scale or shear gets a silently wrong result.
    pub fn rigid_inverse(&self) -> Self {
        let m = &self.m;
        let t = [m[0][3], m[1][3], m[2][3]];

        let mut out = Self::IDENTITY;
        for i in 0..3 {
            for j in 0..3 {
                out.m[i][j] = m[j][i];
            }
            out.m[i][3] = -(m[0][i] * t[0] + m[1][i] * t[1] + m[2][i] * t[2]);
        }
        out
    }

    pub fn transpose(&self) -> Self {
        let mut out = [[0.0f32; 4]; 4];
        for (row, out_row) in out.iter_mut().enumerate() {
            for (col, out_cell) in out_row.iter_mut().enumerate() {
                *out_cell = self.m[col][row];
            }
        }
        Mat4 { m: out }
    }

    /// Column-major layout expected by GLSL `mat4` uniforms/push constants.
    pub fn to_cols_array_2d(&self) -> [[f32; 4]; 4] {
        self.transpose().m
    }

    #[cfg(test)]
    pub fn approx_eq(&self, other: &Mat4, eps: f32) -> bool {
        self.m
            .iter()
            .flatten()
            .zip(other.m.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= eps)
    }
}

impl Mul for Mat4 {
    type Output = Mat4;

    fn mul(self, rhs: Mat4) -> Mat4 {
        self.mul_mat4(&rhs)
    }
}

impl Mul<&Mat4> for &Mat4 {
    type Output = Mat4;

    fn mul(self, rhs: &Mat4) -> Mat4 {
        self.mul_mat4(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    const EPS: f32 = 1e-4;

    /// 64-bit linear congruential generator (Knuth MMIX constants).
    struct Lcg(u64);

    impl Lcg {
        fn next_f32(&mut self) -> f32 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
        }

        fn matrix(&mut self) -> Mat4 {
            let mut m = Mat4::IDENTITY;
            for row in m.m.iter_mut() {
                for cell in row.iter_mut() {
                    *cell += self.next_f32() * 0.5;
                }
            }
            m
        }
    }

    fn rotation_y(radians: f32) -> Mat4 {
        let (s, c) = radians.sin_cos();
        Mat4 {
            m: [
                [c, 0.0, s, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [-s, 0.0, c, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    fn symmetric_fov(half_angle: f32) -> Fov {
        Fov {
            angle_left: -half_angle,
            angle_right: half_angle,
            angle_up: half_angle,
            angle_down: -half_angle,
        }
    }

    #[test]
    fn identity_is_neutral() {
        let mut rng = Lcg(7);
        let a = rng.matrix();
        assert!((Mat4::IDENTITY * a).approx_eq(&a, EPS));
        assert!((a * Mat4::IDENTITY).approx_eq(&a, EPS));
    }

    #[test]
    fn multiply_is_associative() {
        let mut rng = Lcg(42);
        for _ in 0..32 {
            let (a, b, c) = (rng.matrix(), rng.matrix(), rng.matrix());
            let left = (a * b) * c;
            let right = a * (b * c);
            assert!(left.approx_eq(&right, EPS), "{left:?} != {right:?}");
        }
    }

    #[test]
    fn multiply_is_not_commutative() {
        let t = Mat4::from_translation([1.0, 0.0, 0.0]);
        let r = rotation_y(FRAC_PI_4);
        assert!(!(t * r).approx_eq(&(r * t), EPS));
    }

    #[test]
    fn translation_moves_points() {
        let t = Mat4::from_translation([1.0, 2.0, 3.0]);
        assert_eq!(t.m[0][3], 1.0);
        assert_eq!(t.m[1][3], 2.0);
        assert_eq!(t.m[2][3], 3.0);
        assert_eq!(t.m[3], [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn symmetric_fov_projection_diagonal() {
        let fov = symmetric_fov(FRAC_PI_4);
        let (near, far) = (0.1, 100.0);

        let tan_width = fov.angle_right.tan() - fov.angle_left.tan();
        let tan_height = fov.angle_up.tan() - fov.angle_down.tan();

        let gl = Mat4::from_fov(&fov, near, far, ClipSpace::OpenGl);
        assert!((gl.m[0][0] - 2.0 / tan_width).abs() < EPS);
        assert!((gl.m[1][1] - 2.0 / tan_height).abs() < EPS);
        assert!((gl.m[0][0] - 1.0).abs() < EPS);
        assert!(gl.m[0][2].abs() < EPS);
        assert!(gl.m[1][2].abs() < EPS);
        assert!((gl.m[2][2] - (-(far + near) / (far - near))).abs() < EPS);
        assert_eq!(gl.m[3][2], -1.0);

        // Vulkan flips y.
        let vk = Mat4::from_fov(&fov, near, far, ClipSpace::Vulkan);
        assert!((vk.m[0][0] - 2.0 / tan_width).abs() < EPS);
        assert!((vk.m[1][1] + 2.0 / tan_height).abs() < EPS);
        assert!((vk.m[2][2] - (-far / (far - near))).abs() < EPS);
    }

    #[test]
    fn asymmetric_fov_shifts_center() {
        let fov = Fov {
            angle_left: -0.9,
            angle_right: 0.7,
            angle_up: 0.8,
            angle_down: -0.8,
        };
        let p = Mat4::from_fov(&fov, 0.1, 100.0, ClipSpace::OpenGl);
        let expected = (0.7f32.tan() + (-0.9f32).tan()) / (0.7f32.tan() - (-0.9f32).tan());
        assert!((p.m[0][2] - expected).abs() < EPS);
        assert!(p.m[0][2] < 0.0);
    }

    #[test]
    fn infinite_far_plane() {
        let p = Mat4::from_fov(&symmetric_fov(FRAC_PI_4), 0.1, 0.0, ClipSpace::Vulkan);
        assert_eq!(p.m[2][2], -1.0);
        assert!((p.m[2][3] + 0.1).abs() < EPS);
    }

    #[test]
    fn pose_ignores_orientation() {
        let pose = Pose {
            position: [0.5, 1.6, -0.2],
            orientation: [0.0, 0.383, 0.0, 0.924],
        };
        let m = Mat4::from_pose(&pose);
        assert!(m.approx_eq(&Mat4::from_translation([0.5, 1.6, -0.2]), EPS));
    }

    #[test]
    fn rigid_inverse_of_pose_recovers_identity() {
        let pose = Pose {
            position: [0.03, 1.7, 0.25],
            orientation: [0.0, 0.0, 0.0, 1.0],
        };
        let m = Mat4::from_pose(&pose);
        assert!((m.rigid_inverse() * m).approx_eq(&Mat4::IDENTITY, EPS));
        assert!((m * m.rigid_inverse()).approx_eq(&Mat4::IDENTITY, EPS));
    }

    #[test]
    fn rigid_inverse_handles_rotation() {
        let m = Mat4::from_translation([1.0, -2.0, 0.5]) * rotation_y(0.6);
        assert!((m.rigid_inverse() * m).approx_eq(&Mat4::IDENTITY, EPS));
    }

    #[test]
    fn rigid_inverse_is_wrong_for_scale() {
        let m = Mat4::from_scale([2.0, 2.0, 2.0]);
        assert!(!(m.rigid_inverse() * m).approx_eq(&Mat4::IDENTITY, EPS));
    }

    #[test]
    fn column_major_upload_is_transpose() {
        let t = Mat4::from_translation([4.0, 5.0, 6.0]);
        let cols = t.to_cols_array_2d();
        assert_eq!(cols[3], [4.0, 5.0, 6.0, 1.0]);
    }
}
