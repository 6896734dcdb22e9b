//! Node and bone rest transforms.

use glam::{Mat3, Mat4, Quat, Vec3};

/// Translation, rotation and scale of a node relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn from_rotation(rotation: Quat) -> Self {
        Self {
            rotation,
            ..Self::IDENTITY
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Column-major affine matrix (scale, then rotate, then translate).
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// Decompose an affine matrix. Shear, if any, is dropped.
    pub fn from_matrix(matrix: &Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self {
            translation,
            rotation,
            scale,
        }
    }

    /// Compare two transforms by their matrices, element-wise within `tolerance`.
    ///
    /// Comparing matrices rather than quaternions makes `q` and `-q` equal.
    pub fn approx_eq(&self, other: &Transform, tolerance: f32) -> bool {
        self.to_matrix().abs_diff_eq(other.to_matrix(), tolerance)
    }
}

/// Matrix that carries normals through `matrix` (inverse-transpose of the linear part).
pub fn normal_matrix(matrix: &Mat4) -> Mat3 {
    Mat3::from_mat4(*matrix).inverse().transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_from_matrix_recovers_trs() {
        let t = Transform::from_translation(Vec3::new(1.0, 2.0, 3.0))
            .with_rotation(Quat::from_rotation_y(0.7))
            .with_scale(Vec3::splat(2.0));
        assert!(Transform::from_matrix(&t.to_matrix()).approx_eq(&t, 1e-5));
    }

    #[test]
    fn test_approx_eq_tolerance() {
        let a = Transform::from_translation(Vec3::new(0.0, 1.0, 0.0));
        let b = Transform::from_translation(Vec3::new(0.0, 1.0 + 1e-7, 0.0));
        assert!(a.approx_eq(&b, 1e-5));

        let rotated = a.with_rotation(Quat::from_rotation_z(FRAC_PI_2));
        assert!(!a.approx_eq(&rotated, 1e-5));
    }

    #[test]
    fn test_negated_quaternion_is_equal() {
        let q = Quat::from_rotation_y(0.3);
        let a = Transform::from_rotation(q);
        let b = Transform::from_rotation(-q);
        assert!(a.approx_eq(&b, 1e-5));
    }

    #[test]
    fn test_normal_matrix_non_uniform_scale() {
        let m = Transform::IDENTITY.with_scale(Vec3::new(2.0, 1.0, 1.0)).to_matrix();
        let n = (normal_matrix(&m) * Vec3::new(1.0, 1.0, 0.0)).normalize();
        // Stretching along X flattens the normal toward Y.
        assert!(n.y > n.x);
    }
}
