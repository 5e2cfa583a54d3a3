//! Rigid transformations for transducer placement.
//!
//! Provides rotation, tilt and translation operations applied to element
//! positions and normals. The transducer is modelled in a local frame whose
//! origin is the geometric (natural) focus; the world placement tilts the
//! array about that focus and then translates it onto the target.

use nalgebra::{Matrix3, Rotation3, Vector3};

/// An affine transformation: rotation matrix + translation.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// 3x3 rotation matrix.
    pub matrix: Matrix3<f64>,
    /// Translation vector (mm).
    pub translation: Vector3<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            matrix: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }
}

impl Transform {
    /// Create a pure translation.
    pub fn translation(dx: f64, dy: f64, dz: f64) -> Self {
        Self {
            matrix: Matrix3::identity(),
            translation: Vector3::new(dx, dy, dz),
        }
    }

    /// Rotation about the x axis by `degrees`.
    pub fn rotation_x(degrees: f64) -> Self {
        Self {
            matrix: *Rotation3::from_axis_angle(&Vector3::x_axis(), degrees.to_radians()).matrix(),
            translation: Vector3::zeros(),
        }
    }

    /// Rotation about the y axis by `degrees`.
    pub fn rotation_y(degrees: f64) -> Self {
        Self {
            matrix: *Rotation3::from_axis_angle(&Vector3::y_axis(), degrees.to_radians()).matrix(),
            translation: Vector3::zeros(),
        }
    }

    /// Transducer tilt: rotate about x by `tilt_x_deg`, then about y by `tilt_y_deg`.
    pub fn tilt(tilt_x_deg: f64, tilt_y_deg: f64) -> Self {
        Self::rotation_x(tilt_x_deg).then(&Self::rotation_y(tilt_y_deg))
    }

    /// Apply this transformation to a 3D point.
    pub fn apply(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * point + self.translation
    }

    /// Apply only the linear part (directions and normals).
    pub fn apply_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * v
    }

    /// Inverse of a rigid transform (the matrix is assumed orthonormal).
    pub fn inverse(&self) -> Transform {
        let rt = self.matrix.transpose();
        Transform {
            matrix: rt,
            translation: -(rt * self.translation),
        }
    }

    /// Compose two transforms: self followed by other.
    pub fn then(&self, other: &Transform) -> Transform {
        Transform {
            matrix: other.matrix * self.matrix,
            translation: other.matrix * self.translation + other.translation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_identity_transform() {
        let t = Transform::default();
        let p = Vector3::new(1.0, 2.0, 3.0);
        assert_abs_diff_eq!(t.apply(&p), p, epsilon = 1e-12);
    }

    #[test]
    fn test_rotate_and_translate() {
        let t = Transform::rotation_y(90.0).then(&Transform::translation(1.0, 0.0, 0.0));
        let result = t.apply(&Vector3::new(1.0, 0.0, 0.0));
        // +x rotated 90° about y lands on -z.
        assert_abs_diff_eq!(result, Vector3::new(1.0, 0.0, -1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_round_trip() {
        let t = Transform::tilt(12.0, -7.5).then(&Transform::translation(3.0, -4.0, 10.0));
        let p = Vector3::new(-20.0, 5.0, 60.0);
        let back = t.inverse().apply(&t.apply(&p));
        assert_abs_diff_eq!(back, p, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_tilt_is_identity() {
        assert_abs_diff_eq!(Transform::tilt(0.0, 0.0).matrix, Matrix3::identity(), epsilon = 1e-15);
    }
}
