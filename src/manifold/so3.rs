//! SO(3) - Special Orthogonal Group in 3D
//!
//! This module implements the Special Orthogonal group SO(3), which represents
//! rotations in 3D space.
//!
//! SO(3) elements are represented using nalgebra's UnitQuaternion internally.
//! SO(3) tangent elements are represented as axis-angle vectors in R³,
//! where the direction gives the axis of rotation and the magnitude gives the angle.

use crate::manifold::{LieGroup, Tangent, SMALL_ANGLE};
use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
use std::fmt;

/// SO(3) group element representing rotations in 3D.
#[derive(Clone, Debug, PartialEq)]
pub struct SO3 {
    /// Internal representation as a unit quaternion
    quaternion: UnitQuaternion<f64>,
}

impl fmt::Display for SO3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.quaternion.quaternion();
        write!(
            f,
            "SO3(quaternion: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            q.w, q.i, q.j, q.k
        )
    }
}

/// SO(3) tangent space element, an axis-angle vector `[θx, θy, θz]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SO3Tangent {
    data: Vector3<f64>,
}

impl SO3 {
    /// Create a new SO(3) element from a unit quaternion.
    pub fn new(quaternion: UnitQuaternion<f64>) -> Self {
        SO3 { quaternion }
    }

    /// Create SO(3) from quaternion coefficients [x, y, z, w].
    pub fn from_quaternion_coeffs(x: f64, y: f64, z: f64, w: f64) -> Self {
        SO3::new(UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)))
    }

    /// Create SO(3) from Euler angles (roll, pitch, yaw).
    pub fn from_euler_angles(roll: f64, pitch: f64, yaw: f64) -> Self {
        SO3::new(UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    /// Create SO(3) from a planar heading, a rotation about the z axis.
    pub fn from_yaw(yaw: f64) -> Self {
        SO3::from_euler_angles(0.0, 0.0, yaw)
    }

    /// Get the underlying unit quaternion.
    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        self.quaternion
    }

    /// Get the rotation matrix (3x3).
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.quaternion.to_rotation_matrix().into_inner()
    }

    /// Rotate a vector.
    pub fn act(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.quaternion.transform_vector(vector)
    }
}

impl LieGroup for SO3 {
    type TangentVector = SO3Tangent;

    const DIM: usize = 3;
    const DOF: usize = 3;

    fn identity() -> Self {
        SO3::new(UnitQuaternion::identity())
    }

    fn inverse(&self) -> Self {
        SO3::new(self.quaternion.inverse())
    }

    fn compose(&self, other: &Self) -> Self {
        SO3::new(self.quaternion * other.quaternion)
    }

    /// # Notes
    /// θu = Log(q) = (2 / ||v||) * v * arctan(||v||, w) ∈ R³
    fn log(&self) -> SO3Tangent {
        let q = self.quaternion.quaternion();
        let sin_angle_squared = q.i * q.i + q.j * q.j + q.k * q.k;

        let log_coeff = if sin_angle_squared > f64::EPSILON {
            let sin_angle = sin_angle_squared.sqrt();
            let cos_angle = q.w;
            // cos < 0 means angle >= π/2; flip to keep the angle-axis normalised
            let two_angle = 2.0
                * if cos_angle < 0.0 {
                    f64::atan2(-sin_angle, -cos_angle)
                } else {
                    f64::atan2(sin_angle, cos_angle)
                };
            two_angle / sin_angle
        } else {
            2.0
        };

        SO3Tangent::new(Vector3::new(q.i, q.j, q.k) * log_coeff)
    }
}

impl SO3Tangent {
    /// Create a new tangent element from an axis-angle vector.
    pub fn new(axis_angle: Vector3<f64>) -> Self {
        SO3Tangent { data: axis_angle }
    }

    /// Rotation angle (norm of the axis-angle vector).
    pub fn angle(&self) -> f64 {
        self.data.norm()
    }

    /// Underlying axis-angle vector.
    pub fn coeffs(&self) -> &Vector3<f64> {
        &self.data
    }

    /// Hat map
    ///
    /// # Notes
    /// [θ]ₓ = [0 -θz θy; θz 0 -θx; -θy θx 0]
    pub fn hat(&self) -> Matrix3<f64> {
        let v = &self.data;
        Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
    }
}

impl Tangent<SO3> for SO3Tangent {
    type JacobianMatrix = Matrix3<f64>;

    fn exp(&self) -> SO3 {
        let theta_squared = self.data.norm_squared();
        let quaternion = if theta_squared > f64::EPSILON {
            UnitQuaternion::from_scaled_axis(self.data)
        } else {
            UnitQuaternion::from_quaternion(Quaternion::new(
                1.0,
                self.data.x / 2.0,
                self.data.y / 2.0,
                self.data.z / 2.0,
            ))
        };
        SO3::new(quaternion)
    }

    /// # Notes
    /// J_l(θ) = I + (1 - cos θ)/θ² [θ]ₓ + (θ - sin θ)/θ³ [θ]ₓ²
    fn left_jacobian(&self) -> Matrix3<f64> {
        let angle_sq = self.data.norm_squared();
        let skew = self.hat();
        let theta = angle_sq.sqrt();
        if theta < SMALL_ANGLE {
            Matrix3::identity() + 0.5 * skew
        } else {
            let (sin, cos) = theta.sin_cos();
            Matrix3::identity()
                + (1.0 - cos) / angle_sq * skew
                + (theta - sin) / (angle_sq * theta) * skew * skew
        }
    }

    /// # Notes
    /// J_l⁻¹(θ) = I - ½[θ]ₓ + (1/θ² - (1 + cos θ)/(2θ sin θ)) [θ]ₓ²
    fn left_jacobian_inv(&self) -> Matrix3<f64> {
        let angle_sq = self.data.norm_squared();
        let skew = self.hat();
        let theta = angle_sq.sqrt();
        if theta < SMALL_ANGLE {
            Matrix3::identity() - 0.5 * skew
        } else {
            let (sin, cos) = theta.sin_cos();
            Matrix3::identity() - 0.5 * skew
                + (1.0 / angle_sq - (1.0 + cos) / (2.0 * theta * sin)) * skew * skew
        }
    }

    fn zero() -> Self {
        SO3Tangent::new(Vector3::zeros())
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }
}
