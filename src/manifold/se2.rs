//! SE(2) - Special Euclidean Group in 2D
//!
//! This module implements the Special Euclidean group SE(2), which represents
//! rigid body transformations in 2D space (rotation + translation).
//!
//! SE(2) elements are represented as a combination of an SO(2) rotation and a
//! Vector2 translation. SE(2) tangent elements are represented as
//! `[x, y, θ]`, where `[x, y]` is the translational part of the logarithm.
//!
//! Two vector forms exist and they are not interchangeable:
//! - the *minimal* vector (`log`), whose translational part is `V(θ)⁻¹ t`;
//! - the *translation-angle* vector `[tx, ty, θ]`, read straight off the pose.

use crate::manifold::so2::{SO2, SO2Tangent};
use crate::manifold::{LieGroup, ManifoldError, Tangent};
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};
use std::fmt;

/// SE(2) group element representing rigid body transformations in 2D.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SE2 {
    /// Translation part as Vector2
    translation: Vector2<f64>,
    /// Rotation part as SO(2)
    rotation: SO2,
}

impl fmt::Display for SE2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SE2(translation: [{:.4}, {:.4}], rotation: {:.4})",
            self.x(),
            self.y(),
            self.angle()
        )
    }
}

/// SE(2) tangent space element, `[x, y, θ]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SE2Tangent {
    data: Vector3<f64>,
}

impl fmt::Display for SE2Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "se2(x: {:.4}, y: {:.4}, theta: {:.4})",
            self.data[0], self.data[1], self.data[2]
        )
    }
}

impl SE2 {
    /// Get the identity element of the group.
    pub fn identity() -> Self {
        SE2::new(Vector2::zeros(), SO2::identity())
    }

    /// Create a new SE(2) element from translation and rotation.
    pub fn new(translation: Vector2<f64>, rotation: SO2) -> Self {
        SE2 {
            translation,
            rotation,
        }
    }

    /// Create SE(2) from x, y and angle components.
    pub fn from_xy_angle(x: f64, y: f64, angle: f64) -> Self {
        SE2::new(Vector2::new(x, y), SO2::from_angle(angle))
    }

    /// Create SE(2) from a translation and an angle.
    pub fn from_translation_angle(translation: Vector2<f64>, angle: f64) -> Self {
        SE2::new(translation, SO2::from_angle(angle))
    }

    /// Create SE(2) from a translation-angle vector `[tx, ty, θ]`.
    ///
    /// This does not go through the exponential map.
    pub fn from_translation_angle_vector(vector: &Vector3<f64>) -> Self {
        SE2::from_xy_angle(vector[0], vector[1], vector[2])
    }

    /// Create SE(2) from a homogeneous 3x3 matrix.
    pub fn from_matrix(matrix: &Matrix3<f64>) -> Self {
        let rotation = matrix.fixed_view::<2, 2>(0, 0).into_owned();
        SE2::new(
            Vector2::new(matrix[(0, 2)], matrix[(1, 2)]),
            SO2::from_matrix(&rotation),
        )
    }

    /// Create SE(2) from a minimal (logarithmic) vector.
    pub fn from_minimal_vector(vector: &[f64]) -> Result<Self, ManifoldError> {
        if vector.len() != 3 {
            return Err(ManifoldError::InvalidDimension {
                expected: 3,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(ManifoldError::NonFinite);
        }
        Ok(SE2Tangent::new(Vector3::new(vector[0], vector[1], vector[2])).exp())
    }

    /// Get the translation part.
    pub fn translation(&self) -> Vector2<f64> {
        self.translation
    }

    /// Get the rotation part.
    pub fn rotation(&self) -> SO2 {
        self.rotation
    }

    /// Get the x component of translation.
    pub fn x(&self) -> f64 {
        self.translation[0]
    }

    /// Get the y component of translation.
    pub fn y(&self) -> f64 {
        self.translation[1]
    }

    /// Get the rotation angle.
    pub fn angle(&self) -> f64 {
        self.rotation.angle()
    }

    /// Get the rotation matrix (2x2).
    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        self.rotation.rotation_matrix()
    }

    /// Get the homogeneous transformation matrix (3x3).
    pub fn matrix(&self) -> Matrix3<f64> {
        let r = self.rotation_matrix();
        Matrix3::new(
            r[(0, 0)],
            r[(0, 1)],
            self.x(),
            r[(1, 0)],
            r[(1, 1)],
            self.y(),
            0.0,
            0.0,
            1.0,
        )
    }

    /// The naive `[tx, ty, θ]` vector.
    pub fn translation_angle_vector(&self) -> Vector3<f64> {
        Vector3::new(self.x(), self.y(), self.angle())
    }

    /// The minimal (logarithmic) vector `[V(θ)⁻¹ t, θ]`.
    pub fn to_minimal_vector(&self) -> Vector3<f64> {
        *self.log().coeffs()
    }

    /// Transform a point: `R p + t`.
    pub fn act(&self, point: &Vector2<f64>) -> Vector2<f64> {
        self.rotation.act(point) + self.translation
    }
}

impl LieGroup for SE2 {
    type TangentVector = SE2Tangent;

    const DIM: usize = 2;
    const DOF: usize = 3;

    fn identity() -> Self {
        SE2::identity()
    }

    /// # Notes
    /// M⁻¹ = [Rᵀ, -Rᵀ t; 0, 1]
    fn inverse(&self) -> Self {
        let rotation_inv = self.rotation.inverse();
        SE2::new(-rotation_inv.act(&self.translation), rotation_inv)
    }

    /// # Notes
    /// M₁ M₂ = [R₁ R₂, t₁ + R₁ t₂; 0, 1]
    fn compose(&self, other: &Self) -> Self {
        SE2::new(
            self.translation + self.rotation.act(&other.translation),
            self.rotation.compose(&other.rotation),
        )
    }

    /// # Notes
    /// τ = log(M) = [V(θ)⁻¹ t; θ]
    fn log(&self) -> SE2Tangent {
        let theta = self.rotation.log();
        let rho = theta.left_jacobian_inv() * self.translation;
        SE2Tangent::new(Vector3::new(rho[0], rho[1], theta.angle()))
    }
}

impl SE2Tangent {
    /// Create a new tangent element from `[x, y, θ]`.
    pub fn new(data: Vector3<f64>) -> Self {
        SE2Tangent { data }
    }

    /// Create a tangent element from its components.
    pub fn from_components(x: f64, y: f64, theta: f64) -> Self {
        SE2Tangent::new(Vector3::new(x, y, theta))
    }

    /// Translational part `ρ`.
    pub fn rho(&self) -> Vector2<f64> {
        Vector2::new(self.data[0], self.data[1])
    }

    /// Rotational part `θ`.
    pub fn theta(&self) -> f64 {
        self.data[2]
    }

    /// Underlying coefficients.
    pub fn coeffs(&self) -> &Vector3<f64> {
        &self.data
    }
}

impl Tangent<SE2> for SE2Tangent {
    type JacobianMatrix = Matrix3<f64>;

    /// # Notes
    /// exp(τ) = [R(θ), V(θ) ρ; 0, 1]
    fn exp(&self) -> SE2 {
        let theta = SO2Tangent::new(self.theta());
        SE2::new(theta.left_jacobian() * self.rho(), theta.exp())
    }

    /// Left Jacobian of SE(2).
    ///
    /// # Notes
    /// J_l = [V(θ), Q(ρ, θ); 0, 1], where Q is the derivative of `V(θ) ρ` with
    /// respect to θ.
    fn left_jacobian(&self) -> Matrix3<f64> {
        let theta = self.theta();
        let v = SO2Tangent::new(theta).left_jacobian();
        let (x, y) = (self.data[0], self.data[1]);
        let (q0, q1) = if theta.abs() < crate::manifold::SMALL_ANGLE {
            (y / 2.0 + theta * x / 6.0, -x / 2.0 + theta * y / 6.0)
        } else {
            let theta_sq = theta * theta;
            let (sin, cos) = theta.sin_cos();
            (
                (theta * x - y + y * cos - x * sin) / theta_sq,
                (x + theta * y - x * cos - y * sin) / theta_sq,
            )
        };
        Matrix3::new(
            v[(0, 0)],
            v[(0, 1)],
            q0,
            v[(1, 0)],
            v[(1, 1)],
            q1,
            0.0,
            0.0,
            1.0,
        )
    }

    fn left_jacobian_inv(&self) -> Matrix3<f64> {
        self.left_jacobian()
            .try_inverse()
            .unwrap_or_else(Matrix3::identity)
    }

    fn zero() -> Self {
        SE2Tangent::new(Vector3::zeros())
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.iter().all(|v| v.abs() < tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const TOLERANCE: f64 = 1e-10;

    fn samples() -> Vec<SE2> {
        vec![
            SE2::from_xy_angle(1.0, 2.0, 0.3),
            SE2::from_xy_angle(-0.5, 4.0, -2.1),
            SE2::from_xy_angle(3.0, -1.0, PI / 2.0),
            SE2::from_xy_angle(0.2, 0.1, 1e-9),
        ]
    }

    #[test]
    fn test_se2_identity() {
        let identity = SE2::identity();
        assert!(identity.translation().norm() < TOLERANCE);
        assert!(identity.angle().abs() < TOLERANCE);
    }

    #[test]
    fn test_se2_inverse_composes_to_identity() {
        for pose in samples() {
            let result = pose.compose(&pose.inverse());
            assert!(result.is_approx(&SE2::identity(), TOLERANCE));
            let result = pose.inverse().compose(&pose);
            assert!(result.is_approx(&SE2::identity(), TOLERANCE));
        }
    }

    #[test]
    fn test_se2_compose_is_associative() {
        let poses = samples();
        let (a, b, c) = (&poses[0], &poses[1], &poses[2]);
        let left = a.compose(b).compose(c);
        let right = a.compose(&b.compose(c));
        assert!(left.is_approx(&right, TOLERANCE));
    }

    #[test]
    fn test_se2_compose_matches_matrix_product() {
        let poses = samples();
        let product = poses[0].matrix() * poses[1].matrix();
        let composed = poses[0].compose(&poses[1]).matrix();
        assert!((product - composed).norm() < TOLERANCE);
    }

    #[test]
    fn test_se2_compose_is_not_commutative() {
        let a = SE2::from_xy_angle(1.0, 0.0, PI / 2.0);
        let b = SE2::from_xy_angle(1.0, 0.0, 0.0);
        assert!(!a.compose(&b).is_approx(&b.compose(&a), 1e-6));
    }

    #[test]
    fn test_se2_exp_log_consistency() {
        for pose in samples() {
            let recovered = pose.log().exp();
            assert!(pose.is_approx(&recovered, TOLERANCE));
        }
    }

    #[test]
    fn test_se2_minimal_vector_differs_from_translation_angle() {
        let pose = SE2::from_xy_angle(1.0, 0.0, PI / 2.0);
        let minimal = pose.to_minimal_vector();
        let naive = pose.translation_angle_vector();
        assert!((minimal - naive).norm() > 0.1);
        let back = SE2::from_minimal_vector(minimal.as_slice()).unwrap();
        assert!(back.is_approx(&pose, TOLERANCE));
    }

    #[test]
    fn test_se2_from_minimal_vector_rejects_wrong_length() {
        let result = SE2::from_minimal_vector(&[1.0, 2.0]);
        assert_eq!(
            result,
            Err(ManifoldError::InvalidDimension {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_se2_plus_minus_round_trip() {
        let delta = SE2Tangent::from_components(0.01, -0.02, 0.005);
        for pose in samples() {
            let moved = pose.right_plus(&delta);
            let recovered = moved.right_minus(&pose);
            assert!((recovered.coeffs() - delta.coeffs()).norm() < TOLERANCE);
        }
    }

    #[test]
    fn test_se2_between() {
        let a = SE2::from_xy_angle(1.0, 1.0, 0.5);
        let b = SE2::from_xy_angle(2.0, 0.0, -0.5);
        let relative = a.between(&b);
        assert!(a.compose(&relative).is_approx(&b, TOLERANCE));
    }

    #[test]
    fn test_se2_act() {
        let pose = SE2::from_xy_angle(1.0, 2.0, PI / 2.0);
        let point = pose.act(&Vector2::new(1.0, 0.0));
        assert!((point - Vector2::new(1.0, 3.0)).norm() < TOLERANCE);
    }

    #[test]
    fn test_se2_from_matrix() {
        for pose in samples() {
            let recovered = SE2::from_matrix(&pose.matrix());
            assert!(recovered.is_approx(&pose, TOLERANCE));
        }
    }

    #[test]
    fn test_se2_left_jacobian_inverse_pair() {
        for pose in samples() {
            let tangent = pose.log();
            let product = tangent.left_jacobian() * tangent.left_jacobian_inv();
            assert!((product - Matrix3::identity()).norm() < 1e-8);
        }
    }
}
