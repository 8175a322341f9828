//! SE(3) - Special Euclidean Group in 3D
//!
//! SE(3) elements are represented as a combination of SO(3) rotation and Vector3 translation.
//! SE(3) tangent elements are represented as `[rho(3), theta(3)]`,
//! where rho is the translational component and theta is the rotational component.
//!
//! Planar poses can be lifted with [`SE3::from_se2`]; the lift keeps the rotation
//! about the z axis and sets the height to zero.

use crate::manifold::se2::SE2;
use crate::manifold::so3::{SO3, SO3Tangent};
use crate::manifold::{LieGroup, Tangent};
use nalgebra::{Matrix3, Matrix4, Matrix6, Vector3, Vector6};
use std::fmt;

/// SE(3) group element representing rigid body transformations in 3D.
#[derive(Clone, Debug, PartialEq)]
pub struct SE3 {
    /// Rotation part as SO(3) element
    rotation: SO3,
    /// Translation part as Vector3
    translation: Vector3<f64>,
}

impl fmt::Display for SE3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.translation;
        write!(
            f,
            "SE3(translation: [{:.4}, {:.4}, {:.4}], rotation: {})",
            t.x, t.y, t.z, self.rotation
        )
    }
}

/// SE(3) tangent space element `[rho, theta]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SE3Tangent {
    data: Vector6<f64>,
}

impl SE3 {
    /// Create a new SE(3) element from translation and rotation.
    pub fn new(translation: Vector3<f64>, rotation: SO3) -> Self {
        SE3 {
            rotation,
            translation,
        }
    }

    /// Lift a planar pose into 3D.
    pub fn from_se2(pose: &SE2) -> Self {
        SE3::new(
            Vector3::new(pose.x(), pose.y(), 0.0),
            SO3::from_yaw(pose.angle()),
        )
    }

    /// Get the translation part.
    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    /// Get the rotation part.
    pub fn rotation(&self) -> &SO3 {
        &self.rotation
    }

    /// Get the homogeneous transformation matrix (4x4).
    pub fn matrix(&self) -> Matrix4<f64> {
        let mut matrix = Matrix4::identity();
        matrix
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.rotation.rotation_matrix());
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        matrix
    }

    /// Transform a point: `R p + t`.
    pub fn act(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.act(point) + self.translation
    }
}

impl LieGroup for SE3 {
    type TangentVector = SE3Tangent;

    const DIM: usize = 3;
    const DOF: usize = 6;

    fn identity() -> Self {
        SE3::new(Vector3::zeros(), SO3::identity())
    }

    fn inverse(&self) -> Self {
        let rotation_inv = self.rotation.inverse();
        SE3::new(-rotation_inv.act(&self.translation), rotation_inv)
    }

    fn compose(&self, other: &Self) -> Self {
        SE3::new(
            self.translation + self.rotation.act(&other.translation),
            self.rotation.compose(&other.rotation),
        )
    }

    /// # Notes
    /// τ = [J_l(θ)⁻¹ t; θ]
    fn log(&self) -> SE3Tangent {
        let theta = self.rotation.log();
        let rho = theta.left_jacobian_inv() * self.translation;
        SE3Tangent::new(rho, *theta.coeffs())
    }
}

impl SE3Tangent {
    /// Create a new tangent element from its translational and rotational parts.
    pub fn new(rho: Vector3<f64>, theta: Vector3<f64>) -> Self {
        let mut data = Vector6::zeros();
        data.fixed_rows_mut::<3>(0).copy_from(&rho);
        data.fixed_rows_mut::<3>(3).copy_from(&theta);
        SE3Tangent { data }
    }

    /// Translational part.
    pub fn rho(&self) -> Vector3<f64> {
        self.data.fixed_rows::<3>(0).into_owned()
    }

    /// Rotational part.
    pub fn theta(&self) -> Vector3<f64> {
        self.data.fixed_rows::<3>(3).into_owned()
    }

    /// Underlying coefficients.
    pub fn coeffs(&self) -> &Vector6<f64> {
        &self.data
    }

    /// Q(ρ, θ) coupling block of the SE(3) left Jacobian.
    ///
    /// # Notes
    /// Q(ρ, θ) = ½ρₓ + (θ - sin θ)/θ³ (θₓρₓ + ρₓθₓ + θₓρₓθₓ)
    ///         + (1 - θ²/2 - cos θ)/θ⁴ (θₓ²ρₓ + ρₓθₓ² - 3θₓρₓθₓ)
    ///         + ½((1 - θ²/2 - cos θ)/θ⁴ - 3(θ - sin θ - θ³/6)/θ⁵)(θₓρₓθₓ² + θₓ²ρₓθₓ)
    pub fn q_block(rho: &Vector3<f64>, theta: &Vector3<f64>) -> Matrix3<f64> {
        let rho_skew = SO3Tangent::new(*rho).hat();
        let theta_skew = SO3Tangent::new(*theta).hat();
        let theta_sq = theta.norm_squared();

        let (b, c, d) = if theta_sq > f64::EPSILON {
            let angle = theta_sq.sqrt();
            let (sin, cos) = angle.sin_cos();
            let b = (angle - sin) / (theta_sq * angle);
            let c = (1.0 - theta_sq / 2.0 - cos) / (theta_sq * theta_sq);
            let e = (angle - sin - theta_sq * angle / 6.0) / (theta_sq * theta_sq * angle);
            (b, c, 0.5 * (c - 3.0 * e))
        } else {
            (
                1.0 / 6.0 - theta_sq / 120.0,
                -1.0 / 24.0 + theta_sq / 720.0,
                -1.0 / 60.0,
            )
        };

        let trt = theta_skew * rho_skew * theta_skew;
        let theta_skew_sq = theta_skew * theta_skew;
        let m1 = rho_skew;
        let m2 = theta_skew * rho_skew + rho_skew * theta_skew + trt;
        let m3 = theta_skew_sq * rho_skew + rho_skew * theta_skew_sq - 3.0 * trt;
        let m4 = trt * theta_skew + theta_skew_sq * rho_skew * theta_skew;

        m1 * 0.5 + m2 * b + m3 * c + m4 * d
    }
}

impl Tangent<SE3> for SE3Tangent {
    type JacobianMatrix = Matrix6<f64>;

    /// # Notes
    /// exp(τ) = [R(θ), J_l(θ) ρ; 0, 1]
    fn exp(&self) -> SE3 {
        let theta = SO3Tangent::new(self.theta());
        SE3::new(theta.left_jacobian() * self.rho(), theta.exp())
    }

    fn left_jacobian(&self) -> Matrix6<f64> {
        let theta = SO3Tangent::new(self.theta());
        let jl = theta.left_jacobian();
        let mut jac = Matrix6::zeros();
        jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&jl);
        jac.fixed_view_mut::<3, 3>(3, 3).copy_from(&jl);
        jac.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&SE3Tangent::q_block(&self.rho(), &self.theta()));
        jac
    }

    fn left_jacobian_inv(&self) -> Matrix6<f64> {
        let theta = SO3Tangent::new(self.theta());
        let jl_inv = theta.left_jacobian_inv();
        let q = SE3Tangent::q_block(&self.rho(), &self.theta());
        let mut jac = Matrix6::zeros();
        jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&jl_inv);
        jac.fixed_view_mut::<3, 3>(3, 3).copy_from(&jl_inv);
        jac.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(-jl_inv * q * jl_inv));
        jac
    }

    fn zero() -> Self {
        SE3Tangent {
            data: Vector6::zeros(),
        }
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn sample() -> SE3 {
        SE3::new(
            Vector3::new(1.0, -2.0, 0.5),
            SO3::from_euler_angles(0.2, -0.1, 0.7),
        )
    }

    #[test]
    fn test_se3_inverse() {
        let pose = sample();
        assert!(pose.compose(&pose.inverse()).is_approx(&SE3::identity(), TOLERANCE));
    }

    #[test]
    fn test_se3_exp_log() {
        let pose = sample();
        assert!(pose.log().exp().is_approx(&pose, TOLERANCE));
    }

    #[test]
    fn test_se3_compose_matches_matrix_product() {
        let a = sample();
        let b = SE3::new(Vector3::new(0.0, 1.0, 0.0), SO3::from_yaw(-0.4));
        let product = a.matrix() * b.matrix();
        assert!((a.compose(&b).matrix() - product).norm() < TOLERANCE);
    }

    #[test]
    fn test_se3_from_se2_agrees_with_planar_composition() {
        let a = SE2::from_xy_angle(1.0, 2.0, 0.3);
        let b = SE2::from_xy_angle(-0.5, 0.4, 1.1);
        let lifted = SE3::from_se2(&a).compose(&SE3::from_se2(&b));
        let planar = SE3::from_se2(&a.compose(&b));
        assert!(lifted.is_approx(&planar, TOLERANCE));
    }

    #[test]
    fn test_se3_jacobian_inverse_pair() {
        let tangent = sample().log();
        let product = tangent.left_jacobian() * tangent.left_jacobian_inv();
        assert!((product - Matrix6::identity()).norm() < 1e-8);
    }
}
