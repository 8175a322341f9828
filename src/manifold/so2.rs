//! SO(2) - Special Orthogonal Group in 2D
//!
//! This module implements the Special Orthogonal group SO(2), which represents
//! rotations in 2D space.
//!
//! SO(2) elements are represented using nalgebra's UnitComplex internally.
//! SO(2) tangent elements are represented as a single angle in radians.
//!
//! The tangent's Jacobians are expressed as 2x2 matrices acting on the plane:
//! they are the `V(θ)` coupling used by SE(2) to convert a translation into the
//! translational part of the logarithm and back.

use crate::manifold::{LieGroup, Tangent, SMALL_ANGLE};
use nalgebra::{Matrix2, UnitComplex, Vector2};
use std::fmt;

/// SO(2) group element representing rotations in 2D.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SO2 {
    /// Internal representation as a unit complex number
    complex: UnitComplex<f64>,
}

impl fmt::Display for SO2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SO2(angle: {:.4})", self.angle())
    }
}

/// SO(2) tangent space element, an angle in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SO2Tangent {
    data: f64,
}

impl fmt::Display for SO2Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "so2(angle: {:.4})", self.data)
    }
}

impl SO2 {
    /// Create a new SO(2) element from a unit complex number.
    pub fn new(complex: UnitComplex<f64>) -> Self {
        SO2 { complex }
    }

    /// Create SO(2) from an angle in radians.
    pub fn from_angle(angle: f64) -> Self {
        SO2::new(UnitComplex::from_angle(angle))
    }

    /// Create SO(2) from a rotation matrix.
    ///
    /// The angle is recovered as `atan2(R₁₀, R₀₀)`.
    pub fn from_matrix(matrix: &Matrix2<f64>) -> Self {
        SO2::from_angle(matrix[(1, 0)].atan2(matrix[(0, 0)]))
    }

    /// Get the underlying unit complex number.
    pub fn complex(&self) -> UnitComplex<f64> {
        self.complex
    }

    /// Get the rotation angle in radians, wrapped to (-π, π].
    pub fn angle(&self) -> f64 {
        self.complex.angle()
    }

    /// Get the rotation matrix (2x2).
    pub fn rotation_matrix(&self) -> Matrix2<f64> {
        self.complex.to_rotation_matrix().into_inner()
    }

    /// Rotate a planar vector.
    pub fn act(&self, vector: &Vector2<f64>) -> Vector2<f64> {
        self.complex.transform_vector(vector)
    }
}

impl LieGroup for SO2 {
    type TangentVector = SO2Tangent;

    const DIM: usize = 2;
    const DOF: usize = 1;

    fn identity() -> Self {
        SO2 {
            complex: UnitComplex::identity(),
        }
    }

    /// # Notes
    /// R(θ)⁻¹ = R(-θ)
    fn inverse(&self) -> Self {
        SO2 {
            complex: self.complex.inverse(),
        }
    }

    fn compose(&self, other: &Self) -> Self {
        SO2 {
            complex: self.complex * other.complex,
        }
    }

    /// # Notes
    /// θ = atan2(Im(z), Re(z))
    fn log(&self) -> SO2Tangent {
        SO2Tangent::new(self.angle())
    }
}

impl SO2Tangent {
    /// Create a new tangent element from an angle in radians.
    pub fn new(angle: f64) -> Self {
        SO2Tangent { data: angle }
    }

    /// Get the angle in radians.
    pub fn angle(&self) -> f64 {
        self.data
    }

    /// Hat map: [θ]ₓ = [0 -θ; θ 0]
    pub fn hat(&self) -> Matrix2<f64> {
        Matrix2::new(0.0, -self.data, self.data, 0.0)
    }

    /// Coefficients `(sin θ / θ, (1 - cos θ) / θ)` of `V(θ)`, with a Taylor
    /// expansion for small angles.
    fn v_coefficients(&self) -> (f64, f64) {
        let theta = self.data;
        if theta.abs() < SMALL_ANGLE {
            let theta_sq = theta * theta;
            (1.0 - theta_sq / 6.0, 0.5 * theta)
        } else {
            (theta.sin() / theta, (1.0 - theta.cos()) / theta)
        }
    }
}

impl Tangent<SO2> for SO2Tangent {
    type JacobianMatrix = Matrix2<f64>;

    fn exp(&self) -> SO2 {
        SO2::from_angle(self.data)
    }

    /// Planar left Jacobian
    ///
    /// # Notes
    /// V(θ) = (1/θ) [sin θ, -(1 - cos θ); 1 - cos θ, sin θ]
    ///
    /// Near zero this is the first-order expansion I + ½[θ]ₓ.
    fn left_jacobian(&self) -> Matrix2<f64> {
        let (a, b) = self.v_coefficients();
        Matrix2::new(a, -b, b, a)
    }

    /// Inverse of the planar left Jacobian
    ///
    /// # Notes
    /// V(θ)⁻¹ = 1/(a² + b²) [a, b; -b, a]
    fn left_jacobian_inv(&self) -> Matrix2<f64> {
        let (a, b) = self.v_coefficients();
        let scale = 1.0 / (a * a + b * b);
        Matrix2::new(a, b, -b, a) * scale
    }

    fn zero() -> Self {
        SO2Tangent { data: 0.0 }
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.abs() < tolerance
    }
}
