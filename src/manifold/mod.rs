//! Manifold representations for calibration graphs.
//!
//! This module provides the Lie group values that populate a calibration graph:
//! poses and rotations whose composition is non-commutative and whose
//! differences must be taken in the tangent space rather than component-wise.
//!
//! | Group | Description | DOF | Representation |
//! |-------|-------------|-----|----------------|
//! | SO(2) | 2D rotations | 1 | unit complex number |
//! | SE(2) | 2D rigid transformations | 3 | SO(2) + translation |
//! | SO(3) | 3D rotations | 3 | unit quaternion |
//! | SE(3) | 3D rigid transformations | 6 | SO(3) + translation |
//!
//! The implementation follows the [manif](https://github.com/artivis/manif) C++ library
//! conventions: `right_plus` is the retraction (oplus) and `right_minus` the local
//! coordinates (ominus), with `g₁ ⊟ g₂ = log(g₂⁻¹ ∘ g₁)`.

use std::fmt;

pub mod se2;
pub mod se3;
pub mod so2;
pub mod so3;

pub use se2::{SE2, SE2Tangent};
pub use se3::{SE3, SE3Tangent};
pub use so2::{SO2, SO2Tangent};
pub use so3::{SO3, SO3Tangent};

/// Threshold below which rotation angles use Taylor expansions.
pub const SMALL_ANGLE: f64 = 1e-6;

/// Errors that can occur during manifold operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifoldError {
    /// A minimal vector of the wrong length was supplied
    InvalidDimension { expected: usize, actual: usize },
    /// A value contained NaN or infinite components
    NonFinite,
}

impl fmt::Display for ManifoldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifoldError::InvalidDimension { expected, actual } => {
                write!(f, "Invalid dimension: expected {expected}, got {actual}")
            }
            ManifoldError::NonFinite => write!(f, "Value contains non-finite components"),
        }
    }
}

impl std::error::Error for ManifoldError {}

/// Core trait for Lie group operations.
///
/// Every operation is pure: it returns a new element rather than mutating `self`.
pub trait LieGroup: Clone + fmt::Debug + PartialEq + Sized {
    /// The tangent space vector type
    type TangentVector: Tangent<Self>;

    /// Dimension of the space the group acts on
    const DIM: usize;

    /// Degrees of freedom (tangent space dimension)
    const DOF: usize;

    /// Get the identity element of the group.
    fn identity() -> Self;

    /// Compute the inverse, such that `g ∘ g⁻¹ = e`.
    fn inverse(&self) -> Self;

    /// Compose this element with another (group multiplication `g₁ ∘ g₂`).
    fn compose(&self, other: &Self) -> Self;

    /// Logarithmic map from the group to its tangent space.
    fn log(&self) -> Self::TangentVector;

    /// Right plus (oplus): `g ⊞ φ = g ∘ exp(φ)`.
    fn right_plus(&self, tangent: &Self::TangentVector) -> Self {
        self.compose(&tangent.exp())
    }

    /// Right minus (ominus): `g₁ ⊟ g₂ = log(g₂⁻¹ ∘ g₁)`.
    fn right_minus(&self, other: &Self) -> Self::TangentVector {
        other.inverse().compose(self).log()
    }

    /// Relative element `g₁⁻¹ ∘ g₂`.
    fn between(&self, other: &Self) -> Self {
        self.inverse().compose(other)
    }

    /// Check whether two elements are equal within `tolerance` in the tangent space.
    fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        self.right_minus(other).is_zero(tolerance)
    }
}

/// Trait for Lie algebra (tangent space) elements.
pub trait Tangent<G: LieGroup>: Clone + fmt::Debug + PartialEq + Sized {
    /// Square Jacobian type of the tangent space
    type JacobianMatrix;

    /// Exponential map to the group.
    fn exp(&self) -> G;

    /// Left Jacobian `J_l(φ)`.
    fn left_jacobian(&self) -> Self::JacobianMatrix;

    /// Inverse of the left Jacobian.
    fn left_jacobian_inv(&self) -> Self::JacobianMatrix;

    /// Zero tangent vector.
    fn zero() -> Self;

    /// Check whether every component is below `tolerance` in magnitude.
    fn is_zero(&self, tolerance: f64) -> bool;
}
