//! Estimated diagonal information attached to an edge.

use crate::error::{CalibError, CalibResult};
use nalgebra::{DMatrix, DVector};

/// A diagonal information estimate of dimension 2 or 3.
///
/// The edge error is rescaled elementwise by the square root of the diagonal, so the
/// diagonal is itself a quantity under estimation rather than a fixed weight.
#[derive(Clone, Debug, PartialEq)]
pub struct InformationNode {
    diagonal: DVector<f64>,
}

impl InformationNode {
    pub fn new(diagonal: DVector<f64>) -> CalibResult<Self> {
        if !(2..=3).contains(&diagonal.len()) {
            return Err(CalibError::InvalidInput(format!(
                "information diagonal must have 2 or 3 entries, got {}",
                diagonal.len()
            )));
        }
        if diagonal.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(CalibError::InvalidInput(
                "information diagonal must be finite and non-negative".to_string(),
            ));
        }
        Ok(InformationNode { diagonal })
    }

    /// Unit information of the given dimension.
    pub fn identity(dim: usize) -> CalibResult<Self> {
        InformationNode::new(DVector::from_element(dim, 1.0))
    }

    pub fn dim(&self) -> usize {
        self.diagonal.len()
    }

    pub fn diagonal(&self) -> &DVector<f64> {
        &self.diagonal
    }

    pub fn matrix(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&self.diagonal)
    }

    pub fn set_diagonal(&mut self, values: &[f64]) -> CalibResult<()> {
        if values.len() != self.dim() {
            return Err(CalibError::InvalidInput(format!(
                "information needs {} values, got {}",
                self.dim(),
                values.len()
            )));
        }
        *self = InformationNode::new(DVector::from_column_slice(values))?;
        Ok(())
    }

    /// Elementwise `error ⊙ sqrt(diagonal)`.
    pub fn scale_error(&self, error: &DVector<f64>) -> CalibResult<DVector<f64>> {
        if error.len() != self.dim() {
            return Err(CalibError::InvalidInput(format!(
                "error of length {} does not match information of dimension {}",
                error.len(),
                self.dim()
            )));
        }
        Ok(error.component_mul(&self.diagonal.map(f64::sqrt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_information_rejects_bad_dimension() {
        assert!(InformationNode::new(DVector::from_element(4, 1.0)).is_err());
        assert!(InformationNode::new(DVector::from_vec(vec![1.0, -1.0])).is_err());
    }

    #[test]
    fn test_information_scales_by_square_root() {
        let info = InformationNode::new(DVector::from_vec(vec![4.0, 9.0])).unwrap();
        let scaled = info
            .scale_error(&DVector::from_vec(vec![1.0, 1.0]))
            .unwrap();
        assert_eq!(scaled, DVector::from_vec(vec![2.0, 3.0]));
    }
}
