//! Scalar multiples of the identity and their rank-one perturbations.

use super::{InvertibleOperator, LinearOperator, dot};
use crate::error::{SolverError, SolverErrorKind};
use faer::{Mat, MatRef, Scale};
use std::sync::Arc;

/// The operator `c·I` on `Rⁿ`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalarMult {
    dim: usize,
    scalar: f64,
}

impl ScalarMult {
    pub fn new(dim: usize, scalar: f64) -> Self {
        Self { dim, scalar }
    }

    pub fn scalar(&self) -> f64 {
        self.scalar
    }
}

/// The identity operator on `Rⁿ`.
pub fn identity(dim: usize) -> ScalarMult {
    ScalarMult::new(dim, 1.0)
}

impl LinearOperator for ScalarMult {
    fn nrows(&self) -> usize {
        self.dim
    }

    fn ncols(&self) -> usize {
        self.dim
    }

    fn apply(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        assert_eq!(
            self.dim,
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            self.dim,
            rhs.nrows(),
        );
        rhs * Scale(self.scalar)
    }

    fn trace(&self) -> f64 {
        self.scalar * self.dim as f64
    }

    fn trace_of_square(&self) -> f64 {
        self.scalar * self.scalar * self.dim as f64
    }

    fn as_scalar(&self) -> Option<f64> {
        Some(self.scalar)
    }
}

impl InvertibleOperator for ScalarMult {
    fn inverse(&self) -> Result<Arc<dyn LinearOperator>, SolverError> {
        if self.scalar == 0.0 || !self.scalar.is_finite() {
            return Err(SolverErrorKind::NonInvertible {
                operator: "ScalarMult",
                reason: format!("scalar is {}", self.scalar),
            }
            .into());
        }
        Ok(Arc::new(ScalarMult::new(self.dim, 1.0 / self.scalar)))
    }
}

/// The symmetric operator `αI + c·uuᵗ`.
///
/// Prior means centred on an initial guess have exactly this form, and its
/// inverse is available in closed form through the Sherman–Morrison formula
///
/// (αI + c·uuᵗ)⁻¹ = α⁻¹I − c / (α(α + c·uᵗu)) · uuᵗ.
#[derive(Clone, Debug)]
pub struct ScaledIdentityPlusRankOne {
    scalar: f64,
    coeff: f64,
    u: Mat<f64>,
    u_sqnorm: f64,
}

impl ScaledIdentityPlusRankOne {
    /// `u` must be a single column.
    pub fn new(scalar: f64, coeff: f64, u: Mat<f64>) -> Self {
        assert_eq!(u.ncols(), 1, "rank-one direction must be a column vector");
        let u_sqnorm = dot(u.as_ref(), u.as_ref());
        Self {
            scalar,
            coeff,
            u,
            u_sqnorm,
        }
    }
}

impl LinearOperator for ScaledIdentityPlusRankOne {
    fn nrows(&self) -> usize {
        self.u.nrows()
    }

    fn ncols(&self) -> usize {
        self.u.nrows()
    }

    fn apply(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        assert_eq!(
            self.u.nrows(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            self.u.nrows(),
            rhs.nrows(),
        );
        let utx = self.u.transpose() * rhs;
        let mut out = rhs * Scale(self.scalar);
        for j in 0..rhs.ncols() {
            let c = self.coeff * utx[(0, j)];
            for i in 0..rhs.nrows() {
                out[(i, j)] += c * self.u[(i, 0)];
            }
        }
        out
    }

    fn trace(&self) -> f64 {
        self.scalar * self.u.nrows() as f64 + self.coeff * self.u_sqnorm
    }

    /// `nα² + 2αc‖u‖² + c²‖u‖⁴`.
    fn trace_of_square(&self) -> f64 {
        let cu = self.coeff * self.u_sqnorm;
        self.scalar * self.scalar * self.u.nrows() as f64 + 2.0 * self.scalar * cu + cu * cu
    }

    fn as_scalar(&self) -> Option<f64> {
        (self.coeff == 0.0 || self.u_sqnorm == 0.0).then_some(self.scalar)
    }
}

impl InvertibleOperator for ScaledIdentityPlusRankOne {
    fn inverse(&self) -> Result<Arc<dyn LinearOperator>, SolverError> {
        let denom = self.scalar * (self.scalar + self.coeff * self.u_sqnorm);
        if self.scalar == 0.0 || denom == 0.0 || !denom.is_finite() {
            return Err(SolverErrorKind::NonInvertible {
                operator: "ScaledIdentityPlusRankOne",
                reason: format!(
                    "Sherman-Morrison denominator vanishes (scalar = {}, coeff * |u|^2 = {})",
                    self.scalar,
                    self.coeff * self.u_sqnorm
                ),
            }
            .into());
        }
        Ok(Arc::new(ScaledIdentityPlusRankOne::new(
            1.0 / self.scalar,
            -self.coeff / denom,
            self.u.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_scalar_mult() {
        let op = ScalarMult::new(3, 2.5);
        let x: Mat<f64> = mat![[1.0], [2.0], [-4.0]];
        assert_eq!(op.apply(x.as_ref()), mat![[2.5], [5.0], [-10.0]]);
        assert_eq!(op.trace(), 7.5);
        assert_eq!(op.as_scalar(), Some(2.5));
        assert_eq!(op.inverse().unwrap().as_scalar(), Some(0.4));
    }

    #[test]
    fn test_zero_scalar_is_not_invertible() {
        let err = ScalarMult::new(4, 0.0).inverse().unwrap_err();
        assert!(matches!(
            err.kind(),
            SolverErrorKind::NonInvertible {
                operator: "ScalarMult",
                ..
            }
        ));
    }

    #[test]
    fn test_rank_one_update_matches_dense_and_inverts() {
        let u: Mat<f64> = mat![[1.0], [-1.0], [2.0]];
        let op = ScaledIdentityPlusRankOne::new(2.0, 0.5, u.clone());
        let dense = Mat::<f64>::from_fn(3, 3, |i, j| {
            (if i == j { 2.0 } else { 0.0 }) + 0.5 * u[(i, 0)] * u[(j, 0)]
        });
        assert!((&op.to_dense() - &dense).norm_l2() < 1e-14);
        assert!((op.trace() - (6.0 + 0.5 * 6.0)).abs() < 1e-14);

        let inverse = op.inverse().unwrap();
        let product = &dense * &inverse.to_dense();
        let eye = Mat::<f64>::from_fn(3, 3, |i, j| if i == j { 1.0 } else { 0.0 });
        assert!((&product - &eye).norm_l2() < 1e-13);
    }
}
