//! Projections onto the column space of a basis.

use super::{LinearOperator, dense_solve};
use crate::error::{SolverError, SolverErrorKind, dimension_mismatch};
use faer::{Mat, MatRef};
use std::sync::Arc;

/// Projection `P = B (Bᵗ D B)⁻¹ Bᵗ D` onto the span of the columns of `B`.
///
/// With `D = I` this is the orthogonal projection; a symmetric positive definite
/// inner-product operator `D` makes `P` orthogonal with respect to `⟨x, y⟩_D = xᵗDy`.
/// The `k × k` Gram matrix is factorized once at construction, applying `P`
/// afterwards costs two `n × k` products (plus one application of `D`).
#[derive(Clone, Debug)]
pub struct OrthogonalProjection {
    basis: Mat<f64>,
    // B (Bᵗ D B)⁻¹, so that P x = B · coeffsᵗ D x with coeffs = this matrix.
    dual: Mat<f64>,
    innerprod: Option<Arc<dyn LinearOperator>>,
}

impl OrthogonalProjection {
    /// Builds the projection onto `span(basis)`.
    ///
    /// The columns of `basis` must be linearly independent; otherwise the Gram
    /// matrix is singular and [`SolverErrorKind::NonInvertible`] is returned.
    pub fn new(
        basis: Mat<f64>,
        innerprod: Option<Arc<dyn LinearOperator>>,
    ) -> Result<Self, SolverError> {
        let n = basis.nrows();
        if let Some(d) = &innerprod {
            if d.nrows() != n || d.ncols() != n {
                return Err(dimension_mismatch("projection inner product", n, d.nrows()));
            }
        }
        let k = basis.ncols();
        if k == 0 {
            return Ok(Self {
                dual: Mat::zeros(n, 0),
                basis,
                innerprod,
            });
        }

        let d_basis = match &innerprod {
            Some(d) => d.apply(basis.as_ref()),
            None => basis.clone(),
        };
        // Gram matrix G = Bᵗ D B, symmetric for symmetric D.
        let gram = basis.transpose() * d_basis.as_ref();
        let dual_t = dense_solve(gram.as_ref(), basis.transpose()).ok_or_else(|| {
            SolverErrorKind::NonInvertible {
                operator: "OrthogonalProjection",
                reason: format!("Gram matrix of the {k} basis vectors is singular"),
            }
        })?;
        Ok(Self {
            dual: dual_t.transpose().to_owned(),
            basis,
            innerprod,
        })
    }

    pub fn basis(&self) -> MatRef<'_, f64> {
        self.basis.as_ref()
    }

    /// Rank of the projection.
    pub fn rank(&self) -> usize {
        self.basis.ncols()
    }
}

impl LinearOperator for OrthogonalProjection {
    fn nrows(&self) -> usize {
        self.basis.nrows()
    }

    fn ncols(&self) -> usize {
        self.basis.nrows()
    }

    fn apply(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        assert_eq!(
            self.basis.nrows(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            self.basis.nrows(),
            rhs.nrows(),
        );
        if self.rank() == 0 {
            return Mat::zeros(rhs.nrows(), rhs.ncols());
        }
        let weighted = match &self.innerprod {
            Some(d) => d.apply(rhs),
            None => rhs.to_owned(),
        };
        let coeffs = self.dual.transpose() * weighted.as_ref();
        self.basis.as_ref() * coeffs.as_ref()
    }

    /// `tr(P) = tr((BᵗDB)⁻¹ BᵗDB) = rank`.
    fn trace(&self) -> f64 {
        self.rank() as f64
    }

    /// `P² = P`.
    fn trace_of_square(&self) -> f64 {
        self.trace()
    }
}
