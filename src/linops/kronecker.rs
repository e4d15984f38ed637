//! The symmetric Kronecker product `W ⊗ₛ W`.
//!
//! For a symmetric factor `W` the symmetric Kronecker product acts on `n × n`
//! matrices as
//!
//! (W ⊗ₛ W) vec(X) = vec(½ (W X Wᵗ + W Xᵗ Wᵗ)),
//!
//! which is the covariance of a Gaussian over symmetric matrices whose row and
//! column uncertainty coincide. It is never materialized by the solver: the
//! belief updates only ever touch the factor `W`.

use super::LinearOperator;
use faer::{Mat, MatRef};
use std::sync::Arc;

/// Covariance operator `W ⊗ₛ W` described by its factor `W`.
#[derive(Clone, Debug)]
pub struct SymmetricKronecker {
    factor: Arc<dyn LinearOperator>,
}

impl SymmetricKronecker {
    /// # Panics
    ///
    /// Panics if the factor is not square.
    pub fn new(factor: Arc<dyn LinearOperator>) -> Self {
        assert_eq!(
            factor.nrows(),
            factor.ncols(),
            "symmetric Kronecker factor must be square"
        );
        Self { factor }
    }

    /// The factor `W`.
    pub fn factor(&self) -> &Arc<dyn LinearOperator> {
        &self.factor
    }

    /// Dimension `n` of the factor; the operator itself acts on `Rⁿˣⁿ`.
    pub fn dim(&self) -> usize {
        self.factor.nrows()
    }

    /// Applies the Kronecker operator to an `n × n` matrix.
    pub fn apply_matrix(&self, x: MatRef<'_, f64>) -> Mat<f64> {
        assert_eq!(
            (x.nrows(), x.ncols()),
            (self.dim(), self.dim()),
            "symmetric Kronecker product acts on {n}x{n} matrices",
            n = self.dim()
        );
        // M = W X W, so that W X W + W Xᵗ W = M + Mᵗ for symmetric W.
        let wx = self.factor.apply(x);
        let m_t = self.factor.apply(wx.transpose());
        Mat::from_fn(x.nrows(), x.ncols(), |i, j| 0.5 * (m_t[(i, j)] + m_t[(j, i)]))
    }

    /// `tr(W ⊗ₛ W) = ½ (tr(W)² + tr(W²))`, in closed form for structured factors.
    pub fn trace(&self) -> f64 {
        let tr = self.factor.trace();
        0.5 * (tr * tr + self.factor.trace_of_square())
    }

    /// Dense `n² × n²` matrix in column-major `vec` ordering. Intended for small `n`.
    pub fn to_dense(&self) -> Mat<f64> {
        let n = self.dim();
        let w = self.factor.to_dense();
        // ½ (W ⊗ W + (W ⊗ W) Γ) with Γ the commutation matrix, entrywise.
        Mat::from_fn(n * n, n * n, |row, col| {
            let (i, j) = (row % n, row / n);
            let (k, l) = (col % n, col / n);
            0.5 * (w[(i, k)] * w[(j, l)] + w[(i, l)] * w[(j, k)])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    fn vec_of(x: MatRef<'_, f64>) -> Mat<f64> {
        let n = x.nrows();
        Mat::from_fn(n * x.ncols(), 1, |r, _| x[(r % n, r / n)])
    }

    #[test]
    fn test_apply_matrix_matches_dense_kronecker() {
        let w: Mat<f64> = mat![[2.0, 0.5, 0.0], [0.5, 1.0, -0.25], [0.0, -0.25, 3.0]];
        let cov = SymmetricKronecker::new(Arc::new(w));
        let x: Mat<f64> = mat![[1.0, 2.0, 0.0], [-1.0, 0.5, 3.0], [4.0, 0.0, -2.0]];

        let structured = vec_of(cov.apply_matrix(x.as_ref()).as_ref());
        let dense = &cov.to_dense() * &vec_of(x.as_ref());
        assert!((&structured - &dense).norm_l2() < 1e-12);
    }

    #[test]
    fn test_trace_formula() {
        let w: Mat<f64> = mat![[2.0, 1.0], [1.0, 3.0]];
        let cov = SymmetricKronecker::new(Arc::new(w));
        let dense = cov.to_dense();
        let dense_trace: f64 = (0..4).map(|i| dense[(i, i)]).sum();
        // tr(W)² = 25, tr(W²) = 4 + 1 + 1 + 9 = 15.
        assert!((cov.trace() - 20.0).abs() < 1e-13);
        assert!((dense_trace - 20.0).abs() < 1e-13);
    }

    #[test]
    fn test_structured_factor_traces_match_dense_kronecker() {
        use crate::linops::{
            LinearCombination, LowRank, OrthogonalProjection, ScalarMult, ScaledIdentityPlusRankOne,
            identity,
        };

        let u: Mat<f64> = mat![[1.0], [-2.0], [0.5]];
        let v: Mat<f64> = mat![[0.0], [1.0], [3.0]];
        let basis: Mat<f64> = mat![[1.0, 0.0], [1.0, 1.0], [0.0, 2.0]];
        let projection: Arc<dyn LinearOperator> =
            Arc::new(OrthogonalProjection::new(basis, None).unwrap());
        let factors: Vec<Arc<dyn LinearOperator>> = vec![
            Arc::new(ScalarMult::new(3, 1.5)),
            Arc::new(LowRank::symmetric_rank_two(u.as_ref(), v.as_ref())),
            Arc::new(ScaledIdentityPlusRankOne::new(2.0, -0.25, u.clone())),
            projection.clone(),
            Arc::new(
                LinearCombination::new(3)
                    .with_term(0.5, Arc::new(identity(3)))
                    .with_term(-0.5, projection),
            ),
        ];
        for factor in factors {
            let dense = factor.to_dense();
            let square = &dense * &dense;
            let square_trace: f64 = (0..3).map(|i| square[(i, i)]).sum();
            assert!((factor.trace_of_square() - square_trace).abs() < 1e-12, "{factor:?}");

            let cov = SymmetricKronecker::new(factor);
            let kron = cov.to_dense();
            let kron_trace: f64 = (0..9).map(|i| kron[(i, i)]).sum();
            assert!((cov.trace() - kron_trace).abs() < 1e-12);
        }
    }
}
