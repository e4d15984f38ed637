//! Low-rank operators and linear combinations of operators.
//!
//! The belief updates accumulate one symmetric rank-2 mean correction and one
//! rank-1 covariance-factor downdate per iteration. Storing those corrections as
//! the two factors of an outer-product sum `L Rᵗ` keeps their cost at `O(nk)`
//! and lets the batch of iteration `k` reuse the batch of iteration `k - 1`.

use super::{LinearOperator, axpy, dense_trace_of_square};
use faer::{Accum, Mat, MatRef, Par, linalg::matmul::matmul};
use std::sync::Arc;

/// The operator `L Rᵗ = Σⱼ lⱼ rⱼᵗ` with `n × k` factors `L` and `R`.
#[derive(Clone, Debug)]
pub struct LowRank {
    left: Mat<f64>,
    right: Mat<f64>,
}

impl LowRank {
    /// The empty (rank zero) operator on `Rⁿ`.
    pub fn zeros(dim: usize) -> Self {
        Self {
            left: Mat::zeros(dim, 0),
            right: Mat::zeros(dim, 0),
        }
    }

    /// Builds `L Rᵗ` from its factors.
    ///
    /// # Panics
    ///
    /// Panics if the factors do not have the same shape.
    pub fn new(left: Mat<f64>, right: Mat<f64>) -> Self {
        assert_eq!(
            (left.nrows(), left.ncols()),
            (right.nrows(), right.ncols()),
            "low-rank factors must have the same shape"
        );
        Self { left, right }
    }

    /// The rank-one operator `u vᵗ`.
    pub fn rank_one(u: MatRef<'_, f64>, v: MatRef<'_, f64>) -> Self {
        Self::new(u.to_owned(), v.to_owned())
    }

    /// The symmetric rank-two operator `u vᵗ + v uᵗ`.
    pub fn symmetric_rank_two(u: MatRef<'_, f64>, v: MatRef<'_, f64>) -> Self {
        Self::new(hcat(u, v), hcat(v, u))
    }

    /// Returns the sum `self + other`, stacking the factors.
    pub fn concat(&self, other: &LowRank) -> Self {
        Self::new(
            hcat(self.left.as_ref(), other.left.as_ref()),
            hcat(self.right.as_ref(), other.right.as_ref()),
        )
    }

    /// Returns `c · self`.
    pub fn scaled(&self, c: f64) -> Self {
        Self::new(
            Mat::from_fn(self.left.nrows(), self.left.ncols(), |i, j| {
                c * self.left[(i, j)]
            }),
            self.right.clone(),
        )
    }

    /// Number of outer products in the sum.
    pub fn rank(&self) -> usize {
        self.left.ncols()
    }

    pub fn left(&self) -> MatRef<'_, f64> {
        self.left.as_ref()
    }

    pub fn right(&self) -> MatRef<'_, f64> {
        self.right.as_ref()
    }
}

impl LinearOperator for LowRank {
    fn nrows(&self) -> usize {
        self.left.nrows()
    }

    fn ncols(&self) -> usize {
        self.right.nrows()
    }

    fn apply(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        assert_eq!(
            self.right.nrows(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            self.right.nrows(),
            rhs.nrows(),
        );
        let mut out = Mat::<f64>::zeros(self.left.nrows(), rhs.ncols());
        if self.rank() == 0 {
            return out;
        }
        let coeffs = self.right.transpose() * rhs;
        matmul(
            out.as_mut(),
            Accum::Replace,
            self.left.as_ref(),
            coeffs.as_ref(),
            1.0,
            Par::Seq,
        );
        out
    }

    fn trace(&self) -> f64 {
        let mut acc = 0.0;
        for j in 0..self.left.ncols() {
            for i in 0..self.left.nrows() {
                acc += self.left[(i, j)] * self.right[(i, j)];
            }
        }
        acc
    }

    /// `tr((L Rᵗ)²) = tr((Rᵗ L)²)` from the `k × k` Gram matrix `Rᵗ L`.
    fn trace_of_square(&self) -> f64 {
        if self.rank() == 0 {
            return 0.0;
        }
        let gram = self.right.transpose() * self.left.as_ref();
        dense_trace_of_square(&gram)
    }
}

/// The operator `Σᵢ cᵢ Tᵢ` for square operators `Tᵢ` of a common dimension.
#[derive(Clone, Debug)]
pub struct LinearCombination {
    dim: usize,
    terms: Vec<(f64, Arc<dyn LinearOperator>)>,
}

impl LinearCombination {
    /// The zero operator on `Rⁿ`, to be extended with [`LinearCombination::with_term`].
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            terms: Vec::new(),
        }
    }

    /// Appends the term `coeff · op`.
    ///
    /// # Panics
    ///
    /// Panics if `op` is not `n × n`.
    pub fn with_term(mut self, coeff: f64, op: Arc<dyn LinearOperator>) -> Self {
        assert_eq!(
            (op.nrows(), op.ncols()),
            (self.dim, self.dim),
            "all terms of a linear combination must share the dimension"
        );
        self.terms.push((coeff, op));
        self
    }

    pub fn terms(&self) -> &[(f64, Arc<dyn LinearOperator>)] {
        &self.terms
    }
}

impl LinearOperator for LinearCombination {
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
        let mut out = Mat::<f64>::zeros(self.dim, rhs.ncols());
        for (coeff, op) in &self.terms {
            let term = op.apply(rhs);
            axpy(out.as_mut(), *coeff, term.as_ref());
        }
        out
    }

    fn trace(&self) -> f64 {
        self.terms.iter().map(|(c, op)| c * op.trace()).sum()
    }

    /// Closed form for `αI + cT`: `nα² + 2αc·tr(T) + c²·tr(T²)`. Combinations
    /// with more than one non-scalar term are materialized.
    fn trace_of_square(&self) -> f64 {
        let mut alpha = 0.0;
        let mut structured = Vec::new();
        for (c, op) in &self.terms {
            match op.as_scalar() {
                Some(s) => alpha += c * s,
                None => structured.push((*c, op)),
            }
        }
        let n = self.dim as f64;
        match structured.as_slice() {
            [] => n * alpha * alpha,
            [(c, op)] => {
                let c = *c;
                n * alpha * alpha + 2.0 * alpha * c * op.trace() + c * c * op.trace_of_square()
            }
            _ => dense_trace_of_square(&self.to_dense()),
        }
    }

    fn as_scalar(&self) -> Option<f64> {
        self.terms
            .iter()
            .try_fold(0.0, |acc, (c, op)| op.as_scalar().map(|s| acc + c * s))
    }
}

fn hcat(a: MatRef<'_, f64>, b: MatRef<'_, f64>) -> Mat<f64> {
    let k = a.ncols();
    Mat::from_fn(a.nrows(), k + b.ncols(), |i, j| {
        if j < k { a[(i, j)] } else { b[(i, j - k)] }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linops::ScalarMult;
    use faer::mat;

    #[test]
    fn test_symmetric_rank_two_matches_dense() {
        let u: Mat<f64> = mat![[1.0], [2.0], [0.0]];
        let v: Mat<f64> = mat![[0.5], [-1.0], [3.0]];
        let op = LowRank::symmetric_rank_two(u.as_ref(), v.as_ref());
        let dense = &(&u * v.transpose()) + &(&v * u.transpose());

        assert_eq!(op.rank(), 2);
        assert!((&op.to_dense() - &dense).norm_l2() < 1e-14);
        assert!((op.trace() - 2.0 * (0.5 - 2.0)).abs() < 1e-14);
    }

    #[test]
    fn test_concat_and_scale_accumulate() {
        let u: Mat<f64> = mat![[1.0], [0.0]];
        let v: Mat<f64> = mat![[0.0], [1.0]];
        let batch = LowRank::zeros(2)
            .concat(&LowRank::rank_one(u.as_ref(), u.as_ref()))
            .concat(&LowRank::rank_one(v.as_ref(), v.as_ref()).scaled(3.0));
        assert_eq!(batch.to_dense(), mat![[1.0, 0.0], [0.0, 3.0]]);
        assert_eq!(LowRank::zeros(2).to_dense(), Mat::<f64>::zeros(2, 2));
    }

    #[test]
    fn test_linear_combination() {
        let a: Arc<dyn LinearOperator> = Arc::new(mat![[1.0, 2.0], [2.0, 1.0]]);
        let combo = LinearCombination::new(2)
            .with_term(2.0, a)
            .with_term(-1.0, Arc::new(ScalarMult::new(2, 4.0)));
        assert_eq!(combo.to_dense(), mat![[-2.0, 4.0], [4.0, -2.0]]);
        assert_eq!(combo.trace(), -4.0);
        assert_eq!(combo.as_scalar(), None);

        let scalar_only = LinearCombination::new(3)
            .with_term(2.0, Arc::new(ScalarMult::new(3, 1.5)))
            .with_term(1.0, Arc::new(ScalarMult::new(3, -0.5)));
        assert_eq!(scalar_only.as_scalar(), Some(2.5));
    }
}
