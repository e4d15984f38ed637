//! This module defines the linear operator abstraction used throughout the crate.
//!
//! Probabilistic linear solvers never need the entries of the matrices they
//! model. The system matrix, the posterior means of A and A⁻¹ and every
//! covariance factor are only ever multiplied with vectors, traced or, for
//! belief construction, inverted. All of them therefore implement the
//! [`LinearOperator`] trait, and the few that can be inverted additionally
//! implement [`InvertibleOperator`].
//!
//! This "matrix-free" approach lets the posterior means be represented as
//! `prior + low-rank batch` and the covariance factors as `prior - low-rank batch`,
//! so an iteration of the solver costs `O(nk)` instead of `O(n²)` memory traffic
//! for the model updates.
//!
//! Concrete implementations live in the submodules:
//! - [`scalar`]: scalar multiples of the identity and their rank-one updates.
//! - [`low_rank`]: low-rank outer-product sums and linear combinations of operators.
//! - [`projection`]: (oblique) orthogonal projections onto a column space.
//! - [`kronecker`]: the symmetric Kronecker product `W ⊗ₛ W`.

pub mod kronecker;
pub mod low_rank;
pub mod projection;
pub mod scalar;

pub use kronecker::SymmetricKronecker;
pub use low_rank::{LinearCombination, LowRank};
pub use projection::OrthogonalProjection;
pub use scalar::{ScalarMult, ScaledIdentityPlusRankOne, identity};

use crate::error::{SolverError, SolverErrorKind};
use faer::{
    Mat, MatMut, MatRef, Par,
    dyn_stack::{MemBuffer, MemStack},
    matrix_free::LinOp,
    prelude::Solve,
    sparse::{SparseColMat, Triplet},
};
use std::{fmt, sync::Arc};

/// Represents a real linear operator that can be applied to a vector (or a block of vectors).
///
/// The trait is object safe: beliefs store their means and covariance factors as
/// `Arc<dyn LinearOperator>`, which lets prior operators be shared between the
/// prior belief, the posterior belief and the solver cache without copying.
///
/// # Example
///
/// ```
/// use faer::mat;
/// use prob_linsolve::linops::LinearOperator;
///
/// let a = mat![[2.0, 1.0], [1.0, 3.0]];
/// let x = mat![[1.0], [1.0]];
/// let op: &dyn LinearOperator = &a;
/// assert_eq!(op.apply(x.as_ref()), mat![[3.0], [4.0]]);
/// assert_eq!(op.trace(), 5.0);
/// ```
pub trait LinearOperator: Send + Sync + fmt::Debug {
    /// Returns the number of rows of the operator.
    fn nrows(&self) -> usize;

    /// Returns the number of columns of the operator.
    fn ncols(&self) -> usize;

    /// Applies the operator to every column of `rhs` and returns the owned result.
    ///
    /// # Panics
    ///
    /// Implementations panic if the number of columns of the operator does not
    /// match the number of rows of `rhs`. Shapes are validated when problems and
    /// beliefs are constructed, so a panic here means an internal invariant broke.
    fn apply(&self, rhs: MatRef<'_, f64>) -> Mat<f64>;

    /// Returns the trace of the operator.
    ///
    /// The default implementation materializes the operator, which costs `n`
    /// applications. Structured operators override it with a closed form.
    fn trace(&self) -> f64 {
        let dense = self.to_dense();
        (0..dense.nrows().min(dense.ncols()))
            .map(|i| dense[(i, i)])
            .sum()
    }

    /// Returns `tr(T²)`, needed by the trace of `T ⊗ₛ T`.
    ///
    /// Like [`LinearOperator::trace`] the default materializes the operator.
    fn trace_of_square(&self) -> f64 {
        dense_trace_of_square(&self.to_dense())
    }

    /// Materializes the operator as a dense matrix.
    fn to_dense(&self) -> Mat<f64> {
        let eye = Mat::<f64>::from_fn(self.ncols(), self.ncols(), |i, j| {
            if i == j { 1.0 } else { 0.0 }
        });
        self.apply(eye.as_ref())
    }

    /// Returns `Some(c)` if the operator is known to be `c·I`.
    fn as_scalar(&self) -> Option<f64> {
        None
    }
}

/// `tr(M²) = Σᵢⱼ mᵢⱼ mⱼᵢ`.
pub(crate) fn dense_trace_of_square(m: &Mat<f64>) -> f64 {
    dot(m.as_ref(), m.transpose())
}

/// Capability trait for operators that can produce their own inverse.
///
/// Belief constructors that derive one prior mean from the other
/// (`from_inverse`, `from_matrix`) require this bound statically.
pub trait InvertibleOperator: LinearOperator {
    /// Returns the inverse operator, or [`SolverErrorKind::NonInvertible`] if it does not exist.
    fn inverse(&self) -> Result<Arc<dyn LinearOperator>, SolverError>;
}

impl<T: LinearOperator + ?Sized> LinearOperator for Arc<T> {
    #[inline]
    fn nrows(&self) -> usize {
        (**self).nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        (**self).ncols()
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        (**self).apply(rhs)
    }

    fn trace(&self) -> f64 {
        (**self).trace()
    }

    fn trace_of_square(&self) -> f64 {
        (**self).trace_of_square()
    }

    fn to_dense(&self) -> Mat<f64> {
        (**self).to_dense()
    }

    fn as_scalar(&self) -> Option<f64> {
        (**self).as_scalar()
    }
}

impl<T: InvertibleOperator + ?Sized> InvertibleOperator for Arc<T> {
    fn inverse(&self) -> Result<Arc<dyn LinearOperator>, SolverError> {
        (**self).inverse()
    }
}

/// Dense matrices are the reference implementation all structured operators are tested against.
impl LinearOperator for Mat<f64> {
    #[inline]
    fn nrows(&self) -> usize {
        self.as_ref().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.as_ref().ncols()
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        assert_eq!(
            self.ncols(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            self.ncols(),
            rhs.nrows(),
        );
        self.as_ref() * rhs
    }

    fn trace(&self) -> f64 {
        (0..self.nrows().min(self.ncols()))
            .map(|i| self[(i, i)])
            .sum()
    }

    fn to_dense(&self) -> Mat<f64> {
        self.clone()
    }
}

impl InvertibleOperator for Mat<f64> {
    fn inverse(&self) -> Result<Arc<dyn LinearOperator>, SolverError> {
        let n = self.nrows();
        if self.ncols() != n {
            return Err(SolverErrorKind::NonInvertible {
                operator: "dense matrix",
                reason: format!("matrix is not square ({}x{})", n, self.ncols()),
            }
            .into());
        }
        let inverse = dense_inverse(self.as_ref()).ok_or_else(|| SolverErrorKind::NonInvertible {
            operator: "dense matrix",
            reason: "LU factorization produced non-finite entries".to_string(),
        })?;
        Ok(Arc::new(inverse))
    }
}

/// A sparse system matrix, applied through faer's matrix-free [`LinOp`] interface.
#[derive(Clone, Debug)]
pub struct SparseOperator {
    matrix: SparseColMat<usize, f64>,
}

impl SparseOperator {
    /// Wraps an assembled sparse matrix.
    pub fn new(matrix: SparseColMat<usize, f64>) -> Self {
        Self { matrix }
    }

    /// Assembles an `nrows × ncols` sparse matrix from `(row, col, value)` triplets.
    /// Duplicate entries are summed.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[Triplet<usize, usize, f64>],
    ) -> Result<Self, SolverError> {
        let matrix = SparseColMat::try_new_from_triplets(nrows, ncols, triplets).map_err(|e| {
            SolverErrorKind::InputError(format!("Failed to assemble sparse matrix: {e:?}"))
        })?;
        Ok(Self { matrix })
    }

    /// Returns the wrapped sparse matrix.
    pub fn matrix(&self) -> &SparseColMat<usize, f64> {
        &self.matrix
    }
}

impl LinearOperator for SparseOperator {
    fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    fn apply(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        assert_eq!(
            self.ncols(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            self.ncols(),
            rhs.nrows(),
        );
        let view = self.matrix.as_ref();
        let mut out = Mat::<f64>::zeros(view.nrows(), rhs.ncols());
        let mut mem = MemBuffer::new(view.apply_scratch(rhs.ncols(), Par::Seq));
        LinOp::apply(&view, out.as_mut(), rhs, Par::Seq, MemStack::new(&mut mem));
        out
    }
}

/// Inverts a square dense matrix through a partial-pivoting LU factorization.
/// Returns `None` if the factorization broke down.
pub(crate) fn dense_inverse(matrix: MatRef<'_, f64>) -> Option<Mat<f64>> {
    let n = matrix.nrows();
    let eye = Mat::<f64>::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.0 });
    let inverse = matrix.partial_piv_lu().solve(&eye);
    all_finite(inverse.as_ref()).then_some(inverse)
}

/// Solves the small dense system `matrix · X = rhs`. Returns `None` on breakdown.
pub(crate) fn dense_solve(matrix: MatRef<'_, f64>, rhs: MatRef<'_, f64>) -> Option<Mat<f64>> {
    let solution = matrix.partial_piv_lu().solve(rhs);
    all_finite(solution.as_ref()).then_some(solution)
}

pub(crate) fn all_finite(m: MatRef<'_, f64>) -> bool {
    (0..m.ncols()).all(|j| (0..m.nrows()).all(|i| m[(i, j)].is_finite()))
}

/// Frobenius inner product `Σᵢⱼ aᵢⱼ bᵢⱼ`, the Euclidean inner product for column vectors.
pub(crate) fn dot(a: MatRef<'_, f64>, b: MatRef<'_, f64>) -> f64 {
    debug_assert_eq!((a.nrows(), a.ncols()), (b.nrows(), b.ncols()));
    let mut acc = 0.0;
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            acc += a[(i, j)] * b[(i, j)];
        }
    }
    acc
}

/// `out += alpha * x`.
pub(crate) fn axpy(mut out: MatMut<'_, f64>, alpha: f64, x: MatRef<'_, f64>) {
    debug_assert_eq!((out.nrows(), out.ncols()), (x.nrows(), x.ncols()));
    for j in 0..x.ncols() {
        for i in 0..x.nrows() {
            out[(i, j)] += alpha * x[(i, j)];
        }
    }
}

/// Symmetric part `½(M + Mᵗ)` of a square dense matrix.
pub(crate) fn symmetrize(m: MatRef<'_, f64>) -> Mat<f64> {
    Mat::from_fn(m.nrows(), m.ncols(), |i, j| 0.5 * (m[(i, j)] + m[(j, i)]))
}
