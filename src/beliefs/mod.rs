//! Beliefs over the quantities of a linear system.
//!
//! A [`LinearSystemBelief`] bundles four random variables: the solution `x`, the
//! system matrix `A`, its inverse `H = A⁻¹` and the right-hand side `b`. The
//! matrix models are Gaussians with symmetric Kronecker covariances, which keeps
//! the two means symmetric under every rank-2 update of the solver.
//!
//! Two families of priors are provided:
//! - [`SymmetricNormal`]: covariance factors equal to the prior means.
//! - [`WeakMeanCorrespondence`]: covariance factors that reproduce the prior means on
//!   the explored subspace and put scaled isotropic uncertainty on its complement.
//!
//! Unless given explicitly, the solution belief is induced from `H` and `b` by
//! [`induced_solution`].

mod symmetric_normal;
mod weak_mean_correspondence;

pub use symmetric_normal::SymmetricNormal;
pub use weak_mean_correspondence::{ActionObservationInnerProducts, WeakMeanCorrespondence};

pub(crate) use symmetric_normal::{SolutionMeans, means_from_solution};

use crate::{
    error::{SolverError, dimension_mismatch, not_implemented},
    hyperparams::LinearSystemNoise,
    linops::{LinearOperator, dot},
    random_variables::{GaussianMatrixVariate, Normal, RightHandSide},
};
use faer::{Mat, MatRef, Scale};
use std::sync::Arc;

/// Which prior family a belief belongs to, and the data that family carries.
#[derive(Clone, Debug)]
pub enum BeliefKind {
    /// A symmetric-normal belief obtained by exact (noise-free) updates.
    SymmetricNormal,
    /// A weak-mean-correspondence belief together with its prior means, scales and data.
    WeakMeanCorrespondence(WeakMeanCorrespondence),
    /// A symmetric-normal belief calibrated under the given noise model.
    Noisy(LinearSystemNoise),
}

/// Belief over the solution, the system matrix, its inverse and the right-hand side.
#[derive(Clone, Debug)]
pub struct LinearSystemBelief {
    x: Normal,
    a: GaussianMatrixVariate,
    ainv: GaussianMatrixVariate,
    b: RightHandSide,
    kind: BeliefKind,
}

impl LinearSystemBelief {
    /// Assembles a symmetric-normal belief.
    ///
    /// If `x` is `None` the solution belief is induced from `ainv` and `b`.
    pub fn new(
        x: Option<Normal>,
        a: GaussianMatrixVariate,
        ainv: GaussianMatrixVariate,
        b: RightHandSide,
    ) -> Result<Self, SolverError> {
        let n = a.dim();
        if ainv.dim() != n {
            return Err(dimension_mismatch("inverse belief dimension", n, ainv.dim()));
        }
        if b.mean().nrows() != n {
            return Err(dimension_mismatch("right-hand side belief rows", n, b.mean().nrows()));
        }
        let x = match x {
            Some(x) if x.dim() != n => {
                return Err(dimension_mismatch("solution belief dimension", n, x.dim()));
            }
            Some(x) => x,
            None => induced_solution(&ainv, &b)?,
        };
        Ok(Self {
            x,
            a,
            ainv,
            b,
            kind: BeliefKind::SymmetricNormal,
        })
    }

    pub(crate) fn with_kind(mut self, kind: BeliefKind) -> Self {
        self.kind = kind;
        self
    }

    /// Tags the belief with the noise model it is calibrated under.
    pub fn with_noise(self, noise: LinearSystemNoise) -> Result<Self, SolverError> {
        noise.scalar_variance()?;
        Ok(self.with_kind(BeliefKind::Noisy(noise)))
    }

    /// Belief over the solution `x`.
    pub fn x(&self) -> &Normal {
        &self.x
    }

    /// Belief over the system matrix `A`.
    pub fn a(&self) -> &GaussianMatrixVariate {
        &self.a
    }

    /// Belief over the inverse `H = A⁻¹`.
    pub fn ainv(&self) -> &GaussianMatrixVariate {
        &self.ainv
    }

    /// Belief over the right-hand side `b`.
    pub fn b(&self) -> &RightHandSide {
        &self.b
    }

    pub fn kind(&self) -> &BeliefKind {
        &self.kind
    }

    /// The noise model the belief is calibrated under, if any.
    pub fn noise(&self) -> Option<&LinearSystemNoise> {
        match &self.kind {
            BeliefKind::Noisy(noise) => Some(noise),
            _ => None,
        }
    }

    pub fn dim(&self) -> usize {
        self.a.dim()
    }
}

/// Solution belief `x = H b` induced by a belief over the inverse and the right-hand side.
///
/// The mean is `E[H] E[b]` and the covariance is
///
/// Σ = ½ (bᵗWb · W + W b bᵗ W),
///
/// with `W` the covariance factor of `H`, represented by [`InducedSolutionCovariance`].
pub fn induced_solution(
    ainv: &GaussianMatrixVariate,
    b: &RightHandSide,
) -> Result<Normal, SolverError> {
    let b_mean = b.mean();
    if b_mean.ncols() != 1 {
        return Err(not_implemented(format!(
            "induced solution belief for {} right-hand sides",
            b_mean.ncols()
        )));
    }
    if b_mean.nrows() != ainv.dim() {
        return Err(dimension_mismatch(
            "right-hand side rows",
            ainv.dim(),
            b_mean.nrows(),
        ));
    }
    let mean = ainv.mean().apply(b_mean);
    let cov = InducedSolutionCovariance::new(ainv.cov_factor().clone(), b_mean);
    Normal::new(mean, Arc::new(cov))
}

/// Covariance `½ (bᵗWb · W + W b bᵗ W)` of an induced solution belief.
///
/// Stores `Wb`, `bᵗWb` and `tr(W)`, so the trace is available in `O(1)` and a
/// matrix-vector product costs one application of `W` plus `O(n)`.
#[derive(Clone, Debug)]
pub struct InducedSolutionCovariance {
    factor: Arc<dyn LinearOperator>,
    factor_b: Mat<f64>,
    b_factor_b: f64,
    factor_trace: f64,
}

impl InducedSolutionCovariance {
    pub fn new(factor: Arc<dyn LinearOperator>, b: MatRef<'_, f64>) -> Self {
        let factor_b = factor.apply(b);
        let b_factor_b = dot(b, factor_b.as_ref());
        let factor_trace = factor.trace();
        Self {
            factor,
            factor_b,
            b_factor_b,
            factor_trace,
        }
    }

    /// `bᵗWb`.
    pub fn b_factor_b(&self) -> f64 {
        self.b_factor_b
    }

    /// `Wb`.
    pub fn factor_b(&self) -> MatRef<'_, f64> {
        self.factor_b.as_ref()
    }
}

impl LinearOperator for InducedSolutionCovariance {
    fn nrows(&self) -> usize {
        self.factor_b.nrows()
    }

    fn ncols(&self) -> usize {
        self.factor_b.nrows()
    }

    fn apply(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        let mut out = &self.factor.apply(rhs) * Scale(0.5 * self.b_factor_b);
        let coeffs = self.factor_b.transpose() * rhs;
        for j in 0..rhs.ncols() {
            let c = 0.5 * coeffs[(0, j)];
            for i in 0..out.nrows() {
                out[(i, j)] += c * self.factor_b[(i, 0)];
            }
        }
        out
    }

    fn trace(&self) -> f64 {
        0.5 * (self.factor_trace * self.b_factor_b + dot(self.factor_b.as_ref(), self.factor_b.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linops::ScalarMult;
    use faer::mat;

    fn spd_factor() -> Mat<f64> {
        mat![[3.0, 0.5, 0.0], [0.5, 2.0, 0.25], [0.0, 0.25, 1.0]]
    }

    #[test]
    fn test_induced_solution_matches_dense_formula() {
        let w = spd_factor();
        let mean: Mat<f64> = mat![[1.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 4.0]];
        let ainv = GaussianMatrixVariate::new(Arc::new(mean.clone()), Arc::new(w.clone())).unwrap();
        let b: Mat<f64> = mat![[1.0], [-2.0], [0.5]];

        let x = induced_solution(&ainv, &RightHandSide::Constant(b.clone())).unwrap();
        assert_eq!(x.mean().to_owned(), &mean * &b);

        let wb = &w * &b;
        let bwb = (b.transpose() * &wb)[(0, 0)];
        let expected = &(&w * Scale(0.5 * bwb)) + &(&(&wb * wb.transpose()) * Scale(0.5));
        let dense = x.cov().to_dense();
        assert!((&dense - &expected).norm_l2() <= 1e-8 * expected.norm_l2());

        let expected_trace: f64 = (0..3).map(|i| expected[(i, i)]).sum();
        assert!((x.cov().trace() - expected_trace).abs() <= 1e-12 * expected_trace);
    }

    #[test]
    fn test_induced_solution_rejects_multiple_rhs() {
        let ainv = GaussianMatrixVariate::new(
            Arc::new(ScalarMult::new(2, 1.0)),
            Arc::new(ScalarMult::new(2, 1.0)),
        )
        .unwrap();
        let b = RightHandSide::Constant(Mat::zeros(2, 2));
        assert!(induced_solution(&ainv, &b).is_err());
    }

    #[test]
    fn test_belief_dimensions_are_checked() {
        let a = GaussianMatrixVariate::new(
            Arc::new(ScalarMult::new(3, 1.0)),
            Arc::new(ScalarMult::new(3, 1.0)),
        )
        .unwrap();
        let ainv = GaussianMatrixVariate::new(
            Arc::new(ScalarMult::new(2, 1.0)),
            Arc::new(ScalarMult::new(2, 1.0)),
        )
        .unwrap();
        let b = RightHandSide::Constant(Mat::zeros(3, 1));
        assert!(LinearSystemBelief::new(None, a, ainv, b).is_err());
    }
}
