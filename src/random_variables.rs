//! Gaussian random variables over vectors and symmetric matrices.
//!
//! These are thin containers: a mean and a covariance, both exposed as
//! operators. Sampling is not needed by the solver and is not provided.

use crate::{
    error::{SolverError, dimension_mismatch},
    linops::{LinearOperator, SymmetricKronecker},
};
use faer::{Mat, MatRef};
use std::sync::Arc;

/// A Gaussian random vector `N(mean, cov)`.
#[derive(Clone, Debug)]
pub struct Normal {
    mean: Mat<f64>,
    cov: Arc<dyn LinearOperator>,
}

impl Normal {
    pub fn new(mean: Mat<f64>, cov: Arc<dyn LinearOperator>) -> Result<Self, SolverError> {
        if cov.nrows() != mean.nrows() || cov.ncols() != mean.nrows() {
            return Err(dimension_mismatch("normal covariance", mean.nrows(), cov.nrows()));
        }
        Ok(Self { mean, cov })
    }

    pub fn mean(&self) -> MatRef<'_, f64> {
        self.mean.as_ref()
    }

    pub fn cov(&self) -> &Arc<dyn LinearOperator> {
        &self.cov
    }

    pub fn dim(&self) -> usize {
        self.mean.nrows()
    }
}

/// Belief over the right-hand side: known exactly, or Gaussian.
#[derive(Clone, Debug)]
pub enum RightHandSide {
    Constant(Mat<f64>),
    Normal(Normal),
}

impl RightHandSide {
    pub fn mean(&self) -> MatRef<'_, f64> {
        match self {
            RightHandSide::Constant(b) => b.as_ref(),
            RightHandSide::Normal(b) => b.mean(),
        }
    }
}

/// A Gaussian over symmetric `n × n` matrices with mean `M` and covariance `W ⊗ₛ W`.
///
/// Noisy posteriors carry a second symmetric Kronecker term: the total covariance is
/// then `W ⊗ₛ W + V ⊗ₛ V` with `V` returned by [`GaussianMatrixVariate::noise_cov`].
#[derive(Clone, Debug)]
pub struct GaussianMatrixVariate {
    mean: Arc<dyn LinearOperator>,
    cov: SymmetricKronecker,
    noise_cov: Option<SymmetricKronecker>,
}

impl GaussianMatrixVariate {
    pub fn new(
        mean: Arc<dyn LinearOperator>,
        cov_factor: Arc<dyn LinearOperator>,
    ) -> Result<Self, SolverError> {
        let n = mean.nrows();
        if mean.ncols() != n {
            return Err(dimension_mismatch("matrix-variate mean columns", n, mean.ncols()));
        }
        if cov_factor.nrows() != n || cov_factor.ncols() != n {
            return Err(dimension_mismatch(
                "matrix-variate covariance factor",
                n,
                cov_factor.nrows(),
            ));
        }
        Ok(Self {
            mean,
            cov: SymmetricKronecker::new(cov_factor),
            noise_cov: None,
        })
    }

    /// Adds the covariance term `V ⊗ₛ V`.
    pub fn with_noise_cov(mut self, factor: Arc<dyn LinearOperator>) -> Result<Self, SolverError> {
        if factor.nrows() != self.dim() || factor.ncols() != self.dim() {
            return Err(dimension_mismatch(
                "matrix-variate noise factor",
                self.dim(),
                factor.nrows(),
            ));
        }
        self.noise_cov = Some(SymmetricKronecker::new(factor));
        Ok(self)
    }

    pub fn mean(&self) -> &Arc<dyn LinearOperator> {
        &self.mean
    }

    pub fn cov(&self) -> &SymmetricKronecker {
        &self.cov
    }

    /// The covariance factor `W`.
    pub fn cov_factor(&self) -> &Arc<dyn LinearOperator> {
        self.cov.factor()
    }

    pub fn noise_cov(&self) -> Option<&SymmetricKronecker> {
        self.noise_cov.as_ref()
    }

    pub fn dim(&self) -> usize {
        self.mean.nrows()
    }
}
