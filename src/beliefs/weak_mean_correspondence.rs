use super::{
    BeliefKind, LinearSystemBelief, SolutionMeans, induced_solution, means_from_solution,
    symmetric_normal::{check_square, zero_solution_belief},
};
use crate::{
    error::{SolverError, SolverErrorKind, dimension_mismatch, input_error},
    hyperparams::UncertaintyScales,
    linops::{
        InvertibleOperator, LinearCombination, LinearOperator, LowRank, OrthogonalProjection,
        ScalarMult, dense_solve, identity,
    },
    problem::LinearSystem,
    random_variables::{GaussianMatrixVariate, RightHandSide},
};
use faer::{Mat, MatRef};
use std::sync::Arc;

/// Inner products `SᵗY` of the actions and observations.
#[derive(Clone, Debug)]
pub enum ActionObservationInnerProducts {
    /// Pairwise `A`-conjugate actions: only the diagonal `sᵢᵗyᵢ` is non-zero.
    Conjugate(Vec<f64>),
    /// The full `k × k` matrix `SᵗY`.
    Full(Mat<f64>),
}

/// Weak-mean-correspondence prior for the matrix and inverse models.
///
/// Given actions `S` and observations `Y = AS`, the covariance factors are
///
/// W_A = Y (SᵗY)⁻¹ Yᵗ + Φ (I - P_S),
/// W_H = H₀ Y (YᵗH₀Y)⁻¹ YᵗH₀ + Ψ (I - P_Y),
///
/// so that the posterior means of `A` and `H = A⁻¹` remain inverses of each other
/// on the span of the observations. Before any action is taken the factors are
/// `Φ·I` and `Ψ·I`. When the actions are conjugate the inner products are
/// diagonal and no `k × k` system has to be solved.
#[derive(Clone, Debug)]
pub struct WeakMeanCorrespondence {
    a0: Arc<dyn LinearOperator>,
    ainv0: Arc<dyn LinearOperator>,
    scales: UncertaintyScales,
    actions: Mat<f64>,
    observations: Mat<f64>,
    innerprods: ActionObservationInnerProducts,
}

impl WeakMeanCorrespondence {
    /// Prior with means `A₀`, `H₀` and no data.
    pub fn new(
        a0: Arc<dyn LinearOperator>,
        ainv0: Arc<dyn LinearOperator>,
        scales: UncertaintyScales,
    ) -> Result<Self, SolverError> {
        let n = a0.nrows();
        if a0.ncols() != n {
            return Err(dimension_mismatch("prior matrix mean columns", n, a0.ncols()));
        }
        if ainv0.nrows() != n || ainv0.ncols() != n {
            return Err(dimension_mismatch("prior inverse mean", n, ainv0.nrows()));
        }
        let scales = UncertaintyScales::new(scales.phi, scales.psi)?;
        Ok(Self {
            a0,
            ainv0,
            scales,
            actions: Mat::zeros(n, 0),
            observations: Mat::zeros(n, 0),
            innerprods: ActionObservationInnerProducts::Conjugate(Vec::new()),
        })
    }

    /// Replaces the data the covariance factors are conditioned on.
    ///
    /// `actions` and `observations` are `n × k`, one column per iteration. If no
    /// inner products are given the full matrix `SᵗY` is formed.
    pub fn with_data(
        mut self,
        actions: Mat<f64>,
        observations: Mat<f64>,
        innerprods: Option<ActionObservationInnerProducts>,
    ) -> Result<Self, SolverError> {
        let n = self.dim();
        if actions.nrows() != n {
            return Err(dimension_mismatch("action rows", n, actions.nrows()));
        }
        if observations.nrows() != n {
            return Err(dimension_mismatch("observation rows", n, observations.nrows()));
        }
        if observations.ncols() != actions.ncols() {
            return Err(dimension_mismatch(
                "number of observations",
                actions.ncols(),
                observations.ncols(),
            ));
        }
        let k = actions.ncols();
        let innerprods = match innerprods {
            None => ActionObservationInnerProducts::Full(actions.transpose() * observations.as_ref()),
            Some(ActionObservationInnerProducts::Conjugate(d)) if d.len() != k => {
                return Err(dimension_mismatch("action-observation inner products", k, d.len()));
            }
            Some(ActionObservationInnerProducts::Full(g)) if g.nrows() != k || g.ncols() != k => {
                return Err(dimension_mismatch("action-observation inner products", k, g.nrows()));
            }
            Some(innerprods) => innerprods,
        };
        self.actions = actions;
        self.observations = observations;
        self.innerprods = innerprods;
        Ok(self)
    }

    /// Replaces the uncertainty scales.
    pub fn with_scales(mut self, scales: UncertaintyScales) -> Result<Self, SolverError> {
        self.scales = UncertaintyScales::new(scales.phi, scales.psi)?;
        Ok(self)
    }

    /// Builds the belief `A ~ N(A₀, W_A ⊗ₛ W_A)`, `H ~ N(H₀, W_H ⊗ₛ W_H)` with the
    /// solution belief induced from `H` and `b`.
    pub fn into_belief(self, problem: &LinearSystem) -> Result<LinearSystemBelief, SolverError> {
        check_square("prior matrix mean", &*self.a0, problem)?;
        let a = GaussianMatrixVariate::new(self.a0.clone(), self.cov_factor_matrix()?)?;
        let ainv = GaussianMatrixVariate::new(self.ainv0.clone(), self.cov_factor_inverse()?)?;
        let b = RightHandSide::Constant(problem.b().to_owned());
        let x = induced_solution(&ainv, &b)?;
        Ok(LinearSystemBelief::new(Some(x), a, ainv, b)?
            .with_kind(BeliefKind::WeakMeanCorrespondence(self)))
    }

    /// Scalar prior `A₀ = αI`, `H₀ = α⁻¹I`.
    pub fn from_scalar(alpha: f64, problem: &LinearSystem) -> Result<LinearSystemBelief, SolverError> {
        if !(alpha.is_finite() && alpha > 0.0) {
            return Err(input_error(format!(
                "Scalar alpha must be finite and positive, got {alpha}"
            )));
        }
        let n = problem.dim();
        Self::new(
            Arc::new(ScalarMult::new(n, alpha)),
            Arc::new(ScalarMult::new(n, 1.0 / alpha)),
            UncertaintyScales::default(),
        )?
        .into_belief(problem)
    }

    /// Prior with both means given.
    pub fn from_matrices(
        a0: impl LinearOperator + 'static,
        ainv0: impl LinearOperator + 'static,
        problem: &LinearSystem,
    ) -> Result<LinearSystemBelief, SolverError> {
        Self::new(Arc::new(a0), Arc::new(ainv0), UncertaintyScales::default())?
            .into_belief(problem)
    }

    /// Prior from an approximate inverse, with `A₀ = H₀⁻¹`.
    pub fn from_inverse(
        ainv0: impl InvertibleOperator + 'static,
        problem: &LinearSystem,
    ) -> Result<LinearSystemBelief, SolverError> {
        check_square("prior inverse mean", &ainv0, problem)?;
        let a0 = ainv0.inverse()?;
        Self::new(a0, Arc::new(ainv0), UncertaintyScales::default())?.into_belief(problem)
    }

    /// Prior from an approximate system matrix, with `H₀ = A₀⁻¹`.
    pub fn from_matrix(
        a0: impl InvertibleOperator + 'static,
        problem: &LinearSystem,
    ) -> Result<LinearSystemBelief, SolverError> {
        check_square("prior matrix mean", &a0, problem)?;
        let ainv0 = a0.inverse()?;
        Self::new(Arc::new(a0), ainv0, UncertaintyScales::default())?.into_belief(problem)
    }

    /// Prior whose means map `b` onto the initial guess `x0`.
    ///
    /// For `b = 0` the solution belief is the exact zero vector with covariance `ε·I`.
    pub fn from_solution(
        x0: Mat<f64>,
        problem: &LinearSystem,
    ) -> Result<LinearSystemBelief, SolverError> {
        match means_from_solution(x0, problem)? {
            SolutionMeans::Zero => {
                let n = problem.dim();
                let eye: Arc<dyn LinearOperator> = Arc::new(identity(n));
                let wmc = Self::new(eye.clone(), eye, UncertaintyScales::default())?;
                Ok(zero_solution_belief(problem)?
                    .with_kind(BeliefKind::WeakMeanCorrespondence(wmc)))
            }
            SolutionMeans::Means { a0, ainv0 } => {
                Self::new(a0, ainv0, UncertaintyScales::default())?.into_belief(problem)
            }
        }
    }

    /// The covariance factor `W_A` of the matrix model.
    pub fn cov_factor_matrix(&self) -> Result<Arc<dyn LinearOperator>, SolverError> {
        let n = self.dim();
        let phi = self.scales.phi;
        if self.num_actions() == 0 {
            return Ok(Arc::new(ScalarMult::new(n, phi)));
        }
        let action_space: Arc<dyn LinearOperator> = Arc::new(self.action_space_op()?);
        let proj = OrthogonalProjection::new(self.actions.clone(), None)?;
        Ok(Arc::new(
            LinearCombination::new(n)
                .with_term(1.0, action_space)
                .with_term(phi, Arc::new(identity(n)))
                .with_term(-phi, Arc::new(proj)),
        ))
    }

    /// The covariance factor `W_H` of the inverse model.
    pub fn cov_factor_inverse(&self) -> Result<Arc<dyn LinearOperator>, SolverError> {
        let n = self.dim();
        let psi = self.scales.psi;
        if self.num_actions() == 0 {
            return Ok(Arc::new(ScalarMult::new(n, psi)));
        }
        let proj: Arc<dyn LinearOperator> =
            Arc::new(OrthogonalProjection::new(self.observations.clone(), None)?);
        let observation_space = match self.ainv0.as_scalar() {
            // H₀ = hI reduces H₀Y(YᵗH₀Y)⁻¹YᵗH₀ to h·P_Y.
            Some(h) => LinearCombination::new(n).with_term(h, proj.clone()),
            None => {
                let h0y = self.ainv0.apply(self.observations.as_ref());
                let gram = self.observations.transpose() * h0y.as_ref();
                let coeffs = dense_solve(gram.as_ref(), h0y.transpose()).ok_or_else(|| {
                    SolverErrorKind::NonInvertible {
                        operator: "observation Gram matrix YᵗH₀Y",
                        reason: format!("singular for {} observations", self.num_actions()),
                    }
                })?;
                let low_rank = LowRank::new(h0y, coeffs.transpose().to_owned());
                LinearCombination::new(n).with_term(1.0, Arc::new(low_rank))
            }
        };
        Ok(Arc::new(
            observation_space
                .with_term(psi, Arc::new(identity(n)))
                .with_term(-psi, proj),
        ))
    }

    /// Posterior covariance factor `Φ (I - P_S)` of the matrix model after
    /// conditioning this prior on its own data.
    pub fn posterior_cov_factor_matrix(&self) -> Result<Arc<dyn LinearOperator>, SolverError> {
        scaled_complement(self.actions.as_ref(), self.scales.phi)
    }

    /// Posterior covariance factor `Ψ (I - P_Y)` of the inverse model.
    pub fn posterior_cov_factor_inverse(&self) -> Result<Arc<dyn LinearOperator>, SolverError> {
        scaled_complement(self.observations.as_ref(), self.scales.psi)
    }

    // Y (SᵗY)⁻¹ Yᵗ as an outer-product sum.
    fn action_space_op(&self) -> Result<LowRank, SolverError> {
        let y = &self.observations;
        match &self.innerprods {
            ActionObservationInnerProducts::Conjugate(d) => {
                let invalid = d.iter().enumerate().find(|(_, v)| **v == 0.0 || !v.is_finite());
                if let Some((i, &value)) = invalid {
                    return Err(SolverErrorKind::NonInvertible {
                        operator: "action-observation inner products",
                        reason: format!("entry {i} is {value}"),
                    }
                    .into());
                }
                let scaled = Mat::from_fn(y.nrows(), y.ncols(), |i, j| y[(i, j)] / d[j]);
                Ok(LowRank::new(scaled, y.clone()))
            }
            ActionObservationInnerProducts::Full(gram) => {
                let coeffs = dense_solve(gram.as_ref(), y.transpose()).ok_or_else(|| {
                    SolverErrorKind::NonInvertible {
                        operator: "action-observation inner products",
                        reason: format!("SᵗY is singular for {} actions", self.num_actions()),
                    }
                })?;
                Ok(LowRank::new(y.clone(), coeffs.transpose().to_owned()))
            }
        }
    }

    pub fn a0(&self) -> &Arc<dyn LinearOperator> {
        &self.a0
    }

    pub fn ainv0(&self) -> &Arc<dyn LinearOperator> {
        &self.ainv0
    }

    pub fn scales(&self) -> UncertaintyScales {
        self.scales
    }

    pub fn actions(&self) -> MatRef<'_, f64> {
        self.actions.as_ref()
    }

    pub fn observations(&self) -> MatRef<'_, f64> {
        self.observations.as_ref()
    }

    pub fn innerprods(&self) -> &ActionObservationInnerProducts {
        &self.innerprods
    }

    pub fn num_actions(&self) -> usize {
        self.actions.ncols()
    }

    pub fn dim(&self) -> usize {
        self.a0.nrows()
    }
}

fn scaled_complement(basis: MatRef<'_, f64>, scale: f64) -> Result<Arc<dyn LinearOperator>, SolverError> {
    let n = basis.nrows();
    if basis.ncols() == 0 {
        return Ok(Arc::new(ScalarMult::new(n, scale)));
    }
    let proj = OrthogonalProjection::new(basis.to_owned(), None)?;
    Ok(Arc::new(
        LinearCombination::new(n)
            .with_term(scale, Arc::new(identity(n)))
            .with_term(-scale, Arc::new(proj)),
    ))
}
