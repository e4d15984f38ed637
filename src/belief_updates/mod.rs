//! Conditioning a linear-system belief on a new action-observation pair.
//!
//! An update consumes the current belief, the action `s` and the observation
//! `y = As`, and produces the posterior belief together with a
//! [`LinearSolverCache`] of the quantities the next update builds on.
//!
//! The available updates form the closed set [`BeliefUpdate`]:
//! - [`SymmetricNormalLinearObs`]: rank-2 updates of both matrix means and rank-1
//!   downdates of both covariance factors, optionally under scalar observation noise.
//! - [`WeakMeanCorrLinearObs`]: the same mean updates for weak-mean-correspondence
//!   beliefs, whose posterior factors are available in closed form.

mod cache;
mod symmetric_normal;
mod weak_mean_correspondence;

pub use cache::LinearSolverCache;
pub use symmetric_normal::SymmetricNormalLinearObs;
pub use weak_mean_correspondence::WeakMeanCorrLinearObs;

pub(crate) use cache::CachePrior;

use crate::{
    algorithms::LinearSolverState,
    beliefs::{LinearSystemBelief, SymmetricNormal, WeakMeanCorrespondence},
    error::{SolverError, dimension_mismatch, not_implemented},
    hyperparams::LinearSystemNoise,
    linops::{LinearCombination, LinearOperator, LowRank},
    problem::LinearSystem,
    random_variables::RightHandSide,
};
use faer::{Mat, MatRef};
use std::sync::Arc;

/// Result of one belief update.
#[derive(Clone, Debug)]
pub struct BeliefUpdateOutput {
    pub belief: LinearSystemBelief,
    pub cache: LinearSolverCache,
    /// A replacement for the prior of the run, for updates that re-derive the
    /// prior from the collected data.
    pub prior: Option<LinearSystemBelief>,
}

/// The belief update a solver applies in every iteration.
#[derive(Clone, Debug)]
pub enum BeliefUpdate {
    SymmetricNormal(SymmetricNormalLinearObs),
    WeakMeanCorrespondence(WeakMeanCorrLinearObs),
}

impl BeliefUpdate {
    /// Conditions `belief` on `A s = y`.
    ///
    /// `noise` is the scalar noise model of the observations, if any.
    pub fn update(
        &self,
        problem: &LinearSystem,
        belief: &LinearSystemBelief,
        action: MatRef<'_, f64>,
        observation: MatRef<'_, f64>,
        noise: Option<&LinearSystemNoise>,
        state: &LinearSolverState<'_>,
    ) -> Result<BeliefUpdateOutput, SolverError> {
        check_update_inputs(problem, belief, action, observation)?;
        match self {
            BeliefUpdate::SymmetricNormal(update) => {
                update.update(problem, belief, action, observation, noise, state)
            }
            BeliefUpdate::WeakMeanCorrespondence(update) => {
                update.update(problem, belief, action, observation, noise, state)
            }
        }
    }

    /// Prior used when a solve is started without one.
    ///
    /// The symmetric-normal update starts from [`SymmetricNormal::from_solution`]
    /// with a zero initial guess. The weak-mean-correspondence update starts from the
    /// scalar prior `A₀ = H₀ = I`, or from the exact zero solution when `b = 0`.
    pub fn default_prior(&self, problem: &LinearSystem) -> Result<LinearSystemBelief, SolverError> {
        let x0 = Mat::zeros(problem.dim(), 1);
        match self {
            BeliefUpdate::SymmetricNormal(_) => SymmetricNormal::from_solution(x0, problem),
            BeliefUpdate::WeakMeanCorrespondence(_) => {
                let b = problem.b();
                if b.ncols() == 1 && b.norm_l2() == 0.0 {
                    WeakMeanCorrespondence::from_solution(x0, problem)
                } else {
                    WeakMeanCorrespondence::from_scalar(1.0, problem)
                }
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BeliefUpdate::SymmetricNormal(_) => "SymmetricNormalLinearObs",
            BeliefUpdate::WeakMeanCorrespondence(_) => "WeakMeanCorrLinearObs",
        }
    }
}

impl From<SymmetricNormalLinearObs> for BeliefUpdate {
    fn from(update: SymmetricNormalLinearObs) -> Self {
        BeliefUpdate::SymmetricNormal(update)
    }
}

impl From<WeakMeanCorrLinearObs> for BeliefUpdate {
    fn from(update: WeakMeanCorrLinearObs) -> Self {
        BeliefUpdate::WeakMeanCorrespondence(update)
    }
}

fn check_update_inputs(
    problem: &LinearSystem,
    belief: &LinearSystemBelief,
    action: MatRef<'_, f64>,
    observation: MatRef<'_, f64>,
) -> Result<(), SolverError> {
    let n = problem.dim();
    if belief.dim() != n {
        return Err(dimension_mismatch("belief dimension", n, belief.dim()));
    }
    if action.nrows() != n || action.ncols() != 1 {
        return Err(dimension_mismatch("action rows", n, action.nrows()));
    }
    if observation.nrows() != n || observation.ncols() != 1 {
        return Err(dimension_mismatch("observation rows", n, observation.nrows()));
    }
    if problem.b().ncols() != 1 {
        return Err(not_implemented(format!(
            "belief updates for {} right-hand sides",
            problem.b().ncols()
        )));
    }
    if matches!(belief.b(), RightHandSide::Normal(_)) {
        return Err(not_implemented(
            "belief update with an uncertain right-hand side",
        ));
    }
    Ok(())
}

/// `M₀ + c · batch` as an operator.
pub(crate) fn with_batch(
    base: &Arc<dyn LinearOperator>,
    batch: &LowRank,
    coeff: f64,
) -> Arc<dyn LinearOperator> {
    if batch.rank() == 0 {
        return base.clone();
    }
    Arc::new(
        LinearCombination::new(base.nrows())
            .with_term(1.0, base.clone())
            .with_term(coeff, Arc::new(batch.clone())),
    )
}
