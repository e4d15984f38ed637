//! Policies select the next action of a probabilistic linear solver.

use crate::{
    algorithms::LinearSolverState,
    beliefs::LinearSystemBelief,
    error::SolverError,
    linops::LinearOperator,
    problem::LinearSystem,
};
use faer::{Mat, Scale};
use std::fmt;

/// Maps the current belief to the next probing direction `s`.
pub trait Policy: Send + Sync + fmt::Debug {
    /// Returns an `n × 1` action.
    fn action(
        &self,
        problem: &LinearSystem,
        belief: &LinearSystemBelief,
        state: &LinearSolverState<'_>,
    ) -> Result<Mat<f64>, SolverError>;
}

/// Policy returning `s = -E[H] r` for the current residual `r = A x̄ - b`.
///
/// For `E[H₀] = I` the first action is the negative residual. Conjugacy of later
/// actions follows from the symmetric rank-2 updates of `E[H]`, so no explicit
/// re-orthogonalization is performed.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConjugateDirections;

impl Policy for ConjugateDirections {
    fn action(
        &self,
        _problem: &LinearSystem,
        belief: &LinearSystemBelief,
        state: &LinearSolverState<'_>,
    ) -> Result<Mat<f64>, SolverError> {
        let direction = belief.ainv().mean().apply(state.residual());
        Ok(&direction * Scale(-1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beliefs::WeakMeanCorrespondence;
    use faer::mat;

    #[test]
    fn test_first_action_is_negative_scaled_residual() {
        let a: Mat<f64> = mat![[2.0, 0.0], [0.0, 4.0]];
        let problem = LinearSystem::new(a, mat![[1.0], [1.0]]).unwrap();
        let prior = WeakMeanCorrespondence::from_scalar(2.0, &problem).unwrap();
        let state = LinearSolverState::new(&problem, prior.clone()).unwrap();
        // x₀ = b / 2, r₀ = A x₀ - b = (0, 1).
        let action = ConjugateDirections.action(&problem, &prior, &state).unwrap();
        let expected: Mat<f64> = mat![[0.0], [-0.5]];
        assert!((&action - &expected).norm_l2() < 1e-15);
    }
}
