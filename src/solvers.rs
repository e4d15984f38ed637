//! This module provides the high-level API for solving a linear system
//! probabilistically.
//!
//! A [`ProbabilisticLinearSolver`] is assembled from four strategy objects: a
//! [`Policy`] choosing actions, an [`ObservationOperator`] observing them, a
//! [`BeliefUpdate`] conditioning the belief on each observation and a list of
//! [`StoppingCriterion`]s. The strategies hold no per-run state, so one solver
//! can drive any number of independent solves.

use crate::{
    algorithms::{LinearSolverState, SolveIterator},
    belief_updates::{BeliefUpdate, SymmetricNormalLinearObs, WeakMeanCorrLinearObs},
    beliefs::LinearSystemBelief,
    calibration::NoiseCalibration,
    error::SolverError,
    observation_ops::{MatVecObservation, ObservationOperator},
    policies::{ConjugateDirections, Policy},
    problem::LinearSystem,
    stopping_criteria::{MaxIterations, ResidualNorm, StoppingCriterion},
};

/// An iterative solver maintaining a Gaussian belief over the solution, the
/// system matrix and its inverse.
///
/// Each iteration selects an action `s`, observes `y = As`, updates the belief and
/// evaluates the stopping criteria in order. Independently of the criteria, a run
/// never exceeds the hard iteration cap, which defaults to the system dimension.
#[derive(Debug)]
pub struct ProbabilisticLinearSolver {
    pub(crate) policy: Box<dyn Policy>,
    pub(crate) observation_op: Box<dyn ObservationOperator>,
    pub(crate) belief_update: BeliefUpdate,
    pub(crate) stopping_criteria: Vec<Box<dyn StoppingCriterion>>,
    pub(crate) noise_calibration: Option<Box<dyn NoiseCalibration>>,
    pub(crate) max_iterations: Option<usize>,
}

impl ProbabilisticLinearSolver {
    /// Creates a solver stopping on [`MaxIterations`] or the default [`ResidualNorm`].
    pub fn new(
        policy: impl Policy + 'static,
        observation_op: impl ObservationOperator + 'static,
        belief_update: impl Into<BeliefUpdate>,
    ) -> Self {
        Self {
            policy: Box::new(policy),
            observation_op: Box::new(observation_op),
            belief_update: belief_update.into(),
            stopping_criteria: vec![
                Box::new(MaxIterations::default()),
                Box::new(ResidualNorm::default()),
            ],
            noise_calibration: None,
            max_iterations: None,
        }
    }

    /// Probabilistic conjugate gradients: weak-mean-correspondence beliefs updated
    /// along conjugate directions. Its solution means are the CG iterates.
    pub fn conjugate_gradient() -> Self {
        Self::new(
            ConjugateDirections,
            MatVecObservation,
            WeakMeanCorrLinearObs::new(),
        )
    }

    /// Bayesian conjugate gradients with symmetric-normal beliefs.
    pub fn bayes_cg() -> Self {
        Self::new(
            ConjugateDirections,
            MatVecObservation,
            SymmetricNormalLinearObs::new(),
        )
    }

    /// Replaces the stopping criteria.
    pub fn with_stopping_criteria(mut self, criteria: Vec<Box<dyn StoppingCriterion>>) -> Self {
        self.stopping_criteria = criteria;
        self
    }

    /// Appends a stopping criterion, evaluated after the existing ones.
    pub fn with_stopping_criterion(mut self, criterion: impl StoppingCriterion + 'static) -> Self {
        self.stopping_criteria.push(Box::new(criterion));
        self
    }

    /// Sets the hard iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Estimates the observation-noise variance before every update.
    pub fn with_noise_calibration(mut self, calibration: impl NoiseCalibration + 'static) -> Self {
        self.noise_calibration = Some(Box::new(calibration));
        self
    }

    pub fn belief_update(&self) -> &BeliefUpdate {
        &self.belief_update
    }

    pub fn stopping_criteria(&self) -> &[Box<dyn StoppingCriterion>] {
        &self.stopping_criteria
    }

    /// Solves `problem` starting from the default prior of the belief update.
    ///
    /// # Returns
    /// The final belief and the state of the run.
    pub fn solve<'p>(
        &self,
        problem: &'p LinearSystem,
    ) -> Result<(LinearSystemBelief, LinearSolverState<'p>), SolverError> {
        let prior = self.belief_update.default_prior(problem)?;
        self.solve_with_prior(problem, prior)
    }

    /// Solves `problem` starting from `prior`.
    pub fn solve_with_prior<'p>(
        &self,
        problem: &'p LinearSystem,
        prior: LinearSystemBelief,
    ) -> Result<(LinearSystemBelief, LinearSolverState<'p>), SolverError> {
        let state = self.solve_iterator(problem, prior)?.run()?;
        Ok((state.belief().clone(), state))
    }

    /// Returns an iterator performing one solver iteration per step.
    pub fn solve_iterator<'s, 'p>(
        &'s self,
        problem: &'p LinearSystem,
        prior: LinearSystemBelief,
    ) -> Result<SolveIterator<'s, 'p>, SolverError> {
        let state = LinearSolverState::new(problem, prior)?;
        Ok(SolveIterator::new(self, state))
    }

    /// Resumes a run from a previously obtained state.
    pub fn resume<'s, 'p>(&'s self, state: LinearSolverState<'p>) -> SolveIterator<'s, 'p> {
        SolveIterator::new(self, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        algorithms::EXACT_SOLUTION,
        linops::LinearOperator,
        stopping_criteria::{Custom, NormOrder},
    };
    use faer::{Mat, mat};

    fn problem() -> LinearSystem {
        let a: Mat<f64> = mat![
            [4.0, 1.0, 0.0, 0.0],
            [1.0, 3.0, 1.0, 0.0],
            [0.0, 1.0, 2.0, 0.5],
            [0.0, 0.0, 0.5, 1.0]
        ];
        LinearSystem::new(a, mat![[1.0], [2.0], [3.0], [4.0]]).unwrap()
    }

    #[test]
    fn test_both_presets_solve_within_dimension() {
        let problem = problem();
        for solver in [
            ProbabilisticLinearSolver::conjugate_gradient(),
            ProbabilisticLinearSolver::bayes_cg(),
        ] {
            let tight = ResidualNorm::new(NormOrder::P(2.0), 1e-10, 0.0).unwrap();
            let solver = solver.with_stopping_criteria(vec![Box::new(tight)]);
            let (belief, state) = solver.solve(&problem).unwrap();
            assert!(state.has_converged());
            assert!(state.iteration() <= problem.dim());
            let residual = problem.residual(belief.x().mean());
            assert!(residual.norm_l2() < 1e-8, "residual {}", residual.norm_l2());
        }
    }

    #[test]
    fn test_iterator_is_fused_after_convergence() {
        let problem = problem();
        let solver = ProbabilisticLinearSolver::conjugate_gradient().with_stopping_criteria(vec![
            Box::new(Custom::new("TwoSteps", |_, _, state| state.iteration() >= 2)),
        ]);
        let prior = solver.belief_update().default_prior(&problem).unwrap();
        let mut iter = solver.solve_iterator(&problem, prior).unwrap();
        assert!(iter.has_next());
        assert_eq!(iter.by_ref().count(), 2);
        assert!(!iter.has_next());
        assert!(iter.next().is_none());
        assert_eq!(iter.state().stopping_criterion(), Some("TwoSteps"));
        assert_eq!(iter.state().actions().len(), 2);
    }

    #[test]
    fn test_zero_rhs_stops_before_first_iteration() {
        let a: Mat<f64> = mat![[2.0, 0.0], [0.0, 5.0]];
        let problem = LinearSystem::new(a, Mat::zeros(2, 1)).unwrap();
        let (belief, state) = ProbabilisticLinearSolver::bayes_cg().solve(&problem).unwrap();
        assert_eq!(state.iteration(), 0);
        assert_eq!(state.stopping_criterion(), Some(EXACT_SOLUTION));
        assert_eq!(belief.x().mean().to_owned(), Mat::<f64>::zeros(2, 1));
        assert!(belief.x().cov().trace() <= 4.0 * f64::EPSILON);
    }

    #[test]
    fn test_hard_cap_applies_without_criteria() {
        let problem = problem();
        let solver = ProbabilisticLinearSolver::bayes_cg()
            .with_stopping_criteria(Vec::new())
            .with_max_iterations(1);
        let (_, state) = solver.solve(&problem).unwrap();
        assert_eq!(state.iteration(), 1);
        assert_eq!(state.stopping_criterion(), Some("MaxIterations"));
    }
}
