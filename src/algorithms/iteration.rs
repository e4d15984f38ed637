use super::LinearSolverState;
use crate::{
    beliefs::LinearSystemBelief,
    error::{SolverError, SolverErrorKind},
    hyperparams::LinearSystemNoise,
    solvers::ProbabilisticLinearSolver,
};
use faer::Mat;
use std::iter::FusedIterator;

/// Name recorded when the residual of the current estimate is exactly zero.
pub const EXACT_SOLUTION: &str = "ExactSolution";

/// Data produced by one iteration of the solver.
#[derive(Clone, Debug)]
pub struct SolverStep {
    /// Number of completed iterations after this step.
    pub iteration: usize,
    pub action: Mat<f64>,
    pub observation: Mat<f64>,
    /// The belief after this step.
    pub belief: LinearSystemBelief,
}

/// A pull-based run of a [`ProbabilisticLinearSolver`].
///
/// Convergence is checked on creation and after every step; once the run has
/// converged, or a step has failed, no further steps are taken.
#[derive(Debug)]
pub struct SolveIterator<'s, 'p> {
    solver: &'s ProbabilisticLinearSolver,
    state: LinearSolverState<'p>,
    finished: bool,
}

impl<'s, 'p> SolveIterator<'s, 'p> {
    pub(crate) fn new(solver: &'s ProbabilisticLinearSolver, state: LinearSolverState<'p>) -> Self {
        let mut iter = Self {
            solver,
            finished: state.has_converged(),
            state,
        };
        if !iter.finished {
            iter.check_convergence();
        }
        iter
    }

    /// Whether another step will be attempted.
    pub fn has_next(&self) -> bool {
        !self.finished
    }

    /// Performs one iteration, returning `Ok(None)` once the run has finished.
    pub fn next_step(&mut self) -> Result<Option<SolverStep>, SolverError> {
        if self.finished {
            return Ok(None);
        }
        match self.step() {
            Ok(step) => {
                self.check_convergence();
                Ok(Some(step))
            }
            Err(err) => {
                log::warn!(
                    "Solver aborted after {} iterations: {err}",
                    self.state.iteration()
                );
                self.finished = true;
                Err(err)
            }
        }
    }

    pub fn state(&self) -> &LinearSolverState<'p> {
        &self.state
    }

    pub fn belief(&self) -> &LinearSystemBelief {
        self.state.belief()
    }

    pub fn into_state(self) -> LinearSolverState<'p> {
        self.state
    }

    /// Steps until the run has finished and returns the final state.
    pub fn run(mut self) -> Result<LinearSolverState<'p>, SolverError> {
        while self.next_step()?.is_some() {}
        Ok(self.state)
    }

    fn step(&mut self) -> Result<SolverStep, SolverError> {
        let solver = self.solver;
        let problem = self.state.problem();
        let belief = self.state.belief();

        let action = solver.policy.action(problem, belief, &self.state)?;
        let observation = solver.observation_op.observe(problem, action.as_ref())?;

        // The noise estimate only uses data from completed iterations.
        let noise = match &solver.noise_calibration {
            Some(calibration) => {
                let eps_sq = calibration
                    .optimize(
                        problem,
                        belief,
                        self.state.actions(),
                        self.state.observations(),
                        &self.state,
                    )
                    .map_err(|e| SolverErrorKind::Calibration(format!("{e:#}")))?;
                Some(LinearSystemNoise::scalar(eps_sq)?)
            }
            None => belief.noise().cloned(),
        };

        let output = solver.belief_update.update(
            problem,
            belief,
            action.as_ref(),
            observation.as_ref(),
            noise.as_ref(),
            &self.state,
        )?;
        let belief = output.belief.clone();
        self.state.commit(action.clone(), observation.clone(), output);

        let iteration = self.state.iteration();
        log::debug!(
            "Iteration {iteration}: residual norm {:.6e}, step size {:?}",
            self.state.residual().norm_l2(),
            self.state.step_sizes().last().copied().flatten()
        );

        Ok(SolverStep {
            iteration,
            action,
            observation,
            belief,
        })
    }

    fn check_convergence(&mut self) {
        let problem = self.state.problem();
        let residual = self.state.residual();
        let exact = (0..residual.ncols())
            .all(|j| (0..residual.nrows()).all(|i| residual[(i, j)] == 0.0));

        let fired = if exact {
            Some(EXACT_SOLUTION)
        } else {
            self.solver
                .stopping_criteria
                .iter()
                .find(|c| c.evaluate(problem, self.state.belief(), &self.state))
                .map(|c| c.name())
                .or_else(|| {
                    let cap = self.solver.max_iterations.unwrap_or(problem.dim());
                    (self.state.iteration() >= cap).then_some("MaxIterations")
                })
        };

        if let Some(name) = fired {
            log::info!(
                "Solver converged after {} iterations: {name} satisfied.",
                self.state.iteration()
            );
            self.state.mark_converged(name);
            self.finished = true;
        }
    }
}

impl Iterator for SolveIterator<'_, '_> {
    type Item = Result<SolverStep, SolverError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_step().transpose()
    }
}

impl FusedIterator for SolveIterator<'_, '_> {}
