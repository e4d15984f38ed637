//! Mutable record of a probabilistic linear solver run.

use crate::{
    belief_updates::{BeliefUpdateOutput, LinearSolverCache},
    beliefs::LinearSystemBelief,
    error::{SolverError, dimension_mismatch},
    problem::LinearSystem,
};
use faer::{Mat, MatRef};

/// State of the solver after some number of iterations.
///
/// Holds the problem (borrowed for the lifetime of the run), the prior and the
/// current belief, the history of actions and observations and the cache of the
/// last belief update. The residual is always `A x̄ - b` for the current mean
/// `x̄` of the solution belief.
#[derive(Clone, Debug)]
pub struct LinearSolverState<'p> {
    problem: &'p LinearSystem,
    prior: LinearSystemBelief,
    belief: LinearSystemBelief,
    actions: Vec<Mat<f64>>,
    observations: Vec<Mat<f64>>,
    iteration: usize,
    residual: Mat<f64>,
    step_sizes: Vec<Option<f64>>,
    has_converged: bool,
    stopping_criterion: Option<&'static str>,
    cache: Option<LinearSolverCache>,
}

impl<'p> LinearSolverState<'p> {
    /// Initial state: the belief is the prior and no data has been collected.
    pub fn new(problem: &'p LinearSystem, prior: LinearSystemBelief) -> Result<Self, SolverError> {
        if prior.dim() != problem.dim() {
            return Err(dimension_mismatch(
                "prior dimension",
                problem.dim(),
                prior.dim(),
            ));
        }
        let residual = problem.residual(prior.x().mean());
        Ok(Self {
            problem,
            belief: prior.clone(),
            prior,
            actions: Vec::new(),
            observations: Vec::new(),
            iteration: 0,
            residual,
            step_sizes: Vec::new(),
            has_converged: false,
            stopping_criterion: None,
            cache: None,
        })
    }

    /// Records one iteration: the action-observation pair and the updated belief.
    ///
    /// If the update re-derived the prior from the collected data (as the
    /// weak-mean-correspondence update does), the stored prior is replaced too.
    pub(crate) fn commit(
        &mut self,
        action: Mat<f64>,
        observation: Mat<f64>,
        output: BeliefUpdateOutput,
    ) {
        let BeliefUpdateOutput {
            belief,
            cache,
            prior,
        } = output;
        self.actions.push(action);
        self.observations.push(observation);
        self.iteration += 1;
        self.residual = cache.residual.clone();
        self.step_sizes.push(cache.step_size);
        self.belief = belief;
        if let Some(prior) = prior {
            self.prior = prior;
        }
        self.cache = Some(cache);
    }

    pub(crate) fn mark_converged(&mut self, criterion: &'static str) {
        self.has_converged = true;
        self.stopping_criterion = Some(criterion);
    }

    pub fn problem(&self) -> &'p LinearSystem {
        self.problem
    }

    /// Prior the current belief is expressed against.
    pub fn prior(&self) -> &LinearSystemBelief {
        &self.prior
    }

    pub fn belief(&self) -> &LinearSystemBelief {
        &self.belief
    }

    /// Consumes the state, returning the current belief.
    pub fn into_belief(self) -> LinearSystemBelief {
        self.belief
    }

    pub fn actions(&self) -> &[Mat<f64>] {
        &self.actions
    }

    pub fn observations(&self) -> &[Mat<f64>] {
        &self.observations
    }

    /// Number of completed iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Residual `A x̄ - b` of the current solution estimate.
    pub fn residual(&self) -> MatRef<'_, f64> {
        self.residual.as_ref()
    }

    /// Step sizes of all iterations so far; `None` where the update was noisy.
    pub fn step_sizes(&self) -> &[Option<f64>] {
        &self.step_sizes
    }

    /// `ln(sᵢᵗAsᵢ / sᵢᵗsᵢ)` for every iteration.
    pub fn log_rayleigh_quotients(&self) -> &[f64] {
        match &self.cache {
            Some(cache) => &cache.log_rayleigh_quotients,
            None => &[],
        }
    }

    pub fn has_converged(&self) -> bool {
        self.has_converged
    }

    /// Name of the stopping criterion that ended the run.
    pub fn stopping_criterion(&self) -> Option<&'static str> {
        self.stopping_criterion
    }

    /// Cache of the last belief update.
    pub fn cache(&self) -> Option<&LinearSolverCache> {
        self.cache.as_ref()
    }
}
