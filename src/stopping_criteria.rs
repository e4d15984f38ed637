//! Stopping criteria of probabilistic linear solvers.
//!
//! The solver evaluates its criteria in order after every iteration and stops on
//! the first that holds, recording its [`StoppingCriterion::name`].

use crate::{
    algorithms::LinearSolverState,
    beliefs::LinearSystemBelief,
    error::{SolverError, input_error},
    linops::LinearOperator,
    problem::LinearSystem,
};
use faer::MatRef;
use std::{fmt, sync::Arc};

pub trait StoppingCriterion: Send + Sync + fmt::Debug {
    /// Name recorded in the solver state when this criterion ends a run.
    fn name(&self) -> &'static str;

    fn evaluate(
        &self,
        problem: &LinearSystem,
        belief: &LinearSystemBelief,
        state: &LinearSolverState<'_>,
    ) -> bool;
}

/// Stops once `maxiter` iterations have been performed, by default the system dimension.
#[derive(Clone, Copy, Debug, Default)]
pub struct MaxIterations {
    pub maxiter: Option<usize>,
}

impl MaxIterations {
    pub fn new(maxiter: usize) -> Self {
        Self {
            maxiter: Some(maxiter),
        }
    }
}

impl StoppingCriterion for MaxIterations {
    fn name(&self) -> &'static str {
        "MaxIterations"
    }

    fn evaluate(
        &self,
        problem: &LinearSystem,
        _belief: &LinearSystemBelief,
        state: &LinearSolverState<'_>,
    ) -> bool {
        state.iteration() >= self.maxiter.unwrap_or(problem.dim())
    }
}

/// Order of a vector norm.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NormOrder {
    /// `max |xᵢ|`.
    Inf,
    /// `min |xᵢ|`.
    NegInf,
    /// `(Σ |xᵢ|ᵖ)^(1/p)`; `P(0.0)` counts the non-zero entries.
    P(f64),
}

impl Default for NormOrder {
    fn default() -> Self {
        NormOrder::P(2.0)
    }
}

/// Norm of the entries of `x` of the given order. Returns zero for an empty `x`.
pub fn vector_norm(x: MatRef<'_, f64>, ord: NormOrder) -> f64 {
    if x.nrows() * x.ncols() == 0 {
        return 0.0;
    }
    let entries = (0..x.ncols()).flat_map(move |j| (0..x.nrows()).map(move |i| x[(i, j)].abs()));
    match ord {
        NormOrder::Inf => entries.fold(0.0, f64::max),
        NormOrder::NegInf => entries.fold(f64::INFINITY, f64::min),
        NormOrder::P(p) if p == 0.0 => entries.filter(|v| *v != 0.0).count() as f64,
        NormOrder::P(p) if p == 1.0 => entries.sum(),
        NormOrder::P(p) if p == 2.0 => entries.map(|v| v * v).sum::<f64>().sqrt(),
        NormOrder::P(p) => entries.map(|v| v.powf(p)).sum::<f64>().powf(1.0 / p),
    }
}

/// Stops once `‖r‖ ≤ atol + rtol · ‖b‖`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResidualNorm {
    norm_ord: NormOrder,
    atol: f64,
    rtol: f64,
}

impl ResidualNorm {
    pub fn new(norm_ord: NormOrder, atol: f64, rtol: f64) -> Result<Self, SolverError> {
        validate_tolerances(atol, rtol)?;
        Ok(Self {
            norm_ord,
            atol,
            rtol,
        })
    }

    pub fn tolerance(&self, problem: &LinearSystem) -> f64 {
        self.atol + self.rtol * vector_norm(problem.b(), self.norm_ord)
    }
}

impl Default for ResidualNorm {
    fn default() -> Self {
        Self {
            norm_ord: NormOrder::default(),
            atol: 1e-5,
            rtol: 1e-5,
        }
    }
}

impl StoppingCriterion for ResidualNorm {
    fn name(&self) -> &'static str {
        "ResidualNorm"
    }

    fn evaluate(
        &self,
        problem: &LinearSystem,
        _belief: &LinearSystemBelief,
        state: &LinearSolverState<'_>,
    ) -> bool {
        vector_norm(state.residual(), self.norm_ord) <= self.tolerance(problem)
    }
}

/// Stops once the solution belief has contracted:
/// `sqrt(|tr Cov(x)|) ≤ max(atol, rtol · ‖b‖₂)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PosteriorContraction {
    atol: f64,
    rtol: f64,
}

impl PosteriorContraction {
    pub fn new(atol: f64, rtol: f64) -> Result<Self, SolverError> {
        validate_tolerances(atol, rtol)?;
        Ok(Self { atol, rtol })
    }
}

impl Default for PosteriorContraction {
    fn default() -> Self {
        Self {
            atol: 1e-5,
            rtol: 1e-5,
        }
    }
}

impl StoppingCriterion for PosteriorContraction {
    fn name(&self) -> &'static str {
        "PosteriorContraction"
    }

    fn evaluate(
        &self,
        problem: &LinearSystem,
        belief: &LinearSystemBelief,
        _state: &LinearSolverState<'_>,
    ) -> bool {
        let spread = belief.x().cov().trace().abs().sqrt();
        spread <= self.atol.max(self.rtol * problem.b().norm_l2())
    }
}

type Predicate =
    dyn Fn(&LinearSystem, &LinearSystemBelief, &LinearSolverState<'_>) -> bool + Send + Sync;

/// A stopping criterion defined by an arbitrary predicate.
#[derive(Clone)]
pub struct Custom {
    name: &'static str,
    predicate: Arc<Predicate>,
}

impl Custom {
    pub fn new<F>(name: &'static str, predicate: F) -> Self
    where
        F: Fn(&LinearSystem, &LinearSystemBelief, &LinearSolverState<'_>) -> bool
            + Send
            + Sync
            + 'static,
    {
        Self {
            name,
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for Custom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Custom").field("name", &self.name).finish_non_exhaustive()
    }
}

impl StoppingCriterion for Custom {
    fn name(&self) -> &'static str {
        self.name
    }

    fn evaluate(
        &self,
        problem: &LinearSystem,
        belief: &LinearSystemBelief,
        state: &LinearSolverState<'_>,
    ) -> bool {
        (self.predicate)(problem, belief, state)
    }
}

fn validate_tolerances(atol: f64, rtol: f64) -> Result<(), SolverError> {
    for (name, value) in [("atol", atol), ("rtol", rtol)] {
        if !(value >= 0.0) {
            return Err(input_error(format!(
                "Tolerance {name} must be non-negative, got {value}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beliefs::SymmetricNormal;
    use faer::{Mat, mat};

    #[test]
    fn test_vector_norms() {
        let x: Mat<f64> = mat![[3.0], [-4.0], [0.0]];
        let x = x.as_ref();
        assert_eq!(vector_norm(x, NormOrder::P(2.0)), 5.0);
        assert_eq!(vector_norm(x, NormOrder::P(1.0)), 7.0);
        assert_eq!(vector_norm(x, NormOrder::Inf), 4.0);
        assert_eq!(vector_norm(x, NormOrder::NegInf), 0.0);
        assert_eq!(vector_norm(x, NormOrder::P(0.0)), 2.0);
        assert!((vector_norm(x, NormOrder::P(0.5)) - (3f64.sqrt() + 2.0).powi(2)).abs() < 1e-12);
        assert_eq!(vector_norm(Mat::<f64>::zeros(0, 1).as_ref(), NormOrder::Inf), 0.0);
    }

    #[test]
    fn test_negative_tolerances_are_rejected() {
        assert!(ResidualNorm::new(NormOrder::Inf, -1.0, 0.0).is_err());
        assert!(PosteriorContraction::new(0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_criteria_on_initial_state() {
        let a: Mat<f64> = mat![[2.0, 0.0], [0.0, 3.0]];
        let problem = LinearSystem::new(a, mat![[1.0], [1.0]]).unwrap();
        let prior = SymmetricNormal::from_solution(Mat::zeros(2, 1), &problem).unwrap();
        let state = LinearSolverState::new(&problem, prior.clone()).unwrap();

        assert!(!MaxIterations::default().evaluate(&problem, &prior, &state));
        assert!(MaxIterations::new(0).evaluate(&problem, &prior, &state));
        assert!(!ResidualNorm::default().evaluate(&problem, &prior, &state));
        let loose = ResidualNorm::new(NormOrder::Inf, 10.0, 0.0).unwrap();
        assert!(loose.evaluate(&problem, &prior, &state));

        let custom = Custom::new("AlwaysStop", |_, _, _| true);
        assert_eq!(custom.name(), "AlwaysStop");
        assert!(custom.evaluate(&problem, &prior, &state));
        assert!(format!("{custom:?}").contains("AlwaysStop"));
    }
}
