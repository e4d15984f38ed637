//! Integration tests of the belief-update variants and their failure modes.
//!
//! The noisy symmetric-normal update is driven through the solver with the online
//! noise estimate, and every rejected configuration is checked to fail with the
//! error kind naming the offending component.

mod common;

use anyhow::{Result, anyhow, ensure};
use common::random_problem;
use faer::{Mat, mat};
use prob_linsolve::{
    LinearSystem, ProbabilisticLinearSolver, SolverErrorKind,
    algorithms::LinearSolverState,
    belief_updates::{SymmetricNormalLinearObs, WeakMeanCorrLinearObs},
    beliefs::{BeliefKind, LinearSystemBelief, SymmetricNormal, WeakMeanCorrespondence},
    calibration::{OptimalNoiseScale, UncertaintyCalibration},
    error::SolverError,
    hyperparams::LinearSystemNoise,
    observation_ops::MatVecObservation,
    policies::{ConjugateDirections, Policy},
};

/// A policy that always proposes the zero direction.
#[derive(Debug)]
struct ZeroAction;

impl Policy for ZeroAction {
    fn action(
        &self,
        problem: &LinearSystem,
        _belief: &LinearSystemBelief,
        _state: &LinearSolverState<'_>,
    ) -> Result<Mat<f64>, SolverError> {
        Ok(Mat::zeros(problem.dim(), 1))
    }
}

fn noisy_bayes_cg() -> ProbabilisticLinearSolver {
    ProbabilisticLinearSolver::new(
        ConjugateDirections,
        MatVecObservation,
        SymmetricNormalLinearObs::new().with_noise_statistics(),
    )
    .with_noise_calibration(OptimalNoiseScale)
}

#[test]
fn test_noise_calibrated_run_produces_noisy_beliefs() -> Result<()> {
    let n = 12;
    let (problem, _) = random_problem(n, 37);
    let solver = noisy_bayes_cg().with_stopping_criteria(Vec::new()).with_max_iterations(5);
    let prior = solver.belief_update().default_prior(&problem)?;
    let mut iter = solver.solve_iterator(&problem, prior)?;

    while let Some(step) = iter.next_step()? {
        let BeliefKind::Noisy(noise) = step.belief.kind() else {
            return Err(anyhow!("iteration {} is not tagged noisy", step.iteration));
        };
        let eps_sq = noise.scalar_variance()?;
        ensure!(
            eps_sq.is_finite() && eps_sq >= 0.0,
            "iteration {}: invalid noise estimate {eps_sq}",
            step.iteration
        );
        ensure!(
            step.belief.a().noise_cov().is_some(),
            "iteration {}: noise covariance missing",
            step.iteration
        );
        ensure!(
            step.belief.x().mean().norm_l2().is_finite(),
            "iteration {}: non-finite solution mean",
            step.iteration
        );
    }

    let state = iter.into_state();
    ensure!(state.iteration() == 5, "ran {} iterations", state.iteration());
    ensure!(state.stopping_criterion() == Some("MaxIterations"), "wrong criterion");
    ensure!(
        state.step_sizes().iter().all(Option::is_none),
        "noisy updates recorded step sizes"
    );
    let statistic = state
        .cache()
        .and_then(|cache| cache.sum_delta_invgram_delta)
        .ok_or_else(|| anyhow!("noise statistic was not tracked"))?;
    ensure!(statistic.is_finite(), "noise statistic is {statistic}");
    Ok(())
}

#[test]
fn test_explicit_noise_on_the_prior_is_used_by_the_update() -> Result<()> {
    let (problem, _) = random_problem(8, 41);
    let prior = SymmetricNormal::from_solution(Mat::zeros(8, 1), &problem)?
        .with_noise(LinearSystemNoise::scalar(0.5)?)?;
    let solver = ProbabilisticLinearSolver::bayes_cg().with_max_iterations(2);
    let (belief, state) = solver.solve_with_prior(&problem, prior)?;

    ensure!(state.iteration() == 2, "ran {} iterations", state.iteration());
    let BeliefKind::Noisy(noise) = belief.kind() else {
        return Err(anyhow!("posterior lost its noise tag"));
    };
    ensure!(noise.scalar_variance()? == 0.5, "noise variance changed");
    Ok(())
}

#[test]
fn test_calibration_without_tracked_statistic_fails() -> Result<()> {
    let (problem, _) = random_problem(6, 43);
    let solver = ProbabilisticLinearSolver::bayes_cg()
        .with_stopping_criteria(Vec::new())
        .with_noise_calibration(OptimalNoiseScale);

    let err = solver
        .solve(&problem)
        .err()
        .ok_or_else(|| anyhow!("calibration without a noise statistic succeeded"))?;
    ensure!(
        matches!(err.kind(), SolverErrorKind::Calibration(msg) if msg.contains("noise statistic")),
        "unexpected error: {err}"
    );
    Ok(())
}

#[test]
fn test_weak_mean_correspondence_update_rejects_noise() -> Result<()> {
    let (problem, _) = random_problem(6, 47);
    let solver = ProbabilisticLinearSolver::conjugate_gradient().with_noise_calibration(OptimalNoiseScale);

    let err = solver
        .solve(&problem)
        .err()
        .ok_or_else(|| anyhow!("noisy weak-mean-correspondence update succeeded"))?;
    ensure!(
        matches!(err.kind(), SolverErrorKind::NotImplemented(_)),
        "unexpected error: {err}"
    );
    Ok(())
}

#[test]
fn test_weak_mean_correspondence_update_rejects_foreign_prior() -> Result<()> {
    let (problem, _) = random_problem(6, 53);
    let prior = SymmetricNormal::from_solution(Mat::zeros(6, 1), &problem)?;
    let solver = ProbabilisticLinearSolver::conjugate_gradient();

    let mut iter = solver.solve_iterator(&problem, prior)?;
    let err = iter
        .next_step()
        .err()
        .ok_or_else(|| anyhow!("update of a symmetric-normal prior succeeded"))?;
    ensure!(
        matches!(err.kind(), SolverErrorKind::NotImplemented(_)),
        "unexpected error: {err}"
    );
    // A failed step finishes the run and leaves the state untouched.
    ensure!(!iter.has_next(), "iterator continues after a failed step");
    ensure!(iter.state().iteration() == 0, "failed step was committed");
    Ok(())
}

#[test]
fn test_indefinite_direction_aborts_with_degenerate_update() -> Result<()> {
    // r₀ = A b - b = (0, -2), so the first action (0, 2) has sᵗAs = -4.
    let a: Mat<f64> = mat![[1.0, 0.0], [0.0, -1.0]];
    let problem = LinearSystem::new(a, mat![[1.0], [1.0]])?;
    let prior = WeakMeanCorrespondence::from_scalar(1.0, &problem)?;

    let err = ProbabilisticLinearSolver::conjugate_gradient()
        .solve_with_prior(&problem, prior)
        .err()
        .ok_or_else(|| anyhow!("indefinite system was solved"))?;
    ensure!(
        matches!(
            err.kind(),
            SolverErrorKind::DegenerateUpdate { quantity: "action_observation", value, .. }
                if *value < 0.0
        ),
        "unexpected error: {err}"
    );
    Ok(())
}

#[test]
fn test_zero_action_aborts_both_updates() -> Result<()> {
    let (problem, _) = random_problem(5, 59);
    for solver in [
        ProbabilisticLinearSolver::new(ZeroAction, MatVecObservation, WeakMeanCorrLinearObs::new()),
        ProbabilisticLinearSolver::new(ZeroAction, MatVecObservation, SymmetricNormalLinearObs::new()),
    ] {
        let name = solver.belief_update().name();
        let err = solver
            .solve(&problem)
            .err()
            .ok_or_else(|| anyhow!("{name}: zero action was accepted"))?;
        ensure!(
            matches!(err.kind(), SolverErrorKind::DegenerateUpdate { .. }),
            "{name}: unexpected error: {err}"
        );
    }
    Ok(())
}

#[test]
fn test_calibrated_scales_follow_the_spectrum() -> Result<()> {
    let (problem, _) = random_problem(10, 61);
    let solver = ProbabilisticLinearSolver::new(
        ConjugateDirections,
        MatVecObservation,
        WeakMeanCorrLinearObs::new().with_calibration(UncertaintyCalibration::WeightedMean),
    )
    .with_stopping_criteria(Vec::new())
    .with_max_iterations(4);
    let (_, state) = solver.solve(&problem)?;

    let BeliefKind::WeakMeanCorrespondence(wmc) = state.prior().kind() else {
        return Err(anyhow!("prior lost its weak-mean-correspondence data"));
    };
    let scales = wmc.scales();
    // Every Rayleigh quotient of A = MᵗM/n + I is at least one.
    ensure!(scales.phi >= 1.0, "Φ = {} below the smallest eigenvalue", scales.phi);
    ensure!(
        (scales.phi * scales.psi - 1.0).abs() < 1e-12,
        "Ψ = {} is not the reciprocal of Φ = {}",
        scales.psi,
        scales.phi
    );
    Ok(())
}
