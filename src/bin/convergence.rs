//! Experiment Runner for the Convergence and Calibration Analysis.
//!
//! This executable runs a probabilistic linear solver on a random symmetric
//! positive-definite system and records, for every iteration, the residual norm,
//! the true error of the solution mean and the spread of the solution belief.
//! Comparing the error against the spread shows how well the posterior
//! covariance of each solver variant is calibrated.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use faer::{Mat, Scale, prelude::*};
use prob_linsolve::{
    LinearSystem, ProbabilisticLinearSolver,
    belief_updates::{BeliefUpdate, SymmetricNormalLinearObs, WeakMeanCorrLinearObs},
    beliefs::{LinearSystemBelief, SymmetricNormal, WeakMeanCorrespondence},
    calibration::{OptimalNoiseScale, UncertaintyCalibration},
    algorithms::LinearSolverState,
    linops::{LinearOperator, ScalarMult},
    observation_ops::MatVecObservation,
    policies::ConjugateDirections,
    stopping_criteria::{NormOrder, ResidualNorm},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;
use std::path::PathBuf;

/// The belief family and update rule of the solver.
#[derive(ValueEnum, Clone, Debug, Copy)]
enum SolverVariant {
    /// Weak-mean-correspondence beliefs, equivalent to conjugate gradients.
    Cg,
    /// Weak-mean-correspondence beliefs with uncertainty scales calibrated from
    /// the Rayleigh quotients.
    CalibratedCg,
    /// Symmetric-normal beliefs.
    BayesCg,
    /// Symmetric-normal beliefs with the observation noise estimated online.
    NoisyBayesCg,
}

/// How the prior means are chosen.
#[derive(ValueEnum, Clone, Debug, Copy)]
enum PriorKind {
    /// `A₀ = αI`, `H₀ = α⁻¹I`.
    Scalar,
    /// Means mapping `b` onto a zero initial guess.
    FromSolution,
}

/// Command-line arguments for the convergence experiment.
#[derive(Parser, Debug)]
#[clap(
    name = "convergence-runner",
    about = "Records the per-iteration convergence of a probabilistic linear solver."
)]
struct ConvergenceArgs {
    /// The solver variant to run.
    #[clap(long, value_enum, default_value_t = SolverVariant::Cg)]
    solver: SolverVariant,

    /// The prior construction.
    #[clap(long, value_enum, default_value_t = PriorKind::Scalar)]
    prior: PriorKind,

    /// Dimension of the test system.
    #[clap(long, default_value_t = 200)]
    n: usize,

    /// Scale of the scalar prior.
    #[clap(long, default_value_t = 1.0)]
    alpha: f64,

    /// Absolute residual tolerance.
    #[clap(long, default_value_t = 1e-8)]
    atol: f64,

    /// Relative residual tolerance.
    #[clap(long, default_value_t = 1e-8)]
    rtol: f64,

    /// Seed of the random problem generator.
    #[clap(long, default_value_t = 42)]
    seed: u64,

    /// Path to the output CSV file where results will be written.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Represents a single row of data for the convergence CSV.
#[derive(Debug, Serialize)]
struct IterationRecord {
    /// Number of completed iterations.
    iteration: usize,
    /// L2-norm of the residual `A x̄ - b`.
    residual_norm: f64,
    /// L2-norm of the error `x̄ - x*` against the direct solution.
    error_norm: f64,
    /// Square root of the trace of the solution covariance.
    posterior_std: f64,
    /// `ln(sᵗAs / sᵗs)` of the latest action.
    log_rayleigh_quotient: Option<f64>,
    /// Step size of the latest action, empty for noisy updates.
    step_size: Option<f64>,
}

/// Generates `A = MᵗM / n + I` and a right-hand side with standard normal-ish entries.
fn random_spd_system(n: usize, seed: u64) -> (Mat<f64>, Mat<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let m = Mat::from_fn(n, n, |_, _| rng.random::<f64>() - 0.5);
    let mut a = &(m.transpose() * m.as_ref()) * Scale(1.0 / n as f64);
    for i in 0..n {
        a[(i, i)] += 1.0;
    }
    let b = Mat::from_fn(n, 1, |_, _| rng.random::<f64>() - 0.5);
    (a, b)
}

fn build_solver(variant: SolverVariant) -> ProbabilisticLinearSolver {
    let update: BeliefUpdate = match variant {
        SolverVariant::Cg => WeakMeanCorrLinearObs::new().into(),
        SolverVariant::CalibratedCg => WeakMeanCorrLinearObs::new()
            .with_calibration(UncertaintyCalibration::WeightedMean)
            .into(),
        SolverVariant::BayesCg => SymmetricNormalLinearObs::new().into(),
        SolverVariant::NoisyBayesCg => SymmetricNormalLinearObs::new()
            .with_noise_statistics()
            .into(),
    };
    let solver = ProbabilisticLinearSolver::new(ConjugateDirections, MatVecObservation, update);
    match variant {
        SolverVariant::NoisyBayesCg => solver.with_noise_calibration(OptimalNoiseScale),
        _ => solver,
    }
}

fn build_prior(
    variant: SolverVariant,
    prior: PriorKind,
    alpha: f64,
    problem: &LinearSystem,
) -> Result<LinearSystemBelief> {
    let n = problem.dim();
    let x0 = Mat::zeros(n, 1);
    let belief = match (variant, prior) {
        (SolverVariant::Cg | SolverVariant::CalibratedCg, PriorKind::Scalar) => {
            WeakMeanCorrespondence::from_scalar(alpha, problem)?
        }
        (SolverVariant::Cg | SolverVariant::CalibratedCg, PriorKind::FromSolution) => {
            WeakMeanCorrespondence::from_solution(x0, problem)?
        }
        (_, PriorKind::Scalar) => {
            SymmetricNormal::from_inverse(ScalarMult::new(n, 1.0 / alpha), problem)?
        }
        (_, PriorKind::FromSolution) => SymmetricNormal::from_solution(x0, problem)?,
    };
    Ok(belief)
}

/// The main entry point for the convergence experiment.
fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;
    let args = ConvergenceArgs::parse();
    log::info!(
        "Starting convergence analysis for solver: {:?}, prior: {:?}, n = {}",
        args.solver,
        args.prior,
        args.n
    );

    // 1. Setup the test problem and its direct solution.
    let (a, b) = random_spd_system(args.n, args.seed);
    let x_true = a.partial_piv_lu().solve(&b);
    let problem = LinearSystem::new(a, b)?.with_solution(x_true.clone())?;

    // 2. Run the solver step by step.
    let solver = build_solver(args.solver).with_stopping_criteria(vec![Box::new(
        ResidualNorm::new(NormOrder::P(2.0), args.atol, args.rtol)?,
    )]);
    let prior = build_prior(args.solver, args.prior, args.alpha, &problem)?;
    let mut iter = solver.solve_iterator(&problem, prior)?;

    let record = |state: &LinearSolverState<'_>| IterationRecord {
        iteration: state.iteration(),
        residual_norm: state.residual().norm_l2(),
        error_norm: (&state.belief().x().mean().to_owned() - &x_true).norm_l2(),
        posterior_std: state.belief().x().cov().trace().abs().sqrt(),
        log_rayleigh_quotient: state.log_rayleigh_quotients().last().copied(),
        step_size: state.step_sizes().last().copied().flatten(),
    };

    let mut results = vec![record(iter.state())];
    while let Some(step) = iter
        .next_step()
        .with_context(|| format!("solver failed after {} iterations", iter.state().iteration()))?
    {
        if step.iteration % 10 == 0 {
            log::info!("Completed iteration {}...", step.iteration);
        }
        results.push(record(iter.state()));
    }
    let state = iter.into_state();
    log::info!(
        "Solver stopped after {} iterations ({:?}).",
        state.iteration(),
        state.stopping_criterion()
    );

    // 3. Write results to CSV.
    log::info!("Writing results to {:?}...", &args.output);
    let mut writer = csv::Writer::from_path(&args.output)?;
    for row in results {
        writer.serialize(row)?;
    }
    writer.flush()?;

    log::info!("Convergence analysis complete.");
    Ok(())
}
