use super::{BeliefUpdateOutput, CachePrior, LinearSolverCache, with_batch};
use crate::{
    algorithms::LinearSolverState,
    beliefs::{BeliefKind, InducedSolutionCovariance, LinearSystemBelief, induced_solution},
    error::SolverError,
    hyperparams::LinearSystemNoise,
    linops::{LinearOperator, LowRank, axpy},
    problem::LinearSystem,
    random_variables::{GaussianMatrixVariate, Normal, RightHandSide},
};
use faer::MatRef;
use std::sync::Arc;

/// Symmetric-normal belief update from exact or noise-corrupted matrix-vector
/// observations.
///
/// Without noise the posterior is
///
/// E[A] = A₀ + Σᵢ (uᵢvᵢᵗ + vᵢuᵢᵗ),   W_A = W_A⁰ - Σᵢ uᵢ (W sᵢ)ᵗ,
///
/// with `uᵢ = Wsᵢ / sᵢᵗWsᵢ` and `vᵢ = Δᵢ - ½ (sᵢᵗΔᵢ) uᵢ`, and likewise for
/// `H` with the roles of `s` and `y` exchanged. Under scalar noise `ε²` every
/// correction is damped by `1 / (1 + ε²)` and the removed covariance is kept as a
/// separate noise term.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymmetricNormalLinearObs {
    track_noise_statistics: bool,
}

impl SymmetricNormalLinearObs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates the statistic needed by
    /// [`crate::calibration::OptimalNoiseScale`] in every update.
    pub fn with_noise_statistics(mut self) -> Self {
        self.track_noise_statistics = true;
        self
    }

    pub fn tracks_noise_statistics(&self) -> bool {
        self.track_noise_statistics
    }

    pub(super) fn update(
        &self,
        problem: &LinearSystem,
        belief: &LinearSystemBelief,
        action: MatRef<'_, f64>,
        observation: MatRef<'_, f64>,
        noise: Option<&LinearSystemNoise>,
        state: &LinearSolverState<'_>,
    ) -> Result<BeliefUpdateOutput, SolverError> {
        // Noisy corrections are damped as they are committed, so from the first
        // noisy iteration on every update is formed against the committed belief.
        let incremental =
            noise.is_some() || state.cache().is_some_and(|cache| cache.incremental);
        let base = if incremental { belief } else { state.prior() };
        let mut cache = LinearSolverCache::from_new_data(
            &CachePrior {
                a0: &**base.a().mean(),
                ainv0: &**base.ainv().mean(),
                covfactor_a0: &**base.a().cov_factor(),
                covfactor_ainv0: &**base.ainv().cov_factor(),
                incremental,
            },
            state.cache(),
            state.residual(),
            action,
            observation,
            state.iteration() + 1,
            self.track_noise_statistics,
        )?;
        let b = RightHandSide::Constant(problem.b().to_owned());

        let belief = match noise {
            None => {
                let a = GaussianMatrixVariate::new(
                    with_batch(base.a().mean(), &cache.mean_a_update_batch, 1.0),
                    with_batch(base.a().cov_factor(), &cache.covfactor_a_update_batch, -1.0),
                )?;
                let ainv = GaussianMatrixVariate::new(
                    with_batch(base.ainv().mean(), &cache.mean_ainv_update_batch, 1.0),
                    with_batch(
                        base.ainv().cov_factor(),
                        &cache.covfactor_ainv_update_batch,
                        -1.0,
                    ),
                )?;

                // x̄ ← x̄ + αs keeps the residual recursion of the cache exact.
                let mut mean = belief.x().mean().to_owned();
                if let Some(step) = cache.step_size {
                    axpy(mean.as_mut(), step, action);
                }
                let cov = InducedSolutionCovariance::new(ainv.cov_factor().clone(), problem.b());
                let x = Normal::new(mean, Arc::new(cov))?;
                LinearSystemBelief::new(Some(x), a, ainv, b)?.with_kind(BeliefKind::SymmetricNormal)
            }
            Some(noise) => {
                let eps_sq = noise.scalar_variance()?;
                let damping = 1.0 / (1.0 + eps_sq);
                let a = damped_matrix_belief(
                    belief.a(),
                    &cache.mean_a_update_batch,
                    &cache.covfactor_a_update_batch,
                    eps_sq,
                )?;
                let ainv = damped_matrix_belief(
                    belief.ainv(),
                    &cache.mean_ainv_update_batch,
                    &cache.covfactor_ainv_update_batch,
                    eps_sq,
                )?;

                // The damped means no longer satisfy the secant conditions, so the
                // solution is re-induced and the residual recomputed from it.
                let x = induced_solution(&ainv, &b)?;
                cache.residual = problem.residual(x.mean());
                cache.step_size = None;
                log::debug!(
                    "Noisy update at iteration {} with eps^2 = {eps_sq:e}, damping {damping:e}",
                    state.iteration() + 1
                );
                LinearSystemBelief::new(Some(x), a, ainv, b)?
                    .with_kind(BeliefKind::Noisy(noise.clone()))
            }
        };

        Ok(BeliefUpdateOutput {
            belief,
            cache,
            prior: None,
        })
    }
}

/// `M ~ N(M + d·mean batch, (W - d·factor batch) ⊗ₛ (...) + V ⊗ₛ V)` with
/// `d = 1 / (1 + ε²)`, where the noise factor `V` grows by `ε² d` times the
/// removed covariance.
fn damped_matrix_belief(
    current: &GaussianMatrixVariate,
    mean_batch: &LowRank,
    covfactor_batch: &LowRank,
    eps_sq: f64,
) -> Result<GaussianMatrixVariate, SolverError> {
    let damping = 1.0 / (1.0 + eps_sq);
    let noise_factor: Arc<dyn LinearOperator> = match current.noise_cov() {
        Some(noise_cov) => with_batch(noise_cov.factor(), covfactor_batch, eps_sq * damping),
        None => Arc::new(covfactor_batch.scaled(eps_sq * damping)),
    };
    GaussianMatrixVariate::new(
        with_batch(current.mean(), mean_batch, damping),
        with_batch(current.cov_factor(), covfactor_batch, -damping),
    )?
    .with_noise_cov(noise_factor)
}
