//! The per-iteration working set of the symmetric belief updates.
//!
//! Every quantity is computed eagerly, in dependency order, from the prior
//! operators, the cache of the previous iteration and the new action-observation
//! pair. Accumulated quantities (inner-product histories, the rank-2 mean
//! batches, the rank-1 covariance-factor batches and the noise statistic) are the
//! previous value plus the contribution of the new pair, so no iteration ever
//! revisits the full history.

use crate::{
    error::{SolverError, SolverErrorKind},
    linops::{LinearOperator, LowRank, axpy, dot, symmetrize},
};
use faer::{Mat, MatRef, Scale, Side};

/// Operators the running posterior is expressed against:
/// `E[A] = A₀ + batch`, `W_A = W_A⁰ - batch`, and likewise for `H`.
///
/// With `incremental` set the operators are the belief committed in the previous
/// iteration, the batches of earlier caches are already folded into them and
/// only the corrections of the new pair are formed.
pub(crate) struct CachePrior<'a> {
    pub a0: &'a dyn LinearOperator,
    pub ainv0: &'a dyn LinearOperator,
    pub covfactor_a0: &'a dyn LinearOperator,
    pub covfactor_ainv0: &'a dyn LinearOperator,
    pub incremental: bool,
}

/// Cached quantities of one belief update.
///
/// Subscripts refer to the current iteration `i`: `s = sᵢ`, `y = yᵢ`, and the
/// running moments `E[A]`, `W_A` are those of iteration `i - 1`.
#[derive(Clone, Debug)]
pub struct LinearSolverCache {
    /// `sᵗy`.
    pub action_observation: f64,
    /// `sⱼᵗyⱼ` for all iterations `j ≤ i`.
    pub action_observation_innerprods: Vec<f64>,
    /// `ln(sⱼᵗyⱼ) - ln(sⱼᵗsⱼ)` for all iterations `j ≤ i`.
    pub log_rayleigh_quotients: Vec<f64>,
    /// Exact line-search step `-sᵗr / sᵗy`; `None` for noisy updates.
    pub step_size: Option<f64>,
    /// Residual `A x̄ - b` after this update.
    pub residual: Mat<f64>,
    /// `Δ_A = y - E[A] s`.
    pub delta_a: Mat<f64>,
    /// `Δ_H = s - E[H] y`.
    pub delta_ainv: Mat<f64>,
    /// `sᵗΔ_A`.
    pub delta_a_action: f64,
    /// `yᵗΔ_H`.
    pub delta_ainv_observation: f64,
    /// `W_A s`.
    pub covfactor_a_action: Mat<f64>,
    /// `W_H y`.
    pub covfactor_ainv_observation: Mat<f64>,
    /// `sᵗ W_A s`.
    pub action_covfactor_a_action: f64,
    /// `yᵗ W_H y`.
    pub observation_covfactor_ainv_observation: f64,
    /// `‖W_A s‖²`.
    pub sqnorm_covfactor_a_action: f64,
    /// `‖W_H y‖²`.
    pub sqnorm_covfactor_ainv_observation: f64,
    /// `Σⱼ 2 Δⱼᵗ W⁺ Δⱼ / sⱼᵗWsⱼ - (sⱼᵗΔⱼ / sⱼᵗWsⱼ)²`, the statistic behind
    /// noise-scale calibration. Only tracked on request.
    pub sum_delta_invgram_delta: Option<f64>,
    /// Accumulated symmetric rank-2 corrections of `E[A]`.
    pub mean_a_update_batch: LowRank,
    /// Accumulated symmetric rank-2 corrections of `E[H]`.
    pub mean_ainv_update_batch: LowRank,
    /// Accumulated rank-1 downdates of `W_A`.
    pub covfactor_a_update_batch: LowRank,
    /// Accumulated rank-1 downdates of `W_H`.
    pub covfactor_ainv_update_batch: LowRank,
    /// The batches hold only this iteration's corrections, relative to the belief
    /// committed before it.
    pub incremental: bool,
}

/// Relative threshold below which a denominator is treated as zero.
pub(crate) fn degeneracy_tolerance(scale: f64) -> f64 {
    8.0 * f64::EPSILON * scale
}

/// Returns `value` if it is safely positive relative to `scale`.
fn positive(
    quantity: &'static str,
    value: f64,
    scale: f64,
    iteration: usize,
) -> Result<f64, SolverError> {
    if value.is_finite() && value > degeneracy_tolerance(scale) {
        Ok(value)
    } else {
        Err(SolverErrorKind::DegenerateUpdate {
            quantity,
            value,
            iteration,
        }
        .into())
    }
}

/// Curvature `sᵗy` of an action-observation pair, rejected if it is not safely positive.
pub(crate) fn action_observation(
    action: MatRef<'_, f64>,
    observation: MatRef<'_, f64>,
    iteration: usize,
) -> Result<f64, SolverError> {
    positive(
        "action_observation",
        dot(action, observation),
        action.norm_l2() * observation.norm_l2(),
        iteration,
    )
}

impl LinearSolverCache {
    /// Computes the cache of iteration `iteration` (1-based).
    pub(crate) fn from_new_data(
        prior: &CachePrior<'_>,
        prev: Option<&LinearSolverCache>,
        residual: MatRef<'_, f64>,
        action: MatRef<'_, f64>,
        observation: MatRef<'_, f64>,
        iteration: usize,
        track_noise_statistics: bool,
    ) -> Result<Self, SolverError> {
        let n = action.nrows();
        let empty = LowRank::zeros(n);
        let (mean_a_prev, mean_ainv_prev, covfactor_a_prev, covfactor_ainv_prev) = match prev {
            Some(c) if !prior.incremental => (
                &c.mean_a_update_batch,
                &c.mean_ainv_update_batch,
                &c.covfactor_a_update_batch,
                &c.covfactor_ainv_update_batch,
            ),
            _ => (&empty, &empty, &empty, &empty),
        };

        let action_observation = action_observation(action, observation, iteration)?;
        let action_sqnorm = dot(action, action);
        let mut action_observation_innerprods = prev
            .map(|c| c.action_observation_innerprods.clone())
            .unwrap_or_default();
        action_observation_innerprods.push(action_observation);
        let mut log_rayleigh_quotients = prev
            .map(|c| c.log_rayleigh_quotients.clone())
            .unwrap_or_default();
        log_rayleigh_quotients.push(action_observation.ln() - action_sqnorm.ln());

        let step_size = -dot(action, residual) / action_observation;
        let mut new_residual = residual.to_owned();
        axpy(new_residual.as_mut(), step_size, observation);

        // Matrix model, acting on s and observed through y.
        let a = SideUpdate::compute(
            "action_covfactor_a_action",
            prior.a0,
            prior.covfactor_a0,
            mean_a_prev,
            covfactor_a_prev,
            action,
            observation,
            iteration,
        )?;
        // Inverse model, with the roles of s and y exchanged.
        let ainv = SideUpdate::compute(
            "observation_covfactor_ainv_observation",
            prior.ainv0,
            prior.covfactor_ainv0,
            mean_ainv_prev,
            covfactor_ainv_prev,
            observation,
            action,
            iteration,
        )?;

        let sum_delta_invgram_delta = if track_noise_statistics {
            let mut covfactor = prior.covfactor_a0.to_dense();
            axpy(covfactor.as_mut(), -1.0, covfactor_a_prev.to_dense().as_ref());
            let quadratic = pseudo_inverse_quadratic_form(covfactor, a.delta.as_ref())?;
            let prev_sum = prev.and_then(|c| c.sum_delta_invgram_delta).unwrap_or(0.0);
            let ratio = a.delta_direction / a.direction_covfactor_direction;
            Some(prev_sum + 2.0 * quadratic / a.direction_covfactor_direction - ratio * ratio)
        } else {
            None
        };

        Ok(Self {
            action_observation,
            action_observation_innerprods,
            log_rayleigh_quotients,
            step_size: Some(step_size),
            residual: new_residual,
            delta_a_action: a.delta_direction,
            delta_ainv_observation: ainv.delta_direction,
            action_covfactor_a_action: a.direction_covfactor_direction,
            observation_covfactor_ainv_observation: ainv.direction_covfactor_direction,
            sqnorm_covfactor_a_action: dot(a.covfactor_direction.as_ref(), a.covfactor_direction.as_ref()),
            sqnorm_covfactor_ainv_observation: dot(
                ainv.covfactor_direction.as_ref(),
                ainv.covfactor_direction.as_ref(),
            ),
            sum_delta_invgram_delta,
            mean_a_update_batch: mean_a_prev.concat(&a.mean_update),
            mean_ainv_update_batch: mean_ainv_prev.concat(&ainv.mean_update),
            covfactor_a_update_batch: covfactor_a_prev.concat(&a.covfactor_update),
            covfactor_ainv_update_batch: covfactor_ainv_prev.concat(&ainv.covfactor_update),
            delta_a: a.delta,
            delta_ainv: ainv.delta,
            covfactor_a_action: a.covfactor_direction,
            covfactor_ainv_observation: ainv.covfactor_direction,
            incremental: prior.incremental,
        })
    }
}

/// The rank-2 mean update and rank-1 factor downdate of one matrix model
/// `M ~ N(M₀ + mean batch, (W₀ - factor batch) ⊗ₛ (...))` from the
/// observation `M p = q`.
struct SideUpdate {
    delta: Mat<f64>,
    delta_direction: f64,
    covfactor_direction: Mat<f64>,
    direction_covfactor_direction: f64,
    mean_update: LowRank,
    covfactor_update: LowRank,
}

impl SideUpdate {
    #[allow(clippy::too_many_arguments)]
    fn compute(
        quantity: &'static str,
        mean0: &dyn LinearOperator,
        covfactor0: &dyn LinearOperator,
        mean_batch: &LowRank,
        covfactor_batch: &LowRank,
        direction: MatRef<'_, f64>,
        target: MatRef<'_, f64>,
        iteration: usize,
    ) -> Result<Self, SolverError> {
        // Δ = q - E[M] p
        let mut delta = target.to_owned();
        axpy(delta.as_mut(), -1.0, mean0.apply(direction).as_ref());
        axpy(delta.as_mut(), -1.0, mean_batch.apply(direction).as_ref());
        let delta_direction = dot(direction, delta.as_ref());

        // W p, with the downdates of all previous iterations applied.
        let mut covfactor_direction = covfactor0.apply(direction);
        axpy(covfactor_direction.as_mut(), -1.0, covfactor_batch.apply(direction).as_ref());
        let direction_covfactor_direction = positive(
            quantity,
            dot(direction, covfactor_direction.as_ref()),
            direction.norm_l2() * covfactor_direction.norm_l2(),
            iteration,
        )?;

        // u = Wp / pᵗWp, v = Δ - ½ (pᵗΔ) u
        let u = &covfactor_direction * Scale(1.0 / direction_covfactor_direction);
        let mut v = delta.clone();
        axpy(v.as_mut(), -0.5 * delta_direction, u.as_ref());

        Ok(Self {
            mean_update: LowRank::symmetric_rank_two(u.as_ref(), v.as_ref()),
            covfactor_update: LowRank::rank_one(u.as_ref(), covfactor_direction.as_ref()),
            delta,
            delta_direction,
            covfactor_direction,
            direction_covfactor_direction,
        })
    }
}

/// `vᵗ W⁺ v` for a symmetric positive semi-definite `W`.
///
/// The downdated covariance factor is singular on the span of earlier actions,
/// so the pseudo-inverse is formed from an eigendecomposition, discarding
/// eigenvalues below `1e-10 · λ_max`.
fn pseudo_inverse_quadratic_form(w: Mat<f64>, v: MatRef<'_, f64>) -> Result<f64, SolverError> {
    let w = symmetrize(w.as_ref());
    let evd = w.as_ref().self_adjoint_eigen(Side::Lower).map_err(|e| {
        SolverErrorKind::Calibration(format!(
            "eigendecomposition of the covariance factor failed: {e:?}"
        ))
    })?;
    let eigvecs = evd.U();
    let eigvals = evd.S();
    let n = w.nrows();
    let lambda_max = (0..n).map(|i| eigvals[i].abs()).fold(0.0, f64::max);
    let cutoff = 1e-10 * lambda_max;
    let coeffs = eigvecs.transpose() * v;
    Ok((0..n)
        .filter(|&i| eigvals[i] > cutoff)
        .map(|i| coeffs[(i, 0)] * coeffs[(i, 0)] / eigvals[i])
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linops::{LinearCombination, ScalarMult};
    use faer::mat;
    use std::sync::Arc;

    fn system() -> Mat<f64> {
        mat![[4.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 2.0]]
    }

    #[test]
    fn test_first_update_satisfies_secant_conditions() {
        let a = system();
        let eye = ScalarMult::new(3, 1.0);
        let prior = CachePrior {
            a0: &eye,
            ainv0: &eye,
            covfactor_a0: &eye,
            covfactor_ainv0: &eye,
            incremental: false,
        };
        let s: Mat<f64> = mat![[1.0], [-1.0], [0.5]];
        let y = &a * &s;
        let r: Mat<f64> = mat![[-1.0], [0.0], [-2.0]];
        let cache = LinearSolverCache::from_new_data(&prior, None, r.as_ref(), s.as_ref(), y.as_ref(), 1, false)
            .unwrap();

        let mean_a = LinearCombination::new(3)
            .with_term(1.0, Arc::new(eye))
            .with_term(1.0, Arc::new(cache.mean_a_update_batch.clone()));
        assert!((&mean_a.apply(s.as_ref()) - &y).norm_l2() < 1e-12);

        let mean_ainv = LinearCombination::new(3)
            .with_term(1.0, Arc::new(eye))
            .with_term(1.0, Arc::new(cache.mean_ainv_update_batch.clone()));
        assert!((&mean_ainv.apply(y.as_ref()) - &s).norm_l2() < 1e-12);

        // The downdated factor annihilates the action.
        let mut ws = eye.apply(s.as_ref());
        axpy(ws.as_mut(), -1.0, cache.covfactor_a_update_batch.apply(s.as_ref()).as_ref());
        assert!(ws.norm_l2() < 1e-12);

        // r ← r + αy with α = -sᵗr / sᵗy.
        let sy = dot(s.as_ref(), y.as_ref());
        assert!((cache.action_observation - sy).abs() < 1e-14);
        let alpha = cache.step_size.unwrap();
        assert!((alpha + dot(s.as_ref(), r.as_ref()) / sy).abs() < 1e-14);
        assert!(dot(s.as_ref(), cache.residual.as_ref()).abs() < 1e-12);
        assert_eq!(cache.log_rayleigh_quotients.len(), 1);
        assert!((cache.log_rayleigh_quotients[0] - (sy / 2.25).ln()).abs() < 1e-14);
    }

    #[test]
    fn test_orthogonal_observation_is_degenerate() {
        let eye = ScalarMult::new(2, 1.0);
        let prior = CachePrior {
            a0: &eye,
            ainv0: &eye,
            covfactor_a0: &eye,
            covfactor_ainv0: &eye,
            incremental: false,
        };
        let s: Mat<f64> = mat![[1.0], [0.0]];
        let y: Mat<f64> = mat![[0.0], [1.0]];
        let err = LinearSolverCache::from_new_data(
            &prior,
            None,
            s.as_ref(),
            s.as_ref(),
            y.as_ref(),
            7,
            false,
        )
        .unwrap_err();
        assert_eq!(
            err.kind(),
            &SolverErrorKind::DegenerateUpdate {
                quantity: "action_observation",
                value: 0.0,
                iteration: 7,
            }
        );
    }

    #[test]
    fn test_noise_statistic_of_first_update() {
        let a = system();
        let eye = ScalarMult::new(3, 1.0);
        let prior = CachePrior {
            a0: &eye,
            ainv0: &eye,
            covfactor_a0: &eye,
            covfactor_ainv0: &eye,
            incremental: false,
        };
        let s: Mat<f64> = mat![[1.0], [0.0], [0.0]];
        let y = &a * &s;
        let r: Mat<f64> = mat![[1.0], [1.0], [1.0]];
        let cache = LinearSolverCache::from_new_data(&prior, None, r.as_ref(), s.as_ref(), y.as_ref(), 1, true)
            .unwrap();
        // W = I, sᵗWs = 1, Δ = y - s = (3, 1, 0), sᵗΔ = 3.
        let expected = 2.0 * 10.0 - 9.0;
        assert!((cache.sum_delta_invgram_delta.unwrap() - expected).abs() < 1e-10);
    }
}
