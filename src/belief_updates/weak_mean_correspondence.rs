use super::{BeliefUpdateOutput, CachePrior, LinearSolverCache, cache, with_batch};
use crate::{
    algorithms::LinearSolverState,
    beliefs::{
        ActionObservationInnerProducts, BeliefKind, InducedSolutionCovariance, LinearSystemBelief,
    },
    calibration::UncertaintyCalibration,
    error::{SolverError, not_implemented},
    hyperparams::LinearSystemNoise,
    linops::{axpy, dot},
    problem::LinearSystem,
    random_variables::{GaussianMatrixVariate, Normal, RightHandSide},
};
use faer::{Mat, MatRef};
use std::sync::Arc;

/// Belief update for weak-mean-correspondence beliefs from exact matrix-vector
/// observations.
///
/// The prior covariance factors depend on the collected data, so in every
/// iteration the prior is rebuilt from all actions and observations gathered so
/// far, including the current pair. The means are then updated exactly as in the
/// symmetric-normal case, while the posterior factors have the closed forms
/// `Φ (I - P_S)` and `Ψ (I - P_Y)`.
///
/// With a scalar prior and the conjugate-directions policy, the mean of the
/// solution belief reproduces the conjugate-gradient iterates.
#[derive(Clone, Copy, Debug)]
pub struct WeakMeanCorrLinearObs {
    calibration: Option<UncertaintyCalibration>,
    assume_conjugate_actions: bool,
}

impl Default for WeakMeanCorrLinearObs {
    fn default() -> Self {
        Self {
            calibration: None,
            assume_conjugate_actions: true,
        }
    }
}

impl WeakMeanCorrLinearObs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recalibrates the uncertainty scales from the Rayleigh quotients in every iteration.
    pub fn with_calibration(mut self, calibration: UncertaintyCalibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    /// Whether `SᵗY` may be taken to be diagonal while the actions are conjugate.
    ///
    /// Each new action is checked against the earlier observations. The first
    /// action that fails the check switches the run to the full `SᵗY` for good.
    /// Disabling this always forms the full matrix.
    pub fn with_conjugate_actions(mut self, assume_conjugate_actions: bool) -> Self {
        self.assume_conjugate_actions = assume_conjugate_actions;
        self
    }

    pub fn calibration(&self) -> Option<UncertaintyCalibration> {
        self.calibration
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
        if noise.is_some() {
            return Err(not_implemented(
                "weak-mean-correspondence update from noisy observations",
            ));
        }
        let wmc = match state.prior().kind() {
            BeliefKind::WeakMeanCorrespondence(wmc) => wmc,
            _ => {
                return Err(not_implemented(
                    "weak-mean-correspondence update of a prior from another family",
                ));
            }
        };
        let iteration = state.iteration() + 1;
        let action_observation = cache::action_observation(action, observation, iteration)?;

        let actions = stack_columns(state.actions(), action);
        let observations = stack_columns(state.observations(), observation);
        // The diagonal shortcut is only kept while every new action is conjugate
        // to all earlier observations; once it fails the full SᵗY is used.
        let conjugate = self.assume_conjugate_actions
            && matches!(wmc.innerprods(), ActionObservationInnerProducts::Conjugate(_))
            && is_conjugate(action, state.observations());
        if self.assume_conjugate_actions && !conjugate && wmc.num_actions() > 0 {
            log::debug!("Action {iteration} is not conjugate to earlier observations; using full SᵗY.");
        }
        let innerprods = conjugate.then(|| {
            let mut diag = state
                .cache()
                .map(|c| c.action_observation_innerprods.clone())
                .unwrap_or_default();
            diag.push(action_observation);
            ActionObservationInnerProducts::Conjugate(diag)
        });

        let mut empirical = wmc.clone();
        if let Some(calibration) = self.calibration {
            let mut log_rq = state.log_rayleigh_quotients().to_vec();
            log_rq.push(action_observation.ln() - dot(action, action).ln());
            let scales = calibration.calibrate(&log_rq)?;
            log::debug!(
                "Calibrated uncertainty scales at iteration {iteration}: phi = {:e}, psi = {:e}",
                scales.phi,
                scales.psi
            );
            empirical = empirical.with_scales(scales)?;
        }
        let empirical = empirical.with_data(actions, observations, innerprods)?;

        let covfactor_a0 = empirical.cov_factor_matrix()?;
        let covfactor_ainv0 = empirical.cov_factor_inverse()?;
        let cache = LinearSolverCache::from_new_data(
            &CachePrior {
                a0: &**empirical.a0(),
                ainv0: &**empirical.ainv0(),
                covfactor_a0: &*covfactor_a0,
                covfactor_ainv0: &*covfactor_ainv0,
                incremental: false,
            },
            state.cache(),
            state.residual(),
            action,
            observation,
            iteration,
            false,
        )?;

        let a = GaussianMatrixVariate::new(
            with_batch(empirical.a0(), &cache.mean_a_update_batch, 1.0),
            empirical.posterior_cov_factor_matrix()?,
        )?;
        let ainv = GaussianMatrixVariate::new(
            with_batch(empirical.ainv0(), &cache.mean_ainv_update_batch, 1.0),
            empirical.posterior_cov_factor_inverse()?,
        )?;

        let mut mean = belief.x().mean().to_owned();
        if let Some(step) = cache.step_size {
            axpy(mean.as_mut(), step, action);
        }
        let cov = InducedSolutionCovariance::new(ainv.cov_factor().clone(), problem.b());
        let x = Normal::new(mean, Arc::new(cov))?;
        let b = RightHandSide::Constant(problem.b().to_owned());
        let posterior = LinearSystemBelief::new(Some(x), a, ainv, b)?
            .with_kind(BeliefKind::WeakMeanCorrespondence(empirical.clone()));

        Ok(BeliefUpdateOutput {
            belief: posterior,
            cache,
            prior: Some(empirical.into_belief(problem)?),
        })
    }
}

/// Relative bound on `|sᵗyⱼ| / (‖s‖‖yⱼ‖)` for an action to count as conjugate.
const CONJUGACY_TOLERANCE: f64 = 1e4 * f64::EPSILON;

fn is_conjugate(action: MatRef<'_, f64>, observations: &[Mat<f64>]) -> bool {
    let action_norm = action.norm_l2();
    observations.iter().all(|y| {
        dot(action, y.as_ref()).abs() <= CONJUGACY_TOLERANCE * action_norm * y.norm_l2()
    })
}

fn stack_columns(history: &[Mat<f64>], current: MatRef<'_, f64>) -> Mat<f64> {
    let n = current.nrows();
    let k = history.len();
    Mat::from_fn(n, k + 1, |i, j| {
        if j < k { history[j][(i, 0)] } else { current[(i, 0)] }
    })
}
