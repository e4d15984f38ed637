//! Calibration of the hyperparameters of a linear-system belief from the data
//! collected by the solver.
//!
//! Two kinds of hyperparameters are calibrated:
//! - the observation-noise variance `ε²` of a symmetric-normal belief, through a
//!   [`NoiseCalibration`] invoked by the solver before every update;
//! - the uncertainty scales `Φ`, `Ψ` of a weak-mean-correspondence belief, through
//!   an [`UncertaintyCalibration`] configured on the belief update.

use crate::{
    algorithms::LinearSolverState,
    beliefs::LinearSystemBelief,
    error::{SolverError, SolverErrorKind},
    hyperparams::UncertaintyScales,
    problem::LinearSystem,
};
use anyhow::{anyhow, ensure};
use faer::Mat;
use std::fmt;

/// A procedure estimating the scalar noise variance `ε²` of the matrix observations.
pub trait NoiseCalibration: Send + Sync + fmt::Debug {
    /// Returns `ε² ≥ 0` given the data collected before the current iteration.
    fn optimize(
        &self,
        problem: &LinearSystem,
        belief: &LinearSystemBelief,
        actions: &[Mat<f64>],
        observations: &[Mat<f64>],
        state: &LinearSolverState<'_>,
    ) -> anyhow::Result<f64>;
}

/// Closed-form maximizer of the marginal likelihood of the observations under
/// scalar noise.
///
/// With `k` observations, the statistic `Σᵢ 2 Δᵢᵗ W⁺ Δᵢ / sᵢᵗWsᵢ - (sᵢᵗΔᵢ / sᵢᵗWsᵢ)²`
/// accumulated by the symmetric-normal update and `nk - k(k-1)/2` degrees of
/// freedom, the estimate is `max(0, statistic / dof - 1)`.
///
/// Requires the update to track noise statistics, see
/// [`crate::belief_updates::SymmetricNormalLinearObs::with_noise_statistics`].
#[derive(Clone, Copy, Debug, Default)]
pub struct OptimalNoiseScale;

impl NoiseCalibration for OptimalNoiseScale {
    fn optimize(
        &self,
        problem: &LinearSystem,
        _belief: &LinearSystemBelief,
        actions: &[Mat<f64>],
        _observations: &[Mat<f64>],
        state: &LinearSolverState<'_>,
    ) -> anyhow::Result<f64> {
        let k = actions.len();
        if k == 0 {
            return Ok(0.0);
        }
        let cache = state
            .cache()
            .ok_or_else(|| anyhow!("no belief update has been performed after {k} actions"))?;
        let statistic = cache.sum_delta_invgram_delta.ok_or_else(|| {
            anyhow!("the belief update does not track the noise statistic")
        })?;
        let n = problem.dim();
        let dof = (n * k) as f64 - (k * (k - 1) / 2) as f64;
        ensure!(dof > 0.0, "no degrees of freedom left after {k} actions in dimension {n}");
        ensure!(statistic.is_finite(), "noise statistic is not finite: {statistic}");
        Ok((statistic / dof - 1.0).max(0.0))
    }
}

/// Calibration of the uncertainty scales of a weak-mean-correspondence belief
/// from the log-Rayleigh quotients `ln(sᵢᵗAsᵢ / sᵢᵗsᵢ)` observed so far.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UncertaintyCalibration {
    /// `Φ = Ψ⁻¹` equal to the most recent Rayleigh quotient.
    Adhoc,
    /// `Φ = Ψ⁻¹ = exp(Σᵢ i·lᵢ / Σᵢ i)`, an average of the log-Rayleigh
    /// quotients weighting later iterations more.
    WeightedMean,
}

impl UncertaintyCalibration {
    /// Returns the default scales `Φ = Ψ = 1` when no quotients are available.
    pub fn calibrate(&self, log_rayleigh_quotients: &[f64]) -> Result<UncertaintyScales, SolverError> {
        let Some(&last) = log_rayleigh_quotients.last() else {
            return Ok(UncertaintyScales::default());
        };
        let log_phi = match self {
            UncertaintyCalibration::Adhoc => last,
            UncertaintyCalibration::WeightedMean => {
                let (weighted, total) = log_rayleigh_quotients.iter().enumerate().fold(
                    (0.0, 0.0),
                    |(weighted, total), (i, l)| {
                        let w = (i + 1) as f64;
                        (weighted + w * l, total + w)
                    },
                );
                weighted / total
            }
        };
        if !log_phi.is_finite() {
            return Err(SolverErrorKind::Calibration(format!(
                "log-Rayleigh quotient estimate is {log_phi}"
            ))
            .into());
        }
        UncertaintyScales::new(log_phi.exp(), (-log_phi).exp())
    }
}
