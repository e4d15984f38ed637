//! Hyperparameters of linear-system beliefs: observation noise and uncertainty scales.

use crate::{
    error::{SolverError, input_error, not_implemented},
    linops::LinearOperator,
};
use std::sync::Arc;

/// Noise model on one component of the linear system.
#[derive(Clone, Debug)]
pub enum NoiseModel {
    /// Noise `ε² · W ⊗ₛ W` proportional to the covariance of the matrix model.
    Scalar(f64),
    /// Noise with an arbitrary covariance operator.
    Operator(Arc<dyn LinearOperator>),
}

/// Noise on the observations of the system matrix and of the right-hand side.
#[derive(Clone, Debug, Default)]
pub struct LinearSystemNoise {
    pub a: Option<NoiseModel>,
    pub b: Option<NoiseModel>,
}

impl LinearSystemNoise {
    /// Scalar noise `ε²` on the matrix observations only.
    pub fn scalar(epsilon_sq: f64) -> Result<Self, SolverError> {
        if !(epsilon_sq.is_finite() && epsilon_sq >= 0.0) {
            return Err(input_error(format!(
                "Noise variance must be finite and non-negative, got {epsilon_sq}"
            )));
        }
        Ok(Self {
            a: Some(NoiseModel::Scalar(epsilon_sq)),
            b: None,
        })
    }

    /// Returns the scalar noise variance on `A`, the only configuration with a
    /// closed-form belief update.
    pub fn scalar_variance(&self) -> Result<f64, SolverError> {
        if self.b.is_some() {
            return Err(not_implemented(
                "belief update with noise on the right-hand side",
            ));
        }
        match &self.a {
            None => Ok(0.0),
            Some(NoiseModel::Scalar(eps_sq)) => Ok(*eps_sq),
            Some(NoiseModel::Operator(_)) => Err(not_implemented(
                "belief update with a non-scalar noise covariance on the system matrix",
            )),
        }
    }
}

/// Scales `Φ` and `Ψ` of the residual uncertainty outside the explored subspaces
/// of a weak-mean-correspondence belief.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UncertaintyScales {
    pub phi: f64,
    pub psi: f64,
}

impl UncertaintyScales {
    pub fn new(phi: f64, psi: f64) -> Result<Self, SolverError> {
        for (name, value) in [("Phi", phi), ("Psi", psi)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(input_error(format!(
                    "Uncertainty scale {name} must be finite and positive, got {value}"
                )));
            }
        }
        Ok(Self { phi, psi })
    }
}

impl Default for UncertaintyScales {
    fn default() -> Self {
        Self { phi: 1.0, psi: 1.0 }
    }
}
