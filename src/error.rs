//! This module defines the custom error types for the library.
//!
//! Every failure that can arise while constructing beliefs, updating them or
//! driving the solver loop is surfaced through a single public type,
//! [`SolverError`]. The distinct failure modes live in [`SolverErrorKind`],
//! which callers can inspect through [`SolverError::kind`] to find out which
//! component failed and on which values.
//!
//! Using the [`thiserror`] crate allows us to create idiomatic error types with minimal
//! boilerplate.
use thiserror::Error;

/// Represents all possible errors that can occur while solving a linear system
/// probabilistically.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct SolverError(#[from] SolverErrorKind);

impl SolverError {
    /// Returns the kind of failure wrapped by this error.
    pub fn kind(&self) -> &SolverErrorKind {
        &self.0
    }
}

/// The distinct kinds of errors.
#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum SolverErrorKind {
    /// Two operands whose shapes must agree were combined.
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}.")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Indicates that an invalid input parameter was provided to a function.
    #[error("Invalid input parameter: {0}")]
    InputError(String),

    /// An operator was asked for its inverse but none could be formed.
    #[error("Operator '{operator}' is not invertible: {reason}")]
    NonInvertible {
        operator: &'static str,
        reason: String,
    },

    /// The requested configuration has no closed-form implementation.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A denominator of the belief update vanished or changed sign.
    #[error(
        "Degenerate belief update at iteration {iteration}: {quantity} = {value:e} is not safely positive."
    )]
    DegenerateUpdate {
        quantity: &'static str,
        value: f64,
        iteration: usize,
    },

    /// A hyperparameter calibration routine failed.
    #[error("Calibration failed: {0}")]
    Calibration(String),
}

impl PartialEq for SolverError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

pub(crate) fn dimension_mismatch(
    context: &'static str,
    expected: usize,
    actual: usize,
) -> SolverError {
    SolverErrorKind::DimensionMismatch {
        context,
        expected,
        actual,
    }
    .into()
}

pub(crate) fn not_implemented(what: impl Into<String>) -> SolverError {
    SolverErrorKind::NotImplemented(what.into()).into()
}

pub(crate) fn input_error(what: impl Into<String>) -> SolverError {
    SolverErrorKind::InputError(what.into()).into()
}

// Unit tests to ensure error messages are formatted correctly.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_error_message() {
        let error = dimension_mismatch("right-hand side rows", 100, 99);
        assert_eq!(
            error.to_string(),
            "Dimension mismatch in right-hand side rows: expected 100, got 99."
        );
    }

    #[test]
    fn test_degenerate_update_error_message() {
        let error = SolverError(SolverErrorKind::DegenerateUpdate {
            quantity: "action_observation",
            value: -1.5,
            iteration: 3,
        });
        let expected_message = "Degenerate belief update at iteration 3: action_observation = -1.5e0 is not safely positive.";
        assert_eq!(error.to_string(), expected_message);
    }

    #[test]
    fn test_non_invertible_error_message() {
        let error = SolverError(SolverErrorKind::NonInvertible {
            operator: "ScalarMult",
            reason: "scalar is zero".to_string(),
        });
        assert_eq!(
            error.to_string(),
            "Operator 'ScalarMult' is not invertible: scalar is zero"
        );
    }

    #[test]
    fn test_input_error_message() {
        let error = input_error("Scalar alpha must be positive, got -1");
        assert_eq!(
            error.to_string(),
            "Invalid input parameter: Scalar alpha must be positive, got -1"
        );
        assert_eq!(
            error.kind(),
            &SolverErrorKind::InputError("Scalar alpha must be positive, got -1".to_string())
        );
    }

    #[test]
    fn test_not_implemented_message() {
        let error = not_implemented("noise on the right-hand side");
        assert_eq!(
            error.to_string(),
            "Not implemented: noise on the right-hand side"
        );
    }
}
