//! Observation operators turn an action into information about the system matrix.

use crate::{
    error::{SolverError, dimension_mismatch},
    linops::LinearOperator,
    problem::LinearSystem,
};
use faer::{Mat, MatRef};
use std::fmt;

pub trait ObservationOperator: Send + Sync + fmt::Debug {
    /// Returns the `n × 1` observation of `action`.
    fn observe(&self, problem: &LinearSystem, action: MatRef<'_, f64>) -> Result<Mat<f64>, SolverError>;
}

/// Exact matrix-vector product `y = A s`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MatVecObservation;

impl ObservationOperator for MatVecObservation {
    fn observe(&self, problem: &LinearSystem, action: MatRef<'_, f64>) -> Result<Mat<f64>, SolverError> {
        if action.nrows() != problem.dim() {
            return Err(dimension_mismatch("action rows", problem.dim(), action.nrows()));
        }
        Ok(problem.a().apply(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_matvec_observation() {
        let a: Mat<f64> = mat![[2.0, 1.0], [1.0, 3.0]];
        let problem = LinearSystem::new(a, mat![[1.0], [0.0]]).unwrap();
        let y = MatVecObservation.observe(&problem, mat![[1.0], [-1.0]].as_ref()).unwrap();
        assert_eq!(y, mat![[1.0], [-2.0]]);
        assert!(MatVecObservation.observe(&problem, Mat::zeros(3, 1).as_ref()).is_err());
    }
}
