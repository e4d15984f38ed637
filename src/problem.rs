//! The linear system `A x = b` to be solved.

use crate::{
    error::{SolverError, dimension_mismatch},
    linops::LinearOperator,
};
use faer::{Mat, MatRef};
use std::sync::Arc;

/// An immutable problem instance: a square system matrix, a right-hand side and,
/// for testing, optionally the known solution.
///
/// `b` may hold several right-hand sides as the columns of an `n × k` matrix, and
/// [`LinearSystem::residual`] handles them column by column. The priors and belief
/// updates only support `k = 1` and return
/// [`crate::error::SolverErrorKind::NotImplemented`] otherwise.
#[derive(Clone, Debug)]
pub struct LinearSystem {
    a: Arc<dyn LinearOperator>,
    b: Mat<f64>,
    solution: Option<Mat<f64>>,
}

impl LinearSystem {
    /// Creates the system `A x = b`.
    ///
    /// Returns [`crate::error::SolverErrorKind::DimensionMismatch`] if `A` is not
    /// square or if `b` does not have as many rows as `A`.
    pub fn new(a: impl LinearOperator + 'static, b: Mat<f64>) -> Result<Self, SolverError> {
        Self::from_shared(Arc::new(a), b)
    }

    /// Same as [`LinearSystem::new`] for an already shared operator.
    pub fn from_shared(a: Arc<dyn LinearOperator>, b: Mat<f64>) -> Result<Self, SolverError> {
        if a.nrows() != a.ncols() {
            return Err(dimension_mismatch("system matrix columns", a.nrows(), a.ncols()));
        }
        if b.nrows() != a.ncols() {
            return Err(dimension_mismatch("right-hand side rows", a.ncols(), b.nrows()));
        }
        Ok(Self {
            a,
            b,
            solution: None,
        })
    }

    /// Attaches the known solution of the system.
    pub fn with_solution(mut self, solution: Mat<f64>) -> Result<Self, SolverError> {
        if solution.nrows() != self.dim() {
            return Err(dimension_mismatch("solution rows", self.dim(), solution.nrows()));
        }
        if solution.ncols() != self.b.ncols() {
            return Err(dimension_mismatch(
                "solution columns",
                self.b.ncols(),
                solution.ncols(),
            ));
        }
        self.solution = Some(solution);
        Ok(self)
    }

    /// The system matrix.
    pub fn a(&self) -> &Arc<dyn LinearOperator> {
        &self.a
    }

    /// The right-hand side, `n × 1` or `n × k` for multiple right-hand sides.
    pub fn b(&self) -> MatRef<'_, f64> {
        self.b.as_ref()
    }

    pub fn solution(&self) -> Option<MatRef<'_, f64>> {
        self.solution.as_ref().map(|x| x.as_ref())
    }

    /// Dimension `n` of the system.
    pub fn dim(&self) -> usize {
        self.a.ncols()
    }

    /// Residual `A x - b` of a candidate solution.
    pub fn residual(&self, x: MatRef<'_, f64>) -> Mat<f64> {
        &self.a.apply(x) - &self.b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolverErrorKind;
    use faer::mat;

    #[test]
    fn test_residual_of_known_solution_vanishes() {
        let a: Mat<f64> = mat![[4.0, 1.0], [1.0, 3.0]];
        let x: Mat<f64> = mat![[1.0], [2.0]];
        let b = &a * &x;
        let problem = LinearSystem::new(a, b).unwrap().with_solution(x.clone()).unwrap();
        assert_eq!(problem.dim(), 2);
        assert_eq!(problem.residual(x.as_ref()), Mat::<f64>::zeros(2, 1));
        assert!(problem.solution().is_some());
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let a: Mat<f64> = mat![[4.0, 1.0], [1.0, 3.0]];
        let err = LinearSystem::new(a, Mat::zeros(3, 1)).unwrap_err();
        assert_eq!(
            err.kind(),
            &SolverErrorKind::DimensionMismatch {
                context: "right-hand side rows",
                expected: 2,
                actual: 3,
            }
        );
    }

    #[test]
    fn test_non_square_matrix_is_rejected() {
        let a: Mat<f64> = mat![[4.0, 1.0, 0.0], [1.0, 3.0, 0.0]];
        assert!(LinearSystem::new(a, Mat::zeros(2, 1)).is_err());
    }

    #[test]
    fn test_multiple_right_hand_sides_are_accepted_but_not_solved() {
        let a: Mat<f64> = mat![[4.0, 1.0], [1.0, 3.0]];
        let b: Mat<f64> = mat![[1.0, 0.0], [2.0, 1.0]];
        let problem = LinearSystem::new(a, b).unwrap();
        assert_eq!(problem.b().ncols(), 2);
        assert_eq!(problem.residual(Mat::zeros(2, 2).as_ref()).ncols(), 2);

        for solver in [
            crate::ProbabilisticLinearSolver::conjugate_gradient(),
            crate::ProbabilisticLinearSolver::bayes_cg(),
        ] {
            let Err(err) = solver.solve(&problem) else {
                panic!("a system with two right-hand sides was solved");
            };
            assert!(matches!(err.kind(), SolverErrorKind::NotImplemented(_)), "{err}");
        }
    }
}
