use super::LinearSystemBelief;
use crate::{
    error::{SolverError, dimension_mismatch, input_error, not_implemented},
    linops::{
        InvertibleOperator, LinearOperator, ScalarMult, ScaledIdentityPlusRankOne, dot, identity,
    },
    problem::LinearSystem,
    random_variables::{GaussianMatrixVariate, Normal, RightHandSide},
};
use faer::{Mat, Scale};
use std::sync::Arc;

/// Constructors of symmetric-normal beliefs.
///
/// The matrix model uses the system matrix as its covariance factor and the
/// inverse model its prior mean, `A ~ N(A₀, A ⊗ₛ A)` and `H ~ N(H₀, H₀ ⊗ₛ H₀)`.
/// `from_matrices` is the cheapest constructor, since it never inverts.
#[derive(Clone, Copy, Debug)]
pub struct SymmetricNormal;

impl SymmetricNormal {
    /// Belief centred on an initial guess `x0`, so that `E[H] b = x0`.
    ///
    /// See [`SymmetricNormal`] for the covariance structure. If `b = 0` the
    /// belief collapses onto the exact solution `x = 0` with covariance `ε·I`.
    pub fn from_solution(
        x0: Mat<f64>,
        problem: &LinearSystem,
    ) -> Result<LinearSystemBelief, SolverError> {
        match means_from_solution(x0, problem)? {
            SolutionMeans::Zero => zero_solution_belief(problem),
            SolutionMeans::Means { a0, ainv0 } => {
                Self::build(a0, ainv0, problem)
            }
        }
    }

    /// Belief from an approximate inverse `H₀`, with `A₀ = H₀⁻¹`.
    pub fn from_inverse(
        ainv0: impl InvertibleOperator + 'static,
        problem: &LinearSystem,
    ) -> Result<LinearSystemBelief, SolverError> {
        check_square("prior inverse mean", &ainv0, problem)?;
        let a0 = ainv0.inverse()?;
        let ainv0: Arc<dyn LinearOperator> = Arc::new(ainv0);
        Self::build(a0, ainv0, problem)
    }

    /// Belief from an approximate system matrix `A₀`, with `H₀ = A₀⁻¹`.
    pub fn from_matrix(
        a0: impl InvertibleOperator + 'static,
        problem: &LinearSystem,
    ) -> Result<LinearSystemBelief, SolverError> {
        check_square("prior matrix mean", &a0, problem)?;
        let ainv0 = a0.inverse()?;
        let a0: Arc<dyn LinearOperator> = Arc::new(a0);
        Self::build(a0, ainv0, problem)
    }

    /// Belief from prior means of both `A` and `H`.
    pub fn from_matrices(
        a0: impl LinearOperator + 'static,
        ainv0: impl LinearOperator + 'static,
        problem: &LinearSystem,
    ) -> Result<LinearSystemBelief, SolverError> {
        check_square("prior matrix mean", &a0, problem)?;
        check_square("prior inverse mean", &ainv0, problem)?;
        let a0: Arc<dyn LinearOperator> = Arc::new(a0);
        let ainv0: Arc<dyn LinearOperator> = Arc::new(ainv0);
        Self::build(a0, ainv0, problem)
    }

    fn build(
        a0: Arc<dyn LinearOperator>,
        ainv0: Arc<dyn LinearOperator>,
        problem: &LinearSystem,
    ) -> Result<LinearSystemBelief, SolverError> {
        LinearSystemBelief::new(
            None,
            GaussianMatrixVariate::new(a0, problem.a().clone())?,
            GaussianMatrixVariate::new(ainv0.clone(), ainv0)?,
            RightHandSide::Constant(problem.b().to_owned()),
        )
    }
}

/// Prior means implied by an initial guess.
pub(crate) enum SolutionMeans {
    /// `b = 0`: the exact solution is known.
    Zero,
    Means {
        a0: Arc<dyn LinearOperator>,
        ainv0: Arc<dyn LinearOperator>,
    },
}

/// Constructs `H₀ = αI + (2 / bᵗx₀) uuᵗ` with `u = x₀ - αb` and `α = ½ bᵗx₀ / bᵗb`,
/// the symmetric rank-one update of a scaled identity mapping `b` onto `x₀`, and its
/// inverse `A₀`.
///
/// If `bᵗx₀ < 0` the guess is flipped, since `-x₀` is then closer to the solution.
/// If `bᵗx₀ = 0` the guess carries no information along `b` and is replaced by the
/// minimizer `(bᵗb / bᵗAb) b` of the energy norm along `b`.
pub(crate) fn means_from_solution(
    x0: Mat<f64>,
    problem: &LinearSystem,
) -> Result<SolutionMeans, SolverError> {
    let b = problem.b();
    if b.ncols() != 1 {
        return Err(not_implemented(format!(
            "prior construction from an initial guess for {} right-hand sides",
            b.ncols()
        )));
    }
    if x0.nrows() != problem.dim() || x0.ncols() != 1 {
        return Err(dimension_mismatch("initial guess rows", problem.dim(), x0.nrows()));
    }

    let b_sqnorm = dot(b, b);
    if b_sqnorm == 0.0 {
        return Ok(SolutionMeans::Zero);
    }

    let mut x0 = x0;
    let mut bx0 = dot(b, x0.as_ref());
    if bx0 < 0.0 {
        log::warn!("Initial guess has negative inner product with b (bᵗx0 = {bx0:e}); using -x0.");
        x0 = &x0 * Scale(-1.0);
        bx0 = -bx0;
    } else if bx0 == 0.0 {
        let ab = problem.a().apply(b);
        let bab = dot(b, ab.as_ref());
        if !(bab > 0.0) {
            return Err(input_error(format!(
                "Cannot construct a prior from an initial guess orthogonal to b: bᵗAb = {bab:e}"
            )));
        }
        log::warn!("Initial guess is orthogonal to b; using the energy-norm minimizer along b.");
        x0 = b * Scale(b_sqnorm / bab);
        bx0 = b_sqnorm * b_sqnorm / bab;
    }

    let alpha = 0.5 * bx0 / b_sqnorm;
    let u = &x0 - &(b * Scale(alpha));
    let ainv0 = ScaledIdentityPlusRankOne::new(alpha, 2.0 / bx0, u);
    let a0 = ainv0.inverse()?;
    Ok(SolutionMeans::Means {
        a0,
        ainv0: Arc::new(ainv0),
    })
}

/// `x ~ N(0, ε·I)`, `A, H ~ N(I, I ⊗ₛ I)`.
pub(crate) fn zero_solution_belief(
    problem: &LinearSystem,
) -> Result<LinearSystemBelief, SolverError> {
    let n = problem.dim();
    let eye: Arc<dyn LinearOperator> = Arc::new(identity(n));
    let x = Normal::new(Mat::zeros(n, 1), Arc::new(ScalarMult::new(n, f64::EPSILON)))?;
    LinearSystemBelief::new(
        Some(x),
        GaussianMatrixVariate::new(eye.clone(), eye.clone())?,
        GaussianMatrixVariate::new(eye.clone(), eye)?,
        RightHandSide::Constant(problem.b().to_owned()),
    )
}

pub(crate) fn check_square(
    context: &'static str,
    op: &dyn LinearOperator,
    problem: &LinearSystem,
) -> Result<(), SolverError> {
    let n = problem.dim();
    if op.nrows() != n {
        return Err(dimension_mismatch(context, n, op.nrows()));
    }
    if op.ncols() != n {
        return Err(dimension_mismatch(context, n, op.ncols()));
    }
    Ok(())
}
