//! Probabilistic linear solvers for symmetric positive-definite systems.
//!
//! This crate solves `A x = b` iteratively while maintaining a Gaussian belief over
//! the solution `x`, the system matrix `A` and its inverse `H = A⁻¹`. Where a
//! classical iterative method returns a point estimate, a probabilistic solver
//! also returns a covariance quantifying the error left by early termination.
//!
//! The matrix beliefs have symmetric Kronecker covariances `W ⊗ₛ W`. Every
//! iteration conditions them on one matrix-vector product through closed-form
//! rank-2 mean updates and rank-1 downdates of the covariance factors. The
//! updates are accumulated in low-rank batches, so no `n × n` matrix is formed
//! during a solve.
//!
//! ## Components
//!
//! - [`problem::LinearSystem`]: the system to solve.
//! - [`beliefs`]: priors and posteriors over `(x, A, H, b)`, in the symmetric-normal and
//!   weak-mean-correspondence families.
//! - [`policies`], [`observation_ops`], [`belief_updates`], [`stopping_criteria`]: the
//!   strategy objects a solver is assembled from.
//! - [`solvers::ProbabilisticLinearSolver`]: the solver loop, with
//!   [`algorithms::SolveIterator`] for step-by-step control.
//! - [`calibration`]: estimation of the noise variance and the uncertainty scales from
//!   the collected data.
//!
//! ## Example Usage
//!
//! With a scalar prior, the conjugate-gradient preset reproduces the CG iterates
//! and attaches a posterior covariance to each of them.
//!
//! ```rust
//! use faer::{Mat, mat};
//! use prob_linsolve::{LinearSystem, ProbabilisticLinearSolver, linops::LinearOperator};
//!
//! let a: Mat<f64> = mat![[4.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 2.0]];
//! let problem = LinearSystem::new(a, mat![[1.0], [2.0], [3.0]])?;
//!
//! let solver = ProbabilisticLinearSolver::conjugate_gradient();
//! let (belief, state) = solver.solve(&problem)?;
//!
//! assert!(state.has_converged());
//! assert!(state.iteration() <= 3);
//! assert!(problem.residual(belief.x().mean()).norm_l2() < 1e-4);
//!
//! // Remaining uncertainty about the solution.
//! let spread = belief.x().cov().trace().sqrt();
//! assert!(spread.is_finite());
//! # Ok::<(), prob_linsolve::error::SolverError>(())
//! ```

pub mod algorithms;
pub mod belief_updates;
pub mod beliefs;
pub mod calibration;
pub mod error;
pub mod hyperparams;
pub mod linops;
pub mod observation_ops;
pub mod policies;
pub mod problem;
pub mod random_variables;
pub mod solvers;
pub mod stopping_criteria;

pub use error::{SolverError, SolverErrorKind};
pub use problem::LinearSystem;
pub use solvers::ProbabilisticLinearSolver;
