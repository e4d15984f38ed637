//! Step-by-step execution of a probabilistic linear solver.
//!
//! ** NOTE: We recommend using the high-level methods on
//! [`crate::solvers::ProbabilisticLinearSolver`] instead. This module is intended for
//! use cases where fine-grained control over the iteration is required.
//!
//! A [`SolveIterator`] owns the [`LinearSolverState`] of one run and advances it
//! one iteration at a time: select an action, observe it, update the belief and
//! check convergence. Every iteration is committed to the state as a whole or not
//! at all, so a caller can stop pulling at any point and still inspect a
//! consistent state.

mod iteration;
mod state;

pub use iteration::{EXACT_SOLUTION, SolveIterator, SolverStep};
pub use state::LinearSolverState;
