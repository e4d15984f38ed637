//! Shared problem generators and reference solvers for the integration tests.
#![allow(dead_code)]

use faer::{Mat, Scale};
use prob_linsolve::LinearSystem;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Creates a random, well-conditioned symmetric positive-definite system.
///
/// The matrix is `A = MᵗM / n + I` for a matrix `M` with entries uniform in
/// `[-0.5, 0.5)`, so its spectrum lies in `[1, 1 + n/12]` with high probability and
/// CG converges well before `n` iterations. A fixed seed keeps the tests
/// deterministic.
pub fn random_spd_system(n: usize, seed: u64) -> (Mat<f64>, Mat<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let m = Mat::from_fn(n, n, |_, _| rng.random::<f64>() - 0.5);
    let mut a = &(m.transpose() * m.as_ref()) * Scale(1.0 / n as f64);
    for i in 0..n {
        a[(i, i)] += 1.0;
    }
    let b = Mat::from_fn(n, 1, |_, _| rng.random::<f64>() - 0.5);
    (a, b)
}

/// Same as [`random_spd_system`], wrapped into a [`LinearSystem`] carrying the matrix
/// as a dense operator.
pub fn random_problem(n: usize, seed: u64) -> (LinearSystem, Mat<f64>) {
    let (a, b) = random_spd_system(n, seed);
    let problem = LinearSystem::new(a.clone(), b).expect("valid random system");
    (problem, a)
}

/// Runs `iterations` steps of textbook conjugate gradients from `x0` and returns
/// every iterate after the initial one.
pub fn conjugate_gradient_iterates(
    a: &Mat<f64>,
    b: &Mat<f64>,
    x0: Mat<f64>,
    iterations: usize,
) -> Vec<Mat<f64>> {
    let mut x = x0;
    let mut r = &(a * &x) - b;
    let mut p = &r * Scale(-1.0);
    let mut rr = r.norm_l2().powi(2);
    let mut iterates = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let ap = a * &p;
        let alpha = rr / (p.transpose() * ap.as_ref())[(0, 0)];
        x = &x + &(&p * Scale(alpha));
        r = &r + &(&ap * Scale(alpha));
        let rr_next = r.norm_l2().powi(2);
        p = &(&p * Scale(rr_next / rr)) - &r;
        rr = rr_next;
        iterates.push(x.clone());
    }
    iterates
}

/// Returns the smallest and largest eigenvalue of the symmetric part of `m`.
pub fn eigenvalue_range(m: &Mat<f64>) -> (f64, f64) {
    let sym = Mat::from_fn(m.nrows(), m.ncols(), |i, j| 0.5 * (m[(i, j)] + m[(j, i)]));
    let evd = sym
        .as_ref()
        .self_adjoint_eigen(faer::Side::Lower)
        .expect("eigendecomposition of a symmetric matrix");
    let eigvals = evd.S();
    let n = m.nrows();
    let min = (0..n).map(|i| eigvals[i]).fold(f64::INFINITY, f64::min);
    let max = (0..n).map(|i| eigvals[i]).fold(f64::NEG_INFINITY, f64::max);
    (min, max)
}
