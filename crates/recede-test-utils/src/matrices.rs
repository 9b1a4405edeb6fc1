//! Random dense matrices for solver and prediction tests.

use nalgebra::{DMatrix, DVector};
use rand::Rng;

/// Matrix with entries drawn uniformly from `[-scale, scale)`.
pub fn random_matrix<R: Rng>(rng: &mut R, rows: usize, cols: usize, scale: f64) -> DMatrix<f64> {
    DMatrix::from_fn(rows, cols, |_, _| rng.gen_range(-scale..scale))
}

/// Vector with entries drawn uniformly from `[-scale, scale)`.
pub fn random_vector<R: Rng>(rng: &mut R, len: usize, scale: f64) -> DVector<f64> {
    DVector::from_fn(len, |_, _| rng.gen_range(-scale..scale))
}

/// Symmetric positive definite matrix `M^T M + shift * I`.
///
/// `shift > 0` bounds the smallest eigenvalue away from zero.
pub fn random_spd<R: Rng>(rng: &mut R, dim: usize, shift: f64) -> DMatrix<f64> {
    let m = random_matrix(rng, dim, dim, 1.0);
    m.transpose() * &m + DMatrix::identity(dim, dim) * shift
}
