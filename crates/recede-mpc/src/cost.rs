//! Quadratic tracking cost over the horizon.
//!
//! ```text
//! J(u) = (r - W xa - Z u)ᵀ Q (r - W xa - Z u) + uᵀ R u
//!      = uᵀ H u + fᵀ u + const
//!
//! H = Zᵀ Q Z + R
//! f = -2 Zᵀ Q (r - W xa)
//! ```
//!
//! `H` and `ZᵀQ` depend only on the model and weights, so they live in a
//! [`CostTemplate`] built once; each tick only forms `f`.

use nalgebra::{DMatrix, DVector};
use recede_core::ConfigError;

use crate::prediction::PredictionMatrices;

/// Relative tolerance for the PSD check on weight matrices.
const PSD_TOLERANCE: f64 = 1e-10;

// ---------------------------------------------------------------------------
// CostWeights
// ---------------------------------------------------------------------------

/// Stacked weights: `Q` over `N·p` outputs, `R` over `N·m` decisions.
#[derive(Clone, Debug, PartialEq)]
pub struct CostWeights {
    pub q: DMatrix<f64>,
    pub r: DMatrix<f64>,
}

impl CostWeights {
    /// Build from full stacked matrices.
    ///
    /// # Errors
    /// `DimensionMismatch` if a matrix is not square, `InvalidValue` if it
    /// is not symmetric positive semi-definite.
    pub fn new(q: DMatrix<f64>, r: DMatrix<f64>) -> Result<Self, ConfigError> {
        check_psd("Q", &q)?;
        check_psd("R", &r)?;
        Ok(Self { q, r })
    }

    /// Replicate per-output and per-input weights across `horizon` samples
    /// into block-diagonal `Q` and `R`.
    ///
    /// # Errors
    /// `InvalidValue` on negative or non-finite weights.
    pub fn from_diagonal(
        output_weights: &[f64],
        input_weights: &[f64],
        horizon: usize,
    ) -> Result<Self, ConfigError> {
        let q_diag = replicate("output_weights", output_weights, horizon)?;
        let r_diag = replicate("input_weights", input_weights, horizon)?;
        Ok(Self {
            q: DMatrix::from_diagonal(&q_diag),
            r: DMatrix::from_diagonal(&r_diag),
        })
    }
}

fn replicate(field: &str, weights: &[f64], horizon: usize) -> Result<DVector<f64>, ConfigError> {
    if let Some(&bad) = weights.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
        return Err(ConfigError::invalid(
            field,
            format!("{bad} (must be finite and >= 0)"),
        ));
    }
    let k = weights.len();
    Ok(DVector::from_fn(k * horizon, |i, _| weights[i % k]))
}

fn check_psd(name: &str, m: &DMatrix<f64>) -> Result<(), ConfigError> {
    if !m.is_square() {
        return Err(ConfigError::mismatch(name, (m.nrows(), m.nrows()), m.shape()));
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(ConfigError::invalid(name, "contains NaN or Inf"));
    }
    let scale = m.amax().max(1.0);
    if (m - m.transpose()).amax() > PSD_TOLERANCE * scale {
        return Err(ConfigError::invalid(name, "must be symmetric"));
    }
    if m.nrows() > 0 {
        let min_eig = m.clone().symmetric_eigen().eigenvalues.min();
        if min_eig < -PSD_TOLERANCE * scale {
            return Err(ConfigError::invalid(
                name,
                format!("must be positive semi-definite (min eigenvalue {min_eig:e})"),
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CostTemplate
// ---------------------------------------------------------------------------

/// Tick-invariant parts of the cost: `H` and `ZᵀQ`.
#[derive(Clone, Debug, PartialEq)]
pub struct CostTemplate {
    pub h: DMatrix<f64>,
    zt_q: DMatrix<f64>,
    q: DMatrix<f64>,
}

impl CostTemplate {
    /// Precompute `H = ZᵀQZ + R` (symmetrized) and `ZᵀQ`.
    ///
    /// # Errors
    /// `DimensionMismatch` if `Q` or `R` does not match the stacked sizes.
    pub fn new(prediction: &PredictionMatrices, weights: &CostWeights) -> Result<Self, ConfigError> {
        let ny = prediction.stacked_output_dim();
        let nu = prediction.decision_dim();
        if weights.q.shape() != (ny, ny) {
            return Err(ConfigError::mismatch("Q", (ny, ny), weights.q.shape()));
        }
        if weights.r.shape() != (nu, nu) {
            return Err(ConfigError::mismatch("R", (nu, nu), weights.r.shape()));
        }

        let zt_q = prediction.z.transpose() * &weights.q;
        let h = &zt_q * &prediction.z + &weights.r;
        let h = (&h + h.transpose()) * 0.5;

        Ok(Self {
            h,
            zt_q,
            q: weights.q.clone(),
        })
    }

    /// Decision dimension `N·m`.
    pub fn dim(&self) -> usize {
        self.h.nrows()
    }

    /// Per-tick cost for reference `r` and free response `W xa`.
    pub fn assemble(&self, reference: &DVector<f64>, free_response: &DVector<f64>) -> QuadraticCost {
        let error = reference - free_response;
        let f = &self.zt_q * &error * -2.0;
        let constant = error.dot(&(&self.q * &error));
        QuadraticCost {
            h: self.h.clone(),
            f,
            constant,
        }
    }
}

// ---------------------------------------------------------------------------
// QuadraticCost
// ---------------------------------------------------------------------------

/// `uᵀ H u + fᵀ u + constant`.
#[derive(Clone, Debug, PartialEq)]
pub struct QuadraticCost {
    pub h: DMatrix<f64>,
    pub f: DVector<f64>,
    pub constant: f64,
}

impl QuadraticCost {
    pub fn dim(&self) -> usize {
        self.f.len()
    }

    /// Objective value at `u`, including the constant term.
    pub fn evaluate(&self, u: &DVector<f64>) -> f64 {
        u.dot(&(&self.h * u)) + self.f.dot(u) + self.constant
    }

    /// Gradient `2 H u + f`.
    pub fn gradient(&self, u: &DVector<f64>) -> DVector<f64> {
        &self.h * u * 2.0 + &self.f
    }
}
