//! Batch prediction matrices.
//!
//! Over a horizon of `N` samples the stacked outputs are affine in the
//! current augmented state `xa` and the stacked decision vector `u`:
//!
//! ```text
//! ŷ = [y_1; …; y_N] = W xa + Z u
//!
//! W = [ Ca Φ   ]      Z = [ Ca Γ          0       …  0    ]
//!     [ Ca Φ²  ]          [ Ca Φ Γ        Ca Γ    …  0    ]
//!     [ …      ]          [ …                        …    ]
//!     [ Ca Φ^N ]          [ Ca Φ^(N-1) Γ  …          Ca Γ ]
//! ```
//!
//! Block `(i, j)` of `Z` is `Ca Φ^(i-j) Γ` for `j <= i` (0-based), so `Z` is
//! block lower-triangular and block-Toeplitz. Both formulations share this
//! builder; they differ only in `(Φ, Γ, Ca)`:
//!
//! - Absolute: `Φ = A_d`, `Γ = B_d`, `Ca = C_d`, `xa = x`, `u` = inputs.
//! - Incremental: `Φ = [A_d 0; C_d A_d I]`, `Γ = [B_d; C_d B_d]`,
//!   `Ca = [0 I]`, `xa = [Δx; y]`, `u` = input moves.

use nalgebra::{DMatrix, DVector};
use recede_core::{ConfigError, Formulation};

use crate::model::DiscretePlant;

// ---------------------------------------------------------------------------
// PredictionModel
// ---------------------------------------------------------------------------

/// The `(Φ, Γ, Ca)` triple the batch matrices are built from.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionModel {
    pub phi: DMatrix<f64>,
    pub gamma: DMatrix<f64>,
    pub ca: DMatrix<f64>,
    pub formulation: Formulation,
    /// Plant state dimension `n` (not the augmented one).
    pub state_dim: usize,
}

impl PredictionModel {
    /// Plain state-space prediction on absolute inputs.
    ///
    /// # Errors
    /// `InvalidValue` if the plant has direct feedthrough.
    pub fn absolute(plant: &DiscretePlant) -> Result<Self, ConfigError> {
        reject_feedthrough(plant)?;
        Ok(Self {
            phi: plant.ad.clone(),
            gamma: plant.bd.clone(),
            ca: plant.cd.clone(),
            formulation: Formulation::Absolute,
            state_dim: plant.state_dim(),
        })
    }

    /// Integral-action prediction on input moves.
    ///
    /// # Errors
    /// `InvalidValue` if the plant has direct feedthrough.
    pub fn incremental(plant: &DiscretePlant) -> Result<Self, ConfigError> {
        reject_feedthrough(plant)?;
        let n = plant.state_dim();
        let m = plant.input_dim();
        let p = plant.output_dim();

        let mut phi = DMatrix::zeros(n + p, n + p);
        phi.view_mut((0, 0), (n, n)).copy_from(&plant.ad);
        phi.view_mut((n, 0), (p, n)).copy_from(&(&plant.cd * &plant.ad));
        phi.view_mut((n, n), (p, p)).fill_with_identity();

        let mut gamma = DMatrix::zeros(n + p, m);
        gamma.view_mut((0, 0), (n, m)).copy_from(&plant.bd);
        gamma.view_mut((n, 0), (p, m)).copy_from(&(&plant.cd * &plant.bd));

        let mut ca = DMatrix::zeros(p, n + p);
        ca.view_mut((0, n), (p, p)).fill_with_identity();

        Ok(Self {
            phi,
            gamma,
            ca,
            formulation: Formulation::Incremental,
            state_dim: n,
        })
    }

    /// Dispatch on [`Formulation`].
    ///
    /// # Errors
    /// `InvalidValue` if the plant has direct feedthrough.
    pub fn for_formulation(
        plant: &DiscretePlant,
        formulation: Formulation,
    ) -> Result<Self, ConfigError> {
        match formulation {
            Formulation::Absolute => Self::absolute(plant),
            Formulation::Incremental => Self::incremental(plant),
        }
    }

    /// Dimension of `xa`.
    pub fn augmented_dim(&self) -> usize {
        self.phi.nrows()
    }

    pub fn input_dim(&self) -> usize {
        self.gamma.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.ca.nrows()
    }
}

fn reject_feedthrough(plant: &DiscretePlant) -> Result<(), ConfigError> {
    if plant.has_feedthrough() {
        return Err(ConfigError::invalid(
            "D",
            "direct feedthrough is not supported by the prediction model",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// PredictionMatrices
// ---------------------------------------------------------------------------

/// Batch matrices `W` (`N·p × na`) and `Z` (`N·p × N·m`).
///
/// Read-only after construction; rebuild only when the model changes.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionMatrices {
    pub w: DMatrix<f64>,
    pub z: DMatrix<f64>,
    pub horizon: usize,
    pub output_dim: usize,
    pub input_dim: usize,
    pub formulation: Formulation,
}

impl PredictionMatrices {
    /// Build `W` and `Z` from repeated products of `Φ`.
    ///
    /// A horizon of zero gives 0-row matrices.
    pub fn build(model: &PredictionModel, horizon: usize) -> Self {
        let na = model.augmented_dim();
        let m = model.input_dim();
        let p = model.output_dim();

        // ca_phi[k] = Ca Φ^k, k = 0..=N
        let mut ca_phi = Vec::with_capacity(horizon + 1);
        ca_phi.push(model.ca.clone());
        for k in 0..horizon {
            let next = &ca_phi[k] * &model.phi;
            ca_phi.push(next);
        }
        // markov[k] = Ca Φ^k Γ, k = 0..N-1
        let markov: Vec<DMatrix<f64>> = ca_phi
            .iter()
            .take(horizon)
            .map(|cp| cp * &model.gamma)
            .collect();

        let mut w = DMatrix::zeros(horizon * p, na);
        let mut z = DMatrix::zeros(horizon * p, horizon * m);
        for i in 0..horizon {
            w.view_mut((i * p, 0), (p, na)).copy_from(&ca_phi[i + 1]);
            for j in 0..=i {
                z.view_mut((i * p, j * m), (p, m))
                    .copy_from(&markov[i - j]);
            }
        }

        Self {
            w,
            z,
            horizon,
            output_dim: p,
            input_dim: m,
            formulation: model.formulation,
        }
    }

    /// Stacked predicted outputs `W xa + Z u`.
    pub fn predict(&self, xa: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        &self.w * xa + &self.z * u
    }

    /// Free response `W xa` (zero decision vector).
    pub fn free_response(&self, xa: &DVector<f64>) -> DVector<f64> {
        &self.w * xa
    }

    /// Length of the stacked decision vector, `N·m`.
    pub fn decision_dim(&self) -> usize {
        self.horizon * self.input_dim
    }

    /// Length of the stacked output vector, `N·p`.
    pub fn stacked_output_dim(&self) -> usize {
        self.horizon * self.output_dim
    }
}
