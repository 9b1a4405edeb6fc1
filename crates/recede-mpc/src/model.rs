//! Linear plant models and their zero-order-hold discretization.
//!
//! A continuous plant
//!
//! ```text
//! ẋ = A x + B u
//! y = C x + D u
//! ```
//!
//! is sampled at period `dt` with the input held constant between samples:
//!
//! ```text
//! [A_d  B_d] = expm(dt * [A  B])
//! [ 0    I ]             [0  0]
//! ```
//!
//! which gives `A_d = e^(A dt)` and `B_d = ∫₀^dt e^(Aτ) dτ · B` in one
//! exponential, without inverting `A`.

use nalgebra::{DMatrix, DVector};
use recede_core::{ConfigError, NumericalError, RecedeError};

// ---------------------------------------------------------------------------
// LinearPlant
// ---------------------------------------------------------------------------

/// Continuous-time linear state-space plant. Immutable after creation.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearPlant {
    a: DMatrix<f64>,
    b: DMatrix<f64>,
    c: DMatrix<f64>,
    d: DMatrix<f64>,
}

impl LinearPlant {
    /// Build a plant from its four matrices.
    ///
    /// # Errors
    /// `NotSquare` if `A` is not square, `DimensionMismatch` if `B`, `C` or
    /// `D` disagree with `A`, `NonFinite` if any entry is NaN or Inf.
    pub fn new(
        a: DMatrix<f64>,
        b: DMatrix<f64>,
        c: DMatrix<f64>,
        d: DMatrix<f64>,
    ) -> Result<Self, RecedeError> {
        let (rows, cols) = a.shape();
        if rows != cols {
            return Err(NumericalError::NotSquare {
                name: "A",
                rows,
                cols,
            }
            .into());
        }
        let n = rows;
        let m = b.ncols();
        let p = c.nrows();
        if b.nrows() != n {
            return Err(ConfigError::mismatch("B", (n, m), b.shape()).into());
        }
        if c.ncols() != n {
            return Err(ConfigError::mismatch("C", (p, n), c.shape()).into());
        }
        if d.shape() != (p, m) {
            return Err(ConfigError::mismatch("D", (p, m), d.shape()).into());
        }
        for (name, mat) in [("A", &a), ("B", &b), ("C", &c), ("D", &d)] {
            if mat.iter().any(|v| !v.is_finite()) {
                return Err(NumericalError::NonFinite(name).into());
            }
        }
        Ok(Self { a, b, c, d })
    }

    /// Plant with full-state output (`C = I`, `D = 0`).
    ///
    /// # Errors
    /// Same as [`LinearPlant::new`].
    pub fn full_state(a: DMatrix<f64>, b: DMatrix<f64>) -> Result<Self, RecedeError> {
        let n = a.nrows();
        let m = b.ncols();
        Self::new(a, b, DMatrix::identity(n, n), DMatrix::zeros(n, m))
    }

    /// Keep only the output rows at `indices`, in the given order.
    ///
    /// # Errors
    /// `InvalidValue` if the list is empty or an index is out of range.
    pub fn select_outputs(&self, indices: &[usize]) -> Result<Self, ConfigError> {
        if indices.is_empty() {
            return Err(ConfigError::invalid("outputs", "must not be empty"));
        }
        let p = self.output_dim();
        if let Some(&bad) = indices.iter().find(|&&i| i >= p) {
            return Err(ConfigError::invalid(
                "outputs",
                format!("index {bad} out of range for {p} outputs"),
            ));
        }
        Ok(Self {
            a: self.a.clone(),
            b: self.b.clone(),
            c: self.c.select_rows(indices),
            d: self.d.select_rows(indices),
        })
    }

    pub const fn a(&self) -> &DMatrix<f64> {
        &self.a
    }
    pub const fn b(&self) -> &DMatrix<f64> {
        &self.b
    }
    pub const fn c(&self) -> &DMatrix<f64> {
        &self.c
    }
    pub const fn d(&self) -> &DMatrix<f64> {
        &self.d
    }

    /// Number of states `n`.
    pub fn state_dim(&self) -> usize {
        self.a.nrows()
    }

    /// Number of inputs `m`.
    pub fn input_dim(&self) -> usize {
        self.b.ncols()
    }

    /// Number of outputs `p`.
    pub fn output_dim(&self) -> usize {
        self.c.nrows()
    }

    /// Zero-order-hold discretization via the matrix exponential.
    ///
    /// # Errors
    /// `InvalidSamplePeriod` if `dt` is not finite and positive.
    pub fn discretize(&self, dt: f64) -> Result<DiscretePlant, NumericalError> {
        check_sample_period(dt)?;
        let (ad, bd) = discretize_matrix_exp(&self.a, &self.b, dt);
        Ok(DiscretePlant {
            ad,
            bd,
            cd: self.c.clone(),
            dd: self.d.clone(),
            dt,
        })
    }

    /// First-order Euler discretization, `A_d = I + A dt`, `B_d = B dt`.
    ///
    /// Kept for comparison. Prefer [`LinearPlant::discretize`].
    ///
    /// # Errors
    /// `InvalidSamplePeriod` if `dt` is not finite and positive.
    pub fn discretize_euler(&self, dt: f64) -> Result<DiscretePlant, NumericalError> {
        check_sample_period(dt)?;
        let (ad, bd) = discretize_euler(&self.a, &self.b, dt);
        Ok(DiscretePlant {
            ad,
            bd,
            cd: self.c.clone(),
            dd: self.d.clone(),
            dt,
        })
    }
}

fn check_sample_period(dt: f64) -> Result<(), NumericalError> {
    if dt.is_finite() && dt > 0.0 {
        Ok(())
    } else {
        Err(NumericalError::InvalidSamplePeriod(dt))
    }
}

// ---------------------------------------------------------------------------
// DiscretePlant
// ---------------------------------------------------------------------------

/// Discrete-time plant `x⁺ = A_d x + B_d u`, `y = C_d x + D_d u`.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscretePlant {
    pub ad: DMatrix<f64>,
    pub bd: DMatrix<f64>,
    pub cd: DMatrix<f64>,
    pub dd: DMatrix<f64>,
    /// Sample period in seconds.
    pub dt: f64,
}

impl DiscretePlant {
    pub fn state_dim(&self) -> usize {
        self.ad.nrows()
    }

    pub fn input_dim(&self) -> usize {
        self.bd.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.cd.nrows()
    }

    /// Whether the plant has direct feedthrough (`D_d ≠ 0`).
    pub fn has_feedthrough(&self) -> bool {
        self.dd.iter().any(|&v| v != 0.0)
    }

    /// Advance one sample.
    pub fn step(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        &self.ad * x + &self.bd * u
    }

    /// Output at the current sample.
    pub fn output(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        &self.cd * x + &self.dd * u
    }
}

// ---------------------------------------------------------------------------
// Discretization kernels
// ---------------------------------------------------------------------------

/// Discretize `(A, B)` with the augmented matrix exponential.
pub fn discretize_matrix_exp(
    a_c: &DMatrix<f64>,
    b_c: &DMatrix<f64>,
    dt: f64,
) -> (DMatrix<f64>, DMatrix<f64>) {
    let n_x = a_c.nrows();
    let n_u = b_c.ncols();
    let n_aug = n_x + n_u;

    let mut aug = DMatrix::zeros(n_aug, n_aug);
    aug.view_mut((0, 0), (n_x, n_x)).copy_from(a_c);
    aug.view_mut((0, n_x), (n_x, n_u)).copy_from(b_c);
    aug *= dt;

    let exp_aug = matrix_exp(&aug);

    let a_d = exp_aug.view((0, 0), (n_x, n_x)).clone_owned();
    let b_d = exp_aug.view((0, n_x), (n_x, n_u)).clone_owned();

    (a_d, b_d)
}

/// Discretize `(A, B)` with forward Euler.
pub fn discretize_euler(
    a_c: &DMatrix<f64>,
    b_c: &DMatrix<f64>,
    dt: f64,
) -> (DMatrix<f64>, DMatrix<f64>) {
    let n = a_c.nrows();
    let a_d = DMatrix::identity(n, n) + a_c * dt;
    let b_d = b_c * dt;
    (a_d, b_d)
}

/// Matrix exponential `e^M` by scaling-and-squaring with a Taylor series.
///
/// `M` is scaled by `2^-s` until its infinity norm is at most 0.5, where the
/// series reaches machine precision in well under 20 terms.
pub fn matrix_exp(m: &DMatrix<f64>) -> DMatrix<f64> {
    let n = m.nrows();

    let norm_inf = m
        .row_iter()
        .map(|row| row.iter().map(|x| x.abs()).sum::<f64>())
        .fold(0.0_f64, f64::max);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let s = if norm_inf > 0.5 {
        ((norm_inf / 0.5).log2().ceil() as i32).max(1)
    } else {
        0
    };

    let m_scaled = m * 2f64.powi(-s);

    let mut result = DMatrix::identity(n, n);
    let mut term = DMatrix::identity(n, n);

    for k in 1..=20 {
        term = &term * &m_scaled / f64::from(k);
        result += &term;
        let term_norm = term.iter().map(|x| x.abs()).fold(0.0_f64, f64::max);
        if term_norm < 1e-17 {
            break;
        }
    }

    for _ in 0..s {
        result = &result * &result;
    }

    result
}
