//! Linear constraints on the stacked decision vector.
//!
//! Every bound is written against an affine image of the decision `u`:
//!
//! ```text
//! inputs   U  = M u + c            absolute: M = I, c = 0
//!                                  incremental: M = block lower-triangular
//!                                  ones, c = 1 ⊗ u_prev
//! moves    ΔU = D U - E u_prev     D block bidiagonal [I; -I I; …], E = [I; 0; …]
//! outputs  Ŷ  = Z u + W xa
//! ```
//!
//! A finite upper bound `hi` on row `G_k u + g_k` becomes `G_k u <= hi - g_k`,
//! a finite lower bound becomes `-G_k u <= g_k - lo`, and `lo == hi` becomes
//! the equality `G_k u = hi - g_k`. Infinite sides produce no row.

use nalgebra::{DMatrix, DVector};
use recede_core::{ConfigError, ConstraintsConfig, Formulation};

use crate::prediction::PredictionMatrices;

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// Per-sample box `lower <= v <= upper`, replicated over the horizon.
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds {
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
}

impl Bounds {
    /// # Errors
    /// `DimensionMismatch` on unequal lengths, `InvalidValue` on NaN,
    /// `lower > upper` or a side no finite value can satisfy.
    pub fn new(lower: DVector<f64>, upper: DVector<f64>) -> Result<Self, ConfigError> {
        if lower.len() != upper.len() {
            return Err(ConfigError::mismatch(
                "bounds.upper",
                (lower.len(), 1),
                (upper.len(), 1),
            ));
        }
        for (i, (l, u)) in lower.iter().zip(upper.iter()).enumerate() {
            if l.is_nan() || u.is_nan() {
                return Err(ConfigError::invalid("bounds", format!("NaN at index {i}")));
            }
            if *l == f64::INFINITY || *u == f64::NEG_INFINITY {
                return Err(ConfigError::invalid(
                    "bounds",
                    format!("unsatisfiable infinite bound at index {i}"),
                ));
            }
            if l > u {
                return Err(ConfigError::invalid(
                    "bounds",
                    format!("lower {l} exceeds upper {u} at index {i}"),
                ));
            }
        }
        Ok(Self { lower, upper })
    }

    /// `-limit <= v <= limit` for every component.
    ///
    /// # Errors
    /// `InvalidValue` if `limit` is negative or NaN.
    pub fn symmetric(dim: usize, limit: f64) -> Result<Self, ConfigError> {
        Self::new(
            DVector::from_element(dim, -limit),
            DVector::from_element(dim, limit),
        )
    }

    /// Build from optional config vectors; a missing side is infinite.
    ///
    /// # Errors
    /// `DimensionMismatch` if a present vector does not have `dim` entries.
    pub fn from_options(
        name: &str,
        lower: Option<&[f64]>,
        upper: Option<&[f64]>,
        dim: usize,
    ) -> Result<Option<Self>, ConfigError> {
        if lower.is_none() && upper.is_none() {
            return Ok(None);
        }
        let side = |suffix: &str, values: Option<&[f64]>, fill: f64| match values {
            Some(v) if v.len() != dim => Err(ConfigError::mismatch(
                format!("{name}_{suffix}"),
                (dim, 1),
                (v.len(), 1),
            )),
            Some(v) => Ok(DVector::from_column_slice(v)),
            None => Ok(DVector::from_element(dim, fill)),
        };
        let lower = side("min", lower, f64::NEG_INFINITY)?;
        let upper = side("max", upper, f64::INFINITY)?;
        Self::new(lower, upper).map(Some)
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    /// Component-wise clamp into the box.
    pub fn clamp(&self, v: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(v.len(), |i, _| v[i].max(self.lower[i]).min(self.upper[i]))
    }

    /// Whether `v` lies in the box up to `tol`.
    pub fn contains(&self, v: &DVector<f64>, tol: f64) -> bool {
        v.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(x, (l, u))| *x >= l - tol && *x <= u + tol)
    }
}

// ---------------------------------------------------------------------------
// ConstraintSet
// ---------------------------------------------------------------------------

/// Declared bounds, constant across the horizon.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstraintSet {
    /// Actuator saturation on the applied inputs.
    pub input: Option<Bounds>,
    /// Maximum `|u_i - u_{i-1}|` per input.
    pub input_rate: Option<DVector<f64>>,
    /// Bounds on the predicted outputs.
    pub output: Option<Bounds>,
}

impl ConstraintSet {
    /// No constraints.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build from config for a plant with `m` inputs and `p` outputs.
    ///
    /// # Errors
    /// `DimensionMismatch` on wrong vector lengths, `InvalidValue` on bad
    /// values.
    pub fn from_config(
        config: &ConstraintsConfig,
        input_dim: usize,
        output_dim: usize,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let input = Bounds::from_options(
            "input",
            config.input_min.as_deref(),
            config.input_max.as_deref(),
            input_dim,
        )?;
        let output = Bounds::from_options(
            "output",
            config.output_min.as_deref(),
            config.output_max.as_deref(),
            output_dim,
        )?;
        let input_rate = match &config.input_rate {
            Some(rate) if rate.len() != input_dim => {
                return Err(ConfigError::mismatch(
                    "input_rate",
                    (input_dim, 1),
                    (rate.len(), 1),
                ));
            }
            Some(rate) => Some(DVector::from_column_slice(rate)),
            None => None,
        };
        Ok(Self {
            input,
            input_rate,
            output,
        })
    }

    pub const fn is_empty(&self) -> bool {
        self.input.is_none() && self.input_rate.is_none() && self.output.is_none()
    }

    /// Clamp an input into the actuator box (identity when unbounded).
    pub fn clamp_input(&self, u: &DVector<f64>) -> DVector<f64> {
        self.input.as_ref().map_or_else(|| u.clone(), |b| b.clamp(u))
    }
}

// ---------------------------------------------------------------------------
// LinearConstraints
// ---------------------------------------------------------------------------

/// `A_eq u = b_eq`, `A_ineq u <= b_ineq`.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearConstraints {
    pub a_eq: DMatrix<f64>,
    pub b_eq: DVector<f64>,
    pub a_ineq: DMatrix<f64>,
    pub b_ineq: DVector<f64>,
}

impl LinearConstraints {
    /// No rows over `dim` decision variables.
    pub fn empty(dim: usize) -> Self {
        Self {
            a_eq: DMatrix::zeros(0, dim),
            b_eq: DVector::zeros(0),
            a_ineq: DMatrix::zeros(0, dim),
            b_ineq: DVector::zeros(0),
        }
    }

    pub fn n_eq(&self) -> usize {
        self.a_eq.nrows()
    }

    pub fn n_ineq(&self) -> usize {
        self.a_ineq.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.n_eq() == 0 && self.n_ineq() == 0
    }

    /// Whether `u` satisfies every row up to `tol`.
    pub fn is_satisfied_by(&self, u: &DVector<f64>, tol: f64) -> bool {
        let eq_ok = (&self.a_eq * u - &self.b_eq).iter().all(|r| r.abs() <= tol);
        let ineq_ok = (&self.a_ineq * u - &self.b_ineq).iter().all(|r| *r <= tol);
        eq_ok && ineq_ok
    }
}

/// Row-major accumulator for equality and inequality rows.
struct RowCollector {
    ncols: usize,
    eq: Vec<f64>,
    eq_rhs: Vec<f64>,
    ineq: Vec<f64>,
    ineq_rhs: Vec<f64>,
}

impl RowCollector {
    const fn new(ncols: usize) -> Self {
        Self {
            ncols,
            eq: Vec::new(),
            eq_rhs: Vec::new(),
            ineq: Vec::new(),
            ineq_rhs: Vec::new(),
        }
    }

    /// Add rows for `lo <= G u + g <= hi`, with `lo`/`hi` given per sample
    /// and cycled over the rows of `G`.
    fn push_box(&mut self, g_mat: &DMatrix<f64>, offset: &DVector<f64>, bounds: &Bounds) {
        let k = bounds.dim();
        for row in 0..g_mat.nrows() {
            let (lo, hi) = (bounds.lower[row % k], bounds.upper[row % k]);
            let g_row = g_mat.row(row);
            if lo == hi && lo.is_finite() {
                self.eq.extend(g_row.iter());
                self.eq_rhs.push(hi - offset[row]);
                continue;
            }
            if hi.is_finite() {
                self.ineq.extend(g_row.iter());
                self.ineq_rhs.push(hi - offset[row]);
            }
            if lo.is_finite() {
                self.ineq.extend(g_row.iter().map(|v| -v));
                self.ineq_rhs.push(offset[row] - lo);
            }
        }
    }

    fn finish(self) -> LinearConstraints {
        let n_eq = self.eq_rhs.len();
        let n_ineq = self.ineq_rhs.len();
        LinearConstraints {
            a_eq: DMatrix::from_row_slice(n_eq, self.ncols, &self.eq),
            b_eq: DVector::from_vec(self.eq_rhs),
            a_ineq: DMatrix::from_row_slice(n_ineq, self.ncols, &self.ineq),
            b_ineq: DVector::from_vec(self.ineq_rhs),
        }
    }
}

// ---------------------------------------------------------------------------
// ConstraintBuilder
// ---------------------------------------------------------------------------

/// Turns a [`ConstraintSet`] into per-tick [`LinearConstraints`].
///
/// The maps `M`, `D M` and `Z` are fixed; only the offsets that depend on
/// `u_prev` and `W xa` are recomputed each tick.
#[derive(Clone, Debug)]
pub struct ConstraintBuilder {
    set: ConstraintSet,
    formulation: Formulation,
    horizon: usize,
    input_dim: usize,
    input_map: DMatrix<f64>,
    rate_map: DMatrix<f64>,
    output_map: Option<DMatrix<f64>>,
}

impl ConstraintBuilder {
    /// # Errors
    /// `DimensionMismatch` if the bounds do not match the prediction sizes.
    pub fn new(set: ConstraintSet, prediction: &PredictionMatrices) -> Result<Self, ConfigError> {
        let n = prediction.horizon;
        let m = prediction.input_dim;
        let p = prediction.output_dim;
        if let Some(b) = &set.input {
            if b.dim() != m {
                return Err(ConfigError::mismatch("input bounds", (m, 1), (b.dim(), 1)));
            }
        }
        if let Some(r) = &set.input_rate {
            if r.len() != m {
                return Err(ConfigError::mismatch("input_rate", (m, 1), (r.len(), 1)));
            }
        }
        if let Some(b) = &set.output {
            if b.dim() != p {
                return Err(ConfigError::mismatch("output bounds", (p, 1), (b.dim(), 1)));
            }
        }

        let input_map = match prediction.formulation {
            Formulation::Absolute => DMatrix::identity(n * m, n * m),
            Formulation::Incremental => block_lower_ones(n, m),
        };
        let rate_map = block_difference(n, m) * &input_map;
        let output_map = set.output.as_ref().map(|_| prediction.z.clone());

        Ok(Self {
            set,
            formulation: prediction.formulation,
            horizon: n,
            input_dim: m,
            input_map,
            rate_map,
            output_map,
        })
    }

    pub const fn set(&self) -> &ConstraintSet {
        &self.set
    }

    /// Stacked absolute inputs `U = M u + c` for a decision `u`.
    pub fn inputs_from_decision(&self, u: &DVector<f64>, u_prev: &DVector<f64>) -> DVector<f64> {
        &self.input_map * u + self.input_offset(u_prev)
    }

    fn input_offset(&self, u_prev: &DVector<f64>) -> DVector<f64> {
        match self.formulation {
            Formulation::Absolute => DVector::zeros(self.horizon * self.input_dim),
            Formulation::Incremental => tile(u_prev, self.horizon),
        }
    }

    /// Constraint rows for the current tick.
    ///
    /// # Arguments
    /// * `free_response` - `W xa` for the current augmented state
    /// * `u_prev` - input applied on the previous tick
    pub fn build(&self, free_response: &DVector<f64>, u_prev: &DVector<f64>) -> LinearConstraints {
        let nu = self.horizon * self.input_dim;
        let mut rows = RowCollector::new(nu);
        let c = self.input_offset(u_prev);

        if let Some(bounds) = &self.set.input {
            rows.push_box(&self.input_map, &c, bounds);
        }

        if let Some(rate) = &self.set.input_rate {
            // D c - E u_prev
            let mut offset = block_difference(self.horizon, self.input_dim) * &c;
            if self.horizon > 0 {
                let mut head = offset.rows_mut(0, self.input_dim);
                head -= u_prev;
            }
            let bounds = Bounds {
                lower: -rate.clone(),
                upper: rate.clone(),
            };
            rows.push_box(&self.rate_map, &offset, &bounds);
        }

        if let (Some(bounds), Some(z)) = (&self.set.output, &self.output_map) {
            rows.push_box(z, free_response, bounds);
        }

        rows.finish()
    }
}

/// `N·m × N·m` block lower-triangular matrix of identity blocks.
fn block_lower_ones(horizon: usize, m: usize) -> DMatrix<f64> {
    DMatrix::from_fn(horizon * m, horizon * m, |i, j| {
        if i % m == j % m && j / m <= i / m {
            1.0
        } else {
            0.0
        }
    })
}

/// `N·m × N·m` first-difference matrix: `I` on the diagonal blocks, `-I`
/// on the first sub-diagonal blocks.
fn block_difference(horizon: usize, m: usize) -> DMatrix<f64> {
    DMatrix::from_fn(horizon * m, horizon * m, |i, j| {
        if i == j {
            1.0
        } else if j + m == i {
            -1.0
        } else {
            0.0
        }
    })
}

/// Stack `v` `times` times.
fn tile(v: &DVector<f64>, times: usize) -> DVector<f64> {
    let k = v.len();
    DVector::from_fn(k * times, |i, _| v[i % k])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinearPlant;
    use crate::plants;
    use crate::prediction::PredictionModel;
    use approx::assert_relative_eq;

    fn prediction(formulation: Formulation, horizon: usize) -> PredictionMatrices {
        let plant: LinearPlant = plants::mass_spring_damper(1.0, 1.0, 0.2).unwrap();
        let d = plant.discretize(0.1).unwrap();
        let model = PredictionModel::for_formulation(&d, formulation).unwrap();
        PredictionMatrices::build(&model, horizon)
    }

    fn v(values: &[f64]) -> DVector<f64> {
        DVector::from_column_slice(values)
    }

    // -- Bounds --

    #[test]
    fn bounds_reject_inverted() {
        assert!(Bounds::new(v(&[1.0]), v(&[0.0])).is_err());
        assert!(Bounds::new(v(&[0.0, 0.0]), v(&[1.0])).is_err());
        assert!(Bounds::symmetric(1, f64::NAN).is_err());
    }

    #[test]
    fn bounds_reject_unsatisfiable_infinities() {
        let (inf, ninf) = (f64::INFINITY, f64::NEG_INFINITY);
        assert!(Bounds::new(v(&[ninf]), v(&[ninf])).is_err());
        assert!(Bounds::new(v(&[inf]), v(&[inf])).is_err());
        assert!(Bounds::from_options("input", None, Some(&[ninf]), 1).is_err());
        assert!(Bounds::from_options("input", Some(&[inf]), None, 1).is_err());
        assert!(Bounds::new(v(&[ninf]), v(&[inf])).is_ok());
    }

    #[test]
    fn bounds_from_options_fills_missing_side() {
        let b = Bounds::from_options("input", None, Some(&[2.0]), 1)
            .unwrap()
            .unwrap();
        assert_eq!(b.lower[0], f64::NEG_INFINITY);
        assert_eq!(b.upper[0], 2.0);
        assert!(Bounds::from_options("input", None, None, 1).unwrap().is_none());
        assert!(Bounds::from_options("input", Some(&[0.0, 1.0]), None, 1).is_err());
    }

    #[test]
    fn clamp_and_contains() {
        let b = Bounds::symmetric(2, 1.0).unwrap();
        let c = b.clamp(&v(&[3.0, -0.5]));
        assert_eq!(c, v(&[1.0, -0.5]));
        assert!(b.contains(&c, 0.0));
        assert!(!b.contains(&v(&[1.1, 0.0]), 1e-3));
    }

    #[test]
    fn set_from_config_checks_lengths() {
        let config = ConstraintsConfig {
            input_min: Some(vec![-1.0]),
            input_max: Some(vec![1.0]),
            input_rate: Some(vec![0.5, 0.5]),
            ..ConstraintsConfig::default()
        };
        assert!(matches!(
            ConstraintSet::from_config(&config, 1, 2),
            Err(ConfigError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn clamp_input_without_bounds_is_identity() {
        let set = ConstraintSet::none();
        assert!(set.is_empty());
        assert_eq!(set.clamp_input(&v(&[42.0])), v(&[42.0]));
    }

    // -- Helpers --

    #[test]
    fn block_helpers() {
        let l = block_lower_ones(3, 2);
        assert_eq!(l[(4, 0)], 1.0);
        assert_eq!(l[(4, 1)], 0.0);
        assert_eq!(l[(0, 2)], 0.0);
        let d = block_difference(3, 2);
        assert_relative_eq!(d * l, DMatrix::identity(6, 6), epsilon = 1e-15);
        assert_eq!(tile(&v(&[1.0, 2.0]), 2), v(&[1.0, 2.0, 1.0, 2.0]));
    }

    // -- Row assembly --

    #[test]
    fn absolute_input_box_rows() {
        let pm = prediction(Formulation::Absolute, 3);
        let set = ConstraintSet {
            input: Some(Bounds::symmetric(1, 2.0).unwrap()),
            ..ConstraintSet::none()
        };
        let builder = ConstraintBuilder::new(set, &pm).unwrap();
        let lc = builder.build(&DVector::zeros(6), &v(&[0.0]));
        assert_eq!(lc.n_eq(), 0);
        assert_eq!(lc.n_ineq(), 6);
        assert!(lc.is_satisfied_by(&v(&[2.0, -2.0, 0.0]), 1e-12));
        assert!(!lc.is_satisfied_by(&v(&[2.1, 0.0, 0.0]), 1e-12));
    }

    #[test]
    fn infinite_sides_are_skipped() {
        let pm = prediction(Formulation::Absolute, 4);
        let set = ConstraintSet {
            input: Some(Bounds::new(v(&[f64::NEG_INFINITY]), v(&[1.0])).unwrap()),
            ..ConstraintSet::none()
        };
        let lc = ConstraintBuilder::new(set, &pm)
            .unwrap()
            .build(&DVector::zeros(8), &v(&[0.0]));
        assert_eq!(lc.n_ineq(), 4);
    }

    #[test]
    fn degenerate_box_becomes_equality() {
        let pm = prediction(Formulation::Absolute, 5);
        let set = ConstraintSet {
            input: Some(Bounds::symmetric(1, 0.0).unwrap()),
            ..ConstraintSet::none()
        };
        let lc = ConstraintBuilder::new(set, &pm)
            .unwrap()
            .build(&DVector::zeros(10), &v(&[0.0]));
        assert_eq!(lc.n_eq(), 5);
        assert_eq!(lc.n_ineq(), 0);
        assert_eq!(lc.a_eq, DMatrix::identity(5, 5));
        assert_eq!(lc.b_eq, DVector::zeros(5));
    }

    #[test]
    fn infinite_degenerate_box_emits_no_equality() {
        let pm = prediction(Formulation::Absolute, 3);
        let set = ConstraintSet {
            input: Some(Bounds {
                lower: v(&[f64::NEG_INFINITY]),
                upper: v(&[f64::NEG_INFINITY]),
            }),
            ..ConstraintSet::none()
        };
        let lc = ConstraintBuilder::new(set, &pm)
            .unwrap()
            .build(&DVector::zeros(6), &v(&[0.0]));
        assert_eq!(lc.n_eq(), 0);
        assert!(lc.b_ineq.iter().all(|b| b.is_finite()));
    }

    #[test]
    fn incremental_input_bounds_use_cumulative_sum() {
        let pm = prediction(Formulation::Incremental, 3);
        let set = ConstraintSet {
            input: Some(Bounds::symmetric(1, 1.0).unwrap()),
            ..ConstraintSet::none()
        };
        let builder = ConstraintBuilder::new(set, &pm).unwrap();
        let u_prev = v(&[0.8]);
        let lc = builder.build(&DVector::zeros(6), &u_prev);

        // Moves 0.1, 0.1 reach 1.0; a third 0.1 would exceed it
        assert!(lc.is_satisfied_by(&v(&[0.1, 0.1, 0.0]), 1e-12));
        assert!(!lc.is_satisfied_by(&v(&[0.1, 0.1, 0.1]), 1e-12));
        assert_relative_eq!(
            builder.inputs_from_decision(&v(&[0.1, 0.1, -0.5]), &u_prev),
            v(&[0.9, 1.0, 0.5]),
            epsilon = 1e-12
        );
    }

    #[test]
    fn absolute_rate_limit_includes_previous_input() {
        let pm = prediction(Formulation::Absolute, 3);
        let set = ConstraintSet {
            input_rate: Some(v(&[0.5])),
            ..ConstraintSet::none()
        };
        let lc = ConstraintBuilder::new(set, &pm)
            .unwrap()
            .build(&DVector::zeros(6), &v(&[1.0]));
        assert_eq!(lc.n_ineq(), 6);
        assert!(lc.is_satisfied_by(&v(&[1.5, 1.0, 0.5]), 1e-12));
        // First move from u_prev = 1.0 is too large
        assert!(!lc.is_satisfied_by(&v(&[0.4, 0.4, 0.4]), 1e-12));
    }

    #[test]
    fn incremental_rate_limit_bounds_moves_directly() {
        let pm = prediction(Formulation::Incremental, 2);
        let set = ConstraintSet {
            input_rate: Some(v(&[0.5])),
            ..ConstraintSet::none()
        };
        let lc = ConstraintBuilder::new(set, &pm)
            .unwrap()
            .build(&DVector::zeros(4), &v(&[3.0]));
        assert!(lc.is_satisfied_by(&v(&[0.5, -0.5]), 1e-12));
        assert!(!lc.is_satisfied_by(&v(&[0.6, 0.0]), 1e-12));
    }

    #[test]
    fn output_bounds_shift_with_free_response() {
        let pm = prediction(Formulation::Absolute, 2);
        let set = ConstraintSet {
            output: Some(
                Bounds::new(v(&[f64::NEG_INFINITY, -1.0]), v(&[0.5, 1.0])).unwrap(),
            ),
            ..ConstraintSet::none()
        };
        let builder = ConstraintBuilder::new(set, &pm).unwrap();
        let xa = v(&[0.2, 0.0]);
        let free = pm.free_response(&xa);
        let lc = builder.build(&free, &v(&[0.0]));
        // Position: upper only; velocity: both sides; two samples
        assert_eq!(lc.n_ineq(), 6);

        let u = v(&[-0.3, 0.1]);
        let y = pm.predict(&xa, &u);
        let inside = (0..2).all(|k| y[2 * k] <= 0.5 && y[2 * k + 1].abs() <= 1.0);
        assert_eq!(lc.is_satisfied_by(&u, 1e-12), inside);
    }

    #[test]
    fn mismatched_bounds_are_rejected() {
        let pm = prediction(Formulation::Absolute, 2);
        let set = ConstraintSet {
            output: Some(Bounds::symmetric(3, 1.0).unwrap()),
            ..ConstraintSet::none()
        };
        assert!(ConstraintBuilder::new(set, &pm).is_err());
    }
}
