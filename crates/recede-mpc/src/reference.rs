//! Output references over the horizon.

use nalgebra::DVector;
use recede_core::{ConfigError, SimulationConfig};

/// Desired output trajectory: one row per tick, the last row held past the
/// end. A constant setpoint is a single row.
///
/// Built only through [`Reference::constant`] and [`Reference::trajectory`],
/// so `rows` is never empty.
#[derive(Clone, Debug, PartialEq)]
pub struct Reference {
    rows: Vec<DVector<f64>>,
}

impl Reference {
    pub fn constant(setpoint: &[f64]) -> Self {
        Self {
            rows: vec![DVector::from_column_slice(setpoint)],
        }
    }

    /// # Errors
    /// `InvalidValue` if empty, `DimensionMismatch` if rows differ in length.
    pub fn trajectory(rows: &[Vec<f64>]) -> Result<Self, ConfigError> {
        let Some(first) = rows.first() else {
            return Err(ConfigError::invalid("reference", "must contain at least one row"));
        };
        let width = first.len();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(ConfigError::mismatch(
                format!("reference[{i}]"),
                (1, width),
                (1, row.len()),
            ));
        }
        Ok(Self {
            rows: rows.iter().map(|r| DVector::from_column_slice(r)).collect(),
        })
    }

    /// Setpoint or trajectory from the simulation section.
    ///
    /// # Errors
    /// `InvalidValue` if neither or both are given.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, ConfigError> {
        match (&config.setpoint, &config.reference) {
            (Some(setpoint), None) => Ok(Self::constant(setpoint)),
            (None, Some(rows)) => Self::trajectory(rows),
            _ => Err(ConfigError::invalid(
                "simulation",
                "exactly one of setpoint or reference is required",
            )),
        }
    }

    /// Width of one reference sample.
    pub fn output_dim(&self) -> usize {
        self.rows.first().map_or(0, |r| r.len())
    }

    /// Reference sample for tick `k`.
    pub fn at(&self, k: usize) -> &DVector<f64> {
        &self.rows[k.min(self.rows.len() - 1)]
    }

    /// Stacked `[r_{k+1}; …; r_{k+N}]` aligned with the predicted outputs
    /// at tick `k`.
    pub fn window(&self, k: usize, horizon: usize) -> DVector<f64> {
        let p = self.output_dim();
        let mut out = DVector::zeros(horizon * p);
        for i in 0..horizon {
            out.rows_mut(i * p, p).copy_from(self.at(k + i + 1));
        }
        out
    }
}
