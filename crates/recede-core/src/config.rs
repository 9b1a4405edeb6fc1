use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_gravity() -> f64 {
    9.81
}
const fn default_max_iter() -> u32 {
    200
}
const fn default_tolerance() -> f64 {
    1e-8
}
const fn default_max_consecutive_failures() -> usize {
    5
}

// ---------------------------------------------------------------------------
// PlantConfig
// ---------------------------------------------------------------------------

/// Physical plant selection, tagged by `kind` in TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlantKind {
    /// Single mass on a spring with viscous damping. States `[x, v]`.
    MassSpringDamper {
        mass: f64,
        spring: f64,
        #[serde(default)]
        damping: f64,
    },
    /// Single mass with viscous friction only. States `[x, v]`.
    ViscousMass { mass: f64, damping: f64 },
    /// Two masses coupled by a spring-damper, force on mass 1.
    /// States `[x1, v1, x2, v2]`.
    TwoMass {
        mass_1: f64,
        mass_2: f64,
        spring: f64,
        #[serde(default)]
        damping: f64,
    },
    /// Cart-pendulum crane linearized about the hanging equilibrium,
    /// cart acceleration as input. States `[theta, omega, x, v]`.
    PlanarCrane {
        cable_length: f64,
        #[serde(default = "default_gravity")]
        gravity: f64,
    },
}

impl PlantKind {
    /// Number of plant states.
    pub const fn state_dim(&self) -> usize {
        match self {
            Self::MassSpringDamper { .. } | Self::ViscousMass { .. } => 2,
            Self::TwoMass { .. } | Self::PlanarCrane { .. } => 4,
        }
    }

    /// Short human-readable label.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::MassSpringDamper { .. } => "mass-spring-damper",
            Self::ViscousMass { .. } => "viscous mass",
            Self::TwoMass { .. } => "two-mass",
            Self::PlanarCrane { .. } => "planar crane",
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = |field: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::invalid(field, format!("{v} (must be > 0)")))
            }
        };
        let non_negative = |field: &str, v: f64| {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(ConfigError::invalid(field, format!("{v} (must be >= 0)")))
            }
        };
        match *self {
            Self::MassSpringDamper {
                mass,
                spring,
                damping,
            } => {
                positive("plant.mass", mass)?;
                non_negative("plant.spring", spring)?;
                non_negative("plant.damping", damping)
            }
            Self::ViscousMass { mass, damping } => {
                positive("plant.mass", mass)?;
                non_negative("plant.damping", damping)
            }
            Self::TwoMass {
                mass_1,
                mass_2,
                spring,
                damping,
            } => {
                positive("plant.mass_1", mass_1)?;
                positive("plant.mass_2", mass_2)?;
                non_negative("plant.spring", spring)?;
                non_negative("plant.damping", damping)
            }
            Self::PlanarCrane {
                cable_length,
                gravity,
            } => {
                positive("plant.cable_length", cable_length)?;
                positive("plant.gravity", gravity)
            }
        }
    }
}

/// Plant description: physical model plus measured outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantConfig {
    #[serde(flatten)]
    pub kind: PlantKind,

    /// State indices measured as outputs (default: every state).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<usize>>,
}

impl PlantConfig {
    /// Number of measured outputs.
    pub fn output_dim(&self) -> usize {
        self.outputs
            .as_ref()
            .map_or_else(|| self.kind.state_dim(), Vec::len)
    }

    /// Validate physical parameters and output selection.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.kind.validate()?;
        if let Some(outputs) = &self.outputs {
            if outputs.is_empty() {
                return Err(ConfigError::invalid("plant.outputs", "must not be empty"));
            }
            let n = self.kind.state_dim();
            if let Some(&bad) = outputs.iter().find(|&&i| i >= n) {
                return Err(ConfigError::invalid(
                    "plant.outputs",
                    format!("state index {bad} out of range for {n} states"),
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ControllerConfig
// ---------------------------------------------------------------------------

/// How the prediction model parameterizes the decision vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formulation {
    /// Decision is the stacked absolute input sequence; `xa = x`.
    #[default]
    Absolute,
    /// Decision is the stacked input moves; `xa = [x_k - x_{k-1}; y_k]`.
    Incremental,
}

/// Which QP back-end solves each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    /// Closed-form Cholesky/LU solve. Unconstrained problems only.
    Dense,
    /// Clarabel interior-point solver.
    #[default]
    Clarabel,
}

/// Input substituted when a tick's solve fails recoverably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Re-apply the previous input.
    #[default]
    HoldLast,
    /// Apply zero input.
    Zero,
}

/// Numerical solver settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    #[serde(default = "default_max_iter")]
    pub max_iter: u32,
    /// Feasibility and duality-gap tolerance.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iter: default_max_iter(),
            tolerance: default_tolerance(),
        }
    }
}

/// Fallback behaviour on recoverable solver failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default)]
    pub policy: FallbackPolicy,
    /// Consecutive failures tolerated before the run aborts.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            policy: FallbackPolicy::default(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

/// Linear bounds over the horizon. Absent vectors mean unbounded;
/// individual entries may be `inf` / `-inf`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_min: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_max: Option<Vec<f64>>,
    /// Maximum absolute change of each input between consecutive samples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_rate: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_min: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_max: Option<Vec<f64>>,
}

impl ConstraintsConfig {
    /// Whether any bound is declared.
    pub const fn is_empty(&self) -> bool {
        self.input_min.is_none()
            && self.input_max.is_none()
            && self.input_rate.is_none()
            && self.output_min.is_none()
            && self.output_max.is_none()
    }

    /// Validate ordering and signs. Lengths are checked against the plant
    /// when the scenario is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "constraints.input",
            self.input_min.as_deref(),
            self.input_max.as_deref(),
        )?;
        check_range(
            "constraints.output",
            self.output_min.as_deref(),
            self.output_max.as_deref(),
        )?;
        if let Some(rate) = &self.input_rate {
            if let Some(&bad) = rate.iter().find(|r| r.is_nan() || **r <= 0.0) {
                return Err(ConfigError::invalid(
                    "constraints.input_rate",
                    format!("{bad} (must be > 0)"),
                ));
            }
        }
        Ok(())
    }
}

fn check_range(field: &str, lo: Option<&[f64]>, hi: Option<&[f64]>) -> Result<(), ConfigError> {
    for v in lo.into_iter().chain(hi).flatten() {
        if v.is_nan() {
            return Err(ConfigError::invalid(field, "bound is NaN"));
        }
    }
    if lo.into_iter().flatten().any(|&l| l == f64::INFINITY) {
        return Err(ConfigError::invalid(field, "min is +inf"));
    }
    if hi.into_iter().flatten().any(|&h| h == f64::NEG_INFINITY) {
        return Err(ConfigError::invalid(field, "max is -inf"));
    }
    if let (Some(lo), Some(hi)) = (lo, hi) {
        if lo.len() != hi.len() {
            return Err(ConfigError::mismatch(
                format!("{field}_max"),
                (lo.len(), 1),
                (hi.len(), 1),
            ));
        }
        if let Some((i, (l, h))) = lo.iter().zip(hi).enumerate().find(|(_, (l, h))| l > h) {
            return Err(ConfigError::invalid(
                field,
                format!("min {l} exceeds max {h} at index {i}"),
            ));
        }
    }
    Ok(())
}

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Sample period in seconds.
    pub dt: f64,
    /// Prediction horizon N (number of future samples).
    pub horizon: usize,
    #[serde(default)]
    pub formulation: Formulation,
    /// Per-output tracking weights, replicated across the horizon.
    pub output_weights: Vec<f64>,
    /// Per-input effort weights, replicated across the horizon.
    pub input_weights: Vec<f64>,
    #[serde(default)]
    pub solver: SolverKind,
    #[serde(default)]
    pub solver_settings: SolverSettings,
    #[serde(default)]
    pub constraints: ConstraintsConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
}

impl ControllerConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(ConfigError::InvalidSampleTime(self.dt));
        }
        if self.horizon == 0 {
            return Err(ConfigError::InvalidHorizon(self.horizon));
        }
        for (field, weights) in [
            ("controller.output_weights", &self.output_weights),
            ("controller.input_weights", &self.input_weights),
        ] {
            if weights.is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
            if let Some(&bad) = weights.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
                return Err(ConfigError::invalid(
                    field,
                    format!("{bad} (must be finite and >= 0)"),
                ));
            }
        }
        if !(self.solver_settings.tolerance.is_finite() && self.solver_settings.tolerance > 0.0) {
            return Err(ConfigError::invalid(
                "controller.solver_settings.tolerance",
                "must be > 0",
            ));
        }
        if self.solver_settings.max_iter == 0 {
            return Err(ConfigError::invalid(
                "controller.solver_settings.max_iter",
                "must be >= 1",
            ));
        }
        self.constraints.validate()
    }

    /// Number of plant inputs implied by the input weights.
    pub fn input_dim(&self) -> usize {
        self.input_weights.len()
    }
}

// ---------------------------------------------------------------------------
// SimulationConfig
// ---------------------------------------------------------------------------

/// Closed-loop simulation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Simulated wall-clock length in seconds.
    pub duration: f64,
    pub initial_state: Vec<f64>,
    /// Constant output setpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setpoint: Option<Vec<f64>>,
    /// Per-tick output reference rows; the last row is held past the end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Vec<Vec<f64>>>,
    /// Input applied before the first tick (default: zero).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_input: Option<Vec<f64>>,
}

impl SimulationConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(ConfigError::invalid(
                "simulation.duration",
                format!("{} (must be > 0)", self.duration),
            ));
        }
        if self.initial_state.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::invalid(
                "simulation.initial_state",
                "contains NaN or Inf",
            ));
        }
        match (&self.setpoint, &self.reference) {
            (Some(_), Some(_)) => Err(ConfigError::invalid(
                "simulation",
                "set either setpoint or reference, not both",
            )),
            (None, None) => Err(ConfigError::invalid(
                "simulation",
                "one of setpoint or reference is required",
            )),
            (None, Some(rows)) if rows.is_empty() => Err(ConfigError::invalid(
                "simulation.reference",
                "must contain at least one row",
            )),
            (None, Some(rows)) => {
                let width = rows[0].len();
                if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
                    return Err(ConfigError::mismatch(
                        format!("simulation.reference[{i}]"),
                        (1, width),
                        (1, row.len()),
                    ));
                }
                Ok(())
            }
            (Some(_), None) => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// ScenarioConfig
// ---------------------------------------------------------------------------

/// A complete closed-loop scenario: plant, controller and simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub plant: PlantConfig,
    pub controller: ControllerConfig,
    pub simulation: SimulationConfig,
}

impl ScenarioConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.plant.validate()?;
        self.controller.validate()?;
        self.simulation.validate()?;
        let n = self.plant.kind.state_dim();
        if self.simulation.initial_state.len() != n {
            return Err(ConfigError::mismatch(
                "simulation.initial_state",
                (n, 1),
                (self.simulation.initial_state.len(), 1),
            ));
        }
        Ok(())
    }

    /// Number of control ticks: `round(duration / dt)`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn ticks(&self) -> usize {
        (self.simulation.duration / self.controller.dt).round() as usize
    }

    /// Parse from a TOML string and validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
