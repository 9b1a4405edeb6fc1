//! Scenario builder: turns a [`ScenarioConfig`] into a ready-to-run
//! [`Session`].
//!
//! # Example
//!
//! ```no_run
//! use recede_core::ScenarioConfig;
//! use recede_mpc::ScenarioBuilder;
//!
//! let config = ScenarioConfig::from_file("scenarios/single_mass.toml").unwrap();
//! let mut session = ScenarioBuilder::new(config).build().unwrap();
//! session.run().unwrap();
//! ```

use std::sync::Arc;

use log::info;
use nalgebra::DVector;
use recede_core::{ConfigError, RecedeError, ScenarioConfig, SolverKind};

use crate::constraints::ConstraintSet;
use crate::controller::RecedingHorizonController;
use crate::cost::CostWeights;
use crate::plants;
use crate::reference::Reference;
use crate::session::{Session, SimulatedPlant};
use crate::solver::{QpSolver, solver_for};

// ---------------------------------------------------------------------------
// ScenarioBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for a closed-loop session.
#[derive(Debug)]
pub struct ScenarioBuilder {
    config: ScenarioConfig,
    solver: Option<Arc<dyn QpSolver>>,
}

impl ScenarioBuilder {
    #[must_use]
    pub const fn new(config: ScenarioConfig) -> Self {
        Self {
            config,
            solver: None,
        }
    }

    /// Use this solver instead of the one named in the config.
    #[must_use]
    pub fn with_solver(mut self, solver: Arc<dyn QpSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub const fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Validate, discretize and assemble the session.
    ///
    /// # Errors
    /// Configuration errors for invalid or inconsistent sections, numerical
    /// errors from discretization.
    pub fn build(self) -> Result<Session<SimulatedPlant>, RecedeError> {
        let config = &self.config;
        config.validate()?;
        let ctrl = &config.controller;

        let continuous = plants::from_config(&config.plant)?;
        let plant = continuous.discretize(ctrl.dt)?;

        let (m, p) = (plant.input_dim(), plant.output_dim());
        if ctrl.output_weights.len() != p {
            return Err(ConfigError::mismatch(
                "controller.output_weights",
                (p, 1),
                (ctrl.output_weights.len(), 1),
            )
            .into());
        }
        if ctrl.input_weights.len() != m {
            return Err(ConfigError::mismatch(
                "controller.input_weights",
                (m, 1),
                (ctrl.input_weights.len(), 1),
            )
            .into());
        }

        let weights =
            CostWeights::from_diagonal(&ctrl.output_weights, &ctrl.input_weights, ctrl.horizon)?;
        let constraints = ConstraintSet::from_config(&ctrl.constraints, m, p)?;

        let solver = match self.solver {
            Some(solver) => solver,
            None => {
                if ctrl.solver == SolverKind::Dense && !constraints.is_empty() {
                    return Err(ConfigError::invalid(
                        "controller.solver",
                        "dense solver cannot handle constraints; use clarabel",
                    )
                    .into());
                }
                solver_for(ctrl.solver, ctrl.solver_settings)
            }
        };

        let controller = RecedingHorizonController::new(
            &plant,
            ctrl.horizon,
            ctrl.formulation,
            weights,
            constraints,
            solver,
        )?;

        let reference = Reference::from_config(&config.simulation)?;
        let x0 = DVector::from_column_slice(&config.simulation.initial_state);
        let u0 = config
            .simulation
            .initial_input
            .as_deref()
            .map_or_else(|| DVector::zeros(m), |u| DVector::from_column_slice(u));

        info!(
            "Scenario '{}': {} plant, dt={}s, N={}, {:?}",
            config.name.as_deref().unwrap_or("unnamed"),
            config.plant.kind.label(),
            ctrl.dt,
            ctrl.horizon,
            ctrl.formulation
        );

        let sim_plant = SimulatedPlant::new(plant, x0)?;
        Session::new(
            controller,
            sim_plant,
            reference,
            u0,
            ctrl.fallback,
            config.ticks(),
        )
    }
}
