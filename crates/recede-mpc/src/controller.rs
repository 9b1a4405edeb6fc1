//! One receding-horizon decision per tick.
//!
//! The controller owns the read-only setup (prediction matrices, cost
//! template, constraint maps, solver) behind `Arc`s, so clones are cheap and
//! independent sessions on different threads can share it without locking.

use std::sync::Arc;

use log::{debug, info};
use nalgebra::DVector;
use recede_core::{ConfigError, Formulation, RecedeError, SolverError};

use crate::constraints::{ConstraintBuilder, ConstraintSet};
use crate::cost::{CostTemplate, CostWeights};
use crate::model::DiscretePlant;
use crate::prediction::{PredictionMatrices, PredictionModel};
use crate::solver::{QpProblem, QpSolver};

// ---------------------------------------------------------------------------
// ControlSequence
// ---------------------------------------------------------------------------

/// Optimal plan for one tick. Only the first input is ever applied.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlSequence {
    /// Raw decision vector (inputs or input moves, per formulation).
    pub decision: DVector<f64>,
    /// Stacked absolute inputs `[u_0; …; u_{N-1}]`.
    pub inputs: DVector<f64>,
    pub input_dim: usize,
    pub solve_time_us: u64,
    pub iterations: u32,
}

impl ControlSequence {
    pub fn horizon(&self) -> usize {
        if self.input_dim == 0 {
            0
        } else {
            self.inputs.len() / self.input_dim
        }
    }

    /// Planned input at step `i` of the horizon.
    pub fn input(&self, i: usize) -> DVector<f64> {
        self.inputs.rows(i * self.input_dim, self.input_dim).clone_owned()
    }

    /// The input to apply now.
    pub fn first(&self) -> DVector<f64> {
        self.input(0)
    }
}

// ---------------------------------------------------------------------------
// RecedingHorizonController
// ---------------------------------------------------------------------------

/// Builds and solves the tick QP from fixed setup and the current state.
#[derive(Clone, Debug)]
pub struct RecedingHorizonController {
    plant: DiscretePlant,
    formulation: Formulation,
    weights: CostWeights,
    prediction: Arc<PredictionMatrices>,
    template: Arc<CostTemplate>,
    constraints: Arc<ConstraintBuilder>,
    solver: Arc<dyn QpSolver>,
}

impl RecedingHorizonController {
    /// Build prediction matrices, cost template and constraint maps once.
    ///
    /// # Arguments
    /// * `plant` - Discrete model used for prediction
    /// * `horizon` - Prediction horizon N (>= 1)
    /// * `formulation` - Absolute inputs or incremental moves
    /// * `weights` - Stacked `Q` (N·p) and `R` (N·m)
    /// * `constraints` - Bounds constant across the horizon
    /// * `solver` - QP back-end
    ///
    /// # Errors
    /// Configuration errors on a zero horizon, feedthrough, or size
    /// mismatches between the model, weights and bounds.
    pub fn new(
        plant: &DiscretePlant,
        horizon: usize,
        formulation: Formulation,
        weights: CostWeights,
        constraints: ConstraintSet,
        solver: Arc<dyn QpSolver>,
    ) -> Result<Self, RecedeError> {
        if horizon == 0 {
            return Err(ConfigError::InvalidHorizon(horizon).into());
        }
        let model = PredictionModel::for_formulation(plant, formulation)?;
        let prediction = PredictionMatrices::build(&model, horizon);
        let template = CostTemplate::new(&prediction, &weights)?;
        let builder = ConstraintBuilder::new(constraints, &prediction)?;

        info!(
            "MPC setup: n={} m={} p={} N={} formulation={:?} solver={}",
            plant.state_dim(),
            plant.input_dim(),
            plant.output_dim(),
            horizon,
            formulation,
            solver.name()
        );

        Ok(Self {
            plant: plant.clone(),
            formulation,
            weights,
            prediction: Arc::new(prediction),
            template: Arc::new(template),
            constraints: Arc::new(builder),
            solver,
        })
    }

    /// Rebuild the prediction matrices and cost template for a new model,
    /// e.g. after relinearization. Weights and bounds are kept.
    ///
    /// # Errors
    /// Configuration errors if the new model changes the problem sizes.
    pub fn update_model(&mut self, plant: &DiscretePlant) -> Result<(), RecedeError> {
        for (name, current, new) in [
            ("plant state", self.plant.state_dim(), plant.state_dim()),
            ("plant input", self.plant.input_dim(), plant.input_dim()),
            ("plant output", self.plant.output_dim(), plant.output_dim()),
        ] {
            if current != new {
                return Err(ConfigError::mismatch(name, (current, 1), (new, 1)).into());
            }
        }
        let horizon = self.horizon();
        let model = PredictionModel::for_formulation(plant, self.formulation)?;
        let prediction = PredictionMatrices::build(&model, horizon);
        let template = CostTemplate::new(&prediction, &self.weights)?;
        let builder = ConstraintBuilder::new(self.constraints.set().clone(), &prediction)?;

        debug!("MPC model updated, prediction matrices rebuilt (N={horizon})");
        self.plant = plant.clone();
        self.prediction = Arc::new(prediction);
        self.template = Arc::new(template);
        self.constraints = Arc::new(builder);
        Ok(())
    }

    pub fn horizon(&self) -> usize {
        self.prediction.horizon
    }

    pub const fn formulation(&self) -> Formulation {
        self.formulation
    }

    pub const fn plant(&self) -> &DiscretePlant {
        &self.plant
    }

    pub fn prediction(&self) -> &PredictionMatrices {
        &self.prediction
    }

    pub fn cost_template(&self) -> &CostTemplate {
        &self.template
    }

    pub fn constraint_set(&self) -> &ConstraintSet {
        self.constraints.set()
    }

    pub fn solver(&self) -> &dyn QpSolver {
        self.solver.as_ref()
    }

    /// Shared handle to the prediction matrices.
    pub fn shared_prediction(&self) -> Arc<PredictionMatrices> {
        Arc::clone(&self.prediction)
    }

    /// Augmented state for the current tick from the state and the
    /// measured output `y`.
    ///
    /// Absolute: `x`. Incremental: `[x - x_prev; y]`.
    pub fn augmented_state(
        &self,
        x: &DVector<f64>,
        x_prev: &DVector<f64>,
        y: &DVector<f64>,
    ) -> DVector<f64> {
        match self.formulation {
            Formulation::Absolute => x.clone(),
            Formulation::Incremental => {
                let n = x.len();
                let p = y.len();
                let mut xa = DVector::zeros(n + p);
                xa.rows_mut(0, n).copy_from(&(x - x_prev));
                xa.rows_mut(n, p).copy_from(y);
                xa
            }
        }
    }

    /// Whether a reference of this width can be tracked.
    ///
    /// # Errors
    /// `DimensionMismatch` if the width differs from the output count.
    pub fn check_reference_dim(&self, dim: usize) -> Result<(), ConfigError> {
        let p = self.prediction.output_dim;
        if dim == p {
            Ok(())
        } else {
            Err(ConfigError::mismatch("reference", (p, 1), (dim, 1)))
        }
    }

    /// Assemble and solve the tick QP.
    ///
    /// # Arguments
    /// * `xa` - Augmented state from [`Self::augmented_state`]
    /// * `reference` - Stacked reference window (N·p)
    /// * `u_prev` - Input applied on the previous tick
    ///
    /// # Errors
    /// The solver's tagged failure.
    pub fn solve_tick(
        &self,
        xa: &DVector<f64>,
        reference: &DVector<f64>,
        u_prev: &DVector<f64>,
    ) -> Result<ControlSequence, SolverError> {
        let free = self.prediction.free_response(xa);
        let cost = self.template.assemble(reference, &free);
        let problem = if self.constraints.set().is_empty() {
            QpProblem::unconstrained(cost)
        } else {
            QpProblem::new(cost, self.constraints.build(&free, u_prev))
        };

        let solution = self.solver.solve(&problem)?;
        let inputs = self.constraints.inputs_from_decision(&solution.u, u_prev);
        Ok(ControlSequence {
            decision: solution.u,
            inputs,
            input_dim: self.prediction.input_dim,
            solve_time_us: solution.solve_time_us,
            iterations: solution.iterations,
        })
    }

    /// Clamp an input into the actuator bounds.
    pub fn clamp_input(&self, u: &DVector<f64>) -> DVector<f64> {
        self.constraints.set().clamp_input(u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::Bounds;
    use crate::plants;
    use crate::solver::{ClarabelSolver, DenseSolver};
    use approx::assert_relative_eq;

    fn plant() -> DiscretePlant {
        plants::mass_spring_damper(1.0, 4.0, 1.0)
            .unwrap()
            .select_outputs(&[0])
            .unwrap()
            .discretize(0.1)
            .unwrap()
    }

    fn controller(formulation: Formulation, constraints: ConstraintSet) -> RecedingHorizonController {
        let n = 8;
        RecedingHorizonController::new(
            &plant(),
            n,
            formulation,
            CostWeights::from_diagonal(&[10.0], &[0.1], n).unwrap(),
            constraints,
            Arc::new(ClarabelSolver::default()),
        )
        .unwrap()
    }

    #[test]
    fn zero_horizon_is_config_error() {
        let err = RecedingHorizonController::new(
            &plant(),
            0,
            Formulation::Absolute,
            CostWeights::from_diagonal(&[1.0], &[1.0], 0).unwrap(),
            ConstraintSet::none(),
            Arc::new(DenseSolver),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RecedeError::Config(ConfigError::InvalidHorizon(0))
        ));
    }

    #[test]
    fn weight_size_mismatch_is_config_error() {
        let err = RecedingHorizonController::new(
            &plant(),
            5,
            Formulation::Absolute,
            CostWeights::from_diagonal(&[1.0, 1.0], &[1.0], 5).unwrap(),
            ConstraintSet::none(),
            Arc::new(DenseSolver),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Q"), "{err}");
    }

    #[test]
    fn augmented_state_per_formulation() {
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let x_prev = DVector::from_vec(vec![0.5, 2.5]);

        let y = &plant().cd * &x;

        let abs = controller(Formulation::Absolute, ConstraintSet::none());
        assert_eq!(abs.augmented_state(&x, &x_prev, &y), x);

        let inc = controller(Formulation::Incremental, ConstraintSet::none());
        let xa = inc.augmented_state(&x, &x_prev, &y);
        assert_eq!(xa.as_slice(), &[0.5, -0.5, 1.0]);
    }

    #[test]
    fn incremental_state_carries_measured_output() {
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let inc = controller(Formulation::Incremental, ConstraintSet::none());
        let measured = DVector::from_vec(vec![1.25]);
        let xa = inc.augmented_state(&x, &x, &measured);
        assert_eq!(xa.as_slice(), &[0.0, 0.0, 1.25]);
    }

    #[test]
    fn unconstrained_tick_matches_closed_form() {
        let c = controller(Formulation::Absolute, ConstraintSet::none());
        let xa = DVector::from_vec(vec![0.3, -0.2]);
        let r = DVector::from_element(8, 1.0);
        let seq = c.solve_tick(&xa, &r, &DVector::zeros(1)).unwrap();

        let cost = c.cost_template().assemble(&r, &c.prediction().free_response(&xa));
        assert_relative_eq!(&cost.h * &seq.decision, &cost.f * -0.5, epsilon = 1e-8);
        assert_eq!(seq.horizon(), 8);
        assert_eq!(seq.inputs, seq.decision);
        assert_eq!(seq.first()[0], seq.decision[0]);
    }

    #[test]
    fn incremental_first_input_adds_previous() {
        let c = controller(Formulation::Incremental, ConstraintSet::none());
        let xa = c.augmented_state(&DVector::zeros(2), &DVector::zeros(2), &DVector::zeros(1));
        let u_prev = DVector::from_vec(vec![2.0]);
        let seq = c
            .solve_tick(&xa, &DVector::from_element(8, 1.0), &u_prev)
            .unwrap();
        assert_relative_eq!(seq.first()[0], 2.0 + seq.decision[0], epsilon = 1e-12);
        assert_relative_eq!(
            seq.input(2)[0],
            2.0 + seq.decision[0] + seq.decision[1] + seq.decision[2],
            epsilon = 1e-12
        );
    }

    #[test]
    fn constrained_tick_respects_input_box() {
        let set = ConstraintSet {
            input: Some(Bounds::symmetric(1, 0.5).unwrap()),
            ..ConstraintSet::none()
        };
        let c = controller(Formulation::Incremental, set);
        let xa = c.augmented_state(&DVector::zeros(2), &DVector::zeros(2), &DVector::zeros(1));
        let seq = c
            .solve_tick(&xa, &DVector::from_element(8, 5.0), &DVector::zeros(1))
            .unwrap();
        assert!(seq.inputs.iter().all(|u| u.abs() <= 0.5 + 1e-6));
    }

    #[test]
    fn update_model_rebuilds_prediction() {
        let mut c = controller(Formulation::Absolute, ConstraintSet::none());
        let before = c.shared_prediction();
        let stiffer = plants::mass_spring_damper(1.0, 16.0, 1.0)
            .unwrap()
            .select_outputs(&[0])
            .unwrap()
            .discretize(0.1)
            .unwrap();
        c.update_model(&stiffer).unwrap();
        assert_ne!(*before, *c.prediction());
        assert_eq!(c.plant(), &stiffer);
        assert_eq!(c.horizon(), 8);
    }

    #[test]
    fn update_model_rejects_state_dim_change() {
        let mut c = controller(Formulation::Absolute, ConstraintSet::none());
        // Same input and output counts, four states instead of two
        let four_states = plants::two_mass(1.0, 1.0, 10.0, 0.5)
            .unwrap()
            .select_outputs(&[0])
            .unwrap()
            .discretize(0.1)
            .unwrap();
        let err = c.update_model(&four_states).unwrap_err();
        assert!(err.to_string().contains("plant state"), "{err}");
        assert_eq!(c.plant().state_dim(), 2);
        assert_eq!(c.prediction().w.ncols(), 2);
    }

    #[test]
    fn update_model_rejects_size_change() {
        let mut c = controller(Formulation::Absolute, ConstraintSet::none());
        let wider = plants::mass_spring_damper(1.0, 4.0, 1.0)
            .unwrap()
            .discretize(0.1)
            .unwrap();
        assert!(c.update_model(&wider).is_err());
    }

    #[test]
    fn reference_dim_check() {
        let c = controller(Formulation::Absolute, ConstraintSet::none());
        assert!(c.check_reference_dim(1).is_ok());
        assert!(c.check_reference_dim(2).is_err());
    }
}
