//! Receding-horizon linear model predictive control.
//!
//! The pipeline runs once per control tick:
//!
//! 1. **Discretization** - continuous `(A, B, C, D)` to `(A_d, B_d, C_d, D_d)`
//!    by zero-order hold (augmented matrix exponential) or forward Euler
//! 2. **Prediction** - block-Toeplitz `W`/`Z` mapping the augmented state and
//!    stacked inputs to `N` future outputs, in absolute or incremental form
//! 3. **Cost and constraints** - quadratic cost `uᵀHu + fᵀu` and linear rows
//!    from input, input-rate and output bounds
//! 4. **Solve** - dense closed form or Clarabel interior point
//! 5. **Apply** - first input only, then shift the window and repeat
//!
//! # Architecture
//!
//! `W`, `Z`, `H` and `ZᵀQ` depend only on the model, horizon and weights, so
//! [`RecedingHorizonController`] builds them once and keeps them behind
//! `Arc`. Only `f`, the constraint right-hand sides and the augmented state
//! change from tick to tick. [`Session`] owns the per-run mutable state.

pub mod builder;
pub mod constraints;
pub mod controller;
pub mod cost;
pub mod model;
pub mod plants;
pub mod prediction;
pub mod presets;
pub mod reference;
pub mod session;
pub mod solver;

pub use builder::ScenarioBuilder;
pub use constraints::{Bounds, ConstraintBuilder, ConstraintSet, LinearConstraints};
pub use controller::{ControlSequence, RecedingHorizonController};
pub use cost::{CostTemplate, CostWeights, QuadraticCost};
pub use model::{DiscretePlant, LinearPlant, discretize_euler, discretize_matrix_exp, matrix_exp};
pub use prediction::{PredictionMatrices, PredictionModel};
pub use reference::Reference;
pub use session::{FallbackEvent, Plant, Session, SessionLog, SessionState, SimulatedPlant};
pub use solver::{ClarabelSolver, DenseSolver, QpProblem, QpSolution, QpSolver, solver_for};
