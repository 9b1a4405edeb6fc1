// recede-core: error taxonomy and scenario configuration for receding-horizon control.

pub mod config;
pub mod error;

pub use config::{
    ConstraintsConfig, ControllerConfig, FallbackConfig, FallbackPolicy, Formulation,
    PlantConfig, PlantKind, ScenarioConfig, SimulationConfig, SolverKind, SolverSettings,
};
pub use error::{ConfigError, NumericalError, RecedeError, SolverError};
