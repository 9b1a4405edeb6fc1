//! Built-in scenarios.

use std::f64::consts::PI;

use recede_core::{
    ConstraintsConfig, ControllerConfig, FallbackConfig, Formulation, PlantConfig, PlantKind,
    ScenarioConfig, SimulationConfig, SolverKind, SolverSettings,
};

/// Names accepted by [`by_name`].
pub const NAMES: [&str; 3] = ["single-mass", "two-mass", "crane"];

/// Look up a preset by its CLI name.
pub fn by_name(name: &str) -> Option<ScenarioConfig> {
    match name {
        "single-mass" => Some(single_mass()),
        "two-mass" => Some(two_mass()),
        "crane" => Some(crane()),
        _ => None,
    }
}

fn controller(
    dt: f64,
    horizon: usize,
    output_weights: Vec<f64>,
    input_weight: f64,
    constraints: ConstraintsConfig,
) -> ControllerConfig {
    ControllerConfig {
        dt,
        horizon,
        formulation: Formulation::Absolute,
        output_weights,
        input_weights: vec![input_weight],
        solver: SolverKind::Clarabel,
        solver_settings: SolverSettings::default(),
        constraints,
        fallback: FallbackConfig::default(),
    }
}

fn force_limit(limit: f64) -> ConstraintsConfig {
    ConstraintsConfig {
        input_min: Some(vec![-limit]),
        input_max: Some(vec![limit]),
        ..ConstraintsConfig::default()
    }
}

/// Undamped 1 Hz oscillator driven to 1 m with a ±50 N actuator.
pub fn single_mass() -> ScenarioConfig {
    ScenarioConfig {
        name: Some("single-mass".into()),
        plant: PlantConfig {
            kind: PlantKind::MassSpringDamper {
                mass: 1.0,
                spring: (2.0 * PI).powi(2),
                damping: 0.0,
            },
            outputs: None,
        },
        controller: controller(0.1, 10, vec![100.0, 0.0], 1e-4, force_limit(50.0)),
        simulation: SimulationConfig {
            duration: 5.0,
            initial_state: vec![0.0, 0.0],
            setpoint: Some(vec![1.0, 0.0]),
            reference: None,
            initial_input: None,
        },
    }
}

/// Two coupled masses; the second mass is positioned through the spring.
pub fn two_mass() -> ScenarioConfig {
    ScenarioConfig {
        name: Some("two-mass".into()),
        plant: PlantConfig {
            kind: PlantKind::TwoMass {
                mass_1: 1.0,
                mass_2: 1.0,
                spring: (4.0 * PI).powi(2),
                damping: 1.0,
            },
            outputs: None,
        },
        controller: controller(
            0.05,
            20,
            vec![10.0, 0.0, 100.0, 0.0],
            1e-4,
            force_limit(50.0),
        ),
        simulation: SimulationConfig {
            duration: 5.0,
            initial_state: vec![0.0; 4],
            setpoint: Some(vec![1.0, 0.0, 1.0, 0.0]),
            reference: None,
            initial_input: None,
        },
    }
}

/// Crane moving its load 1 m with sway and trolley-speed limits.
pub fn crane() -> ScenarioConfig {
    let sway = 5.0_f64.to_radians();
    ScenarioConfig {
        name: Some("crane".into()),
        plant: PlantConfig {
            kind: PlantKind::PlanarCrane {
                cable_length: 1.0,
                gravity: 9.81,
            },
            outputs: None,
        },
        controller: controller(
            0.1,
            20,
            vec![100.0, 10.0, 10.0, 0.0],
            1e-4,
            ConstraintsConfig {
                input_min: Some(vec![-10.0]),
                input_max: Some(vec![10.0]),
                output_min: Some(vec![-sway, f64::NEG_INFINITY, f64::NEG_INFINITY, -1.25]),
                output_max: Some(vec![sway, f64::INFINITY, f64::INFINITY, 1.25]),
                ..ConstraintsConfig::default()
            },
        ),
        simulation: SimulationConfig {
            duration: 10.0,
            initial_state: vec![0.0; 4],
            setpoint: Some(vec![0.0, 0.0, 1.0, 0.0]),
            reference: None,
            initial_input: None,
        },
    }
}
