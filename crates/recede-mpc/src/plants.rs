//! Linear plant library built from physical parameters.
//!
//! All plants take a single force-like input and expose the full state as
//! output; narrow the output set with [`LinearPlant::select_outputs`].

use nalgebra::DMatrix;
use recede_core::{PlantConfig, PlantKind, RecedeError};

use crate::model::LinearPlant;

/// Mass on a spring with viscous damping. States `[x, v]`, input force.
///
/// ```text
/// m ẍ = -k x - c ẋ + u
/// ```
///
/// # Errors
/// `NonFinite` if the parameters produce NaN/Inf entries (e.g. `mass == 0`).
pub fn mass_spring_damper(mass: f64, spring: f64, damping: f64) -> Result<LinearPlant, RecedeError> {
    let a = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -spring / mass, -damping / mass]);
    let b = DMatrix::from_row_slice(2, 1, &[0.0, 1.0 / mass]);
    LinearPlant::full_state(a, b)
}

/// Mass with viscous friction only. States `[x, v]`, input force.
///
/// # Errors
/// `NonFinite` if the parameters produce NaN/Inf entries.
pub fn viscous_mass(mass: f64, damping: f64) -> Result<LinearPlant, RecedeError> {
    mass_spring_damper(mass, 0.0, damping)
}

/// Two masses joined by a spring-damper, force applied to mass 1.
/// States `[x1, v1, x2, v2]`.
///
/// ```text
/// m1 ẍ1 =  k (x2 - x1) + c (ẋ2 - ẋ1) + u
/// m2 ẍ2 = -k (x2 - x1) - c (ẋ2 - ẋ1)
/// ```
///
/// # Errors
/// `NonFinite` if the parameters produce NaN/Inf entries.
pub fn two_mass(
    mass_1: f64,
    mass_2: f64,
    spring: f64,
    damping: f64,
) -> Result<LinearPlant, RecedeError> {
    let (k1, c1) = (spring / mass_1, damping / mass_1);
    let (k2, c2) = (spring / mass_2, damping / mass_2);
    #[rustfmt::skip]
    let a = DMatrix::from_row_slice(4, 4, &[
        0.0, 1.0, 0.0, 0.0,
        -k1, -c1,  k1,  c1,
        0.0, 0.0, 0.0, 1.0,
         k2,  c2, -k2, -c2,
    ]);
    let b = DMatrix::from_row_slice(4, 1, &[0.0, 1.0 / mass_1, 0.0, 0.0]);
    LinearPlant::full_state(a, b)
}

/// Planar crane linearized about the hanging equilibrium.
/// States `[theta, omega, x, v]`, input cart acceleration.
///
/// ```text
/// θ̈ = -(g/l) θ + u / l
/// ẍ = u
/// ```
///
/// # Errors
/// `NonFinite` if the parameters produce NaN/Inf entries.
pub fn planar_crane(cable_length: f64, gravity: f64) -> Result<LinearPlant, RecedeError> {
    let l = cable_length;
    #[rustfmt::skip]
    let a = DMatrix::from_row_slice(4, 4, &[
        0.0,         1.0, 0.0, 0.0,
        -gravity / l, 0.0, 0.0, 0.0,
        0.0,         0.0, 0.0, 1.0,
        0.0,         0.0, 0.0, 0.0,
    ]);
    let b = DMatrix::from_row_slice(4, 1, &[0.0, 1.0 / l, 0.0, 1.0]);
    LinearPlant::full_state(a, b)
}

/// Build the continuous plant a [`PlantConfig`] describes, with its output
/// selection applied.
///
/// # Errors
/// Configuration errors from validation or output selection.
pub fn from_config(config: &PlantConfig) -> Result<LinearPlant, RecedeError> {
    config.validate()?;
    let plant = match config.kind {
        PlantKind::MassSpringDamper {
            mass,
            spring,
            damping,
        } => mass_spring_damper(mass, spring, damping)?,
        PlantKind::ViscousMass { mass, damping } => viscous_mass(mass, damping)?,
        PlantKind::TwoMass {
            mass_1,
            mass_2,
            spring,
            damping,
        } => two_mass(mass_1, mass_2, spring, damping)?,
        PlantKind::PlanarCrane {
            cable_length,
            gravity,
        } => planar_crane(cable_length, gravity)?,
    };
    match &config.outputs {
        Some(indices) => Ok(plant.select_outputs(indices)?),
        None => Ok(plant),
    }
}
