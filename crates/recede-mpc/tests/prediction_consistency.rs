//! Integration test: batch prediction against step-by-step simulation.
//!
//! For random states and input sequences, `W xa + Z u` must reproduce the
//! outputs obtained by stepping the discrete model one sample at a time,
//! for both formulations and several horizons.

use approx::assert_relative_eq;
use nalgebra::DVector;
use recede_mpc::{DiscretePlant, PredictionMatrices, PredictionModel, plants};
use recede_test_utils::{deterministic_vec, random_vector, seeded_rng};

const HORIZONS: [usize; 3] = [1, 5, 20];

fn single_mass() -> DiscretePlant {
    plants::mass_spring_damper(1.0, (2.0 * std::f64::consts::PI).powi(2), 0.5)
        .unwrap()
        .discretize(0.1)
        .unwrap()
}

fn two_mass() -> DiscretePlant {
    plants::two_mass(1.0, 0.5, 40.0, 1.0)
        .unwrap()
        .select_outputs(&[0, 2])
        .unwrap()
        .discretize(0.05)
        .unwrap()
}

/// Outputs `y_1..y_N` from stepping with absolute inputs `u_0..u_{N-1}`.
fn simulate(plant: &DiscretePlant, x0: &DVector<f64>, inputs: &[DVector<f64>]) -> DVector<f64> {
    let p = plant.output_dim();
    let mut out = DVector::zeros(inputs.len() * p);
    let mut x = x0.clone();
    for (i, u) in inputs.iter().enumerate() {
        x = plant.step(&x, u);
        out.rows_mut(i * p, p).copy_from(&(&plant.cd * &x));
    }
    out
}

fn split(stacked: &DVector<f64>, m: usize) -> Vec<DVector<f64>> {
    (0..stacked.len() / m)
        .map(|i| stacked.rows(i * m, m).into_owned())
        .collect()
}

fn check_absolute(plant: &DiscretePlant, seed: u64) {
    let mut rng = seeded_rng(seed);
    let model = PredictionModel::absolute(plant).unwrap();
    for n in HORIZONS {
        let pred = PredictionMatrices::build(&model, n);
        let x0 = random_vector(&mut rng, plant.state_dim(), 1.0);
        let u = random_vector(&mut rng, n * plant.input_dim(), 2.0);

        let batch = pred.predict(&x0, &u);
        let stepped = simulate(plant, &x0, &split(&u, plant.input_dim()));
        assert_relative_eq!(batch, stepped, epsilon = 1e-9, max_relative = 1e-9);
    }
}

fn check_incremental(plant: &DiscretePlant, seed: u64) {
    let mut rng = seeded_rng(seed);
    let model = PredictionModel::incremental(plant).unwrap();
    let (n_x, m) = (plant.state_dim(), plant.input_dim());
    for n in HORIZONS {
        let pred = PredictionMatrices::build(&model, n);

        // Consistent history: x_k follows from x_{k-1} under u_{k-1}
        let x_prev = random_vector(&mut rng, n_x, 1.0);
        let u_prev = random_vector(&mut rng, m, 1.0);
        let x = plant.step(&x_prev, &u_prev);

        let mut xa = DVector::zeros(n_x + plant.output_dim());
        xa.rows_mut(0, n_x).copy_from(&(&x - &x_prev));
        xa.rows_mut(n_x, plant.output_dim()).copy_from(&(&plant.cd * &x));

        let du = random_vector(&mut rng, n * m, 0.5);
        let mut inputs = Vec::with_capacity(n);
        let mut u = u_prev.clone();
        for step in split(&du, m) {
            u += step;
            inputs.push(u.clone());
        }

        let batch = pred.predict(&xa, &du);
        let stepped = simulate(plant, &x, &inputs);
        assert_relative_eq!(batch, stepped, epsilon = 1e-9, max_relative = 1e-9);
    }
}

// -- Absolute formulation --

#[test]
fn absolute_single_mass_matches_simulation() {
    check_absolute(&single_mass(), 1);
}

#[test]
fn absolute_two_mass_matches_simulation() {
    check_absolute(&two_mass(), 2);
}

// -- Incremental formulation --

#[test]
fn incremental_single_mass_matches_simulation() {
    check_incremental(&single_mass(), 3);
}

#[test]
fn incremental_two_mass_matches_simulation() {
    check_incremental(&two_mass(), 4);
}

// -- Structure --

#[test]
fn first_block_row_only_sees_first_input() {
    let plant = two_mass();
    let model = PredictionModel::absolute(&plant).unwrap();
    let pred = PredictionMatrices::build(&model, 5);
    let (p, m) = (plant.output_dim(), plant.input_dim());

    // y_1 depends on u_0 only; later inputs leave it unchanged
    let x0 = DVector::zeros(plant.state_dim());
    let mut u = DVector::zeros(5 * m);
    u[0] = 1.0;
    let base = pred.predict(&x0, &u);
    u[m] = 7.0;
    let perturbed = pred.predict(&x0, &u);
    assert_relative_eq!(base.rows(0, p), perturbed.rows(0, p));
    assert!((base.rows(p, p) - perturbed.rows(p, p)).amax() > 0.0);
}

#[test]
fn free_response_matches_zero_input_simulation() {
    let plant = single_mass();
    let model = PredictionModel::absolute(&plant).unwrap();
    let pred = PredictionMatrices::build(&model, 20);
    let x0 = DVector::from_vec(deterministic_vec(2, 9));
    let zeros = vec![DVector::zeros(1); 20];
    assert_relative_eq!(
        pred.free_response(&x0),
        simulate(&plant, &x0, &zeros),
        epsilon = 1e-12
    );
}
