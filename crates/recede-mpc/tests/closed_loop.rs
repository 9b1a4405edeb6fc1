//! Integration test: full receding-horizon runs.
//!
//! Drives the built-in plants through complete sessions and checks the
//! closed-loop behaviour:
//! 1. The single-mass reference scenario settles at the 1 m setpoint
//! 2. Zero actuator authority keeps the plant at rest
//! 3. The incremental formulation removes steady-state offset
//! 4. Repeated infeasible ticks fall back, then abort
//! 5. Sessions sharing one controller run in parallel threads

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use nalgebra::DVector;
use recede_core::{NumericalError, RecedeError, ScenarioConfig};
use recede_mpc::{
    FallbackEvent, Plant, Reference, ScenarioBuilder, Session, SessionLog, SessionState,
    SimulatedPlant, presets,
};

fn run(config: ScenarioConfig) -> SessionLog {
    let mut session = ScenarioBuilder::new(config).build().unwrap();
    session.run().unwrap();
    session.into_log()
}

fn scenarios_dir() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scenarios")
}

// -- Reference scenarios --

#[test]
fn single_mass_settles_at_setpoint() {
    let log = run(presets::single_mass());
    assert_eq!(log.final_state, SessionState::Done);
    assert_eq!(log.ticks(), 50);

    let x = log.last_state().unwrap();
    assert!((x[0] - 1.0).abs() < 0.05, "final position {}", x[0]);
    assert!(x[1].abs() < 0.05, "final velocity {}", x[1]);
    assert!(log.inputs.iter().all(|u| u[0].abs() <= 50.0));
}

#[test]
fn zero_authority_keeps_plant_at_rest() {
    let mut config = presets::single_mass();
    config.controller.constraints.input_min = Some(vec![0.0]);
    config.controller.constraints.input_max = Some(vec![0.0]);
    let log = run(config);

    assert_eq!(log.ticks(), 50);
    assert!(log.inputs.iter().all(|u| u[0] == 0.0));
    assert!(log.states.iter().all(|x| x.iter().all(|&v| v == 0.0)));
}

#[test]
fn incremental_dense_removes_offset() {
    let config = ScenarioConfig::from_toml_str(
        r#"
        name = "damped-incremental"

        [plant]
        kind = "mass_spring_damper"
        mass = 1.0
        spring = 4.0
        damping = 4.0
        outputs = [0]

        [controller]
        dt = 0.05
        horizon = 20
        formulation = "incremental"
        output_weights = [10.0]
        input_weights = [0.1]
        solver = "dense"

        [simulation]
        duration = 10.0
        initial_state = [0.0, 0.0]
        setpoint = [1.0]
        "#,
    )
    .unwrap();
    let log = run(config);

    assert_eq!(log.ticks(), 200);
    let tail = &log.outputs[log.outputs.len() - 20..];
    for y in tail {
        assert!((y[0] - 1.0).abs() < 0.01, "output {}", y[0]);
    }
    // Holding x = 1 needs the spring force k * x
    let u_last = log.inputs.last().unwrap()[0];
    assert!((u_last - 4.0).abs() < 0.1, "input {u_last}");
}

#[test]
fn crane_respects_sway_and_speed_limits() {
    let config = presets::crane();
    let sway = config.controller.constraints.output_max.as_ref().unwrap()[0];
    let log = run(config);

    assert_eq!(log.final_state, SessionState::Done);
    for x in &log.states {
        assert!(x[0].abs() <= sway + 1e-4, "sway {}", x[0]);
        assert!(x[3].abs() <= 1.25 + 1e-4, "speed {}", x[3]);
    }
    assert!(log.inputs.iter().all(|u| u[0].abs() <= 10.0));
    assert!(log.last_state().unwrap()[2] > 0.5);
}

// -- Failure handling --

#[test]
fn unreachable_output_bound_falls_back_then_aborts() {
    let mut config = presets::single_mass();
    config.controller.constraints.output_min = Some(vec![2.0, f64::NEG_INFINITY]);
    config.controller.fallback.max_consecutive_failures = 2;

    let mut session = ScenarioBuilder::new(config).build().unwrap();
    let err = session.run().unwrap_err();
    match err {
        RecedeError::Aborted {
            tick,
            failures,
            source,
        } => {
            assert_eq!(tick, 2);
            assert_eq!(failures, 3);
            assert!(source.is_recoverable());
        }
        other => panic!("expected Aborted, got {other}"),
    }
    assert_eq!(session.state(), SessionState::Aborted);

    let log = session.log();
    assert_eq!(log.ticks(), 2);
    let ticks: Vec<usize> = log.fallbacks.iter().map(|e: &FallbackEvent| e.tick).collect();
    assert_eq!(ticks, vec![0, 1]);
    // Hold-last from the zero initial input
    assert!(log.inputs.iter().all(|u| u[0] == 0.0));
}

// -- Cancellation and sharing --

/// Raises the cancel flag after a fixed number of applied inputs.
struct CancellingPlant {
    inner: SimulatedPlant,
    remaining: usize,
    cancel: Arc<AtomicBool>,
}

impl Plant for CancellingPlant {
    fn state(&self) -> &DVector<f64> {
        self.inner.state()
    }

    fn output(&self) -> DVector<f64> {
        self.inner.output()
    }

    fn apply(&mut self, u: &DVector<f64>) -> Result<(), NumericalError> {
        self.inner.apply(u)?;
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.cancel.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[test]
fn cancel_flag_raised_mid_run_stops_session() {
    let built = ScenarioBuilder::new(presets::single_mass()).build().unwrap();
    let cancel = Arc::new(AtomicBool::new(false));
    let plant = CancellingPlant {
        inner: built.plant().clone(),
        remaining: 7,
        cancel: Arc::clone(&cancel),
    };
    let mut session = Session::new(
        built.controller().clone(),
        plant,
        Reference::constant(&[1.0, 0.0]),
        DVector::zeros(1),
        Default::default(),
        50,
    )
    .unwrap();

    let log = session.run_cancellable(&cancel).unwrap();
    assert_eq!(log.ticks(), 7);
    assert_eq!(log.final_state, SessionState::Cancelled);
}

#[test]
fn parallel_sessions_share_one_controller() {
    let built = ScenarioBuilder::new(presets::single_mass()).build().unwrap();
    let controller = built.controller().clone();
    let model = built.plant().model().clone();
    let shared = controller.shared_prediction();
    let shared = &shared;
    let setpoints = [0.25, 0.5, 0.75, 1.0];

    let finals: Vec<f64> = thread::scope(|scope| {
        let handles: Vec<_> = setpoints
            .iter()
            .map(|&target| {
                let controller = controller.clone();
                let model = model.clone();
                scope.spawn(move || {
                    assert!(Arc::ptr_eq(&controller.shared_prediction(), shared));
                    let plant = SimulatedPlant::new(model, DVector::zeros(2)).unwrap();
                    let mut session = Session::new(
                        controller,
                        plant,
                        Reference::constant(&[target, 0.0]),
                        DVector::zeros(1),
                        Default::default(),
                        50,
                    )
                    .unwrap();
                    session.run().unwrap();
                    session.log().last_state().unwrap()[0]
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (x, target) in finals.iter().zip(setpoints) {
        assert!((x - target).abs() < 0.05, "{x} vs {target}");
    }
}

// -- Scenario files --

#[test]
fn bundled_scenarios_build() {
    let mut count = 0;
    for entry in std::fs::read_dir(scenarios_dir()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|e| e == "toml") {
            let config = ScenarioConfig::from_file(&path).unwrap();
            assert!(
                ScenarioBuilder::new(config).build().is_ok(),
                "{}",
                path.display()
            );
            count += 1;
        }
    }
    assert!(count >= 4);
}

#[test]
fn single_mass_file_matches_preset() {
    let config = ScenarioConfig::from_file(scenarios_dir().join("single_mass.toml")).unwrap();
    let log = run(config);
    let x = log.last_state().unwrap();
    assert!((x[0] - 1.0).abs() < 0.05);
}

#[test]
fn session_log_exports_as_json() {
    let log = run(presets::single_mass());
    let value: serde_json::Value = serde_json::to_value(&log).unwrap();
    assert_eq!(value["time"].as_array().unwrap().len(), 51);
    assert_eq!(value["inputs"].as_array().unwrap().len(), 50);
    assert_eq!(value["final_state"], "done");
}
