//! Closed-loop receding-horizon session.
//!
//! A [`Session`] owns the controller, the plant being driven and every
//! time-series buffer of the run. Each tick reads the plant state, solves the
//! horizon QP, applies only the first input and advances the plant one
//! sample.
//!
//! ```text
//! Initialized ──step──▶ Stepping ──(k == K)──▶ Done
//!                          │
//!                          ├──(too many failures / permanent error)──▶ Aborted
//!                          └──(cancel flag)──▶ Cancelled
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};
use nalgebra::DVector;
use recede_core::{ConfigError, FallbackConfig, FallbackPolicy, NumericalError, RecedeError};
use serde::{Deserialize, Serialize};

use crate::controller::RecedingHorizonController;
use crate::model::DiscretePlant;
use crate::reference::Reference;

// ---------------------------------------------------------------------------
// Plant
// ---------------------------------------------------------------------------

/// Anything the loop can read a state from and apply an input to.
pub trait Plant: Send {
    /// Current state `x_k`.
    fn state(&self) -> &DVector<f64>;

    /// Current measured output `y_k`.
    fn output(&self) -> DVector<f64>;

    /// Apply `u` for one sample, advancing to `x_{k+1}`.
    ///
    /// # Errors
    /// `NonFinite` if the new state contains NaN or Inf.
    fn apply(&mut self, u: &DVector<f64>) -> Result<(), NumericalError>;
}

/// Plant simulated by its own discrete model.
#[derive(Clone, Debug)]
pub struct SimulatedPlant {
    model: DiscretePlant,
    x: DVector<f64>,
}

impl SimulatedPlant {
    /// # Errors
    /// `DimensionMismatch` if `x0` does not match the model.
    pub fn new(model: DiscretePlant, x0: DVector<f64>) -> Result<Self, ConfigError> {
        if x0.len() != model.state_dim() {
            return Err(ConfigError::mismatch(
                "initial_state",
                (model.state_dim(), 1),
                (x0.len(), 1),
            ));
        }
        Ok(Self { model, x: x0 })
    }

    pub const fn model(&self) -> &DiscretePlant {
        &self.model
    }
}

impl Plant for SimulatedPlant {
    fn state(&self) -> &DVector<f64> {
        &self.x
    }

    fn output(&self) -> DVector<f64> {
        &self.model.cd * &self.x
    }

    fn apply(&mut self, u: &DVector<f64>) -> Result<(), NumericalError> {
        let next = self.model.step(&self.x, u);
        if next.iter().any(|v| !v.is_finite()) {
            return Err(NumericalError::NonFinite("plant state"));
        }
        self.x = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Setup complete, no tick run yet.
    #[default]
    Initialized,
    /// At least one tick run, more to go.
    Stepping,
    /// All ticks run.
    Done,
    /// Stopped on an error.
    Aborted,
    /// Stopped by the caller's cancel flag.
    Cancelled,
}

impl SessionState {
    /// Returns `true` once no further ticks will run.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted | Self::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// SessionLog
// ---------------------------------------------------------------------------

/// A tick on which the fallback input was applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FallbackEvent {
    pub tick: usize,
    pub reason: String,
    pub applied: Vec<f64>,
}

/// Time series recorded by a session.
///
/// `time`, `states` and `outputs` hold `K + 1` samples (including the
/// initial one); `inputs` and `solve_time_us` hold one entry per tick run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    pub time: Vec<f64>,
    pub states: Vec<Vec<f64>>,
    pub outputs: Vec<Vec<f64>>,
    pub inputs: Vec<Vec<f64>>,
    pub solve_time_us: Vec<u64>,
    pub fallbacks: Vec<FallbackEvent>,
    pub final_state: SessionState,
}

impl SessionLog {
    /// Number of ticks recorded.
    pub fn ticks(&self) -> usize {
        self.inputs.len()
    }

    /// Last recorded state.
    pub fn last_state(&self) -> Option<&[f64]> {
        self.states.last().map(Vec::as_slice)
    }

    fn record_sample(&mut self, t: f64, x: &DVector<f64>, y: &DVector<f64>) {
        self.time.push(t);
        self.states.push(x.iter().copied().collect());
        self.outputs.push(y.iter().copied().collect());
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Receding-horizon loop over a fixed number of ticks.
#[derive(Debug)]
pub struct Session<P: Plant = SimulatedPlant> {
    controller: RecedingHorizonController,
    plant: P,
    reference: Reference,
    fallback: FallbackConfig,
    total_ticks: usize,
    tick: usize,
    state: SessionState,
    x_prev: DVector<f64>,
    u_prev: DVector<f64>,
    consecutive_failures: usize,
    log: SessionLog,
}

impl<P: Plant> Session<P> {
    /// Set up a session in the `Initialized` state.
    ///
    /// # Arguments
    /// * `controller` - Controller with fixed prediction setup
    /// * `plant` - Plant to drive
    /// * `reference` - Output reference
    /// * `initial_input` - Input assumed applied before tick 0
    /// * `fallback` - Policy for recoverable solver failures
    /// * `total_ticks` - Number of ticks K
    ///
    /// # Errors
    /// `DimensionMismatch` if the plant, reference or input sizes disagree
    /// with the controller.
    pub fn new(
        controller: RecedingHorizonController,
        plant: P,
        reference: Reference,
        initial_input: DVector<f64>,
        fallback: FallbackConfig,
        total_ticks: usize,
    ) -> Result<Self, RecedeError> {
        let model = controller.plant();
        let n = model.state_dim();
        if plant.state().len() != n {
            return Err(ConfigError::mismatch("plant state", (n, 1), (plant.state().len(), 1)).into());
        }
        let p = model.output_dim();
        let y_len = plant.output().len();
        if y_len != p {
            return Err(ConfigError::mismatch("plant output", (p, 1), (y_len, 1)).into());
        }
        let m = model.input_dim();
        if initial_input.len() != m {
            return Err(
                ConfigError::mismatch("initial_input", (m, 1), (initial_input.len(), 1)).into(),
            );
        }
        controller.check_reference_dim(reference.output_dim())?;

        let x0 = plant.state().clone();
        let mut log = SessionLog::default();
        log.record_sample(0.0, &x0, &plant.output());

        info!(
            "Session initialized: {total_ticks} ticks, dt={}s, fallback={:?} (max {} consecutive)",
            model.dt, fallback.policy, fallback.max_consecutive_failures
        );

        Ok(Self {
            controller,
            plant,
            reference,
            fallback,
            total_ticks,
            tick: 0,
            state: SessionState::Initialized,
            x_prev: x0,
            u_prev: initial_input,
            consecutive_failures: 0,
            log,
        })
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Ticks completed so far.
    pub const fn tick(&self) -> usize {
        self.tick
    }

    pub const fn total_ticks(&self) -> usize {
        self.total_ticks
    }

    pub const fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn into_log(self) -> SessionLog {
        self.log
    }

    pub const fn plant(&self) -> &P {
        &self.plant
    }

    pub const fn controller(&self) -> &RecedingHorizonController {
        &self.controller
    }

    /// Input applied on the most recent tick.
    pub const fn last_input(&self) -> &DVector<f64> {
        &self.u_prev
    }

    /// Swap the prediction model mid-run. The driven plant is unchanged.
    ///
    /// # Errors
    /// Configuration errors if the new model changes the problem sizes.
    pub fn update_model(&mut self, model: &DiscretePlant) -> Result<(), RecedeError> {
        self.controller.update_model(model)
    }

    /// Run one tick: solve, apply the first input, advance the plant.
    ///
    /// A no-op once the session is terminal.
    ///
    /// # Errors
    /// `Aborted` when recoverable failures exceed the limit; the solver or
    /// numerical error itself when it is permanent.
    pub fn step(&mut self) -> Result<SessionState, RecedeError> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }
        if self.tick >= self.total_ticks {
            self.finish(SessionState::Done);
            return Ok(self.state);
        }
        self.state = SessionState::Stepping;
        let k = self.tick;

        let x = self.plant.state().clone();
        let y = self.plant.output();
        let xa = self.controller.augmented_state(&x, &self.x_prev, &y);
        let window = self.reference.window(k, self.controller.horizon());

        let (u, solve_time_us) = match self.controller.solve_tick(&xa, &window, &self.u_prev) {
            Ok(seq) => {
                self.consecutive_failures = 0;
                (seq.first(), seq.solve_time_us)
            }
            Err(e) if e.is_recoverable() => {
                self.consecutive_failures += 1;
                if self.consecutive_failures > self.fallback.max_consecutive_failures {
                    error!(
                        "Tick {k}: aborting after {} consecutive solver failures: {e}",
                        self.consecutive_failures
                    );
                    self.finish(SessionState::Aborted);
                    return Err(RecedeError::Aborted {
                        tick: k,
                        failures: self.consecutive_failures,
                        source: e,
                    });
                }
                let u = self.fallback_input();
                warn!(
                    "Tick {k}: {e}; applying {:?} fallback ({}/{})",
                    self.fallback.policy, self.consecutive_failures, self.fallback.max_consecutive_failures
                );
                self.log.fallbacks.push(FallbackEvent {
                    tick: k,
                    reason: e.to_string(),
                    applied: u.iter().copied().collect(),
                });
                (u, 0)
            }
            Err(e) => {
                error!("Tick {k}: permanent solver failure: {e}");
                self.finish(SessionState::Aborted);
                return Err(e.into());
            }
        };

        let u = self.controller.clamp_input(&u);
        if let Err(e) = self.plant.apply(&u) {
            error!("Tick {k}: plant step failed: {e}");
            self.finish(SessionState::Aborted);
            return Err(e.into());
        }
        debug!("Tick {k}: u={:?} solve={solve_time_us}us", u.as_slice());

        self.x_prev = x;
        self.u_prev = u;
        self.tick += 1;

        #[allow(clippy::cast_precision_loss)]
        let t = self.tick as f64 * self.controller.plant().dt;
        let x_next = self.plant.state().clone();
        let y_next = self.plant.output();
        self.log.record_sample(t, &x_next, &y_next);
        self.log.inputs.push(self.u_prev.iter().copied().collect());
        self.log.solve_time_us.push(solve_time_us);

        if self.tick >= self.total_ticks {
            self.finish(SessionState::Done);
        }
        Ok(self.state)
    }

    /// Run every remaining tick.
    ///
    /// # Errors
    /// The first error [`Session::step`] returns.
    pub fn run(&mut self) -> Result<&SessionLog, RecedeError> {
        while !self.state.is_terminal() {
            self.step()?;
        }
        Ok(&self.log)
    }

    /// Run every remaining tick, checking `cancel` before each one.
    ///
    /// A raised flag moves the session to `Cancelled` and returns the
    /// partial log.
    ///
    /// # Errors
    /// The first error [`Session::step`] returns.
    pub fn run_cancellable(&mut self, cancel: &AtomicBool) -> Result<&SessionLog, RecedeError> {
        while !self.state.is_terminal() {
            if cancel.load(Ordering::Relaxed) {
                info!("Session cancelled after {} ticks", self.tick);
                self.finish(SessionState::Cancelled);
                break;
            }
            self.step()?;
        }
        Ok(&self.log)
    }

    fn fallback_input(&self) -> DVector<f64> {
        match self.fallback.policy {
            FallbackPolicy::HoldLast => self.u_prev.clone(),
            FallbackPolicy::Zero => DVector::zeros(self.u_prev.len()),
        }
    }

    fn finish(&mut self, state: SessionState) {
        self.state = state;
        self.log.final_state = state;
        if state == SessionState::Done {
            info!("Session done after {} ticks", self.tick);
        }
    }
}
