use thiserror::Error;

/// Top-level error type for the receding-horizon stack.
#[derive(Debug, Error)]
pub enum RecedeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Numerical error: {0}")]
    Numerical(#[from] NumericalError),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("Run aborted at tick {tick} after {failures} consecutive solver failures: {source}")]
    Aborted {
        tick: usize,
        failures: usize,
        #[source]
        source: SolverError,
    },
}

/// Configuration errors.
///
/// Raised at setup, before any control tick runs. Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid sample time dt: {0} (must be > 0)")]
    InvalidSampleTime(f64),

    #[error("Invalid horizon: {0} (must be >= 1)")]
    InvalidHorizon(usize),

    #[error("Dimension mismatch for {name}: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    DimensionMismatch {
        name: String,
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidValue`].
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`ConfigError::DimensionMismatch`].
    pub fn mismatch(
        name: impl Into<String>,
        expected: (usize, usize),
        got: (usize, usize),
    ) -> Self {
        Self::DimensionMismatch {
            name: name.into(),
            expected_rows: expected.0,
            expected_cols: expected.1,
            rows: got.0,
            cols: got.1,
        }
    }
}

/// Numerical errors from model construction and plant stepping.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NumericalError {
    #[error("Matrix {name} must be square, got {rows}x{cols}")]
    NotSquare {
        name: &'static str,
        rows: usize,
        cols: usize,
    },

    #[error("Invalid sample period: {0} (must be finite and > 0)")]
    InvalidSamplePeriod(f64),

    #[error("{0} contains NaN or Inf")]
    NonFinite(&'static str),
}

/// Tagged failure of a single QP solve.
///
/// Each control tick produces either an optimal control sequence or one of
/// these; a NaN is never handed to the plant stepper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    #[error("Cost Hessian is singular ({dim}x{dim}); adjust Q/R or the horizon")]
    SingularCost { dim: usize },

    #[error("Problem is infeasible: {0}")]
    Infeasible(String),

    #[error("Solver did not converge: {0}")]
    NotConverged(String),

    #[error("Solver returned a non-finite solution")]
    NonFinite,

    #[error("Unsupported problem: {0}")]
    Unsupported(String),

    #[error("Solver setup failed: {0}")]
    Setup(String),
}

impl SolverError {
    /// Whether the receding-horizon loop may substitute a fallback input
    /// and keep going.
    ///
    /// Singular costs, unsupported constraint sets and setup failures
    /// reproduce identically on every tick and are never recoverable.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Infeasible(_) | Self::NotConverged(_) | Self::NonFinite
        )
    }
}
