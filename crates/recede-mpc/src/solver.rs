//! QP back-ends behind one interface.
//!
//! Every tick hands the loop a problem
//!
//! ```text
//! minimize    uᵀ H u + fᵀ u
//! subject to  A_eq u = b_eq,  A_ineq u <= b_ineq
//! ```
//!
//! and gets back either the optimal decision vector or a tagged
//! [`SolverError`]. Two back-ends are provided:
//!
//! - [`DenseSolver`]: closed-form `u* = -H⁻¹ f / 2` by Cholesky with an LU
//!   fallback. Refuses problems that carry constraint rows.
//! - [`ClarabelSolver`]: Clarabel interior point. Falls back to the dense
//!   path when the problem has no rows.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
    SupportedConeT::{NonnegativeConeT, ZeroConeT},
};
use nalgebra::{DMatrix, DVector};
use recede_core::{SolverError, SolverKind, SolverSettings};

use crate::constraints::LinearConstraints;
use crate::cost::QuadraticCost;

// ---------------------------------------------------------------------------
// Problem / solution
// ---------------------------------------------------------------------------

/// One tick's QP.
#[derive(Clone, Debug, PartialEq)]
pub struct QpProblem {
    pub cost: QuadraticCost,
    pub constraints: LinearConstraints,
}

impl QpProblem {
    pub const fn new(cost: QuadraticCost, constraints: LinearConstraints) -> Self {
        Self { cost, constraints }
    }

    /// Problem without constraint rows.
    pub fn unconstrained(cost: QuadraticCost) -> Self {
        let dim = cost.dim();
        Self {
            cost,
            constraints: LinearConstraints::empty(dim),
        }
    }

    pub fn dim(&self) -> usize {
        self.cost.dim()
    }
}

/// Optimal decision vector and solve statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct QpSolution {
    /// Stacked decision vector (inputs or input moves).
    pub u: DVector<f64>,
    /// Objective `uᵀHu + fᵀu + constant`.
    pub objective: f64,
    /// Interior-point iterations, zero for the closed form.
    pub iterations: u32,
    /// Solve time in microseconds.
    pub solve_time_us: u64,
}

/// A QP back-end. Shared read-only across ticks and threads.
pub trait QpSolver: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Solve one problem.
    ///
    /// # Errors
    /// The tagged failure; never a solution containing NaN or Inf.
    fn solve(&self, problem: &QpProblem) -> Result<QpSolution, SolverError>;
}

/// Back-end for a configured [`SolverKind`].
pub fn solver_for(kind: SolverKind, settings: SolverSettings) -> Arc<dyn QpSolver> {
    match kind {
        SolverKind::Dense => Arc::new(DenseSolver),
        SolverKind::Clarabel => Arc::new(ClarabelSolver::new(settings)),
    }
}

fn elapsed_us(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// DenseSolver
// ---------------------------------------------------------------------------

/// Closed-form unconstrained solve.
#[derive(Clone, Copy, Debug, Default)]
pub struct DenseSolver;

impl DenseSolver {
    /// `u* = H⁻¹ (-f / 2)`.
    ///
    /// # Errors
    /// `SingularCost` if `H` is singular or the result is not finite.
    pub fn solve_unconstrained(cost: &QuadraticCost) -> Result<DVector<f64>, SolverError> {
        let dim = cost.dim();
        let rhs = &cost.f * -0.5;
        let u = match cost.h.clone().cholesky() {
            Some(chol) => chol.solve(&rhs),
            None => cost
                .h
                .clone()
                .lu()
                .solve(&rhs)
                .ok_or(SolverError::SingularCost { dim })?,
        };
        if u.iter().all(|v| v.is_finite()) {
            Ok(u)
        } else {
            Err(SolverError::SingularCost { dim })
        }
    }
}

impl QpSolver for DenseSolver {
    fn name(&self) -> &'static str {
        "dense"
    }

    fn solve(&self, problem: &QpProblem) -> Result<QpSolution, SolverError> {
        if !problem.constraints.is_empty() {
            return Err(SolverError::Unsupported(format!(
                "dense solver cannot handle {} equality and {} inequality rows",
                problem.constraints.n_eq(),
                problem.constraints.n_ineq()
            )));
        }
        let start = Instant::now();
        let u = Self::solve_unconstrained(&problem.cost)?;
        Ok(QpSolution {
            objective: problem.cost.evaluate(&u),
            u,
            iterations: 0,
            solve_time_us: elapsed_us(start),
        })
    }
}

// ---------------------------------------------------------------------------
// ClarabelSolver
// ---------------------------------------------------------------------------

/// Clarabel interior-point back-end.
#[derive(Clone, Copy, Debug)]
pub struct ClarabelSolver {
    settings: SolverSettings,
}

impl Default for ClarabelSolver {
    fn default() -> Self {
        Self::new(SolverSettings::default())
    }
}

impl ClarabelSolver {
    pub const fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }

    pub const fn settings(&self) -> &SolverSettings {
        &self.settings
    }
}

impl QpSolver for ClarabelSolver {
    fn name(&self) -> &'static str {
        "clarabel"
    }

    fn solve(&self, problem: &QpProblem) -> Result<QpSolution, SolverError> {
        if problem.constraints.is_empty() {
            return DenseSolver.solve(problem);
        }
        let start = Instant::now();
        let lc = &problem.constraints;
        let n = problem.dim();
        let n_eq = lc.n_eq();
        let n_ineq = lc.n_ineq();

        // Clarabel minimizes ½ xᵀPx + qᵀx; equalities first, then A x <= b
        let p_csc = dmatrix_to_csc_upper_tri(&(&problem.cost.h * 2.0));
        let q_vec: Vec<f64> = problem.cost.f.iter().copied().collect();

        let mut a_all = DMatrix::zeros(n_eq + n_ineq, n);
        a_all.view_mut((0, 0), (n_eq, n)).copy_from(&lc.a_eq);
        a_all.view_mut((n_eq, 0), (n_ineq, n)).copy_from(&lc.a_ineq);
        let a_csc = dmatrix_to_csc(&a_all);
        let b_vec: Vec<f64> = lc.b_eq.iter().chain(lc.b_ineq.iter()).copied().collect();

        let mut cones: Vec<SupportedConeT<f64>> = Vec::with_capacity(2);
        if n_eq > 0 {
            cones.push(ZeroConeT(n_eq));
        }
        if n_ineq > 0 {
            cones.push(NonnegativeConeT(n_ineq));
        }

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.settings.max_iter)
            .verbose(false)
            .tol_gap_abs(self.settings.tolerance)
            .tol_gap_rel(self.settings.tolerance)
            .tol_feas(self.settings.tolerance)
            .build()
            .map_err(|e| SolverError::Setup(format!("{e:?}")))?;

        let mut solver = DefaultSolver::new(&p_csc, &q_vec, &a_csc, &b_vec, &cones, settings)
            .map_err(|e| SolverError::Setup(format!("{e:?}")))?;
        solver.solve();
        let sol = &solver.solution;

        match &sol.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {}
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                return Err(SolverError::Infeasible(format!("{:?}", sol.status)));
            }
            status => return Err(SolverError::NotConverged(format!("{status:?}"))),
        }

        let u = DVector::from_column_slice(&sol.x);
        if u.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::NonFinite);
        }
        Ok(QpSolution {
            objective: problem.cost.evaluate(&u),
            u,
            iterations: sol.iterations,
            solve_time_us: elapsed_us(start),
        })
    }
}

// ---------------------------------------------------------------------------
// CSC conversion
// ---------------------------------------------------------------------------

/// Convert a nalgebra `DMatrix<f64>` to a Clarabel `CscMatrix<f64>` (full matrix).
fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Convert a symmetric nalgebra `DMatrix<f64>` to upper-triangular `CscMatrix<f64>`.
fn dmatrix_to_csc_upper_tri(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows.min(j + 1) {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}
