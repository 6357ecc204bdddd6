//! Shared types: the crate error enum, constraint blocks, the assembled
//! problem, solver options, and solver results.

use crate::residual::{Cost, Residual};
use ndarray::{Array1, ArrayView1};
use std::fmt;

// ─────────────────────────────────────────────────────────────
//  Error type
// ─────────────────────────────────────────────────────────────

/// Unified error type for all fallible operations in the crate.
///
/// Every fallible function in the public API returns
/// `Result<T, CatapultError>` instead of panicking. Dimension and
/// configuration problems are caught at construction time, never deferred
/// to evaluation. Solver non-convergence is *not* an error; it is a flag
/// on [`SolverResult`].
#[derive(Debug)]
pub enum CatapultError {
    /// Two dimensions that must agree do not. `what` names the site.
    Dimension {
        what: String,
        expected: usize,
        actual: usize,
    },
    /// Malformed configuration value (non-positive horizon, step, bound).
    Config(String),
    /// The optimization backend failed before iterating.
    Solver(String),
}

impl fmt::Display for CatapultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dimension {
                what,
                expected,
                actual,
            } => write!(
                f,
                "incompatible dimensions for {what}: expected {expected}, got {actual}"
            ),
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Solver(msg) => write!(f, "solver error: {msg}"),
        }
    }
}

impl std::error::Error for CatapultError {}

impl From<argmin::core::Error> for CatapultError {
    fn from(e: argmin::core::Error) -> Self {
        Self::Solver(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────
//  Constraints
// ─────────────────────────────────────────────────────────────

/// How a constraint residual `c(x)` is interpreted by the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// `c(x) = 0`.
    Equality,
    /// `c(x) ≤ 0` componentwise (negative orthant).
    NegativeOrthant,
}

impl ConstraintKind {
    /// Project a residual value onto the feasible set of this kind:
    /// the origin for equalities, `min(z, 0)` for the negative orthant.
    pub fn project(&self, z: ArrayView1<'_, f64>) -> Array1<f64> {
        match self {
            Self::Equality => Array1::zeros(z.len()),
            Self::NegativeOrthant => z.mapv(|v| v.min(0.0)),
        }
    }

    /// Infeasibility of a residual value in the ∞-norm: `max|c_i|` for
    /// equalities, `max(0, c_i)` over components for the negative orthant.
    pub fn violation(&self, z: ArrayView1<'_, f64>) -> f64 {
        match self {
            Self::Equality => z.iter().fold(0.0_f64, |m, &v| m.max(v.abs())),
            Self::NegativeOrthant => z.iter().fold(0.0_f64, |m, &v| m.max(v.max(0.0))),
        }
    }
}

/// One tagged constraint block: a residual plus its interpretation.
#[derive(Debug)]
pub struct Constraint {
    pub residual: Box<dyn Residual>,
    pub kind: ConstraintKind,
}

impl Constraint {
    pub fn equality(residual: Box<dyn Residual>) -> Self {
        Self {
            residual,
            kind: ConstraintKind::Equality,
        }
    }

    pub fn negative_orthant(residual: Box<dyn Residual>) -> Self {
        Self {
            residual,
            kind: ConstraintKind::NegativeOrthant,
        }
    }

    /// Output dimension of this block.
    pub fn nr(&self) -> usize {
        self.residual.nr()
    }
}

// ─────────────────────────────────────────────────────────────
//  Problem definition  (immutable after construction)
// ─────────────────────────────────────────────────────────────

/// One cost plus an ordered list of tagged constraint blocks.
///
/// Ordering is significant: the solver associates one multiplier block
/// per constraint, in this order. All blocks must share the cost's input
/// space; the mismatch is rejected when the block enters the problem.
#[derive(Debug)]
pub struct Problem {
    pub cost: Box<dyn Cost>,
    constraints: Vec<Constraint>,
}

impl Problem {
    pub fn new(
        cost: Box<dyn Cost>,
        constraints: Vec<Constraint>,
    ) -> Result<Self, CatapultError> {
        let mut problem = Self {
            cost,
            constraints: Vec::new(),
        };
        for c in constraints {
            problem.add_constraint(c)?;
        }
        Ok(problem)
    }

    /// Append a constraint block, checking its input dimension against
    /// the cost's.
    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<(), CatapultError> {
        if constraint.residual.nx() != self.cost.nx() {
            return Err(CatapultError::Dimension {
                what: "constraint input vs problem variables".into(),
                expected: self.cost.nx(),
                actual: constraint.residual.nx(),
            });
        }
        self.constraints.push(constraint);
        Ok(())
    }

    /// Number of decision variables (coordinates).
    pub fn nx(&self) -> usize {
        self.cost.nx()
    }

    /// Tangent dimension of the decision space.
    pub fn ndx(&self) -> usize {
        self.cost.ndx()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn num_constraint_blocks(&self) -> usize {
        self.constraints.len()
    }

    /// Output dimension of each block, in block order.
    pub fn constraint_dims(&self) -> Vec<usize> {
        self.constraints.iter().map(Constraint::nr).collect()
    }

    /// Sum of all block output dimensions.
    pub fn total_constraint_dim(&self) -> usize {
        self.constraints.iter().map(Constraint::nr).sum()
    }

    /// All-zero initial multipliers, one vector per block in block order.
    pub fn zero_multipliers(&self) -> Vec<Array1<f64>> {
        self.constraints
            .iter()
            .map(|c| Array1::zeros(c.nr()))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────
//  Solver options
// ─────────────────────────────────────────────────────────────

/// Knobs for the augmented-Lagrangian driver.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Primal feasibility tolerance: stop when the worst block violation
    /// drops below this.
    pub tol: f64,
    /// Initial penalty parameter μ.
    pub mu_init: f64,
    /// Multiplicative growth factor for μ after each outer iteration.
    pub mu_factor: f64,
    /// Cap on μ (prevents ill-conditioning).
    pub mu_max: f64,
    /// Iteration cap for each inner L-BFGS run.
    pub max_inner_iters: u64,
    /// Cap on outer (multiplier-update) iterations.
    pub max_outer_iters: usize,
    /// Number of L-BFGS correction pairs.
    pub lbfgs_memory: usize,
    /// Print a progress line per outer iteration to stderr.
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            tol: 1e-4,
            mu_init: 10.0,
            mu_factor: 5.0,
            mu_max: 1e8,
            max_inner_iters: 500,
            max_outer_iters: 20,
            lbfgs_memory: 10,
            verbose: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Solver result + history
// ─────────────────────────────────────────────────────────────

/// Diagnostic row recorded after each outer iteration.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    /// Outer iteration index (0-based).
    pub outer: usize,
    /// Objective value at the inner solution.
    pub cost: f64,
    /// Augmented-Lagrangian merit value at the inner solution.
    pub merit: f64,
    /// Worst constraint violation across blocks (∞-norm).
    pub primal_infeas: f64,
    /// ∞-norm of the Lagrangian gradient after the multiplier update.
    pub dual_infeas: f64,
    /// Penalty parameter used for the inner solve.
    pub mu: f64,
    /// Iterations spent by the inner L-BFGS run.
    pub inner_iterations: u64,
    /// Whether the inner run reported convergence.
    pub inner_converged: bool,
}

/// Outcome of a solve. Non-convergence is expressed through `converged`,
/// never as an error; callers must check the flag.
#[derive(Debug, Clone)]
pub struct SolverResult {
    /// Optimized flattened decision vector.
    pub x_opt: Array1<f64>,
    /// Objective value at `x_opt`.
    pub cost: f64,
    /// Feasibility reached and the last inner run converged.
    pub converged: bool,
    /// Cumulative inner iterations across all outer rounds.
    pub iterations: u64,
    /// Final worst-block constraint violation (0 when unconstrained).
    pub primal_infeas: f64,
    /// Final ∞-norm of the Lagrangian gradient.
    pub dual_infeas: f64,
    /// Final multiplier estimates, one vector per constraint block.
    pub multipliers: Vec<Array1<f64>>,
    /// One record per outer iteration.
    pub history: Vec<IterationRecord>,
}
