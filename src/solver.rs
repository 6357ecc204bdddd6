//! Augmented-Lagrangian solve driver.
//!
//! Iteration internals (linesearch, curvature pairs, step acceptance)
//! belong to `argmin`; this module only builds the merit function for
//! the current multiplier/penalty state, runs one blocking L-BFGS
//! executor per outer round, and updates multipliers between rounds.

use crate::types::{
    CatapultError, ConstraintKind, IterationRecord, Problem, SolverOptions, SolverResult,
};
use argmin::core::{CostFunction, Error, Executor, Gradient, State, TerminationReason};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use ndarray::{Array1, ArrayView1};
use std::cell::RefCell;

// ─────────────────────────────────────────────────────────────
//  Solver interface
// ─────────────────────────────────────────────────────────────

/// A backend that accepts an assembled [`Problem`], an initial guess,
/// and one multiplier vector per constraint block (in block order).
pub trait Solver {
    fn solve(
        &self,
        problem: &Problem,
        x0: &Array1<f64>,
        lams0: &[Array1<f64>],
    ) -> Result<SolverResult, CatapultError>;
}

// ─────────────────────────────────────────────────────────────
//  Merit function for one inner run
// ─────────────────────────────────────────────────────────────

/// Augmented Lagrangian of a problem at fixed multipliers `λ` and
/// penalty `μ`, in argmin's cost/gradient vocabulary:
///
///   L_A(x) = f(x) + Σ_eq [λᵀc + (μ/2)‖c‖²]
///          + Σ_ineq (1/(2μ))·[‖max(0, λ + μc)‖² − ‖λ‖²]
///
/// with gradient `∇f + Σ J_cᵀ·y`, `y = λ + μc` for equalities and
/// `max(0, λ + μc)` for inequalities. Value and gradient share every
/// residual evaluation, so both are computed in one pass and memoized
/// for the parameter argmin asks about next.
struct MeritProblem<'a> {
    problem: &'a Problem,
    lambdas: &'a [Array1<f64>],
    mu: f64,
    last_eval: RefCell<Option<(Vec<f64>, f64, Vec<f64>)>>,
}

impl MeritProblem<'_> {
    fn ensure_evaluated(&self, theta: &[f64]) {
        {
            let cache = self.last_eval.borrow();
            if let Some((cached, _, _)) = cache.as_ref() {
                if cached.as_slice() == theta {
                    return;
                }
            }
        }
        let x = ArrayView1::from(theta);
        let mut merit = self.problem.cost.value(x);
        let mut grad = self.problem.cost.gradient(x);
        for (constraint, lambda) in self.problem.constraints().iter().zip(self.lambdas) {
            let c = constraint.residual.evaluate(x);
            let mut y = lambda.clone();
            y.scaled_add(self.mu, &c);
            match constraint.kind {
                ConstraintKind::Equality => {
                    merit += lambda.dot(&c) + 0.5 * self.mu * c.dot(&c);
                }
                ConstraintKind::NegativeOrthant => {
                    y.mapv_inplace(|v| v.max(0.0));
                    merit += (y.dot(&y) - lambda.dot(lambda)) / (2.0 * self.mu);
                }
            }
            grad += &constraint.residual.jacobian(x).t().dot(&y);
        }
        *self.last_eval.borrow_mut() = Some((theta.to_vec(), merit, grad.to_vec()));
    }
}

impl CostFunction for MeritProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, Error> {
        self.ensure_evaluated(theta);
        let cache = self.last_eval.borrow();
        let (_, value, _) = cache
            .as_ref()
            .ok_or_else(|| Error::msg("merit cache empty after evaluation"))?;
        Ok(*value)
    }
}

impl Gradient for MeritProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, theta: &Self::Param) -> Result<Self::Gradient, Error> {
        self.ensure_evaluated(theta);
        let cache = self.last_eval.borrow();
        let (_, _, grad) = cache
            .as_ref()
            .ok_or_else(|| Error::msg("merit cache empty after evaluation"))?;
        Ok(grad.clone())
    }
}

// ─────────────────────────────────────────────────────────────
//  Driver
// ─────────────────────────────────────────────────────────────

/// One inner L-BFGS run, with backend failure folded into flags.
struct InnerRun {
    x: Array1<f64>,
    merit: f64,
    iterations: u64,
    converged: bool,
    failed: bool,
}

/// Augmented-Lagrangian method of multipliers over argmin's L-BFGS
/// with More-Thuente linesearch.
#[derive(Debug, Clone, Default)]
pub struct AugLagSolver {
    pub options: SolverOptions,
}

impl AugLagSolver {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    fn inner_solve(
        &self,
        problem: &Problem,
        lambdas: &[Array1<f64>],
        mu: f64,
        x_init: &Array1<f64>,
    ) -> InnerRun {
        let merit = MeritProblem {
            problem,
            lambdas,
            mu,
            last_eval: RefCell::new(None),
        };
        let linesearch = MoreThuenteLineSearch::new();
        let lbfgs = LBFGS::new(linesearch, self.options.lbfgs_memory);
        let init = x_init.to_vec();
        let max_iters = self.options.max_inner_iters;
        let outcome = Executor::new(merit, lbfgs)
            .configure(|config| {
                config
                    .param(init)
                    .max_iters(max_iters)
                    .target_cost(f64::NEG_INFINITY)
            })
            .run();
        match outcome {
            Ok(result) => {
                let state = result.state();
                let x = state
                    .get_best_param()
                    .map(|p| Array1::from(p.clone()))
                    .unwrap_or_else(|| x_init.clone());
                InnerRun {
                    x,
                    merit: state.get_best_cost(),
                    iterations: state.get_iter(),
                    converged: matches!(
                        state.get_termination_reason(),
                        Some(TerminationReason::SolverConverged)
                    ),
                    failed: false,
                }
            }
            Err(err) => {
                // Numeric breakdown mid-run (e.g. linesearch failure) is
                // a non-converged outcome, not an error.
                if self.options.verbose {
                    eprintln!("inner solve aborted: {err}");
                }
                InnerRun {
                    x: x_init.clone(),
                    merit: f64::NAN,
                    iterations: 0,
                    converged: false,
                    failed: true,
                }
            }
        }
    }

    fn solve_unconstrained(
        &self,
        problem: &Problem,
        x0: &Array1<f64>,
    ) -> Result<SolverResult, CatapultError> {
        let run = self.inner_solve(problem, &[], 0.0, x0);
        let cost = problem.cost.value(run.x.view());
        let dual_infeas = inf_norm(&problem.cost.gradient(run.x.view()));
        if self.options.verbose {
            eprintln!(
                "unconstrained solve: cost={cost:.6e}  dual={dual_infeas:.3e}  inner={}",
                run.iterations
            );
        }
        let mut history = Vec::new();
        if !run.failed {
            history.push(IterationRecord {
                outer: 0,
                cost,
                merit: run.merit,
                primal_infeas: 0.0,
                dual_infeas,
                mu: 0.0,
                inner_iterations: run.iterations,
                inner_converged: run.converged,
            });
        }
        Ok(SolverResult {
            x_opt: run.x,
            cost,
            converged: run.converged,
            iterations: run.iterations,
            primal_infeas: 0.0,
            dual_infeas,
            multipliers: Vec::new(),
            history,
        })
    }
}

impl Solver for AugLagSolver {
    fn solve(
        &self,
        problem: &Problem,
        x0: &Array1<f64>,
        lams0: &[Array1<f64>],
    ) -> Result<SolverResult, CatapultError> {
        if x0.len() != problem.nx() {
            return Err(CatapultError::Dimension {
                what: "initial guess vs problem variables".into(),
                expected: problem.nx(),
                actual: x0.len(),
            });
        }
        if lams0.len() != problem.num_constraint_blocks() {
            return Err(CatapultError::Dimension {
                what: "multiplier blocks vs constraint blocks".into(),
                expected: problem.num_constraint_blocks(),
                actual: lams0.len(),
            });
        }
        for (k, (lam, dim)) in lams0.iter().zip(problem.constraint_dims()).enumerate() {
            if lam.len() != dim {
                return Err(CatapultError::Dimension {
                    what: format!("multiplier block {k} vs constraint rows"),
                    expected: dim,
                    actual: lam.len(),
                });
            }
        }

        if problem.num_constraint_blocks() == 0 {
            return self.solve_unconstrained(problem, x0);
        }

        let mut x = x0.clone();
        let mut lambdas: Vec<Array1<f64>> = lams0.to_vec();
        let mut mu = self.options.mu_init;
        let mut history = Vec::new();
        let mut total_inner: u64 = 0;
        let mut converged = false;

        for outer in 0..self.options.max_outer_iters {
            let run = self.inner_solve(problem, &lambdas, mu, &x);
            total_inner += run.iterations;
            if run.failed {
                break;
            }
            let inner_iterations = run.iterations;
            let inner_converged = run.converged;
            let merit = run.merit;
            x = run.x;
            let xv = x.view();

            // Multiplier update and feasibility measures share one
            // evaluation pass over the blocks.
            let cost = problem.cost.value(xv);
            let mut primal_infeas = 0.0_f64;
            let mut lag_grad = problem.cost.gradient(xv);
            let mut next_lambdas = Vec::with_capacity(lambdas.len());
            for (constraint, lambda) in problem.constraints().iter().zip(&lambdas) {
                let c = constraint.residual.evaluate(xv);
                primal_infeas = primal_infeas.max(constraint.kind.violation(c.view()));
                let mut y = lambda.clone();
                y.scaled_add(mu, &c);
                if constraint.kind == ConstraintKind::NegativeOrthant {
                    y.mapv_inplace(|v| v.max(0.0));
                }
                lag_grad += &constraint.residual.jacobian(xv).t().dot(&y);
                next_lambdas.push(y);
            }
            let dual_infeas = inf_norm(&lag_grad);

            if self.options.verbose {
                eprintln!(
                    "AL outer {outer:2}: mu={mu:8.2e}  cost={cost:+.6e}  \
                     prim={primal_infeas:.3e}  dual={dual_infeas:.3e}  inner={inner_iterations}"
                );
            }
            history.push(IterationRecord {
                outer,
                cost,
                merit,
                primal_infeas,
                dual_infeas,
                mu,
                inner_iterations,
                inner_converged,
            });
            lambdas = next_lambdas;

            if primal_infeas < self.options.tol && inner_converged {
                converged = true;
                break;
            }
            mu = (mu * self.options.mu_factor).min(self.options.mu_max);
        }

        let cost = problem.cost.value(x.view());
        let (primal_infeas, dual_infeas) = optimality_measures(problem, x.view(), &lambdas);
        Ok(SolverResult {
            x_opt: x,
            cost,
            converged,
            iterations: total_inner,
            primal_infeas,
            dual_infeas,
            multipliers: lambdas,
            history,
        })
    }
}

/// Worst-block violation and ∞-norm of the Lagrangian gradient at `x`
/// under the given multipliers.
fn optimality_measures(
    problem: &Problem,
    x: ArrayView1<'_, f64>,
    lambdas: &[Array1<f64>],
) -> (f64, f64) {
    let mut primal = 0.0_f64;
    let mut lag_grad = problem.cost.gradient(x);
    for (constraint, lambda) in problem.constraints().iter().zip(lambdas) {
        let c = constraint.residual.evaluate(x);
        primal = primal.max(constraint.kind.violation(c.view()));
        lag_grad += &constraint.residual.jacobian(x).t().dot(lambda);
    }
    (primal, inf_norm(&lag_grad))
}

fn inf_norm(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0_f64, |m, &g| m.max(g.abs()))
}
