//! Integration tests — end-to-end solves through the augmented-Lagrangian
//! driver.
//!
//! Small problems with known closed-form optima pin down the solver
//! exactly (projection onto a plane, one active bound); the trajectory
//! problems then exercise the full pipeline (transcription → problem
//! assembly → AL outer loop → solution slicing) and check everything
//! that is guaranteed regardless of how far the optimizer gets within
//! its iteration caps.

use catapult::autodiff::DualResidual;
use catapult::dynamics::{DoubleIntegrator, DoublePendulum};
use catapult::residual::{CostFromResidual, LinearResidual};
use catapult::shooting::MultipleShooting;
use catapult::solver::{AugLagSolver, Solver};
use catapult::types::{CatapultError, Constraint, Problem, SolverOptions};
use ndarray::{array, Array1, Array2};
use num_dual::Dual64;
use std::f64::consts::PI;

// ─────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────

/// `f(x) = 0.5·‖x − center‖²` as a one-row dual-number residual lifted
/// into a cost.
fn quadratic_cost(center: Array1<f64>) -> CostFromResidual {
    let c = center.to_vec();
    let n = c.len();
    let residual = DualResidual::new(n, 1, move |x: &[Dual64]| {
        let mut acc = Dual64::from(0.0);
        for (xi, ci) in x.iter().zip(&c) {
            let d = *xi - Dual64::from(*ci);
            acc = acc + d * d;
        }
        vec![acc * Dual64::from(0.5)]
    })
    .unwrap();
    CostFromResidual::new(Box::new(residual)).unwrap()
}

fn assert_near(label: &str, actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() < tol,
        "{label}: {actual} vs {expected} (tol {tol:.1e})",
    );
}

// ─────────────────────────────────────────────────────────────
//  Unconstrained path
// ─────────────────────────────────────────────────────────────

/// No constraint blocks: the driver reduces to one L-BFGS run and must
/// land on the quadratic's center.
#[test]
fn unconstrained_quadratic_reaches_center() {
    let center = array![1.0, -2.0, 0.5, 3.0];
    let problem = Problem::new(Box::new(quadratic_cost(center.clone())), Vec::new()).unwrap();
    let solver = AugLagSolver::new(SolverOptions::default());

    let result = solver.solve(&problem, &Array1::zeros(4), &[]).unwrap();

    assert!(result.converged, "quadratic solve must converge");
    assert!(result.iterations > 0, "should run at least 1 iteration");
    for i in 0..4 {
        assert_near("x_opt", result.x_opt[i], center[i], 1e-5);
    }
    assert!(result.cost < 1e-9, "cost at the center: {}", result.cost);
    assert_eq!(result.primal_infeas, 0.0);
    assert!(result.multipliers.is_empty());
    assert_eq!(result.history.len(), 1);
    assert!(result.history[0].inner_converged);

    eprintln!(
        "unconstrained quadratic: {} iterations, dual={:.3e}",
        result.iterations, result.dual_infeas,
    );
}

// ─────────────────────────────────────────────────────────────
//  Closed-form constrained problems
// ─────────────────────────────────────────────────────────────

/// Projection of p = (2, 1, −1) onto the plane x₁+x₂+x₃ = 1.
///
/// KKT gives x* = p − a·λ* with λ* = (aᵀp − 1)/‖a‖² = 1/3, so
/// x* = (5/3, 2/3, −4/3).
#[test]
fn equality_constrained_projection() {
    let problem = Problem::new(
        Box::new(quadratic_cost(array![2.0, 1.0, -1.0])),
        vec![Constraint::equality(Box::new(
            LinearResidual::new(array![[1.0, 1.0, 1.0]], array![-1.0]).unwrap(),
        ))],
    )
    .unwrap();
    let solver = AugLagSolver::new(SolverOptions::default());

    let result = solver
        .solve(&problem, &Array1::zeros(3), &problem.zero_multipliers())
        .unwrap();

    assert!(result.converged, "projection must converge");
    assert!(result.primal_infeas < 1e-4, "primal={:.3e}", result.primal_infeas);

    let expected = [5.0 / 3.0, 2.0 / 3.0, -4.0 / 3.0];
    for i in 0..3 {
        assert_near("x_opt", result.x_opt[i], expected[i], 1e-3);
    }
    assert_eq!(result.multipliers.len(), 1);
    assert_near("multiplier", result.multipliers[0][0], 1.0 / 3.0, 1e-3);

    // Penalty schedule: μ starts at its initial value and grows fivefold
    // per outer round until feasibility is reached.
    assert!(result.history.len() >= 2, "needs more than one outer round");
    assert_eq!(result.history[0].mu, 10.0);
    assert_eq!(result.history[1].mu, 50.0);
    let last = result.history.last().unwrap();
    assert!(
        last.primal_infeas < 1e-4,
        "last outer round must reach feasibility, got {:.3e}",
        last.primal_infeas,
    );

    eprintln!(
        "equality projection: {} outer rounds, {} inner iterations, primal={:.3e}",
        result.history.len(),
        result.iterations,
        result.primal_infeas,
    );
}

/// Minimize ‖x − (2, −1)‖²/2 under x₀ ≤ 0.5 and x₁ ≥ −5.
///
/// The first bound is active: x* = (0.5, −1), λ* = (1.5, 0).
#[test]
fn inequality_active_bound() {
    let gates = LinearResidual::new(
        array![[1.0, 0.0], [0.0, -1.0]],
        array![-0.5, -5.0],
    )
    .unwrap();
    let problem = Problem::new(
        Box::new(quadratic_cost(array![2.0, -1.0])),
        vec![Constraint::negative_orthant(Box::new(gates))],
    )
    .unwrap();
    let solver = AugLagSolver::new(SolverOptions::default());

    let result = solver
        .solve(&problem, &Array1::zeros(2), &problem.zero_multipliers())
        .unwrap();

    assert!(result.converged, "bounded projection must converge");
    assert_near("x_opt[0]", result.x_opt[0], 0.5, 1e-3);
    assert_near("x_opt[1]", result.x_opt[1], -1.0, 1e-3);

    let lam = &result.multipliers[0];
    assert_eq!(lam.len(), 2);
    assert_near("active multiplier", lam[0], 1.5, 1e-3);
    assert_eq!(lam[1], 0.0, "inactive bound keeps a zero multiplier");
    assert!(lam.iter().all(|&v| v >= 0.0));

    eprintln!(
        "active bound: x=({:.6}, {:.6}), λ=({:.6}, {:.6})",
        result.x_opt[0], result.x_opt[1], lam[0], lam[1],
    );
}

// ─────────────────────────────────────────────────────────────
//  Trajectory problems
// ─────────────────────────────────────────────────────────────

/// Bring a 1-D double integrator from q = 1 to rest at the origin:
/// 50 shooting steps, 152 variables, 102 defect rows, 100 bound rows.
/// Starts from a defect-feasible coasting rollout.
#[test]
fn cart_transcription_end_to_end() {
    let shooting = MultipleShooting::new(
        DoubleIntegrator::new(1),
        1.5,
        0.03,
        array![[1.0]],
        array![1.0, 0.0],
        Array1::zeros(2),
    )
    .unwrap();
    assert_eq!(shooting.nsteps(), 50);

    let problem = shooting.problem(2.0).unwrap();
    assert_eq!(problem.nx(), 152);
    assert_eq!(problem.total_constraint_dim(), 202);

    let warm = shooting
        .rollout_guess(Array2::zeros((50, 1)).view())
        .unwrap();
    let solver = AugLagSolver::new(SolverOptions {
        tol: 1e-3,
        max_outer_iters: 6,
        max_inner_iters: 200,
        ..SolverOptions::default()
    });

    let result = solver
        .solve(&problem, &warm, &problem.zero_multipliers())
        .unwrap();

    assert_eq!(result.x_opt.len(), 152);
    assert!(result.x_opt.iter().all(|v| v.is_finite()));
    assert!(result.cost.is_finite());
    assert!(result.iterations > 0);
    assert!(!result.history.is_empty() && result.history.len() <= 6);
    assert_eq!(result.multipliers[0].len(), 102);
    assert_eq!(result.multipliers[1].len(), 100);
    assert!(
        result.multipliers[1].iter().all(|&v| v >= 0.0),
        "bound multipliers live in the positive orthant",
    );
    assert!(
        result.primal_infeas < 0.5,
        "feasibility walked away from a feasible start: {:.3e}",
        result.primal_infeas,
    );

    // Slice the solution back into per-node arrays.
    let (states, controls) = shooting.layout().split(result.x_opt.view()).unwrap();
    assert_eq!(states.dim(), (51, 2));
    assert_eq!(controls.dim(), (50, 1));
    for &u in controls.iter() {
        assert!(
            u.abs() <= 2.0 + 0.1,
            "control {u} strays far outside the ±2 bound",
        );
    }

    eprintln!(
        "cart: {} outer rounds, {} inner iterations, converged={}, cost={:.6e}, primal={:.3e}",
        result.history.len(),
        result.iterations,
        result.converged,
        result.cost,
        result.primal_infeas,
    );
}

/// Elbow-torque swing-up attempt over half a second. The iteration caps
/// keep the run short; only outcome invariants are asserted, not how
/// far the swing gets.
#[test]
fn pendulum_swing_up_smoke() {
    let shooting = MultipleShooting::new(
        DoublePendulum::default(),
        0.5,
        0.05,
        array![[0.0], [1.0]],
        array![PI, 0.0, 0.0, 0.0],
        Array1::zeros(4),
    )
    .unwrap();
    let problem = shooting.problem(2.0).unwrap();
    assert_eq!(problem.nx(), 11 * 4 + 10);

    let warm = shooting
        .rollout_guess(Array2::zeros((10, 1)).view())
        .unwrap();
    let solver = AugLagSolver::new(SolverOptions {
        tol: 1e-3,
        max_outer_iters: 4,
        max_inner_iters: 150,
        ..SolverOptions::default()
    });

    let result = solver
        .solve(&problem, &warm, &problem.zero_multipliers())
        .unwrap();

    assert!(result.x_opt.iter().all(|v| v.is_finite()));
    assert!(result.cost.is_finite());
    assert!(result.primal_infeas.is_finite());
    assert!(result.dual_infeas.is_finite());
    assert!(result.history.len() <= 4);
    for rec in &result.history {
        assert!(rec.inner_iterations <= 150);
        assert!(rec.primal_infeas.is_finite() && rec.primal_infeas >= 0.0);
    }
    for pair in result.history.windows(2) {
        assert!(
            pair[1].mu >= pair[0].mu,
            "penalty must never shrink between outer rounds",
        );
    }
    assert_eq!(result.multipliers.len(), 2);
    assert!(result.multipliers[1].iter().all(|&v| v >= 0.0));

    eprintln!(
        "swing-up smoke: {} outer rounds, {} inner iterations, converged={}, primal={:.3e}",
        result.history.len(),
        result.iterations,
        result.converged,
        result.primal_infeas,
    );
}

// ─────────────────────────────────────────────────────────────
//  Input validation
// ─────────────────────────────────────────────────────────────

/// Mis-sized guesses and multiplier blocks are rejected before any
/// iteration happens.
#[test]
fn solver_rejects_mismatched_inputs() {
    let shooting = MultipleShooting::new(
        DoubleIntegrator::new(1),
        0.2,
        0.1,
        array![[1.0]],
        array![1.0, 0.0],
        Array1::zeros(2),
    )
    .unwrap();
    let problem = shooting.problem(1.0).unwrap();
    let solver = AugLagSolver::new(SolverOptions::default());
    let x0 = shooting.initial_guess();
    let lams = problem.zero_multipliers();

    match solver
        .solve(&problem, &Array1::zeros(3), &lams)
        .unwrap_err()
    {
        CatapultError::Dimension { expected, actual, .. } => {
            assert_eq!(expected, problem.nx());
            assert_eq!(actual, 3);
        }
        other => panic!("expected dimension error, got {other:?}"),
    }

    assert!(matches!(
        solver.solve(&problem, &x0, &lams[..1]),
        Err(CatapultError::Dimension { .. })
    ));

    let mut bad = problem.zero_multipliers();
    bad[1] = Array1::zeros(7);
    assert!(matches!(
        solver.solve(&problem, &x0, &bad),
        Err(CatapultError::Dimension { .. })
    ));
}
