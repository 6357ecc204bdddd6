//! **Catapult** — multiple-shooting trajectory optimization.
//!
//! This crate encodes a discretized optimal-control problem as a
//! constrained nonlinear program and drives it to a solution:
//!
//! 1. **Residuals** (`residual`): vector-valued differentiable functions,
//!    linear residuals, and chain-rule composition.
//! 2. **Autodiff** (`autodiff`): forward-mode Jacobians via `num-dual`.
//! 3. **Spaces** (`manifold`): state spaces with `integrate` / `difference`.
//! 4. **Dynamics** (`dynamics`): forward-dynamics models differentiated
//!    with dual numbers (double pendulum, double integrator).
//! 5. **Shooting** (`shooting`): trajectory layout, stage + terminal cost,
//!    dynamics-defect equality constraint, control-bound inequality.
//! 6. **Solver** (`solver`): augmented-Lagrangian driver over L-BFGS via
//!    `argmin`.

pub mod types;
pub mod residual;
pub mod autodiff;
pub mod manifold;
pub mod dynamics;
pub mod shooting;
pub mod solver;
