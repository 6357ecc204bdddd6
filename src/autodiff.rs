//! Forward-mode automatic differentiation via `num-dual`.
//!
//! Jacobians are built one column at a time: seed the j-th input with a
//! unit dual perturbation, evaluate, and read the dual parts of the
//! outputs. Exact to machine precision for smooth closures, no
//! finite-difference step to tune.

use crate::residual::Residual;
use crate::types::CatapultError;
use ndarray::{Array1, Array2, ArrayView1};
use num_dual::Dual64;
use std::fmt;

// ─────────────────────────────────────────────────────────────
//  Dual-vector helpers
// ─────────────────────────────────────────────────────────────

/// Lift a real vector into dual numbers with zero derivative part.
pub fn lift(x: ArrayView1<'_, f64>) -> Vec<Dual64> {
    x.iter().map(|&v| Dual64::from(v)).collect()
}

/// Real parts of a dual vector.
pub fn real_parts(r: &[Dual64]) -> Array1<f64> {
    r.iter().map(|d| d.re).collect()
}

/// Evaluate a dual closure at a real point.
pub fn eval_real<F>(f: &F, x: ArrayView1<'_, f64>) -> Array1<f64>
where
    F: Fn(&[Dual64]) -> Vec<Dual64>,
{
    real_parts(&f(&lift(x)))
}

/// Jacobian of a dual closure at `x`, shape `nr × x.len()`.
///
/// One forward pass per input component: column `j` is the dual part of
/// the output when input `j` carries the unit seed.
pub fn jacobian_forward<F>(f: &F, x: ArrayView1<'_, f64>, nr: usize) -> Array2<f64>
where
    F: Fn(&[Dual64]) -> Vec<Dual64>,
{
    let n = x.len();
    let mut jac = Array2::zeros((nr, n));
    for j in 0..n {
        let mut x_dual = lift(x);
        x_dual[j] = Dual64::from(x[j]).derivative();
        let r = f(&x_dual);
        debug_assert_eq!(r.len(), nr);
        for (i, ri) in r.iter().enumerate() {
            jac[[i, j]] = ri.eps;
        }
    }
    jac
}

// ─────────────────────────────────────────────────────────────
//  Residual from a dual closure
// ─────────────────────────────────────────────────────────────

/// A [`Residual`] backed by a closure over dual numbers.
///
/// The closure must map `nx` duals to `nr` duals; value and Jacobian both
/// come from forward passes of the same closure, so they can never drift
/// apart.
pub struct DualResidual<F> {
    nx: usize,
    nr: usize,
    f: F,
}

impl<F> DualResidual<F>
where
    F: Fn(&[Dual64]) -> Vec<Dual64> + Send + Sync,
{
    pub fn new(nx: usize, nr: usize, f: F) -> Result<Self, CatapultError> {
        if nx == 0 {
            return Err(CatapultError::Config(
                "dual residual input dimension must be positive".into(),
            ));
        }
        if nr == 0 {
            return Err(CatapultError::Config(
                "dual residual output dimension must be positive".into(),
            ));
        }
        Ok(Self { nx, nr, f })
    }
}

impl<F> fmt::Debug for DualResidual<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DualResidual(nx={}, nr={})", self.nx, self.nr)
    }
}

impl<F> Residual for DualResidual<F>
where
    F: Fn(&[Dual64]) -> Vec<Dual64> + Send + Sync,
{
    fn nx(&self) -> usize {
        self.nx
    }

    fn nr(&self) -> usize {
        self.nr
    }

    fn evaluate(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        debug_assert_eq!(x.len(), self.nx);
        eval_real(&self.f, x)
    }

    fn jacobian(&self, x: ArrayView1<'_, f64>) -> Array2<f64> {
        debug_assert_eq!(x.len(), self.nx);
        jacobian_forward(&self.f, x, self.nr)
    }
}
