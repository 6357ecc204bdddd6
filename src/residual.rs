//! Vector-valued differentiable functions: the building blocks every cost
//! and constraint in this crate is made of.
//!
//! A residual maps a point `x` (coordinates of dimension `nx`, tangent
//! dimension `ndx`) to a vector of dimension `nr` and exposes the exact
//! Jacobian of that map. Residuals are immutable after construction and
//! pure: evaluation never mutates captured data, so distinct inputs may
//! be evaluated concurrently.

use crate::types::CatapultError;
use ndarray::{Array1, Array2, ArrayView1};
use std::fmt::Debug;

// ─────────────────────────────────────────────────────────────
//  Residual trait
// ─────────────────────────────────────────────────────────────

/// A differentiable function `r: R^nx → R^nr`.
///
/// `ndx` is the tangent dimension of the input space; it equals `nx` for
/// flat vector spaces, which is the default. Jacobians are `nr × ndx`.
pub trait Residual: Debug + Send + Sync {
    /// Input coordinate dimension.
    fn nx(&self) -> usize;

    /// Input tangent dimension. Defaults to `nx()` (flat input space).
    fn ndx(&self) -> usize {
        self.nx()
    }

    /// Output dimension.
    fn nr(&self) -> usize;

    /// Value `r(x)`. `x` must have length `nx()`.
    fn evaluate(&self, x: ArrayView1<'_, f64>) -> Array1<f64>;

    /// Exact Jacobian `∂r/∂x` at `x`, shape `nr × ndx`.
    fn jacobian(&self, x: ArrayView1<'_, f64>) -> Array2<f64>;
}

// ─────────────────────────────────────────────────────────────
//  Linear residual  r(x) = A x + b
// ─────────────────────────────────────────────────────────────

/// Affine residual `r(x) = A x + b` with constant Jacobian `A`.
#[derive(Debug, Clone)]
pub struct LinearResidual {
    pub a: Array2<f64>,
    pub b: Array1<f64>,
}

impl LinearResidual {
    /// Build from a matrix and offset. Fails when `b` does not match the
    /// row count of `A`.
    pub fn new(a: Array2<f64>, b: Array1<f64>) -> Result<Self, CatapultError> {
        if b.len() != a.nrows() {
            return Err(CatapultError::Dimension {
                what: "linear residual offset vs matrix rows".into(),
                expected: a.nrows(),
                actual: b.len(),
            });
        }
        Ok(Self { a, b })
    }

    /// Linear map with zero offset: `r(x) = A x`.
    pub fn homogeneous(a: Array2<f64>) -> Self {
        let b = Array1::zeros(a.nrows());
        Self { a, b }
    }
}

impl Residual for LinearResidual {
    fn nx(&self) -> usize {
        self.a.ncols()
    }

    fn nr(&self) -> usize {
        self.a.nrows()
    }

    fn evaluate(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        self.a.dot(&x) + &self.b
    }

    fn jacobian(&self, _x: ArrayView1<'_, f64>) -> Array2<f64> {
        self.a.clone()
    }
}

// ─────────────────────────────────────────────────────────────
//  Composition  h = g ∘ f
// ─────────────────────────────────────────────────────────────

/// Composition of two residuals: `h(x) = outer(inner(x))`.
///
/// Dimensions: `h` takes the inner function's input space
/// (`nx = inner.nx`, `ndx = inner.ndx`) to the outer function's range
/// (`nr = outer.nr`). The Jacobian is the exact chain-rule product
/// `J_h(x) = J_outer(inner(x)) · J_inner(x)`.
///
/// Evaluation recomputes `inner(x)` on every call; nothing is cached.
#[derive(Debug)]
pub struct ComposedResidual {
    outer: Box<dyn Residual>,
    inner: Box<dyn Residual>,
}

impl ComposedResidual {
    /// Compose `outer ∘ inner`. Fails with a dimension error when the
    /// outer input dimension differs from the inner output dimension.
    pub fn new(
        outer: Box<dyn Residual>,
        inner: Box<dyn Residual>,
    ) -> Result<Self, CatapultError> {
        if outer.nx() != inner.nr() {
            return Err(CatapultError::Dimension {
                what: "composition outer input vs inner output".into(),
                expected: outer.nx(),
                actual: inner.nr(),
            });
        }
        Ok(Self { outer, inner })
    }

    pub fn outer(&self) -> &dyn Residual {
        self.outer.as_ref()
    }

    pub fn inner(&self) -> &dyn Residual {
        self.inner.as_ref()
    }
}

impl Residual for ComposedResidual {
    fn nx(&self) -> usize {
        self.inner.nx()
    }

    fn ndx(&self) -> usize {
        self.inner.ndx()
    }

    fn nr(&self) -> usize {
        self.outer.nr()
    }

    fn evaluate(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        let mid = self.inner.evaluate(x);
        self.outer.evaluate(mid.view())
    }

    fn jacobian(&self, x: ArrayView1<'_, f64>) -> Array2<f64> {
        let mid = self.inner.evaluate(x);
        let j_outer = self.outer.jacobian(mid.view());
        let j_inner = self.inner.jacobian(x);
        debug_assert_eq!(j_outer.ncols(), j_inner.nrows());
        j_outer.dot(&j_inner)
    }
}

/// Free-function form of [`ComposedResidual::new`]: `compose(g, f)` builds
/// `x ↦ g(f(x))`.
pub fn compose(
    outer: Box<dyn Residual>,
    inner: Box<dyn Residual>,
) -> Result<ComposedResidual, CatapultError> {
    ComposedResidual::new(outer, inner)
}

// ─────────────────────────────────────────────────────────────
//  Scalar costs
// ─────────────────────────────────────────────────────────────

/// A scalar objective with an exact gradient.
pub trait Cost: Debug + Send + Sync {
    /// Input coordinate dimension.
    fn nx(&self) -> usize;

    /// Input tangent dimension.
    fn ndx(&self) -> usize {
        self.nx()
    }

    /// Objective value at `x`.
    fn value(&self, x: ArrayView1<'_, f64>) -> f64;

    /// Gradient at `x`, length `ndx()`.
    fn gradient(&self, x: ArrayView1<'_, f64>) -> Array1<f64>;
}

/// Adapter lifting a one-row residual into a [`Cost`]: the value is the
/// single residual entry and the gradient is the single Jacobian row.
#[derive(Debug)]
pub struct CostFromResidual {
    residual: Box<dyn Residual>,
}

impl CostFromResidual {
    /// Fails unless the wrapped residual has exactly one output row.
    pub fn new(residual: Box<dyn Residual>) -> Result<Self, CatapultError> {
        if residual.nr() != 1 {
            return Err(CatapultError::Dimension {
                what: "scalar cost from residual rows".into(),
                expected: 1,
                actual: residual.nr(),
            });
        }
        Ok(Self { residual })
    }
}

impl Cost for CostFromResidual {
    fn nx(&self) -> usize {
        self.residual.nx()
    }

    fn ndx(&self) -> usize {
        self.residual.ndx()
    }

    fn value(&self, x: ArrayView1<'_, f64>) -> f64 {
        self.residual.evaluate(x)[0]
    }

    fn gradient(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        self.residual.jacobian(x).row(0).to_owned()
    }
}
