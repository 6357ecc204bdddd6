//! State spaces with retraction. A manifold here is a coordinate space of
//! dimension `nx` with tangent dimension `ndx`, an `integrate` retraction
//! applying a tangent displacement to a point, and the inverse
//! `difference` operator.
//!
//! Flat vector spaces are the common case (`integrate` is addition); the
//! phase space of a dynamics model lives in [`crate::dynamics`].

use ndarray::{Array1, ArrayView1};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

// ─────────────────────────────────────────────────────────────
//  Manifold trait
// ─────────────────────────────────────────────────────────────

/// A state space with retraction.
///
/// Contract: `difference(a, integrate(a, dx)) == dx` for all points `a`
/// and tangents `dx`.
pub trait Manifold: Debug + Send + Sync {
    /// Coordinate dimension of a point.
    fn nx(&self) -> usize;

    /// Tangent dimension.
    fn ndx(&self) -> usize;

    /// The neutral element (all-zero coordinates for the spaces here).
    fn neutral(&self) -> Array1<f64>;

    /// A point with coordinates drawn uniformly from `[-1, 1)`.
    fn rand(&self) -> Array1<f64>;

    /// Apply a tangent displacement: `x ⊞ dx`.
    fn integrate(&self, x: ArrayView1<'_, f64>, dx: ArrayView1<'_, f64>) -> Array1<f64>;

    /// Tangent taking `a` to `b`: `b ⊟ a`.
    fn difference(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Array1<f64>;
}

// ─────────────────────────────────────────────────────────────
//  Flat vector space
// ─────────────────────────────────────────────────────────────

/// `R^dim` with plain addition as the retraction.
#[derive(Debug, Clone, Copy)]
pub struct VectorSpace {
    pub dim: usize,
}

impl VectorSpace {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Manifold for VectorSpace {
    fn nx(&self) -> usize {
        self.dim
    }

    fn ndx(&self) -> usize {
        self.dim
    }

    fn neutral(&self) -> Array1<f64> {
        Array1::zeros(self.dim)
    }

    fn rand(&self) -> Array1<f64> {
        uniform_sample(self.dim)
    }

    fn integrate(&self, x: ArrayView1<'_, f64>, dx: ArrayView1<'_, f64>) -> Array1<f64> {
        debug_assert_eq!(x.len(), self.dim);
        debug_assert_eq!(dx.len(), self.dim);
        &x + &dx
    }

    fn difference(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Array1<f64> {
        debug_assert_eq!(a.len(), self.dim);
        debug_assert_eq!(b.len(), self.dim);
        &b - &a
    }
}

// ─────────────────────────────────────────────────────────────
//  Deterministic uniform source
// ─────────────────────────────────────────────────────────────

static SAMPLE_STATE: AtomicU64 = AtomicU64::new(0x9E37_79B9_7F4A_7C15);

fn splitmix64(mut z: u64) -> u64 {
    z ^= z >> 30;
    z = z.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z ^= z >> 27;
    z = z.wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// `n` samples uniform in `[-1, 1)` from a process-wide splitmix counter.
/// Deterministic given call order, which keeps test failures replayable.
pub(crate) fn uniform_sample(n: usize) -> Array1<f64> {
    (0..n)
        .map(|_| {
            let s = SAMPLE_STATE.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed);
            let bits = splitmix64(s) >> 11;
            // 53 uniform mantissa bits in [0, 1), mapped to [-1, 1)
            2.0 * (bits as f64 / (1u64 << 53) as f64) - 1.0
        })
        .collect()
}
