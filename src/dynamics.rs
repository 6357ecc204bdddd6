//! Forward-dynamics models, written over dual numbers so that one
//! implementation serves both plain evaluation and exact differentiation.
//!
//! A model provides the acceleration map `a = f_dyn(q, v, τ)` and the
//! configuration integrator `q ⊞ dq`. The provided `step` methods apply
//! one semi-implicit Euler step:
//!
//!   v⁺ = v + dt·a
//!   q⁺ = integrate_config(q, dt·v⁺)

use crate::autodiff::{lift, real_parts};
use crate::manifold::{uniform_sample, Manifold};
use ndarray::{s, Array1, ArrayView1};
use num_dual::{Dual64, DualNum};
use std::fmt::Debug;

// ─────────────────────────────────────────────────────────────
//  Dynamics trait
// ─────────────────────────────────────────────────────────────

/// A mechanical system with `nq` configuration and `nv` velocity
/// coordinates, accelerated by a generalized force `τ` of dimension `nv`.
pub trait Dynamics: Debug + Send + Sync {
    /// Configuration dimension.
    fn nq(&self) -> usize;

    /// Velocity dimension.
    fn nv(&self) -> usize;

    /// Forward dynamics: acceleration at `(q, v)` under force `τ`.
    fn acceleration(&self, q: &[Dual64], v: &[Dual64], tau: &[Dual64]) -> Vec<Dual64>;

    /// Apply a configuration displacement: `q ⊞ dq`.
    fn integrate_config(&self, q: &[Dual64], dq: &[Dual64]) -> Vec<Dual64>;

    /// State dimension `nq + nv`.
    fn nx(&self) -> usize {
        self.nq() + self.nv()
    }

    /// One semi-implicit Euler step of the full state `x = [q; v]`,
    /// in dual arithmetic.
    fn step_dual(&self, x: &[Dual64], tau: &[Dual64], dt: f64) -> Vec<Dual64> {
        let nq = self.nq();
        debug_assert_eq!(x.len(), self.nx());
        debug_assert_eq!(tau.len(), self.nv());
        let (q, v) = x.split_at(nq);
        let acc = self.acceleration(q, v, tau);
        debug_assert_eq!(acc.len(), self.nv());
        let dt_d = Dual64::from(dt);
        let v_next: Vec<Dual64> = v
            .iter()
            .zip(&acc)
            .map(|(&vi, &ai)| vi + dt_d * ai)
            .collect();
        let dq: Vec<Dual64> = v_next.iter().map(|&vi| dt_d * vi).collect();
        let mut out = self.integrate_config(q, &dq);
        out.extend_from_slice(&v_next);
        out
    }

    /// One semi-implicit Euler step at a real state.
    fn step(&self, x: ArrayView1<'_, f64>, tau: &[f64], dt: f64) -> Array1<f64> {
        let xd = lift(x);
        let taud: Vec<Dual64> = tau.iter().map(|&t| Dual64::from(t)).collect();
        real_parts(&self.step_dual(&xd, &taud, dt))
    }
}

// ─────────────────────────────────────────────────────────────
//  Planar double pendulum  (two point masses, revolute joints)
// ─────────────────────────────────────────────────────────────

/// Two-link planar pendulum with point masses at the link ends.
///
/// Angles are measured from the upright vertical, `θ2` relative to the
/// first link, so the unstable equilibrium is `q = 0` and the hanging
/// rest state is `q = [π, 0]`. Closed-form rigid-body dynamics
/// `M(q)·a + C(q, v)·v + g(q) = τ`.
#[derive(Debug, Clone)]
pub struct DoublePendulum {
    pub m1: f64,
    pub m2: f64,
    pub l1: f64,
    pub l2: f64,
    pub gravity: f64,
}

impl Default for DoublePendulum {
    fn default() -> Self {
        Self {
            m1: 1.0,
            m2: 1.0,
            l1: 1.0,
            l2: 1.0,
            gravity: 9.81,
        }
    }
}

impl Dynamics for DoublePendulum {
    fn nq(&self) -> usize {
        2
    }

    fn nv(&self) -> usize {
        2
    }

    fn acceleration(&self, q: &[Dual64], v: &[Dual64], tau: &[Dual64]) -> Vec<Dual64> {
        debug_assert_eq!(q.len(), 2);
        debug_assert_eq!(v.len(), 2);
        debug_assert_eq!(tau.len(), 2);
        let (l1, l2) = (self.l1, self.l2);
        let g = self.gravity;

        let s1 = q[0].sin();
        let s2 = q[1].sin();
        let c2 = q[1].cos();
        let s12 = (q[0] + q[1]).sin();

        // Mass matrix  M = [m11 m12; m12 m22]
        let k_m11 = Dual64::from(self.m1 * l1 * l1 + self.m2 * (l1 * l1 + l2 * l2));
        let k_m12 = Dual64::from(self.m2 * l2 * l2);
        let k_cross = Dual64::from(self.m2 * l1 * l2);
        let two = Dual64::from(2.0);
        let m11 = k_m11 + two * k_cross * c2;
        let m12 = k_m12 + k_cross * c2;
        let m22 = k_m12;

        // Coriolis / centrifugal vector  C(q, v)·v
        let h = k_cross * s2;
        let cor1 = -h * (two * v[0] * v[1] + v[1] * v[1]);
        let cor2 = h * v[0] * v[0];

        // Gravity  ∂V/∂q  with  V = (m1+m2)·g·l1·cosθ1 + m2·g·l2·cos(θ1+θ2)
        let k_g1 = Dual64::from((self.m1 + self.m2) * g * l1);
        let k_g2 = Dual64::from(self.m2 * g * l2);
        let grav1 = -k_g1 * s1 - k_g2 * s12;
        let grav2 = -k_g2 * s12;

        // Solve the 2×2 system  M·a = τ − C·v − ∂V/∂q
        let r1 = tau[0] - cor1 - grav1;
        let r2 = tau[1] - cor2 - grav2;
        let det = m11 * m22 - m12 * m12;
        vec![(m22 * r1 - m12 * r2) / det, (m11 * r2 - m12 * r1) / det]
    }

    fn integrate_config(&self, q: &[Dual64], dq: &[Dual64]) -> Vec<Dual64> {
        // Revolute joints on unbounded angle coordinates: plain addition.
        q.iter().zip(dq).map(|(&qi, &di)| qi + di).collect()
    }
}

// ─────────────────────────────────────────────────────────────
//  Double integrator  (linear test model)
// ─────────────────────────────────────────────────────────────

/// `q̈ = τ` in `dim` dimensions; the simplest linear dynamics model.
#[derive(Debug, Clone)]
pub struct DoubleIntegrator {
    pub dim: usize,
}

impl DoubleIntegrator {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Dynamics for DoubleIntegrator {
    fn nq(&self) -> usize {
        self.dim
    }

    fn nv(&self) -> usize {
        self.dim
    }

    fn acceleration(&self, _q: &[Dual64], _v: &[Dual64], tau: &[Dual64]) -> Vec<Dual64> {
        debug_assert_eq!(tau.len(), self.dim);
        tau.to_vec()
    }

    fn integrate_config(&self, q: &[Dual64], dq: &[Dual64]) -> Vec<Dual64> {
        q.iter().zip(dq).map(|(&qi, &di)| qi + di).collect()
    }
}

// ─────────────────────────────────────────────────────────────
//  Phase space of a model
// ─────────────────────────────────────────────────────────────

/// The state space `x = [q; v]` of a dynamics model, as a [`Manifold`].
///
/// The configuration part retracts through the model's
/// `integrate_config`; the velocity part is a plain vector space. The
/// shipped models use coordinate charts where `difference` is the
/// componentwise inverse of `integrate`.
#[derive(Debug, Clone)]
pub struct PhaseSpace<M: Dynamics> {
    pub model: M,
}

impl<M: Dynamics> PhaseSpace<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

impl<M: Dynamics> Manifold for PhaseSpace<M> {
    fn nx(&self) -> usize {
        self.model.nx()
    }

    fn ndx(&self) -> usize {
        self.model.nx()
    }

    fn neutral(&self) -> Array1<f64> {
        Array1::zeros(self.nx())
    }

    fn rand(&self) -> Array1<f64> {
        uniform_sample(self.nx())
    }

    fn integrate(&self, x: ArrayView1<'_, f64>, dx: ArrayView1<'_, f64>) -> Array1<f64> {
        debug_assert_eq!(x.len(), self.nx());
        debug_assert_eq!(dx.len(), self.nx());
        let nq = self.model.nq();
        let q = lift(x.slice(s![..nq]));
        let dq = lift(dx.slice(s![..nq]));
        let q_next = real_parts(&self.model.integrate_config(&q, &dq));

        let mut out = Array1::zeros(self.nx());
        out.slice_mut(s![..nq]).assign(&q_next);
        let v_next = &x.slice(s![nq..]) + &dx.slice(s![nq..]);
        out.slice_mut(s![nq..]).assign(&v_next);
        out
    }

    fn difference(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Array1<f64> {
        debug_assert_eq!(a.len(), self.nx());
        debug_assert_eq!(b.len(), self.nx());
        &b - &a
    }
}
