//! Multiple-shooting transcription of a trajectory-optimization problem.
//!
//! The decision vector packs `(N+1)` states followed by `N` controls.
//! [`MultipleShooting`] builds three differentiable functions over that
//! vector (stage + terminal cost, dynamics defect, control bounds) and
//! assembles them into a [`Problem`].

use crate::dynamics::Dynamics;
use crate::residual::{CostFromResidual, Residual};
use crate::types::{CatapultError, Constraint, Problem};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use num_dual::Dual64;
use std::ops::Range;

// ─────────────────────────────────────────────────────────────
//  Flat trajectory layout
// ─────────────────────────────────────────────────────────────

/// Index bookkeeping for the flat decision vector
/// `[x_0, …, x_N, u_0, …, u_{N-1}]`.
///
/// Every component that touches the flat vector (cost, defect, bounds,
/// solution slicing) goes through this one type, so the packing order
/// lives in exactly one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrajectoryLayout {
    pub nsteps: usize,
    pub nx: usize,
    pub nu: usize,
}

impl TrajectoryLayout {
    /// Total number of decision variables: `(N+1)·nx + N·nu`.
    pub fn nvars(&self) -> usize {
        (self.nsteps + 1) * self.nx + self.nsteps * self.nu
    }

    /// Index range of state `t`, valid for `t ≤ nsteps`.
    pub fn state_range(&self, t: usize) -> Range<usize> {
        debug_assert!(t <= self.nsteps);
        t * self.nx..(t + 1) * self.nx
    }

    /// Index range of control `t`, valid for `t < nsteps`.
    pub fn control_range(&self, t: usize) -> Range<usize> {
        debug_assert!(t < self.nsteps);
        let base = (self.nsteps + 1) * self.nx + t * self.nu;
        base..base + self.nu
    }

    /// Split a flat vector into `(states, controls)` arrays of shape
    /// `(N+1, nx)` and `(N, nu)`.
    pub fn split(
        &self,
        xu: ArrayView1<'_, f64>,
    ) -> Result<(Array2<f64>, Array2<f64>), CatapultError> {
        if xu.len() != self.nvars() {
            return Err(CatapultError::Dimension {
                what: "trajectory vector vs layout".into(),
                expected: self.nvars(),
                actual: xu.len(),
            });
        }
        let nstates = (self.nsteps + 1) * self.nx;
        let states = Array2::from_shape_fn((self.nsteps + 1, self.nx), |(t, i)| {
            xu[t * self.nx + i]
        });
        let controls = Array2::from_shape_fn((self.nsteps, self.nu), |(t, i)| {
            xu[nstates + t * self.nu + i]
        });
        Ok((states, controls))
    }

    /// Inverse of [`split`](Self::split): pack per-node arrays into the
    /// flat vector.
    pub fn pack(
        &self,
        states: ArrayView2<'_, f64>,
        controls: ArrayView2<'_, f64>,
    ) -> Result<Array1<f64>, CatapultError> {
        if states.nrows() != self.nsteps + 1 || states.ncols() != self.nx {
            return Err(CatapultError::Dimension {
                what: "state array vs layout".into(),
                expected: (self.nsteps + 1) * self.nx,
                actual: states.len(),
            });
        }
        if controls.nrows() != self.nsteps || controls.ncols() != self.nu {
            return Err(CatapultError::Dimension {
                what: "control array vs layout".into(),
                expected: self.nsteps * self.nu,
                actual: controls.len(),
            });
        }
        let mut out = Array1::zeros(self.nvars());
        for t in 0..=self.nsteps {
            let r = self.state_range(t);
            out.slice_mut(s![r.start..r.end]).assign(&states.row(t));
        }
        for t in 0..self.nsteps {
            let r = self.control_range(t);
            out.slice_mut(s![r.start..r.end]).assign(&controls.row(t));
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────
//  Problem builder
// ─────────────────────────────────────────────────────────────

/// Builder for the multiple-shooting NLP of a dynamics model.
///
/// Discretizes a horizon `T` into `N = round(T/dt)` semi-implicit Euler
/// steps. Controls enter the dynamics through the actuation matrix `B`
/// (`nv × nu`), so underactuated systems are expressed by dropping
/// columns. The realized horizon `N·dt` can differ from the requested
/// one; both are kept and exposed.
#[derive(Debug, Clone)]
pub struct MultipleShooting<M: Dynamics + Clone> {
    model: M,
    nsteps: usize,
    dt: f64,
    requested_horizon: f64,
    b: Array2<f64>,
    x0: Array1<f64>,
    x_target: Array1<f64>,
    w_x: f64,
    w_u: f64,
    w_term: f64,
}

impl<M: Dynamics + Clone> MultipleShooting<M> {
    /// Build a transcription over `horizon` seconds at step `dt`, from
    /// `x0` toward `x_target`, with default weights.
    pub fn new(
        model: M,
        horizon: f64,
        dt: f64,
        b: Array2<f64>,
        x0: Array1<f64>,
        x_target: Array1<f64>,
    ) -> Result<Self, CatapultError> {
        if !horizon.is_finite() || horizon <= 0.0 {
            return Err(CatapultError::Config(format!(
                "horizon must be positive and finite, got {horizon}"
            )));
        }
        if !dt.is_finite() || dt <= 0.0 {
            return Err(CatapultError::Config(format!(
                "time step must be positive and finite, got {dt}"
            )));
        }
        let nsteps = (horizon / dt).round() as usize;
        if nsteps == 0 {
            return Err(CatapultError::Config(format!(
                "horizon {horizon} rounds to zero steps at dt {dt}"
            )));
        }
        if b.nrows() != model.nv() {
            return Err(CatapultError::Dimension {
                what: "actuation matrix rows vs velocity dimension".into(),
                expected: model.nv(),
                actual: b.nrows(),
            });
        }
        if b.ncols() == 0 {
            return Err(CatapultError::Config(
                "actuation matrix must have at least one column".into(),
            ));
        }
        if x0.len() != model.nx() {
            return Err(CatapultError::Dimension {
                what: "initial state vs model state".into(),
                expected: model.nx(),
                actual: x0.len(),
            });
        }
        if x_target.len() != model.nx() {
            return Err(CatapultError::Dimension {
                what: "target state vs model state".into(),
                expected: model.nx(),
                actual: x_target.len(),
            });
        }
        Ok(Self {
            model,
            nsteps,
            dt,
            requested_horizon: horizon,
            b,
            x0,
            x_target,
            w_x: 1e-2,
            w_u: 1e-2,
            w_term: 1e-1,
        })
    }

    /// Override the running-state, running-control, and terminal weights.
    pub fn with_weights(mut self, w_x: f64, w_u: f64, w_term: f64) -> Self {
        self.w_x = w_x;
        self.w_u = w_u;
        self.w_term = w_term;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn nx(&self) -> usize {
        self.model.nx()
    }

    pub fn nu(&self) -> usize {
        self.b.ncols()
    }

    pub fn nsteps(&self) -> usize {
        self.nsteps
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Realized horizon `N·dt`.
    pub fn horizon(&self) -> f64 {
        self.nsteps as f64 * self.dt
    }

    /// Horizon the caller asked for, before rounding to whole steps.
    pub fn requested_horizon(&self) -> f64 {
        self.requested_horizon
    }

    pub fn layout(&self) -> TrajectoryLayout {
        TrajectoryLayout {
            nsteps: self.nsteps,
            nx: self.nx(),
            nu: self.nu(),
        }
    }

    /// Stage + terminal cost as a 1-row residual. The terminal weight
    /// vector is `w_term` on configuration components and zero on
    /// velocities.
    pub fn cost(&self) -> TrajectoryCost {
        let mut w_term = Array1::zeros(self.nx());
        w_term.slice_mut(s![..self.model.nq()]).fill(self.w_term);
        TrajectoryCost {
            layout: self.layout(),
            dt: self.dt,
            w_x: self.w_x,
            w_u: self.w_u,
            w_term,
            x_target: self.x_target.clone(),
        }
    }

    /// Dynamics-defect equality residual, size `(N+1)·nx`.
    pub fn dynamics_defect(&self) -> DynamicsDefect<M> {
        DynamicsDefect {
            model: self.model.clone(),
            layout: self.layout(),
            dt: self.dt,
            b: self.b.clone(),
            x0: self.x0.clone(),
        }
    }

    /// Symmetric control-bound residual `|u| ≤ u_max`, size `2·N·nu`,
    /// negative-orthant convention.
    pub fn control_bounds(&self, u_max: f64) -> Result<ControlBounds, CatapultError> {
        if !u_max.is_finite() || u_max <= 0.0 {
            return Err(CatapultError::Config(format!(
                "control bound must be positive and finite, got {u_max}"
            )));
        }
        Ok(ControlBounds {
            layout: self.layout(),
            u_max,
        })
    }

    /// All-zero initial guess for the flat decision vector.
    pub fn initial_guess(&self) -> Array1<f64> {
        Array1::zeros(self.layout().nvars())
    }

    /// Forward-simulate from `x0` under the given control sequence.
    /// Returns the `(N+1, nx)` state trajectory; its defect is zero by
    /// construction.
    pub fn simulate(&self, controls: ArrayView2<'_, f64>) -> Result<Array2<f64>, CatapultError> {
        if controls.nrows() != self.nsteps || controls.ncols() != self.nu() {
            return Err(CatapultError::Dimension {
                what: "control array vs layout".into(),
                expected: self.nsteps * self.nu(),
                actual: controls.len(),
            });
        }
        let mut states = Array2::zeros((self.nsteps + 1, self.nx()));
        states.row_mut(0).assign(&self.x0);
        for t in 0..self.nsteps {
            let tau = self.b.dot(&controls.row(t)).to_vec();
            let next = self.model.step(states.row(t), &tau, self.dt);
            states.row_mut(t + 1).assign(&next);
        }
        Ok(states)
    }

    /// Pack a simulated rollout under `controls` into a flat,
    /// defect-feasible decision vector (warm start).
    pub fn rollout_guess(&self, controls: ArrayView2<'_, f64>) -> Result<Array1<f64>, CatapultError> {
        let states = self.simulate(controls)?;
        self.layout().pack(states.view(), controls)
    }
}

impl<M: Dynamics + Clone + 'static> MultipleShooting<M> {
    /// Assemble the full problem: cost, then the equality defect block,
    /// then the control-bound block.
    pub fn problem(&self, u_max: f64) -> Result<Problem, CatapultError> {
        let cost = CostFromResidual::new(Box::new(self.cost()))?;
        let constraints = vec![
            Constraint::equality(Box::new(self.dynamics_defect())),
            Constraint::negative_orthant(Box::new(self.control_bounds(u_max)?)),
        ];
        Problem::new(Box::new(cost), constraints)
    }
}

// ─────────────────────────────────────────────────────────────
//  Cost
// ─────────────────────────────────────────────────────────────

/// `0.5·w_x·dt·Σ‖x_t‖² + 0.5·w_u·dt·Σ‖u_t‖²
///  + 0.5·(x_N − x*)ᵀ·diag(w_term)·(x_N − x*)`
/// as a 1-row residual with an analytic Jacobian. The state sum runs
/// over all `N+1` states.
#[derive(Debug, Clone)]
pub struct TrajectoryCost {
    layout: TrajectoryLayout,
    dt: f64,
    w_x: f64,
    w_u: f64,
    w_term: Array1<f64>,
    x_target: Array1<f64>,
}

impl Residual for TrajectoryCost {
    fn nx(&self) -> usize {
        self.layout.nvars()
    }

    fn nr(&self) -> usize {
        1
    }

    fn evaluate(&self, xu: ArrayView1<'_, f64>) -> Array1<f64> {
        let mut total = 0.0;
        for t in 0..=self.layout.nsteps {
            let r = self.layout.state_range(t);
            let x = xu.slice(s![r.start..r.end]);
            total += 0.5 * self.w_x * self.dt * x.dot(&x);
        }
        for t in 0..self.layout.nsteps {
            let r = self.layout.control_range(t);
            let u = xu.slice(s![r.start..r.end]);
            total += 0.5 * self.w_u * self.dt * u.dot(&u);
        }
        let r = self.layout.state_range(self.layout.nsteps);
        let xn = xu.slice(s![r.start..r.end]);
        let d = &xn - &self.x_target;
        total += 0.5
            * d.iter()
                .zip(self.w_term.iter())
                .map(|(&di, &wi)| wi * di * di)
                .sum::<f64>();
        Array1::from(vec![total])
    }

    fn jacobian(&self, xu: ArrayView1<'_, f64>) -> Array2<f64> {
        let mut jac = Array2::zeros((1, self.layout.nvars()));
        for t in 0..=self.layout.nsteps {
            let r = self.layout.state_range(t);
            for j in r {
                jac[[0, j]] += self.w_x * self.dt * xu[j];
            }
        }
        for t in 0..self.layout.nsteps {
            let r = self.layout.control_range(t);
            for j in r {
                jac[[0, j]] += self.w_u * self.dt * xu[j];
            }
        }
        let r = self.layout.state_range(self.layout.nsteps);
        for (i, j) in r.enumerate() {
            jac[[0, j]] += self.w_term[i] * (xu[j] - self.x_target[i]);
        }
        jac
    }
}

// ─────────────────────────────────────────────────────────────
//  Dynamics defect
// ─────────────────────────────────────────────────────────────

/// Equality residual gluing the shooting nodes together:
///
///   block 0:      x_0 − x0
///   block t+1:    x_{t+1} − step(x_t, B·u_t, dt)
///
/// Vanishes exactly on any forward-simulated trajectory, because it
/// evaluates through the same `step` path as the simulator. The
/// Jacobian combines identity blocks with per-stage dual-number columns
/// for the step map.
#[derive(Debug, Clone)]
pub struct DynamicsDefect<M: Dynamics + Clone> {
    model: M,
    layout: TrajectoryLayout,
    dt: f64,
    b: Array2<f64>,
    x0: Array1<f64>,
}

impl<M: Dynamics + Clone> Residual for DynamicsDefect<M> {
    fn nx(&self) -> usize {
        self.layout.nvars()
    }

    fn nr(&self) -> usize {
        (self.layout.nsteps + 1) * self.layout.nx
    }

    fn evaluate(&self, xu: ArrayView1<'_, f64>) -> Array1<f64> {
        let nx = self.layout.nx;
        let mut res = Array1::zeros(self.nr());
        let first = xu.slice(s![..nx]);
        res.slice_mut(s![..nx]).assign(&(&first - &self.x0));
        for t in 0..self.layout.nsteps {
            let xr = self.layout.state_range(t);
            let ur = self.layout.control_range(t);
            let xt = xu.slice(s![xr.start..xr.end]);
            let ut = xu.slice(s![ur.start..ur.end]);
            let tau = self.b.dot(&ut).to_vec();
            let pred = self.model.step(xt, &tau, self.dt);
            let next_r = self.layout.state_range(t + 1);
            let xnext = xu.slice(s![next_r.start..next_r.end]);
            let row = (t + 1) * nx;
            res.slice_mut(s![row..row + nx]).assign(&(&xnext - &pred));
        }
        res
    }

    fn jacobian(&self, xu: ArrayView1<'_, f64>) -> Array2<f64> {
        let nx = self.layout.nx;
        let nu = self.layout.nu;
        let nv = self.model.nv();
        let mut jac = Array2::zeros((self.nr(), self.layout.nvars()));
        for i in 0..nx {
            jac[[i, i]] = 1.0;
        }
        for t in 0..self.layout.nsteps {
            let row = (t + 1) * nx;
            let xr = self.layout.state_range(t);
            let ur = self.layout.control_range(t);
            let next = self.layout.state_range(t + 1);
            for i in 0..nx {
                jac[[row + i, next.start + i]] = 1.0;
            }
            let xt = xu.slice(s![xr.start..xr.end]);
            let ut = xu.slice(s![ur.start..ur.end]);
            // One dual sweep per stage input; the step map only ever
            // sees nx + nu seeds, never the whole trajectory.
            for j in 0..nx + nu {
                let mut xd: Vec<Dual64> = xt.iter().map(|&v| Dual64::from(v)).collect();
                let mut ud: Vec<Dual64> = ut.iter().map(|&v| Dual64::from(v)).collect();
                if j < nx {
                    xd[j] = xd[j].derivative();
                } else {
                    ud[j - nx] = ud[j - nx].derivative();
                }
                let taud: Vec<Dual64> = (0..nv)
                    .map(|i| {
                        let mut s = Dual64::from(0.0);
                        for k in 0..nu {
                            s = s + Dual64::from(self.b[[i, k]]) * ud[k];
                        }
                        s
                    })
                    .collect();
                let pred = self.model.step_dual(&xd, &taud, self.dt);
                let col = if j < nx {
                    xr.start + j
                } else {
                    ur.start + (j - nx)
                };
                for i in 0..nx {
                    jac[[row + i, col]] = -pred[i].eps;
                }
            }
        }
        jac
    }
}

// ─────────────────────────────────────────────────────────────
//  Control bounds
// ─────────────────────────────────────────────────────────────

/// Symmetric box bound on every control, stacked into one block:
/// rows `[u_t − u_max ; −u_t − u_max]` per step, feasible when all ≤ 0.
#[derive(Debug, Clone)]
pub struct ControlBounds {
    layout: TrajectoryLayout,
    u_max: f64,
}

impl ControlBounds {
    pub fn bound(&self) -> f64 {
        self.u_max
    }
}

impl Residual for ControlBounds {
    fn nx(&self) -> usize {
        self.layout.nvars()
    }

    fn nr(&self) -> usize {
        2 * self.layout.nsteps * self.layout.nu
    }

    fn evaluate(&self, xu: ArrayView1<'_, f64>) -> Array1<f64> {
        let nu = self.layout.nu;
        let mut res = Array1::zeros(self.nr());
        for t in 0..self.layout.nsteps {
            let r = self.layout.control_range(t);
            let base = 2 * nu * t;
            for i in 0..nu {
                let u = xu[r.start + i];
                res[base + i] = u - self.u_max;
                res[base + nu + i] = -u - self.u_max;
            }
        }
        res
    }

    fn jacobian(&self, _xu: ArrayView1<'_, f64>) -> Array2<f64> {
        let nu = self.layout.nu;
        let mut jac = Array2::zeros((self.nr(), self.layout.nvars()));
        for t in 0..self.layout.nsteps {
            let r = self.layout.control_range(t);
            let base = 2 * nu * t;
            for i in 0..nu {
                jac[[base + i, r.start + i]] = 1.0;
                jac[[base + nu + i, r.start + i]] = -1.0;
            }
        }
        jac
    }
}
