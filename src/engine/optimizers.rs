use std::collections::VecDeque;

use nalgebra::{DMatrix, DVector, Point3, SymmetricEigen, Vector3};

use crate::core::config::OptimizerKind;

/// A local optimization strategy. The relaxation runner owns the loop; the
/// strategy only turns the current positions and forces into new positions.
///
/// Forces on fixed atoms arrive zeroed, and the runner restores fixed atoms
/// after every step.
pub trait Optimizer: Send {
    fn step(&mut self, positions: &mut [Point3<f64>], forces: &[Vector3<f64>], energy: f64);

    fn name(&self) -> &'static str;
}

/// Builds a fresh strategy of the configured kind. `damping` only affects L-BFGS.
pub fn build(kind: OptimizerKind, max_step: f64, damping: f64) -> Box<dyn Optimizer> {
    match kind {
        OptimizerKind::Lbfgs => Box::new(Lbfgs::new(max_step).damping(damping)),
        OptimizerKind::Bfgs => Box::new(Bfgs::new(max_step)),
        OptimizerKind::Fire => Box::new(Fire::new(max_step)),
    }
}

// --- Flat Vector Helpers ---

fn flatten_points(points: &[Point3<f64>]) -> DVector<f64> {
    DVector::from_iterator(points.len() * 3, points.iter().flat_map(|p| [p.x, p.y, p.z]))
}

fn flatten_vectors(vectors: &[Vector3<f64>]) -> DVector<f64> {
    DVector::from_iterator(vectors.len() * 3, vectors.iter().flat_map(|v| [v.x, v.y, v.z]))
}

fn apply_displacement(positions: &mut [Point3<f64>], dr: &DVector<f64>) {
    for (i, p) in positions.iter_mut().enumerate() {
        p.x += dr[3 * i];
        p.y += dr[3 * i + 1];
        p.z += dr[3 * i + 2];
    }
}

/// Scales `dr` so that no atom moves further than `max_step`.
fn limit_per_atom(dr: &mut DVector<f64>, max_step: f64) {
    let longest = dr
        .as_slice()
        .chunks(3)
        .map(|c| (c[0] * c[0] + c[1] * c[1] + c[2] * c[2]).sqrt())
        .fold(0.0, f64::max);
    if longest > max_step {
        *dr *= max_step / longest;
    }
}

// --- L-BFGS ---

/// Limited-memory BFGS with a fixed initial inverse Hessian (no line search).
#[derive(Debug, Clone)]
pub struct Lbfgs {
    max_step: f64,
    memory: usize,
    damping: f64,
    h0: f64,
    s: VecDeque<DVector<f64>>,
    y: VecDeque<DVector<f64>>,
    rho: VecDeque<f64>,
    previous: Option<(DVector<f64>, DVector<f64>)>, // (r0, f0)
}

impl Lbfgs {
    pub fn new(max_step: f64) -> Self {
        Self {
            max_step,
            memory: 100,
            damping: 1.0,
            h0: 1.0 / 70.0,
            s: VecDeque::new(),
            y: VecDeque::new(),
            rho: VecDeque::new(),
            previous: None,
        }
    }

    pub fn damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    fn update(&mut self, r: &DVector<f64>, f: &DVector<f64>) {
        let Some((r0, f0)) = &self.previous else { return };
        let s0 = r - r0;
        let y0 = f0 - f;
        let curvature = y0.dot(&s0);
        // Non-positive curvature would poison the two-loop recursion.
        if curvature <= 1e-12 {
            return;
        }
        self.s.push_back(s0);
        self.y.push_back(y0);
        self.rho.push_back(1.0 / curvature);
        if self.s.len() > self.memory {
            self.s.pop_front();
            self.y.pop_front();
            self.rho.pop_front();
        }
    }
}

impl Optimizer for Lbfgs {
    fn step(&mut self, positions: &mut [Point3<f64>], forces: &[Vector3<f64>], _energy: f64) {
        let r = flatten_points(positions);
        let f = flatten_vectors(forces);
        self.update(&r, &f);

        // Two-loop recursion
        let k = self.s.len();
        let mut alpha = vec![0.0; k];
        let mut q = -&f;
        for i in (0..k).rev() {
            alpha[i] = self.rho[i] * self.s[i].dot(&q);
            q -= &self.y[i] * alpha[i];
        }
        let mut z = q * self.h0;
        for i in 0..k {
            let beta = self.rho[i] * self.y[i].dot(&z);
            z += &self.s[i] * (alpha[i] - beta);
        }

        let mut dr = -z * self.damping;
        limit_per_atom(&mut dr, self.max_step);
        apply_displacement(positions, &dr);

        self.previous = Some((r, f));
    }

    fn name(&self) -> &'static str {
        "LBFGS"
    }
}

// --- BFGS ---

/// Dense quasi-Newton strategy; the step follows the eigenmodes of the
/// approximate Hessian so negative curvature never reverses the direction.
#[derive(Debug, Clone)]
pub struct Bfgs {
    max_step: f64,
    alpha: f64,
    hessian: Option<DMatrix<f64>>,
    previous: Option<(DVector<f64>, DVector<f64>)>,
}

impl Bfgs {
    pub fn new(max_step: f64) -> Self {
        Self {
            max_step,
            alpha: 70.0,
            hessian: None,
            previous: None,
        }
    }

    fn update(&mut self, r: &DVector<f64>, f: &DVector<f64>) {
        if self.hessian.is_none() {
            let n = r.len();
            self.hessian = Some(DMatrix::identity(n, n) * self.alpha);
            return;
        }
        let Some((r0, f0)) = &self.previous else { return };
        let Some(hessian) = self.hessian.as_mut() else { return };

        let dr = r - r0;
        if dr.amax() < 1e-7 {
            return;
        }
        let df = f - f0;
        let a = dr.dot(&df);
        let dg = &*hessian * &dr;
        let b = dr.dot(&dg);
        if a.abs() < 1e-12 || b.abs() < 1e-12 {
            return;
        }
        *hessian -= (&df * df.transpose()) / a + (&dg * dg.transpose()) / b;
    }
}

impl Optimizer for Bfgs {
    fn step(&mut self, positions: &mut [Point3<f64>], forces: &[Vector3<f64>], _energy: f64) {
        let r = flatten_points(positions);
        let f = flatten_vectors(forces);
        self.update(&r, &f);

        let mut dr = match &self.hessian {
            Some(h) => {
                let eigen = SymmetricEigen::new(h.clone());
                let v = &eigen.eigenvectors;
                let mut projected = v.transpose() * &f;
                for (c, omega) in projected.iter_mut().zip(eigen.eigenvalues.iter()) {
                    *c /= omega.abs().max(1e-12);
                }
                v * projected
            }
            None => &f / self.alpha,
        };
        limit_per_atom(&mut dr, self.max_step);
        apply_displacement(positions, &dr);

        self.previous = Some((r, f));
    }

    fn name(&self) -> &'static str {
        "BFGS"
    }
}

// --- FIRE ---

/// Fast inertial relaxation: damped MD with adaptive time step.
#[derive(Debug, Clone)]
pub struct Fire {
    max_step: f64,
    dt: f64,
    dt_max: f64,
    n_min: usize,
    f_inc: f64,
    f_dec: f64,
    a_start: f64,
    f_a: f64,
    a: f64,
    n_positive: usize,
    velocity: Option<DVector<f64>>,
}

impl Fire {
    pub fn new(max_step: f64) -> Self {
        Self {
            max_step,
            dt: 0.1,
            dt_max: 1.0,
            n_min: 5,
            f_inc: 1.1,
            f_dec: 0.5,
            a_start: 0.1,
            f_a: 0.99,
            a: 0.1,
            n_positive: 0,
            velocity: None,
        }
    }
}

impl Optimizer for Fire {
    fn step(&mut self, positions: &mut [Point3<f64>], forces: &[Vector3<f64>], _energy: f64) {
        let f = flatten_vectors(forces);
        let mut v = match self.velocity.take() {
            None => DVector::zeros(f.len()),
            Some(mut v) => {
                let vf = v.dot(&f);
                if vf > 0.0 {
                    let f_norm = f.norm();
                    if f_norm > 0.0 {
                        v = &v * (1.0 - self.a) + &f * (self.a * v.norm() / f_norm);
                    }
                    if self.n_positive > self.n_min {
                        self.dt = (self.dt * self.f_inc).min(self.dt_max);
                        self.a *= self.f_a;
                    }
                    self.n_positive += 1;
                } else {
                    v.fill(0.0);
                    self.a = self.a_start;
                    self.dt *= self.f_dec;
                    self.n_positive = 0;
                }
                v
            }
        };

        v += &f * self.dt;
        let mut dr = &v * self.dt;
        let norm = dr.norm();
        if norm > self.max_step {
            dr *= self.max_step / norm;
        }
        apply_displacement(positions, &dr);
        self.velocity = Some(v);
    }

    fn name(&self) -> &'static str {
        "FIRE"
    }
}
