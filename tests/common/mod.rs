#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nalgebra::{Point3, Vector3};
use parking_lot::Mutex;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use catbench::core::config::BenchConfig;
use catbench::core::domain::{Geometry, Lattice, StructureId, StructureKind, StructureRecord};
use catbench::core::error::CalculationFault;
use catbench::engine::calculator::{Calculator, DirectPredictor, Evaluation, StructurePair};

// --- Calculators ---

/// `E = e0 + Σ k/2 |r_i - t_i|²`: every atom is pulled toward its target.
pub struct HarmonicWell {
    pub targets: Vec<Point3<f64>>,
    pub k: f64,
    pub e0: f64,
}

impl HarmonicWell {
    pub fn new(targets: Vec<Point3<f64>>, e0: f64) -> Self {
        Self { targets, k: 1.0, e0 }
    }
}

impl Calculator for HarmonicWell {
    fn evaluate(&self, geometry: &Geometry) -> Result<Evaluation, CalculationFault> {
        if geometry.len() != self.targets.len() {
            return Err(CalculationFault::Raised("atom count mismatch".into()));
        }
        let mut energy = self.e0;
        let mut forces = Vec::with_capacity(geometry.len());
        for (p, t) in geometry.positions.iter().zip(&self.targets) {
            let d = p - t;
            energy += 0.5 * self.k * d.norm_squared();
            forces.push(-self.k * d);
        }
        Ok(Evaluation { energy, forces })
    }

    fn name(&self) -> &str {
        "harmonic-well"
    }
}

/// Springs of rest length `r0` between every pair closer than `cutoff`.
/// Translation invariant, so it suits centered gas molecules.
pub struct PairSprings {
    pub k: f64,
    pub r0: f64,
    pub cutoff: f64,
    pub e0: f64,
}

impl Calculator for PairSprings {
    fn evaluate(&self, geometry: &Geometry) -> Result<Evaluation, CalculationFault> {
        let n = geometry.len();
        let mut energy = self.e0;
        let mut forces = vec![Vector3::zeros(); n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = geometry.positions[j] - geometry.positions[i];
                let r = d.norm();
                if r > self.cutoff || r < 1e-9 {
                    continue;
                }
                let stretch = r - self.r0;
                energy += 0.5 * self.k * stretch * stretch;
                let f = d * (self.k * stretch / r);
                forces[i] += f;
                forces[j] -= f;
            }
        }
        Ok(Evaluation { energy, forces })
    }

    fn name(&self) -> &str {
        "pair-springs"
    }
}

/// Constant energy, zero forces: converges on the first evaluation.
pub struct FixedEnergy(pub f64);

impl Calculator for FixedEnergy {
    fn evaluate(&self, geometry: &Geometry) -> Result<Evaluation, CalculationFault> {
        Ok(Evaluation {
            energy: self.0,
            forces: vec![Vector3::zeros(); geometry.len()],
        })
    }

    fn name(&self) -> &str {
        "fixed-energy"
    }
}

/// Energy depends on the structure: looked up by atom count.
pub struct EnergyBySize(pub Vec<(usize, f64)>);

impl Calculator for EnergyBySize {
    fn evaluate(&self, geometry: &Geometry) -> Result<Evaluation, CalculationFault> {
        let energy = self
            .0
            .iter()
            .find(|(n, _)| *n == geometry.len())
            .map(|(_, e)| *e)
            .ok_or_else(|| CalculationFault::Raised("no scripted energy".into()))?;
        Ok(Evaluation { energy, forces: vec![Vector3::zeros(); geometry.len()] })
    }

    fn name(&self) -> &str {
        "energy-by-size"
    }
}

/// Always faults.
pub struct Faulting;

impl Calculator for Faulting {
    fn evaluate(&self, _geometry: &Geometry) -> Result<Evaluation, CalculationFault> {
        Err(CalculationFault::Raised("model crashed".into()))
    }

    fn name(&self) -> &str {
        "faulting"
    }
}

/// Returns NaN energies.
pub struct NanEnergy;

impl Calculator for NanEnergy {
    fn evaluate(&self, geometry: &Geometry) -> Result<Evaluation, CalculationFault> {
        Ok(Evaluation { energy: f64::NAN, forces: vec![Vector3::zeros(); geometry.len()] })
    }

    fn name(&self) -> &str {
        "nan-energy"
    }
}

/// Delegates to `inner` for `ok_calls` evaluations, then faults.
pub struct FaultAfter<C> {
    pub inner: C,
    pub ok_calls: usize,
    pub calls: AtomicUsize,
}

impl<C: Calculator> FaultAfter<C> {
    pub fn new(inner: C, ok_calls: usize) -> Self {
        Self { inner, ok_calls, calls: AtomicUsize::new(0) }
    }
}

impl<C: Calculator> Calculator for FaultAfter<C> {
    fn evaluate(&self, geometry: &Geometry) -> Result<Evaluation, CalculationFault> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok_calls {
            return Err(CalculationFault::Raised("diverged".into()));
        }
        self.inner.evaluate(geometry)
    }

    fn name(&self) -> &str {
        "fault-after"
    }
}

/// Faults whenever the cell edge exceeds `max_edge`; records every edge seen.
pub struct SmallCellOnly<C> {
    pub inner: C,
    pub max_edge: f64,
    pub seen: Arc<Mutex<Vec<f64>>>,
}

impl<C: Calculator> Calculator for SmallCellOnly<C> {
    fn evaluate(&self, geometry: &Geometry) -> Result<Evaluation, CalculationFault> {
        let edge = geometry.lattice.as_ref().map_or(0.0, |l| l.vectors[(0, 0)]);
        self.seen.lock().push(edge);
        if edge > self.max_edge + 1e-9 {
            return Err(CalculationFault::Raised(format!("cell {} too large", edge)));
        }
        self.inner.evaluate(geometry)
    }

    fn name(&self) -> &str {
        "small-cell-only"
    }
}

/// Adds seeded uniform noise of amplitude `noise` to the energy.
pub struct Noisy<C> {
    pub inner: C,
    pub noise: f64,
    pub rng: Mutex<ChaCha8Rng>,
}

impl<C: Calculator> Noisy<C> {
    pub fn new(inner: C, noise: f64, seed: u64) -> Self {
        Self { inner, noise, rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)) }
    }
}

impl<C: Calculator> Calculator for Noisy<C> {
    fn evaluate(&self, geometry: &Geometry) -> Result<Evaluation, CalculationFault> {
        let mut eval = self.inner.evaluate(geometry)?;
        eval.energy += self.rng.lock().gen_range(-self.noise..=self.noise);
        Ok(eval)
    }

    fn name(&self) -> &str {
        "noisy"
    }
}

/// Direct predictor returning a fixed value; remembers whether a clean slab was supplied.
pub struct FixedPrediction {
    pub energy: f64,
    pub saw_clean_slab: Arc<Mutex<Vec<bool>>>,
}

impl FixedPrediction {
    pub fn new(energy: f64) -> Self {
        Self { energy, saw_clean_slab: Arc::new(Mutex::new(Vec::new())) }
    }
}

impl DirectPredictor for FixedPrediction {
    fn predict(&self, pair: StructurePair<'_>) -> Result<f64, CalculationFault> {
        self.saw_clean_slab.lock().push(pair.clean_slab.is_some());
        Ok(self.energy)
    }

    fn name(&self) -> &str {
        "fixed-prediction"
    }
}

pub struct FaultingPredictor;

impl DirectPredictor for FaultingPredictor {
    fn predict(&self, _pair: StructurePair<'_>) -> Result<f64, CalculationFault> {
        Err(CalculationFault::Raised("predictor crashed".into()))
    }

    fn name(&self) -> &str {
        "faulting-predictor"
    }
}

// --- Fixtures ---

pub fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("catbench-test-{}", Uuid::new_v4()))
}

pub fn test_config(result_dir: PathBuf) -> BenchConfig {
    let mut config = BenchConfig::new("mock", "unit");
    config.result_dir = result_dir;
    config
}

/// A 2x2x2 block of atoms 2 Å apart, optionally with one adsorbate atom on top.
pub fn slab_record(system: &str, adsorbate: Option<&str>, reference_energy: f64) -> StructureRecord {
    let mut species = Vec::new();
    let mut positions = Vec::new();
    for ix in 0..2 {
        for iy in 0..2 {
            for iz in 0..2 {
                species.push("Pt".to_string());
                positions.push(Point3::new(ix as f64 * 2.0, iy as f64 * 2.0, iz as f64 * 2.0));
            }
        }
    }
    if adsorbate.is_some() {
        species.push("O".to_string());
        positions.push(Point3::new(1.0, 1.0, 3.5));
    }
    StructureRecord {
        id: StructureId::new(system, adsorbate, 0),
        kind: None,
        species,
        positions,
        cell: Lattice::new(
            Vector3::new(4.0, 0.0, 0.0),
            Vector3::new(0.0, 4.0, 0.0),
            Vector3::new(0.0, 0.0, 20.0),
        ),
        reference_energy,
        fixed: None,
    }
}

/// A diatomic gas molecule with bond length `r`.
pub fn gas_record(name: &str, a: &str, b: &str, r: f64, reference_energy: f64) -> StructureRecord {
    StructureRecord {
        id: StructureId::new(name, None, 0),
        kind: Some(StructureKind::Gas),
        species: vec![a.to_string(), b.to_string()],
        positions: vec![Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, r)],
        cell: None,
        reference_energy,
        fixed: None,
    }
}

pub fn shifted(positions: &[Point3<f64>], shift: Vector3<f64>) -> Vec<Point3<f64>> {
    positions.iter().map(|p| p + shift).collect()
}
