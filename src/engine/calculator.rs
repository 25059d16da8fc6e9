use nalgebra::Vector3;

use crate::core::domain::{Geometry, StructureRecord};
use crate::core::error::CalculationFault;

/// Energy and per-atom forces for one geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// The potential energy (eV).
    pub energy: f64,
    /// Forces (eV/Å), one per atom, in input order.
    pub forces: Vec<Vector3<f64>>,
}

/// A generic interface for energy/force evaluators (MLIPs, dispersion terms, ...).
///
/// Calls never overlap: one evaluation finishes before the next starts, so
/// implementations may hold non-reentrant native state.
pub trait Calculator: Send {
    fn evaluate(&self, geometry: &Geometry) -> Result<Evaluation, CalculationFault>;

    /// Returns the name of the engine (e.g., "MACE-MP-0").
    fn name(&self) -> &str;
}

/// The structures a direct predictor sees: the adsorbed system and, when it
/// exists, the clean slab it was built on.
#[derive(Debug, Clone, Copy)]
pub struct StructurePair<'a> {
    pub structure: &'a StructureRecord,
    pub clean_slab: Option<&'a StructureRecord>,
}

/// A model that predicts the target energy directly, without relaxation.
pub trait DirectPredictor: Send {
    fn predict(&self, pair: StructurePair<'_>) -> Result<f64, CalculationFault>;

    fn name(&self) -> &str;
}

/// Uniform contract over every concrete calculator. Validates what the
/// wrapped model returns, so the rest of the engine only sees finite numbers.
pub enum CalculatorAdapter {
    Relaxing(Box<dyn Calculator>),
    Direct(Box<dyn DirectPredictor>),
}

impl CalculatorAdapter {
    pub fn relaxing(calculator: impl Calculator + 'static) -> Self {
        CalculatorAdapter::Relaxing(Box::new(calculator))
    }

    pub fn direct(predictor: impl DirectPredictor + 'static) -> Self {
        CalculatorAdapter::Direct(Box::new(predictor))
    }

    pub fn name(&self) -> &str {
        match self {
            CalculatorAdapter::Relaxing(c) => c.name(),
            CalculatorAdapter::Direct(p) => p.name(),
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, CalculatorAdapter::Direct(_))
    }

    pub fn evaluate(&self, geometry: &Geometry) -> Result<Evaluation, CalculationFault> {
        match self {
            CalculatorAdapter::Relaxing(c) => {
                let evaluation = c.evaluate(geometry)?;
                check_evaluation(evaluation, geometry.len())
            }
            CalculatorAdapter::Direct(p) => Err(CalculationFault::Unsupported(format!(
                "{} only predicts energies directly",
                p.name()
            ))),
        }
    }

    pub fn predict(&self, pair: StructurePair<'_>) -> Result<f64, CalculationFault> {
        match self {
            CalculatorAdapter::Direct(p) => {
                let energy = p.predict(pair)?;
                if energy.is_finite() {
                    Ok(energy)
                } else {
                    Err(CalculationFault::NonFiniteEnergy(energy))
                }
            }
            CalculatorAdapter::Relaxing(c) => Err(CalculationFault::Unsupported(format!(
                "{} does not predict energies directly",
                c.name()
            ))),
        }
    }
}

/// Rejects NaN/Inf energies or forces and force arrays of the wrong length.
pub fn check_evaluation(
    evaluation: Evaluation,
    n_atoms: usize,
) -> Result<Evaluation, CalculationFault> {
    if !evaluation.energy.is_finite() {
        return Err(CalculationFault::NonFiniteEnergy(evaluation.energy));
    }
    if evaluation.forces.len() != n_atoms {
        return Err(CalculationFault::ForceCount {
            expected: n_atoms,
            got: evaluation.forces.len(),
        });
    }
    if let Some(atom) = evaluation
        .forces
        .iter()
        .position(|f| f.iter().any(|c| !c.is_finite()))
    {
        return Err(CalculationFault::NonFiniteForce { atom });
    }
    Ok(evaluation)
}

/// Adds a correction term (e.g. dispersion) on top of a base calculator.
pub struct Corrected<B, C> {
    base: B,
    correction: C,
    name: String,
}

impl<B: Calculator, C: Calculator> Corrected<B, C> {
    pub fn new(base: B, correction: C) -> Self {
        let name = format!("{}+{}", base.name(), correction.name());
        Self { base, correction, name }
    }
}

impl<B: Calculator, C: Calculator> Calculator for Corrected<B, C> {
    fn evaluate(&self, geometry: &Geometry) -> Result<Evaluation, CalculationFault> {
        let base = check_evaluation(self.base.evaluate(geometry)?, geometry.len())?;
        let extra = check_evaluation(self.correction.evaluate(geometry)?, geometry.len())?;

        let forces = base
            .forces
            .iter()
            .zip(extra.forces.iter())
            .map(|(a, b)| a + b)
            .collect();

        Ok(Evaluation {
            energy: base.energy + extra.energy,
            forces,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
