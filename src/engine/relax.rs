use std::time::Instant;

use log::{debug, warn};

use crate::core::config::{BenchConfig, OptimizerKind};
use crate::core::domain::{Geometry, RelaxOutcome, RunResult, StructureId, TraceEntry, TraceSummary};
use crate::core::error::CalculationFault;
use crate::core::spatial;
use crate::engine::calculator::{CalculatorAdapter, Evaluation};
use crate::engine::optimizers;
use crate::engine::trajectory::TrajectorySink;

/// Convergence criteria and optimizer choice for one relaxation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelaxSettings {
    pub f_crit: f64,
    pub n_crit: usize,
    pub optimizer: OptimizerKind,
    pub max_step: f64,
    pub damping: f64,
}

impl Default for RelaxSettings {
    fn default() -> Self {
        Self {
            f_crit: 0.05,
            n_crit: 999,
            optimizer: OptimizerKind::Lbfgs,
            max_step: 0.2,
            damping: 1.0,
        }
    }
}

impl From<&BenchConfig> for RelaxSettings {
    fn from(config: &BenchConfig) -> Self {
        Self {
            f_crit: config.f_crit_relax,
            n_crit: config.n_crit_relax,
            optimizer: config.optimizer,
            max_step: config.max_step,
            damping: config.damping,
        }
    }
}

impl RelaxSettings {
    /// Settings for gas-phase references, which stop after `gas_n_crit` steps.
    pub fn gas(config: &BenchConfig) -> Self {
        Self {
            n_crit: config.gas_n_crit,
            ..Self::from(config)
        }
    }
}

/// Drives one geometry optimization to convergence or to the step limit.
///
/// The runner only orchestrates: one calculator call per step, one optimizer
/// step, one trajectory entry. The numerics live in the optimizer.
#[derive(Debug, Clone, Copy)]
pub struct RelaxationRunner {
    settings: RelaxSettings,
}

impl RelaxationRunner {
    pub fn new(settings: RelaxSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RelaxSettings {
        &self.settings
    }

    /// Relaxes `geometry` with `calculator`. A calculation fault aborts the
    /// run and is reported in the result, never as an error.
    pub fn run(
        &self,
        calculator: &CalculatorAdapter,
        mut geometry: Geometry,
        id: &StructureId,
        run_index: usize,
        sink: &mut dyn TrajectorySink,
    ) -> RunResult {
        let start = Instant::now();
        let settings = &self.settings;
        let mut optimizer = optimizers::build(settings.optimizer, settings.max_step, settings.damping);
        let mut trace = TraceSummary::default();
        let mut last_energy = None;
        let mut steps = 0;
        let mut sink_ok = begin_sink(sink, id, run_index);

        let outcome = loop {
            let evaluation = match calculator.evaluate(&geometry) {
                Ok(e) => e,
                Err(fault) => {
                    warn!("{} run {}: fault at step {}: {}", id, run_index, steps, fault);
                    if sink_ok {
                        let _ = sink.end();
                    }
                    return RunResult {
                        run_index,
                        outcome: RelaxOutcome::Faulted,
                        final_energy: last_energy,
                        final_positions: geometry.positions,
                        steps,
                        duration_secs: start.elapsed().as_secs_f64(),
                        trace,
                        fault: Some(fault.to_string()),
                    };
                }
            };

            let forces = constrained_forces(&evaluation, &geometry.fixed);
            let fmax = spatial::max_force(&forces, &geometry.fixed);

            if steps == 0 {
                trace.initial_energy = Some(evaluation.energy);
                trace.initial_fmax = Some(fmax);
            }
            trace.final_fmax = Some(fmax);
            last_energy = Some(evaluation.energy);

            if sink_ok {
                let entry = TraceEntry { step: steps, energy: evaluation.energy, fmax };
                if let Err(e) = sink.frame(&entry, &geometry, &evaluation) {
                    warn!("{} run {}: trajectory output disabled: {}", id, run_index, e);
                    sink_ok = false;
                }
            }

            if fmax < self.settings.f_crit {
                break RelaxOutcome::Converged;
            }
            if steps >= self.settings.n_crit {
                break RelaxOutcome::StepLimitReached;
            }

            let anchored: Vec<_> = geometry
                .fixed
                .iter()
                .enumerate()
                .filter(|(_, f)| **f)
                .map(|(i, _)| (i, geometry.positions[i]))
                .collect();

            optimizer.step(&mut geometry.positions, &forces, evaluation.energy);

            for (i, p) in anchored {
                geometry.positions[i] = p;
            }
            steps += 1;
        };

        if sink_ok {
            if let Err(e) = sink.end() {
                warn!("{} run {}: failed to close trajectory: {}", id, run_index, e);
            }
        }

        debug!(
            "{} run {}: {:?} after {} {} steps, E = {:?}",
            id, run_index, outcome, steps, optimizer.name(), last_energy
        );

        RunResult {
            run_index,
            outcome,
            final_energy: last_energy,
            final_positions: geometry.positions,
            steps,
            duration_secs: start.elapsed().as_secs_f64(),
            trace,
            fault: None,
        }
    }
}

/// Wraps a fault raised outside the step loop (e.g. geometry preparation).
pub fn faulted_run(run_index: usize, fault: &CalculationFault, duration_secs: f64) -> RunResult {
    RunResult {
        run_index,
        outcome: RelaxOutcome::Faulted,
        final_energy: None,
        final_positions: Vec::new(),
        steps: 0,
        duration_secs,
        trace: TraceSummary::default(),
        fault: Some(fault.to_string()),
    }
}

fn begin_sink(sink: &mut dyn TrajectorySink, id: &StructureId, run_index: usize) -> bool {
    match sink.begin(id, run_index) {
        Ok(()) => true,
        Err(e) => {
            warn!("{} run {}: trajectory output disabled: {}", id, run_index, e);
            false
        }
    }
}

fn constrained_forces(evaluation: &Evaluation, fixed: &[bool]) -> Vec<nalgebra::Vector3<f64>> {
    evaluation
        .forces
        .iter()
        .enumerate()
        .map(|(i, f)| {
            if fixed.get(i).copied().unwrap_or(false) {
                nalgebra::Vector3::zeros()
            } else {
                *f
            }
        })
        .collect()
}
