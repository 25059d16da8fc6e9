use std::time::Instant;

use crate::analysis::topology::BondGraph;
use crate::core::config::{BenchConfig, CalculationMode};
use crate::core::dataset::Dataset;
use crate::core::domain::{
    ReducedRecord, RelaxOutcome, RunResult, StructureKind, StructureRecord, TraceSummary,
};
use crate::core::spatial;
use crate::engine::calculator::{CalculatorAdapter, StructurePair};
use crate::engine::relax::{self, RelaxationRunner, RelaxSettings};
use crate::engine::trajectory::TrajectorySink;
use crate::bench::gas;

/// Runs every calculator instance once on a structure and reduces the runs.
///
/// Runs execute one after another: calculators may hold non-reentrant
/// native state (GPU contexts), and sequential runs keep results deterministic.
pub struct ReproducibilityAggregator<'a> {
    config: &'a BenchConfig,
    runner: RelaxationRunner,
    gas_runner: RelaxationRunner,
}

impl<'a> ReproducibilityAggregator<'a> {
    pub fn new(config: &'a BenchConfig) -> Self {
        Self {
            config,
            runner: RelaxationRunner::new(RelaxSettings::from(config)),
            gas_runner: RelaxationRunner::new(RelaxSettings::gas(config)),
        }
    }

    pub fn aggregate(
        &self,
        dataset: &Dataset,
        record: &StructureRecord,
        calculators: &[CalculatorAdapter],
        sink: &mut dyn TrajectorySink,
    ) -> ReducedRecord {
        let runs = calculators
            .iter()
            .enumerate()
            .map(|(i, calc)| match self.config.mode {
                CalculationMode::Relaxation => self.relax_once(dataset, record, calc, i, sink),
                CalculationMode::Direct => predict_once(dataset, record, calc, i),
            })
            .collect();

        reduce_runs(record, runs, self.config.mode, self.config.chemical_bond_cutoff)
    }

    fn relax_once(
        &self,
        dataset: &Dataset,
        record: &StructureRecord,
        calculator: &CalculatorAdapter,
        run_index: usize,
        sink: &mut dyn TrajectorySink,
    ) -> RunResult {
        if record.structure_kind() == StructureKind::Gas {
            return gas::relax_gas(
                &self.gas_runner,
                calculator,
                record,
                self.config.gas_distance,
                run_index,
                sink,
            );
        }
        let reference = clean_slab_of(dataset, record);
        let fixed = spatial::constraint_mask(record, reference, self.config.rate);
        self.runner.run(calculator, record.geometry(fixed), &record.id, run_index, sink)
    }
}

/// The clean slab paired with an adsorbate record, when the dataset has it.
fn clean_slab_of<'d>(
    dataset: &'d Dataset,
    record: &StructureRecord,
) -> Option<&'d StructureRecord> {
    match record.structure_kind() {
        StructureKind::Adsorbate => dataset.get(&record.id.clean_slab()),
        _ => None,
    }
}

fn predict_once(
    dataset: &Dataset,
    record: &StructureRecord,
    calculator: &CalculatorAdapter,
    run_index: usize,
) -> RunResult {
    let start = Instant::now();
    let pair = StructurePair { structure: record, clean_slab: clean_slab_of(dataset, record) };

    match calculator.predict(pair) {
        Ok(energy) => RunResult {
            run_index,
            outcome: RelaxOutcome::Predicted,
            final_energy: Some(energy),
            final_positions: Vec::new(),
            steps: 0,
            duration_secs: start.elapsed().as_secs_f64(),
            trace: TraceSummary::default(),
            fault: None,
        },
        Err(fault) => {
            log::warn!("{} run {}: prediction faulted: {}", record.id, run_index, fault);
            relax::faulted_run(run_index, &fault, start.elapsed().as_secs_f64())
        }
    }
}

/// Reduces N runs of one structure to a single record.
///
/// Faulted runs are kept for provenance but excluded from every statistic.
/// The representative is the lowest-energy converged run, falling back to
/// the lowest-energy run overall when none converged.
pub fn reduce_runs(
    record: &StructureRecord,
    runs: Vec<RunResult>,
    mode: CalculationMode,
    bond_cutoff: f64,
) -> ReducedRecord {
    let valid: Vec<(&RunResult, f64)> = runs
        .iter()
        .filter(|r| !r.raised_fault())
        .filter_map(|r| r.final_energy.map(|e| (r, e)))
        .collect();

    let converged = lowest(valid.iter().filter(|(r, _)| r.converged()));
    let (representative, representative_converged) = match converged {
        Some(rep) => (Some(rep), true),
        None => (lowest(valid.iter()), false),
    };

    let spread = match (
        valid.iter().map(|(_, e)| *e).reduce(f64::max),
        valid.iter().map(|(_, e)| *e).reduce(f64::min),
    ) {
        (Some(max), Some(min)) => max - min,
        _ => 0.0,
    };

    let geometric = match (mode, representative) {
        (CalculationMode::Relaxation, Some((rep, _))) if rep.final_positions.len() == record.len() => {
            let displacement = spatial::max_displacement(&record.positions, &rep.final_positions);
            let graph = BondGraph::new(&record.positions, record.cell.as_ref(), bond_cutoff);
            Some((displacement, graph.max_relative_change(&rep.final_positions)))
        }
        _ => None,
    };

    ReducedRecord {
        id: record.id.clone(),
        kind: record.structure_kind(),
        mode,
        reference_energy: record.reference_energy,
        representative_energy: representative.map(|(_, e)| e),
        representative_run: representative.map(|(r, _)| r.run_index),
        representative_converged: representative.is_some() && representative_converged,
        spread,
        max_displacement: geometric.map(|(d, _)| d),
        max_bond_change: geometric.map(|(_, b)| b),
        fully_faulted: valid.is_empty(),
        runs,
    }
}

fn lowest<'r, 'v>(
    pool: impl Iterator<Item = &'v (&'r RunResult, f64)>,
) -> Option<(&'r RunResult, f64)>
where
    'r: 'v,
{
    pool.min_by(|a, b| a.1.total_cmp(&b.1)).copied()
}
