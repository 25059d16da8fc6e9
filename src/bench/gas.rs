use std::time::Instant;

use log::warn;
use nalgebra::Vector3;

use crate::core::chemistry;
use crate::core::domain::{Geometry, Lattice, RunResult, StructureRecord};
use crate::core::error::CalculationFault;
use crate::core::spatial;
use crate::engine::calculator::CalculatorAdapter;
use crate::engine::relax::{self, RelaxationRunner};
use crate::engine::trajectory::TrajectorySink;

/// Amount the gas cell edge shrinks after a faulted attempt (Å).
pub const CELL_SHRINK: f64 = 0.5;

/// Places a molecule at the center of a cubic cell of edge `edge`.
///
/// Without an explicit mask, the first atom of the heaviest element is fixed
/// to remove the free translation. Returns the geometry and the translation
/// applied to the input positions.
pub fn gas_geometry(record: &StructureRecord, edge: f64) -> Option<(Geometry, Vector3<f64>)> {
    let lattice = Lattice::cubic(edge)?;
    let fixed = match &record.fixed {
        Some(mask) => mask.clone(),
        None => {
            let mut mask = vec![false; record.len()];
            if let Some(i) = chemistry::heaviest_atom(&record.species) {
                mask[i] = true;
            }
            mask
        }
    };

    let mut geometry = record.geometry(fixed);
    geometry.lattice = Some(lattice);
    spatial::center_in_cell(&mut geometry);

    let shift = match (geometry.positions.first(), record.positions.first()) {
        (Some(a), Some(b)) => a - b,
        _ => Vector3::zeros(),
    };
    Some((geometry, shift))
}

/// Relaxes a gas-phase reference. A fault is retried in a cell smaller by
/// [`CELL_SHRINK`] until the edge would reach zero.
///
/// Final positions are translated back into the frame of the input record.
pub fn relax_gas(
    runner: &RelaxationRunner,
    calculator: &CalculatorAdapter,
    record: &StructureRecord,
    gas_distance: f64,
    run_index: usize,
    sink: &mut dyn TrajectorySink,
) -> RunResult {
    let start = Instant::now();
    let mut edge = gas_distance;

    loop {
        let Some((geometry, shift)) = gas_geometry(record, edge) else {
            let fault = CalculationFault::Raised(format!("invalid gas cell edge {}", edge));
            return relax::faulted_run(run_index, &fault, start.elapsed().as_secs_f64());
        };

        let mut result = runner.run(calculator, geometry, &record.id, run_index, sink);
        for p in &mut result.final_positions {
            *p -= shift;
        }
        result.duration_secs = start.elapsed().as_secs_f64();

        if !result.raised_fault() {
            return result;
        }

        edge -= CELL_SHRINK;
        if edge <= 0.0 {
            return result;
        }
        warn!(
            "{} run {}: gas relaxation faulted, retrying with cell edge {:.1}",
            record.id, run_index, edge
        );
    }
}
