//! Runs a small benchmark end to end with an analytic pair potential.
//!
//! `cargo run --example harmonic_bench`

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use crossbeam_channel::unbounded;
use nalgebra::{Point3, Vector3};

use catbench::bench::runner::Benchmark;
use catbench::bench::BenchEvent;
use catbench::core::config::BenchConfig;
use catbench::core::dataset::{Dataset, Reaction, ReactionTerm};
use catbench::core::domain::{Geometry, Lattice, StructureId, StructureKind, StructureRecord};
use catbench::core::error::CalculationFault;
use catbench::engine::calculator::{Calculator, CalculatorAdapter, Evaluation};

/// Harmonic springs between every pair closer than `cutoff`, rest length `r0`.
struct PairSprings {
    k: f64,
    r0: f64,
    cutoff: f64,
    offset: f64,
}

impl Calculator for PairSprings {
    fn evaluate(&self, geometry: &Geometry) -> Result<Evaluation, CalculationFault> {
        let n = geometry.len();
        let mut energy = self.offset * n as f64;
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

fn slab(system: &str, adsorbate: Option<&str>) -> StructureRecord {
    let mut species = Vec::new();
    let mut positions = Vec::new();
    for ix in 0..3 {
        for iy in 0..3 {
            for iz in 0..2 {
                species.push("Pt".to_string());
                positions.push(Point3::new(ix as f64 * 2.1, iy as f64 * 2.1, iz as f64 * 2.0));
            }
        }
    }
    if adsorbate.is_some() {
        species.push("O".to_string());
        positions.push(Point3::new(2.1, 2.1, 4.3));
    }

    StructureRecord {
        id: StructureId::new(system, adsorbate, 0),
        kind: None,
        reference_energy: if adsorbate.is_some() { -0.42 } else { -0.40 },
        species,
        positions,
        cell: Lattice::new(
            Vector3::new(6.3, 0.0, 0.0),
            Vector3::new(0.0, 6.3, 0.0),
            Vector3::new(0.0, 0.0, 20.0),
        ),
        fixed: None,
    }
}

fn main() -> Result<()> {
    let o2 = StructureRecord {
        id: StructureId::new("O2", None, 0),
        kind: Some(StructureKind::Gas),
        species: vec!["O".into(), "O".into()],
        positions: vec![Point3::origin(), Point3::new(0.0, 0.0, 1.3)],
        cell: None,
        reference_energy: -0.06,
        fixed: None,
    };

    let mut dataset = Dataset::from_records(
        "demo",
        vec![slab("Pt111", None), slab("Pt111", Some("O")), o2],
    )?;
    dataset.reactions = BTreeMap::from([(
        "O_adsorption".to_string(),
        Reaction {
            reference_energy: -0.05,
            terms: vec![
                ReactionTerm { structure: "Pt111__O__0".into(), coeff: 1.0 },
                ReactionTerm { structure: "Pt111__star__0".into(), coeff: -1.0 },
                ReactionTerm { structure: "O2__star__0".into(), coeff: -0.5 },
            ],
        },
    )]);

    let mut config = BenchConfig::new("springs", "demo");
    config.result_dir = std::env::temp_dir().join("catbench-demo");
    config.save_step = 1;

    let calculators = (0..3)
        .map(|run| {
            CalculatorAdapter::relaxing(PairSprings {
                k: 1.0 + 0.01 * run as f64,
                r0: 2.0,
                cutoff: 2.6,
                offset: -0.01,
            })
        })
        .collect();
    let benchmark = Benchmark::new(config.clone(), calculators)?;

    let (tx, rx) = unbounded();
    let stop = AtomicBool::new(false);
    let summary = benchmark.run(&dataset, &tx, &stop)?;
    drop(tx);

    for event in rx.try_iter() {
        if let BenchEvent::StructureDone(line) = event {
            println!(
                "{:<20} {:<16} E = {:>9.4}  spread = {:.4}",
                line.key,
                line.category.map_or("faulted", |c| c.label()),
                line.representative_energy.unwrap_or(f64::NAN),
                line.spread
            );
        }
    }
    println!(
        "{} computed, {} skipped; results in {}",
        summary.computed,
        summary.skipped,
        config.output_dir().display()
    );
    Ok(())
}
