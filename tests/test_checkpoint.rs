mod common;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::unbounded;
use nalgebra::Vector3;

use catbench::bench::runner::Benchmark;
use catbench::bench::BenchEvent;
use catbench::core::config::{BenchConfig, CalculationMode};
use catbench::core::dataset::{Dataset, Reaction, ReactionTerm};
use catbench::core::domain::{AnomalyCategory, AnomalyVerdict, Geometry};
use catbench::core::error::{BenchError, CalculationFault};
use catbench::engine::calculator::{Calculator, CalculatorAdapter, Evaluation};
use catbench::store::checkpoint::{CheckpointStore, LoadOutcome};
use catbench::store::output::{self, AnomalyReport};
use catbench::store::{BenchmarkState, StorePhase};

use common::*;

/// Raises the stop flag on its `after`-th evaluation.
struct Tripwire<C> {
    inner: C,
    after: usize,
    calls: AtomicUsize,
    stop: Arc<AtomicBool>,
}

impl<C: Calculator> Calculator for Tripwire<C> {
    fn evaluate(&self, geometry: &Geometry) -> Result<Evaluation, CalculationFault> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.stop.store(true, Ordering::SeqCst);
        }
        self.inner.evaluate(geometry)
    }

    fn name(&self) -> &str {
        "tripwire"
    }
}

fn dataset() -> Dataset {
    let mut dataset = Dataset::from_records(
        "unit",
        vec![
            slab_record("Pt111", None, -40.0),
            slab_record("Pt111", Some("O"), -45.0),
            slab_record("Cu100", None, -30.0),
            gas_record("O2", "O", "O", 1.3, -9.8),
        ],
    )
    .unwrap();
    dataset.reactions.insert(
        "O_ads_Pt".into(),
        Reaction {
            reference_energy: -0.1,
            terms: vec![
                ReactionTerm { structure: "Pt111__O__0".into(), coeff: 1.0 },
                ReactionTerm { structure: "Pt111__star__0".into(), coeff: -1.0 },
                ReactionTerm { structure: "O2__star__0".into(), coeff: -0.5 },
            ],
        },
    );
    dataset
}

/// Per-size energies: 8-atom slabs, 9-atom adsorbate, 2-atom gas.
fn energies(offset: f64) -> EnergyBySize {
    EnergyBySize(vec![(8, -40.0 + offset), (9, -45.2 + offset), (2, -9.9 + offset)])
}

fn calculators() -> Vec<CalculatorAdapter> {
    vec![
        CalculatorAdapter::relaxing(energies(0.0)),
        CalculatorAdapter::relaxing(energies(0.01)),
        CalculatorAdapter::relaxing(energies(-0.02)),
    ]
}

fn config(dir: &Path) -> BenchConfig {
    let mut c = test_config(dir.to_path_buf());
    c.save_step = 1;
    c
}

fn read_state(config: &BenchConfig) -> BenchmarkState {
    let path = output::result_path(&config.output_dir(), &config.mlip_name);
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

/// Drops wall-clock fields so two runs can be compared.
fn without_timing(entries: &BTreeMap<String, AnomalyVerdict>) -> BTreeMap<String, AnomalyVerdict> {
    let mut entries = entries.clone();
    for v in entries.values_mut() {
        for run in &mut v.record.runs {
            run.duration_secs = 0.0;
        }
    }
    entries
}

fn run_to_end(config: &BenchConfig, calculators: Vec<CalculatorAdapter>) -> catbench::bench::RunSummary {
    let (tx, _rx) = unbounded();
    let stop = AtomicBool::new(false);
    Benchmark::new(config.clone(), calculators)
        .unwrap()
        .run(&dataset(), &tx, &stop)
        .unwrap()
}

#[test]
fn test_full_run_writes_outputs() {
    let dir = temp_dir();
    let config = config(&dir);
    let (tx, rx) = unbounded();
    let stop = AtomicBool::new(false);

    let summary = Benchmark::new(config.clone(), calculators())
        .unwrap()
        .run(&dataset(), &tx, &stop)
        .unwrap();
    drop(tx);

    assert_eq!(summary.total, 4);
    assert_eq!(summary.computed, 4);
    assert!(!summary.stopped);
    assert_eq!(summary.counts.total(), 4);

    let events: Vec<BenchEvent> = rx.try_iter().collect();
    assert!(matches!(events[0], BenchEvent::Started { total: 4, resumed: 0 }));
    assert_eq!(events.iter().filter(|e| matches!(e, BenchEvent::StructureDone(_))).count(), 4);
    assert!(matches!(events.last(), Some(BenchEvent::Finished(_))));

    let state = read_state(&config);
    assert!(state.finalized);
    assert_eq!(state.processed.len(), 4);
    assert_eq!(state.mlip_name, "mock");

    // Adsorbate: |-45.22 - -45.0| < 2, spread 0.03 < 0.2
    let ads = &state.entries["Pt111__O__0"];
    assert_eq!(ads.category, Some(AnomalyCategory::Normal));
    assert!((ads.record.spread - 0.03).abs() < 1e-9);
    assert_eq!(ads.record.representative_run, Some(2));

    let reaction = &state.reactions["O_ads_Pt"];
    assert!(reaction.is_complete());
    // run 0: -45.2 + 40.0 + 4.95
    assert!((reaction.run_energies[0].unwrap() + 0.25).abs() < 1e-9);

    let out = config.output_dir();
    let report: AnomalyReport = serde_json::from_str(
        &fs::read_to_string(output::anomaly_path(&out, "mock")).unwrap(),
    )
    .unwrap();
    assert_eq!(report.normal.len() + report.anomaly.len(), 4);
    assert_eq!(report.categories.len(), 4);
    assert!(report.fully_faulted.is_empty());

    let gases: BTreeMap<String, f64> =
        serde_json::from_str(&fs::read_to_string(output::gases_path(&out, "mock")).unwrap()).unwrap();
    assert_eq!(gases.len(), 3);
    assert!((gases["O2__star__0_1th"] + 9.89).abs() < 1e-9);

    let leftovers = fs::read_dir(&out)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_resume_matches_uninterrupted_run() {
    let dir_a = temp_dir();
    let config_a = config(&dir_a);
    run_to_end(&config_a, calculators());
    let uninterrupted = read_state(&config_a);

    let dir_b = temp_dir();
    let config_b = config(&dir_b);
    let stop = Arc::new(AtomicBool::new(false));
    let mut first = calculators();
    first[0] = CalculatorAdapter::relaxing(Tripwire {
        inner: energies(0.0),
        after: 2,
        calls: AtomicUsize::new(0),
        stop: stop.clone(),
    });

    let (tx, _rx) = unbounded();
    let partial = Benchmark::new(config_b.clone(), first)
        .unwrap()
        .run(&dataset(), &tx, &stop)
        .unwrap();
    assert!(partial.stopped);
    assert_eq!(partial.computed, 2);

    let checkpoint = read_state(&config_b);
    assert!(!checkpoint.finalized);
    assert_eq!(checkpoint.processed.len(), 2);
    assert!(!output::anomaly_path(&config_b.output_dir(), "mock").exists());

    let (tx, rx) = unbounded();
    let resumed = Benchmark::new(config_b.clone(), calculators())
        .unwrap()
        .run(&dataset(), &tx, &AtomicBool::new(false))
        .unwrap();
    drop(tx);
    assert_eq!(resumed.skipped, 2);
    assert_eq!(resumed.computed, 2);
    assert_eq!(resumed.counts.total(), 4);
    assert!(rx
        .try_iter()
        .any(|e| matches!(e, BenchEvent::Started { resumed: 2, .. })));

    let finished = read_state(&config_b);
    assert!(finished.finalized);
    assert_eq!(without_timing(&finished.entries), without_timing(&uninterrupted.entries));
    assert_eq!(finished.reactions, uninterrupted.reactions);

    let _ = fs::remove_dir_all(&dir_a);
    let _ = fs::remove_dir_all(&dir_b);
}

#[test]
fn test_rerun_of_finished_benchmark_skips_everything() {
    let dir = temp_dir();
    let config = config(&dir);
    run_to_end(&config, calculators());
    let before = read_state(&config);

    let again = run_to_end(&config, calculators());
    assert_eq!(again.computed, 0);
    assert_eq!(again.skipped, 4);

    let after = read_state(&config);
    assert_eq!(after.entries, before.entries);
    assert_eq!(after.processed, before.processed);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_corrupt_checkpoint_is_preserved_and_run_restarts() {
    let dir = temp_dir();
    let config = config(&dir);
    let out = config.output_dir();
    fs::create_dir_all(&out).unwrap();
    let path = output::result_path(&out, "mock");
    fs::write(&path, "{ not json").unwrap();

    let store = CheckpointStore::open(&config).unwrap();
    assert!(matches!(store.load_outcome(), LoadOutcome::Corrupt { .. }));
    assert_eq!(store.phase(), StorePhase::Running);
    assert!(store.processed().is_empty());
    let preserved = Path::new(&format!("{}.corrupt", path.display())).to_path_buf();
    assert_eq!(fs::read_to_string(&preserved).unwrap(), "{ not json");
    drop(store);

    // A second corrupt file must not overwrite the first one.
    fs::write(&path, "[]").unwrap();
    let summary = run_to_end(&config, calculators());
    assert_eq!(summary.computed, 4);
    assert_eq!(fs::read_to_string(&preserved).unwrap(), "{ not json");
    let corrupt_files = fs::read_dir(&out)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".corrupt"))
        .count();
    assert_eq!(corrupt_files, 2);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_checkpoint_of_other_benchmark_is_not_resumed() {
    let dir = temp_dir();
    let mut other = config(&dir);
    other.benchmark = "other".into();
    run_to_end(&other, calculators());

    let config = config(&dir);
    let store = CheckpointStore::open(&config).unwrap();
    match store.load_outcome() {
        LoadOutcome::Corrupt { reason, .. } => assert!(reason.contains("other")),
        outcome => panic!("unexpected outcome {:?}", outcome),
    }
    assert!(store.processed().is_empty());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_store_flushes_every_save_step() {
    let dir = temp_dir();
    let mut config = config(&dir);
    config.save_step = 2;
    let t = config.thresholds();

    let mut store = CheckpointStore::open(&config).unwrap();
    assert_eq!(store.load_outcome(), &LoadOutcome::Fresh);

    let data = dataset();
    let verdicts: Vec<(String, AnomalyVerdict)> = data
        .structures
        .iter()
        .map(|(k, r)| {
            let runs = Vec::new();
            let reduced = catbench::bench::aggregate::reduce_runs(r, runs, CalculationMode::Relaxation, 6.0);
            (k.clone(), catbench::analysis::anomaly::verdict(reduced, &t))
        })
        .collect();

    assert!(!store.record(&verdicts[0].0, verdicts[0].1.clone()).unwrap());
    assert!(!store.path().exists());
    assert!(store.record(&verdicts[1].0, verdicts[1].1.clone()).unwrap());
    assert!(store.path().exists());

    assert!(matches!(
        store.record(&verdicts[1].0, verdicts[1].1.clone()),
        Err(BenchError::DuplicateRecord(_))
    ));

    let results = store.finalize(&BTreeMap::new()).unwrap();
    assert_eq!(results.entries.len(), 2);
    assert!(results.entries.values().all(|e| e.anomaly_category.is_none()));
    assert_eq!(store.phase(), StorePhase::Finalized);
    assert!(matches!(
        store.record(&verdicts[2].0, verdicts[2].1.clone()),
        Err(BenchError::InvalidPhase { .. })
    ));

    // Fully faulted records are reported, never dropped.
    let report: AnomalyReport = serde_json::from_str(
        &fs::read_to_string(output::anomaly_path(&config.output_dir(), "mock")).unwrap(),
    )
    .unwrap();
    assert_eq!(report.fully_faulted.len(), 2);
    assert!(!output::gases_path(&config.output_dir(), "mock").exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_fully_faulted_structure_does_not_stop_benchmark() {
    let dir = temp_dir();
    let config = config(&dir);
    // No scripted energy for the 2-atom gas: every run of it faults.
    let calcs = (0..3)
        .map(|_| CalculatorAdapter::relaxing(EnergyBySize(vec![(8, -40.0), (9, -45.2)])))
        .collect();
    let summary = run_to_end(&config, calcs);

    assert_eq!(summary.computed, 4);
    assert_eq!(summary.counts.fully_faulted, 1);
    let state = read_state(&config);
    assert_eq!(state.entries["O2__star__0"].category, None);
    assert!(!state.reactions["O_ads_Pt"].is_complete());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_benchmark_rejects_bad_setup() {
    let dir = temp_dir();
    let config = config(&dir);
    assert!(matches!(
        Benchmark::new(config.clone(), Vec::new()),
        Err(BenchError::Configuration(_))
    ));

    let mut direct = config.clone();
    direct.mode = CalculationMode::Direct;
    assert!(matches!(
        Benchmark::new(direct, calculators()),
        Err(BenchError::Configuration(_))
    ));

    let mut unnamed = config;
    unnamed.mlip_name.clear();
    assert!(Benchmark::new(unnamed, calculators()).is_err());
}

#[test]
fn test_stop_before_first_structure() {
    let dir = temp_dir();
    let config = config(&dir);
    let (tx, _rx) = unbounded();
    let summary = Benchmark::new(config.clone(), calculators())
        .unwrap()
        .run(&dataset(), &tx, &AtomicBool::new(true))
        .unwrap();
    assert!(summary.stopped);
    assert_eq!(summary.computed, 0);
    assert!(read_state(&config).processed.is_empty());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_trajectory_files_written_on_request() {
    let dir = temp_dir();
    let mut config = config(&dir);
    config.save_trajectory = true;
    let targets_shift = Vector3::new(0.0, 0.0, 0.02);
    let data = Dataset::from_records("unit", vec![slab_record("Pt111", None, -1.0)]).unwrap();
    let record = &data.structures["Pt111__star__0"];
    let calcs = vec![CalculatorAdapter::relaxing(HarmonicWell::new(
        shifted(&record.positions, targets_shift),
        -1.0,
    ))];

    let (tx, _rx) = unbounded();
    Benchmark::new(config.clone(), calcs)
        .unwrap()
        .run(&data, &tx, &AtomicBool::new(false))
        .unwrap();

    let out = config.output_dir();
    assert!(out.join("traj").join("Pt111__star__0_0.extxyz").exists());
    assert!(out.join("log").join("Pt111__star__0_0.csv").exists());

    let _ = fs::remove_dir_all(&dir);
}
