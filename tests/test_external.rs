#![cfg(unix)]

mod common;

use std::fs;
use std::path::PathBuf;

use catbench::core::domain::RelaxOutcome;
use catbench::core::error::CalculationFault;
use catbench::engine::calculator::{CalculatorAdapter, StructurePair};
use catbench::engine::external::process::ExternalCalculator;
use catbench::engine::relax::{RelaxSettings, RelaxationRunner};
use catbench::engine::trajectory::NullSink;

use common::{slab_record, temp_dir};

// Zero forces everywhere; energy encodes the run index.
const WORKER: &str = r#"
while read cmd n rest; do
  read cell
  total=$n
  if [ "$cmd" = "predict" ]; then total=$((n + rest)); fi
  i=0
  while [ $i -lt $total ]; do read atom; i=$((i + 1)); done
  echo "energy = -1.5${CATBENCH_RUN_INDEX}"
  if [ "$cmd" = "evaluate" ]; then
    echo "forces"
    i=0
    while [ $i -lt $n ]; do echo "0.0 0.0 0.0"; i=$((i + 1)); done
  fi
  echo "end"
done
"#;

// Same answers as WORKER, and leaves a marker in $1 once stdin is closed.
const CLEAN_EXIT_WORKER: &str = r#"
while read cmd n rest; do
  read cell
  i=0
  while [ $i -lt $n ]; do read atom; i=$((i + 1)); done
  echo "energy = -1.0"
  echo "forces"
  i=0
  while [ $i -lt $n ]; do echo "0.0 0.0 0.0"; i=$((i + 1)); done
  echo "end"
done
echo clean > "$1"
"#;

const FAILING_WORKER: &str = r#"
while read line; do
  case "$line" in
    evaluate*|predict*) echo "error out of memory" ;;
  esac
done
"#;

fn script(body: &str) -> (PathBuf, String) {
    let dir = temp_dir();
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("worker.sh");
    fs::write(&path, body).unwrap();
    let arg = path.display().to_string();
    (dir, arg)
}

#[test]
fn test_external_worker_evaluates_and_persists() {
    let (dir, path) = script(WORKER);
    let calc = ExternalCalculator::new("sh", &[path], 2).unwrap();
    let adapter = CalculatorAdapter::relaxing(calc);
    let record = slab_record("Pt111", Some("O"), -1.0);
    let geometry = record.geometry(vec![false; record.len()]);

    let first = adapter.evaluate(&geometry).unwrap();
    assert!((first.energy + 1.52).abs() < 1e-12);
    assert_eq!(first.forces.len(), record.len());

    // Same worker process answers the next request.
    let second = adapter.evaluate(&geometry).unwrap();
    assert_eq!(first, second);

    let runner = RelaxationRunner::new(RelaxSettings::default());
    let result = runner.run(&adapter, geometry, &record.id, 2, &mut NullSink);
    assert_eq!(result.outcome, RelaxOutcome::Converged);

    drop(adapter);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_external_worker_predicts_with_clean_slab() {
    let (dir, path) = script(WORKER);
    let adapter = CalculatorAdapter::direct(ExternalCalculator::new("sh", &[path], 0).unwrap());
    let slab = slab_record("Pt111", None, -1.0);
    let ads = slab_record("Pt111", Some("O"), -1.0);

    let e = adapter
        .predict(StructurePair { structure: &ads, clean_slab: Some(&slab) })
        .unwrap();
    assert!((e + 1.50).abs() < 1e-12);

    drop(adapter);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_external_worker_errors_become_faults() {
    let (dir, path) = script(FAILING_WORKER);
    let adapter = CalculatorAdapter::relaxing(ExternalCalculator::new("sh", &[path], 0).unwrap());
    let record = slab_record("Pt111", None, -1.0);

    match adapter.evaluate(&record.geometry(vec![false; record.len()])) {
        Err(CalculationFault::Raised(msg)) => assert!(msg.contains("out of memory")),
        other => panic!("expected a fault, got {:?}", other),
    }

    drop(adapter);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_missing_program_is_a_fault_not_a_panic() {
    let adapter = CalculatorAdapter::relaxing(
        ExternalCalculator::new("/nonexistent/catbench-worker", &[], 0).unwrap(),
    );
    let record = slab_record("Pt111", None, -1.0);
    assert!(adapter.evaluate(&record.geometry(vec![false; record.len()])).is_err());
}

#[test]
fn test_dropping_calculator_lets_worker_exit_cleanly() {
    let (dir, path) = script(CLEAN_EXIT_WORKER);
    let marker = dir.join("exited");
    let calc = ExternalCalculator::new("sh", &[path, marker.display().to_string()], 0).unwrap();
    let adapter = CalculatorAdapter::relaxing(calc);
    let record = slab_record("Pt111", None, -1.0);
    adapter.evaluate(&record.geometry(vec![false; record.len()])).unwrap();

    drop(adapter);
    assert_eq!(fs::read_to_string(&marker).unwrap().trim(), "clean");

    let _ = fs::remove_dir_all(&dir);
}
