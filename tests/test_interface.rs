mod common;

use std::sync::atomic::Ordering;

use crossbeam_channel::unbounded;

use catbench::bench::{BenchEvent, RecordSummary, RunSummary};
use catbench::core::domain::AnomalyCategory;
use catbench::interface::state::{AppState, WorkerStatus};

use common::{temp_dir, test_config};

fn line(index: usize, key: &str, category: Option<AnomalyCategory>) -> RecordSummary {
    RecordSummary {
        index,
        key: key.to_string(),
        category,
        representative_energy: category.map(|_| -1.0),
        reference_energy: -1.0,
        spread: 0.0,
        max_displacement: None,
        faulted_runs: 0,
        time_secs: 0.1,
    }
}

#[test]
fn test_state_tracks_worker_events() {
    let mut app = AppState::new(test_config(temp_dir()), 3, "dataset.json");
    let (tx, rx) = unbounded();
    app.set_channel(rx);

    tx.send(BenchEvent::Started { total: 4, resumed: 1 }).unwrap();
    tx.send(BenchEvent::Skipped("a".into())).unwrap();
    tx.send(BenchEvent::StructureDone(line(1, "b", Some(AnomalyCategory::Normal)))).unwrap();
    tx.send(BenchEvent::StructureDone(line(2, "c", None))).unwrap();
    tx.send(BenchEvent::Checkpointed { processed: 3 }).unwrap();
    app.tick();

    assert_eq!(app.worker_status, WorkerStatus::Running);
    assert_eq!(app.progress.total, 4);
    assert_eq!(app.progress.done(), 3);
    assert_eq!(app.progress.checkpointed, 3);
    assert!((app.progress.ratio() - 0.75).abs() < 1e-12);
    assert_eq!(app.counts.get(AnomalyCategory::Normal), 1);
    assert_eq!(app.counts.fully_faulted, 1);
    assert_eq!(app.records.len(), 2);
}

#[test]
fn test_quit_requests_a_stop_before_quitting() {
    let mut app = AppState::new(test_config(temp_dir()), 1, "dataset.json");
    let (tx, rx) = unbounded();
    app.set_channel(rx);
    tx.send(BenchEvent::Started { total: 2, resumed: 0 }).unwrap();
    app.tick();

    app.request_quit();
    assert!(app.stop.load(Ordering::Relaxed));
    assert_eq!(app.worker_status, WorkerStatus::Stopping);
    assert!(!app.should_quit);

    let summary = RunSummary { total: 2, computed: 1, stopped: true, ..Default::default() };
    tx.send(BenchEvent::Finished(summary)).unwrap();
    app.tick();
    assert_eq!(app.worker_status, WorkerStatus::Finished);
    assert!(app.summary.as_ref().unwrap().stopped);

    app.request_quit();
    assert!(app.should_quit);
}

#[test]
fn test_vanished_worker_is_an_error() {
    let mut app = AppState::new(test_config(temp_dir()), 1, "dataset.json");
    let (tx, rx) = unbounded();
    app.set_channel(rx);
    drop(tx);
    app.tick();
    assert_eq!(app.worker_status, WorkerStatus::Error);
    assert!(app.rx.is_none());
}
