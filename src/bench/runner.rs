use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crossbeam_channel::Sender;
use log::{error, info, warn};

use crate::analysis::anomaly;
use crate::bench::aggregate::ReproducibilityAggregator;
use crate::bench::{BenchEvent, RecordSummary, RunSummary};
use crate::core::config::{BenchConfig, CalculationMode};
use crate::core::dataset::Dataset;
use crate::core::error::{BenchError, BenchResult};
use crate::engine::calculator::CalculatorAdapter;
use crate::engine::trajectory::{NullSink, RunLogWriter, TrajectorySink};
use crate::store::checkpoint::{CheckpointStore, LoadOutcome};

/// Drives one (MLIP, benchmark) invocation: every structure of a dataset is
/// relaxed by each calculator instance, classified and stored.
///
/// The calculator list holds one independently constructed instance per
/// reproducibility run.
pub struct Benchmark {
    config: BenchConfig,
    calculators: Vec<CalculatorAdapter>,
}

impl Benchmark {
    pub fn new(config: BenchConfig, calculators: Vec<CalculatorAdapter>) -> BenchResult<Self> {
        config.validate()?;
        if calculators.is_empty() {
            return Err(BenchError::Configuration(
                "at least one calculator instance is required".into(),
            ));
        }
        let direct = config.mode == CalculationMode::Direct;
        if let Some(bad) = calculators.iter().find(|c| c.is_direct() != direct) {
            return Err(BenchError::Configuration(format!(
                "calculator '{}' does not support {:?} mode",
                bad.name(),
                config.mode
            )));
        }
        Ok(Self { config, calculators })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn runs(&self) -> usize {
        self.calculators.len()
    }

    /// Processes the dataset in identifier order, resuming from an existing
    /// checkpoint. The stop flag is honored between structures only.
    ///
    /// Store I/O errors are fatal; calculation faults never are.
    pub fn run(
        &self,
        dataset: &Dataset,
        tx: &Sender<BenchEvent>,
        stop: &AtomicBool,
    ) -> BenchResult<RunSummary> {
        let start_time = Instant::now();
        let thresholds = self.config.thresholds();

        let mut store = CheckpointStore::open(&self.config)?;
        let resumed = match store.load_outcome() {
            LoadOutcome::Resumed { processed } => *processed,
            LoadOutcome::Corrupt { reason, preserved_as } => {
                let _ = tx.send(BenchEvent::Log(format!(
                    "Checkpoint discarded ({}), kept as {}",
                    reason,
                    preserved_as.display()
                )));
                0
            }
            LoadOutcome::Fresh => 0,
        };
        let _ = tx.send(BenchEvent::Started { total: dataset.len(), resumed });

        let mut sink: Box<dyn TrajectorySink> = if self.config.save_trajectory {
            Box::new(RunLogWriter::new(&self.config.output_dir())?)
        } else {
            Box::new(NullSink)
        };

        let aggregator = ReproducibilityAggregator::new(&self.config);
        let mut summary = RunSummary {
            total: dataset.len(),
            ..Default::default()
        };

        for (index, (key, record)) in dataset.structures.iter().enumerate() {
            if stop.load(Ordering::Relaxed) {
                warn!("Stop requested, halting before {}", key);
                summary.stopped = true;
                break;
            }
            if store.contains(key) {
                summary.skipped += 1;
                let _ = tx.send(BenchEvent::Skipped(key.clone()));
                continue;
            }

            let reduced = aggregator.aggregate(dataset, record, &self.calculators, sink.as_mut());
            let verdict = anomaly::verdict(reduced, &thresholds);
            let line = RecordSummary::from_verdict(index, key, &verdict);

            match line.category {
                Some(c) => info!(
                    "[{}/{}] {}: {} (E = {}, spread {:.4})",
                    index + 1,
                    dataset.len(),
                    key,
                    c.label(),
                    fmt_energy(line.representative_energy),
                    line.spread
                ),
                None => warn!("[{}/{}] {}: all runs faulted", index + 1, dataset.len(), key),
            }

            let flushed = store.record(key, verdict).map_err(|e| {
                error!("Result store failed on {}: {}", key, e);
                e
            })?;
            summary.computed += 1;
            if flushed {
                let _ = tx.send(BenchEvent::Checkpointed { processed: store.processed().len() });
            }
            let _ = tx.send(BenchEvent::StructureDone(line));
        }

        if summary.stopped {
            store.flush()?;
            let _ = tx.send(BenchEvent::Checkpointed { processed: store.processed().len() });
        } else {
            let results = store.finalize(&dataset.reactions)?;
            info!(
                "Finalized {} records and {} reactions in {}",
                results.entries.len(),
                results.reactions.len(),
                self.config.output_dir().display()
            );
        }

        summary.counts = store.counts();
        summary.elapsed_secs = start_time.elapsed().as_secs_f64();
        let _ = tx.send(BenchEvent::Finished(summary.clone()));
        Ok(summary)
    }
}

fn fmt_energy(e: Option<f64>) -> String {
    e.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v))
}
