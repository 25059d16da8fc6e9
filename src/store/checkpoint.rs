use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info, warn};

use crate::analysis::reaction;
use crate::bench::CategoryCounts;
use crate::core::config::BenchConfig;
use crate::core::dataset::Reaction;
use crate::core::domain::AnomalyVerdict;
use crate::core::error::{BenchError, BenchResult};
use crate::store::output::{self, AnalysisEntry, AnomalyReport, FinalizedResults};
use crate::store::{BenchmarkState, StorePhase};

/// What was found on disk when the store was opened.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Fresh,
    Resumed { processed: usize },
    /// Unreadable or foreign checkpoint, moved aside before starting over.
    Corrupt { reason: String, preserved_as: PathBuf },
}

/// Single-writer, checkpointed store of benchmark results.
pub struct CheckpointStore {
    output_dir: PathBuf,
    path: PathBuf,
    save_step: usize,
    state: BenchmarkState,
    phase: StorePhase,
    since_flush: usize,
    outcome: LoadOutcome,
}

impl CheckpointStore {
    pub fn new(config: &BenchConfig) -> Self {
        let output_dir = config.output_dir();
        let path = output::result_path(&output_dir, &config.mlip_name);
        Self {
            output_dir,
            path,
            save_step: config.save_step.max(1),
            state: BenchmarkState::new(config),
            phase: StorePhase::Fresh,
            since_flush: 0,
            outcome: LoadOutcome::Fresh,
        }
    }

    /// Creates the output directory and loads any existing checkpoint.
    pub fn open(config: &BenchConfig) -> BenchResult<Self> {
        let mut store = Self::new(config);
        fs::create_dir_all(&store.output_dir).map_err(|e| BenchError::io(&store.output_dir, e))?;
        store.load(config)?;
        Ok(store)
    }

    pub fn load(&mut self, config: &BenchConfig) -> BenchResult<()> {
        self.expect_phase(StorePhase::Fresh)?;
        self.phase = StorePhase::Loading;

        self.outcome = if self.path.exists() {
            match self.read_checkpoint(config) {
                Ok(state) => {
                    let processed = state.processed.len();
                    info!(
                        "Resuming {} on {}: {} structures already processed",
                        config.mlip_name, config.benchmark, processed
                    );
                    self.state = state;
                    LoadOutcome::Resumed { processed }
                }
                Err(reason) => {
                    let preserved_as = self.preserve_corrupt()?;
                    warn!(
                        "Checkpoint {} unusable ({}); moved to {} and starting fresh",
                        self.path.display(),
                        reason,
                        preserved_as.display()
                    );
                    LoadOutcome::Corrupt { reason, preserved_as }
                }
            }
        } else {
            LoadOutcome::Fresh
        };

        self.phase = StorePhase::Running;
        Ok(())
    }

    fn read_checkpoint(&self, config: &BenchConfig) -> Result<BenchmarkState, String> {
        let text = fs::read_to_string(&self.path).map_err(|e| e.to_string())?;
        let mut state: BenchmarkState = serde_json::from_str(&text).map_err(|e| e.to_string())?;

        if state.mlip_name != config.mlip_name || state.benchmark != config.benchmark {
            return Err(format!(
                "checkpoint belongs to {} on {}",
                state.mlip_name, state.benchmark
            ));
        }
        if state.processed.len() != state.entries.len()
            || state.processed.iter().any(|k| !state.entries.contains_key(k))
        {
            return Err("processed cursor does not match stored entries".into());
        }

        if state.config != *config {
            warn!("Checkpoint was written with a different configuration; resuming with the current one");
        }
        state.config = config.clone();
        state.finalized = false;
        Ok(state)
    }

    fn preserve_corrupt(&self) -> BenchResult<PathBuf> {
        let mut target = PathBuf::from(format!("{}.corrupt", self.path.display()));
        if target.exists() {
            let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
            target = PathBuf::from(format!("{}.{}.corrupt", self.path.display(), stamp));
        }
        fs::rename(&self.path, &target).map_err(|e| BenchError::io(&self.path, e))?;
        Ok(target)
    }

    // --- Accessors ---

    pub fn phase(&self) -> StorePhase {
        self.phase
    }

    pub fn load_outcome(&self) -> &LoadOutcome {
        &self.outcome
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.entries.contains_key(key)
    }

    pub fn processed(&self) -> &[String] {
        &self.state.processed
    }

    pub fn state(&self) -> &BenchmarkState {
        &self.state
    }

    pub fn counts(&self) -> CategoryCounts {
        let mut counts = CategoryCounts::default();
        for verdict in self.state.entries.values() {
            counts.add(verdict.category);
        }
        counts
    }

    // --- Mutation ---

    /// Appends one verdict. Returns true when this completion triggered a flush.
    pub fn record(&mut self, key: &str, verdict: AnomalyVerdict) -> BenchResult<bool> {
        self.expect_phase(StorePhase::Running)?;
        if self.contains(key) {
            return Err(BenchError::DuplicateRecord(key.to_string()));
        }
        self.state.entries.insert(key.to_string(), verdict);
        self.state.processed.push(key.to_string());
        self.since_flush += 1;

        if self.since_flush >= self.save_step {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Writes the whole state atomically.
    pub fn flush(&mut self) -> BenchResult<()> {
        self.expect_phase(StorePhase::Running)?;
        self.phase = StorePhase::Flushing;
        self.state.stamp();
        let written = output::write_json_atomic(&self.path, &self.state);
        self.phase = StorePhase::Running;
        written?;

        self.since_flush = 0;
        debug!(
            "Checkpoint written: {} structures to {}",
            self.state.processed.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Final flush plus the derived output files. No records can be added afterwards.
    pub fn finalize(&mut self, reactions: &BTreeMap<String, Reaction>) -> BenchResult<FinalizedResults> {
        self.expect_phase(StorePhase::Running)?;
        self.state.reactions = reaction::summarize(reactions, &self.state.entries);
        self.state.finalized = true;
        if let Err(e) = self.flush() {
            self.state.finalized = false;
            return Err(e);
        }

        let mlip = &self.state.mlip_name;
        let report = AnomalyReport::build(&self.state.entries);
        output::write_json_atomic(&output::anomaly_path(&self.output_dir, mlip), &report)?;

        let gases = output::gas_energies(&self.state.entries);
        if !gases.is_empty() {
            output::write_json_atomic(&output::gases_path(&self.output_dir, mlip), &gases)?;
        }

        self.phase = StorePhase::Finalized;
        Ok(self.finalized_view())
    }

    pub fn finalized_view(&self) -> FinalizedResults {
        FinalizedResults {
            entries: self
                .state
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), AnalysisEntry::from(v)))
                .collect(),
            reactions: self.state.reactions.clone(),
        }
    }

    fn expect_phase(&self, expected: StorePhase) -> BenchResult<()> {
        if self.phase != expected {
            return Err(BenchError::InvalidPhase {
                expected: expected.as_str(),
                actual: self.phase.as_str(),
            });
        }
        Ok(())
    }
}
