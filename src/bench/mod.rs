use std::collections::BTreeMap;

use crate::core::domain::{AnomalyCategory, AnomalyVerdict};

/// One finished structure, as shown to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSummary {
    pub index: usize,
    pub key: String,
    pub category: Option<AnomalyCategory>, // None: all runs faulted
    pub representative_energy: Option<f64>,
    pub reference_energy: f64,
    pub spread: f64,
    pub max_displacement: Option<f64>,
    pub faulted_runs: usize,
    pub time_secs: f64,
}

impl RecordSummary {
    pub fn from_verdict(index: usize, key: &str, verdict: &AnomalyVerdict) -> Self {
        let r = &verdict.record;
        Self {
            index,
            key: key.to_string(),
            category: verdict.category,
            representative_energy: r.representative_energy,
            reference_energy: r.reference_energy,
            spread: r.spread,
            max_displacement: r.max_displacement,
            faulted_runs: r.runs.iter().filter(|run| run.raised_fault()).count(),
            time_secs: r.total_time(),
        }
    }
}

/// Category tallies over every stored record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryCounts {
    pub by_category: BTreeMap<AnomalyCategory, usize>,
    pub fully_faulted: usize,
}

impl CategoryCounts {
    pub fn add(&mut self, category: Option<AnomalyCategory>) {
        match category {
            Some(c) => *self.by_category.entry(c).or_insert(0) += 1,
            None => self.fully_faulted += 1,
        }
    }

    pub fn get(&self, category: AnomalyCategory) -> usize {
        self.by_category.get(&category).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.by_category.values().sum::<usize>() + self.fully_faulted
    }
}

/// Final statistics of one benchmark invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub total: usize,
    pub computed: usize,
    pub skipped: usize,
    pub stopped: bool,
    pub counts: CategoryCounts,
    pub elapsed_secs: f64,
}

/// Events emitted by the benchmark driver to the main thread.
#[derive(Debug, Clone)]
pub enum BenchEvent {
    /// Diagnostic log message.
    Log(String),

    /// The store is open; `resumed` structures were restored from a checkpoint.
    Started { total: usize, resumed: usize },

    /// A structure already present in the checkpoint.
    Skipped(String),

    /// A structure finished and was stored.
    StructureDone(RecordSummary),

    /// The state was flushed to durable storage.
    Checkpointed { processed: usize },

    /// The driver has finalized its output files.
    Finished(RunSummary),
}

pub mod aggregate;
pub mod gas;
pub mod runner;
