use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::dataset::Reaction;
use crate::core::domain::AnomalyVerdict;

/// Reaction energy assembled from the per-run structure energies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionSummary {
    pub reference_energy: f64,
    /// `Σ coeff · E_run` per run; None when a term is missing or faulted in that run.
    pub run_energies: Vec<Option<f64>>,
    pub median_energy: Option<f64>,
    pub median_run: Option<usize>,
    pub spread: f64,
    /// Terms not yet computed (e.g. the benchmark was stopped early).
    pub missing_terms: Vec<String>,
    /// Terms whose structure was classified as anything but normal.
    pub anomalous_terms: Vec<String>,
}

impl ReactionSummary {
    pub fn is_complete(&self) -> bool {
        self.missing_terms.is_empty() && self.run_energies.iter().all(Option::is_some)
    }
}

/// Lower median of the values, with the index of its first occurrence.
pub fn median_index(values: &[f64]) -> Option<(usize, f64)> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = sorted[(sorted.len() - 1) / 2];
    values.iter().position(|v| *v == median).map(|i| (i, median))
}

pub fn summarize(
    reactions: &BTreeMap<String, Reaction>,
    entries: &BTreeMap<String, AnomalyVerdict>,
) -> BTreeMap<String, ReactionSummary> {
    reactions
        .iter()
        .map(|(name, reaction)| (name.clone(), summarize_one(reaction, entries)))
        .collect()
}

fn summarize_one(reaction: &Reaction, entries: &BTreeMap<String, AnomalyVerdict>) -> ReactionSummary {
    let mut missing_terms = Vec::new();
    let mut anomalous_terms = Vec::new();
    let mut n_runs = 0;

    for term in &reaction.terms {
        match entries.get(&term.structure) {
            None => missing_terms.push(term.structure.clone()),
            Some(v) => {
                n_runs = n_runs.max(v.record.runs.len());
                if v.category.map_or(true, |c| c.is_anomaly()) {
                    anomalous_terms.push(term.structure.clone());
                }
            }
        }
    }

    let run_energies: Vec<Option<f64>> = if missing_terms.is_empty() {
        (0..n_runs)
            .map(|run| {
                reaction.terms.iter().try_fold(0.0, |acc, term| {
                    let record = &entries.get(&term.structure)?.record;
                    let result = record.runs.get(run)?;
                    if result.raised_fault() {
                        return None;
                    }
                    Some(acc + term.coeff * result.final_energy?)
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    let valid: Vec<f64> = run_energies.iter().flatten().copied().collect();
    let spread = match (
        valid.iter().copied().reduce(f64::max),
        valid.iter().copied().reduce(f64::min),
    ) {
        (Some(max), Some(min)) => max - min,
        _ => 0.0,
    };

    // Median over the complete runs, reported with its run index.
    let complete_runs: Vec<usize> = run_energies
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.map(|_| i))
        .collect();
    let (median_run, median_energy) = match median_index(&valid) {
        Some((k, e)) => (Some(complete_runs[k]), Some(e)),
        None => (None, None),
    };

    ReactionSummary {
        reference_energy: reaction.reference_energy,
        run_energies,
        median_energy,
        median_run,
        spread,
        missing_terms,
        anomalous_terms,
    }
}
