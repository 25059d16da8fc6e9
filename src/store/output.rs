use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::reaction::ReactionSummary;
use crate::core::domain::{AnomalyCategory, AnomalyVerdict, StructureKind};
use crate::core::error::{BenchError, BenchResult};

// --- File Names ---

pub fn result_path(output_dir: &Path, mlip_name: &str) -> PathBuf {
    output_dir.join(format!("{}_result.json", mlip_name))
}

pub fn anomaly_path(output_dir: &Path, mlip_name: &str) -> PathBuf {
    output_dir.join(format!("{}_anomaly_detection.json", mlip_name))
}

pub fn gases_path(output_dir: &Path, mlip_name: &str) -> PathBuf {
    output_dir.join(format!("{}_gases.json", mlip_name))
}

/// Writes pretty JSON next to `path` and renames it into place, so readers
/// only ever see the previous or the new complete file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> BenchResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let tmp = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));

    let result = (|| {
        let file = File::create(&tmp).map_err(|e| BenchError::io(&tmp, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value).map_err(|e| BenchError::serde(path, e))?;
        writer.flush().map_err(|e| BenchError::io(&tmp, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| BenchError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| BenchError::io(path, e))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

// --- Finalized Views ---

/// The per-structure view handed to downstream analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisEntry {
    pub representative_energy: Option<f64>,
    pub reference_energy: f64,
    pub anomaly_category: Option<AnomalyCategory>,
    pub timing: f64,
    pub reproducibility_spread: f64,
}

impl From<&AnomalyVerdict> for AnalysisEntry {
    fn from(v: &AnomalyVerdict) -> Self {
        Self {
            representative_energy: v.record.representative_energy,
            reference_energy: v.record.reference_energy,
            anomaly_category: v.category,
            timing: v.record.total_time(),
            reproducibility_spread: v.record.spread,
        }
    }
}

/// Read-only result of a finished benchmark.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedResults {
    pub entries: BTreeMap<String, AnalysisEntry>,
    pub reactions: BTreeMap<String, ReactionSummary>,
}

/// Contents of `{mlip_name}_anomaly_detection.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    /// Accumulated calculation time over every run (s).
    #[serde(rename = "Time")]
    pub time: f64,
    pub categories: BTreeMap<String, AnomalyCategory>,
    pub counts: BTreeMap<AnomalyCategory, usize>,
    pub normal: Vec<String>,
    pub anomaly: Vec<String>,
    pub fully_faulted: Vec<String>,
}

impl AnomalyReport {
    pub fn build(entries: &BTreeMap<String, AnomalyVerdict>) -> Self {
        let mut report = Self {
            time: 0.0,
            categories: BTreeMap::new(),
            counts: AnomalyCategory::ALL.iter().map(|c| (*c, 0)).collect(),
            normal: Vec::new(),
            anomaly: Vec::new(),
            fully_faulted: Vec::new(),
        };

        for (key, verdict) in entries {
            report.time += verdict.record.total_time();
            match verdict.category {
                None => report.fully_faulted.push(key.clone()),
                Some(c) => {
                    report.categories.insert(key.clone(), c);
                    *report.counts.entry(c).or_insert(0) += 1;
                    if c.is_anomaly() {
                        report.anomaly.push(key.clone());
                    } else {
                        report.normal.push(key.clone());
                    }
                }
            }
        }
        report
    }
}

/// Per-run energies of gas references, keyed `"{id}_{run}th"`.
pub fn gas_energies(entries: &BTreeMap<String, AnomalyVerdict>) -> BTreeMap<String, f64> {
    entries
        .iter()
        .filter(|(_, v)| v.record.kind == StructureKind::Gas)
        .flat_map(|(key, v)| {
            v.record
                .runs
                .iter()
                .filter(|r| !r.raised_fault())
                .filter_map(move |r| r.final_energy.map(|e| (format!("{}_{}th", key, r.run_index), e)))
        })
        .collect()
}
