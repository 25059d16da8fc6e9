use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::{BenchError, BenchResult};

// --- Configuration Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    #[serde(rename = "LBFGS", alias = "lbfgs")]
    Lbfgs,
    #[serde(rename = "BFGS", alias = "bfgs")]
    Bfgs,
    #[serde(rename = "FIRE", alias = "fire")]
    Fire,
}

impl std::str::FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LBFGS" => Ok(OptimizerKind::Lbfgs),
            "BFGS" => Ok(OptimizerKind::Bfgs),
            "FIRE" => Ok(OptimizerKind::Fire),
            other => Err(format!("unknown optimizer '{}' (LBFGS, BFGS, FIRE)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMode {
    /// Relax every structure and compare total energies.
    Relaxation,
    /// The calculator predicts the energy directly; no geometry is produced.
    Direct,
}

/// Classifier thresholds. All comparisons are strict `>`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub disp_thrs: f64,
    pub energy_thrs: f64,
    pub reproduction_thrs: f64,
    pub bond_length_change_threshold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            disp_thrs: 0.5,
            energy_thrs: 2.0,
            reproduction_thrs: 0.2,
            bond_length_change_threshold: 0.2,
        }
    }
}

/// Immutable per-run configuration, built once and passed by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub mlip_name: String,
    pub benchmark: String,

    // Relaxation
    pub f_crit_relax: f64,
    pub n_crit_relax: usize,
    pub rate: f64,
    pub optimizer: OptimizerKind,
    pub max_step: f64,
    /// Scales every L-BFGS step.
    pub damping: f64,
    pub gas_distance: f64,
    pub gas_n_crit: usize,
    pub mode: CalculationMode,

    // Classification
    pub disp_thrs: f64,
    pub energy_thrs: f64,
    pub reproduction_thrs: f64,
    pub bond_length_change_threshold: f64,
    pub chemical_bond_cutoff: f64,

    // Persistence
    pub save_step: usize,
    pub result_dir: PathBuf,
    pub save_trajectory: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        let t = Thresholds::default();
        Self {
            mlip_name: String::new(), // Required
            benchmark: String::new(), // Required
            f_crit_relax: 0.05,
            n_crit_relax: 999,
            rate: 0.5,
            optimizer: OptimizerKind::Lbfgs,
            max_step: 0.2,
            damping: 1.0,
            gas_distance: 10.0,
            gas_n_crit: 500,
            mode: CalculationMode::Relaxation,
            disp_thrs: t.disp_thrs,
            energy_thrs: t.energy_thrs,
            reproduction_thrs: t.reproduction_thrs,
            bond_length_change_threshold: t.bond_length_change_threshold,
            chemical_bond_cutoff: 6.0,
            save_step: 50,
            result_dir: PathBuf::from("result"),
            save_trajectory: false,
        }
    }
}

impl BenchConfig {
    pub fn new(mlip_name: &str, benchmark: &str) -> Self {
        Self {
            mlip_name: mlip_name.to_string(),
            benchmark: benchmark.to_string(),
            ..Default::default()
        }
    }

    /// Loads a JSON config. Missing fields take their defaults; wrongly typed
    /// fields are a configuration error.
    pub fn from_json_file(path: &Path) -> BenchResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| {
            BenchError::Configuration(format!("{}: {}", path.display(), e))
        })
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            disp_thrs: self.disp_thrs,
            energy_thrs: self.energy_thrs,
            reproduction_thrs: self.reproduction_thrs,
            bond_length_change_threshold: self.bond_length_change_threshold,
        }
    }

    /// Output directory of this MLIP: `{result_dir}/{mlip_name}`.
    pub fn output_dir(&self) -> PathBuf {
        self.result_dir.join(&self.mlip_name)
    }

    /// Checked before any calculation begins.
    pub fn validate(&self) -> BenchResult<()> {
        if self.mlip_name.trim().is_empty() {
            return Err(BenchError::Configuration("missing required mlip_name".into()));
        }
        if self.benchmark.trim().is_empty() {
            return Err(BenchError::Configuration("missing required benchmark".into()));
        }
        if self.mlip_name.contains(|c| c == '/' || c == '\\') {
            return Err(BenchError::Configuration(format!(
                "mlip_name '{}' must not contain path separators",
                self.mlip_name
            )));
        }

        let positive = [
            ("f_crit_relax", self.f_crit_relax),
            ("max_step", self.max_step),
            ("damping", self.damping),
            ("gas_distance", self.gas_distance),
            ("chemical_bond_cutoff", self.chemical_bond_cutoff),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(BenchError::Configuration(format!(
                    "{} must be a positive finite number, got {}",
                    name, value
                )));
            }
        }

        let non_negative = [
            ("disp_thrs", self.disp_thrs),
            ("energy_thrs", self.energy_thrs),
            ("reproduction_thrs", self.reproduction_thrs),
            ("bond_length_change_threshold", self.bond_length_change_threshold),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(BenchError::Configuration(format!(
                    "{} must be a non-negative finite number, got {}",
                    name, value
                )));
            }
        }

        if !(0.0..1.0).contains(&self.rate) {
            return Err(BenchError::Configuration(format!(
                "rate must lie in [0, 1), got {}",
                self.rate
            )));
        }
        if self.n_crit_relax == 0 {
            return Err(BenchError::Configuration("n_crit_relax must be at least 1".into()));
        }
        if self.gas_n_crit == 0 {
            return Err(BenchError::Configuration("gas_n_crit must be at least 1".into()));
        }
        if self.save_step == 0 {
            return Err(BenchError::Configuration("save_step must be at least 1".into()));
        }
        Ok(())
    }
}
