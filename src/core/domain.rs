use std::fmt;

use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::config::CalculationMode;

// --- Geometry Types ---

/// Simulation cell. A structure with a lattice is treated as periodic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[[f64; 3]; 3]", into = "[[f64; 3]; 3]")]
pub struct Lattice {
    pub vectors: Matrix3<f64>, // Columns are a, b, c
    pub inverse: Matrix3<f64>, // Precomputed for fractional conversion
}

impl Lattice {
    pub fn new(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> Option<Self> {
        let vectors = Matrix3::from_columns(&[a, b, c]);
        let inverse = vectors.try_inverse()?;
        Some(Self { vectors, inverse })
    }

    /// Orthorhombic box with edges along x, y, z.
    pub fn cubic(edge: f64) -> Option<Self> {
        Self::new(
            Vector3::new(edge, 0.0, 0.0),
            Vector3::new(0.0, edge, 0.0),
            Vector3::new(0.0, 0.0, edge),
        )
    }

    pub fn to_fractional(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.inverse * p.coords)
    }

    pub fn to_cartesian(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.vectors * p.coords)
    }

    pub fn rows(&self) -> [[f64; 3]; 3] {
        let v = &self.vectors;
        [
            [v[(0, 0)], v[(1, 0)], v[(2, 0)]],
            [v[(0, 1)], v[(1, 1)], v[(2, 1)]],
            [v[(0, 2)], v[(1, 2)], v[(2, 2)]],
        ]
    }
}

// Cells are exchanged as three row vectors, the layout VASP and ASE use.
impl TryFrom<[[f64; 3]; 3]> for Lattice {
    type Error = String;

    fn try_from(rows: [[f64; 3]; 3]) -> Result<Self, Self::Error> {
        let [a, b, c] = rows.map(Vector3::from);
        Lattice::new(a, b, c).ok_or_else(|| "cell vectors are linearly dependent".to_string())
    }
}

impl From<Lattice> for [[f64; 3]; 3] {
    fn from(lattice: Lattice) -> Self {
        lattice.rows()
    }
}

/// The mutable working geometry handed to calculators and optimizers.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub species: Vec<String>,
    pub positions: Vec<Point3<f64>>,
    pub lattice: Option<Lattice>,
    pub fixed: Vec<bool>,
}

impl Geometry {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.fixed.iter().filter(|f| !**f).count()
    }
}

// --- Input Records ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureKind {
    Slab,
    Adsorbate,
    Gas,
    Bulk,
}

/// Identifies one structure: system, adsorbate (none for a clean slab) and replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructureId {
    pub system: String,
    #[serde(default)]
    pub adsorbate: Option<String>,
    #[serde(default)]
    pub replica: u32,
}

impl StructureId {
    pub fn new(system: &str, adsorbate: Option<&str>, replica: u32) -> Self {
        Self {
            system: system.to_string(),
            adsorbate: adsorbate.map(str::to_string),
            replica,
        }
    }

    /// Identifier of the clean slab this structure was built on.
    pub fn clean_slab(&self) -> Self {
        Self {
            system: self.system.clone(),
            adsorbate: None,
            replica: self.replica,
        }
    }
}

// "star" is the usual label of an empty adsorption site.
impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ads = self.adsorbate.as_deref().unwrap_or("star");
        write!(f, "{}__{}__{}", self.system, ads, self.replica)
    }
}

/// One input structure with its DFT reference energy. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureRecord {
    #[serde(flatten)]
    pub id: StructureId,
    #[serde(default)]
    pub kind: Option<StructureKind>,
    pub species: Vec<String>,
    pub positions: Vec<Point3<f64>>,
    #[serde(default)]
    pub cell: Option<Lattice>,
    pub reference_energy: f64,
    #[serde(default)]
    pub fixed: Option<Vec<bool>>,
}

impl StructureRecord {
    pub fn structure_kind(&self) -> StructureKind {
        match (self.kind, &self.id.adsorbate) {
            (Some(kind), _) => kind,
            (None, Some(_)) => StructureKind::Adsorbate,
            (None, None) => StructureKind::Slab,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Working copy of the initial geometry with the given constraint mask.
    pub fn geometry(&self, fixed: Vec<bool>) -> Geometry {
        Geometry {
            species: self.species.clone(),
            positions: self.positions.clone(),
            lattice: self.cell.clone(),
            fixed,
        }
    }
}

// --- Run Outcomes ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelaxOutcome {
    /// Max force fell below `f_crit_relax`.
    Converged,
    /// `n_crit_relax` steps taken without convergence. Valid, not a failure.
    StepLimitReached,
    /// Direct-mode prediction, no relaxation performed.
    Predicted,
    /// The calculator faulted; no further steps were taken.
    Faulted,
}

/// Energy/force summary of one relaxation's trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub initial_energy: Option<f64>,
    pub initial_fmax: Option<f64>,
    pub final_fmax: Option<f64>,
}

/// One entry of a relaxation trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub step: usize,
    pub energy: f64,
    pub fmax: f64,
}

/// Outcome of one relaxation (or one direct prediction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_index: usize,
    pub outcome: RelaxOutcome,
    pub final_energy: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub final_positions: Vec<Point3<f64>>,
    pub steps: usize,
    pub duration_secs: f64,
    pub trace: TraceSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl RunResult {
    pub fn raised_fault(&self) -> bool {
        self.outcome == RelaxOutcome::Faulted
    }

    pub fn converged(&self) -> bool {
        matches!(self.outcome, RelaxOutcome::Converged | RelaxOutcome::Predicted)
    }
}

// --- Reduced Records & Verdicts ---

/// Aggregate of the N runs of one structure for one calculator setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedRecord {
    pub id: StructureId,
    pub kind: StructureKind,
    pub mode: CalculationMode,
    pub reference_energy: f64,
    pub representative_energy: Option<f64>,
    pub representative_run: Option<usize>,
    /// False when no run converged and the representative fell back to the lowest energy.
    pub representative_converged: bool,
    pub spread: f64,
    /// None in direct mode, where no relaxed geometry exists.
    pub max_displacement: Option<f64>,
    pub max_bond_change: Option<f64>,
    pub fully_faulted: bool,
    pub runs: Vec<RunResult>,
}

impl ReducedRecord {
    pub fn total_time(&self) -> f64 {
        self.runs.iter().map(|r| r.duration_secs).sum()
    }

    pub fn run_energies(&self) -> Vec<Option<f64>> {
        self.runs.iter().map(|r| r.final_energy).collect()
    }
}

/// Fixed anomaly taxonomy. At most one category applies to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyCategory {
    Normal,
    DisplacementAnomaly,
    EnergyAnomaly,
    ReproducibilityFailure,
    BondChangeAnomaly,
}

impl AnomalyCategory {
    pub const ALL: [AnomalyCategory; 5] = [
        AnomalyCategory::Normal,
        AnomalyCategory::DisplacementAnomaly,
        AnomalyCategory::EnergyAnomaly,
        AnomalyCategory::ReproducibilityFailure,
        AnomalyCategory::BondChangeAnomaly,
    ];

    pub fn is_anomaly(&self) -> bool {
        *self != AnomalyCategory::Normal
    }

    pub fn label(&self) -> &'static str {
        match self {
            AnomalyCategory::Normal => "normal",
            AnomalyCategory::DisplacementAnomaly => "displacement",
            AnomalyCategory::EnergyAnomaly => "energy",
            AnomalyCategory::ReproducibilityFailure => "reproducibility",
            AnomalyCategory::BondChangeAnomaly => "bond_change",
        }
    }
}

/// The classifier's decision together with the record it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    /// None for a fully faulted record, which is excluded from classification.
    pub category: Option<AnomalyCategory>,
    pub record: ReducedRecord,
}
