use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::domain::{StructureId, StructureRecord};
use crate::core::error::{BenchError, BenchResult};

/// One stoichiometric term of a reaction: `coeff * E(structure)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionTerm {
    pub structure: String,
    pub coeff: f64,
}

/// A reaction energy assembled from structure energies, with its DFT reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub reference_energy: f64,
    pub terms: Vec<ReactionTerm>,
}

/// A benchmark dataset as produced by the preprocessing step.
///
/// Structures are keyed by the string form of their [`StructureId`]; the
/// sorted map gives every run the same processing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub name: String,
    pub structures: BTreeMap<String, StructureRecord>,
    #[serde(default)]
    pub reactions: BTreeMap<String, Reaction>,
}

impl Dataset {
    pub fn from_json_file(path: &Path) -> BenchResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| BenchError::io(path, e))?;
        let dataset: Dataset =
            serde_json::from_str(&text).map_err(|e| BenchError::serde(path, e))?;
        dataset.validate()?;
        Ok(dataset)
    }

    /// Builds a dataset from records, keyed by their identifiers.
    pub fn from_records(name: &str, records: Vec<StructureRecord>) -> BenchResult<Self> {
        let mut structures = BTreeMap::new();
        for record in records {
            let key = record.id.to_string();
            if structures.insert(key.clone(), record).is_some() {
                return Err(BenchError::Dataset(format!("duplicate structure {}", key)));
            }
        }
        let dataset = Self {
            name: name.to_string(),
            structures,
            reactions: BTreeMap::new(),
        };
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn get(&self, id: &StructureId) -> Option<&StructureRecord> {
        self.structures.get(&id.to_string())
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    pub fn validate(&self) -> BenchResult<()> {
        for (key, record) in &self.structures {
            let id = record.id.to_string();
            if *key != id {
                return Err(BenchError::Dataset(format!(
                    "entry '{}' carries identifier '{}'",
                    key, id
                )));
            }
            if record.is_empty() {
                return Err(BenchError::Dataset(format!("{} has no atoms", key)));
            }
            if record.species.len() != record.positions.len() {
                return Err(BenchError::Dataset(format!(
                    "{}: {} species for {} positions",
                    key,
                    record.species.len(),
                    record.positions.len()
                )));
            }
            if let Some(mask) = &record.fixed {
                if mask.len() != record.positions.len() {
                    return Err(BenchError::Dataset(format!(
                        "{}: fixed mask has {} entries for {} atoms",
                        key,
                        mask.len(),
                        record.positions.len()
                    )));
                }
            }
            let finite = record
                .positions
                .iter()
                .all(|p| p.coords.iter().all(|c| c.is_finite()));
            if !finite || !record.reference_energy.is_finite() {
                return Err(BenchError::Dataset(format!("{}: non-finite input values", key)));
            }
        }

        for (name, reaction) in &self.reactions {
            for term in &reaction.terms {
                if !self.structures.contains_key(&term.structure) {
                    return Err(BenchError::Dataset(format!(
                        "reaction {} references unknown structure {}",
                        name, term.structure
                    )));
                }
            }
        }
        Ok(())
    }
}
