use crate::core::config::{CalculationMode, Thresholds};
use crate::core::domain::{AnomalyCategory, AnomalyVerdict, ReducedRecord};
use crate::core::error::AllRunsFaulted;

/// Assigns at most one anomaly category to a reduced record.
///
/// Rules are tried in a fixed order and the first match wins:
/// displacement, energy, reproducibility, bond change. Atoms flying apart
/// are reported before the energy symptoms they cause, so reordering the
/// rules changes the reported category counts for identical data.
///
/// Direct-mode records have no relaxed geometry: only the energy and
/// reproducibility rules apply to them.
pub fn classify(record: &ReducedRecord, t: &Thresholds) -> Result<AnomalyCategory, AllRunsFaulted> {
    let representative = match (record.fully_faulted, record.representative_energy) {
        (false, Some(e)) => e,
        _ => {
            return Err(AllRunsFaulted {
                id: record.id.to_string(),
                runs: record.runs.len(),
            })
        }
    };
    let geometric = record.mode == CalculationMode::Relaxation;

    if geometric && exceeds(record.max_displacement, t.disp_thrs) {
        return Ok(AnomalyCategory::DisplacementAnomaly);
    }
    if (representative - record.reference_energy).abs() > t.energy_thrs {
        return Ok(AnomalyCategory::EnergyAnomaly);
    }
    if record.spread > t.reproduction_thrs {
        return Ok(AnomalyCategory::ReproducibilityFailure);
    }
    if geometric && exceeds(record.max_bond_change, t.bond_length_change_threshold) {
        return Ok(AnomalyCategory::BondChangeAnomaly);
    }
    Ok(AnomalyCategory::Normal)
}

/// Classifies and wraps the record. Fully faulted records get no category.
pub fn verdict(record: ReducedRecord, t: &Thresholds) -> AnomalyVerdict {
    let category = classify(&record, t).ok();
    AnomalyVerdict { category, record }
}

#[inline]
fn exceeds(value: Option<f64>, threshold: f64) -> bool {
    matches!(value, Some(v) if v > threshold)
}
