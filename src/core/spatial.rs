use nalgebra::{Point3, Vector3};
use crate::core::domain::{Geometry, Lattice, StructureRecord};

/// Calculates the squared distance between two points.
/// If `lattice` is provided, applies Minimum Image Convention (MIC).
#[inline]
pub fn distance_sq(p1: &Point3<f64>, p2: &Point3<f64>, lattice: Option<&Lattice>) -> f64 {
    match lattice {
        Some(lat) => {
            // Periodic: Convert delta to fractional coordinates
            let d_cart = p2 - p1;
            let mut d_frac = lat.inverse * d_cart;

            // Apply MIC: Wrap fractional coordinates to [-0.5, 0.5]
            d_frac.x -= d_frac.x.round();
            d_frac.y -= d_frac.y.round();
            d_frac.z -= d_frac.z.round();

            let d_mic = lat.vectors * d_frac;
            d_mic.norm_squared()
        }
        None => nalgebra::distance_squared(p1, p2),
    }
}

/// Largest per-atom Euclidean displacement between two geometries.
/// Raw cartesian distance: relaxations never wrap atoms back into the cell.
pub fn max_displacement(initial: &[Point3<f64>], fin: &[Point3<f64>]) -> f64 {
    initial
        .iter()
        .zip(fin.iter())
        .map(|(a, b)| nalgebra::distance(a, b))
        .fold(0.0, f64::max)
}

/// Largest per-atom force norm over free atoms.
pub fn max_force(forces: &[Vector3<f64>], fixed: &[bool]) -> f64 {
    forces
        .iter()
        .enumerate()
        .filter(|(i, _)| !fixed.get(*i).copied().unwrap_or(false))
        .map(|(_, f)| f.norm())
        .fold(0.0, f64::max)
}

/// Height below which atoms are fixed: `z_min + rate * (z_max - z_min)`.
/// `None` when the rate is 0 or there are no atoms.
pub fn fix_height(positions: &[Point3<f64>], rate: f64) -> Option<f64> {
    if rate <= 0.0 || positions.is_empty() {
        return None;
    }
    let z_min = positions.iter().map(|p| p.z).fold(f64::INFINITY, f64::min);
    let z_max = positions.iter().map(|p| p.z).fold(f64::NEG_INFINITY, f64::max);
    Some(z_min + rate * (z_max - z_min))
}

/// Marks every atom strictly below `z_target` as fixed.
pub fn mask_below(positions: &[Point3<f64>], z_target: Option<f64>) -> Vec<bool> {
    match z_target {
        Some(z) => positions.iter().map(|p| p.z < z).collect(),
        None => vec![false; positions.len()],
    }
}

/// Fixes every atom lying below the height rule of its own geometry.
/// A rate of 0 leaves all atoms free.
pub fn height_mask(positions: &[Point3<f64>], rate: f64) -> Vec<bool> {
    mask_below(positions, fix_height(positions, rate))
}

/// Constraint mask for a record: its explicit mask when present, else the
/// height rule.
///
/// The height is taken from `reference` when given, so an adsorbate record
/// freezes exactly the layers its clean slab freezes.
pub fn constraint_mask(
    record: &StructureRecord,
    reference: Option<&StructureRecord>,
    rate: f64,
) -> Vec<bool> {
    match &record.fixed {
        Some(mask) => mask.clone(),
        None => {
            let source = reference.unwrap_or(record);
            mask_below(&record.positions, fix_height(&source.positions, rate))
        }
    }
}

/// Moves the geometric center of the atoms to the center of the cell.
///
/// **Invariant**: Modifies positions in-place. Does NOT reorder atoms.
pub fn center_in_cell(geometry: &mut Geometry) {
    let n = geometry.positions.len() as f64;
    if n == 0.0 {
        return;
    }

    let mut center = Vector3::zeros();
    for p in &geometry.positions {
        center += p.coords;
    }
    center /= n;

    let target = match &geometry.lattice {
        Some(lat) => lat.to_cartesian(&Point3::new(0.5, 0.5, 0.5)).coords,
        None => Vector3::zeros(),
    };

    let shift = target - center;
    for p in &mut geometry.positions {
        *p += shift;
    }
}
