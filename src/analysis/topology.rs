use std::collections::HashSet;

use nalgebra::Point3;

use crate::core::domain::Lattice;
use crate::core::spatial;

/// A pair of atoms closer than the bond cutoff in the reference geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bond {
    pub i: usize,
    pub j: usize,
    pub length: f64,
}

/// Reference bond graph, built once from a structure's initial geometry.
///
/// Distances follow the minimum image convention when a lattice is present,
/// so a bond across the cell boundary is not mistaken for a broken one.
#[derive(Debug, Clone)]
pub struct BondGraph {
    cutoff: f64,
    lattice: Option<Lattice>,
    bonds: Vec<Bond>,
}

impl BondGraph {
    pub fn new(positions: &[Point3<f64>], lattice: Option<&Lattice>, cutoff: f64) -> Self {
        let n = positions.len();
        let r_sq = cutoff * cutoff;
        let mut bonds = Vec::new();

        for i in 0..n {
            for j in (i + 1)..n {
                let dist_sq = spatial::distance_sq(&positions[i], &positions[j], lattice);
                // Coincident atoms carry no usable reference length.
                if dist_sq < r_sq && dist_sq > 1e-16 {
                    bonds.push(Bond { i, j, length: dist_sq.sqrt() });
                }
            }
        }

        Self {
            cutoff,
            lattice: lattice.cloned(),
            bonds,
        }
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    pub fn len(&self) -> usize {
        self.bonds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bonds.is_empty()
    }

    /// Maximum relative bond-length change against `fin`.
    ///
    /// Bonds present in both geometries contribute `|d - d0| / d0`; a bond
    /// broken in `fin`, or one newly formed there, counts as 1.0.
    pub fn max_relative_change(&self, fin: &[Point3<f64>]) -> f64 {
        let lattice = self.lattice.as_ref();
        let r_sq = self.cutoff * self.cutoff;
        let mut worst: f64 = 0.0;

        let mut reference = HashSet::with_capacity(self.bonds.len());
        for bond in &self.bonds {
            reference.insert((bond.i, bond.j));
            let d_sq = spatial::distance_sq(&fin[bond.i], &fin[bond.j], lattice);
            let change = if d_sq < r_sq {
                (d_sq.sqrt() - bond.length).abs() / bond.length
            } else {
                1.0
            };
            worst = worst.max(change);
        }

        if worst >= 1.0 {
            return worst;
        }

        let n = fin.len();
        for i in 0..n {
            for j in (i + 1)..n {
                if reference.contains(&(i, j)) {
                    continue;
                }
                if spatial::distance_sq(&fin[i], &fin[j], lattice) < r_sq {
                    return worst.max(1.0);
                }
            }
        }
        worst
    }
}
