/// Element symbols ordered by atomic number (H = 1 .. Rn = 86).
const SYMBOLS: [&str; 86] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", //
    "Na", "Mg", "Al", "Si", "P", "S", "Cl", "Ar", "K", "Ca", //
    "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", //
    "Ga", "Ge", "As", "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", //
    "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In", "Sn", //
    "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", //
    "Pm", "Sm", "Eu", "Gd", "Tb", "Dy", "Ho", "Er", "Tm", "Yb", //
    "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", //
    "Tl", "Pb", "Bi", "Po", "At", "Rn",
];

/// Atomic number of an element symbol, `None` for unknown symbols.
pub fn atomic_number(symbol: &str) -> Option<u8> {
    SYMBOLS
        .iter()
        .position(|s| *s == symbol)
        .map(|i| (i + 1) as u8)
}

/// Index of the first atom with the highest atomic number.
/// Unknown symbols rank below every known element.
pub fn heaviest_atom(species: &[String]) -> Option<usize> {
    let mut best: Option<(usize, u8)> = None;
    for (i, symbol) in species.iter().enumerate() {
        let z = atomic_number(symbol).unwrap_or(0);
        match best {
            Some((_, best_z)) if z <= best_z => {}
            _ => best = Some((i, z)),
        }
    }
    best.map(|(i, _)| i)
}
