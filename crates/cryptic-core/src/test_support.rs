use crate::core::models::atom::{AtomRecord, Element};
use crate::core::models::batch::PackedBatch;
use crate::core::models::ensemble::ConformationalEnsemble;
use crate::core::models::residue::{AminoAcid, ResidueRecord, SecondaryStructure};
use nalgebra::{Point3, Vector3};

const LATTICE_SPACING: f32 = 3.8;

const ATOM_NAMES: [&str; 14] = [
    "N", "CA", "C", "O", "CB", "CG", "CD", "CE", "NZ", "OG", "CG1", "CG2", "CD1", "CD2",
];

const ATOM_OFFSETS: [[f32; 3]; 14] = [
    [-1.2, 0.6, 0.0],
    [0.0, 0.0, 0.0],
    [1.2, 0.6, 0.0],
    [1.5, 1.6, 0.3],
    [0.0, -1.0, 1.1],
    [0.2, -1.4, 1.6],
    [-0.4, -1.2, 1.5],
    [0.6, -0.6, 1.4],
    [-0.8, -0.5, 1.2],
    [0.9, -1.1, 0.4],
    [-0.9, -0.9, -0.6],
    [0.5, -1.5, -0.5],
    [-0.3, 0.9, -1.2],
    [0.8, 0.4, -1.3],
];

fn fractional(x: f64) -> f32 {
    (x - x.floor()) as f32
}

/// Small per-atom offset so that no two atoms share a coordinate on any axis.
fn jitter(atom: usize) -> Vector3<f32> {
    let i = atom as f64 + 1.0;
    Vector3::new(
        fractional(i * 0.618_033_988_7),
        fractional(i * 0.754_877_666_2),
        fractional(i * 0.569_840_291_0),
    ) * 0.05
}

/// Residue positions that start an `N-G-S` sequon.
pub fn sequon_starts(residue_count: usize, sequon_count: usize) -> Vec<usize> {
    if sequon_count == 0 || residue_count < 3 {
        return Vec::new();
    }
    let stride = ((residue_count - 3) / sequon_count).max(3);
    (0..sequon_count)
        .map(|k| 1 + k * stride)
        .filter(|&p| p + 2 < residue_count)
        .collect()
}

/// A compact synthetic structure: residues on a cubic lattice, all alanine
/// except `sequon_count` evenly spaced `N-G-S` motifs.
pub fn lattice_batch(
    id: &str,
    residue_count: usize,
    atom_count: usize,
    sequon_count: usize,
) -> PackedBatch {
    assert!(residue_count > 0 && atom_count >= residue_count);

    let mut sequence = vec![AminoAcid::Alanine; residue_count];
    for p in sequon_starts(residue_count, sequon_count) {
        sequence[p] = AminoAcid::Asparagine;
        sequence[p + 1] = AminoAcid::Glycine;
        sequence[p + 2] = AminoAcid::Serine;
    }

    let side = (residue_count as f64).cbrt().ceil() as usize;
    let base = atom_count / residue_count;
    let remainder = atom_count % residue_count;

    let mut atoms = Vec::with_capacity(atom_count);
    let mut residues = Vec::with_capacity(residue_count);
    for r in 0..residue_count {
        let anchor = Point3::new(
            (r % side) as f32,
            ((r / side) % side) as f32,
            (r / (side * side)) as f32,
        ) * LATTICE_SPACING;
        let n_atoms = base + usize::from(r < remainder);
        let start = atoms.len();
        for j in 0..n_atoms {
            let (name, offset) = if j < ATOM_NAMES.len() {
                (ATOM_NAMES[j].to_string(), Vector3::from(ATOM_OFFSETS[j]))
            } else {
                let t = j as f32;
                (
                    format!("CX{j}"),
                    Vector3::new(t.sin(), t.cos(), (0.7 * t).sin()) * 1.6,
                )
            };
            let element = Element::from_atom_name(&name);
            let charge = match element {
                Element::N => -0.3,
                Element::O => -0.5,
                _ if name == "C" => 0.5,
                _ => 0.05,
            };
            let position = anchor + offset + jitter(atoms.len());
            atoms.push(
                AtomRecord::new(&name, element, position, r, 'A').with_partial_charge(charge),
            );
        }
        let ss = SecondaryStructure::ALL[(r / 5) % SecondaryStructure::ALL.len()];
        residues.push(ResidueRecord::new(
            r,
            sequence[r],
            'A',
            start..atoms.len(),
            ss,
        ));
    }

    PackedBatch::new(id, atoms, residues).expect("lattice fixture must be valid")
}

/// An idealized flat structure: residues on a square grid in the `z = 0`
/// plane with exact offsets, so whole rows of atoms share coordinates on every
/// axis. All alanine except `sequon_count` `N-G-S` motifs.
pub fn planar_batch(id: &str, residue_count: usize, sequon_count: usize) -> PackedBatch {
    const PLANAR_ATOMS: [(&str, [f32; 2]); 5] = [
        ("N", [-1.2, 0.6]),
        ("CA", [0.0, 0.0]),
        ("C", [1.2, 0.6]),
        ("O", [1.5, 1.6]),
        ("CB", [0.0, -1.0]),
    ];

    let mut sequence = vec![AminoAcid::Alanine; residue_count];
    for p in sequon_starts(residue_count, sequon_count) {
        sequence[p] = AminoAcid::Asparagine;
        sequence[p + 1] = AminoAcid::Glycine;
        sequence[p + 2] = AminoAcid::Serine;
    }

    let side = (residue_count as f64).sqrt().ceil() as usize;
    let mut atoms = Vec::with_capacity(residue_count * PLANAR_ATOMS.len());
    let mut residues = Vec::with_capacity(residue_count);
    for r in 0..residue_count {
        let (x, y) = ((r % side) as f32 * LATTICE_SPACING, (r / side) as f32 * LATTICE_SPACING);
        let start = atoms.len();
        for (name, [dx, dy]) in PLANAR_ATOMS {
            let element = Element::from_atom_name(name);
            atoms.push(AtomRecord::new(
                name,
                element,
                Point3::new(x + dx, y + dy, 0.0),
                r,
                'A',
            ));
        }
        residues.push(ResidueRecord::new(
            r,
            sequence[r],
            'A',
            start..atoms.len(),
            SecondaryStructure::Coil,
        ));
    }

    PackedBatch::new(id, atoms, residues).expect("planar fixture must be valid")
}

/// `conformers` identical copies of `batch`'s coordinates.
pub fn repeated_ensemble(batch: &PackedBatch, conformers: usize) -> ConformationalEnsemble {
    let positions: Vec<Point3<f32>> = batch.atoms().iter().map(|a| a.position).collect();
    ConformationalEnsemble::new(vec![positions; conformers])
        .expect("repeated ensemble must be valid")
}

/// Deterministically displaced copies of `batch`; displacement grows with
/// `amplitude` and varies per atom and conformer.
pub fn lattice_ensemble(
    batch: &PackedBatch,
    conformers: usize,
    amplitude: f32,
) -> ConformationalEnsemble {
    let positions = (0..conformers)
        .map(|c| {
            batch
                .atoms()
                .iter()
                .enumerate()
                .map(|(i, atom)| {
                    let phase = (i * 31 + c * 17) as f32;
                    atom.position
                        + Vector3::new(phase.sin(), (1.3 * phase).cos(), (0.7 * phase).sin())
                            * amplitude
                })
                .collect()
        })
        .collect();
    ConformationalEnsemble::new(positions).expect("lattice ensemble must be valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_matches_requested_counts() {
        let batch = lattice_batch("fixture", 570, 4568, 56);
        assert_eq!(batch.residue_count(), 570);
        assert_eq!(batch.atom_count(), 4568);
        let asparagines = batch
            .residues()
            .iter()
            .filter(|r| r.amino_acid == AminoAcid::Asparagine)
            .count();
        assert_eq!(asparagines, 56);
    }

    #[test]
    fn planar_fixture_is_flat_and_unjittered() {
        let batch = planar_batch("flat", 64, 4);
        assert_eq!(batch.atom_count(), 320);
        assert!(batch.atoms().iter().all(|a| a.position.z == 0.0));
        let ensemble = repeated_ensemble(&batch, 3);
        assert_eq!(ensemble.conformer_count(), 3);
        assert!(ensemble.atom_rmsf(0).unwrap() < 1e-9);
    }

    #[test]
    fn sequon_starts_fit_inside_the_chain() {
        let starts = sequon_starts(1798, 283);
        assert_eq!(starts.len(), 283);
        assert!(starts.iter().all(|&p| p + 2 < 1798));
    }
}
