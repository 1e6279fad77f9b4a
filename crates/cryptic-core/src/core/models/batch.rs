use super::atom::{AtomRecord, Element};
use super::residue::{AminoAcid, ResidueRecord, SecondaryStructure};
use crate::core::utils::geometry::centroid;
use nalgebra::Point3;
use thiserror::Error;

/// Structural-shape violations detected when a batch is assembled.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BatchError {
    #[error("batch contains no atoms")]
    NoAtoms,

    #[error("batch contains no residues")]
    NoResidues,

    #[error("residue at position {position} carries index {index}; indices must be dense from 0")]
    NonDenseIndex { position: usize, index: usize },

    #[error(
        "residue {residue} has atom range {start}..{end}, expected it to start at {expected}"
    )]
    NonContiguousRange {
        residue: usize,
        start: usize,
        end: usize,
        expected: usize,
    },

    #[error("residue ranges cover {covered} atoms but the batch holds {atom_count}")]
    AtomCountMismatch { covered: usize, atom_count: usize },

    #[error("atom {atom} claims residue {claimed} but lies in the range of residue {owner}")]
    AtomResidueMismatch {
        atom: usize,
        claimed: usize,
        owner: usize,
    },

    #[error("atom {atom} references residue {residue}, but only {residue_count} residues exist")]
    ResidueOutOfBounds {
        atom: usize,
        residue: usize,
        residue_count: usize,
    },

    #[error("atoms are not ordered by residue: atom {atom} belongs to residue {residue} after residue {previous}")]
    UnorderedAtoms {
        atom: usize,
        residue: usize,
        previous: usize,
    },

    #[error("atom {atom} has a non-finite {field}")]
    NonFinite { atom: usize, field: &'static str },

    #[error("field '{field}' has {actual} entries, expected {expected}")]
    FieldLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("atom {atom} was added before any residue was started")]
    OrphanAtom { atom: usize },

    #[error("ensemble needs at least 2 conformers, got {count}")]
    TooFewConformers { count: usize },
}

/// One structure in the flat, residue-ordered layout handed over by the ingestor.
///
/// Every array is required; lengths are checked against `atom_count` and
/// `residue_count` and nothing is defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatBatch {
    pub id: String,
    pub atom_count: usize,
    pub residue_count: usize,
    /// `x, y, z` per atom.
    pub positions: Vec<f32>,
    pub elements: Vec<Element>,
    pub atom_names: Vec<String>,
    pub atom_residue_indices: Vec<usize>,
    pub vdw_radii: Vec<f32>,
    pub partial_charges: Vec<f32>,
    pub residue_types: Vec<AminoAcid>,
    pub chain_ids: Vec<char>,
    pub secondary_structure: Vec<SecondaryStructure>,
}

/// Atoms and residues of one structure, packed in canonical residue order.
///
/// Residue `i` owns the contiguous atom slice `residues[i].atom_range`, and that
/// ordering is the row ordering of every per-residue buffer downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedBatch {
    id: String,
    atoms: Vec<AtomRecord>,
    residues: Vec<ResidueRecord>,
}

impl PackedBatch {
    pub fn new(
        id: impl Into<String>,
        atoms: Vec<AtomRecord>,
        residues: Vec<ResidueRecord>,
    ) -> Result<Self, BatchError> {
        if atoms.is_empty() {
            return Err(BatchError::NoAtoms);
        }
        if residues.is_empty() {
            return Err(BatchError::NoResidues);
        }

        let mut cursor = 0;
        for (position, residue) in residues.iter().enumerate() {
            if residue.index != position {
                return Err(BatchError::NonDenseIndex {
                    position,
                    index: residue.index,
                });
            }
            let range = &residue.atom_range;
            if range.start != cursor || range.end < range.start || range.end > atoms.len() {
                return Err(BatchError::NonContiguousRange {
                    residue: position,
                    start: range.start,
                    end: range.end,
                    expected: cursor,
                });
            }
            for (atom_idx, atom) in atoms[range.clone()].iter().enumerate() {
                if atom.residue_index != position {
                    return Err(BatchError::AtomResidueMismatch {
                        atom: range.start + atom_idx,
                        claimed: atom.residue_index,
                        owner: position,
                    });
                }
            }
            cursor = range.end;
        }
        if cursor != atoms.len() {
            return Err(BatchError::AtomCountMismatch {
                covered: cursor,
                atom_count: atoms.len(),
            });
        }

        for (idx, atom) in atoms.iter().enumerate() {
            if !atom.position.coords.iter().all(|c| c.is_finite()) {
                return Err(BatchError::NonFinite {
                    atom: idx,
                    field: "position",
                });
            }
            if !atom.vdw_radius.is_finite() {
                return Err(BatchError::NonFinite {
                    atom: idx,
                    field: "vdw_radius",
                });
            }
            if !atom.partial_charge.is_finite() {
                return Err(BatchError::NonFinite {
                    atom: idx,
                    field: "partial_charge",
                });
            }
        }

        Ok(Self {
            id: id.into(),
            atoms,
            residues,
        })
    }

    /// Assembles a batch from the flat array layout. Residue atom ranges are
    /// derived from the per-atom residue indices, which must be non-decreasing.
    pub fn from_flat(flat: FlatBatch) -> Result<Self, BatchError> {
        let FlatBatch {
            id,
            atom_count,
            residue_count,
            positions,
            elements,
            atom_names,
            atom_residue_indices,
            vdw_radii,
            partial_charges,
            residue_types,
            chain_ids,
            secondary_structure,
        } = flat;

        check_len("positions", atom_count * 3, positions.len())?;
        check_len("elements", atom_count, elements.len())?;
        check_len("atom_names", atom_count, atom_names.len())?;
        check_len("atom_residue_indices", atom_count, atom_residue_indices.len())?;
        check_len("vdw_radii", atom_count, vdw_radii.len())?;
        check_len("partial_charges", atom_count, partial_charges.len())?;
        check_len("residue_types", residue_count, residue_types.len())?;
        check_len("chain_ids", residue_count, chain_ids.len())?;
        check_len("secondary_structure", residue_count, secondary_structure.len())?;

        let mut starts = vec![atom_count; residue_count + 1];
        let mut previous = 0;
        for (atom, &residue) in atom_residue_indices.iter().enumerate() {
            if residue >= residue_count {
                return Err(BatchError::ResidueOutOfBounds {
                    atom,
                    residue,
                    residue_count,
                });
            }
            if residue < previous {
                return Err(BatchError::UnorderedAtoms {
                    atom,
                    residue,
                    previous,
                });
            }
            if starts[residue] == atom_count {
                starts[residue] = atom;
            }
            previous = residue;
        }
        // Residues without atoms start where the next populated residue starts.
        for r in (0..residue_count).rev() {
            if starts[r] == atom_count {
                starts[r] = starts[r + 1];
            }
        }

        let residues = (0..residue_count)
            .map(|r| {
                ResidueRecord::new(
                    r,
                    residue_types[r],
                    chain_ids[r],
                    starts[r]..starts[r + 1],
                    secondary_structure[r],
                )
            })
            .collect::<Vec<_>>();

        let atoms = atom_names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let residue = atom_residue_indices[i];
                let position =
                    Point3::new(positions[3 * i], positions[3 * i + 1], positions[3 * i + 2]);
                AtomRecord::new(&name, elements[i], position, residue, chain_ids[residue])
                    .with_vdw_radius(vdw_radii[i])
                    .with_partial_charge(partial_charges[i])
            })
            .collect::<Vec<_>>();

        Self::new(id, atoms, residues)
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn atoms(&self) -> &[AtomRecord] {
        &self.atoms
    }

    #[inline]
    pub fn residues(&self) -> &[ResidueRecord] {
        &self.residues
    }

    #[inline]
    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    #[inline]
    pub fn residue_count(&self) -> usize {
        self.residues.len()
    }

    pub fn residue_atoms(&self, residue: usize) -> &[AtomRecord] {
        self.residues
            .get(residue)
            .map(|r| &self.atoms[r.atom_range.clone()])
            .unwrap_or(&[])
    }

    pub fn find_atom(&self, residue: usize, name: &str) -> Option<&AtomRecord> {
        self.residue_atoms(residue)
            .iter()
            .find(|atom| atom.name.trim() == name)
    }

    pub fn atom_position(&self, residue: usize, name: &str) -> Option<Point3<f64>> {
        self.find_atom(residue, name).map(|a| a.position.cast())
    }

    /// The residue's CA position, falling back to the centroid of its atoms.
    pub fn anchor_position(&self, residue: usize) -> Option<Point3<f64>> {
        self.atom_position(residue, "CA").or_else(|| {
            centroid(
                self.residue_atoms(residue)
                    .iter()
                    .map(|a| a.position.cast()),
            )
        })
    }

    /// Centroid of the residue's heavy side-chain atoms, falling back to
    /// [`anchor_position`](Self::anchor_position) (glycine, truncated side chains).
    pub fn sidechain_centroid(&self, residue: usize) -> Option<Point3<f64>> {
        centroid(
            self.residue_atoms(residue)
                .iter()
                .filter(|a| a.is_sidechain())
                .map(|a| a.position.cast()),
        )
        .or_else(|| self.anchor_position(residue))
    }

    /// One-letter sequence in residue order.
    pub fn sequence(&self) -> String {
        self.residues
            .iter()
            .map(|r| r.amino_acid.one_letter())
            .collect()
    }

    /// Size of the packed representation as it would be uploaded.
    pub fn packed_bytes(&self) -> usize {
        self.atoms.len() * std::mem::size_of::<AtomRecord>()
            + self.residues.len() * std::mem::size_of::<ResidueRecord>()
    }
}

fn check_len(field: &'static str, expected: usize, actual: usize) -> Result<(), BatchError> {
    if expected != actual {
        return Err(BatchError::FieldLength {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}
