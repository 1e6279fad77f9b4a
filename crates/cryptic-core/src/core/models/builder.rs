use super::atom::{AtomRecord, Element};
use super::batch::{BatchError, PackedBatch};
use super::residue::{AminoAcid, ResidueRecord, SecondaryStructure};
use nalgebra::Point3;

/// Incrementally assembles a [`PackedBatch`] residue by residue.
///
/// Atom ranges and residue indices are assigned as atoms arrive, so the
/// result is contiguous by construction; the usual shape checks still run in
/// [`build`](Self::build).
pub struct BatchBuilder {
    id: String,
    atoms: Vec<AtomRecord>,
    residues: Vec<ResidueRecord>,
    orphan_atom: Option<usize>,
}

impl BatchBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            atoms: Vec::new(),
            residues: Vec::new(),
            orphan_atom: None,
        }
    }

    pub fn start_residue(
        &mut self,
        amino_acid: AminoAcid,
        chain_id: char,
        secondary_structure: SecondaryStructure,
    ) -> &mut Self {
        let start = self.atoms.len();
        let index = self.residues.len();
        self.residues.push(ResidueRecord::new(
            index,
            amino_acid,
            chain_id,
            start..start,
            secondary_structure,
        ));
        self
    }

    pub fn add_atom(
        &mut self,
        name: &str,
        element: Element,
        position: Point3<f32>,
        partial_charge: f32,
    ) -> &mut Self {
        let atom_idx = self.atoms.len();
        match self.residues.last_mut() {
            Some(residue) => {
                let atom = AtomRecord::new(
                    name,
                    element,
                    position,
                    residue.index,
                    residue.chain_id,
                )
                .with_partial_charge(partial_charge);
                self.atoms.push(atom);
                residue.atom_range.end = atom_idx + 1;
            }
            None => {
                self.orphan_atom.get_or_insert(atom_idx);
            }
        }
        self
    }

    pub fn residue_count(&self) -> usize {
        self.residues.len()
    }

    pub fn build(self) -> Result<PackedBatch, BatchError> {
        if let Some(atom) = self.orphan_atom {
            return Err(BatchError::OrphanAtom { atom });
        }
        PackedBatch::new(self.id, self.atoms, self.residues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_assigns_contiguous_ranges() {
        let mut builder = BatchBuilder::new("built");
        builder
            .start_residue(AminoAcid::Glycine, 'A', SecondaryStructure::Coil)
            .add_atom("N", Element::N, Point3::new(0.0, 0.0, 0.0), -0.3)
            .add_atom("CA", Element::C, Point3::new(1.4, 0.0, 0.0), 0.1)
            .start_residue(AminoAcid::Serine, 'A', SecondaryStructure::Strand)
            .add_atom("N", Element::N, Point3::new(2.8, 0.0, 0.0), -0.3)
            .add_atom("CA", Element::C, Point3::new(4.2, 0.0, 0.0), 0.1)
            .add_atom("OG", Element::O, Point3::new(4.2, 1.4, 0.0), -0.6);
        assert_eq!(builder.residue_count(), 2);

        let batch = builder.build().unwrap();
        assert_eq!(batch.residues()[0].atom_range, 0..2);
        assert_eq!(batch.residues()[1].atom_range, 2..5);
        assert_eq!(batch.atoms()[4].residue_index, 1);
        assert_eq!(batch.atoms()[4].partial_charge, -0.6);
    }

    #[test]
    fn atom_before_first_residue_is_an_error() {
        let mut builder = BatchBuilder::new("orphan");
        builder
            .add_atom("CA", Element::C, Point3::origin(), 0.0)
            .start_residue(AminoAcid::Alanine, 'A', SecondaryStructure::Coil)
            .add_atom("CA", Element::C, Point3::origin(), 0.0);
        assert_eq!(
            builder.build().unwrap_err(),
            BatchError::OrphanAtom { atom: 0 }
        );
    }

    #[test]
    fn empty_builder_fails_shape_checks() {
        assert_eq!(
            BatchBuilder::new("empty").build().unwrap_err(),
            BatchError::NoAtoms
        );
    }
}
