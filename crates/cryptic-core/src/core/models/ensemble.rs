use super::batch::{BatchError, PackedBatch};
use crate::core::utils::geometry::root_mean_square_fluctuation;
use nalgebra::Point3;

/// Alternative atom positions for one structure, as supplied by an upstream
/// conformational sampler. Conformer `c` holds one position per atom of the
/// batch, in batch atom order.
#[derive(Debug, Clone, PartialEq)]
pub struct ConformationalEnsemble {
    conformers: Vec<Vec<Point3<f32>>>,
}

impl ConformationalEnsemble {
    pub fn new(conformers: Vec<Vec<Point3<f32>>>) -> Result<Self, BatchError> {
        if conformers.len() < 2 {
            return Err(BatchError::TooFewConformers {
                count: conformers.len(),
            });
        }
        let atom_count = conformers[0].len();
        for (c, conformer) in conformers.iter().enumerate() {
            if conformer.len() != atom_count {
                return Err(BatchError::FieldLength {
                    field: "conformer positions",
                    expected: atom_count,
                    actual: conformer.len(),
                });
            }
            if let Some(atom) = conformer
                .iter()
                .position(|p| !p.coords.iter().all(|v| v.is_finite()))
            {
                tracing::debug!(conformer = c, atom, "Non-finite conformer position");
                return Err(BatchError::NonFinite {
                    atom,
                    field: "conformer position",
                });
            }
        }
        Ok(Self { conformers })
    }

    /// Checks that every conformer covers exactly the batch's atoms.
    pub fn validate_against(&self, batch: &PackedBatch) -> Result<(), BatchError> {
        let atom_count = self.atom_count();
        if atom_count != batch.atom_count() {
            return Err(BatchError::FieldLength {
                field: "conformer positions",
                expected: batch.atom_count(),
                actual: atom_count,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn conformer_count(&self) -> usize {
        self.conformers.len()
    }

    #[inline]
    pub fn atom_count(&self) -> usize {
        self.conformers.first().map_or(0, Vec::len)
    }

    pub fn conformers(&self) -> &[Vec<Point3<f32>>] {
        &self.conformers
    }

    /// Positions of one atom across all conformers.
    pub fn atom_trajectory(&self, atom: usize) -> Vec<Point3<f64>> {
        self.conformers
            .iter()
            .filter_map(|c| c.get(atom).map(|p| p.cast()))
            .collect()
    }

    /// Root-mean-square fluctuation of one atom about its mean position.
    pub fn atom_rmsf(&self, atom: usize) -> Option<f64> {
        root_mean_square_fluctuation(&self.atom_trajectory(atom))
    }

    pub fn packed_bytes(&self) -> usize {
        self.conformers.len() * self.atom_count() * std::mem::size_of::<Point3<f32>>()
    }
}
