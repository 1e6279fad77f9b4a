use crate::core::models::batch::PackedBatch;
use crate::core::models::residue::AminoAcid;
use crate::engine::arena::{BufferId, DeviceArena, FeatureMatrix};
use crate::engine::config::MaskConfig;
use crate::engine::error::EngineError;
use crate::engine::spatial::PointIndex;
use tracing::{debug, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub const STAGE: &str = "mask";

/// Whether residue `i` starts an N-linked glycosylation sequon `N-[^P]-[ST]`
/// within a single chain.
pub fn is_sequon_start(batch: &PackedBatch, i: usize) -> bool {
    let residues = batch.residues();
    if i + 2 >= residues.len() {
        return false;
    }
    let (n, x, st) = (&residues[i], &residues[i + 1], &residues[i + 2]);
    n.amino_acid == AminoAcid::Asparagine
        && x.amino_acid != AminoAcid::Proline
        && matches!(st.amino_acid, AminoAcid::Serine | AminoAcid::Threonine)
        && n.chain_id == x.chain_id
        && x.chain_id == st.chain_id
}

/// Per-residue occlusion weights in `[0, 1]`.
///
/// Only sequon asparagines can be masked. Their weight is the atom count within
/// `cutoff_radius` of the side-chain centroid divided by `saturation_density`,
/// or 0 below `min_density`.
pub fn compute_mask(batch: &PackedBatch, config: &MaskConfig) -> Result<Vec<f32>, EngineError> {
    if let Some(empty) = batch.residues().iter().find(|r| r.is_empty()) {
        return Err(EngineError::integrity(
            batch.id(),
            STAGE,
            format!("residue {} has an empty atom range", empty.index),
        ));
    }

    let index = PointIndex::new(batch.atoms().iter().map(|a| a.position.cast()).collect());
    let residue_indices: Vec<usize> = (0..batch.residue_count()).collect();

    #[cfg(not(feature = "parallel"))]
    let iterator = residue_indices.iter();

    #[cfg(feature = "parallel")]
    let iterator = residue_indices.par_iter();

    let weights = iterator
        .map(|&i| {
            if !is_sequon_start(batch, i) {
                return Ok(0.0);
            }
            let center = batch.sidechain_centroid(i).ok_or_else(|| {
                EngineError::integrity(batch.id(), STAGE, format!("residue {i} has no atoms"))
            })?;
            let density = index.count_within(&center, config.cutoff_radius);
            if density < config.min_density {
                return Ok(0.0);
            }
            Ok((density as f32 / config.saturation_density as f32).min(1.0))
        })
        .collect::<Result<Vec<f32>, EngineError>>()?;

    Ok(weights)
}

#[instrument(skip_all, name = "mask_stage")]
pub fn run(
    arena: &mut DeviceArena<'_>,
    structure: BufferId,
    config: &MaskConfig,
) -> Result<BufferId, EngineError> {
    let payload = arena.structure(structure, STAGE)?;
    let weights = compute_mask(payload.batch(), config)?;
    let masked = weights.iter().filter(|&&w| w > 0.0).count();
    debug!(
        batch = payload.id(),
        residues = weights.len(),
        masked,
        "Glycan mask computed."
    );
    let rows = weights.len();
    let matrix = FeatureMatrix::from_vec(rows, 1, weights)
        .ok_or_else(|| EngineError::integrity(payload.id(), STAGE, "mask length mismatch"))?;
    arena.store(STAGE, matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::atom::{AtomRecord, Element};
    use crate::core::models::builder::BatchBuilder;
    use crate::core::models::residue::{ResidueRecord, SecondaryStructure};
    use crate::engine::error::ErrorKind;
    use crate::test_support::{lattice_batch, planar_batch, sequon_starts};
    use nalgebra::Point3;

    fn peptide(sequence: &str) -> PackedBatch {
        let mut builder = BatchBuilder::new("peptide");
        for (i, code) in sequence.chars().enumerate() {
            let aa = AminoAcid::from_one_letter(code).unwrap();
            let x = i as f32 * 3.8;
            builder
                .start_residue(aa, 'A', SecondaryStructure::Coil)
                .add_atom("N", Element::N, Point3::new(x - 1.2, 0.3, 0.0), 0.0)
                .add_atom("CA", Element::C, Point3::new(x, 0.0, 0.01 * i as f32), 0.0)
                .add_atom("CB", Element::C, Point3::new(x, -1.5, 0.5), 0.0);
        }
        builder.build().unwrap()
    }

    #[test]
    fn sequon_requires_non_proline_then_serine_or_threonine() {
        let batch = peptide("ANGSANPTANAT");
        let starts: Vec<usize> = (0..batch.residue_count())
            .filter(|&i| is_sequon_start(&batch, i))
            .collect();
        assert_eq!(starts, vec![1, 9]);
    }

    #[test]
    fn sequon_cannot_span_chains() {
        let mut builder = BatchBuilder::new("chains");
        for (i, (aa, chain)) in [
            (AminoAcid::Asparagine, 'A'),
            (AminoAcid::Glycine, 'B'),
            (AminoAcid::Serine, 'B'),
        ]
        .into_iter()
        .enumerate()
        {
            builder
                .start_residue(aa, chain, SecondaryStructure::Coil)
                .add_atom("CA", Element::C, Point3::new(i as f32 * 3.8, 0.0, 0.0), 0.0);
        }
        let batch = builder.build().unwrap();
        assert!(!is_sequon_start(&batch, 0));
    }

    #[test]
    fn sparse_sequons_stay_unmasked_below_min_density() {
        let batch = peptide("ANGSA");
        let mask = compute_mask(&batch, &MaskConfig::default()).unwrap();
        assert_eq!(mask, vec![0.0; 5]);

        let relaxed = MaskConfig {
            cutoff_radius: 10.0,
            min_density: 4,
            saturation_density: 30,
        };
        let mask = compute_mask(&batch, &relaxed).unwrap();
        assert!(mask[1] > 0.0 && mask[1] <= 1.0);
        assert_eq!(mask.iter().filter(|&&w| w > 0.0).count(), 1);
    }

    #[test]
    fn dense_sequons_are_masked_and_weights_stay_in_unit_interval() {
        let batch = lattice_batch("dense", 216, 1728, 12);
        let mask = compute_mask(&batch, &MaskConfig::default()).unwrap();
        assert_eq!(mask.len(), 216);
        assert_eq!(mask.iter().filter(|&&w| w > 0.0).count(), 12);
        assert!(mask.iter().all(|&w| (0.0..=1.0).contains(&w)));
    }

    #[test]
    fn mask_is_a_pure_function_of_the_batch() {
        let batch = lattice_batch("pure", 64, 512, 4);
        let config = MaskConfig::default();
        assert_eq!(
            compute_mask(&batch, &config).unwrap(),
            compute_mask(&batch, &config).unwrap()
        );
    }

    #[test]
    fn empty_residue_is_an_integrity_error() {
        let atoms = vec![
            AtomRecord::new("CA", Element::C, Point3::origin(), 0, 'A'),
            AtomRecord::new("CA", Element::C, Point3::new(7.6, 0.0, 0.0), 2, 'A'),
        ];
        let residues = vec![
            ResidueRecord::new(0, AminoAcid::Alanine, 'A', 0..1, SecondaryStructure::Coil),
            ResidueRecord::new(1, AminoAcid::Alanine, 'A', 1..1, SecondaryStructure::Coil),
            ResidueRecord::new(2, AminoAcid::Alanine, 'A', 1..2, SecondaryStructure::Coil),
        ];
        let batch = PackedBatch::new("hollow", atoms, residues).unwrap();
        let err = compute_mask(&batch, &MaskConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(err.to_string().contains("residue 1"));
    }

    #[test]
    fn flat_structure_with_shared_coordinates_masks_its_sequons() {
        let batch = planar_batch("flat", 64, 4);
        let mask = compute_mask(&batch, &MaskConfig::default()).unwrap();
        let masked: Vec<usize> = (0..mask.len()).filter(|&i| mask[i] > 0.0).collect();
        assert_eq!(masked, sequon_starts(64, 4));
        assert!(mask.iter().all(|&w| (0.0..=1.0).contains(&w)));
    }
}
