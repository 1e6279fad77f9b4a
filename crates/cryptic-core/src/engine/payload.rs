use super::error::EngineError;
use crate::core::features::providers::{AuxiliaryBlock, ProviderSet};
use crate::core::features::slots::ProviderBlock;
use crate::core::models::batch::PackedBatch;
use crate::core::models::ensemble::ConformationalEnsemble;
use tracing::debug;

/// Everything uploaded for one structure: the batch, the validated outputs of
/// any registered feature providers and an optional conformational ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct StructurePayload {
    batch: PackedBatch,
    auxiliary: Vec<AuxiliaryBlock>,
    ensemble: Option<ConformationalEnsemble>,
}

impl StructurePayload {
    /// A payload with no provider blocks and no ensemble.
    pub fn from_batch(batch: PackedBatch) -> Self {
        Self {
            batch,
            auxiliary: Vec::new(),
            ensemble: None,
        }
    }

    /// Runs `providers` against `batch` and checks the ensemble shape.
    pub fn prepare(
        batch: PackedBatch,
        providers: &ProviderSet,
        ensemble: Option<ConformationalEnsemble>,
    ) -> Result<Self, EngineError> {
        let auxiliary = providers
            .collect(&batch)
            .map_err(|source| EngineError::Provider {
                batch: batch.id().to_string(),
                source,
            })?;
        if let Some(ensemble) = &ensemble {
            ensemble
                .validate_against(&batch)
                .map_err(|source| EngineError::InvalidBatch {
                    batch: batch.id().to_string(),
                    source,
                })?;
        }
        debug!(
            batch = batch.id(),
            provider_blocks = auxiliary.len(),
            conformers = ensemble.as_ref().map_or(0, |e| e.conformer_count()),
            "Prepared structure payload."
        );
        Ok(Self {
            batch,
            auxiliary,
            ensemble,
        })
    }

    #[inline]
    pub fn id(&self) -> &str {
        self.batch.id()
    }

    #[inline]
    pub fn batch(&self) -> &PackedBatch {
        &self.batch
    }

    pub fn auxiliary(&self, block: ProviderBlock) -> Option<&AuxiliaryBlock> {
        self.auxiliary.iter().find(|a| a.block == block)
    }

    #[inline]
    pub fn ensemble(&self) -> Option<&ConformationalEnsemble> {
        self.ensemble.as_ref()
    }

    pub fn packed_bytes(&self) -> usize {
        self.batch.packed_bytes()
            + self
                .auxiliary
                .iter()
                .map(|a| a.values.len() * std::mem::size_of::<f32>())
                .sum::<usize>()
            + self.ensemble.as_ref().map_or(0, |e| e.packed_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::providers::FeatureProvider;
    use crate::engine::error::ErrorKind;
    use crate::test_support::{lattice_batch, lattice_ensemble};

    struct ZeroModes;

    impl FeatureProvider for ZeroModes {
        fn name(&self) -> &str {
            "zero-modes"
        }
        fn block(&self) -> ProviderBlock {
            ProviderBlock::Modes
        }
        fn features(&self, batch: &PackedBatch) -> Vec<f32> {
            vec![0.0; batch.residue_count() * ProviderBlock::Modes.width()]
        }
    }

    #[test]
    fn prepare_collects_provider_blocks() {
        let batch = lattice_batch("payload", 12, 80, 1);
        let providers = ProviderSet::new()
            .with_provider(Box::new(ZeroModes))
            .unwrap();
        let payload = StructurePayload::prepare(batch, &providers, None).unwrap();
        assert!(payload.auxiliary(ProviderBlock::Modes).is_some());
        assert!(payload.auxiliary(ProviderBlock::Sampling).is_none());
        assert!(payload.ensemble().is_none());
        assert!(payload.packed_bytes() > payload.batch().packed_bytes());
    }

    #[test]
    fn ensemble_for_a_different_structure_is_a_data_error() {
        let small = lattice_batch("small", 5, 30, 0);
        let large = lattice_batch("large", 6, 36, 0);
        let ensemble = lattice_ensemble(&small, 3, 0.2);
        let err = StructurePayload::prepare(large, &ProviderSet::new(), Some(ensemble)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(err.to_string().contains("'large'"));
    }
}
