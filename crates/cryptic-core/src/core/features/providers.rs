use super::slots::ProviderBlock;
use crate::core::models::batch::PackedBatch;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// An upstream module that supplies one block of per-residue features.
///
/// `features` returns `residue_count * block().width()` values, residue-major.
/// Only the length and finiteness of the output are checked; what the numbers
/// mean is the provider's business.
pub trait FeatureProvider: Send + Sync {
    fn name(&self) -> &str;

    fn block(&self) -> ProviderBlock;

    fn features(&self, batch: &PackedBatch) -> Vec<f32>;
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error(
        "provider '{provider}' for block '{block}' returned {actual} values, expected {expected}"
    )]
    Length {
        provider: String,
        block: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(
        "provider '{provider}' for block '{block}' returned a non-finite value at residue {residue}, column {column}"
    )]
    NonFinite {
        provider: String,
        block: &'static str,
        residue: usize,
        column: usize,
    },

    #[error("block '{block}' already has provider '{existing}'")]
    Duplicate {
        block: &'static str,
        existing: String,
    },
}

/// Validated output of one provider, ready to be uploaded with its batch.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxiliaryBlock {
    pub block: ProviderBlock,
    pub provider: String,
    /// `residue_count * block.width()` values, residue-major.
    pub values: Vec<f32>,
}

impl AuxiliaryBlock {
    pub fn row(&self, residue: usize) -> &[f32] {
        let width = self.block.width();
        &self.values[residue * width..(residue + 1) * width]
    }
}

/// At most one provider per block. Blocks without a provider are filled by the
/// fusion stage's built-in descriptors.
#[derive(Default)]
pub struct ProviderSet {
    providers: BTreeMap<ProviderBlock, Box<dyn FeatureProvider>>,
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.providers.iter().map(|(b, p)| (b.name(), p.name())))
            .finish()
    }
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Box<dyn FeatureProvider>) -> Result<(), ProviderError> {
        let block = provider.block();
        if let Some(existing) = self.providers.get(&block) {
            return Err(ProviderError::Duplicate {
                block: block.name(),
                existing: existing.name().to_string(),
            });
        }
        self.providers.insert(block, provider);
        Ok(())
    }

    pub fn with_provider(mut self, provider: Box<dyn FeatureProvider>) -> Result<Self, ProviderError> {
        self.register(provider)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn covers(&self, block: ProviderBlock) -> bool {
        self.providers.contains_key(&block)
    }

    /// Runs every registered provider against `batch`, in block order.
    pub fn collect(&self, batch: &PackedBatch) -> Result<Vec<AuxiliaryBlock>, ProviderError> {
        self.providers
            .iter()
            .map(|(&block, provider)| {
                let values = provider.features(batch);
                validate_block(provider.name(), block, batch.residue_count(), &values)?;
                Ok(AuxiliaryBlock {
                    block,
                    provider: provider.name().to_string(),
                    values,
                })
            })
            .collect()
    }
}

fn validate_block(
    provider: &str,
    block: ProviderBlock,
    residue_count: usize,
    values: &[f32],
) -> Result<(), ProviderError> {
    let width = block.width();
    let expected = residue_count * width;
    if values.len() != expected {
        return Err(ProviderError::Length {
            provider: provider.to_string(),
            block: block.name(),
            expected,
            actual: values.len(),
        });
    }
    if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
        return Err(ProviderError::NonFinite {
            provider: provider.to_string(),
            block: block.name(),
            residue: idx / width,
            column: idx % width,
        });
    }
    Ok(())
}
