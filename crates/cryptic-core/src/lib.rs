//! # Cryptic Core Library
//!
//! A zero-copy inference pipeline that turns a packed protein structure into
//! per-residue feature vectors, scores them with a dueling value network, and
//! trains that network with a gradient-free evolution strategy.
//!
//! ## Architectural Philosophy
//!
//! The library keeps the same strict three-layer split throughout:
//!
//! - **[`core`]: The Foundation.** Immutable data models (`AtomRecord`,
//!   `ResidueRecord`, `PackedBatch`), residue property tables, geometry helpers
//!   and the fixed feature slot contract.
//!
//! - **[`engine`]: The Logic Core.** The per-structure device arena, the five
//!   pipeline stages (masking, feature fusion, cryptic features, merge,
//!   inference), network parameters and checkpoints, fitness functions and the
//!   evolution-strategy trainer.
//!
//! - **[`workflows`]: The Public API.** Entry points that tie `engine` and `core`
//!   together: single-structure inference, bounded concurrent inference over many
//!   structures, and the training loop.

pub mod core;
pub mod engine;
pub mod workflows;

#[cfg(test)]
pub(crate) mod test_support;
