//! # Core Module
//!
//! Stateless building blocks shared by every pipeline stage.
//!
//! - **Structure Representation** ([`models`]) - Atom and residue records, the packed
//!   per-structure batch and optional conformational ensembles
//! - **Feature Contract** ([`features`]) - Slot layout of the fused, cryptic and merged
//!   per-residue vectors, and the auxiliary provider blocks
//! - **Utilities** ([`utils`]) - Geometry helpers and residue/atom property tables
//!
//! Nothing in this module performs I/O or holds mutable state; the ingestor that fills a
//! [`models::batch::PackedBatch`] lives outside the crate and is consumed through the
//! constructors defined here.

pub mod features;
pub mod models;
pub mod utils;
