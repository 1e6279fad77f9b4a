//! # Core Models Module
//!
//! Data structures describing one structure as it enters the pipeline.
//!
//! ## Key Components
//!
//! - [`atom`] - Atom records with element, position, radius and partial charge
//! - [`residue`] - Amino-acid types, property tables and residue records
//! - [`batch`] - The packed, residue-ordered batch and its shape validation
//! - [`builder`] - Residue-by-residue batch construction
//! - [`ensemble`] - Optional conformational variants of a batch
//!
//! ## Usage
//!
//! ```ignore
//! use cryptic::core::models::builder::BatchBuilder;
//!
//! let mut builder = BatchBuilder::new("1ABC");
//! builder
//!     .start_residue(AminoAcid::Asparagine, 'A', SecondaryStructure::Coil)
//!     .add_atom("CA", Element::C, Point3::new(0.0, 0.0, 0.0), 0.0);
//! let batch = builder.build()?;
//! ```

pub mod atom;
pub mod batch;
pub mod builder;
pub mod ensemble;
pub mod residue;
