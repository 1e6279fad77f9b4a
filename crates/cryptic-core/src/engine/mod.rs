//! # Engine Module
//!
//! The computational core: everything between a validated [`PackedBatch`] and
//! per-residue action values, plus the machinery that trains the network.
//!
//! ## Overview
//!
//! A structure is uploaded once into its own [`arena::DeviceArena`]. The five
//! stages in [`stages`] exchange buffer handles inside that arena, and only the
//! final Q-value matrix is downloaded. [`pipeline::Pipeline`] drives that chain;
//! [`trainer::EvolutionTrainer`] drives the pipeline across an antithetic
//! population of parameter vectors.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Stage parameters, network shape and trainer settings
//! - **Buffers** ([`arena`], [`payload`]) - Per-structure device arena and the uploaded payload
//! - **Stages** ([`stages`]) - Masking, fusion, cryptic scores, merge and inference
//! - **Network** ([`network`], [`checkpoint`]) - Parameter layout, snapshots and persistence
//! - **Training** ([`evolution`], [`fitness`], [`trainer`]) - Population sampling, rewards and updates
//! - **Progress Monitoring** ([`progress`]) - Callback-based progress events
//! - **Error Handling** ([`error`]) - The DataError / IntegrityError / DeviceError /
//!   TrainingDivergenceError taxonomy
//!
//! [`PackedBatch`]: crate::core::models::batch::PackedBatch

pub mod arena;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod evolution;
pub mod fitness;
pub mod network;
pub mod output;
pub mod payload;
pub mod pipeline;
pub mod progress;
pub(crate) mod spatial;
pub mod stages;
pub mod trainer;
