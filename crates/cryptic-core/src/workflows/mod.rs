//! # Workflows Module
//!
//! Top-level entry points. Each workflow validates its configuration, reports
//! progress and returns a self-contained result.
//!
//! - **Inference** ([`infer`]) - One structure, or many structures under an
//!   in-flight ceiling with pre-dispatch cancellation.
//! - **Training** ([`train`]) - The evolutionary training loop with budget and
//!   plateau stopping and optional checkpointing.

pub mod infer;
pub mod train;

pub use infer::{run as infer, run_many as infer_many};
pub use train::run as train;
