//! Pipeline stages. Each stage reads its inputs from a [`DeviceArena`](super::arena::DeviceArena)
//! by handle and stores its output there.

pub mod cryptic;
pub mod fusion;
pub mod inference;
pub mod mask;
pub mod merge;
