//! Slot layout of the per-residue feature vectors.
//!
//! The fused vector has [`FUSED_DIM`] entries, the cryptic vector [`CRYPTIC_DIM`],
//! and the merged vector places them back to back for [`MERGED_DIM`] entries. Every
//! range below is part of the contract with trained network parameters: moving a
//! slot invalidates existing checkpoints.

use std::ops::Range;

pub const FUSED_DIM: usize = 136;
pub const CRYPTIC_DIM: usize = 4;
pub const MERGED_DIM: usize = FUSED_DIM + CRYPTIC_DIM;

// --- Fused: geometric and biophysical descriptors ---

/// Masked relative SASA, masked half-sphere up, masked half-sphere down, mask weight.
pub const EXPOSURE: Range<usize> = 0..4;
/// Depth from protein centroid, CA neighbor burial, raw relative SASA, side-chain reach.
pub const BURIAL: Range<usize> = 4..8;
/// CA virtual angle, virtual torsion sin/cos, inverse curvature radius.
///
/// The angle and radius need both chain neighbors and the torsion also needs
/// the residue after next; missing terms are 0. A defined torsion always has
/// `sin^2 + cos^2 = 1`, so a `(0, 0)` pair marks it absent.
pub const CURVATURE: Range<usize> = 8..12;
/// One-hot over H, G, I, E, B, T, S, Coil.
pub const SECONDARY_STRUCTURE: Range<usize> = 12..20;
/// Atoms within 4/6/8/10/12 A, CAs within 6/8/12 A.
pub const CONTACTS: Range<usize> = 20..28;
/// `(sin, cos, present)` for phi, psi, omega, chi1.
pub const DIHEDRALS: Range<usize> = 28..40;
pub const AMINO_ACID: Range<usize> = 40..60;
pub const HYDRO_CHARGE: Range<usize> = 60..72;
pub const SHAPE: Range<usize> = 72..80;

// --- Fused: auxiliary provider blocks ---

pub const SAMPLING: Range<usize> = 80..96;
pub const BINDING: Range<usize> = 96..108;
pub const MODES: Range<usize> = 108..124;
pub const CONSERVATION: Range<usize> = 124..136;

// --- Cryptic ---

pub const FLEXIBILITY: usize = 0;
pub const POCKET_DEPTH: usize = 1;
pub const EXPOSURE_VARIANCE: usize = 2;
pub const CENTRALITY: usize = 3;

/// Offset of the cryptic scores inside the merged vector.
pub const MERGED_CRYPTIC_OFFSET: usize = FUSED_DIM;

/// Slot ranges of the fused vector that an upstream provider may fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderBlock {
    /// Conformational sampling descriptors.
    Sampling,
    /// Binding-environment descriptors.
    Binding,
    /// Vibrational/normal-mode descriptors.
    Modes,
    /// Evolutionary conservation descriptors.
    Conservation,
}

impl ProviderBlock {
    pub const ALL: [ProviderBlock; 4] = [
        ProviderBlock::Sampling,
        ProviderBlock::Binding,
        ProviderBlock::Modes,
        ProviderBlock::Conservation,
    ];

    pub fn slots(&self) -> Range<usize> {
        match self {
            ProviderBlock::Sampling => SAMPLING,
            ProviderBlock::Binding => BINDING,
            ProviderBlock::Modes => MODES,
            ProviderBlock::Conservation => CONSERVATION,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.slots().len()
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderBlock::Sampling => "sampling",
            ProviderBlock::Binding => "binding",
            ProviderBlock::Modes => "modes",
            ProviderBlock::Conservation => "conservation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fused_ranges_tile_the_vector_without_gaps() {
        let ranges = [
            EXPOSURE,
            BURIAL,
            CURVATURE,
            SECONDARY_STRUCTURE,
            CONTACTS,
            DIHEDRALS,
            AMINO_ACID,
            HYDRO_CHARGE,
            SHAPE,
            SAMPLING,
            BINDING,
            MODES,
            CONSERVATION,
        ];
        let mut cursor = 0;
        for range in ranges {
            assert_eq!(range.start, cursor);
            cursor = range.end;
        }
        assert_eq!(cursor, FUSED_DIM);
    }

    #[test]
    fn merged_dimension_is_fused_plus_cryptic() {
        assert_eq!(MERGED_DIM, 140);
        assert_eq!(MERGED_CRYPTIC_OFFSET + CENTRALITY, 139);
    }

    #[test]
    fn provider_blocks_match_their_slot_ranges() {
        assert_eq!(ProviderBlock::Sampling.width(), 16);
        assert_eq!(ProviderBlock::Binding.width(), 12);
        assert_eq!(ProviderBlock::Modes.width(), 16);
        assert_eq!(ProviderBlock::Conservation.width(), 12);
        assert_eq!(ProviderBlock::Conservation.slots().end, FUSED_DIM);
    }
}
