use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unrecognized residue code: '{0}'")]
pub struct ParseResidueError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AminoAcid {
    // --- Aliphatic, Nonpolar ---
    Alanine,
    Glycine,
    Isoleucine,
    Leucine,
    Proline,
    Valine,
    Methionine,

    // --- Aromatic ---
    Phenylalanine,
    Tryptophan,
    Tyrosine,

    // --- Polar, Uncharged ---
    Asparagine,
    Cysteine,
    Glutamine,
    Serine,
    Threonine,

    // --- Charged ---
    Arginine,
    Lysine,
    Histidine,
    AsparticAcid,
    GlutamicAcid,

    /// Non-standard or unresolved residue (`X`).
    Unknown,
}

/// Coarse physico-chemical class used by the sequence-window composition features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResidueClass {
    Aliphatic,
    Aromatic,
    Polar,
    Positive,
    Negative,
    Special,
}

impl ResidueClass {
    pub const ALL: [ResidueClass; 6] = [
        ResidueClass::Aliphatic,
        ResidueClass::Aromatic,
        ResidueClass::Polar,
        ResidueClass::Positive,
        ResidueClass::Negative,
        ResidueClass::Special,
    ];
}

impl AminoAcid {
    /// The 20 standard residues in one-hot order.
    pub const STANDARD: [AminoAcid; 20] = [
        AminoAcid::Alanine,
        AminoAcid::Arginine,
        AminoAcid::Asparagine,
        AminoAcid::AsparticAcid,
        AminoAcid::Cysteine,
        AminoAcid::Glutamine,
        AminoAcid::GlutamicAcid,
        AminoAcid::Glycine,
        AminoAcid::Histidine,
        AminoAcid::Isoleucine,
        AminoAcid::Leucine,
        AminoAcid::Lysine,
        AminoAcid::Methionine,
        AminoAcid::Phenylalanine,
        AminoAcid::Proline,
        AminoAcid::Serine,
        AminoAcid::Threonine,
        AminoAcid::Tryptophan,
        AminoAcid::Tyrosine,
        AminoAcid::Valine,
    ];

    /// Position in [`AminoAcid::STANDARD`]; `None` for [`AminoAcid::Unknown`].
    pub fn one_hot_index(&self) -> Option<usize> {
        Self::STANDARD.iter().position(|aa| aa == self)
    }

    pub fn one_letter(&self) -> char {
        match self {
            AminoAcid::Alanine => 'A',
            AminoAcid::Arginine => 'R',
            AminoAcid::Asparagine => 'N',
            AminoAcid::AsparticAcid => 'D',
            AminoAcid::Cysteine => 'C',
            AminoAcid::Glutamine => 'Q',
            AminoAcid::GlutamicAcid => 'E',
            AminoAcid::Glycine => 'G',
            AminoAcid::Histidine => 'H',
            AminoAcid::Isoleucine => 'I',
            AminoAcid::Leucine => 'L',
            AminoAcid::Lysine => 'K',
            AminoAcid::Methionine => 'M',
            AminoAcid::Phenylalanine => 'F',
            AminoAcid::Proline => 'P',
            AminoAcid::Serine => 'S',
            AminoAcid::Threonine => 'T',
            AminoAcid::Tryptophan => 'W',
            AminoAcid::Tyrosine => 'Y',
            AminoAcid::Valine => 'V',
            AminoAcid::Unknown => 'X',
        }
    }

    pub fn from_one_letter(code: char) -> Option<Self> {
        let upper = code.to_ascii_uppercase();
        if upper == 'X' {
            return Some(AminoAcid::Unknown);
        }
        Self::STANDARD
            .iter()
            .copied()
            .find(|aa| aa.one_letter() == upper)
    }

    pub fn to_three_letter(&self) -> &'static str {
        match self {
            AminoAcid::Alanine => "ALA",
            AminoAcid::Arginine => "ARG",
            AminoAcid::Asparagine => "ASN",
            AminoAcid::AsparticAcid => "ASP",
            AminoAcid::Cysteine => "CYS",
            AminoAcid::Glutamine => "GLN",
            AminoAcid::GlutamicAcid => "GLU",
            AminoAcid::Glycine => "GLY",
            AminoAcid::Histidine => "HIS",
            AminoAcid::Isoleucine => "ILE",
            AminoAcid::Leucine => "LEU",
            AminoAcid::Lysine => "LYS",
            AminoAcid::Methionine => "MET",
            AminoAcid::Phenylalanine => "PHE",
            AminoAcid::Proline => "PRO",
            AminoAcid::Serine => "SER",
            AminoAcid::Threonine => "THR",
            AminoAcid::Tryptophan => "TRP",
            AminoAcid::Tyrosine => "TYR",
            AminoAcid::Valine => "VAL",
            AminoAcid::Unknown => "UNK",
        }
    }

    /// Kyte-Doolittle hydropathy index.
    pub fn hydropathy(&self) -> f32 {
        match self {
            AminoAcid::Isoleucine => 4.5,
            AminoAcid::Valine => 4.2,
            AminoAcid::Leucine => 3.8,
            AminoAcid::Phenylalanine => 2.8,
            AminoAcid::Cysteine => 2.5,
            AminoAcid::Methionine => 1.9,
            AminoAcid::Alanine => 1.8,
            AminoAcid::Glycine => -0.4,
            AminoAcid::Threonine => -0.7,
            AminoAcid::Serine => -0.8,
            AminoAcid::Tryptophan => -0.9,
            AminoAcid::Tyrosine => -1.3,
            AminoAcid::Proline => -1.6,
            AminoAcid::Histidine => -3.2,
            AminoAcid::GlutamicAcid
            | AminoAcid::Glutamine
            | AminoAcid::AsparticAcid
            | AminoAcid::Asparagine => -3.5,
            AminoAcid::Lysine => -3.9,
            AminoAcid::Arginine => -4.5,
            AminoAcid::Unknown => 0.0,
        }
    }

    /// Approximate side-chain formal charge at pH 7.
    pub fn formal_charge(&self) -> f32 {
        match self {
            AminoAcid::Lysine | AminoAcid::Arginine => 1.0,
            AminoAcid::Histidine => 0.1,
            AminoAcid::AsparticAcid | AminoAcid::GlutamicAcid => -1.0,
            _ => 0.0,
        }
    }

    /// Theoretical maximum solvent accessible surface area in square Angstroms
    /// (Tien et al., 2013).
    pub fn max_asa(&self) -> f32 {
        match self {
            AminoAcid::Alanine => 129.0,
            AminoAcid::Arginine => 274.0,
            AminoAcid::Asparagine => 195.0,
            AminoAcid::AsparticAcid => 193.0,
            AminoAcid::Cysteine => 167.0,
            AminoAcid::Glutamine => 225.0,
            AminoAcid::GlutamicAcid => 223.0,
            AminoAcid::Glycine => 104.0,
            AminoAcid::Histidine => 224.0,
            AminoAcid::Isoleucine => 197.0,
            AminoAcid::Leucine => 201.0,
            AminoAcid::Lysine => 236.0,
            AminoAcid::Methionine => 224.0,
            AminoAcid::Phenylalanine => 240.0,
            AminoAcid::Proline => 159.0,
            AminoAcid::Serine => 155.0,
            AminoAcid::Threonine => 172.0,
            AminoAcid::Tryptophan => 285.0,
            AminoAcid::Tyrosine => 263.0,
            AminoAcid::Valine => 174.0,
            AminoAcid::Unknown => 200.0,
        }
    }

    pub fn class(&self) -> Option<ResidueClass> {
        match self {
            AminoAcid::Alanine
            | AminoAcid::Valine
            | AminoAcid::Leucine
            | AminoAcid::Isoleucine
            | AminoAcid::Methionine => Some(ResidueClass::Aliphatic),
            AminoAcid::Phenylalanine | AminoAcid::Tryptophan | AminoAcid::Tyrosine => {
                Some(ResidueClass::Aromatic)
            }
            AminoAcid::Serine
            | AminoAcid::Threonine
            | AminoAcid::Asparagine
            | AminoAcid::Glutamine
            | AminoAcid::Cysteine => Some(ResidueClass::Polar),
            AminoAcid::Lysine | AminoAcid::Arginine | AminoAcid::Histidine => {
                Some(ResidueClass::Positive)
            }
            AminoAcid::AsparticAcid | AminoAcid::GlutamicAcid => Some(ResidueClass::Negative),
            AminoAcid::Glycine | AminoAcid::Proline => Some(ResidueClass::Special),
            AminoAcid::Unknown => None,
        }
    }

    pub fn is_aromatic(&self) -> bool {
        matches!(self.class(), Some(ResidueClass::Aromatic))
            || matches!(self, AminoAcid::Histidine)
    }

    pub fn is_polar(&self) -> bool {
        matches!(
            self.class(),
            Some(ResidueClass::Polar | ResidueClass::Positive | ResidueClass::Negative)
        )
    }
}

impl fmt::Display for AminoAcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_three_letter())
    }
}

impl FromStr for AminoAcid {
    type Err = ParseResidueError;

    /// Accepts three-letter names, including common protonation-state variants.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let aa = match upper.as_str() {
            "ALA" => AminoAcid::Alanine,
            "ARG" => AminoAcid::Arginine,
            "ASN" => AminoAcid::Asparagine,
            "ASP" | "ASH" => AminoAcid::AsparticAcid,
            "CYS" | "CYX" | "CYM" => AminoAcid::Cysteine,
            "GLN" => AminoAcid::Glutamine,
            "GLU" | "GLH" => AminoAcid::GlutamicAcid,
            "GLY" => AminoAcid::Glycine,
            "HIS" | "HSE" | "HSD" | "HSP" | "HIE" | "HID" | "HIP" => AminoAcid::Histidine,
            "ILE" => AminoAcid::Isoleucine,
            "LEU" => AminoAcid::Leucine,
            "LYS" | "LYN" => AminoAcid::Lysine,
            "MET" | "MSE" => AminoAcid::Methionine,
            "PHE" => AminoAcid::Phenylalanine,
            "PRO" => AminoAcid::Proline,
            "SER" => AminoAcid::Serine,
            "THR" => AminoAcid::Threonine,
            "TRP" => AminoAcid::Tryptophan,
            "TYR" => AminoAcid::Tyrosine,
            "VAL" => AminoAcid::Valine,
            "UNK" => AminoAcid::Unknown,
            _ => return Err(ParseResidueError(s.to_string())),
        };
        Ok(aa)
    }
}

/// DSSP eight-state secondary structure label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SecondaryStructure {
    /// `H`
    AlphaHelix,
    /// `G`
    Helix310,
    /// `I`
    PiHelix,
    /// `E`
    Strand,
    /// `B`
    Bridge,
    /// `T`
    Turn,
    /// `S`
    Bend,
    /// `-`, `C` or blank
    #[default]
    Coil,
}

impl SecondaryStructure {
    pub const ALL: [SecondaryStructure; 8] = [
        SecondaryStructure::AlphaHelix,
        SecondaryStructure::Helix310,
        SecondaryStructure::PiHelix,
        SecondaryStructure::Strand,
        SecondaryStructure::Bridge,
        SecondaryStructure::Turn,
        SecondaryStructure::Bend,
        SecondaryStructure::Coil,
    ];

    pub fn one_hot_index(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).unwrap_or(7)
    }

    pub fn from_dssp(code: char) -> Option<Self> {
        match code {
            'H' => Some(SecondaryStructure::AlphaHelix),
            'G' => Some(SecondaryStructure::Helix310),
            'I' => Some(SecondaryStructure::PiHelix),
            'E' => Some(SecondaryStructure::Strand),
            'B' => Some(SecondaryStructure::Bridge),
            'T' => Some(SecondaryStructure::Turn),
            'S' => Some(SecondaryStructure::Bend),
            '-' | 'C' | ' ' => Some(SecondaryStructure::Coil),
            _ => None,
        }
    }
}

/// One residue of a packed structure. Its atoms are the contiguous slice
/// `atom_range` of the owning batch's atom array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidueRecord {
    /// Dense index, equal to the residue's position in the batch.
    pub index: usize,
    pub amino_acid: AminoAcid,
    pub chain_id: char,
    pub atom_range: Range<usize>,
    pub secondary_structure: SecondaryStructure,
}

impl ResidueRecord {
    pub fn new(
        index: usize,
        amino_acid: AminoAcid,
        chain_id: char,
        atom_range: Range<usize>,
        secondary_structure: SecondaryStructure,
    ) -> Self {
        Self {
            index,
            amino_acid,
            chain_id,
            atom_range,
            secondary_structure,
        }
    }

    #[inline]
    pub fn atom_count(&self) -> usize {
        self.atom_range.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.atom_range.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_letter_round_trips_for_all_standard_residues() {
        for aa in AminoAcid::STANDARD {
            assert_eq!(AminoAcid::from_one_letter(aa.one_letter()), Some(aa));
        }
        assert_eq!(AminoAcid::from_one_letter('x'), Some(AminoAcid::Unknown));
        assert_eq!(AminoAcid::from_one_letter('B'), None);
    }

    #[test]
    fn three_letter_parsing_accepts_protonation_variants() {
        assert_eq!("HSE".parse::<AminoAcid>(), Ok(AminoAcid::Histidine));
        assert_eq!("cyx".parse::<AminoAcid>(), Ok(AminoAcid::Cysteine));
        assert_eq!("MSE".parse::<AminoAcid>(), Ok(AminoAcid::Methionine));
        assert_eq!(
            "FOO".parse::<AminoAcid>(),
            Err(ParseResidueError("FOO".to_string()))
        );
    }

    #[test]
    fn one_hot_index_is_dense_and_excludes_unknown() {
        let indices: Vec<usize> = AminoAcid::STANDARD
            .iter()
            .filter_map(|aa| aa.one_hot_index())
            .collect();
        assert_eq!(indices, (0..20).collect::<Vec<_>>());
        assert_eq!(AminoAcid::Unknown.one_hot_index(), None);
    }

    #[test]
    fn every_standard_residue_has_a_class() {
        for aa in AminoAcid::STANDARD {
            assert!(aa.class().is_some(), "{aa} has no class");
        }
        assert_eq!(AminoAcid::Unknown.class(), None);
    }

    #[test]
    fn charged_residues_report_expected_formal_charge() {
        assert_eq!(AminoAcid::Lysine.formal_charge(), 1.0);
        assert_eq!(AminoAcid::GlutamicAcid.formal_charge(), -1.0);
        assert_eq!(AminoAcid::Leucine.formal_charge(), 0.0);
    }

    #[test]
    fn dssp_codes_map_to_eight_states() {
        assert_eq!(
            SecondaryStructure::from_dssp('H'),
            Some(SecondaryStructure::AlphaHelix)
        );
        assert_eq!(
            SecondaryStructure::from_dssp('-'),
            Some(SecondaryStructure::Coil)
        );
        assert_eq!(SecondaryStructure::from_dssp('Q'), None);
        assert_eq!(SecondaryStructure::Coil.one_hot_index(), 7);
        assert_eq!(SecondaryStructure::AlphaHelix.one_hot_index(), 0);
    }

    #[test]
    fn residue_record_reports_atom_count() {
        let residue = ResidueRecord::new(
            0,
            AminoAcid::Serine,
            'A',
            10..16,
            SecondaryStructure::Turn,
        );
        assert_eq!(residue.atom_count(), 6);
        assert!(!residue.is_empty());
    }
}
