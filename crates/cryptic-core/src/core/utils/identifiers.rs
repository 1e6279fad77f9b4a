use phf::{Set, phf_set};

static BACKBONE_ATOM_NAMES: Set<&'static str> = phf_set! {
    "N", "H", "HN", "CA", "HA", "C", "O", "OXT", "H1", "H2", "H3", "NT",
    "HT1", "HT2", "HT3", "OT1", "OT2", "HC", "HOXT", "HA1", "HA2", "1HA", "2HA",
};

static HYDROGEN_BOND_DONOR_NAMES: Set<&'static str> = phf_set! {
    "N", "NE", "NE1", "NE2", "ND1", "ND2", "NH1", "NH2", "NZ", "OG", "OG1", "OH", "SG",
};

static HYDROGEN_BOND_ACCEPTOR_NAMES: Set<&'static str> = phf_set! {
    "O", "OXT", "OD1", "OD2", "OE1", "OE2", "OG", "OG1", "OH", "ND1", "NE2", "SD",
};

/// Side-chain gamma atoms in lookup order, used for the chi-1 torsion.
pub const GAMMA_ATOM_NAMES: [&str; 5] = ["CG", "OG", "OG1", "SG", "CG1"];

pub fn is_backbone_atom(atom_name: &str) -> bool {
    BACKBONE_ATOM_NAMES.contains(atom_name.trim())
}

pub fn is_hydrogen_bond_donor(atom_name: &str) -> bool {
    HYDROGEN_BOND_DONOR_NAMES.contains(atom_name.trim())
}

pub fn is_hydrogen_bond_acceptor(atom_name: &str) -> bool {
    HYDROGEN_BOND_ACCEPTOR_NAMES.contains(atom_name.trim())
}
