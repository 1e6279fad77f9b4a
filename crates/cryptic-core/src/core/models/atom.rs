use crate::core::utils::identifiers::is_backbone_atom;
use nalgebra::Point3;
use std::str::FromStr;

/// Chemical element of an atom, restricted to what appears in protein structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Element {
    C,
    N,
    O,
    S,
    H,
    P,
    Se,
    /// Anything else (metal ions, halogens, unresolved types).
    #[default]
    Other,
}

impl Element {
    pub fn symbol(&self) -> &'static str {
        match self {
            Element::C => "C",
            Element::N => "N",
            Element::O => "O",
            Element::S => "S",
            Element::H => "H",
            Element::P => "P",
            Element::Se => "SE",
            Element::Other => "X",
        }
    }

    pub fn is_heavy(&self) -> bool {
        !matches!(self, Element::H)
    }

    /// Bondi van der Waals radius in Angstroms.
    pub fn default_vdw_radius(&self) -> f32 {
        match self {
            Element::C => 1.70,
            Element::N => 1.55,
            Element::O => 1.52,
            Element::S => 1.80,
            Element::H => 1.20,
            Element::P => 1.80,
            Element::Se => 1.90,
            Element::Other => 1.80,
        }
    }

    /// Infers the element from a PDB-style atom name (`"CA"` -> carbon, `"OG1"` -> oxygen).
    pub fn from_atom_name(name: &str) -> Self {
        let trimmed = name.trim_start_matches(|c: char| c.is_ascii_digit()).trim();
        if trimmed.eq_ignore_ascii_case("SE") {
            return Element::Se;
        }
        match trimmed.chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('C') => Element::C,
            Some('N') => Element::N,
            Some('O') => Element::O,
            Some('S') => Element::S,
            Some('H') | Some('D') => Element::H,
            Some('P') => Element::P,
            _ => Element::Other,
        }
    }
}

impl FromStr for Element {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "C" => Ok(Element::C),
            "N" => Ok(Element::N),
            "O" => Ok(Element::O),
            "S" => Ok(Element::S),
            "H" | "D" => Ok(Element::H),
            "P" => Ok(Element::P),
            "SE" => Ok(Element::Se),
            "X" => Ok(Element::Other),
            _ => Err(()),
        }
    }
}

/// One atom of a packed structure.
///
/// Records are immutable once a [`PackedBatch`](super::batch::PackedBatch) owns them;
/// positions are stored in single precision, matching the device-side layout.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomRecord {
    /// PDB atom name (e.g. `"CA"`, `"OG1"`), used to locate backbone atoms.
    pub name: String,
    pub element: Element,
    /// Cartesian coordinates in Angstroms.
    pub position: Point3<f32>,
    /// Dense index of the owning residue.
    pub residue_index: usize,
    pub chain_id: char,
    /// Van der Waals radius in Angstroms.
    pub vdw_radius: f32,
    /// Partial charge in elementary charge units.
    pub partial_charge: f32,
}

impl AtomRecord {
    /// Creates an atom with the element's default radius and zero partial charge.
    pub fn new(
        name: &str,
        element: Element,
        position: Point3<f32>,
        residue_index: usize,
        chain_id: char,
    ) -> Self {
        Self {
            name: name.to_string(),
            element,
            position,
            residue_index,
            chain_id,
            vdw_radius: element.default_vdw_radius(),
            partial_charge: 0.0,
        }
    }

    pub fn with_partial_charge(mut self, charge: f32) -> Self {
        self.partial_charge = charge;
        self
    }

    pub fn with_vdw_radius(mut self, radius: f32) -> Self {
        self.vdw_radius = radius;
        self
    }

    #[inline]
    pub fn is_backbone(&self) -> bool {
        is_backbone_atom(&self.name)
    }

    #[inline]
    pub fn is_sidechain(&self) -> bool {
        !self.is_backbone() && self.element.is_heavy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_atom_uses_element_default_radius_and_zero_charge() {
        let atom = AtomRecord::new("CA", Element::C, Point3::new(1.0, 2.0, 3.0), 4, 'A');
        assert_eq!(atom.vdw_radius, 1.70);
        assert_eq!(atom.partial_charge, 0.0);
        assert_eq!(atom.residue_index, 4);
        assert_eq!(atom.chain_id, 'A');
    }

    #[test]
    fn builder_style_setters_override_defaults() {
        let atom = AtomRecord::new("OD1", Element::O, Point3::origin(), 0, 'B')
            .with_partial_charge(-0.55)
            .with_vdw_radius(1.6);
        assert_eq!(atom.partial_charge, -0.55);
        assert_eq!(atom.vdw_radius, 1.6);
    }

    #[test]
    fn backbone_and_sidechain_classification() {
        let ca = AtomRecord::new("CA", Element::C, Point3::origin(), 0, 'A');
        let cb = AtomRecord::new("CB", Element::C, Point3::origin(), 0, 'A');
        let hb = AtomRecord::new("HB1", Element::H, Point3::origin(), 0, 'A');
        assert!(ca.is_backbone());
        assert!(!ca.is_sidechain());
        assert!(cb.is_sidechain());
        assert!(!hb.is_sidechain());
    }

    #[test]
    fn element_is_inferred_from_atom_names() {
        assert_eq!(Element::from_atom_name("CA"), Element::C);
        assert_eq!(Element::from_atom_name("OG1"), Element::O);
        assert_eq!(Element::from_atom_name("1HB"), Element::H);
        assert_eq!(Element::from_atom_name("SE"), Element::Se);
        assert_eq!(Element::from_atom_name("SD"), Element::S);
        assert_eq!(Element::from_atom_name(""), Element::Other);
    }

    #[test]
    fn element_from_str_is_case_insensitive() {
        assert_eq!(Element::from_str("se"), Ok(Element::Se));
        assert_eq!(Element::from_str(" n "), Ok(Element::N));
        assert_eq!(Element::from_str("Zn"), Err(()));
        assert_eq!(Element::from_str(Element::Se.symbol()), Ok(Element::Se));
    }

    #[test]
    fn hydrogen_is_the_only_light_element() {
        assert!(!Element::H.is_heavy());
        assert!(Element::C.is_heavy());
        assert!(Element::Other.is_heavy());
    }
}
