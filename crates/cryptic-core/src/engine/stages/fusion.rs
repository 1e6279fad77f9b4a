//! Single-pass computation of the 136-slot fused descriptor vector.
//!
//! Every residue gets one neighbor query against the atom index (14 A around its
//! anchor) and one against the anchor index (13 A); all descriptors are reduced
//! from those two index-sorted hit lists. Slot ranges are defined in
//! [`crate::core::features::slots`].

use crate::core::features::slots::{self, FUSED_DIM, ProviderBlock};
use crate::core::models::batch::PackedBatch;
use crate::core::models::residue::ResidueClass;
use crate::core::utils::geometry::{
    bond_angle, centroid, circumradius, dihedral_angle, fibonacci_sphere, radius_of_gyration,
};
use crate::core::utils::identifiers::{
    GAMMA_ATOM_NAMES, is_hydrogen_bond_acceptor, is_hydrogen_bond_donor,
};
use crate::core::models::atom::Element;
use crate::engine::arena::{BufferId, DeviceArena, FeatureMatrix};
use crate::engine::config::FusionConfig;
use crate::engine::error::EngineError;
use crate::engine::payload::StructurePayload;
use crate::engine::spatial::{Neighbor, PointIndex};
use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use std::f64::consts::PI;
use tracing::{debug, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub const STAGE: &str = "fusion";

const ATOM_QUERY_RADIUS: f64 = 14.0;
const ANCHOR_QUERY_RADIUS: f64 = 13.0;
const HSE_NORMALIZER: f64 = 30.0;
const ATOM_CONTACT_RADII: [f64; 5] = [4.0, 6.0, 8.0, 10.0, 12.0];
const ATOM_CONTACT_NORMS: [f64; 5] = [10.0, 30.0, 70.0, 140.0, 240.0];
const ANCHOR_CONTACT_RADII: [f64; 3] = [6.0, 8.0, 12.0];
const ANCHOR_CONTACT_NORMS: [f64; 3] = [4.0, 8.0, 24.0];
const SHELL_START: f64 = 2.0;
const SHELL_WIDTH: f64 = 0.75;
const REFERENCE_ATOM_DENSITY: f64 = 0.05;
const INERTIA_RADII: [f64; 3] = [8.0, 10.0, 12.0];
const VIRTUAL_BOND: f64 = 3.8;

/// Precomputed per-structure geometry shared by every residue row.
struct FusionContext<'a> {
    batch: &'a PackedBatch,
    atoms: PointIndex,
    anchors: PointIndex,
    sidechains: Vec<Point3<f64>>,
    relative_sasa: Vec<f64>,
    protein_center: Point3<f64>,
    protein_radius: f64,
    chain_bounds: Vec<(usize, usize)>,
}

impl<'a> FusionContext<'a> {
    fn new(batch: &'a PackedBatch, config: &FusionConfig) -> Result<Self, EngineError> {
        let n = batch.residue_count();
        let mut anchors = Vec::with_capacity(n);
        let mut sidechains = Vec::with_capacity(n);
        for i in 0..n {
            let (Some(anchor), Some(sidechain)) =
                (batch.anchor_position(i), batch.sidechain_centroid(i))
            else {
                return Err(EngineError::integrity(
                    batch.id(),
                    STAGE,
                    format!("residue {i} has an empty atom range"),
                ));
            };
            anchors.push(anchor);
            sidechains.push(sidechain);
        }

        let protein_center = centroid(anchors.iter().copied()).unwrap_or_else(Point3::origin);
        let protein_radius = radius_of_gyration(&anchors, &protein_center) * (5.0f64 / 3.0).sqrt();

        let atoms = PointIndex::new(batch.atoms().iter().map(|a| a.position.cast()).collect());
        let atom_sasa = atom_surface_areas(batch, &atoms, config);
        let relative_sasa = batch
            .residues()
            .iter()
            .map(|r| {
                let area: f64 = atom_sasa[r.atom_range.clone()].iter().sum();
                (area / r.amino_acid.max_asa() as f64).clamp(0.0, 1.0)
            })
            .collect();

        Ok(Self {
            batch,
            atoms,
            anchors: PointIndex::new(anchors),
            sidechains,
            relative_sasa,
            protein_center,
            protein_radius,
            chain_bounds: chain_bounds(batch),
        })
    }

    #[inline]
    fn anchor(&self, i: usize) -> Point3<f64> {
        *self.anchors.point(i)
    }

    fn prev(&self, i: usize) -> Option<usize> {
        (i > self.chain_bounds[i].0).then(|| i - 1)
    }

    fn next(&self, i: usize) -> Option<usize> {
        (i < self.chain_bounds[i].1).then(|| i + 1)
    }
}

/// `(first, last)` residue of the chain run containing each residue.
fn chain_bounds(batch: &PackedBatch) -> Vec<(usize, usize)> {
    let residues = batch.residues();
    let mut bounds = vec![(0, 0); residues.len()];
    let mut start = 0;
    for i in 0..residues.len() {
        let last_of_run = i + 1 == residues.len() || residues[i + 1].chain_id != residues[i].chain_id;
        if last_of_run {
            for b in &mut bounds[start..=i] {
                *b = (start, i);
            }
            start = i + 1;
        }
    }
    bounds
}

/// Shrake-Rupley solvent accessible area of every atom.
fn atom_surface_areas(batch: &PackedBatch, atoms: &PointIndex, config: &FusionConfig) -> Vec<f64> {
    let sphere = fibonacci_sphere(config.sphere_points);
    let probe = config.probe_radius;
    let max_vdw = batch
        .atoms()
        .iter()
        .map(|a| a.vdw_radius as f64)
        .fold(0.0, f64::max);
    let atom_indices: Vec<usize> = (0..batch.atom_count()).collect();

    #[cfg(not(feature = "parallel"))]
    let iterator = atom_indices.iter();

    #[cfg(feature = "parallel")]
    let iterator = atom_indices.par_iter();

    iterator
        .map(|&a| {
            let center = *atoms.point(a);
            let radius = batch.atoms()[a].vdw_radius as f64 + probe;
            let occluders: Vec<(Point3<f64>, f64)> = atoms
                .within(&center, radius + max_vdw + probe)
                .into_iter()
                .filter(|n| n.index != a)
                .map(|n| {
                    let r = batch.atoms()[n.index].vdw_radius as f64 + probe;
                    (*atoms.point(n.index), r * r)
                })
                .collect();
            let accessible = sphere
                .iter()
                .filter(|u| {
                    let p = center + *u * radius;
                    occluders
                        .iter()
                        .all(|(q, r2)| (p - q).norm_squared() >= *r2)
                })
                .count();
            4.0 * PI * radius * radius * accessible as f64 / sphere.len() as f64
        })
        .collect()
}

/// Builds the fused matrix for a prepared payload and its mask.
pub fn compute_fused(
    payload: &StructurePayload,
    mask: &[f32],
    config: &FusionConfig,
) -> Result<FeatureMatrix, EngineError> {
    let batch = payload.batch();
    if mask.len() != batch.residue_count() {
        return Err(EngineError::integrity(
            batch.id(),
            STAGE,
            format!(
                "mask has {} entries for {} residues",
                mask.len(),
                batch.residue_count()
            ),
        ));
    }

    let ctx = FusionContext::new(batch, config)?;
    let residue_indices: Vec<usize> = (0..batch.residue_count()).collect();

    #[cfg(not(feature = "parallel"))]
    let iterator = residue_indices.iter();

    #[cfg(feature = "parallel")]
    let iterator = residue_indices.par_iter();

    let rows: Vec<[f32; FUSED_DIM]> = iterator
        .map(|&i| fuse_residue(&ctx, payload, mask[i] as f64, i))
        .collect();

    let matrix = FeatureMatrix::from_rows(FUSED_DIM, &rows)
        .ok_or_else(|| EngineError::integrity(batch.id(), STAGE, "fused row width mismatch"))?;
    if let Some((row, column)) = matrix.first_non_finite() {
        return Err(EngineError::device(
            batch.id(),
            STAGE,
            format!("non-finite descriptor at residue {row}, slot {column}"),
        ));
    }
    Ok(matrix)
}

fn fuse_residue(
    ctx: &FusionContext<'_>,
    payload: &StructurePayload,
    mask_weight: f64,
    i: usize,
) -> [f32; FUSED_DIM] {
    let batch = ctx.batch;
    let anchor = ctx.anchor(i);
    let environment = ctx.atoms.within(&anchor, ATOM_QUERY_RADIUS);
    let anchor_hits: Vec<Neighbor> = ctx
        .anchors
        .within(&anchor, ANCHOR_QUERY_RADIUS)
        .into_iter()
        .filter(|n| n.index != i)
        .collect();

    let mut row = [0.0f32; FUSED_DIM];
    let (exposure, burial) = exposure_and_burial(ctx, i, mask_weight, &anchor_hits);
    put(&mut row, slots::EXPOSURE, &exposure);
    put(&mut row, slots::BURIAL, &burial);
    put(&mut row, slots::CURVATURE, &curvature(ctx, i));
    put(&mut row, slots::SECONDARY_STRUCTURE, &secondary_structure(batch, i));
    put(&mut row, slots::CONTACTS, &contacts(batch, i, &environment, &anchor_hits));
    put(&mut row, slots::DIHEDRALS, &dihedrals(ctx, i));
    put(&mut row, slots::AMINO_ACID, &amino_acid(batch, i));
    put(
        &mut row,
        slots::HYDRO_CHARGE,
        &hydro_charge(ctx, i, &environment, &anchor_hits),
    );
    put(&mut row, slots::SHAPE, &shape(ctx, i));

    for block in ProviderBlock::ALL {
        let range = block.slots();
        match payload.auxiliary(block) {
            Some(aux) => {
                row[range].copy_from_slice(aux.row(i));
            }
            None => {
                let values = match block {
                    ProviderBlock::Sampling => radial_profile(batch, i, &environment),
                    ProviderBlock::Binding => binding_environment(batch, i, &environment),
                    ProviderBlock::Modes => local_modes(ctx, i, &environment, &anchor_hits),
                    ProviderBlock::Conservation => sequence_composition(ctx, i),
                };
                put(&mut row, range, &values);
            }
        }
    }
    row
}

#[inline]
fn put(row: &mut [f32; FUSED_DIM], range: std::ops::Range<usize>, values: &[f64]) {
    for (slot, v) in range.zip(values) {
        row[slot] = *v as f32;
    }
}

fn exposure_and_burial(
    ctx: &FusionContext<'_>,
    i: usize,
    mask_weight: f64,
    anchor_hits: &[Neighbor],
) -> ([f64; 4], [f64; 4]) {
    let anchor = ctx.anchor(i);
    let mut direction: Vector3<f64> = ctx.sidechains[i] - anchor;
    if direction.norm() < 1e-6 {
        if let (Some(p), Some(n)) = (ctx.prev(i), ctx.next(i)) {
            direction = -((ctx.anchor(p) - anchor) + (ctx.anchor(n) - anchor));
        }
    }
    let (mut up, mut down) = (0usize, 0usize);
    for hit in anchor_hits {
        if (ctx.anchor(hit.index) - anchor).dot(&direction) > 0.0 {
            up += 1;
        } else {
            down += 1;
        }
    }
    let unmasked = 1.0 - mask_weight;
    let raw_relative = ctx.relative_sasa[i];
    let exposure = [
        raw_relative * unmasked,
        (1.0 - (up as f64 / HSE_NORMALIZER).min(1.0)) * unmasked,
        (1.0 - (down as f64 / HSE_NORMALIZER).min(1.0)) * unmasked,
        mask_weight,
    ];

    let depth = if ctx.protein_radius < 1e-9 {
        1.0
    } else {
        (1.0 - (anchor - ctx.protein_center).norm() / ctx.protein_radius).clamp(0.0, 1.0)
    };
    let within_ten = anchor_hits.iter().filter(|n| n.distance <= 10.0).count();
    let burial = [
        depth,
        (within_ten as f64 / 40.0).min(1.0),
        raw_relative,
        ((ctx.sidechains[i] - anchor).norm() / 6.0).min(1.0),
    ];
    (exposure, burial)
}

fn curvature(ctx: &FusionContext<'_>, i: usize) -> [f64; 4] {
    let (Some(p), Some(n)) = (ctx.prev(i), ctx.next(i)) else {
        return [0.0; 4];
    };
    let (a0, a1, a2) = (ctx.anchor(p), ctx.anchor(i), ctx.anchor(n));
    let angle = bond_angle(&a0, &a1, &a2).map_or(0.0, |t| t / PI);
    let torsion = ctx
        .next(n)
        .and_then(|n2| dihedral_angle(&a0, &a1, &a2, &ctx.anchor(n2)));
    let (sin, cos) = torsion.map_or((0.0, 0.0), |t| (t.sin(), t.cos()));
    let inverse_radius = circumradius(&a0, &a1, &a2).map_or(0.0, |r| (VIRTUAL_BOND / r).min(1.0));
    [angle, sin, cos, inverse_radius]
}

fn secondary_structure(batch: &PackedBatch, i: usize) -> [f64; 8] {
    let mut one_hot = [0.0; 8];
    one_hot[batch.residues()[i].secondary_structure.one_hot_index()] = 1.0;
    one_hot
}

fn contacts(
    batch: &PackedBatch,
    i: usize,
    environment: &[Neighbor],
    anchor_hits: &[Neighbor],
) -> [f64; 8] {
    let mut out = [0.0; 8];
    let foreign = || {
        environment
            .iter()
            .filter(move |n| batch.atoms()[n.index].residue_index != i)
    };
    for (k, (radius, norm)) in ATOM_CONTACT_RADII.iter().zip(ATOM_CONTACT_NORMS).enumerate() {
        out[k] = foreign().filter(|n| n.distance <= *radius).count() as f64 / norm;
    }
    for (k, (radius, norm)) in ANCHOR_CONTACT_RADII
        .iter()
        .zip(ANCHOR_CONTACT_NORMS)
        .enumerate()
    {
        out[5 + k] = anchor_hits.iter().filter(|n| n.distance <= *radius).count() as f64 / norm;
    }
    out
}

fn torsion_triplet(points: Option<[Point3<f64>; 4]>) -> [f64; 3] {
    points
        .and_then(|[a, b, c, d]| dihedral_angle(&a, &b, &c, &d))
        .map_or([0.0; 3], |t| [t.sin(), t.cos(), 1.0])
}

fn dihedrals(ctx: &FusionContext<'_>, i: usize) -> [f64; 12] {
    let batch = ctx.batch;
    let at = |r: usize, name: &str| batch.atom_position(r, name);
    let (n, ca, c) = (at(i, "N"), at(i, "CA"), at(i, "C"));
    let prev_c = ctx.prev(i).and_then(|p| at(p, "C"));
    let next_n = ctx.next(i).and_then(|q| at(q, "N"));
    let next_ca = ctx.next(i).and_then(|q| at(q, "CA"));
    let cb = at(i, "CB");
    let gamma = GAMMA_ATOM_NAMES.iter().find_map(|name| at(i, name));

    let phi = torsion_triplet(prev_c.zip(n).zip(ca).zip(c).map(|(((a, b), c), d)| [a, b, c, d]));
    let psi = torsion_triplet(n.zip(ca).zip(c).zip(next_n).map(|(((a, b), c), d)| [a, b, c, d]));
    let omega =
        torsion_triplet(ca.zip(c).zip(next_n).zip(next_ca).map(|(((a, b), c), d)| [a, b, c, d]));
    let chi1 = torsion_triplet(n.zip(ca).zip(cb).zip(gamma).map(|(((a, b), c), d)| [a, b, c, d]));

    let mut out = [0.0; 12];
    for (k, triplet) in [phi, psi, omega, chi1].iter().enumerate() {
        out[3 * k..3 * k + 3].copy_from_slice(triplet);
    }
    out
}

fn amino_acid(batch: &PackedBatch, i: usize) -> [f64; 20] {
    let mut one_hot = [0.0; 20];
    if let Some(k) = batch.residues()[i].amino_acid.one_hot_index() {
        one_hot[k] = 1.0;
    }
    one_hot
}

fn hydro_charge(
    ctx: &FusionContext<'_>,
    i: usize,
    environment: &[Neighbor],
    anchor_hits: &[Neighbor],
) -> [f64; 12] {
    let batch = ctx.batch;
    let residues = batch.residues();
    let aa = residues[i].amino_acid;
    let own = batch.residue_atoms(i);

    let net_charge: f64 = own.iter().map(|a| a.partial_charge as f64).sum();

    let (lo, hi) = ctx.chain_bounds[i];
    let window = i.saturating_sub(3).max(lo)..=(i + 3).min(hi);
    let window_len = window.clone().count() as f64;
    let window_kd: f64 = window
        .map(|r| residues[r].amino_acid.hydropathy() as f64)
        .sum::<f64>()
        / window_len;

    let spatial: Vec<usize> = std::iter::once(i)
        .chain(
            anchor_hits
                .iter()
                .filter(|n| n.distance <= 10.0)
                .map(|n| n.index),
        )
        .collect();
    let spatial_kd = spatial
        .iter()
        .map(|&r| residues[r].amino_acid.hydropathy() as f64)
        .sum::<f64>()
        / spatial.len() as f64;
    let positive = spatial[1..]
        .iter()
        .filter(|&&r| residues[r].amino_acid.formal_charge() > 0.5)
        .count();
    let negative = spatial[1..]
        .iter()
        .filter(|&&r| residues[r].amino_acid.formal_charge() < -0.5)
        .count();

    let charge_density: f64 = environment
        .iter()
        .filter(|n| n.distance <= 8.0)
        .map(|n| batch.atoms()[n.index].partial_charge as f64)
        .sum();
    let polar_atoms = own
        .iter()
        .filter(|a| is_hydrogen_bond_donor(&a.name) || is_hydrogen_bond_acceptor(&a.name))
        .count();

    [
        aa.hydropathy() as f64 / 4.5,
        aa.formal_charge() as f64,
        net_charge,
        net_charge.abs(),
        window_kd / 4.5,
        spatial_kd / 4.5,
        charge_density / 4.0,
        positive as f64 / 5.0,
        negative as f64 / 5.0,
        f64::from(u8::from(aa.is_aromatic())),
        f64::from(u8::from(aa.is_polar())),
        polar_atoms as f64 / 6.0,
    ]
}

fn shape(ctx: &FusionContext<'_>, i: usize) -> [f64; 8] {
    let batch = ctx.batch;
    let own = batch.residue_atoms(i);
    let count = own.len() as f64;
    let positions: Vec<Point3<f64>> = own.iter().map(|a| a.position.cast()).collect();
    let center = centroid(positions.iter().copied()).unwrap_or_else(|| ctx.anchor(i));
    let anchor = ctx.anchor(i);

    let mean_vdw = own.iter().map(|a| a.vdw_radius as f64).sum::<f64>() / count;
    let reach = positions
        .iter()
        .map(|p| (p - anchor).norm())
        .fold(0.0, f64::max);
    let heavy = own.iter().filter(|a| a.element.is_heavy()).count() as f64;
    let volume: f64 = own
        .iter()
        .map(|a| 4.0 / 3.0 * PI * (a.vdw_radius as f64).powi(3))
        .sum();

    let n = batch.residue_count();
    let (lo, hi) = ctx.chain_bounds[i];
    let terminus_distance = (i - lo).min(hi - i).min(50) as f64;

    [
        count / 14.0,
        mean_vdw / 2.0,
        radius_of_gyration(&positions, &center) / 3.0,
        if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 },
        terminus_distance / 50.0,
        (reach / 8.0).min(1.0),
        heavy / count,
        volume / 200.0,
    ]
}

/// Atom counts in 16 concentric shells from 2 A to 14 A, relative to a
/// uniform reference density.
fn radial_profile(batch: &PackedBatch, i: usize, environment: &[Neighbor]) -> Vec<f64> {
    let width = ProviderBlock::Sampling.width();
    let mut counts = vec![0usize; width];
    for n in environment {
        if batch.atoms()[n.index].residue_index == i || n.distance < SHELL_START {
            continue;
        }
        let shell = ((n.distance - SHELL_START) / SHELL_WIDTH) as usize;
        if shell < width {
            counts[shell] += 1;
        }
    }
    counts
        .iter()
        .enumerate()
        .map(|(k, &c)| {
            let inner = SHELL_START + k as f64 * SHELL_WIDTH;
            let outer = inner + SHELL_WIDTH;
            let volume = 4.0 / 3.0 * PI * (outer.powi(3) - inner.powi(3));
            c as f64 / (volume * REFERENCE_ATOM_DENSITY)
        })
        .collect()
}

/// Element fractions, mean partial charge and mean radius of foreign atoms
/// within 6 A and 10 A.
fn binding_environment(batch: &PackedBatch, i: usize, environment: &[Neighbor]) -> Vec<f64> {
    let mut out = vec![0.0; ProviderBlock::Binding.width()];
    for (k, radius) in [6.0, 10.0].into_iter().enumerate() {
        let shell: Vec<_> = environment
            .iter()
            .filter(|n| n.distance <= radius)
            .map(|n| &batch.atoms()[n.index])
            .filter(|a| a.residue_index != i)
            .collect();
        if shell.is_empty() {
            continue;
        }
        let total = shell.len() as f64;
        for (e, element) in [Element::C, Element::N, Element::O, Element::S]
            .iter()
            .enumerate()
        {
            out[4 * k + e] = shell.iter().filter(|a| a.element == *element).count() as f64 / total;
        }
        out[8 + k] = shell.iter().map(|a| a.partial_charge as f64).sum::<f64>() / total;
        out[10 + k] = shell.iter().map(|a| a.vdw_radius as f64).sum::<f64>() / total / 2.0;
    }
    out
}

/// Eigenvalues of the local atom covariance, sorted descending and clamped at zero.
fn covariance_spectrum(points: &[Point3<f64>]) -> Option<[f64; 3]> {
    if points.len() < 3 {
        return None;
    }
    let center = centroid(points.iter().copied())?;
    let mut covariance = Matrix3::zeros();
    for p in points {
        let d = p - center;
        covariance += d * d.transpose();
    }
    covariance /= points.len() as f64;
    let eigen = SymmetricEigen::new(covariance);
    let mut values = [
        eigen.eigenvalues[0].max(0.0),
        eigen.eigenvalues[1].max(0.0),
        eigen.eigenvalues[2].max(0.0),
    ];
    values.sort_by(|a, b| b.total_cmp(a));
    (values[0] > 1e-12).then_some(values)
}

/// Local anisotropy and packing descriptors standing in for vibrational modes.
fn local_modes(
    ctx: &FusionContext<'_>,
    i: usize,
    environment: &[Neighbor],
    anchor_hits: &[Neighbor],
) -> Vec<f64> {
    let mut out = vec![0.0; ProviderBlock::Modes.width()];
    for (k, radius) in INERTIA_RADII.iter().enumerate() {
        let points: Vec<Point3<f64>> = environment
            .iter()
            .filter(|n| n.distance <= *radius)
            .map(|n| *ctx.atoms.point(n.index))
            .collect();
        if let Some(spectrum) = covariance_spectrum(&points) {
            let total: f64 = spectrum.iter().sum();
            for (e, value) in spectrum.iter().enumerate() {
                out[3 * k + e] = value / total;
            }
            // anisotropy from the 10 A shell
            if k == 1 {
                let [l1, l2, l3] = spectrum;
                out[9] = (l1 - l2) / l1;
                out[10] = (l2 - l3) / l1;
                out[11] = l3 / l1;
            }
        }
    }

    for (k, radius) in [8.0, 12.0].into_iter().enumerate() {
        let near: Vec<&Neighbor> = anchor_hits.iter().filter(|n| n.distance <= radius).collect();
        if !near.is_empty() {
            let local = near.iter().filter(|n| n.index.abs_diff(i) <= 4).count();
            out[12 + k] = local as f64 / near.len() as f64;
        }
    }

    out[14] = anchor_hits
        .iter()
        .map(|n| 1.0 / (n.distance * n.distance).max(1.0))
        .sum();
    if !anchor_hits.is_empty() {
        out[15] = anchor_hits.iter().map(|n| n.distance).sum::<f64>()
            / anchor_hits.len() as f64
            / 12.0;
    }
    out
}

/// Residue-class composition of the sequence windows `+-3` and `+-7`.
fn sequence_composition(ctx: &FusionContext<'_>, i: usize) -> Vec<f64> {
    let residues = ctx.batch.residues();
    let (lo, hi) = ctx.chain_bounds[i];
    let mut out = vec![0.0; ProviderBlock::Conservation.width()];
    for (k, half) in [3usize, 7].into_iter().enumerate() {
        let window = i.saturating_sub(half).max(lo)..=(i + half).min(hi);
        let total = window.clone().count() as f64;
        for r in window {
            if let Some(class) = residues[r].amino_acid.class() {
                let c = ResidueClass::ALL
                    .iter()
                    .position(|x| *x == class)
                    .unwrap_or(0);
                out[6 * k + c] += 1.0 / total;
            }
        }
    }
    out
}

#[instrument(skip_all, name = "fusion_stage")]
pub fn run(
    arena: &mut DeviceArena<'_>,
    structure: BufferId,
    mask: BufferId,
    config: &FusionConfig,
) -> Result<BufferId, EngineError> {
    let payload = arena.structure(structure, STAGE)?;
    let mask_matrix = arena.matrix(mask, STAGE)?;
    if mask_matrix.width() != 1 {
        return Err(EngineError::integrity(
            payload.id(),
            STAGE,
            format!("mask buffer has width {}, expected 1", mask_matrix.width()),
        ));
    }
    let fused = compute_fused(payload, mask_matrix.as_slice(), config)?;
    debug!(
        batch = payload.id(),
        residues = fused.rows(),
        provider_blocks = ProviderBlock::ALL
            .iter()
            .filter(|b| payload.auxiliary(**b).is_some())
            .count(),
        "Fused features computed."
    );
    arena.store(STAGE, fused)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::providers::{FeatureProvider, ProviderSet};
    use crate::engine::config::MaskConfig;
    use crate::engine::error::ErrorKind;
    use crate::engine::stages::mask::compute_mask;
    use crate::test_support::{lattice_batch, planar_batch};

    fn fused_for(batch: PackedBatch) -> (Vec<f32>, FeatureMatrix) {
        let mask = compute_mask(&batch, &MaskConfig::default()).unwrap();
        let payload = StructurePayload::from_batch(batch);
        let fused = compute_fused(&payload, &mask, &FusionConfig::default()).unwrap();
        (mask, fused)
    }

    #[test]
    fn every_row_has_136_finite_slots() {
        let (_, fused) = fused_for(lattice_batch("rows", 64, 512, 3));
        assert_eq!(fused.rows(), 64);
        assert_eq!(fused.width(), FUSED_DIM);
        assert!(fused.first_non_finite().is_none());
    }

    #[test]
    fn one_hot_blocks_are_exclusive() {
        let (_, fused) = fused_for(lattice_batch("onehot", 27, 216, 1));
        for row in fused.iter_rows() {
            let ss: f32 = row[slots::SECONDARY_STRUCTURE].iter().sum();
            let aa: f32 = row[slots::AMINO_ACID].iter().sum();
            assert_eq!(ss, 1.0);
            assert_eq!(aa, 1.0);
        }
    }

    #[test]
    fn mask_weight_suppresses_exposure_descriptors() {
        let (mask, fused) = fused_for(lattice_batch("masked", 125, 1000, 5));
        let masked: Vec<usize> = (0..mask.len()).filter(|&i| mask[i] > 0.0).collect();
        assert_eq!(masked.len(), 5);
        for &i in &masked {
            let row = fused.row(i);
            assert_eq!(row[slots::EXPOSURE.start + 3], mask[i]);
            let unmasked = 1.0 - mask[i];
            let raw = row[slots::BURIAL.start + 2];
            assert!((row[slots::EXPOSURE.start] - raw * unmasked).abs() < 1e-6);
        }
    }

    #[test]
    fn relative_sasa_is_bounded() {
        let (_, fused) = fused_for(lattice_batch("sasa", 64, 512, 0));
        for row in fused.iter_rows() {
            let raw = row[slots::BURIAL.start + 2];
            assert!((0.0..=1.0).contains(&raw));
        }
    }

    #[test]
    fn chain_termini_have_no_curvature_or_backbone_torsions() {
        let (_, fused) = fused_for(lattice_batch("termini", 27, 216, 0));
        let first = fused.row(0);
        assert!(first[slots::CURVATURE].iter().all(|&v| v == 0.0));
        // phi needs the previous residue's carbonyl carbon
        assert_eq!(first[slots::DIHEDRALS.start + 2], 0.0);
    }

    #[test]
    fn curvature_terms_are_zero_exactly_where_chain_neighbors_are_missing() {
        use crate::core::models::builder::BatchBuilder;
        use crate::core::models::residue::{AminoAcid, SecondaryStructure};
        let mut builder = BatchBuilder::new("helix");
        for k in 0..6 {
            let t = (100.0f32 * k as f32).to_radians();
            builder
                .start_residue(AminoAcid::Alanine, 'A', SecondaryStructure::AlphaHelix)
                .add_atom(
                    "CA",
                    Element::C,
                    Point3::new(2.3 * t.cos(), 2.3 * t.sin(), 1.5 * k as f32),
                    0.0,
                );
        }
        let (_, fused) = fused_for(builder.build().unwrap());
        let curvature = |i: usize| fused.row(i)[slots::CURVATURE].to_vec();
        let torsion_norm = |c: &[f32]| c[1] * c[1] + c[2] * c[2];

        for terminus in [0, 5] {
            assert!(curvature(terminus).iter().all(|&v| v == 0.0));
        }
        for i in 1..=3 {
            let c = curvature(i);
            assert!(c[0] > 0.0 && c[3] > 0.0);
            assert!((torsion_norm(&c) - 1.0).abs() < 1e-5);
        }
        let last_interior = curvature(4);
        assert!(last_interior[0] > 0.0);
        assert_eq!(torsion_norm(&last_interior), 0.0);
    }

    struct FlatSampling;

    impl FeatureProvider for FlatSampling {
        fn name(&self) -> &str {
            "flat-sampling"
        }
        fn block(&self) -> ProviderBlock {
            ProviderBlock::Sampling
        }
        fn features(&self, batch: &PackedBatch) -> Vec<f32> {
            vec![0.75; batch.residue_count() * ProviderBlock::Sampling.width()]
        }
    }

    #[test]
    fn provider_blocks_replace_built_in_descriptors() {
        let batch = lattice_batch("provided", 27, 216, 0);
        let mask = compute_mask(&batch, &MaskConfig::default()).unwrap();
        let providers = ProviderSet::new().with_provider(Box::new(FlatSampling)).unwrap();
        let payload = StructurePayload::prepare(batch, &providers, None).unwrap();
        let fused = compute_fused(&payload, &mask, &FusionConfig::default()).unwrap();
        for row in fused.iter_rows() {
            assert!(row[slots::SAMPLING].iter().all(|&v| v == 0.75));
        }
    }

    #[test]
    fn fusion_is_deterministic() {
        let batch = lattice_batch("det", 64, 512, 2);
        let (_, a) = fused_for(batch.clone());
        let (_, b) = fused_for(batch);
        assert_eq!(a, b);
    }

    #[test]
    fn short_mask_is_an_integrity_error() {
        let payload = StructurePayload::from_batch(lattice_batch("short", 8, 64, 0));
        let err = compute_fused(&payload, &[0.0; 7], &FusionConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn chain_bounds_follow_chain_runs() {
        use crate::core::models::builder::BatchBuilder;
        use crate::core::models::residue::{AminoAcid, SecondaryStructure};
        let mut builder = BatchBuilder::new("chains");
        for (k, chain) in ['A', 'A', 'B', 'B', 'B'].into_iter().enumerate() {
            builder
                .start_residue(AminoAcid::Alanine, chain, SecondaryStructure::Coil)
                .add_atom("CA", Element::C, Point3::new(k as f32 * 3.8, 0.0, 0.0), 0.0);
        }
        let batch = builder.build().unwrap();
        assert_eq!(
            chain_bounds(&batch),
            vec![(0, 1), (0, 1), (2, 4), (2, 4), (2, 4)]
        );
    }

    #[test]
    fn flat_structure_fuses_to_finite_rows() {
        let (mask, fused) = fused_for(planar_batch("flat", 64, 4));
        assert_eq!(mask.iter().filter(|&&w| w > 0.0).count(), 4);
        assert_eq!((fused.rows(), fused.width()), (64, FUSED_DIM));
        assert!(fused.first_non_finite().is_none());
        for row in fused.iter_rows() {
            assert_eq!(row[slots::AMINO_ACID].iter().sum::<f32>(), 1.0);
            assert!((0.0..=1.0).contains(&row[slots::BURIAL.start + 2]));
        }
    }
}
