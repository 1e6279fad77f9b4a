//! The four cryptic-site scores: flexibility, pocket depth, exposure variance
//! and contact-graph centrality.
//!
//! Flexibility and exposure variance use the payload's conformational ensemble
//! when one was uploaded. Without it both fall back to single-structure proxies
//! and the returned [`CrypticReport`] says so.

use crate::core::features::slots::{
    self, CENTRALITY, CRYPTIC_DIM, EXPOSURE_VARIANCE, FLEXIBILITY, FUSED_DIM, POCKET_DEPTH,
};
use crate::core::models::batch::PackedBatch;
use crate::core::models::ensemble::ConformationalEnsemble;
use crate::core::utils::geometry::centroid;
use crate::engine::arena::{BufferId, DeviceArena, FeatureMatrix};
use crate::engine::config::CrypticConfig;
use crate::engine::error::EngineError;
use crate::engine::payload::StructurePayload;
use crate::engine::spatial::PointIndex;
use nalgebra::Vector3;
use tracing::{debug, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub const STAGE: &str = "cryptic";

const FLEXIBILITY_RADIUS: f64 = 15.0;
const POCKET_RADIUS: f64 = 10.0;
const POCKET_CONE_COSINE: f64 = 0.9;
const POCKET_EXPOSURE_SATURATION: f64 = 0.25;
const ENSEMBLE_EXPOSURE_RADIUS: f64 = 10.0;
const ENSEMBLE_EXPOSURE_NORM: f64 = 140.0;
const VARIANCE_SCALE: f64 = 4.0;

/// Where a score's information came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreSource {
    Ensemble { conformers: usize },
    /// Reduced-information computation from the uploaded structure alone.
    SingleConformation { confidence: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrypticReport {
    pub flexibility: ScoreSource,
    pub exposure_variance: ScoreSource,
}

impl CrypticReport {
    fn for_payload(payload: &StructurePayload, config: &CrypticConfig) -> Self {
        let source = match payload.ensemble() {
            Some(ensemble) => ScoreSource::Ensemble {
                conformers: ensemble.conformer_count(),
            },
            None => ScoreSource::SingleConformation {
                confidence: config.single_conformation_confidence,
            },
        };
        Self {
            flexibility: source,
            exposure_variance: source,
        }
    }

    pub fn used_ensemble(&self) -> bool {
        matches!(self.flexibility, ScoreSource::Ensemble { .. })
    }
}

/// The 26 unit directions toward the faces, edges and corners of a cube.
fn cube_directions() -> Vec<Vector3<f64>> {
    let mut directions = Vec::with_capacity(26);
    for x in -1i32..=1 {
        for y in -1i32..=1 {
            for z in -1i32..=1 {
                if (x, y, z) != (0, 0, 0) {
                    directions.push(Vector3::new(x as f64, y as f64, z as f64).normalize());
                }
            }
        }
    }
    directions
}

/// Atom indices representing a residue: its CA, or all of its atoms.
fn anchor_atoms(batch: &PackedBatch, residue: usize) -> Vec<usize> {
    let range = batch.residues()[residue].atom_range.clone();
    match batch.atoms()[range.clone()]
        .iter()
        .position(|a| a.name.trim() == "CA")
    {
        Some(offset) => vec![range.start + offset],
        None => range.collect(),
    }
}

/// Max-normalized principal eigenvector of `A + I`, where `A` links residues
/// whose anchors lie within `cutoff`.
fn contact_centrality(anchors: &PointIndex, cutoff: f64, iterations: usize) -> Vec<f64> {
    let n = anchors.len();
    let adjacency: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            anchors
                .within(anchors.point(i), cutoff)
                .into_iter()
                .map(|hit| hit.index)
                .collect()
        })
        .collect();

    let mut vector = vec![1.0 / (n as f64).sqrt(); n];
    for _ in 0..iterations {
        let next: Vec<f64> = adjacency
            .iter()
            .map(|links| links.iter().map(|&j| vector[j]).sum())
            .collect();
        let norm = next.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm < 1e-300 {
            break;
        }
        vector = next.into_iter().map(|v| v / norm).collect();
    }
    let max = vector.iter().copied().fold(0.0, f64::max);
    if max > 0.0 {
        vector.iter_mut().for_each(|v| *v /= max);
    }
    vector
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

struct EnsembleGeometry<'e> {
    ensemble: &'e ConformationalEnsemble,
    conformer_indices: Vec<PointIndex>,
}

impl<'e> EnsembleGeometry<'e> {
    fn new(ensemble: &'e ConformationalEnsemble) -> Self {
        let conformer_indices = ensemble
            .conformers()
            .iter()
            .map(|c| PointIndex::new(c.iter().map(|p| p.cast()).collect()))
            .collect();
        Self {
            ensemble,
            conformer_indices,
        }
    }

    fn flexibility(&self, atoms: &[usize]) -> f64 {
        let rmsf = atoms
            .iter()
            .filter_map(|&a| self.ensemble.atom_rmsf(a))
            .sum::<f64>()
            / atoms.len() as f64;
        rmsf / (rmsf + 1.0)
    }

    fn exposure_variance(&self, atoms: &[usize]) -> f64 {
        let exposures: Vec<f64> = self
            .conformer_indices
            .iter()
            .filter_map(|index| {
                let center = centroid(atoms.iter().map(|&a| *index.point(a)))?;
                let count = index.count_within(&center, ENSEMBLE_EXPOSURE_RADIUS) as f64;
                Some(1.0 - (count / ENSEMBLE_EXPOSURE_NORM).min(1.0))
            })
            .collect();
        (variance(&exposures) * VARIANCE_SCALE).clamp(0.0, 1.0)
    }
}

/// Computes the `residues x 4` cryptic matrix from the payload and its fused
/// descriptors.
pub fn compute_cryptic(
    payload: &StructurePayload,
    fused: &FeatureMatrix,
    config: &CrypticConfig,
) -> Result<(FeatureMatrix, CrypticReport), EngineError> {
    let batch = payload.batch();
    if fused.width() != FUSED_DIM || fused.rows() != batch.residue_count() {
        return Err(EngineError::integrity(
            batch.id(),
            STAGE,
            format!(
                "fused input is {}x{}, expected {}x{FUSED_DIM}",
                fused.rows(),
                fused.width(),
                batch.residue_count()
            ),
        ));
    }

    let mut anchors = Vec::with_capacity(batch.residue_count());
    for i in 0..batch.residue_count() {
        let anchor = batch.anchor_position(i).ok_or_else(|| {
            EngineError::integrity(batch.id(), STAGE, format!("residue {i} has an empty atom range"))
        })?;
        anchors.push(anchor);
    }
    let anchors = PointIndex::new(anchors);
    let atoms = PointIndex::new(batch.atoms().iter().map(|a| a.position.cast()).collect());
    let centrality = contact_centrality(&anchors, config.contact_cutoff, config.power_iterations);
    let ensemble = payload.ensemble().map(EnsembleGeometry::new);
    let directions = cube_directions();
    let report = CrypticReport::for_payload(payload, config);

    let residue_indices: Vec<usize> = (0..batch.residue_count()).collect();

    #[cfg(not(feature = "parallel"))]
    let iterator = residue_indices.iter();

    #[cfg(feature = "parallel")]
    let iterator = residue_indices.par_iter();

    let rows: Vec<[f32; CRYPTIC_DIM]> = iterator
        .map(|&i| {
            let anchor = *anchors.point(i);
            let fused_row = fused.row(i);
            let mut row = [0.0f32; CRYPTIC_DIM];

            let (flexibility, exposure_variance) = match &ensemble {
                Some(geometry) => {
                    let members = anchor_atoms(batch, i);
                    (
                        geometry.flexibility(&members),
                        geometry.exposure_variance(&members),
                    )
                }
                None => {
                    let wcn: f64 = anchors
                        .within(&anchor, FLEXIBILITY_RADIUS)
                        .iter()
                        .filter(|n| n.index != i)
                        .map(|n| 1.0 / (n.distance * n.distance).max(1.0))
                        .sum();
                    // neighbor-count exposure at 6, 8, 10 and 12 A
                    let exposures: Vec<f64> = fused_row[slots::CONTACTS.start + 1..slots::CONTACTS.start + 5]
                        .iter()
                        .map(|&c| 1.0 - (c as f64).min(1.0))
                        .collect();
                    let spread = variance(&exposures) * VARIANCE_SCALE;
                    (
                        1.0 / (1.0 + wcn),
                        (spread * config.single_conformation_confidence).clamp(0.0, 1.0),
                    )
                }
            };

            let center = batch.sidechain_centroid(i).unwrap_or(anchor);
            let surroundings: Vec<Vector3<f64>> = atoms
                .within(&center, POCKET_RADIUS)
                .into_iter()
                .filter(|n| batch.atoms()[n.index].residue_index != i && n.distance > 1e-6)
                .map(|n| (atoms.point(n.index) - center) / n.distance)
                .collect();
            let enclosed = directions
                .iter()
                .filter(|u| surroundings.iter().any(|v| v.dot(u) > POCKET_CONE_COSINE))
                .count();
            let raw_exposure = fused_row[slots::BURIAL.start + 2] as f64;
            let pocket = enclosed as f64 / directions.len() as f64
                * (raw_exposure / POCKET_EXPOSURE_SATURATION).min(1.0);

            row[FLEXIBILITY] = flexibility as f32;
            row[POCKET_DEPTH] = pocket as f32;
            row[EXPOSURE_VARIANCE] = exposure_variance as f32;
            row[CENTRALITY] = centrality[i] as f32;
            row
        })
        .collect();

    let matrix = FeatureMatrix::from_rows(CRYPTIC_DIM, &rows)
        .ok_or_else(|| EngineError::integrity(batch.id(), STAGE, "cryptic row width mismatch"))?;
    if let Some((row, column)) = matrix.first_non_finite() {
        return Err(EngineError::device(
            batch.id(),
            STAGE,
            format!("non-finite cryptic score at residue {row}, column {column}"),
        ));
    }
    Ok((matrix, report))
}

#[instrument(skip_all, name = "cryptic_stage")]
pub fn run(
    arena: &mut DeviceArena<'_>,
    structure: BufferId,
    fused: BufferId,
    config: &CrypticConfig,
) -> Result<(BufferId, CrypticReport), EngineError> {
    let payload = arena.structure(structure, STAGE)?;
    let (scores, report) = compute_cryptic(payload, arena.matrix(fused, STAGE)?, config)?;
    debug!(
        batch = payload.id(),
        residues = scores.rows(),
        ensemble = report.used_ensemble(),
        "Cryptic scores computed."
    );
    let id = arena.store(STAGE, scores)?;
    Ok((id, report))
}
