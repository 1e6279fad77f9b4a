use crate::core::features::slots::{CRYPTIC_DIM, FUSED_DIM, MERGED_CRYPTIC_OFFSET, MERGED_DIM};
use crate::engine::arena::{BufferId, DeviceArena, FeatureMatrix};
use crate::engine::error::EngineError;
use tracing::{debug, instrument};

pub const STAGE: &str = "merge";

/// Concatenates fused and cryptic rows into `residues x 140`.
///
/// Row `i` is `fused[i]` in slots `0..136` followed by `cryptic[i]` in
/// `136..140`. Any width or row-count disagreement aborts the batch.
pub fn merge_rows(
    batch: &str,
    fused: &FeatureMatrix,
    cryptic: &FeatureMatrix,
) -> Result<FeatureMatrix, EngineError> {
    if fused.width() != FUSED_DIM {
        return Err(EngineError::integrity(
            batch,
            STAGE,
            format!("fused rows have {} slots, expected {FUSED_DIM}", fused.width()),
        ));
    }
    if cryptic.width() != CRYPTIC_DIM {
        return Err(EngineError::integrity(
            batch,
            STAGE,
            format!(
                "cryptic rows have {} slots, expected {CRYPTIC_DIM}",
                cryptic.width()
            ),
        ));
    }
    if fused.rows() != cryptic.rows() {
        return Err(EngineError::integrity(
            batch,
            STAGE,
            format!(
                "{} fused rows but {} cryptic rows",
                fused.rows(),
                cryptic.rows()
            ),
        ));
    }

    let mut data = Vec::with_capacity(fused.rows() * MERGED_DIM);
    for (f, c) in fused.iter_rows().zip(cryptic.iter_rows()) {
        data.extend_from_slice(f);
        data.extend_from_slice(c);
    }
    FeatureMatrix::from_vec(fused.rows(), MERGED_DIM, data).ok_or_else(|| {
        EngineError::integrity(batch, STAGE, "merged buffer length is not rows x 140")
    })
}

#[instrument(skip_all, name = "merge_stage")]
pub fn run(
    arena: &mut DeviceArena<'_>,
    fused: BufferId,
    cryptic: BufferId,
) -> Result<BufferId, EngineError> {
    let label = arena.label().to_string();
    let merged = merge_rows(&label, arena.matrix(fused, STAGE)?, arena.matrix(cryptic, STAGE)?)?;
    debug!(
        batch = %label,
        residues = merged.rows(),
        cryptic_offset = MERGED_CRYPTIC_OFFSET,
        "Feature vectors merged."
    );
    arena.store(STAGE, merged)
}
