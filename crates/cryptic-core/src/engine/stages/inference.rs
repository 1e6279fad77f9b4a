//! Dueling-network evaluation of the merged feature rows.

use crate::engine::arena::{BufferId, DeviceArena, FeatureMatrix};
use crate::engine::error::EngineError;
use crate::engine::network::{DenseLayer, NetworkView, ParameterSnapshot};
use tracing::{debug, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub const STAGE: &str = "inference";

/// `y = W x + b` with `f64` accumulation over `f32` weights.
fn dense(layer: &DenseLayer<'_>, input: &[f64], relu: bool) -> Vec<f64> {
    layer
        .weights
        .chunks_exact(layer.shape.inputs)
        .zip(layer.bias)
        .map(|(row, &bias)| {
            let sum = row
                .iter()
                .zip(input)
                .fold(bias as f64, |acc, (&w, &x)| acc + w as f64 * x);
            if relu { sum.max(0.0) } else { sum }
        })
        .collect()
}

/// `Q(s, a) = V(s) + A(s, a) - mean_a A(s, .)` for one residue.
pub fn action_values(view: &NetworkView<'_>, features: &[f32]) -> Vec<f64> {
    let mut hidden: Vec<f64> = features.iter().map(|&v| v as f64).collect();
    for layer in &view.encoder {
        hidden = dense(layer, &hidden, true);
    }
    let value = dense(&view.value_head, &hidden, false)[0];
    let advantages = dense(&view.advantage_head, &hidden, false);
    let mean = advantages.iter().sum::<f64>() / advantages.len() as f64;
    advantages.iter().map(|a| value + a - mean).collect()
}

/// Evaluates every row of `merged` in one invocation.
///
/// Rows are independent; the result does not depend on evaluation order.
pub fn evaluate_rows(
    batch: &str,
    merged: &FeatureMatrix,
    snapshot: &ParameterSnapshot,
) -> Result<FeatureMatrix, EngineError> {
    let architecture = snapshot.architecture();
    architecture
        .validate()
        .map_err(|e| EngineError::data(batch, e.to_string()))?;
    if merged.width() != architecture.input_dim() {
        return Err(EngineError::integrity(
            batch,
            STAGE,
            format!(
                "input rows have {} slots, network expects {}",
                merged.width(),
                architecture.input_dim()
            ),
        ));
    }
    let view = snapshot.view();
    let rows: Vec<&[f32]> = merged.iter_rows().collect();

    #[cfg(not(feature = "parallel"))]
    let iterator = rows.iter();

    #[cfg(feature = "parallel")]
    let iterator = rows.par_iter();

    let q_rows: Vec<Vec<f32>> = iterator
        .map(|row| {
            action_values(&view, row)
                .into_iter()
                .map(|q| q as f32)
                .collect()
        })
        .collect();

    let q = FeatureMatrix::from_rows(architecture.action_count(), &q_rows)
        .ok_or_else(|| EngineError::integrity(batch, STAGE, "action-value width mismatch"))?;
    if let Some((residue, action)) = q.first_non_finite() {
        return Err(EngineError::device(
            batch,
            STAGE,
            format!("non-finite action value at residue {residue}, action {action}"),
        ));
    }
    Ok(q)
}

#[instrument(skip_all, name = "inference_stage")]
pub fn run(
    arena: &mut DeviceArena<'_>,
    merged: BufferId,
    snapshot: &ParameterSnapshot,
) -> Result<BufferId, EngineError> {
    let label = arena.label().to_string();
    let q = evaluate_rows(&label, arena.matrix(merged, STAGE)?, snapshot)?;
    debug!(
        batch = %label,
        residues = q.rows(),
        parameters = snapshot.values().len(),
        "Action values computed."
    );
    arena.store(STAGE, q)
}
