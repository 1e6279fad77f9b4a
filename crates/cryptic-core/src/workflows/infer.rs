use crate::engine::config::{ConfigError, PipelineConfig};
use crate::engine::error::EngineError;
use crate::engine::network::ParameterSnapshot;
use crate::engine::output::InferenceOutput;
use crate::engine::payload::StructurePayload;
use crate::engine::pipeline::Pipeline;
use crate::engine::progress::{ProgressReporter, StructureStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Shared flag checked before each structure is dispatched. A pipeline that
/// has already started always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What happened to one structure of a multi-structure run.
#[derive(Debug)]
pub enum BatchOutcome {
    Completed(Box<InferenceOutput>),
    /// Cancelled before its pipeline was dispatched.
    Cancelled,
    Failed(EngineError),
}

impl BatchOutcome {
    pub fn output(&self) -> Option<&InferenceOutput> {
        match self {
            BatchOutcome::Completed(output) => Some(output),
            _ => None,
        }
    }

    pub fn status(&self) -> StructureStatus {
        match self {
            BatchOutcome::Completed(_) => StructureStatus::Completed,
            BatchOutcome::Cancelled => StructureStatus::Cancelled,
            BatchOutcome::Failed(e) => StructureStatus::Failed(e.kind()),
        }
    }
}

#[instrument(skip_all, name = "inference_workflow")]
pub fn run(
    payload: &StructurePayload,
    config: &PipelineConfig,
    parameters: &ParameterSnapshot,
) -> Result<InferenceOutput, EngineError> {
    let pipeline = Pipeline::new(config.clone())?;
    pipeline.evaluate(payload, parameters)
}

/// Evaluates independent structures with at most `max_in_flight` pipelines
/// running at once. Outcomes are returned in input order; a failing structure
/// never affects the others.
#[instrument(skip_all, name = "batch_inference_workflow")]
pub fn run_many(
    payloads: &[StructurePayload],
    config: &PipelineConfig,
    parameters: &ParameterSnapshot,
    max_in_flight: usize,
    cancellation: &CancellationToken,
    reporter: &ProgressReporter,
) -> Result<Vec<BatchOutcome>, EngineError> {
    if max_in_flight == 0 {
        return Err(ConfigError::InvalidValue {
            name: "max_in_flight",
            reason: "at least one pipeline must be allowed in flight".to_string(),
        }
        .into());
    }
    let pipeline = Pipeline::new(config.clone())?;
    let task = reporter.task(payloads.len());

    let dispatch = |payload: &StructurePayload| {
        let outcome = if cancellation.is_cancelled() {
            BatchOutcome::Cancelled
        } else {
            match pipeline.evaluate(payload, parameters) {
                Ok(output) => BatchOutcome::Completed(Box::new(output)),
                Err(e) => {
                    warn!(batch = payload.id(), error = %e, "Structure failed.");
                    BatchOutcome::Failed(e)
                }
            }
        };
        reporter.structure_finished(payload.id(), outcome.status());
        outcome
    };

    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<BatchOutcome> = payloads.iter().map(dispatch).collect();

    #[cfg(feature = "parallel")]
    let outcomes: Vec<BatchOutcome> = {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_in_flight)
            .build()
            .map_err(|e| EngineError::device("*", "dispatch", format!("cannot start workers: {e}")))?;
        pool.install(|| payloads.par_iter().map(dispatch).collect())
    };

    drop(task);
    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, BatchOutcome::Completed(_)))
        .count();
    info!(
        structures = payloads.len(),
        completed,
        max_in_flight,
        "Batch inference finished."
    );
    Ok(outcomes)
}
