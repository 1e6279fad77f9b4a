use super::arena::DeviceArena;
use super::config::PipelineConfig;
use super::error::EngineError;
use super::network::ParameterSnapshot;
use super::output::{ActionValues, InferenceOutput};
use super::payload::StructurePayload;
use super::stages::{cryptic, fusion, inference, mask, merge};
use tracing::{debug, info, instrument};

const STAGE: &str = "pipeline";

/// The per-structure stage chain: mask, fusion, cryptic, merge, inference.
///
/// Each [`evaluate`](Self::evaluate) call owns a fresh [`DeviceArena`]; nothing
/// is shared between calls, so one `Pipeline` may serve many threads.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[instrument(skip_all, name = "pipeline", fields(batch = payload.id()))]
    pub fn evaluate(
        &self,
        payload: &StructurePayload,
        snapshot: &ParameterSnapshot,
    ) -> Result<InferenceOutput, EngineError> {
        if snapshot.architecture() != &self.config.architecture {
            return Err(EngineError::data(
                payload.id(),
                format!(
                    "parameters for hidden layers {:?} cannot drive a pipeline configured for {:?}",
                    snapshot.architecture().hidden_layers,
                    self.config.architecture.hidden_layers
                ),
            ));
        }

        let batch = payload.batch();
        debug!(
            residues = batch.residue_count(),
            atoms = batch.atom_count(),
            "Dispatching structure."
        );

        let mut arena = DeviceArena::new(payload.id(), self.config.memory_budget_bytes);
        let structure = arena.upload(payload)?;

        let mask_id = mask::run(&mut arena, structure, &self.config.mask)?;
        let masked_residues = arena
            .matrix(mask_id, STAGE)?
            .as_slice()
            .iter()
            .filter(|&&w| w > 0.0)
            .count();

        let fused_id = fusion::run(&mut arena, structure, mask_id, &self.config.fusion)?;
        arena.free(mask_id);

        let (cryptic_id, cryptic_report) =
            cryptic::run(&mut arena, structure, fused_id, &self.config.cryptic)?;
        let merged_id = merge::run(&mut arena, fused_id, cryptic_id)?;
        arena.free(fused_id);
        arena.free(cryptic_id);

        let q_id = inference::run(&mut arena, merged_id, snapshot)?;
        arena.free(merged_id);

        let q = arena.download(q_id, STAGE)?;
        let transfers = arena.transfers();
        info!(
            residues = q.rows(),
            masked = masked_residues,
            peak_bytes = arena.peak_bytes(),
            "Structure evaluated."
        );

        Ok(InferenceOutput {
            structure_id: payload.id().to_string(),
            action_values: ActionValues::new(q),
            masked_residues,
            cryptic_report,
            transfers,
        })
    }
}
