use crate::engine::config::{PipelineConfig, TrainerConfig};
use crate::engine::error::EngineError;
use crate::engine::fitness::FitnessFunction;
use crate::engine::network::NetworkParameters;
use crate::engine::pipeline::Pipeline;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::trainer::{EvolutionTrainer, GenerationStats, TrainingExample};
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    GenerationBudget,
    /// Mean reward stopped improving; `generation` is the last one run.
    Plateau { generation: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub generations: Vec<GenerationStats>,
    pub stop_reason: StopReason,
}

impl TrainingReport {
    pub fn best_mean_reward(&self) -> Option<f64> {
        self.generations
            .iter()
            .map(|g| g.mean_reward)
            .max_by(f64::total_cmp)
    }
}

#[derive(Debug, Clone)]
pub struct TrainingResult {
    pub parameters: NetworkParameters,
    pub report: TrainingReport,
}

#[instrument(skip_all, name = "training_workflow")]
pub fn run(
    trainer_config: TrainerConfig,
    pipeline_config: PipelineConfig,
    initial: NetworkParameters,
    examples: Vec<TrainingExample>,
    fitness: Box<dyn FitnessFunction>,
    reporter: &ProgressReporter,
) -> Result<TrainingResult, EngineError> {
    let budget = trainer_config.generations;
    let plateau = trainer_config.plateau;
    let checkpoint_path = trainer_config.checkpoint_path.clone();
    info!(
        population = trainer_config.population_size,
        budget,
        structures = examples.len(),
        fitness = fitness.name(),
        "Starting evolutionary training."
    );

    let pipeline = Pipeline::new(pipeline_config)?;
    let mut trainer = EvolutionTrainer::new(trainer_config, pipeline, initial, examples, fitness)?;

    let mut history = Vec::new();
    let mut stop_reason = StopReason::GenerationBudget;
    let mut best = f64::NEG_INFINITY;
    let mut stale = 0usize;

    for _ in 0..budget {
        reporter.report(Progress::GenerationStart {
            generation: trainer.generation(),
        });
        let stats = trainer.step(reporter)?;
        history.push(stats);

        if let Some(plateau) = plateau {
            if stats.mean_reward > best + plateau.min_delta {
                best = stats.mean_reward;
                stale = 0;
            } else {
                stale += 1;
                if stale >= plateau.patience {
                    stop_reason = StopReason::Plateau {
                        generation: stats.generation,
                    };
                    info!(generation = stats.generation, "Mean reward plateaued.");
                    break;
                }
            }
        }
    }

    if let Some(path) = &checkpoint_path {
        trainer.save_checkpoint(path)?;
    }

    info!(
        generations = history.len(),
        updates = trainer.updates_applied(),
        "Training finished."
    );
    Ok(TrainingResult {
        parameters: trainer.into_parameters(),
        report: TrainingReport {
            generations: history,
            stop_reason,
        },
    })
}
