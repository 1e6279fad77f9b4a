use super::checkpoint::{self, LoadedCheckpoint};
use super::config::TrainerConfig;
use super::error::EngineError;
use super::evolution::{Population, apply_update, compute_update, normalize_rewards};
use super::fitness::{FitnessFunction, SiteLabels};
use super::network::{NetworkArchitecture, NetworkParameters, ParameterSnapshot};
use super::payload::StructurePayload;
use super::pipeline::Pipeline;
use super::progress::{Progress, ProgressReporter};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A prepared structure together with its known cryptic sites.
#[derive(Debug, Clone)]
pub struct TrainingExample {
    payload: StructurePayload,
    labels: SiteLabels,
}

impl TrainingExample {
    pub fn new(payload: StructurePayload, labels: SiteLabels) -> Result<Self, EngineError> {
        if labels.len() != payload.batch().residue_count() {
            return Err(EngineError::data(
                payload.id(),
                format!(
                    "{} residues but {} labels",
                    payload.batch().residue_count(),
                    labels.len()
                ),
            ));
        }
        Ok(Self { payload, labels })
    }

    pub fn payload(&self) -> &StructurePayload {
        &self.payload
    }

    pub fn labels(&self) -> &SiteLabels {
        &self.labels
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationStats {
    pub generation: u64,
    pub members_evaluated: usize,
    pub mean_reward: f64,
    pub max_reward: f64,
    pub min_reward: f64,
    /// Euclidean norm of the applied parameter change.
    pub update_norm: f64,
}

/// Owns the authoritative parameter vector and advances it one generation
/// per [`step`](Self::step).
///
/// Members only ever see immutable snapshots of `theta +- eps`; `theta` itself
/// changes after every member of the generation has been scored.
pub struct EvolutionTrainer {
    config: TrainerConfig,
    pipeline: Pipeline,
    fitness: Box<dyn FitnessFunction>,
    examples: Vec<TrainingExample>,
    architecture: Arc<NetworkArchitecture>,
    parameters: NetworkParameters,
    generation: u64,
    updates_applied: u64,
}

impl EvolutionTrainer {
    pub fn new(
        config: TrainerConfig,
        pipeline: Pipeline,
        parameters: NetworkParameters,
        examples: Vec<TrainingExample>,
        fitness: Box<dyn FitnessFunction>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        if parameters.architecture() != &pipeline.config().architecture {
            return Err(EngineError::Data {
                message: format!(
                    "initial parameters have hidden layers {:?}, pipeline expects {:?}",
                    parameters.architecture().hidden_layers,
                    pipeline.config().architecture.hidden_layers
                ),
            });
        }
        if examples.is_empty() {
            return Err(EngineError::Data {
                message: "training needs at least one labelled structure".to_string(),
            });
        }
        let architecture = Arc::new(parameters.architecture().clone());
        Ok(Self {
            config,
            pipeline,
            fitness,
            examples,
            architecture,
            parameters,
            generation: 0,
            updates_applied: 0,
        })
    }

    /// Continues a run saved with [`save_checkpoint`](Self::save_checkpoint).
    ///
    /// The generation counter is restored with the parameters, so the resumed
    /// run draws the same noise an uninterrupted run would have drawn.
    pub fn resume(
        config: TrainerConfig,
        pipeline: Pipeline,
        checkpoint: LoadedCheckpoint,
        examples: Vec<TrainingExample>,
        fitness: Box<dyn FitnessFunction>,
    ) -> Result<Self, EngineError> {
        let trainer = Self::new(config, pipeline, checkpoint.parameters, examples, fitness)?;
        Ok(trainer.with_generation(checkpoint.generation))
    }

    /// Sets the generation the next [`step`](Self::step) will run.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn updates_applied(&self) -> u64 {
        self.updates_applied
    }

    #[inline]
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    #[inline]
    pub fn parameters(&self) -> &NetworkParameters {
        &self.parameters
    }

    pub fn into_parameters(self) -> NetworkParameters {
        self.parameters
    }

    pub fn snapshot(&self) -> ParameterSnapshot {
        self.parameters.snapshot()
    }

    pub fn save_checkpoint(&self, path: &Path) -> Result<(), EngineError> {
        checkpoint::save(path, &self.parameters, self.generation)
    }

    /// Mean fitness of one parameter vector over every training example.
    fn member_reward(&self, values: Vec<f32>) -> Result<f64, EngineError> {
        let snapshot = ParameterSnapshot::from_parts(Arc::clone(&self.architecture), values)?;
        let mut total = 0.0;
        for example in &self.examples {
            let output = self.pipeline.evaluate(&example.payload, &snapshot)?;
            total += self.fitness.score(&output.action_values, &example.labels)?;
        }
        Ok(total / self.examples.len() as f64)
    }

    /// Runs one generation: sample, evaluate every member, then update.
    ///
    /// Any member failure aborts the generation before the update; the
    /// parameters and generation counter are left untouched.
    #[instrument(skip_all, name = "generation", fields(generation = self.generation))]
    pub fn step(&mut self, reporter: &ProgressReporter) -> Result<GenerationStats, EngineError> {
        let generation = self.generation;
        let population = Population::sample(
            self.config.seed,
            generation,
            self.config.pair_count(),
            self.parameters.len(),
            self.config.sigma,
        );
        let member_count = population.member_count();
        let task = reporter.task(member_count);

        let members: Vec<usize> = (0..member_count).collect();
        let base = self.parameters.values();

        #[cfg(not(feature = "parallel"))]
        let iterator = members.iter();

        #[cfg(feature = "parallel")]
        let iterator = members.par_iter();

        let outcomes: Vec<Result<f64, EngineError>> = iterator
            .map(|&m| {
                let reward = self.member_reward(population.member_parameters(base, m));
                reporter.report(Progress::MemberEvaluated { generation, member: m });
                reward
            })
            .collect();
        drop(task);

        let mut rewards = Vec::with_capacity(member_count);
        for (member, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(reward) => rewards.push(reward),
                Err(source) => {
                    warn!(generation, member, error = %source, "Member failed; aborting generation.");
                    return Err(EngineError::generation_aborted(generation, member, source));
                }
            }
        }

        if let Some(member) = rewards.iter().position(|r| !r.is_finite()) {
            return Err(EngineError::TrainingDivergence {
                generation,
                message: format!("member {member} produced a non-finite reward"),
            });
        }
        let max_reward = rewards.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min_reward = rewards.iter().copied().fold(f64::INFINITY, f64::min);
        if max_reward - min_reward == 0.0 {
            return Err(EngineError::TrainingDivergence {
                generation,
                message: format!("all {member_count} rewards collapsed to {max_reward}"),
            });
        }
        let mean_reward = rewards.iter().sum::<f64>() / member_count as f64;

        let normalized = normalize_rewards(&rewards, self.config.normalization);
        let delta = compute_update(
            &population,
            &normalized,
            self.config.step_size,
            self.config.sigma,
        );
        let update_norm = delta.iter().map(|d| d * d).sum::<f64>().sqrt();
        apply_update(self.parameters.values_mut(), &delta);
        self.generation += 1;
        self.updates_applied += 1;

        debug!(generation, update_norm, "Parameters updated.");
        info!(generation, mean_reward, max_reward, "Generation complete.");
        reporter.report(Progress::GenerationComplete {
            generation,
            mean_reward,
            max_reward,
        });

        Ok(GenerationStats {
            generation,
            members_evaluated: member_count,
            mean_reward,
            max_reward,
            min_reward,
            update_norm,
        })
    }
}
