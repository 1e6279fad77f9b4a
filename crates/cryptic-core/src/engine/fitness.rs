//! Reward functions that score inference output against known cryptic sites.

use super::error::EngineError;
use super::network::CrypticAction;
use super::output::ActionValues;
use crate::core::utils::stats::{average_ranks, pearson};

/// Known cryptic-site labels for one structure, in residue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteLabels {
    structure_id: String,
    labels: Vec<bool>,
}

impl SiteLabels {
    /// Labels must contain at least one positive and one negative residue.
    pub fn new(structure_id: impl Into<String>, labels: Vec<bool>) -> Result<Self, EngineError> {
        let structure_id = structure_id.into();
        let positives = labels.iter().filter(|&&l| l).count();
        if positives == 0 || positives == labels.len() {
            return Err(EngineError::data(
                &structure_id,
                format!(
                    "labels need both cryptic and non-cryptic residues ({positives} of {} positive)",
                    labels.len()
                ),
            ));
        }
        Ok(Self {
            structure_id,
            labels,
        })
    }

    pub fn structure_id(&self) -> &str {
        &self.structure_id
    }

    pub fn labels(&self) -> &[bool] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&l| l).count()
    }
}

pub trait FitnessFunction: Send + Sync {
    fn name(&self) -> &str;

    /// Higher is better.
    fn score(&self, values: &ActionValues, labels: &SiteLabels) -> Result<f64, EngineError>;
}

fn cryptic_scores(values: &ActionValues, labels: &SiteLabels) -> Result<Vec<f64>, EngineError> {
    if values.residue_count() != labels.len() {
        return Err(EngineError::data(
            labels.structure_id(),
            format!(
                "{} labels but {} scored residues",
                labels.len(),
                values.residue_count()
            ),
        ));
    }
    Ok(values
        .column(CrypticAction::PredictCryptic)
        .into_iter()
        .map(f64::from)
        .collect())
}

/// Pearson correlation between the cryptic Q-value and the 0/1 labels.
/// Constant predictions score 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationFitness;

impl FitnessFunction for CorrelationFitness {
    fn name(&self) -> &str {
        "correlation"
    }

    fn score(&self, values: &ActionValues, labels: &SiteLabels) -> Result<f64, EngineError> {
        let scores = cryptic_scores(values, labels)?;
        let targets: Vec<f64> = labels.labels().iter().map(|&l| f64::from(u8::from(l))).collect();
        Ok(pearson(&scores, &targets).unwrap_or(0.0))
    }
}

/// Area under the ROC curve of the cryptic Q-value, via average ranks.
#[derive(Debug, Clone, Copy, Default)]
pub struct RocAucFitness;

impl FitnessFunction for RocAucFitness {
    fn name(&self) -> &str {
        "roc-auc"
    }

    fn score(&self, values: &ActionValues, labels: &SiteLabels) -> Result<f64, EngineError> {
        let scores = cryptic_scores(values, labels)?;
        let ranks = average_ranks(&scores);
        let positives = labels.positives() as f64;
        let negatives = labels.len() as f64 - positives;
        let rank_sum: f64 = ranks
            .iter()
            .zip(labels.labels())
            .filter(|(_, l)| **l)
            .map(|(r, _)| r)
            .sum();
        Ok((rank_sum - positives * (positives + 1.0) / 2.0) / (positives * negatives))
    }
}
