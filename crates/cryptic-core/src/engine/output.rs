use super::arena::{FeatureMatrix, TransferStats};
use super::network::CrypticAction;
use super::stages::cryptic::CrypticReport;

/// Per-residue action values, `residues x CrypticAction::COUNT`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionValues {
    matrix: FeatureMatrix,
}

impl ActionValues {
    pub(crate) fn new(matrix: FeatureMatrix) -> Self {
        Self { matrix }
    }

    #[inline]
    pub fn residue_count(&self) -> usize {
        self.matrix.rows()
    }

    #[inline]
    pub fn q(&self, residue: usize, action: CrypticAction) -> f32 {
        self.matrix.row(residue)[action.index()]
    }

    #[inline]
    pub fn row(&self, residue: usize) -> &[f32] {
        self.matrix.row(residue)
    }

    /// The Q-values of one action for every residue.
    pub fn column(&self, action: CrypticAction) -> Vec<f32> {
        self.matrix
            .iter_rows()
            .map(|row| row[action.index()])
            .collect()
    }

    /// Highest-valued action; ties resolve to the earlier action.
    pub fn best_action(&self, residue: usize) -> CrypticAction {
        let row = self.row(residue);
        let mut best = 0;
        for (k, q) in row.iter().enumerate().skip(1) {
            if *q > row[best] {
                best = k;
            }
        }
        CrypticAction::from_index(best).unwrap_or(CrypticAction::Skip)
    }

    pub fn as_matrix(&self) -> &FeatureMatrix {
        &self.matrix
    }
}

/// Result of one structure's pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    pub structure_id: String,
    pub action_values: ActionValues,
    /// Residues with a non-zero glycan mask weight.
    pub masked_residues: usize,
    pub cryptic_report: CrypticReport,
    pub transfers: TransferStats,
}

impl InferenceOutput {
    pub fn top_candidates(&self, k: usize) -> Vec<CrypticCandidate> {
        rank_candidates(&self.action_values, k)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrypticCandidate {
    pub residue: usize,
    /// `Q(residue, PredictCryptic)`.
    pub score: f32,
    /// Logistic of the margin over the best competing action, in `(0, 1)`.
    pub confidence: f32,
}

/// The `k` residues with the highest cryptic Q-value, best first.
pub fn rank_candidates(values: &ActionValues, k: usize) -> Vec<CrypticCandidate> {
    let mut candidates: Vec<CrypticCandidate> = (0..values.residue_count())
        .map(|residue| {
            let row = values.row(residue);
            let score = row[CrypticAction::PredictCryptic.index()];
            let rival = row
                .iter()
                .enumerate()
                .filter(|(a, _)| *a != CrypticAction::PredictCryptic.index())
                .map(|(_, q)| *q as f64)
                .fold(f64::NEG_INFINITY, f64::max);
            let margin = score as f64 - rival;
            CrypticCandidate {
                residue,
                score,
                confidence: (1.0 / (1.0 + (-margin).exp())) as f32,
            }
        })
        .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.residue.cmp(&b.residue)));
    candidates.truncate(k);
    candidates
}
