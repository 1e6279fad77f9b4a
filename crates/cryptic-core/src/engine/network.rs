use super::config::ConfigError;
use super::error::EngineError;
use crate::core::features::slots::MERGED_DIM;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The discrete actions scored for every residue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrypticAction {
    PredictCryptic,
    PredictExposed,
    PredictEpitope,
    Skip,
}

impl CrypticAction {
    pub const ALL: [CrypticAction; 4] = [
        CrypticAction::PredictCryptic,
        CrypticAction::PredictExposed,
        CrypticAction::PredictEpitope,
        CrypticAction::Skip,
    ];

    pub const COUNT: usize = Self::ALL.len();

    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for CrypticAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CrypticAction::PredictCryptic => "predict-cryptic",
            CrypticAction::PredictExposed => "predict-exposed",
            CrypticAction::PredictEpitope => "predict-epitope",
            CrypticAction::Skip => "skip",
        })
    }
}

/// Shape of the dueling network: `MERGED_DIM -> hidden_layers... -> {value: 1, advantage: 4}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkArchitecture {
    pub hidden_layers: Vec<usize>,
}

impl Default for NetworkArchitecture {
    fn default() -> Self {
        Self {
            hidden_layers: vec![128, 128],
        }
    }
}

/// `(inputs, outputs)` of one dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerShape {
    pub inputs: usize,
    pub outputs: usize,
}

impl LayerShape {
    #[inline]
    pub fn parameter_count(&self) -> usize {
        self.inputs * self.outputs + self.outputs
    }
}

impl NetworkArchitecture {
    pub fn new(hidden_layers: Vec<usize>) -> Self {
        Self { hidden_layers }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hidden_layers.is_empty() || self.hidden_layers.contains(&0) {
            return Err(ConfigError::InvalidValue {
                name: "architecture.hidden_layers",
                reason: format!(
                    "needs at least one non-empty encoder layer, got {:?}",
                    self.hidden_layers
                ),
            });
        }
        Ok(())
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        MERGED_DIM
    }

    #[inline]
    pub fn latent_dim(&self) -> usize {
        self.hidden_layers.last().copied().unwrap_or(MERGED_DIM)
    }

    #[inline]
    pub fn action_count(&self) -> usize {
        CrypticAction::COUNT
    }

    pub fn encoder_shapes(&self) -> Vec<LayerShape> {
        let mut inputs = self.input_dim();
        self.hidden_layers
            .iter()
            .map(|&outputs| {
                let shape = LayerShape { inputs, outputs };
                inputs = outputs;
                shape
            })
            .collect()
    }

    pub fn value_head_shape(&self) -> LayerShape {
        LayerShape {
            inputs: self.latent_dim(),
            outputs: 1,
        }
    }

    pub fn advantage_head_shape(&self) -> LayerShape {
        LayerShape {
            inputs: self.latent_dim(),
            outputs: self.action_count(),
        }
    }

    /// All layers in parameter-vector order: encoder layers, value head, advantage head.
    pub fn layer_shapes(&self) -> Vec<LayerShape> {
        let mut shapes = self.encoder_shapes();
        shapes.push(self.value_head_shape());
        shapes.push(self.advantage_head_shape());
        shapes
    }

    pub fn parameter_count(&self) -> usize {
        self.layer_shapes()
            .iter()
            .map(LayerShape::parameter_count)
            .sum()
    }
}

/// Borrowed view of one dense layer inside a flat parameter vector.
#[derive(Debug, Clone, Copy)]
pub struct DenseLayer<'a> {
    pub shape: LayerShape,
    /// Row-major `[outputs][inputs]`.
    pub weights: &'a [f32],
    pub bias: &'a [f32],
}

#[derive(Debug, Clone)]
pub struct NetworkView<'a> {
    pub encoder: Vec<DenseLayer<'a>>,
    pub value_head: DenseLayer<'a>,
    pub advantage_head: DenseLayer<'a>,
}

fn split_layers<'a>(architecture: &NetworkArchitecture, values: &'a [f32]) -> NetworkView<'a> {
    let mut offset = 0;
    let mut take = move |shape: LayerShape| {
        let weights_end = offset + shape.inputs * shape.outputs;
        let bias_end = weights_end + shape.outputs;
        let layer = DenseLayer {
            shape,
            weights: &values[offset..weights_end],
            bias: &values[weights_end..bias_end],
        };
        offset = bias_end;
        layer
    };
    let encoder = architecture
        .encoder_shapes()
        .into_iter()
        .map(&mut take)
        .collect();
    let value_head = take(architecture.value_head_shape());
    let advantage_head = take(architecture.advantage_head_shape());
    NetworkView {
        encoder,
        value_head,
        advantage_head,
    }
}

/// The authoritative, mutable parameter vector. Owned by the trainer.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkParameters {
    architecture: NetworkArchitecture,
    values: Vec<f32>,
}

impl NetworkParameters {
    /// Xavier-uniform weights and zero biases, reproducible from `seed`.
    pub fn initialize(architecture: NetworkArchitecture, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut values = Vec::with_capacity(architecture.parameter_count());
        for shape in architecture.layer_shapes() {
            let limit = (6.0 / (shape.inputs + shape.outputs) as f64).sqrt() as f32;
            values.extend((0..shape.inputs * shape.outputs).map(|_| rng.random_range(-limit..limit)));
            values.extend(std::iter::repeat_n(0.0, shape.outputs));
        }
        Self {
            architecture,
            values,
        }
    }

    pub fn from_values(
        architecture: NetworkArchitecture,
        values: Vec<f32>,
    ) -> Result<Self, EngineError> {
        architecture.validate()?;
        let expected = architecture.parameter_count();
        if values.len() != expected {
            return Err(EngineError::Data {
                message: format!(
                    "parameter count {} does not match architecture {:?} ({} parameters)",
                    values.len(),
                    architecture.hidden_layers,
                    expected
                ),
            });
        }
        Ok(Self {
            architecture,
            values,
        })
    }

    #[inline]
    pub fn architecture(&self) -> &NetworkArchitecture {
        &self.architecture
    }

    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[inline]
    pub(crate) fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// An immutable copy for inference; later mutation of `self` never reaches it.
    pub fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot {
            architecture: Arc::new(self.architecture.clone()),
            values: Arc::from(self.values.as_slice()),
        }
    }
}

/// Read-only parameters handed to one or more inference calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSnapshot {
    architecture: Arc<NetworkArchitecture>,
    values: Arc<[f32]>,
}

impl ParameterSnapshot {
    /// Builds a snapshot directly from a perturbed vector. The length is checked
    /// against the architecture.
    pub fn from_parts(
        architecture: Arc<NetworkArchitecture>,
        values: Vec<f32>,
    ) -> Result<Self, EngineError> {
        architecture.validate()?;
        let expected = architecture.parameter_count();
        if values.len() != expected {
            return Err(EngineError::Data {
                message: format!(
                    "snapshot has {} parameters, architecture expects {}",
                    values.len(),
                    expected
                ),
            });
        }
        Ok(Self {
            architecture,
            values: Arc::from(values),
        })
    }

    #[inline]
    pub fn architecture(&self) -> &NetworkArchitecture {
        &self.architecture
    }

    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn view(&self) -> NetworkView<'_> {
        split_layers(&self.architecture, &self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::ErrorKind;

    #[test]
    fn default_architecture_has_35205_parameters() {
        let arch = NetworkArchitecture::default();
        assert_eq!(arch.parameter_count(), 35_205);
        assert_eq!(arch.layer_shapes().len(), 4);
        assert_eq!(arch.latent_dim(), 128);
    }

    #[test]
    fn empty_encoder_is_invalid() {
        assert!(NetworkArchitecture::new(vec![]).validate().is_err());
        assert!(NetworkArchitecture::new(vec![16, 0]).validate().is_err());
        assert!(NetworkArchitecture::new(vec![16]).validate().is_ok());
    }

    #[test]
    fn initialization_is_reproducible_and_bounded() {
        let arch = NetworkArchitecture::new(vec![16]);
        let a = NetworkParameters::initialize(arch.clone(), 11);
        let b = NetworkParameters::initialize(arch.clone(), 11);
        let c = NetworkParameters::initialize(arch.clone(), 12);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), arch.parameter_count());

        let limit = (6.0f64 / (140.0 + 16.0)).sqrt() as f32;
        let snapshot = a.snapshot();
        let view = snapshot.view();
        assert!(view.encoder[0].weights.iter().all(|w| w.abs() <= limit));
        assert!(view.encoder[0].bias.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn view_splits_the_vector_in_layer_order() {
        let arch = NetworkArchitecture::new(vec![8, 6]);
        let values: Vec<f32> = (0..arch.parameter_count()).map(|i| i as f32).collect();
        let params = NetworkParameters::from_values(arch, values).unwrap();
        let snapshot = params.snapshot();
        let view = snapshot.view();
        assert_eq!(view.encoder.len(), 2);
        assert_eq!(view.encoder[0].weights.len(), 140 * 8);
        assert_eq!(view.encoder[0].bias[0], (140 * 8) as f32);
        assert_eq!(view.encoder[1].weights[0], (140 * 8 + 8) as f32);
        assert_eq!(view.value_head.weights.len(), 6);
        assert_eq!(view.advantage_head.bias.len(), 4);
        assert_eq!(
            *view.advantage_head.bias.last().unwrap(),
            (params.len() - 1) as f32
        );
    }

    #[test]
    fn mismatched_parameter_count_is_a_data_error() {
        let err = NetworkParameters::from_values(NetworkArchitecture::default(), vec![0.0; 10])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn zero_width_hidden_layer_is_rejected_before_inference() {
        let arch = NetworkArchitecture::new(vec![8, 0]);
        let values = vec![0.0; arch.parameter_count()];
        let err = NetworkParameters::from_values(arch.clone(), values.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
        let err = ParameterSnapshot::from_parts(Arc::new(arch), values).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let mut params = NetworkParameters::initialize(NetworkArchitecture::new(vec![4]), 0);
        let snapshot = params.snapshot();
        let before = snapshot.values()[0];
        params.values_mut()[0] += 1.0;
        assert_eq!(snapshot.values()[0], before);
    }

    #[test]
    fn actions_round_trip_through_index() {
        for action in CrypticAction::ALL {
            assert_eq!(CrypticAction::from_index(action.index()), Some(action));
        }
        assert_eq!(CrypticAction::from_index(4), None);
    }
}
