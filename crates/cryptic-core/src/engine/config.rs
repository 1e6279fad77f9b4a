use super::network::NetworkArchitecture;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        reason: reason.into(),
    }
}

fn require_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(invalid(name, format!("must be a positive finite number, got {value}")));
    }
    Ok(())
}

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Toml {
        path: path.to_string_lossy().to_string(),
        source: e,
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaskConfig {
    /// Radius around the side-chain centroid used for the local atom count, in Angstroms.
    pub cutoff_radius: f64,
    /// Residues with fewer atoms within the cutoff are not masked.
    pub min_density: usize,
    /// Atom count at which the mask weight reaches 1.
    pub saturation_density: usize,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            cutoff_radius: 10.0,
            min_density: 16,
            saturation_density: 160,
        }
    }
}

impl MaskConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("mask.cutoff_radius", self.cutoff_radius)?;
        if self.saturation_density == 0 || self.saturation_density < self.min_density {
            return Err(invalid(
                "mask.saturation_density",
                format!(
                    "must be non-zero and at least min_density ({}), got {}",
                    self.min_density, self.saturation_density
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FusionConfig {
    /// Solvent probe radius for the surface estimate, in Angstroms.
    pub probe_radius: f64,
    /// Test points per atom sphere for the surface estimate.
    pub sphere_points: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            probe_radius: 1.4,
            sphere_points: 32,
        }
    }
}

impl FusionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("fusion.probe_radius", self.probe_radius)?;
        if self.sphere_points < 8 {
            return Err(invalid(
                "fusion.sphere_points",
                format!("needs at least 8 points, got {}", self.sphere_points),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrypticConfig {
    /// CA-CA distance defining an edge of the contact graph, in Angstroms.
    pub contact_cutoff: f64,
    /// Power-iteration steps for eigenvector centrality.
    pub power_iterations: usize,
    /// Scale applied to the exposure-variance score when no ensemble is available.
    pub single_conformation_confidence: f64,
}

impl Default for CrypticConfig {
    fn default() -> Self {
        Self {
            contact_cutoff: 8.0,
            power_iterations: 50,
            single_conformation_confidence: 0.5,
        }
    }
}

impl CrypticConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("cryptic.contact_cutoff", self.contact_cutoff)?;
        if self.power_iterations == 0 {
            return Err(invalid("cryptic.power_iterations", "must be at least 1"));
        }
        let c = self.single_conformation_confidence;
        if !(0.0..=1.0).contains(&c) {
            return Err(invalid(
                "cryptic.single_conformation_confidence",
                format!("must lie in [0, 1], got {c}"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub mask: MaskConfig,
    pub fusion: FusionConfig,
    pub cryptic: CrypticConfig,
    pub architecture: NetworkArchitecture,
    /// Byte ceiling for one structure's device arena.
    pub memory_budget_bytes: usize,
}

pub const DEFAULT_MEMORY_BUDGET_BYTES: usize = 1 << 30;

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mask: MaskConfig::default(),
            fusion: FusionConfig::default(),
            cryptic: CrypticConfig::default(),
            architecture: NetworkArchitecture::default(),
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mask.validate()?;
        self.fusion.validate()?;
        self.cryptic.validate()?;
        self.architecture.validate()?;
        if self.memory_budget_bytes == 0 {
            return Err(invalid("memory_budget_bytes", "must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct PipelineConfigBuilder {
    mask: Option<MaskConfig>,
    fusion: Option<FusionConfig>,
    cryptic: Option<CrypticConfig>,
    architecture: Option<NetworkArchitecture>,
    memory_budget_bytes: Option<usize>,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mask(mut self, mask: MaskConfig) -> Self {
        self.mask = Some(mask);
        self
    }
    pub fn fusion(mut self, fusion: FusionConfig) -> Self {
        self.fusion = Some(fusion);
        self
    }
    pub fn cryptic(mut self, cryptic: CrypticConfig) -> Self {
        self.cryptic = Some(cryptic);
        self
    }
    pub fn architecture(mut self, architecture: NetworkArchitecture) -> Self {
        self.architecture = Some(architecture);
        self
    }
    pub fn memory_budget_bytes(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = Some(bytes);
        self
    }

    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        let config = PipelineConfig {
            mask: self.mask.unwrap_or_default(),
            fusion: self.fusion.unwrap_or_default(),
            cryptic: self.cryptic.unwrap_or_default(),
            architecture: self.architecture.unwrap_or_default(),
            memory_budget_bytes: self
                .memory_budget_bytes
                .unwrap_or(DEFAULT_MEMORY_BUDGET_BYTES),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RewardNormalization {
    /// Centered ranks in `[-0.5, 0.5]`.
    #[default]
    Rank,
    /// `(r - mean) / std` over the generation.
    ZScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlateauConfig {
    /// Consecutive non-improving generations tolerated before stopping.
    pub patience: usize,
    /// Minimum mean-reward gain that counts as an improvement.
    pub min_delta: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainerConfig {
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    #[serde(default)]
    pub normalization: RewardNormalization,
    /// Maximum number of generations.
    pub generations: u64,
    #[serde(default)]
    pub plateau: Option<PlateauConfig>,
    pub seed: u64,
    /// Where the final parameters are written, if anywhere.
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,
}

fn default_population_size() -> usize {
    64
}
fn default_sigma() -> f64 {
    0.02
}
fn default_step_size() -> f64 {
    0.005
}

impl TrainerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = read_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population_size < 2 || self.population_size % 2 != 0 {
            return Err(invalid(
                "population_size",
                format!(
                    "antithetic pairing needs an even size of at least 2, got {}",
                    self.population_size
                ),
            ));
        }
        require_positive("sigma", self.sigma)?;
        require_positive("step_size", self.step_size)?;
        if self.generations == 0 {
            return Err(invalid("generations", "must be at least 1"));
        }
        if let Some(plateau) = &self.plateau {
            if plateau.patience == 0 {
                return Err(invalid("plateau.patience", "must be at least 1"));
            }
            if !(plateau.min_delta.is_finite() && plateau.min_delta >= 0.0) {
                return Err(invalid(
                    "plateau.min_delta",
                    format!("must be a non-negative finite number, got {}", plateau.min_delta),
                ));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn pair_count(&self) -> usize {
        self.population_size / 2
    }
}

#[derive(Default)]
pub struct TrainerConfigBuilder {
    population_size: Option<usize>,
    sigma: Option<f64>,
    step_size: Option<f64>,
    normalization: Option<RewardNormalization>,
    generations: Option<u64>,
    plateau: Option<PlateauConfig>,
    seed: Option<u64>,
    checkpoint_path: Option<PathBuf>,
}

impl TrainerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn population_size(mut self, size: usize) -> Self {
        self.population_size = Some(size);
        self
    }
    pub fn sigma(mut self, sigma: f64) -> Self {
        self.sigma = Some(sigma);
        self
    }
    pub fn step_size(mut self, step: f64) -> Self {
        self.step_size = Some(step);
        self
    }
    pub fn normalization(mut self, normalization: RewardNormalization) -> Self {
        self.normalization = Some(normalization);
        self
    }
    pub fn generations(mut self, generations: u64) -> Self {
        self.generations = Some(generations);
        self
    }
    pub fn plateau(mut self, patience: usize, min_delta: f64) -> Self {
        self.plateau = Some(PlateauConfig {
            patience,
            min_delta,
        });
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
    pub fn checkpoint_path(mut self, path: PathBuf) -> Self {
        self.checkpoint_path = Some(path);
        self
    }

    pub fn build(self) -> Result<TrainerConfig, ConfigError> {
        let config = TrainerConfig {
            population_size: self.population_size.unwrap_or_else(default_population_size),
            sigma: self.sigma.unwrap_or_else(default_sigma),
            step_size: self.step_size.unwrap_or_else(default_step_size),
            normalization: self.normalization.unwrap_or_default(),
            generations: self
                .generations
                .ok_or(ConfigError::MissingParameter("generations"))?,
            plateau: self.plateau,
            seed: self.seed.ok_or(ConfigError::MissingParameter("seed"))?,
            checkpoint_path: self.checkpoint_path,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn pipeline_defaults_match_documented_values() {
        let config = PipelineConfigBuilder::new().build().unwrap();
        assert_eq!(config.mask.cutoff_radius, 10.0);
        assert_eq!(config.mask.min_density, 16);
        assert_eq!(config.fusion.sphere_points, 32);
        assert_eq!(config.cryptic.power_iterations, 50);
        assert_eq!(config.architecture.parameter_count(), 35_205);
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn pipeline_builder_rejects_inconsistent_mask_densities() {
        let result = PipelineConfigBuilder::new()
            .mask(MaskConfig {
                cutoff_radius: 10.0,
                min_density: 50,
                saturation_density: 20,
            })
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                name: "mask.saturation_density",
                ..
            })
        ));
    }

    #[test]
    fn trainer_builder_requires_generations_and_seed() {
        let err = TrainerConfigBuilder::new().seed(1).build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingParameter("generations")));
        let err = TrainerConfigBuilder::new().generations(3).build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingParameter("seed")));
    }

    #[test]
    fn trainer_builder_fills_evolution_defaults() {
        let config = TrainerConfigBuilder::new()
            .generations(10)
            .seed(7)
            .build()
            .unwrap();
        assert_eq!(config.population_size, 64);
        assert_eq!(config.pair_count(), 32);
        assert_eq!(config.sigma, 0.02);
        assert_eq!(config.step_size, 0.005);
        assert_eq!(config.normalization, RewardNormalization::Rank);
        assert!(config.plateau.is_none());
    }

    #[test]
    fn odd_population_is_rejected() {
        let err = TrainerConfigBuilder::new()
            .population_size(63)
            .generations(1)
            .seed(0)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "population_size",
                ..
            }
        ));
    }

    #[test]
    fn pipeline_config_loads_partial_toml_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            r#"
            memory_budget_bytes = 4096

            [mask]
            cutoff_radius = 12.0

            [architecture]
            hidden_layers = [64]
            "#
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.mask.cutoff_radius, 12.0);
        assert_eq!(config.mask.min_density, 16);
        assert_eq!(config.architecture.hidden_layers, vec![64]);
        assert_eq!(config.memory_budget_bytes, 4096);
        assert_eq!(config.fusion, FusionConfig::default());
    }

    #[test]
    fn trainer_config_loads_from_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trainer.toml");
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            r#"
            population_size = 16
            normalization = "z-score"
            generations = 5
            seed = 99

            [plateau]
            patience = 3
            min_delta = 0.001
            "#
        )
        .unwrap();

        let config = TrainerConfig::load(&path).unwrap();
        assert_eq!(config.population_size, 16);
        assert_eq!(config.normalization, RewardNormalization::ZScore);
        assert_eq!(
            config.plateau,
            Some(PlateauConfig {
                patience: 3,
                min_delta: 0.001
            })
        );
        assert_eq!(config.sigma, 0.02);
    }

    #[test]
    fn load_reports_missing_file_and_bad_toml() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            PipelineConfig::load(&missing),
            Err(ConfigError::Io { .. })
        ));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "population_size = \"many\"").unwrap();
        assert!(matches!(
            TrainerConfig::load(&bad),
            Err(ConfigError::Toml { .. })
        ));
    }
}
