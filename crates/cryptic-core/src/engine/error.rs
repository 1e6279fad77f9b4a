use super::config::ConfigError;
use crate::core::features::providers::ProviderError;
use crate::core::models::batch::BatchError;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure taxonomy tag carried by every [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing input (batches, providers, checkpoints, configuration).
    Data,
    /// Shape or length mismatch between pipeline stages.
    Integrity,
    /// Resource exhaustion or non-finite numeric output.
    Device,
    /// A whole generation's rewards collapsed.
    TrainingDivergence,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Data => "DataError",
            ErrorKind::Integrity => "IntegrityError",
            ErrorKind::Device => "DeviceError",
            ErrorKind::TrainingDivergence => "TrainingDivergenceError",
        })
    }
}

/// The unit of work an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorContext<'a> {
    Batch(&'a str),
    Generation(u64),
    File(&'a Path),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("[DataError] batch '{batch}': {source}")]
    InvalidBatch { batch: String, source: BatchError },

    #[error("[DataError] batch '{batch}': {source}")]
    Provider { batch: String, source: ProviderError },

    #[error("[DataError] '{}': {message}", .path.display())]
    Checkpoint { path: PathBuf, message: String },

    #[error("[DataError] batch '{batch}': {message}")]
    BatchData { batch: String, message: String },

    #[error("[DataError] {message}")]
    Data { message: String },

    #[error("[IntegrityError] batch '{batch}' in stage '{stage}': {message}")]
    Integrity {
        batch: String,
        stage: &'static str,
        message: String,
    },

    #[error("[DeviceError] batch '{batch}' in stage '{stage}': {message}")]
    Device {
        batch: String,
        stage: &'static str,
        message: String,
    },

    #[error("[TrainingDivergenceError] generation {generation}: {message}")]
    TrainingDivergence { generation: u64, message: String },

    #[error("[{kind}] generation {generation} aborted by member {member}: {source}")]
    GenerationAborted {
        generation: u64,
        member: usize,
        kind: ErrorKind,
        source: Box<EngineError>,
    },

    #[error("[DataError] invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("[DataError] I/O failure on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn data(batch: &str, message: impl Into<String>) -> Self {
        EngineError::BatchData {
            batch: batch.to_string(),
            message: message.into(),
        }
    }

    pub fn integrity(batch: &str, stage: &'static str, message: impl Into<String>) -> Self {
        EngineError::Integrity {
            batch: batch.to_string(),
            stage,
            message: message.into(),
        }
    }

    pub fn device(batch: &str, stage: &'static str, message: impl Into<String>) -> Self {
        EngineError::Device {
            batch: batch.to_string(),
            stage,
            message: message.into(),
        }
    }

    pub fn checkpoint(path: &Path, message: impl Into<String>) -> Self {
        EngineError::Checkpoint {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Wraps a member failure so the generation reports it under the member's own tag.
    pub fn generation_aborted(generation: u64, member: usize, source: EngineError) -> Self {
        EngineError::GenerationAborted {
            generation,
            member,
            kind: source.kind(),
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidBatch { .. }
            | EngineError::Provider { .. }
            | EngineError::Checkpoint { .. }
            | EngineError::BatchData { .. }
            | EngineError::Data { .. }
            | EngineError::Config(_)
            | EngineError::Io { .. } => ErrorKind::Data,
            EngineError::Integrity { .. } => ErrorKind::Integrity,
            EngineError::Device { .. } => ErrorKind::Device,
            EngineError::TrainingDivergence { .. } => ErrorKind::TrainingDivergence,
            EngineError::GenerationAborted { kind, .. } => *kind,
        }
    }

    pub fn context(&self) -> Option<ErrorContext<'_>> {
        match self {
            EngineError::InvalidBatch { batch, .. }
            | EngineError::Provider { batch, .. }
            | EngineError::BatchData { batch, .. }
            | EngineError::Integrity { batch, .. }
            | EngineError::Device { batch, .. } => Some(ErrorContext::Batch(batch)),
            EngineError::TrainingDivergence { generation, .. }
            | EngineError::GenerationAborted { generation, .. } => {
                Some(ErrorContext::Generation(*generation))
            }
            EngineError::Checkpoint { path, .. } | EngineError::Io { path, .. } => {
                Some(ErrorContext::File(path))
            }
            EngineError::Data { .. } | EngineError::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_starts_with_taxonomy_tag_and_names_the_batch() {
        let err = EngineError::integrity("1ABC", "merge", "row 3 has 139 values");
        assert_eq!(
            err.to_string(),
            "[IntegrityError] batch '1ABC' in stage 'merge': row 3 has 139 values"
        );
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(err.context(), Some(ErrorContext::Batch("1ABC")));
    }

    #[test]
    fn invalid_batch_is_a_data_error() {
        let err = EngineError::InvalidBatch {
            batch: "empty".to_string(),
            source: BatchError::NoAtoms,
        };
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(err.to_string().starts_with("[DataError] batch 'empty'"));
    }

    #[test]
    fn aborted_generation_keeps_the_member_error_kind() {
        let member = EngineError::device("s1", "inference", "non-finite Q-value");
        let err = EngineError::generation_aborted(7, 12, member);
        assert_eq!(err.kind(), ErrorKind::Device);
        assert_eq!(err.context(), Some(ErrorContext::Generation(7)));
        assert!(err.to_string().starts_with("[DeviceError] generation 7"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn config_errors_convert_and_report_as_data_errors() {
        let err: EngineError = ConfigError::MissingParameter("population_size").into();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert_eq!(err.context(), None);
    }

    #[test]
    fn divergence_names_the_generation() {
        let err = EngineError::TrainingDivergence {
            generation: 4,
            message: "all rewards identical".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::TrainingDivergence);
        assert_eq!(
            err.to_string(),
            "[TrainingDivergenceError] generation 4: all rewards identical"
        );
    }
}
