//! On-disk parameter checkpoints.
//!
//! A checkpoint is a TOML descriptor plus a sibling `.bin` file holding the
//! parameter vector as little-endian `f32`. The descriptor records the network
//! shape and a SHA-256 of the parameter bytes; loading verifies both before any
//! parameters reach a pipeline.

use super::error::EngineError;
use super::network::{NetworkArchitecture, NetworkParameters};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckpointDescriptor {
    format_version: u32,
    parameter_count: usize,
    sha256: String,
    generation: u64,
    parameters_file: String,
    architecture: NetworkArchitecture,
}

/// Parameters restored from disk and the generation they were saved at.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedCheckpoint {
    pub parameters: NetworkParameters,
    pub generation: u64,
}

fn parameters_path(descriptor: &Path) -> PathBuf {
    descriptor.with_extension("bin")
}

fn encode(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn io_error(path: &Path, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[instrument(skip_all, name = "checkpoint_save")]
pub fn save(path: &Path, parameters: &NetworkParameters, generation: u64) -> Result<(), EngineError> {
    let bin_path = parameters_path(path);
    let bytes = encode(parameters.values());
    let parameters_file = bin_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| EngineError::checkpoint(path, "checkpoint path has no file name"))?;

    let descriptor = CheckpointDescriptor {
        format_version: FORMAT_VERSION,
        parameter_count: parameters.len(),
        sha256: digest(&bytes),
        generation,
        parameters_file,
        architecture: parameters.architecture().clone(),
    };
    let text = toml::to_string(&descriptor)
        .map_err(|e| EngineError::checkpoint(path, format!("cannot encode descriptor: {e}")))?;

    std::fs::write(&bin_path, &bytes).map_err(|e| io_error(&bin_path, e))?;
    std::fs::write(path, text).map_err(|e| io_error(path, e))?;
    info!(
        path = %path.display(),
        parameters = parameters.len(),
        generation,
        "Checkpoint saved."
    );
    Ok(())
}

/// Loads a checkpoint for `expected`. Version, shape, parameter count, file
/// length and checksum are all checked; any disagreement is a DataError.
#[instrument(skip_all, name = "checkpoint_load")]
pub fn load(path: &Path, expected: &NetworkArchitecture) -> Result<LoadedCheckpoint, EngineError> {
    let text = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    let descriptor: CheckpointDescriptor = toml::from_str(&text)
        .map_err(|e| EngineError::checkpoint(path, format!("malformed descriptor: {e}")))?;

    if descriptor.format_version != FORMAT_VERSION {
        return Err(EngineError::checkpoint(
            path,
            format!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                descriptor.format_version
            ),
        ));
    }
    if descriptor.parameter_count != expected.parameter_count() {
        return Err(EngineError::checkpoint(
            path,
            format!(
                "checkpoint holds {} parameters, configured architecture {:?} needs {}",
                descriptor.parameter_count,
                expected.hidden_layers,
                expected.parameter_count()
            ),
        ));
    }
    if &descriptor.architecture != expected {
        return Err(EngineError::checkpoint(
            path,
            format!(
                "checkpoint hidden layers {:?} differ from configured {:?}",
                descriptor.architecture.hidden_layers, expected.hidden_layers
            ),
        ));
    }

    let bin_path = path.with_file_name(&descriptor.parameters_file);
    let bytes = std::fs::read(&bin_path).map_err(|e| io_error(&bin_path, e))?;
    if bytes.len() != descriptor.parameter_count * std::mem::size_of::<f32>() {
        return Err(EngineError::checkpoint(
            &bin_path,
            format!(
                "parameter file has {} bytes, expected {}",
                bytes.len(),
                descriptor.parameter_count * std::mem::size_of::<f32>()
            ),
        ));
    }
    if digest(&bytes) != descriptor.sha256 {
        return Err(EngineError::checkpoint(&bin_path, "checksum mismatch"));
    }

    let values = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let parameters = NetworkParameters::from_values(descriptor.architecture, values)?;
    info!(
        path = %path.display(),
        generation = descriptor.generation,
        "Checkpoint loaded."
    );
    Ok(LoadedCheckpoint {
        parameters,
        generation: descriptor.generation,
    })
}
