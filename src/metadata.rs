//! Run metadata for reproducing a holding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

/// An input file used by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFile {
    pub path: String,
    pub size: u64,
    /// SHA256 of the file contents.
    pub checksum: String,
}

/// Everything needed to tell two runs apart or repeat one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Seed actually used for surplus redistribution.
    pub seed: u64,
    pub config_hash: String,
    pub inputs: Vec<InputFile>,
    pub version: String,
}

impl RunMetadata {
    pub fn new<T: Serialize>(config: &T, seed: u64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            seed,
            config_hash: compute_config_hash(config),
            inputs: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Record an input file. Unreadable files are skipped with a warning.
    pub fn track(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        match track_input_file(path) {
            Ok(file) => self.inputs.push(file),
            Err(e) => warn!("Could not checksum {}: {}", path.display(), e),
        }
    }
}

/// Compute SHA256 hash of arbitrary bytes.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute SHA256 checksum of a file.
pub fn compute_file_checksum(path: impl AsRef<Path>) -> std::io::Result<String> {
    let data = std::fs::read(path.as_ref())?;
    Ok(compute_hash(&data))
}

/// Hash of the JSON form of a configuration.
pub fn compute_config_hash<T: Serialize>(config: &T) -> String {
    match serde_json::to_vec(config) {
        Ok(bytes) => compute_hash(&bytes),
        Err(e) => {
            warn!("Failed to serialize config for hashing: {}", e);
            String::new()
        }
    }
}

pub fn track_input_file(path: impl AsRef<Path>) -> std::io::Result<InputFile> {
    let path = path.as_ref();
    let size = std::fs::metadata(path)?.len();
    Ok(InputFile {
        path: path.display().to_string(),
        size,
        checksum: compute_file_checksum(path)?,
    })
}
