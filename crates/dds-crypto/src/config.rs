//! Validated pipeline settings, built from the `dds-core` config sections

use dds_core::config::{DdsConfig, DEFAULT_CHUNK_SIZE};

use crate::kdf::ScryptParams;
use crate::{CryptoError, IntegrityAlgorithm, Result};

/// Upper bound on the chunk size; one chunk is held in memory at a time
pub const MAX_CHUNK_SIZE: usize = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Plaintext bytes per chunk. Encryptor and decryptor must agree on it.
    pub chunk_size: usize,
    pub scrypt: ScryptParams,
    pub integrity: IntegrityAlgorithm,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE as usize,
            scrypt: ScryptParams::default(),
            integrity: IntegrityAlgorithm::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_core(config: &DdsConfig) -> Result<Self> {
        let chunk_size = usize::try_from(config.crypto.chunk_size_bytes)
            .map_err(|_| invalid_chunk_size(config.crypto.chunk_size_bytes))?;
        Ok(Self {
            chunk_size: validate_chunk_size(chunk_size)?,
            scrypt: ScryptParams::from_config(&config.kdf.scrypt)?,
            integrity: config.integrity.algorithm,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self> {
        self.chunk_size = validate_chunk_size(chunk_size)?;
        Ok(self)
    }

    pub fn with_integrity(mut self, integrity: IntegrityAlgorithm) -> Self {
        self.integrity = integrity;
        self
    }
}

fn validate_chunk_size(chunk_size: usize) -> Result<usize> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(invalid_chunk_size(chunk_size as u64));
    }
    Ok(chunk_size)
}

fn invalid_chunk_size(size: u64) -> CryptoError {
    CryptoError::Config(format!(
        "chunk_size_bytes must be in 1..={MAX_CHUNK_SIZE}, got {size}"
    ))
}
