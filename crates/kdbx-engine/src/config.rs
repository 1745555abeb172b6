//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Runtime knobs for a load or save call.
///
/// Everything here is about resource usage; format choices (cipher, KDF,
/// compression) belong to [`crate::DatabaseSettings`] on the document itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for encrypted temp files backing large attachments.
    /// `None` keeps every attachment in memory.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Attachments larger than this many bytes are moved to a temp file
    #[serde(default = "default_file_backed_threshold")]
    pub file_backed_threshold: usize,
    /// Payload size of each hashed/HMAC block written on save
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Size of the chunks pulled from the underlying reader
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

fn default_file_backed_threshold() -> usize {
    1024 * 1024
}

fn default_block_size() -> usize {
    1024 * 1024
}

fn default_read_chunk_size() -> usize {
    4096
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            file_backed_threshold: default_file_backed_threshold(),
            block_size: default_block_size(),
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

impl EngineConfig {
    /// Spill attachments above the threshold into encrypted files under `dir`
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Whether an attachment of `len` bytes should be file-backed
    pub(crate) fn wants_file_backing(&self, len: usize) -> bool {
        self.temp_dir.is_some() && len > self.file_backed_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.temp_dir.is_none());
        assert_eq!(config.block_size, 1024 * 1024);
        assert!(!config.wants_file_backing(usize::MAX));
    }

    #[test]
    fn test_file_backing_threshold() {
        let mut config = EngineConfig::default().with_temp_dir("/tmp");
        config.file_backed_threshold = 10;
        assert!(!config.wants_file_backing(10));
        assert!(config.wants_file_backing(11));
    }
}
