//! Embedding and nearest-neighbor plumbing.
//!
//! `embedder` turns text into vectors, `index` keeps them in a usearch HNSW
//! graph keyed by paragraph key, `config` describes which embedder to build
//! and how to recognise the one a store was built with.

pub mod config;
pub mod embedder;
pub mod index;

use std::path::Path;

use serde::{Deserialize, Serialize};
pub use usearch::ffi::MetricKind;

/// Errors from the embedding and vector index layers.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("HNSW error: {0}")]
    HnswError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("embedding error: {0}")]
    EmbeddingError(String),

    #[error("invalid embedder config: {0}")]
    InvalidConfig(String),
}

/// One neighbor returned by [`index::VectorIndex::search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub key: String,
    pub distance: f32,
}

/// Write `contents` next to `path` and rename it into place, so readers see
/// either the old file or the new one.
pub(crate) fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, "old").unwrap();
        write_atomic(&path, "new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        assert!(!dir.path().join("state.json.tmp").exists());
    }
}
