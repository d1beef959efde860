//! Error types for the index cache.

use std::path::PathBuf;

/// Why a cache operation failed.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem failure while reading, writing, renaming or removing a cache file.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The in-memory value could not be serialized.
    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: bincode::Error,
    },

    /// A cache file exists but its contents could not be decoded.
    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    /// The header is not one this version writes.
    #[error("bad cache header in {}: {reason}", .path.display())]
    BadHeader { path: PathBuf, reason: String },

    /// Only one file of the pair is present.
    #[error("incomplete cache: {} is missing", .missing.display())]
    Incomplete { missing: PathBuf },

    /// Both files exist but were written by different saves.
    #[error("cache files belong to different generations ({index} vs {documents})")]
    GenerationMismatch { index: u64, documents: u64 },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
