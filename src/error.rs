use std::path::PathBuf;

use crate::database::DatabaseState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("incompatible index: {0}")]
    IncompatibleIndex(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("database is not ready (state: {0})")]
    NotReady(DatabaseState),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported document format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Configuration or version drift between the persisted artifacts and
    /// the running configuration. A full rebuild clears it.
    pub fn is_recoverable_by_rebuild(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::IncompatibleIndex(_)
        )
    }

    pub(crate) fn chunk_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "chunk",
            name: id.to_string(),
        }
    }
}
