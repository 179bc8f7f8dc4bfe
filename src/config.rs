//! Database configuration.
//!
//! Every field has a default tuned for regulation-style prose (long
//! paragraphs, numbered clauses), so a missing or partial `config.json`
//! still yields a usable configuration.

use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    chunking::ChunkingConfig,
    error::{Error, Result},
};

/// Default embedding dimension (768, the size of base-sized sentence encoders).
pub const DEFAULT_DIMENSION: usize = 768;

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Default number of texts sent to the embedder per call.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 8;

/// Default number of results returned by a search.
pub const DEFAULT_TOP_K: usize = 10;

/// Index strategy, fixed at index-creation time.
///
/// Configuration files may use the variant name, the short CLI name
/// (`flat-ip`, `flat-l2`, `ivf-flat`) or the FAISS class name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String")]
pub enum IndexKind {
    /// Exact inner-product search (cosine when vectors are normalized).
    #[default]
    FlatInnerProduct,
    /// Exact search ranked by negative squared L2 distance.
    FlatL2,
    /// Inverted-file index over k-means cells, inner-product scoring.
    InvertedFileFlat,
}

impl IndexKind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            Self::FlatInnerProduct => 0,
            Self::FlatL2 => 1,
            Self::InvertedFileFlat => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::FlatInnerProduct),
            1 => Some(Self::FlatL2),
            2 => Some(Self::InvertedFileFlat),
            _ => None,
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FlatInnerProduct => "flat-ip",
            Self::FlatL2 => "flat-l2",
            Self::InvertedFileFlat => "ivf-flat",
        };
        f.write_str(name)
    }
}

impl FromStr for IndexKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "flat-ip" | "FlatInnerProduct" | "IndexFlatIP" => {
                Ok(Self::FlatInnerProduct)
            }
            "flat-l2" | "FlatL2" | "IndexFlatL2" => Ok(Self::FlatL2),
            "ivf-flat" | "InvertedFileFlat" | "IndexIVFFlat" => {
                Ok(Self::InvertedFileFlat)
            }
            other => Err(Error::InvalidConfig(format!(
                "unknown index kind '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for IndexKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Embedding dimension D.
    pub dimension: usize,
    pub index_kind: IndexKind,
    /// L2-normalize vectors before storage and before every query.
    pub normalize: bool,
    /// Chunk size in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Texts per embedder call.
    pub embed_batch_size: usize,
    pub top_k: usize,
    /// Results scoring below this are dropped. Unset keeps every hit,
    /// which matters for L2 where all scores are negative.
    pub min_score: Option<f32>,
    /// IVF: number of k-means cells.
    pub nlist: usize,
    /// IVF: cells probed per query.
    pub nprobe: usize,
    /// Embedder attempts after the first failure.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Glob patterns (relative to the documents root) of files to index.
    pub include: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            index_kind: IndexKind::default(),
            normalize: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            top_k: DEFAULT_TOP_K,
            min_score: None,
            nlist: 100,
            nprobe: 8,
            max_retries: 3,
            retry_backoff_ms: 200,
            include: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
        }
    }
}

impl DatabaseConfig {
    /// Load a configuration from a JSON file, falling back to defaults when
    /// the file does not exist. The result is validated.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use finrag::DatabaseConfig;
    ///
    /// let path = tmp.path().join("config.json");
    /// std::fs::write(&path, r#"{"dimension": 384, "chunk_size": 512}"#).unwrap();
    ///
    /// let config = DatabaseConfig::load(&path).unwrap();
    /// assert_eq!(config.dimension, 384);
    /// assert_eq!(config.chunk_size, 512);
    /// assert!(config.normalize);
    /// ```
    pub fn load(path: &Path) -> Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::InvalidConfig(
                "dimension must be greater than zero".into(),
            ));
        }
        self.chunking().validate()?;
        if self.embed_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "embed_batch_size must be greater than zero".into(),
            ));
        }
        if self.nlist == 0 || self.nprobe == 0 {
            return Err(Error::InvalidConfig(
                "nlist and nprobe must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            overlap: self.chunk_overlap,
        }
    }
}
