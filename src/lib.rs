//! finrag - a persistent vector index for retrieval over regulation documents.
//!
//! finrag splits documents into overlapping chunks, embeds them, and keeps
//! the vectors and chunk text on disk so search survives restarts without
//! recomputation. Rebuilding is incremental: only documents whose content
//! hash changed since the last commit are re-embedded.
//!
//! # Quick start
//!
//! ```
//! use finrag::{
//!     DataDir, DatabaseConfig, HashEmbedder, PlainTextExtractor, VectorDatabase,
//!     walker,
//! };
//!
//! # let docs = tempfile::tempdir().unwrap();
//! # let data = tempfile::tempdir().unwrap();
//! std::fs::write(
//!     docs.path().join("lcr.md"),
//!     "The liquidity coverage ratio must be at least 100%.",
//! )
//! .unwrap();
//!
//! let config = DatabaseConfig { dimension: 128, ..DatabaseConfig::default() };
//! let dir = DataDir::resolve(Some(data.path())).unwrap();
//! let embedder = HashEmbedder::new(config.dimension);
//! let mut db = VectorDatabase::new(dir, config, embedder, PlainTextExtractor).unwrap();
//! db.open().unwrap();
//!
//! let files = walker::discover_files(docs.path(), &db.config().include).unwrap();
//! db.build_or_update(&files, false).unwrap();
//!
//! let hits = db.search("liquidity coverage", 5).unwrap();
//! assert_eq!(hits[0].chunk.source_path, "lcr.md");
//! ```

pub mod chunk_id;
pub mod chunking;
pub mod config;
pub mod data_dir;
pub mod database;
pub mod docstore;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod incremental;
pub mod index;
pub mod metadata;
pub mod persist;
pub mod search;
pub mod walker;

pub use chunk_id::ChunkId;
pub use chunking::{Chunk, ChunkingConfig};
pub use config::{DatabaseConfig, IndexKind};
pub use data_dir::DataDir;
pub use database::{
    ConsistencyReport,
    DatabaseState,
    LoadOutcome,
    SharedDatabase,
    Status,
    UpdateSummary,
    VectorDatabase,
};
pub use docstore::DocumentStore;
pub use embedding::{Embedder, HashEmbedder, RetryingEmbedder};
pub use error::{Error, Result};
pub use extract::{PlainTextExtractor, TextExtractor};
pub use index::VectorIndex;
pub use metadata::MetadataRecord;
pub use search::SearchHit;
