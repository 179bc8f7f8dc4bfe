//! Chunking utilities for splitting documents into overlapping segments.
//!
//! Documents are split into fixed-size character windows; consecutive
//! windows share `overlap` characters and the final window may be shorter.
//! Offsets and lengths are counted in characters, not bytes, so multi-byte
//! text (CJK regulation texts, full-width punctuation) splits cleanly.

use serde::{Deserialize, Serialize};

use crate::{
    chunk_id::ChunkId,
    config::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    error::{Error, Result},
};

/// Chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// A contiguous slice of a source document, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic ID derived from `(source_path, char_offset)`.
    pub id: String,
    pub text: String,
    /// Path of the source document relative to the corpus root.
    pub source_path: String,
    /// Character offset where this chunk starts in the source text.
    pub char_offset: usize,
    /// Length in characters.
    pub length: usize,
    /// Fingerprint of the document version the chunk was cut from.
    pub doc_fingerprint: String,
}

/// Split text into overlapping chunks.
///
/// Deterministic: the same input always yields identical chunks and IDs.
/// Windows that contain only whitespace are skipped. Fails with
/// [`Error::InvalidConfig`] when `overlap >= chunk_size`.
///
/// # Examples
///
/// ```
/// use finrag::chunking::{chunk_text, ChunkingConfig};
///
/// let config = ChunkingConfig { chunk_size: 512, overlap: 50 };
/// let text = "x".repeat(1000);
/// let chunks = chunk_text(&text, "a.txt", "fp", &config).unwrap();
///
/// let offsets: Vec<_> = chunks.iter().map(|c| c.char_offset).collect();
/// assert_eq!(offsets, vec![0, 462, 924]);
/// assert_eq!(chunks[2].length, 76);
/// ```
pub fn chunk_text(
    text: &str,
    source_path: &str,
    doc_fingerprint: &str,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>> {
    config.validate()?;

    // Build a map of char index -> byte index for O(1) lookups
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = char_to_byte.len() - 1;

    let step = config.chunk_size - config.overlap;
    let mut chunks = Vec::new();
    let mut start_char = 0;

    while start_char < char_count {
        let end_char = (start_char + config.chunk_size).min(char_count);
        let slice = &text[char_to_byte[start_char]..char_to_byte[end_char]];

        if !slice.trim().is_empty() {
            chunks.push(Chunk {
                id: ChunkId::new(source_path, start_char).into_string(),
                text: slice.to_string(),
                source_path: source_path.to_string(),
                char_offset: start_char,
                length: end_char - start_char,
                doc_fingerprint: doc_fingerprint.to_string(),
            });
        }

        if end_char == char_count {
            break;
        }
        start_char += step;
    }

    Ok(chunks)
}
