use std::fmt;

/// Hex characters kept from the BLAKE3 digest.
const ID_LEN: usize = 16;

/// A stable chunk identifier derived from (source_path, char_offset).
///
/// Re-chunking an unchanged document with the same parameters reproduces
/// identical identifiers, which is what lets incremental updates purge and
/// reinsert a single document without touching the rest of the corpus.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(String);

impl ChunkId {
    /// Length of [`ChunkId::short`].
    pub const SHORT_LEN: usize = 7;

    /// Generate a stable chunk ID from a source path and character offset.
    ///
    /// # Examples
    ///
    /// ```
    /// use finrag::ChunkId;
    ///
    /// let a = ChunkId::new("rules/capital.md", 0);
    /// let b = ChunkId::new("rules/capital.md", 0);
    /// assert_eq!(a, b);
    /// assert_ne!(a, ChunkId::new("rules/capital.md", 800));
    /// ```
    pub fn new(source_path: &str, char_offset: usize) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source_path.as_bytes());
        hasher.update(&[0]);
        hasher.update(&(char_offset as u64).to_le_bytes());
        let hex = hasher.finalize().to_hex();
        Self(hex[..ID_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for human display (first 7 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..Self::SHORT_LEN]
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> Self {
        id.0
    }
}
