//! Durable vector index with pluggable search strategies.
//!
//! [`VectorIndex`] owns the configured [`IndexSpec`] and dispatches to one
//! concrete strategy per [`IndexKind`]: [`FlatIndex`] for the exact
//! variants and [`IvfIndex`] for the inverted-file variant. Every strategy
//! reports "higher score = more relevant" and orders ties by ascending ID.

mod codec;
mod flat;
mod ivf;
mod slots;

use std::path::Path;

pub use flat::{FlatIndex, Metric};
pub use ivf::IvfIndex;
pub use slots::l2_normalize;

use crate::{
    config::{DatabaseConfig, IndexKind},
    error::{Error, Result},
    persist,
};

/// Common contract every strategy implements.
pub(crate) trait SearchStrategy {
    fn slots(&self) -> &slots::VectorSlots;
    /// Insert a vector that has already been validated and normalized.
    fn insert(&mut self, id: String, vector: &[f32]);
    fn remove(&mut self, id: &str) -> bool;
    /// Top-`k` hits for an already validated and normalized query.
    fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)>;
    fn clear(&mut self);
    fn compact(&mut self);
}

/// Parameters fixed at index-creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub dimension: usize,
    pub kind: IndexKind,
    pub normalize: bool,
    /// IVF cells; ignored by flat indexes.
    pub nlist: usize,
    /// IVF cells probed per query; ignored by flat indexes.
    pub nprobe: usize,
}

impl IndexSpec {
    pub fn new(dimension: usize, kind: IndexKind, normalize: bool) -> Self {
        let defaults = DatabaseConfig::default();
        Self {
            dimension,
            kind,
            normalize,
            nlist: defaults.nlist,
            nprobe: defaults.nprobe,
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            dimension: config.dimension,
            kind: config.index_kind,
            normalize: config.normalize,
            nlist: config.nlist,
            nprobe: config.nprobe,
        }
    }
}

/// A vector keyed by chunk ID.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub id: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
enum Strategy {
    Flat(FlatIndex),
    Ivf(IvfIndex),
}

impl Strategy {
    fn for_spec(spec: &IndexSpec) -> Self {
        match spec.kind {
            IndexKind::FlatInnerProduct => {
                Self::Flat(FlatIndex::new(spec.dimension, Metric::InnerProduct))
            }
            IndexKind::FlatL2 => {
                Self::Flat(FlatIndex::new(spec.dimension, Metric::L2))
            }
            IndexKind::InvertedFileFlat => {
                Self::Ivf(IvfIndex::new(spec.dimension, spec.nlist, spec.nprobe))
            }
        }
    }

    fn as_dyn(&self) -> &dyn SearchStrategy {
        match self {
            Self::Flat(index) => index,
            Self::Ivf(index) => index,
        }
    }

    fn as_dyn_mut(&mut self) -> &mut dyn SearchStrategy {
        match self {
            Self::Flat(index) => index,
            Self::Ivf(index) => index,
        }
    }

    fn insert_raw(&mut self, id: String, vector: &[f32]) {
        match self {
            Self::Flat(index) => index.insert(id, vector),
            Self::Ivf(index) => index.push_raw(id, vector),
        }
    }
}

/// Vector index supporting add, logical remove, and top-K search.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    spec: IndexSpec,
    generation: u64,
    strategy: Strategy,
}

impl VectorIndex {
    pub fn new(spec: IndexSpec) -> Self {
        let strategy = Strategy::for_spec(&spec);
        Self {
            spec,
            generation: 0,
            strategy,
        }
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn dimension(&self) -> usize {
        self.spec.dimension
    }

    pub fn kind(&self) -> IndexKind {
        self.spec.kind
    }

    /// Commit generation this index was last saved or loaded with.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn strategy(&self) -> &dyn SearchStrategy {
        self.strategy.as_dyn()
    }

    /// Number of live vectors.
    pub fn len(&self) -> usize {
        self.strategy().slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows kept for removed IDs until the next compaction.
    pub fn tombstones(&self) -> usize {
        self.strategy().slots().tombstones()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.strategy().slots().contains(id)
    }

    /// Live IDs in unspecified order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.strategy().slots().live_ids()
    }

    /// Insert vectors, normalizing them first when configured.
    ///
    /// The batch is validated up front: if any vector has the wrong
    /// dimension nothing is inserted. Re-adding an existing ID replaces it.
    pub fn add(&mut self, entries: Vec<VectorEntry>) -> Result<()> {
        if let Some(bad) =
            entries.iter().find(|e| e.vector.len() != self.spec.dimension)
        {
            return Err(Error::DimensionMismatch {
                expected: self.spec.dimension,
                actual: bad.vector.len(),
            });
        }

        let normalize = self.spec.normalize;
        let strategy = self.strategy.as_dyn_mut();
        for VectorEntry { id, mut vector } in entries {
            if normalize {
                l2_normalize(&mut vector);
            }
            strategy.insert(id, &vector);
        }
        Ok(())
    }

    /// Logically delete IDs. Returns how many were present.
    pub fn remove<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let strategy = self.strategy.as_dyn_mut();
        ids.into_iter()
            .filter(|id| strategy.remove(id.as_ref()))
            .count()
    }

    /// Top-`top_k` `(id, score)` pairs, score descending, ties by ID.
    ///
    /// # Examples
    ///
    /// ```
    /// use finrag::{IndexKind, index::{IndexSpec, VectorEntry, VectorIndex}};
    ///
    /// let mut index = VectorIndex::new(IndexSpec::new(2, IndexKind::FlatInnerProduct, true));
    /// index.add(vec![
    ///     VectorEntry { id: "a".into(), vector: vec![1.0, 0.0] },
    ///     VectorEntry { id: "b".into(), vector: vec![0.0, 3.0] },
    /// ]).unwrap();
    ///
    /// let hits = index.search(&[0.0, 1.0], 5).unwrap();
    /// assert_eq!(hits.len(), 2);
    /// assert_eq!(hits[0].0, "b");
    /// assert!((hits[0].1 - 1.0).abs() < 1e-6);
    /// ```
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, f32)>> {
        if query.len() != self.spec.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.spec.dimension,
                actual: query.len(),
            });
        }
        if top_k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        if self.spec.normalize {
            let mut normalized = query.to_vec();
            l2_normalize(&mut normalized);
            Ok(self.strategy().search(&normalized, top_k))
        } else {
            Ok(self.strategy().search(query, top_k))
        }
    }

    pub fn clear(&mut self) {
        self.strategy.as_dyn_mut().clear();
    }

    /// Physically drop removed vectors (and retrain IVF cells).
    pub fn compact(&mut self) {
        self.strategy.as_dyn_mut().compact();
    }

    /// Retrain the IVF partition over the current vectors. No-op for flat
    /// indexes.
    pub fn train(&mut self) {
        if let Strategy::Ivf(ivf) = &mut self.strategy {
            ivf.train();
        }
    }

    /// Atomically write the index to `path`, stamped with `generation`.
    pub fn save(&mut self, path: &Path, generation: u64) -> Result<()> {
        self.generation = generation;
        persist::write_atomic(path, &codec::encode(self))
    }

    /// Load an index written by [`VectorIndex::save`].
    ///
    /// Fails with [`Error::IncompatibleIndex`] if the file was produced with
    /// a different dimension, index kind or normalization setting, or is
    /// not a valid index file.
    pub fn load(path: &Path, spec: &IndexSpec) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        codec::decode(&bytes, spec)
    }
}
