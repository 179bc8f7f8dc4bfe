//! The vector database: one instance per data directory.
//!
//! [`VectorDatabase`] coordinates the chunker, embedder, vector index and
//! document store, and owns the commit protocol. A pass writes the next
//! generation of the index and document store to staged files, then the
//! metadata record (the commit point), then promotes the staged files.
//! `open` finishes an interrupted promotion or discards staged files that
//! were never committed, so readers only ever see a committed generation.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    chunking::{Chunk, chunk_text},
    config::{DatabaseConfig, IndexKind},
    data_dir::DataDir,
    docstore::DocumentStore,
    embedding::{Embedder, embed_batched},
    error::{Error, Result},
    extract::TextExtractor,
    incremental::{self, CorpusSnapshot, UpdatePlan},
    index::{IndexSpec, VectorEntry, VectorIndex},
    metadata::MetadataRecord,
    persist,
    search::{SearchHit, rank_hits},
    walker::DiscoveredFile,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatabaseState {
    Uninitialized,
    Loading,
    Ready,
    Updating,
    Closed,
}

impl fmt::Display for DatabaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Updating => "updating",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What [`VectorDatabase::open`] found on disk.
#[derive(Debug)]
pub enum LoadOutcome {
    /// A committed generation was loaded.
    Loaded,
    /// No committed database exists yet.
    Missing,
    /// The artifacts cannot be used under the current configuration. The
    /// database starts empty and the next pass rebuilds.
    Incompatible(Error),
    /// The artifacts loaded but disagree with each other. They are still
    /// served, and the next pass rebuilds.
    Inconsistent(ConsistencyReport),
}

/// Snapshot of the database for management tooling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub state: DatabaseState,
    pub num_chunks: usize,
    pub num_documents: usize,
    pub dimension: usize,
    pub index_kind: IndexKind,
    /// Commit time (seconds since the Unix epoch) of the loaded generation.
    pub built_at: Option<u64>,
    /// The next pass will be a full rebuild.
    pub is_stale: bool,
    pub generation: u64,
}

/// Cross-check of the vector index, document store and metadata record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub index_ids: usize,
    pub store_ids: usize,
    /// In the index but without a chunk in the store.
    pub missing_from_store: Vec<String>,
    /// In the store but without a vector in the index.
    pub missing_from_index: Vec<String>,
    pub index_generation: u64,
    pub store_generation: u64,
    pub metadata_generation: Option<u64>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_from_store.is_empty()
            && self.missing_from_index.is_empty()
            && self.metadata_generation.is_none_or(|g| {
                g == self.index_generation && g == self.store_generation
            })
    }
}

/// Result of one [`VectorDatabase::build_or_update`] pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct UpdateSummary {
    /// `noop`, `incremental` or `rebuild`.
    pub plan: &'static str,
    pub documents_indexed: usize,
    pub documents_removed: usize,
    /// Source path and error for each document that could not be indexed.
    pub documents_failed: Vec<(String, String)>,
    pub chunks_added: usize,
    pub chunks_removed: usize,
    /// Generation committed by this pass (unchanged for a no-op).
    pub generation: u64,
}

pub struct VectorDatabase {
    dir: DataDir,
    config: DatabaseConfig,
    embedder: Box<dyn Embedder>,
    extractor: Box<dyn TextExtractor>,
    state: DatabaseState,
    index: VectorIndex,
    store: DocumentStore,
    metadata: Option<MetadataRecord>,
    /// Highest generation seen on disk; the next commit uses one more.
    generation: u64,
    /// Set when search finds an index ID with no stored chunk.
    desynced: AtomicBool,
}

impl fmt::Debug for VectorDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorDatabase")
            .field("dir", &self.dir)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("chunks", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl VectorDatabase {
    /// Create an unopened database over `dir`.
    ///
    /// Fails with [`Error::InvalidConfig`] for an invalid configuration and
    /// [`Error::DimensionMismatch`] if the embedder's dimension differs from
    /// the configured one.
    pub fn new(
        dir: DataDir,
        config: DatabaseConfig,
        embedder: impl Embedder + 'static,
        extractor: impl TextExtractor + 'static,
    ) -> Result<Self> {
        config.validate()?;
        if embedder.dimension() != config.dimension {
            return Err(Error::DimensionMismatch {
                expected: config.dimension,
                actual: embedder.dimension(),
            });
        }

        let index = VectorIndex::new(IndexSpec::from_config(&config));
        Ok(Self {
            dir,
            config,
            embedder: Box::new(embedder),
            extractor: Box::new(extractor),
            state: DatabaseState::Uninitialized,
            index,
            store: DocumentStore::new(),
            metadata: None,
            generation: 0,
            desynced: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> DatabaseState {
        self.state
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.dir
    }

    pub fn metadata(&self) -> Option<&MetadataRecord> {
        self.metadata.as_ref()
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state == DatabaseState::Ready {
            Ok(())
        } else {
            Err(Error::NotReady(self.state))
        }
    }

    /// Load the committed generation from disk and become `Ready`.
    ///
    /// Missing or incompatible artifacts are not an error: the database
    /// comes up empty and the outcome says why. Only I/O failures other
    /// than "not found" are returned as errors.
    pub fn open(&mut self) -> Result<LoadOutcome> {
        match self.state {
            DatabaseState::Uninitialized | DatabaseState::Closed => {}
            state => return Err(Error::NotReady(state)),
        }
        self.state = DatabaseState::Loading;

        match self.load_committed() {
            Ok(outcome) => {
                self.state = DatabaseState::Ready;
                Ok(outcome)
            }
            Err(e) => {
                self.reset_memory();
                self.state = DatabaseState::Uninitialized;
                Err(e)
            }
        }
    }

    fn reset_memory(&mut self) {
        self.index = VectorIndex::new(IndexSpec::from_config(&self.config));
        self.store = DocumentStore::new();
        self.metadata = None;
        self.desynced.store(false, Ordering::Relaxed);
    }

    fn load_committed(&mut self) -> Result<LoadOutcome> {
        self.reset_memory();
        let spec = IndexSpec::from_config(&self.config);
        let index_path = self.dir.index_file();
        let store_path = self.dir.docstore_file();

        let metadata = match MetadataRecord::load(&self.dir.metadata_file()) {
            Ok(record) => Some(record),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                None
            }
            Err(e @ (Error::Json(_) | Error::IncompatibleIndex(_))) => {
                warn!(error = %e, "discarding unreadable metadata record");
                self.discard_staged()?;
                return Ok(LoadOutcome::Incompatible(e));
            }
            Err(e) => return Err(e),
        };
        let Some(metadata) = metadata else {
            self.discard_staged()?;
            if index_path.exists() || store_path.exists() {
                warn!("index files present without a metadata record");
            }
            return Ok(LoadOutcome::Missing);
        };
        self.generation = metadata.version;

        // Finish or roll back the last pass.
        let committed = metadata.version;
        self.settle_staged(&index_path, committed, |p| {
            VectorIndex::load(p, &spec).map(|i| i.generation())
        })?;
        self.settle_staged(&store_path, committed, |p| {
            DocumentStore::load(p).map(|s| s.generation())
        })?;

        let index = match VectorIndex::load(&index_path, &spec) {
            Ok(index) => index,
            Err(e) => return Ok(incompatible_or_missing(e)?),
        };
        let store = match DocumentStore::load(&store_path) {
            Ok(store) => store,
            Err(e) => return Ok(incompatible_or_missing(e)?),
        };

        self.generation = committed
            .max(index.generation())
            .max(store.generation());
        self.index = index;
        self.store = store;
        self.metadata = Some(metadata);

        let report = self.verify();
        if !report.is_consistent() {
            warn!(
                missing_from_store = report.missing_from_store.len(),
                missing_from_index = report.missing_from_index.len(),
                index_generation = report.index_generation,
                store_generation = report.store_generation,
                "index and document store disagree; next pass rebuilds"
            );
            self.metadata = None;
            return Ok(LoadOutcome::Inconsistent(report));
        }

        info!(
            chunks = self.store.len(),
            documents = self.store.num_sources(),
            generation = committed,
            "database loaded"
        );
        Ok(LoadOutcome::Loaded)
    }

    /// Promote a staged file that belongs to the committed generation, or
    /// remove one left behind by a pass that never committed.
    fn settle_staged(
        &self,
        path: &Path,
        committed: u64,
        staged_generation: impl Fn(&Path) -> Result<u64>,
    ) -> Result<()> {
        let staged = persist::staged_path(path);
        if !staged.exists() {
            return Ok(());
        }
        match staged_generation(&staged) {
            Ok(generation) if generation == committed => {
                info!(path = %path.display(), generation, "completing interrupted commit");
                persist::promote(path)
            }
            _ => {
                debug!(path = %staged.display(), "removing uncommitted staged file");
                persist::remove_if_exists(&staged).map(|_| ())
            }
        }
    }

    fn discard_staged(&self) -> Result<()> {
        for path in [self.dir.index_file(), self.dir.docstore_file()] {
            persist::remove_if_exists(&persist::staged_path(&path))?;
        }
        Ok(())
    }

    /// Cross-check the in-memory index, store and metadata.
    pub fn verify(&self) -> ConsistencyReport {
        let index_ids: BTreeSet<&str> = self.index.ids().collect();
        let store_ids: BTreeSet<&str> = self.store.ids().collect();

        ConsistencyReport {
            index_ids: index_ids.len(),
            store_ids: store_ids.len(),
            missing_from_store: index_ids
                .difference(&store_ids)
                .map(|id| id.to_string())
                .collect(),
            missing_from_index: store_ids
                .difference(&index_ids)
                .map(|id| id.to_string())
                .collect(),
            index_generation: self.index.generation(),
            store_generation: self.store.generation(),
            metadata_generation: self.metadata.as_ref().map(|m| m.version),
        }
    }

    /// Bring the index in line with `documents`.
    ///
    /// Computes a plan, applies it one document at a time, and commits.
    /// A document that fails to extract or embed is skipped and retried on
    /// the next pass; it does not abort the others. Any other failure
    /// leaves the previously committed generation in place, both on disk
    /// and in memory, and is returned.
    pub fn build_or_update(
        &mut self,
        documents: &[DiscoveredFile],
        force_rebuild: bool,
    ) -> Result<UpdateSummary> {
        self.ensure_ready()?;
        self.state = DatabaseState::Updating;

        let result = self.run_update(documents, force_rebuild);
        if result.is_err()
            && let Err(e) = self.load_committed()
        {
            warn!(error = %e, "could not reload committed state");
            self.reset_memory();
        }

        self.state = DatabaseState::Ready;
        result
    }

    fn run_update(
        &mut self,
        documents: &[DiscoveredFile],
        force_rebuild: bool,
    ) -> Result<UpdateSummary> {
        let snapshot = CorpusSnapshot::capture(documents);
        let stored = if self.desynced.load(Ordering::Relaxed) {
            None
        } else {
            self.metadata.as_ref()
        };
        let plan = incremental::plan(&snapshot, stored, &self.config, force_rebuild);

        let mut summary = UpdateSummary {
            generation: self.metadata.as_ref().map_or(0, |m| m.version),
            ..UpdateSummary::default()
        };

        let (mut fingerprints, changed, to_index) = match plan {
            UpdatePlan::NoOp => {
                info!(documents = snapshot.len(), "index is up to date");
                summary.plan = "noop";
                return Ok(summary);
            }
            UpdatePlan::FullRebuild(reason) => {
                info!(%reason, documents = snapshot.len(), "full rebuild");
                summary.plan = "rebuild";
                summary.chunks_removed = self.store.len();
                self.index.clear();
                self.store.clear();
                let all: BTreeSet<String> =
                    snapshot.fingerprints.keys().cloned().collect();
                (BTreeMap::new(), BTreeSet::new(), all)
            }
            UpdatePlan::Incremental {
                changed,
                removed,
                added,
            } => {
                info!(
                    changed = changed.len(),
                    removed = removed.len(),
                    added = added.len(),
                    "incremental update"
                );
                summary.plan = "incremental";
                let mut fingerprints = self
                    .metadata
                    .as_ref()
                    .map(|m| m.document_fingerprints.clone())
                    .unwrap_or_default();
                for path in &removed {
                    summary.chunks_removed += self.purge(path);
                    fingerprints.remove(path);
                    summary.documents_removed += 1;
                }
                let to_index = changed.union(&added).cloned().collect();
                (fingerprints, changed, to_index)
            }
        };

        let by_path: HashMap<&str, &DiscoveredFile> = documents
            .iter()
            .map(|d| (d.source_path.as_str(), d))
            .collect();

        for path in &to_index {
            let (Some(file), Some(hash)) =
                (by_path.get(path.as_str()), snapshot.fingerprints.get(path))
            else {
                continue;
            };

            match self.prepare(file, hash) {
                Ok((chunks, vectors)) => {
                    summary.chunks_removed += self.purge(path);
                    summary.chunks_added += chunks.len();
                    let entries = chunks
                        .iter()
                        .zip(vectors)
                        .map(|(chunk, vector)| VectorEntry {
                            id: chunk.id.clone(),
                            vector,
                        })
                        .collect();
                    self.index.add(entries)?;
                    self.store.put_batch(chunks);
                    fingerprints.insert(path.clone(), hash.clone());
                    summary.documents_indexed += 1;
                }
                Err(e) => {
                    if changed.contains(path) {
                        warn!(source_path = %path, error = %e, "keeping previous version of document");
                    } else {
                        warn!(source_path = %path, error = %e, "skipping document");
                    }
                    summary.documents_failed.push((path.clone(), e.to_string()));
                }
            }
        }

        if summary.plan == "rebuild" {
            self.index.train();
        } else if summary.documents_indexed == 0 && summary.documents_removed == 0
        {
            info!(
                failed = summary.documents_failed.len(),
                "nothing applied; committed generation unchanged"
            );
            return Ok(summary);
        }

        let generation = self.generation + 1;
        self.commit(generation, fingerprints)?;
        summary.generation = generation;

        info!(
            indexed = summary.documents_indexed,
            removed = summary.documents_removed,
            failed = summary.documents_failed.len(),
            chunks = self.store.len(),
            generation,
            "update committed"
        );
        Ok(summary)
    }

    /// Extract, chunk and embed one document without touching the stores.
    fn prepare(
        &self,
        file: &DiscoveredFile,
        fingerprint: &str,
    ) -> Result<(Vec<Chunk>, Vec<Vec<f32>>)> {
        let text = self.extractor.extract_text(&file.absolute_path)?;
        let chunks = chunk_text(
            &text,
            &file.source_path,
            fingerprint,
            &self.config.chunking(),
        )?;
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors =
            embed_batched(&*self.embedder, &texts, self.config.embed_batch_size)?;
        debug!(source_path = %file.source_path, chunks = chunks.len(), "document prepared");
        Ok((chunks, vectors))
    }

    /// Remove a document's chunks from both stores.
    fn purge(&mut self, source_path: &str) -> usize {
        let ids = self.store.delete_by_source(source_path);
        self.index.remove(&ids);
        ids.len()
    }

    fn commit(
        &mut self,
        generation: u64,
        fingerprints: BTreeMap<String, String>,
    ) -> Result<()> {
        let index_path = self.dir.index_file();
        let store_path = self.dir.docstore_file();

        self.index
            .save(&persist::staged_path(&index_path), generation)?;
        self.store
            .save(&persist::staged_path(&store_path), generation)?;

        let record = MetadataRecord::new(&self.config, generation, fingerprints);
        record.save(&self.dir.metadata_file())?;

        persist::promote(&index_path)?;
        persist::promote(&store_path)?;

        self.metadata = Some(record);
        self.generation = generation;
        self.desynced.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Top-`top_k` chunks for `query`, dropping scores below the configured
    /// `min_score`.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        self.search_with(query, top_k, self.config.min_score)
    }

    pub fn search_with(
        &self,
        query: &str,
        top_k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        self.ensure_ready()?;

        let mut embedded = embed_batched(&*self.embedder, &[query], 1)?;
        let query_vector = embedded.pop().ok_or_else(|| {
            Error::Embedding("embedder returned no vector for the query".into())
        })?;

        let ranked = self.index.search(&query_vector, top_k)?;
        let ids: Vec<&str> = ranked.iter().map(|(id, _)| id.as_str()).collect();

        let scored: Vec<(Chunk, f32)> = match self.store.get_many(&ids) {
            Ok(chunks) => chunks
                .into_iter()
                .zip(&ranked)
                .map(|(chunk, (_, score))| (chunk.clone(), *score))
                .collect(),
            Err(_) => ranked
                .iter()
                .filter_map(|(id, score)| match self.store.get(id) {
                    Ok(chunk) => Some((chunk.clone(), *score)),
                    Err(e) => {
                        warn!(error = %e, "index holds a chunk the store does not");
                        self.desynced.store(true, Ordering::Relaxed);
                        None
                    }
                })
                .collect(),
        };

        Ok(rank_hits(scored, min_score))
    }

    pub fn status(&self) -> Status {
        Status {
            state: self.state,
            num_chunks: self.store.len(),
            num_documents: self
                .metadata
                .as_ref()
                .map_or(self.store.num_sources(), |m| m.num_documents()),
            dimension: self.config.dimension,
            index_kind: self.config.index_kind,
            built_at: self.metadata.as_ref().map(|m| m.built_at),
            is_stale: self.metadata.is_none()
                || self.desynced.load(Ordering::Relaxed),
            generation: self.metadata.as_ref().map_or(0, |m| m.version),
        }
    }

    /// Delete every persisted artifact and empty the database.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_ready()?;
        for path in self.dir.artifacts().iter().rev() {
            persist::remove_if_exists(path)?;
        }
        self.discard_staged()?;
        self.reset_memory();
        info!(dir = %self.dir.root().display(), "database cleared");
        Ok(())
    }

    /// Drop logically removed vectors and persist the result as a new
    /// generation. Returns the number of reclaimed rows; with nothing to
    /// reclaim, nothing is written.
    pub fn compact(&mut self) -> Result<usize> {
        self.ensure_ready()?;
        let reclaimed = self.index.tombstones();
        if reclaimed == 0 {
            debug!("nothing to compact");
            return Ok(0);
        }
        self.index.compact();

        if let Some(fingerprints) =
            self.metadata.as_ref().map(|m| m.document_fingerprints.clone())
        {
            self.state = DatabaseState::Updating;
            let result = self.commit(self.generation + 1, fingerprints);
            self.state = DatabaseState::Ready;
            result?;
        }
        info!(reclaimed, "index compacted");
        Ok(reclaimed)
    }

    /// Release in-memory state. The database can be reopened.
    pub fn close(&mut self) {
        self.reset_memory();
        self.state = DatabaseState::Closed;
    }
}

fn incompatible_or_missing(e: Error) -> Result<LoadOutcome> {
    match e {
        Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            warn!("metadata record present but index files missing");
            Ok(LoadOutcome::Missing)
        }
        e @ (Error::IncompatibleIndex(_)
        | Error::DimensionMismatch { .. }
        | Error::Json(_)) => {
            warn!(error = %e, "stored index is incompatible; next pass rebuilds");
            Ok(LoadOutcome::Incompatible(e))
        }
        e => Err(e),
    }
}

/// A database shared between one writer and many readers.
///
/// Updates hold the write lock for the whole pass, so searches issued
/// meanwhile wait and then see the new generation.
#[derive(Debug, Clone)]
pub struct SharedDatabase {
    inner: Arc<RwLock<VectorDatabase>>,
}

impl SharedDatabase {
    pub fn new(database: VectorDatabase) -> Self {
        Self {
            inner: Arc::new(RwLock::new(database)),
        }
    }

    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        self.inner.read().search(query, top_k)
    }

    pub fn build_or_update(
        &self,
        documents: &[DiscoveredFile],
        force_rebuild: bool,
    ) -> Result<UpdateSummary> {
        self.inner.write().build_or_update(documents, force_rebuild)
    }

    pub fn status(&self) -> Status {
        self.inner.read().status()
    }

    /// Run `f` with exclusive access.
    pub fn with_mut<T>(&self, f: impl FnOnce(&mut VectorDatabase) -> T) -> T {
        f(&mut self.inner.write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{embedding::HashEmbedder, extract::PlainTextExtractor, walker};

    const DIM: usize = 64;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            dimension: DIM,
            chunk_size: 64,
            chunk_overlap: 16,
            ..DatabaseConfig::default()
        }
    }

    fn database(dir: &Path, config: DatabaseConfig) -> VectorDatabase {
        let dir = DataDir::create(dir.to_path_buf()).unwrap();
        let embedder = HashEmbedder::new(config.dimension);
        VectorDatabase::new(dir, config, embedder, PlainTextExtractor).unwrap()
    }

    fn opened(dir: &Path) -> VectorDatabase {
        let mut db = database(dir, config());
        db.open().unwrap();
        db
    }

    fn discover(root: &Path) -> Vec<DiscoveredFile> {
        walker::discover_files(root, &config().include).unwrap()
    }

    fn write_docs(root: &Path) {
        std::fs::write(
            root.join("capital.md"),
            "Banks must hold common equity tier 1 capital of at least 4.5% of risk-weighted assets.",
        )
        .unwrap();
        std::fs::write(
            root.join("liquidity.txt"),
            "The liquidity coverage ratio requires high quality liquid assets to cover 30 days of outflows.",
        )
        .unwrap();
    }

    #[test]
    fn state_machine() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = database(tmp.path(), config());
        assert_eq!(db.state(), DatabaseState::Uninitialized);
        assert!(matches!(
            db.search("x", 3),
            Err(Error::NotReady(DatabaseState::Uninitialized))
        ));
        assert!(matches!(
            db.build_or_update(&[], false),
            Err(Error::NotReady(_))
        ));

        assert!(matches!(db.open().unwrap(), LoadOutcome::Missing));
        assert_eq!(db.state(), DatabaseState::Ready);
        assert!(matches!(db.open(), Err(Error::NotReady(DatabaseState::Ready))));

        db.close();
        assert!(matches!(
            db.search("x", 3),
            Err(Error::NotReady(DatabaseState::Closed))
        ));
        assert!(matches!(db.open().unwrap(), LoadOutcome::Missing));
    }

    #[test]
    fn embedder_dimension_must_match() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::create(tmp.path().to_path_buf()).unwrap();
        let err = VectorDatabase::new(
            dir,
            config(),
            HashEmbedder::new(DIM + 1),
            PlainTextExtractor,
        )
        .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn build_then_search() {
        let docs = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(docs.path());

        let mut db = opened(data.path());
        let summary = db.build_or_update(&discover(docs.path()), false).unwrap();
        assert_eq!(summary.plan, "rebuild");
        assert_eq!(summary.documents_indexed, 2);
        assert_eq!(summary.generation, 1);

        let hits = db.search("liquidity coverage ratio", 3).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk.source_path, "liquidity.txt");
        assert!(db.verify().is_consistent());

        let status = db.status();
        assert_eq!(status.num_documents, 2);
        assert_eq!(status.num_chunks, db.index().len());
        assert!(!status.is_stale);
        assert!(status.built_at.is_some());
    }

    #[test]
    fn reopen_serves_committed_generation() {
        let docs = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(docs.path());

        let mut db = opened(data.path());
        db.build_or_update(&discover(docs.path()), false).unwrap();
        let before = db.search("tier 1 capital", 5).unwrap();
        db.close();

        let db = opened(data.path());
        assert_eq!(db.status().generation, 1);
        assert_eq!(db.search("tier 1 capital", 5).unwrap(), before);
    }

    #[test]
    fn failed_document_is_retried_next_pass() {
        let docs = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(docs.path());
        let pdf = docs.path().join("scan.pdf");
        std::fs::write(&pdf, "%PDF-1.7").unwrap();

        let mut files = discover(docs.path());
        files.push(DiscoveredFile {
            source_path: "scan.pdf".to_string(),
            absolute_path: pdf,
            mtime: 1,
        });

        let mut db = opened(data.path());
        let summary = db.build_or_update(&files, false).unwrap();
        assert_eq!(summary.documents_indexed, 2);
        assert_eq!(summary.documents_failed.len(), 1);
        assert_eq!(summary.documents_failed[0].0, "scan.pdf");
        let fingerprints = &db.metadata().unwrap().document_fingerprints;
        assert!(!fingerprints.contains_key("scan.pdf"));
        assert!(db.verify().is_consistent());

        // Absent from the fingerprint set, so the next pass tries it again
        // without committing a new generation when it fails.
        let again = db.build_or_update(&files, false).unwrap();
        assert_eq!(again.plan, "incremental");
        assert_eq!(again.documents_failed.len(), 1);
        assert_eq!(again.generation, summary.generation);
    }

    /// Fails any batch containing text marked `REDACTED`.
    struct RejectingEmbedder(HashEmbedder);

    impl Embedder for RejectingEmbedder {
        fn dimension(&self) -> usize {
            self.0.dimension()
        }

        fn embed(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>> {
            if batch.iter().any(|text| text.contains("REDACTED")) {
                return Err(Error::Embedding("rejected input".into()));
            }
            self.0.embed(batch)
        }
    }

    #[test]
    fn embedding_failure_skips_only_that_document() {
        let docs = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(docs.path());
        std::fs::write(docs.path().join("memo.md"), "REDACTED board memo").unwrap();

        let dir = DataDir::create(data.path().to_path_buf()).unwrap();
        let embedder = RejectingEmbedder(HashEmbedder::new(DIM));
        let mut db =
            VectorDatabase::new(dir, config(), embedder, PlainTextExtractor)
                .unwrap();
        db.open().unwrap();

        let summary = db.build_or_update(&discover(docs.path()), false).unwrap();
        assert_eq!(summary.documents_indexed, 2);
        assert_eq!(summary.documents_failed.len(), 1);
        assert_eq!(summary.documents_failed[0].0, "memo.md");
        assert!(summary.documents_failed[0].1.contains("rejected input"));
        let fingerprints = &db.metadata().unwrap().document_fingerprints;
        assert!(!fingerprints.contains_key("memo.md"));
        assert!(fingerprints.contains_key("capital.md"));
        assert!(db.store().chunks_for_source("memo.md").is_empty());
        assert!(db.verify().is_consistent());

        // A changed document that fails keeps its previous chunks.
        let before: Vec<Chunk> = db
            .store()
            .chunks_for_source("capital.md")
            .into_iter()
            .cloned()
            .collect();
        let old_fingerprint = fingerprints["capital.md"].clone();
        std::fs::write(docs.path().join("capital.md"), "REDACTED capital plan")
            .unwrap();

        let again = db.build_or_update(&discover(docs.path()), false).unwrap();
        assert_eq!(again.plan, "incremental");
        assert_eq!(again.documents_indexed, 0);
        assert_eq!(again.documents_failed.len(), 2);
        assert_eq!(again.generation, summary.generation);

        let after: Vec<Chunk> = db
            .store()
            .chunks_for_source("capital.md")
            .into_iter()
            .cloned()
            .collect();
        assert_eq!(before, after);
        assert!(after.iter().all(|c| db.index().contains(&c.id)));
        assert_eq!(
            db.metadata().unwrap().document_fingerprints["capital.md"],
            old_fingerprint
        );
        assert!(db.verify().is_consistent());
    }

    #[test]
    fn failed_commit_keeps_previous_generation() {
        let docs = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(docs.path());

        let mut db = opened(data.path());
        db.build_or_update(&discover(docs.path()), false).unwrap();
        let artifacts = db.data_dir().artifacts();
        let read_all = || -> Vec<Vec<u8>> {
            artifacts.iter().map(|p| std::fs::read(p).unwrap()).collect()
        };
        let files_before = read_all();
        let hits_before = db.search("liquidity coverage", 5).unwrap();

        // A directory where the metadata temp file goes makes the commit
        // point unwritable after both staged files are on disk.
        std::fs::write(
            docs.path().join("liquidity.txt"),
            "Net stable funding ratio over a one year horizon.",
        )
        .unwrap();
        let blocker = data.path().join("metadata.json.tmp");
        std::fs::create_dir(&blocker).unwrap();

        let err = db.build_or_update(&discover(docs.path()), false).unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{err:?}");
        assert_eq!(db.state(), DatabaseState::Ready);
        assert_eq!(db.status().generation, 1);
        assert_eq!(db.search("liquidity coverage", 5).unwrap(), hits_before);
        assert_eq!(read_all(), files_before);
        for path in [db.data_dir().index_file(), db.data_dir().docstore_file()] {
            assert!(!persist::staged_path(&path).exists());
        }
        assert!(db.verify().is_consistent());

        std::fs::remove_dir(&blocker).unwrap();
        let summary = db.build_or_update(&discover(docs.path()), false).unwrap();
        assert_eq!(summary.plan, "incremental");
        assert_eq!(summary.generation, 2);
    }

    #[test]
    fn interrupted_pass_is_rolled_back_on_open() {
        let docs = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(docs.path());

        let mut db = opened(data.path());
        db.build_or_update(&discover(docs.path()), false).unwrap();
        let committed = std::fs::read(data.path().join("index.bin")).unwrap();
        db.close();

        // A pass that wrote its staged index but died before committing.
        let staged = persist::staged_path(&data.path().join("index.bin"));
        let mut next = VectorIndex::new(IndexSpec::from_config(&config()));
        next.save(&staged, 2).unwrap();

        let mut db = database(data.path(), config());
        assert!(matches!(db.open().unwrap(), LoadOutcome::Loaded));
        assert!(!staged.exists());
        assert_eq!(db.status().generation, 1);
        assert_eq!(std::fs::read(data.path().join("index.bin")).unwrap(), committed);
    }

    #[test]
    fn committed_but_unpromoted_pass_is_completed_on_open() {
        let docs = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(docs.path());

        let mut db = opened(data.path());
        db.build_or_update(&discover(docs.path()), false).unwrap();
        db.close();

        // Simulate a crash after the metadata commit: stage generation 2
        // of both files and commit metadata 2 without promoting.
        let mut db = opened(data.path());
        let index_path = data.path().join("index.bin");
        let store_path = data.path().join("docstore.json");
        let mut index = db.index().clone();
        let mut store = db.store().clone();
        index.save(&persist::staged_path(&index_path), 2).unwrap();
        store.save(&persist::staged_path(&store_path), 2).unwrap();
        let mut record = db.metadata().unwrap().clone();
        record.version = 2;
        record.save(&data.path().join("metadata.json")).unwrap();
        db.close();

        assert!(matches!(db.open().unwrap(), LoadOutcome::Loaded));
        assert_eq!(db.status().generation, 2);
        assert!(!persist::staged_path(&index_path).exists());
        assert!(!persist::staged_path(&store_path).exists());
        assert!(db.verify().is_consistent());
    }

    #[test]
    fn store_desync_forces_rebuild() {
        let docs = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(docs.path());

        let mut db = opened(data.path());
        db.build_or_update(&discover(docs.path()), false).unwrap();
        db.close();

        // Drop one document's chunks from the store only.
        let store_path = data.path().join("docstore.json");
        let mut store = DocumentStore::load(&store_path).unwrap();
        store.delete_by_source("capital.md");
        store.save(&store_path, 1).unwrap();

        let mut db = database(data.path(), config());
        match db.open().unwrap() {
            LoadOutcome::Inconsistent(report) => {
                assert!(!report.missing_from_store.is_empty());
                assert!(report.missing_from_index.is_empty());
            }
            other => panic!("expected inconsistent load, got {other:?}"),
        }
        assert!(db.status().is_stale);

        // Search still works and skips the dangling IDs.
        db.search("tier 1 capital", 10).unwrap();

        let summary = db.build_or_update(&discover(docs.path()), false).unwrap();
        assert_eq!(summary.plan, "rebuild");
        assert!(db.verify().is_consistent());
        assert!(!db.status().is_stale);
    }

    #[test]
    fn clear_removes_artifacts() {
        let docs = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(docs.path());

        let mut db = opened(data.path());
        db.build_or_update(&discover(docs.path()), false).unwrap();
        db.clear().unwrap();

        for path in db.data_dir().artifacts() {
            assert!(!path.exists(), "{} still exists", path.display());
        }
        assert_eq!(db.status().num_chunks, 0);
        assert!(db.search("capital", 5).unwrap().is_empty());

        let summary = db.build_or_update(&discover(docs.path()), false).unwrap();
        assert_eq!(summary.plan, "rebuild");
    }

    #[test]
    fn compact_reclaims_removed_rows() {
        let docs = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(docs.path());

        let mut db = opened(data.path());
        db.build_or_update(&discover(docs.path()), false).unwrap();
        std::fs::remove_file(docs.path().join("capital.md")).unwrap();
        db.build_or_update(&discover(docs.path()), false).unwrap();
        assert!(db.index().tombstones() > 0);

        let reclaimed = db.compact().unwrap();
        assert!(reclaimed > 0);
        assert_eq!(db.index().tombstones(), 0);
        assert_eq!(db.status().generation, 3);
        assert!(db.verify().is_consistent());
    }

    #[test]
    fn compact_without_tombstones_writes_nothing() {
        let docs = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(docs.path());

        let mut db = opened(data.path());
        db.build_or_update(&discover(docs.path()), false).unwrap();
        let metadata = std::fs::read(data.path().join("metadata.json")).unwrap();

        assert_eq!(db.compact().unwrap(), 0);
        assert_eq!(db.status().generation, 1);
        assert_eq!(
            std::fs::read(data.path().join("metadata.json")).unwrap(),
            metadata
        );
    }

    #[test]
    fn min_score_filters_hits() {
        let docs = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(docs.path());

        let mut db = opened(data.path());
        db.build_or_update(&discover(docs.path()), false).unwrap();

        let all = db.search_with("liquidity", 10, None).unwrap();
        let none = db.search_with("liquidity", 10, Some(2.0)).unwrap();
        assert!(!all.is_empty());
        assert!(none.is_empty());
    }

    #[test]
    fn shared_database_serves_readers() {
        let docs = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        write_docs(docs.path());

        let shared = SharedDatabase::new(opened(data.path()));
        shared.build_or_update(&discover(docs.path()), false).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = shared.clone();
                std::thread::spawn(move || db.search("capital", 3).unwrap())
            })
            .collect();
        for handle in handles {
            assert!(!handle.join().unwrap().is_empty());
        }
        assert_eq!(shared.status().generation, 1);
        shared.with_mut(|db| db.close());
        assert_eq!(shared.status().state, DatabaseState::Closed);
    }
}
