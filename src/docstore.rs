use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    chunking::Chunk,
    error::{Error, Result},
    persist,
};

pub const DOCSTORE_SCHEMA_VERSION: u32 = 1;

/// Durable mapping from chunk ID to chunk text and provenance.
///
/// Chunks are kept in a `BTreeMap` so the serialized form is byte-stable
/// for identical contents. A secondary source-path index makes
/// [`DocumentStore::delete_by_source`] proportional to the document's
/// chunk count rather than the corpus size.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    chunks: BTreeMap<String, Chunk>,
    by_source: BTreeMap<String, BTreeSet<String>>,
    generation: u64,
}

#[derive(Serialize)]
struct PersistedRef<'a> {
    schema_version: u32,
    generation: u64,
    chunks: &'a BTreeMap<String, Chunk>,
}

#[derive(Deserialize)]
struct Persisted {
    schema_version: u32,
    generation: u64,
    chunks: BTreeMap<String, Chunk>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert chunks by ID, overwriting text and metadata of existing IDs.
    pub fn put_batch(&mut self, chunks: impl IntoIterator<Item = Chunk>) {
        for chunk in chunks {
            if let Some(previous) = self.chunks.get(&chunk.id)
                && previous.source_path != chunk.source_path
            {
                let source = previous.source_path.clone();
                self.unlink_source(&source, &chunk.id);
            }
            self.by_source
                .entry(chunk.source_path.clone())
                .or_default()
                .insert(chunk.id.clone());
            self.chunks.insert(chunk.id.clone(), chunk);
        }
    }

    /// Remove every chunk cut from `source_path`, returning the removed IDs
    /// in ascending order.
    pub fn delete_by_source(&mut self, source_path: &str) -> Vec<String> {
        let Some(ids) = self.by_source.remove(source_path) else {
            return Vec::new();
        };
        for id in &ids {
            self.chunks.remove(id);
        }
        ids.into_iter().collect()
    }

    pub fn get(&self, id: &str) -> Result<&Chunk> {
        self.chunks.get(id).ok_or_else(|| Error::chunk_not_found(id))
    }

    /// Fetch chunks preserving the order of `ids`. Fails on the first
    /// missing ID.
    pub fn get_many<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<&Chunk>> {
        ids.iter().map(|id| self.get(id.as_ref())).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.chunks.contains_key(id)
    }

    /// All chunk IDs in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.chunks.keys().map(String::as_str)
    }

    /// Source paths that currently have at least one chunk.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.by_source.keys().map(String::as_str)
    }

    /// Chunks of one document in offset order.
    pub fn chunks_for_source(&self, source_path: &str) -> Vec<&Chunk> {
        let mut chunks: Vec<&Chunk> = self
            .by_source
            .get(source_path)
            .map(|ids| ids.iter().filter_map(|id| self.chunks.get(id)).collect())
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.char_offset);
        chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn num_sources(&self) -> usize {
        self.by_source.len()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.by_source.clear();
    }

    /// Commit generation this store was last saved or loaded with.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Atomically write the store to `path`, stamped with `generation`.
    pub fn save(&mut self, path: &Path, generation: u64) -> Result<()> {
        let persisted = PersistedRef {
            schema_version: DOCSTORE_SCHEMA_VERSION,
            generation,
            chunks: &self.chunks,
        };
        let bytes = serde_json::to_vec_pretty(&persisted)?;
        persist::write_atomic(path, &bytes)?;
        self.generation = generation;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let persisted: Persisted = serde_json::from_slice(&bytes)?;
        if persisted.schema_version != DOCSTORE_SCHEMA_VERSION {
            return Err(Error::IncompatibleIndex(format!(
                "unsupported document store schema_version {} (expected {DOCSTORE_SCHEMA_VERSION})",
                persisted.schema_version
            )));
        }

        let mut store = Self {
            generation: persisted.generation,
            ..Self::default()
        };
        for (id, chunk) in persisted.chunks {
            if id != chunk.id {
                return Err(Error::IncompatibleIndex(format!(
                    "document store key {id} does not match chunk id {}",
                    chunk.id
                )));
            }
            store.put_batch([chunk]);
        }
        Ok(store)
    }

    fn unlink_source(&mut self, source_path: &str, id: &str) {
        if let Some(ids) = self.by_source.get_mut(source_path) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_source.remove(source_path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_id::ChunkId;

    fn chunk(source: &str, offset: usize, text: &str) -> Chunk {
        Chunk {
            id: ChunkId::new(source, offset).into_string(),
            text: text.to_string(),
            source_path: source.to_string(),
            char_offset: offset,
            length: text.chars().count(),
            doc_fingerprint: "fp".to_string(),
        }
    }

    #[test]
    fn put_and_get() {
        let mut store = DocumentStore::new();
        let c = chunk("a.md", 0, "alpha");
        store.put_batch([c.clone()]);

        assert_eq!(store.get(&c.id).unwrap(), &c);
        assert_eq!(store.len(), 1);
        assert_eq!(store.num_sources(), 1);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = DocumentStore::new();
        assert!(matches!(
            store.get("nope"),
            Err(Error::NotFound { kind: "chunk", .. })
        ));
    }

    #[test]
    fn put_overwrites_existing_id() {
        let mut store = DocumentStore::new();
        store.put_batch([chunk("a.md", 0, "old")]);
        store.put_batch([chunk("a.md", 0, "new")]);

        assert_eq!(store.len(), 1);
        let id = ChunkId::new("a.md", 0).into_string();
        assert_eq!(store.get(&id).unwrap().text, "new");
    }

    #[test]
    fn get_many_preserves_order() {
        let mut store = DocumentStore::new();
        let a = chunk("a.md", 0, "alpha");
        let b = chunk("b.md", 0, "beta");
        let c = chunk("c.md", 0, "gamma");
        store.put_batch([a.clone(), b.clone(), c.clone()]);

        let got = store.get_many(&[&c.id, &a.id, &b.id]).unwrap();
        let texts: Vec<_> = got.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["gamma", "alpha", "beta"]);
    }

    #[test]
    fn get_many_fails_on_missing() {
        let mut store = DocumentStore::new();
        let a = chunk("a.md", 0, "alpha");
        store.put_batch([a.clone()]);
        let err = store.get_many(&[a.id.as_str(), "missing"]).unwrap_err();
        assert!(matches!(err, Error::NotFound { name, .. } if name == "missing"));
    }

    #[test]
    fn delete_by_source_only_touches_that_source() {
        let mut store = DocumentStore::new();
        store.put_batch([
            chunk("a.md", 0, "a0"),
            chunk("a.md", 10, "a1"),
            chunk("b.md", 0, "b0"),
        ]);

        let mut expected = vec![
            ChunkId::new("a.md", 0).into_string(),
            ChunkId::new("a.md", 10).into_string(),
        ];
        expected.sort();

        let removed = store.delete_by_source("a.md");
        assert_eq!(removed, expected);
        assert_eq!(store.len(), 1);
        assert_eq!(store.sources().collect::<Vec<_>>(), vec!["b.md"]);
        assert!(store.delete_by_source("a.md").is_empty());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("docstore.json");

        let mut store = DocumentStore::new();
        store.put_batch([chunk("a.md", 0, "alpha"), chunk("b.md", 5, "beta")]);
        store.save(&path, 7).unwrap();

        let loaded = DocumentStore::load(&path).unwrap();
        assert_eq!(loaded.generation(), 7);
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.ids().collect::<Vec<_>>(),
            store.ids().collect::<Vec<_>>()
        );
        assert_eq!(loaded.chunks_for_source("b.md")[0].text, "beta");
    }

    #[test]
    fn save_is_byte_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("one.json");
        let second = tmp.path().join("two.json");

        let mut store = DocumentStore::new();
        store.put_batch([chunk("b.md", 0, "beta"), chunk("a.md", 0, "alpha")]);
        store.save(&first, 1).unwrap();

        let mut reloaded = DocumentStore::load(&first).unwrap();
        reloaded.save(&second, 1).unwrap();

        assert_eq!(
            std::fs::read(&first).unwrap(),
            std::fs::read(&second).unwrap()
        );
    }

    #[test]
    fn load_rejects_unknown_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("docstore.json");
        std::fs::write(
            &path,
            r#"{"schema_version": 99, "generation": 1, "chunks": {}}"#,
        )
        .unwrap();
        assert!(matches!(
            DocumentStore::load(&path),
            Err(Error::IncompatibleIndex(_))
        ));
    }
}
