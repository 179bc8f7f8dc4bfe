use std::{
    collections::BTreeMap,
    path::Path,
    time::SystemTime,
};

use serde::{Deserialize, Serialize};

use crate::{
    config::{DatabaseConfig, IndexKind},
    error::{Error, Result},
    persist,
};

pub const METADATA_SCHEMA_VERSION: u32 = 1;

/// The commit record of a database instance.
///
/// Written last in every build/update pass, so its presence marks the pass
/// as committed. `version` is the commit generation; the index and document
/// store files carry the same number when they belong to this commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub schema_version: u32,
    pub version: u64,
    pub dimension: usize,
    pub index_kind: IndexKind,
    pub normalize: bool,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Seconds since the Unix epoch.
    pub built_at: u64,
    /// Content hash per source path.
    pub document_fingerprints: BTreeMap<String, String>,
}

impl MetadataRecord {
    pub fn new(
        config: &DatabaseConfig,
        version: u64,
        document_fingerprints: BTreeMap<String, String>,
    ) -> Self {
        Self {
            schema_version: METADATA_SCHEMA_VERSION,
            version,
            dimension: config.dimension,
            index_kind: config.index_kind,
            normalize: config.normalize,
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            built_at: now_epoch_secs(),
            document_fingerprints,
        }
    }

    pub fn num_documents(&self) -> usize {
        self.document_fingerprints.len()
    }

    /// Describe the first setting that makes the stored vectors unusable
    /// under `config`, or `None` if an incremental update is sound.
    pub fn incompatibility(&self, config: &DatabaseConfig) -> Option<String> {
        if self.dimension != config.dimension {
            return Some(format!(
                "dimension changed from {} to {}",
                self.dimension, config.dimension
            ));
        }
        if self.index_kind != config.index_kind {
            return Some(format!(
                "index kind changed from {} to {}",
                self.index_kind, config.index_kind
            ));
        }
        if self.normalize != config.normalize {
            return Some(format!(
                "normalize changed from {} to {}",
                self.normalize, config.normalize
            ));
        }
        if self.chunk_size != config.chunk_size
            || self.chunk_overlap != config.chunk_overlap
        {
            return Some(format!(
                "chunking changed from {}/{} to {}/{}",
                self.chunk_size,
                self.chunk_overlap,
                config.chunk_size,
                config.chunk_overlap
            ));
        }
        None
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let record: Self = serde_json::from_slice(&bytes)?;
        if record.schema_version != METADATA_SCHEMA_VERSION {
            return Err(Error::IncompatibleIndex(format!(
                "unsupported metadata schema_version {} (expected {METADATA_SCHEMA_VERSION})",
                record.schema_version
            )));
        }
        Ok(record)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        persist::write_atomic(path, &bytes)
    }
}

pub(crate) fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MetadataRecord {
        let fingerprints = BTreeMap::from([
            ("a.md".to_string(), "aaaa".to_string()),
            ("b.txt".to_string(), "bbbb".to_string()),
        ]);
        MetadataRecord::new(&DatabaseConfig::default(), 4, fingerprints)
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metadata.json");
        let rec = record();
        rec.save(&path).unwrap();

        let loaded = MetadataRecord::load(&path).unwrap();
        assert_eq!(loaded, rec);
        assert_eq!(loaded.num_documents(), 2);
        assert!(loaded.built_at > 0);
    }

    #[test]
    fn compatible_with_same_config() {
        assert_eq!(record().incompatibility(&DatabaseConfig::default()), None);
    }

    #[test]
    fn dimension_change_is_incompatible() {
        let config = DatabaseConfig {
            dimension: 384,
            ..DatabaseConfig::default()
        };
        let reason = record().incompatibility(&config).unwrap();
        assert!(reason.contains("dimension"));
    }

    #[test]
    fn chunking_change_is_incompatible() {
        let config = DatabaseConfig {
            chunk_overlap: 100,
            ..DatabaseConfig::default()
        };
        let reason = record().incompatibility(&config).unwrap();
        assert!(reason.contains("chunking"));
    }

    #[test]
    fn kind_and_normalize_changes_are_incompatible() {
        let kind = DatabaseConfig {
            index_kind: IndexKind::FlatL2,
            ..DatabaseConfig::default()
        };
        assert!(record().incompatibility(&kind).is_some());

        let normalize = DatabaseConfig {
            normalize: false,
            ..DatabaseConfig::default()
        };
        assert!(record().incompatibility(&normalize).is_some());
    }

    #[test]
    fn wrong_schema_version_is_incompatible() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("metadata.json");
        let mut rec = record();
        rec.schema_version = 99;
        rec.save(&path).unwrap();

        assert!(matches!(
            MetadataRecord::load(&path),
            Err(Error::IncompatibleIndex(_))
        ));
    }
}
