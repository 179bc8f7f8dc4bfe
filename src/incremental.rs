use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use tracing::warn;

use crate::{
    config::DatabaseConfig,
    error::{Error, Result},
    metadata::MetadataRecord,
    walker::DiscoveredFile,
};

/// Content hash of a document (blake3, hex).
///
/// # Examples
///
/// ```
/// use finrag::incremental::fingerprint;
///
/// assert_eq!(fingerprint(b"MiFID II"), fingerprint(b"MiFID II"));
/// assert_ne!(fingerprint(b"MiFID II"), fingerprint(b"MiFID III"));
/// assert_eq!(fingerprint(b"").len(), 64);
/// ```
pub fn fingerprint(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Fingerprints of the documents currently on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusSnapshot {
    /// Content hash per source path.
    pub fingerprints: BTreeMap<String, String>,
    /// Paths that were discovered but could not be read. They are neither
    /// added nor removed by the next pass.
    pub unreadable: BTreeSet<String>,
}

impl CorpusSnapshot {
    /// Hash every discovered file, in parallel.
    pub fn capture(files: &[DiscoveredFile]) -> Self {
        let hashed: Vec<(String, Result<String>)> = files
            .par_iter()
            .map(|file| {
                let hash = std::fs::read(&file.absolute_path)
                    .map(|bytes| fingerprint(&bytes))
                    .map_err(|source| Error::Read {
                        path: file.absolute_path.clone(),
                        source,
                    });
                (file.source_path.clone(), hash)
            })
            .collect();

        let mut snapshot = Self::default();
        for (source_path, hash) in hashed {
            match hash {
                Ok(hash) => {
                    snapshot.fingerprints.insert(source_path, hash);
                }
                Err(e) => {
                    warn!(%source_path, error = %e, "skipping unreadable document");
                    snapshot.unreadable.insert(source_path);
                }
            }
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

/// Why a pass has to start from empty stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    Forced,
    /// No committed metadata (first build, cleared, or corrupt).
    MissingMetadata,
    /// Stored vectors were produced under different settings.
    Incompatible(String),
}

impl std::fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forced => f.write_str("forced"),
            Self::MissingMetadata => f.write_str("no committed metadata"),
            Self::Incompatible(reason) => write!(f, "incompatible: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdatePlan {
    NoOp,
    Incremental {
        changed: BTreeSet<String>,
        removed: BTreeSet<String>,
        added: BTreeSet<String>,
    },
    FullRebuild(RebuildReason),
}

impl UpdatePlan {
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

/// Decide how to bring the stored index in line with the documents on disk.
pub fn plan(
    on_disk: &CorpusSnapshot,
    stored: Option<&MetadataRecord>,
    config: &DatabaseConfig,
    force: bool,
) -> UpdatePlan {
    if force {
        return UpdatePlan::FullRebuild(RebuildReason::Forced);
    }
    let Some(stored) = stored else {
        return UpdatePlan::FullRebuild(RebuildReason::MissingMetadata);
    };
    if let Some(reason) = stored.incompatibility(config) {
        return UpdatePlan::FullRebuild(RebuildReason::Incompatible(reason));
    }

    let mut changed = BTreeSet::new();
    let mut added = BTreeSet::new();
    for (path, hash) in &on_disk.fingerprints {
        match stored.document_fingerprints.get(path) {
            None => {
                added.insert(path.clone());
            }
            Some(stored_hash) if stored_hash != hash => {
                changed.insert(path.clone());
            }
            Some(_) => {}
        }
    }

    let removed: BTreeSet<String> = stored
        .document_fingerprints
        .keys()
        .filter(|path| {
            !on_disk.fingerprints.contains_key(*path)
                && !on_disk.unreadable.contains(*path)
        })
        .cloned()
        .collect();

    if changed.is_empty() && removed.is_empty() && added.is_empty() {
        UpdatePlan::NoOp
    } else {
        UpdatePlan::Incremental {
            changed,
            removed,
            added,
        }
    }
}
