use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Directory holding one database instance's artifacts.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The FINRAG_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/finrag/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("FINRAG_DATA_DIR") {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("finrag")
                .get_data_home()
                .ok_or_else(|| {
                    Error::InvalidConfig(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        Self::create(root)
    }

    /// Use `root` as-is, creating it if needed.
    pub fn create(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_file(&self) -> PathBuf {
        self.root.join("index.bin")
    }

    pub fn docstore_file(&self) -> PathBuf {
        self.root.join("docstore.json")
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.root.join("metadata.json")
    }

    /// Optional user configuration; defaults apply when absent.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// The three artifacts making up a committed database, in write order.
    pub fn artifacts(&self) -> [PathBuf; 3] {
        [self.index_file(), self.docstore_file(), self.metadata_file()]
    }
}
