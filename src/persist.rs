//! Crash-safe file replacement shared by every persisted artifact.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use crate::error::Result;

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn temp_path(path: &Path) -> PathBuf {
    sibling(path, ".tmp")
}

/// Where the next generation of `path` is written before it is committed.
pub fn staged_path(path: &Path) -> PathBuf {
    sibling(path, ".staged")
}

/// Atomically replace `path` with `bytes`.
///
/// The data is written to a sibling temp file, flushed to disk, then renamed
/// over the target. A crash at any point leaves either the old file or the
/// new one, never a partial write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    let result = (|| -> Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result?;

    sync_parent(path);
    Ok(())
}

/// Move a staged file over its live counterpart.
pub fn promote(path: &Path) -> Result<()> {
    fs::rename(staged_path(path), path)?;
    sync_parent(path);
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    // Persist the rename itself. Failure here is not fatal: the data is
    // already durable and the rename is visible to this process.
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
