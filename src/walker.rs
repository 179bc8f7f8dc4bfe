use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

/// A discovered document file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the documents root, `/`-separated. This is the
    /// `source_path` recorded on every chunk.
    pub source_path: String,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Last modification time as seconds since the Unix epoch.
    pub mtime: u64,
}

/// Compile include patterns into a matcher.
pub fn build_matcher(include: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in include {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::InvalidConfig(format!("invalid include pattern {pattern:?}: {e}"))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::InvalidConfig(format!("invalid include set: {e}")))
}

/// Recursively walk a directory and discover document files.
///
/// Skips hidden files/directories (names starting with `.`) and returns
/// only files whose relative path matches one of the `include` globs,
/// sorted by relative path.
pub fn discover_files(
    root: &Path,
    include: &[String],
) -> Result<Vec<DiscoveredFile>> {
    let matcher = build_matcher(include)?;
    let canonical_root = root.canonicalize().map_err(|source| Error::Read {
        path: root.to_path_buf(),
        source,
    })?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &matcher, &mut results)?;
    results.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    matcher: &GlobSet,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, matcher, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            // Directory links are not followed, which also rules out cycles.
            if resolved.is_file()
                && let Some(df) = make_discovered(root, &path, &resolved, matcher)?
            {
                results.push(df);
            }
        } else if file_type.is_file() {
            let abs = path.canonicalize()?;
            if let Some(df) = make_discovered(root, &path, &abs, matcher)? {
                results.push(df);
            }
        }
    }

    Ok(())
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
    matcher: &GlobSet,
) -> Result<Option<DiscoveredFile>> {
    let relative = original_path.strip_prefix(root).unwrap_or(original_path);
    if !matcher.is_match(relative) {
        return Ok(None);
    }

    let source_path = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    let mtime = std::fs::metadata(absolute_path)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    Ok(Some(DiscoveredFile {
        source_path,
        absolute_path: absolute_path.to_path_buf(),
        mtime,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn default_include() -> Vec<String> {
        DatabaseConfig::default().include
    }

    fn names(files: &[DiscoveredFile]) -> Vec<&str> {
        files.iter().map(|f| f.source_path.as_str()).collect()
    }

    #[test]
    fn discovers_md_and_txt() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("basel.md"), "# Basel III").unwrap();
        std::fs::write(tmp.path().join("mifid.txt"), "MiFID II").unwrap();
        std::fs::write(tmp.path().join("scan.png"), "binary").unwrap();

        let files = discover_files(tmp.path(), &default_include()).unwrap();
        assert_eq!(names(&files), vec!["basel.md", "mifid.txt"]);
    }

    #[test]
    fn skips_hidden_files_and_directories() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(".draft.md"), "secret").unwrap();
        let hidden = tmp.path().join(".git");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("notes.md"), "git").unwrap();
        std::fs::write(tmp.path().join("visible.md"), "hello").unwrap();

        let files = discover_files(tmp.path(), &default_include()).unwrap();
        assert_eq!(names(&files), vec!["visible.md"]);
    }

    #[test]
    fn recurses_with_slash_separated_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("eu").join("crr");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("article-92.md"), "own funds").unwrap();
        std::fs::write(tmp.path().join("top.md"), "top").unwrap();

        let files = discover_files(tmp.path(), &default_include()).unwrap();
        assert_eq!(names(&files), vec!["eu/crr/article-92.md", "top.md"]);
        assert!(files[0].absolute_path.is_absolute());
        assert!(files[0].mtime > 0);
    }

    #[test]
    fn custom_include_patterns() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("rules")).unwrap();
        std::fs::write(tmp.path().join("rules/a.md"), "a").unwrap();
        std::fs::write(tmp.path().join("b.md"), "b").unwrap();

        let files =
            discover_files(tmp.path(), &["rules/*.md".to_string()]).unwrap();
        assert_eq!(names(&files), vec!["rules/a.md"]);
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = discover_files(tmp.path(), &["a[".to_string()]).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn missing_root_is_read_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err =
            discover_files(&tmp.path().join("nope"), &default_include())
                .unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let files = discover_files(tmp.path(), &default_include()).unwrap();
        assert!(files.is_empty());
    }
}
