use std::path::Path;

use crate::error::{Error, Result};

/// Turns a document file into raw text. The chunker never sees bytes.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, path: &Path) -> Result<String>;
}

/// Extensions [`PlainTextExtractor`] accepts.
pub const PLAIN_TEXT_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// Reads Markdown and plain-text files.
///
/// Invalid UTF-8 sequences are replaced rather than rejected, so a stray
/// Latin-1 byte does not keep a document out of the index.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_text(&self, path: &Path) -> Result<String> {
        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                PLAIN_TEXT_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            });
        if !supported {
            return Err(Error::UnsupportedFormat(path.to_path_buf()));
        }

        let bytes = std::fs::read(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }
}
