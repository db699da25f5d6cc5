//! Core data models that flow through the translation pipeline.

use std::path::PathBuf;

use crate::lines::{normalize_newlines, LineEnding};

/// A source markdown file, read once per translation pass.
///
/// `text` is LF-normalized; `ending` remembers what the file used so the
/// translated output can be written back the same way.
#[derive(Debug, Clone)]
pub struct Document {
    /// Path relative to the source root, with `/` separators.
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub text: String,
    pub ending: LineEnding,
}

impl Document {
    pub fn from_source(rel_path: impl Into<String>, abs_path: PathBuf, raw: &str) -> Self {
        Self {
            rel_path: rel_path.into(),
            abs_path,
            text: normalize_newlines(raw),
            ending: LineEnding::detect(raw),
        }
    }
}

/// One translation unit: a paragraph-aligned slice of a document body with
/// code blocks replaced by placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded. Doubles as the cache key.
    pub hash: String,
}

/// Which text a chunk is translated as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    /// Markdown prose with the full structural repair chain.
    Prose,
    /// Newline-joined YAML values from a front-matter-only document.
    ValuesOnly,
}
