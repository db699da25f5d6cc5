//! Project layout: source documents, target languages and target paths.
//!
//! Source files are found by walking `project.source_dir` and filtering
//! relative paths through the include and exclude globs. Target languages
//! come from `project.languages`, or when that is empty from the
//! subdirectories of `project.target_dir` (skipping hidden directories and
//! the source directory itself when it lives inside the target directory).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::Document;

/// A markdown file under the source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Relative path with `/` separators.
    pub rel_path: String,
    pub abs_path: PathBuf,
}

impl SourceFile {
    pub fn read(&self) -> Result<Document> {
        let raw = std::fs::read_to_string(&self.abs_path)
            .with_context(|| format!("Failed to read {}", self.abs_path.display()))?;
        Ok(Document::from_source(
            self.rel_path.clone(),
            self.abs_path.clone(),
            &raw,
        ))
    }
}

/// All source documents, sorted by relative path.
pub fn scan_sources(config: &Config) -> Result<Vec<SourceFile>> {
    let root = config.source_root();
    if !root.is_dir() {
        bail!("Source directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.project.include_globs)?;
    let mut default_excludes = vec!["**/.git/**".to_string(), "**/node_modules/**".to_string()];
    default_excludes.extend(config.project.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(&root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel_str = rel_string(path.strip_prefix(&root).unwrap_or(path));

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push(SourceFile {
            rel_path: rel_str,
            abs_path: path.to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

/// Resolve a file argument from the command line to a source file.
///
/// Accepts a path relative to the source root, or a path (relative to the
/// working directory or absolute) that lies inside the source root.
pub fn resolve_source_file(config: &Config, arg: &Path) -> Result<SourceFile> {
    let root = config.source_root();
    let candidates = [root.join(arg), arg.to_path_buf()];
    for candidate in candidates {
        if !candidate.is_file() {
            continue;
        }
        let abs = candidate.canonicalize()?;
        let root_abs = root
            .canonicalize()
            .with_context(|| format!("Source directory does not exist: {}", root.display()))?;
        if let Ok(rel) = abs.strip_prefix(&root_abs) {
            return Ok(SourceFile {
                rel_path: rel_string(rel),
                abs_path: candidate,
            });
        }
    }
    bail!(
        "{} is not a file under the source directory {}",
        arg.display(),
        root.display()
    )
}

/// Target languages, optionally narrowed by `filter`.
///
/// # Errors
///
/// Fails when no language can be resolved, or when `filter` names a
/// language that is not configured.
pub fn resolve_languages(config: &Config, filter: &[String]) -> Result<Vec<String>> {
    let mut languages = if config.project.languages.is_empty() {
        discover_languages(config)?
    } else {
        config.project.languages.clone()
    };
    languages.sort();
    languages.dedup();

    if !filter.is_empty() {
        for lang in filter {
            if !languages.contains(lang) {
                bail!("Unknown language '{}' (available: {})", lang, languages.join(", "));
            }
        }
        languages.retain(|l| filter.contains(l));
    }

    if languages.is_empty() {
        bail!(
            "No target languages: set project.languages or create language directories under {}",
            config.target_root().display()
        );
    }
    Ok(languages)
}

fn discover_languages(config: &Config) -> Result<Vec<String>> {
    let target = config.target_root();
    if !target.is_dir() {
        return Ok(Vec::new());
    }
    let source = config.source_root().canonicalize().ok();
    let cache = config.cache_root().canonicalize().ok();

    let mut found = Vec::new();
    for entry in std::fs::read_dir(&target)
        .with_context(|| format!("Failed to list {}", target.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path().canonicalize().ok();
        if path.is_some() && (path == source || path == cache) {
            continue;
        }
        found.push(name);
    }
    Ok(found)
}

/// Where the translation of `rel_path` into `language` is written.
pub fn target_path(config: &Config, language: &str, rel_path: &str) -> PathBuf {
    config.target_root().join(language).join(rel_path)
}

fn rel_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> (TempDir, Config) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("docs/en/guide")).unwrap();
        std::fs::create_dir_all(root.join("docs/de")).unwrap();
        std::fs::create_dir_all(root.join("docs/fr")).unwrap();
        std::fs::create_dir_all(root.join("docs/.hidden")).unwrap();
        std::fs::write(root.join("docs/en/index.md"), "# Home\n").unwrap();
        std::fs::write(root.join("docs/en/guide/start.md"), "Start\n").unwrap();
        std::fs::write(root.join("docs/en/guide/notes.txt"), "skip\n").unwrap();
        std::fs::write(root.join("docs/en/guide/draft.md"), "draft\n").unwrap();
        let mut config = Config::with_root(root);
        config.project.exclude_globs = vec!["**/draft.md".to_string()];
        (tmp, config)
    }

    #[test]
    fn scans_markdown_sorted() {
        let (_tmp, config) = project();
        let files = scan_sources(&config).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["guide/start.md", "index.md"]);
    }

    #[test]
    fn discovers_languages_without_source_dir() {
        let (_tmp, config) = project();
        assert_eq!(resolve_languages(&config, &[]).unwrap(), vec!["de", "fr"]);
        assert_eq!(
            resolve_languages(&config, &["fr".to_string()]).unwrap(),
            vec!["fr"]
        );
        assert!(resolve_languages(&config, &["ja".to_string()]).is_err());
    }

    #[test]
    fn explicit_languages_win() {
        let (_tmp, mut config) = project();
        config.project.languages = vec!["ja".to_string()];
        assert_eq!(resolve_languages(&config, &[]).unwrap(), vec!["ja"]);
    }

    #[test]
    fn missing_source_dir_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_root(tmp.path());
        assert!(scan_sources(&config).is_err());
        assert!(resolve_languages(&config, &[]).is_err());
    }

    #[test]
    fn resolves_file_arguments() {
        let (tmp, config) = project();
        let rel = resolve_source_file(&config, Path::new("guide/start.md")).unwrap();
        assert_eq!(rel.rel_path, "guide/start.md");
        let abs = tmp.path().join("docs/en/index.md");
        assert_eq!(resolve_source_file(&config, &abs).unwrap().rel_path, "index.md");
        assert!(resolve_source_file(&config, Path::new("missing.md")).is_err());
        assert_eq!(
            target_path(&config, "de", "guide/start.md"),
            tmp.path().join("docs/de/guide/start.md")
        );
    }
}
