use std::path::Path;

use anyhow::{bail, Result};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::project::resolve_source_file;

/// Delete one document's cache file so it is retranslated from scratch.
pub async fn run_cache_clear(config: &Config, file: &Path) -> Result<()> {
    let rel = cache_key(config, file);
    let store = CacheStore::new(config.cache_root());
    let existed = store.file_path(&rel).exists();
    if !store.clear_file_cache(&rel).await? {
        bail!("Cache for {} is locked by another process", rel);
    }
    println!("cache clear {}", rel);
    println!("  removed: {}", existed);
    println!("ok");
    Ok(())
}

/// Delete one cached chunk (by hash prefix) from a document's cache.
pub async fn run_cache_remove(config: &Config, file: &Path, chunk_id: &str) -> Result<()> {
    let rel = cache_key(config, file);
    let store = CacheStore::new(config.cache_root());
    let Some((hash, _)) = store.find_entry(&rel, chunk_id) else {
        bail!("No cached chunk in {} matches '{}'", rel, chunk_id);
    };
    if !store.remove_entry(&rel, &hash).await? {
        bail!("Cache for {} is locked by another process", rel);
    }
    println!("cache remove {}", rel);
    println!("  chunk: {}", hash);
    println!("ok");
    Ok(())
}

/// The cache key of a file argument. Falls back to the argument itself so
/// caches of deleted source files can still be cleaned up.
fn cache_key(config: &Config, file: &Path) -> String {
    match resolve_source_file(config, file) {
        Ok(source) => source.rel_path,
        Err(_) => file.to_string_lossy().replace('\\', "/"),
    }
}
