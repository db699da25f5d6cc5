//! Per-document translation cache.
//!
//! Each source document has one human-readable JSON file at
//! `<cache_dir>/<relative path>.json`, mapping chunk hashes to a
//! [`CacheEntry`] that holds the original chunk text and its translation per
//! language. Deleting a file forces the document to be retranslated.
//!
//! Reads are lock-free: writers replace the file with an atomic rename, so a
//! reader sees either the old or the new content. Every write is a
//! read-modify-write cycle under an advisory lock directory
//! (`<file>.json.lock/`, holding the owner's pid). A lock older than
//! [`STALE_LOCK_AGE`] or owned by a process that no longer exists is broken.
//! When the lock cannot be taken within the timeout the write is skipped and
//! the caller carries on as if the cache had missed.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const STALE_LOCK_AGE: Duration = Duration::from_secs(60);
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_POLL: Duration = Duration::from_millis(50);

/// What kind of chunk an entry was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Markdown prose checked with the full validator.
    #[default]
    Prose,
    /// Code placeholder or comment-only chunk, stored unchanged.
    CodeOrComment,
    /// YAML values; cache hits only need matching line counts.
    ValuesOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub original: String,
    #[serde(default)]
    pub translations: BTreeMap<String, String>,
    #[serde(default)]
    pub kind: EntryKind,
    /// Model that produced the most recent translation.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheFile {
    #[serde(default)]
    pub entries: BTreeMap<String, CacheEntry>,
}

/// A translation to store.
#[derive(Debug, Clone)]
pub struct NewTranslation<'a> {
    pub hash: &'a str,
    pub original: &'a str,
    pub language: &'a str,
    pub translation: &'a str,
    pub kind: EntryKind,
    pub model: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    lock_timeout: Duration,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_timeout: LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_path(&self, rel_path: &str) -> PathBuf {
        self.root.join(format!("{}.json", rel_path))
    }

    fn lock_path(&self, rel_path: &str) -> PathBuf {
        self.root.join(format!("{}.json.lock", rel_path))
    }

    /// Load a document's cache. Missing or unreadable files yield an empty
    /// cache; a corrupt file is reported and treated as empty.
    pub fn load(&self, rel_path: &str) -> CacheFile {
        let path = self.file_path(rel_path);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return CacheFile::default(),
        };
        match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("ignoring corrupt cache file {}: {}", path.display(), e);
                CacheFile::default()
            }
        }
    }

    pub fn get_cached_entry(&self, rel_path: &str, hash: &str) -> Option<CacheEntry> {
        self.load(rel_path).entries.remove(hash)
    }

    pub fn get_cached_translation(
        &self,
        rel_path: &str,
        hash: &str,
        language: &str,
    ) -> Option<String> {
        self.get_cached_entry(rel_path, hash)
            .and_then(|mut e| e.translations.remove(language))
    }

    /// Find an entry by full hash or unambiguous hash prefix.
    pub fn find_entry(&self, rel_path: &str, id: &str) -> Option<(String, CacheEntry)> {
        let mut matches = self
            .load(rel_path)
            .entries
            .into_iter()
            .filter(|(hash, _)| hash.starts_with(id));
        match (matches.next(), matches.next()) {
            (Some(found), None) => Some(found),
            _ => None,
        }
    }

    /// Store one translation, keeping other languages of the same entry.
    ///
    /// Returns `Ok(false)` when the lock could not be taken and nothing was
    /// written.
    pub async fn save(&self, rel_path: &str, new: NewTranslation<'_>) -> Result<bool> {
        self.modify(rel_path, |file| {
            let entry = file
                .entries
                .entry(new.hash.to_string())
                .or_insert_with(|| CacheEntry {
                    original: new.original.to_string(),
                    translations: BTreeMap::new(),
                    kind: new.kind,
                    model: None,
                    updated_at: None,
                });
            entry.original = new.original.to_string();
            entry.kind = new.kind;
            entry
                .translations
                .insert(new.language.to_string(), new.translation.to_string());
            if let Some(model) = new.model {
                entry.model = Some(model.to_string());
            }
            entry.updated_at = Some(Utc::now());
        })
        .await
    }

    pub async fn remove_entry(&self, rel_path: &str, hash: &str) -> Result<bool> {
        self.modify(rel_path, |file| {
            file.entries.remove(hash);
        })
        .await
    }

    /// Delete a document's cache file.
    pub async fn clear_file_cache(&self, rel_path: &str) -> Result<bool> {
        let Some(_lock) = self.acquire(rel_path).await? else {
            return Ok(false);
        };
        let path = self.file_path(rel_path);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to remove cache file: {}", path.display()))
            }
        }
    }

    async fn modify(&self, rel_path: &str, apply: impl FnOnce(&mut CacheFile)) -> Result<bool> {
        let Some(_lock) = self.acquire(rel_path).await? else {
            return Ok(false);
        };
        let mut file = self.load(rel_path);
        apply(&mut file);
        self.write_atomic(rel_path, &file)?;
        Ok(true)
    }

    fn write_atomic(&self, rel_path: &str, file: &CacheFile) -> Result<()> {
        let path = self.file_path(rel_path);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache dir: {}", dir.display()))?;

        let json = serde_json::to_string_pretty(file).context("serialize cache file")?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.persist(&path)
            .with_context(|| format!("Failed to write cache file: {}", path.display()))?;
        Ok(())
    }

    /// Take the document's lock directory, breaking stale locks. Returns
    /// `None` on timeout.
    async fn acquire(&self, rel_path: &str) -> Result<Option<LockGuard>> {
        let lock = self.lock_path(rel_path);
        if let Some(parent) = lock.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache dir: {}", parent.display()))?;
        }

        let started = Instant::now();
        loop {
            match std::fs::create_dir(&lock) {
                Ok(()) => {
                    let owner = owner_token();
                    if let Err(e) = std::fs::write(lock.join("pid"), &owner) {
                        tracing::warn!(
                            "could not write cache lock owner {}: {}",
                            lock.display(),
                            e
                        );
                    }
                    return Ok(Some(LockGuard { path: lock, owner }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let seen = read_owner(&lock);
                    if is_stale(&lock, seen.as_deref()) {
                        break_stale_lock(&lock, seen.as_deref());
                        continue;
                    }
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to create lock: {}", lock.display()))
                }
            }

            if started.elapsed() >= self.lock_timeout {
                tracing::warn!(
                    "timed out waiting for cache lock {}, skipping",
                    lock.display()
                );
                return Ok(None);
            }
            tokio::time::sleep(LOCK_POLL).await;
        }
    }
}

/// Removes the lock directory when dropped, on success and error paths alike,
/// as long as it still carries this guard's owner token.
struct LockGuard {
    path: PathBuf,
    owner: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if read_owner(&self.path).as_deref() == Some(self.owner.as_str()) {
            let _ = std::fs::remove_dir_all(&self.path);
        } else {
            tracing::warn!(
                "cache lock {} changed owner, leaving it in place",
                self.path.display()
            );
        }
    }
}

/// `<pid>-<n>`: unique per guard, since tasks in one process share a pid.
fn owner_token() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    )
}

fn read_owner(lock: &Path) -> Option<String> {
    std::fs::read_to_string(lock.join("pid"))
        .ok()
        .map(|s| s.trim().to_string())
}

fn owner_pid(owner: &str) -> Option<u32> {
    owner.split('-').next().and_then(|p| p.parse().ok())
}

fn is_stale(lock: &Path, owner: Option<&str>) -> bool {
    let age = std::fs::metadata(lock)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok());
    if age.is_some_and(|a| a > STALE_LOCK_AGE) {
        return true;
    }
    match owner.and_then(owner_pid) {
        Some(pid) => !process_alive(pid),
        None => false,
    }
}

/// Move the lock aside under a name of our own, then delete it. Only one
/// contender's rename succeeds; the others see `NotFound` and retry. If the
/// directory we moved is no longer the one judged stale, put it back.
fn break_stale_lock(lock: &Path, seen: Option<&str>) {
    let mut name = lock.as_os_str().to_os_string();
    name.push(format!(".stale-{}", owner_token()));
    let tombstone = PathBuf::from(name);

    if std::fs::rename(lock, &tombstone).is_err() {
        return;
    }
    if read_owner(&tombstone).as_deref() != seen {
        if let Err(e) = std::fs::rename(&tombstone, lock) {
            tracing::warn!(
                "could not restore cache lock {}: {}",
                lock.display(),
                e
            );
        }
        return;
    }
    tracing::warn!("breaking stale cache lock {}", lock.display());
    let _ = std::fs::remove_dir_all(&tombstone);
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry<'a>(hash: &'a str, lang: &'a str, text: &'a str) -> NewTranslation<'a> {
        NewTranslation {
            hash,
            original: "Hello",
            language: lang,
            translation: text,
            kind: EntryKind::Prose,
            model: Some("m1"),
        }
    }

    #[tokio::test]
    async fn save_then_get() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        assert!(store.get_cached_translation("a/b.md", "h1", "de").is_none());

        assert!(store.save("a/b.md", entry("h1", "de", "Hallo")).await.unwrap());
        assert_eq!(
            store.get_cached_translation("a/b.md", "h1", "de").as_deref(),
            Some("Hallo")
        );
        assert!(tmp.path().join("a/b.md.json").exists());
        assert!(!tmp.path().join("a/b.md.json.lock").exists());
    }

    #[tokio::test]
    async fn languages_accumulate() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        store.save("x.md", entry("h", "de", "Hallo")).await.unwrap();
        store.save("x.md", entry("h", "fr", "Bonjour")).await.unwrap();

        let e = store.get_cached_entry("x.md", "h").unwrap();
        assert_eq!(e.translations.len(), 2);
        assert_eq!(e.model.as_deref(), Some("m1"));
        assert_eq!(e.kind, EntryKind::Prose);
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        store.save("x.md", entry("h1", "de", "a")).await.unwrap();
        store.save("x.md", entry("h2", "de", "b")).await.unwrap();

        store.remove_entry("x.md", "h1").await.unwrap();
        assert!(store.get_cached_entry("x.md", "h1").is_none());
        assert!(store.get_cached_entry("x.md", "h2").is_some());

        store.clear_file_cache("x.md").await.unwrap();
        assert!(!store.file_path("x.md").exists());
        assert!(store.clear_file_cache("x.md").await.unwrap());
    }

    #[tokio::test]
    async fn find_by_prefix() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        store.save("x.md", entry("abc123", "de", "a")).await.unwrap();
        store.save("x.md", entry("abd456", "de", "b")).await.unwrap();

        assert_eq!(store.find_entry("x.md", "abc").unwrap().0, "abc123");
        assert!(store.find_entry("x.md", "ab").is_none());
        assert!(store.find_entry("x.md", "zz").is_none());
    }

    #[tokio::test]
    async fn held_lock_times_out() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path()).with_lock_timeout(Duration::from_millis(120));
        let lock = tmp.path().join("x.md.json.lock");
        std::fs::create_dir_all(&lock).unwrap();
        std::fs::write(lock.join("pid"), std::process::id().to_string()).unwrap();

        let saved = store.save("x.md", entry("h", "de", "a")).await.unwrap();
        assert!(!saved);
        assert!(store.get_cached_entry("x.md", "h").is_none());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dead_owner_lock_is_broken() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path()).with_lock_timeout(Duration::from_millis(500));
        let lock = tmp.path().join("x.md.json.lock");
        std::fs::create_dir_all(&lock).unwrap();
        std::fs::write(lock.join("pid"), u32::MAX.to_string()).unwrap();

        assert!(store.save("x.md", entry("h", "de", "a")).await.unwrap());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_saves_break_stale_lock_once() {
        for round in 0..20 {
            let tmp = TempDir::new().unwrap();
            let store = CacheStore::new(tmp.path()).with_lock_timeout(Duration::from_secs(5));
            let lock = tmp.path().join("x.md.json.lock");
            std::fs::create_dir_all(&lock).unwrap();
            std::fs::write(lock.join("pid"), u32::MAX.to_string()).unwrap();

            let de = {
                let store = store.clone();
                tokio::spawn(async move { store.save("x.md", entry("h", "de", "Hallo")).await })
            };
            let fr = {
                let store = store.clone();
                tokio::spawn(async move { store.save("x.md", entry("h", "fr", "Bonjour")).await })
            };
            assert!(de.await.unwrap().unwrap(), "round {}", round);
            assert!(fr.await.unwrap().unwrap(), "round {}", round);

            let e = store.get_cached_entry("x.md", "h").unwrap();
            assert_eq!(e.translations.get("de").map(String::as_str), Some("Hallo"));
            assert_eq!(e.translations.get("fr").map(String::as_str), Some("Bonjour"));
            assert!(!lock.exists());
            let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
                .unwrap()
                .filter_map(|d| d.ok())
                .filter(|d| d.file_name().to_string_lossy().contains(".stale-"))
                .collect();
            assert!(leftovers.is_empty(), "round {}", round);
        }
    }

    #[test]
    fn guard_leaves_a_lock_it_no_longer_owns() {
        let tmp = TempDir::new().unwrap();
        let lock = tmp.path().join("x.md.json.lock");
        std::fs::create_dir_all(&lock).unwrap();
        std::fs::write(lock.join("pid"), "1-99").unwrap();

        drop(LockGuard {
            path: lock.clone(),
            owner: owner_token(),
        });
        assert!(lock.exists());

        let owner = owner_token();
        std::fs::write(lock.join("pid"), &owner).unwrap();
        drop(LockGuard {
            path: lock.clone(),
            owner,
        });
        assert!(!lock.exists());
    }

    #[test]
    fn owner_tokens_are_unique_and_carry_the_pid() {
        let a = owner_token();
        let b = owner_token();
        assert_ne!(a, b);
        assert_eq!(owner_pid(&a), Some(std::process::id()));
        assert_eq!(owner_pid("4242"), Some(4242));
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        std::fs::write(store.file_path("bad.md"), "{not json").unwrap();
        assert!(store.load("bad.md").entries.is_empty());
    }
}
