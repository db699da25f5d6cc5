//! Translation orchestrator.
//!
//! Drives every (document, language) pair from source text to a written
//! target file:
//!
//! ```text
//! document ─▶ placeholders + chunks ─▶ per chunk: cache ─▶ model ladder
//!          ─▶ repairs ─▶ validate ─▶ cache store ─▶ reassemble
//!          ─▶ file repairs ─▶ file validation ─▶ write (or retry / warn)
//! ```
//!
//! # Chunk states
//!
//! For each chunk the cache is consulted first (unless forced). A hit is
//! accepted only if it still matches the current source chunk. Chunks made
//! of code placeholders and comment-only lines are stored and returned
//! unchanged. Everything else walks the language's model ladder: each reply
//! is repaired, validated and gated by the lenient skeleton check, and the
//! first acceptable one is cached and returned.
//!
//! # File policy
//!
//! A reassembled file that fails structural validation (after one targeted
//! link repair), or that contains chunks which still look untranslated, is
//! redone once with the cache bypassed. If that still fails the file is
//! written anyway and reported as a warning. The next run retries it, since
//! an invalid target is never considered up to date.
//!
//! A target is left alone when it already matches the source skeleton,
//! every chunk is cached for its language and it validates.
//!
//! # Concurrency
//!
//! Files run in parallel up to `translation.parallel_files`. Inside a file
//! either its chunks (per language) or its languages run in parallel up to
//! `translation.parallel_chunks`, whichever dimension has more units. A
//! failed unit is recorded without cancelling its siblings; the cache file
//! lock is the only shared mutable state.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, EntryKind, NewTranslation};
use crate::chunk::{
    chunk_text, extract_code_blocks, make_chunk, placeholder_index, restore_code_blocks,
    split_lines_into_chunks,
};
use crate::client::{sanitize_text, ChatModel};
use crate::config::Config;
use crate::error::{ModelError, TranslationError, TranslationResult};
use crate::lines::{
    is_blank, is_comment_only, line_count, normalize_newlines, split_lines, LineEnding, Start,
};
use crate::models::{Chunk, ChunkMode, Document};
use crate::progress::{NoProgress, ProgressReporter, TranslateProgressEvent};
use crate::project::{target_path, SourceFile};
use crate::prompt::RoleTemplate;
use crate::repair::{
    normalize_url_artifacts, repair_chunk, repair_link_urls_strict, repair_values,
    restore_link_urls,
};
use crate::validate::{Reason, Validator};
use crate::yaml::{apply_values, is_front_matter_only, plan_values, slot_values, ValueSlot};

/// Result of translating one document into one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Translated,
    /// Target already matched the source and cache; nothing was written.
    UpToDate,
    /// Written, but still failing validation after the forced retry.
    Warned(String),
    /// No output: a chunk could not be translated, or IO failed.
    Failed(String),
}

impl FileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FileOutcome::Translated => "translated",
            FileOutcome::UpToDate => "up to date",
            FileOutcome::Warned(_) => "written with warnings",
            FileOutcome::Failed(_) => "failed",
        }
    }
}

/// One non-clean (document, language) result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub path: String,
    pub language: String,
    pub outcome: FileOutcome,
}

/// Counts for a translation run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub files: usize,
    pub languages: usize,
    pub translated: usize,
    pub up_to_date: usize,
    pub warned: usize,
    pub failed: usize,
    pub model_calls: u64,
    pub cache_hits: u64,
    /// Warned and failed pairs, sorted by path then language.
    pub problems: Vec<FileReport>,
}

impl RunSummary {
    pub fn record(&mut self, path: &str, language: &str, outcome: FileOutcome) {
        match &outcome {
            FileOutcome::Translated => self.translated += 1,
            FileOutcome::UpToDate => self.up_to_date += 1,
            FileOutcome::Warned(_) => self.warned += 1,
            FileOutcome::Failed(_) => self.failed += 1,
        }
        if matches!(outcome, FileOutcome::Warned(_) | FileOutcome::Failed(_)) {
            self.problems.push(FileReport {
                path: path.to_string(),
                language: language.to_string(),
                outcome,
            });
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// A (document, language) pair that `check` found out of date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleEntry {
    pub path: String,
    pub language: String,
    pub missing_target: bool,
    pub invalid_target: bool,
    pub uncached_chunks: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub files: usize,
    pub languages: usize,
    pub stale: Vec<StaleEntry>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.stale.is_empty()
    }
}

#[derive(Debug, Default)]
struct Counters {
    model_calls: AtomicU64,
    cache_hits: AtomicU64,
}

/// How a document is cut into chunks.
enum Layout {
    /// Markdown with code blocks lifted out.
    Prose { blocks: Vec<String> },
    /// Front-matter-only YAML translated value by value.
    Values { slots: Vec<ValueSlot> },
}

/// A document with its chunks, shared by all languages.
struct Prepared {
    doc: Document,
    layout: Layout,
    chunks: Vec<Chunk>,
}

impl Prepared {
    fn new(doc: Document, config: &Config) -> Self {
        let max = config.translation.chunk_bytes;
        if is_front_matter_only(&doc.text) {
            let slots = plan_values(&doc.text, &config.translation.yaml_exclude_keys);
            let chunks = split_lines_into_chunks(&slot_values(&slots), max)
                .into_iter()
                .enumerate()
                .map(|(i, text)| make_chunk(i, text))
                .collect();
            Self {
                doc,
                layout: Layout::Values { slots },
                chunks,
            }
        } else {
            let (text, blocks) = extract_code_blocks(&doc.text);
            let chunks = chunk_text(&text, max);
            Self {
                doc,
                layout: Layout::Prose { blocks },
                chunks,
            }
        }
    }

    fn mode(&self) -> ChunkMode {
        match self.layout {
            Layout::Prose { .. } => ChunkMode::Prose,
            Layout::Values { .. } => ChunkMode::ValuesOnly,
        }
    }
}

/// Reassembled output plus the (source, translation) pair of every chunk.
struct Rendered {
    text: String,
    pairs: Vec<(String, String)>,
}

/// Code placeholders and comment-only lines (and blanks) only.
pub fn is_non_translatable(text: &str) -> bool {
    split_lines(text)
        .into_iter()
        .filter(|l| !is_blank(l))
        .all(|l| placeholder_index(l).is_some() || is_comment_only(l))
}

/// The translation orchestrator. Cheap to clone; clones share the model,
/// cache and counters.
#[derive(Clone)]
pub struct Translator {
    config: Arc<Config>,
    model: Arc<dyn ChatModel>,
    cache: Arc<CacheStore>,
    validator: Validator,
    role: Arc<RoleTemplate>,
    progress: Arc<dyn ProgressReporter>,
    counters: Arc<Counters>,
}

impl Translator {
    pub fn new(config: Arc<Config>, model: Arc<dyn ChatModel>) -> Result<Self> {
        let role = RoleTemplate::load(&config)?;
        Ok(Self {
            cache: Arc::new(CacheStore::new(config.cache_root())),
            validator: Validator::from_config(&config.heuristics),
            role: Arc::new(role),
            progress: Arc::new(NoProgress),
            counters: Arc::new(Counters::default()),
            config,
            model,
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cache(mut self, cache: CacheStore) -> Self {
        self.cache = Arc::new(cache);
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Translate `files` into every language in `languages`.
    ///
    /// `force` bypasses the cache and the up-to-date check.
    pub async fn translate_all(
        &self,
        files: &[SourceFile],
        languages: &[String],
        force: bool,
    ) -> RunSummary {
        let calls_before = self.counters.model_calls.load(Ordering::SeqCst);
        let hits_before = self.counters.cache_hits.load(Ordering::SeqCst);
        let total = (files.len() * languages.len()) as u64;
        self.progress.report(TranslateProgressEvent::Planned {
            files: files.len() as u64,
            languages: languages.len() as u64,
        });

        let mut summary = RunSummary {
            files: files.len(),
            languages: languages.len(),
            ..Default::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.config.translation.parallel_files));
        let languages: Arc<[String]> = languages.into();
        let mut set = JoinSet::new();
        for file in files.iter().cloned() {
            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let languages = Arc::clone(&languages);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcomes = this.translate_file(&file, &languages, force).await;
                (file.rel_path, outcomes)
            });
        }

        let mut n = 0u64;
        while let Some(joined) = set.join_next().await {
            let (path, outcomes) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!("translation task failed: {}", e);
                    summary.failed += languages.len();
                    continue;
                }
            };
            for (language, outcome) in outcomes {
                n += 1;
                self.progress.report(TranslateProgressEvent::Finished {
                    path: path.clone(),
                    language: language.clone(),
                    status: outcome.label(),
                    n,
                    total,
                });
                summary.record(&path, &language, outcome);
            }
        }

        summary.problems.sort_by(|a, b| {
            (a.path.as_str(), a.language.as_str()).cmp(&(b.path.as_str(), b.language.as_str()))
        });
        summary.model_calls = self.counters.model_calls.load(Ordering::SeqCst) - calls_before;
        summary.cache_hits = self.counters.cache_hits.load(Ordering::SeqCst) - hits_before;
        summary
    }

    /// Translate one document into each language.
    pub async fn translate_file(
        &self,
        file: &SourceFile,
        languages: &[String],
        force: bool,
    ) -> Vec<(String, FileOutcome)> {
        let doc = match file.read() {
            Ok(doc) => doc,
            Err(e) => {
                warn!("{:#}", e);
                return languages
                    .iter()
                    .map(|l| (l.clone(), FileOutcome::Failed(format!("{:#}", e))))
                    .collect();
            }
        };
        let prepared = Arc::new(Prepared::new(doc, &self.config));
        let width = self.config.translation.parallel_chunks;

        if width > 1 && languages.len() > prepared.chunks.len() {
            let semaphore = Arc::new(Semaphore::new(width));
            let mut set = JoinSet::new();
            for (idx, language) in languages.iter().cloned().enumerate() {
                let this = self.clone();
                let prepared = Arc::clone(&prepared);
                let semaphore = Arc::clone(&semaphore);
                set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let outcome = this.translate_language(&prepared, &language, force, false, 1).await;
                    (idx, language, outcome)
                });
            }
            let mut results = Vec::with_capacity(languages.len());
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(done) => results.push(done),
                    Err(e) => warn!("language task failed: {}", e),
                }
            }
            results.sort_by_key(|(idx, _, _)| *idx);
            return results.into_iter().map(|(_, l, o)| (l, o)).collect();
        }

        let mut results = Vec::with_capacity(languages.len());
        for language in languages {
            let outcome = self
                .translate_language(&prepared, language, force, false, width)
                .await;
            results.push((language.clone(), outcome));
        }
        results
    }

    /// Produce and write one target file.
    ///
    /// `refresh` skips the up-to-date check but still reads the cache.
    async fn translate_language(
        &self,
        prepared: &Prepared,
        language: &str,
        force: bool,
        refresh: bool,
        width: usize,
    ) -> FileOutcome {
        let rel = prepared.doc.rel_path.as_str();
        let target = target_path(&self.config, language, rel);

        if !force && !refresh && self.is_up_to_date(prepared, language, &target) {
            debug!(path = rel, language, "up to date");
            return FileOutcome::UpToDate;
        }

        let mut forced = force;
        // Text and problem of a pass that assembled but failed file checks.
        let mut first_pass: Option<(String, String)> = None;
        loop {
            let rendered = match self.render(prepared, language, forced, width).await {
                Ok(r) => r,
                Err(e) => match first_pass.take() {
                    Some((text, problem)) => {
                        warn!(path = rel, language, "retry failed: {}; writing first pass", e);
                        let outcome =
                            FileOutcome::Warned(format!("{}; retry failed: {}", problem, e));
                        return self.write(prepared, language, &target, &text, outcome);
                    }
                    None => {
                        warn!(path = rel, language, "{}", e);
                        return FileOutcome::Failed(e.to_string());
                    }
                },
            };
            let (text, problem) = self.check_rendered(prepared, rendered);

            let outcome = match problem {
                None => FileOutcome::Translated,
                Some(problem) if !forced => {
                    warn!(path = rel, language, "{}; retrying without cache", problem);
                    first_pass = Some((text, problem));
                    forced = true;
                    continue;
                }
                Some(problem) => {
                    warn!(path = rel, language, "{}; writing anyway", problem);
                    FileOutcome::Warned(problem)
                }
            };
            return self.write(prepared, language, &target, &text, outcome);
        }
    }

    fn write(
        &self,
        prepared: &Prepared,
        language: &str,
        target: &Path,
        text: &str,
        outcome: FileOutcome,
    ) -> FileOutcome {
        let rel = prepared.doc.rel_path.as_str();
        if let Err(e) = write_target(target, text, prepared.doc.ending) {
            warn!(path = rel, language, "{:#}", e);
            return FileOutcome::Failed(format!("{:#}", e));
        }
        info!(path = rel, language, "wrote {}", target.display());
        outcome
    }

    async fn render(
        &self,
        prepared: &Prepared,
        language: &str,
        force: bool,
        width: usize,
    ) -> TranslationResult<Rendered> {
        let mode = prepared.mode();
        let system = match mode {
            ChunkMode::Prose => self.role.render(language),
            ChunkMode::ValuesOnly => self.role.render_values_only(language),
        };
        let translated = self
            .translate_chunks(
                &prepared.doc.rel_path,
                &prepared.chunks,
                mode,
                language,
                &system,
                force,
                width,
            )
            .await?;

        let text = match &prepared.layout {
            Layout::Prose { blocks } => {
                let joined = translated.join("\n\n");
                let cleaned = sanitize_text(&normalize_url_artifacts(&joined));
                let restored = restore_code_blocks(&cleaned, blocks);
                restore_link_urls(&prepared.doc.text, &restored)
            }
            Layout::Values { slots } => {
                let joined = translated.join("\n");
                let values: Vec<String> = split_lines(&joined)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                apply_values(&prepared.doc.text, slots, &values)
            }
        };

        let pairs = prepared
            .chunks
            .iter()
            .map(|c| c.text.clone())
            .zip(translated)
            .collect();
        Ok(Rendered { text, pairs })
    }

    /// File-level validation. Returns the (possibly repaired) text and the
    /// problem, if one remains.
    fn check_rendered(&self, prepared: &Prepared, rendered: Rendered) -> (String, Option<String>) {
        let source = &prepared.doc.text;
        let mut text = rendered.text;
        let mut result = self.validator.validate_structure(source, &text);

        if result.reason == Some(Reason::LinkUrl) {
            let repaired = repair_link_urls_strict(source, &text);
            let again = self.validator.validate_structure(source, &repaired);
            debug!(
                path = prepared.doc.rel_path.as_str(),
                "link repair: {} -> {}", result, again
            );
            text = repaired;
            result = again;
        }
        if !result.ok {
            return (text, Some(result.to_string()));
        }

        if prepared.mode() == ChunkMode::Prose {
            let untranslated = rendered
                .pairs
                .iter()
                .filter(|(s, t)| !is_non_translatable(s) && self.validator.looks_untranslated(s, t))
                .count();
            if untranslated > 0 {
                return (
                    text,
                    Some(format!("{} chunk(s) look untranslated", untranslated)),
                );
            }
        }
        (text, None)
    }

    fn is_up_to_date(&self, prepared: &Prepared, language: &str, target: &Path) -> bool {
        let Ok(raw) = std::fs::read_to_string(target) else {
            return false;
        };
        let existing = normalize_newlines(&raw);
        let source = &prepared.doc.text;

        if line_count(&existing) != line_count(source) {
            return false;
        }
        let blanks_match = split_lines(source)
            .into_iter()
            .zip(split_lines(&existing))
            .all(|(s, t)| is_blank(s) == is_blank(t));
        if !blanks_match {
            return false;
        }

        let cache = self.cache.load(&prepared.doc.rel_path);
        let all_cached = prepared.chunks.iter().all(|c| {
            cache
                .entries
                .get(&c.hash)
                .is_some_and(|e| e.translations.contains_key(language))
        });
        if !all_cached || !self.validator.validate_structure(source, &existing).ok {
            return false;
        }

        if prepared.mode() == ChunkMode::Prose {
            let (src, _) = extract_code_blocks(source);
            let (tgt, _) = extract_code_blocks(&existing);
            if self.validator.looks_untranslated(&src, &tgt) {
                return false;
            }
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    async fn translate_chunks(
        &self,
        rel: &str,
        chunks: &[Chunk],
        mode: ChunkMode,
        language: &str,
        system: &str,
        force: bool,
        width: usize,
    ) -> TranslationResult<Vec<String>> {
        if width <= 1 || chunks.len() <= 1 {
            let mut out = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                out.push(
                    self.translate_chunk(rel, chunk, mode, language, system, force)
                        .await?,
                );
            }
            return Ok(out);
        }

        let semaphore = Arc::new(Semaphore::new(width));
        let system: Arc<str> = system.into();
        let mut set = JoinSet::new();
        for (i, chunk) in chunks.iter().cloned().enumerate() {
            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let system = Arc::clone(&system);
            let (rel, language) = (rel.to_string(), language.to_string());
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = this
                    .translate_chunk(&rel, &chunk, mode, &language, &system, force)
                    .await;
                (i, result)
            });
        }

        let mut results: Vec<Option<String>> = vec![None; chunks.len()];
        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((i, Ok(text))) => results[i] = Some(text),
                Ok((_, Err(e))) => {
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    first_err.get_or_insert(TranslationError::Other(anyhow!(
                        "chunk task failed: {}",
                        e
                    )));
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }
        Ok(results.into_iter().map(Option::unwrap_or_default).collect())
    }

    /// Translate one chunk: cache, short-circuit, then the model ladder.
    pub async fn translate_chunk(
        &self,
        rel: &str,
        chunk: &Chunk,
        mode: ChunkMode,
        language: &str,
        system: &str,
        force: bool,
    ) -> TranslationResult<String> {
        if !force {
            if let Some(entry) = self.cache.get_cached_entry(rel, &chunk.hash) {
                if let Some(cached) = entry.translations.get(language) {
                    if self.accept_cached(chunk, cached, entry.kind) {
                        self.counters.cache_hits.fetch_add(1, Ordering::SeqCst);
                        return Ok(cached.clone());
                    }
                    debug!(path = rel, language, chunk = %short(&chunk.hash), "stale cache entry");
                }
            }
        }

        if mode == ChunkMode::Prose && is_non_translatable(&chunk.text) {
            self.store(rel, chunk, language, &chunk.text, EntryKind::CodeOrComment, None)
                .await;
            return Ok(chunk.text.clone());
        }

        // Values are bare lines, never a document head.
        let start = match mode {
            ChunkMode::Prose => Start::of_chunk(chunk.index),
            ChunkMode::ValuesOnly => Start::Inside,
        };
        let validator = self.validator.starting(start);

        let models = self.config.model.models_for(language);
        if models.is_empty() {
            return Err(TranslationError::NoModels(language.to_string()));
        }

        let mut last = String::from("no attempt");
        for model in models {
            self.counters.model_calls.fetch_add(1, Ordering::SeqCst);
            let raw = match self.model.complete(model, system, &chunk.text).await {
                Ok(text) => text,
                Err(ModelError::Encoding) => {
                    warn!(path = rel, language, model = model.as_str(), "undecodable reply, using source chunk");
                    chunk.text.clone()
                }
                Err(e) => {
                    warn!(path = rel, language, model = model.as_str(), "{}", e);
                    last = e.to_string();
                    continue;
                }
            };

            let candidate = match mode {
                ChunkMode::Prose => repair_chunk(&chunk.text, &raw, start),
                ChunkMode::ValuesOnly => repair_values(&chunk.text, &raw),
            };
            let result = match mode {
                ChunkMode::Prose => validator.validate_detailed(&chunk.text, &candidate),
                ChunkMode::ValuesOnly => validator.validate_structure(&chunk.text, &candidate),
            };

            if !result.ok {
                warn!(path = rel, language, model = model.as_str(), chunk = %short(&chunk.hash), "rejected: {}", result);
                self.dump_rejected(rel, language, model, chunk, &candidate, &result.to_string());
                if self.config.translation.stop_on_mismatch {
                    return Err(TranslationError::Rejected {
                        chunk: short(&chunk.hash).to_string(),
                        language: language.to_string(),
                        reason: result.reason.unwrap_or(Reason::LineCount),
                    });
                }
                last = result.to_string();
                continue;
            }
            if !validator.lenient_match(&chunk.text, &candidate) {
                warn!(path = rel, language, model = model.as_str(), "rejected: skeleton drift");
                self.dump_rejected(rel, language, model, chunk, &candidate, "skeleton drift");
                last = "skeleton drift".to_string();
                continue;
            }

            let kind = match mode {
                ChunkMode::Prose => EntryKind::Prose,
                ChunkMode::ValuesOnly => EntryKind::ValuesOnly,
            };
            self.store(rel, chunk, language, &candidate, kind, Some(model.as_str()))
                .await;
            debug!(path = rel, language, model = model.as_str(), chunk = %short(&chunk.hash), "accepted");
            return Ok(candidate);
        }

        Err(TranslationError::ModelsExhausted {
            chunk: short(&chunk.hash).to_string(),
            language: language.to_string(),
            last,
        })
    }

    fn accept_cached(&self, chunk: &Chunk, cached: &str, kind: EntryKind) -> bool {
        let source = chunk.text.as_str();
        let validator = match kind {
            EntryKind::ValuesOnly => self.validator.starting(Start::Inside),
            _ => self.validator.starting(Start::of_chunk(chunk.index)),
        };
        if !validator.lenient_match(source, cached) {
            return false;
        }
        match kind {
            EntryKind::ValuesOnly => line_count(source) == line_count(cached),
            EntryKind::CodeOrComment => source == cached,
            EntryKind::Prose => validator.validate(source, cached),
        }
    }

    /// Cache write. Lock timeouts and IO errors are logged, never fatal.
    async fn store(
        &self,
        rel: &str,
        chunk: &Chunk,
        language: &str,
        translation: &str,
        kind: EntryKind,
        model: Option<&str>,
    ) {
        let new = NewTranslation {
            hash: &chunk.hash,
            original: &chunk.text,
            language,
            translation,
            kind,
            model,
        };
        match self.cache.save(rel, new).await {
            Ok(true) => {}
            Ok(false) => warn!(path = rel, "cache lock busy, translation not cached"),
            Err(e) => warn!(path = rel, "cache write failed: {:#}", e),
        }
    }

    fn dump_rejected(
        &self,
        rel: &str,
        language: &str,
        model: &str,
        chunk: &Chunk,
        candidate: &str,
        reason: &str,
    ) {
        let Some(dir) = self.config.dump_dir() else {
            return;
        };
        let name = format!(
            "{}.{}.{}.{}.txt",
            rel.replace('/', "__"),
            language,
            short(&chunk.hash),
            model.replace('/', "_")
        );
        let body = format!(
            "reason: {}\n--- source ---\n{}\n--- candidate ---\n{}\n",
            reason, chunk.text, candidate
        );
        if let Err(e) = std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(dir.join(name), body)) {
            warn!("could not write dump to {}: {}", dir.display(), e);
        }
    }

    /// Force one cached chunk (by hash prefix) through the model ladder for
    /// each language, then rewrite the affected targets from the cache.
    pub async fn retranslate(
        &self,
        file: &SourceFile,
        chunk_id: &str,
        languages: &[String],
    ) -> Result<RunSummary> {
        let (hash, entry) = self
            .cache
            .find_entry(&file.rel_path, chunk_id)
            .ok_or_else(|| TranslationError::UnknownChunk(chunk_id.to_string()))?;
        let prepared = Prepared::new(file.read()?, &self.config);
        let mode = match entry.kind {
            EntryKind::ValuesOnly => ChunkMode::ValuesOnly,
            _ => ChunkMode::Prose,
        };
        let current = prepared.chunks.iter().find(|c| c.hash == hash);
        let in_document = current.is_some();
        let chunk = Chunk {
            index: current.map_or(0, |c| c.index),
            text: entry.original.clone(),
            hash: hash.clone(),
        };
        if !in_document {
            warn!(
                path = file.rel_path.as_str(),
                "chunk {} is no longer part of the document; only the cache is updated",
                short(&hash)
            );
        }

        let calls_before = self.counters.model_calls.load(Ordering::SeqCst);
        let mut summary = RunSummary {
            files: 1,
            languages: languages.len(),
            ..Default::default()
        };
        for language in languages {
            let system = match mode {
                ChunkMode::Prose => self.role.render(language),
                ChunkMode::ValuesOnly => self.role.render_values_only(language),
            };
            let outcome = match self
                .translate_chunk(&file.rel_path, &chunk, mode, language, &system, true)
                .await
            {
                Err(e) => FileOutcome::Failed(e.to_string()),
                Ok(_) if !in_document => FileOutcome::Translated,
                Ok(_) => {
                    let width = self.config.translation.parallel_chunks;
                    self.translate_language(&prepared, language, false, true, width)
                        .await
                }
            };
            summary.record(&file.rel_path, language, outcome);
        }
        summary.model_calls = self.counters.model_calls.load(Ordering::SeqCst) - calls_before;
        Ok(summary)
    }
}

/// Report which (document, language) pairs need work, without calling a
/// model or writing anything.
pub fn check(config: &Config, files: &[SourceFile], languages: &[String]) -> Result<CheckReport> {
    let cache = CacheStore::new(config.cache_root());
    let validator = Validator::from_config(&config.heuristics);
    let mut report = CheckReport {
        files: files.len(),
        languages: languages.len(),
        stale: Vec::new(),
    };
    for file in files {
        let prepared = Prepared::new(file.read()?, config);
        let cached = cache.load(&file.rel_path);
        for language in languages {
            let uncached = prepared
                .chunks
                .iter()
                .filter(|c| {
                    !cached
                        .entries
                        .get(&c.hash)
                        .is_some_and(|e| e.translations.contains_key(language))
                })
                .count();
            let target = target_path(config, language, &file.rel_path);
            let (missing, invalid) = match std::fs::read_to_string(&target) {
                Ok(raw) => {
                    let existing = normalize_newlines(&raw);
                    (false, !validator.validate_structure(&prepared.doc.text, &existing).ok)
                }
                Err(_) => (true, false),
            };
            if missing || invalid || uncached > 0 {
                report.stale.push(StaleEntry {
                    path: file.rel_path.clone(),
                    language: language.clone(),
                    missing_target: missing,
                    invalid_target: invalid,
                    uncached_chunks: uncached,
                    total_chunks: prepared.chunks.len(),
                });
            }
        }
    }
    Ok(report)
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Write atomically through a temp file in the target directory, using the
/// source document's line ending.
fn write_target(target: &Path, text: &str, ending: LineEnding) -> Result<()> {
    use std::io::Write;

    let dir = target
        .parent()
        .ok_or_else(|| anyhow!("invalid target path: {}", target.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(ending.apply(text).as_bytes())?;
    tmp.persist(target)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockMode, MockModel};
    use tempfile::TempDir;

    fn setup(files: &[(&str, &str)]) -> (TempDir, Arc<Config>) {
        let tmp = TempDir::new().unwrap();
        for (rel, text) in files {
            let path = tmp.path().join("docs/en").join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, text).unwrap();
        }
        let mut config = Config::with_root(tmp.path());
        config.project.languages = vec!["de".to_string()];
        config.model.models = vec!["primary".to_string(), "backup".to_string()];
        config.translation.chunk_bytes = 64;
        (tmp, Arc::new(config))
    }

    fn source(config: &Config, rel: &str) -> SourceFile {
        SourceFile {
            rel_path: rel.to_string(),
            abs_path: config.source_root().join(rel),
        }
    }

    fn langs() -> Vec<String> {
        vec!["de".to_string()]
    }

    #[test]
    fn non_translatable_detection() {
        assert!(is_non_translatable("CODE_BLOCK_0"));
        assert!(is_non_translatable("<!-- a -->\n\n<!-- b -->"));
        assert!(is_non_translatable("CODE_BLOCK_1\n<!-- a -->\n"));
        assert!(!is_non_translatable("CODE_BLOCK_0\nText"));
    }

    #[tokio::test]
    async fn falls_back_to_next_model() {
        let (_tmp, config) = setup(&[("a.md", "Hello there world.\n")]);
        let model = Arc::new(
            MockModel::new(MockMode::Rot13)
                .with_model("primary", MockMode::Fail(ModelError::Transport("down".into()))),
        );
        let t = Translator::new(Arc::clone(&config), model.clone()).unwrap();
        let summary = t.translate_all(&[source(&config, "a.md")], &langs(), false).await;
        assert_eq!(summary.translated, 1);
        assert_eq!(model.models_called(), vec!["primary", "backup"]);
        let out = std::fs::read_to_string(config.target_root().join("de/a.md")).unwrap();
        assert_eq!(out, "Uryyb gurer jbeyq.\n");
    }

    #[tokio::test]
    async fn echo_is_rejected_and_file_fails() {
        let (_tmp, config) = setup(&[("a.md", "Hello there world.\n")]);
        let model = Arc::new(MockModel::new(MockMode::Echo));
        let t = Translator::new(Arc::clone(&config), model.clone()).unwrap();
        let summary = t.translate_all(&[source(&config, "a.md")], &langs(), false).await;
        assert_eq!(summary.failed, 1);
        assert!(!summary.is_success());
        assert_eq!(model.calls(), 2);
        assert!(!config.target_root().join("de/a.md").exists());
    }

    #[tokio::test]
    async fn stop_on_mismatch_aborts_ladder() {
        let (_tmp, config) = setup(&[("a.md", "Hello there world.\n")]);
        let mut cfg = (*config).clone();
        cfg.translation.stop_on_mismatch = true;
        let model = Arc::new(MockModel::new(MockMode::Echo));
        let t = Translator::new(Arc::new(cfg), model.clone()).unwrap();
        let summary = t.translate_all(&[source(&config, "a.md")], &langs(), false).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(model.calls(), 1);
        match &summary.problems[0].outcome {
            FileOutcome::Failed(msg) => assert!(msg.contains("untranslated"), "{}", msg),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejected_candidates_are_dumped() {
        let (tmp, config) = setup(&[("a.md", "Hello there world.\n")]);
        let mut cfg = (*config).clone();
        cfg.translation.dump_dir = Some("dumps".into());
        let model = Arc::new(MockModel::new(MockMode::Rot13).with_model("primary", MockMode::Echo));
        let t = Translator::new(Arc::new(cfg), model).unwrap();
        let summary = t.translate_all(&[source(&config, "a.md")], &langs(), false).await;
        assert_eq!(summary.translated, 1);
        let dumps: Vec<_> = std::fs::read_dir(tmp.path().join("dumps")).unwrap().collect();
        assert_eq!(dumps.len(), 1);
    }

    #[tokio::test]
    async fn preserves_crlf() {
        let (_tmp, config) = setup(&[("a.md", "Hello there world.\r\n\r\nSecond line here.\r\n")]);
        let t = Translator::new(Arc::clone(&config), Arc::new(MockModel::new(MockMode::Rot13))).unwrap();
        t.translate_all(&[source(&config, "a.md")], &langs(), false).await;
        let out = std::fs::read_to_string(config.target_root().join("de/a.md")).unwrap();
        assert_eq!(out, "Uryyb gurer jbeyq.\r\n\r\nFrpbaq yvar urer.\r\n");
    }

    #[tokio::test]
    async fn thematic_break_chunk_keeps_its_skeleton() {
        let (_tmp, config) = setup(&[(
            "a.md",
            "Intro text here.\n\n---\n- apples are red\n- pears are green\n<!-- keep -->\n",
        )]);
        let mut cfg = (*config).clone();
        cfg.translation.chunk_bytes = 20;
        cfg.translation.parallel_chunks = 1;
        let model = Arc::new(
            MockModel::new(MockMode::Fail(ModelError::Transport("down".into()))).with_script(vec![
                Ok("Einleitungstext steht hier.".to_string()),
                Ok("---\nÄpfel sind rot\nBirnen sind grün\n<!-- weg -->".to_string()),
            ]),
        );
        let t = Translator::new(Arc::new(cfg), model.clone()).unwrap();
        let summary = t.translate_all(&[source(&config, "a.md")], &langs(), false).await;
        assert_eq!(summary.translated, 1, "{:?}", summary.problems);
        assert_eq!(model.calls(), 2);
        let out = std::fs::read_to_string(config.target_root().join("de/a.md")).unwrap();
        assert_eq!(
            out,
            "Einleitungstext steht hier.\n\n---\n- Äpfel sind rot\n- Birnen sind grün\n<!-- keep -->\n"
        );
    }

    #[tokio::test]
    async fn failed_retry_writes_first_pass() {
        // The reply moves the code placeholder, which only shows once the
        // code block is restored.
        let (_tmp, config) = setup(&[(
            "a.md",
            "Read this intro first.\n```sh\necho hi\n```\nThen read the outro.\n",
        )]);
        let model = Arc::new(
            MockModel::new(MockMode::Fail(ModelError::Transport("down".into()))).with_script(vec![
                Ok("CODE_BLOCK_0\nLies zuerst diese Einleitung.\nDann lies den Schluss.\n".to_string()),
            ]),
        );
        let t = Translator::new(Arc::clone(&config), model.clone()).unwrap();
        let summary = t.translate_all(&[source(&config, "a.md")], &langs(), false).await;

        assert_eq!(summary.warned, 1, "{:?}", summary.problems);
        assert_eq!(summary.failed, 0);
        assert_eq!(model.calls(), 3);
        match &summary.problems[0].outcome {
            FileOutcome::Warned(msg) => assert!(msg.contains("retry failed"), "{}", msg),
            other => panic!("unexpected outcome {:?}", other),
        }
        let out = std::fs::read_to_string(config.target_root().join("de/a.md")).unwrap();
        assert!(out.contains("Dann lies den Schluss."), "{}", out);
    }

    #[tokio::test]
    async fn check_reports_stale_then_clean() {
        let (_tmp, config) = setup(&[("a.md", "Hello there world.\n")]);
        let t = Translator::new(Arc::clone(&config), Arc::new(MockModel::new(MockMode::Rot13))).unwrap();
        let files = vec![source(&config, "a.md")];
        let report = check(&config, &files, &langs()).unwrap();
        assert_eq!(report.stale.len(), 1);
        assert!(report.stale[0].missing_target);
        assert_eq!(report.stale[0].uncached_chunks, 1);

        t.translate_all(&files, &langs(), false).await;
        assert!(check(&config, &files, &langs()).unwrap().is_clean());
    }

    #[tokio::test]
    async fn retranslate_by_prefix() {
        let (_tmp, config) = setup(&[("a.md", "Hello there world.\n")]);
        let model = Arc::new(MockModel::new(MockMode::Rot13));
        let t = Translator::new(Arc::clone(&config), model.clone()).unwrap();
        let file = source(&config, "a.md");
        t.translate_all(std::slice::from_ref(&file), &langs(), false).await;
        assert_eq!(model.calls(), 1);

        let hash = t.cache().load("a.md").entries.keys().next().unwrap().clone();
        let summary = t.retranslate(&file, &hash[..8], &langs()).await.unwrap();
        assert_eq!(summary.translated, 1);
        assert_eq!(summary.model_calls, 1);
        assert_eq!(model.calls(), 2);

        assert!(t.retranslate(&file, "zzzz", &langs()).await.is_err());
    }
}
