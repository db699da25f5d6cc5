use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::client::ChatModel;
use crate::config::Config;
use crate::pipeline::{check, FileOutcome, RunSummary, Translator};
use crate::progress::ProgressReporter;
use crate::project::{resolve_languages, resolve_source_file, scan_sources, SourceFile};

/// Translate every source file (or just `file`) into the resolved languages.
///
/// Returns `false` when any (file, language) pair failed.
pub async fn run_translate(
    config: Arc<Config>,
    model: Arc<dyn ChatModel>,
    progress: Arc<dyn ProgressReporter>,
    file: Option<&Path>,
    languages: &[String],
    force: bool,
) -> Result<bool> {
    let languages = resolve_languages(&config, languages)?;
    let files = match file {
        Some(path) => vec![resolve_source_file(&config, path)?],
        None => scan_sources(&config)?,
    };

    let translator = Translator::new(Arc::clone(&config), model)?.with_progress(progress);
    let summary = translator.translate_all(&files, &languages, force).await;
    print_summary("translate", &summary);
    Ok(summary.is_success())
}

/// Report stale (file, language) pairs without writing anything.
///
/// Returns `false` when there is pending work.
pub fn run_check(config: &Config, file: Option<&Path>, languages: &[String]) -> Result<bool> {
    let languages = resolve_languages(config, languages)?;
    let files = match file {
        Some(path) => vec![resolve_source_file(config, path)?],
        None => scan_sources(config)?,
    };
    let report = check(config, &files, &languages)?;

    println!("check (dry-run)");
    println!("  files: {}", report.files);
    println!("  languages: {}", languages.join(", "));
    println!("  stale: {}", report.stale.len());
    for entry in &report.stale {
        let mut notes = Vec::new();
        if entry.missing_target {
            notes.push("missing target".to_string());
        }
        if entry.invalid_target {
            notes.push("invalid target".to_string());
        }
        if entry.uncached_chunks > 0 {
            notes.push(format!(
                "{} / {} chunks uncached",
                entry.uncached_chunks, entry.total_chunks
            ));
        }
        println!("    {} [{}]: {}", entry.path, entry.language, notes.join(", "));
    }
    if report.is_clean() {
        println!("ok");
    }
    Ok(report.is_clean())
}

/// Retranslate one cached chunk, found by hash prefix in `file`'s cache or,
/// without `file`, in the cache of every source file.
pub async fn run_retranslate(
    config: Arc<Config>,
    model: Arc<dyn ChatModel>,
    file: Option<&Path>,
    chunk_id: &str,
    languages: &[String],
) -> Result<bool> {
    let languages = resolve_languages(&config, languages)?;
    let translator = Translator::new(Arc::clone(&config), model)?;

    let source = match file {
        Some(path) => resolve_source_file(&config, path)?,
        None => find_owner(&config, &translator, chunk_id)?,
    };

    let summary = translator
        .retranslate(&source, chunk_id, &languages)
        .await?;
    print_summary("retranslate", &summary);
    Ok(summary.is_success())
}

fn find_owner(config: &Config, translator: &Translator, chunk_id: &str) -> Result<SourceFile> {
    let mut owners: Vec<SourceFile> = scan_sources(config)?
        .into_iter()
        .filter(|f| translator.cache().find_entry(&f.rel_path, chunk_id).is_some())
        .collect();
    match owners.len() {
        0 => bail!("No cached chunk matches '{}'", chunk_id),
        1 => Ok(owners.remove(0)),
        _ => bail!(
            "Chunk id '{}' is ambiguous: found in {}; pass --file",
            chunk_id,
            owners
                .iter()
                .map(|f| f.rel_path.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn print_summary(command: &str, summary: &RunSummary) {
    println!("{}", command);
    println!("  files: {}", summary.files);
    println!("  languages: {}", summary.languages);
    println!("  translated: {}", summary.translated);
    println!("  up to date: {}", summary.up_to_date);
    println!("  written with warnings: {}", summary.warned);
    println!("  failed: {}", summary.failed);
    println!("  model calls: {}", summary.model_calls);
    println!("  cache hits: {}", summary.cache_hits);
    for problem in &summary.problems {
        let detail = match &problem.outcome {
            FileOutcome::Warned(msg) | FileOutcome::Failed(msg) => msg.as_str(),
            _ => "",
        };
        println!(
            "    {} [{}] {}: {}",
            problem.path,
            problem.language,
            problem.outcome.label(),
            detail
        );
    }
    if summary.is_success() {
        println!("ok");
    } else {
        println!("{} failed", summary.failed);
    }
}
