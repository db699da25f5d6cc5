//! End-to-end translation runs against the offline mock model.

use std::path::Path;
use std::sync::Arc;

use md_translate::config::Config;
use md_translate::mock::{MockMode, MockModel};
use md_translate::pipeline::{FileOutcome, Translator};
use md_translate::project::{scan_sources, SourceFile};
use tempfile::TempDir;

fn project(files: &[(&str, &str)]) -> (TempDir, Arc<Config>) {
    let tmp = TempDir::new().unwrap();
    for (rel, text) in files {
        write(&tmp.path().join("docs/en").join(rel), text);
    }
    let mut config = Config::with_root(tmp.path());
    config.project.languages = vec!["de".to_string()];
    config.model.models = vec!["primary".to_string()];
    config.translation.chunk_bytes = 20;
    (tmp, Arc::new(config))
}

fn write(path: &Path, text: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

fn sources(config: &Config) -> Vec<SourceFile> {
    scan_sources(config).unwrap()
}

fn target(config: &Config, rel: &str) -> String {
    std::fs::read_to_string(config.target_root().join("de").join(rel)).unwrap()
}

fn de() -> Vec<String> {
    vec!["de".to_string()]
}

#[tokio::test]
async fn second_run_is_free_and_byte_identical() {
    let (_tmp, config) = project(&[(
        "guide.md",
        "# Getting started today\n\nInstall the tool first.\n\nThen run the command.\n",
    )]);
    let model = Arc::new(MockModel::new(MockMode::Rot13));
    let t = Translator::new(Arc::clone(&config), model.clone()).unwrap();

    let first = t.translate_all(&sources(&config), &de(), false).await;
    assert_eq!(first.translated, 1);
    assert_eq!(first.model_calls, 3);
    let written = target(&config, "guide.md");
    assert_eq!(
        written,
        "# Trggvat fgnegrq gbqnl\n\nVafgnyy gur gbby svefg.\n\nGura eha gur pbzznaq.\n"
    );

    let second = t.translate_all(&sources(&config), &de(), false).await;
    assert_eq!(second.up_to_date, 1);
    assert_eq!(second.model_calls, 0);
    assert_eq!(target(&config, "guide.md"), written);
}

#[tokio::test]
async fn deleted_target_is_rebuilt_from_cache() {
    let (_tmp, config) = project(&[("a.md", "Some words to translate.\n")]);
    let model = Arc::new(MockModel::new(MockMode::Rot13));
    let t = Translator::new(Arc::clone(&config), model.clone()).unwrap();
    t.translate_all(&sources(&config), &de(), false).await;
    let before = target(&config, "a.md");

    std::fs::remove_file(config.target_root().join("de/a.md")).unwrap();
    let summary = t.translate_all(&sources(&config), &de(), false).await;
    assert_eq!(summary.translated, 1);
    assert_eq!(summary.model_calls, 0);
    assert_eq!(summary.cache_hits, 1);
    assert_eq!(target(&config, "a.md"), before);
}

#[tokio::test]
async fn editing_one_paragraph_only_translates_that_chunk() {
    let (tmp, config) = project(&[(
        "a.md",
        "Alpha beta gamma.\n\nDelta epsilon zeta.\n\nEta theta iota.\n",
    )]);
    let model = Arc::new(MockModel::new(MockMode::Rot13));
    let t = Translator::new(Arc::clone(&config), model.clone()).unwrap();
    t.translate_all(&sources(&config), &de(), false).await;
    assert_eq!(model.calls(), 3);
    assert_eq!(target(&config, "a.md").split('\n').count(), 6);

    write(
        &tmp.path().join("docs/en/a.md"),
        "Alpha beta gamma.\n\nDelta epsilon omega.\n\nEta theta iota.\n",
    );
    let summary = t.translate_all(&sources(&config), &de(), false).await;
    assert_eq!(summary.translated, 1);
    assert_eq!(summary.model_calls, 1);
    assert_eq!(summary.cache_hits, 2);
    assert_eq!(
        target(&config, "a.md"),
        "Nycun orgn tnzzn.\n\nQrygn rcfvyba bzrtn.\n\nRgn gurgn vbgn.\n"
    );
}

#[tokio::test]
async fn code_only_document_needs_no_model() {
    let src = "```rust\nfn main() {}\n```\n";
    let (_tmp, config) = project(&[("code.md", src), ("note.md", "<!-- internal -->\n")]);
    let model = Arc::new(MockModel::new(MockMode::Fail(
        md_translate::error::ModelError::Transport("offline".into()),
    )));
    let t = Translator::new(Arc::clone(&config), model.clone()).unwrap();
    let summary = t.translate_all(&sources(&config), &de(), false).await;
    assert_eq!(summary.translated, 2);
    assert_eq!(model.calls(), 0);
    assert_eq!(target(&config, "code.md"), src);
    assert_eq!(target(&config, "note.md"), "<!-- internal -->\n");
}

#[tokio::test]
async fn code_fences_are_copied_verbatim() {
    let src = "Run this in a shell:\n\n```sh\necho hello world\n```\n\nThat prints a greeting.\n";
    let (_tmp, config) = project(&[("a.md", src)]);
    let t = Translator::new(Arc::clone(&config), Arc::new(MockModel::new(MockMode::Rot13))).unwrap();
    let summary = t.translate_all(&sources(&config), &de(), false).await;
    assert_eq!(summary.translated, 1);

    let out = target(&config, "a.md");
    assert!(out.contains("\n```sh\necho hello world\n```\n"), "{}", out);
    assert!(out.starts_with("Eha guvf va n furyy:\n"));
    assert_eq!(out.split('\n').count(), src.split('\n').count());
}

#[tokio::test]
async fn rewritten_link_targets_are_restored() {
    let (_tmp, config) = project(&[("a.md", "See [the docs](https://example.com/a) for details.\n")]);
    let model = Arc::new(MockModel::new(MockMode::Fixed(
        "Siehe [die Doku](https://example.de/b) fuer Details.\n".to_string(),
    )));
    let t = Translator::new(Arc::clone(&config), model).unwrap();
    let summary = t.translate_all(&sources(&config), &de(), false).await;
    assert_eq!(summary.translated, 1);
    assert_eq!(
        target(&config, "a.md"),
        "Siehe [die Doku](https://example.com/a) fuer Details.\n"
    );
}

#[tokio::test]
async fn front_matter_only_translates_values() {
    let src = "---\ntitle: Getting started\ndescription: How to install the tool\nlayout: page\n---\n";
    let (_tmp, config) = project(&[("index.md", src)]);
    let model = Arc::new(MockModel::new(MockMode::Rot13));
    let t = Translator::new(Arc::clone(&config), model.clone()).unwrap();
    let summary = t.translate_all(&sources(&config), &de(), false).await;
    assert_eq!(summary.translated, 1);

    let out = target(&config, "index.md");
    assert!(out.contains("title: Trggvat fgnegrq\n"), "{}", out);
    assert!(out.contains("description: Ubj gb vafgnyy gur gbby\n"), "{}", out);
    assert!(out.contains("layout: page\n"), "{}", out);
    assert_eq!(out.split('\n').count(), src.split('\n').count());
}

#[tokio::test]
async fn failed_file_keeps_existing_target() {
    let (_tmp, config) = project(&[("a.md", "Words that need translating.\n")]);
    let previous = "Alte Fassung.\n";
    write(&config.target_root().join("de/a.md"), previous);

    let t = Translator::new(Arc::clone(&config), Arc::new(MockModel::new(MockMode::Echo))).unwrap();
    let summary = t.translate_all(&sources(&config), &de(), false).await;
    assert_eq!(summary.failed, 1);
    assert!(matches!(summary.problems[0].outcome, FileOutcome::Failed(_)));
    assert_eq!(target(&config, "a.md"), previous);
}

#[tokio::test]
async fn force_ignores_cache() {
    let (_tmp, config) = project(&[("a.md", "Some words to translate.\n")]);
    let model = Arc::new(MockModel::new(MockMode::Rot13));
    let t = Translator::new(Arc::clone(&config), model.clone()).unwrap();
    t.translate_all(&sources(&config), &de(), false).await;
    let summary = t.translate_all(&sources(&config), &de(), true).await;
    assert_eq!(summary.translated, 1);
    assert_eq!(summary.model_calls, 1);
    assert_eq!(model.calls(), 2);
}
