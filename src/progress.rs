//! Translation progress reporting.
//!
//! Reports observable progress during `mdt translate` so users see which
//! documents are done and how much is left. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a translation run.
#[derive(Clone, Debug)]
pub enum TranslateProgressEvent {
    /// Work was planned: this many (document, language) pairs.
    Planned { files: u64, languages: u64 },
    /// One (document, language) pair finished.
    Finished {
        path: String,
        language: String,
        status: &'static str,
        n: u64,
        total: u64,
    },
}

/// Reports translation progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: TranslateProgressEvent);
}

/// Human-friendly progress on stderr: "translate  12 / 40  de  guide/intro.md  translated".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: TranslateProgressEvent) {
        let line = match &event {
            TranslateProgressEvent::Planned { files, languages } => format!(
                "translate  {} files x {} languages\n",
                format_number(*files),
                format_number(*languages)
            ),
            TranslateProgressEvent::Finished {
                path,
                language,
                status,
                n,
                total,
            } => format!(
                "translate  {} / {}  {}  {}  {}\n",
                format_number(*n),
                format_number(*total),
                language,
                path,
                status
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: TranslateProgressEvent) {
        let obj = match &event {
            TranslateProgressEvent::Planned { files, languages } => serde_json::json!({
                "event": "planned",
                "files": files,
                "languages": languages
            }),
            TranslateProgressEvent::Finished {
                path,
                language,
                status,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "path": path,
                "language": language,
                "status": status,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: TranslateProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
