//! System prompt rendering.
//!
//! The role template is plain text with a `{language}` token, replaced by
//! the target language's display name. When no template file is configured
//! (or it cannot be found) [`DEFAULT_ROLE_TEMPLATE`] is used.

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Config;

pub const LANGUAGE_TOKEN: &str = "{language}";

pub const DEFAULT_ROLE_TEMPLATE: &str = "\
You are a professional technical translator. Translate the markdown document \
the user sends into {language}.

Rules:
- Keep exactly the same number of lines. Every input line maps to one output line.
- Keep blank lines, list markers, headings and indentation where they are.
- Never change lines that are HTML comments (<!-- ... -->).
- Never change link URLs, image paths, inline code or lines of the form CODE_BLOCK_<n>.
- Reply with the translation only, without explanations or surrounding code fences.
";

const VALUES_ONLY_RULES: &str = "
The input is a list of short values from a YAML file, one per line. Translate \
each line on its own and reply with exactly one line per input line, in the \
same order. Do not add keys, quotes or numbering.
";

/// A loaded role template.
#[derive(Debug, Clone)]
pub struct RoleTemplate {
    template: String,
}

impl Default for RoleTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_ROLE_TEMPLATE.to_string(),
        }
    }
}

impl RoleTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Load the configured template, falling back to the default when none
    /// is configured or the file does not exist.
    pub fn load(config: &Config) -> Result<Self> {
        match config.role_template_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            Some(path) => {
                tracing::warn!(
                    "role template {} not found, using the built-in template",
                    path.display()
                );
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let template = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read role template: {}", path.display()))?;
        if !template.contains(LANGUAGE_TOKEN) {
            tracing::warn!(
                "role template {} has no {} token",
                path.display(),
                LANGUAGE_TOKEN
            );
        }
        Ok(Self::new(template))
    }

    /// System prompt for markdown prose.
    pub fn render(&self, language: &str) -> String {
        self.template
            .replace(LANGUAGE_TOKEN, language_name(language))
    }

    /// System prompt for newline-joined YAML values.
    pub fn render_values_only(&self, language: &str) -> String {
        let mut prompt = self.render(language);
        prompt.push_str(VALUES_ONLY_RULES);
        prompt
    }
}

/// English display name for common language codes. Unknown codes are
/// returned unchanged.
pub fn language_name(code: &str) -> &str {
    match code.to_ascii_lowercase().as_str() {
        "ar" => "Arabic",
        "bg" => "Bulgarian",
        "bn" => "Bengali",
        "ca" => "Catalan",
        "cs" => "Czech",
        "da" => "Danish",
        "de" => "German",
        "el" => "Greek",
        "en" => "English",
        "es" => "Spanish",
        "et" => "Estonian",
        "fa" => "Persian",
        "fi" => "Finnish",
        "fr" => "French",
        "he" => "Hebrew",
        "hi" => "Hindi",
        "hr" => "Croatian",
        "hu" => "Hungarian",
        "id" => "Indonesian",
        "it" => "Italian",
        "ja" => "Japanese",
        "ko" => "Korean",
        "lt" => "Lithuanian",
        "lv" => "Latvian",
        "ms" => "Malay",
        "nb" | "no" => "Norwegian",
        "nl" => "Dutch",
        "pl" => "Polish",
        "pt" => "Portuguese",
        "pt-br" => "Brazilian Portuguese",
        "ro" => "Romanian",
        "ru" => "Russian",
        "sk" => "Slovak",
        "sl" => "Slovenian",
        "sr" => "Serbian",
        "sv" => "Swedish",
        "sw" => "Swahili",
        "ta" => "Tamil",
        "th" => "Thai",
        "tr" => "Turkish",
        "uk" => "Ukrainian",
        "ur" => "Urdu",
        "vi" => "Vietnamese",
        "zh" | "zh-cn" | "zh-hans" => "Simplified Chinese",
        "zh-tw" | "zh-hant" => "Traditional Chinese",
        _ => code,
    }
}
