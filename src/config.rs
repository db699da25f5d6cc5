//! TOML configuration.
//!
//! ```toml
//! [project]
//! source_dir = "docs/en"
//! target_dir = "docs"
//! cache_dir = ".translation-cache"
//! languages = ["de", "ja"]          # omit to discover from target_dir
//! role_template = "role.txt"
//!
//! [translation]
//! chunk_bytes = 4000
//! parallel_files = 4
//! parallel_chunks = 4
//!
//! [model]
//! base_url = "https://openrouter.ai/api/v1"
//! models = ["gpt-4o-mini", "claude-3.5-sonnet"]
//!
//! [model.per_language]
//! ja = ["claude-3.5-sonnet"]
//! ```
//!
//! Relative paths resolve against the directory holding the config file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub heuristics: HeuristicsConfig,
    /// Directory the config file was loaded from. Not part of the file.
    #[serde(skip)]
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProjectConfig {
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    #[serde(default = "default_target_dir")]
    pub target_dir: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Explicit target languages. Discovered from `target_dir` when empty.
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub role_template: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            target_dir: default_target_dir(),
            cache_dir: default_cache_dir(),
            languages: Vec::new(),
            role_template: None,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("docs/en")
}
fn default_target_dir() -> PathBuf {
    PathBuf::from("docs")
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(".translation-cache")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranslationConfig {
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,
    #[serde(default = "default_parallel")]
    pub parallel_files: usize,
    #[serde(default = "default_parallel")]
    pub parallel_chunks: usize,
    /// Abort a chunk's model ladder at the first validation failure.
    #[serde(default)]
    pub stop_on_mismatch: bool,
    /// Front-matter keys whose values are never translated.
    #[serde(default = "default_yaml_exclude_keys")]
    pub yaml_exclude_keys: Vec<String>,
    /// When set, rejected model outputs are written here for inspection.
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: default_chunk_bytes(),
            parallel_files: default_parallel(),
            parallel_chunks: default_parallel(),
            stop_on_mismatch: false,
            yaml_exclude_keys: default_yaml_exclude_keys(),
            dump_dir: None,
        }
    }
}

fn default_chunk_bytes() -> usize {
    4000
}
fn default_parallel() -> usize {
    4
}
fn default_yaml_exclude_keys() -> Vec<String> {
    ["layout", "permalink", "slug", "image", "icon", "date", "id"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Global model ladder, tried in order.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Per-language ladders that replace the global one.
    #[serde(default)]
    pub per_language: BTreeMap<String, Vec<String>>,
    /// Extra short-name → provider-qualified id mappings.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            models: default_models(),
            per_language: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_models() -> Vec<String> {
    vec!["gpt-4o-mini".to_string()]
}

impl ModelConfig {
    /// The model ladder for `language`.
    pub fn models_for(&self, language: &str) -> &[String] {
        match self.per_language.get(language) {
            Some(list) if !list.is_empty() => list,
            _ => &self.models,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeuristicsConfig {
    #[serde(default = "default_threshold")]
    pub untranslated_jaccard: f64,
    #[serde(default = "default_threshold")]
    pub untranslated_lcs: f64,
    #[serde(default = "default_min_tokens")]
    pub untranslated_min_tokens: usize,
    #[serde(default = "default_lenient_tolerance")]
    pub lenient_tolerance: f64,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            untranslated_jaccard: default_threshold(),
            untranslated_lcs: default_threshold(),
            untranslated_min_tokens: default_min_tokens(),
            lenient_tolerance: default_lenient_tolerance(),
        }
    }
}

fn default_threshold() -> f64 {
    0.8
}
fn default_min_tokens() -> usize {
    3
}
fn default_lenient_tolerance() -> f64 {
    0.3
}

impl Config {
    /// A config with every default and `root` set, for tests and tooling.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            project: ProjectConfig::default(),
            translation: TranslationConfig::default(),
            model: ModelConfig::default(),
            heuristics: HeuristicsConfig::default(),
            root: root.into(),
        }
    }

    pub fn source_root(&self) -> PathBuf {
        self.root.join(&self.project.source_dir)
    }

    pub fn target_root(&self) -> PathBuf {
        self.root.join(&self.project.target_dir)
    }

    pub fn cache_root(&self) -> PathBuf {
        self.root.join(&self.project.cache_dir)
    }

    pub fn role_template_path(&self) -> Option<PathBuf> {
        self.project.role_template.as_ref().map(|p| self.root.join(p))
    }

    pub fn dump_dir(&self) -> Option<PathBuf> {
        self.translation.dump_dir.as_ref().map(|p| self.root.join(p))
    }

    /// Check value ranges. Called by [`load_config`].
    pub fn validate(&self) -> Result<()> {
        if self.translation.chunk_bytes == 0 {
            bail!("translation.chunk_bytes must be > 0");
        }
        if self.translation.parallel_files == 0 || self.translation.parallel_chunks == 0 {
            bail!("translation.parallel_files and translation.parallel_chunks must be >= 1");
        }
        if self.model.models.is_empty() {
            bail!("model.models must list at least one model");
        }
        if self.model.timeout_secs == 0 {
            bail!("model.timeout_secs must be > 0");
        }
        for (name, value) in [
            ("heuristics.untranslated_jaccard", self.heuristics.untranslated_jaccard),
            ("heuristics.untranslated_lcs", self.heuristics.untranslated_lcs),
            ("heuristics.lenient_tolerance", self.heuristics.lenient_tolerance),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be in [0.0, 1.0]", name);
            }
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.root = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    config.validate()?;
    Ok(config)
}

/// Example config written by `mdt init`.
pub const EXAMPLE_CONFIG: &str = r#"[project]
source_dir = "docs/en"
target_dir = "docs"
cache_dir = ".translation-cache"
# languages = ["de", "fr", "ja"]   # omit to use the subdirectories of target_dir
role_template = "role.txt"

[translation]
chunk_bytes = 4000
parallel_files = 4
parallel_chunks = 4
stop_on_mismatch = false
yaml_exclude_keys = ["layout", "permalink", "slug", "image", "icon", "date", "id"]

[model]
base_url = "https://openrouter.ai/api/v1"
api_key_env = "OPENROUTER_API_KEY"
timeout_secs = 120
max_retries = 3
backoff_base_ms = 1000
models = ["gpt-4o-mini", "claude-3.5-sonnet"]

# [model.per_language]
# ja = ["claude-3.5-sonnet", "gpt-4o"]

[heuristics]
untranslated_jaccard = 0.8
untranslated_lcs = 0.8
untranslated_min_tokens = 3
lenient_tolerance = 0.3
"#;
