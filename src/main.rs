//! # md-translate CLI (`mdt`)
//!
//! ## Usage
//!
//! ```bash
//! mdt --config ./mdt.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mdt init` | Write a starter `mdt.toml` and `role.txt` |
//! | `mdt translate` | Translate new and changed documents |
//! | `mdt check` | Report stale translations without calling a model |
//! | `mdt retranslate <chunk-id>` | Translate one cached chunk again |
//! | `mdt cache clear <file>` | Delete a document's cache |
//! | `mdt cache remove <file> <chunk-id>` | Delete one cached chunk |
//! | `mdt languages` | List target languages and their model ladders |

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use md_translate::client::{ChatModel, HttpChatModel};
use md_translate::config::{load_config, Config};
use md_translate::progress::{ProgressMode, ProgressReporter};
use md_translate::{cache_cmd, init, languages, translate_cmd};

/// Structure-preserving markdown translation through LLM chat APIs.
///
/// All commands except `init` read a TOML configuration file; paths in it
/// are relative to the file's directory.
#[derive(Parser)]
#[command(
    name = "mdt",
    about = "Translate markdown documents with LLMs while keeping their line structure",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./mdt.toml")]
    config: PathBuf,

    /// More log output (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Progress output on stderr. Defaults to `human` on a TTY, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration and role template.
    Init {
        /// Directory to write into.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Translate new and changed documents into every target language.
    ///
    /// Cached chunks are reused; up-to-date targets are left untouched.
    Translate {
        /// Only this source file (relative to the source directory, or a path inside it).
        #[arg(long)]
        file: Option<PathBuf>,

        /// Ignore the cache and up-to-date targets.
        #[arg(long)]
        force: bool,

        /// Only these languages. Repeatable.
        #[arg(long = "language", short = 'l')]
        languages: Vec<String>,
    },

    /// Report which (document, language) pairs need work. Exits 1 if any do.
    Check {
        #[arg(long)]
        file: Option<PathBuf>,

        #[arg(long = "language", short = 'l')]
        languages: Vec<String>,
    },

    /// Translate one cached chunk again.
    Retranslate {
        /// Chunk id: the chunk hash or a unique prefix of it.
        chunk_id: String,

        /// Source file owning the chunk. Searched across all caches when omitted.
        #[arg(long)]
        file: Option<PathBuf>,

        #[arg(long = "language", short = 'l')]
        languages: Vec<String>,
    },

    /// Inspect and edit the translation cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// List target languages and their model ladders.
    Languages {
        #[arg(long = "language", short = 'l')]
        languages: Vec<String>,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete the whole cache of one source file.
    Clear { file: PathBuf },

    /// Delete one cached chunk of a source file.
    Remove { file: PathBuf, chunk_id: String },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn http_model(cfg: &Config) -> anyhow::Result<Arc<dyn ChatModel>> {
    Ok(Arc::new(HttpChatModel::from_config(&cfg.model)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    if let Commands::Init { dir } = &cli.command {
        init::scaffold_project(dir)?;
        return Ok(());
    }

    let cfg = Arc::new(load_config(&cli.config)?);
    let progress: Arc<dyn ProgressReporter> = Arc::from(
        cli.progress
            .unwrap_or_else(ProgressMode::default_for_tty)
            .reporter(),
    );

    let ok = match cli.command {
        Commands::Init { .. } => true,
        Commands::Translate {
            file,
            force,
            languages,
        } => {
            let model = http_model(&cfg)?;
            translate_cmd::run_translate(
                Arc::clone(&cfg),
                model,
                progress,
                file.as_deref(),
                &languages,
                force,
            )
            .await?
        }
        Commands::Check { file, languages } => {
            translate_cmd::run_check(&cfg, file.as_deref(), &languages)?
        }
        Commands::Retranslate {
            chunk_id,
            file,
            languages,
        } => {
            let model = http_model(&cfg)?;
            translate_cmd::run_retranslate(
                Arc::clone(&cfg),
                model,
                file.as_deref(),
                &chunk_id,
                &languages,
            )
            .await?
        }
        Commands::Cache { action } => {
            match action {
                CacheAction::Clear { file } => cache_cmd::run_cache_clear(&cfg, &file).await?,
                CacheAction::Remove { file, chunk_id } => {
                    cache_cmd::run_cache_remove(&cfg, &file, &chunk_id).await?
                }
            }
            true
        }
        Commands::Languages { languages: filter } => {
            languages::list_languages(&cfg, &filter)?;
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
