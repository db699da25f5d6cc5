//! # md-translate
//!
//! Structure-preserving markdown translation through LLM chat APIs.
//!
//! Source documents are split into chunks on blank-line boundaries with
//! fenced code replaced by placeholders. Each chunk goes through a ladder
//! of models until one produces a candidate that keeps the source's line
//! skeleton: line count, blank lines, headings, list prefixes, code
//! placeholders and link targets. Accepted translations are cached per
//! source file, keyed by the chunk's content hash, so reruns only pay for
//! chunks that changed.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌─────────┐   ┌──────────┐   ┌──────────┐
//! │  source  │──▶│  chunk  │──▶│  model  │──▶│  repair  │──▶│ validate │
//! │ docs/en  │   │ +blocks │   │ ladder  │   │          │   │          │
//! └──────────┘   └─────────┘   └─────────┘   └──────────┘   └────┬─────┘
//!                                   ▲                            │
//!                              ┌────┴────┐                  ┌────▼─────┐
//!                              │  cache  │◀─────────────────│  target  │
//!                              └─────────┘                  │ docs/<l> │
//!                                                           └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Documents and chunks |
//! | [`lines`] | Line classification and markdown line helpers |
//! | [`chunk`] | Code block extraction and chunking |
//! | [`yaml`] | Front-matter value extraction and reinsertion |
//! | [`validate`] | Structural and untranslated-copy checks |
//! | [`repair`] | Deterministic fixes applied to model output |
//! | [`cache`] | Per-file translation cache with locking |
//! | [`client`] | Chat-completions client and retry policy |
//! | [`mock`] | Deterministic offline model |
//! | [`prompt`] | Role templates and language names |
//! | [`project`] | Source scanning, languages and target paths |
//! | [`pipeline`] | Translation orchestration |
//! | [`progress`] | Progress reporting on stderr |
//! | [`error`] | Error types |

pub mod cache;
pub mod cache_cmd;
pub mod chunk;
pub mod client;
pub mod config;
pub mod error;
pub mod init;
pub mod languages;
pub mod lines;
pub mod mock;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod project;
pub mod prompt;
pub mod repair;
pub mod translate_cmd;
pub mod validate;
pub mod yaml;
