//! Typed errors for the model client and the translation pipeline.

use thiserror::Error;

use crate::validate::Reason;

/// Failure of a single model call (after the client's own retries).
#[derive(Debug, Error, Clone)]
pub enum ModelError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    /// Timeouts end the retry ladder immediately.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("model output is not valid UTF-8")]
    Encoding,

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Failure to produce an acceptable translation.
#[derive(Debug, Error)]
pub enum TranslationError {
    /// Every model in the ladder failed or produced invalid structure.
    #[error("no model produced a valid translation for chunk {chunk} ({language}): {last}")]
    ModelsExhausted {
        chunk: String,
        language: String,
        last: String,
    },

    /// Validation failed and the caller asked to stop at the first mismatch.
    #[error("chunk {chunk} ({language}) rejected by validator: {reason}")]
    Rejected {
        chunk: String,
        language: String,
        reason: Reason,
    },

    #[error("no models configured for language '{0}'")]
    NoModels(String),

    #[error("chunk '{0}' not found in cache")]
    UnknownChunk(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type TranslationResult<T> = Result<T, TranslationError>;
