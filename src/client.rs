//! Chat-completions model client.
//!
//! Defines the [`ChatModel`] trait the pipeline talks to and
//! [`HttpChatModel`], which calls an OpenAI-compatible
//! `POST {base_url}/chat/completions` endpoint.
//!
//! # Retry Strategy
//!
//! - Transport errors, non-2xx responses and malformed bodies → retry with
//!   exponential backoff (`backoff_base`, doubled per attempt, capped at 2^5)
//! - Request timeout → give up immediately, the request is assumed to be
//!   too slow to ever succeed
//! - After `max_retries` retries the last failure is reported as
//!   [`ModelError::Exhausted`]
//!
//! Successful replies are normalized to clean UTF-8: invalid byte sequences
//! are dropped and Unicode line/paragraph separators become `\n`.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use crate::config::ModelConfig;
use crate::error::ModelError;

/// A chat model that turns a system prompt and one user message into text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send one request (with the implementation's own retries).
    async fn complete(&self, model: &str, system: &str, user: &str) -> Result<String, ModelError>;
}

/// [`ChatModel`] over an OpenAI-compatible HTTP API with bearer auth.
pub struct HttpChatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    max_retries: u32,
    backoff_base: Duration,
    aliases: BTreeMap<String, String>,
}

impl HttpChatModel {
    /// Build a client from config, reading the API key from the configured
    /// environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not set or the HTTP client cannot be
    /// built.
    pub fn from_config(config: &ModelConfig) -> anyhow::Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };
        Self::new(config, api_key)
    }

    pub fn new(config: &ModelConfig, api_key: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            aliases: config.aliases.clone(),
        })
    }

    async fn attempt(&self, body: &serde_json::Value) -> Result<String, ModelError> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).chars().take(500).collect(),
            });
        }

        let json: serde_json::Value = match std::str::from_utf8(&bytes) {
            Ok(text) => serde_json::from_str(text)
                .map_err(|e| ModelError::Malformed(format!("invalid JSON: {}", e)))?,
            Err(_) => serde_json::from_str(&normalize_utf8(&bytes))
                .map_err(|_| ModelError::Encoding)?,
        };
        parse_chat_response(&json).map(|content| sanitize_text(&content))
    }

    fn transport_error(&self, e: reqwest::Error) -> ModelError {
        if e.is_timeout() {
            ModelError::Timeout(self.timeout_secs)
        } else {
            ModelError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn complete(&self, model: &str, system: &str, user: &str) -> Result<String, ModelError> {
        let body = serde_json::json!({
            "model": normalize_model_id(model, &self.aliases),
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": 0,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(self.backoff_base, attempt)).await;
            }

            match self.attempt(&body).await {
                Ok(text) => return Ok(text),
                Err(e @ (ModelError::Timeout(_) | ModelError::Encoding)) => return Err(e),
                Err(e) => {
                    tracing::debug!(model, attempt, "model request failed: {}", e);
                    last_err = Some(e);
                }
            }
        }

        Err(ModelError::Exhausted {
            attempts: self.max_retries + 1,
            last: last_err.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

/// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, ...
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * (1u32 << attempt.saturating_sub(1).min(5))
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, ModelError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ModelError::Malformed("missing choices[0].message.content".to_string()))
}

/// Map a short model alias to a provider-qualified id.
///
/// Configured aliases win. Ids that already carry a provider (`org/model`)
/// pass through; otherwise the provider is inferred from the model family.
pub fn normalize_model_id(model: &str, aliases: &BTreeMap<String, String>) -> String {
    let model = model.trim();
    if let Some(mapped) = aliases.get(model) {
        return mapped.clone();
    }
    if model.contains('/') {
        return model.to_string();
    }
    let lower = model.to_ascii_lowercase();
    let provider = if lower.starts_with("gpt-")
        || lower.starts_with("o1")
        || lower.starts_with("o3")
        || lower.starts_with("o4")
    {
        Some("openai")
    } else if lower.starts_with("claude") {
        Some("anthropic")
    } else if lower.starts_with("gemini") || lower.starts_with("gemma") {
        Some("google")
    } else if lower.starts_with("llama") {
        Some("meta-llama")
    } else if lower.starts_with("mistral") || lower.starts_with("mixtral") {
        Some("mistralai")
    } else if lower.starts_with("deepseek") {
        Some("deepseek")
    } else if lower.starts_with("qwen") {
        Some("qwen")
    } else {
        None
    };
    match provider {
        Some(p) => format!("{}/{}", p, model),
        None => model.to_string(),
    }
}

/// Decode bytes as UTF-8, dropping invalid sequences.
pub fn normalize_utf8(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

/// Fold Unicode line/paragraph separators to `\n` and drop NULs and
/// replacement characters.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\u{2028}' | '\u{2029}' => Some('\n'),
            '\0' | '\u{FFFD}' => None,
            other => Some(other),
        })
        .collect()
}
