//! Mock chat model for testing
//!
//! A deterministic, network-free [`ChatModel`] for exercising the pipeline
//! without an API key. [`MockMode::Rot13`] acts as a pseudo-translation:
//! prose letters are rotated while markdown syntax, link targets, inline
//! code, comment-only lines and code placeholders pass through untouched,
//! so the output keeps the source's line skeleton but no longer looks like
//! a copy of it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::chunk::placeholder_index;
use crate::client::ChatModel;
use crate::error::ModelError;
use crate::lines::{is_comment_only, is_fence};

/// How the mock answers.
#[derive(Debug, Clone)]
pub enum MockMode {
    /// Pseudo-translate the user message (ROT13 on prose letters).
    Rot13,
    /// Return the user message unchanged.
    Echo,
    /// Always return this text.
    Fixed(String),
    /// Always fail with this error.
    Fail(ModelError),
}

/// Mock model with per-model behaviour and call accounting.
#[derive(Debug)]
pub struct MockModel {
    default: MockMode,
    per_model: HashMap<String, MockMode>,
    scripted: Mutex<VecDeque<Result<String, ModelError>>>,
    calls: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl MockModel {
    pub fn new(mode: MockMode) -> Self {
        Self {
            default: mode,
            per_model: HashMap::new(),
            scripted: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Use `mode` for requests to `model` instead of the default.
    pub fn with_model(mut self, model: &str, mode: MockMode) -> Self {
        self.per_model.insert(model.to_string(), mode);
        self
    }

    /// Queue replies that are returned, in order, before the mode applies.
    pub fn with_script(self, replies: Vec<Result<String, ModelError>>) -> Self {
        if let Ok(mut q) = self.scripted.lock() {
            q.extend(replies);
        }
        self
    }

    /// Number of requests received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Models requested so far, in order.
    pub fn models_called(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for MockModel {
    async fn complete(&self, model: &str, _system: &str, user: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.log.lock() {
            log.push(model.to_string());
        }
        if let Some(reply) = self.scripted.lock().ok().and_then(|mut q| q.pop_front()) {
            return reply;
        }
        match self.per_model.get(model).unwrap_or(&self.default) {
            MockMode::Rot13 => Ok(pseudo_translate(user)),
            MockMode::Echo => Ok(user.to_string()),
            MockMode::Fixed(text) => Ok(text.clone()),
            MockMode::Fail(e) => Err(e.clone()),
        }
    }
}

/// ROT13 on the prose parts of a markdown text.
pub fn pseudo_translate(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            if is_fence(line) || is_comment_only(line) || placeholder_index(line).is_some() {
                line.to_string()
            } else {
                rot13_prose(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn rot13_prose(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_code = false;
    let mut in_target = false;
    let mut in_comment = false;
    let mut prev = '\0';
    let mut rest = line;

    while let Some(c) = rest.chars().next() {
        if !in_code && !in_target && rest.starts_with("<!--") {
            in_comment = true;
        }
        if in_comment && rest.starts_with("-->") {
            in_comment = false;
            out.push_str("-->");
            rest = &rest[3..];
            prev = '>';
            continue;
        }
        match c {
            '`' if !in_target && !in_comment => in_code = !in_code,
            '(' if prev == ']' && !in_code && !in_comment => in_target = true,
            ')' if in_target => in_target = false,
            _ => {}
        }
        let keep = in_code || in_target || in_comment;
        out.push(if keep { c } else { rot13(c) });
        prev = c;
        rest = &rest[c.len_utf8()..];
    }
    out
}

fn rot13(c: char) -> char {
    match c {
        'a'..='z' => (((c as u8 - b'a') + 13) % 26 + b'a') as char,
        'A'..='Z' => (((c as u8 - b'A') + 13) % 26 + b'A') as char,
        _ => c,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_translation_keeps_markdown() {
        let src = "## Hello\n\n- See [docs](https://x.example/page) and `code`\n<!-- note -->\nCODE_BLOCK_0\nText <!-- keep --> end";
        let out = pseudo_translate(src);
        assert_eq!(
            out,
            "## Uryyb\n\n- Frr [qbpf](https://x.example/page) naq `code`\n<!-- note -->\nCODE_BLOCK_0\nGrkg <!-- keep --> raq"
        );
    }

    #[tokio::test]
    async fn per_model_and_script() {
        let mock = MockModel::new(MockMode::Echo)
            .with_model("bad", MockMode::Fail(ModelError::Malformed("x".into())))
            .with_script(vec![Ok("first".to_string())]);
        assert_eq!(mock.complete("any", "", "hi").await.unwrap(), "first");
        assert_eq!(mock.complete("any", "", "hi").await.unwrap(), "hi");
        assert!(mock.complete("bad", "", "hi").await.is_err());
        assert_eq!(mock.calls(), 3);
        assert_eq!(mock.models_called(), vec!["any", "any", "bad"]);
    }
}
