//! Code-block placeholders and paragraph-boundary chunking.
//!
//! Fenced code blocks are lifted out of a document before chunking and each
//! one is replaced by a single `CODE_BLOCK_<n>` line, so the model never sees
//! code and a chunk boundary never falls inside a block.
//!
//! The remaining text is split on `\n\n` into pieces that are packed into
//! chunks of at most `max_bytes` (a single oversized piece still becomes its
//! own chunk). Joining the chunks with `"\n\n"` always reproduces the input.
//! Each chunk carries a SHA-256 hash of its text for cache lookups.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::lines::is_fence;
use crate::models::Chunk;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*CODE_BLOCK_(\d+)\s*$").expect("placeholder regex"));

pub fn placeholder(index: usize) -> String {
    format!("CODE_BLOCK_{}", index)
}

/// Index of the placeholder on `line`, if the line is one.
pub fn placeholder_index(line: &str) -> Option<usize> {
    PLACEHOLDER_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Replace every fenced code block with a placeholder line.
///
/// Blocks include both fence lines. A block still open at end of input is
/// captured as-is.
pub fn extract_code_blocks(text: &str) -> (String, Vec<String>) {
    let mut out: Vec<String> = Vec::new();
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut inside = false;

    for line in text.split('\n') {
        if inside {
            current.push(line);
            if is_fence(line) {
                out.push(placeholder(blocks.len()));
                blocks.push(current.join("\n"));
                current.clear();
                inside = false;
            }
        } else if is_fence(line) {
            current.push(line);
            inside = true;
        } else {
            out.push(line.to_string());
        }
    }

    if inside {
        out.push(placeholder(blocks.len()));
        blocks.push(current.join("\n"));
    }

    (out.join("\n"), blocks)
}

/// Put code blocks back in place of their placeholders. Placeholders with
/// an unknown index are left untouched.
pub fn restore_code_blocks(text: &str, blocks: &[String]) -> String {
    text.split('\n')
        .map(|line| match placeholder_index(line).and_then(|i| blocks.get(i)) {
            Some(block) => block.as_str(),
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split placeholderized text into paragraph-aligned chunks of at most
/// `max_bytes`. Empty input yields no chunks.
///
/// The extra newlines of a run of three or more stay with the preceding
/// chunk; the paragraph after them is sized like any other. A chunk holding
/// only blank lines is never closed. Only the first chunk of a document can
/// start with a blank line. A single paragraph longer than `max_bytes`
/// becomes a chunk of its own.
pub fn split_into_chunks(text: &str, max_bytes: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current: Option<String> = None;

    for piece in text.split("\n\n") {
        current = match current.take() {
            None => Some(piece.to_string()),
            Some(mut buf) => {
                let rest = piece.trim_start_matches('\n');
                if rest.is_empty() {
                    buf.push_str("\n\n");
                    buf.push_str(piece);
                    Some(buf)
                } else {
                    buf.push_str(&piece[..piece.len() - rest.len()]);
                    if !buf.trim().is_empty() && buf.len() + 2 + rest.len() > max_bytes {
                        chunks.push(buf);
                        Some(rest.to_string())
                    } else {
                        buf.push_str("\n\n");
                        buf.push_str(rest);
                        Some(buf)
                    }
                }
            }
        };
    }

    if let Some(buf) = current {
        chunks.push(buf);
    }
    chunks
}

/// Pack lines into newline-joined chunks of at most `max_bytes`. Used for
/// YAML values, where every line is an independent unit.
pub fn split_lines_into_chunks(lines: &[String], max_bytes: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut count = 0usize;

    for line in lines {
        if count > 0 && buf.len() + 1 + line.len() > max_bytes {
            chunks.push(std::mem::take(&mut buf));
            count = 0;
        }
        if count > 0 {
            buf.push('\n');
        }
        buf.push_str(line);
        count += 1;
    }

    if count > 0 {
        chunks.push(buf);
    }
    chunks
}

/// Chunk placeholderized text and hash each chunk.
pub fn chunk_text(text: &str, max_bytes: usize) -> Vec<Chunk> {
    split_into_chunks(text, max_bytes)
        .into_iter()
        .enumerate()
        .map(|(index, text)| make_chunk(index, text))
        .collect()
}

pub fn make_chunk(index: usize, text: String) -> Chunk {
    let hash = hash_text(&text);
    Chunk { index, text, hash }
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A chunk that is nothing but one code placeholder (plus blank lines).
pub fn is_placeholder_only(text: &str) -> bool {
    let mut non_blank = text.lines().filter(|l| !l.trim().is_empty());
    matches!(
        (non_blank.next(), non_blank.next()),
        (Some(line), None) if placeholder_index(line).is_some()
    )
}
