//! Values-only translation of front-matter-only documents.
//!
//! A document that is nothing but a `---` delimited YAML block has no prose
//! for the markdown chain to work on. Instead, the human-readable scalar
//! and list values are pulled out into [`ValueSlot`]s, translated as a
//! newline-joined list, and spliced back between their original prefix
//! (indentation, key, opening quote) and suffix (closing quote, comment).
//!
//! Skipped values: empty, numeric, boolean/null, URLs and paths, a lone HTML
//! tag, flow collections, anchors and aliases, and everything under a key
//! listed in `translation.yaml_exclude_keys` (including list items and
//! block scalars nested below it).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::lines::{is_blank, is_yaml_delimiter, split_lines};

static KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)([\w.\-]+)(\s*:)(\s*)(.*)$").expect("yaml key regex"));
static ITEM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\s*-\s+)(.*)$").expect("yaml item regex"));
static BLOCK_INDICATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[|>][-+]?\d*\s*(#.*)?$").expect("block indicator regex"));
static NUMERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+]?(\d[\d_]*)?(\.\d+)?([eE][-+]?\d+)?$").expect("numeric regex"));
static URL_LIKE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-zA-Z][a-zA-Z0-9+.\-]*://|mailto:|/|\./|\.\./|#)\S*$").expect("url regex")
});
static HTML_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<[^<>]+>$").expect("html tag regex"));
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}([T ][\d:.+\-Z]*)?$").expect("date regex"));

/// One translatable value inside a front-matter line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSlot {
    /// Index of the line in the document.
    pub line: usize,
    pub prefix: String,
    pub suffix: String,
    pub value: String,
}

/// True when the text is a single YAML front-matter block with nothing but
/// blank lines after the closing delimiter.
pub fn is_front_matter_only(text: &str) -> bool {
    let lines = split_lines(text);
    if lines.len() < 2 || !is_yaml_delimiter(lines[0]) {
        return false;
    }
    match lines.iter().skip(1).position(|l| is_yaml_delimiter(l)) {
        Some(pos) => lines[pos + 2..].iter().all(|l| is_blank(l)),
        None => false,
    }
}

/// Extract the translatable values of a front-matter-only document.
pub fn plan_values(text: &str, exclude_keys: &[String]) -> Vec<ValueSlot> {
    let lines = split_lines(text);
    let excluded = |key: &str| exclude_keys.iter().any(|k| k.eq_ignore_ascii_case(key));

    let mut slots = Vec::new();
    // (indent, excluded) of the keys enclosing the current line
    let mut parents: Vec<(usize, bool)> = Vec::new();
    // (indent of the owning key, excluded) while inside a block scalar
    let mut block: Option<(usize, bool)> = None;

    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            continue;
        }
        if is_yaml_delimiter(line) {
            break;
        }
        if is_blank(line) {
            continue;
        }
        let indent = line.len() - line.trim_start().len();

        if let Some((owner, skip)) = block {
            if indent > owner {
                if !skip {
                    let body = line.trim_start();
                    slots.push(ValueSlot {
                        line: i,
                        prefix: line[..indent].to_string(),
                        suffix: String::new(),
                        value: body.trim_end().to_string(),
                    });
                }
                continue;
            }
            block = None;
        }
        if line.trim_start().starts_with('#') {
            continue;
        }

        while parents.last().is_some_and(|(p, _)| *p >= indent) {
            parents.pop();
        }
        let inherited = parents.iter().any(|(_, skip)| *skip);

        // List items may carry their own `key: value` mapping.
        let (item_prefix, rest) = match ITEM_RE.captures(line) {
            Some(c) => {
                let prefix = c.get(1).map_or("", |m| m.as_str());
                (prefix, &line[prefix.len()..])
            }
            None => ("", *line),
        };

        if let Some(c) = KEY_RE.captures(rest) {
            let key = &c[2];
            let skip = inherited || excluded(key);
            let value = &c[5];
            let key_indent = if item_prefix.is_empty() { indent } else { item_prefix.len() };

            if value.is_empty() || value.starts_with('#') {
                parents.push((key_indent, skip));
                continue;
            }
            if BLOCK_INDICATOR_RE.is_match(value) {
                block = Some((key_indent.min(indent), skip));
                continue;
            }
            if skip {
                continue;
            }
            let head = line.len() - value.len();
            if let Some(slot) = value_slot(i, &line[..head], value) {
                slots.push(slot);
            }
        } else if !item_prefix.is_empty() && !inherited {
            if let Some(slot) = value_slot(i, item_prefix, rest) {
                slots.push(slot);
            }
        }
    }
    slots
}

/// Split a raw scalar into quote/comment framing and the inner value.
fn value_slot(line: usize, head: &str, raw: &str) -> Option<ValueSlot> {
    let raw = raw.trim_end();
    let (open, inner, close) = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let end = raw[1..].rfind(q)? + 1;
            (&raw[..1], &raw[1..end], &raw[end..])
        }
        _ => match raw.find(" #") {
            Some(pos) => ("", raw[..pos].trim_end(), &raw[raw[..pos].trim_end().len()..]),
            None => ("", raw, ""),
        },
    };
    if !is_translatable(inner) {
        return None;
    }
    Some(ValueSlot {
        line,
        prefix: format!("{}{}", head, open),
        suffix: close.to_string(),
        value: inner.to_string(),
    })
}

fn is_translatable(value: &str) -> bool {
    let v = value.trim();
    if v.is_empty() || NUMERIC_RE.is_match(v) || DATE_RE.is_match(v) {
        return false;
    }
    if matches!(
        v.to_ascii_lowercase().as_str(),
        "true" | "false" | "yes" | "no" | "null" | "~" | "on" | "off"
    ) {
        return false;
    }
    if URL_LIKE_RE.is_match(v) || HTML_TAG_RE.is_match(v) {
        return false;
    }
    !(v.starts_with('[') || v.starts_with('{') || v.starts_with('&') || v.starts_with('*'))
}

/// The values in slot order, one line each.
pub fn slot_values(slots: &[ValueSlot]) -> Vec<String> {
    slots.iter().map(|s| s.value.clone()).collect()
}

/// Put translated values back into their slots. Missing values keep the
/// original; extras are ignored.
pub fn apply_values(text: &str, slots: &[ValueSlot], translated: &[String]) -> String {
    let mut lines: Vec<String> = split_lines(text).into_iter().map(str::to_string).collect();
    for (idx, slot) in slots.iter().enumerate() {
        let value = translated
            .get(idx)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or(slot.value.as_str());
        if let Some(line) = lines.get_mut(slot.line) {
            *line = format!("{}{}{}", slot.prefix, quote_for(slot, value), slot.suffix);
        }
    }
    let mut out = lines.join("\n");
    if text.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Escape a translated value for the quoting style of its slot. Unquoted
/// values that would change meaning in YAML get double quotes.
fn quote_for(slot: &ValueSlot, value: &str) -> String {
    if slot.prefix.trim().is_empty() {
        // block scalar body
        return value.to_string();
    }
    if slot.prefix.ends_with('"') {
        return value.replace('\\', "\\\\").replace('"', "\\\"");
    }
    if slot.prefix.ends_with('\'') {
        return value.replace('\'', "''");
    }
    let risky = value.contains(": ")
        || value.contains(" #")
        || value.starts_with(['"', '\'', '[', '{', '&', '*', '!', '|', '>', '%', '@', '`']);
    if risky && !slot.value.contains(": ") {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Vec<String> {
        vec!["layout".to_string(), "permalink".to_string(), "tags".to_string()]
    }

    const DOC: &str = "---
layout: page
title: Getting started
description: \"Install the tool\"
order: 3
homepage: https://x.example
icon: <i>
tags:
  - internal
  - beta
features:
  - Fast builds # core
  - name: Caching
    link: /cache
summary: |
  First line.
  Second line.
permalink: >
  /docs/start
---
";

    #[test]
    fn detects_front_matter_only() {
        assert!(is_front_matter_only(DOC));
        assert!(is_front_matter_only("---\ntitle: x\n---\n\n"));
        assert!(!is_front_matter_only("---\ntitle: x\n---\nBody"));
        assert!(!is_front_matter_only("title: x"));
        assert!(!is_front_matter_only("---\ntitle: x"));
    }

    #[test]
    fn plans_only_human_values() {
        let slots = plan_values(DOC, &keys());
        let values: Vec<&str> = slots.iter().map(|s| s.value.as_str()).collect();
        assert_eq!(
            values,
            vec![
                "Getting started",
                "Install the tool",
                "Fast builds",
                "Caching",
                "First line.",
                "Second line.",
            ]
        );
        let desc = &slots[1];
        assert_eq!(desc.prefix, "description: \"");
        assert_eq!(desc.suffix, "\"");
        let item = &slots[2];
        assert_eq!(item.prefix, "  - ");
        assert_eq!(item.suffix, " # core");
    }

    #[test]
    fn applies_translations_in_place() {
        let slots = plan_values(DOC, &keys());
        let translated: Vec<String> = [
            "Erste Schritte",
            "Das \"Tool\" installieren",
            "Schnelle Builds",
            "Zwischenspeicher",
            "Erste Zeile.",
            "Zweite Zeile.",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let out = apply_values(DOC, &slots, &translated);
        assert!(out.contains("title: Erste Schritte\n"));
        assert!(out.contains("description: \"Das \\\"Tool\\\" installieren\"\n"));
        assert!(out.contains("  - Schnelle Builds # core\n"));
        assert!(out.contains("  - name: Zwischenspeicher\n"));
        assert!(out.contains("    link: /cache\n"));
        assert!(out.contains("  Zweite Zeile.\n"));
        assert!(out.contains("layout: page\n"));
        assert!(out.contains("  /docs/start\n"));
        assert_eq!(out.lines().count(), DOC.lines().count());
        assert!(out.ends_with("---\n"));
    }

    #[test]
    fn risky_unquoted_values_get_quoted() {
        let doc = "---\ntitle: Hello\n---\n";
        let slots = plan_values(doc, &[]);
        let out = apply_values(doc, &slots, &["Note: read this".to_string()]);
        assert_eq!(out, "---\ntitle: \"Note: read this\"\n---\n");
    }

    #[test]
    fn missing_translation_keeps_original() {
        let doc = "---\ntitle: Hello\nsubtitle: World\n---\n";
        let slots = plan_values(doc, &[]);
        let out = apply_values(doc, &slots, &["Hallo".to_string()]);
        assert_eq!(out, "---\ntitle: Hallo\nsubtitle: World\n---\n");
    }
}
