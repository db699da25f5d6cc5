//! Structural validation of a translation against its source.
//!
//! [`Validator::validate_detailed`] runs the checks below in a fixed order and
//! reports the first failure, so a retried translation fails the same way for
//! the same input:
//!
//! | # | Reason | Rule |
//! |---|--------|------|
//! | 1 | `line-count` | same number of lines |
//! | 2 | `code-fence` | fence lines at the same indices |
//! | 3 | `empty-line` | blank lines at the same indices |
//! | 4 | `list-item` | list items at the same indices |
//! | 5 | `html-comment` | comment-only lines at the same indices, byte-identical |
//! | 6 | `link-url` | link URLs on a target line are a subset of the source line's |
//! | 7 | `untranslated` | token Jaccard and LCS ratio both at or above threshold |
//!
//! Check 7 is a heuristic against a model echoing its input. It can fire on
//! short or terminology-heavy text, which is why its thresholds are
//! configurable.
//!
//! [`Validator::lenient_match`] is the looser skeleton comparison used to
//! accept cache hits and gate per-model chunk results.

use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::chunk::placeholder_index;
use crate::config::HeuristicsConfig;
use crate::lines::{classify_from, link_urls, split_lines, LineKind, Start};

static CODE_SPAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`]*`").expect("code span regex"));
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("url regex"));
static LINK_TARGET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\]\([^)]*\)").expect("link target regex"));
static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex"));
static NON_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("non-word regex"));

/// Why a candidate translation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    LineCount,
    CodeFence,
    EmptyLine,
    ListItem,
    HtmlComment,
    LinkUrl,
    Untranslated,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::LineCount => "line-count",
            Reason::CodeFence => "code-fence",
            Reason::EmptyLine => "empty-line",
            Reason::ListItem => "list-item",
            Reason::HtmlComment => "html-comment",
            Reason::LinkUrl => "link-url",
            Reason::Untranslated => "untranslated",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`Validator::validate_detailed`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub ok: bool,
    pub reason: Option<Reason>,
    /// Zero-based line index of the first mismatch.
    pub line: Option<usize>,
    pub source: Option<String>,
    pub target: Option<String>,
    pub source_lines: usize,
    pub target_lines: usize,
    pub jaccard: Option<f64>,
    pub lcs_ratio: Option<f64>,
}

impl ValidationResult {
    fn pass(source_lines: usize, target_lines: usize) -> Self {
        Self {
            ok: true,
            source_lines,
            target_lines,
            ..Default::default()
        }
    }

    fn fail_at(
        reason: Reason,
        line: usize,
        source: Option<&str>,
        target: Option<&str>,
        source_lines: usize,
        target_lines: usize,
    ) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            line: Some(line),
            source: source.map(str::to_string),
            target: target.map(str::to_string),
            source_lines,
            target_lines,
            ..Default::default()
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.reason, self.line) {
            (None, _) => write!(f, "ok"),
            (Some(Reason::LineCount), _) => write!(
                f,
                "line-count (source {} lines, target {} lines)",
                self.source_lines, self.target_lines
            ),
            (Some(Reason::Untranslated), _) => write!(
                f,
                "untranslated (jaccard {:.2}, lcs {:.2})",
                self.jaccard.unwrap_or_default(),
                self.lcs_ratio.unwrap_or_default()
            ),
            (Some(reason), Some(line)) => write!(
                f,
                "{} at line {}: {:?} -> {:?}",
                reason,
                line + 1,
                self.source.as_deref().unwrap_or(""),
                self.target.as_deref().unwrap_or("")
            ),
            (Some(reason), None) => write!(f, "{}", reason),
        }
    }
}

/// Structural validator with tunable heuristic thresholds.
#[derive(Debug, Clone)]
pub struct Validator {
    pub untranslated_jaccard: f64,
    pub untranslated_lcs: f64,
    /// Source texts with fewer tokens than this skip the copy heuristic.
    pub untranslated_min_tokens: usize,
    /// Fraction of compared lines allowed to differ in [`Validator::lenient_match`].
    pub lenient_tolerance: f64,
    /// Where the compared texts begin. Whole documents start at the top.
    pub start: Start,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            untranslated_jaccard: 0.8,
            untranslated_lcs: 0.8,
            untranslated_min_tokens: 3,
            lenient_tolerance: 0.3,
            start: Start::Top,
        }
    }
}

impl Validator {
    pub fn from_config(config: &HeuristicsConfig) -> Self {
        Self {
            untranslated_jaccard: config.untranslated_jaccard,
            untranslated_lcs: config.untranslated_lcs,
            untranslated_min_tokens: config.untranslated_min_tokens,
            lenient_tolerance: config.lenient_tolerance,
            start: Start::Top,
        }
    }

    /// The same validator for texts that begin at `start`, such as chunks.
    pub fn starting(&self, start: Start) -> Self {
        Self {
            start,
            ..self.clone()
        }
    }

    pub fn validate(&self, source: &str, target: &str) -> bool {
        self.validate_detailed(source, target).ok
    }

    /// All seven checks, first failure wins.
    pub fn validate_detailed(&self, source: &str, target: &str) -> ValidationResult {
        let structural = self.validate_structure(source, target);
        if !structural.ok {
            return structural;
        }
        let (jaccard, lcs_ratio) = match self.copy_similarity(source, target) {
            Some(pair) => pair,
            None => return structural,
        };
        if jaccard >= self.untranslated_jaccard && lcs_ratio >= self.untranslated_lcs {
            return ValidationResult {
                ok: false,
                reason: Some(Reason::Untranslated),
                jaccard: Some(jaccard),
                lcs_ratio: Some(lcs_ratio),
                ..structural
            };
        }
        ValidationResult {
            jaccard: Some(jaccard),
            lcs_ratio: Some(lcs_ratio),
            ..structural
        }
    }

    /// Checks 1 through 6 only.
    pub fn validate_structure(&self, source: &str, target: &str) -> ValidationResult {
        let src_lines = split_lines(source);
        let tgt_lines = split_lines(target);
        let (sn, tn) = (src_lines.len(), tgt_lines.len());

        if sn != tn {
            return ValidationResult {
                ok: false,
                reason: Some(Reason::LineCount),
                source_lines: sn,
                target_lines: tn,
                ..Default::default()
            };
        }

        let src_kinds = classify_from(source, self.start);
        let tgt_kinds = classify_from(target, self.start);
        let fail = |reason, i: usize| {
            ValidationResult::fail_at(reason, i, Some(src_lines[i]), Some(tgt_lines[i]), sn, tn)
        };

        let positional = [
            (LineKind::Fence, Reason::CodeFence),
            (LineKind::Blank, Reason::EmptyLine),
            (LineKind::ListItem, Reason::ListItem),
            (LineKind::CommentOnly, Reason::HtmlComment),
        ];
        for (kind, reason) in positional {
            for i in 0..sn {
                if (src_kinds[i] == kind) != (tgt_kinds[i] == kind) {
                    return fail(reason, i);
                }
                if kind == LineKind::CommentOnly && src_kinds[i] == kind && src_lines[i] != tgt_lines[i]
                {
                    return fail(reason, i);
                }
            }
        }

        for i in 0..sn {
            let tgt_urls = link_urls(tgt_lines[i]);
            if tgt_urls.is_empty() {
                continue;
            }
            let src_urls: HashSet<&str> = link_urls(src_lines[i]).into_iter().collect();
            if tgt_urls.iter().any(|u| !src_urls.contains(u)) {
                return fail(Reason::LinkUrl, i);
            }
        }

        ValidationResult::pass(sn, tn)
    }

    /// Returns `(jaccard, lcs_ratio)` of the two texts' word tokens, or
    /// `None` when the source is too short to judge.
    pub fn copy_similarity(&self, source: &str, target: &str) -> Option<(f64, f64)> {
        let src = tokenize(source);
        let tgt = tokenize(target);
        if src.len() < self.untranslated_min_tokens.max(1) || tgt.is_empty() {
            return None;
        }
        Some((jaccard(&src, &tgt), lcs_ratio(&src, &tgt)))
    }

    /// True when the target looks like an untranslated copy of the source.
    pub fn looks_untranslated(&self, source: &str, target: &str) -> bool {
        matches!(
            self.copy_similarity(source, target),
            Some((j, l)) if j >= self.untranslated_jaccard && l >= self.untranslated_lcs
        )
    }

    /// Tolerant skeleton comparison.
    ///
    /// Lines up to the last non-blank line of either text are compared by
    /// their blank / comment-only / list-item classification. Up to
    /// `floor(tolerance * compared) + 1` mismatching lines are accepted.
    pub fn lenient_match(&self, source: &str, target: &str) -> bool {
        let src = skeleton(source, self.start);
        let tgt = skeleton(target, self.start);
        let last = |s: &[Skeleton]| s.iter().rposition(|k| !k.blank).map_or(0, |i| i + 1);
        let compared = last(&src).max(last(&tgt));
        if compared == 0 {
            return true;
        }

        let blank = Skeleton {
            blank: true,
            comment: false,
            list: false,
        };
        let mismatches = (0..compared)
            .filter(|&i| src.get(i).unwrap_or(&blank) != tgt.get(i).unwrap_or(&blank))
            .count();
        let allowed = (self.lenient_tolerance * compared as f64).floor() as usize + 1;
        mismatches <= allowed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Skeleton {
    blank: bool,
    comment: bool,
    list: bool,
}

fn skeleton(text: &str, start: Start) -> Vec<Skeleton> {
    classify_from(text, start)
        .into_iter()
        .map(|k| Skeleton {
            blank: k == LineKind::Blank,
            comment: k == LineKind::CommentOnly,
            list: k == LineKind::ListItem,
        })
        .collect()
}

/// Lower-cased word tokens with code spans, URLs, link targets, comments and
/// code placeholders removed.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let without_comments = COMMENT_RE.replace_all(&lowered, " ");
    let without_code = CODE_SPAN_RE.replace_all(&without_comments, " ");
    let without_links = LINK_TARGET_RE.replace_all(&without_code, " ");
    let without_urls = URL_RE.replace_all(&without_links, " ");

    without_urls
        .lines()
        .filter(|l| placeholder_index(&l.to_uppercase()).is_none())
        .flat_map(|l| NON_WORD_RE.split(l))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    let sa: HashSet<&String> = a.iter().collect();
    let sb: HashSet<&String> = b.iter().collect();
    let union = sa.union(&sb).count();
    if union == 0 {
        return 0.0;
    }
    sa.intersection(&sb).count() as f64 / union as f64
}

/// Longest common subsequence length over the longer sequence's length.
fn lcs_ratio(a: &[String], b: &[String]) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 0.0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            cur[j + 1] = if x == y {
                prev[j] + 1
            } else {
                cur[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()] as f64 / longest as f64
}
