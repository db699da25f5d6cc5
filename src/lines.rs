//! Tagged-line classification shared by the chunker, validator and repairs.
//!
//! Every markdown line is tagged once with a [`LineKind`]. The structural
//! checks compare these tags index-for-index between a source text and its
//! translation, so the rules here decide what "same skeleton" means.
//!
//! Precedence when a line could match several kinds:
//! `Blank` > `Fence` > `CommentOnly` > YAML front matter > `ListItem` > `Content`.

use once_cell::sync::Lazy;
use regex::Regex;

/// A fence marker, optionally behind list markers or indentation.
static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:(?:[-*+]|\d+[.)])\s+)*```").expect("fence regex"));

static LIST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*(?:[-*]|\d+[.)])\s+)").expect("list regex"));

/// Markdown links; group 1 is `!` for images, group 2 the URL.
static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(!?)\[[^\]]*\]\(\s*<?([^()\s<>]+)>?(?:\s+"[^"]*")?\s*\)"#).expect("link regex")
});

static HEADING_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*#{1,6}\s*$").expect("heading regex"));

/// Structural role of a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    Fence,
    CommentOnly,
    ListItem,
    YamlDelimiter,
    YamlFrontMatter,
    Content,
}

impl LineKind {
    /// Lines that are copied from the source verbatim instead of being
    /// taken from a translation.
    pub fn is_literal(self) -> bool {
        matches!(
            self,
            LineKind::Blank
                | LineKind::Fence
                | LineKind::CommentOnly
                | LineKind::YamlDelimiter
                | LineKind::YamlFrontMatter
        )
    }
}

/// Line terminator used by a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn detect(text: &str) -> Self {
        if text.contains("\r\n") {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        }
    }

    /// Convert LF-normalized text back to this ending.
    pub fn apply(self, text: &str) -> String {
        match self {
            LineEnding::Lf => text.to_string(),
            LineEnding::CrLf => text.replace('\n', "\r\n"),
        }
    }
}

pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// Split into lines the same way for every comparison. A trailing newline
/// does not produce an extra empty line.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.lines().collect()
}

pub fn line_count(text: &str) -> usize {
    text.lines().count()
}

pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

pub fn is_fence(line: &str) -> bool {
    FENCE_RE.is_match(line)
}

/// A line that is nothing but an HTML comment, or a lone comment opener.
pub fn is_comment_only(line: &str) -> bool {
    let t = line.trim();
    t == "<!--" || (t.starts_with("<!--") && t.ends_with("-->"))
}

pub fn is_list_item(line: &str) -> bool {
    LIST_RE.is_match(line)
}

/// The marker prefix of a list item (indentation, marker and trailing
/// whitespace), if the line is one.
pub fn list_prefix(line: &str) -> Option<&str> {
    LIST_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn is_yaml_delimiter(line: &str) -> bool {
    line.trim_end() == "---"
}

/// A heading line consisting only of `#` markers.
pub fn is_orphan_heading(line: &str) -> bool {
    HEADING_MARKER_RE.is_match(line)
}

/// Content line that carries an inline HTML comment next to prose.
pub fn has_inline_comment(line: &str) -> bool {
    line.contains("<!--") && !is_comment_only(line)
}

/// Classify one line without front-matter context.
pub fn classify_line(line: &str) -> LineKind {
    if is_blank(line) {
        LineKind::Blank
    } else if is_fence(line) {
        LineKind::Fence
    } else if is_comment_only(line) {
        LineKind::CommentOnly
    } else if is_list_item(line) {
        LineKind::ListItem
    } else {
        LineKind::Content
    }
}

/// Where a text begins within its document.
///
/// YAML front matter can only open on the first line of a document.
/// Anywhere else a `---` line is a thematic break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Start {
    #[default]
    Top,
    Inside,
}

impl Start {
    /// Position of the chunk with index `index`.
    pub fn of_chunk(index: usize) -> Self {
        if index == 0 {
            Start::Top
        } else {
            Start::Inside
        }
    }
}

/// Classify every line of a document. A document whose first line is
/// `---` opens a YAML front-matter block that runs until the next `---`
/// line (or the end of the text when unterminated).
pub fn classify(text: &str) -> Vec<LineKind> {
    classify_from(text, Start::Top)
}

/// Classify every line of a text that begins at `start`.
pub fn classify_from(text: &str, start: Start) -> Vec<LineKind> {
    let lines = split_lines(text);
    let mut kinds = Vec::with_capacity(lines.len());
    let mut in_front_matter =
        start == Start::Top && lines.first().is_some_and(|l| is_yaml_delimiter(l));

    for (i, line) in lines.iter().enumerate() {
        if in_front_matter {
            if i == 0 {
                kinds.push(LineKind::YamlDelimiter);
                continue;
            }
            if is_yaml_delimiter(line) {
                kinds.push(LineKind::YamlDelimiter);
                in_front_matter = false;
                continue;
            }
            if is_blank(line) {
                kinds.push(LineKind::Blank);
            } else {
                kinds.push(LineKind::YamlFrontMatter);
            }
            continue;
        }
        kinds.push(classify_line(line));
    }
    kinds
}

/// URLs of markdown links on a line, in order of appearance. Image links
/// (`![alt](src)`) are not included.
pub fn link_urls(line: &str) -> Vec<&str> {
    LINK_RE
        .captures_iter(line)
        .filter(|c| c.get(1).map_or("", |m| m.as_str()) != "!")
        .filter_map(|c| c.get(2).map(|m| m.as_str()))
        .collect()
}

/// Replace link URLs on `line` with `urls`, in order. Extra links keep
/// their own URL.
pub fn replace_link_urls(line: &str, urls: &[&str]) -> String {
    let mut out = String::with_capacity(line.len());
    let mut pos = 0usize;
    let mut next = 0usize;
    for caps in LINK_RE.captures_iter(line) {
        if caps.get(1).map_or("", |m| m.as_str()) == "!" {
            continue;
        }
        let (Some(url_match), Some(replacement)) = (caps.get(2), urls.get(next)) else {
            continue;
        };
        next += 1;
        out.push_str(&line[pos..url_match.start()]);
        out.push_str(replacement);
        pos = url_match.end();
    }
    out.push_str(&line[pos..]);
    out
}

/// Number of trailing blank lines in a text.
pub fn trailing_blank_lines(text: &str) -> usize {
    split_lines(text)
        .iter()
        .rev()
        .take_while(|l| is_blank(l))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_basic_kinds() {
        assert_eq!(classify_line(""), LineKind::Blank);
        assert_eq!(classify_line("   "), LineKind::Blank);
        assert_eq!(classify_line("```rust"), LineKind::Fence);
        assert_eq!(classify_line("  - ```"), LineKind::Fence);
        assert_eq!(classify_line("<!-- note -->"), LineKind::CommentOnly);
        assert_eq!(classify_line("<!--"), LineKind::CommentOnly);
        assert_eq!(classify_line("- item"), LineKind::ListItem);
        assert_eq!(classify_line("  12) item"), LineKind::ListItem);
        assert_eq!(classify_line("3. item"), LineKind::ListItem);
        assert_eq!(classify_line("Text <!-- x --> more"), LineKind::Content);
        assert_eq!(classify_line("-not a list"), LineKind::Content);
        assert_eq!(classify_line("---"), LineKind::Content);
    }

    #[test]
    fn thematic_break_inside_document_is_not_front_matter() {
        let text = "---\n- apples\n<!-- keep -->";
        assert_eq!(classify(text)[1], LineKind::YamlFrontMatter);
        assert_eq!(
            classify_from(text, Start::Inside),
            vec![LineKind::Content, LineKind::ListItem, LineKind::CommentOnly]
        );
        assert_eq!(Start::of_chunk(0), Start::Top);
        assert_eq!(Start::of_chunk(3), Start::Inside);
    }

    #[test]
    fn front_matter_is_tagged() {
        let kinds = classify("---\ntitle: Hello\n- x\n---\n\n- item");
        assert_eq!(
            kinds,
            vec![
                LineKind::YamlDelimiter,
                LineKind::YamlFrontMatter,
                LineKind::YamlFrontMatter,
                LineKind::YamlDelimiter,
                LineKind::Blank,
                LineKind::ListItem,
            ]
        );
    }

    #[test]
    fn line_count_ignores_final_newline() {
        assert_eq!(line_count("A\n\nB\n\nC\n"), 5);
        assert_eq!(line_count("A\r\n\r\nB"), 3);
        assert_eq!(line_count(""), 0);
    }

    #[test]
    fn link_urls_skip_images() {
        let line = "See [docs](https://x.example/page) and ![logo](img.png) or [b](/rel \"t\").";
        assert_eq!(link_urls(line), vec!["https://x.example/page", "/rel"]);
    }

    #[test]
    fn replace_link_urls_in_order() {
        let line = "[a](https://wrong) and [b](two)";
        let fixed = replace_link_urls(line, &["https://right", "2"]);
        assert_eq!(fixed, "[a](https://right) and [b](2)");
    }

    #[test]
    fn list_prefix_keeps_indent() {
        assert_eq!(list_prefix("   * thing"), Some("   * "));
        assert_eq!(list_prefix("10. ten"), Some("10. "));
        assert_eq!(list_prefix("plain"), None);
    }

    #[test]
    fn line_ending_round_trip() {
        let text = "a\r\nb\r\n";
        let ending = LineEnding::detect(text);
        assert_eq!(ending, LineEnding::CrLf);
        assert_eq!(ending.apply(&normalize_newlines(text)), text);
    }

    #[test]
    fn trailing_blank_count() {
        assert_eq!(trailing_blank_lines("a\n\n\n"), 2);
        assert_eq!(trailing_blank_lines("a"), 0);
    }
}
