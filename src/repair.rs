//! Deterministic repairs applied to model output before validation.
//!
//! Models routinely drift from the source's line skeleton: a heading marker
//! lands on its own line, trailing blank lines vanish, a comment gets
//! translated, two sentences get merged. Each function here fixes one kind
//! of drift using the source text as the reference. [`repair_chunk`] runs
//! the full chain for prose, [`repair_values`] the reduced chain for YAML
//! values.
//!
//! All functions take and return LF-normalized text and keep the target's
//! final newline as it was (except [`align_edge_blank_lines`], whose job is
//! to change it).

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::chunk::{placeholder, placeholder_index};
use crate::lines::{
    classify_from, has_inline_comment, is_blank, is_comment_only, is_orphan_heading, line_count,
    link_urls, list_prefix, replace_link_urls, split_lines, LineKind, Start,
};

/// Placeholders as models tend to mangle them: wrapped in backticks or
/// emphasis, lower-cased, with spaces instead of underscores.
static LOOSE_PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*[`*_]*\s*code[_ -]?block[_ -]?(\d+)\s*[`*_]*\s*$")
        .expect("loose placeholder regex")
});

/// Link with its text captured: 1 = `!`, 2 = text, 3 = URL.
static LINK_WITH_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(!?)\[([^\]]*)\]\(\s*<?([^()\s<>]+)>?(?:\s+"[^"]*")?\s*\)"#)
        .expect("link text regex")
});

static QUOTED_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\]\(\s*["'“”‘’]\s*(https?://)"#).expect("quoted url regex")
});
static SPLIT_SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(https?)\s*:\s*/\s*/\s*").expect("split scheme regex"));
static URL_TRAILING_QUOTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(https?://[^\s)"'“”‘’]+)\s*["'“”‘’]\s*\)"#).expect("url quote regex")
});

/// Full repair chain for a prose chunk beginning at `start`, in order.
pub fn repair_chunk(source: &str, target: &str, start: Start) -> String {
    let t = merge_orphan_headings(source, target);
    let t = align_edge_blank_lines(source, &t);
    let t = restore_comment_lines(source, &t, start);
    let t = if line_count(&t) != line_count(source) {
        resync_structure(source, &t, start)
    } else {
        t
    };
    let t = restore_list_prefixes(source, &t, start);
    let t = restore_link_urls(source, &t);
    normalize_placeholders(source, &t)
}

/// Reduced chain for newline-joined YAML values: fix the line count, then
/// links and placeholders.
pub fn repair_values(source: &str, target: &str) -> String {
    let t = fit_line_count(source, target.trim_end_matches('\n'));
    let t = restore_link_urls(source, &t);
    normalize_placeholders(source, &t)
}

fn rejoin(lines: Vec<String>, like: &str) -> String {
    let mut out = lines.join("\n");
    if like.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn owned_lines(text: &str) -> Vec<String> {
    split_lines(text).into_iter().map(str::to_string).collect()
}

/// Join a heading marker the model left alone on a line with the text on
/// the next line. Only applied when the target has more lines than the
/// source.
pub fn merge_orphan_headings(source: &str, target: &str) -> String {
    if line_count(target) <= line_count(source) {
        return target.to_string();
    }
    let lines = split_lines(target);
    let mut out = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if is_orphan_heading(line) && i + 1 < lines.len() && !is_blank(lines[i + 1]) {
            out.push(format!("{} {}", line.trim_end(), lines[i + 1].trim_start()));
            i += 2;
        } else {
            out.push(line.to_string());
            i += 1;
        }
    }
    rejoin(out, target)
}

/// Give the target the same leading newlines and trailing whitespace as the
/// source. Models usually drop both.
pub fn align_edge_blank_lines(source: &str, target: &str) -> String {
    let lead = &source[..source.len() - source.trim_start_matches('\n').len()];
    let tail = &source[source.trim_end().len()..];
    let body = target.trim_start_matches('\n').trim_end();
    format!("{}{}{}", lead, body, tail)
}

/// Put comment-only source lines back verbatim at their index.
///
/// With equal line counts the source line simply overwrites the target
/// line. Otherwise only a comment-only target line is overwritten, and a
/// missing comment is inserted when the target is short.
pub fn restore_comment_lines(source: &str, target: &str, start: Start) -> String {
    let src = split_lines(source);
    let kinds = classify_from(source, start);
    if !kinds.contains(&LineKind::CommentOnly) {
        return target.to_string();
    }
    let mut out = owned_lines(target);

    for (i, kind) in kinds.iter().enumerate() {
        if *kind != LineKind::CommentOnly {
            continue;
        }
        let equal = out.len() == src.len();
        match out.get(i).cloned() {
            Some(line) if line == src[i] => {}
            Some(line) if equal || is_comment_only(&line) => out[i] = src[i].to_string(),
            _ if out.len() < src.len() => out.insert(i.min(out.len()), src[i].to_string()),
            _ => {}
        }
    }
    rejoin(out, target)
}

/// Rebuild the target on the source's line skeleton.
///
/// Literal source lines (blank, fence, comment-only, YAML) are copied from
/// the source. Every other position takes the next content line of the
/// target in order; lines carrying an inline comment are drawn from their
/// own queue so they stay paired with inline-comment lines of the source.
/// When the target runs out, the source line is used; leftover target lines
/// are appended to the last filled position.
///
/// This guarantees the source's line count but can move a sentence to a
/// neighbouring line when the counts differ a lot.
pub fn resync_structure(source: &str, target: &str, start: Start) -> String {
    let src = split_lines(source);
    let src_kinds = classify_from(source, start);
    let tgt = split_lines(target);
    let tgt_kinds = classify_from(target, start);

    let mut content = std::collections::VecDeque::new();
    let mut inline = std::collections::VecDeque::new();
    for (line, kind) in tgt.iter().zip(&tgt_kinds) {
        if kind.is_literal() {
            continue;
        }
        if has_inline_comment(line) {
            inline.push_back(*line);
        } else {
            content.push_back(*line);
        }
    }

    let mut out: Vec<String> = Vec::with_capacity(src.len());
    let mut last_filled = None;
    for (line, kind) in src.iter().zip(&src_kinds) {
        if kind.is_literal() {
            out.push(line.to_string());
            continue;
        }
        let next = if has_inline_comment(line) {
            inline.pop_front().or_else(|| content.pop_front())
        } else {
            content.pop_front().or_else(|| inline.pop_front())
        };
        last_filled = Some(out.len());
        out.push(next.unwrap_or(*line).to_string());
    }

    if let Some(idx) = last_filled {
        for rest in content.into_iter().chain(inline) {
            out[idx].push(' ');
            out[idx].push_str(rest.trim());
        }
    }
    rejoin(out, source)
}

/// Make list markers match the source line by line. Requires equal line
/// counts; YAML and literal lines are left alone.
pub fn restore_list_prefixes(source: &str, target: &str, start: Start) -> String {
    if line_count(source) != line_count(target) {
        return target.to_string();
    }
    let src = split_lines(source);
    let src_kinds = classify_from(source, start);
    let tgt_kinds = classify_from(target, start);
    let mut out = owned_lines(target);

    for i in 0..src.len() {
        let (sk, tk) = (src_kinds[i], tgt_kinds[i]);
        if !matches!(sk, LineKind::ListItem | LineKind::Content)
            || !matches!(tk, LineKind::ListItem | LineKind::Content)
        {
            continue;
        }
        let body = match list_prefix(&out[i]) {
            Some(p) => out[i][p.len()..].to_string(),
            None => out[i].trim_start().to_string(),
        };
        match list_prefix(src[i]) {
            Some(sp) => out[i] = format!("{}{}", sp, body),
            None if tk == LineKind::ListItem => {
                let indent = &src[i][..src[i].len() - src[i].trim_start().len()];
                out[i] = format!("{}{}", indent, body);
            }
            None => {}
        }
    }
    rejoin(out, target)
}

/// Copy link URLs from each source line onto the same target line, in
/// order of appearance.
pub fn restore_link_urls(source: &str, target: &str) -> String {
    let src = split_lines(source);
    let mut out = owned_lines(target);
    let mut changed = false;

    for (i, line) in out.iter_mut().enumerate() {
        let Some(src_line) = src.get(i) else { break };
        let urls = link_urls(src_line);
        if urls.is_empty() || link_urls(line) == urls {
            continue;
        }
        let fixed = replace_link_urls(line, &urls);
        if fixed != *line {
            *line = fixed;
            changed = true;
        }
    }
    if changed {
        rejoin(out, target)
    } else {
        target.to_string()
    }
}

/// Second-chance link repair for whole documents: after restoring URLs by
/// position, unwrap any remaining link whose URL the source line does not
/// have, keeping its text.
pub fn repair_link_urls_strict(source: &str, target: &str) -> String {
    let restored = restore_link_urls(source, target);
    let src = split_lines(source);
    let out: Vec<String> = split_lines(&restored)
        .into_iter()
        .enumerate()
        .map(|(i, line)| {
            let allowed: HashSet<&str> = src
                .get(i)
                .map(|s| link_urls(s).into_iter().collect())
                .unwrap_or_default();
            LINK_WITH_TEXT_RE
                .replace_all(line, |caps: &regex::Captures<'_>| {
                    let whole = &caps[0];
                    if &caps[1] == "!" || allowed.contains(&caps[3]) {
                        whole.to_string()
                    } else {
                        caps[2].to_string()
                    }
                })
                .into_owned()
        })
        .collect();
    rejoin(out, &restored)
}

/// Fix placeholders the model mangled, and put back any source placeholder
/// line the model replaced.
pub fn normalize_placeholders(source: &str, target: &str) -> String {
    let src = split_lines(source);
    let equal = src.len() == line_count(target);
    let out: Vec<String> = split_lines(target)
        .into_iter()
        .enumerate()
        .map(|(i, line)| {
            let src_line = src.get(i).copied();
            if equal {
                if let Some(s) = src_line.filter(|s| placeholder_index(s).is_some()) {
                    return s.to_string();
                }
            }
            if placeholder_index(line).is_some() {
                return line.to_string();
            }
            match LOOSE_PLACEHOLDER_RE
                .captures(line)
                .and_then(|c| c[1].parse::<usize>().ok())
            {
                Some(n) => match src_line {
                    Some(s) if placeholder_index(s) == Some(n) => s.to_string(),
                    _ => placeholder(n),
                },
                None => line.to_string(),
            }
        })
        .collect();
    rejoin(out, target)
}

/// Pad with source lines or truncate so the target has exactly as many
/// lines as the source.
pub fn fit_line_count(source: &str, target: &str) -> String {
    let src = split_lines(source);
    let mut out = owned_lines(target);
    out.truncate(src.len());
    for line in src.iter().skip(out.len()) {
        out.push(line.to_string());
    }
    rejoin(out, source)
}

/// Remove quote and whitespace artifacts models put around URLs.
pub fn normalize_url_artifacts(text: &str) -> String {
    let t = QUOTED_URL_RE.replace_all(text, "]($1");
    let t = SPLIT_SCHEME_RE.replace_all(&t, "$1://");
    URL_TRAILING_QUOTE_RE.replace_all(&t, "$1)").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orphan_heading_merged() {
        let src = "## Title\n\nBody";
        let tgt = "##\nTitel\n\nText";
        assert_eq!(merge_orphan_headings(src, tgt), "## Titel\n\nText");
        assert_eq!(merge_orphan_headings("#\nx", "#\nx"), "#\nx");
    }

    #[test]
    fn edges_follow_source() {
        assert_eq!(align_edge_blank_lines("\n\nA\n\n", "B"), "\n\nB\n\n");
        assert_eq!(align_edge_blank_lines("A\n", "B\n\n\n"), "B\n");
        assert_eq!(align_edge_blank_lines("A", "\nB\n"), "B");
    }

    #[test]
    fn comments_restored() {
        let src = "<!-- keep -->\nHello";
        assert_eq!(
            restore_comment_lines(src, "<!-- behalten -->\nHallo", Start::Top),
            "<!-- keep -->\nHallo"
        );
        assert_eq!(restore_comment_lines(src, "Hallo", Start::Top), "<!-- keep -->\nHallo");
    }

    #[test]
    fn resync_restores_skeleton() {
        let src = "One.\n\nTwo.\n```\nThree.";
        let tgt = "Eins.\nZwei.\nDrei.";
        let fixed = resync_structure(src, tgt, Start::Top);
        assert_eq!(fixed, "Eins.\n\nZwei.\n```\nDrei.");
    }

    #[test]
    fn resync_keeps_leftovers() {
        let src = "A\n\nB";
        let tgt = "a1\na2\n\nb1\nb2";
        let fixed = resync_structure(src, tgt, Start::Top);
        assert_eq!(line_count(&fixed), 3);
        assert_eq!(fixed, "a1\n\na2 b1 b2");
    }

    #[test]
    fn resync_pairs_inline_comments() {
        let src = "Text <!-- c -->\nPlain";
        let tgt = "Klartext\nTexte <!-- c -->\nextra";
        let fixed = resync_structure(src, tgt, Start::Top);
        assert_eq!(fixed, "Texte <!-- c -->\nKlartext extra");
    }

    #[test]
    fn list_prefixes_restored() {
        let src = "- one\n  2. two\nthree";
        let tgt = "* eins\nzwei\n- drei";
        assert_eq!(restore_list_prefixes(src, tgt, Start::Top), "- eins\n  2. zwei\ndrei");
    }

    #[test]
    fn link_urls_restored() {
        let src = "See [docs](https://x.example/page).";
        let tgt = "Siehe [Doku](https://x.example/seite).";
        assert_eq!(restore_link_urls(src, tgt), "Siehe [Doku](https://x.example/page).");
    }

    #[test]
    fn strict_link_repair_unwraps_foreign() {
        let src = "Plain line\n[a](https://a.example)";
        let tgt = "Zeile [evil](https://evil.example)\n[A](https://a.example) [B](https://b.example)";
        assert_eq!(
            repair_link_urls_strict(src, tgt),
            "Zeile evil\n[A](https://a.example) B"
        );
    }

    #[test]
    fn placeholders_normalized() {
        let src = "Intro\nCODE_BLOCK_3\nOutro";
        assert_eq!(
            normalize_placeholders(src, "Einf\n`code_block_3`\nEnde"),
            "Einf\nCODE_BLOCK_3\nEnde"
        );
        assert_eq!(
            normalize_placeholders(src, "Einf\nCode Block 3 übersetzt\nEnde"),
            "Einf\nCODE_BLOCK_3\nEnde"
        );
        assert_eq!(normalize_placeholders("a", "**CODE BLOCK 1**"), "CODE_BLOCK_1");
    }

    #[test]
    fn full_chain_on_drifted_output() {
        let src = "# Title\n\n- item [x](https://x.example)\n<!-- note -->\nCODE_BLOCK_0\n";
        let tgt = "#\nTitel\n\n* Punkt [x](https://y.example)\n<!-- Notiz -->\ncode_block_0";
        let fixed = repair_chunk(src, tgt, Start::Top);
        assert_eq!(
            fixed,
            "# Titel\n\n- Punkt [x](https://x.example)\n<!-- note -->\nCODE_BLOCK_0\n"
        );
    }

    #[test]
    fn chunk_opening_with_thematic_break_is_repaired() {
        let src = "---\n- apples are red\n- pears are green\n<!-- keep -->";
        let tgt = "---\nÄpfel sind rot\nBirnen sind grün\n<!-- weg -->";
        assert_eq!(
            repair_chunk(src, tgt, Start::Inside),
            "---\n- Äpfel sind rot\n- Birnen sind grün\n<!-- keep -->"
        );

        let fixed = resync_structure(src, "---\nÄpfel sind rot\nund Birnen grün", Start::Inside);
        assert_eq!(fixed, "---\nÄpfel sind rot\nund Birnen grün\n<!-- keep -->");
    }

    #[test]
    fn values_fit_to_source() {
        let src = "Hello\nWorld\n";
        assert_eq!(repair_values(src, "Hallo\n"), "Hallo\nWorld\n");
        assert_eq!(repair_values(src, "Hallo\nWelt\nextra\n"), "Hallo\nWelt\n");
    }

    #[test]
    fn url_artifacts_cleaned() {
        assert_eq!(
            normalize_url_artifacts("[a](\"https://x.example/p\")"),
            "[a](https://x.example/p)"
        );
        assert_eq!(
            normalize_url_artifacts("see https : // x.example"),
            "see https://x.example"
        );
    }
}
