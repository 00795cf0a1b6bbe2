// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// One line of a [`PatchHunk`], tagged by its unified-diff prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HunkLine {
    Context(String),
    Add(String),
    Del(String),
}

impl HunkLine {
    fn prefix(&self) -> char {
        match self {
            HunkLine::Context(_) => ' ',
            HunkLine::Add(_) => '+',
            HunkLine::Del(_) => '-',
        }
    }

    fn text(&self) -> &str {
        match self {
            HunkLine::Context(s) | HunkLine::Add(s) | HunkLine::Del(s) => s,
        }
    }
}

/// A standard unified-diff hunk: `@@ -oldStart,oldLines +newStart,newLines @@`
/// plus its ordered lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchHunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<HunkLine>,
}

/// Render hunks as unified-diff text (no file headers, just `@@` blocks).
///
/// `\ No newline at end of file` markers are never emitted — they are
/// discarded on the parse side too, so round-tripping never needs them.
pub fn format_unified_diff(hunks: &[PatchHunk]) -> String {
    let mut out = String::new();
    for h in hunks {
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            h.old_start, h.old_lines, h.new_start, h.new_lines
        ));
        for line in &h.lines {
            out.push(line.prefix());
            out.push_str(line.text());
            out.push('\n');
        }
    }
    out
}

/// Parse unified-diff text produced by [`format_unified_diff`] back into hunks.
///
/// Lines that are not recognised hunk headers or `' '`/`'+'`/`'-'`-prefixed
/// content are skipped, tolerating stray `\ No newline at end of file`
/// markers some diff tools emit.
pub fn parse_unified_diff(text: &str) -> Vec<PatchHunk> {
    let mut hunks = Vec::new();
    let mut current: Option<PatchHunk> = None;

    for raw_line in text.lines() {
        if raw_line.starts_with("@@") {
            if let Some(h) = current.take() {
                hunks.push(h);
            }
            if let Some(h) = parse_hunk_header(raw_line) {
                current = Some(h);
            }
            continue;
        }
        if raw_line.starts_with('\\') {
            // "\ No newline at end of file" — discarded.
            continue;
        }
        let Some(h) = current.as_mut() else { continue };
        let mut chars = raw_line.chars();
        match chars.next() {
            Some(' ') => h.lines.push(HunkLine::Context(chars.as_str().to_string())),
            Some('+') => h.lines.push(HunkLine::Add(chars.as_str().to_string())),
            Some('-') => h.lines.push(HunkLine::Del(chars.as_str().to_string())),
            _ => {}
        }
    }
    if let Some(h) = current.take() {
        hunks.push(h);
    }
    hunks
}

fn parse_hunk_header(line: &str) -> Option<PatchHunk> {
    // @@ -oldStart,oldLines +newStart,newLines @@
    let body = line.trim_start_matches("@@").trim_end_matches("@@").trim();
    let mut parts = body.split_whitespace();
    let old = parts.next()?.trim_start_matches('-');
    let new = parts.next()?.trim_start_matches('+');
    let (old_start, old_lines) = split_range(old)?;
    let (new_start, new_lines) = split_range(new)?;
    Some(PatchHunk {
        old_start,
        old_lines,
        new_start,
        new_lines,
        lines: Vec::new(),
    })
}

fn split_range(s: &str) -> Option<(usize, usize)> {
    match s.split_once(',') {
        Some((a, b)) => Some((a.parse().ok()?, b.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

/// Build hunks from two full-text revisions using a grouped line diff with
/// `context` lines of leading/trailing unchanged context per hunk — the
/// "simple longest-common-prefix/suffix diff" the local Edit tool exposes,
/// generalized to arbitrary multi-line changes for file-change coalescing.
pub fn diff_hunks(old: &str, new: &str, context: usize) -> Vec<PatchHunk> {
    use similar::{ChangeTag, TextDiff};

    let diff = TextDiff::from_lines(old, new);
    let mut hunks = Vec::new();

    for group in diff.grouped_ops(context) {
        let mut lines = Vec::new();
        let mut old_start = usize::MAX;
        let mut new_start = usize::MAX;
        let mut old_lines = 0usize;
        let mut new_lines = 0usize;

        for op in &group {
            for change in diff.iter_changes(op) {
                let text = change.value().trim_end_matches('\n').to_string();
                match change.tag() {
                    ChangeTag::Equal => {
                        old_start = old_start.min(change.old_index().unwrap_or(0) + 1);
                        new_start = new_start.min(change.new_index().unwrap_or(0) + 1);
                        old_lines += 1;
                        new_lines += 1;
                        lines.push(HunkLine::Context(text));
                    }
                    ChangeTag::Delete => {
                        old_start = old_start.min(change.old_index().unwrap_or(0) + 1);
                        old_lines += 1;
                        lines.push(HunkLine::Del(text));
                    }
                    ChangeTag::Insert => {
                        new_start = new_start.min(change.new_index().unwrap_or(0) + 1);
                        new_lines += 1;
                        lines.push(HunkLine::Add(text));
                    }
                }
            }
        }

        if lines.is_empty() {
            continue;
        }
        hunks.push(PatchHunk {
            old_start: if old_start == usize::MAX { 0 } else { old_start },
            old_lines,
            new_start: if new_start == usize::MAX { 0 } else { new_start },
            new_lines,
            lines,
        });
    }

    hunks
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hunks() -> Vec<PatchHunk> {
        vec![PatchHunk {
            old_start: 1,
            old_lines: 3,
            new_start: 1,
            new_lines: 3,
            lines: vec![
                HunkLine::Context("hello".into()),
                HunkLine::Del("world".into()),
                HunkLine::Add("gopher".into()),
                HunkLine::Context("!".into()),
            ],
        }]
    }

    #[test]
    fn round_trip_format_and_parse() {
        let hunks = sample_hunks();
        let text = format_unified_diff(&hunks);
        let parsed = parse_unified_diff(&text);
        assert_eq!(parsed, hunks);
    }

    #[test]
    fn parse_ignores_no_newline_marker() {
        let text = "@@ -1,1 +1,1 @@\n-old\n\\ No newline at end of file\n+new\n";
        let parsed = parse_unified_diff(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].lines.len(), 2);
    }

    #[test]
    fn diff_hunks_single_word_replacement() {
        let old = "hello world\n";
        let new = "hello gopher\n";
        let hunks = diff_hunks(old, new, 3);
        assert_eq!(hunks.len(), 1);
        assert!(hunks[0].lines.iter().any(|l| matches!(l, HunkLine::Del(_))));
        assert!(hunks[0].lines.iter().any(|l| matches!(l, HunkLine::Add(_))));
    }

    #[test]
    fn diff_hunks_no_change_is_empty() {
        let hunks = diff_hunks("same\n", "same\n", 3);
        assert!(hunks.is_empty());
    }
}
