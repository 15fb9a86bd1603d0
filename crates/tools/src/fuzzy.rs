//! Fuzzy edit matcher: locate `old_string` in a file even when the model's
//! copy differs in whitespace or indentation.
//!
//! Strategies run in order and the first that finds anything wins:
//!
//! 1. **Exact**: literal substring.
//! 2. **Whitespace-normalized**: runs of spaces/tabs collapse to one space
//!    and line endings become `\n`; matches are mapped back to original
//!    offsets through a position table.
//! 3. **Indent-agnostic**: line window compared after `trim_start`.
//! 4. **Line-trimmed**: line window compared after `trim`.
//!
//! A strategy that finds more than one match fails the whole edit unless
//! `replace_all` is set. The matcher never guesses.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Exact,
    WhitespaceNormalized,
    IndentAgnostic,
    LineTrimmed,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::WhitespaceNormalized => "whitespace_normalized",
            Self::IndentAgnostic => "indent_agnostic",
            Self::LineTrimmed => "line_trimmed",
        }
    }

    fn is_line_based(&self) -> bool {
        matches!(self, Self::IndentAgnostic | Self::LineTrimmed)
    }
}

impl std::fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FuzzyError {
    #[error("search text is empty")]
    EmptySearch,

    #[error("search text matched {count} locations ({strategy} match)")]
    MultipleMatches { count: usize, strategy: MatchStrategy },

    #[error("search text not found")]
    NotFound,
}

/// Where a search string was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub strategy: MatchStrategy,
    /// Byte ranges into the original content, ascending and disjoint
    pub spans: Vec<Range<usize>>,
}

/// A fully applied edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzyEdit {
    pub new_content: String,
    pub strategy: MatchStrategy,
    pub spans: Vec<Range<usize>>,
}

impl FuzzyEdit {
    pub fn replacements(&self) -> usize {
        self.spans.len()
    }
}

/// Find `search` in `content`.
pub fn find_matches(
    content: &str,
    search: &str,
    replace_all: bool,
) -> Result<MatchResult, FuzzyError> {
    if search.is_empty() {
        return Err(FuzzyError::EmptySearch);
    }

    let strategies: [(MatchStrategy, fn(&str, &str) -> Vec<Range<usize>>); 4] = [
        (MatchStrategy::Exact, exact_spans),
        (MatchStrategy::WhitespaceNormalized, normalized_spans),
        (MatchStrategy::IndentAgnostic, |c, s| {
            line_window_spans(c, s, str::trim_start)
        }),
        (MatchStrategy::LineTrimmed, |c, s| line_window_spans(c, s, str::trim)),
    ];

    for (strategy, find) in strategies {
        let spans = find(content, search);
        match spans.len() {
            0 => continue,
            1 => return Ok(MatchResult { strategy, spans }),
            count if !replace_all => {
                return Err(FuzzyError::MultipleMatches { count, strategy });
            }
            _ => return Ok(MatchResult { strategy, spans }),
        }
    }

    Err(FuzzyError::NotFound)
}

/// Replace `search` with `replacement` in `content`.
///
/// For line-based strategies the replacement is re-indented to the matched
/// block's indentation.
pub fn apply_edit(
    content: &str,
    search: &str,
    replacement: &str,
    replace_all: bool,
) -> Result<FuzzyEdit, FuzzyError> {
    let found = find_matches(content, search, replace_all)?;

    let mut out = String::with_capacity(content.len() + replacement.len());
    let mut cursor = 0;
    for span in &found.spans {
        out.push_str(&content[cursor..span.start]);
        if found.strategy.is_line_based() {
            out.push_str(&reindent(&content[span.clone()], search, replacement));
        } else {
            out.push_str(replacement);
        }
        cursor = span.end;
    }
    out.push_str(&content[cursor..]);

    Ok(FuzzyEdit {
        new_content: out,
        strategy: found.strategy,
        spans: found.spans,
    })
}

// ── Exact ───────────────────────────────────────────────────────────────────

fn exact_spans(content: &str, search: &str) -> Vec<Range<usize>> {
    content
        .match_indices(search)
        .map(|(start, m)| start..start + m.len())
        .collect()
}

// ── Whitespace-normalized ───────────────────────────────────────────────────

/// Normalized text plus, for every normalized byte, the original byte range
/// it came from.
struct Normalized {
    text: String,
    starts: Vec<usize>,
    ends: Vec<usize>,
}

/// Walk the original and the normalized string in lockstep, recording for
/// each emitted byte which original bytes produced it. A collapsed run of
/// blanks maps to the whole run; `\r\n` maps to both bytes.
fn normalize(original: &str) -> Normalized {
    let mut text = String::with_capacity(original.len());
    let mut starts = Vec::with_capacity(original.len());
    let mut ends = Vec::with_capacity(original.len());
    let mut in_blank_run = false;

    let mut chars = original.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            ' ' | '\t' => {
                if in_blank_run {
                    if let Some(end) = ends.last_mut() {
                        *end = i + 1;
                    }
                } else {
                    text.push(' ');
                    starts.push(i);
                    ends.push(i + 1);
                    in_blank_run = true;
                }
            }
            '\r' => {
                in_blank_run = false;
                let end = match chars.peek() {
                    Some(&(j, '\n')) => {
                        chars.next();
                        j + 1
                    }
                    _ => i + 1,
                };
                text.push('\n');
                starts.push(i);
                ends.push(end);
            }
            _ => {
                in_blank_run = false;
                text.push(c);
                let len = c.len_utf8();
                for _ in 0..len {
                    starts.push(i);
                    ends.push(i + len);
                }
            }
        }
    }

    Normalized { text, starts, ends }
}

fn normalized_spans(content: &str, search: &str) -> Vec<Range<usize>> {
    let needle = normalize(search).text;
    if needle.is_empty() {
        return Vec::new();
    }
    let hay = normalize(content);
    hay.text
        .match_indices(needle.as_str())
        .map(|(start, m)| hay.starts[start]..hay.ends[start + m.len() - 1])
        .collect()
}

// ── Line window strategies ──────────────────────────────────────────────────

struct Line<'a> {
    /// Line text without its terminator
    text: &'a str,
    start: usize,
    /// End of `text` (before the terminator)
    end: usize,
}

fn split_lines(content: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut offset = 0;
    for raw in content.split_inclusive('\n') {
        let text = raw
            .strip_suffix('\n')
            .map(|t| t.strip_suffix('\r').unwrap_or(t))
            .unwrap_or(raw);
        lines.push(Line {
            text,
            start: offset,
            end: offset + text.len(),
        });
        offset += raw.len();
    }
    lines
}

/// Slide a window of `search`'s line count over `content`, comparing lines
/// after `fold`. Matches never overlap. The span runs from the first
/// line's start to the last line's end, excluding its terminator.
fn line_window_spans(
    content: &str,
    search: &str,
    fold: fn(&str) -> &str,
) -> Vec<Range<usize>> {
    let needle: Vec<&str> = search.lines().map(fold).collect();
    if needle.is_empty() || needle.iter().all(|l| l.is_empty()) {
        return Vec::new();
    }
    let lines = split_lines(content);
    if lines.len() < needle.len() {
        return Vec::new();
    }

    let mut spans = Vec::new();
    let mut i = 0;
    while i + needle.len() <= lines.len() {
        let window = &lines[i..i + needle.len()];
        if window.iter().zip(&needle).all(|(l, n)| fold(l.text) == *n) {
            spans.push(window[0].start..window[needle.len() - 1].end);
            i += needle.len();
        } else {
            i += 1;
        }
    }
    spans
}

fn leading_whitespace(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Shift `replacement` from the search text's indentation to the matched
/// block's. Blank lines stay blank; lines shallower than the search text's
/// first line are placed at the block indentation.
fn reindent(matched: &str, search: &str, replacement: &str) -> String {
    let block_indent = matched.lines().next().map(leading_whitespace).unwrap_or("");
    let search_indent = search
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(leading_whitespace)
        .unwrap_or("");

    let body = if search.ends_with('\n') {
        // The match excludes the last terminator, so drop the replacement's.
        replacement.strip_suffix('\n').unwrap_or(replacement)
    } else {
        replacement
    };

    body.split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else if let Some(rest) = line.strip_prefix(search_indent) {
                format!("{block_indent}{rest}")
            } else {
                format!("{block_indent}{}", line.trim_start())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
