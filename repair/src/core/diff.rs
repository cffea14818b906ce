//! Line-level diff between two snapshots of the target file.
//!
//! Alignment is LCS-based (`similar`'s `Algorithm::Lcs`), grouped into hunks
//! with a fixed context radius. Hunks are for display and audit; [`apply`]
//! exists to check that they faithfully describe the change.

use std::fmt::Write as _;
use std::ops::Range;

use similar::{Algorithm, DiffOp, DiffTag, capture_diff_slices, group_diff_ops};
use thiserror::Error;

/// Unchanged lines kept around each change.
pub const CONTEXT_RADIUS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTag {
    Context,
    Insert,
    Delete,
}

impl LineTag {
    fn marker(self) -> char {
        match self {
            LineTag::Context => ' ',
            LineTag::Insert => '+',
            LineTag::Delete => '-',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub tag: LineTag,
    pub text: String,
}

/// A contiguous block of context, removed, and added lines.
///
/// Ranges are 0-based, half-open indices into the before/after sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    pub old_range: Range<usize>,
    pub new_range: Range<usize>,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Unified-diff header, e.g. `@@ -3,4 +3,5 @@`.
    pub fn header(&self) -> String {
        format!(
            "@@ -{} +{} @@",
            unified_range(&self.old_range),
            unified_range(&self.new_range)
        )
    }
}

/// Unified format counts from 1; an empty range points at the line before it.
fn unified_range(range: &Range<usize>) -> String {
    let len = range.len();
    let start = if len == 0 { range.start } else { range.start + 1 };
    format!("{start},{len}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
    pub hunks: usize,
}

pub fn stats(hunks: &[DiffHunk]) -> DiffStats {
    let mut stats = DiffStats {
        hunks: hunks.len(),
        ..DiffStats::default()
    };
    for line in hunks.iter().flat_map(|hunk| hunk.lines.iter()) {
        match line.tag {
            LineTag::Insert => stats.added += 1,
            LineTag::Delete => stats.removed += 1,
            LineTag::Context => {}
        }
    }
    stats
}

/// Diff with the default context radius. Identical inputs yield no hunks.
pub fn diff(before: &[String], after: &[String]) -> Vec<DiffHunk> {
    diff_with_context(before, after, CONTEXT_RADIUS)
}

pub fn diff_with_context(before: &[String], after: &[String], context: usize) -> Vec<DiffHunk> {
    let ops = capture_diff_slices(Algorithm::Lcs, before, after);
    group_diff_ops(ops, context)
        .iter()
        .filter_map(|group| build_hunk(group, before, after))
        .collect()
}

fn build_hunk(group: &[DiffOp], before: &[String], after: &[String]) -> Option<DiffHunk> {
    let first = group.first()?;
    let last = group.last()?;
    let mut lines = Vec::new();

    for op in group {
        let (tag, old, new) = op.as_tag_tuple();
        match tag {
            DiffTag::Equal => push_lines(&mut lines, LineTag::Context, &before[old]),
            DiffTag::Delete => push_lines(&mut lines, LineTag::Delete, &before[old]),
            DiffTag::Insert => push_lines(&mut lines, LineTag::Insert, &after[new]),
            DiffTag::Replace => {
                push_lines(&mut lines, LineTag::Delete, &before[old]);
                push_lines(&mut lines, LineTag::Insert, &after[new]);
            }
        }
    }

    Some(DiffHunk {
        old_range: first.old_range().start..last.old_range().end,
        new_range: first.new_range().start..last.new_range().end,
        lines,
    })
}

fn push_lines(out: &mut Vec<DiffLine>, tag: LineTag, texts: &[String]) {
    out.extend(texts.iter().map(|text| DiffLine {
        tag,
        text: text.clone(),
    }));
}

/// Render hunks as a unified diff with `---`/`+++` labels.
///
/// Returns an empty string when there are no hunks.
pub fn render_unified(hunks: &[DiffHunk], from_label: &str, to_label: &str) -> String {
    if hunks.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    let _ = writeln!(out, "--- {from_label}");
    let _ = writeln!(out, "+++ {to_label}");
    for hunk in hunks {
        let _ = writeln!(out, "{}", hunk.header());
        for line in &hunk.lines {
            let _ = writeln!(out, "{}{}", line.tag.marker(), line.text);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("hunk at line {start} overlaps or precedes the previous hunk")]
    OutOfOrder { start: usize },
    #[error("hunk expects line {line} beyond end of input ({len} lines)")]
    OutOfRange { line: usize, len: usize },
    #[error("context mismatch at line {line}: expected {expected:?}, found {found:?}")]
    Mismatch {
        line: usize,
        expected: String,
        found: String,
    },
}

/// Apply hunks to `before` with standard patch semantics (context and
/// removed lines must match exactly).
pub fn apply(before: &[String], hunks: &[DiffHunk]) -> Result<Vec<String>, ApplyError> {
    let mut out = Vec::with_capacity(before.len());
    let mut cursor = 0usize;

    for hunk in hunks {
        let start = hunk.old_range.start;
        if start < cursor {
            return Err(ApplyError::OutOfOrder { start: start + 1 });
        }
        if start > before.len() {
            return Err(ApplyError::OutOfRange {
                line: start + 1,
                len: before.len(),
            });
        }
        out.extend_from_slice(&before[cursor..start]);
        let mut pos = start;

        for line in &hunk.lines {
            match line.tag {
                LineTag::Insert => out.push(line.text.clone()),
                LineTag::Context | LineTag::Delete => {
                    let found = before.get(pos).ok_or(ApplyError::OutOfRange {
                        line: pos + 1,
                        len: before.len(),
                    })?;
                    if *found != line.text {
                        return Err(ApplyError::Mismatch {
                            line: pos + 1,
                            expected: line.text.clone(),
                            found: found.clone(),
                        });
                    }
                    if line.tag == LineTag::Context {
                        out.push(found.clone());
                    }
                    pos += 1;
                }
            }
        }
        cursor = pos;
    }

    out.extend_from_slice(&before[cursor.min(before.len())..]);
    Ok(out)
}
