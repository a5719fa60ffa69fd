//! Filepath: src/core/apply.rs
//! Splice located hunks into file bodies.
//!
//! - Only hunks that are both active and `Unique` participate; every other
//!   hunk comes back in the report with the reason it was skipped.
//! - Spans always refer to the original content, so edits are applied in
//!   one left-to-right pass. Overlapping active spans abort the whole call
//!   before any output exists. Adjacent spans are fine.
//! - Against a blob, only the addressed blocks' bodies are rewritten.

use std::fmt;
use std::ops::Range;

use indexmap::IndexMap;
use similar::TextDiff;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::blob::{DocumentIndex, escape, unescape};
use crate::core::locate::{MatchResult, MatchStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("hunks #{first} and #{second} overlap in {path}")]
    OverlappingHunks {
        path: String,
        first: usize,
        second: usize,
    },
    #[error("hunk #{order} span {start}..{end} does not fit {path} ({len} bytes)")]
    SpanOutOfBounds {
        path: String,
        order: usize,
        start: usize,
        end: usize,
        len: usize,
    },
}

/// A located record plus the reviewer's on/off decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub result: MatchResult,
    pub active: bool,
}

impl Hunk {
    /// Active by default exactly when the match is unique.
    pub fn new(result: MatchResult) -> Self {
        let active = result.is_unique();
        Self { result, active }
    }

    pub fn order(&self) -> usize {
        self.result.record.order
    }

    pub fn id(&self) -> String {
        self.result.record.hunk_id()
    }

    fn skip_reason(&self) -> Option<SkipReason> {
        match (self.result.status, &self.result.span) {
            (MatchStatus::Unique, Some(_)) if self.active => None,
            (MatchStatus::Unique, Some(_)) => Some(SkipReason::Inactive),
            (MatchStatus::Ambiguous(n), _) => Some(SkipReason::Ambiguous(n)),
            _ if self.result.resolved_path.is_none() => Some(SkipReason::FileNotFound),
            _ => Some(SkipReason::NotFound),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Inactive,
    NotFound,
    Ambiguous(usize),
    FileNotFound,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Inactive => write!(f, "deactivated"),
            SkipReason::NotFound => write!(f, "search text not found"),
            SkipReason::Ambiguous(n) => write!(f, "search text matches {n} places"),
            SkipReason::FileNotFound => write!(f, "file not found"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HunkOutcome {
    Applied,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkReport {
    pub order: usize,
    pub hunk_id: String,
    pub target_file: String,
    pub resolved_path: Option<String>,
    pub outcome: HunkOutcome,
}

impl HunkReport {
    fn new(hunk: &Hunk, outcome: HunkOutcome) -> Self {
        Self {
            order: hunk.order(),
            hunk_id: hunk.id(),
            target_file: hunk.result.record.target_file.clone(),
            resolved_path: hunk.result.resolved_path.clone(),
            outcome,
        }
    }

    pub fn applied(&self) -> bool {
        self.outcome == HunkOutcome::Applied
    }
}

/// Rewritten content for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub content: String,
    pub reports: Vec<HunkReport>,
}

/// Apply `hunks` (all addressed to `path`) to `content`.
pub fn apply(path: &str, content: &str, hunks: &[&Hunk]) -> Result<Applied, ApplyError> {
    let mut reports = Vec::with_capacity(hunks.len());
    let mut active: Vec<(&Hunk, Range<usize>)> = Vec::new();

    for &hunk in hunks {
        match (hunk.skip_reason(), &hunk.result.span) {
            (None, Some(span)) => active.push((hunk, span.clone())),
            (reason, _) => {
                let reason = reason.unwrap_or(SkipReason::NotFound);
                debug!(path, order = hunk.order(), %reason, "hunk skipped");
                reports.push(HunkReport::new(hunk, HunkOutcome::Skipped(reason)));
            }
        }
    }

    for (hunk, span) in &active {
        if span.start > span.end
            || span.end > content.len()
            || !content.is_char_boundary(span.start)
            || !content.is_char_boundary(span.end)
        {
            return Err(ApplyError::SpanOutOfBounds {
                path: path.to_string(),
                order: hunk.order(),
                start: span.start,
                end: span.end,
                len: content.len(),
            });
        }
    }

    active.sort_by_key(|(_, span)| (span.start, span.end));
    for pair in active.windows(2) {
        let ((a, prev), (b, next)) = (&pair[0], &pair[1]);
        if next.start < prev.end {
            return Err(ApplyError::OverlappingHunks {
                path: path.to_string(),
                first: a.order().min(b.order()),
                second: a.order().max(b.order()),
            });
        }
    }

    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    for (hunk, span) in &active {
        out.push_str(&content[cursor..span.start]);
        out.push_str(&hunk.result.record.replace);
        cursor = span.end;
        reports.push(HunkReport::new(hunk, HunkOutcome::Applied));
    }
    out.push_str(&content[cursor..]);

    reports.sort_by_key(|r| r.order);
    Ok(Applied {
        content: out,
        reports,
    })
}

/// Before/after text of one changed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub before: String,
    pub after: String,
}

impl FileChange {
    /// Unified diff with `a/` and `b/` headers.
    pub fn unified_diff(&self) -> String {
        let diff = TextDiff::from_lines(&self.before, &self.after);
        diff.unified_diff()
            .context_radius(3)
            .header(&format!("a/{}", self.path), &format!("b/{}", self.path))
            .to_string()
    }
}

/// Result of applying a whole hunk set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Files whose content changed, in first-hunk order
    pub changes: Vec<FileChange>,
    /// One report per hunk, in proposal order
    pub reports: Vec<HunkReport>,
}

impl ApplyOutcome {
    pub fn applied_count(&self) -> usize {
        self.reports.iter().filter(|r| r.applied()).count()
    }
}

/// Group hunks by resolved file and apply each group to the text returned
/// by `lookup`. Nothing is returned unless every group applies cleanly.
#[instrument(skip_all, fields(hunks = hunks.len()))]
pub fn apply_grouped<F>(hunks: &[Hunk], mut lookup: F) -> Result<ApplyOutcome, ApplyError>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut groups: IndexMap<&str, Vec<&Hunk>> = IndexMap::new();
    let mut outcome = ApplyOutcome::default();

    for hunk in hunks {
        match hunk.result.resolved_path.as_deref() {
            Some(path) => groups.entry(path).or_default().push(hunk),
            None => outcome
                .reports
                .push(HunkReport::new(hunk, HunkOutcome::Skipped(SkipReason::FileNotFound))),
        }
    }

    for (path, group) in groups {
        let Some(before) = lookup(path) else {
            outcome.reports.extend(
                group
                    .iter()
                    .map(|h| HunkReport::new(h, HunkOutcome::Skipped(SkipReason::FileNotFound))),
            );
            continue;
        };

        let applied = apply(path, &before, &group)?;
        outcome.reports.extend(applied.reports);
        if applied.content != before {
            outcome.changes.push(FileChange {
                path: path.to_string(),
                before,
                after: applied.content,
            });
        }
    }

    outcome.reports.sort_by_key(|r| r.order);
    Ok(outcome)
}

/// Apply hunks (resolved against the blob's header paths) to a context
/// document. Bytes outside the changed bodies are copied unchanged.
pub fn apply_to_blob(blob: &str, hunks: &[Hunk]) -> Result<(String, ApplyOutcome), ApplyError> {
    let index = DocumentIndex::scan(blob);
    let outcome = apply_grouped(hunks, |path| {
        index
            .find(path)
            .map(|block| unescape(&blob[block.body.clone()]).into_owned())
    })?;

    let mut edits: Vec<(Range<usize>, String)> = outcome
        .changes
        .iter()
        .filter_map(|change| {
            index
                .find(&change.path)
                .map(|block| (block.body.clone(), escape(&change.after).into_owned()))
        })
        .collect();
    edits.sort_by_key(|(range, _)| range.start);

    let mut out = String::with_capacity(blob.len());
    let mut cursor = 0;
    for (range, body) in edits {
        out.push_str(&blob[cursor..range.start]);
        out.push_str(&body);
        cursor = range.end;
    }
    out.push_str(&blob[cursor..]);

    Ok((out, outcome))
}
