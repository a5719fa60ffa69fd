//! Filepath: src/core/locate.rs
//! Find where a SEARCH text lives inside a file body.
//!
//! Exact byte search first. When that finds nothing and the search text is
//! small enough, fall back to comparing trimmed, non-blank line
//! fingerprints, which absorbs indentation and line-ending drift. Both
//! stages report ambiguity instead of picking an occurrence.

use std::ops::Range;

use memchr::memmem;
use tracing::trace;

use crate::core::blob::sanitize_path;
use crate::core::patch::PatchRecord;
use crate::infra::line_index::LineIndex;

/// Search texts above this many bytes skip the fuzzy stage.
pub const DEFAULT_FUZZY_MAX_BYTES: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Unique,
    Ambiguous(usize),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVia {
    Exact,
    Fuzzy,
}

/// Outcome of one search, independent of any patch record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub status: MatchStatus,
    /// Byte span, present only for `Unique`
    pub span: Option<Range<usize>>,
    /// Stage that decided the status; `None` when nothing matched
    pub via: Option<MatchVia>,
}

impl Location {
    fn unique(span: Range<usize>, via: MatchVia) -> Self {
        Self {
            status: MatchStatus::Unique,
            span: Some(span),
            via: Some(via),
        }
    }

    fn ambiguous(count: usize, via: MatchVia) -> Self {
        Self {
            status: MatchStatus::Ambiguous(count),
            span: None,
            via: Some(via),
        }
    }

    fn not_found() -> Self {
        Self {
            status: MatchStatus::NotFound,
            span: None,
            via: None,
        }
    }
}

/// A patch record together with where (and whether) it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub record: PatchRecord,
    /// File the record resolved to, if any
    pub resolved_path: Option<String>,
    pub status: MatchStatus,
    pub span: Option<Range<usize>>,
    pub matched_via: Option<MatchVia>,
    /// Extra context for the reviewer ("file not found", ...)
    pub note: Option<String>,
}

impl MatchResult {
    pub fn new(record: PatchRecord, resolved_path: Option<String>, location: Location) -> Self {
        Self {
            record,
            resolved_path,
            status: location.status,
            span: location.span,
            matched_via: location.via,
            note: None,
        }
    }

    /// NotFound result for a record whose target file is unknown.
    pub fn missing_file(record: PatchRecord) -> Self {
        Self {
            record,
            resolved_path: None,
            status: MatchStatus::NotFound,
            span: None,
            matched_via: None,
            note: Some("file not found".to_string()),
        }
    }

    /// NotFound result for a target that heads several blocks of a document.
    pub fn repeated_header(record: PatchRecord, path: &str) -> Self {
        Self {
            record,
            resolved_path: Some(path.to_string()),
            status: MatchStatus::NotFound,
            span: None,
            matched_via: None,
            note: Some("file header appears more than once".to_string()),
        }
    }

    pub fn is_unique(&self) -> bool {
        self.status == MatchStatus::Unique
    }

    /// Short reviewer-facing status label.
    pub fn label(&self) -> String {
        match (self.status, self.matched_via) {
            (MatchStatus::Unique, Some(MatchVia::Fuzzy)) => "Ready (fuzzy)".to_string(),
            (MatchStatus::Unique, _) => "Ready".to_string(),
            (MatchStatus::Ambiguous(n), _) => format!("Ambiguous Match ({n} occurrences)"),
            (MatchStatus::NotFound, _) => match &self.note {
                Some(note) => format!("Match Not Found ({note})"),
                None => "Match Not Found".to_string(),
            },
        }
    }
}

/// Pure search helper; one instance can serve any number of files.
#[derive(Debug, Clone, Copy)]
pub struct MatchLocator {
    fuzzy_max_bytes: usize,
}

impl Default for MatchLocator {
    fn default() -> Self {
        Self::new(DEFAULT_FUZZY_MAX_BYTES)
    }
}

impl MatchLocator {
    pub fn new(fuzzy_max_bytes: usize) -> Self {
        Self { fuzzy_max_bytes }
    }

    pub fn locate(&self, content: &str, search: &str) -> Location {
        if search.is_empty() {
            return Location::not_found();
        }

        let mut hits = memmem::find_iter(content.as_bytes(), search.as_bytes());
        match (hits.next(), hits.count()) {
            (Some(start), 0) => return Location::unique(start..start + search.len(), MatchVia::Exact),
            (Some(_), rest) => return Location::ambiguous(rest + 1, MatchVia::Exact),
            (None, _) => {}
        }

        if search.len() > self.fuzzy_max_bytes {
            trace!(bytes = search.len(), "search text too large for fuzzy matching");
            return Location::not_found();
        }

        fuzzy_locate(content, search)
    }

    /// Locate `record.search` in `content` on behalf of `path`.
    pub fn locate_record(&self, path: &str, content: &str, record: &PatchRecord) -> MatchResult {
        MatchResult::new(
            record.clone(),
            Some(path.to_string()),
            self.locate(content, &record.search),
        )
    }
}

/// Map a proposal's target onto one of `candidates`.
///
/// Tried in order: exact path, path with the project root added or
/// stripped, unique path-suffix match, unique file-name match.
pub fn resolve_target(target: &str, candidates: &[&str], root: Option<&str>) -> Option<String> {
    let clean = sanitize_path(target)?;
    let normalized: Vec<(String, &str)> = candidates
        .iter()
        .filter_map(|c| sanitize_path(c).map(|n| (n, *c)))
        .collect();
    let exact = |want: &str| {
        normalized
            .iter()
            .find(|(n, _)| n == want)
            .map(|(_, c)| c.to_string())
    };

    if let Some(hit) = exact(&clean) {
        return Some(hit);
    }

    if let Some(root) = root {
        if let Some(hit) = exact(&format!("{root}/{clean}")) {
            return Some(hit);
        }
        let stripped = clean.strip_prefix(root).and_then(|r| r.strip_prefix('/'));
        if let Some(hit) = stripped.and_then(|s| exact(s)) {
            return Some(hit);
        }
    }

    let suffix = format!("/{clean}");
    if let Some(hit) = unique_hit(&normalized, |n| n.ends_with(&suffix)) {
        return Some(hit);
    }

    let name = clean.rsplit('/').next().unwrap_or(&clean);
    unique_hit(&normalized, |n| n.rsplit('/').next() == Some(name))
}

fn unique_hit(normalized: &[(String, &str)], pred: impl Fn(&str) -> bool) -> Option<String> {
    let mut hits = normalized.iter().filter(|(n, _)| pred(n.as_str()));
    match (hits.next(), hits.next()) {
        (Some((_, c)), None) => Some(c.to_string()),
        _ => None,
    }
}

/// Sliding window over trimmed non-blank lines.
fn fuzzy_locate(content: &str, search: &str) -> Location {
    let needle: Vec<&str> = search
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if needle.is_empty() {
        return Location::not_found();
    }

    let bytes = content.as_bytes();
    let index = LineIndex::build(bytes);
    let hay: Vec<(&str, usize, usize)> = index
        .spans(bytes)
        .map(|(s, e)| (content[s..e].trim(), s, e))
        .filter(|(text, _, _)| !text.is_empty())
        .collect();

    if hay.len() < needle.len() {
        return Location::not_found();
    }

    let mut found: Option<Range<usize>> = None;
    let mut count = 0;
    for window in hay.windows(needle.len()) {
        if window.iter().zip(&needle).all(|((line, _, _), want)| line == want) {
            count += 1;
            if found.is_none() {
                found = Some(window[0].1..window[window.len() - 1].2);
            }
        }
    }

    match (count, found) {
        (1, Some(span)) => Location::unique(span, MatchVia::Fuzzy),
        (0, _) | (_, None) => Location::not_found(),
        (n, _) => Location::ambiguous(n, MatchVia::Fuzzy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_exact() {
        let loc = MatchLocator::default().locate("x();\nfoo();\n", "foo();");
        assert_eq!(loc.status, MatchStatus::Unique);
        assert_eq!(loc.span, Some(5..11));
        assert_eq!(loc.via, Some(MatchVia::Exact));
    }

    #[test]
    fn test_two_exact_occurrences_are_ambiguous() {
        let loc = MatchLocator::default().locate("foo();\nfoo();\n", "foo();");
        assert_eq!(loc.status, MatchStatus::Ambiguous(2));
        assert_eq!(loc.span, None);
    }

    #[test]
    fn test_fuzzy_absorbs_indentation_and_crlf() {
        let content = "fn main() {\r\n    let a = 1;\r\n\r\n    let b = 2;\r\n}\r\n";
        let search = "let a = 1;\nlet b = 2;";

        let loc = MatchLocator::default().locate(content, search);
        assert_eq!(loc.status, MatchStatus::Unique);
        assert_eq!(loc.via, Some(MatchVia::Fuzzy));

        let span = loc.span.unwrap();
        assert_eq!(&content[span], "    let a = 1;\r\n\r\n    let b = 2;");
    }

    #[test]
    fn test_fuzzy_ambiguity_counts_windows() {
        let content = "  a\n  b\nx\na\nb\n";
        let loc = MatchLocator::default().locate(content, "a\r\nb");
        assert_eq!(loc.status, MatchStatus::Ambiguous(2));
        assert_eq!(loc.via, Some(MatchVia::Fuzzy));
    }

    #[test]
    fn test_large_search_skips_fuzzy() {
        let content = "    hello\n";
        let loc = MatchLocator::new(3).locate(content, "  hello  ");
        assert_eq!(loc.status, MatchStatus::NotFound);

        let loc = MatchLocator::new(16).locate(content, "  hello  ");
        assert_eq!(loc.status, MatchStatus::Unique);
    }

    #[test]
    fn test_empty_and_blank_searches_not_found() {
        let locator = MatchLocator::default();
        assert_eq!(locator.locate("abc", "").status, MatchStatus::NotFound);
        assert_eq!(locator.locate("abc", "\n  \n").status, MatchStatus::NotFound);
    }

    #[test]
    fn test_resolve_target_order() {
        let files = ["proj/src/a.rs", "proj/src/b.rs", "proj/web/src/b.rs", "proj/README.md"];

        let cases = [
            ("proj/src/a.rs", Some("proj/src/a.rs")),
            ("./src/a.rs", Some("proj/src/a.rs")),
            ("web/src/b.rs", Some("proj/web/src/b.rs")),
            ("README.md", Some("proj/README.md")),
            ("a.rs", Some("proj/src/a.rs")),
            ("b.rs", None),
            ("missing.rs", None),
        ];
        for (target, want) in cases {
            assert_eq!(
                resolve_target(target, &files, Some("proj")).as_deref(),
                want,
                "{target}"
            );
        }
    }

    #[test]
    fn test_labels() {
        let record = PatchRecord {
            target_file: "a".into(),
            search: "s".into(),
            replace: "r".into(),
            order: 0,
        };
        assert_eq!(
            MatchResult::missing_file(record.clone()).label(),
            "Match Not Found (file not found)"
        );
        let hit = MatchLocator::default().locate_record("a", "s", &record);
        assert_eq!(hit.label(), "Ready");
    }
}
