//! Filepath: src/core/patch.rs
//! SEARCH/REPLACE proposal parser.
//!
//! One line-driven state machine serves both marker syntaxes:
//!
//! ```text
//! long                      compact
//! File: src/a.rs            === File: src/a.rs ===
//! <<<<<<< SEARCH            <<<< SEARCH
//! old                       old
//! =======                   ==== REPLACE
//! new                       new
//! >>>>>>> REPLACE           >>>>
//! ```
//!
//! Unterminated blocks are discarded, and so are blocks that appear before
//! any target-file line. Anything outside a block is ignored.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Which marker set a proposal uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerSyntax {
    Long,
    Compact,
}

struct Markers {
    start: &'static str,
    separator: &'static str,
    end: &'static str,
}

const LONG: Markers = Markers {
    start: "<<<<<<< SEARCH",
    separator: "=======",
    end: ">>>>>>> REPLACE",
};

const COMPACT: Markers = Markers {
    start: "<<<< SEARCH",
    separator: "==== REPLACE",
    end: ">>>>",
};

impl MarkerSyntax {
    /// Long when any line opens a long block, else compact when any line
    /// opens a compact block, else long.
    pub fn detect(text: &str) -> Self {
        let mut compact = false;
        for line in text.lines() {
            let t = line.trim();
            if t.starts_with(LONG.start) {
                return MarkerSyntax::Long;
            }
            compact |= t.starts_with(COMPACT.start);
        }
        if compact {
            MarkerSyntax::Compact
        } else {
            MarkerSyntax::Long
        }
    }

    fn markers(self) -> &'static Markers {
        match self {
            MarkerSyntax::Long => &LONG,
            MarkerSyntax::Compact => &COMPACT,
        }
    }
}

/// Configured syntax preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyntaxChoice {
    #[default]
    Auto,
    Long,
    Compact,
}

impl SyntaxChoice {
    pub fn resolve(self, text: &str) -> MarkerSyntax {
        match self {
            SyntaxChoice::Auto => MarkerSyntax::detect(text),
            SyntaxChoice::Long => MarkerSyntax::Long,
            SyntaxChoice::Compact => MarkerSyntax::Compact,
        }
    }
}

/// One SEARCH/REPLACE block, in proposal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub target_file: String,
    pub search: String,
    pub replace: String,
    pub order: usize,
}

impl PatchRecord {
    /// Stable identifier: xxh64 over target, search, replace, and order.
    pub fn hunk_id(&self) -> String {
        let mut buf = Vec::with_capacity(
            self.target_file.len() + self.search.len() + self.replace.len() + 24,
        );
        for part in [&self.target_file, &self.search, &self.replace] {
            buf.extend_from_slice(part.as_bytes());
            buf.push(0);
        }
        buf.extend_from_slice(&(self.order as u64).to_le_bytes());
        format!("{:016x}", xxhash_rust::xxh64::xxh64(&buf, 0))
    }
}

enum State {
    Idle,
    Search(Vec<String>),
    Replace(Vec<String>, Vec<String>),
}

/// Parse with an explicit marker syntax.
pub fn parse(text: &str, syntax: MarkerSyntax) -> Vec<PatchRecord> {
    let markers = syntax.markers();
    let mut records = Vec::new();
    let mut current_file: Option<String> = None;
    let mut state = State::Idle;

    for raw in text.lines() {
        let line = raw.trim_end_matches('\r');
        let trimmed = line.trim();

        state = match state {
            State::Idle => {
                if trimmed.starts_with(markers.start) {
                    State::Search(Vec::new())
                } else {
                    if let Some(path) = target_file_line(trimmed) {
                        trace!(path = %path, "target file");
                        current_file = Some(path);
                    }
                    State::Idle
                }
            }
            State::Search(mut search) => {
                if trimmed.starts_with(markers.separator) {
                    State::Replace(search, Vec::new())
                } else {
                    search.push(line.to_string());
                    State::Search(search)
                }
            }
            State::Replace(search, mut replace) => {
                if trimmed.starts_with(markers.end) {
                    match &current_file {
                        Some(target) => records.push(PatchRecord {
                            target_file: target.clone(),
                            search: finish_buffer(search),
                            replace: finish_buffer(replace),
                            order: records.len(),
                        }),
                        None => debug!("block without a target file dropped"),
                    }
                    State::Idle
                } else {
                    replace.push(line.to_string());
                    State::Replace(search, replace)
                }
            }
        };
    }

    if !matches!(state, State::Idle) {
        debug!("unterminated block discarded");
    }

    records
}

/// Parse with the syntax chosen by `choice` (auto-detected by default).
pub fn parse_with(text: &str, choice: SyntaxChoice) -> Vec<PatchRecord> {
    parse(text, choice.resolve(text))
}

/// `File: x`, `**FILE:** \`x\``, or `=== File: x ===` (optionally escaped).
fn target_file_line(trimmed: &str) -> Option<String> {
    let unescaped = trimmed.trim_start_matches('\\');
    if let Some(rest) = unescaped.strip_prefix("=== File:") {
        let rest = rest.trim_end();
        let path = rest.strip_suffix("===").unwrap_or(rest).trim();
        return (!path.is_empty()).then(|| path.to_string());
    }

    let body = trimmed.trim_start_matches(['#', '*', ' ', '-']);
    let head = body.get(..5)?;
    if !head.eq_ignore_ascii_case("file:") {
        return None;
    }
    let path = body[5..].trim_matches(|c: char| c.is_whitespace() || c == '*' || c == '`');
    (!path.is_empty()).then(|| path.to_string())
}

/// Join lines, dropping exactly one leading and one trailing blank line.
fn finish_buffer(mut lines: Vec<String>) -> String {
    if lines.first().is_some_and(|l| l.trim().is_empty()) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_form_scenario() {
        let text = "File: a.js\n<<<<<<< SEARCH\nfoo();\n=======\nbar();\n>>>>>>> REPLACE\n";
        let records = parse_with(text, SyntaxChoice::Auto);

        assert_eq!(
            records,
            vec![PatchRecord {
                target_file: "a.js".into(),
                search: "foo();".into(),
                replace: "bar();".into(),
                order: 0,
            }]
        );
    }

    #[test]
    fn test_compact_form_detected() {
        let text = "Some prose.\n\n=== File: src/lib.rs ===\n<<<< SEARCH\nold\n==== REPLACE\nnew\n>>>>\n";
        assert_eq!(MarkerSyntax::detect(text), MarkerSyntax::Compact);

        let records = parse_with(text, SyntaxChoice::Auto);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target_file, "src/lib.rs");
        assert_eq!(records[0].search, "old");
        assert_eq!(records[0].replace, "new");
    }

    #[test]
    fn test_markdown_decorated_file_lines() {
        for line in ["FILE: x.rs", "**File:** `x.rs`", "### file: x.rs", "- File: x.rs"] {
            assert_eq!(target_file_line(line).as_deref(), Some("x.rs"), "{line}");
        }
        assert_eq!(target_file_line("Filesystem: nope"), None);
        assert_eq!(target_file_line("File:"), None);
    }

    #[test]
    fn test_one_blank_line_trimmed_each_side() {
        let text = "File: a\n<<<<<<< SEARCH\n\n\nkeep\n\n\n=======\n\nnew\n>>>>>>> REPLACE\n";
        let records = parse(text, MarkerSyntax::Long);
        assert_eq!(records[0].search, "\nkeep\n");
        assert_eq!(records[0].replace, "new");
    }

    #[test]
    fn test_unterminated_and_fileless_blocks_dropped() {
        let text = "<<<<<<< SEARCH\na\n=======\nb\n>>>>>>> REPLACE\n\
                    File: f.txt\n<<<<<<< SEARCH\nc\n=======\nd\n";
        assert!(parse(text, MarkerSyntax::Long).is_empty());
    }

    #[test]
    fn test_no_blocks_yields_empty() {
        assert!(parse_with("just a chat reply", SyntaxChoice::Auto).is_empty());
    }

    #[test]
    fn test_multiple_records_keep_order_and_file() {
        let text = "File: a\r\n<<<<<<< SEARCH\r\n1\r\n=======\r\n2\r\n>>>>>>> REPLACE\r\n\
                    <<<<<<< SEARCH\r\n3\r\n=======\r\n4\r\n>>>>>>> REPLACE\r\n\
                    File: b\r\n<<<<<<< SEARCH\r\n5\r\n=======\r\n6\r\n>>>>>>> REPLACE\r\n";
        let records = parse(text, MarkerSyntax::Long);

        let got: Vec<(&str, &str, usize)> = records
            .iter()
            .map(|r| (r.target_file.as_str(), r.search.as_str(), r.order))
            .collect();
        assert_eq!(got, vec![("a", "1", 0), ("a", "3", 1), ("b", "5", 2)]);
    }

    #[test]
    fn test_hunk_id_is_stable_and_order_sensitive() {
        let a = PatchRecord {
            target_file: "a".into(),
            search: "s".into(),
            replace: "r".into(),
            order: 0,
        };
        let b = PatchRecord { order: 1, ..a.clone() };

        assert_eq!(a.hunk_id(), a.clone().hunk_id());
        assert_ne!(a.hunk_id(), b.hunk_id());
        assert_eq!(a.hunk_id().len(), 16);
    }
}
