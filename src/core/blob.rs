//! Filepath: src/core/blob.rs
//! Context blob: one delimited text document holding a project tree and the
//! selected files.
//!
//! Layout:
//! ````text
//! # Project Context
//!
//! Project Tree:
//! proj/
//! └── src/
//!     └── a.rs
//!
//! ================================================
//!
//! === File: proj/src/a.rs ===
//! ```rust
//! <escaped content>
//! ```
//! ````
//!
//! Any `=== File:` inside content gains one backslash on emission and loses
//! one on parse, so runs of backslashes survive the round trip.

use std::borrow::Cow;
use std::collections::HashSet;
use std::ops::Range;

use itertools::Itertools;
use memchr::memmem;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::lang::fence_tag;
use crate::core::tree::{FileNode, FileTree};

/// Header token that starts every file block.
pub const HEADER_TOKEN: &str = "=== File:";
/// Width of the `=` line between the tree and the blocks.
pub const SEPARATOR_WIDTH: usize = 48;

const FENCE: &str = "```";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeserializeError {
    #[error("no file blocks found in the context text")]
    NoBlocksFound,
}

/// One recovered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobFile {
    pub path: String,
    pub content: String,
}

/// Insert one backslash before every header token.
pub fn escape(content: &str) -> Cow<'_, str> {
    let bytes = content.as_bytes();
    let finder = memmem::Finder::new(HEADER_TOKEN);
    if finder.find(bytes).is_none() {
        return Cow::Borrowed(content);
    }

    let mut out = String::with_capacity(content.len() + 16);
    let mut last = 0;
    for pos in finder.find_iter(bytes) {
        out.push_str(&content[last..pos]);
        out.push('\\');
        last = pos;
    }
    out.push_str(&content[last..]);
    Cow::Owned(out)
}

/// Remove the backslash directly before every header token.
pub fn unescape(content: &str) -> Cow<'_, str> {
    let bytes = content.as_bytes();
    let finder = memmem::Finder::new(HEADER_TOKEN);

    let mut out: Option<String> = None;
    let mut last = 0;
    for pos in finder.find_iter(bytes) {
        if pos > 0 && bytes[pos - 1] == b'\\' {
            let buf = out.get_or_insert_with(|| String::with_capacity(content.len()));
            buf.push_str(&content[last..pos - 1]);
            last = pos;
        }
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&content[last..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(content),
    }
}

/// `Project Tree:` section for the selected subset.
pub fn render_tree_section(tree: &FileTree) -> String {
    let entries = tree.flatten_selected();
    if entries.is_empty() {
        return "Project Tree:\n(No files selected)\n".to_string();
    }

    let mut out = format!("Project Tree:\n{}/\n", tree.root_name());
    for entry in &entries {
        out.push_str(&entry.line());
        out.push('\n');
    }
    out
}

/// One `=== File:` block with a fenced, escaped body.
pub fn render_block(id: &str, content: &str) -> String {
    format!(
        "{HEADER_TOKEN} {id} ===\n{FENCE}{}\n{}\n{FENCE}",
        fence_tag(id),
        escape(content)
    )
}

/// Render the selected files of `tree` into a context document.
#[instrument(skip_all, fields(root = %tree.root_name()))]
pub fn serialize(tree: &FileTree) -> String {
    let files: Vec<&FileNode> = tree.selected_files();
    let blocks: Vec<String> = files
        .par_iter()
        .map(|node| render_block(&node.id, &node.load()))
        .collect();
    debug!(files = blocks.len(), "serialized context");

    assemble(&render_tree_section(tree), &blocks)
}

/// Join a rendered tree section and blocks into the final document.
pub fn assemble(tree_section: &str, blocks: &[String]) -> String {
    format!(
        "# Project Context\n\n{tree_section}\n{}\n\n{}",
        "=".repeat(SEPARATOR_WIDTH),
        blocks.join("\n\n")
    )
}

/// Byte ranges of one block inside a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSpan {
    /// Path exactly as written in the header
    pub path: String,
    /// Header line, terminator included
    pub header: Range<usize>,
    /// Escaped body between the fences, trailing newline excluded
    pub body: Range<usize>,
}

/// Block layout of a document, as found by a single forward scan.
#[derive(Debug, Clone, Default)]
pub struct DocumentIndex {
    pub project: Option<String>,
    pub blocks: Vec<BlockSpan>,
    /// Headers whose body could not be delimited
    pub skipped: usize,
}

impl DocumentIndex {
    pub fn scan(text: &str) -> Self {
        let headers = find_headers(text);
        let mut blocks = Vec::with_capacity(headers.len());
        let mut skipped = 0;

        for (i, (header, path)) in headers.iter().enumerate() {
            let region_end = headers
                .get(i + 1)
                .map(|(next, _)| next.start)
                .unwrap_or(text.len());

            match locate_body(text, header.end, region_end) {
                Some(body) => blocks.push(BlockSpan {
                    path: path.clone(),
                    header: header.clone(),
                    body,
                }),
                None => {
                    warn!(path = %path, "block without a closing fence skipped");
                    skipped += 1;
                }
            }
        }

        Self {
            project: project_name(text),
            blocks,
            skipped,
        }
    }

    /// The block whose header path equals `path`. A path that heads more
    /// than one block addresses none of them.
    pub fn find(&self, path: &str) -> Option<&BlockSpan> {
        let mut matches = self.blocks.iter().filter(|b| b.path == path);
        let first = matches.next()?;
        matches.next().is_none().then_some(first)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|b| b.path.as_str())
    }

    /// Header paths used by more than one block.
    pub fn repeated_paths(&self) -> HashSet<String> {
        self.paths().duplicates().map(str::to_string).collect()
    }
}

/// Header lines and their raw paths, in document order.
fn find_headers(text: &str) -> Vec<(Range<usize>, String)> {
    let mut out = Vec::new();
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();

        let Some(rest) = line.strip_prefix(HEADER_TOKEN) else {
            continue;
        };
        let rest = rest.trim_end();
        let path = rest.strip_suffix("===").unwrap_or(rest).trim();
        out.push((start..offset, path.to_string()));
    }

    out
}

/// Body between the first fence after `from` and the last fence before
/// `to`, minus exactly one line terminator.
fn locate_body(text: &str, from: usize, to: usize) -> Option<Range<usize>> {
    let region = &text[from..to];
    let open = memmem::find(region.as_bytes(), FENCE.as_bytes())?;
    let open_line_end = open + memchr::memchr(b'\n', &region.as_bytes()[open..])?;
    let content_start = open_line_end + 1;
    let crlf = open_line_end > 0 && region.as_bytes()[open_line_end - 1] == b'\r';

    let close = content_start + memmem::rfind(&region.as_bytes()[content_start..], FENCE.as_bytes())?;

    let mut end = close;
    let body = &region[content_start..end];
    if body.ends_with('\n') {
        end -= 1;
        if crlf && region[content_start..end].ends_with('\r') {
            end -= 1;
        }
    }

    Some(from + content_start..from + end)
}

/// Project name from the `Project Tree:` section, if present.
pub fn project_name(text: &str) -> Option<String> {
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        if line.trim_end() == "Project Tree:" {
            let root = lines.next()?.trim_end();
            return root
                .strip_suffix('/')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string);
        }
    }
    None
}

/// Neutralize a header path: forward slashes only, no leading `./` or `/`,
/// no `.`/`..`/empty segments. `None` when nothing usable remains.
pub fn sanitize_path(raw: &str) -> Option<String> {
    let cleaned: Vec<&str> = raw
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();
    (!cleaned.is_empty()).then(|| cleaned.join("/"))
}

/// Synthetic name for the `n`-th recovered file whose path is unusable.
pub fn synthetic_name(n: usize) -> String {
    format!("root_file_{n}.txt")
}

/// Parse a context document back into files (header order).
#[instrument(skip_all, fields(bytes = text.len()))]
pub fn deserialize(text: &str) -> Result<Vec<BlobFile>, DeserializeError> {
    let index = DocumentIndex::scan(text);
    if index.blocks.is_empty() {
        return Err(DeserializeError::NoBlocksFound);
    }

    let files: Vec<BlobFile> = index
        .blocks
        .par_iter()
        .enumerate()
        .map(|(n, block)| BlobFile {
            path: sanitize_path(&block.path).unwrap_or_else(|| synthetic_name(n)),
            content: unescape(&text[block.body.clone()]).into_owned(),
        })
        .collect();

    debug!(files = files.len(), skipped = index.skipped, "deserialized context");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree::FileEntry;

    fn two_file_tree() -> FileTree {
        FileTree::build(vec![
            FileEntry::inline("proj/src/a.rs", "fn a() {}\n"),
            FileEntry::inline("proj/b.md", "# B"),
        ])
        .unwrap()
    }

    #[test]
    fn test_document_layout() {
        let doc = serialize(&two_file_tree());
        insta::assert_snapshot!(doc, @r####"
# Project Context

Project Tree:
proj/
├── src/
│   └── a.rs
└── b.md

================================================

=== File: proj/src/a.rs ===
```rust
fn a() {}

```

=== File: proj/b.md ===
```markdown
# B
```
"####);
    }

    #[test]
    fn test_one_of_two_selected() {
        let mut tree = two_file_tree();
        tree.set_selected("proj/b.md", false);

        let doc = serialize(&tree);
        assert!(doc.contains("=== File: proj/src/a.rs ==="));
        assert!(!doc.contains("=== File: proj/b.md ==="));
        assert!(!doc.contains("b.md"));

        let files = deserialize(&doc).unwrap();
        assert_eq!(
            files,
            vec![BlobFile {
                path: "proj/src/a.rs".into(),
                content: "fn a() {}\n".into()
            }]
        );
    }

    #[test]
    fn test_nothing_selected() {
        let mut tree = two_file_tree();
        let root = tree.root_name().to_string();
        tree.set_selected(&root, false);

        let doc = serialize(&tree);
        assert!(doc.contains("Project Tree:\n(No files selected)\n"));
        assert_eq!(deserialize(&doc), Err(DeserializeError::NoBlocksFound));
    }

    #[test]
    fn test_header_token_in_content_is_escaped() {
        let nasty = "before\n=== File: evil.txt ===\n```\nx\n```\n\\=== File: kept\nafter";
        let tree = FileTree::build(vec![
            FileEntry::inline("p/nasty.txt", nasty),
            FileEntry::inline("p/z.txt", "z"),
        ])
        .unwrap();

        let doc = serialize(&tree);
        let files = deserialize(&doc).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "p/nasty.txt");
        assert_eq!(files[0].content, nasty);
        assert_eq!(files[1].content, "z");
    }

    #[test]
    fn test_escape_is_reversible_for_backslash_runs() {
        for s in ["=== File:", "\\=== File:", "\\\\=== File: x", "plain", ""] {
            let escaped = escape(s);
            assert!(!escaped.contains("\n=== File:"));
            assert_eq!(unescape(&escaped), s);
        }
    }

    #[test]
    fn test_block_without_fence_is_skipped() {
        let doc = "=== File: a.txt ===\nno fence here\n\n=== File: b.txt ===\n```\nbody\n```";
        let index = DocumentIndex::scan(doc);
        assert_eq!(index.skipped, 1);

        let files = deserialize(doc).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "b.txt");
        assert_eq!(files[0].content, "body");
    }

    #[test]
    fn test_paths_are_sanitized() {
        let doc = "=== File: ./../etc//passwd ===\n```\nx\n```\n\n=== File: / ===\n```\ny\n```";
        let files = deserialize(doc).unwrap();

        assert_eq!(files[0].path, "etc/passwd");
        assert_eq!(files[1].path, "root_file_1.txt");
    }

    #[test]
    fn test_crlf_document() {
        let doc = "=== File: a.txt ===\r\n```text\r\nline1\r\nline2\r\n```\r\n";
        let files = deserialize(doc).unwrap();
        assert_eq!(files[0].path, "a.txt");
        assert_eq!(files[0].content, "line1\r\nline2");
    }

    #[test]
    fn test_inner_fences_survive() {
        let content = "```\ncode\n```\ntrailing";
        let doc = render_block("p/readme.md", content);
        let files = deserialize(&doc).unwrap();
        assert_eq!(files[0].content, content);
    }

    #[test]
    fn test_project_name_recovery() {
        let doc = serialize(&two_file_tree());
        assert_eq!(project_name(&doc).as_deref(), Some("proj"));
        assert_eq!(project_name("Project Tree:\n(No files selected)\n"), None);
        assert_eq!(project_name("nothing"), None);
    }

    #[test]
    fn test_repeated_header_path_addresses_no_block() {
        let doc = format!(
            "{}\n\n{}\n\n{}",
            render_block("p/a.js", "first"),
            render_block("p/b.js", "other"),
            render_block("p/a.js", "second"),
        );
        let index = DocumentIndex::scan(&doc);

        assert_eq!(index.blocks.len(), 3);
        assert!(index.find("p/a.js").is_none());
        assert!(index.find("p/b.js").is_some());
        assert_eq!(index.repeated_paths(), HashSet::from(["p/a.js".to_string()]));
    }
}
