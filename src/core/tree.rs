//! Filepath: src/core/tree.rs
//! Arena-backed project tree keyed by full path.
//!
//! - `build` turns a flat list of (path, content) entries into nested nodes,
//!   creating intermediate directories on demand.
//! - `prune` applies ignore rules depth-first; a directory's own ignore file
//!   is read before any of its children are tested. Sibling subtrees are
//!   evaluated in parallel, each with its own copy of the scope stack.
//! - `flatten` yields the canonical pre-order (dirs first, then names) with
//!   ASCII-tree prefixes; serialization uses the same order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use itertools::Itertools;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::ignore::{IgnoreResolver, ScopeFrame, ScopeStack};
use crate::infra::io;

/// Root name used when the input paths carry no leading directory.
pub const PLACEHOLDER_ROOT: &str = "Project";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("no files to build a tree from")]
    EmptyInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Dir,
}

/// Lazy accessor for a file's text.
#[derive(Debug, Clone)]
pub enum ContentSource {
    /// Content already in memory (uploads, tests, unpacked blobs)
    Inline(Arc<str>),
    /// Read from disk on demand, subject to the size limit
    Disk { path: PathBuf, max_bytes: u64 },
}

impl ContentSource {
    pub fn inline(text: impl Into<Arc<str>>) -> Self {
        ContentSource::Inline(text.into())
    }

    /// Text or a sentinel line; never fails.
    pub fn load(&self, name: &str) -> String {
        match self {
            ContentSource::Inline(text) => text.to_string(),
            ContentSource::Disk { path, max_bytes } => io::load_text(path, name, *max_bytes),
        }
    }
}

/// One input to [`FileTree::build`].
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Slash-separated path, optionally led by the project directory
    pub path: String,
    pub content: ContentSource,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, content: ContentSource) -> Self {
        Self {
            path: path.into(),
            content,
        }
    }

    pub fn inline(path: impl Into<String>, text: impl Into<Arc<str>>) -> Self {
        Self::new(path, ContentSource::inline(text))
    }
}

#[derive(Debug, Clone)]
pub struct FileNode {
    /// Full path, starting with the root name
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    /// `None` for directories
    pub content: Option<ContentSource>,
    pub selected: bool,
    /// name → child id (directories only)
    pub children: BTreeMap<String, String>,
}

impl FileNode {
    fn dir(id: String, name: String) -> Self {
        Self {
            id,
            name,
            kind: NodeKind::Dir,
            content: None,
            selected: true,
            children: BTreeMap::new(),
        }
    }

    fn file(id: String, name: String, content: ContentSource) -> Self {
        Self {
            id,
            name,
            kind: NodeKind::File,
            content: Some(content),
            selected: true,
            children: BTreeMap::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Dir
    }

    /// Load this file's text (empty for directories).
    pub fn load(&self) -> String {
        self.content
            .as_ref()
            .map(|c| c.load(&self.name))
            .unwrap_or_default()
    }
}

/// Row of a flattened tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatEntry {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub selected: bool,
    /// 0 for the root's children
    pub depth: usize,
    /// Continuation columns inherited from ancestors
    pub prefix: String,
    /// `├── ` or `└── `
    pub connector: &'static str,
}

impl FlatEntry {
    /// `<prefix><connector><name>[/]`
    pub fn line(&self) -> String {
        let slash = if self.kind == NodeKind::Dir { "/" } else { "" };
        format!("{}{}{}{}", self.prefix, self.connector, self.name, slash)
    }
}

#[derive(Debug, Clone)]
pub struct FileTree {
    root: String,
    nodes: HashMap<String, FileNode>,
}

impl FileTree {
    /// Build a tree from flat entries. Every node starts selected.
    ///
    /// The root is named after the first path's leading directory, or
    /// [`PLACEHOLDER_ROOT`] when that path has none. Paths led by the root
    /// name are inserted beneath it as-is; others are nested under it.
    /// Duplicate paths keep the first entry.
    pub fn build(entries: Vec<FileEntry>) -> Result<Self, TreeError> {
        let first = entries.first().ok_or(TreeError::EmptyInput)?;
        let first_path = normalize(&first.path);
        let root = match first_path.split_once('/') {
            Some((head, _)) if !head.is_empty() => head.to_string(),
            _ => PLACEHOLDER_ROOT.to_string(),
        };

        let mut tree = Self {
            nodes: HashMap::from([(root.clone(), FileNode::dir(root.clone(), root.clone()))]),
            root,
        };

        for entry in entries {
            let path = normalize(&entry.path);
            let rel = match path.split_once('/') {
                Some((head, rest)) if head == tree.root => rest.to_string(),
                _ => path,
            };
            if rel.is_empty() {
                continue;
            }
            tree.insert(&rel, entry.content);
        }

        Ok(tree)
    }

    fn insert(&mut self, rel: &str, content: ContentSource) {
        let segments: Vec<&str> = rel.split('/').collect();
        let mut parent = self.root.clone();

        for (i, segment) in segments.iter().enumerate() {
            let id = format!("{parent}/{segment}");
            let is_leaf = i + 1 == segments.len();

            match self.nodes.get(&id).map(|n| n.kind) {
                Some(NodeKind::File) => {
                    if !is_leaf {
                        warn!(path = %id, "file shadows a directory path; entry skipped");
                    }
                    return;
                }
                Some(NodeKind::Dir) => {
                    if is_leaf {
                        warn!(path = %id, "directory shadows a file path; entry skipped");
                        return;
                    }
                }
                None => {
                    let node = if is_leaf {
                        FileNode::file(id.clone(), segment.to_string(), content.clone())
                    } else {
                        FileNode::dir(id.clone(), segment.to_string())
                    };
                    self.nodes.insert(id.clone(), node);
                    if let Some(p) = self.nodes.get_mut(&parent) {
                        p.children.insert(segment.to_string(), id.clone());
                    }
                }
            }

            parent = id;
        }
    }

    pub fn root_name(&self) -> &str {
        &self.root
    }

    pub fn root(&self) -> &FileNode {
        &self.nodes[&self.root]
    }

    pub fn get(&self, id: &str) -> Option<&FileNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn file_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.kind == NodeKind::File)
            .count()
    }

    /// Outermost scope stack for this tree: `defaults` anchored at the root.
    pub fn root_scopes(&self, defaults: ScopeFrame) -> ScopeStack {
        ScopeStack::with_frame(defaults.anchored_at(self.root.clone()))
    }

    /// Remove every ignored node. Returns the number of subtrees removed.
    #[instrument(skip_all, fields(root = %self.root))]
    pub fn prune(
        &mut self,
        resolver: &IgnoreResolver,
        inherited: &ScopeStack,
        ignore_file: &str,
    ) -> usize {
        let doomed = self.collect_ignored(&self.root, inherited, resolver, ignore_file);
        debug!(removed = doomed.len(), "pruned ignored paths");

        for id in &doomed {
            self.remove_subtree(id);
        }
        doomed.len()
    }

    /// Read-only pass: ids of ignored children beneath `dir_id`.
    fn collect_ignored(
        &self,
        dir_id: &str,
        inherited: &ScopeStack,
        resolver: &IgnoreResolver,
        ignore_file: &str,
    ) -> Vec<String> {
        let Some(dir) = self.nodes.get(dir_id) else {
            return Vec::new();
        };

        let local_rules = dir
            .children
            .get(ignore_file)
            .and_then(|id| self.nodes.get(id))
            .filter(|n| n.kind == NodeKind::File);
        let scopes = match local_rules {
            Some(node) => inherited.pushed(ScopeFrame::parse(dir_id, &node.load())),
            None => inherited.clone(),
        };

        let mut doomed = Vec::new();
        let mut survivors = Vec::new();
        for child_id in dir.children.values() {
            if resolver.is_ignored(child_id, &scopes) {
                doomed.push(child_id.clone());
            } else if self.nodes.get(child_id).is_some_and(FileNode::is_dir) {
                survivors.push(child_id.as_str());
            }
        }

        let nested: Vec<String> = survivors
            .par_iter()
            .flat_map_iter(|id| self.collect_ignored(id, &scopes, resolver, ignore_file))
            .collect();
        doomed.extend(nested);
        doomed
    }

    fn remove_subtree(&mut self, id: &str) {
        let Some(node) = self.nodes.remove(id) else {
            return;
        };
        if let Some((parent, _)) = id.rsplit_once('/') {
            if let Some(p) = self.nodes.get_mut(parent) {
                p.children.remove(&node.name);
            }
        }
        for child in node.children.values() {
            self.remove_subtree(child);
        }
    }

    /// Children of `dir_id`: directories first, then byte-wise by name.
    pub fn sorted_children(&self, dir_id: &str) -> Vec<&FileNode> {
        let Some(dir) = self.nodes.get(dir_id) else {
            return Vec::new();
        };
        let mut kids: Vec<&FileNode> = dir
            .children
            .values()
            .filter_map(|id| self.nodes.get(id))
            .collect();
        kids.sort_by(|a, b| {
            (a.kind != NodeKind::Dir, &a.name).cmp(&(b.kind != NodeKind::Dir, &b.name))
        });
        kids
    }

    /// Every node below the root in canonical order.
    pub fn flatten(&self) -> Vec<FlatEntry> {
        self.flatten_where(&|_| true)
    }

    /// Selected files plus the directories needed to reach them.
    pub fn flatten_selected(&self) -> Vec<FlatEntry> {
        let mut visible: HashSet<&str> = HashSet::new();
        for node in self.nodes.values() {
            if node.kind == NodeKind::File && node.selected {
                let mut cur = node.id.as_str();
                while let Some((parent, _)) = cur.rsplit_once('/') {
                    if !visible.insert(parent) {
                        break;
                    }
                    cur = parent;
                }
            }
        }

        self.flatten_where(&|n| match n.kind {
            NodeKind::File => n.selected,
            NodeKind::Dir => visible.contains(n.id.as_str()),
        })
    }

    fn flatten_where(&self, keep: &dyn Fn(&FileNode) -> bool) -> Vec<FlatEntry> {
        let mut out = Vec::with_capacity(self.nodes.len());
        self.walk(&self.root, "", 0, keep, &mut out);
        out
    }

    fn walk(
        &self,
        dir_id: &str,
        prefix: &str,
        depth: usize,
        keep: &dyn Fn(&FileNode) -> bool,
        out: &mut Vec<FlatEntry>,
    ) {
        let kids: Vec<&FileNode> = self
            .sorted_children(dir_id)
            .into_iter()
            .filter(|n| keep(n))
            .collect();

        for (i, child) in kids.iter().enumerate() {
            let last = i + 1 == kids.len();
            out.push(FlatEntry {
                id: child.id.clone(),
                name: child.name.clone(),
                kind: child.kind,
                selected: child.selected,
                depth,
                prefix: prefix.to_string(),
                connector: if last { "└── " } else { "├── " },
            });

            if child.kind == NodeKind::Dir {
                let next = format!("{prefix}{}", if last { "    " } else { "│   " });
                self.walk(&child.id, &next, depth + 1, keep, out);
            }
        }
    }

    /// Flip `id`'s selection; a directory pushes its new state to every
    /// descendant. Returns the new state, or `None` for unknown ids.
    pub fn toggle(&mut self, id: &str) -> Option<bool> {
        let state = !self.nodes.get(id)?.selected;
        self.set_selected(id, state);
        Some(state)
    }

    /// Set `id` and all its descendants to `state`.
    pub fn set_selected(&mut self, id: &str, state: bool) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        node.selected = state;
        let children: Vec<String> = node.children.values().cloned().collect();
        for child in children {
            self.set_selected(&child, state);
        }
        true
    }

    /// Selected files in flatten order.
    pub fn selected_files(&self) -> Vec<&FileNode> {
        self.flatten_selected()
            .iter()
            .filter(|e| e.kind == NodeKind::File)
            .filter_map(|e| self.nodes.get(&e.id))
            .collect()
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .join("/")
}
