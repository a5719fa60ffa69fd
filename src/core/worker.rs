//! Filepath: src/core/worker.rs
//! One-shot background tasks over immutable snapshots.
//!
//! A request struct goes in and a response struct comes back over a
//! single-use channel. Nothing is cancelled: every response carries the
//! request's generation and callers drop the ones they no longer want.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};

use indexmap::IndexMap;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use xxhash_rust::xxh64::xxh64;

use crate::core::blob::{self, BlobFile, DeserializeError, sanitize_path, synthetic_name};
use crate::core::locate::{MatchLocator, MatchResult, resolve_target};
use crate::core::patch::PatchRecord;
use crate::core::tree::{FileNode, FileTree, NodeKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker exited without responding")]
    Disconnected,
}

/// Receiving end of a one-shot task.
#[derive(Debug)]
pub struct Pending<T> {
    rx: Receiver<T>,
}

impl<T> Pending<T> {
    /// Block until the response arrives.
    pub fn wait(self) -> Result<T, WorkerError> {
        self.rx.recv().map_err(|_| WorkerError::Disconnected)
    }
}

fn spawn<Req, Resp, F>(request: Req, handler: F) -> Pending<Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: FnOnce(Req) -> Resp + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    rayon::spawn(move || {
        // The caller may have dropped the receiver; that is its choice
        let _ = tx.send(handler(request));
    });
    Pending { rx }
}

/// Path → text view of whatever the proposal will be matched against.
#[derive(Debug, Clone, Default)]
pub struct FileSnapshot {
    /// Project root name, used when resolving targets
    pub root: Option<String>,
    pub files: IndexMap<String, Arc<str>>,
    /// Header paths that appear on more than one block
    pub repeated: HashSet<String>,
    /// Fingerprint of the document the bodies came from
    pub source: Option<u64>,
}

impl FileSnapshot {
    /// Bodies of a blob, keyed by their header paths. A repeated path keeps
    /// its first body and is marked so nothing gets located against it.
    pub fn from_blob(text: &str) -> Self {
        let index = blob::DocumentIndex::scan(text);
        let repeated = index.repeated_paths();
        if !repeated.is_empty() {
            warn!(paths = ?repeated, "document repeats file headers");
        }

        let mut files = IndexMap::with_capacity(index.blocks.len());
        for b in &index.blocks {
            files.entry(b.path.clone()).or_insert_with(|| {
                Arc::<str>::from(blob::unescape(&text[b.body.clone()]).into_owned())
            });
        }
        Self {
            root: index.project,
            files,
            repeated,
            source: Some(fingerprint(text)),
        }
    }

    /// Every file in the tree, read through its content source.
    pub fn from_tree(tree: &FileTree) -> Self {
        let nodes: Vec<&FileNode> = tree
            .flatten()
            .iter()
            .filter(|e| e.kind == NodeKind::File)
            .filter_map(|e| tree.get(&e.id))
            .collect();
        let loaded: Vec<(String, Arc<str>)> = nodes
            .par_iter()
            .map(|node| (node.id.clone(), Arc::<str>::from(node.load())))
            .collect();
        Self {
            root: Some(tree.root_name().to_string()),
            files: loaded.into_iter().collect(),
            repeated: HashSet::new(),
            source: None,
        }
    }

    /// Whether this snapshot was taken from exactly `document`.
    pub fn is_from(&self, document: &str) -> bool {
        self.source == Some(fingerprint(document))
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|s| s.as_ref())
    }

    pub fn paths(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }
}

#[derive(Debug, Clone)]
pub struct LocateRequest {
    pub generation: u64,
    pub snapshot: Arc<FileSnapshot>,
    pub records: Vec<PatchRecord>,
    pub fuzzy_max_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct LocateResponse {
    pub generation: u64,
    /// One result per record, in record order
    pub results: Vec<MatchResult>,
}

/// Resolve each record's target and locate its search text.
#[instrument(skip_all, fields(generation = request.generation, records = request.records.len()))]
pub fn handle_locate(request: LocateRequest) -> LocateResponse {
    let locator = MatchLocator::new(request.fuzzy_max_bytes);
    let snapshot = &request.snapshot;
    let paths = snapshot.paths();
    let root = snapshot.root.as_deref();

    let results: Vec<MatchResult> = request
        .records
        .par_iter()
        .map(|record| {
            let resolved = resolve_target(&record.target_file, &paths, root);
            match resolved.as_deref().and_then(|p| snapshot.get(p).map(|c| (p, c))) {
                Some((path, _)) if snapshot.repeated.contains(path) => {
                    MatchResult::repeated_header(record.clone(), path)
                }
                Some((path, content)) => locator.locate_record(path, content, record),
                None => MatchResult::missing_file(record.clone()),
            }
        })
        .collect();

    debug!(
        unique = results.iter().filter(|r| r.is_unique()).count(),
        "located records"
    );
    LocateResponse {
        generation: request.generation,
        results,
    }
}

fn fingerprint(text: &str) -> u64 {
    xxh64(text.as_bytes(), 0)
}

pub fn spawn_locate(request: LocateRequest) -> Pending<LocateResponse> {
    spawn(request, handle_locate)
}

#[derive(Debug, Clone)]
pub struct UnpackRequest {
    pub generation: u64,
    pub text: Arc<str>,
    /// Drop the recovered project directory from every path
    pub strip_root: bool,
}

#[derive(Debug, Clone)]
pub struct UnpackResponse {
    pub generation: u64,
    pub project: Option<String>,
    pub result: Result<Vec<BlobFile>, DeserializeError>,
}

/// Deserialize a blob into output-ready relative paths.
pub fn handle_unpack(request: UnpackRequest) -> UnpackResponse {
    let project = blob::project_name(&request.text);
    let result = blob::deserialize(&request.text).map(|files| {
        if !request.strip_root {
            return files;
        }
        let prefix = project.as_ref().map(|p| format!("{p}/"));
        files
            .into_iter()
            .enumerate()
            .map(|(n, file)| {
                let stripped = match &prefix {
                    Some(prefix) => file.path.strip_prefix(prefix.as_str()).unwrap_or(&file.path),
                    None => &file.path,
                };
                BlobFile {
                    path: sanitize_path(stripped).unwrap_or_else(|| synthetic_name(n)),
                    content: file.content,
                }
            })
            .collect()
    });

    UnpackResponse {
        generation: request.generation,
        project,
        result,
    }
}

pub fn spawn_unpack(request: UnpackRequest) -> Pending<UnpackResponse> {
    spawn(request, handle_unpack)
}
